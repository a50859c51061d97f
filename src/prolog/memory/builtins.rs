//! Deterministic built-in predicates and arithmetic of the memory backend.
//!
//! Control constructs live in the machine; everything here runs to
//! completion without calling back into user code.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::prolog::TermKind;
use crate::syntax::{OwnedTerm, NIL};

use super::database::{Clause, PredKey, Procedure};
use super::errors;
use super::machine::Flow;
use super::store::{Addr, Cell, Naming, Store};
use super::MemoryBackend;

/// Library predicates loaded into the `system` module
pub(crate) const LIBRARY: &str = r#"
member(X, [X|_]).
member(X, [_|T]) :- member(X, T).
memberchk(X, L) :- member(X, L), !.
append([], L, L).
append([H|T], L, [H|R]) :- append(T, L, R).
length(L, N) :- '$length'(L, 0, N).
'$length'([], N, N).
'$length'([_|T], N0, N) :- N1 is N0 + 1, '$length'(T, N1, N).
reverse(L, R) :- '$reverse'(L, [], R).
'$reverse'([], A, A).
'$reverse'([H|T], A, R) :- '$reverse'(T, [H|A], R).
nth0(I, L, E) :- '$nth'(L, 0, I, E).
nth1(I, L, E) :- '$nth'(L, 1, I, E).
'$nth'([H|_], B, B, H).
'$nth'([_|T], B0, I, E) :- B1 is B0 + 1, '$nth'(T, B1, I, E).
last([X], X) :- !.
last([_|T], X) :- last(T, X).
sum_list(L, S) :- '$sum_list'(L, 0, S).
'$sum_list'([], S, S).
'$sum_list'([H|T], S0, S) :- S1 is S0 + H, '$sum_list'(T, S1, S).
once(G) :- call(G), !.
ignore(G) :- (call(G) -> true ; true).
"#;

/// Predicates that cannot be redefined by assert or registration
pub(crate) fn is_builtin(name: &str, arity: usize) -> bool {
    matches!(
        (name, arity),
        ("true", 0)
            | ("fail", 0)
            | ("false", 0)
            | ("!", 0)
            | (",", 2)
            | (";", 2)
            | ("->", 2)
            | ("\\+", 1)
            | ("not", 1)
            | (":", 2)
            | ("catch", 3)
            | ("findall", 3)
            | ("forall", 2)
            | ("between", 3)
            | ("=", 2)
            | ("\\=", 2)
            | ("==", 2)
            | ("\\==", 2)
            | ("@<", 2)
            | ("@>", 2)
            | ("@=<", 2)
            | ("@>=", 2)
            | ("compare", 3)
            | ("var", 1)
            | ("nonvar", 1)
            | ("atom", 1)
            | ("number", 1)
            | ("integer", 1)
            | ("float", 1)
            | ("atomic", 1)
            | ("compound", 1)
            | ("callable", 1)
            | ("is_list", 1)
            | ("string", 1)
            | ("ground", 1)
            | ("is", 2)
            | ("=:=", 2)
            | ("=\\=", 2)
            | ("<", 2)
            | (">", 2)
            | ("=<", 2)
            | (">=", 2)
            | ("throw", 1)
            | ("assert", 1)
            | ("assertz", 1)
            | ("asserta", 1)
            | ("retract", 1)
            | ("dynamic", 1)
            | ("functor", 3)
            | ("arg", 3)
            | ("=..", 2)
            | ("copy_term", 2)
            | ("atom_length", 2)
    ) || (name == "call" && (1..=8).contains(&arity))
}

/// Run a deterministic built-in; `None` when `name/arity` is not one
pub(super) fn call(be: &MemoryBackend, name: &str, args: &[Addr], module: &Rc<str>) -> Option<Flow> {
    let flow = match (name, args.len()) {
        ("=", 2) => {
            let mut store = be.store.borrow_mut();
            truth(store.unify(args[0], args[1]))
        }
        ("\\=", 2) => {
            let mut store = be.store.borrow_mut();
            let mark = store.trail_len();
            let unifiable = store.unify(args[0], args[1]);
            store.undo_to(mark);
            truth(!unifiable)
        }
        ("==", 2) => truth(be.store.borrow().compare(args[0], args[1]) == Ordering::Equal),
        ("\\==", 2) => truth(be.store.borrow().compare(args[0], args[1]) != Ordering::Equal),
        ("@<", 2) | ("@>", 2) | ("@=<", 2) | ("@>=", 2) => {
            let order = be.store.borrow().compare(args[0], args[1]);
            truth(match name {
                "@<" => order == Ordering::Less,
                "@>" => order == Ordering::Greater,
                "@=<" => order != Ordering::Greater,
                _ => order != Ordering::Less,
            })
        }
        ("compare", 3) => {
            let mut store = be.store.borrow_mut();
            let symbol = match store.compare(args[1], args[2]) {
                Ordering::Less => "<",
                Ordering::Equal => "=",
                Ordering::Greater => ">",
            };
            let atom = store.new_atom(symbol);
            truth(store.unify(args[0], atom))
        }
        ("var", 1) | ("nonvar", 1) | ("atom", 1) | ("number", 1) | ("integer", 1) | ("float", 1)
        | ("atomic", 1) | ("compound", 1) | ("callable", 1) | ("is_list", 1) | ("string", 1)
        | ("ground", 1) => truth(type_test(&be.store.borrow(), name, args[0])),
        ("is", 2) => {
            let mut store = be.store.borrow_mut();
            match eval(&store, args[1]) {
                Ok(value) => {
                    let result = store.push(value.into_cell());
                    truth(store.unify(args[0], result))
                }
                Err(ball) => Flow::Throw(ball),
            }
        }
        ("=:=", 2) | ("=\\=", 2) | ("<", 2) | (">", 2) | ("=<", 2) | (">=", 2) => {
            let store = be.store.borrow();
            match (eval(&store, args[0]), eval(&store, args[1])) {
                (Ok(x), Ok(y)) => {
                    let order = x.compare(y);
                    truth(match name {
                        "=:=" => order == Some(Ordering::Equal),
                        "=\\=" => order != Some(Ordering::Equal),
                        "<" => order == Some(Ordering::Less),
                        ">" => order == Some(Ordering::Greater),
                        "=<" => matches!(order, Some(Ordering::Less | Ordering::Equal)),
                        _ => matches!(order, Some(Ordering::Greater | Ordering::Equal)),
                    })
                }
                (Err(ball), _) | (_, Err(ball)) => Flow::Throw(ball),
            }
        }
        ("throw", 1) => {
            let store = be.store.borrow();
            if store.is_var(args[0]) {
                Flow::Throw(errors::instantiation_error())
            } else {
                Flow::Throw(store.to_owned(args[0], Naming::Sequential))
            }
        }
        ("assert", 1) | ("assertz", 1) => assert(be, args[0], module, true),
        ("asserta", 1) => assert(be, args[0], module, false),
        ("retract", 1) => retract(be, args[0], module),
        ("dynamic", 1) => {
            let spec = be.store.borrow().to_owned(args[0], Naming::Sequential);
            match declare_dynamic(be, &spec, module) {
                Ok(()) => Flow::Proceed,
                Err(ball) => Flow::Throw(ball),
            }
        }
        ("functor", 3) => functor(&mut be.store.borrow_mut(), args[0], args[1], args[2]),
        ("arg", 3) => arg(&mut be.store.borrow_mut(), args[0], args[1], args[2]),
        ("=..", 2) => univ(&mut be.store.borrow_mut(), args[0], args[1]),
        ("copy_term", 2) => {
            let mut store = be.store.borrow_mut();
            let owned = store.to_owned(args[0], Naming::Sequential);
            let copy = store.from_owned(&owned, &mut Vec::new());
            truth(store.unify(args[1], copy))
        }
        ("atom_length", 2) => {
            let mut store = be.store.borrow_mut();
            let length = match store.cell(args[0]) {
                Cell::Atom(text) | Cell::Str(text) => text.chars().count() as i64,
                Cell::Var => return Some(Flow::Throw(errors::instantiation_error())),
                _ => {
                    let culprit = store.to_owned(args[0], Naming::Sequential);
                    return Some(Flow::Throw(errors::type_error("atom", culprit)));
                }
            };
            let value = store.new_int(length);
            truth(store.unify(args[1], value))
        }
        _ => return None,
    };
    Some(flow)
}

fn truth(value: bool) -> Flow {
    if value {
        Flow::Proceed
    } else {
        Flow::Fail
    }
}

fn type_test(store: &Store, name: &str, t: Addr) -> bool {
    let kind = store.kind(t);
    match name {
        "var" => kind == TermKind::Variable,
        "nonvar" => kind != TermKind::Variable,
        "atom" => matches!(kind, TermKind::Atom | TermKind::Nil),
        "number" => matches!(kind, TermKind::Integer | TermKind::Float),
        "integer" => kind == TermKind::Integer,
        "float" => kind == TermKind::Float,
        "atomic" => !matches!(kind, TermKind::Variable | TermKind::Compound | TermKind::ListPair),
        "compound" => matches!(kind, TermKind::Compound | TermKind::ListPair),
        "callable" => matches!(kind, TermKind::Atom | TermKind::Nil | TermKind::Compound | TermKind::ListPair),
        "is_list" => store.list_items(t).is_some(),
        "string" => kind == TermKind::String,
        "ground" => is_ground(&store.to_owned(t, Naming::Sequential)),
        _ => false,
    }
}

fn is_ground(term: &OwnedTerm) -> bool {
    let mut pending = vec![term];
    while let Some(term) = pending.pop() {
        match term {
            OwnedTerm::Variable(_) => return false,
            OwnedTerm::Compound { args, .. } => pending.extend(args),
            _ => {}
        }
    }
    true
}

// Database

/// Peel `Module:Term` qualifications
fn strip_module(mut term: OwnedTerm, module: &Rc<str>) -> (Rc<str>, OwnedTerm) {
    let mut module = module.clone();
    while let OwnedTerm::Compound { name, args } = &mut term {
        let qualifier = match args.as_slice() {
            [OwnedTerm::Atom(qualifier), _] if name == ":" => Rc::from(qualifier.as_str()),
            _ => break,
        };
        let inner = args.remove(1);
        module = qualifier;
        term = inner;
    }
    (module, term)
}

/// Head and body of `Head :- Body`
fn split_rule(term: &mut OwnedTerm) -> Option<(OwnedTerm, OwnedTerm)> {
    match term {
        OwnedTerm::Compound { name, args } if name == ":-" && args.len() == 2 => {
            let body = args.remove(1);
            Some((args.remove(0), body))
        }
        _ => None,
    }
}

fn assert(be: &MemoryBackend, clause: Addr, module: &Rc<str>, at_end: bool) -> Flow {
    let term = {
        let store = be.store.borrow();
        if store.is_var(clause) {
            return Flow::Throw(errors::instantiation_error());
        }
        store.to_owned(clause, Naming::Sequential)
    };
    let (module, term) = strip_module(term, module);
    let mut term = term;
    let (head, body) = match split_rule(&mut term) {
        Some(parts) => parts,
        None => (term, OwnedTerm::atom("true")),
    };
    let (module, head) = strip_module(head, &module);

    let body = match body {
        OwnedTerm::Variable(_) => OwnedTerm::compound("call", vec![body]),
        OwnedTerm::Integer(_) | OwnedTerm::Float(_) | OwnedTerm::String(_) => {
            return Flow::Throw(errors::type_error("callable", body));
        }
        other => other,
    };
    let (name, arity) = match &head {
        OwnedTerm::Variable(_) => return Flow::Throw(errors::instantiation_error()),
        OwnedTerm::Atom(_) | OwnedTerm::Compound { .. } => match head.name_arity() {
            Some((name, arity)) => (name.to_string(), arity),
            None => return Flow::Throw(errors::type_error("callable", head.clone())),
        },
        other => return Flow::Throw(errors::type_error("callable", other.clone())),
    };
    if is_builtin(&name, arity) {
        return Flow::Throw(errors::permission_error(
            "modify",
            "static_procedure",
            errors::indicator(&name, arity),
        ));
    }

    let key = PredKey::new(&module, &name, arity);
    match be.db.borrow_mut().add_clause(key, Clause::new(head, body), at_end) {
        Ok(()) => Flow::Proceed,
        Err(ball) => Flow::Throw(ball),
    }
}

fn retract(be: &MemoryBackend, clause: Addr, module: &Rc<str>) -> Flow {
    let (module, head, body, name, arity) = {
        let store = be.store.borrow();
        let (module, target) = strip_module_addr(&store, clause, module);
        let (head, body) = match store.functor(target) {
            Some((f, parts)) if &*f == ":-" && parts.len() == 2 => (parts[0], Some(parts[1])),
            _ => (target, None),
        };
        let (module, head) = strip_module_addr(&store, head, &module);
        match store.functor(head) {
            Some((name, args)) => (module, head, body, name, args.len()),
            None if store.is_var(head) => return Flow::Throw(errors::instantiation_error()),
            None => {
                return Flow::Throw(errors::type_error("callable", store.to_owned(head, Naming::Sequential)))
            }
        }
    };

    let resolved = be.db.borrow().resolve(&module, &name, arity);
    let (key, clauses) = match resolved {
        Some((key, Procedure::Dynamic(clauses))) => (key, clauses),
        Some((_, Procedure::Foreign { .. })) => {
            return Flow::Throw(errors::permission_error(
                "modify",
                "static_procedure",
                errors::indicator(&name, arity),
            ))
        }
        None => return Flow::Fail,
    };

    for candidate in clauses.iter() {
        let matched = {
            let mut store = be.store.borrow_mut();
            let mark = store.trail_len();
            let copy = store.from_owned(&candidate.term, &mut Vec::new());
            let matched = store.unify(copy + 1, head)
                && match body {
                    Some(body) => store.unify(copy + 2, body),
                    None => matches!(store.cell(copy + 2), Cell::Atom(a) if &**a == "true"),
                };
            if !matched {
                store.undo_to(mark);
            }
            matched
        };
        if matched {
            be.db.borrow_mut().remove_clause(&key, candidate);
            return Flow::Proceed;
        }
    }
    Flow::Fail
}

fn strip_module_addr(store: &Store, mut term: Addr, module: &Rc<str>) -> (Rc<str>, Addr) {
    let mut module = module.clone();
    while let Some((f, parts)) = store.functor(term) {
        if &*f != ":" || parts.len() != 2 {
            break;
        }
        match store.atom_name(parts[0]) {
            Some(qualifier) => {
                module = qualifier;
                term = parts[1];
            }
            None => break,
        }
    }
    (module, term)
}

fn declare_dynamic(be: &MemoryBackend, spec: &OwnedTerm, module: &Rc<str>) -> Result<(), OwnedTerm> {
    match spec {
        OwnedTerm::Variable(_) => Err(errors::instantiation_error()),
        OwnedTerm::Compound { name, args } if name == "," && args.len() == 2 => {
            declare_dynamic(be, &args[0], module)?;
            declare_dynamic(be, &args[1], module)
        }
        OwnedTerm::Compound { name, args } if name == ":" && args.len() == 2 => match &args[0] {
            OwnedTerm::Atom(qualifier) => declare_dynamic(be, &args[1], &Rc::from(qualifier.as_str())),
            other => Err(errors::type_error("module", other.clone())),
        },
        OwnedTerm::Compound { name, args } if name == "/" && args.len() == 2 => match (&args[0], &args[1]) {
            (OwnedTerm::Atom(pred), OwnedTerm::Integer(arity)) if *arity >= 0 => {
                let arity = *arity as usize;
                if is_builtin(pred, arity) {
                    return Err(errors::permission_error(
                        "modify",
                        "static_procedure",
                        errors::indicator(pred, arity),
                    ));
                }
                be.db.borrow_mut().declare_dynamic(PredKey::new(module, pred, arity))
            }
            (OwnedTerm::Variable(_), _) | (_, OwnedTerm::Variable(_)) => Err(errors::instantiation_error()),
            _ => Err(errors::type_error("predicate_indicator", spec.clone())),
        },
        other => match other.as_list() {
            Some(items) => items.into_iter().try_for_each(|item| declare_dynamic(be, item, module)),
            None => Err(errors::type_error("predicate_indicator", other.clone())),
        },
    }
}

// Term construction and inspection

fn functor(store: &mut Store, term: Addr, name: Addr, arity: Addr) -> Flow {
    match store.cell(term).clone() {
        Cell::Var | Cell::Ref(_) => {
            let n = match store.cell(arity) {
                Cell::Int(n) if *n >= 0 => *n as usize,
                Cell::Int(n) => {
                    return Flow::Throw(errors::domain_error("not_less_than_zero", OwnedTerm::Integer(*n)))
                }
                Cell::Var => return Flow::Throw(errors::instantiation_error()),
                _ => {
                    return Flow::Throw(errors::type_error("integer", store.to_owned(arity, Naming::Sequential)))
                }
            };
            if store.is_var(name) {
                return Flow::Throw(errors::instantiation_error());
            }
            if n == 0 {
                return truth(store.unify(term, name));
            }
            let functor_name = match store.atom_name(name) {
                Some(functor_name) => functor_name,
                None => {
                    return Flow::Throw(errors::type_error("atom", store.to_owned(name, Naming::Sequential)))
                }
            };
            let args: Vec<Addr> = (0..n).map(|_| store.new_var()).collect();
            let built = store.new_struct(&functor_name, &args);
            truth(store.unify(term, built))
        }
        Cell::Struct(f, n) => {
            let f = store.new_atom(&f);
            let n = store.new_int(n as i64);
            truth(store.unify(name, f) && store.unify(arity, n))
        }
        _ => {
            let zero = store.new_int(0);
            truth(store.unify(name, term) && store.unify(arity, zero))
        }
    }
}

fn arg(store: &mut Store, index: Addr, term: Addr, value: Addr) -> Flow {
    let n = match store.cell(index) {
        Cell::Int(n) => *n,
        Cell::Var => return Flow::Throw(errors::instantiation_error()),
        _ => return Flow::Throw(errors::type_error("integer", store.to_owned(index, Naming::Sequential))),
    };
    let term = store.deref(term);
    match store.cell(term).clone() {
        Cell::Struct(_, arity) => {
            if n >= 1 && (n as usize) <= arity {
                truth(store.unify(value, term + n as usize))
            } else {
                Flow::Fail
            }
        }
        Cell::Var => Flow::Throw(errors::instantiation_error()),
        _ => Flow::Throw(errors::type_error("compound", store.to_owned(term, Naming::Sequential))),
    }
}

fn univ(store: &mut Store, term: Addr, list: Addr) -> Flow {
    match store.functor(term) {
        Some((name, args)) if !args.is_empty() => {
            let head = store.new_atom(&name);
            let mut items = vec![head];
            items.extend(args);
            let nil = store.new_atom(NIL);
            let built = store.new_list(&items, nil);
            truth(store.unify(list, built))
        }
        _ if !store.is_var(term) => {
            let nil = store.new_atom(NIL);
            let built = store.new_list(&[term], nil);
            truth(store.unify(list, built))
        }
        _ => {
            let items = match store.list_items(list) {
                Some(items) if !items.is_empty() => items,
                Some(_) => return Flow::Throw(errors::domain_error("non_empty_list", OwnedTerm::nil())),
                None => return Flow::Throw(errors::instantiation_error()),
            };
            if items.len() == 1 {
                return truth(store.unify(term, items[0]));
            }
            let name = match store.atom_name(items[0]) {
                Some(name) => name,
                None if store.is_var(items[0]) => return Flow::Throw(errors::instantiation_error()),
                None => {
                    return Flow::Throw(errors::type_error("atom", store.to_owned(items[0], Naming::Sequential)))
                }
            };
            let built = store.new_struct(&name, &items[1..]);
            truth(store.unify(term, built))
        }
    }
}

// Arithmetic

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn into_cell(self) -> Cell {
        match self {
            Number::Int(i) => Cell::Int(i),
            Number::Float(f) => Cell::Float(f),
        }
    }

    fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }

    fn to_term(self) -> OwnedTerm {
        match self {
            Number::Int(i) => OwnedTerm::Integer(i),
            Number::Float(f) => OwnedTerm::Float(f),
        }
    }
}

pub(crate) fn eval(store: &Store, addr: Addr) -> Result<Number, OwnedTerm> {
    let addr = store.deref(addr);
    match store.cell(addr) {
        Cell::Int(i) => Ok(Number::Int(*i)),
        Cell::Float(f) => Ok(Number::Float(*f)),
        Cell::Var | Cell::Ref(_) => Err(errors::instantiation_error()),
        Cell::Atom(name) => match &**name {
            "pi" => Ok(Number::Float(std::f64::consts::PI)),
            "e" => Ok(Number::Float(std::f64::consts::E)),
            "inf" | "infinite" => Ok(Number::Float(f64::INFINITY)),
            "nan" => Ok(Number::Float(f64::NAN)),
            "max_tagged_integer" => Ok(Number::Int((1 << 60) - 1)),
            other => Err(errors::type_error("evaluable", errors::indicator(other, 0))),
        },
        Cell::Str(text) => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Number::Int(c as i64)),
                _ => Err(errors::type_error("evaluable", OwnedTerm::string(text.to_string()))),
            }
        }
        Cell::Struct(name, arity) => {
            let values = (1..=*arity)
                .map(|i| eval(store, addr + i))
                .collect::<Result<Vec<_>, _>>()?;
            apply(name, &values)
        }
    }
}

fn require_int(value: Number) -> Result<i64, OwnedTerm> {
    match value {
        Number::Int(i) => Ok(i),
        Number::Float(_) => Err(errors::type_error("integer", value.to_term())),
    }
}

fn to_int(value: f64) -> Result<Number, OwnedTerm> {
    if value.is_finite() {
        Ok(Number::Int(value as i64))
    } else {
        Err(errors::evaluation_error("undefined"))
    }
}

fn arith(x: Number, y: Number, int: fn(i64, i64) -> Option<i64>, float: fn(f64, f64) -> f64) -> Result<Number, OwnedTerm> {
    match (x, y) {
        (Number::Int(a), Number::Int(b)) => int(a, b)
            .map(Number::Int)
            .ok_or_else(|| errors::evaluation_error("int_overflow")),
        _ => Ok(Number::Float(float(x.as_f64(), y.as_f64()))),
    }
}

fn int_pair(x: Number, y: Number) -> Result<(i64, i64), OwnedTerm> {
    Ok((require_int(x)?, require_int(y)?))
}

fn nonzero(divisor: i64) -> Result<i64, OwnedTerm> {
    if divisor == 0 {
        Err(errors::evaluation_error("zero_divisor"))
    } else {
        Ok(divisor)
    }
}

/// Remainder with the sign of the divisor. `i64::MIN mod -1` is 0, so the
/// wrapping remainder is exact.
fn floor_mod(a: i64, b: i64) -> i64 {
    let m = a.wrapping_rem(b);
    if m != 0 && ((m < 0) != (b < 0)) {
        m + b
    } else {
        m
    }
}

/// Quotient rounded towards negative infinity
fn floor_div(a: i64, b: i64) -> Result<i64, OwnedTerm> {
    let q = a.checked_div(b).ok_or_else(|| errors::evaluation_error("int_overflow"))?;
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn shift_left(a: i64, b: i64) -> Result<i64, OwnedTerm> {
    if b < 0 {
        return shift_right(a, b.checked_neg().unwrap_or(i64::MAX));
    }
    if a == 0 {
        return Ok(0);
    }
    u32::try_from(b)
        .ok()
        .filter(|s| *s < i64::BITS)
        .map(|s| (a << s, s))
        .filter(|(shifted, s)| shifted >> s == a)
        .map(|(shifted, _)| shifted)
        .ok_or_else(|| errors::evaluation_error("int_overflow"))
}

fn shift_right(a: i64, b: i64) -> Result<i64, OwnedTerm> {
    if b < 0 {
        return shift_left(a, b.checked_neg().unwrap_or(i64::MAX));
    }
    Ok(match u32::try_from(b) {
        Ok(s) if s < i64::BITS => a >> s,
        _ if a < 0 => -1,
        _ => 0,
    })
}

fn apply(name: &str, values: &[Number]) -> Result<Number, OwnedTerm> {
    use Number::{Float, Int};

    match (name, values) {
        ("+", [x]) => Ok(*x),
        ("-", [Int(a)]) => a.checked_neg().map(Int).ok_or_else(|| errors::evaluation_error("int_overflow")),
        ("-", [Float(a)]) => Ok(Float(-a)),
        ("abs", [Int(a)]) => a.checked_abs().map(Int).ok_or_else(|| errors::evaluation_error("int_overflow")),
        ("abs", [Float(a)]) => Ok(Float(a.abs())),
        ("sign", [Int(a)]) => Ok(Int(a.signum())),
        ("sign", [Float(a)]) => Ok(Float(if *a == 0.0 { 0.0 } else { a.signum() })),
        ("min", [x, y]) => Ok(if x.compare(*y) == Some(Ordering::Greater) { *y } else { *x }),
        ("max", [x, y]) => Ok(if x.compare(*y) == Some(Ordering::Less) { *y } else { *x }),
        ("+", [x, y]) => arith(*x, *y, i64::checked_add, |a, b| a + b),
        ("-", [x, y]) => arith(*x, *y, i64::checked_sub, |a, b| a - b),
        ("*", [x, y]) => arith(*x, *y, i64::checked_mul, |a, b| a * b),
        ("/", [x, y]) => match (x, y) {
            (Int(a), Int(b)) => {
                let b = nonzero(*b)?;
                if a.wrapping_rem(b) == 0 {
                    a.checked_div(b).map(Int).ok_or_else(|| errors::evaluation_error("int_overflow"))
                } else {
                    Ok(Float(*a as f64 / b as f64))
                }
            }
            _ if y.as_f64() == 0.0 => Err(errors::evaluation_error("zero_divisor")),
            _ => Ok(Float(x.as_f64() / y.as_f64())),
        },
        ("//", [x, y]) => {
            let (a, b) = int_pair(*x, *y)?;
            let b = nonzero(b)?;
            a.checked_div(b).map(Int).ok_or_else(|| errors::evaluation_error("int_overflow"))
        }
        ("mod", [x, y]) => {
            let (a, b) = int_pair(*x, *y)?;
            Ok(Int(floor_mod(a, nonzero(b)?)))
        }
        ("rem", [x, y]) => {
            let (a, b) = int_pair(*x, *y)?;
            Ok(Int(a.wrapping_rem(nonzero(b)?)))
        }
        ("div", [x, y]) => {
            let (a, b) = int_pair(*x, *y)?;
            floor_div(a, nonzero(b)?).map(Int)
        }
        ("**", [Int(a), Int(b)]) if *b >= 0 => pow(*a, *b),
        ("**", [x, y]) => Ok(Float(x.as_f64().powf(y.as_f64()))),
        ("^", [Int(a), Int(b)]) => {
            if *b >= 0 {
                pow(*a, *b)
            } else if *a == 1 {
                Ok(Int(1))
            } else if *a == -1 {
                Ok(Int(if b % 2 == 0 { 1 } else { -1 }))
            } else {
                Err(errors::evaluation_error("undefined"))
            }
        }
        ("^", [x, y]) => Ok(Float(x.as_f64().powf(y.as_f64()))),
        ("sqrt", [x]) if x.as_f64() < 0.0 => Err(errors::evaluation_error("undefined")),
        ("sqrt", [x]) => Ok(Float(x.as_f64().sqrt())),
        ("log", [x]) if x.as_f64() <= 0.0 => Err(errors::evaluation_error("undefined")),
        ("log", [x]) => Ok(Float(x.as_f64().ln())),
        ("exp", [x]) => Ok(Float(x.as_f64().exp())),
        ("sin", [x]) => Ok(Float(x.as_f64().sin())),
        ("cos", [x]) => Ok(Float(x.as_f64().cos())),
        ("atan", [x]) => Ok(Float(x.as_f64().atan())),
        ("float", [x]) => Ok(Float(x.as_f64())),
        ("integer", [Int(a)]) => Ok(Int(*a)),
        ("integer", [Float(a)]) => to_int(a.round()),
        ("truncate", [x]) => to_int(x.as_f64().trunc()),
        ("floor", [Int(a)]) | ("ceiling", [Int(a)]) | ("round", [Int(a)]) => Ok(Int(*a)),
        ("floor", [x]) => to_int(x.as_f64().floor()),
        ("ceiling", [x]) => to_int(x.as_f64().ceil()),
        ("round", [x]) => to_int(x.as_f64().round()),
        ("/\\", [x, y]) => int_pair(*x, *y).map(|(a, b)| Int(a & b)),
        ("\\/", [x, y]) => int_pair(*x, *y).map(|(a, b)| Int(a | b)),
        ("xor", [x, y]) => int_pair(*x, *y).map(|(a, b)| Int(a ^ b)),
        ("<<", [x, y]) => {
            let (a, b) = int_pair(*x, *y)?;
            shift_left(a, b).map(Int)
        }
        (">>", [x, y]) => {
            let (a, b) = int_pair(*x, *y)?;
            shift_right(a, b).map(Int)
        }
        ("\\", [x]) => require_int(*x).map(|a| Int(!a)),
        _ => Err(errors::type_error("evaluable", errors::indicator(name, values.len()))),
    }
}

fn pow(base: i64, exponent: i64) -> Result<Number, OwnedTerm> {
    u32::try_from(exponent)
        .ok()
        .and_then(|e| base.checked_pow(e))
        .map(Number::Int)
        .ok_or_else(|| errors::evaluation_error("int_overflow"))
}
