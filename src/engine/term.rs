//! Term handles
//!
//! A [`Term`] is a reference into the engine's term arena, tied to the scope
//! that was innermost when it was created. Every operation checks that the
//! scope is still open; a handle used afterwards yields
//! [`BridgeError::ResourceMisuse`] rather than touching reclaimed memory.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value as JsonValue;

use super::record::RecordedTerm;
use super::runtime::{Runtime, ScopeId};
use crate::error::{BridgeError, BridgeResult};
use crate::prolog::{Backend, RawTerm, TermKind, TextMode};
use crate::syntax::{OwnedTerm, NIL};

/// Handle to a term inside the engine
#[derive(Clone)]
pub struct Term {
    rt: Runtime,
    raw: RawTerm,
    scope: ScopeId,
}

impl Term {
    pub(crate) fn from_raw(rt: &Runtime, raw: RawTerm, scope: ScopeId) -> Self {
        Self {
            rt: rt.clone(),
            raw,
            scope,
        }
    }

    pub(crate) fn raw(&self) -> RawTerm {
        self.raw
    }

    /// The runtime this handle belongs to
    pub fn runtime(&self) -> &Runtime {
        &self.rt
    }

    /// Whether the handle's scope is still open
    pub fn is_valid(&self) -> bool {
        self.rt.inner().is_scope_live(self.scope)
    }

    pub(crate) fn check(&self) -> BridgeResult<&dyn Backend> {
        self.rt.inner().check_scope(self.scope)?;
        Ok(self.rt.backend())
    }

    /// New handle in the current scope
    fn fresh(&self) -> Term {
        let raw = self.rt.backend().new_term_refs(1);
        Term::from_raw(&self.rt, raw, self.rt.inner().current_scope())
    }

    fn mismatch(&self, expected: &'static str, kind: TermKind) -> BridgeError {
        BridgeError::TypeMismatch {
            expected,
            found: kind.as_str().to_string(),
        }
    }

    pub fn kind(&self) -> BridgeResult<TermKind> {
        Ok(self.check()?.kind(self.raw))
    }

    pub fn is_variable(&self) -> BridgeResult<bool> {
        Ok(self.kind()? == TermKind::Variable)
    }

    /// Atoms, including `[]`
    pub fn is_atom(&self) -> BridgeResult<bool> {
        Ok(matches!(self.kind()?, TermKind::Atom | TermKind::Nil))
    }

    pub fn is_integer(&self) -> BridgeResult<bool> {
        Ok(self.kind()? == TermKind::Integer)
    }

    pub fn is_float(&self) -> BridgeResult<bool> {
        Ok(self.kind()? == TermKind::Float)
    }

    pub fn is_number(&self) -> BridgeResult<bool> {
        Ok(matches!(self.kind()?, TermKind::Integer | TermKind::Float))
    }

    pub fn is_string(&self) -> BridgeResult<bool> {
        Ok(self.kind()? == TermKind::String)
    }

    /// Compound terms, including list cells
    pub fn is_compound(&self) -> BridgeResult<bool> {
        Ok(matches!(self.kind()?, TermKind::Compound | TermKind::ListPair))
    }

    /// A list cell or `[]`
    pub fn is_list(&self) -> BridgeResult<bool> {
        Ok(matches!(self.kind()?, TermKind::ListPair | TermKind::Nil))
    }

    pub fn is_nil(&self) -> BridgeResult<bool> {
        Ok(self.kind()? == TermKind::Nil)
    }

    pub fn is_atomic(&self) -> BridgeResult<bool> {
        Ok(!matches!(
            self.kind()?,
            TermKind::Variable | TermKind::Compound | TermKind::ListPair
        ))
    }

    pub fn is_callable(&self) -> BridgeResult<bool> {
        Ok(matches!(
            self.kind()?,
            TermKind::Atom | TermKind::Compound | TermKind::ListPair
        ))
    }

    pub fn as_i64(&self) -> BridgeResult<i64> {
        let be = self.check()?;
        match be.kind(self.raw) {
            TermKind::Integer => be.get_integer(self.raw).ok_or(BridgeError::TypeMismatch {
                expected: "64-bit integer",
                found: "big integer".to_string(),
            }),
            kind => Err(self.mismatch("integer", kind)),
        }
    }

    /// Floats, and integers widened to `f64`
    pub fn as_f64(&self) -> BridgeResult<f64> {
        let be = self.check()?;
        match be.kind(self.raw) {
            TermKind::Float => be.get_float(self.raw).ok_or_else(|| self.mismatch("float", TermKind::Float)),
            TermKind::Integer => Ok(self.as_i64()? as f64),
            kind => Err(self.mismatch("number", kind)),
        }
    }

    /// Text of an atomic term, unquoted
    pub fn text(&self) -> BridgeResult<String> {
        let be = self.check()?;
        let kind = be.kind(self.raw);
        match kind {
            TermKind::Variable | TermKind::Compound | TermKind::ListPair => {
                Err(self.mismatch("atomic", kind))
            }
            TermKind::Nil => Ok(be.get_text(self.raw, TextMode::Plain).unwrap_or_else(|| NIL.to_string())),
            _ => be.get_text(self.raw, TextMode::Plain).ok_or_else(|| self.mismatch("text", kind)),
        }
    }

    /// Text of any term: canonical notation first, plain text as fallback
    pub fn to_text(&self) -> BridgeResult<String> {
        let be = self.check()?;
        be.get_text(self.raw, TextMode::Canonical)
            .or_else(|| be.get_text(self.raw, TextMode::Plain))
            .ok_or_else(|| self.mismatch("text", be.kind(self.raw)))
    }

    /// Functor name and arity; atoms have arity 0
    pub fn name_arity(&self) -> BridgeResult<(String, usize)> {
        let be = self.check()?;
        be.get_name_arity(self.raw)
            .ok_or_else(|| self.mismatch("callable", be.kind(self.raw)))
    }

    pub fn name(&self) -> BridgeResult<String> {
        Ok(self.name_arity()?.0)
    }

    pub fn arity(&self) -> BridgeResult<usize> {
        Ok(self.name_arity()?.1)
    }

    /// Index into a compound: `0` is the functor (or list tag), `1..=arity`
    /// are the arguments
    pub fn get(&self, index: usize) -> BridgeResult<Term> {
        let (name, arity) = self.name_arity()?;
        if index > arity {
            return Err(BridgeError::Bounds { index, arity });
        }
        let be = self.rt.backend();
        let out = self.fresh();
        if index == 0 {
            if be.kind(self.raw) == TermKind::Nil {
                be.put_nil(out.raw);
            } else {
                be.put_atom(out.raw, &name);
            }
        } else {
            be.get_arg(index, self.raw, out.raw);
        }
        Ok(out)
    }

    /// All arguments, in order
    pub fn args(&self) -> BridgeResult<Vec<Term>> {
        let arity = self.arity()?;
        (1..=arity).map(|i| self.get(i)).collect()
    }

    /// Elements of a proper list
    pub fn list_items(&self) -> BridgeResult<Vec<Term>> {
        let be = self.check()?;
        let mut items = Vec::new();
        let mut cursor = self.clone();
        loop {
            match be.kind(cursor.raw) {
                TermKind::Nil => return Ok(items),
                TermKind::ListPair => {
                    items.push(cursor.get(1)?);
                    cursor = cursor.get(2)?;
                }
                kind => return Err(self.mismatch("list", kind)),
            }
        }
    }

    pub fn unify(&self, other: &Term) -> BridgeResult<bool> {
        let be = self.check()?;
        other.check()?;
        Ok(be.unify(self.raw, other.raw))
    }

    /// Unify with a value built from Rust data
    pub fn unify_value(&self, value: impl Into<OwnedTerm>) -> BridgeResult<bool> {
        self.check()?;
        let other = self.rt.term_from_owned(&value.into())?;
        self.unify(&other)
    }

    /// Standard order of terms
    pub fn standard_order(&self, other: &Term) -> BridgeResult<Ordering> {
        let be = self.check()?;
        other.check()?;
        Ok(be.compare(self.raw, other.raw))
    }

    /// Identical terms (`==`)
    pub fn same_as(&self, other: &Term) -> BridgeResult<bool> {
        Ok(self.standard_order(other)?.is_eq())
    }

    /// Copy out of the engine; the result outlives every scope
    pub fn to_owned_term(&self) -> BridgeResult<OwnedTerm> {
        self.check()?;
        Ok(self.rt.inner().read_owned(self.raw))
    }

    pub fn to_json(&self) -> BridgeResult<JsonValue> {
        Ok(self.to_owned_term()?.to_json())
    }

    /// Store a copy outside the term arena
    pub fn record(&self) -> BridgeResult<RecordedTerm> {
        let be = self.check()?;
        Ok(RecordedTerm::new(&self.rt, be.record(self.raw)))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<invalid term>"),
        }
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Term({})", self)
    }
}

/// Contiguous block of term handles; query arguments and foreign-predicate
/// arguments are passed this way
#[derive(Clone)]
pub struct TermVector {
    rt: Runtime,
    base: RawTerm,
    len: usize,
    scope: ScopeId,
}

impl TermVector {
    pub(crate) fn from_raw(rt: &Runtime, base: RawTerm, len: usize, scope: ScopeId) -> Self {
        Self {
            rt: rt.clone(),
            base,
            len,
            scope,
        }
    }

    pub(crate) fn base(&self) -> RawTerm {
        self.base
    }

    pub(crate) fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> BridgeResult<Term> {
        if index >= self.len {
            return Err(BridgeError::Bounds {
                index,
                arity: self.len,
            });
        }
        self.rt.inner().check_scope(self.scope)?;
        Ok(Term::from_raw(&self.rt, self.base.offset(index), self.scope))
    }

    /// Make slot `index` refer to `term`
    pub fn set(&self, index: usize, term: &Term) -> BridgeResult<()> {
        let slot = self.get(index)?;
        term.check()?;
        self.rt.backend().put_term(slot.raw(), term.raw());
        Ok(())
    }

    pub fn terms(&self) -> BridgeResult<Vec<Term>> {
        (0..self.len).map(|i| self.get(i)).collect()
    }
}

impl fmt::Debug for TermVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for i in 0..self.len {
            match self.get(i) {
                Ok(term) => list.entry(&term),
                Err(_) => list.entry(&"<invalid term>"),
            };
        }
        list.finish()
    }
}

impl Runtime {
    fn new_term(&self) -> BridgeResult<Term> {
        self.inner().check_live()?;
        let raw = self.backend().new_term_refs(1);
        Ok(Term::from_raw(self, raw, self.inner().current_scope()))
    }

    /// A fresh unbound variable
    pub fn new_variable(&self) -> BridgeResult<Term> {
        self.new_term()
    }

    pub fn atom(&self, name: &str) -> BridgeResult<Term> {
        let t = self.new_term()?;
        self.backend().put_atom(t.raw, name);
        Ok(t)
    }

    pub fn nil(&self) -> BridgeResult<Term> {
        let t = self.new_term()?;
        self.backend().put_nil(t.raw);
        Ok(t)
    }

    pub fn integer(&self, value: i64) -> BridgeResult<Term> {
        let t = self.new_term()?;
        self.backend().put_integer(t.raw, value);
        Ok(t)
    }

    pub fn float(&self, value: f64) -> BridgeResult<Term> {
        let t = self.new_term()?;
        self.backend().put_float(t.raw, value);
        Ok(t)
    }

    pub fn string(&self, text: &str) -> BridgeResult<Term> {
        let t = self.new_term()?;
        self.backend().put_string(t.raw, text);
        Ok(t)
    }

    /// `name(args...)`; the arguments must be valid in the current scope
    pub fn compound(&self, name: &str, args: &[Term]) -> BridgeResult<Term> {
        if args.is_empty() {
            return self.atom(name);
        }
        let vector = self.vector_from(args)?;
        let t = self.new_term()?;
        self.backend().cons_functor(t.raw, name, vector.base, args.len());
        Ok(t)
    }

    /// Proper list of `items`
    pub fn list(&self, items: &[Term]) -> BridgeResult<Term> {
        for item in items {
            item.check()?;
        }
        let mut acc = self.nil()?;
        for item in items.iter().rev() {
            let cell = self.new_term()?;
            self.backend().cons_list(cell.raw, item.raw, acc.raw);
            acc = cell;
        }
        Ok(acc)
    }

    /// Parse text in the engine's syntax; a syntax error is an engine exception
    pub fn parse(&self, text: &str) -> BridgeResult<Term> {
        let t = self.new_term()?;
        if self.backend().put_parsed(t.raw, text) {
            Ok(t)
        } else {
            Err(self.inner().exception_from(t.raw).into())
        }
    }

    pub fn term_from_owned(&self, term: &OwnedTerm) -> BridgeResult<Term> {
        let t = self.new_term()?;
        self.inner().put_owned(t.raw, term);
        Ok(t)
    }

    /// Build a term from JSON, see [`OwnedTerm::from_json`]
    pub fn term_from_json(&self, value: &JsonValue) -> BridgeResult<Term> {
        self.term_from_owned(&OwnedTerm::from_json(value))
    }

    /// `len` fresh variables in contiguous slots
    pub fn new_vector(&self, len: usize) -> BridgeResult<TermVector> {
        self.inner().check_live()?;
        let base = self.backend().new_term_refs(len);
        Ok(TermVector::from_raw(self, base, len, self.inner().current_scope()))
    }

    /// Contiguous copy of the handles in `terms`
    pub fn vector_from(&self, terms: &[Term]) -> BridgeResult<TermVector> {
        for term in terms {
            term.check()?;
        }
        let vector = self.new_vector(terms.len())?;
        for (i, term) in terms.iter().enumerate() {
            self.backend().put_term(vector.base.offset(i), term.raw);
        }
        Ok(vector)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::engine::runtime::testing;

    #[test]
    fn test_scalars() {
        let rt = testing::runtime();
        assert_eq!(rt.integer(42).unwrap().as_i64().unwrap(), 42);
        assert_eq!(rt.float(2.5).unwrap().as_f64().unwrap(), 2.5);
        assert_eq!(rt.integer(3).unwrap().as_f64().unwrap(), 3.0);
        assert_eq!(rt.atom("hello world").unwrap().text().unwrap(), "hello world");
        assert_eq!(rt.atom("hello world").unwrap().to_text().unwrap(), "'hello world'");
        assert_eq!(rt.string("s").unwrap().kind().unwrap(), TermKind::String);
        assert!(rt.nil().unwrap().is_list().unwrap());
    }

    #[test]
    fn test_type_mismatch() {
        let rt = testing::runtime();
        let atom = rt.atom("a").unwrap();
        match atom.as_i64() {
            Err(BridgeError::TypeMismatch { expected, found }) => {
                assert_eq!(expected, "integer");
                assert_eq!(found, "atom");
            }
            other => panic!("unexpected {:?}", other),
        }
        let var = rt.new_variable().unwrap();
        assert!(matches!(var.text(), Err(BridgeError::TypeMismatch { .. })));
    }

    #[test]
    fn test_compound_indexing() {
        let rt = testing::runtime();
        let args = [rt.integer(1).unwrap(), rt.atom("b").unwrap(), rt.string("c").unwrap()];
        let t = rt.compound("f", &args).unwrap();
        assert_eq!(t.arity().unwrap(), 3);
        assert_eq!(t.get(0).unwrap().text().unwrap(), "f");
        assert_eq!(t.get(1).unwrap().as_i64().unwrap(), 1);
        assert_eq!(t.get(2).unwrap().text().unwrap(), "b");
        assert_eq!(t.get(3).unwrap().text().unwrap(), "c");
        assert!(matches!(t.get(4), Err(BridgeError::Bounds { index: 4, arity: 3 })));
    }

    #[test]
    fn test_list_access() {
        let rt = testing::runtime();
        let items = [rt.integer(1).unwrap(), rt.integer(2).unwrap()];
        let list = rt.list(&items).unwrap();
        assert_eq!(list.kind().unwrap(), TermKind::ListPair);
        assert_eq!(list.get(0).unwrap().text().unwrap(), "[|]");
        assert_eq!(list.to_text().unwrap(), "[1,2]");
        let values: Vec<i64> = list
            .list_items()
            .unwrap()
            .iter()
            .map(|t| t.as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_unify_binds_variable() {
        let rt = testing::runtime();
        let x = rt.new_variable().unwrap();
        let t = rt.compound("point", &[x.clone(), rt.integer(2).unwrap()]).unwrap();
        let pattern = rt.parse("point(7, Y)").unwrap();
        assert!(t.unify(&pattern).unwrap());
        assert_eq!(x.as_i64().unwrap(), 7);
        assert!(!x.unify_value(8i64).unwrap());
    }

    #[test]
    fn test_standard_order() {
        let rt = testing::runtime();
        let one = rt.integer(1).unwrap();
        let atom = rt.atom("a").unwrap();
        assert_eq!(one.standard_order(&atom).unwrap(), Ordering::Less);
        assert!(atom.same_as(&rt.atom("a").unwrap()).unwrap());
    }

    #[test]
    fn test_vector_bounds_and_set() {
        let rt = testing::runtime();
        let vector = rt.new_vector(2).unwrap();
        vector.set(0, &rt.atom("x").unwrap()).unwrap();
        assert_eq!(vector.get(0).unwrap().text().unwrap(), "x");
        assert!(vector.get(1).unwrap().is_variable().unwrap());
        assert!(matches!(vector.get(2), Err(BridgeError::Bounds { index: 2, arity: 2 })));
    }

    #[test]
    fn test_json_conversion() {
        let rt = testing::runtime();
        let value = serde_json::json!({"name": "tea", "tags": [1, 2]});
        let t = rt.term_from_json(&value).unwrap();
        assert_eq!(t.to_json().unwrap(), value);
    }
}
