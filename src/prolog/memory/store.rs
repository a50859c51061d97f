//! Term arena of the memory backend: heap cells, binding trail and the
//! term-reference slots handed out as [`RawTerm`](crate::prolog::RawTerm)s.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use crate::prolog::TermKind;
use crate::syntax::{OwnedTerm, LIST_FUNCTOR, NIL};

/// Heap address
pub(crate) type Addr = usize;

#[derive(Debug, Clone)]
pub(crate) enum Cell {
    /// Unbound variable, identified by its own address
    Var,
    Ref(Addr),
    Atom(Rc<str>),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// Functor header; the arguments occupy the following `arity` cells
    Struct(Rc<str>, usize),
}

/// How variables are numbered when copying a term out of the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Naming {
    /// 0, 1, 2... in order of first occurrence; suitable for copying back in
    Sequential,
    /// By heap address; stable across calls, used for printing
    Address,
}

#[derive(Debug, Default)]
pub(crate) struct Store {
    heap: Vec<Cell>,
    trail: Vec<Addr>,
    slots: Vec<Addr>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.trail.clear();
        self.slots.clear();
    }

    // Heap

    pub fn push(&mut self, cell: Cell) -> Addr {
        self.heap.push(cell);
        self.heap.len() - 1
    }

    pub fn new_var(&mut self) -> Addr {
        self.push(Cell::Var)
    }

    pub fn new_atom(&mut self, name: &str) -> Addr {
        self.push(Cell::Atom(Rc::from(name)))
    }

    pub fn new_int(&mut self, value: i64) -> Addr {
        self.push(Cell::Int(value))
    }

    /// Build `name(args..)`; an empty argument list yields the atom `name`
    pub fn new_struct(&mut self, name: &str, args: &[Addr]) -> Addr {
        if args.is_empty() {
            return self.new_atom(name);
        }
        let header = self.push(Cell::Struct(Rc::from(name), args.len()));
        for &arg in args {
            self.heap.push(Cell::Ref(arg));
        }
        header
    }

    /// Build a list of `items` ending in `tail`
    pub fn new_list(&mut self, items: &[Addr], tail: Addr) -> Addr {
        items
            .iter()
            .rev()
            .fold(tail, |acc, &item| self.new_struct(LIST_FUNCTOR, &[item, acc]))
    }

    pub fn deref(&self, mut addr: Addr) -> Addr {
        while let Cell::Ref(next) = self.heap[addr] {
            addr = next;
        }
        addr
    }

    /// The cell at `addr` after dereferencing
    pub fn cell(&self, addr: Addr) -> &Cell {
        &self.heap[self.deref(addr)]
    }

    pub fn is_var(&self, addr: Addr) -> bool {
        matches!(self.cell(addr), Cell::Var)
    }

    pub fn kind(&self, addr: Addr) -> TermKind {
        match self.cell(addr) {
            Cell::Var | Cell::Ref(_) => TermKind::Variable,
            Cell::Atom(a) if &**a == NIL => TermKind::Nil,
            Cell::Atom(_) => TermKind::Atom,
            Cell::Int(_) => TermKind::Integer,
            Cell::Float(_) => TermKind::Float,
            Cell::Str(_) => TermKind::String,
            Cell::Struct(f, 2) if &**f == LIST_FUNCTOR => TermKind::ListPair,
            Cell::Struct(..) => TermKind::Compound,
        }
    }

    /// Functor name and argument addresses of a callable term
    pub fn functor(&self, addr: Addr) -> Option<(Rc<str>, Vec<Addr>)> {
        let addr = self.deref(addr);
        match &self.heap[addr] {
            Cell::Atom(name) => Some((name.clone(), Vec::new())),
            Cell::Struct(name, arity) => Some((name.clone(), (1..=*arity).map(|i| addr + i).collect())),
            _ => None,
        }
    }

    pub fn atom_name(&self, addr: Addr) -> Option<Rc<str>> {
        match self.cell(addr) {
            Cell::Atom(name) => Some(name.clone()),
            _ => None,
        }
    }

    pub fn int_value(&self, addr: Addr) -> Option<i64> {
        match self.cell(addr) {
            Cell::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Elements of a proper list
    pub fn list_items(&self, addr: Addr) -> Option<Vec<Addr>> {
        let mut items = Vec::new();
        let mut cursor = self.deref(addr);
        loop {
            match &self.heap[cursor] {
                Cell::Atom(a) if &**a == NIL => return Some(items),
                Cell::Struct(f, 2) if &**f == LIST_FUNCTOR => {
                    items.push(cursor + 1);
                    cursor = self.deref(cursor + 2);
                }
                _ => return None,
            }
        }
    }

    // Trail

    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }

    fn bind(&mut self, var: Addr, value: Addr) {
        self.heap[var] = Cell::Ref(value);
        self.trail.push(var);
    }

    pub fn undo_to(&mut self, mark: usize) {
        while self.trail.len() > mark {
            if let Some(var) = self.trail.pop() {
                self.heap[var] = Cell::Var;
            }
        }
    }

    /// Unify two terms. Bindings made before a failure are left on the trail;
    /// callers undo to their own mark.
    pub fn unify(&mut self, a: Addr, b: Addr) -> bool {
        let mut pending = vec![(a, b)];
        while let Some((a, b)) = pending.pop() {
            let a = self.deref(a);
            let b = self.deref(b);
            if a == b {
                continue;
            }
            match (&self.heap[a], &self.heap[b]) {
                (Cell::Var, Cell::Var) => {
                    // younger variable points at the older one
                    if a > b {
                        self.bind(a, b)
                    } else {
                        self.bind(b, a)
                    }
                }
                (Cell::Var, _) => self.bind(a, b),
                (_, Cell::Var) => self.bind(b, a),
                (Cell::Atom(x), Cell::Atom(y)) if x == y => {}
                (Cell::Int(x), Cell::Int(y)) if x == y => {}
                (Cell::Float(x), Cell::Float(y)) if x.to_bits() == y.to_bits() => {}
                (Cell::Str(x), Cell::Str(y)) if x == y => {}
                (Cell::Struct(f, n), Cell::Struct(g, m)) if f == g && n == m => {
                    let arity = *n;
                    for i in (1..=arity).rev() {
                        pending.push((a + i, b + i));
                    }
                }
                _ => return false,
            }
        }
        true
    }

    /// Standard order of terms: Var < Number < Atom < String < Compound
    pub fn compare(&self, a: Addr, b: Addr) -> Ordering {
        let mut pending = vec![(a, b)];
        while let Some((a, b)) = pending.pop() {
            let a = self.deref(a);
            let b = self.deref(b);
            if a == b {
                continue;
            }
            let (ca, cb) = (&self.heap[a], &self.heap[b]);
            let rank = |c: &Cell| match c {
                Cell::Var | Cell::Ref(_) => 0,
                Cell::Int(_) | Cell::Float(_) => 1,
                Cell::Atom(_) => 3,
                Cell::Str(_) => 4,
                Cell::Struct(..) => 5,
            };
            let order = match (ca, cb) {
                _ if rank(ca) != rank(cb) => rank(ca).cmp(&rank(cb)),
                (Cell::Var, Cell::Var) => a.cmp(&b),
                (Cell::Int(x), Cell::Int(y)) => x.cmp(y),
                (Cell::Float(x), Cell::Float(y)) => x.total_cmp(y),
                (Cell::Int(x), Cell::Float(y)) => {
                    // equal values order the float first
                    (*x as f64).total_cmp(y).then(Ordering::Greater)
                }
                (Cell::Float(x), Cell::Int(y)) => x.total_cmp(&(*y as f64)).then(Ordering::Less),
                (Cell::Atom(x), Cell::Atom(y)) | (Cell::Str(x), Cell::Str(y)) => x.cmp(y),
                (Cell::Struct(f, n), Cell::Struct(g, m)) => {
                    let order = n.cmp(m).then_with(|| f.cmp(g));
                    if order.is_eq() {
                        pending.extend((1..=*n).rev().map(|i| (a + i, b + i)));
                    }
                    order
                }
                _ => Ordering::Equal,
            };
            if order.is_ne() {
                return order;
            }
        }
        Ordering::Equal
    }

    // Copying

    /// Copy a heap term into an engine-independent value
    pub fn to_owned(&self, addr: Addr, naming: Naming) -> OwnedTerm {
        enum Task {
            Visit(Addr),
            Build(Rc<str>, usize),
        }

        let mut vars: HashMap<Addr, usize> = HashMap::new();
        let mut tasks = vec![Task::Visit(addr)];
        let mut done: Vec<OwnedTerm> = Vec::new();
        while let Some(task) = tasks.pop() {
            let addr = match task {
                Task::Visit(addr) => self.deref(addr),
                Task::Build(name, arity) => {
                    let args = done.split_off(done.len().saturating_sub(arity));
                    done.push(OwnedTerm::Compound { name: name.to_string(), args });
                    continue;
                }
            };
            let term = match &self.heap[addr] {
                Cell::Var | Cell::Ref(_) => {
                    let next = vars.len();
                    let index = *vars.entry(addr).or_insert(next);
                    match naming {
                        Naming::Sequential => OwnedTerm::Variable(index),
                        Naming::Address => OwnedTerm::Variable(addr),
                    }
                }
                Cell::Atom(a) => OwnedTerm::Atom(a.to_string()),
                Cell::Int(i) => OwnedTerm::Integer(*i),
                Cell::Float(f) => OwnedTerm::Float(*f),
                Cell::Str(s) => OwnedTerm::String(s.to_string()),
                Cell::Struct(name, arity) => {
                    // Arguments are visited left to right so variables are numbered
                    // by first occurrence
                    tasks.push(Task::Build(name.clone(), *arity));
                    tasks.extend((1..=*arity).rev().map(|i| Task::Visit(addr + i)));
                    continue;
                }
            };
            done.push(term);
        }
        done.pop().unwrap_or(OwnedTerm::Variable(0))
    }

    /// Build an owned term on the heap. `vars` maps variable numbers to the
    /// heap variables created so far and is extended as needed.
    pub fn from_owned(&mut self, term: &OwnedTerm, vars: &mut Vec<Option<Addr>>) -> Addr {
        let mut pending = Vec::new();
        let root = self.place_owned(term, vars, &mut pending);
        while let Some((term, slot)) = pending.pop() {
            let value = self.place_owned(term, vars, &mut pending);
            self.heap[slot] = Cell::Ref(value);
        }
        root
    }

    /// Allocate the outermost cell of `term`; compound arguments are queued
    /// with the argument cell they must fill
    fn place_owned<'t>(
        &mut self,
        term: &'t OwnedTerm,
        vars: &mut Vec<Option<Addr>>,
        pending: &mut Vec<(&'t OwnedTerm, Addr)>,
    ) -> Addr {
        match term {
            OwnedTerm::Variable(index) => {
                if vars.len() <= *index {
                    vars.resize(*index + 1, None);
                }
                match vars[*index] {
                    Some(addr) => addr,
                    None => {
                        let addr = self.new_var();
                        vars[*index] = Some(addr);
                        addr
                    }
                }
            }
            OwnedTerm::Atom(a) => self.new_atom(a),
            OwnedTerm::Integer(i) => self.push(Cell::Int(*i)),
            OwnedTerm::Float(f) => self.push(Cell::Float(*f)),
            OwnedTerm::String(s) => self.push(Cell::Str(Rc::from(s.as_str()))),
            OwnedTerm::Compound { name, args } => {
                let header = self.push(Cell::Struct(Rc::from(name.as_str()), args.len()));
                for (i, arg) in args.iter().enumerate() {
                    self.heap.push(Cell::Var);
                    pending.push((arg, header + 1 + i));
                }
                header
            }
        }
    }

    // Term-reference slots

    pub fn slot_len(&self) -> usize {
        self.slots.len()
    }

    /// Allocate `count` slots holding fresh variables; returns the first index
    pub fn new_slots(&mut self, count: usize) -> usize {
        let base = self.slots.len();
        for _ in 0..count {
            let var = self.new_var();
            self.slots.push(var);
        }
        base
    }

    /// Allocate slots referring to existing heap terms
    pub fn slots_for(&mut self, addrs: &[Addr]) -> usize {
        let base = self.slots.len();
        self.slots.extend_from_slice(addrs);
        base
    }

    pub fn slot(&self, index: usize) -> Addr {
        self.slots[index]
    }

    pub fn set_slot(&mut self, index: usize, addr: Addr) {
        self.slots[index] = addr;
    }

    pub fn truncate_slots(&mut self, len: usize) {
        self.slots.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(store: &mut Store, x: Addr, y: Addr) -> Addr {
        store.new_struct("point", &[x, y])
    }

    #[test]
    fn test_unify_binds_and_undo_restores() {
        let mut store = Store::new();
        let x = store.new_var();
        let one = store.new_int(1);
        let mark = store.trail_len();

        assert!(store.unify(x, one));
        assert_eq!(store.int_value(x), Some(1));

        store.undo_to(mark);
        assert!(store.is_var(x));
    }

    #[test]
    fn test_unify_structures() {
        let mut store = Store::new();
        let x = store.new_var();
        let one = store.new_int(1);
        let two = store.new_int(2);
        let a = point(&mut store, x, two);
        let b = point(&mut store, one, two);
        assert!(store.unify(a, b));
        assert_eq!(store.int_value(x), Some(1));

        let y = store.new_var();
        let c = store.new_struct("other", &[y, two]);
        assert!(!store.unify(a, c));
    }

    #[test]
    fn test_standard_order() {
        let mut store = Store::new();
        let var = store.new_var();
        let int = store.new_int(7);
        let float = store.push(Cell::Float(7.0));
        let atom = store.new_atom("a");
        let string = store.push(Cell::Str(Rc::from("a")));
        let compound = store.new_struct("f", &[int]);

        assert_eq!(store.compare(var, int), Ordering::Less);
        assert_eq!(store.compare(float, int), Ordering::Less);
        assert_eq!(store.compare(int, atom), Ordering::Less);
        assert_eq!(store.compare(atom, string), Ordering::Less);
        assert_eq!(store.compare(string, compound), Ordering::Less);
        assert_eq!(store.compare(compound, compound), Ordering::Equal);
    }

    #[test]
    fn test_copy_roundtrip_shares_variables() {
        let mut store = Store::new();
        let x = store.new_var();
        let t = point(&mut store, x, x);
        let owned = store.to_owned(t, Naming::Sequential);
        assert_eq!(
            owned,
            OwnedTerm::compound("point", vec![OwnedTerm::Variable(0), OwnedTerm::Variable(0)])
        );

        let copy = store.from_owned(&owned, &mut Vec::new());
        let one = store.new_int(1);
        let two = store.new_int(2);
        let target = point(&mut store, one, two);
        assert!(!store.unify(copy, target));
    }

    #[test]
    fn test_long_lists_and_deep_nesting_copy_without_recursion() {
        let mut store = Store::new();
        let items: Vec<Addr> = (0..200_000).map(|i| store.new_int(i)).collect();
        let nil = store.new_atom(NIL);
        let list = store.new_list(&items, nil);
        let owned = store.to_owned(list, Naming::Sequential);
        assert_eq!(owned.as_list().map(|l| l.len()), Some(200_000));

        let copy = store.from_owned(&owned, &mut Vec::new());
        assert_eq!(store.compare(list, copy), Ordering::Equal);
        assert!(store.unify(list, copy));

        let mut deep = store.new_atom("z");
        for _ in 0..100_000 {
            deep = store.new_struct("s", &[deep]);
        }
        let mut other = store.new_atom("y");
        for _ in 0..100_000 {
            other = store.new_struct("s", &[other]);
        }
        assert_eq!(store.compare(deep, other), Ordering::Greater);
        let owned = store.to_owned(deep, Naming::Sequential);
        assert_eq!(owned.name_arity(), Some(("s", 1)));
    }

    #[test]
    fn test_list_items() {
        let mut store = Store::new();
        let items: Vec<Addr> = (1..=3).map(|i| store.new_int(i)).collect();
        let nil = store.new_atom(NIL);
        let list = store.new_list(&items, nil);
        assert_eq!(store.kind(list), TermKind::ListPair);
        let read: Vec<i64> = store
            .list_items(list)
            .unwrap()
            .into_iter()
            .filter_map(|a| store.int_value(a))
            .collect();
        assert_eq!(read, vec![1, 2, 3]);
    }
}
