//! In-process Prolog engine
//!
//! A compact structure-copying interpreter that implements the [`Backend`]
//! primitives without any native library. It covers the control constructs,
//! the usual term and arithmetic built-ins, a dynamic database and a small
//! list library; enough to run the bridge and its tests anywhere.
//!
//! ## Example
//!
//! ```
//! use prolog_bridge::prolog::{Backend, MemoryBackend, Step, TextMode};
//!
//! let engine = MemoryBackend::new();
//! let args = engine.new_term_refs(1);
//! assert!(engine.put_parsed(args, "member(X, [a, b])"));
//! let call = engine.predicate("user", "call", 1);
//! let query = engine.open_query("user", call, args);
//! assert_eq!(engine.next_solution(query), Step::Solution);
//! assert_eq!(engine.get_text(args, TextMode::Canonical).as_deref(), Some("member(a,[a,b])"));
//! engine.close_query(query);
//! ```

mod builtins;
mod database;
mod errors;
mod machine;
mod reader;
mod store;

use std::cell::{Cell as StdCell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use super::{
    Backend, ForeignHandler, RawFrame, RawPredicate, RawQuery, RawRecord, RawTerm, Step, TermKind,
    TextMode,
};
use crate::syntax::{format_float, OwnedTerm, LIST_FUNCTOR, NIL};

use database::{Database, PredKey};
use machine::{Machine, Outcome};
use store::{Cell, Naming, Store};

use reader::{read_program, read_term};

struct FrameMark {
    id: usize,
    slots: usize,
    trail: usize,
}

struct QueryState {
    /// Taken out while the query is running
    machine: Option<Machine>,
    trail_mark: usize,
    slot_mark: usize,
    exception: Option<OwnedTerm>,
}

/// The in-process engine
pub struct MemoryBackend {
    store: RefCell<Store>,
    db: RefCell<Database>,
    frames: RefCell<Vec<FrameMark>>,
    queries: RefCell<HashMap<usize, QueryState>>,
    records: RefCell<HashMap<usize, OwnedTerm>>,
    predicates: RefCell<Vec<PredKey>>,
    /// Exception set by a foreign predicate via `raise_exception`
    pending: RefCell<Option<OwnedTerm>>,
    next_id: StdCell<usize>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an engine with the list library loaded
    pub fn new() -> Self {
        Self::with_library(true)
    }

    pub fn with_library(load_library: bool) -> Self {
        let backend = Self {
            store: RefCell::new(Store::new()),
            db: RefCell::new(Database::new()),
            frames: RefCell::new(Vec::new()),
            queries: RefCell::new(HashMap::new()),
            records: RefCell::new(HashMap::new()),
            predicates: RefCell::new(Vec::new()),
            pending: RefCell::new(None),
            next_id: StdCell::new(1),
        };
        if load_library {
            backend.load_library();
        }
        backend
    }

    fn load_library(&self) {
        let clauses = match read_program(builtins::LIBRARY) {
            Ok(clauses) => clauses,
            Err(e) => {
                debug!(error = %e.message, "Library failed to parse");
                return;
            }
        };
        let mut db = self.db.borrow_mut();
        for clause in clauses {
            let (head, body) = reader::clause_parts(&clause.term);
            let Some((name, arity)) = head.name_arity() else {
                continue;
            };
            let key = PredKey::new("system", name, arity);
            let body = body.cloned().unwrap_or_else(|| OwnedTerm::atom("true"));
            if let Err(e) = db.add_clause(key, database::Clause::new(head.clone(), body), true) {
                debug!(error = %e, "Library clause rejected");
            }
        }
        debug!(backend = "memory", "System library loaded");
    }

    fn fresh_id(&self) -> usize {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn set(&self, t: RawTerm, cell: Cell) {
        let mut store = self.store.borrow_mut();
        let addr = store.push(cell);
        store.set_slot(t.0, addr);
    }

    /// Snapshot of the term in `t`
    pub(crate) fn owned(&self, t: RawTerm) -> OwnedTerm {
        let store = self.store.borrow();
        store.to_owned(store.slot(t.0), Naming::Sequential)
    }

    fn frame_position(&self, frame: RawFrame) -> Option<usize> {
        self.frames.borrow().iter().rposition(|f| f.id == frame.0)
    }

    fn release_query(&self, query: RawQuery, undo: bool) {
        let state = self.queries.borrow_mut().remove(&query.0);
        let Some(state) = state else { return };
        if let Some(mut machine) = state.machine {
            machine.abandon(self);
        }
        let mut store = self.store.borrow_mut();
        if undo {
            store.undo_to(state.trail_mark);
        }
        store.truncate_slots(state.slot_mark);
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn new_term_refs(&self, count: usize) -> RawTerm {
        RawTerm(self.store.borrow_mut().new_slots(count))
    }

    fn put_variable(&self, t: RawTerm) {
        self.set(t, Cell::Var);
    }

    fn put_atom(&self, t: RawTerm, name: &str) {
        self.set(t, Cell::Atom(Rc::from(name)));
    }

    fn put_nil(&self, t: RawTerm) {
        self.put_atom(t, NIL);
    }

    fn put_integer(&self, t: RawTerm, value: i64) {
        self.set(t, Cell::Int(value));
    }

    fn put_float(&self, t: RawTerm, value: f64) {
        self.set(t, Cell::Float(value));
    }

    fn put_string(&self, t: RawTerm, text: &str) {
        self.set(t, Cell::Str(Rc::from(text)));
    }

    fn put_term(&self, dst: RawTerm, src: RawTerm) {
        let mut store = self.store.borrow_mut();
        let addr = store.slot(src.0);
        store.set_slot(dst.0, addr);
    }

    fn cons_functor(&self, t: RawTerm, name: &str, args: RawTerm, arity: usize) {
        let mut store = self.store.borrow_mut();
        let addrs: Vec<usize> = (0..arity).map(|i| store.slot(args.0 + i)).collect();
        let built = store.new_struct(name, &addrs);
        store.set_slot(t.0, built);
    }

    fn cons_list(&self, t: RawTerm, head: RawTerm, tail: RawTerm) {
        let mut store = self.store.borrow_mut();
        let (h, tl) = (store.slot(head.0), store.slot(tail.0));
        let built = store.new_struct(LIST_FUNCTOR, &[h, tl]);
        store.set_slot(t.0, built);
    }

    fn put_parsed(&self, t: RawTerm, text: &str) -> bool {
        let (term, ok) = match read_term(text) {
            Ok(read) => (read.term, true),
            Err(e) => (e.to_term(text), false),
        };
        let mut store = self.store.borrow_mut();
        let addr = store.from_owned(&term, &mut Vec::new());
        store.set_slot(t.0, addr);
        ok
    }

    fn kind(&self, t: RawTerm) -> TermKind {
        let store = self.store.borrow();
        store.kind(store.slot(t.0))
    }

    fn get_integer(&self, t: RawTerm) -> Option<i64> {
        let store = self.store.borrow();
        store.int_value(store.slot(t.0))
    }

    fn get_float(&self, t: RawTerm) -> Option<f64> {
        let store = self.store.borrow();
        match store.cell(store.slot(t.0)) {
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn get_text(&self, t: RawTerm, mode: TextMode) -> Option<String> {
        let store = self.store.borrow();
        let addr = store.slot(t.0);
        match mode {
            TextMode::Canonical => Some(store.to_owned(addr, Naming::Address).to_string()),
            TextMode::Plain => match store.cell(addr) {
                Cell::Atom(text) | Cell::Str(text) => Some(text.to_string()),
                Cell::Int(i) => Some(i.to_string()),
                Cell::Float(f) => Some(format_float(*f)),
                _ => None,
            },
        }
    }

    fn get_name_arity(&self, t: RawTerm) -> Option<(String, usize)> {
        let store = self.store.borrow();
        match store.cell(store.slot(t.0)) {
            Cell::Atom(name) => Some((name.to_string(), 0)),
            Cell::Struct(name, arity) => Some((name.to_string(), *arity)),
            _ => None,
        }
    }

    fn get_arg(&self, index: usize, t: RawTerm, out: RawTerm) -> bool {
        let mut store = self.store.borrow_mut();
        let addr = store.deref(store.slot(t.0));
        match store.cell(addr) {
            Cell::Struct(_, arity) if index >= 1 && index <= *arity => {
                store.set_slot(out.0, addr + index);
                true
            }
            _ => false,
        }
    }

    fn unify(&self, a: RawTerm, b: RawTerm) -> bool {
        let mut store = self.store.borrow_mut();
        let mark = store.trail_len();
        let (x, y) = (store.slot(a.0), store.slot(b.0));
        if store.unify(x, y) {
            true
        } else {
            store.undo_to(mark);
            false
        }
    }

    fn compare(&self, a: RawTerm, b: RawTerm) -> Ordering {
        let store = self.store.borrow();
        store.compare(store.slot(a.0), store.slot(b.0))
    }

    fn open_frame(&self) -> RawFrame {
        let id = self.fresh_id();
        let (slots, trail) = {
            let store = self.store.borrow();
            (store.slot_len(), store.trail_len())
        };
        self.frames.borrow_mut().push(FrameMark { id, slots, trail });
        RawFrame(id)
    }

    fn close_frame(&self, frame: RawFrame) {
        let Some(position) = self.frame_position(frame) else { return };
        let mut frames = self.frames.borrow_mut();
        let slots = frames[position].slots;
        frames.truncate(position);
        self.store.borrow_mut().truncate_slots(slots);
    }

    fn rewind_frame(&self, frame: RawFrame) {
        let Some(position) = self.frame_position(frame) else { return };
        let mut frames = self.frames.borrow_mut();
        let (slots, trail) = (frames[position].slots, frames[position].trail);
        frames.truncate(position + 1);
        let mut store = self.store.borrow_mut();
        store.undo_to(trail);
        store.truncate_slots(slots);
    }

    fn discard_frame(&self, frame: RawFrame) {
        self.rewind_frame(frame);
        self.close_frame(frame);
    }

    fn predicate(&self, module: &str, name: &str, arity: usize) -> RawPredicate {
        let mut predicates = self.predicates.borrow_mut();
        predicates.push(PredKey::new(module, name, arity));
        RawPredicate(predicates.len() - 1)
    }

    fn open_query(&self, module: &str, predicate: RawPredicate, args: RawTerm) -> RawQuery {
        let key = self.predicates.borrow()[predicate.0].clone();
        let (goal, trail_mark, slot_mark) = {
            let mut store = self.store.borrow_mut();
            let addrs: Vec<usize> = (0..key.arity).map(|i| store.slot(args.0 + i)).collect();
            let goal = store.new_struct(&key.name, &addrs);
            (goal, store.trail_len(), store.slot_len())
        };
        let id = self.fresh_id();
        let state = QueryState {
            machine: Some(Machine::new(goal, Rc::from(module))),
            trail_mark,
            slot_mark,
            exception: None,
        };
        self.queries.borrow_mut().insert(id, state);
        debug!(query = id, predicate = %key.name, arity = key.arity, "Query opened");
        RawQuery(id)
    }

    fn next_solution(&self, query: RawQuery) -> Step {
        let taken = self
            .queries
            .borrow_mut()
            .get_mut(&query.0)
            .and_then(|state| state.machine.take());
        let Some(mut machine) = taken else {
            return Step::Failed;
        };

        let outcome = machine.run(self);
        let last = !machine.has_choices();

        let mut queries = self.queries.borrow_mut();
        let Some(state) = queries.get_mut(&query.0) else {
            return Step::Failed;
        };
        state.machine = Some(machine);
        match outcome {
            Outcome::Solution if last => Step::Last,
            Outcome::Solution => Step::Solution,
            Outcome::Failed => Step::Failed,
            Outcome::Exception(ball) => {
                state.exception = Some(ball);
                Step::Exception
            }
        }
    }

    fn exception(&self, query: RawQuery) -> Option<RawTerm> {
        let ball = self.queries.borrow().get(&query.0)?.exception.clone()?;
        let mut store = self.store.borrow_mut();
        let addr = store.from_owned(&ball, &mut Vec::new());
        Some(RawTerm(store.slots_for(&[addr])))
    }

    fn cut_query(&self, query: RawQuery) {
        self.release_query(query, false);
    }

    fn close_query(&self, query: RawQuery) {
        self.release_query(query, true);
    }

    fn record(&self, t: RawTerm) -> RawRecord {
        let term = self.owned(t);
        let id = self.fresh_id();
        self.records.borrow_mut().insert(id, term);
        RawRecord(id)
    }

    fn recorded(&self, record: RawRecord, t: RawTerm) {
        let Some(term) = self.records.borrow().get(&record.0).cloned() else {
            return;
        };
        let mut store = self.store.borrow_mut();
        let addr = store.from_owned(&term, &mut Vec::new());
        store.set_slot(t.0, addr);
    }

    fn erase(&self, record: RawRecord) {
        self.records.borrow_mut().remove(&record.0);
    }

    fn register_foreign(
        &self,
        module: &str,
        name: &str,
        arity: usize,
        nondeterministic: bool,
        handler: ForeignHandler,
    ) -> Result<(), String> {
        if builtins::is_builtin(name, arity) {
            return Err(format!("No permission to modify static procedure `{}/{}`", name, arity));
        }
        self.db
            .borrow_mut()
            .define_foreign(PredKey::new(module, name, arity), handler, nondeterministic);
        Ok(())
    }

    fn raise_exception(&self, t: RawTerm) {
        let ball = self.owned(t);
        *self.pending.borrow_mut() = Some(ball);
    }

    fn shutdown(&self) {
        let open: Vec<usize> = self.queries.borrow().keys().copied().collect();
        for id in open {
            self.release_query(RawQuery(id), true);
        }
        self.frames.borrow_mut().clear();
        self.records.borrow_mut().clear();
        self.predicates.borrow_mut().clear();
        self.db.borrow_mut().clear();
        self.store.borrow_mut().clear();
        debug!(backend = "memory", "Engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prolog::{ForeignControl, ForeignOutcome};

    fn solve_text(engine: &MemoryBackend, goal: &str) -> (RawTerm, RawQuery) {
        let args = engine.new_term_refs(1);
        assert!(engine.put_parsed(args, goal), "parse failed: {}", goal);
        let call = engine.predicate("user", "call", 1);
        (args, engine.open_query("user", call, args))
    }

    fn all_solutions(engine: &MemoryBackend, goal: &str) -> Vec<String> {
        let (args, query) = solve_text(engine, goal);
        let mut out = Vec::new();
        loop {
            match engine.next_solution(query) {
                Step::Solution | Step::Last => out.push(engine.get_text(args, TextMode::Canonical).unwrap()),
                Step::Failed => break,
                Step::Exception => panic!("unexpected exception in {}", goal),
            }
        }
        engine.close_query(query);
        out
    }

    fn consult(engine: &MemoryBackend, text: &str) {
        for clause in read_program(text).unwrap() {
            let args = engine.new_term_refs(1);
            let wrapped = OwnedTerm::compound("assertz", vec![clause.term]);
            assert!(engine.put_parsed(args, &wrapped.to_string()));
            let call = engine.predicate("user", "call", 1);
            let query = engine.open_query("user", call, args);
            assert!(matches!(engine.next_solution(query), Step::Solution | Step::Last));
            engine.cut_query(query);
        }
    }

    #[test]
    fn test_facts_in_order() {
        let engine = MemoryBackend::new();
        consult(&engine, "p(1). p(2). p(3).");
        assert_eq!(all_solutions(&engine, "p(X)"), vec!["p(1)", "p(2)", "p(3)"]);
    }

    #[test]
    fn test_last_solution_detected() {
        let engine = MemoryBackend::new();
        consult(&engine, "p(1). p(2).");
        let (_, query) = solve_text(&engine, "p(X)");
        assert_eq!(engine.next_solution(query), Step::Solution);
        assert_eq!(engine.next_solution(query), Step::Last);
        assert_eq!(engine.next_solution(query), Step::Failed);
        engine.close_query(query);
    }

    #[test]
    fn test_rules_cut_and_negation() {
        let engine = MemoryBackend::new();
        consult(
            &engine,
            "
            p(1). p(2). p(3).
            first(X) :- p(X), !.
            big(X) :- p(X), X > 1.
            absent(X) :- \\+ p(X).
            classify(X, C) :- ( X > 1 -> C = big ; C = small ).
            ",
        );
        assert_eq!(all_solutions(&engine, "first(X)"), vec!["first(1)"]);
        assert_eq!(all_solutions(&engine, "big(X)"), vec!["big(2)", "big(3)"]);
        assert_eq!(all_solutions(&engine, "absent(4)"), vec!["absent(4)"]);
        assert!(all_solutions(&engine, "absent(1)").is_empty());
        assert_eq!(all_solutions(&engine, "classify(1, C)"), vec!["classify(1,small)"]);
        assert_eq!(all_solutions(&engine, "classify(5, C)"), vec!["classify(5,big)"]);
    }

    #[test]
    fn test_library_and_findall() {
        let engine = MemoryBackend::new();
        assert_eq!(
            all_solutions(&engine, "findall(X, member(X, [c, b, a]), L), L == [c, b, a]").len(),
            1
        );
        assert_eq!(all_solutions(&engine, "append(X, [3], [1, 2, 3]), X == [1, 2]").len(), 1);
        assert_eq!(all_solutions(&engine, "length([a, b, c], 3)"), vec!["length([a,b,c],3)"]);
        assert_eq!(all_solutions(&engine, "reverse([1, 2, 3], [3, 2, 1])").len(), 1);
        assert_eq!(all_solutions(&engine, "memberchk(b, [a, b, b])").len(), 1);
    }

    #[test]
    fn test_catch_and_throw() {
        let engine = MemoryBackend::new();
        assert_eq!(
            all_solutions(&engine, "catch(throw(oops), oops, true)"),
            vec!["catch(throw(oops),oops,true)"]
        );
        assert_eq!(
            all_solutions(&engine, "catch(undefined_thing, error(existence_error(procedure, PI), _), true)").len(),
            1
        );

        let (_, query) = solve_text(&engine, "throw(custom(1))");
        assert_eq!(engine.next_solution(query), Step::Exception);
        let ball = engine.exception(query).unwrap();
        assert_eq!(engine.get_text(ball, TextMode::Canonical).as_deref(), Some("custom(1)"));
        engine.close_query(query);
    }

    #[test]
    fn test_between_and_arithmetic() {
        let engine = MemoryBackend::new();
        assert_eq!(
            all_solutions(&engine, "between(1, 3, X)"),
            vec!["between(1,3,1)", "between(1,3,2)", "between(1,3,3)"]
        );
        assert_eq!(all_solutions(&engine, "X is 2 + 3 * 4"), vec!["14 is 2+3*4"]);
    }

    #[test]
    fn test_frames_rewind_bindings() {
        let engine = MemoryBackend::new();
        let x = engine.new_term_refs(1);
        let frame = engine.open_frame();
        let one = engine.new_term_refs(1);
        engine.put_integer(one, 1);
        assert!(engine.unify(x, one));
        assert_eq!(engine.get_integer(x), Some(1));

        engine.rewind_frame(frame);
        assert_eq!(engine.kind(x), TermKind::Variable);
        engine.close_frame(frame);
    }

    #[test]
    fn test_compound_access() {
        let engine = MemoryBackend::new();
        let t = engine.new_term_refs(2);
        assert!(engine.put_parsed(t, "point(1, \"two\", three)"));
        assert_eq!(engine.get_name_arity(t), Some(("point".to_string(), 3)));
        assert!(engine.get_arg(2, t, t.offset(1)));
        assert_eq!(engine.kind(t.offset(1)), TermKind::String);
        assert_eq!(engine.get_text(t.offset(1), TextMode::Plain).as_deref(), Some("two"));
        assert!(!engine.get_arg(4, t, t.offset(1)));
    }

    #[test]
    fn test_records_survive_rewind() {
        let engine = MemoryBackend::new();
        let frame = engine.open_frame();
        let t = engine.new_term_refs(1);
        assert!(engine.put_parsed(t, "f(X, X, [1])"));
        let record = engine.record(t);
        engine.discard_frame(frame);

        let back = engine.new_term_refs(1);
        engine.recorded(record, back);
        assert_eq!(engine.get_text(back, TextMode::Canonical).map(|s| s.starts_with("f(_G")), Some(true));
        engine.erase(record);
    }

    #[test]
    fn test_nondeterministic_foreign_predicate() {
        let engine = Rc::new(MemoryBackend::new());
        let weak = Rc::downgrade(&engine);
        let handler: ForeignHandler = Rc::new(move |arg: RawTerm, _arity: usize, control: ForeignControl| {
            let Some(engine) = weak.upgrade() else {
                return ForeignOutcome::Fail;
            };
            let n = match control {
                ForeignControl::FirstCall => 1,
                ForeignControl::Redo(prev) => prev + 1,
                ForeignControl::Pruned(_) => return ForeignOutcome::Succeed,
            };
            let value = engine.new_term_refs(1);
            engine.put_integer(value, n as i64);
            if !engine.unify(arg, value) {
                return ForeignOutcome::Fail;
            }
            if n < 3 {
                ForeignOutcome::Retry(n)
            } else {
                ForeignOutcome::Succeed
            }
        });
        engine.register_foreign("user", "count", 1, true, handler).unwrap();
        assert_eq!(all_solutions(&engine, "count(X)"), vec!["count(1)", "count(2)", "count(3)"]);
        assert!(engine
            .register_foreign("user", "is", 2, false, Rc::new(|_: RawTerm, _: usize, _: ForeignControl| {
                ForeignOutcome::Fail
            }))
            .is_err());
    }

    #[test]
    fn test_assert_and_retract() {
        let engine = MemoryBackend::new();
        assert_eq!(all_solutions(&engine, "dynamic(counter/1)").len(), 1);
        assert!(all_solutions(&engine, "counter(X)").is_empty());
        assert_eq!(all_solutions(&engine, "assertz(counter(0)), retract(counter(C)), C1 is C + 1, assertz(counter(C1))").len(), 1);
        assert_eq!(all_solutions(&engine, "counter(X)"), vec!["counter(1)"]);
    }
}
