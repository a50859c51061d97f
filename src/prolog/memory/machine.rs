//! Goal-stack solver of the memory backend.
//!
//! A [`Machine`] runs one query: a stack of pending goals plus a stack of
//! choice points, each holding the goal stack to restore and the trail mark
//! to undo to. Cut removes choice points above the barrier recorded when the
//! clause (or `call/N`) was entered. Foreign predicates are called with no
//! store borrow held, so they may re-enter the backend.

use std::rc::Rc;

use crate::prolog::{ForeignControl, ForeignHandler, ForeignOutcome, RawTerm};
use crate::syntax::{OwnedTerm, NIL};

use super::builtins;
use super::database::{Clauses, Procedure};
use super::errors;
use super::store::{Addr, Cell, Naming};
use super::MemoryBackend;

#[derive(Debug, Clone)]
pub(crate) enum Goal {
    Call {
        term: Addr,
        /// Choice stack height that `!` cuts back to
        barrier: usize,
        module: Rc<str>,
    },
    CutTo(usize),
    /// Leave the `catch/3` frame at this choice index if it is on top
    PopCatch(usize),
    Fail,
}

enum Alternative {
    Goals(Vec<Goal>),
    Clauses {
        goal: Addr,
        module: Rc<str>,
        clauses: Clauses,
        next: usize,
    },
    Foreign {
        handler: ForeignHandler,
        args: Vec<Addr>,
        token: usize,
    },
    Between {
        var: Addr,
        next: i64,
        high: Option<i64>,
    },
    Catch {
        catcher: Addr,
        recovery: Addr,
        module: Rc<str>,
        barrier: usize,
    },
}

struct Choice {
    alternative: Alternative,
    goals: Vec<Goal>,
    trail_mark: usize,
}

pub(crate) enum Flow {
    Proceed,
    Fail,
    Throw(OwnedTerm),
}

pub(crate) enum Outcome {
    Solution,
    Failed,
    Exception(OwnedTerm),
}

pub(crate) struct Machine {
    goals: Vec<Goal>,
    choices: Vec<Choice>,
    started: bool,
}

impl Machine {
    pub fn new(goal: Addr, module: Rc<str>) -> Self {
        Self {
            goals: vec![Goal::Call {
                term: goal,
                barrier: 0,
                module,
            }],
            choices: Vec::new(),
            started: false,
        }
    }

    pub fn has_choices(&self) -> bool {
        !self.choices.is_empty()
    }

    /// Find the next solution; after the first call this backtracks into
    /// the most recent choice point.
    pub fn run(&mut self, be: &MemoryBackend) -> Outcome {
        let mut flow = if self.started { Flow::Fail } else { Flow::Proceed };
        self.started = true;
        loop {
            flow = match flow {
                Flow::Proceed => match self.goals.pop() {
                    Some(goal) => self.execute(be, goal),
                    None => return Outcome::Solution,
                },
                Flow::Fail => match self.choices.pop() {
                    Some(choice) => {
                        be.store.borrow_mut().undo_to(choice.trail_mark);
                        self.goals = choice.goals;
                        self.resume(be, choice.alternative)
                    }
                    None => return Outcome::Failed,
                },
                Flow::Throw(ball) => match self.recover(be, ball) {
                    Ok(()) => Flow::Proceed,
                    Err(ball) => return Outcome::Exception(ball),
                },
            };
        }
    }

    /// Drop every choice point, notifying foreign predicates
    pub fn abandon(&mut self, be: &MemoryBackend) {
        self.cut_to(be, 0);
        self.goals.clear();
    }

    fn trail_mark(be: &MemoryBackend) -> usize {
        be.store.borrow().trail_len()
    }

    fn push_choice(&mut self, be: &MemoryBackend, alternative: Alternative) {
        self.choices.push(Choice {
            alternative,
            goals: self.goals.clone(),
            trail_mark: Self::trail_mark(be),
        });
    }

    fn push_call(&mut self, term: Addr, barrier: usize, module: &Rc<str>) {
        self.goals.push(Goal::Call {
            term,
            barrier,
            module: module.clone(),
        });
    }

    fn cut_to(&mut self, be: &MemoryBackend, height: usize) {
        while self.choices.len() > height {
            if let Some(choice) = self.choices.pop() {
                if let Alternative::Foreign { handler, args, token } = choice.alternative {
                    invoke_foreign(be, &handler, &args, ForeignControl::Pruned(token));
                }
            }
        }
    }

    fn execute(&mut self, be: &MemoryBackend, goal: Goal) -> Flow {
        match goal {
            Goal::Call { term, barrier, module } => self.call(be, term, barrier, module),
            Goal::CutTo(height) => {
                self.cut_to(be, height);
                Flow::Proceed
            }
            Goal::PopCatch(index) => {
                if self.choices.len() == index + 1
                    && matches!(self.choices[index].alternative, Alternative::Catch { .. })
                {
                    self.choices.pop();
                }
                Flow::Proceed
            }
            Goal::Fail => Flow::Fail,
        }
    }

    fn call(&mut self, be: &MemoryBackend, term: Addr, barrier: usize, module: Rc<str>) -> Flow {
        let (name, args) = {
            let store = be.store.borrow();
            match store.functor(term) {
                Some(functor) => functor,
                None if store.is_var(term) => return Flow::Throw(errors::instantiation_error()),
                None => {
                    return Flow::Throw(errors::type_error("callable", store.to_owned(term, Naming::Sequential)))
                }
            }
        };

        match (&*name, args.len()) {
            ("true", 0) => Flow::Proceed,
            ("fail", 0) | ("false", 0) => Flow::Fail,
            ("!", 0) => {
                self.cut_to(be, barrier);
                Flow::Proceed
            }
            (",", 2) => {
                self.push_call(args[1], barrier, &module);
                self.push_call(args[0], barrier, &module);
                Flow::Proceed
            }
            (";", 2) => {
                let condition = {
                    let store = be.store.borrow();
                    match store.functor(args[0]) {
                        Some((f, inner)) if &*f == "->" && inner.len() == 2 => Some((inner[0], inner[1])),
                        _ => None,
                    }
                };
                match condition {
                    Some((cond, then)) => self.if_then_else(be, cond, then, Some(args[1]), barrier, &module),
                    None => {
                        let alternative = vec![Goal::Call {
                            term: args[1],
                            barrier,
                            module: module.clone(),
                        }];
                        self.push_choice(be, Alternative::Goals(alternative));
                        self.push_call(args[0], barrier, &module);
                        Flow::Proceed
                    }
                }
            }
            ("->", 2) => self.if_then_else(be, args[0], args[1], None, barrier, &module),
            ("\\+", 1) | ("not", 1) => {
                let height = self.choices.len();
                self.push_choice(be, Alternative::Goals(Vec::new()));
                self.goals.push(Goal::Fail);
                self.goals.push(Goal::CutTo(height));
                self.push_call(args[0], height + 1, &module);
                Flow::Proceed
            }
            ("call", n) if n >= 1 => {
                let goal = if n == 1 {
                    args[0]
                } else {
                    match add_args(be, args[0], &args[1..]) {
                        Ok(goal) => goal,
                        Err(ball) => return Flow::Throw(ball),
                    }
                };
                let height = self.choices.len();
                self.push_call(goal, height, &module);
                Flow::Proceed
            }
            (":", 2) => {
                let qualifier = be.store.borrow().atom_name(args[0]);
                match qualifier {
                    Some(qualifier) => {
                        self.push_call(args[1], barrier, &qualifier);
                        Flow::Proceed
                    }
                    None => Flow::Throw(errors::type_error(
                        "module",
                        be.store.borrow().to_owned(args[0], Naming::Sequential),
                    )),
                }
            }
            ("catch", 3) => {
                let index = self.choices.len();
                self.push_choice(
                    be,
                    Alternative::Catch {
                        catcher: args[1],
                        recovery: args[2],
                        module: module.clone(),
                        barrier,
                    },
                );
                self.goals.push(Goal::PopCatch(index));
                self.push_call(args[0], index + 1, &module);
                Flow::Proceed
            }
            ("findall", 3) => self.findall(be, args[0], args[1], args[2], &module),
            ("forall", 2) => {
                // \+ (Cond, \+ Action)
                let goal = {
                    let mut store = be.store.borrow_mut();
                    let negated_action = store.new_struct("\\+", &[args[1]]);
                    let conj = store.new_struct(",", &[args[0], negated_action]);
                    store.new_struct("\\+", &[conj])
                };
                self.push_call(goal, barrier, &module);
                Flow::Proceed
            }
            ("between", 3) => self.between(be, args[0], args[1], args[2]),
            _ => {
                if let Some(flow) = builtins::call(be, &name, &args, &module) {
                    return flow;
                }
                self.call_procedure(be, term, &name, args, &module)
            }
        }
    }

    fn call_procedure(&mut self, be: &MemoryBackend, term: Addr, name: &Rc<str>, args: Vec<Addr>, module: &Rc<str>) -> Flow {
        let resolved = be.db.borrow().resolve(module, name, args.len());
        match resolved {
            Some((key, Procedure::Dynamic(clauses))) => self.try_clauses(be, term, key.module, clauses, 0),
            Some((_, Procedure::Foreign { handler, nondeterministic })) => {
                self.call_foreign(be, handler, args, ForeignControl::FirstCall, nondeterministic)
            }
            None => Flow::Throw(errors::unknown_procedure(name, args.len())),
        }
    }

    fn if_then_else(
        &mut self,
        be: &MemoryBackend,
        cond: Addr,
        then: Addr,
        otherwise: Option<Addr>,
        barrier: usize,
        module: &Rc<str>,
    ) -> Flow {
        let height = self.choices.len();
        let else_goals = match otherwise {
            Some(term) => vec![Goal::Call {
                term,
                barrier,
                module: module.clone(),
            }],
            None => vec![Goal::Fail],
        };
        self.push_choice(be, Alternative::Goals(else_goals));
        self.push_call(then, barrier, module);
        self.goals.push(Goal::CutTo(height));
        self.push_call(cond, height + 1, module);
        Flow::Proceed
    }

    fn resume(&mut self, be: &MemoryBackend, alternative: Alternative) -> Flow {
        match alternative {
            Alternative::Goals(goals) => {
                self.goals.extend(goals);
                Flow::Proceed
            }
            Alternative::Clauses {
                goal,
                module,
                clauses,
                next,
            } => self.try_clauses(be, goal, module, clauses, next),
            Alternative::Foreign { handler, args, token } => {
                self.call_foreign(be, handler, args, ForeignControl::Redo(token), true)
            }
            Alternative::Between { var, next, high } => self.enumerate(be, var, next, high),
            // catch/3 is transparent to backtracking
            Alternative::Catch { .. } => Flow::Fail,
        }
    }

    fn try_clauses(&mut self, be: &MemoryBackend, goal: Addr, module: Rc<str>, clauses: Clauses, start: usize) -> Flow {
        let mark = Self::trail_mark(be);
        for index in start..clauses.len() {
            let barrier = self.choices.len();
            let more = index + 1 < clauses.len();
            if more {
                self.choices.push(Choice {
                    alternative: Alternative::Clauses {
                        goal,
                        module: module.clone(),
                        clauses: clauses.clone(),
                        next: index + 1,
                    },
                    goals: self.goals.clone(),
                    trail_mark: mark,
                });
            }

            let body = {
                let mut store = be.store.borrow_mut();
                let clause = store.from_owned(&clauses[index].term, &mut Vec::new());
                if store.unify(clause + 1, goal) {
                    let body = clause + 2;
                    let trivial = matches!(store.cell(body), Cell::Atom(a) if &**a == "true");
                    Some((!trivial).then_some(body))
                } else {
                    store.undo_to(mark);
                    None
                }
            };

            match body {
                Some(Some(body)) => {
                    self.push_call(body, barrier, &module);
                    return Flow::Proceed;
                }
                Some(None) => return Flow::Proceed,
                None if more => {
                    self.choices.pop();
                }
                None => {}
            }
        }
        Flow::Fail
    }

    fn call_foreign(
        &mut self,
        be: &MemoryBackend,
        handler: ForeignHandler,
        args: Vec<Addr>,
        control: ForeignControl,
        nondeterministic: bool,
    ) -> Flow {
        let mark = Self::trail_mark(be);
        match invoke_foreign(be, &handler, &args, control) {
            ForeignOutcome::Succeed => Flow::Proceed,
            ForeignOutcome::Fail => Flow::Fail,
            ForeignOutcome::Retry(token) => {
                if nondeterministic {
                    self.choices.push(Choice {
                        alternative: Alternative::Foreign { handler, args, token },
                        goals: self.goals.clone(),
                        trail_mark: mark,
                    });
                }
                Flow::Proceed
            }
            ForeignOutcome::Raised => Flow::Throw(
                be.pending
                    .borrow_mut()
                    .take()
                    .unwrap_or_else(|| errors::system_error("foreign_predicate_raised_nothing")),
            ),
        }
    }

    fn findall(&mut self, be: &MemoryBackend, template: Addr, goal: Addr, result: Addr, module: &Rc<str>) -> Flow {
        let mark = Self::trail_mark(be);
        let mut inner = Machine::new(goal, module.clone());
        let mut found = Vec::new();
        loop {
            match inner.run(be) {
                Outcome::Solution => found.push(be.store.borrow().to_owned(template, Naming::Sequential)),
                Outcome::Failed => break,
                Outcome::Exception(ball) => {
                    inner.abandon(be);
                    be.store.borrow_mut().undo_to(mark);
                    return Flow::Throw(ball);
                }
            }
        }
        let mut store = be.store.borrow_mut();
        store.undo_to(mark);
        let items: Vec<Addr> = found.iter().map(|t| store.from_owned(t, &mut Vec::new())).collect();
        let nil = store.new_atom(NIL);
        let list = store.new_list(&items, nil);
        if store.unify(result, list) {
            Flow::Proceed
        } else {
            Flow::Fail
        }
    }

    fn between(&mut self, be: &MemoryBackend, low: Addr, high: Addr, x: Addr) -> Flow {
        let (low, high, current) = {
            let store = be.store.borrow();
            let low = match store.cell(low) {
                Cell::Int(i) => *i,
                Cell::Var => return Flow::Throw(errors::instantiation_error()),
                _ => return Flow::Throw(errors::type_error("integer", store.to_owned(low, Naming::Sequential))),
            };
            let high = match store.cell(high) {
                Cell::Int(i) => Some(*i),
                Cell::Atom(a) if matches!(&**a, "inf" | "infinite") => None,
                Cell::Var => return Flow::Throw(errors::instantiation_error()),
                _ => return Flow::Throw(errors::type_error("integer", store.to_owned(high, Naming::Sequential))),
            };
            let current = match store.cell(x) {
                Cell::Int(i) => Some(*i),
                Cell::Var => None,
                _ => return Flow::Throw(errors::type_error("integer", store.to_owned(x, Naming::Sequential))),
            };
            (low, high, current)
        };
        match current {
            Some(value) => {
                if value >= low && high.map_or(true, |h| value <= h) {
                    Flow::Proceed
                } else {
                    Flow::Fail
                }
            }
            None => self.enumerate(be, x, low, high),
        }
    }

    fn enumerate(&mut self, be: &MemoryBackend, var: Addr, next: i64, high: Option<i64>) -> Flow {
        if high.is_some_and(|h| next > h) {
            return Flow::Fail;
        }
        if high.map_or(true, |h| next < h) {
            self.push_choice(
                be,
                Alternative::Between {
                    var,
                    next: next + 1,
                    high,
                },
            );
        }
        let mut store = be.store.borrow_mut();
        let value = store.new_int(next);
        if store.unify(var, value) {
            Flow::Proceed
        } else {
            Flow::Fail
        }
    }

    /// Unwind to the nearest `catch/3` whose catcher unifies with `ball`
    fn recover(&mut self, be: &MemoryBackend, ball: OwnedTerm) -> Result<(), OwnedTerm> {
        while let Some(choice) = self.choices.pop() {
            match choice.alternative {
                Alternative::Foreign { handler, args, token } => {
                    invoke_foreign(be, &handler, &args, ForeignControl::Pruned(token));
                }
                Alternative::Catch {
                    catcher,
                    recovery,
                    module,
                    barrier,
                } => {
                    let caught = {
                        let mut store = be.store.borrow_mut();
                        store.undo_to(choice.trail_mark);
                        let copy = store.from_owned(&ball, &mut Vec::new());
                        if store.unify(catcher, copy) {
                            true
                        } else {
                            store.undo_to(choice.trail_mark);
                            false
                        }
                    };
                    if caught {
                        self.goals = choice.goals;
                        self.push_call(recovery, barrier, &module);
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(ball)
    }
}

/// Call a foreign handler with its arguments in fresh slots
fn invoke_foreign(be: &MemoryBackend, handler: &ForeignHandler, args: &[Addr], control: ForeignControl) -> ForeignOutcome {
    let (slot_mark, base) = {
        let mut store = be.store.borrow_mut();
        let mark = store.slot_len();
        (mark, store.slots_for(args))
    };
    let outcome = handler(RawTerm(base), args.len(), control);
    be.store.borrow_mut().truncate_slots(slot_mark);
    outcome
}

/// `call/N`: append `extra` to the arguments of `goal`
fn add_args(be: &MemoryBackend, goal: Addr, extra: &[Addr]) -> Result<Addr, OwnedTerm> {
    let mut store = be.store.borrow_mut();
    let goal = store.deref(goal);
    match store.cell(goal).clone() {
        Cell::Var => Err(errors::instantiation_error()),
        Cell::Atom(name) => Ok(store.new_struct(&name, extra)),
        Cell::Struct(name, 2) if &*name == ":" => {
            let (qualifier, inner) = (goal + 1, goal + 2);
            drop(store);
            let inner = add_args(be, inner, extra)?;
            Ok(be.store.borrow_mut().new_struct(":", &[qualifier, inner]))
        }
        Cell::Struct(name, arity) => {
            let mut args: Vec<Addr> = (1..=arity).map(|i| goal + i).collect();
            args.extend_from_slice(extra);
            Ok(store.new_struct(&name, &args))
        }
        _ => Err(errors::type_error("callable", store.to_owned(goal, Naming::Sequential))),
    }
}
