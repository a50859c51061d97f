//! Predicate table of the memory backend.

use std::collections::HashMap;
use std::rc::Rc;

use crate::prolog::ForeignHandler;
use crate::syntax::OwnedTerm;

use super::errors;

/// Module-qualified predicate indicator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PredKey {
    pub module: Rc<str>,
    pub name: Rc<str>,
    pub arity: usize,
}

impl PredKey {
    pub fn new(module: &str, name: &str, arity: usize) -> Self {
        Self {
            module: Rc::from(module),
            name: Rc::from(name),
            arity,
        }
    }
}

/// A stored clause, always of the shape `Head :- Body`
#[derive(Debug)]
pub(crate) struct Clause {
    pub term: OwnedTerm,
}

impl Clause {
    pub fn new(head: OwnedTerm, body: OwnedTerm) -> Self {
        Self {
            term: OwnedTerm::compound(":-", vec![head, body]),
        }
    }
}

/// Clause list shared with running alternatives; updates copy on write so
/// that a running goal keeps seeing the clauses it started with.
pub(crate) type Clauses = Rc<Vec<Rc<Clause>>>;

#[derive(Clone)]
pub(crate) enum Procedure {
    Dynamic(Clauses),
    Foreign {
        handler: ForeignHandler,
        nondeterministic: bool,
    },
}

/// Modules searched after the calling module
const FALLBACK_MODULES: [&str; 2] = ["user", "system"];

#[derive(Default)]
pub(crate) struct Database {
    procedures: HashMap<PredKey, Procedure>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.procedures.clear();
    }

    /// Find the procedure for a call made in `module`
    pub fn resolve(&self, module: &Rc<str>, name: &Rc<str>, arity: usize) -> Option<(PredKey, Procedure)> {
        let mut key = PredKey {
            module: module.clone(),
            name: name.clone(),
            arity,
        };
        if let Some(procedure) = self.procedures.get(&key) {
            return Some((key, procedure.clone()));
        }
        for fallback in FALLBACK_MODULES {
            if &*key.module == fallback {
                continue;
            }
            key.module = Rc::from(fallback);
            if let Some(procedure) = self.procedures.get(&key) {
                return Some((key, procedure.clone()));
            }
        }
        None
    }

    pub fn get(&self, key: &PredKey) -> Option<&Procedure> {
        self.procedures.get(key)
    }

    /// Declare a dynamic predicate; existing clauses are kept
    pub fn declare_dynamic(&mut self, key: PredKey) -> Result<(), OwnedTerm> {
        match self.procedures.get(&key) {
            Some(Procedure::Foreign { .. }) => Err(errors::permission_error(
                "modify",
                "static_procedure",
                errors::indicator(&key.name, key.arity),
            )),
            Some(Procedure::Dynamic(_)) => Ok(()),
            None => {
                self.procedures.insert(key, Procedure::Dynamic(Rc::new(Vec::new())));
                Ok(())
            }
        }
    }

    pub fn add_clause(&mut self, key: PredKey, clause: Clause, at_end: bool) -> Result<(), OwnedTerm> {
        let indicator = errors::indicator(&key.name, key.arity);
        let procedure = self
            .procedures
            .entry(key)
            .or_insert_with(|| Procedure::Dynamic(Rc::new(Vec::new())));
        match procedure {
            Procedure::Dynamic(clauses) => {
                let clauses = Rc::make_mut(clauses);
                if at_end {
                    clauses.push(Rc::new(clause));
                } else {
                    clauses.insert(0, Rc::new(clause));
                }
                Ok(())
            }
            Procedure::Foreign { .. } => Err(errors::permission_error("modify", "static_procedure", indicator)),
        }
    }

    pub fn remove_clause(&mut self, key: &PredKey, clause: &Rc<Clause>) {
        if let Some(Procedure::Dynamic(clauses)) = self.procedures.get_mut(key) {
            Rc::make_mut(clauses).retain(|c| !Rc::ptr_eq(c, clause));
        }
    }

    /// Install a foreign predicate, replacing any earlier definition
    pub fn define_foreign(&mut self, key: PredKey, handler: ForeignHandler, nondeterministic: bool) {
        self.procedures.insert(
            key,
            Procedure::Foreign {
                handler,
                nondeterministic,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(n: i64) -> Clause {
        Clause::new(
            OwnedTerm::compound("p", vec![OwnedTerm::Integer(n)]),
            OwnedTerm::atom("true"),
        )
    }

    #[test]
    fn test_resolve_falls_back_to_user_and_system() {
        let mut db = Database::new();
        db.add_clause(PredKey::new("system", "lib", 0), fact(0), true).unwrap();
        db.add_clause(PredKey::new("user", "p", 1), fact(1), true).unwrap();

        let module: Rc<str> = Rc::from("other");
        let (key, _) = db.resolve(&module, &Rc::from("p"), 1).unwrap();
        assert_eq!(&*key.module, "user");
        let (key, _) = db.resolve(&module, &Rc::from("lib"), 0).unwrap();
        assert_eq!(&*key.module, "system");
        assert!(db.resolve(&module, &Rc::from("missing"), 0).is_none());
    }

    #[test]
    fn test_clause_updates_do_not_disturb_snapshots() {
        let mut db = Database::new();
        let key = PredKey::new("user", "p", 1);
        db.add_clause(key.clone(), fact(1), true).unwrap();

        let snapshot = match db.get(&key) {
            Some(Procedure::Dynamic(clauses)) => clauses.clone(),
            _ => panic!("expected dynamic procedure"),
        };
        db.add_clause(key.clone(), fact(2), true).unwrap();
        db.add_clause(key.clone(), fact(0), false).unwrap();

        assert_eq!(snapshot.len(), 1);
        match db.get(&key) {
            Some(Procedure::Dynamic(clauses)) => {
                assert_eq!(clauses.len(), 3);
                let first = clauses[0].clone();
                db.remove_clause(&key, &first);
            }
            _ => panic!("expected dynamic procedure"),
        }
        match db.get(&key) {
            Some(Procedure::Dynamic(clauses)) => assert_eq!(clauses.len(), 2),
            _ => panic!("expected dynamic procedure"),
        }
    }
}
