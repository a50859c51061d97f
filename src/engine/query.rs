//! Queries
//!
//! A [`Query`] is one proof attempt. Building it does no engine work; the
//! first [`Query::next_solution`] resolves the predicate and opens the native
//! query, and each later call steps the engine once.
//!
//! ```text
//! Unopened ──next──▶ Open ──▶ HasSolution ◀─┐
//!                      │           │ next ───┘
//!                      ▼           ▼
//!                  Exhausted    Closed (cut / close / exception)
//! ```
//!
//! Releasing a query early uses one of two disciplines:
//!
//! - [`Query::cut`] keeps the current bindings readable and drops the
//!   remaining alternatives (also what dropping an open query does)
//! - [`Query::close`] drops everything, bindings included
//!
//! Solutions come in the engine's own resolution order. Handles read from a
//! solution are only good until the next step; [`Query::to_eager_list`]
//! snapshots them into the record store when they must outlive the query.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::record::Solution;
use super::runtime::{Release, Runtime, ScopeId, ScopeKind, ROOT_SCOPE};
use super::term::{Term, TermVector};
use super::text;
use crate::error::{BridgeError, BridgeResult, EngineException};
use crate::prolog::{RawQuery, Step, TermKind, TextMode};
use crate::syntax::OwnedTerm;

/// Lifecycle of a [`Query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Built, no engine resources yet
    Unopened,
    /// Engine query open, not yet stepped
    Open,
    /// The last step produced a solution
    HasSolution,
    /// No more solutions; resources released
    Exhausted,
    /// Released by cut, close or an exception
    Closed,
}

enum Goal {
    Text(String),
    Predicate { name: String, args: TermVector },
}

/// Named bindings of the current solution
#[derive(Clone, Default)]
pub struct Bindings {
    entries: Vec<(String, Term)>,
}

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_owned_map(&self) -> BridgeResult<BTreeMap<String, OwnedTerm>> {
        self.entries
            .iter()
            .map(|(name, t)| Ok((name.clone(), t.to_owned_term()?)))
            .collect()
    }

    /// Bindings as a JSON object
    pub fn to_json(&self) -> BridgeResult<JsonValue> {
        let mut object = serde_json::Map::new();
        for (name, t) in &self.entries {
            object.insert(name.clone(), t.to_json()?);
        }
        Ok(JsonValue::Object(object))
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(n, t)| (n, t))).finish()
    }
}

/// A lazily opened, forward-only solution sequence
pub struct Query {
    rt: Runtime,
    module: String,
    goal: Goal,
    args: Option<TermVector>,
    variables: Vec<(String, usize)>,
    raw: Option<RawQuery>,
    scope: ScopeId,
    state: QueryState,
    fused: bool,
}

impl Query {
    /// Query `module:name(args...)`. Solutions expose the arguments under
    /// their 1-based positions (`"1"`, `"2"`, ...) unless renamed with
    /// [`Query::with_names`].
    pub fn new(rt: &Runtime, module: &str, name: &str, args: TermVector) -> Self {
        let variables = (0..args.len()).map(|i| ((i + 1).to_string(), i)).collect();
        Self::build(
            rt,
            module,
            Goal::Predicate {
                name: name.to_string(),
                args,
            },
            variables,
        )
    }

    /// Query goal text. Named variables written as top-level arguments
    /// (`p(X, Y)`) are reported in the bindings.
    pub fn from_text(rt: &Runtime, module: &str, goal: &str) -> Self {
        Self::build(rt, module, Goal::Text(goal.to_string()), Vec::new())
    }

    fn build(rt: &Runtime, module: &str, goal: Goal, variables: Vec<(String, usize)>) -> Self {
        Self {
            rt: rt.clone(),
            module: module.to_string(),
            goal,
            args: None,
            variables,
            raw: None,
            scope: ROOT_SCOPE,
            state: QueryState::Unopened,
            fused: false,
        }
    }

    /// Name the arguments of a predicate query, in order
    pub fn with_names(mut self, names: &[&str]) -> Self {
        if let Goal::Predicate { args, .. } = &self.goal {
            self.variables = names
                .iter()
                .take(args.len())
                .enumerate()
                .map(|(i, name)| (name.to_string(), i))
                .collect();
        }
        self
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Names reported in [`Bindings`]; known once the query is open
    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// The argument vector; holds the bindings of the current solution
    pub fn args(&self) -> Option<&TermVector> {
        self.args.as_ref()
    }

    fn open(&mut self) -> BridgeResult<()> {
        let (module, name, args) = match &self.goal {
            Goal::Predicate { name, args } => {
                self.rt.inner().check_scope(args.scope())?;
                (self.module.clone(), name.clone(), args.clone())
            }
            Goal::Text(goal) => {
                let resolved = resolve_text(&self.rt, &self.module, goal)?;
                self.variables = text::goal_variables(goal)
                    .into_iter()
                    .filter(|(_, index)| *index < resolved.args.len() && resolved.named)
                    .collect();
                (resolved.module, resolved.name, resolved.args)
            }
        };

        let be = self.rt.backend();
        let predicate = be.predicate(&module, &name, args.len());
        let raw = be.open_query(&module, predicate, args.base());
        self.scope = self.rt.inner().push_scope(ScopeKind::Query(raw));
        self.raw = Some(raw);
        self.args = Some(args);
        self.state = QueryState::Open;
        debug!(module = %module, predicate = %name, arity = self.args.as_ref().map_or(0, |a| a.len()), "Query opened");
        Ok(())
    }

    /// Step to the next solution. Returns `Ok(false)` once the goal has no
    /// (more) solutions; an exception closes the query and is returned as
    /// [`BridgeError::Exception`].
    pub fn next_solution(&mut self) -> BridgeResult<bool> {
        match self.state {
            QueryState::Unopened => {
                if let Err(e) = self.open() {
                    self.state = QueryState::Closed;
                    self.fused = true;
                    return Err(e);
                }
            }
            QueryState::Open | QueryState::HasSolution => {}
            QueryState::Exhausted => return Ok(false),
            QueryState::Closed => return Err(BridgeError::misuse("query has been closed")),
        }
        let Some(raw) = self.raw else {
            return Err(BridgeError::misuse("query has no engine resources"));
        };

        let inner = self.rt.inner();
        if !inner.is_scope_live(self.scope) {
            self.state = QueryState::Closed;
            self.fused = true;
            return Err(BridgeError::misuse("query was released together with an enclosing scope"));
        }
        if !inner.is_innermost(self.scope) {
            return Err(BridgeError::misuse("query is not the innermost open scope"));
        }

        let be = self.rt.backend();
        match be.next_solution(raw) {
            Step::Solution | Step::Last => {
                self.state = QueryState::HasSolution;
                Ok(true)
            }
            Step::Failed => {
                self.state = QueryState::Exhausted;
                self.fused = true;
                inner.release_scope(self.scope, Release::Close)?;
                debug!(query = raw.0, "Query exhausted");
                Ok(false)
            }
            Step::Exception => {
                let exception = match be.exception(raw) {
                    Some(ball) => inner.exception_from(ball),
                    None => EngineException::new(OwnedTerm::atom("unknown_exception")),
                };
                self.state = QueryState::Closed;
                self.fused = true;
                inner.release_scope(self.scope, Release::Close)?;
                debug!(query = raw.0, exception = %exception, "Query raised");
                Err(exception.into())
            }
        }
    }

    /// Bindings of the named variables, read from the argument vector
    pub fn bindings(&self) -> BridgeResult<Bindings> {
        let args = self
            .args
            .as_ref()
            .ok_or_else(|| BridgeError::misuse("query has not been opened"))?;
        let entries = self
            .variables
            .iter()
            .map(|(name, index)| Ok((name.clone(), args.get(*index)?)))
            .collect::<BridgeResult<Vec<_>>>()?;
        Ok(Bindings { entries })
    }

    /// Stop enumerating, keeping the current bindings readable
    pub fn cut(&mut self) -> BridgeResult<()> {
        self.release(Release::Cut)
    }

    /// Stop enumerating and undo the current bindings
    pub fn close(&mut self) -> BridgeResult<()> {
        self.release(Release::Close)
    }

    fn release(&mut self, how: Release) -> BridgeResult<()> {
        match self.state {
            QueryState::Unopened => {
                self.state = QueryState::Closed;
                Ok(())
            }
            QueryState::Exhausted => Ok(()),
            QueryState::Closed => Err(BridgeError::misuse("query released twice")),
            QueryState::Open | QueryState::HasSolution => {
                self.state = QueryState::Closed;
                self.fused = true;
                if !self.rt.inner().is_scope_live(self.scope) {
                    return Err(BridgeError::misuse(
                        "query was released together with an enclosing scope",
                    ));
                }
                self.rt.inner().release_scope(self.scope, how)?;
                debug!(query = self.raw.map_or(0, |q| q.0), discipline = ?how, "Query released");
                Ok(())
            }
        }
    }

    /// Drain every solution, snapshotting the named bindings so they stay
    /// readable after the query is gone
    pub fn to_eager_list(mut self) -> BridgeResult<Vec<Solution>> {
        let mut solutions = Vec::new();
        while self.next_solution()? {
            let bindings = self.bindings()?;
            let snapshot = bindings
                .iter()
                .map(|(name, t)| Ok((name.to_string(), t.record()?)))
                .collect::<BridgeResult<Vec<_>>>()?;
            solutions.push(Solution::new(snapshot));
        }
        Ok(solutions)
    }
}

impl Iterator for Query {
    type Item = BridgeResult<Bindings>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        match self.next_solution() {
            Ok(true) => Some(self.bindings()),
            Ok(false) => {
                self.fused = true;
                None
            }
            Err(e) => {
                self.fused = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for Query {}

impl Drop for Query {
    fn drop(&mut self) {
        if matches!(self.state, QueryState::Open | QueryState::HasSolution)
            && self.rt.inner().is_scope_live(self.scope)
        {
            if !self.rt.inner().is_innermost(self.scope) {
                warn!(query = self.raw.map_or(0, |q| q.0), "Open query dropped out of order");
            }
            if let Err(e) = self.rt.inner().release_scope(self.scope, Release::Cut) {
                debug!(error = %e, "Query not released on drop");
            }
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let goal = match &self.goal {
            Goal::Text(text) => text.clone(),
            Goal::Predicate { name, args } => format!("{}/{}", name, args.len()),
        };
        f.debug_struct("Query")
            .field("module", &self.module)
            .field("goal", &goal)
            .field("state", &self.state)
            .finish()
    }
}

struct ResolvedGoal {
    module: String,
    name: String,
    args: TermVector,
    /// Whether the text's own argument positions are the query's arguments
    named: bool,
}

/// Parse goal text and split it into predicate and argument vector
fn resolve_text(rt: &Runtime, module: &str, goal: &str) -> BridgeResult<ResolvedGoal> {
    let term = rt.parse(goal)?;
    let be = rt.backend();
    let qualified = term.kind()? == TermKind::Compound
        && term.name_arity()? == (":".to_string(), 2)
        && term.get(1)?.kind()? == TermKind::Atom;
    let (module, term) = if qualified {
        let qualifier = term.get(1)?;
        (
            be.get_text(qualifier.raw(), TextMode::Plain).unwrap_or_else(|| module.to_string()),
            term.get(2)?,
        )
    } else {
        (module.to_string(), term)
    };

    match term.kind()? {
        TermKind::Atom | TermKind::Compound => {
            let (name, arity) = term.name_arity()?;
            let args = rt.new_vector(arity)?;
            for i in 0..arity {
                be.get_arg(i + 1, term.raw(), args.base().offset(i));
            }
            Ok(ResolvedGoal {
                module,
                name,
                args,
                named: true,
            })
        }
        // Anything else goes through call/1, which raises the proper error
        _ => Ok(ResolvedGoal {
            module,
            name: "call".to_string(),
            args: rt.vector_from(&[term])?,
            named: false,
        }),
    }
}

impl Runtime {
    /// Query goal text in the default module
    pub fn query(&self, goal: &str) -> Query {
        Query::from_text(self, self.default_module(), goal)
    }

    pub fn query_in(&self, module: &str, goal: &str) -> Query {
        Query::from_text(self, module, goal)
    }

    /// Query `name(args...)` in the default module
    pub fn query_predicate(&self, name: &str, args: TermVector) -> Query {
        Query::new(self, self.default_module(), name, args)
    }

    /// Whether `goal` has at least one solution
    pub fn contains(&self, goal: &str) -> BridgeResult<bool> {
        let mut query = self.query(goal);
        let found = query.next_solution()?;
        query.close()?;
        Ok(found)
    }

    /// First solution of `goal`. The query is cut, so the returned handles
    /// stay readable.
    pub fn solve_once(&self, goal: &str) -> BridgeResult<Option<Bindings>> {
        let mut query = self.query(goal);
        if !query.next_solution()? {
            return Ok(None);
        }
        let bindings = query.bindings()?;
        query.cut()?;
        Ok(Some(bindings))
    }

    /// Every solution of `goal`, snapshotted
    pub fn solve_all(&self, goal: &str) -> BridgeResult<Vec<Solution>> {
        self.query(goal).to_eager_list()
    }

    /// Call `name(args...)` in the default module once; bindings made to the
    /// arguments are kept
    pub fn call_predicate(&self, name: &str, args: &[Term]) -> BridgeResult<bool> {
        let module = self.default_module().to_string();
        self.call_predicate_in(&module, name, args)
    }

    pub fn call_predicate_in(&self, module: &str, name: &str, args: &[Term]) -> BridgeResult<bool> {
        let vector = self.vector_from(args)?;
        let mut query = Query::new(self, module, name, vector);
        let found = query.next_solution()?;
        if found {
            query.cut()?;
        }
        Ok(found)
    }

    /// Add a clause at the end of its predicate
    pub fn assertz(&self, clause: &str) -> BridgeResult<()> {
        self.database_call("assertz", clause).map(|_| ())
    }

    /// Add a clause at the start of its predicate
    pub fn asserta(&self, clause: &str) -> BridgeResult<()> {
        self.database_call("asserta", clause).map(|_| ())
    }

    /// Remove the first clause unifying with `clause`
    pub fn retract(&self, clause: &str) -> BridgeResult<bool> {
        self.database_call("retract", clause)
    }

    fn database_call(&self, action: &str, clause: &str) -> BridgeResult<bool> {
        self.with_frame(|_| {
            let term = self.parse(clause)?;
            self.call_predicate(action, &[term])
        })
    }

    /// Load program text: clauses are added in order, `:- Goal` directives
    /// run as they are met. Returns the number of clauses added.
    pub fn consult_str(&self, program: &str) -> BridgeResult<usize> {
        let mut added = 0;
        for clause in text::split_clauses(program) {
            if self.with_frame(|_| self.load_clause(&clause))? {
                added += 1;
            }
        }
        debug!(clauses = added, "Program consulted");
        Ok(added)
    }

    pub fn consult_file<P: AsRef<Path>>(&self, path: P) -> BridgeResult<usize> {
        let path = path.as_ref();
        let program = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Consulting file");
        self.consult_str(&program)
    }

    /// Returns whether a clause (rather than a directive) was loaded
    fn load_clause(&self, clause: &str) -> BridgeResult<bool> {
        let term = self.parse(clause)?;
        match term.name_arity()? {
            (name, 1) if name == ":-" || name == "?-" => {
                let goal = term.get(1)?;
                match self.call_predicate("call", &[goal]) {
                    Ok(true) => {}
                    Ok(false) => warn!(directive = %clause, "Directive failed"),
                    Err(e) => warn!(directive = %clause, error = %e, "Directive raised an exception"),
                }
                Ok(false)
            }
            _ => {
                self.call_predicate("assertz", &[term])?;
                Ok(true)
            }
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::engine::runtime::testing;

    fn ints(solutions: &[Solution], name: &str) -> Vec<i64> {
        solutions
            .iter()
            .map(|s| s.get(name).unwrap().to_owned_term().unwrap().as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_lazy_construction() {
        let rt = testing::runtime();
        let query = rt.query("this is not valid syntax");
        assert_eq!(query.state(), QueryState::Unopened);
        assert_eq!(rt.open_scopes(), 0);
        drop(query);

        let mut query = rt.query("p(");
        assert!(matches!(query.next_solution(), Err(BridgeError::Exception(_))));
        assert_eq!(query.state(), QueryState::Closed);
    }

    #[test]
    fn test_states_through_exhaustion() {
        let rt = testing::runtime();
        rt.consult_str("p(1). p(2). p(3).").unwrap();
        let mut query = rt.query("p(X)");
        let mut seen = Vec::new();
        while query.next_solution().unwrap() {
            assert_eq!(query.state(), QueryState::HasSolution);
            seen.push(query.bindings().unwrap().get("X").unwrap().as_i64().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(query.state(), QueryState::Exhausted);
        assert!(!query.next_solution().unwrap());
        assert_eq!(rt.open_scopes(), 0);

        // Releasing an exhausted query is a no-op
        query.close().unwrap();
        query.cut().unwrap();
    }

    #[test]
    fn test_double_release_is_misuse() {
        let rt = testing::runtime();
        rt.consult_str("p(1). p(2).").unwrap();
        let mut query = rt.query("p(X)");
        assert!(query.next_solution().unwrap());
        query.close().unwrap();
        assert!(matches!(query.close(), Err(BridgeError::ResourceMisuse(_))));
        assert!(matches!(query.next_solution(), Err(BridgeError::ResourceMisuse(_))));
    }

    #[test]
    fn test_cut_keeps_bindings_close_undoes_them() {
        let rt = testing::runtime();
        rt.consult_str("p(1). p(2).").unwrap();

        let mut query = rt.query("p(X)");
        assert!(query.next_solution().unwrap());
        let x = query.bindings().unwrap().get("X").unwrap().clone();
        query.cut().unwrap();
        assert_eq!(x.as_i64().unwrap(), 1);

        let mut query = rt.query("p(X)");
        assert!(query.next_solution().unwrap());
        let x = query.bindings().unwrap().get("X").unwrap().clone();
        query.close().unwrap();
        assert!(x.is_variable().unwrap());
    }

    #[test]
    fn test_exception_closes_query() {
        let rt = testing::runtime();
        let mut query = rt.query("undefined_predicate(X)");
        let err = query.next_solution().unwrap_err();
        let exception = err.as_exception().unwrap();
        assert_eq!(exception.kind(), Some("existence_error"));
        assert_eq!(
            exception.message(),
            "error(existence_error(procedure,undefined_predicate/1),undefined_predicate/1)"
        );
        assert_eq!(query.state(), QueryState::Closed);
        assert_eq!(rt.open_scopes(), 0);
        assert!(query.next().is_none());
    }

    #[test]
    fn test_nested_query_must_finish_first() {
        let rt = testing::runtime();
        rt.consult_str("p(1). p(2).").unwrap();
        let mut outer = rt.query("p(X)");
        assert!(outer.next_solution().unwrap());
        let mut inner = rt.query("p(Y)");
        assert!(inner.next_solution().unwrap());

        assert!(matches!(outer.next_solution(), Err(BridgeError::ResourceMisuse(_))));
        drop(inner);
        assert!(outer.next_solution().unwrap());
    }

    #[test]
    fn test_iterator_and_eager_list() {
        let rt = testing::runtime();
        rt.consult_str("q(a, 1). q(b, 2).").unwrap();
        let pairs: Vec<(String, i64)> = rt
            .query("q(K, V)")
            .map(|b| {
                let b = b.unwrap();
                (b.get("K").unwrap().text().unwrap(), b.get("V").unwrap().as_i64().unwrap())
            })
            .collect();
        assert_eq!(pairs, vec![("a".to_string(), 1), ("b".to_string(), 2)]);

        let solutions = rt.solve_all("q(_, V)").unwrap();
        assert_eq!(ints(&solutions, "V"), vec![1, 2]);
    }

    #[test]
    fn test_predicate_query_positions() {
        let rt = testing::runtime();
        let args = rt.new_vector(3).unwrap();
        args.set(0, &rt.parse("[a]").unwrap()).unwrap();
        args.set(1, &rt.parse("[b, c]").unwrap()).unwrap();
        let mut query = Query::new(&rt, "user", "append", args);
        assert!(query.next_solution().unwrap());
        let bindings = query.bindings().unwrap();
        assert_eq!(bindings.get("3").unwrap().to_text().unwrap(), "[a,b,c]");

        let args = rt.new_vector(2).unwrap();
        args.set(1, &rt.parse("[x, y]").unwrap()).unwrap();
        let solutions = Query::new(&rt, "user", "member", args)
            .with_names(&["Item"])
            .to_eager_list()
            .unwrap();
        assert_eq!(solutions.len(), 2);
        assert_eq!(solutions[1].to_json().unwrap(), serde_json::json!({"Item": "y"}));
    }

    #[test]
    fn test_module_qualified_text() {
        let rt = testing::runtime();
        rt.consult_str("data(7).").unwrap();
        let bindings = rt.solve_once("user:data(X)").unwrap().unwrap();
        assert_eq!(bindings.get("X").unwrap().as_i64().unwrap(), 7);
    }

    #[test]
    fn test_database_helpers() {
        let rt = testing::runtime();
        rt.assertz("fact(2)").unwrap();
        rt.asserta("fact(1)").unwrap();
        rt.assertz("double(X, Y) :- fact(X), Y is X * 2").unwrap();
        assert_eq!(ints(&rt.solve_all("double(_, Y)").unwrap(), "Y"), vec![2, 4]);

        assert!(rt.retract("fact(1)").unwrap());
        assert!(!rt.retract("fact(1)").unwrap());
        assert_eq!(ints(&rt.solve_all("fact(X)").unwrap(), "X"), vec![2]);
        assert_eq!(rt.open_scopes(), 0);
    }

    #[test]
    fn test_consult_directives() {
        let rt = testing::runtime();
        let added = rt
            .consult_str(
                "
                :- dynamic counter/1.
                :- fail.
                item(1).
                item(2).
                ",
            )
            .unwrap();
        assert_eq!(added, 2);
        assert!(!rt.contains("counter(_)").unwrap());
        assert!(rt.contains("item(2)").unwrap());

        assert!(rt.consult_str("broken(.").is_err());
    }

    #[test]
    fn test_call_predicate_binds_arguments() {
        let rt = testing::runtime();
        let list = rt.parse("[a, b, c]").unwrap();
        let length = rt.new_variable().unwrap();
        assert!(rt.call_predicate("length", &[list, length.clone()]).unwrap());
        assert_eq!(length.as_i64().unwrap(), 3);
    }
}
