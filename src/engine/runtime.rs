//! Process-scoped engine context
//!
//! A [`Runtime`] owns the one engine a process may run. It is created with
//! [`Runtime::init`] and lives until [`Runtime::shutdown`] or until the last
//! clone (and the last term handle referring to it) is dropped.
//!
//! ## Scopes
//!
//! Handle validity follows the engine's stack discipline. The runtime keeps a
//! stack of open scopes (frames, queries and running foreign predicates) and
//! every [`Term`](super::Term) remembers the scope that was innermost when it
//! was created. Releasing a scope releases every younger scope first, so each
//! native resource is given back exactly once, and any handle whose scope is
//! gone reports [`BridgeError::ResourceMisuse`] instead of touching the engine.
//!
//! ## Threads
//!
//! `Runtime` is `!Send`: every engine operation happens on the thread that
//! created it. A process-wide guard rejects a second live runtime.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::continuation::ContinuationTable;
use super::foreign::ForeignTable;
use crate::config::{BackendKind, EngineOptions};
use crate::error::{BridgeError, BridgeResult, EngineException};
use crate::prolog::{Backend, RawFrame, RawQuery, RawTerm, TermKind, TextMode};
use crate::syntax::{OwnedTerm, LIST_FUNCTOR};

/// Thread owning the live engine, if any
static ENGINE_OWNER: Mutex<Option<ThreadId>> = parking_lot::const_mutex(None);

/// Claim on the process-wide engine slot, released on drop
struct EngineGuard;

impl EngineGuard {
    fn claim() -> BridgeResult<Self> {
        let mut owner = ENGINE_OWNER.lock();
        if let Some(thread) = *owner {
            return Err(BridgeError::InitializationFailure(format!(
                "an engine is already running in this process (owned by {:?})",
                thread
            )));
        }
        *owner = Some(thread::current().id());
        Ok(EngineGuard)
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        *ENGINE_OWNER.lock() = None;
    }
}

pub(crate) type ScopeId = usize;

/// Scope of handles created outside any frame, query or callback
pub(crate) const ROOT_SCOPE: ScopeId = 0;

#[derive(Debug, Clone, Copy)]
pub(crate) enum ScopeKind {
    Frame(RawFrame),
    Query(RawQuery),
    Callback,
}

impl ScopeKind {
    fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Frame(_) => "frame",
            ScopeKind::Query(_) => "query",
            ScopeKind::Callback => "callback",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Scope {
    id: ScopeId,
    kind: ScopeKind,
}

/// How a scope's native resources are given back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    /// Frames: reclaim handles, keep bindings. Queries: undo everything.
    Close,
    /// Frames: undo bindings, then close
    Discard,
    /// Queries: drop remaining choice points, keep bindings
    Cut,
}

pub(crate) struct RuntimeInner {
    backend: Box<dyn Backend>,
    options: EngineOptions,
    scopes: RefCell<Vec<Scope>>,
    next_scope: Cell<ScopeId>,
    live: Cell<bool>,
    pub(crate) foreign: ForeignTable,
    pub(crate) continuations: ContinuationTable,
    guard: RefCell<Option<EngineGuard>>,
}

impl RuntimeInner {
    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.get()
    }

    pub(crate) fn check_live(&self) -> BridgeResult<()> {
        if self.live.get() {
            Ok(())
        } else {
            Err(BridgeError::misuse("the runtime has been shut down"))
        }
    }

    pub(crate) fn current_scope(&self) -> ScopeId {
        self.scopes.borrow().last().map_or(ROOT_SCOPE, |s| s.id)
    }

    fn fresh_scope_id(&self) -> ScopeId {
        let id = self.next_scope.get();
        self.next_scope.set(id + 1);
        id
    }

    pub(crate) fn push_scope(&self, kind: ScopeKind) -> ScopeId {
        let id = self.fresh_scope_id();
        self.scopes.borrow_mut().push(Scope { id, kind });
        id
    }

    fn position(&self, scope: ScopeId) -> Option<usize> {
        self.scopes.borrow().iter().rposition(|s| s.id == scope)
    }

    pub(crate) fn is_scope_live(&self, scope: ScopeId) -> bool {
        self.live.get() && (scope == ROOT_SCOPE || self.position(scope).is_some())
    }

    pub(crate) fn check_scope(&self, scope: ScopeId) -> BridgeResult<()> {
        self.check_live()?;
        if scope == ROOT_SCOPE || self.position(scope).is_some() {
            Ok(())
        } else {
            Err(BridgeError::misuse(
                "term handle used after its frame or query was released",
            ))
        }
    }

    pub(crate) fn is_innermost(&self, scope: ScopeId) -> bool {
        self.scopes.borrow().last().map(|s| s.id) == Some(scope)
    }

    fn check_no_callback_above(&self, position: usize) -> BridgeResult<()> {
        let blocked = self.scopes.borrow()[position + 1..]
            .iter()
            .any(|s| matches!(s.kind, ScopeKind::Callback));
        if blocked {
            return Err(BridgeError::misuse(
                "cannot release a scope while a foreign predicate called inside it is running",
            ));
        }
        Ok(())
    }

    /// Release `scope` and everything opened after it
    pub(crate) fn release_scope(&self, scope: ScopeId, how: Release) -> BridgeResult<()> {
        self.check_live()?;
        let position = self
            .position(scope)
            .ok_or_else(|| BridgeError::misuse("scope released twice"))?;
        self.check_no_callback_above(position)?;
        self.unwind_to(position + 1, false);
        let released = self.scopes.borrow_mut().pop();
        if let Some(released) = released {
            self.release_native(released.kind, how);
        }
        Ok(())
    }

    /// Undo a frame's bindings and give it a fresh identity, invalidating
    /// handles created inside it
    pub(crate) fn rewind_scope(&self, scope: ScopeId) -> BridgeResult<ScopeId> {
        self.check_live()?;
        let position = self
            .position(scope)
            .ok_or_else(|| BridgeError::misuse("frame is no longer open"))?;
        self.check_no_callback_above(position)?;
        self.unwind_to(position + 1, false);
        let kind = self.scopes.borrow()[position].kind;
        let ScopeKind::Frame(frame) = kind else {
            return Err(BridgeError::misuse("only frames can be rewound"));
        };
        self.backend.rewind_frame(frame);
        let fresh = self.fresh_scope_id();
        self.scopes.borrow_mut()[position].id = fresh;
        Ok(fresh)
    }

    /// Close a foreign-call scope, releasing whatever the callback left open
    pub(crate) fn pop_callback(&self, scope: ScopeId) {
        if let Some(position) = self.position(scope) {
            self.unwind_to(position + 1, !self.live.get());
            self.scopes.borrow_mut().truncate(position);
        }
    }

    fn unwind_to(&self, len: usize, shutting_down: bool) {
        loop {
            let top = {
                let mut scopes = self.scopes.borrow_mut();
                if scopes.len() > len {
                    scopes.pop()
                } else {
                    None
                }
            };
            let Some(scope) = top else { break };
            if shutting_down {
                debug!(scope = scope.id, kind = scope.kind.as_str(), "Releasing open scope");
            } else {
                warn!(
                    scope = scope.id,
                    kind = scope.kind.as_str(),
                    "Releasing scope left open inside an outer scope"
                );
            }
            let how = match scope.kind {
                ScopeKind::Query(_) => Release::Cut,
                _ => Release::Close,
            };
            self.release_native(scope.kind, how);
        }
    }

    fn release_native(&self, kind: ScopeKind, how: Release) {
        match (kind, how) {
            (ScopeKind::Frame(frame), Release::Discard) => self.backend.discard_frame(frame),
            (ScopeKind::Frame(frame), _) => self.backend.close_frame(frame),
            (ScopeKind::Query(query), Release::Cut) => self.backend.cut_query(query),
            (ScopeKind::Query(query), _) => self.backend.close_query(query),
            (ScopeKind::Callback, _) => {}
        }
    }

    /// Write `term` into slot `t`; shared variables stay shared
    pub(crate) fn put_owned(&self, t: RawTerm, term: &OwnedTerm) {
        let mut vars = Vec::new();
        build_owned(self.backend(), t, term, &mut vars);
    }

    /// Copy the term in `t` out of the engine
    pub(crate) fn read_owned(&self, t: RawTerm) -> OwnedTerm {
        let be = self.backend();
        let frame = be.open_frame();
        let term = read_owned(be, t, &mut Vec::new());
        be.close_frame(frame);
        term
    }

    /// Capture an exception term before its query releases it
    pub(crate) fn exception_from(&self, t: RawTerm) -> EngineException {
        let term = self.read_owned(t);
        match self.backend.get_text(t, TextMode::Canonical) {
            Some(message) => EngineException::with_message(term, message),
            None => EngineException::new(term),
        }
    }

    fn shutdown(&self) {
        self.live.set(false);
        self.unwind_to(0, true);
        let leaked = self.continuations.clear();
        if leaked > 0 {
            warn!(count = leaked, "Freed continuation contexts still held by the engine");
        }
        self.foreign.clear();
        self.backend.shutdown();
        self.guard.borrow_mut().take();
        debug!(backend = self.backend.name(), "Runtime shut down");
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        if self.live.get() {
            self.shutdown();
        }
    }
}

enum BuildTask<'t> {
    Place(RawTerm, &'t OwnedTerm),
    Functor(RawTerm, &'t str, RawTerm, usize),
    List(RawTerm, RawTerm, usize),
}

fn build_owned(be: &dyn Backend, t: RawTerm, term: &OwnedTerm, vars: &mut Vec<(usize, RawTerm)>) {
    // Arguments are placed before the compound that holds them is constructed
    let mut tasks = vec![BuildTask::Place(t, term)];
    while let Some(task) = tasks.pop() {
        let (t, term) = match task {
            BuildTask::Place(t, term) => (t, term),
            BuildTask::Functor(t, name, refs, arity) => {
                be.cons_functor(t, name, refs, arity);
                continue;
            }
            BuildTask::List(t, refs, len) => {
                let mut acc = refs.offset(len);
                for i in (0..len).rev() {
                    let cell = be.new_term_refs(1);
                    be.cons_list(cell, refs.offset(i), acc);
                    acc = cell;
                }
                be.put_term(t, acc);
                continue;
            }
        };
        match term {
            OwnedTerm::Variable(n) => match vars.iter().find(|(id, _)| id == n) {
                Some((_, existing)) => be.put_term(t, *existing),
                None => {
                    be.put_variable(t);
                    vars.push((*n, t));
                }
            },
            OwnedTerm::Atom(_) if term.is_nil() => be.put_nil(t),
            OwnedTerm::Atom(name) => be.put_atom(t, name),
            OwnedTerm::Integer(i) => be.put_integer(t, *i),
            OwnedTerm::Float(f) => be.put_float(t, *f),
            OwnedTerm::String(s) => be.put_string(t, s),
            OwnedTerm::Compound { name, args } if name == LIST_FUNCTOR && args.len() == 2 => {
                let mut items = Vec::new();
                let mut cursor = term;
                while let OwnedTerm::Compound { name, args } = cursor {
                    if name != LIST_FUNCTOR || args.len() != 2 {
                        break;
                    }
                    items.push(&args[0]);
                    cursor = &args[1];
                }
                let refs = be.new_term_refs(items.len() + 1);
                tasks.push(BuildTask::List(t, refs, items.len()));
                tasks.push(BuildTask::Place(refs.offset(items.len()), cursor));
                for (i, item) in items.into_iter().enumerate().rev() {
                    tasks.push(BuildTask::Place(refs.offset(i), item));
                }
            }
            OwnedTerm::Compound { name, args } => {
                let refs = be.new_term_refs(args.len());
                tasks.push(BuildTask::Functor(t, name, refs, args.len()));
                for (i, arg) in args.iter().enumerate().rev() {
                    tasks.push(BuildTask::Place(refs.offset(i), arg));
                }
            }
        }
    }
}

enum ReadTask {
    Visit(RawTerm),
    Functor(String, usize),
    List(usize),
}

fn read_owned(be: &dyn Backend, t: RawTerm, vars: &mut Vec<RawTerm>) -> OwnedTerm {
    // Sub-terms are visited left to right so variables keep first-occurrence numbering
    let mut tasks = vec![ReadTask::Visit(t)];
    let mut done: Vec<OwnedTerm> = Vec::new();
    while let Some(task) = tasks.pop() {
        let t = match task {
            ReadTask::Visit(t) => t,
            ReadTask::Functor(name, arity) => {
                let args = done.split_off(done.len().saturating_sub(arity));
                done.push(OwnedTerm::compound(name, args));
                continue;
            }
            ReadTask::List(len) => {
                let tail = done.pop().unwrap_or_else(OwnedTerm::nil);
                let items = done.split_off(done.len().saturating_sub(len));
                done.push(OwnedTerm::partial_list(items, tail));
                continue;
            }
        };
        let term = match be.kind(t) {
            TermKind::Variable => {
                let index = vars
                    .iter()
                    .position(|v| be.compare(*v, t).is_eq())
                    .unwrap_or_else(|| {
                        vars.push(t);
                        vars.len() - 1
                    });
                OwnedTerm::Variable(index)
            }
            TermKind::Nil => OwnedTerm::nil(),
            TermKind::Atom => OwnedTerm::Atom(be.get_text(t, TextMode::Plain).unwrap_or_default()),
            TermKind::Integer => match be.get_integer(t) {
                Some(i) => OwnedTerm::Integer(i),
                // Unbounded integers do not fit i64; keep their digits
                None => OwnedTerm::Atom(be.get_text(t, TextMode::Plain).unwrap_or_default()),
            },
            TermKind::Float => OwnedTerm::Float(be.get_float(t).unwrap_or(f64::NAN)),
            TermKind::String => OwnedTerm::String(be.get_text(t, TextMode::Plain).unwrap_or_default()),
            TermKind::ListPair => {
                let mut items = Vec::new();
                let mut cursor = t;
                while be.kind(cursor) == TermKind::ListPair {
                    let cell = be.new_term_refs(2);
                    be.get_arg(1, cursor, cell);
                    be.get_arg(2, cursor, cell.offset(1));
                    items.push(cell);
                    cursor = cell.offset(1);
                }
                tasks.push(ReadTask::List(items.len()));
                tasks.push(ReadTask::Visit(cursor));
                tasks.extend(items.into_iter().rev().map(ReadTask::Visit));
                continue;
            }
            TermKind::Compound => {
                let Some((name, arity)) = be.get_name_arity(t) else {
                    done.push(OwnedTerm::Variable(vars.len()));
                    continue;
                };
                let refs = be.new_term_refs(arity);
                for i in 0..arity {
                    be.get_arg(i + 1, t, refs.offset(i));
                }
                tasks.push(ReadTask::Functor(name, arity));
                tasks.extend((0..arity).rev().map(|i| ReadTask::Visit(refs.offset(i))));
                continue;
            }
        };
        done.push(term);
    }
    done.pop().unwrap_or_else(OwnedTerm::nil)
}

/// The embedded engine.
///
/// Cloning is cheap and yields another handle to the same engine.
///
/// # Example
///
/// ```
/// use prolog_bridge::{EngineOptions, Runtime};
///
/// let rt = Runtime::init(EngineOptions::default())?;
/// rt.consult_str("parent(tom, bob). parent(bob, ann).")?;
/// let solutions = rt.solve_all("parent(X, Y)")?;
/// assert_eq!(solutions.len(), 2);
/// assert_eq!(solutions[1].to_json()?["X"], "bob");
/// # Ok::<(), prolog_bridge::BridgeError>(())
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Start the engine selected by `options`
    pub fn init(options: EngineOptions) -> BridgeResult<Self> {
        options.validate()?;
        let guard = EngineGuard::claim()?;
        let backend: Box<dyn Backend> = match options.backend {
            BackendKind::Memory => start_memory(&options)?,
            BackendKind::Swipl => start_swipl(&options)?,
        };
        Ok(Self::assemble(backend, options, guard))
    }

    /// Start with default options (`user` module)
    pub fn new() -> BridgeResult<Self> {
        Self::init(EngineOptions::default())
    }

    /// Run on an engine constructed by the caller
    pub fn with_backend<B: Backend + 'static>(backend: B, options: EngineOptions) -> BridgeResult<Self> {
        options.validate()?;
        let guard = EngineGuard::claim()?;
        Ok(Self::assemble(Box::new(backend), options, guard))
    }

    fn assemble(backend: Box<dyn Backend>, options: EngineOptions, guard: EngineGuard) -> Self {
        debug!(
            backend = backend.name(),
            module = %options.default_module,
            "Runtime initialized"
        );
        Self {
            inner: Rc::new(RuntimeInner {
                backend,
                options,
                scopes: RefCell::new(Vec::new()),
                next_scope: Cell::new(ROOT_SCOPE + 1),
                live: Cell::new(true),
                foreign: ForeignTable::default(),
                continuations: ContinuationTable::default(),
                guard: RefCell::new(Some(guard)),
            }),
        }
    }

    /// Whether some runtime currently owns the engine
    pub fn is_engine_running() -> bool {
        ENGINE_OWNER.lock().is_some()
    }

    /// Release every open scope, shut the engine down and free the process slot.
    ///
    /// Handles that outlive the runtime report [`BridgeError::ResourceMisuse`].
    pub fn shutdown(&self) -> BridgeResult<()> {
        self.inner.check_live()?;
        self.inner.shutdown();
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    /// Module used when none is given
    pub fn default_module(&self) -> &str {
        &self.inner.options.default_module
    }

    /// Number of frames, queries and foreign calls currently open
    pub fn open_scopes(&self) -> usize {
        self.inner.scopes.borrow().len()
    }

    pub(crate) fn inner(&self) -> &RuntimeInner {
        &self.inner
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.inner.backend()
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Rc<RuntimeInner>) -> Self {
        Self { inner }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("backend", &self.backend_name())
            .field("live", &self.is_live())
            .field("open_scopes", &self.open_scopes())
            .finish()
    }
}

#[cfg(feature = "memory")]
fn start_memory(options: &EngineOptions) -> BridgeResult<Box<dyn Backend>> {
    Ok(Box::new(crate::prolog::MemoryBackend::with_library(options.load_library)))
}

#[cfg(not(feature = "memory"))]
fn start_memory(_options: &EngineOptions) -> BridgeResult<Box<dyn Backend>> {
    Err(BridgeError::InitializationFailure(
        "the memory engine is not compiled in; rebuild with the `memory` feature".to_string(),
    ))
}

#[cfg(feature = "swipl")]
fn start_swipl(options: &EngineOptions) -> BridgeResult<Box<dyn Backend>> {
    let backend = crate::prolog::SwiBackend::new(&options.engine_args()).map_err(|e| {
        BridgeError::InitializationFailure(format!("{}\n{}", e, install_instructions()))
    })?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "swipl"))]
fn start_swipl(_options: &EngineOptions) -> BridgeResult<Box<dyn Backend>> {
    Err(BridgeError::InitializationFailure(
        "SWI-Prolog support is not compiled in; rebuild with the `swipl` feature".to_string(),
    ))
}

/// Platform-specific hint shown when libswipl cannot be started
#[cfg(feature = "swipl")]
pub fn install_instructions() -> String {
    #[cfg(target_os = "linux")]
    {
        "SWI-Prolog is required but could not be started.\n\
         Install on Ubuntu/Debian:\n  \
           sudo apt install swi-prolog-nox\n\n\
         Install on Fedora:\n  \
           sudo dnf install pl\n\n\
         Set SWI_HOME_DIR if it is installed in a non-standard location."
            .to_string()
    }

    #[cfg(target_os = "macos")]
    {
        "SWI-Prolog is required but could not be started.\n\
         Install with Homebrew:\n  \
           brew install swi-prolog"
            .to_string()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        "SWI-Prolog is required but could not be started.\n\
         Download from: https://www.swi-prolog.org/download/stable"
            .to_string()
    }
}

/// Serializes runtimes across the unit tests of this crate
#[cfg(all(test, feature = "memory"))]
pub(crate) mod testing {
    use super::*;
    use parking_lot::MutexGuard;
    use std::ops::Deref;

    static LOCK: Mutex<()> = parking_lot::const_mutex(());

    pub(crate) struct TestRuntime {
        // Declared first so the runtime is dropped before the lock is released
        rt: Runtime,
        _lock: MutexGuard<'static, ()>,
    }

    impl Deref for TestRuntime {
        type Target = Runtime;

        fn deref(&self) -> &Runtime {
            &self.rt
        }
    }

    pub(crate) fn runtime() -> TestRuntime {
        let lock = LOCK.lock();
        let rt = Runtime::new().unwrap();
        TestRuntime { rt, _lock: lock }
    }
}
