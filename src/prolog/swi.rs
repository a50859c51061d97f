//! SWI-Prolog backend via the `swipl` crate's foreign language interface
//!
//! Requires SWI-Prolog 9.x with `libswipl` on the library path; `build.rs`
//! adds the rpath when the `swipl` feature is enabled.
//!
//! The engine is initialised once per process and never torn down:
//! `PL_cleanup` cannot be followed by a second `PL_initialise`. A later
//! runtime on another thread attaches a fresh engine to that thread.
//!
//! Foreign predicates all go through one variadic trampoline that finds the
//! Rust handler by predicate handle.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CString};
use std::ptr;

use swipl::fli;
use tracing::{debug, info, warn};

use super::{
    Backend, ForeignControl, ForeignHandler, ForeignOutcome, RawFrame, RawPredicate, RawQuery, RawRecord,
    RawTerm, Step, TermKind, TextMode,
};

/// Status and type codes from `SWI-Prolog.h`, normalised to the `c_int` the
/// interface functions return. Bindgen types the defines as `u32` or `i32`
/// depending on sign.
mod code {
    use std::ffi::c_int;

    use swipl::fli;

    pub const VARIABLE: c_int = fli::PL_VARIABLE as c_int;
    pub const ATOM: c_int = fli::PL_ATOM as c_int;
    pub const INTEGER: c_int = fli::PL_INTEGER as c_int;
    pub const RATIONAL: c_int = fli::PL_RATIONAL as c_int;
    pub const FLOAT: c_int = fli::PL_FLOAT as c_int;
    pub const STRING: c_int = fli::PL_STRING as c_int;
    pub const TERM: c_int = fli::PL_TERM as c_int;
    pub const NIL: c_int = fli::PL_NIL as c_int;
    pub const LIST_PAIR: c_int = fli::PL_LIST_PAIR as c_int;

    pub const S_EXCEPTION: c_int = fli::PL_S_EXCEPTION as c_int;
    pub const S_FALSE: c_int = fli::PL_S_FALSE as c_int;
    pub const S_LAST: c_int = fli::PL_S_LAST as c_int;

    pub const FIRST_CALL: c_int = fli::PL_FIRST_CALL as c_int;
    pub const PRUNED: c_int = fli::PL_PRUNED as c_int;
    pub const REDO: c_int = fli::PL_REDO as c_int;
}

/// Foreign predicate registered with `PL_FA_VARARGS`
type VarargsForeign = unsafe extern "C" fn(fli::term_t, c_int, fli::control_t) -> fli::foreign_t;

extern "C" {
    /// `PL_register_foreign_in_module` with the varargs calling convention
    /// spelled out. The header types the function argument as a generic
    /// function pointer; the engine calls it back with this signature when
    /// `PL_FA_VARARGS` is set.
    #[link_name = "PL_register_foreign_in_module"]
    fn register_varargs_foreign(
        module: *const c_char,
        name: *const c_char,
        arity: c_int,
        function: VarargsForeign,
        flags: c_int,
    ) -> c_int;
}

thread_local! {
    /// Foreign handlers keyed by predicate handle
    static HANDLERS: RefCell<HashMap<usize, ForeignHandler>> = RefCell::new(HashMap::new());
}

/// Backend driving the SWI-Prolog engine attached to the current thread
pub struct SwiBackend {
    _private: (),
}

impl SwiBackend {
    /// Initialise SWI-Prolog with the given command line, or attach to the
    /// already initialised engine.
    pub fn new(argv: &[String]) -> Result<Self, String> {
        // SAFETY: runtimes are confined to one thread; the argv strings are
        // leaked because the engine keeps pointers into them.
        unsafe {
            if fli::PL_is_initialised(ptr::null_mut(), ptr::null_mut()) != 0 {
                if fli::PL_thread_self() == -1 && fli::PL_thread_attach_engine(ptr::null_mut()) < 0 {
                    return Err("could not attach a SWI-Prolog engine to this thread".to_string());
                }
                debug!("SWI-Prolog already initialised, reusing engine");
                return Ok(Self { _private: () });
            }

            let owned: Vec<CString> = argv
                .iter()
                .map(|arg| CString::new(arg.as_str()))
                .collect::<Result<_, _>>()
                .map_err(|e| format!("invalid engine argument: {}", e))?;
            // SWI keeps pointers into argv for the life of the process
            let mut raw: Vec<*mut c_char> = owned.into_iter().map(CString::into_raw).collect();
            raw.push(ptr::null_mut());
            let argc = (raw.len() - 1) as c_int;
            let raw = Box::leak(raw.into_boxed_slice());

            if fli::PL_initialise(argc, raw.as_mut_ptr()) == 0 {
                return Err("PL_initialise failed".to_string());
            }
        }
        info!(args = ?argv, "SWI-Prolog initialised");
        Ok(Self { _private: () })
    }

    fn term(t: RawTerm) -> fli::term_t {
        t.0 as fli::term_t
    }

    fn new_atom(text: &str) -> fli::atom_t {
        unsafe { fli::PL_new_atom_nchars(text.len() as _, text.as_ptr() as *const c_char) }
    }

    fn module(name: &str) -> fli::module_t {
        unsafe {
            let atom = Self::new_atom(name);
            let module = fli::PL_new_module(atom);
            fli::PL_unregister_atom(atom);
            module
        }
    }

    fn chars(t: fli::term_t, flags: u32) -> Option<String> {
        let mut len: usize = 0;
        let mut text: *mut c_char = ptr::null_mut();
        // SAFETY: on success the engine stores `len` bytes at `text` on its
        // buffer stack, valid until the next engine call.
        unsafe {
            if fli::PL_get_nchars(t, &mut len as *mut usize as *mut _, &mut text, (flags | fli::BUF_STACK as u32 | fli::REP_UTF8 as u32) as _) == 0 {
                return None;
            }
            let bytes = std::slice::from_raw_parts(text as *const u8, len);
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    fn put_text(t: RawTerm, kind: c_int, text: &str) {
        // SAFETY: the engine copies `text.len()` bytes; no NUL terminator needed.
        unsafe {
            fli::PL_put_chars(
                Self::term(t),
                (kind as u32 | fli::REP_UTF8 as u32) as _,
                text.len() as _,
                text.as_ptr() as *const c_char,
            );
        }
    }
}

// SAFETY (all handle calls below): `RawTerm`, `RawFrame`, `RawQuery` and
// `RawRecord` values only come from this backend on this thread, and the
// runtime's scope stack closes frames and queries in LIFO order.
impl Backend for SwiBackend {
    fn name(&self) -> &'static str {
        "swipl"
    }

    fn new_term_refs(&self, count: usize) -> RawTerm {
        RawTerm(unsafe { fli::PL_new_term_refs(count as _) } as usize)
    }

    fn put_variable(&self, t: RawTerm) {
        unsafe {
            fli::PL_put_variable(Self::term(t));
        }
    }

    fn put_atom(&self, t: RawTerm, name: &str) {
        Self::put_text(t, code::ATOM, name);
    }

    fn put_nil(&self, t: RawTerm) {
        unsafe {
            fli::PL_put_nil(Self::term(t));
        }
    }

    fn put_integer(&self, t: RawTerm, value: i64) {
        unsafe {
            fli::PL_put_int64(Self::term(t), value);
        }
    }

    fn put_float(&self, t: RawTerm, value: f64) {
        unsafe {
            fli::PL_put_float(Self::term(t), value);
        }
    }

    fn put_string(&self, t: RawTerm, text: &str) {
        Self::put_text(t, code::STRING, text);
    }

    fn put_term(&self, dst: RawTerm, src: RawTerm) {
        unsafe {
            fli::PL_put_term(Self::term(dst), Self::term(src));
        }
    }

    fn cons_functor(&self, t: RawTerm, name: &str, args: RawTerm, arity: usize) {
        unsafe {
            let atom = Self::new_atom(name);
            if arity == 0 {
                fli::PL_put_atom(Self::term(t), atom);
            } else {
                let functor = fli::PL_new_functor_sz(atom, arity as _);
                fli::PL_cons_functor_v(Self::term(t), functor, Self::term(args));
            }
            fli::PL_unregister_atom(atom);
        }
    }

    fn cons_list(&self, t: RawTerm, head: RawTerm, tail: RawTerm) {
        unsafe {
            fli::PL_cons_list(Self::term(t), Self::term(head), Self::term(tail));
        }
    }

    fn put_parsed(&self, t: RawTerm, text: &str) -> bool {
        unsafe {
            fli::PL_put_term_from_chars(
                Self::term(t),
                fli::REP_UTF8 as _,
                text.len() as _,
                text.as_ptr() as *const c_char,
            ) != 0
        }
    }

    fn kind(&self, t: RawTerm) -> TermKind {
        match unsafe { fli::PL_term_type(Self::term(t)) } {
            code::VARIABLE => TermKind::Variable,
            code::ATOM => TermKind::Atom,
            code::NIL => TermKind::Nil,
            code::INTEGER | code::RATIONAL => TermKind::Integer,
            code::FLOAT => TermKind::Float,
            code::STRING => TermKind::String,
            code::LIST_PAIR => TermKind::ListPair,
            code::TERM => TermKind::Compound,
            // blobs and dicts surface as atoms and compounds respectively
            other if other > code::LIST_PAIR => TermKind::Compound,
            _ => TermKind::Atom,
        }
    }

    fn get_integer(&self, t: RawTerm) -> Option<i64> {
        let mut value: i64 = 0;
        let ok = unsafe { fli::PL_get_int64(Self::term(t), &mut value) };
        (ok != 0 && self.kind(t) == TermKind::Integer).then_some(value)
    }

    fn get_float(&self, t: RawTerm) -> Option<f64> {
        if self.kind(t) != TermKind::Float {
            return None;
        }
        let mut value: f64 = 0.0;
        let ok = unsafe { fli::PL_get_float(Self::term(t), &mut value) };
        (ok != 0).then_some(value)
    }

    fn get_text(&self, t: RawTerm, mode: TextMode) -> Option<String> {
        match mode {
            TextMode::Canonical => Self::chars(Self::term(t), (fli::CVT_WRITEQ | fli::CVT_VARIABLE) as u32),
            TextMode::Plain => Self::chars(
                Self::term(t),
                (fli::CVT_ATOM | fli::CVT_STRING | fli::CVT_INTEGER | fli::CVT_FLOAT) as u32,
            ),
        }
    }

    fn get_name_arity(&self, t: RawTerm) -> Option<(String, usize)> {
        let mut atom: fli::atom_t = 0;
        let mut arity: usize = 0;
        unsafe {
            if fli::PL_get_name_arity_sz(Self::term(t), &mut atom, &mut arity as *mut usize as *mut _) == 0 {
                return None;
            }
            let scratch = fli::PL_new_term_ref();
            fli::PL_put_atom(scratch, atom);
            let name = Self::chars(scratch, fli::CVT_ATOM as u32)?;
            Some((name, arity))
        }
    }

    fn get_arg(&self, index: usize, t: RawTerm, out: RawTerm) -> bool {
        unsafe { fli::PL_get_arg_sz(index as _, Self::term(t), Self::term(out)) != 0 }
    }

    fn unify(&self, a: RawTerm, b: RawTerm) -> bool {
        unsafe { fli::PL_unify(Self::term(a), Self::term(b)) != 0 }
    }

    fn compare(&self, a: RawTerm, b: RawTerm) -> Ordering {
        unsafe { fli::PL_compare(Self::term(a), Self::term(b)) }.cmp(&0)
    }

    fn open_frame(&self) -> RawFrame {
        RawFrame(unsafe { fli::PL_open_foreign_frame() } as usize)
    }

    fn close_frame(&self, frame: RawFrame) {
        unsafe { fli::PL_close_foreign_frame(frame.0 as _) }
    }

    fn rewind_frame(&self, frame: RawFrame) {
        unsafe { fli::PL_rewind_foreign_frame(frame.0 as _) }
    }

    fn discard_frame(&self, frame: RawFrame) {
        unsafe { fli::PL_discard_foreign_frame(frame.0 as _) }
    }

    fn predicate(&self, module: &str, name: &str, arity: usize) -> RawPredicate {
        unsafe {
            let atom = Self::new_atom(name);
            let functor = fli::PL_new_functor_sz(atom, arity as _);
            fli::PL_unregister_atom(atom);
            RawPredicate(fli::PL_pred(functor, Self::module(module)) as usize)
        }
    }

    fn open_query(&self, module: &str, predicate: RawPredicate, args: RawTerm) -> RawQuery {
        let flags = (fli::PL_Q_NODEBUG | fli::PL_Q_CATCH_EXCEPTION | fli::PL_Q_EXT_STATUS) as c_int;
        let qid = unsafe { fli::PL_open_query(Self::module(module), flags, predicate.0 as _, Self::term(args)) };
        RawQuery(qid as usize)
    }

    fn next_solution(&self, query: RawQuery) -> Step {
        match unsafe { fli::PL_next_solution(query.0 as _) } {
            code::S_EXCEPTION => Step::Exception,
            code::S_FALSE => Step::Failed,
            code::S_LAST => Step::Last,
            _ => Step::Solution,
        }
    }

    fn exception(&self, query: RawQuery) -> Option<RawTerm> {
        let t = unsafe { fli::PL_exception(query.0 as _) };
        (t != 0).then(|| RawTerm(t as usize))
    }

    fn cut_query(&self, query: RawQuery) {
        unsafe {
            fli::PL_cut_query(query.0 as _);
        }
    }

    fn close_query(&self, query: RawQuery) {
        unsafe {
            fli::PL_close_query(query.0 as _);
        }
    }

    fn record(&self, t: RawTerm) -> RawRecord {
        RawRecord(unsafe { fli::PL_record(Self::term(t)) } as usize)
    }

    fn recorded(&self, record: RawRecord, t: RawTerm) {
        unsafe {
            fli::PL_recorded(record.0 as _, Self::term(t));
        }
    }

    fn erase(&self, record: RawRecord) {
        unsafe { fli::PL_erase(record.0 as _) }
    }

    fn register_foreign(
        &self,
        module: &str,
        name: &str,
        arity: usize,
        nondeterministic: bool,
        handler: ForeignHandler,
    ) -> Result<(), String> {
        let c_module = CString::new(module).map_err(|e| e.to_string())?;
        let c_name = CString::new(name).map_err(|e| e.to_string())?;
        let mut flags = fli::PL_FA_VARARGS as c_int;
        if nondeterministic {
            flags |= fli::PL_FA_NONDETERMINISTIC as c_int;
        }

        let predicate = self.predicate(module, name, arity);
        HANDLERS.with(|handlers| handlers.borrow_mut().insert(predicate.0, handler));

        // SAFETY: both strings outlive the call and the engine copies them;
        // `trampoline` has the varargs signature selected by `PL_FA_VARARGS`.
        let ok = unsafe {
            register_varargs_foreign(c_module.as_ptr(), c_name.as_ptr(), arity as c_int, trampoline, flags)
        };
        if ok == 0 {
            HANDLERS.with(|handlers| handlers.borrow_mut().remove(&predicate.0));
            return Err(format!("No permission to redefine `{}:{}/{}`", module, name, arity));
        }
        Ok(())
    }

    fn raise_exception(&self, t: RawTerm) {
        unsafe {
            fli::PL_raise_exception(Self::term(t));
        }
    }

    fn shutdown(&self) {
        HANDLERS.with(|handlers| handlers.borrow_mut().clear());
        debug!("SWI-Prolog handlers released; engine stays initialised");
    }
}

/// # Safety
///
/// Only called by the engine, with the argument vector and control handle of
/// a predicate registered through `register_foreign`.
unsafe extern "C" fn trampoline(t0: fli::term_t, arity: c_int, context: fli::control_t) -> fli::foreign_t {
    let predicate = fli::PL_foreign_context_predicate(context) as usize;
    let handler = HANDLERS.with(|handlers| handlers.borrow().get(&predicate).cloned());
    let Some(handler) = handler else {
        warn!(predicate, "Foreign call without a registered handler");
        return 0;
    };

    let control = match fli::PL_foreign_control(context) {
        code::FIRST_CALL => ForeignControl::FirstCall,
        code::REDO => ForeignControl::Redo(fli::PL_foreign_context_address(context) as usize),
        code::PRUNED => ForeignControl::Pruned(fli::PL_foreign_context_address(context) as usize),
        other => {
            warn!(control = other, "Unknown foreign control code");
            return 0;
        }
    };

    match handler(RawTerm(t0 as usize), arity.max(0) as usize, control) {
        ForeignOutcome::Succeed => 1,
        ForeignOutcome::Fail | ForeignOutcome::Raised => 0,
        ForeignOutcome::Retry(token) => fli::_PL_retry_address(token as *mut c_void),
    }
}
