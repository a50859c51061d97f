//! Frames
//!
//! A frame is a checkpoint in the term arena. Handles created while it is the
//! innermost scope belong to it and become invalid when it closes. Closing
//! keeps the bindings made inside the frame; [`Frame::rewind`] and
//! [`Frame::discard`] undo them.

use std::cell::Cell;

use tracing::debug;

use super::runtime::{Release, Runtime, ScopeId, ScopeKind};
use crate::error::{BridgeError, BridgeResult};
use crate::prolog::RawFrame;

/// An open frame; closed on drop
pub struct Frame {
    rt: Runtime,
    raw: RawFrame,
    scope: Cell<ScopeId>,
    open: Cell<bool>,
}

impl Frame {
    pub fn is_open(&self) -> bool {
        self.open.get() && self.rt.inner().is_scope_live(self.scope.get())
    }

    fn ensure_open(&self) -> BridgeResult<()> {
        if !self.open.get() {
            return Err(BridgeError::misuse("frame already closed"));
        }
        if !self.rt.inner().is_scope_live(self.scope.get()) {
            self.open.set(false);
            return Err(BridgeError::misuse("frame was released together with an enclosing scope"));
        }
        Ok(())
    }

    /// Undo every binding made since the frame opened. Handles created inside
    /// the frame are invalidated; the frame itself stays open.
    pub fn rewind(&self) -> BridgeResult<()> {
        self.ensure_open()?;
        let scope = self.rt.inner().rewind_scope(self.scope.get())?;
        self.scope.set(scope);
        Ok(())
    }

    /// Close the frame, keeping bindings
    pub fn close(self) -> BridgeResult<()> {
        self.finish(Release::Close)
    }

    /// Undo the frame's bindings, then close it
    pub fn discard(self) -> BridgeResult<()> {
        self.finish(Release::Discard)
    }

    fn finish(&self, how: Release) -> BridgeResult<()> {
        self.ensure_open()?;
        self.open.set(false);
        self.rt.inner().release_scope(self.scope.get(), how)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if self.open.get() && self.rt.inner().is_scope_live(self.scope.get()) {
            self.open.set(false);
            if let Err(e) = self.rt.inner().release_scope(self.scope.get(), Release::Close) {
                debug!(error = %e, frame = self.raw.0, "Frame not released on drop");
            }
        }
    }
}

impl Runtime {
    /// Open a frame; it becomes the innermost scope
    pub fn open_frame(&self) -> BridgeResult<Frame> {
        self.inner().check_live()?;
        let raw = self.backend().open_frame();
        let scope = self.inner().push_scope(ScopeKind::Frame(raw));
        Ok(Frame {
            rt: self.clone(),
            raw,
            scope: Cell::new(scope),
            open: Cell::new(true),
        })
    }

    /// Run `f` inside a fresh frame that is closed afterwards
    pub fn with_frame<R>(&self, f: impl FnOnce(&Frame) -> BridgeResult<R>) -> BridgeResult<R> {
        let frame = self.open_frame()?;
        let result = f(&frame);
        frame.close()?;
        result
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::engine::runtime::testing;

    #[test]
    fn test_close_invalidates_handles() {
        let rt = testing::runtime();
        let outer = rt.atom("outer").unwrap();
        let frame = rt.open_frame().unwrap();
        let inner: Vec<_> = (0..5).map(|i| rt.integer(i).unwrap()).collect();
        assert!(inner.iter().all(|t| t.is_valid()));
        frame.close().unwrap();

        for t in &inner {
            assert!(matches!(t.as_i64(), Err(BridgeError::ResourceMisuse(_))));
        }
        assert_eq!(outer.text().unwrap(), "outer");
    }

    #[test]
    fn test_close_keeps_bindings_discard_undoes_them() {
        let rt = testing::runtime();
        let x = rt.new_variable().unwrap();
        let frame = rt.open_frame().unwrap();
        assert!(x.unify(&rt.integer(1).unwrap()).unwrap());
        frame.close().unwrap();
        assert_eq!(x.as_i64().unwrap(), 1);

        let y = rt.new_variable().unwrap();
        let frame = rt.open_frame().unwrap();
        assert!(y.unify(&rt.integer(2).unwrap()).unwrap());
        frame.discard().unwrap();
        assert!(y.is_variable().unwrap());
    }

    #[test]
    fn test_rewind_undoes_and_stays_open() {
        let rt = testing::runtime();
        let x = rt.new_variable().unwrap();
        let frame = rt.open_frame().unwrap();
        let value = rt.atom("a").unwrap();
        assert!(x.unify(&value).unwrap());
        frame.rewind().unwrap();

        assert!(x.is_variable().unwrap());
        assert!(!value.is_valid());
        assert!(frame.is_open());

        // Handles created after the rewind belong to the frame again
        let again = rt.atom("b").unwrap();
        assert!(x.unify(&again).unwrap());
        frame.discard().unwrap();
        assert!(x.is_variable().unwrap());
    }

    #[test]
    fn test_nested_frames_close_in_order() {
        let rt = testing::runtime();
        let outer = rt.open_frame().unwrap();
        let inner = rt.open_frame().unwrap();
        let t = rt.integer(1).unwrap();
        assert_eq!(rt.open_scopes(), 2);

        // Closing the outer frame first releases the inner one too
        outer.close().unwrap();
        assert_eq!(rt.open_scopes(), 0);
        assert!(!t.is_valid());
        assert!(matches!(inner.close(), Err(BridgeError::ResourceMisuse(_))));
    }

    #[test]
    fn test_with_frame_and_drop() {
        let rt = testing::runtime();
        let leaked = rt
            .with_frame(|_| rt.atom("temporary"))
            .unwrap();
        assert!(!leaked.is_valid());

        {
            let _frame = rt.open_frame().unwrap();
            assert_eq!(rt.open_scopes(), 1);
        }
        assert_eq!(rt.open_scopes(), 0);
    }
}
