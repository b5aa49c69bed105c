//! Scoped capture of the diagnostics emitted by the IR toolkit.
//!
//! A [`CaptureScope`] installs a handler on the current thread's diagnostic
//! stack when it begins, and removes it again when it ends or is dropped. While
//! it is the innermost scope it receives every diagnostic emitted on the
//! thread, and nothing is written to standard error unless it was asked to echo
//! to a sink.
//!
//! ```
//! use graft_importer::diagnostics::CaptureScope;
//! use graft_ir::diagnostic::emit_warning;
//!
//! let outer = CaptureScope::begin();
//! let inner = CaptureScope::begin();
//! emit_warning("only the inner scope sees this", None);
//! assert_eq!(inner.end().len(), 1);
//! assert!(outer.end().is_empty());
//! ```

use std::marker::PhantomData;

use graft_ir::diagnostic::{self, Diagnostic, EchoSink, HandlerId};

/// A guard representing an open diagnostic capture scope.
///
/// Scopes must be ended in the reverse of the order in which they began.
/// Ending a scope that is not the innermost open one on its thread is a
/// programmer error and panics. Dropping a scope without ending it discards the
/// diagnostics it captured.
///
/// The guard is tied to the thread on which it began, and is hence neither
/// [`Send`] nor [`Sync`].
#[derive(Debug)]
#[must_use = "diagnostics are only captured while the scope is alive"]
pub struct CaptureScope {
    id:      Option<HandlerId>,
    _thread: PhantomData<*const ()>,
}

impl CaptureScope {
    /// Begins capturing diagnostics on the current thread.
    pub fn begin() -> Self {
        Self::install(None)
    }

    /// Begins capturing diagnostics on the current thread, additionally
    /// writing each one to `sink` as a line of text as it arrives.
    pub fn begin_echoing(sink: EchoSink) -> Self {
        Self::install(Some(sink))
    }

    /// Begins capturing, echoing to `sink` if one is provided.
    pub fn begin_with(sink: Option<EchoSink>) -> Self {
        Self::install(sink)
    }

    fn install(sink: Option<EchoSink>) -> Self {
        Self {
            id:      Some(diagnostic::push_handler(sink)),
            _thread: PhantomData,
        }
    }

    /// Ends the scope, returning the diagnostics it captured in the order they
    /// were emitted.
    ///
    /// # Panics
    ///
    /// Panics if this is not the innermost open scope on the current thread.
    #[must_use]
    pub fn end(mut self) -> Vec<Diagnostic> {
        match self.id.take() {
            Some(id) => diagnostic::pop_handler(id),
            None => Vec::new(),
        }
    }
}

impl Drop for CaptureScope {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            diagnostic::discard_handler(id);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use graft_ir::diagnostic::{emit_error, emit_note, handler_depth, EchoSink, Severity};

    use crate::diagnostics::CaptureScope;

    #[test]
    fn nested_scopes_see_only_their_own_diagnostics() {
        let outer = CaptureScope::begin();
        let inner = CaptureScope::begin();
        emit_error("inner problem", None);
        let inner_diags = inner.end();
        let outer_diags = outer.end();

        assert_eq!(inner_diags.len(), 1);
        assert_eq!(inner_diags[0].message, "inner problem");
        assert_eq!(inner_diags[0].severity, Severity::Error);
        assert!(outer_diags.is_empty());
    }

    #[test]
    fn outer_scope_resumes_after_inner_ends() {
        let outer = CaptureScope::begin();
        emit_note("before", None);
        let inner = CaptureScope::begin();
        emit_note("during", None);
        let _ = inner.end();
        emit_note("after", None);

        let messages: Vec<_> = outer.end().into_iter().map(|d| d.message).collect();
        assert_eq!(messages, vec!["before", "after"]);
    }

    #[test]
    fn dropping_a_scope_uninstalls_it() {
        let depth = handler_depth();
        {
            let _scope = CaptureScope::begin();
            emit_note("discarded", None);
            assert_eq!(handler_depth(), depth + 1);
        }
        assert_eq!(handler_depth(), depth);
    }

    #[test]
    fn echoing_scopes_write_lines() {
        let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink: EchoSink = buffer.clone();
        let scope = CaptureScope::begin_echoing(sink);
        emit_error("one", None);
        emit_note("two", None);
        let captured = scope.end();

        assert_eq!(captured.len(), 2);
        let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "error: one\nnote: two\n");
    }

    #[test]
    #[should_panic(expected = "innermost handler")]
    fn ending_out_of_order_panics() {
        let outer = CaptureScope::begin();
        let _inner = CaptureScope::begin();
        let _ = outer.end();
    }
}
