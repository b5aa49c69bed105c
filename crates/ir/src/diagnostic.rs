//! The diagnostic engine of the IR toolkit.
//!
//! Anything in the toolkit (or in a tool built on it) that wants to report an
//! error, warning or note does so by calling [`emit`]. Diagnostics are routed
//! to the innermost _handler_ installed on the current thread, and only to that
//! handler. When no handler is installed they are rendered to the process'
//! standard error stream.
//!
//! Handlers form a strict per-thread stack. They are installed with
//! [`push_handler`] and removed with [`pop_handler`], which hands back
//! everything the handler received. Since the stack is thread-local, imports
//! running concurrently on different threads never observe each other's
//! diagnostics.
//!
//! Most callers should not use the handler functions directly, but should
//! instead use a scoped guard built on top of them that guarantees the handler
//! is removed again.

use std::{
    cell::{Cell, RefCell},
    fmt::{Display, Formatter},
    io::Write,
    sync::{Arc, Mutex, PoisonError},
};

use derivative::Derivative;
use itertools::Itertools;

/// A shared, line-oriented text stream to which diagnostics can be echoed.
pub type EchoSink = Arc<Mutex<dyn Write + Send>>;

/// How serious a diagnostic is.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Note => "note",
        };
        write!(f, "{name}")
    }
}

/// One step into a traced graph: the index of a node and, if the step
/// continues into one of that node's nested graphs, the index of that graph.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NodeStep {
    pub node:   usize,
    pub region: Option<usize>,
}

/// The position of a node in a function's graph, including the nesting
/// through control-flow nodes, rendered as `2[1]/0` for node 0 in the second
/// block of node 2.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct NodePath {
    pub steps: Vec<NodeStep>,
}

impl NodePath {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the path extended by the step `node[region]`.
    #[must_use]
    pub fn child(&self, node: usize, region: Option<usize>) -> Self {
        let mut steps = self.steps.clone();
        steps.push(NodeStep { node, region });
        Self { steps }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Display for NodePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let rendered = self
            .steps
            .iter()
            .map(|s| match s.region {
                Some(r) => format!("{}[{r}]", s.node),
                None => s.node.to_string(),
            })
            .join("/");
        write!(f, "{rendered}")
    }
}

/// Where a diagnostic originated.
///
/// Every part is optional, as diagnostics may be raised at any granularity
/// from a whole function down to a single value.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Location {
    /// The function being processed, if any.
    pub function: Option<String>,

    /// The global being processed, if any.
    pub global: Option<String>,

    /// The position of the node being processed within that function.
    pub path: NodePath,

    /// The name of the operation concerned, in whatever vocabulary is most
    /// meaningful at the point of reporting.
    pub operation: Option<String>,

    /// The value concerned, if any.
    pub value: Option<String>,
}

impl Location {
    /// Creates a location referring to the whole of `function`.
    #[must_use]
    pub fn in_function(function: &str) -> Self {
        Self {
            function: Some(function.to_string()),
            ..Self::default()
        }
    }

    /// Creates a location referring to the whole of the global `symbol`.
    #[must_use]
    pub fn in_global(symbol: &str) -> Self {
        Self {
            global: Some(symbol.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: NodePath) -> Self {
        self.path = path;
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(function) = &self.function {
            parts.push(format!("@{function}"));
        }
        if let Some(global) = &self.global {
            parts.push(format!("global @{global}"));
        }
        if !self.path.is_empty() {
            parts.push(format!("node {}", self.path));
        }
        if let Some(operation) = &self.operation {
            parts.push(format!("operation `{operation}`"));
        }
        if let Some(value) = &self.value {
            parts.push(format!("value {value}"));
        }

        if parts.is_empty() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// A message describing an event encountered while constructing or verifying
/// IR.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message:  String,
    pub location: Option<Location>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            severity,
            message: message.into(),
            location,
        }
    }
}

/// Renders as `<severity>: <message>`, followed by ` (at <location>)` when a
/// location is available.
impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at {location})")?;
        }
        Ok(())
    }
}

/// The identity of an installed handler.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct HandlerId(u64);

#[derive(Derivative)]
#[derivative(Debug)]
struct Handler {
    id:       HandlerId,
    captured: Vec<Diagnostic>,
    #[derivative(Debug = "ignore")]
    echo:     Option<EchoSink>,
}

thread_local! {
    static HANDLERS: RefCell<Vec<Handler>> = const { RefCell::new(Vec::new()) };
    static NEXT_HANDLER_ID: Cell<u64> = const { Cell::new(0) };
}

/// Installs a new innermost handler on the current thread, which will receive
/// every diagnostic emitted until it is removed or another handler is
/// installed on top of it.
///
/// If `echo` is provided, each diagnostic the handler receives is also written
/// to it as a single rendered line.
pub fn push_handler(echo: Option<EchoSink>) -> HandlerId {
    let id = NEXT_HANDLER_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        HandlerId(id)
    });
    HANDLERS.with(|handlers| {
        handlers.borrow_mut().push(Handler {
            id,
            captured: Vec::new(),
            echo,
        });
    });
    id
}

/// Removes the innermost handler, returning the diagnostics it received in the
/// order they arrived.
///
/// # Panics
///
/// Panics if `id` is not the innermost handler on the current thread. This is
/// a programmer error, as handlers must be removed in the reverse of the order
/// they were installed in.
pub fn pop_handler(id: HandlerId) -> Vec<Diagnostic> {
    HANDLERS.with(|handlers| {
        let mut handlers = handlers.borrow_mut();
        match handlers.last() {
            Some(h) if h.id == id => handlers.pop().map(|h| h.captured).unwrap_or_default(),
            Some(h) => panic!(
                "Diagnostic handler {id:?} was removed while {:?} is the innermost handler",
                h.id
            ),
            None => panic!("Diagnostic handler {id:?} was removed but no handler is installed"),
        }
    })
}

/// Removes the handler `id` wherever it is in the stack, discarding anything
/// it captured.
///
/// Unlike [`pop_handler`] this never panics, which makes it suitable for use
/// during unwinding. It returns `false` if no such handler was installed.
pub fn discard_handler(id: HandlerId) -> bool {
    HANDLERS.with(|handlers| {
        let mut handlers = handlers.borrow_mut();
        match handlers.iter().rposition(|h| h.id == id) {
            Some(ix) => {
                handlers.remove(ix);
                true
            }
            None => false,
        }
    })
}

/// Gets the number of handlers installed on the current thread.
#[must_use]
pub fn handler_depth() -> usize {
    HANDLERS.with(|handlers| handlers.borrow().len())
}

/// Emits `diagnostic` to the innermost handler on the current thread, or to
/// standard error if there is none.
pub fn emit(diagnostic: Diagnostic) {
    tracing::trace!(severity = %diagnostic.severity, message = %diagnostic.message, "diagnostic emitted");

    let unhandled = HANDLERS.with(|handlers| {
        let mut handlers = handlers.borrow_mut();
        let Some(handler) = handlers.last_mut() else {
            return Some(diagnostic);
        };

        if let Some(sink) = &handler.echo {
            let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = writeln!(sink, "{diagnostic}") {
                tracing::warn!("Failed to echo diagnostic: {e}");
            }
        }
        handler.captured.push(diagnostic);
        None
    });

    if let Some(diagnostic) = unhandled {
        eprintln!("{diagnostic}");
    }
}

/// Emits an error with the provided `message` at `location`.
pub fn emit_error(message: impl Into<String>, location: Option<Location>) {
    emit(Diagnostic::new(Severity::Error, message, location));
}

/// Emits a warning with the provided `message` at `location`.
pub fn emit_warning(message: impl Into<String>, location: Option<Location>) {
    emit(Diagnostic::new(Severity::Warning, message, location));
}

/// Emits a note with the provided `message` at `location`.
pub fn emit_note(message: impl Into<String>, location: Option<Location>) {
    emit(Diagnostic::new(Severity::Note, message, location));
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use crate::diagnostic::{
        discard_handler,
        emit_error,
        emit_note,
        emit_warning,
        handler_depth,
        pop_handler,
        push_handler,
        Diagnostic,
        EchoSink,
        Location,
        NodePath,
        Severity,
    };

    #[test]
    fn renders_paths_and_locations() {
        let path = NodePath::new().child(2, Some(1)).child(0, None);
        assert_eq!(path.to_string(), "2[1]/0");

        let location = Location::in_function("forward")
            .with_path(path)
            .with_operation("aten::foo")
            .with_value("%3");
        let diag = Diagnostic::new(Severity::Error, "bad", Some(location));
        assert_eq!(
            diag.to_string(),
            "error: bad (at @forward, node 2[1]/0, operation `aten::foo`, value %3)"
        );
        assert_eq!(
            Location::in_global("weight").with_operation("torch.constant.float").to_string(),
            "global @weight, operation `torch.constant.float`"
        );
        assert_eq!(
            Diagnostic::new(Severity::Note, "fine", None).to_string(),
            "note: fine"
        );
    }

    #[test]
    fn only_the_innermost_handler_receives_diagnostics() {
        let outer = push_handler(None);
        emit_note("first", None);
        let inner = push_handler(None);
        emit_warning("second", None);
        let inner_diags = pop_handler(inner);
        emit_error("third", None);
        let outer_diags = pop_handler(outer);

        assert_eq!(
            inner_diags.iter().map(|d| d.message.as_str()).collect::<Vec<_>>(),
            vec!["second"]
        );
        assert_eq!(
            outer_diags.iter().map(|d| d.message.as_str()).collect::<Vec<_>>(),
            vec!["first", "third"]
        );
        assert_eq!(handler_depth(), 0);
    }

    #[test]
    fn echoes_to_the_provided_sink() {
        let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink: EchoSink = buffer.clone();
        let id = push_handler(Some(sink));
        emit_warning("watch out", None);
        let captured = pop_handler(id);

        assert_eq!(captured.len(), 1);
        let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "warning: watch out\n");
    }

    #[test]
    #[should_panic(expected = "innermost handler")]
    fn out_of_order_removal_panics() {
        let outer = push_handler(None);
        let _inner = push_handler(None);
        pop_handler(outer);
    }

    #[test]
    fn discarding_never_panics() {
        let outer = push_handler(None);
        let inner = push_handler(None);
        assert!(discard_handler(outer));
        assert!(!discard_handler(outer));
        assert!(discard_handler(inner));
        assert_eq!(handler_depth(), 0);
    }

    #[test]
    fn handlers_are_per_thread() {
        let id = push_handler(None);
        std::thread::spawn(|| {
            assert_eq!(handler_depth(), 0);
        })
        .join()
        .unwrap();
        pop_handler(id);
    }
}
