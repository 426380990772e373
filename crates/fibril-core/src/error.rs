//! Error types raised by user components and by the reconciler.

use std::fmt;
use std::rc::Rc;

use crate::fiber::FiberId;

/// Failure reported by user code: a render function, a lifecycle hook or an
/// update callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentError {
    message: Rc<str>,
}

impl ComponentError {
    pub fn new(message: impl Into<Rc<str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ComponentError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// User code failed.
    Component {
        component: Rc<str>,
        source: ComponentError,
    },
    /// A state update produced something other than a record or null.
    InvalidState {
        component: Rc<str>,
        found: &'static str,
    },
    /// `get_child_context` returned a value but the type declares no child
    /// context keys.
    MissingChildContextTypes { component: Rc<str> },
    /// `get_child_context` returned a key the type did not declare.
    UndeclaredChildContext { component: Rc<str>, key: Rc<str> },
    /// A function that was resolved as a render function later returned an
    /// instance.
    ComponentKindChanged { component: Rc<str> },
    /// A fiber chain did not end at a container root.
    InvalidRoot,
    /// A host node reached completion without props to mount with.
    MissingProps { fiber: FiberId },
    /// A fiber id no longer refers to a live fiber.
    StaleFiber { fiber: FiberId },
}

impl ReconcileError {
    pub(crate) fn component(component: &str, source: ComponentError) -> Self {
        ReconcileError::Component {
            component: Rc::from(component),
            source,
        }
    }

    /// The user error behind this failure, when there is one.
    pub fn component_error(&self) -> Option<&ComponentError> {
        match self {
            ReconcileError::Component { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::Component { component, source } => {
                write!(f, "{component}: {source}")
            }
            ReconcileError::InvalidState { component, found } => write!(
                f,
                "{component}: state updates must be a record or null, found {found}"
            ),
            ReconcileError::MissingChildContextTypes { component } => write!(
                f,
                "{component}: get_child_context returned a value but no child context types are declared"
            ),
            ReconcileError::UndeclaredChildContext { component, key } => write!(
                f,
                "{component}: child context key \"{key}\" is not declared in child context types"
            ),
            ReconcileError::ComponentKindChanged { component } => write!(
                f,
                "{component}: a render function cannot return a component instance after its first render"
            ),
            ReconcileError::InvalidRoot => f.write_str("fiber chain does not end at a container root"),
            ReconcileError::MissingProps { fiber } => {
                write!(f, "host fiber {fiber:?} completed without props")
            }
            ReconcileError::StaleFiber { fiber } => write!(f, "fiber {fiber:?} no longer exists"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Component { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// An error captured during render or commit, paired with the nearest
/// ancestor error boundary. `boundary == None` means nothing claims it.
#[derive(Debug, Clone)]
pub struct TrappedError {
    pub boundary: Option<FiberId>,
    pub error: ReconcileError,
}
