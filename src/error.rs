//! Error types for blueprint construction, code generation and dispatch.

/// Errors surfaced by the fusion compiler and the runtime dispatcher.
///
/// Construction and build errors (`Topology`, `State`, `UnresolvedTag`) are
/// programmer/configuration errors: they propagate synchronously to the
/// caller and there is no local recovery. `Binding` and `Device` errors are
/// raised at dispatch time.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The component graph violates a structural invariant: multiple roots,
    /// more than one Complex or Store component, or an Automatic variable
    /// referenced before its producing Output.
    #[error("topology error: {0}")]
    Topology(String),

    /// An operation was attempted in the wrong blueprint state.
    #[error("invalid blueprint state: expected {expected}, found {found}")]
    State {
        expected: &'static str,
        found: &'static str,
    },

    /// A `{{tag}}` in a component code template had no entry in the
    /// component's tag lookup table. This is a construction bug, not a
    /// runtime condition.
    #[error("unresolved template tag `{0}`")]
    UnresolvedTag(String),

    /// A concrete tensor could not be bound to a declared kernel argument.
    #[error("binding error: {0}")]
    Binding(String),

    /// A device-side program build or enqueue failure.
    #[error("device error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, Error>;
