//! Identifier types shared across the blueprint compiler and the runtime.

/// Identifies a logical tensor node in the dependency graph.
///
/// Created by [`crate::blueprint::Blueprint::add_tensor`] and stable for the
/// blueprint's lifetime. Used as the key for both tensor metadata lookup and
/// shared-variable lookup.
pub type ArgumentId = i32;

/// Identifies an operator node in the dependency graph.
pub type OperatorId = i32;

/// Alias used by graph-facing code where "tensor" reads better than
/// "argument". The two id spaces are the same.
pub type TensorId = ArgumentId;

/// Identifies a kernel component within a blueprint.
pub type ComponentId = i32;

/// Sentinel id for an absent optional operand (e.g. a convolution without
/// bias). Links carrying this id are skipped during allocation and wiring.
pub const ARG_PLACEHOLDER: ArgumentId = -1;
