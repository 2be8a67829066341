//! Graph utilities consumed by the blueprint compiler and the workload layer.

pub mod dependency;

pub use dependency::{DependencyGraph, OpPack};
