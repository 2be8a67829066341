//! Clfuse: Composable OpenCL Kernel Fusion
//!
//! Clfuse assembles fused OpenCL kernels from reusable code components and
//! dispatches them over sliced execution windows.
//!
//! # Architecture
//!
//! Clfuse provides:
//! - **blueprint**: The incremental kernel builder and its build artifact
//! - **component**: The fusable kernel components (conv, gemm, element-wise,
//!   store) and the component contract
//! - **graph**: The tensor/operator dependency graph
//! - **runtime**: Workload staging and the OpenCL execution layer
//! - **window**: Execution windows, tiles and 3-D slicing
//!
//! A typical flow: add tensors and components to a [`Blueprint`], `finalize`
//! it, `build` the fused [`KernelCode`], then compile and dispatch it with
//! the runtime (feature `opencl`).
//!
//! # Feature Flags
//!
//! - `opencl`: Enable the OpenCL runtime (compilation, buffers, dispatch)

// ============================================================================
// Core Modules
// ============================================================================

pub mod blueprint;
pub mod component;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod runtime;
pub mod tensor;
pub mod types;
pub mod window;

// ============================================================================
// Re-exports
// ============================================================================

pub use blueprint::{Blueprint, BuildOptions, KernelCode};
pub use dtype::DType;
pub use error::{Error, Result};
pub use tensor::{KernelArgDescriptor, TensorArgType, TensorInfo, TensorShape};
pub use window::{ClippingStrategy, TileDescriptor, Window};

// ============================================================================
// Prelude
// ============================================================================

/// Prelude module with commonly used types and traits
pub mod prelude {
    pub use crate::blueprint::vtable::{SharedVarGroup, SharedVarIo, SharedVarLink};
    pub use crate::blueprint::{Blueprint, BuildOptions, KernelCode};
    pub use crate::component::{
        ComponentType, Conv2dDescriptor, ConvertPolicy, DirectConv2dComponent,
        ElementwiseComponent, EltwiseAddComponent, EltwiseAddDescriptor, FloorComponent,
        GemmNativeComponent, GemmNativeDescriptor, KernelComponent,
        StoreBlockBoundaryAwareComponent, StoreIndirectWidthSelectComponent, StoreType, UnaryOp,
    };
    pub use crate::dtype::DType;
    pub use crate::error::{Error, Result};
    pub use crate::graph::DependencyGraph;
    pub use crate::runtime::{ExecutionDescriptor, UnitWorkloadStage, Workload};
    pub use crate::tensor::{TensorInfo, TensorShape};
    pub use crate::window::{ClippingStrategy, TileDescriptor, Window};
}
