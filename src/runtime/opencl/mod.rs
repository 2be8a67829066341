//! OpenCL execution of built kernels.

mod context;
mod kernel;
mod operator;
mod tensor;

pub use context::ClContext;
pub use kernel::CompositeKernel;
pub use operator::{CompositeOperator, TensorPackMap};
pub use tensor::{DeviceTensor, TensorBinding};
