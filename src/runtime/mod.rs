//! Runtime dispatch of built kernels: workload staging, and the OpenCL
//! execution layer behind the `opencl` feature.

pub mod workload;

#[cfg(feature = "opencl")]
pub mod opencl;

pub use workload::{UnitWorkload, UnitWorkloadStage, Workload};

use crate::window::Window;

/// Per-dispatch execution controls, decided by the caller rather than baked
/// into the kernel.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ExecutionDescriptor {
    /// Launch the whole window as a single NDRange instead of slicing it.
    pub skip_sliding_window: bool,
    /// Local work size hint; `None` lets the driver choose.
    pub suggested_lws: Option<[usize; 3]>,
}

/// Expands a dispatch window into the NDRange launches it needs: one per 3-D
/// sub-window, or the whole window at once when sliding is skipped.
pub fn plan_dispatch_slices(window: &Window, exec: &ExecutionDescriptor) -> Vec<Window> {
    if exec.skip_sliding_window {
        vec![window.clone()]
    } else {
        window.slices_3d()
    }
}
