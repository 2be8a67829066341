//! Compilation and dispatch of one built kernel.

use log::{debug, trace};
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::Image;
use opencl3::program::Program;
use opencl3::types::cl_uint;

use crate::blueprint::KernelCode;
use crate::error::{Error, Result};
use crate::runtime::{plan_dispatch_slices, ExecutionDescriptor};
use crate::tensor::{KernelArgDescriptor, TensorArgType};
use crate::window::Window;

use super::context::ClContext;
use super::tensor::{DeviceTensor, TensorBinding};

/// A compiled fused kernel, ready for repeated dispatch.
pub struct CompositeKernel {
    #[allow(dead_code)]
    program: Program,
    kernel: Kernel,
    code: KernelCode,
}

impl CompositeKernel {
    /// Compiles `code` for the context's device.
    pub fn configure(ctx: &ClContext, code: KernelCode) -> Result<Self> {
        let flags = code.build_options.compile_flags();
        debug!("compiling `{}` with flags `{flags}`", code.name);
        let program = Program::create_and_build_from_source(ctx.context(), &code.code, &flags)
            .map_err(|e| {
                Error::Device(format!("failed to build program `{}`: {e:?}", code.name))
            })?;
        let kernel = Kernel::create(&program, &code.name)
            .map_err(|e| Error::Device(format!("failed to create kernel `{}`: {e:?}", code.name)))?;
        Ok(CompositeKernel {
            program,
            kernel,
            code,
        })
    }

    pub fn code(&self) -> &KernelCode {
        &self.code
    }

    /// Dispatches the kernel over its built-in execution window.
    pub fn run(
        &self,
        ctx: &ClContext,
        binding: &TensorBinding<'_>,
        exec: &ExecutionDescriptor,
    ) -> Result<()> {
        let window = self.code.window.clone();
        self.run_with_window(ctx, binding, &window, exec)
    }

    /// Dispatches the kernel over `window`.
    ///
    /// The window is walked as 3-D slices, one enqueue per slice, unless the
    /// descriptor opts out of sliding. Every kernel argument must be bound.
    pub fn run_with_window(
        &self,
        ctx: &ClContext,
        binding: &TensorBinding<'_>,
        window: &Window,
        exec: &ExecutionDescriptor,
    ) -> Result<()> {
        let slices = plan_dispatch_slices(window, exec);
        trace!("dispatching `{}` over {} slice(s)", self.code.name, slices.len());
        for slice in &slices {
            self.dispatch_slice(ctx, binding, exec, slice)?;
        }
        Ok(())
    }

    fn dispatch_slice(
        &self,
        ctx: &ClContext,
        binding: &TensorBinding<'_>,
        exec: &ExecutionDescriptor,
        slice: &Window,
    ) -> Result<()> {
        let gws = slice.global_work_size();
        // Image views created for exported arguments; they must outlive the
        // enqueue below.
        let mut image_views = Vec::new();
        unsafe {
            let mut ek = ExecuteKernel::new(&self.kernel);
            for desc in &self.code.arguments {
                let tensor = binding.get(desc.id)?;
                add_tensor_argument(&mut ek, desc, tensor, slice, ctx, &mut image_views)?;
            }
            ek.set_global_work_sizes(&gws);
            if let Some(lws) = exec.suggested_lws {
                ek.set_local_work_sizes(&lws);
            }
            ek.enqueue_nd_range(ctx.queue().as_ref()).map_err(|e| {
                Error::Device(format!("enqueue of `{}` failed: {e:?}", self.code.name))
            })?;
        }
        drop(image_views);
        Ok(())
    }
}

/// Marshals one tensor argument, filling exactly the slots its declaration
/// occupies in the kernel signature.
fn add_tensor_argument(
    ek: &mut ExecuteKernel<'_>,
    desc: &KernelArgDescriptor,
    tensor: &DeviceTensor,
    slice: &Window,
    ctx: &ClContext,
    image_views: &mut Vec<Image>,
) -> Result<()> {
    let info = tensor.info();
    // A non-sliding argument must be bound to a tensor with no z extent, or
    // the fixed z window would silently read the wrong plane.
    if !desc.slide_along_z && info.shape.num_dimensions() >= 3 {
        return Err(Error::Binding(format!(
            "argument {} does not slide along z but is bound to a {}-D tensor",
            desc.id,
            info.shape.num_dimensions()
        )));
    }
    let strides = info.strides_in_bytes();
    let arg_window = if desc.slide_along_z {
        slice.clone()
    } else {
        slice.with_fixed_z()
    };
    // Batches are sliced on the host; z slides inside the kernel.
    let offset = (arg_window.dim(3).start.max(0) as usize * strides[3]) as cl_uint;
    let stride = |d: usize| strides[d] as cl_uint;

    unsafe {
        match desc.arg_type {
            TensorArgType::Scalar => {
                ek.set_arg(tensor.cl_buffer());
            }
            TensorArgType::Vector => {
                ek.set_arg(tensor.cl_buffer())
                    .set_arg(&stride(0))
                    .set_arg(&stride(0))
                    .set_arg(&offset);
            }
            TensorArgType::Image => {
                ek.set_arg(tensor.cl_buffer())
                    .set_arg(&stride(0))
                    .set_arg(&stride(0))
                    .set_arg(&stride(1))
                    .set_arg(&stride(1))
                    .set_arg(&offset);
            }
            TensorArgType::Image3d => {
                ek.set_arg(tensor.cl_buffer())
                    .set_arg(&stride(0))
                    .set_arg(&stride(0))
                    .set_arg(&stride(1))
                    .set_arg(&stride(1))
                    .set_arg(&offset)
                    .set_arg(&stride(2));
            }
            TensorArgType::Tensor4dBuffer => {
                ek.set_arg(tensor.cl_buffer())
                    .set_arg(&stride(0))
                    .set_arg(&stride(0))
                    .set_arg(&stride(1))
                    .set_arg(&stride(1))
                    .set_arg(&stride(2))
                    .set_arg(&stride(2))
                    .set_arg(&stride(3))
                    .set_arg(&stride(3))
                    .set_arg(&offset);
            }
            TensorArgType::Image3dExportToClImage2d => {
                let view = tensor.export_to_image2d(ctx)?;
                ek.set_arg(&view).set_arg(&stride(2));
                image_views.push(view);
            }
        }
    }
    Ok(())
}
