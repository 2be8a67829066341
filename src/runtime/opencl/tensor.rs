//! Device-side tensors and the binding table handed to dispatch.

use std::sync::Arc;

use opencl3::command_queue::CommandQueue;
use opencl3::memory::{
    cl_image_desc, cl_image_format, Buffer as ClBuffer, ClMem, Image, CL_FLOAT, CL_HALF_FLOAT,
    CL_MEM_OBJECT_IMAGE2D, CL_MEM_READ_WRITE, CL_RGBA,
};
use opencl3::types::CL_BLOCKING;
use rustc_hash::FxHashMap;

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::tensor::{image2d_view_geometry, TensorInfo};
use crate::types::ArgumentId;

use super::context::ClContext;

/// A device buffer together with the logical tensor it backs.
pub struct DeviceTensor {
    buffer: ClBuffer<u8>,
    info: TensorInfo,
    queue: Arc<CommandQueue>,
}

impl DeviceTensor {
    /// Allocates an uninitialized buffer sized for `info`.
    pub fn new(ctx: &ClContext, info: TensorInfo) -> Result<Self> {
        let size = info.size_in_bytes().max(1);
        let buffer = unsafe {
            ClBuffer::create(ctx.context(), CL_MEM_READ_WRITE, size, std::ptr::null_mut())
                .map_err(|e| Error::Device(format!("failed to create buffer: {e:?}")))?
        };
        Ok(DeviceTensor {
            buffer,
            info,
            queue: ctx.queue().clone(),
        })
    }

    /// Allocates a buffer and fills it from host memory.
    pub fn from_data(ctx: &ClContext, info: TensorInfo, data: &[u8]) -> Result<Self> {
        if data.len() != info.size_in_bytes() {
            return Err(Error::Binding(format!(
                "host data is {} bytes, tensor needs {}",
                data.len(),
                info.size_in_bytes()
            )));
        }
        let mut tensor = DeviceTensor::new(ctx, info)?;
        tensor.copy_from_host(data)?;
        Ok(tensor)
    }

    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    pub fn cl_buffer(&self) -> &ClBuffer<u8> {
        &self.buffer
    }

    /// Creates a 2-D RGBA image view over this buffer for arguments marshaled
    /// as [`crate::tensor::TensorArgType::Image3dExportToClImage2d`].
    ///
    /// The returned view borrows the buffer's storage and must stay alive
    /// until the slice reading through it has been enqueued.
    pub fn export_to_image2d(&self, ctx: &ClContext) -> Result<Image> {
        let geometry = image2d_view_geometry(&self.info)?;
        let channel_data_type = match self.info.dtype {
            DType::F16 => CL_HALF_FLOAT,
            DType::F32 => CL_FLOAT,
            // Unreachable, the geometry check rejects everything else.
            other => {
                return Err(Error::Binding(format!(
                    "cannot export a {other} tensor as a cl_image view"
                )))
            }
        };
        let format = cl_image_format {
            image_channel_order: CL_RGBA,
            image_channel_data_type: channel_data_type,
        };
        let desc = cl_image_desc {
            image_type: CL_MEM_OBJECT_IMAGE2D,
            image_width: geometry.width,
            image_height: geometry.height,
            image_depth: 1,
            image_array_size: 1,
            image_row_pitch: geometry.row_pitch_bytes,
            image_slice_pitch: 0,
            num_mip_levels: 0,
            num_samples: 0,
            buffer: self.buffer.get(),
        };
        unsafe {
            Image::create(
                ctx.context(),
                CL_MEM_READ_WRITE,
                &format,
                &desc,
                std::ptr::null_mut(),
            )
            .map_err(|e| Error::Device(format!("failed to export buffer as cl_image: {e:?}")))
        }
    }

    pub fn copy_from_host(&mut self, data: &[u8]) -> Result<()> {
        unsafe {
            self.queue
                .enqueue_write_buffer(&mut self.buffer, CL_BLOCKING, 0, data, &[])
                .map_err(|e| Error::Device(format!("buffer write failed: {e:?}")))?;
        }
        Ok(())
    }

    pub fn copy_to_host(&self) -> Result<Vec<u8>> {
        let mut data = vec![0u8; self.info.size_in_bytes()];
        unsafe {
            self.queue
                .enqueue_read_buffer(&self.buffer, CL_BLOCKING, 0, &mut data, &[])
                .map_err(|e| Error::Device(format!("buffer read failed: {e:?}")))?;
        }
        Ok(data)
    }
}

/// Maps the argument ids of one kernel to the device tensors backing them.
///
/// Dispatch fails if any argument of the kernel is missing from the binding.
#[derive(Default)]
pub struct TensorBinding<'a> {
    tensors: FxHashMap<ArgumentId, &'a DeviceTensor>,
}

impl<'a> TensorBinding<'a> {
    pub fn new() -> Self {
        TensorBinding::default()
    }

    pub fn bind(&mut self, id: ArgumentId, tensor: &'a DeviceTensor) -> &mut Self {
        self.tensors.insert(id, tensor);
        self
    }

    pub fn get(&self, id: ArgumentId) -> Result<&'a DeviceTensor> {
        self.tensors
            .get(&id)
            .copied()
            .ok_or_else(|| Error::Binding(format!("no tensor bound for argument {id}")))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}
