//! OpenCL device, context and command queue bundle.

use std::sync::Arc;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{get_all_devices, Device, CL_DEVICE_TYPE_GPU};

use crate::error::{Error, Result};

/// Everything needed to compile and dispatch kernels on one device.
pub struct ClContext {
    device: Device,
    context: Context,
    queue: Arc<CommandQueue>,
}

impl ClContext {
    /// Opens the first available GPU device.
    pub fn new() -> Result<Self> {
        Self::with_device_index(0)
    }

    /// Opens the GPU device at `index`.
    pub fn with_device_index(index: usize) -> Result<Self> {
        let device_ids = get_all_devices(CL_DEVICE_TYPE_GPU)
            .map_err(|e| Error::Device(format!("failed to enumerate GPU devices: {e:?}")))?;
        let id = device_ids.get(index).copied().ok_or_else(|| {
            Error::Device(format!(
                "device index {index} out of range ({} devices found)",
                device_ids.len()
            ))
        })?;
        let device = Device::new(id);
        let context = Context::from_device(&device)
            .map_err(|e| Error::Device(format!("failed to create context: {e:?}")))?;
        let queue = CommandQueue::create_default(&context, 0)
            .map_err(|e| Error::Device(format!("failed to create command queue: {e:?}")))?;
        Ok(ClContext {
            device,
            context,
            queue: Arc::new(queue),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Blocks until all queued work has finished.
    pub fn finish(&self) -> Result<()> {
        self.queue
            .finish()
            .map_err(|e| Error::Device(format!("queue finish failed: {e:?}")))
    }
}
