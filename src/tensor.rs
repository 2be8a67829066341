//! Tensor metadata shared between the blueprint compiler and the runtime.
//!
//! The compiler only ever sees logical tensors: a shape, an element type and
//! the way the tensor is handed to the generated kernel (its
//! [`TensorArgType`]). Concrete device storage is bound per-invocation by the
//! runtime and never enters the blueprint.

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::types::ArgumentId;

/// Maximum number of tensor dimensions understood by the generated kernels.
pub const MAX_DIMS: usize = 4;

/// Tensor shape with dimension order `[x, y, z, w]`, `x` fastest-moving.
///
/// The logical rank is recorded separately from the padded dimension array so
/// that a `1x1` image stays 2-D instead of degenerating to a vector.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TensorShape {
    dims: [usize; MAX_DIMS],
    rank: usize,
}

impl TensorShape {
    /// Creates a shape from up to [`MAX_DIMS`] dimension sizes; missing
    /// trailing dimensions default to 1.
    pub fn new(dims: &[usize]) -> Self {
        assert!(dims.len() <= MAX_DIMS, "too many tensor dimensions");
        let mut padded = [1usize; MAX_DIMS];
        padded[..dims.len()].copy_from_slice(dims);
        TensorShape {
            dims: padded,
            rank: dims.len().max(1),
        }
    }

    pub fn dim(&self, d: usize) -> usize {
        self.dims[d]
    }

    pub fn x(&self) -> usize {
        self.dims[0]
    }

    pub fn y(&self) -> usize {
        self.dims[1]
    }

    pub fn z(&self) -> usize {
        self.dims[2]
    }

    pub fn w(&self) -> usize {
        self.dims[3]
    }

    /// Logical number of dimensions, as declared at construction.
    pub fn num_dimensions(&self) -> usize {
        self.rank
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Logical description of a tensor: shape plus element type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TensorInfo {
    pub shape: TensorShape,
    pub dtype: DType,
}

impl TensorInfo {
    pub fn new(shape: TensorShape, dtype: DType) -> Self {
        TensorInfo { shape, dtype }
    }

    /// Contiguous byte strides for the `[x, y, z, w]` dimension order.
    pub fn strides_in_bytes(&self) -> [usize; MAX_DIMS] {
        let mut strides = [0usize; MAX_DIMS];
        let mut acc = self.dtype.size_in_bytes();
        for d in 0..MAX_DIMS {
            strides[d] = acc;
            acc *= self.shape.dim(d);
        }
        strides
    }

    pub fn size_in_bytes(&self) -> usize {
        self.shape.num_elements() * self.dtype.size_in_bytes()
    }
}

/// How a logical tensor is passed to the generated kernel.
///
/// Each variant consumes a different, fixed number of native kernel-argument
/// slots at dispatch time (see [`TensorArgType::num_arg_slots`]) and a
/// matching parameter group in the generated signature.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TensorArgType {
    /// A single scalar value.
    Scalar,
    /// 1-D buffer: ptr, stride_x, step_x, offset.
    Vector,
    /// 2-D buffer: ptr, stride_x, step_x, stride_y, step_y, offset.
    Image,
    /// 2-D buffer plus an explicit z-stride scalar for batched access.
    Image3d,
    /// Buffer exported as a 2-D image view plus a z-stride scalar. The view
    /// object must stay alive until the slice using it is enqueued.
    Image3dExportToClImage2d,
    /// 4-D buffer: ptr, strides x/y/z/w, steps x/y/z/w, offset.
    Tensor4dBuffer,
}

impl TensorArgType {
    /// Number of native kernel-argument slots this variant consumes.
    pub fn num_arg_slots(&self) -> usize {
        match self {
            TensorArgType::Scalar => 1,
            TensorArgType::Vector => 4,
            TensorArgType::Image => 6,
            TensorArgType::Image3d => 7,
            TensorArgType::Image3dExportToClImage2d => 2,
            TensorArgType::Tensor4dBuffer => 10,
        }
    }
}

/// Geometry of the 2-D image view laid over a buffer for
/// [`TensorArgType::Image3dExportToClImage2d`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Image2dViewGeometry {
    /// Texel width; one RGBA texel packs four elements along x.
    pub width: usize,
    /// One row per y/z/w coordinate of the underlying buffer.
    pub height: usize,
    pub row_pitch_bytes: usize,
}

/// Computes the image view an exported buffer argument is read through.
///
/// Only 16- and 32-bit float tensors whose x extent fills whole RGBA texels
/// can be exported.
pub fn image2d_view_geometry(info: &TensorInfo) -> Result<Image2dViewGeometry> {
    if !matches!(info.dtype, DType::F16 | DType::F32) {
        return Err(Error::Binding(format!(
            "cannot export a {} tensor as a cl_image view",
            info.dtype
        )));
    }
    if info.shape.x() % 4 != 0 {
        return Err(Error::Binding(format!(
            "cl_image export needs an x extent divisible by 4, got {}",
            info.shape.x()
        )));
    }
    Ok(Image2dViewGeometry {
        width: info.shape.x() / 4,
        height: info.shape.y() * info.shape.z() * info.shape.w(),
        row_pitch_bytes: info.strides_in_bytes()[1],
    })
}

/// Runtime descriptor attached to every kernel argument: which logical tensor
/// it binds, how it is marshaled, and whether it slides along the z dimension
/// when the execution window is sliced.
///
/// If `slide_along_z` is false the dispatcher forces the slice's z/w ranges to
/// a single element and requires a zero z-stride on the bound tensor. This
/// lets one compact kernel serve both 2-D and batched 3-D operands.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KernelArgDescriptor {
    pub id: ArgumentId,
    pub arg_type: TensorArgType,
    pub slide_along_z: bool,
}

impl KernelArgDescriptor {
    pub fn new(id: ArgumentId, arg_type: TensorArgType, slide_along_z: bool) -> Self {
        KernelArgDescriptor {
            id,
            arg_type,
            slide_along_z,
        }
    }
}
