//! Element data types and their OpenCL C spellings.

use std::fmt;

/// Element type of a tensor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F16,
    F32,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 | DType::F16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
        }
    }

    /// The OpenCL C type name, as used in generated code and `-DDATA_TYPE`
    /// build options.
    pub fn cl_name(&self) -> &'static str {
        match self {
            DType::U8 => "uchar",
            DType::U16 => "ushort",
            DType::U32 => "uint",
            DType::I8 => "char",
            DType::I16 => "short",
            DType::I32 => "int",
            DType::F16 => "half",
            DType::F32 => "float",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::F16 => "f16",
            DType::F32 => "f32",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cl_names() {
        assert_eq!(DType::F32.cl_name(), "float");
        assert_eq!(DType::F16.cl_name(), "half");
        assert_eq!(DType::U8.cl_name(), "uchar");
    }

    #[test]
    fn sizes() {
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F16.size_in_bytes(), 2);
        assert_eq!(DType::I8.size_in_bytes(), 1);
    }
}
