//! The immutable build artifact and the textual pieces of program assembly:
//! build options, argument declarations, the kernel signature and the
//! global-index prologue.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::tensor::{KernelArgDescriptor, TensorArgType};
use crate::window::{ClippingStrategy, TileDescriptor, Window};

use super::vtable::{SharedVar, SharedVarGroup};

/// Set of `-D` compile definitions passed to the device program compiler.
///
/// Options are kept in a sorted set: merging the options of all components is
/// a set union, and the resulting compile line is deterministic.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct BuildOptions {
    options: BTreeSet<String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        BuildOptions::default()
    }

    pub fn add(&mut self, option: impl Into<String>) {
        self.options.insert(option.into());
    }

    pub fn add_if(&mut self, cond: bool, option: impl Into<String>) {
        if cond {
            self.add(option);
        }
    }

    /// Set union with another option set.
    pub fn merge(&mut self, other: &BuildOptions) {
        self.options.extend(other.options.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn contains(&self, option: &str) -> bool {
        self.options.contains(option)
    }

    /// The full compile line handed to the device program build.
    pub fn compile_flags(&self) -> String {
        self.options
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The finalized, immutable output of compiling a blueprint.
///
/// Everything the runtime needs to execute the fused kernel: the program
/// text, a cache key for the compiled-program cache, the compile-time
/// constant set, the execution window and the ordered logical argument list.
#[derive(Clone, PartialEq, Debug)]
pub struct KernelCode {
    pub name: String,
    pub code: String,
    pub config_id: String,
    pub build_options: BuildOptions,
    pub window: Window,
    pub arguments: Vec<KernelArgDescriptor>,
}

/// Emits the parameter declaration for one kernel argument.
pub(crate) fn generate_argument_declaration(var: &SharedVar) -> Result<String> {
    if var.group != SharedVarGroup::Argument {
        return Err(Error::Topology(format!(
            "variable `{}` is not a kernel argument",
            var.uniq_name
        )));
    }
    let name = &var.uniq_name;
    let decl = match var.desc.arg_type {
        TensorArgType::Vector => format!("VECTOR_DECLARATION({name})"),
        TensorArgType::Image => format!("IMAGE_DECLARATION({name})"),
        TensorArgType::Image3d => {
            format!("IMAGE_DECLARATION({name}),\n    uint {name}_stride_z")
        }
        TensorArgType::Image3dExportToClImage2d => {
            format!("__read_only image2d_t {name}_img,\n    uint {name}_stride_z")
        }
        TensorArgType::Tensor4dBuffer => format!("TENSOR4D_DECLARATION({name})"),
        TensorArgType::Scalar => {
            return Err(Error::Topology(format!(
                "no argument declaration exists for scalar argument `{name}`"
            )))
        }
    };
    Ok(decl)
}

/// Emits the kernel signature from the ordered argument list.
pub(crate) fn generate_kernel_signature(name: &str, args: &[SharedVar]) -> Result<String> {
    let decls = args
        .iter()
        .map(generate_argument_declaration)
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "\n__kernel void {}(\n    {})",
        name,
        decls.join(",\n    ")
    ))
}

/// Emits the global-index prologue shared by all component bodies.
///
/// `g_x`/`g_y` are tile indices along the output; the boundary-condition
/// flags `g_cond_x`/`g_cond_y` mark the tiles that need clipping, on the side
/// selected by the blueprint's [`ClippingStrategy`].
pub(crate) fn generate_global_section(tile: &TileDescriptor) -> String {
    let mut code = String::new();
    code.push_str("    uint g_x = get_global_id(0);\n");
    code.push_str("    uint g_y = get_global_id(1);\n");
    code.push_str("    uint g_z = get_global_id(2);\n\n");

    let (n0, m0) = if tile.is_empty() {
        (1, 1)
    } else {
        (tile.n0, tile.m0)
    };
    let cond_left = "    const bool g_cond_x = (g_x == 0);\n".to_string();
    let cond_top = "    const bool g_cond_y = (g_y == 0);\n".to_string();
    let cond_right = format!(
        "    const bool g_cond_x = ((g_x + 1) * {} >= {});\n",
        n0, tile.boundary_x
    );
    let cond_bottom = format!(
        "    const bool g_cond_y = ((g_y + 1) * {} >= {});\n",
        m0, tile.boundary_y
    );
    match tile.clipping {
        ClippingStrategy::TopLeft => {
            code.push_str(&cond_left);
            code.push_str(&cond_top);
        }
        ClippingStrategy::TopRight => {
            code.push_str(&cond_right);
            code.push_str(&cond_top);
        }
        ClippingStrategy::BottomLeft => {
            code.push_str(&cond_left);
            code.push_str(&cond_bottom);
        }
        ClippingStrategy::BottomRight => {
            code.push_str(&cond_right);
            code.push_str(&cond_bottom);
        }
    }

    code.push_str("\n    REPEAT_VAR_INIT_TO_CONST(M0, uint, g_zout, 0);\n");
    code.push_str("    REPEAT_VAR_INIT_TO_CONST(16, uint, g_zero, 0);\n\n");
    code
}
