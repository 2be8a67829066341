//! The kernel component contract and template instantiation.
//!
//! A component is the unit of fusable behavior: it contributes a code
//! fragment with `{{tag}}` placeholders, optional headers and macros, a
//! subset of the blueprint's tensor links, and per-component compile-time
//! constants. The blueprint compiler stitches the fragments of all components
//! into one kernel program in topological order.

use std::collections::BTreeSet;

use log::warn;
use rustc_hash::FxHashMap;

use crate::blueprint::vtable::{SharedVarGroup, SharedVarLink, SharedVarTable};
use crate::blueprint::BuildOptions;
use crate::error::{Error, Result};
use crate::tensor::{TensorArgType, TensorInfo};
use crate::types::{ArgumentId, ComponentId};
use crate::window::{TileDescriptor, Window};

mod direct_conv;
mod elementwise;
mod eltwise_add;
mod floor;
mod gemm_native;
mod store;

pub use direct_conv::{Conv2dDescriptor, DirectConv2dComponent};
pub use elementwise::{ElementwiseComponent, UnaryOp};
pub use eltwise_add::{ConvertPolicy, EltwiseAddComponent, EltwiseAddDescriptor};
pub use floor::FloorComponent;
pub use gemm_native::{GemmNativeComponent, GemmNativeDescriptor};
pub use store::{
    store_component, StoreBlockBoundaryAwareComponent, StoreIndirectWidthSelectComponent,
    StoreType,
};

/// Classification of a component within a blueprint.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ComponentType {
    /// Contributes code only; any number per blueprint.
    Simple,
    /// Shape-determining, expensive component; at most one per blueprint.
    Complex,
    /// Writes the blueprint's final output; at most one per blueprint.
    Store,
}

/// Resolves `{{tag}}` placeholders to literal text.
pub type TagLut = FxHashMap<String, String>;

/// Read-only view of the blueprint's tensor bookkeeping, handed to components
/// during the two code generation passes.
pub struct CodegenContext<'a> {
    tensors: &'a FxHashMap<ArgumentId, TensorInfo>,
    groups: &'a FxHashMap<ArgumentId, SharedVarGroup>,
    tile: &'a TileDescriptor,
}

impl<'a> CodegenContext<'a> {
    pub(crate) fn new(
        tensors: &'a FxHashMap<ArgumentId, TensorInfo>,
        groups: &'a FxHashMap<ArgumentId, SharedVarGroup>,
        tile: &'a TileDescriptor,
    ) -> Self {
        CodegenContext {
            tensors,
            groups,
            tile,
        }
    }

    /// Metadata of a tensor registered with `add_tensor`.
    pub fn tensor_info(&self, id: ArgumentId) -> Result<&TensorInfo> {
        self.tensors.get(&id).ok_or_else(|| {
            Error::Topology(format!("tensor {id} was never added to the blueprint"))
        })
    }

    /// The variable group a tensor was classified into at finalize time.
    /// Placeholders report `Argument`; the answer is never used for them.
    pub fn group(&self, id: ArgumentId) -> SharedVarGroup {
        self.groups
            .get(&id)
            .copied()
            .unwrap_or(SharedVarGroup::Argument)
    }

    pub fn tile(&self) -> &TileDescriptor {
        self.tile
    }
}

/// A unit of fusable behavior.
///
/// `allocate_shared_vars` must run for all components of a blueprint, in
/// topological order, before any component's `tag_lut` is consulted: a
/// component's tags may name variables a predecessor allocated.
pub trait KernelComponent {
    /// Short name, used in the fused kernel name and the config id.
    fn name(&self) -> &'static str;

    fn component_type(&self) -> ComponentType {
        ComponentType::Simple
    }

    /// The component's full set of tensor links. Placeholder links are
    /// allowed for absent optional operands.
    fn links(&self) -> Vec<SharedVarLink>;

    /// Registers every non-placeholder link into the table with an
    /// operation-appropriate tensor-argument descriptor.
    fn allocate_shared_vars(
        &self,
        vtable: &mut SharedVarTable,
        ctx: &CodegenContext<'_>,
    ) -> Result<()>;

    /// Resolves each placeholder of [`component_code`](Self::component_code)
    /// to a literal: a variable name, a numeric constant, or a type token.
    fn tag_lut(&self, vtable: &SharedVarTable, ctx: &CodegenContext<'_>) -> Result<TagLut>;

    /// The component's code body, with `{{tag}}` placeholders.
    fn component_code(&self) -> String;

    /// Header files the fragment relies on; deduplicated by set union.
    fn headers(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Additional macro block emitted once before the kernel body.
    fn additional_macros(&self) -> String {
        String::new()
    }

    /// Output iteration shape. Only meaningful for the graph root component.
    fn window(&self, _ctx: &CodegenContext<'_>) -> Result<Window> {
        Ok(Window::default())
    }

    /// Compile-time constants this component needs.
    fn build_options(&self, _ctx: &CodegenContext<'_>) -> BuildOptions {
        BuildOptions::default()
    }

    /// Cache-key fragment identifying this component's configuration.
    fn config_id(&self, _ctx: &CodegenContext<'_>) -> String {
        String::new()
    }

    fn id(&self) -> ComponentId;

    /// Called once by the blueprint when the component is added.
    fn assign_id(&mut self, id: ComponentId);
}

/// Substitutes every `{{tag}}` in `template` using `tags`.
///
/// A tag missing from the table is a fatal construction error. Tags supplied
/// but never used only warn: a component may share one table across template
/// variants.
pub fn replace_tags(template: &str, tags: &TagLut) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut used: BTreeSet<&str> = BTreeSet::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| Error::UnresolvedTag(after.to_string()))?;
        let tag = &after[..close];
        let (key, value) = tags
            .get_key_value(tag)
            .ok_or_else(|| Error::UnresolvedTag(tag.to_string()))?;
        used.insert(key.as_str());
        out.push_str(value);
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    for tag in tags.keys() {
        if !used.contains(tag.as_str()) {
            warn!("unused template tag `{tag}`");
        }
    }
    Ok(out)
}

/// Registers one tensor link into the table with the default rank-derived
/// argument descriptor.
pub(crate) fn register_link(
    vtable: &mut SharedVarTable,
    ctx: &CodegenContext<'_>,
    link: SharedVarLink,
    base_name: &str,
) -> Result<()> {
    register_link_as(vtable, ctx, link, base_name, None)
}

/// Registers one tensor link, overriding the rank-derived argument passing
/// when a component asks for a specific marshaling.
pub(crate) fn register_link_as(
    vtable: &mut SharedVarTable,
    ctx: &CodegenContext<'_>,
    link: SharedVarLink,
    base_name: &str,
    arg_type: Option<TensorArgType>,
) -> Result<()> {
    let info = ctx.tensor_info(link.arg_id)?;
    let desc = crate::tensor::KernelArgDescriptor {
        id: link.arg_id,
        arg_type: arg_type.unwrap_or_else(|| default_arg_type(info)),
        slide_along_z: slides_along_z(info),
    };
    vtable.add(link, ctx.group(link.arg_id), desc, base_name)
}

/// Unique variable name behind a link. A miss here is a programming error in
/// the component ordering, not a recoverable condition.
pub(crate) fn var_name<'a>(vtable: &'a SharedVarTable, link: SharedVarLink) -> Result<&'a str> {
    vtable
        .get(link)
        .map(|v| v.uniq_name.as_str())
        .ok_or_else(|| {
            Error::Topology(format!(
                "no shared variable allocated for tensor {}",
                link.arg_id
            ))
        })
}

/// Boundary-aware tile load for a memory operand, returned together with the
/// per-row expression reading the loaded tile.
///
/// A rank-1 operand is declared without a y stride (`VECTOR_DECLARATION`), so
/// it loads as a single row that every output row reads; anything wider loads
/// as a full M0 x N0 block.
pub(crate) fn tile_load_fragment(name: &str, info: &TensorInfo, indent: &str) -> (String, String) {
    let dt = info.dtype.cl_name();
    if info.shape.num_dimensions() < 2 {
        let load = format!(
            "{indent}__global uchar *{name}_addr = {name}_ptr + {name}_offset_first_element_in_bytes + g_x * sizeof({dt}) * N0;\n\
             {indent}TILE({dt}, 1, N0, {name}_tile);\n\
             {indent}T_LOAD_PARTIAL(1, N0, 1, PARTIAL_STORE_N0, g_cond_y, g_cond_x, {dt}, {name}_addr, {name}_stride_x, {name}_tile);\n"
        );
        (load, format!("{name}_tile[0].v"))
    } else {
        let z_off = z_offset_fragment(name, info);
        let load = format!(
            "{indent}__global uchar *{name}_addr = {name}_ptr + {name}_offset_first_element_in_bytes + g_x * sizeof({dt}) * N0 + g_y * {name}_stride_y * M0{z_off};\n\
             {indent}TILE({dt}, M0, N0, {name}_tile);\n\
             {indent}T_LOAD_PARTIAL(M0, N0, PARTIAL_STORE_M0, PARTIAL_STORE_N0, g_cond_y, g_cond_x, {dt}, {name}_addr, {name}_stride_y, {name}_tile);\n"
        );
        (load, format!("{name}_tile[m0].v"))
    }
}

/// Address offset along z for sliding 3-D/4-D operands; 2-D operands have no
/// z stride in their argument declaration.
pub(crate) fn z_offset_fragment(name: &str, info: &TensorInfo) -> String {
    if info.shape.num_dimensions() >= 3 {
        format!(" + g_z * {name}_stride_z")
    } else {
        String::new()
    }
}

/// Default argument passing for a tensor, chosen by its logical rank.
pub(crate) fn default_arg_type(info: &TensorInfo) -> TensorArgType {
    match info.shape.num_dimensions() {
        0 | 1 => TensorArgType::Vector,
        2 => TensorArgType::Image,
        3 => TensorArgType::Image3d,
        _ => TensorArgType::Tensor4dBuffer,
    }
}

/// Whether a tensor of this rank slides along the z dimension at dispatch.
pub(crate) fn slides_along_z(info: &TensorInfo) -> bool {
    info.shape.num_dimensions() >= 3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lut(pairs: &[(&str, &str)]) -> TagLut {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn replaces_all_tags() {
        let tags = lut(&[("acc", "acc_3"), ("DATA_TYPE", "float")]);
        let out = replace_tags("{{DATA_TYPE}} v = {{acc}}[0]; // {{acc}}", &tags).unwrap();
        assert_eq!(out, "float v = acc_3[0]; // acc_3");
        assert!(!out.contains("{{"));
    }

    #[test]
    fn substitution_is_total_and_idempotent() {
        let tags = lut(&[("dst", "dst_0")]);
        let once = replace_tags("store({{dst}});", &tags).unwrap();
        let twice = replace_tags(&once, &lut(&[])).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_tag_is_fatal() {
        let err = replace_tags("{{unknown}}", &lut(&[])).unwrap_err();
        assert!(matches!(err, Error::UnresolvedTag(tag) if tag == "unknown"));
    }

    #[test]
    fn unterminated_tag_is_fatal() {
        assert!(replace_tags("{{oops", &lut(&[("oops", "x")])).is_err());
    }

    #[test]
    fn text_without_tags_passes_through() {
        let text = "__kernel void k() {}\n";
        assert_eq!(replace_tags(text, &lut(&[])).unwrap(), text);
    }
}
