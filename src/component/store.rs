//! Store components: write the live accumulator tile back to memory.
//!
//! Exactly one store per blueprint; its output tensor is the blueprint
//! destination.

use std::collections::BTreeSet;

use crate::blueprint::vtable::{SharedVarLink, SharedVarTable};
use crate::error::Result;
use crate::types::ComponentId;

use super::{
    register_link, var_name, z_offset_fragment, CodegenContext, ComponentType, KernelComponent,
    TagLut,
};

/// Selects the store flavor appended to a blueprint.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StoreType {
    /// Whole-block store with explicit partial-block handling at the output
    /// boundary.
    StoreBlockBoundaryAware,
    /// Row-indirect store that clamps the y index and selects the written
    /// width per row.
    TStoreIndirectWidthSelect,
}

/// Builds the store component matching `store_type`.
pub fn store_component(
    store_type: StoreType,
    src: SharedVarLink,
    dst: SharedVarLink,
) -> Box<dyn KernelComponent> {
    match store_type {
        StoreType::StoreBlockBoundaryAware => {
            Box::new(StoreBlockBoundaryAwareComponent::new(src, dst))
        }
        StoreType::TStoreIndirectWidthSelect => {
            Box::new(StoreIndirectWidthSelectComponent::new(src, dst))
        }
    }
}

pub struct StoreBlockBoundaryAwareComponent {
    id: ComponentId,
    src: SharedVarLink,
    dst: SharedVarLink,
}

impl StoreBlockBoundaryAwareComponent {
    pub fn new(src: SharedVarLink, dst: SharedVarLink) -> Self {
        StoreBlockBoundaryAwareComponent { id: -1, src, dst }
    }
}

impl KernelComponent for StoreBlockBoundaryAwareComponent {
    fn name(&self) -> &'static str {
        "store"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Store
    }

    fn links(&self) -> Vec<SharedVarLink> {
        vec![self.src, self.dst]
    }

    fn allocate_shared_vars(
        &self,
        vtable: &mut SharedVarTable,
        ctx: &CodegenContext<'_>,
    ) -> Result<()> {
        register_link(vtable, ctx, self.src, "acc")?;
        register_link(vtable, ctx, self.dst, "dst")?;
        Ok(())
    }

    fn tag_lut(&self, vtable: &SharedVarTable, ctx: &CodegenContext<'_>) -> Result<TagLut> {
        let dst_name = var_name(vtable, self.dst)?.to_string();
        let info = ctx.tensor_info(self.dst.arg_id)?;

        let mut tags = TagLut::default();
        tags.insert("meta_kernel_id".into(), self.id.to_string());
        tags.insert("src".into(), var_name(vtable, self.src)?.to_string());
        tags.insert("DATA_TYPE".into(), info.dtype.cl_name().to_string());
        tags.insert(
            "dst_z_offset".into(),
            z_offset_fragment(&dst_name, info),
        );
        tags.insert("dst".into(), dst_name);
        Ok(tags)
    }

    fn component_code(&self) -> String {
        String::from(
            r#"
    // IN(src, accum)       {{src}}
    // OUT(dst)             {{dst}}

    // store_{{meta_kernel_id}}
    {
        __global uchar *{{dst}}_addr = {{dst}}_ptr + {{dst}}_offset_first_element_in_bytes + g_x * sizeof({{DATA_TYPE}}) * N0 + g_y * {{dst}}_stride_y * M0{{dst_z_offset}};
        T_STORE_PARTIAL(M0, N0, PARTIAL_STORE_M0, PARTIAL_STORE_N0, g_cond_y, g_cond_x, {{DATA_TYPE}}, {{dst}}_addr, {{dst}}_stride_y, {{src}});
    }
"#,
        )
    }

    fn headers(&self) -> BTreeSet<String> {
        BTreeSet::from(["helpers.h".to_string(), "tile_helpers.h".to_string()])
    }

    fn id(&self) -> ComponentId {
        self.id
    }

    fn assign_id(&mut self, id: ComponentId) {
        self.id = id;
    }
}

pub struct StoreIndirectWidthSelectComponent {
    id: ComponentId,
    src: SharedVarLink,
    dst: SharedVarLink,
}

impl StoreIndirectWidthSelectComponent {
    pub fn new(src: SharedVarLink, dst: SharedVarLink) -> Self {
        StoreIndirectWidthSelectComponent { id: -1, src, dst }
    }
}

impl KernelComponent for StoreIndirectWidthSelectComponent {
    fn name(&self) -> &'static str {
        "store"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Store
    }

    fn links(&self) -> Vec<SharedVarLink> {
        vec![self.src, self.dst]
    }

    fn allocate_shared_vars(
        &self,
        vtable: &mut SharedVarTable,
        ctx: &CodegenContext<'_>,
    ) -> Result<()> {
        register_link(vtable, ctx, self.src, "acc")?;
        register_link(vtable, ctx, self.dst, "dst")?;
        Ok(())
    }

    fn tag_lut(&self, vtable: &SharedVarTable, ctx: &CodegenContext<'_>) -> Result<TagLut> {
        let info = ctx.tensor_info(self.dst.arg_id)?;

        let mut tags = TagLut::default();
        tags.insert("meta_kernel_id".into(), self.id.to_string());
        tags.insert("src".into(), var_name(vtable, self.src)?.to_string());
        tags.insert("dst".into(), var_name(vtable, self.dst)?.to_string());
        tags.insert("DATA_TYPE".into(), info.dtype.cl_name().to_string());
        tags.insert("dst_h".into(), info.shape.y().to_string());
        Ok(tags)
    }

    fn component_code(&self) -> String {
        String::from(
            r#"
    // IN(src, accum)       {{src}}
    // OUT(dst)             {{dst}}

    // store_{{meta_kernel_id}}
    {
        TILE(uint, M0, 1, {{dst}}_indirect_y);
        LOOP_UNROLLING(int, i, 0, 1, M0,
        {
            {{dst}}_indirect_y[i].v = min((int)(g_y * M0 + i), (int)({{dst_h}}) - 1);
        })
        T_STORE_INDIRECT_WIDTH_SELECT({{DATA_TYPE}}, M0, N0, PARTIAL_STORE_N0, BUFFER, {{dst}}, g_x * N0, {{dst}}_stride_y, g_cond_x, {{src}}, {{dst}}_indirect_y);
    }
"#,
        )
    }

    fn headers(&self) -> BTreeSet<String> {
        BTreeSet::from(["helpers.h".to_string(), "tile_helpers.h".to_string()])
    }

    fn id(&self) -> ComponentId {
        self.id
    }

    fn assign_id(&mut self, id: ComponentId) {
        self.id = id;
    }
}
