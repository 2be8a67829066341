//! Element-wise addition of a tensor operand onto a tile.
//!
//! Either side may be the live accumulator tile of a preceding component; a
//! memory operand is loaded boundary-aware, a single-element operand is
//! broadcast.

use std::collections::BTreeSet;

use crate::blueprint::vtable::{SharedVarLink, SharedVarTable};
use crate::blueprint::BuildOptions;
use crate::error::Result;
use crate::tensor::TensorInfo;
use crate::types::ComponentId;

use super::{
    register_link, tile_load_fragment, var_name, CodegenContext, KernelComponent, TagLut,
};
use crate::blueprint::vtable::SharedVarGroup;

/// Overflow handling for integer addition.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ConvertPolicy {
    /// Results wrap around on overflow.
    #[default]
    Wrap,
    /// Results saturate to the type's range.
    Saturate,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct EltwiseAddDescriptor {
    pub convert_policy: ConvertPolicy,
}

pub struct EltwiseAddComponent {
    id: ComponentId,
    desc: EltwiseAddDescriptor,
    lhs: SharedVarLink,
    rhs: SharedVarLink,
    dst: SharedVarLink,
}

impl EltwiseAddComponent {
    pub fn new(
        desc: EltwiseAddDescriptor,
        lhs: SharedVarLink,
        rhs: SharedVarLink,
        dst: SharedVarLink,
    ) -> Self {
        EltwiseAddComponent {
            id: -1,
            desc,
            lhs,
            rhs,
            dst,
        }
    }

    /// Load fragment and tile expression for one input operand.
    ///
    /// An `Automatic` operand is already live in registers; a single-element
    /// memory operand becomes a broadcast scalar; any other memory operand is
    /// loaded as an M0 x N0 block with boundary handling.
    fn operand(
        &self,
        vtable: &SharedVarTable,
        ctx: &CodegenContext<'_>,
        link: SharedVarLink,
    ) -> Result<(String, String)> {
        let name = var_name(vtable, link)?.to_string();
        if ctx.group(link.arg_id) == SharedVarGroup::Automatic {
            return Ok((String::new(), format!("{name}[m0].v")));
        }
        let info = ctx.tensor_info(link.arg_id)?;
        let dt = info.dtype.cl_name();
        if info.shape.num_elements() == 1 {
            let load = format!(
                "    {dt} {name}_data = *(__global {dt} *)({name}_ptr + {name}_offset_first_element_in_bytes);\n"
            );
            return Ok((load, format!("{name}_data")));
        }
        Ok(tile_load_fragment(&name, info, "    "))
    }

    fn dst_info<'a>(&self, ctx: &'a CodegenContext<'_>) -> Result<&'a TensorInfo> {
        ctx.tensor_info(self.dst.arg_id)
    }
}

impl KernelComponent for EltwiseAddComponent {
    fn name(&self) -> &'static str {
        "eltwise_add"
    }

    fn links(&self) -> Vec<SharedVarLink> {
        vec![self.lhs, self.rhs, self.dst]
    }

    fn allocate_shared_vars(
        &self,
        vtable: &mut SharedVarTable,
        ctx: &CodegenContext<'_>,
    ) -> Result<()> {
        register_link(vtable, ctx, self.lhs, "lhs")?;
        register_link(vtable, ctx, self.rhs, "addend")?;
        register_link(vtable, ctx, self.dst, "acc")?;
        Ok(())
    }

    fn tag_lut(&self, vtable: &SharedVarTable, ctx: &CodegenContext<'_>) -> Result<TagLut> {
        let info = self.dst_info(ctx)?;
        let (lhs_load, lhs_expr) = self.operand(vtable, ctx, self.lhs)?;
        let (rhs_load, rhs_expr) = self.operand(vtable, ctx, self.rhs)?;

        let saturating = self.desc.convert_policy == ConvertPolicy::Saturate
            && !matches!(
                info.dtype,
                crate::dtype::DType::F16 | crate::dtype::DType::F32
            );
        let sum = if saturating {
            format!("add_sat({lhs_expr}, {rhs_expr})")
        } else {
            format!("{lhs_expr} + {rhs_expr}")
        };

        // When neither input is already live in registers this component
        // creates the accumulator and must declare its tile.
        let dst_name = var_name(vtable, self.dst)?.to_string();
        let creates_acc = ctx.group(self.dst.arg_id) == SharedVarGroup::Automatic
            && ctx.group(self.lhs.arg_id) != SharedVarGroup::Automatic
            && ctx.group(self.rhs.arg_id) != SharedVarGroup::Automatic;
        let acc_decl = if creates_acc {
            format!("    TILE({}, M0, N0, {dst_name});\n", info.dtype.cl_name())
        } else {
            String::new()
        };

        let mut tags = TagLut::default();
        tags.insert("meta_kernel_id".into(), self.id.to_string());
        tags.insert("lhs".into(), var_name(vtable, self.lhs)?.to_string());
        tags.insert("rhs".into(), var_name(vtable, self.rhs)?.to_string());
        tags.insert("dst".into(), dst_name);
        tags.insert("acc_decl".into(), acc_decl);
        tags.insert("DATA_TYPE".into(), info.dtype.cl_name().to_string());
        tags.insert("load_lhs".into(), lhs_load);
        tags.insert("load_rhs".into(), rhs_load);
        tags.insert("sum".into(), sum);
        Ok(tags)
    }

    fn component_code(&self) -> String {
        String::from(
            r#"
    // IN_0(lhs)            {{lhs}}
    // IN_1(rhs)            {{rhs}}
    // OUT(dst, accum)      {{dst}}

    // {{dst}} = {{lhs}} + {{rhs}} (boundary aware)
    // eltwise_add_{{meta_kernel_id}}
{{acc_decl}}    {
{{load_lhs}}{{load_rhs}}
        LOOP_UNROLLING(int, m0, 0, 1, M0,
        {
            {{dst}}[m0].v = {{sum}};
        })
    }
"#,
        )
    }

    fn headers(&self) -> BTreeSet<String> {
        BTreeSet::from(["helpers.h".to_string(), "tile_helpers.h".to_string()])
    }

    fn build_options(&self, _ctx: &CodegenContext<'_>) -> BuildOptions {
        BuildOptions::default()
    }

    fn config_id(&self, ctx: &CodegenContext<'_>) -> String {
        match self.dst_info(ctx) {
            Ok(info) => {
                let policy = match self.desc.convert_policy {
                    ConvertPolicy::Wrap => "wrap",
                    ConvertPolicy::Saturate => "sat",
                };
                format!(
                    "add_{}_{}_{}x{}",
                    policy,
                    info.dtype,
                    info.shape.x(),
                    info.shape.y()
                )
            }
            Err(_) => String::new(),
        }
    }

    fn id(&self) -> ComponentId {
        self.id
    }

    fn assign_id(&mut self, id: ComponentId) {
        self.id = id;
    }
}
