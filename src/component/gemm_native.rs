//! Non-transposed matrix multiplication, the alternative shape-determining
//! component.

use std::collections::BTreeSet;

use crate::blueprint::vtable::{SharedVarLink, SharedVarTable};
use crate::blueprint::BuildOptions;
use crate::error::Result;
use crate::types::ComponentId;
use crate::window::{ceil_div, Dimension, Window};

use super::{
    register_link, var_name, CodegenContext, ComponentType, KernelComponent, TagLut,
};

/// Problem shape and tiling of `dst = alpha * lhs * rhs + beta * bias`.
///
/// `m0`/`n0`/`k0` are the per-work-item tile extents; `m0` and `n0` should
/// agree with the blueprint's [`crate::window::TileDescriptor`].
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct GemmNativeDescriptor {
    pub alpha: f32,
    pub beta: f32,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub m0: usize,
    pub n0: usize,
    pub k0: usize,
}

pub struct GemmNativeComponent {
    id: ComponentId,
    desc: GemmNativeDescriptor,
    lhs: SharedVarLink,
    rhs: SharedVarLink,
    /// Placeholder when beta is unused.
    bias: SharedVarLink,
    dst: SharedVarLink,
}

impl GemmNativeComponent {
    pub fn new(
        desc: GemmNativeDescriptor,
        lhs: SharedVarLink,
        rhs: SharedVarLink,
        bias: SharedVarLink,
        dst: SharedVarLink,
    ) -> Self {
        GemmNativeComponent {
            id: -1,
            desc,
            lhs,
            rhs,
            bias,
            dst,
        }
    }

    fn has_bias(&self) -> bool {
        !self.bias.is_placeholder()
    }
}

impl KernelComponent for GemmNativeComponent {
    fn name(&self) -> &'static str {
        "gemm_native"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Complex
    }

    fn links(&self) -> Vec<SharedVarLink> {
        vec![self.lhs, self.rhs, self.bias, self.dst]
    }

    fn allocate_shared_vars(
        &self,
        vtable: &mut SharedVarTable,
        ctx: &CodegenContext<'_>,
    ) -> Result<()> {
        register_link(vtable, ctx, self.lhs, "lhs")?;
        register_link(vtable, ctx, self.rhs, "rhs")?;
        if self.has_bias() {
            register_link(vtable, ctx, self.bias, "bias")?;
        }
        register_link(vtable, ctx, self.dst, "acc")?;
        Ok(())
    }

    fn tag_lut(&self, vtable: &SharedVarTable, ctx: &CodegenContext<'_>) -> Result<TagLut> {
        let info = ctx.tensor_info(self.dst.arg_id)?;
        let acc = var_name(vtable, self.dst)?.to_string();

        let beta_code = if self.has_bias() && self.desc.beta != 0.0 {
            let bias = var_name(vtable, self.bias)?;
            format!(
                "        TILE({dt}, M0, N0, {bias}_tile);\n\
                 \x20       T_LOAD({dt}, M0, N0, BUFFER, {bias}, g_x * N0, g_y * M0, 1, {bias}_stride_y, {bias}_tile);\n\
                 \x20       LOOP_UNROLLING(int, i, 0, 1, M0,\n\
                 \x20       {{\n\
                 \x20           {acc}[i].v += (({dt})BETA) * {bias}_tile[i].v;\n\
                 \x20       }})\n",
                dt = info.dtype.cl_name()
            )
        } else {
            String::new()
        };

        let mut tags = TagLut::default();
        tags.insert("meta_kernel_id".into(), self.id.to_string());
        tags.insert("lhs".into(), var_name(vtable, self.lhs)?.to_string());
        tags.insert("rhs".into(), var_name(vtable, self.rhs)?.to_string());
        tags.insert("acc".into(), acc);
        tags.insert("DATA_TYPE".into(), info.dtype.cl_name().to_string());
        tags.insert("beta_add".into(), beta_code);
        Ok(tags)
    }

    fn component_code(&self) -> String {
        String::from(
            r#"
    // IN_0(lhs)            {{lhs}}
    // IN_1(rhs)            {{rhs}}
    // OUT(dst, accum)      {{acc}}

    // Initialize the accumulator tile, gemm_native_{{meta_kernel_id}}
    TILE({{DATA_TYPE}}, M0, N0, {{acc}});
    {
        LOOP_UNROLLING(int, i, 0, 1, M0,
        {
            {{acc}}[i].v = 0;
        })

        int k = 0;
        for(; k <= (K - K0); k += K0)
        {
            TILE({{DATA_TYPE}}, M0, K0, {{lhs}}_tile);
            TILE({{DATA_TYPE}}, N0, K0, {{rhs}}_tile);
            T_LOAD({{DATA_TYPE}}, M0, K0, BUFFER, {{lhs}}, k, g_y * M0, 1, {{lhs}}_stride_y, {{lhs}}_tile);
            T_LOAD({{DATA_TYPE}}, N0, K0, BUFFER, {{rhs}}, g_x * N0, k, 1, {{rhs}}_stride_y, {{rhs}}_tile);
            T_MMUL({{DATA_TYPE}}, {{DATA_TYPE}}, {{DATA_TYPE}}, M0, N0, K0, NT, T, {{lhs}}_tile, {{rhs}}_tile, {{acc}});
        }

#if defined(ALPHA)
        LOOP_UNROLLING(int, i, 0, 1, M0,
        {
            {{acc}}[i].v *= ({{DATA_TYPE}})ALPHA;
        })
#endif // defined(ALPHA)
{{beta_add}}    }
"#,
        )
    }

    fn headers(&self) -> BTreeSet<String> {
        BTreeSet::from(["helpers.h".to_string(), "tile_helpers.h".to_string()])
    }

    fn window(&self, ctx: &CodegenContext<'_>) -> Result<Window> {
        let dst = ctx.tensor_info(self.dst.arg_id)?;
        let n0 = self.desc.n0.max(1);
        let m0 = self.desc.m0.max(1);
        let mut window = Window::new();
        window.set(0, Dimension::new(0, ceil_div(self.desc.n, n0) as i32, 1));
        window.set(1, Dimension::new(0, ceil_div(self.desc.m, m0) as i32, 1));
        window.set(2, Dimension::new(0, dst.shape.z().max(1) as i32, 1));
        Ok(window)
    }

    fn build_options(&self, _ctx: &CodegenContext<'_>) -> BuildOptions {
        let mut opts = BuildOptions::new();
        opts.add(format!("-DM={}", self.desc.m));
        opts.add(format!("-DN={}", self.desc.n));
        opts.add(format!("-DK={}", self.desc.k));
        opts.add(format!("-DK0={}", self.desc.k0));
        if self.desc.alpha != 1.0 {
            opts.add(format!("-DALPHA={}", self.desc.alpha));
        }
        if self.has_bias() && self.desc.beta != 0.0 {
            opts.add(format!("-DBETA={}", self.desc.beta));
        }
        opts
    }

    fn config_id(&self, ctx: &CodegenContext<'_>) -> String {
        match ctx.tensor_info(self.dst.arg_id) {
            Ok(dst) => format!(
                "gemm_{}_{}x{}x{}",
                dst.dtype, self.desc.m, self.desc.n, self.desc.k
            ),
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
