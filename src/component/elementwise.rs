//! Unary element-wise functions applied to the accumulator tile.

use std::collections::BTreeSet;

use crate::blueprint::vtable::{SharedVarGroup, SharedVarLink, SharedVarTable};
use crate::error::Result;
use crate::types::ComponentId;

use super::{
    register_link, tile_load_fragment, var_name, CodegenContext, KernelComponent, TagLut,
};

/// The supported unary functions, each mapping to one OpenCL builtin.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Exp,
    Log,
    Sqrt,
    Rsqrt,
    Tanh,
}

impl UnaryOp {
    fn cl_builtin(&self) -> &'static str {
        match self {
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Rsqrt => "rsqrt",
            UnaryOp::Tanh => "tanh",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Rsqrt => "rsqrt",
            UnaryOp::Tanh => "tanh",
        }
    }
}

pub struct ElementwiseComponent {
    id: ComponentId,
    op: UnaryOp,
    src: SharedVarLink,
    dst: SharedVarLink,
}

impl ElementwiseComponent {
    pub fn new(op: UnaryOp, src: SharedVarLink, dst: SharedVarLink) -> Self {
        ElementwiseComponent {
            id: -1,
            op,
            src,
            dst,
        }
    }
}

impl KernelComponent for ElementwiseComponent {
    fn name(&self) -> &'static str {
        "eltwise_unary"
    }

    fn links(&self) -> Vec<SharedVarLink> {
        vec![self.src, self.dst]
    }

    fn allocate_shared_vars(
        &self,
        vtable: &mut SharedVarTable,
        ctx: &CodegenContext<'_>,
    ) -> Result<()> {
        register_link(vtable, ctx, self.src, "src")?;
        register_link(vtable, ctx, self.dst, "acc")?;
        Ok(())
    }

    fn tag_lut(&self, vtable: &SharedVarTable, ctx: &CodegenContext<'_>) -> Result<TagLut> {
        let dst_name = var_name(vtable, self.dst)?.to_string();
        let info = ctx.tensor_info(self.dst.arg_id)?;
        let dt = info.dtype.cl_name();

        let (decl, load, src_expr) =
            if ctx.group(self.src.arg_id) == SharedVarGroup::Automatic {
                (String::new(), String::new(), format!("{dst_name}[m0].v"))
            } else {
                let src_name = var_name(vtable, self.src)?.to_string();
                let src_info = ctx.tensor_info(self.src.arg_id)?;
                let decl = format!("    TILE({dt}, M0, N0, {dst_name});\n");
                let (load, src_expr) = tile_load_fragment(&src_name, src_info, "        ");
                (decl, load, src_expr)
            };

        let mut tags = TagLut::default();
        tags.insert("meta_kernel_id".into(), self.id.to_string());
        tags.insert("src".into(), var_name(vtable, self.src)?.to_string());
        tags.insert("dst".into(), dst_name);
        tags.insert("acc_decl".into(), decl);
        tags.insert("load_src".into(), load);
        tags.insert("src_expr".into(), src_expr);
        tags.insert("UNARY_FN".into(), self.op.cl_builtin().to_string());
        Ok(tags)
    }

    fn component_code(&self) -> String {
        String::from(
            r#"
    // IN(src)              {{src}}
    // OUT(dst, accum)      {{dst}}

    // {{dst}} = {{UNARY_FN}}({{src}}), eltwise_unary_{{meta_kernel_id}}
{{acc_decl}}    {
{{load_src}}
        LOOP_UNROLLING(int, m0, 0, 1, M0,
        {
            {{dst}}[m0].v = {{UNARY_FN}}({{src_expr}});
        })
    }
"#,
        )
    }

    fn headers(&self) -> BTreeSet<String> {
        BTreeSet::from(["helpers.h".to_string(), "tile_helpers.h".to_string()])
    }

    fn config_id(&self, ctx: &CodegenContext<'_>) -> String {
        match ctx.tensor_info(self.dst.arg_id) {
            Ok(info) => format!("{}_{}", self.op.suffix(), info.dtype),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::vtable::SharedVarIo;
    use crate::component::replace_tags;
    use crate::dtype::DType;
    use crate::tensor::{TensorInfo, TensorShape};
    use crate::window::TileDescriptor;
    use rustc_hash::FxHashMap;

    #[test]
    fn register_input_runs_in_place() {
        let mut tensors = FxHashMap::default();
        tensors.insert(0, TensorInfo::new(TensorShape::new(&[4, 7, 6]), DType::F32));
        tensors.insert(1, TensorInfo::new(TensorShape::new(&[4, 7, 6]), DType::F32));
        let mut groups = FxHashMap::default();
        groups.insert(0, SharedVarGroup::Automatic);
        groups.insert(1, SharedVarGroup::Automatic);
        let tile = TileDescriptor::default();
        let ctx = CodegenContext::new(&tensors, &groups, &tile);

        let comp = ElementwiseComponent::new(
            UnaryOp::Exp,
            SharedVarLink::new(0, SharedVarIo::Input),
            SharedVarLink::new(1, SharedVarIo::Output),
        );
        let mut vtable = SharedVarTable::new();
        vtable
            .add(
                SharedVarLink::new(0, SharedVarIo::Output),
                SharedVarGroup::Automatic,
                crate::tensor::KernelArgDescriptor::new(
                    0,
                    crate::tensor::TensorArgType::Image3d,
                    true,
                ),
                "acc",
            )
            .unwrap();
        comp.allocate_shared_vars(&mut vtable, &ctx).unwrap();
        let tags = comp.tag_lut(&vtable, &ctx).unwrap();
        let code = replace_tags(&comp.component_code(), &tags).unwrap();
        assert!(code.contains("acc_0[m0].v = exp(acc_0[m0].v);"));
        assert!(!code.contains("TILE(float, M0, N0, acc_0);"));
    }
}
