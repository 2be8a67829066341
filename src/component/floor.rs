//! Element-wise floor on the accumulator tile or a memory operand.

use std::collections::BTreeSet;

use crate::blueprint::vtable::{SharedVarGroup, SharedVarLink, SharedVarTable};
use crate::error::Result;
use crate::types::ComponentId;

use super::{
    register_link, tile_load_fragment, var_name, CodegenContext, KernelComponent, TagLut,
};

pub struct FloorComponent {
    id: ComponentId,
    src: SharedVarLink,
    dst: SharedVarLink,
}

impl FloorComponent {
    pub fn new(src: SharedVarLink, dst: SharedVarLink) -> Self {
        FloorComponent { id: -1, src, dst }
    }
}

impl KernelComponent for FloorComponent {
    fn name(&self) -> &'static str {
        "floor"
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

        // When the input already lives in registers the floor runs in place;
        // the accumulator tile was declared by the producing component. When
        // the input is a memory operand this component is the accumulator's
        // creator and declares it.
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
        Ok(tags)
    }

    fn component_code(&self) -> String {
        String::from(
            r#"
    // IN(src)              {{src}}
    // OUT(dst, accum)      {{dst}}

    // {{dst}} = floor({{src}}), floor_{{meta_kernel_id}}
{{acc_decl}}    {
{{load_src}}
        LOOP_UNROLLING(int, m0, 0, 1, M0,
        {
            {{dst}}[m0].v = floor({{src_expr}});
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
            Ok(info) => format!("floor_{}", info.dtype),
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
