//! Direct 2-D convolution over NHWC tensors, the shape-determining component
//! of a fused kernel.
//!
//! Declares the accumulator tile at kernel scope so downstream components can
//! fold further work into it before the store writes it out.

use std::collections::BTreeSet;

use crate::blueprint::vtable::{SharedVarLink, SharedVarTable};
use crate::blueprint::BuildOptions;
use crate::error::Result;
use crate::types::ComponentId;
use crate::window::{ceil_div, Dimension, Window};

use crate::tensor::TensorArgType;

use super::{
    register_link, register_link_as, var_name, CodegenContext, ComponentType, KernelComponent,
    TagLut,
};

/// Padding and stride of a 2-D convolution.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Conv2dDescriptor {
    pub pad_left: usize,
    pub pad_top: usize,
    pub stride_x: usize,
    pub stride_y: usize,
    /// Read the weights through a 2-D image view instead of the raw buffer.
    /// Requires a float weight tensor with a channel count divisible by 4.
    pub export_weights_to_cl_image: bool,
}

impl Default for Conv2dDescriptor {
    fn default() -> Self {
        Conv2dDescriptor {
            pad_left: 0,
            pad_top: 0,
            stride_x: 1,
            stride_y: 1,
            export_weights_to_cl_image: false,
        }
    }
}

pub struct DirectConv2dComponent {
    id: ComponentId,
    desc: Conv2dDescriptor,
    src: SharedVarLink,
    weight: SharedVarLink,
    /// Placeholder when the convolution has no bias.
    bias: SharedVarLink,
    dst: SharedVarLink,
}

impl DirectConv2dComponent {
    pub fn new(
        desc: Conv2dDescriptor,
        src: SharedVarLink,
        weight: SharedVarLink,
        bias: SharedVarLink,
        dst: SharedVarLink,
    ) -> Self {
        DirectConv2dComponent {
            id: -1,
            desc,
            src,
            weight,
            bias,
            dst,
        }
    }

    fn has_bias(&self) -> bool {
        !self.bias.is_placeholder()
    }
}

impl KernelComponent for DirectConv2dComponent {
    fn name(&self) -> &'static str {
        "direct_conv2d"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Complex
    }

    fn links(&self) -> Vec<SharedVarLink> {
        vec![self.src, self.weight, self.bias, self.dst]
    }

    fn allocate_shared_vars(
        &self,
        vtable: &mut SharedVarTable,
        ctx: &CodegenContext<'_>,
    ) -> Result<()> {
        register_link(vtable, ctx, self.src, "src")?;
        let weight_arg = self
            .desc
            .export_weights_to_cl_image
            .then_some(TensorArgType::Image3dExportToClImage2d);
        register_link_as(vtable, ctx, self.weight, "weight", weight_arg)?;
        if self.has_bias() {
            register_link(vtable, ctx, self.bias, "bias")?;
        }
        register_link(vtable, ctx, self.dst, "acc")?;
        Ok(())
    }

    fn tag_lut(&self, vtable: &SharedVarTable, ctx: &CodegenContext<'_>) -> Result<TagLut> {
        let info = ctx.tensor_info(self.dst.arg_id)?;
        let acc = var_name(vtable, self.dst)?.to_string();

        let bias_code = if self.has_bias() {
            let bias = var_name(vtable, self.bias)?;
            format!(
                "        TILE({{dt}}, 1, N0, {bias}_tile);\n\
                 \x20       T_LOAD({{dt}}, 1, N0, BUFFER, {bias}, g_x * N0, 1, 1, 0, {bias}_tile);\n\
                 \x20       T_ELTWISE_BROADCAST_ADD_X({{dt}}, M0, N0, {acc}, {bias}_tile, {acc});\n"
            )
            .replace("{dt}", info.dtype.cl_name())
        } else {
            String::new()
        };

        let mut tags = TagLut::default();
        tags.insert("meta_kernel_id".into(), self.id.to_string());
        tags.insert("src".into(), var_name(vtable, self.src)?.to_string());
        tags.insert("weight".into(), var_name(vtable, self.weight)?.to_string());
        tags.insert("acc".into(), acc);
        tags.insert("DATA_TYPE".into(), info.dtype.cl_name().to_string());
        tags.insert(
            "WEI_TENSOR_TYPE".into(),
            if self.desc.export_weights_to_cl_image {
                "IMAGE".to_string()
            } else {
                "BUFFER".to_string()
            },
        );
        tags.insert("bias_add".into(), bias_code);
        Ok(tags)
    }

    fn component_code(&self) -> String {
        String::from(
            r#"
    // IN_0(src)            {{src}}
    // IN_1(weight)         {{weight}}
    // OUT(dst, accum)      {{acc}}

    // Initialize the accumulator tile, direct_conv2d_{{meta_kernel_id}}
    TILE({{DATA_TYPE}}, M0, N0, {{acc}});
    {
        LOOP_UNROLLING(int, i, 0, 1, M0,
        {
            {{acc}}[i].v = 0;
        })

        // g_x walks channel tiles, g_y width tiles, g_z output rows.
        int x_off = g_y * M0 * STRIDE_X - PAD_LEFT;
        int y_off = g_z * STRIDE_Y - PAD_TOP;

        for(int y = 0; y < WEI_HEIGHT; ++y)
        {
            for(int x = 0; x < WEI_WIDTH; ++x)
            {
                int ck = 0;
                for(; ck <= (SRC_CHANNELS - K0); ck += K0)
                {
                    TILE({{DATA_TYPE}}, M0, K0, {{src}}_tile);
                    TILE({{DATA_TYPE}}, N0, K0, {{weight}}_tile);
                    T_LOAD_NHWC_INDIRECT({{DATA_TYPE}}, M0, K0, BUFFER, {{src}}, 0, y_off + y, x_off + x * STRIDE_X, ck, SRC_WIDTH, SRC_HEIGHT, {{src}}_stride_y, {{src}}_tile);
                    T_LOAD({{DATA_TYPE}}, N0, K0, {{WEI_TENSOR_TYPE}}, {{weight}}, ck, g_x * N0 * WEI_STRIDE_W + (x + y * WEI_WIDTH) * SRC_CHANNELS, 1, {{weight}}_stride_y, {{weight}}_tile);
                    T_MMUL({{DATA_TYPE}}, {{DATA_TYPE}}, {{DATA_TYPE}}, M0, N0, K0, NT, T, {{src}}_tile, {{weight}}_tile, {{acc}});
                }
            }
        }
{{bias_add}}    }
"#,
        )
    }

    fn headers(&self) -> BTreeSet<String> {
        BTreeSet::from(["helpers.h".to_string(), "tile_helpers.h".to_string()])
    }

    /// One work item per N0 x M0 output tile: x walks channel tiles, y width
    /// tiles, z output rows; batches slice on the fourth dimension.
    fn window(&self, ctx: &CodegenContext<'_>) -> Result<Window> {
        let dst = ctx.tensor_info(self.dst.arg_id)?;
        let tile = ctx.tile();
        let (n0, m0) = if tile.is_empty() {
            (1, 1)
        } else {
            (tile.n0, tile.m0)
        };
        let mut window = Window::new();
        window.set(
            0,
            Dimension::new(0, ceil_div(dst.shape.x(), n0) as i32, 1),
        );
        window.set(
            1,
            Dimension::new(0, ceil_div(dst.shape.y(), m0) as i32, 1),
        );
        window.set(2, Dimension::new(0, dst.shape.z().max(1) as i32, 1));
        window.set(3, Dimension::new(0, dst.shape.w().max(1) as i32, 1));
        Ok(window)
    }

    fn build_options(&self, ctx: &CodegenContext<'_>) -> BuildOptions {
        let mut opts = BuildOptions::new();
        let (Ok(src), Ok(weight), Ok(dst)) = (
            ctx.tensor_info(self.src.arg_id),
            ctx.tensor_info(self.weight.arg_id),
            ctx.tensor_info(self.dst.arg_id),
        ) else {
            return opts;
        };
        opts.add(format!("-DSRC_WIDTH={}", src.shape.y()));
        opts.add(format!("-DSRC_HEIGHT={}", src.shape.z()));
        opts.add(format!("-DSRC_CHANNELS={}", src.shape.x()));
        opts.add(format!("-DWEI_WIDTH={}", weight.shape.y()));
        opts.add(format!("-DWEI_HEIGHT={}", weight.shape.z()));
        opts.add(format!(
            "-DWEI_STRIDE_W={}",
            weight.shape.x() * weight.shape.y() * weight.shape.z()
        ));
        opts.add(format!("-DDST_WIDTH={}", dst.shape.y()));
        opts.add(format!("-DDST_HEIGHT={}", dst.shape.z()));
        opts.add(format!("-DDST_CHANNELS={}", dst.shape.x()));
        opts.add(format!("-DSTRIDE_X={}", self.desc.stride_x));
        opts.add(format!("-DSTRIDE_Y={}", self.desc.stride_y));
        opts.add(format!("-DPAD_LEFT={}", self.desc.pad_left));
        opts.add(format!("-DPAD_TOP={}", self.desc.pad_top));
        opts.add(format!("-DK0={}", src.shape.x().min(4)));
        opts.add_if(self.has_bias(), "-DHAS_BIAS");
        opts
    }

    fn config_id(&self, ctx: &CodegenContext<'_>) -> String {
        match ctx.tensor_info(self.dst.arg_id) {
            Ok(dst) => format!(
                "conv_{}_{}x{}x{}_s{}x{}",
                dst.dtype,
                dst.shape.x(),
                dst.shape.y(),
                dst.shape.z(),
                self.desc.stride_x,
                self.desc.stride_y
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::vtable::{SharedVarGroup, SharedVarIo};
    use crate::dtype::DType;
    use crate::tensor::{TensorInfo, TensorShape};
    use crate::window::{ClippingStrategy, TileDescriptor};
    use rustc_hash::FxHashMap;

    fn ctx_data() -> (
        FxHashMap<i32, TensorInfo>,
        FxHashMap<i32, SharedVarGroup>,
        TileDescriptor,
    ) {
        let mut tensors = FxHashMap::default();
        tensors.insert(0, TensorInfo::new(TensorShape::new(&[5, 7, 6]), DType::F32));
        tensors.insert(
            1,
            TensorInfo::new(TensorShape::new(&[5, 3, 3, 4]), DType::F32),
        );
        tensors.insert(2, TensorInfo::new(TensorShape::new(&[4]), DType::F32));
        tensors.insert(3, TensorInfo::new(TensorShape::new(&[4, 7, 6]), DType::F32));
        let mut groups = FxHashMap::default();
        groups.insert(0, SharedVarGroup::Argument);
        groups.insert(1, SharedVarGroup::Argument);
        groups.insert(2, SharedVarGroup::Argument);
        groups.insert(3, SharedVarGroup::Automatic);
        let tile = TileDescriptor::new(4, 2, 4, 42, ClippingStrategy::TopLeft);
        (tensors, groups, tile)
    }

    fn component() -> DirectConv2dComponent {
        DirectConv2dComponent::new(
            Conv2dDescriptor::default(),
            SharedVarLink::new(0, SharedVarIo::Input),
            SharedVarLink::new(1, SharedVarIo::Input),
            SharedVarLink::new(2, SharedVarIo::Input),
            SharedVarLink::new(3, SharedVarIo::Output),
        )
    }

    #[test]
    fn window_tiles_the_output_plane() {
        let (tensors, groups, tile) = ctx_data();
        let ctx = CodegenContext::new(&tensors, &groups, &tile);
        let w = component().window(&ctx).unwrap();
        // dst 4x7x6 with n0 = 4, m0 = 2: 1 tile across channels, 4 width
        // tiles, 6 output rows.
        assert_eq!(w.global_work_size(), [1, 4, 6]);
    }

    #[test]
    fn build_options_describe_all_shapes() {
        let (tensors, groups, tile) = ctx_data();
        let ctx = CodegenContext::new(&tensors, &groups, &tile);
        let opts = component().build_options(&ctx);
        assert!(opts.contains("-DSRC_CHANNELS=5"));
        assert!(opts.contains("-DWEI_WIDTH=3"));
        assert!(opts.contains("-DDST_CHANNELS=4"));
        assert!(opts.contains("-DHAS_BIAS"));
    }

    #[test]
    fn weights_can_be_read_through_a_cl_image_view() {
        let (tensors, groups, tile) = ctx_data();
        let ctx = CodegenContext::new(&tensors, &groups, &tile);
        let comp = DirectConv2dComponent::new(
            Conv2dDescriptor {
                export_weights_to_cl_image: true,
                ..Default::default()
            },
            SharedVarLink::new(0, SharedVarIo::Input),
            SharedVarLink::new(1, SharedVarIo::Input),
            SharedVarLink::new(2, SharedVarIo::Input),
            SharedVarLink::new(3, SharedVarIo::Output),
        );

        let mut vtable = SharedVarTable::new();
        comp.allocate_shared_vars(&mut vtable, &ctx).unwrap();
        let weight = vtable
            .get(SharedVarLink::new(1, SharedVarIo::Input))
            .unwrap();
        assert_eq!(
            weight.desc.arg_type,
            TensorArgType::Image3dExportToClImage2d
        );

        let tags = comp.tag_lut(&vtable, &ctx).unwrap();
        assert_eq!(tags["WEI_TENSOR_TYPE"], "IMAGE");

        // Default marshaling stays on the raw buffer.
        let tags = component_tags(&ctx);
        assert_eq!(tags["WEI_TENSOR_TYPE"], "BUFFER");
    }

    fn component_tags(ctx: &CodegenContext<'_>) -> TagLut {
        let comp = component();
        let mut vtable = SharedVarTable::new();
        comp.allocate_shared_vars(&mut vtable, ctx).unwrap();
        comp.tag_lut(&vtable, ctx).unwrap()
    }

    #[test]
    fn bias_is_optional() {
        let (tensors, groups, tile) = ctx_data();
        let ctx = CodegenContext::new(&tensors, &groups, &tile);
        let comp = DirectConv2dComponent::new(
            Conv2dDescriptor::default(),
            SharedVarLink::new(0, SharedVarIo::Input),
            SharedVarLink::new(1, SharedVarIo::Input),
            SharedVarLink::placeholder(),
            SharedVarLink::new(3, SharedVarIo::Output),
        );
        let opts = comp.build_options(&ctx);
        assert!(!opts.contains("-DHAS_BIAS"));

        let mut vtable = SharedVarTable::new();
        comp.allocate_shared_vars(&mut vtable, &ctx).unwrap();
        let tags = comp.tag_lut(&vtable, &ctx).unwrap();
        assert!(tags["bias_add"].is_empty());
    }
}
