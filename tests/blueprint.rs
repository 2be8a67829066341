//! End-to-end blueprint construction and code generation.

use clfuse::blueprint::vtable::{SharedVarIo, SharedVarLink};
use clfuse::component::{
    Conv2dDescriptor, DirectConv2dComponent, EltwiseAddComponent, EltwiseAddDescriptor,
    StoreBlockBoundaryAwareComponent,
};
use clfuse::{
    Blueprint, ClippingStrategy, DType, KernelCode, TensorInfo, TensorShape, TileDescriptor,
};

fn input(id: i32) -> SharedVarLink {
    SharedVarLink::new(id, SharedVarIo::Input)
}

fn output(id: i32) -> SharedVarLink {
    SharedVarLink::new(id, SharedVarIo::Output)
}

fn info(dims: &[usize]) -> TensorInfo {
    TensorInfo::new(TensorShape::new(dims), DType::F32)
}

/// conv2d -> eltwise_add -> store, the canonical three-component fusion.
fn conv_add_store() -> (Blueprint, KernelCode, [i32; 7]) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut bp = Blueprint::new();
    let src = bp.add_tensor(info(&[5, 7, 6]), None).unwrap();
    let weight = bp.add_tensor(info(&[5, 3, 3, 4]), None).unwrap();
    let bias = bp.add_tensor(info(&[4]), None).unwrap();
    let conv_dst = bp.add_tensor(info(&[4, 7, 6]), None).unwrap();
    let addend = bp.add_tensor(info(&[1, 1]), None).unwrap();
    let add_dst = bp.add_tensor(info(&[4, 7, 6]), None).unwrap();
    let dst = bp.add_tensor(info(&[4, 7, 6]), None).unwrap();

    bp.set_tile_info(TileDescriptor::new(4, 2, 4, 7, ClippingStrategy::TopLeft))
        .unwrap();
    bp.add_component(Box::new(DirectConv2dComponent::new(
        Conv2dDescriptor::default(),
        input(src),
        input(weight),
        input(bias),
        output(conv_dst),
    )))
    .unwrap();
    bp.add_component(Box::new(EltwiseAddComponent::new(
        EltwiseAddDescriptor::default(),
        input(conv_dst),
        input(addend),
        output(add_dst),
    )))
    .unwrap();
    bp.add_component(Box::new(StoreBlockBoundaryAwareComponent::new(
        input(add_dst),
        output(dst),
    )))
    .unwrap();

    bp.finalize().unwrap();
    assert_eq!(bp.dst_id(), Some(dst));
    let code = bp.build().unwrap();
    (bp, code, [src, weight, bias, conv_dst, addend, add_dst, dst])
}

#[test]
fn fused_kernel_name_joins_components() {
    let (_, code, _) = conv_add_store();
    assert_eq!(code.name, "direct_conv2d___eltwise_add___store");
    assert!(code.config_id.starts_with("direct_conv2d___eltwise_add___store--"));
}

#[test]
fn arguments_follow_first_encounter_order() {
    let (_, code, [src, weight, bias, _, addend, _, dst]) = conv_add_store();
    let ids: Vec<i32> = code.arguments.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![src, weight, bias, addend, dst]);

    // Names are derived from the encounter index, the accumulator claiming
    // index 3 between bias and addend.
    assert!(code.code.contains("IMAGE_DECLARATION(src_0),\n    uint src_0_stride_z"));
    assert!(code.code.contains("TENSOR4D_DECLARATION(weight_1)"));
    assert!(code.code.contains("VECTOR_DECLARATION(bias_2)"));
    assert!(code.code.contains("IMAGE_DECLARATION(addend_4)"));
    assert!(code.code.contains("uint dst_5_stride_z"));
}

#[test]
fn accumulator_is_declared_once_and_shared() {
    let (_, code, _) = conv_add_store();
    let decl = "TILE(float, M0, N0, acc_3);";
    let first = code.code.find(decl).expect("accumulator declaration");
    assert_eq!(code.code[first + decl.len()..].find(decl), None);

    // The add writes the same tile the conv produced and the store reads.
    assert!(code.code.contains("acc_3[m0].v ="));
    assert!(code.code.contains("T_STORE_PARTIAL(M0, N0, PARTIAL_STORE_M0, PARTIAL_STORE_N0, g_cond_y, g_cond_x, float, dst_5_addr, dst_5_stride_y, acc_3);"));
}

#[test]
fn bodies_are_emitted_producer_first() {
    let (_, code, _) = conv_add_store();
    let conv = code.code.find("Initialize the accumulator tile").unwrap();
    let add = code.code.find("(boundary aware)").unwrap();
    let store = code.code.find("T_STORE_PARTIAL").unwrap();
    assert!(conv < add && add < store);
    assert!(!code.code.contains("{{"), "unresolved template tags remain");
}

#[test]
fn global_section_and_tile_options_match_the_tile() {
    let (_, code, _) = conv_add_store();
    assert!(code.code.contains("uint g_x = get_global_id(0);"));
    assert!(code.code.contains("const bool g_cond_x = (g_x == 0);"));
    assert!(code.code.contains("REPEAT_VAR_INIT_TO_CONST(M0, uint, g_zout, 0);"));

    assert!(code.build_options.contains("-DN0=4"));
    assert!(code.build_options.contains("-DM0=2"));
    assert!(code.build_options.contains("-DPARTIAL_STORE_N0=0"));
    assert!(code.build_options.contains("-DPARTIAL_STORE_M0=1"));
    assert!(code.build_options.contains("-DSRC_CHANNELS=5"));
    assert!(code.build_options.contains("-DHAS_BIAS"));
}

#[test]
fn window_comes_from_the_complex_component() {
    let (_, code, _) = conv_add_store();
    // dst 4x7x6, n0 = 4, m0 = 2.
    assert_eq!(code.window.global_work_size(), [1, 4, 6]);
    assert_eq!(code.window.slices_3d().len(), 1);
}

#[test]
fn built_blueprint_rejects_further_work() {
    let (mut bp, _, _) = conv_add_store();
    assert!(bp.build().is_err());
    assert!(bp.add_tensor(info(&[1]), None).is_err());
}

#[test]
fn add_and_store_without_complex_component() {
    let mut bp = Blueprint::new();
    let lhs = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let rhs = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let sum = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let dst = bp.add_tensor(info(&[8, 8]), None).unwrap();
    bp.set_tile_info(TileDescriptor::new(4, 4, 8, 8, ClippingStrategy::TopLeft))
        .unwrap();
    bp.add_component(Box::new(EltwiseAddComponent::new(
        EltwiseAddDescriptor::default(),
        input(lhs),
        input(rhs),
        output(sum),
    )))
    .unwrap();
    bp.add_component(Box::new(StoreBlockBoundaryAwareComponent::new(
        input(sum),
        output(dst),
    )))
    .unwrap();
    bp.finalize().unwrap();
    let code = bp.build().unwrap();

    assert_eq!(code.name, "eltwise_add___store");
    // With no producing component, the add declares the accumulator itself.
    assert!(code.code.contains("TILE(float, M0, N0, acc_2);"));
    let ids: Vec<i32> = code.arguments.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![lhs, rhs, dst]);
}

#[test]
fn rank1_addend_generates_no_row_stride_reference() {
    let mut bp = Blueprint::new();
    let lhs = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let rhs = bp.add_tensor(info(&[8]), None).unwrap();
    let sum = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let dst = bp.add_tensor(info(&[8, 8]), None).unwrap();
    bp.set_tile_info(TileDescriptor::new(4, 4, 8, 8, ClippingStrategy::TopLeft))
        .unwrap();
    bp.add_component(Box::new(EltwiseAddComponent::new(
        EltwiseAddDescriptor::default(),
        input(lhs),
        input(rhs),
        output(sum),
    )))
    .unwrap();
    bp.add_component(Box::new(StoreBlockBoundaryAwareComponent::new(
        input(sum),
        output(dst),
    )))
    .unwrap();
    bp.finalize().unwrap();
    let code = bp.build().unwrap();

    // The vector declaration carries no stride_y, so the generated body must
    // not dereference one.
    assert!(code.code.contains("VECTOR_DECLARATION(addend_1)"));
    assert!(!code.code.contains("addend_1_stride_y"));
    assert!(code.code.contains("addend_1_tile[0].v"));
}

#[test]
fn exported_weights_are_declared_as_an_image_view() {
    let mut bp = Blueprint::new();
    let src = bp.add_tensor(info(&[8, 7, 6]), None).unwrap();
    let weight = bp.add_tensor(info(&[8, 3, 3, 4]), None).unwrap();
    let conv_dst = bp.add_tensor(info(&[4, 7, 6]), None).unwrap();
    let dst = bp.add_tensor(info(&[4, 7, 6]), None).unwrap();
    bp.set_tile_info(TileDescriptor::new(4, 2, 4, 7, ClippingStrategy::TopLeft))
        .unwrap();
    bp.add_component(Box::new(DirectConv2dComponent::new(
        Conv2dDescriptor {
            export_weights_to_cl_image: true,
            ..Default::default()
        },
        input(src),
        input(weight),
        SharedVarLink::placeholder(),
        output(conv_dst),
    )))
    .unwrap();
    bp.add_component(Box::new(StoreBlockBoundaryAwareComponent::new(
        input(conv_dst),
        output(dst),
    )))
    .unwrap();
    bp.finalize().unwrap();
    let code = bp.build().unwrap();

    assert!(code
        .code
        .contains("__read_only image2d_t weight_1_img,\n    uint weight_1_stride_z"));
    assert!(code.code.contains("IMAGE, weight_1,"));
    let weight_arg = code.arguments.iter().find(|a| a.id == weight).unwrap();
    assert_eq!(
        weight_arg.arg_type,
        clfuse::TensorArgType::Image3dExportToClImage2d
    );
}

#[test]
fn zero_extent_tile_is_rejected() {
    let mut bp = Blueprint::new();
    bp.add_tensor(info(&[8, 8]), None).unwrap();
    let err = bp
        .set_tile_info(TileDescriptor::new(0, 4, 8, 8, ClippingStrategy::TopLeft))
        .unwrap_err();
    assert!(matches!(err, clfuse::Error::Topology(_)));
    let err = bp
        .set_tile_info(TileDescriptor::new(4, 0, 8, 8, ClippingStrategy::TopLeft))
        .unwrap_err();
    assert!(matches!(err, clfuse::Error::Topology(_)));
}

#[test]
fn second_store_is_rejected_and_poisons_the_blueprint() {
    let mut bp = Blueprint::new();
    let a = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let b = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let c = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let d = bp.add_tensor(info(&[8, 8]), None).unwrap();
    bp.add_component(Box::new(StoreBlockBoundaryAwareComponent::new(
        input(a),
        output(b),
    )))
    .unwrap();
    let err = bp.add_component(Box::new(StoreBlockBoundaryAwareComponent::new(
        input(c),
        output(d),
    )));
    assert!(err.is_err());
    assert!(bp.finalize().is_err());
}

#[test]
fn second_complex_component_is_rejected() {
    let mut bp = Blueprint::new();
    let src = bp.add_tensor(info(&[5, 7, 6]), None).unwrap();
    let weight = bp.add_tensor(info(&[5, 3, 3, 4]), None).unwrap();
    let conv_dst = bp.add_tensor(info(&[4, 7, 6]), None).unwrap();
    let conv_dst2 = bp.add_tensor(info(&[4, 7, 6]), None).unwrap();
    bp.add_component(Box::new(DirectConv2dComponent::new(
        Conv2dDescriptor::default(),
        input(src),
        input(weight),
        SharedVarLink::placeholder(),
        output(conv_dst),
    )))
    .unwrap();
    let err = bp.add_component(Box::new(DirectConv2dComponent::new(
        Conv2dDescriptor::default(),
        input(conv_dst),
        input(weight),
        SharedVarLink::placeholder(),
        output(conv_dst2),
    )));
    assert!(err.is_err());
}

#[test]
fn second_root_is_rejected() {
    let mut bp = Blueprint::new();
    let a = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let b = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let c = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let d = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let e = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let f = bp.add_tensor(info(&[8, 8]), None).unwrap();
    bp.add_component(Box::new(EltwiseAddComponent::new(
        EltwiseAddDescriptor::default(),
        input(a),
        input(b),
        output(c),
    )))
    .unwrap();
    // A component consuming only unproduced tensors would be a second root.
    let err = bp.add_component(Box::new(EltwiseAddComponent::new(
        EltwiseAddDescriptor::default(),
        input(d),
        input(e),
        output(f),
    )));
    assert!(err.is_err());
}

#[test]
fn finalize_requires_a_store() {
    let mut bp = Blueprint::new();
    let a = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let b = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let c = bp.add_tensor(info(&[8, 8]), None).unwrap();
    bp.add_component(Box::new(EltwiseAddComponent::new(
        EltwiseAddDescriptor::default(),
        input(a),
        input(b),
        output(c),
    )))
    .unwrap();
    assert!(bp.finalize().is_err());
}

#[test]
fn build_before_finalize_is_a_state_error() {
    let mut bp = Blueprint::new();
    assert!(bp.build().is_err());
    assert!(bp.finalize().is_err());
}
