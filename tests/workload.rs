//! Workload staging over a finalized blueprint's graph.

use clfuse::blueprint::vtable::{SharedVarIo, SharedVarLink};
use clfuse::component::{
    Conv2dDescriptor, DirectConv2dComponent, EltwiseAddComponent, EltwiseAddDescriptor,
    StoreBlockBoundaryAwareComponent,
};
use clfuse::runtime::{UnitWorkloadStage, Workload};
use clfuse::{Blueprint, DType, TensorInfo, TensorShape};

fn info(dims: &[usize]) -> TensorInfo {
    TensorInfo::new(TensorShape::new(dims), DType::F32)
}

fn input(id: i32) -> SharedVarLink {
    SharedVarLink::new(id, SharedVarIo::Input)
}

fn output(id: i32) -> SharedVarLink {
    SharedVarLink::new(id, SharedVarIo::Output)
}

#[test]
fn workload_orders_and_classifies_the_fused_graph() {
    let mut bp = Blueprint::new();
    let src = bp.add_tensor(info(&[5, 7, 6]), None).unwrap();
    let weight = bp.add_tensor(info(&[5, 3, 3, 4]), None).unwrap();
    let conv_dst = bp.add_tensor(info(&[4, 7, 6]), None).unwrap();
    let addend = bp.add_tensor(info(&[1, 1]), None).unwrap();
    let add_dst = bp.add_tensor(info(&[4, 7, 6]), None).unwrap();
    let dst = bp.add_tensor(info(&[4, 7, 6]), None).unwrap();

    let conv = bp
        .add_component(Box::new(DirectConv2dComponent::new(
            Conv2dDescriptor::default(),
            input(src),
            input(weight),
            SharedVarLink::placeholder(),
            output(conv_dst),
        )))
        .unwrap();
    let add = bp
        .add_component(Box::new(EltwiseAddComponent::new(
            EltwiseAddDescriptor::default(),
            input(conv_dst),
            input(addend),
            output(add_dst),
        )))
        .unwrap();
    let store = bp
        .add_component(Box::new(StoreBlockBoundaryAwareComponent::new(
            input(add_dst),
            output(dst),
        )))
        .unwrap();
    bp.finalize().unwrap();

    let workload = Workload::from_graph(bp.graph(), &[]);
    let order: Vec<i32> = workload.units().iter().map(|u| u.op()).collect();
    assert_eq!(order, vec![conv, add, store]);
    assert!(workload
        .units()
        .iter()
        .all(|u| u.stage == UnitWorkloadStage::Run));

    let mut inputs = workload.inputs().to_vec();
    inputs.sort_unstable();
    assert_eq!(inputs, vec![src, weight, addend]);
    assert_eq!(workload.outputs(), &[dst]);
    let mut mids = workload.intermediates().to_vec();
    mids.sort_unstable();
    assert_eq!(mids, vec![conv_dst, add_dst]);
}

#[test]
fn prepare_stage_splits_off_marked_operators() {
    let mut bp = Blueprint::new();
    let a = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let b = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let c = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let d = bp.add_tensor(info(&[8, 8]), None).unwrap();
    let add = bp
        .add_component(Box::new(EltwiseAddComponent::new(
            EltwiseAddDescriptor::default(),
            input(a),
            input(b),
            output(c),
        )))
        .unwrap();
    let store = bp
        .add_component(Box::new(StoreBlockBoundaryAwareComponent::new(
            input(c),
            output(d),
        )))
        .unwrap();
    bp.finalize().unwrap();

    let workload = Workload::from_graph(bp.graph(), &[add]);
    let prepare: Vec<i32> = workload
        .units_of(UnitWorkloadStage::Prepare)
        .map(|u| u.op())
        .collect();
    let run: Vec<i32> = workload
        .units_of(UnitWorkloadStage::Run)
        .map(|u| u.op())
        .collect();
    assert_eq!(prepare, vec![add]);
    assert_eq!(run, vec![store]);
}
