//! Workload staging: the schedule a composite operator executes.
//!
//! A workload partitions the operators of a dependency graph into two stages.
//! `Prepare` units run exactly once, before the first execution; `Run` units
//! run on every execution. Within a stage, units keep the graph's topological
//! order.

use rustc_hash::FxHashSet;

use crate::graph::{DependencyGraph, OpPack};
use crate::types::{OperatorId, TensorId};

/// When a unit executes relative to the operator's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnitWorkloadStage {
    /// Executed once, before the first run.
    Prepare,
    /// Executed on every run.
    Run,
}

/// One schedulable unit: an operator, its tensors, and its stage.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UnitWorkload {
    pub stage: UnitWorkloadStage,
    pub pack: OpPack,
}

impl UnitWorkload {
    pub fn op(&self) -> OperatorId {
        self.pack.op
    }
}

/// The full schedule derived from a dependency graph.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Workload {
    units: Vec<UnitWorkload>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    intermediates: Vec<TensorId>,
}

impl Workload {
    /// Derives a schedule from `graph`. Operators in `prepare_ops` become
    /// `Prepare` units; everything else runs every time.
    pub fn from_graph(graph: &DependencyGraph, prepare_ops: &[OperatorId]) -> Self {
        let prepare: FxHashSet<OperatorId> = prepare_ops.iter().copied().collect();
        let units = graph
            .topological_sort()
            .into_iter()
            .map(|pack| UnitWorkload {
                stage: if prepare.contains(&pack.op) {
                    UnitWorkloadStage::Prepare
                } else {
                    UnitWorkloadStage::Run
                },
                pack,
            })
            .collect();
        Workload {
            units,
            inputs: graph.global_src_tensors(),
            outputs: graph.global_dst_tensors(),
            intermediates: graph.intermediate_tensors(),
        }
    }

    /// Units of one stage, in topological order.
    pub fn units_of(&self, stage: UnitWorkloadStage) -> impl Iterator<Item = &UnitWorkload> {
        self.units.iter().filter(move |u| u.stage == stage)
    }

    pub fn units(&self) -> &[UnitWorkload] {
        &self.units
    }

    /// Graph-level source tensors: the caller must bind these.
    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    /// Graph-level destination tensors: the caller must bind these.
    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// Tensors produced and consumed inside the workload; fused away in the
    /// generated kernel, never bound by the caller.
    pub fn intermediates(&self) -> &[TensorId] {
        &self.intermediates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (DependencyGraph, [i32; 3], [i32; 2]) {
        let mut g = DependencyGraph::new();
        let t0 = g.add_tensor(None).unwrap();
        let t1 = g.add_tensor(None).unwrap();
        let t2 = g.add_tensor(None).unwrap();
        let op0 = g.add_operator(&[t0], &[t1]).unwrap();
        let op1 = g.add_operator(&[t1], &[t2]).unwrap();
        (g, [t0, t1, t2], [op0, op1])
    }

    #[test]
    fn run_units_keep_topological_order() {
        let (g, _, [op0, op1]) = chain();
        let w = Workload::from_graph(&g, &[]);
        let order: Vec<i32> = w
            .units_of(UnitWorkloadStage::Run)
            .map(UnitWorkload::op)
            .collect();
        assert_eq!(order, vec![op0, op1]);
        assert!(w.units_of(UnitWorkloadStage::Prepare).next().is_none());
    }

    #[test]
    fn prepare_ops_are_staged_separately() {
        let (g, _, [op0, op1]) = chain();
        let w = Workload::from_graph(&g, &[op0]);
        let prepare: Vec<i32> = w
            .units_of(UnitWorkloadStage::Prepare)
            .map(UnitWorkload::op)
            .collect();
        let run: Vec<i32> = w
            .units_of(UnitWorkloadStage::Run)
            .map(UnitWorkload::op)
            .collect();
        assert_eq!(prepare, vec![op0]);
        assert_eq!(run, vec![op1]);
    }

    #[test]
    fn tensor_classification_matches_the_graph() {
        let (g, [t0, t1, t2], _) = chain();
        let w = Workload::from_graph(&g, &[]);
        assert_eq!(w.inputs(), &[t0]);
        assert_eq!(w.outputs(), &[t2]);
        assert_eq!(w.intermediates(), &[t1]);
    }
}
