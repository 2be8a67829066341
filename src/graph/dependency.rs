//! A multi-input, multi-output acyclic directed graph of tensors and
//! operators, represented as a doubly-linked adjacency list.
//!
//! The graph is the generic node/edge store behind a blueprint: it allocates
//! tensor ids, records which operators produce and consume each tensor, and
//! answers the source/destination and ordering queries the compiler needs.
//! `BTreeMap` adjacency keeps every traversal deterministic.

use std::collections::{BTreeMap, VecDeque};

use crate::error::{Error, Result};
use crate::types::{OperatorId, TensorId};

/// An operator together with its input and output tensors, as produced by
/// topological traversal.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OpPack {
    pub op: OperatorId,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
}

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct DependencyGraph {
    /// op -> tensors it reads
    adj_src_tensors: BTreeMap<OperatorId, Vec<TensorId>>,
    /// op -> tensors it writes
    adj_dst_tensors: BTreeMap<OperatorId, Vec<TensorId>>,
    /// tensor -> ops that write it
    adj_src_ops: BTreeMap<TensorId, Vec<OperatorId>>,
    /// tensor -> ops that read it
    adj_dst_ops: BTreeMap<TensorId, Vec<OperatorId>>,
    next_id: i32,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    /// Creates a new tensor node, or merges into an existing one.
    ///
    /// With a `merge_point` the call returns the existing tensor id instead of
    /// allocating; the merge point must name a tensor already in the graph.
    pub fn add_tensor(&mut self, merge_point: Option<TensorId>) -> Result<TensorId> {
        if let Some(t) = merge_point {
            if !self.tensor_exists(t) {
                return Err(Error::Topology(format!(
                    "merge point {t} does not name an existing tensor"
                )));
            }
            return Ok(t);
        }
        let t = self.alloc_id();
        self.insert_new_tensor(t);
        Ok(t)
    }

    /// Adds a new operator reading `inputs` and writing `outputs`.
    ///
    /// The operation is rejected (and the graph left unchanged) if it would
    /// introduce a cycle. Tensors not yet in the graph are created on the fly.
    pub fn add_operator(&mut self, inputs: &[TensorId], outputs: &[TensorId]) -> Result<OperatorId> {
        let op = self.alloc_id();
        self.adj_src_tensors.insert(op, Vec::new());
        self.adj_dst_tensors.insert(op, Vec::new());
        for &t in inputs {
            // Linking an input to a freshly created operator can never close a
            // cycle: every <input, op> edge is new.
            self.link_input(op, t);
        }
        for &t in outputs {
            // A back path from the output tensor to this operator would become
            // a loop once linked.
            if self.path_exists_from_tensor_to_op(t, op) {
                self.remove_operator(op);
                self.next_id = op;
                return Err(Error::Topology(format!(
                    "adding operator with output tensor {t} would create a cycle"
                )));
            }
            self.link_output(op, t);
        }
        Ok(op)
    }

    /// Sorts the operators topologically (Kahn's algorithm) and returns them
    /// with their tensor packs.
    pub fn topological_sort(&self) -> Vec<OpPack> {
        let mut in_degree: BTreeMap<OperatorId, usize> = BTreeMap::new();
        let mut queue: VecDeque<OperatorId> = VecDeque::new();
        for op in self.all_ops() {
            let degree = self.src_ops(op).len();
            in_degree.insert(op, degree);
            if degree == 0 {
                queue.push_back(op);
            }
        }

        let mut sorted = Vec::with_capacity(in_degree.len());
        while let Some(op) = queue.pop_front() {
            sorted.push(OpPack {
                op,
                inputs: self.src_tensors(op).to_vec(),
                outputs: self.dst_tensors(op).to_vec(),
            });
            for next in self.dst_ops(op) {
                let d = in_degree.get_mut(&next).unwrap();
                if *d > 0 {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }
        sorted
    }

    /// All operators with no producing operator upstream.
    pub fn get_root_ops(&self) -> Vec<OperatorId> {
        self.all_ops()
            .into_iter()
            .filter(|&op| self.src_ops(op).is_empty())
            .collect()
    }

    /// True if no operator writes this tensor (graph-level source).
    pub fn is_src_tensor(&self, tensor: TensorId) -> bool {
        self.adj_src_ops
            .get(&tensor)
            .is_some_and(|ops| ops.is_empty())
    }

    /// True if no operator reads this tensor (graph-level destination).
    pub fn is_dst_tensor(&self, tensor: TensorId) -> bool {
        self.adj_dst_ops
            .get(&tensor)
            .is_some_and(|ops| ops.is_empty())
    }

    /// Operators that write `tensor`.
    pub fn src_ops_from_tensor(&self, tensor: TensorId) -> &[OperatorId] {
        self.adj_src_ops.get(&tensor).map_or(&[], Vec::as_slice)
    }

    /// Operators that read `tensor`.
    pub fn dst_ops_from_tensor(&self, tensor: TensorId) -> &[OperatorId] {
        self.adj_dst_ops.get(&tensor).map_or(&[], Vec::as_slice)
    }

    pub fn all_tensors(&self) -> Vec<TensorId> {
        self.adj_src_ops.keys().copied().collect()
    }

    pub fn all_ops(&self) -> Vec<OperatorId> {
        self.adj_src_tensors.keys().copied().collect()
    }

    /// Source tensors of the whole graph.
    pub fn global_src_tensors(&self) -> Vec<TensorId> {
        self.all_tensors()
            .into_iter()
            .filter(|&t| self.is_src_tensor(t))
            .collect()
    }

    /// Destination tensors of the whole graph.
    pub fn global_dst_tensors(&self) -> Vec<TensorId> {
        self.all_tensors()
            .into_iter()
            .filter(|&t| self.is_dst_tensor(t))
            .collect()
    }

    /// Tensors that connect one operator's output to another's input. These
    /// exist only as temporaries and are never materialized.
    pub fn intermediate_tensors(&self) -> Vec<TensorId> {
        self.all_tensors()
            .into_iter()
            .filter(|&t| !self.is_src_tensor(t) && !self.is_dst_tensor(t))
            .collect()
    }

    pub fn tensor_exists(&self, tensor: TensorId) -> bool {
        self.adj_src_ops.contains_key(&tensor) && self.adj_dst_ops.contains_key(&tensor)
    }

    pub fn operator_exists(&self, op: OperatorId) -> bool {
        self.adj_src_tensors.contains_key(&op) && self.adj_dst_tensors.contains_key(&op)
    }

    fn alloc_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_new_tensor(&mut self, tensor: TensorId) {
        self.adj_src_ops.entry(tensor).or_default();
        self.adj_dst_ops.entry(tensor).or_default();
    }

    fn link_input(&mut self, op: OperatorId, tensor: TensorId) {
        if !self.tensor_exists(tensor) {
            self.insert_new_tensor(tensor);
        }
        self.adj_src_tensors.get_mut(&op).unwrap().push(tensor);
        self.adj_dst_ops.get_mut(&tensor).unwrap().push(op);
    }

    fn link_output(&mut self, op: OperatorId, tensor: TensorId) {
        if !self.tensor_exists(tensor) {
            self.insert_new_tensor(tensor);
        }
        self.adj_dst_tensors.get_mut(&op).unwrap().push(tensor);
        self.adj_src_ops.get_mut(&tensor).unwrap().push(op);
    }

    fn remove_operator(&mut self, op: OperatorId) {
        let mut touched = self.adj_src_tensors.get(&op).cloned().unwrap_or_default();
        touched.extend(self.adj_dst_tensors.get(&op).cloned().unwrap_or_default());
        for t in &touched {
            self.adj_dst_ops.get_mut(t).unwrap().retain(|&o| o != op);
            self.adj_src_ops.get_mut(t).unwrap().retain(|&o| o != op);
        }
        // Drop tensors this operator created that are now left without edges,
        // so a rejected insertion leaves no trace.
        for t in touched {
            if self.adj_src_ops[&t].is_empty() && self.adj_dst_ops[&t].is_empty() {
                self.adj_src_ops.remove(&t);
                self.adj_dst_ops.remove(&t);
            }
        }
        self.adj_src_tensors.remove(&op);
        self.adj_dst_tensors.remove(&op);
    }

    fn src_tensors(&self, op: OperatorId) -> &[TensorId] {
        self.adj_src_tensors.get(&op).map_or(&[], Vec::as_slice)
    }

    fn dst_tensors(&self, op: OperatorId) -> &[TensorId] {
        self.adj_dst_tensors.get(&op).map_or(&[], Vec::as_slice)
    }

    fn src_ops(&self, op: OperatorId) -> Vec<OperatorId> {
        let mut ops = Vec::new();
        for &t in self.src_tensors(op) {
            ops.extend_from_slice(self.src_ops_from_tensor(t));
        }
        ops
    }

    fn dst_ops(&self, op: OperatorId) -> Vec<OperatorId> {
        let mut ops = Vec::new();
        for &t in self.dst_tensors(op) {
            ops.extend_from_slice(self.dst_ops_from_tensor(t));
        }
        ops
    }

    fn path_exists_from_tensor_to_op(&self, tensor: TensorId, dst_op: OperatorId) -> bool {
        if !self.tensor_exists(tensor) || !self.operator_exists(dst_op) {
            return false;
        }
        self.dst_ops_from_tensor(tensor)
            .iter()
            .any(|&child| self.path_exists_from_op_to_op(child, dst_op))
    }

    fn path_exists_from_op_to_op(&self, src_op: OperatorId, dst_op: OperatorId) -> bool {
        if src_op == dst_op {
            return true;
        }
        self.dst_tensors(src_op)
            .iter()
            .any(|&t| self.path_exists_from_tensor_to_op(t, dst_op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_chain() -> (DependencyGraph, [TensorId; 3], [OperatorId; 2]) {
        // t0 -> op_a -> t1 -> op_b -> t2
        let mut g = DependencyGraph::new();
        let t0 = g.add_tensor(None).unwrap();
        let t1 = g.add_tensor(None).unwrap();
        let t2 = g.add_tensor(None).unwrap();
        let a = g.add_operator(&[t0], &[t1]).unwrap();
        let b = g.add_operator(&[t1], &[t2]).unwrap();
        (g, [t0, t1, t2], [a, b])
    }

    #[test]
    fn merge_point_returns_existing_tensor() {
        let mut g = DependencyGraph::new();
        let t = g.add_tensor(None).unwrap();
        assert_eq!(g.add_tensor(Some(t)).unwrap(), t);
        assert!(g.add_tensor(Some(999)).is_err());
    }

    #[test]
    fn source_and_destination_classification() {
        let (g, [t0, t1, t2], _) = linear_chain();
        assert!(g.is_src_tensor(t0));
        assert!(!g.is_src_tensor(t1));
        assert!(g.is_dst_tensor(t2));
        assert_eq!(g.intermediate_tensors(), vec![t1]);
        assert_eq!(g.global_src_tensors(), vec![t0]);
        assert_eq!(g.global_dst_tensors(), vec![t2]);
    }

    #[test]
    fn topological_order_respects_producers() {
        let (g, _, [a, b]) = linear_chain();
        let sorted = g.topological_sort();
        let order: Vec<_> = sorted.iter().map(|p| p.op).collect();
        assert_eq!(order, vec![a, b]);
        assert_eq!(g.get_root_ops(), vec![a]);
    }

    #[test]
    fn cycle_is_rejected_and_graph_unchanged() {
        let (mut g, [t0, t1, _], _) = linear_chain();
        let before = g.clone();
        // An operator reading t1 and writing t0 closes a loop.
        assert!(g.add_operator(&[t1], &[t0]).is_err());
        assert_eq!(g, before);
    }

    #[test]
    fn diamond_topology_sorts_all_ops() {
        let mut g = DependencyGraph::new();
        let t_in = g.add_tensor(None).unwrap();
        let t_a = g.add_tensor(None).unwrap();
        let t_b = g.add_tensor(None).unwrap();
        let t_out = g.add_tensor(None).unwrap();
        let split_a = g.add_operator(&[t_in], &[t_a]).unwrap();
        let split_b = g.add_operator(&[t_in], &[t_b]).unwrap();
        let join = g.add_operator(&[t_a, t_b], &[t_out]).unwrap();
        let order: Vec<_> = g.topological_sort().iter().map(|p| p.op).collect();
        assert_eq!(order.len(), 3);
        let pos = |op| order.iter().position(|&o| o == op).unwrap();
        assert!(pos(split_a) < pos(join));
        assert!(pos(split_b) < pos(join));
    }
}
