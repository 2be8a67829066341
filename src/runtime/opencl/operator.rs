//! A composite operator: a workload's kernels plus their staged execution.

use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::runtime::workload::{UnitWorkload, UnitWorkloadStage, Workload};
use crate::runtime::ExecutionDescriptor;
use crate::types::OperatorId;

use super::context::ClContext;
use super::kernel::CompositeKernel;
use super::tensor::TensorBinding;

/// Per-operator tensor bindings for one execution.
pub type TensorPackMap<'a> = FxHashMap<OperatorId, &'a TensorBinding<'a>>;

/// Executes a workload: prepare-stage kernels once, run-stage kernels on
/// every call.
pub struct CompositeOperator {
    workload: Workload,
    kernels: FxHashMap<OperatorId, CompositeKernel>,
    exec: ExecutionDescriptor,
    prepared: bool,
}

impl CompositeOperator {
    pub fn new(workload: Workload, exec: ExecutionDescriptor) -> Self {
        CompositeOperator {
            workload,
            kernels: FxHashMap::default(),
            exec,
            prepared: false,
        }
    }

    /// Compiles one kernel per workload operator. Every operator must come
    /// with its build artifact.
    pub fn configure(
        ctx: &ClContext,
        workload: Workload,
        codes: Vec<(OperatorId, crate::blueprint::KernelCode)>,
        exec: ExecutionDescriptor,
    ) -> Result<Self> {
        let mut operator = CompositeOperator::new(workload, exec);
        for (op, code) in codes {
            let kernel = CompositeKernel::configure(ctx, code)?;
            operator.add_kernel(op, kernel)?;
        }
        for unit in operator.workload.units() {
            if !operator.kernels.contains_key(&unit.op()) {
                return Err(Error::Topology(format!(
                    "no kernel supplied for operator {}",
                    unit.op()
                )));
            }
        }
        Ok(operator)
    }

    /// Attaches the compiled kernel executing operator `op` of the workload.
    pub fn add_kernel(&mut self, op: OperatorId, kernel: CompositeKernel) -> Result<()> {
        if !self.workload.units().iter().any(|u| u.op() == op) {
            return Err(Error::Topology(format!(
                "operator {op} is not part of the workload"
            )));
        }
        self.kernels.insert(op, kernel);
        Ok(())
    }

    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    /// Runs the prepare stage. Idempotent; `run` calls this on first use.
    pub fn prepare(&mut self, ctx: &ClContext, packs: &TensorPackMap<'_>) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        self.run_stage(ctx, packs, UnitWorkloadStage::Prepare)?;
        self.prepared = true;
        Ok(())
    }

    /// Runs the run stage, preparing first if that has not happened yet.
    pub fn run(&mut self, ctx: &ClContext, packs: &TensorPackMap<'_>) -> Result<()> {
        self.prepare(ctx, packs)?;
        self.run_stage(ctx, packs, UnitWorkloadStage::Run)
    }

    fn run_stage(
        &self,
        ctx: &ClContext,
        packs: &TensorPackMap<'_>,
        stage: UnitWorkloadStage,
    ) -> Result<()> {
        let units: Vec<&UnitWorkload> = self.workload.units_of(stage).collect();
        debug!("running {} unit(s) of stage {stage:?}", units.len());
        for unit in units {
            let op = unit.op();
            let kernel = self.kernels.get(&op).ok_or_else(|| {
                Error::Topology(format!("no kernel attached for operator {op}"))
            })?;
            let binding = packs
                .get(&op)
                .ok_or_else(|| Error::Binding(format!("no tensor pack for operator {op}")))?;
            kernel.run(ctx, binding, &self.exec)?;
        }
        Ok(())
    }
}
