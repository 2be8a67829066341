//! Shared variables: the kernel-scope variables a blueprint's components
//! read and write.
//!
//! Two groups exist. `Argument` variables are the parameters of the generated
//! kernel, bound once per invocation from caller-supplied tensors. `Automatic`
//! variables are intermediates with kernel-local storage; the table keeps at
//! most one live Automatic cell (the global accumulator) and aliases every
//! later Automatic link onto it.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::tensor::KernelArgDescriptor;
use crate::types::{ArgumentId, ARG_PLACEHOLDER};

/// Direction of a shared-variable link, from the component's point of view.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SharedVarIo {
    Input,
    Output,
}

/// Which storage a shared variable lives in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SharedVarGroup {
    /// A parameter of the generated kernel function.
    Argument,
    /// An automatic variable declared inside the kernel body.
    Automatic,
}

/// A (tensor id, direction) pair declared by a component.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SharedVarLink {
    pub arg_id: ArgumentId,
    pub io: SharedVarIo,
}

impl SharedVarLink {
    pub fn new(arg_id: ArgumentId, io: SharedVarIo) -> Self {
        SharedVarLink { arg_id, io }
    }

    /// A link standing in for an absent optional operand.
    pub fn placeholder() -> Self {
        SharedVarLink {
            arg_id: ARG_PLACEHOLDER,
            io: SharedVarIo::Input,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.arg_id == ARG_PLACEHOLDER
    }
}

/// A concrete kernel variable: its group, its final name in the generated
/// code, and the runtime descriptor of the tensor it carries.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SharedVar {
    pub group: SharedVarGroup,
    pub uniq_name: String,
    pub desc: KernelArgDescriptor,
}

#[derive(Clone, Copy, Debug)]
enum VarSlot {
    Argument(usize),
    Global,
}

/// Table of all variables used in one blueprint.
///
/// Insertion order of `Argument` variables is the order of their declaration
/// in the generated kernel signature.
///
/// PRECONDITION: components are registered in topological order, so every
/// consumer link finds the variable its producer allocated.
#[derive(Default, Debug)]
pub struct SharedVarTable {
    arguments: Vec<SharedVar>,
    global_var: Option<SharedVar>,
    lut: FxHashMap<ArgumentId, VarSlot>,
    num_vars: usize,
}

impl SharedVarTable {
    pub fn new() -> Self {
        SharedVarTable::default()
    }

    /// Registers the variable behind `link`, generating a unique name from
    /// `base_name` and the insertion index.
    ///
    /// Idempotent: a second call for an already-known `ArgumentId` is a no-op,
    /// so components may re-declare shared operands freely. An `Automatic`
    /// input with no live global variable means a consumer was processed
    /// before its producer and is a fatal topology error.
    pub fn add(
        &mut self,
        link: SharedVarLink,
        group: SharedVarGroup,
        desc: KernelArgDescriptor,
        base_name: &str,
    ) -> Result<()> {
        if link.is_placeholder() {
            return Err(Error::Topology(
                "non-placeholder shared variable link expected".into(),
            ));
        }
        if self.lut.contains_key(&link.arg_id) {
            return Ok(());
        }
        match group {
            SharedVarGroup::Argument => {
                let uniq_name = format!("{}_{}", base_name, self.num_vars);
                self.num_vars += 1;
                self.lut
                    .insert(link.arg_id, VarSlot::Argument(self.arguments.len()));
                self.arguments.push(SharedVar {
                    group,
                    uniq_name,
                    desc,
                });
            }
            SharedVarGroup::Automatic => match (link.io, &self.global_var) {
                (SharedVarIo::Output, None) => {
                    let uniq_name = format!("{}_{}", base_name, self.num_vars);
                    self.num_vars += 1;
                    self.global_var = Some(SharedVar {
                        group,
                        uniq_name,
                        desc,
                    });
                    self.lut.insert(link.arg_id, VarSlot::Global);
                }
                // Any further Automatic link aliases the live global cell.
                (_, Some(_)) => {
                    self.lut.insert(link.arg_id, VarSlot::Global);
                }
                (SharedVarIo::Input, None) => {
                    return Err(Error::Topology(
                        "automatic variable consumed before it was produced: \
                         components are not in topological order"
                            .into(),
                    ));
                }
            },
        }
        Ok(())
    }

    /// Looks up the variable behind a link. `None` means "not yet allocated"
    /// and is the one recoverable miss in the build pipeline.
    pub fn get(&self, link: SharedVarLink) -> Option<&SharedVar> {
        self.get_var(link.arg_id)
    }

    /// Looks up a variable by tensor id.
    pub fn get_var(&self, arg_id: ArgumentId) -> Option<&SharedVar> {
        match self.lut.get(&arg_id)? {
            VarSlot::Argument(idx) => self.arguments.get(*idx),
            VarSlot::Global => self.global_var.as_ref(),
        }
    }

    /// The kernel's parameters, in the order they were first registered.
    pub fn kernel_arguments(&self) -> &[SharedVar] {
        &self.arguments
    }

    /// Number of distinct tensor ids known to the table.
    pub fn num_links(&self) -> usize {
        self.lut.len()
    }
}
