//! The blueprint compiler: the in-progress graph and metadata describing a
//! to-be-compiled fused kernel, and the `build` step that turns it into an
//! immutable [`KernelCode`] artifact.
//!
//! A blueprint moves through four states, one-directionally:
//!
//! ```text
//! Empty -> Building -> Finalized -> Built
//! ```
//!
//! Tensors and components may only be added while `Building`, and must be
//! added producer-before-consumer. `finalize` snapshots the unique component
//! graph root and classifies every tensor into its shared-variable group;
//! `build` runs the two-pass code generation and freezes the artifact.

pub mod code;
pub mod vtable;

pub use code::{BuildOptions, KernelCode};

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

use crate::component::{CodegenContext, ComponentType, KernelComponent};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::tensor::TensorInfo;
use crate::types::{ArgumentId, ComponentId};
use crate::window::TileDescriptor;

use vtable::{SharedVarGroup, SharedVarIo, SharedVarTable};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Empty,
    Building,
    Finalized,
    Built,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Empty => "Empty",
            State::Building => "Building",
            State::Finalized => "Finalized",
            State::Built => "Built",
        }
    }
}

/// Intermediate representation of the final, complete kernel source.
pub struct Blueprint {
    state: State,
    /// Set when an `add_component` call was rejected; the blueprint can no
    /// longer be finalized or built.
    invalid: bool,

    graph: DependencyGraph,
    tensors: FxHashMap<ArgumentId, TensorInfo>,
    /// Filled by `finalize`.
    groups: FxHashMap<ArgumentId, SharedVarGroup>,

    components: FxHashMap<ComponentId, Box<dyn KernelComponent>>,
    /// Component adjacency (producer -> consumers), grown incrementally.
    component_graph: FxHashMap<ComponentId, Vec<ComponentId>>,
    /// Per tensor: components that treat it as an input.
    outgoing_components: FxHashMap<ArgumentId, Vec<ComponentId>>,
    /// Per tensor: components that treat it as an output.
    incoming_components: FxHashMap<ArgumentId, Vec<ComponentId>>,

    graph_root: Option<ComponentId>,
    dst_id: Option<ArgumentId>,
    num_complex_components: usize,
    tile: TileDescriptor,
}

impl Default for Blueprint {
    fn default() -> Self {
        Blueprint::new()
    }
}

impl Blueprint {
    pub fn new() -> Self {
        Blueprint {
            state: State::Empty,
            invalid: false,
            graph: DependencyGraph::new(),
            tensors: FxHashMap::default(),
            groups: FxHashMap::default(),
            components: FxHashMap::default(),
            component_graph: FxHashMap::default(),
            outgoing_components: FxHashMap::default(),
            incoming_components: FxHashMap::default(),
            graph_root: None,
            dst_id: None,
            num_complex_components: 0,
            tile: TileDescriptor::default(),
        }
    }

    /// Creates a tensor node, or merges into an existing one via
    /// `merge_point`. The returned id is stable for the blueprint's lifetime.
    pub fn add_tensor(
        &mut self,
        info: TensorInfo,
        merge_point: Option<ArgumentId>,
    ) -> Result<ArgumentId> {
        self.enter_building()?;
        let id = self.graph.add_tensor(merge_point)?;
        self.tensors.insert(id, info);
        trace!("added tensor {id} with shape {:?}", info.shape);
        Ok(id)
    }

    /// Sets the blueprint's tile shape, output boundary and clipping
    /// strategy, used by the global-index prologue of the generated kernel.
    pub fn set_tile_info(&mut self, tile: TileDescriptor) -> Result<()> {
        self.enter_building()?;
        if tile.n0 == 0 || tile.m0 == 0 {
            return Err(Error::Topology(format!(
                "tile extents must be non-zero, got {}x{}",
                tile.n0, tile.m0
            )));
        }
        self.tile = tile;
        Ok(())
    }

    /// Adds a kernel component and wires it into the component graph.
    ///
    /// Components must be added producer-before-consumer. A second `Complex`
    /// component, a second `Store` component or a second graph root is a
    /// fatal topology error that additionally marks the blueprint unusable
    /// for `build`.
    pub fn add_component(&mut self, component: Box<dyn KernelComponent>) -> Result<ComponentId> {
        self.enter_building()?;
        self.check_component(component.as_ref()).inspect_err(|_| {
            self.invalid = true;
        })?;

        let links = component.links();
        let inputs: Vec<ArgumentId> = links
            .iter()
            .filter(|l| !l.is_placeholder() && l.io == SharedVarIo::Input)
            .map(|l| l.arg_id)
            .collect();
        let outputs: Vec<ArgumentId> = links
            .iter()
            .filter(|l| !l.is_placeholder() && l.io == SharedVarIo::Output)
            .map(|l| l.arg_id)
            .collect();

        let component_id = self.graph.add_operator(&inputs, &outputs)?;
        let mut component = component;
        component.assign_id(component_id);
        self.component_graph.insert(component_id, Vec::new());

        if component.component_type() == ComponentType::Complex {
            self.num_complex_components += 1;
        }
        if component.component_type() == ComponentType::Store {
            // check_component already rejected a second destination
            self.dst_id = outputs.first().copied();
        }

        for link in &links {
            if link.is_placeholder() {
                continue;
            }
            let arg_id = link.arg_id;
            self.outgoing_components.entry(arg_id).or_default();
            self.incoming_components.entry(arg_id).or_default();

            match link.io {
                SharedVarIo::Input => {
                    // Connect every component that produces this tensor to
                    // the one being added.
                    let producers = self.incoming_components[&arg_id].clone();
                    for producer in producers {
                        self.component_graph
                            .entry(producer)
                            .or_default()
                            .push(component_id);
                    }
                    self.outgoing_components
                        .entry(arg_id)
                        .or_default()
                        .push(component_id);
                }
                SharedVarIo::Output => {
                    // Connect the component being added to every component
                    // that already consumes this tensor.
                    let consumers = self.outgoing_components[&arg_id].clone();
                    self.component_graph
                        .entry(component_id)
                        .or_default()
                        .extend(consumers);
                    self.incoming_components
                        .entry(arg_id)
                        .or_default()
                        .push(component_id);
                }
            }
        }

        if self.is_graph_root(component_id) {
            self.graph_root = Some(component_id);
        }

        debug!(
            "added component {component_id} ({}) with {} links",
            component.name(),
            links.len()
        );
        self.components.insert(component_id, component);
        Ok(component_id)
    }

    /// Snapshots the unique component graph root and classifies every tensor
    /// into its shared-variable group: `Argument` if it is a graph-level
    /// source or the designated destination, `Automatic` otherwise.
    pub fn finalize(&mut self) -> Result<()> {
        self.expect_state(State::Building, "Building")?;
        if self.invalid {
            return Err(Error::Topology(
                "blueprint contains rejected components and cannot be finalized".into(),
            ));
        }
        let dst_id = self.dst_id.ok_or_else(|| {
            Error::Topology("no store component fixes the blueprint destination".into())
        })?;
        if self.graph_root.is_none() {
            return Err(Error::Topology("no root found in the component graph".into()));
        }

        for &id in self.tensors.keys() {
            let group = if self.graph.is_src_tensor(id) || id == dst_id {
                SharedVarGroup::Argument
            } else {
                SharedVarGroup::Automatic
            };
            self.groups.insert(id, group);
        }
        self.state = State::Finalized;
        Ok(())
    }

    /// Runs the two-pass code generation and produces the immutable build
    /// artifact.
    ///
    /// Pass one allocates every component's shared variables, in topological
    /// order, so that the table is complete before any code is textualized;
    /// pass two resolves each component's tag table and substitutes it into
    /// the component's code template.
    pub fn build(&mut self) -> Result<KernelCode> {
        self.expect_state(State::Finalized, "Finalized")?;
        let order = self.sorted_components()?;
        let ctx = CodegenContext::new(&self.tensors, &self.groups, &self.tile);

        // Allocation pass: later components' tag look-ups may reference
        // variables a predecessor allocated.
        let mut vtable = SharedVarTable::new();
        for &id in &order {
            self.components[&id].allocate_shared_vars(&mut vtable, &ctx)?;
        }

        // Emission pass.
        let mut headers: BTreeSet<String> = BTreeSet::new();
        let mut macros: BTreeSet<String> = BTreeSet::new();
        let mut bodies: Vec<String> = Vec::with_capacity(order.len());
        let mut build_options = self.tile_build_options();
        let mut config_fragments: Vec<String> = Vec::new();
        for &id in &order {
            let component = &self.components[&id];
            let tags = component.tag_lut(&vtable, &ctx)?;
            bodies.push(crate::component::replace_tags(
                &component.component_code(),
                &tags,
            )?);
            headers.extend(component.headers());
            let extra_macros = component.additional_macros();
            if !extra_macros.is_empty() {
                macros.insert(extra_macros);
            }
            build_options.merge(&component.build_options(&ctx));
            let fragment = component.config_id(&ctx);
            if !fragment.is_empty() {
                config_fragments.push(fragment);
            }
        }

        let name = self.kernel_name(&order);
        let mut code = String::new();
        for header in &headers {
            code.push_str(&format!("#include \"{header}\"\n"));
        }
        for macro_block in &macros {
            code.push_str(macro_block);
        }
        code.push_str(&code::generate_kernel_signature(
            &name,
            vtable.kernel_arguments(),
        )?);
        code.push_str("\n{\n\n");
        code.push_str("    //------------------ START KERNEL_BUILDER_COORDINATE ---------------------\n\n");
        code.push_str(&code::generate_global_section(&self.tile));
        code.push_str("    //------------------ END KERNEL_BUILDER_COORDINATE ---------------------\n");
        for body in &bodies {
            code.push_str(body);
        }
        code.push_str("}\n");

        let config_id = format!("{}--{}", name, config_fragments.join("--"));
        let root = self
            .graph_root
            .ok_or_else(|| Error::Topology("no root found in the component graph".into()))?;
        let window = self.components[&root].window(&ctx)?;
        let arguments = vtable
            .kernel_arguments()
            .iter()
            .map(|var| var.desc)
            .collect();

        debug!(
            "built kernel `{name}` ({} arguments, {} components)",
            vtable.kernel_arguments().len(),
            order.len()
        );
        self.state = State::Built;
        Ok(KernelCode {
            name,
            code,
            config_id,
            build_options,
            window,
            arguments,
        })
    }

    /// The tensor id the store component writes, once a store was added.
    pub fn dst_id(&self) -> Option<ArgumentId> {
        self.dst_id
    }

    /// Read access to the underlying tensor/operator dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    fn enter_building(&mut self) -> Result<()> {
        match self.state {
            State::Empty => {
                self.state = State::Building;
                Ok(())
            }
            State::Building => Ok(()),
            _ => Err(Error::State {
                expected: "Empty or Building",
                found: self.state.name(),
            }),
        }
    }

    fn expect_state(&self, state: State, expected: &'static str) -> Result<()> {
        if self.state != state {
            return Err(Error::State {
                expected,
                found: self.state.name(),
            });
        }
        Ok(())
    }

    /// Structural invariants checked before any mutation, so a rejected
    /// component leaves the graph untouched.
    fn check_component(&self, component: &dyn KernelComponent) -> Result<()> {
        match component.component_type() {
            ComponentType::Complex if self.num_complex_components >= 1 => {
                return Err(Error::Topology(
                    "only one complex component per blueprint is supported".into(),
                ));
            }
            ComponentType::Store if self.dst_id.is_some() => {
                return Err(Error::Topology(
                    "trying to add more than one destination to the graph".into(),
                ));
            }
            _ => {}
        }
        for link in component.links() {
            if !link.is_placeholder() && !self.tensors.contains_key(&link.arg_id) {
                return Err(Error::Topology(format!(
                    "component `{}` references tensor {} that was never added",
                    component.name(),
                    link.arg_id
                )));
            }
        }
        if self.would_be_root(component) && self.graph_root.is_some() {
            return Err(Error::Topology(
                "trying to add more than one root to the graph".into(),
            ));
        }
        Ok(())
    }

    /// A component is a graph root when none of its inputs is produced by a
    /// previously added component.
    fn would_be_root(&self, component: &dyn KernelComponent) -> bool {
        component.links().iter().all(|link| {
            link.is_placeholder()
                || link.io == SharedVarIo::Output
                || self.graph.src_ops_from_tensor(link.arg_id).is_empty()
        })
    }

    fn is_graph_root(&self, component_id: ComponentId) -> bool {
        self.graph_root.is_none()
            && self
                .graph
                .get_root_ops()
                .iter()
                .any(|&op| op == component_id)
    }

    /// Depth-first post-order traversal from the cached root; the reversed
    /// order places every producer before its consumers. Regenerated per
    /// caller rather than cached, so graph mutations can never hand out a
    /// stale ordering.
    fn sorted_components(&self) -> Result<Vec<ComponentId>> {
        let root = self
            .graph_root
            .ok_or_else(|| Error::Topology("no root found in the component graph".into()))?;
        let mut visited = FxHashSet::default();
        let mut post_order = Vec::with_capacity(self.components.len());
        self.topo_visit(root, &mut visited, &mut post_order);
        post_order.reverse();
        Ok(post_order)
    }

    fn topo_visit(
        &self,
        id: ComponentId,
        visited: &mut FxHashSet<ComponentId>,
        post_order: &mut Vec<ComponentId>,
    ) {
        visited.insert(id);
        if let Some(consumers) = self.component_graph.get(&id) {
            for &next in consumers {
                if !visited.contains(&next) {
                    self.topo_visit(next, visited, post_order);
                }
            }
        }
        post_order.push(id);
    }

    fn kernel_name(&self, order: &[ComponentId]) -> String {
        order
            .iter()
            .map(|id| self.components[id].name())
            .collect::<Vec<_>>()
            .join("___")
    }

    /// Tile-derived compile-time constants shared by every component body.
    fn tile_build_options(&self) -> BuildOptions {
        let mut opts = BuildOptions::new();
        let (n0, m0) = if self.tile.is_empty() {
            (1, 1)
        } else {
            (self.tile.n0, self.tile.m0)
        };
        opts.add(format!("-DN0={n0}"));
        opts.add(format!("-DM0={m0}"));
        opts.add(format!(
            "-DPARTIAL_STORE_N0={}",
            self.tile.boundary_x % n0
        ));
        opts.add(format!(
            "-DPARTIAL_STORE_M0={}",
            self.tile.boundary_y % m0
        ));
        opts
    }
}
