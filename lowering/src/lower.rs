// lower.rs — Node registration engine (graph → transfer tables)
//
// Walks a validated graph in dependency order, classifies every node
// (boundary, constant, flatten-reshape, padded op, generic op), resolves
// shapes that static metadata leaves unknown through the one-shot dry run,
// and appends each node's parameters to the four transfer tables.
//
// Preconditions: `graph` has passed validation; `ops` describes the target.
// Postconditions: on success the tables hold one coherent IR; node ids are
//                 contiguous from 0 in registration order.
// Failure modes: every `LowerError` variant; partial tables are discarded on
//                failure (a run is all-or-nothing).
// Side effects: at most one dry-run execution via the supplied executor.

use std::collections::HashMap;
use std::path::Path;

use crate::dryrun::{
    dry_run_inference_for_all_nodes, GraphExecutor, InputBinding, OutputTensorInfo,
};
use crate::error::LowerError;
use crate::graph::{Graph, GraphDef, GraphFormat, NodeDef, NodeIndex, Padding};
use crate::registry::OpsDefinitions;
use crate::shape::{build_shape_array, shape_array_string, Shape, ShapeArray};
use crate::tensor::DataType;
use crate::transfer::{
    ConstNodeTransferParams, ConstShapeInterner, NodeInputParams, NodeOutputParams,
    NodeTransferParams, TransferTables,
};

const INPUT_OP_NAME: &str = "INPUT";
const FLATTEN_OP_NAME: &str = "FLATTEN";
const CONST_OP_NAME: &str = "Const";
const RESHAPE_OP_NAME: &str = "Reshape";
const PADDING_NA: &str = "NN_PAD_NA";

// ── Classification ───────────────────────────────────────────────────────────

/// How a ready node is encoded. Decided once per node, in this priority
/// order; the match in `register_node` is exhaustive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeClass {
    InputBoundary,
    Constant,
    OutputBoundary,
    FlattenReshape,
    PaddedOp,
    GenericOp,
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// One lowering session. Construct fresh per run, or call `clear_cache`
/// between runs; the caches are not safe to share across graphs.
#[derive(Debug)]
pub struct GraphLowering {
    /// Require static and dry-run shapes to agree. On by default; disable
    /// only when upstream static shape inference is known to be incomplete.
    strict_check: bool,
    node_ids: HashMap<String, i32>,
    /// Graph nodes registered so far. Synthetic shape constants draw ids
    /// from the same sequence but do not count toward traversal progress.
    registered_nodes: usize,
    next_id: i32,
    interner: ConstShapeInterner,
    tables: TransferTables,
    output_node_ids: Vec<i32>,
}

impl Default for GraphLowering {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphLowering {
    pub fn new() -> Self {
        GraphLowering {
            strict_check: true,
            node_ids: HashMap::new(),
            registered_nodes: 0,
            next_id: 0,
            interner: ConstShapeInterner::new(),
            tables: TransferTables::default(),
            output_node_ids: Vec::new(),
        }
    }

    /// Toggle strict shape checking. Must be called before loading.
    pub fn enable_strict_check_mode(&mut self, enable: bool) {
        self.strict_check = enable;
    }

    /// Discard all per-run state and tables.
    pub fn clear_cache(&mut self) {
        self.node_ids.clear();
        self.registered_nodes = 0;
        self.next_id = 0;
        self.interner.clear();
        self.tables.clear();
        self.output_node_ids.clear();
    }

    /// The assembled IR of the last successful run.
    pub fn tables(&self) -> &TransferTables {
        &self.tables
    }

    pub fn into_tables(self) -> TransferTables {
        self.tables
    }

    /// Ids of the declared output nodes, in registration order.
    pub fn output_node_ids(&self) -> &[i32] {
        &self.output_node_ids
    }

    pub fn node_id(&self, name: &str) -> Option<i32> {
        self.node_ids.get(name).copied()
    }

    // ── Entry points ────────────────────────────────────────────────────

    /// Lower an in-memory graph. `precomputed` supplies per-node output
    /// tensors when the caller already ran the graph; otherwise a dry run
    /// through `executor` resolves shapes static metadata leaves unknown.
    pub fn load_graph(
        &mut self,
        ops: &dyn OpsDefinitions,
        graph: &Graph,
        bindings: &[InputBinding],
        output_names: &[String],
        precomputed: Option<OutputTensorInfo>,
        executor: Option<&dyn GraphExecutor>,
    ) -> Result<(), LowerError> {
        self.clear_cache();
        let result = self.run(ops, graph, bindings, output_names, precomputed, executor);
        if result.is_err() {
            // All-or-nothing: a failed run leaves no partial tables behind.
            self.clear_cache();
        }
        result
    }

    /// Lower a graph read from a serialized description file.
    #[allow(clippy::too_many_arguments)]
    pub fn load_graph_from_file(
        &mut self,
        ops: &dyn OpsDefinitions,
        path: &Path,
        format: GraphFormat,
        bindings: &[InputBinding],
        output_names: &[String],
        dry_run_for_unknown_shape: bool,
        executor: Option<&dyn GraphExecutor>,
    ) -> Result<Graph, LowerError> {
        let def = GraphDef::from_file(path, format)?;
        let graph = Graph::from_def(def)?;
        if !dry_run_for_unknown_shape && needs_dry_run(&graph, bindings) {
            return Err(LowerError::DryRunFailure {
                node: None,
                message: "graph has unresolved shapes and dry run is disabled".to_string(),
            });
        }
        self.load_graph(ops, &graph, bindings, output_names, None, executor)?;
        Ok(graph)
    }

    // ── Run ─────────────────────────────────────────────────────────────

    fn run(
        &mut self,
        ops: &dyn OpsDefinitions,
        graph: &Graph,
        bindings: &[InputBinding],
        output_names: &[String],
        precomputed: Option<OutputTensorInfo>,
        executor: Option<&dyn GraphExecutor>,
    ) -> Result<(), LowerError> {
        // Boundary names must resolve before any table is built.
        for binding in bindings {
            if graph.node_by_name(&binding.name).is_none() {
                return Err(LowerError::UnboundName {
                    name: binding.name.clone(),
                    role: "input",
                });
            }
        }
        for name in output_names {
            if graph.node_by_name(name).is_none() {
                return Err(LowerError::UnboundName {
                    name: name.clone(),
                    role: "output",
                });
            }
        }

        // Shape source: precomputed tensors if supplied, else one dry run
        // covering every node, else static metadata alone.
        let tensor_info = match precomputed {
            Some(info) => info,
            None if needs_dry_run(graph, bindings) => {
                let executor = executor.ok_or_else(|| LowerError::DryRunFailure {
                    node: None,
                    message: "graph has unresolved shapes and no executor was supplied"
                        .to_string(),
                })?;
                dry_run_inference_for_all_nodes(executor, graph, bindings)?
            }
            None => OutputTensorInfo::default(),
        };

        // Iterate to fixpoint: source order need not be topological, so a
        // node whose inputs are not yet registered is skipped and revisited.
        let total = graph.len();
        while self.registered_nodes < total {
            let mut progressed = false;
            for index in graph.indices() {
                if self.node_ids.contains_key(&graph.node(index).name) {
                    continue;
                }
                if !self.all_inputs_registered(graph, index) {
                    continue;
                }
                self.register_node(ops, graph, index, bindings, output_names, &tensor_info)?;
                progressed = true;
            }
            if !progressed && self.registered_nodes < total {
                let remaining: Vec<String> = graph
                    .indices()
                    .filter(|&i| !self.node_ids.contains_key(&graph.node(i).name))
                    .map(|i| graph.node(i).name.clone())
                    .collect();
                return Err(LowerError::DependencyUnresolved { remaining });
            }
        }

        self.tables.set_shape_pool(self.interner.shapes().to_vec());
        Ok(())
    }

    fn all_inputs_registered(&self, graph: &Graph, index: NodeIndex) -> bool {
        graph
            .inputs_of(index)
            .iter()
            .all(|r| self.node_ids.contains_key(&graph.node(r.producer).name))
    }

    // ── Per-node registration ───────────────────────────────────────────

    fn register_node(
        &mut self,
        ops: &dyn OpsDefinitions,
        graph: &Graph,
        index: NodeIndex,
        bindings: &[InputBinding],
        output_names: &[String],
        tensor_info: &OutputTensorInfo,
    ) -> Result<(), LowerError> {
        let class = self.classify(ops, graph, index, bindings, output_names, tensor_info)?;
        match class {
            NodeClass::InputBoundary => {
                self.register_input_node(ops, graph, index, bindings, tensor_info)
            }
            NodeClass::Constant => self.register_constant_node(graph, index, tensor_info),
            NodeClass::OutputBoundary => {
                self.register_output_node(ops, graph, index, bindings, tensor_info)
            }
            NodeClass::FlattenReshape => {
                self.register_flatten_node(ops, graph, index, bindings, tensor_info)
            }
            NodeClass::PaddedOp => {
                self.register_padded_node(ops, graph, index, bindings, tensor_info)
            }
            NodeClass::GenericOp => {
                self.register_generic_node(ops, graph, index, bindings, tensor_info)
            }
        }
    }

    fn classify(
        &self,
        ops: &dyn OpsDefinitions,
        graph: &Graph,
        index: NodeIndex,
        bindings: &[InputBinding],
        output_names: &[String],
        tensor_info: &OutputTensorInfo,
    ) -> Result<NodeClass, LowerError> {
        let node = graph.node(index);
        if bindings.iter().any(|b| b.name == node.name) {
            return Ok(NodeClass::InputBoundary);
        }
        if node.value.is_some() || node.op == CONST_OP_NAME {
            return Ok(NodeClass::Constant);
        }
        if output_names.iter().any(|n| n == &node.name) {
            return Ok(NodeClass::OutputBoundary);
        }
        if self.is_flatten_reshape(graph, index, bindings, tensor_info)? {
            return Ok(NodeClass::FlattenReshape);
        }
        if ops.requires_padding(&node.op) {
            return Ok(NodeClass::PaddedOp);
        }
        if ops.is_supported(&node.op) {
            return Ok(NodeClass::GenericOp);
        }
        Err(LowerError::UnsupportedOperation {
            node: node.name.clone(),
            op: node.op.clone(),
        })
    }

    /// True for a reshape whose output is its input collapsed into one
    /// dimension. The device has no generic reshape primitive; this special
    /// case is encoded as a lightweight pass-through instead.
    fn is_flatten_reshape(
        &self,
        graph: &Graph,
        index: NodeIndex,
        bindings: &[InputBinding],
        tensor_info: &OutputTensorInfo,
    ) -> Result<bool, LowerError> {
        let node = graph.node(index);
        if node.op != RESHAPE_OP_NAME {
            return Ok(false);
        }
        let Some(first) = graph.inputs_of(index).first() else {
            return Ok(false);
        };
        let Some(out_shape) = shape_of(graph.node(index), bindings, tensor_info) else {
            return Ok(false);
        };
        let Some(in_shape) = shape_of(graph.node(first.producer), bindings, tensor_info) else {
            return Ok(false);
        };
        let out_array = encode_shape(&node.name, &out_shape)?;
        Ok(out_array == [1, 1, 1, in_shape.num_elements()])
    }

    fn register_input_node(
        &mut self,
        ops: &dyn OpsDefinitions,
        graph: &Graph,
        index: NodeIndex,
        bindings: &[InputBinding],
        tensor_info: &OutputTensorInfo,
    ) -> Result<(), LowerError> {
        let id = self.cache_node(graph, index);
        self.append_node_params_with_io(
            graph,
            index,
            bindings,
            tensor_info,
            id,
            INPUT_OP_NAME,
            ops.input_op_id(),
            PADDING_NA,
            &[],
        )
    }

    fn register_constant_node(
        &mut self,
        graph: &Graph,
        index: NodeIndex,
        tensor_info: &OutputTensorInfo,
    ) -> Result<(), LowerError> {
        let id = self.cache_node(graph, index);
        let node = graph.node(index);
        let shape = self.resolve_node_shape(node, &[], tensor_info)?;
        let array = encode_shape(&node.name, &shape)?;
        let shape_id = self.interner.intern(array);
        let (data_offset, data_size) = match &node.value {
            Some(value) => self.tables.push_const_data(&value.data),
            None => (self.tables.const_data().len(), 0),
        };
        self.tables.push_const_node(ConstNodeTransferParams {
            name: node.name.clone(),
            node_id: id,
            shape: array,
            shape_id,
            data_offset,
            data_size,
        });
        Ok(())
    }

    fn register_output_node(
        &mut self,
        ops: &dyn OpsDefinitions,
        graph: &Graph,
        index: NodeIndex,
        bindings: &[InputBinding],
        tensor_info: &OutputTensorInfo,
    ) -> Result<(), LowerError> {
        // An output node keeps its real op, so a windowed op declared as an
        // output carries the same attribute checks and stride constants as
        // one in the middle of the graph.
        let (padding, extra_inputs) = if ops.requires_padding(&graph.node(index).op) {
            let (padding, extra) = self.register_padding_attrs(graph, index)?;
            (padding.target_name(), extra)
        } else {
            (PADDING_NA, Vec::new())
        };
        let id = self.cache_node(graph, index);
        let node = graph.node(index);
        let op_id = ops
            .target_id(&node.op)
            .ok_or_else(|| LowerError::UnsupportedOperation {
                node: node.name.clone(),
                op: node.op.clone(),
            })?;
        let op = node.op.clone();
        self.append_node_params_with_io(
            graph,
            index,
            bindings,
            tensor_info,
            id,
            &op,
            op_id,
            padding,
            &extra_inputs,
        )?;
        self.output_node_ids.push(id);
        Ok(())
    }

    fn register_flatten_node(
        &mut self,
        ops: &dyn OpsDefinitions,
        graph: &Graph,
        index: NodeIndex,
        bindings: &[InputBinding],
        tensor_info: &OutputTensorInfo,
    ) -> Result<(), LowerError> {
        let id = self.cache_node(graph, index);
        self.append_node_params_with_io(
            graph,
            index,
            bindings,
            tensor_info,
            id,
            FLATTEN_OP_NAME,
            ops.flatten_op_id(),
            PADDING_NA,
            &[],
        )
    }

    fn register_padded_node(
        &mut self,
        ops: &dyn OpsDefinitions,
        graph: &Graph,
        index: NodeIndex,
        bindings: &[InputBinding],
        tensor_info: &OutputTensorInfo,
    ) -> Result<(), LowerError> {
        // Window attributes become shape-only constant entries registered
        // ahead of the node itself, so their ids stay below the consumer's.
        let (padding, extra_inputs) = self.register_padding_attrs(graph, index)?;
        let id = self.cache_node(graph, index);
        let node = graph.node(index);
        let op_id = ops
            .target_id(&node.op)
            .ok_or_else(|| LowerError::UnsupportedOperation {
                node: node.name.clone(),
                op: node.op.clone(),
            })?;
        let op = node.op.clone();
        self.append_node_params_with_io(
            graph,
            index,
            bindings,
            tensor_info,
            id,
            &op,
            op_id,
            padding.target_name(),
            &extra_inputs,
        )
    }

    fn register_generic_node(
        &mut self,
        ops: &dyn OpsDefinitions,
        graph: &Graph,
        index: NodeIndex,
        bindings: &[InputBinding],
        tensor_info: &OutputTensorInfo,
    ) -> Result<(), LowerError> {
        let id = self.cache_node(graph, index);
        let node = graph.node(index);
        let op_id = ops
            .target_id(&node.op)
            .ok_or_else(|| LowerError::UnsupportedOperation {
                node: node.name.clone(),
                op: node.op.clone(),
            })?;
        let op = node.op.clone();
        self.append_node_params_with_io(
            graph,
            index,
            bindings,
            tensor_info,
            id,
            &op,
            op_id,
            PADDING_NA,
            &[],
        )
    }

    // ── Identity cache ──────────────────────────────────────────────────

    /// Assign the next id. Ids are contiguous from 0 in registration order
    /// and never reused within a run.
    fn cache_node(&mut self, graph: &Graph, index: NodeIndex) -> i32 {
        let name = &graph.node(index).name;
        if let Some(&id) = self.node_ids.get(name) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.registered_nodes += 1;
        self.node_ids.insert(name.clone(), id);
        id
    }

    /// Register a synthetic shape-only constant entry carrying a window
    /// attribute (strides, pool size). Deduplicated by descriptor, so
    /// repeated attributes across nodes share one entry.
    fn register_constant_shape(&mut self, node_name: &str, dims: &[i64]) -> Result<i32, LowerError> {
        let array = encode_shape(node_name, &Shape::new(dims.to_vec()))?;
        let name = format!("shape_{}", shape_array_string(&array));
        if let Some(&id) = self.node_ids.get(&name) {
            return Ok(id);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.node_ids.insert(name.clone(), id);
        let shape_id = self.interner.intern(array);
        let data_offset = self.tables.const_data().len();
        self.tables.push_const_node(ConstNodeTransferParams {
            name,
            node_id: id,
            shape: array,
            shape_id,
            data_offset,
            data_size: 0,
        });
        Ok(id)
    }

    /// Validate a windowed op's padding/stride attributes and register their
    /// shape constants. Returns the padding mode and the extra input ids, in
    /// attribute order: strides, then the pool window when declared.
    fn register_padding_attrs(
        &mut self,
        graph: &Graph,
        index: NodeIndex,
    ) -> Result<(Padding, Vec<i32>), LowerError> {
        let node = graph.node(index);
        let padding = node.padding.ok_or_else(|| LowerError::GraphLoad {
            message: format!(
                "node '{}': op '{}' requires a padding attribute",
                node.name, node.op
            ),
        })?;
        if node.strides.is_empty() {
            return Err(LowerError::GraphLoad {
                message: format!(
                    "node '{}': op '{}' requires a strides attribute",
                    node.name, node.op
                ),
            });
        }
        check_positive_dims(&node.name, "strides", &node.strides)?;
        let mut extra = vec![self.register_constant_shape(&node.name, &node.strides)?];
        if !node.ksize.is_empty() {
            check_positive_dims(&node.name, "ksize", &node.ksize)?;
            extra.push(self.register_constant_shape(&node.name, &node.ksize)?);
        }
        Ok((padding, extra))
    }

    // ── Table building ──────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn append_node_params_with_io(
        &mut self,
        graph: &Graph,
        index: NodeIndex,
        bindings: &[InputBinding],
        tensor_info: &OutputTensorInfo,
        id: i32,
        op: &str,
        soc_op_id: i32,
        padding: &str,
        extra_inputs: &[i32],
    ) -> Result<(), LowerError> {
        let node = graph.node(index);
        let inputs_size = (graph.inputs_of(index).len() + extra_inputs.len()) as u32;
        self.tables.push_op_node(NodeTransferParams {
            name: node.name.clone(),
            node_id: id,
            op: op.to_string(),
            soc_op_id,
            padding: padding.to_string(),
            inputs_size,
            outputs_size: node.outputs,
        });
        self.append_node_input_params(graph, index, id, extra_inputs)?;
        self.append_node_output_params(graph, index, bindings, tensor_info, id)
    }

    fn append_node_input_params(
        &mut self,
        graph: &Graph,
        index: NodeIndex,
        id: i32,
        extra_inputs: &[i32],
    ) -> Result<(), LowerError> {
        let node = graph.node(index);
        let mut pairs = Vec::with_capacity(graph.inputs_of(index).len() + extra_inputs.len());
        for input in graph.inputs_of(index) {
            let producer = &graph.node(input.producer).name;
            // Readiness was checked before registration; a missing producer
            // id here is an engine bug, not a user error.
            let producer_id =
                *self
                    .node_ids
                    .get(producer)
                    .ok_or_else(|| LowerError::Internal {
                        message: format!(
                            "producer '{}' of node '{}' has no registered id",
                            producer, node.name
                        ),
                    })?;
            pairs.push((producer_id, input.slot));
        }
        for &extra in extra_inputs {
            pairs.push((extra, 0));
        }
        self.tables.push_node_inputs(NodeInputParams {
            node_id: id,
            inputs: pairs,
        });
        Ok(())
    }

    fn append_node_output_params(
        &mut self,
        graph: &Graph,
        index: NodeIndex,
        bindings: &[InputBinding],
        tensor_info: &OutputTensorInfo,
        id: i32,
    ) -> Result<(), LowerError> {
        let node = graph.node(index);
        let shape = self.resolve_node_shape(node, bindings, tensor_info)?;
        let dtype = node.dtype.unwrap_or(DataType::Float32);
        let max_bytes = (shape.num_elements() as usize * dtype.size_of()) as u32;
        // One shape describes all slots of a node; each gets the same bound.
        self.tables.push_node_outputs(NodeOutputParams {
            node_id: id,
            max_sizes: vec![max_bytes; node.outputs as usize],
        });
        Ok(())
    }

    // ── Shape resolution ────────────────────────────────────────────────

    /// Resolve a node's shape from static metadata, falling back to the
    /// dry-run tensor. With both available, strict mode requires their
    /// encoded descriptors to agree; the static value wins otherwise.
    fn resolve_node_shape(
        &self,
        node: &NodeDef,
        bindings: &[InputBinding],
        tensor_info: &OutputTensorInfo,
    ) -> Result<Shape, LowerError> {
        let static_shape = static_shape(node, bindings);
        let dry_shape = tensor_info.get(&node.name).map(|t| t.shape().clone());
        match (static_shape, dry_shape) {
            (Some(stat), Some(dry)) => {
                if self.strict_check {
                    let expected = encode_shape(&node.name, &stat)?;
                    let actual = encode_shape(&node.name, &dry)?;
                    if expected != actual {
                        return Err(LowerError::ShapeInconsistency {
                            node: node.name.clone(),
                            expected,
                            actual,
                        });
                    }
                }
                Ok(stat)
            }
            (Some(stat), None) => Ok(stat),
            (None, Some(dry)) => Ok(dry),
            (None, None) => Err(LowerError::DryRunFailure {
                node: Some(node.name.clone()),
                message: "shape unknown statically and no dry-run result available".to_string(),
            }),
        }
    }
}

// ── Free helpers ─────────────────────────────────────────────────────────────

/// Static shape of a node: graph metadata first, then a constant payload's
/// own layout, then the shape of a caller binding for input boundary nodes.
fn static_shape(node: &NodeDef, bindings: &[InputBinding]) -> Option<Shape> {
    if let Some(shape) = &node.shape {
        return Some(shape.clone());
    }
    if let Some(value) = &node.value {
        return Some(Shape::new(value.dims.clone()));
    }
    bindings
        .iter()
        .find(|b| b.name == node.name)
        .map(|b| b.shape().clone())
}

fn check_positive_dims(node: &str, what: &str, dims: &[i64]) -> Result<(), LowerError> {
    if let Some(&bad) = dims.iter().find(|&&d| d <= 0) {
        return Err(LowerError::GraphLoad {
            message: format!("node '{}': {} entries must be positive, got {}", node, what, bad),
        });
    }
    Ok(())
}

/// Lenient shape lookup used during classification: static metadata, then
/// dry-run result, then nothing.
fn shape_of(node: &NodeDef, bindings: &[InputBinding], tensor_info: &OutputTensorInfo) -> Option<Shape> {
    static_shape(node, bindings).or_else(|| tensor_info.get(&node.name).map(|t| t.shape().clone()))
}

fn encode_shape(node_name: &str, shape: &Shape) -> Result<ShapeArray, LowerError> {
    build_shape_array(shape).map_err(|e| LowerError::RankExceeded {
        node: node_name.to_string(),
        rank: e.rank,
    })
}

/// True when some node's shape is derivable neither from graph metadata nor
/// from the caller's input bindings.
pub fn needs_dry_run(graph: &Graph, bindings: &[InputBinding]) -> bool {
    graph
        .indices()
        .any(|i| static_shape(graph.node(i), bindings).is_none())
}
