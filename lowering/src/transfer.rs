// transfer.rs — Target IR tables and constant shape interning
//
// The output artifact of a lowering run: four parallel, append-only tables
// keyed by shared node id, plus the constant data pool and the interned
// shape pool. The downstream device loader consumes these as-is; nothing
// here is edited after being appended.

use serde::Serialize;

use crate::shape::ShapeArray;

// ── Table rows ───────────────────────────────────────────────────────────────

/// Parameters of one registered non-constant node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeTransferParams {
    pub name: String,
    pub node_id: i32,
    /// Operation kind, kept for diagnostics.
    pub op: String,
    pub soc_op_id: i32,
    pub padding: String,
    /// Declared inputs plus any synthetic extra inputs.
    pub inputs_size: u32,
    pub outputs_size: u32,
}

/// Parameters of one registered constant node. Carries a reference to the
/// constant's raw data (offset and size into the constant pool), never the
/// payload itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstNodeTransferParams {
    pub name: String,
    pub node_id: i32,
    pub shape: ShapeArray,
    pub shape_id: ShapeId,
    pub data_offset: usize,
    pub data_size: usize,
}

/// Input wiring of one node: ordered (producer id, output slot) pairs in
/// argument order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInputParams {
    pub node_id: i32,
    pub inputs: Vec<(i32, u32)>,
}

/// Output wiring of one node: maximum byte size per output slot, used by the
/// loader to allocate buffers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeOutputParams {
    pub node_id: i32,
    pub max_sizes: Vec<u32>,
}

// ── Constant shape interner ──────────────────────────────────────────────────

/// Identifier of a deduplicated shape descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ShapeId(pub u32);

/// Deduplicates shape descriptors used by constant nodes. Each distinct
/// descriptor gets one pool entry; interning it again returns the same id.
#[derive(Debug, Default)]
pub struct ConstShapeInterner {
    by_descriptor: std::collections::HashMap<ShapeArray, ShapeId>,
    shapes: Vec<ShapeArray>,
}

impl ConstShapeInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, descriptor: ShapeArray) -> ShapeId {
        if let Some(&id) = self.by_descriptor.get(&descriptor) {
            return id;
        }
        let id = ShapeId(self.shapes.len() as u32);
        self.shapes.push(descriptor);
        self.by_descriptor.insert(descriptor, id);
        id
    }

    /// The deduplicated descriptor pool, indexed by `ShapeId`.
    pub fn shapes(&self) -> &[ShapeArray] {
        &self.shapes
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_descriptor.clear();
        self.shapes.clear();
    }
}

// ── Assembled IR ─────────────────────────────────────────────────────────────

/// The complete target IR of one lowering run.
#[derive(Debug, Default, Serialize)]
pub struct TransferTables {
    op_nodes: Vec<NodeTransferParams>,
    const_nodes: Vec<ConstNodeTransferParams>,
    node_inputs: Vec<NodeInputParams>,
    node_outputs: Vec<NodeOutputParams>,
    /// Interned shape pool, indexed by `ShapeId`.
    shapes: Vec<ShapeArray>,
    /// Raw constant payloads referenced by offset/size from const rows.
    #[serde(skip)]
    const_data: Vec<u8>,
}

impl TransferTables {
    pub fn op_node_params(&self) -> &[NodeTransferParams] {
        &self.op_nodes
    }

    pub fn const_node_params(&self) -> &[ConstNodeTransferParams] {
        &self.const_nodes
    }

    pub fn node_input_params(&self) -> &[NodeInputParams] {
        &self.node_inputs
    }

    pub fn node_output_params(&self) -> &[NodeOutputParams] {
        &self.node_outputs
    }

    pub fn shape_pool(&self) -> &[ShapeArray] {
        &self.shapes
    }

    pub fn const_data(&self) -> &[u8] {
        &self.const_data
    }

    pub(crate) fn push_op_node(&mut self, params: NodeTransferParams) {
        self.op_nodes.push(params);
    }

    pub(crate) fn push_const_node(&mut self, params: ConstNodeTransferParams) {
        self.const_nodes.push(params);
    }

    pub(crate) fn push_node_inputs(&mut self, params: NodeInputParams) {
        self.node_inputs.push(params);
    }

    pub(crate) fn push_node_outputs(&mut self, params: NodeOutputParams) {
        self.node_outputs.push(params);
    }

    /// Append a constant payload to the pool; returns its (offset, size)
    /// reference.
    pub(crate) fn push_const_data(&mut self, data: &[u8]) -> (usize, usize) {
        let offset = self.const_data.len();
        self.const_data.extend_from_slice(data);
        (offset, data.len())
    }

    pub(crate) fn set_shape_pool(&mut self, shapes: Vec<ShapeArray>) {
        self.shapes = shapes;
    }

    pub(crate) fn clear(&mut self) {
        self.op_nodes.clear();
        self.const_nodes.clear();
        self.node_inputs.clear();
        self.node_outputs.clear();
        self.shapes.clear();
        self.const_data.clear();
    }
}
