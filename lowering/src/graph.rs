// graph.rs — Dataflow graph description and validated arena
//
// `GraphDef` is the serde-encoded wire form of a compute graph: a flat node
// list with string input references ("producer" or "producer:slot"). A
// validation pass resolves it into `Graph`, an owned arena where every
// cross-reference is an index — the lowering engine never touches names or
// pointers while walking edges.
//
// Preconditions: none.
// Postconditions: a `Graph` has unique node names and fully resolved,
//                 in-bounds input references.
// Failure modes: duplicate names, dangling producers, out-of-range slots,
//                unreadable or undecodable graph files → `GraphLoad`.
// Side effects: `GraphDef::from_file` reads the filesystem.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LowerError;
use crate::shape::Shape;
use crate::tensor::DataType;

// ── Wire format ──────────────────────────────────────────────────────────────

/// On-disk encoding of a graph description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    /// Human-editable JSON document.
    Text,
    /// Compact JSON bytes (no whitespace), as produced by `GraphDef::to_bytes`.
    Binary,
}

/// Padding policy of a windowed op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    Valid,
    Same,
}

impl Padding {
    /// Name of the padding mode in the target IR.
    pub fn target_name(self) -> &'static str {
        match self {
            Padding::Valid => "NN_PAD_VALID",
            Padding::Same => "NN_PAD_SAME",
        }
    }
}

/// Constant payload carried by a node. `dims` is the payload's own layout;
/// the engine's static shape metadata lives in `NodeDef::shape` and may be
/// absent independently of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstValue {
    pub dtype: DataType,
    pub dims: Vec<i64>,
    #[serde(default)]
    pub data: Vec<u8>,
}

fn default_outputs() -> u32 {
    1
}

/// One node of the wire-format graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub op: String,
    /// Input references in argument order: `"producer"` or `"producer:slot"`.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Statically inferred shape, when the host graph library derived one.
    #[serde(default)]
    pub shape: Option<Shape>,
    /// Element type of this node's outputs. Defaults to f32 when absent.
    #[serde(default)]
    pub dtype: Option<DataType>,
    /// Constant payload, present only on constant nodes.
    #[serde(default)]
    pub value: Option<ConstValue>,
    /// Number of output slots.
    #[serde(default = "default_outputs")]
    pub outputs: u32,
    /// Padding policy, required on ops the capability provider flags.
    #[serde(default)]
    pub padding: Option<Padding>,
    /// Window strides, required on ops the capability provider flags.
    #[serde(default)]
    pub strides: Vec<i64>,
    /// Pooling window, where applicable. Falls back to `strides` when empty.
    #[serde(default)]
    pub ksize: Vec<i64>,
}

/// The serde-encoded graph: a flat, ordered node list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    pub nodes: Vec<NodeDef>,
}

impl GraphDef {
    /// Read a graph description from a file in the given encoding.
    pub fn from_file(path: &Path, format: GraphFormat) -> Result<GraphDef, LowerError> {
        let bytes = std::fs::read(path).map_err(|e| LowerError::GraphLoad {
            message: format!("{}: {}", path.display(), e),
        })?;
        GraphDef::decode(&bytes, format).map_err(|message| LowerError::GraphLoad {
            message: format!("{}: {}", path.display(), message),
        })
    }

    fn decode(bytes: &[u8], format: GraphFormat) -> Result<GraphDef, String> {
        match format {
            GraphFormat::Text => {
                let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
                serde_json::from_str(text).map_err(|e| e.to_string())
            }
            GraphFormat::Binary => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
        }
    }

    /// Compact byte encoding (the `GraphFormat::Binary` form).
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("GraphDef serialization cannot fail")
    }
}

// ── Validated arena ──────────────────────────────────────────────────────────

/// Index of a node within a `Graph`. Stable for the graph's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub usize);

/// A resolved input edge: which node feeds this input, and from which slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRef {
    pub producer: NodeIndex,
    pub slot: u32,
}

/// A validated graph: node arena plus resolved input edges, indexed in
/// source order. The lowering engine reads it, never mutates it.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<NodeDef>,
    index_by_name: HashMap<String, NodeIndex>,
    inputs: Vec<Vec<InputRef>>,
}

impl Graph {
    /// Validate a graph description and resolve all input references.
    pub fn from_def(def: GraphDef) -> Result<Graph, LowerError> {
        let mut index_by_name = HashMap::with_capacity(def.nodes.len());
        for (i, node) in def.nodes.iter().enumerate() {
            if index_by_name
                .insert(node.name.clone(), NodeIndex(i))
                .is_some()
            {
                return Err(LowerError::GraphLoad {
                    message: format!("duplicate node name '{}'", node.name),
                });
            }
        }

        let mut inputs = Vec::with_capacity(def.nodes.len());
        for node in &def.nodes {
            let mut refs = Vec::with_capacity(node.inputs.len());
            for raw in &node.inputs {
                let (producer_name, slot) = split_input_ref(raw);
                let producer =
                    *index_by_name
                        .get(producer_name)
                        .ok_or_else(|| LowerError::GraphLoad {
                            message: format!(
                                "node '{}': input references unknown node '{}'",
                                node.name, producer_name
                            ),
                        })?;
                let available = def.nodes[producer.0].outputs;
                if slot >= available {
                    return Err(LowerError::GraphLoad {
                        message: format!(
                            "node '{}': input '{}' references output slot {} but '{}' has {} output(s)",
                            node.name, raw, slot, producer_name, available
                        ),
                    });
                }
                refs.push(InputRef { producer, slot });
            }
            inputs.push(refs);
        }

        Ok(Graph {
            nodes: def.nodes,
            index_by_name,
            inputs,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: NodeIndex) -> &NodeDef {
        &self.nodes[index.0]
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.index_by_name.get(name).copied()
    }

    pub fn inputs_of(&self, index: NodeIndex) -> &[InputRef] {
        &self.inputs[index.0]
    }

    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> {
        (0..self.nodes.len()).map(NodeIndex)
    }
}

/// Split `"producer:slot"` into name and slot; a bare name means slot 0.
fn split_input_ref(raw: &str) -> (&str, u32) {
    match raw.rsplit_once(':') {
        Some((name, slot)) => match slot.parse::<u32>() {
            Ok(n) => (name, n),
            // A colon without a numeric suffix is part of the name.
            Err(_) => (raw, 0),
        },
        None => (raw, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, op: &str, inputs: &[&str]) -> NodeDef {
        NodeDef {
            name: name.to_string(),
            op: op.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            shape: None,
            dtype: None,
            value: None,
            outputs: 1,
            padding: None,
            strides: Vec::new(),
            ksize: Vec::new(),
        }
    }

    #[test]
    fn resolves_input_references() {
        let def = GraphDef {
            nodes: vec![node("a", "INPUT", &[]), node("b", "Relu", &["a"])],
        };
        let graph = Graph::from_def(def).unwrap();
        let b = graph.node_by_name("b").unwrap();
        let refs = graph.inputs_of(b);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].producer, graph.node_by_name("a").unwrap());
        assert_eq!(refs[0].slot, 0);
    }

    #[test]
    fn slot_suffix_parsed() {
        assert_eq!(split_input_ref("x:2"), ("x", 2));
        assert_eq!(split_input_ref("x"), ("x", 0));
        assert_eq!(split_input_ref("ns:x"), ("ns:x", 0));
    }

    #[test]
    fn duplicate_name_rejected() {
        let def = GraphDef {
            nodes: vec![node("a", "INPUT", &[]), node("a", "Relu", &[])],
        };
        let err = Graph::from_def(def).unwrap_err();
        assert!(matches!(err, LowerError::GraphLoad { .. }));
        assert!(format!("{err}").contains("duplicate"));
    }

    #[test]
    fn dangling_producer_rejected() {
        let def = GraphDef {
            nodes: vec![node("b", "Relu", &["ghost"])],
        };
        let err = Graph::from_def(def).unwrap_err();
        assert!(format!("{err}").contains("ghost"));
    }

    #[test]
    fn out_of_range_slot_rejected() {
        let def = GraphDef {
            nodes: vec![node("a", "INPUT", &[]), node("b", "Relu", &["a:3"])],
        };
        let err = Graph::from_def(def).unwrap_err();
        assert!(format!("{err}").contains("slot 3"));
    }

    #[test]
    fn binary_roundtrip() {
        let def = GraphDef {
            nodes: vec![node("a", "INPUT", &[])],
        };
        let bytes = def.to_bytes();
        let back = GraphDef::decode(&bytes, GraphFormat::Binary).unwrap();
        assert_eq!(back, def);
    }
}
