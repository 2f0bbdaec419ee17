// registry.rs — Target op capability registry
//
// Answers, per operation kind, whether the target SoC supports it, its
// device-side numeric identifier, and whether it needs padding/stride
// encoding. The lowering engine only sees the `OpsDefinitions` trait, so an
// alternate device can be substituted without touching the engine. `SocOps`
// is the table-driven implementation: a built-in op set, optionally extended
// from JSON op-table files.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ── Capability interface ─────────────────────────────────────────────────────

/// Capability queries the lowering engine makes against a target device.
pub trait OpsDefinitions {
    fn is_supported(&self, op: &str) -> bool;

    /// Device op identifier; defined only for supported ops.
    fn target_id(&self, op: &str) -> Option<i32>;

    fn requires_padding(&self, op: &str) -> bool;

    /// Marker identifier for graph input boundary nodes.
    fn input_op_id(&self) -> i32;

    /// Identifier of the lightweight flatten pass-through op.
    fn flatten_op_id(&self) -> i32;
}

// ── Op table entries ─────────────────────────────────────────────────────────

/// One row of an op capability table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpEntry {
    pub name: String,
    pub soc_id: i32,
    #[serde(default)]
    pub padded: bool,
}

/// Errors from loading op tables.
#[derive(Debug)]
pub enum RegistryError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        file: PathBuf,
        message: String,
    },
    DuplicateOp {
        name: String,
        second: PathBuf,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::IoError { path, source } => {
                write!(f, "{}: {}", path.display(), source)
            }
            RegistryError::ParseError { file, message } => {
                write!(f, "{}: {}", file.display(), message)
            }
            RegistryError::DuplicateOp { name, second } => {
                write!(
                    f,
                    "duplicate op '{}' redefined in {}",
                    name,
                    second.display()
                )
            }
        }
    }
}

impl std::error::Error for RegistryError {}

// ── SoC implementation ───────────────────────────────────────────────────────

/// Device op ids reserved for lowering-synthesized entries. Id 1 is held
/// back for the device loader's own sink entries; real ops start at 3.
pub const INPUT_OP_ID: i32 = 0;
pub const FLATTEN_OP_ID: i32 = 2;

/// Built-in capability set of the reference SoC target.
const BUILTIN_OPS: &[(&str, i32, bool)] = &[
    ("Conv2D", 3, true),
    ("MaxPool", 4, true),
    ("AvgPool", 5, true),
    ("Relu", 6, false),
    ("Softmax", 7, false),
    ("MatMul", 8, false),
    ("Add", 9, false),
    ("Mul", 10, false),
    ("BiasAdd", 11, false),
    ("Identity", 12, false),
    ("Concat", 13, false),
];

/// Table-driven op capability registry for the SoC target.
pub struct SocOps {
    ops: HashMap<String, (OpEntry, Option<PathBuf>)>,
}

impl Default for SocOps {
    fn default() -> Self {
        Self::new()
    }
}

impl SocOps {
    /// Registry preloaded with the built-in SoC op set.
    pub fn new() -> Self {
        let mut ops = HashMap::new();
        for &(name, soc_id, padded) in BUILTIN_OPS {
            ops.insert(
                name.to_string(),
                (
                    OpEntry {
                        name: name.to_string(),
                        soc_id,
                        padded,
                    },
                    None,
                ),
            );
        }
        SocOps { ops }
    }

    /// Empty registry; useful for targets defined entirely by tables.
    pub fn empty() -> Self {
        SocOps {
            ops: HashMap::new(),
        }
    }

    /// Extend the registry from a JSON op-table file (an `OpEntry` array).
    /// Returns the number of ops added.
    pub fn load_table(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let source = std::fs::read_to_string(path).map_err(|e| RegistryError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let entries: Vec<OpEntry> =
            serde_json::from_str(&source).map_err(|e| RegistryError::ParseError {
                file: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let count = entries.len();
        for entry in entries {
            if self.ops.contains_key(&entry.name) {
                return Err(RegistryError::DuplicateOp {
                    name: entry.name,
                    second: path.to_path_buf(),
                });
            }
            self.ops
                .insert(entry.name.clone(), (entry, Some(path.to_path_buf())));
        }
        Ok(count)
    }

    pub fn insert(&mut self, entry: OpEntry) {
        self.ops.insert(entry.name.clone(), (entry, None));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl OpsDefinitions for SocOps {
    fn is_supported(&self, op: &str) -> bool {
        self.ops.contains_key(op)
    }

    fn target_id(&self, op: &str) -> Option<i32> {
        self.ops.get(op).map(|(entry, _)| entry.soc_id)
    }

    fn requires_padding(&self, op: &str) -> bool {
        self.ops.get(op).map(|(entry, _)| entry.padded).unwrap_or(false)
    }

    fn input_op_id(&self) -> i32 {
        INPUT_OP_ID
    }

    fn flatten_op_id(&self) -> i32 {
        FLATTEN_OP_ID
    }
}
