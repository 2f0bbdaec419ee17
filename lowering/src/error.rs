// error.rs — Unified error type for graph lowering
//
// Every failure a lowering run can hit surfaces to the load entry point as
// one of these variants, carrying the node name and expected/actual context
// needed to diagnose it. The engine never retries: lowering is deterministic
// and re-running with the same inputs reproduces the same failure.

use std::fmt;

use crate::shape::{ShapeArray, MAX_SUPPORTED_RANK};

#[derive(Debug)]
pub enum LowerError {
    /// Malformed or unparsable graph source.
    GraphLoad { message: String },
    /// A declared input/output node name is absent from the graph.
    UnboundName { name: String, role: &'static str },
    /// Operation kind unknown to the capability provider and not a
    /// boundary/constant special case.
    UnsupportedOperation { node: String, op: String },
    /// Shape rank beyond the device's fixed-rank tensor model.
    RankExceeded { node: String, rank: usize },
    /// Host execution failed, or a requested node was unreachable.
    DryRunFailure { node: Option<String>, message: String },
    /// Strict-mode disagreement between static and dry-run shapes.
    ShapeInconsistency {
        node: String,
        expected: ShapeArray,
        actual: ShapeArray,
    },
    /// Traversal cannot make progress: cyclic or missing dependency.
    DependencyUnresolved { remaining: Vec<String> },
    /// Engine invariant breach (a bug, not a user error).
    Internal { message: String },
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LowerError::GraphLoad { message } => {
                write!(f, "graph load failed: {}", message)
            }
            LowerError::UnboundName { name, role } => {
                write!(f, "declared {} node '{}' not found in graph", role, name)
            }
            LowerError::UnsupportedOperation { node, op } => {
                write!(f, "node '{}': operation '{}' is not supported by the target", node, op)
            }
            LowerError::RankExceeded { node, rank } => {
                write!(
                    f,
                    "node '{}': shape rank {} exceeds maximum supported rank {}",
                    node, rank, MAX_SUPPORTED_RANK
                )
            }
            LowerError::DryRunFailure { node, message } => match node {
                Some(name) => write!(f, "dry run failed at node '{}': {}", name, message),
                None => write!(f, "dry run failed: {}", message),
            },
            LowerError::ShapeInconsistency {
                node,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "node '{}': static shape {:?} disagrees with dry-run shape {:?}",
                    node, expected, actual
                )
            }
            LowerError::DependencyUnresolved { remaining } => {
                write!(
                    f,
                    "cannot resolve dependencies for nodes: {}",
                    remaining.join(", ")
                )
            }
            LowerError::Internal { message } => {
                write!(f, "internal invariant violated: {}", message)
            }
        }
    }
}

impl std::error::Error for LowerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unbound_name() {
        let e = LowerError::UnboundName {
            name: "y".to_string(),
            role: "output",
        };
        assert_eq!(format!("{e}"), "declared output node 'y' not found in graph");
    }

    #[test]
    fn display_shape_inconsistency() {
        let e = LowerError::ShapeInconsistency {
            node: "conv".to_string(),
            expected: [1, 1, 2, 3],
            actual: [1, 1, 2, 4],
        };
        let s = format!("{e}");
        assert!(s.contains("conv"));
        assert!(s.contains("[1, 1, 2, 3]"));
        assert!(s.contains("[1, 1, 2, 4]"));
    }
}
