// dump.rs — Human-readable and verification renderings of transfer tables
//
// Two read-only views of an assembled IR: a line-per-row text dump for
// inspection, and a short digest block for comparing two lowering runs
// without diffing full dumps. Both are deterministic functions of the
// tables; neither mutates anything.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::shape::shape_array_string;
use crate::transfer::TransferTables;

/// Render every table row as one line of text, grouped per table. Rows
/// appear in registration order, so two runs over the same graph produce
/// identical dumps.
pub fn dump_node_transfer_params(tables: &TransferTables) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "*** summary: {} op node(s), {} const node(s), {} shape(s), {} const byte(s) ***",
        tables.op_node_params().len(),
        tables.const_node_params().len(),
        tables.shape_pool().len(),
        tables.const_data().len(),
    );

    let _ = writeln!(out, "*** op nodes ***");
    for p in tables.op_node_params() {
        let _ = writeln!(
            out,
            "[{}] name={}, op={}, soc_op_id={}, padding={}, inputs={}, outputs={}",
            p.node_id, p.name, p.op, p.soc_op_id, p.padding, p.inputs_size, p.outputs_size
        );
    }

    let _ = writeln!(out, "*** const nodes ***");
    for p in tables.const_node_params() {
        let _ = writeln!(
            out,
            "[{}] name={}, shape={}, shape_id={}, data_offset={}, data_size={}",
            p.node_id,
            p.name,
            shape_array_string(&p.shape),
            p.shape_id.0,
            p.data_offset,
            p.data_size
        );
    }

    let _ = writeln!(out, "*** shapes ***");
    for (i, shape) in tables.shape_pool().iter().enumerate() {
        let _ = writeln!(out, "[{}] {}", i, shape_array_string(shape));
    }

    let _ = writeln!(out, "*** node inputs ***");
    for p in tables.node_input_params() {
        let pairs: Vec<String> = p
            .inputs
            .iter()
            .map(|(id, slot)| format!("({}:{})", id, slot))
            .collect();
        let wiring = if pairs.is_empty() {
            "-".to_string()
        } else {
            pairs.join(", ")
        };
        let _ = writeln!(out, "[{}] {}", p.node_id, wiring);
    }

    let _ = writeln!(out, "*** node outputs ***");
    for p in tables.node_output_params() {
        let sizes: Vec<String> = p.max_sizes.iter().map(|s| s.to_string()).collect();
        let _ = writeln!(out, "[{}] max_sizes=[{}]", p.node_id, sizes.join(", "));
    }
    out
}

/// One `name: <sha256 hex>` line per table, digesting the dump lines of that
/// table. Stable across runs; any table difference changes its line.
pub fn verification_string(tables: &TransferTables) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "op_nodes: {}",
        digest_rows(tables.op_node_params().iter().map(|p| format!(
            "{},{},{},{},{},{},{}",
            p.node_id, p.name, p.op, p.soc_op_id, p.padding, p.inputs_size, p.outputs_size
        )))
    );
    let _ = writeln!(
        out,
        "const_nodes: {}",
        digest_rows(tables.const_node_params().iter().map(|p| format!(
            "{},{},{},{},{},{}",
            p.node_id,
            p.name,
            shape_array_string(&p.shape),
            p.shape_id.0,
            p.data_offset,
            p.data_size
        )))
    );
    let _ = writeln!(
        out,
        "node_inputs: {}",
        digest_rows(
            tables
                .node_input_params()
                .iter()
                .map(|p| format!("{},{:?}", p.node_id, p.inputs))
        )
    );
    let _ = writeln!(
        out,
        "node_outputs: {}",
        digest_rows(
            tables
                .node_output_params()
                .iter()
                .map(|p| format!("{},{:?}", p.node_id, p.max_sizes))
        )
    );
    let _ = writeln!(out, "const_data: {}", hex_digest(tables.const_data()));
    out
}

/// Pretty JSON encoding of the tables, for machine consumers.
pub fn to_json(tables: &TransferTables) -> String {
    serde_json::to_string_pretty(tables).expect("table serialization cannot fail")
}

fn digest_rows(rows: impl Iterator<Item = String>) -> String {
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update(row.as_bytes());
        hasher.update(b"\n");
    }
    hex_encode(&hasher.finalize())
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
