use clap::Parser;
use std::path::PathBuf;

use gtc::dryrun::{InputBinding, ReferenceExecutor};
use gtc::dump;
use gtc::graph::GraphFormat;
use gtc::lower::GraphLowering;
use gtc::registry::SocOps;
use gtc::shape::Shape;
use gtc::tensor::DataType;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Summary,
    Dump,
    Verify,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "gtc",
    version,
    about = "Graph Transfer Compiler — lowers dataflow graph descriptions to SoC transfer tables"
)]
struct Cli {
    /// Input graph description file
    graph: PathBuf,

    /// Op capability table file (repeatable)
    #[arg(long = "ops-table")]
    ops_table: Vec<PathBuf>,

    /// Graph input binding, as name=dtype:DIMxDIMx... (repeatable)
    #[arg(short, long = "input")]
    input: Vec<String>,

    /// Graph output node name (repeatable)
    #[arg(short, long = "output")]
    output: Vec<String>,

    /// Read the graph file in the compact binary encoding
    #[arg(long)]
    binary: bool,

    /// Skip the static-vs-dry-run shape consistency check
    #[arg(long)]
    no_strict: bool,

    /// Fail instead of dry-running when shapes are not statically known
    #[arg(long)]
    no_dry_run: bool,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Summary)]
    emit: EmitStage,

    /// Print lowering phases
    #[arg(long)]
    verbose: bool,
}

/// Parse `name=dtype:2x3x4`. A dimension list of `1` binds a scalar-like
/// single-element tensor; the value is always zero-filled.
fn parse_input_spec(spec: &str) -> Result<InputBinding, String> {
    let (name, rest) = spec
        .split_once('=')
        .ok_or_else(|| format!("'{}': expected name=dtype:dims", spec))?;
    let (dtype_name, dims_text) = rest
        .split_once(':')
        .ok_or_else(|| format!("'{}': expected name=dtype:dims", spec))?;
    let dtype = match dtype_name {
        "f32" => DataType::Float32,
        "i32" => DataType::Int32,
        "u8" => DataType::Uint8,
        "qu8" => DataType::Quint8,
        other => return Err(format!("'{}': unknown dtype '{}'", spec, other)),
    };
    let mut dims = Vec::new();
    for part in dims_text.split('x') {
        let dim: i64 = part
            .parse()
            .map_err(|_| format!("'{}': bad dimension '{}'", spec, part))?;
        dims.push(dim);
    }
    Ok(InputBinding::zeros(name, dtype, Shape::new(dims)))
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("gtc: graph  = {}", cli.graph.display());
        eprintln!("gtc: emit   = {:?}", cli.emit);
        eprintln!("gtc: strict = {}", !cli.no_strict);
    }

    // ── Load op capability registry ──
    let mut ops = SocOps::new();
    for path in &cli.ops_table {
        match ops.load_table(path) {
            Ok(n) => {
                if cli.verbose {
                    eprintln!("gtc: loaded {} ops from {}", n, path.display());
                }
            }
            Err(e) => {
                eprintln!("gtc: error: {}", e);
                std::process::exit(2);
            }
        }
    }

    if cli.verbose {
        eprintln!("gtc: {} ops registered", ops.len());
    }

    // ── Parse input bindings ──
    let mut bindings = Vec::with_capacity(cli.input.len());
    for spec in &cli.input {
        match parse_input_spec(spec) {
            Ok(binding) => bindings.push(binding),
            Err(message) => {
                eprintln!("gtc: error: {}", message);
                std::process::exit(2);
            }
        }
    }

    // ── Lower ──
    let format = if cli.binary {
        GraphFormat::Binary
    } else {
        GraphFormat::Text
    };
    let mut lowering = GraphLowering::new();
    lowering.enable_strict_check_mode(!cli.no_strict);

    let executor = ReferenceExecutor;
    let graph = match lowering.load_graph_from_file(
        &ops,
        &cli.graph,
        format,
        &bindings,
        &cli.output,
        !cli.no_dry_run,
        Some(&executor),
    ) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("gtc: error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!("gtc: lowered {} node(s)", graph.len());
    }

    // ── Emit ──
    let tables = lowering.tables();
    match cli.emit {
        EmitStage::Summary => {
            println!(
                "{} op node(s), {} const node(s), {} shape(s), {} const byte(s)",
                tables.op_node_params().len(),
                tables.const_node_params().len(),
                tables.shape_pool().len(),
                tables.const_data().len(),
            );
            let ids: Vec<String> = lowering
                .output_node_ids()
                .iter()
                .map(|id| id.to_string())
                .collect();
            println!("output node id(s): [{}]", ids.join(", "));
        }
        EmitStage::Dump => print!("{}", dump::dump_node_transfer_params(tables)),
        EmitStage::Verify => print!("{}", dump::verification_string(tables)),
        EmitStage::Json => println!("{}", dump::to_json(tables)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_spec_parsed() {
        let binding = parse_input_spec("x=f32:1x224x224x3").unwrap();
        assert_eq!(binding.name, "x");
        assert_eq!(binding.shape().dims(), &[1, 224, 224, 3]);
    }

    #[test]
    fn bad_input_spec_rejected() {
        assert!(parse_input_spec("x:f32").is_err());
        assert!(parse_input_spec("x=f64:1").is_err());
        assert!(parse_input_spec("x=f32:axb").is_err());
    }
}
