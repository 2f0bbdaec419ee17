use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gtc::dryrun::{InputBinding, ReferenceExecutor};
use gtc::graph::{ConstValue, Graph, GraphDef, NodeDef, Padding};
use gtc::lower::GraphLowering;
use gtc::registry::SocOps;
use gtc::shape::Shape;
use gtc::tensor::DataType;

// Benchmark scenarios: representative graphs plus a depth-scaling generator.
// All scenarios lower cleanly against the built-in op set.

fn node(name: &str, op: &str, inputs: &[&str], shape: Option<Vec<i64>>) -> NodeDef {
    NodeDef {
        name: name.to_string(),
        op: op.to_string(),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        shape: shape.map(Shape::new),
        dtype: None,
        value: None,
        outputs: 1,
        padding: None,
        strides: Vec::new(),
        ksize: Vec::new(),
    }
}

fn f32_const(name: &str, dims: Vec<i64>) -> NodeDef {
    let count: i64 = dims.iter().product();
    let mut n = node(name, "Const", &[], Some(dims.clone()));
    n.value = Some(ConstValue {
        dtype: DataType::Float32,
        dims,
        data: vec![0u8; count as usize * 4],
    });
    n
}

/// Small convolutional network: conv → bias → relu → pool → matmul → softmax.
fn conv_network() -> (GraphDef, Vec<InputBinding>, Vec<String>) {
    let mut conv = node("conv", "Conv2D", &["x", "w"], Some(vec![1, 8, 8, 4]));
    conv.padding = Some(Padding::Same);
    conv.strides = vec![1, 1, 1, 1];
    let mut pool = node("pool", "MaxPool", &["relu"], Some(vec![1, 4, 4, 4]));
    pool.padding = Some(Padding::Valid);
    pool.strides = vec![1, 2, 2, 1];

    let def = GraphDef {
        nodes: vec![
            node("x", "INPUT", &[], Some(vec![1, 8, 8, 1])),
            f32_const("w", vec![3, 3, 1, 4]),
            f32_const("b", vec![4]),
            conv,
            node("bias", "BiasAdd", &["conv", "b"], Some(vec![1, 8, 8, 4])),
            node("relu", "Relu", &["bias"], Some(vec![1, 8, 8, 4])),
            pool,
            node("flat", "Reshape", &["pool"], Some(vec![64])),
            node("out", "Softmax", &["flat"], Some(vec![64])),
        ],
    };
    let bindings = vec![InputBinding::zeros(
        "x",
        DataType::Float32,
        Shape::new(vec![1, 8, 8, 1]),
    )];
    (def, bindings, vec!["out".to_string()])
}

/// Depth-scaling generator: a chain of n elementwise ops, declared in
/// reverse source order to exercise the fixpoint traversal.
fn generate_chain(n: usize) -> (GraphDef, Vec<InputBinding>, Vec<String>) {
    let mut nodes = Vec::with_capacity(n + 1);
    for i in (1..=n).rev() {
        let feeder = if i == 1 {
            "x".to_string()
        } else {
            format!("n{}", i - 1)
        };
        nodes.push(node(
            &format!("n{}", i),
            "Relu",
            &[feeder.as_str()],
            Some(vec![1, 64]),
        ));
    }
    nodes.push(node("x", "INPUT", &[], Some(vec![1, 64])));

    let bindings = vec![InputBinding::zeros(
        "x",
        DataType::Float32,
        Shape::new(vec![1, 64]),
    )];
    (nodes_to_def(nodes), bindings, vec![format!("n{}", n)])
}

fn nodes_to_def(nodes: Vec<NodeDef>) -> GraphDef {
    GraphDef { nodes }
}

fn lower_once(graph: &Graph, bindings: &[InputBinding], outputs: &[String]) {
    let mut lowering = GraphLowering::new();
    lowering
        .load_graph(
            &SocOps::new(),
            graph,
            bindings,
            outputs,
            None,
            Some(&ReferenceExecutor),
        )
        .expect("benchmark scenario must lower");
    black_box(lowering.tables());
}

// Graph validation latency on the conv scenario.
fn bench_graph_validation(c: &mut Criterion) {
    let (def, _, _) = conv_network();
    c.bench_function("lowering/graph_validation", |b| {
        b.iter(|| {
            let graph = Graph::from_def(black_box(def.clone())).unwrap();
            black_box(&graph);
        });
    });
}

// Full lowering latency (validate → classify → tables) on the conv scenario.
fn bench_full_lowering(c: &mut Criterion) {
    let (def, bindings, outputs) = conv_network();
    let graph = Graph::from_def(def).unwrap();
    c.bench_function("lowering/conv_network", |b| {
        b.iter(|| lower_once(black_box(&graph), &bindings, &outputs));
    });
}

// Scalability over chain depth; reverse declaration order makes this the
// worst case for the fixpoint traversal.
fn bench_chain_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("lowering/chain_depth");
    for depth in [16usize, 64, 256] {
        let (def, bindings, outputs) = generate_chain(depth);
        let graph = Graph::from_def(def).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| lower_once(black_box(&graph), &bindings, &outputs));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_graph_validation,
    bench_full_lowering,
    bench_chain_scaling
);
criterion_main!(benches);
