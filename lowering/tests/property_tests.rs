// Property-based tests for lowering invariants.
//
// Three categories:
// 1. Shape descriptor encoding preserves element count for any legal rank
// 2. Shape interning is idempotent and pool indices stay in bounds
// 3. Generated layered DAGs lower with contiguous, dependency-ordered ids
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;

use gtc::dryrun::InputBinding;
use gtc::graph::{ConstValue, Graph, GraphDef, NodeDef};
use gtc::lower::GraphLowering;
use gtc::registry::SocOps;
use gtc::shape::{build_shape_array, Shape};
use gtc::tensor::DataType;

// ── Shape descriptor encoding ───────────────────────────────────────────────

fn arb_legal_dims() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..=8, 0..=5)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn descriptor_preserves_element_count(dims in arb_legal_dims()) {
        let shape = Shape::new(dims.clone());
        let array = build_shape_array(&shape).unwrap();
        let folded: i64 = array.iter().product();
        prop_assert_eq!(folded, shape.num_elements());
    }

    #[test]
    fn descriptor_right_aligns_trailing_dims(dims in prop::collection::vec(1i64..=8, 1..=4)) {
        let shape = Shape::new(dims.clone());
        let array = build_shape_array(&shape).unwrap();
        // Rank <= 4: trailing slots mirror the dims, leading slots are 1.
        let offset = 4 - dims.len();
        for (i, &d) in dims.iter().enumerate() {
            prop_assert_eq!(array[offset + i], d);
        }
        for slot in &array[..offset] {
            prop_assert_eq!(*slot, 1);
        }
    }

    #[test]
    fn oversized_rank_always_rejected(dims in prop::collection::vec(1i64..=4, 6..=8)) {
        let shape = Shape::new(dims);
        prop_assert!(build_shape_array(&shape).is_err());
    }
}

// ── Lowering over generated DAGs ────────────────────────────────────────────

/// A layered DAG of elementwise ops: one input, then layers where each node
/// consumes one node from an earlier layer. Always acyclic and connected.
#[derive(Debug, Clone)]
struct LayeredDag {
    nodes: Vec<NodeDef>,
}

fn elementwise(name: &str, op: &str, input: &str) -> NodeDef {
    NodeDef {
        name: name.to_string(),
        op: op.to_string(),
        inputs: vec![input.to_string()],
        shape: Some(Shape::new(vec![1, 4])),
        dtype: None,
        value: None,
        outputs: 1,
        padding: None,
        strides: Vec::new(),
        ksize: Vec::new(),
    }
}

fn arb_dag() -> impl Strategy<Value = LayeredDag> {
    // Per node: op choice and which earlier node feeds it (index modulo the
    // number of predecessors at build time).
    let per_node = (prop_oneof![Just("Relu"), Just("Identity"), Just("Softmax")], 0usize..32);
    (prop::collection::vec(per_node, 1..=12), any::<u64>()).prop_map(|(specs, seed)| {
        let mut nodes = vec![elementwise("in0", "INPUT", "")];
        nodes[0].inputs.clear();
        for (i, (op, pick)) in specs.iter().enumerate() {
            let feeder = nodes[pick % nodes.len()].name.clone();
            nodes.push(elementwise(&format!("n{}", i + 1), op, &feeder));
        }
        // Shuffle source order deterministically from the seed; lowering
        // must not depend on declaration order.
        let mut order: Vec<usize> = (0..nodes.len()).collect();
        let mut state = seed | 1;
        for i in (1..order.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            order.swap(i, (state >> 33) as usize % (i + 1));
        }
        let nodes = order.into_iter().map(|i| nodes[i].clone()).collect();
        LayeredDag { nodes }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn generated_dags_lower_with_ordered_ids(dag in arb_dag()) {
        let total = dag.nodes.len();
        let graph = Graph::from_def(GraphDef { nodes: dag.nodes }).unwrap();
        let bindings = [InputBinding::zeros(
            "in0",
            DataType::Float32,
            Shape::new(vec![1, 4]),
        )];
        let mut lowering = GraphLowering::new();
        lowering
            .load_graph(&SocOps::new(), &graph, &bindings, &[], None, None)
            .unwrap();
        let tables = lowering.tables();

        // Ids are contiguous from 0.
        let mut ids: Vec<i32> = tables.op_node_params().iter().map(|p| p.node_id).collect();
        ids.sort_unstable();
        prop_assert_eq!(ids, (0..total as i32).collect::<Vec<_>>());

        // Wiring references only already-registered producers.
        for row in tables.node_input_params() {
            for &(producer, _) in &row.inputs {
                prop_assert!(producer < row.node_id);
            }
        }

        // Parallel tables cover the same node set.
        prop_assert_eq!(tables.node_input_params().len(), total);
        prop_assert_eq!(tables.node_output_params().len(), total);
    }
}

// ── Constant shape interning ────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn interned_shape_ids_index_the_pool(dim_lists in prop::collection::vec(
        prop::collection::vec(1i64..=4, 1..=4),
        1..=8,
    )) {
        let nodes: Vec<NodeDef> = dim_lists
            .iter()
            .enumerate()
            .map(|(i, dims)| {
                let count: i64 = dims.iter().product();
                let mut n = elementwise(&format!("c{}", i), "Const", "");
                n.inputs.clear();
                n.shape = Some(Shape::new(dims.clone()));
                n.value = Some(ConstValue {
                    dtype: DataType::Float32,
                    dims: dims.clone(),
                    data: vec![0u8; count as usize * 4],
                });
                n
            })
            .collect();
        let graph = Graph::from_def(GraphDef { nodes }).unwrap();
        let mut lowering = GraphLowering::new();
        lowering
            .load_graph(&SocOps::new(), &graph, &[], &[], None, None)
            .unwrap();
        let tables = lowering.tables();

        let pool = tables.shape_pool();
        for row in tables.const_node_params() {
            // Every row's id resolves, and resolves to its own descriptor.
            prop_assert_eq!(pool[row.shape_id.0 as usize], row.shape);
        }

        // Pool entries are distinct.
        let mut seen = std::collections::HashSet::new();
        for shape in pool {
            prop_assert!(seen.insert(*shape));
        }
    }
}
