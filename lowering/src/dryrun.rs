// dryrun.rs — One-shot dry-run execution for shape resolution
//
// When static graph metadata leaves a node's shape unknown, the engine
// executes the graph once with concrete (or zero-filled) inputs and caches
// every node's output tensor. The host execution engine itself is an
// external collaborator behind the `GraphExecutor` trait; this module
// validates bindings, invokes the executor exactly once per lowering run,
// and packages the result for name-keyed lookup.
//
// Preconditions: `graph` has passed validation.
// Postconditions: on success, every requested node has a tensor in the result.
// Failure modes: binding/target names absent from the graph → `UnboundName`;
//                executor failure → `DryRunFailure`.
// Side effects: whatever the executor does; the reference executor is pure.

use std::collections::HashMap;
use std::fmt;

use crate::error::LowerError;
use crate::graph::{Graph, NodeDef, NodeIndex, Padding};
use crate::shape::Shape;
use crate::tensor::{DataType, Tensor};

// ── Input bindings ───────────────────────────────────────────────────────────

/// Value bound to a graph input for the dry run.
#[derive(Debug, Clone)]
pub enum BindingValue {
    /// Caller-provided concrete tensor.
    Tensor(Tensor),
    /// Zero-initialization request of the given type and shape.
    ZeroOf { dtype: DataType, shape: Shape },
}

/// A named graph input plus its dry-run value.
#[derive(Debug, Clone)]
pub struct InputBinding {
    pub name: String,
    pub value: BindingValue,
}

impl InputBinding {
    pub fn tensor(name: impl Into<String>, tensor: Tensor) -> Self {
        InputBinding {
            name: name.into(),
            value: BindingValue::Tensor(tensor),
        }
    }

    pub fn zeros(name: impl Into<String>, dtype: DataType, shape: Shape) -> Self {
        InputBinding {
            name: name.into(),
            value: BindingValue::ZeroOf { dtype, shape },
        }
    }

    /// The concrete tensor this binding materializes to.
    pub fn materialize(&self) -> Tensor {
        match &self.value {
            BindingValue::Tensor(t) => t.clone(),
            BindingValue::ZeroOf { dtype, shape } => Tensor::zeros(*dtype, shape.clone()),
        }
    }

    /// Shape of the bound value without materializing it.
    pub fn shape(&self) -> &Shape {
        match &self.value {
            BindingValue::Tensor(t) => t.shape(),
            BindingValue::ZeroOf { shape, .. } => shape,
        }
    }
}

// ── Executor seam ────────────────────────────────────────────────────────────

/// Failure inside the host execution engine.
#[derive(Debug)]
pub struct ExecError {
    pub node: Option<String>,
    pub message: String,
}

impl ExecError {
    fn at(node: &str, message: impl Into<String>) -> Self {
        ExecError {
            node: Some(node.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "node '{}': {}", node, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ExecError {}

/// Host execution engine boundary. Executes the graph once with the given
/// concrete inputs and returns the primary-output tensor of every target
/// node. Blocking and synchronous; cancellation, if wanted, lives outside.
pub trait GraphExecutor {
    fn execute(
        &self,
        graph: &Graph,
        inputs: &[(String, Tensor)],
        targets: &[String],
    ) -> Result<Vec<(String, Tensor)>, ExecError>;
}

// ── Cached results ───────────────────────────────────────────────────────────

/// Dry-run results: the owned tensor list plus a name-keyed index into it.
/// Built once per lowering run and consulted for every node lookup.
#[derive(Debug, Default)]
pub struct OutputTensorInfo {
    tensors: Vec<Tensor>,
    by_name: HashMap<String, usize>,
}

impl OutputTensorInfo {
    pub fn from_pairs(pairs: Vec<(String, Tensor)>) -> Self {
        let mut tensors = Vec::with_capacity(pairs.len());
        let mut by_name = HashMap::with_capacity(pairs.len());
        for (name, tensor) in pairs {
            by_name.insert(name, tensors.len());
            tensors.push(tensor);
        }
        OutputTensorInfo { tensors, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.by_name.get(name).map(|&i| &self.tensors[i])
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

// ── Orchestration ────────────────────────────────────────────────────────────

fn check_bound_names(
    graph: &Graph,
    bindings: &[InputBinding],
    targets: &[String],
) -> Result<(), LowerError> {
    for binding in bindings {
        if graph.node_by_name(&binding.name).is_none() {
            return Err(LowerError::UnboundName {
                name: binding.name.clone(),
                role: "input",
            });
        }
    }
    for target in targets {
        if graph.node_by_name(target).is_none() {
            return Err(LowerError::UnboundName {
                name: target.clone(),
                role: "output",
            });
        }
    }
    Ok(())
}

fn materialize_bindings(bindings: &[InputBinding]) -> Vec<(String, Tensor)> {
    bindings
        .iter()
        .map(|b| (b.name.clone(), b.materialize()))
        .collect()
}

/// Execute the graph once and return the tensors observed at the requested
/// nodes, in request order.
pub fn dry_run_inference(
    executor: &dyn GraphExecutor,
    graph: &Graph,
    bindings: &[InputBinding],
    target_names: &[String],
) -> Result<Vec<Tensor>, LowerError> {
    check_bound_names(graph, bindings, target_names)?;
    let inputs = materialize_bindings(bindings);
    let pairs = executor
        .execute(graph, &inputs, target_names)
        .map_err(|e| LowerError::DryRunFailure {
            node: e.node.clone(),
            message: e.message,
        })?;
    let info = OutputTensorInfo::from_pairs(pairs);

    let mut ordered = Vec::with_capacity(target_names.len());
    for name in target_names {
        match info.get(name) {
            Some(tensor) => ordered.push(tensor.clone()),
            None => {
                return Err(LowerError::DryRunFailure {
                    node: Some(name.clone()),
                    message: "executor produced no tensor for requested node".to_string(),
                })
            }
        }
    }
    Ok(ordered)
}

/// Execute the graph once and cache a tensor for every node. Invoked at most
/// once per lowering run; the result serves all subsequent shape lookups.
pub fn dry_run_inference_for_all_nodes(
    executor: &dyn GraphExecutor,
    graph: &Graph,
    bindings: &[InputBinding],
) -> Result<OutputTensorInfo, LowerError> {
    check_bound_names(graph, bindings, &[])?;
    let inputs = materialize_bindings(bindings);
    let targets: Vec<String> = graph.indices().map(|i| graph.node(i).name.clone()).collect();
    let pairs = executor
        .execute(graph, &inputs, &targets)
        .map_err(|e| LowerError::DryRunFailure {
            node: e.node.clone(),
            message: e.message,
        })?;
    Ok(OutputTensorInfo::from_pairs(pairs))
}

// ── Reference executor ───────────────────────────────────────────────────────

/// Minimal host interpreter used by tests and the CLI. Value-exact for
/// constants, passthrough, and elementwise f32 ops; shape-exact (zero-filled
/// output) for windowed and contraction ops, which is all a shape dry run
/// needs. Unknown ops fail the run.
#[derive(Debug, Default)]
pub struct ReferenceExecutor;

impl GraphExecutor for ReferenceExecutor {
    fn execute(
        &self,
        graph: &Graph,
        inputs: &[(String, Tensor)],
        targets: &[String],
    ) -> Result<Vec<(String, Tensor)>, ExecError> {
        let bound: HashMap<&str, &Tensor> =
            inputs.iter().map(|(n, t)| (n.as_str(), t)).collect();

        let mut computed: Vec<Option<Tensor>> = vec![None; graph.len()];
        let mut remaining = graph.len();
        while remaining > 0 {
            let mut progressed = false;
            for index in graph.indices() {
                if computed[index.0].is_some() {
                    continue;
                }
                let ready = graph
                    .inputs_of(index)
                    .iter()
                    .all(|r| computed[r.producer.0].is_some());
                if !ready {
                    continue;
                }
                let tensor = eval_node(graph, index, &bound, &computed)?;
                computed[index.0] = Some(tensor);
                remaining -= 1;
                progressed = true;
            }
            if remaining > 0 && !progressed {
                let stuck: Vec<&str> = graph
                    .indices()
                    .filter(|i| computed[i.0].is_none())
                    .map(|i| graph.node(i).name.as_str())
                    .collect();
                return Err(ExecError {
                    node: stuck.first().map(|s| s.to_string()),
                    message: format!("unreachable or cyclic nodes: {}", stuck.join(", ")),
                });
            }
        }

        let mut results = Vec::with_capacity(targets.len());
        for name in targets {
            let index = graph.node_by_name(name).ok_or_else(|| ExecError {
                node: Some(name.clone()),
                message: "requested node not in graph".to_string(),
            })?;
            // Loop above computed every node.
            let tensor = computed[index.0].clone().ok_or_else(|| ExecError {
                node: Some(name.clone()),
                message: "node was not computed".to_string(),
            })?;
            results.push((name.clone(), tensor));
        }
        Ok(results)
    }
}

fn eval_node(
    graph: &Graph,
    index: NodeIndex,
    bound: &HashMap<&str, &Tensor>,
    computed: &[Option<Tensor>],
) -> Result<Tensor, ExecError> {
    let node = graph.node(index);
    if let Some(tensor) = bound.get(node.name.as_str()) {
        return Ok((*tensor).clone());
    }
    if let Some(value) = &node.value {
        return Tensor::from_bytes(
            value.dtype,
            Shape::new(value.dims.clone()),
            value.data.clone(),
        )
        .map_err(|e| ExecError::at(&node.name, e.to_string()));
    }

    let arg = |slot: usize| -> Result<&Tensor, ExecError> {
        let input = graph
            .inputs_of(index)
            .get(slot)
            .ok_or_else(|| ExecError::at(&node.name, format!("missing input {}", slot)))?;
        computed[input.producer.0]
            .as_ref()
            .ok_or_else(|| ExecError::at(&node.name, "producer not yet computed"))
    };

    match node.op.as_str() {
        "INPUT" | "Placeholder" => Err(ExecError::at(&node.name, "input node has no binding")),
        "Identity" => Ok(arg(0)?.clone()),
        "Relu" => unary_f32(&node.name, arg(0)?, |v| v.max(0.0)),
        "Add" => binary_f32(&node.name, arg(0)?, arg(1)?, |a, b| a + b),
        "Mul" => binary_f32(&node.name, arg(0)?, arg(1)?, |a, b| a * b),
        "BiasAdd" => bias_add(&node.name, arg(0)?, arg(1)?),
        "Reshape" => {
            let input = arg(0)?;
            let target = reshape_target(node, input, graph, index, computed)?;
            input
                .reshaped(target)
                .map_err(|e| ExecError::at(&node.name, e.to_string()))
        }
        "Conv2D" => {
            let input = arg(0)?;
            let filter = arg(1)?;
            let out = conv2d_shape(node, input.shape(), filter.shape())?;
            Ok(Tensor::zeros(input.dtype(), out))
        }
        "MaxPool" | "AvgPool" => {
            let input = arg(0)?;
            let out = pool_shape(node, input.shape())?;
            Ok(Tensor::zeros(input.dtype(), out))
        }
        "MatMul" => {
            let a = arg(0)?.shape().dims().to_vec();
            let b = arg(1)?.shape().dims().to_vec();
            if a.len() != 2 || b.len() != 2 || a[1] != b[0] {
                return Err(ExecError::at(
                    &node.name,
                    format!("incompatible matmul shapes {:?} x {:?}", a, b),
                ));
            }
            Ok(Tensor::zeros(arg(0)?.dtype(), Shape::new(vec![a[0], b[1]])))
        }
        "Softmax" => {
            let input = arg(0)?;
            Ok(Tensor::zeros(input.dtype(), input.shape().clone()))
        }
        op => Err(ExecError::at(
            &node.name,
            format!("reference executor cannot run op '{}'", op),
        )),
    }
}

fn unary_f32(name: &str, t: &Tensor, f: impl Fn(f32) -> f32) -> Result<Tensor, ExecError> {
    let values = t
        .as_f32()
        .ok_or_else(|| ExecError::at(name, "expected f32 operand"))?;
    let mapped: Vec<f32> = values.into_iter().map(f).collect();
    Tensor::from_f32(t.shape().clone(), &mapped).map_err(|e| ExecError::at(name, e.to_string()))
}

fn binary_f32(
    name: &str,
    a: &Tensor,
    b: &Tensor,
    f: impl Fn(f32, f32) -> f32,
) -> Result<Tensor, ExecError> {
    let av = a
        .as_f32()
        .ok_or_else(|| ExecError::at(name, "expected f32 operand"))?;
    let bv = b
        .as_f32()
        .ok_or_else(|| ExecError::at(name, "expected f32 operand"))?;
    let out: Vec<f32> = if bv.len() == 1 {
        av.iter().map(|&x| f(x, bv[0])).collect()
    } else if av.len() == 1 {
        bv.iter().map(|&y| f(av[0], y)).collect()
    } else if av.len() == bv.len() {
        av.iter().zip(&bv).map(|(&x, &y)| f(x, y)).collect()
    } else {
        return Err(ExecError::at(
            name,
            format!("operand length mismatch: {} vs {}", av.len(), bv.len()),
        ));
    };
    let shape = if av.len() >= bv.len() {
        a.shape().clone()
    } else {
        b.shape().clone()
    };
    Tensor::from_f32(shape, &out).map_err(|e| ExecError::at(name, e.to_string()))
}

fn bias_add(name: &str, input: &Tensor, bias: &Tensor) -> Result<Tensor, ExecError> {
    let av = input
        .as_f32()
        .ok_or_else(|| ExecError::at(name, "expected f32 operand"))?;
    let bv = bias
        .as_f32()
        .ok_or_else(|| ExecError::at(name, "expected f32 bias"))?;
    if bv.is_empty() || av.len() % bv.len() != 0 {
        return Err(ExecError::at(
            name,
            format!("bias length {} does not divide input length {}", bv.len(), av.len()),
        ));
    }
    let out: Vec<f32> = av
        .iter()
        .enumerate()
        .map(|(i, &x)| x + bv[i % bv.len()])
        .collect();
    Tensor::from_f32(input.shape().clone(), &out).map_err(|e| ExecError::at(name, e.to_string()))
}

fn reshape_target(
    node: &NodeDef,
    input: &Tensor,
    graph: &Graph,
    index: NodeIndex,
    computed: &[Option<Tensor>],
) -> Result<Shape, ExecError> {
    if let Some(shape) = &node.shape {
        return Ok(shape.clone());
    }
    // Second input carries the target dims as an i32 tensor; -1 infers.
    let dims_input = graph
        .inputs_of(index)
        .get(1)
        .ok_or_else(|| ExecError::at(&node.name, "reshape without shape or dims input"))?;
    let dims_tensor = computed[dims_input.producer.0]
        .as_ref()
        .ok_or_else(|| ExecError::at(&node.name, "dims producer not yet computed"))?;
    let raw = dims_tensor
        .as_i32()
        .ok_or_else(|| ExecError::at(&node.name, "reshape dims must be i32"))?;

    let total = input.shape().num_elements();
    let known: i64 = raw.iter().filter(|&&d| d != -1).map(|&d| d as i64).product();
    let dims: Vec<i64> = raw
        .iter()
        .map(|&d| {
            if d == -1 {
                if known == 0 {
                    0
                } else {
                    total / known
                }
            } else {
                d as i64
            }
        })
        .collect();
    Ok(Shape::new(dims))
}

fn window_dims(name: &str, dims: &[i64], what: &str) -> Result<(i64, i64), ExecError> {
    let (h, w) = match dims.len() {
        4 => (dims[1], dims[2]),
        2 => (dims[0], dims[1]),
        n => {
            return Err(ExecError::at(
                name,
                format!("{} must have 2 or 4 entries, got {}", what, n),
            ))
        }
    };
    if h <= 0 || w <= 0 {
        return Err(ExecError::at(
            name,
            format!("{} entries must be positive, got {}x{}", what, h, w),
        ));
    }
    Ok((h, w))
}

fn windowed_extent(extent: i64, window: i64, stride: i64, padding: Padding) -> i64 {
    match padding {
        Padding::Same => (extent + stride - 1) / stride,
        Padding::Valid => (extent - window + stride) / stride,
    }
}

fn conv2d_shape(node: &NodeDef, input: &Shape, filter: &Shape) -> Result<Shape, ExecError> {
    let in_dims = input.dims();
    let f_dims = filter.dims();
    if in_dims.len() != 4 || f_dims.len() != 4 {
        return Err(ExecError::at(
            &node.name,
            format!("conv expects rank-4 input and filter, got {} and {}", input, filter),
        ));
    }
    let padding = node
        .padding
        .ok_or_else(|| ExecError::at(&node.name, "conv without padding attribute"))?;
    let (sh, sw) = window_dims(&node.name, &node.strides, "strides")?;
    let oh = windowed_extent(in_dims[1], f_dims[0], sh, padding);
    let ow = windowed_extent(in_dims[2], f_dims[1], sw, padding);
    Ok(Shape::new(vec![in_dims[0], oh, ow, f_dims[3]]))
}

fn pool_shape(node: &NodeDef, input: &Shape) -> Result<Shape, ExecError> {
    let in_dims = input.dims();
    if in_dims.len() != 4 {
        return Err(ExecError::at(
            &node.name,
            format!("pool expects rank-4 input, got {}", input),
        ));
    }
    let padding = node
        .padding
        .ok_or_else(|| ExecError::at(&node.name, "pool without padding attribute"))?;
    let (sh, sw) = window_dims(&node.name, &node.strides, "strides")?;
    let window = if node.ksize.is_empty() {
        &node.strides
    } else {
        &node.ksize
    };
    let (kh, kw) = window_dims(&node.name, window, "ksize")?;
    let oh = windowed_extent(in_dims[1], kh, sh, padding);
    let ow = windowed_extent(in_dims[2], kw, sw, padding);
    Ok(Shape::new(vec![in_dims[0], oh, ow, in_dims[3]]))
}
