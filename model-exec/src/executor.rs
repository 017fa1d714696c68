use crate::{
    backend::{Backend, ModuleCall},
    common::*,
    error::Error,
    plan::ExecPlan,
};
use rayon::prelude::*;

/// Outputs of a run that also evaluates the detection head.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadOutput<T> {
    pub taps: IndexMap<TapName, T>,
    pub head: T,
}

/// Runs compiled graphs on a backend.
///
/// The executor holds no per-run state, so one executor can run any number
/// of graphs, also from several threads at once.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Executor<B> {
    #[derivative(Debug = "ignore")]
    backend: B,
    cancel_flag: Option<Arc<AtomicBool>>,
}

/// Node outputs of one run, dropped as soon as no pending consumer needs them.
struct Cache<'p, T> {
    plan: &'p ExecPlan,
    values: HashMap<NodeKey, T>,
    remaining: HashMap<NodeKey, usize>,
}

impl<'p, T> Cache<'p, T> {
    fn new(plan: &'p ExecPlan) -> Self {
        Self {
            plan,
            values: HashMap::new(),
            remaining: plan.order().iter().map(|&key| (key, plan.uses(key))).collect(),
        }
    }

    fn inputs<'a>(&'a self, node: &Node, input: &'a T) -> Vec<&'a T> {
        node.producers
            .iter()
            .filter_map(|producer| match producer {
                Producer::Input => Some(input),
                Producer::Node(key) => self.values.get(key),
            })
            .collect()
    }

    fn insert(&mut self, key: NodeKey, value: T) {
        self.values.insert(key, value);
    }

    /// Counts down the uses of the producers of a finished node.
    fn release(&mut self, node: &Node) {
        node.producers
            .iter()
            .filter_map(Producer::node)
            .for_each(|src_key| {
                let count = self.remaining.entry(src_key).or_insert(0);
                *count = count.saturating_sub(1);
                if *count == 0 && !self.plan.is_target(src_key) {
                    self.values.remove(&src_key);
                    trace!("evict output of node {}", src_key);
                }
            });
    }

    fn take(&mut self, key: NodeKey) -> Option<T> {
        self.values.remove(&key)
    }
}

impl<B> Executor<B>
where
    B: Backend,
{
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            cancel_flag: None,
        }
    }

    /// Checks the flag at node boundaries and abandons the run once it is set.
    pub fn with_cancel_flag(self, flag: Arc<AtomicBool>) -> Self {
        Self {
            cancel_flag: Some(flag),
            ..self
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Evaluates the nodes the output taps depend on and returns the taps in
    /// declared order.
    pub fn run(&self, graph: &Graph, input: &B::Tensor) -> Result<IndexMap<TapName, B::Tensor>, Error> {
        let plan = ExecPlan::for_taps(graph)?;
        let mut cache = self.run_plan(graph, &plan, input)?;
        collect_taps(graph, &mut cache)
    }

    /// Like [Executor::run], but also evaluates the detection head.
    pub fn run_head(&self, graph: &Graph, input: &B::Tensor) -> Result<HeadOutput<B::Tensor>, Error> {
        let plan = ExecPlan::for_head(graph)?;
        let head_key = graph.head_key().ok_or(Error::NoHead)?;
        let mut cache = self.run_plan(graph, &plan, input)?;
        let head = cache
            .take(head_key)
            .ok_or(Error::UnknownNode { key: head_key })?;
        let taps = collect_taps(graph, &mut cache)?;
        Ok(HeadOutput { taps, head })
    }

    /// Evaluates a plan node by node and returns the outputs of its targets.
    pub fn run_with_plan(
        &self,
        graph: &Graph,
        plan: &ExecPlan,
        input: &B::Tensor,
    ) -> Result<IndexMap<NodeKey, B::Tensor>, Error> {
        let mut cache = self.run_plan(graph, plan, input)?;
        plan.targets()
            .iter()
            .map(|&key| {
                let value = cache.take(key).ok_or(Error::UnknownNode { key })?;
                Ok((key, value))
            })
            .collect()
    }

    fn run_plan<'p>(
        &self,
        graph: &Graph,
        plan: &'p ExecPlan,
        input: &B::Tensor,
    ) -> Result<Cache<'p, B::Tensor>, Error> {
        debug!("run {} nodes for targets {:?}", plan.order().len(), plan.targets());
        let mut cache = Cache::new(plan);

        plan.order().iter().try_for_each(|&key| -> Result<_, Error> {
            self.check_cancelled(key)?;
            let node = graph.node(key).ok_or(Error::UnknownNode { key })?;
            let output = self.evaluate_node(node, &cache.inputs(node, input))?;
            cache.insert(key, output);
            cache.release(node);
            Ok(())
        })?;

        Ok(cache)
    }

    fn evaluate_node(&self, node: &Node, inputs: &[&B::Tensor]) -> Result<B::Tensor, Error> {
        trace!("evaluate node {} {}", node.key, node.kind);

        let wrap_err = |source: anyhow::Error| Error::NodeEvaluation {
            key: node.key,
            kind: node.kind,
            source,
        };
        if inputs.len() != node.producers.len() {
            return Err(wrap_err(anyhow::format_err!(
                "expect {} inputs, but {} are cached",
                node.producers.len(),
                inputs.len()
            )));
        }

        let mut stages = ModuleCall::stages(node);
        let first = stages
            .next()
            .ok_or_else(|| wrap_err(anyhow::format_err!("the node has no stages")))?;
        let output = self.backend.evaluate(&first, inputs).map_err(wrap_err)?;

        stages.try_fold(output, |prev, call| {
            self.backend.evaluate(&call, &[&prev]).map_err(wrap_err)
        })
    }

    fn check_cancelled(&self, key: NodeKey) -> Result<(), Error> {
        match &self.cancel_flag {
            Some(flag) if flag.load(Ordering::Relaxed) => {
                debug!("run cancelled before node {}", key);
                Err(Error::Cancelled { key })
            }
            _ => Ok(()),
        }
    }
}

impl<B> Executor<B>
where
    B: Backend + Sync,
    B::Tensor: Send + Sync,
{
    /// Evaluates the output taps level by level, running the independent nodes
    /// of each level on the rayon thread pool.
    ///
    /// Fan-in nodes still receive their inputs in declared order.
    pub fn run_parallel(
        &self,
        graph: &Graph,
        input: &B::Tensor,
    ) -> Result<IndexMap<TapName, B::Tensor>, Error> {
        let plan = ExecPlan::for_taps(graph)?;
        debug!(
            "run {} nodes in {} levels for targets {:?}",
            plan.order().len(),
            plan.levels().len(),
            plan.targets()
        );
        let mut cache = Cache::new(&plan);

        plan.levels().iter().try_for_each(|level| -> Result<_, Error> {
            let nodes: Vec<&Node> = level
                .iter()
                .map(|&key| {
                    self.check_cancelled(key)?;
                    graph.node(key).ok_or(Error::UnknownNode { key })
                })
                .try_collect()?;

            let outputs: Vec<(NodeKey, B::Tensor)> = {
                let cache = &cache;
                nodes
                    .par_iter()
                    .map(|node| {
                        let output = self.evaluate_node(node, &cache.inputs(node, input))?;
                        Ok((node.key, output))
                    })
                    .collect::<Result<_, Error>>()?
            };

            outputs
                .into_iter()
                .for_each(|(key, output)| cache.insert(key, output));
            nodes.iter().for_each(|node| cache.release(node));
            Ok(())
        })?;

        collect_taps(graph, &mut cache)
    }
}

fn collect_taps<T>(graph: &Graph, cache: &mut Cache<'_, T>) -> Result<IndexMap<TapName, T>, Error> {
    graph
        .output_taps()
        .iter()
        .map(|(name, &key)| {
            let value = cache.take(key).ok_or(Error::UnknownNode { key })?;
            Ok((name.clone(), value))
        })
        .collect()
}
