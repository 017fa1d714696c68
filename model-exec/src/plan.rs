use crate::{common::*, error::Error};

/// Which nodes a run evaluates and when their outputs can be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecPlan {
    targets: Vec<NodeKey>,
    /// Required nodes in node order.
    order: Vec<NodeKey>,
    /// Number of consumer slots of each required node within the plan.
    uses: HashMap<NodeKey, usize>,
    /// Nodes grouped by dependency depth. Nodes of one level do not depend on
    /// each other.
    levels: Vec<Vec<NodeKey>>,
    max_live: usize,
}

impl ExecPlan {
    /// Plans the evaluation of the targets and the nodes they depend on.
    pub fn new(graph: &Graph, targets: &[NodeKey]) -> Result<Self, Error> {
        if let Some(&key) = targets.iter().find(|key| graph.node(**key).is_none()) {
            return Err(Error::UnknownNode { key });
        }

        let required = graph.ancestors(targets.iter().copied());
        let order: Vec<NodeKey> = graph
            .nodes()
            .keys()
            .copied()
            .filter(|key| required.contains(key))
            .collect();
        let producers_of = |key: &NodeKey| {
            graph.nodes()[key]
                .producers
                .iter()
                .filter_map(Producer::node)
                .collect::<Vec<_>>()
        };

        let mut uses: HashMap<NodeKey, usize> = order.iter().map(|&key| (key, 0)).collect();
        order.iter().flat_map(producers_of).for_each(|src_key| {
            *uses.entry(src_key).or_insert(0) += 1;
        });

        // depth 0 nodes only read the graph input
        let mut depths: HashMap<NodeKey, usize> = HashMap::new();
        order.iter().for_each(|key| {
            let depth = producers_of(key)
                .iter()
                .map(|src_key| depths[src_key] + 1)
                .max()
                .unwrap_or(0);
            depths.insert(*key, depth);
        });
        let num_levels = depths.values().max().map_or(0, |max| max + 1);
        let mut levels = vec![vec![]; num_levels];
        order.iter().for_each(|key| levels[depths[key]].push(*key));

        let pinned: BTreeSet<_> = targets.iter().copied().collect();
        let max_live = {
            let mut remaining = uses.clone();
            let (max_live, _) = order.iter().fold((0, 0), |(max_live, live), key| {
                let live: usize = live + 1;
                let freed = producers_of(key)
                    .into_iter()
                    .filter(|src_key| {
                        let count = remaining.entry(*src_key).or_insert(0);
                        *count = count.saturating_sub(1);
                        *count == 0 && !pinned.contains(src_key)
                    })
                    .count();
                (max_live.max(live), live - freed)
            });
            max_live
        };

        Ok(Self {
            targets: targets.to_vec(),
            order,
            uses,
            levels,
            max_live,
        })
    }

    /// Plans a run that returns the output taps.
    pub fn for_taps(graph: &Graph) -> Result<Self, Error> {
        let targets: Vec<_> = graph.tap_keys().collect();
        Self::new(graph, &targets)
    }

    /// Plans a run that returns the output taps and the detection head.
    pub fn for_head(graph: &Graph) -> Result<Self, Error> {
        let head = graph.head_key().ok_or(Error::NoHead)?;
        let targets: Vec<_> = graph.tap_keys().chain(std::iter::once(head)).collect();
        Self::new(graph, &targets)
    }

    pub fn targets(&self) -> &[NodeKey] {
        &self.targets
    }

    pub fn order(&self) -> &[NodeKey] {
        &self.order
    }

    pub fn levels(&self) -> &[Vec<NodeKey>] {
        &self.levels
    }

    /// Number of times the output of a node is read within the plan.
    pub fn uses(&self, key: NodeKey) -> usize {
        self.uses.get(&key).copied().unwrap_or(0)
    }

    pub fn is_target(&self, key: NodeKey) -> bool {
        self.targets.contains(&key)
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.uses.contains_key(&key)
    }

    /// Peak number of node outputs cached at once when the plan runs in order.
    pub fn max_live(&self) -> usize {
        self.max_live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use model_config::ModelSpec;
    use model_graph::CompileOptions;

    /// Two taps at strides 8 and 16 plus a branch no tap depends on.
    fn graph() -> Result<Graph> {
        let spec = ModelSpec::from_json5_str(
            r#"{
                nc: 2,
                backbone: [
                    [-1, 1, "Conv", [16, 3, 2]],
                    [-1, 1, "Conv", [32, 3, 2]],
                    [-1, 1, "Conv", [64, 3, 2]],
                    [-1, 1, "Conv", [64, 3, 2]],
                ],
                head: [
                    [2, 1, "Conv", [64, 3, 1]],
                    [3, 1, "Conv", [64, 3, 1]],
                    [[4, 3], 1, "Detect", ["nc"]],
                ],
            }"#,
        )?;
        let graph = Graph::compile(&spec, &CompileOptions::default())?;
        Ok(graph)
    }

    fn keys(keys: &[usize]) -> Vec<NodeKey> {
        keys.iter().map(|&key| NodeKey(key)).collect()
    }

    #[test]
    fn tap_plan_skips_unused_nodes() -> Result<()> {
        let graph = graph()?;
        let plan = ExecPlan::for_taps(&graph)?;

        assert_eq!(plan.targets(), keys(&[4, 3]).as_slice());
        assert_eq!(plan.order(), keys(&[0, 1, 2, 3, 4]).as_slice());
        assert!(!plan.contains(NodeKey(5)));
        assert!(!plan.contains(NodeKey(6)));

        assert_eq!(plan.uses(NodeKey(2)), 2);
        assert_eq!(plan.uses(NodeKey(3)), 0);
        assert_eq!(plan.uses(NodeKey(5)), 0);
        assert!(plan.is_target(NodeKey(3)));
        assert!(!plan.is_target(NodeKey(2)));

        assert_eq!(
            plan.levels(),
            &[keys(&[0]), keys(&[1]), keys(&[2]), keys(&[3, 4])]
        );
        assert_eq!(plan.max_live(), 3);
        Ok(())
    }

    #[test]
    fn head_plan_includes_detection_head() -> Result<()> {
        let graph = graph()?;
        let plan = ExecPlan::for_head(&graph)?;

        assert_eq!(plan.order(), keys(&[0, 1, 2, 3, 4, 6]).as_slice());
        assert!(plan.is_target(NodeKey(6)));
        assert_eq!(plan.uses(NodeKey(3)), 1);
        assert_eq!(plan.uses(NodeKey(4)), 1);
        assert_eq!(plan.levels().len(), 5);
        assert_eq!(plan.max_live(), 3);
        Ok(())
    }

    #[test]
    fn unknown_target_is_rejected() -> Result<()> {
        let graph = graph()?;
        let err = ExecPlan::new(&graph, &[NodeKey(42)]).unwrap_err();
        assert!(matches!(err, Error::UnknownNode { key } if key == NodeKey(42)));
        Ok(())
    }
}
