use crate::common::*;

pub use graph::*;
pub use node::*;

mod graph {
    use super::*;

    /// A compiled model: nodes in declaration order plus the output taps.
    ///
    /// The node order is a topological order. A graph is read-only once built and
    /// can be shared by concurrent executions.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, getset::Getters)]
    pub struct Graph {
        /// The `[batch, channels, height, width]` shape of the model input.
        #[getset(get = "pub")]
        pub(crate) input_shape: Shape,
        #[getset(get = "pub")]
        pub(crate) scale_key: Option<String>,
        #[getset(get = "pub")]
        pub(crate) scale: ScaleParams,
        #[getset(get = "pub")]
        pub(crate) nodes: IndexMap<NodeKey, Node>,
        /// Tapped nodes in the order the terminal module declares them.
        #[getset(get = "pub")]
        pub(crate) output_taps: IndexMap<TapName, NodeKey>,
        /// The terminal detection module, if the model declares one.
        pub(crate) head: Option<NodeKey>,
    }

    impl Graph {
        pub fn head(&self) -> Option<&Node> {
            self.head.and_then(|key| self.nodes.get(&key))
        }

        pub fn head_key(&self) -> Option<NodeKey> {
            self.head
        }

        pub fn node(&self, key: NodeKey) -> Option<&Node> {
            self.nodes.get(&key)
        }

        pub fn input_channels(&self) -> usize {
            self.input_shape.channels().and_then(|c| c.size()).unwrap_or(0)
        }

        pub fn tap_keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
            self.output_taps.values().copied()
        }

        /// Maps each node to the nodes consuming its output, in node order.
        ///
        /// A node consuming the same producer twice is listed twice.
        pub fn consumers(&self) -> HashMap<NodeKey, Vec<NodeKey>> {
            self.nodes
                .values()
                .flat_map(|node| {
                    node.producers
                        .iter()
                        .filter_map(Producer::node)
                        .map(move |src_key| (src_key, node.key))
                })
                .into_group_map()
        }

        /// Collects the given nodes and every node they transitively depend on.
        pub fn ancestors(&self, targets: impl IntoIterator<Item = NodeKey>) -> BTreeSet<NodeKey> {
            let mut visited = BTreeSet::new();
            let mut stack: Vec<_> = targets.into_iter().collect();

            while let Some(key) = stack.pop() {
                if !visited.insert(key) {
                    continue;
                }
                if let Some(node) = self.nodes.get(&key) {
                    stack.extend(node.producers.iter().filter_map(Producer::node));
                }
            }

            visited
        }

        /// Checks the structural guarantees the executor relies on.
        ///
        /// The dependency graph is rebuilt with petgraph and must be acyclic,
        /// every producer must precede its consumer and every tap must exist.
        pub fn verify(&self) -> Result<()> {
            use petgraph::{algo, graphmap::DiGraphMap};

            self.nodes.iter().enumerate().try_for_each(|(position, (&key, node))| {
                ensure!(
                    key == node.key && key.0 == position,
                    "node {} is stored at position {}",
                    node.key,
                    position
                );
                node.producers
                    .iter()
                    .filter_map(Producer::node)
                    .try_for_each(|src_key| {
                        ensure!(
                            src_key < key && self.nodes.contains_key(&src_key),
                            "node {} consumes invalid producer {}",
                            key,
                            src_key
                        );
                        Ok(())
                    })
            })?;

            let mut graph = DiGraphMap::<NodeKey, ()>::new();
            self.nodes.values().for_each(|node| {
                graph.add_node(node.key);
                node.producers
                    .iter()
                    .filter_map(Producer::node)
                    .for_each(|src_key| {
                        graph.add_edge(src_key, node.key, ());
                    });
            });
            let sorted = algo::toposort(&graph, None).map_err(|cycle| {
                format_err!("cyclic dependency found at node {}", cycle.node_id())
            })?;
            let positions: HashMap<_, _> = sorted
                .iter()
                .enumerate()
                .map(|(position, &key)| (key, position))
                .collect();
            graph.all_edges().try_for_each(|(src, dst, _)| {
                ensure!(
                    positions[&src] < positions[&dst],
                    "edge {} -> {} violates the topological order",
                    src,
                    dst
                );
                Ok(())
            })?;

            ensure!(!self.output_taps.is_empty(), "the graph has no output taps");
            self.output_taps.iter().try_for_each(|(name, key)| {
                ensure!(
                    self.nodes.contains_key(key),
                    "output tap {} refers to missing node {}",
                    name,
                    key
                );
                Ok(())
            })?;
            if let Some(head) = self.head {
                let node = self
                    .nodes
                    .get(&head)
                    .ok_or_else(|| format_err!("the head node {} is missing", head))?;
                ensure!(
                    node.kind.is_terminal(),
                    "the head node {} is a {} module",
                    head,
                    node.kind
                );
            }

            Ok(())
        }

        /// Counts nodes and estimates the peak number of cached outputs when the
        /// whole graph runs in node order.
        pub fn summary(&self) -> GraphSummary {
            let consumers = self.consumers();
            let taps: BTreeSet<_> = self.tap_keys().chain(self.head).collect();
            let mut remaining: HashMap<NodeKey, usize> = consumers
                .iter()
                .map(|(&key, keys)| (key, keys.len()))
                .collect();

            let (max_live, _) = self.nodes.values().fold((0, 0), |(max_live, live), node| {
                let live = live + 1;
                let max_live = max_live.max(live);
                let freed = node
                    .producers
                    .iter()
                    .filter_map(Producer::node)
                    .filter(|src_key| {
                        let count = remaining.entry(*src_key).or_insert(0);
                        *count = count.saturating_sub(1);
                        *count == 0 && !taps.contains(src_key)
                    })
                    .count();
                let unused = (!consumers.contains_key(&node.key) && !taps.contains(&node.key))
                    as usize;
                (max_live, live - freed - unused)
            });

            GraphSummary {
                num_nodes: self.nodes.len(),
                num_fan_in: self.nodes.values().filter(|node| node.is_fan_in()).count(),
                num_taps: self.output_taps.len(),
                num_stages: self.nodes.values().map(|node| node.repeat.stages()).sum(),
                max_live,
            }
        }
    }

    /// Node counts of a compiled graph.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct GraphSummary {
        pub num_nodes: usize,
        pub num_fan_in: usize,
        pub num_taps: usize,
        /// Module invocations per run, counting chained repeats.
        pub num_stages: usize,
        /// Peak number of node outputs held at once in a full sequential run.
        pub max_live: usize,
    }

    impl Display for GraphSummary {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{} nodes, {} fan-in, {} taps, {} stages, at most {} live outputs",
                self.num_nodes, self.num_fan_in, self.num_taps, self.num_stages, self.max_live
            )
        }
    }
}

mod node {
    use super::*;

    /// Identifies a node by the declared index of its layer.
    #[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct NodeKey(pub usize);

    impl Display for NodeKey {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            Display::fmt(&self.0, f)
        }
    }

    /// Where a node input comes from.
    #[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum Producer {
        /// The graph input.
        Input,
        Node(NodeKey),
    }

    impl Producer {
        pub fn node(&self) -> Option<NodeKey> {
            match *self {
                Self::Input => None,
                Self::Node(key) => Some(key),
            }
        }
    }

    impl From<Resolved> for Producer {
        fn from(from: Resolved) -> Self {
            match from {
                Resolved::Input => Self::Input,
                Resolved::Layer(index) => Self::Node(NodeKey(index)),
            }
        }
    }

    impl Display for Producer {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match self {
                Self::Input => f.write_str("input"),
                Self::Node(key) => Display::fmt(key, f),
            }
        }
    }

    /// How the effective repeat count is realised.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum Repeat {
        /// The module receives the count as a parameter and runs once.
        Inline(usize),
        /// The module runs as a chain of identical stages.
        Chain(usize),
    }

    impl Repeat {
        pub fn count(&self) -> usize {
            match *self {
                Self::Inline(count) | Self::Chain(count) => count,
            }
        }

        /// Number of module invocations per run.
        pub fn stages(&self) -> usize {
            match *self {
                Self::Inline(_) => 1,
                Self::Chain(count) => count,
            }
        }
    }

    impl Display for Repeat {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match self {
                Self::Inline(count) => write!(f, "n={}", count),
                Self::Chain(count) => write!(f, "x{}", count),
            }
        }
    }

    /// A compiled layer.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Node {
        pub key: NodeKey,
        pub section: Section,
        pub kind: ModuleKind,
        /// Inputs in declared order.
        pub producers: Vec<Producer>,
        pub repeat: Repeat,
        /// Channels of each input, in producer order.
        pub input_channels: Vec<usize>,
        /// Output channels after width scaling.
        pub channels: usize,
        pub args: Vec<Arg>,
        pub output_shape: Shape,
        /// Downsampling relative to the input, when it is known.
        pub stride: Option<R64>,
    }

    impl Node {
        pub fn effective_repeats(&self) -> usize {
            self.repeat.count()
        }

        pub fn effective_channels(&self) -> usize {
            self.channels
        }

        pub fn is_fan_in(&self) -> bool {
            self.producers.len() > 1
        }
    }

    /// Name of an output tap, e.g. `P3` for the stride 8 level.
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TapName(pub String);

    impl TapName {
        /// Names taps after their pyramid level when every stride is a distinct
        /// power of two, else by position.
        pub fn assign(strides: &[Option<R64>]) -> Vec<TapName> {
            let levels: Option<Vec<u32>> = strides
                .iter()
                .map(|&stride| {
                    let stride = stride?.raw();
                    let int = stride as u64;
                    (stride >= 1.0 && stride.fract() == 0.0 && int.is_power_of_two())
                        .then(|| int.trailing_zeros())
                })
                .collect();

            match levels {
                Some(levels) if levels.iter().collect::<BTreeSet<_>>().len() == levels.len() => levels
                    .into_iter()
                    .map(|level| TapName(format!("P{}", level)))
                    .collect(),
                _ => (0..strides.len())
                    .map(|index| TapName(format!("tap{}", index)))
                    .collect(),
            }
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl Display for TapName {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl From<&str> for TapName {
        fn from(name: &str) -> Self {
            Self(name.to_owned())
        }
    }
}
