use crate::{
    common::*,
    graph::{Graph, Node, NodeKey, Producer, Repeat, TapName},
};
use model_config::{detect_channels, infer_output_shape, parse_layers, stride_factor};

/// Options of a single compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Scale key, falling back to the model's default scale when absent.
    pub scale: Option<String>,
    /// Static `[height, width]` of input images, used to check spatial extents.
    pub image_size: Option<[usize; 2]>,
}

impl CompileOptions {
    pub fn with_scale(scale: impl Into<String>) -> Self {
        Self {
            scale: Some(scale.into()),
            ..Default::default()
        }
    }
}

impl Graph {
    /// Compiles a model specification with the scale picked by the options.
    pub fn compile(spec: &ModelSpec, options: &CompileOptions) -> Result<Self, Error> {
        let scale = spec.select_scale(options.scale.as_deref())?;
        let policy = spec.channel_policy();
        let layers = parse_layers(spec)?;
        let input_shape = match options.image_size {
            Some([h, w]) => Shape::feature_map(Dim::Infer, spec.ch, h, w),
            None => Shape::feature_map(Dim::Infer, spec.ch, Dim::Infer, Dim::Infer),
        };
        Self::build(&layers, &scale, &policy, input_shape)
    }

    /// Builds a graph from parsed layers.
    ///
    /// Fails on the first offending layer without returning a partial graph.
    pub fn build(
        layers: &[LayerSpec],
        scale: &ScaleSelection,
        policy: &ChannelPolicy,
        input_shape: Shape,
    ) -> Result<Self, Error> {
        policy.validate(&scale.params)?;
        let input_channels = match input_shape.channels() {
            Some(Dim::Size(channels)) if input_shape.len() == 4 => channels,
            _ => {
                return Err(Error::malformed(
                    format!("the input shape {} has no known channel count", input_shape),
                ))
            }
        };

        let mut builder = GraphBuilder {
            params: scale.params,
            policy,
            input_shape: input_shape.clone(),
            input_channels,
            nodes: IndexMap::new(),
            head: None,
        };
        layers.iter().enumerate().try_for_each(|(position, layer)| {
            if layer.index != position {
                return Err(Error::malformed_at(
                    layer.index,
                    format!("the layer is declared at position {}", position),
                ));
            }
            builder.push(layer)
        })?;

        let GraphBuilder { nodes, head, .. } = builder;

        let tap_keys: Vec<NodeKey> = match head {
            Some((_, ref taps)) => taps.clone(),
            None => nodes.keys().last().copied().into_iter().collect(),
        };
        if tap_keys.is_empty() {
            return Err(Error::malformed("the model declares no layers"));
        }
        let strides: Vec<_> = tap_keys.iter().map(|key| nodes[key].stride).collect();
        let output_taps: IndexMap<TapName, NodeKey> = TapName::assign(&strides)
            .into_iter()
            .zip(tap_keys)
            .collect();

        debug!(
            "compiled {} nodes with output taps [{}]",
            nodes.len(),
            output_taps
                .iter()
                .map(|(name, key)| format!("{}={}", name, key))
                .join(", ")
        );

        Ok(Graph {
            input_shape,
            scale_key: scale.key.clone(),
            scale: scale.params,
            nodes,
            output_taps,
            head: head.map(|(key, _)| key),
        })
    }
}

struct GraphBuilder<'a> {
    params: ScaleParams,
    policy: &'a ChannelPolicy,
    input_shape: Shape,
    input_channels: usize,
    nodes: IndexMap<NodeKey, Node>,
    /// The terminal node and the taps it declares.
    head: Option<(NodeKey, Vec<NodeKey>)>,
}

impl GraphBuilder<'_> {
    fn push(&mut self, layer: &LayerSpec) -> Result<(), Error> {
        let LayerSpec {
            index,
            ref sources,
            repeats,
            kind,
            ref args,
            section,
        } = *layer;
        let descriptor = kind.descriptor();
        let key = NodeKey(index);

        // resolve producers
        let producers: Vec<Producer> = sources
            .iter()
            .map(|source| {
                source
                    .resolve(index)
                    .map(Producer::from)
                    .map_err(|reason| Error::ReferenceResolution {
                        index,
                        source_ref: source.clone(),
                        reason,
                    })
            })
            .try_collect()?;

        if !descriptor.arity.contains(producers.len()) {
            return Err(Error::ArityMismatch {
                index,
                kind,
                expected: descriptor.arity,
                found: producers.len(),
            });
        }

        // scale repeats and channels
        let count = self.params.effective_repeats(repeats);
        let repeat = if descriptor.supports_repeat {
            Repeat::Inline(count)
        } else if count == 1 || !descriptor.arity.is_fan_in() {
            Repeat::Chain(count)
        } else {
            return Err(Error::malformed_at(
                index,
                format!("{} cannot be repeated {} times", kind, count),
            ));
        };

        let input_channels: Vec<usize> = producers
            .iter()
            .map(|producer| self.channels_of(producer))
            .collect();
        let channels = match descriptor.channel_rule {
            ChannelRule::FromArg(arg_index) => {
                let nominal = args
                    .get(arg_index)
                    .and_then(Arg::as_usize)
                    .ok_or_else(|| {
                        Error::malformed_at(index, format!("missing channel argument at {}", arg_index))
                    })?;
                self.params
                    .effective_channels(nominal, self.policy.divisor_for(kind))
                    .map_err(|reason| Error::malformed_at(index, reason))?
            }
            ChannelRule::Preserve => input_channels[0],
            ChannelRule::Sum => input_channels.iter().sum(),
            ChannelRule::Head => {
                let num_classes = args.get(0).and_then(Arg::as_usize).ok_or_else(|| {
                    Error::malformed_at(index, "the detection head requires a class count")
                })?;
                detect_channels(num_classes)
            }
        };

        // infer shapes and strides stage by stage
        let input_shapes: Vec<Shape> = producers
            .iter()
            .map(|producer| self.shape_of(producer))
            .collect();
        let first_shape = infer_output_shape(kind, args, &input_shapes, channels)
            .map_err(|reason| Error::ShapeMismatch { index, reason })?;
        let output_shape = (1..repeat.stages()).try_fold(first_shape, |shape, _| {
            infer_output_shape(kind, args, &[shape], channels)
                .map_err(|reason| Error::ShapeMismatch { index, reason })
        })?;

        let stride = match stride_factor(kind, args) {
            Some(factor) => self
                .common_stride(index, &producers)?
                .map(|stride| (0..repeat.stages()).fold(stride, |stride, _| stride * factor)),
            None => None,
        };

        // record taps of the terminal module
        if descriptor.terminal {
            if let Some((prev, _)) = self.head {
                return Err(Error::malformed_at(
                    index,
                    format!("a second terminal module follows the one at layer {}", prev),
                ));
            }
            let taps: Vec<NodeKey> = producers
                .iter()
                .zip(sources.iter())
                .map(|(producer, source)| {
                    producer.node().ok_or_else(|| Error::ReferenceResolution {
                        index,
                        source_ref: source.clone(),
                        reason: "the model input cannot be an output tap".into(),
                    })
                })
                .try_collect()?;
            if let Some(dup) = taps.iter().duplicates().next() {
                return Err(Error::malformed_at(
                    index,
                    format!("layer {} is tapped more than once", dup),
                ));
            }
            self.head = Some((key, taps));
        }

        debug!(
            "node {} {} from [{}] {} c={} shape={}",
            key,
            kind,
            producers.iter().join(", "),
            repeat,
            channels,
            output_shape
        );

        self.nodes.insert(
            key,
            Node {
                key,
                section,
                kind,
                producers,
                repeat,
                input_channels,
                channels,
                args: args.clone(),
                output_shape,
                stride,
            },
        );

        Ok(())
    }

    fn channels_of(&self, producer: &Producer) -> usize {
        match producer {
            Producer::Input => self.input_channels,
            Producer::Node(key) => self.nodes[key].channels,
        }
    }

    fn shape_of(&self, producer: &Producer) -> Shape {
        match producer {
            Producer::Input => self.input_shape.clone(),
            Producer::Node(key) => self.nodes[key].output_shape.clone(),
        }
    }

    /// The stride shared by all producers, `None` if any is unknown.
    ///
    /// Producers of different strides cannot be fused in space.
    fn common_stride(&self, index: usize, producers: &[Producer]) -> Result<Option<R64>, Error> {
        let strides: Option<Vec<R64>> = producers
            .iter()
            .map(|producer| match producer {
                Producer::Input => Some(r64(1.0)),
                Producer::Node(key) => self.nodes[key].stride,
            })
            .collect();
        let strides = match strides {
            Some(strides) => strides,
            None => return Ok(None),
        };

        match strides.iter().dedup().collect::<Vec<_>>().as_slice() {
            [] => Ok(None),
            [stride] => Ok(Some(**stride)),
            _ => Err(Error::ShapeMismatch {
                index,
                reason: format!(
                    "inputs of different strides [{}] cannot be fused",
                    strides.iter().join(", ")
                ),
            }),
        }
    }
}
