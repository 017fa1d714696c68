use crate::common::*;

/// One module invocation issued by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleCall<'a> {
    pub key: NodeKey,
    pub kind: ModuleKind,
    /// The repeat count passed to the module, 1 for each stage of a chain.
    pub repeats: usize,
    /// Position of the stage within a chain of repeats.
    pub stage: usize,
    /// Channels of each input, in producer order.
    pub input_channels: &'a [usize],
    pub channels: usize,
    pub args: &'a [Arg],
    /// The statically inferred output shape, with unknown extents left open.
    pub output_shape: &'a Shape,
}

impl<'a> ModuleCall<'a> {
    /// Splits a node into the calls that evaluate it.
    pub fn stages(node: &'a Node) -> impl Iterator<Item = ModuleCall<'a>> + 'a {
        let (repeats, stages) = match node.repeat {
            Repeat::Inline(count) => (count, 1),
            Repeat::Chain(count) => (1, count),
        };

        (0..stages).map(move |stage| ModuleCall {
            key: node.key,
            kind: node.kind,
            repeats,
            stage,
            input_channels: if stage == 0 {
                node.input_channels.as_slice()
            } else {
                std::slice::from_ref(&node.channels)
            },
            channels: node.channels,
            args: &node.args,
            output_shape: &node.output_shape,
        })
    }
}

/// Evaluates modules on concrete tensors.
pub trait Backend {
    type Tensor;

    /// Runs one module on inputs given in declared producer order.
    fn evaluate(&self, call: &ModuleCall<'_>, inputs: &[&Self::Tensor]) -> anyhow::Result<Self::Tensor>;
}

impl<B> Backend for &B
where
    B: Backend + ?Sized,
{
    type Tensor = B::Tensor;

    fn evaluate(&self, call: &ModuleCall<'_>, inputs: &[&Self::Tensor]) -> anyhow::Result<Self::Tensor> {
        (**self).evaluate(call, inputs)
    }
}

impl<B> Backend for Arc<B>
where
    B: Backend + ?Sized,
{
    type Tensor = B::Tensor;

    fn evaluate(&self, call: &ModuleCall<'_>, inputs: &[&Self::Tensor]) -> anyhow::Result<Self::Tensor> {
        (**self).evaluate(call, inputs)
    }
}
