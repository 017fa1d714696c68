//! Compile-time shape contracts of the module kinds.
//!
//! Feature maps are `[batch, channels, height, width]`. Unknown extents are
//! carried as [Dim::Infer] and only definite conflicts are reported.

use crate::{
    arg::Arg,
    common::*,
    module::{ModuleKind, DETECT_REG_MAX},
};

/// Reads positional arguments with their declared defaults.
#[derive(Debug, Clone, Copy)]
struct ArgReader<'a> {
    kind: ModuleKind,
    args: &'a [Arg],
}

impl<'a> ArgReader<'a> {
    fn new(kind: ModuleKind, args: &'a [Arg]) -> Self {
        Self { kind, args }
    }

    fn param_name(&self, index: usize) -> &'static str {
        self.kind
            .descriptor()
            .params
            .get(index)
            .map_or("?", |param| param.name)
    }

    fn opt_usize(&self, index: usize) -> Result<Option<usize>, String> {
        match self.args.get(index) {
            None | Some(Arg::Null) => Ok(None),
            Some(arg) => arg.as_usize().map(Some).ok_or_else(|| {
                format!(
                    "argument '{}' of {} must be a non-negative integer, but got {}",
                    self.param_name(index),
                    self.kind,
                    arg
                )
            }),
        }
    }

    fn usize_or(&self, index: usize, default: usize) -> Result<usize, String> {
        Ok(self.opt_usize(index)?.unwrap_or(default))
    }

    fn opt_r64(&self, index: usize) -> Result<Option<R64>, String> {
        match self.args.get(index) {
            None | Some(Arg::Null) => Ok(None),
            Some(arg) => arg.as_r64().map(Some).ok_or_else(|| {
                format!(
                    "argument '{}' of {} must be a number, but got {}",
                    self.param_name(index),
                    self.kind,
                    arg
                )
            }),
        }
    }

    /// Kernel sizes of an argument that is either a single size or a list.
    fn kernels(&self, index: usize, default: &[usize]) -> Result<Vec<usize>, String> {
        match self.args.get(index) {
            None | Some(Arg::Null) => Ok(default.to_vec()),
            Some(Arg::List(list)) => list
                .iter()
                .map(|arg| {
                    arg.as_usize()
                        .ok_or_else(|| format!("kernel size must be an integer, but got {}", arg))
                })
                .collect(),
            Some(_) => Ok(vec![self.usize_or(index, 1)?]),
        }
    }
}

/// Padding that keeps the extent of a stride-1 convolution.
pub fn autopad(kernel: usize, dilation: usize) -> usize {
    let kernel = if dilation > 1 {
        dilation * (kernel.saturating_sub(1)) + 1
    } else {
        kernel
    };
    kernel / 2
}

/// A strided window over the spatial dims of a feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    kernel: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
}

impl Window {
    fn same(kernel: usize, stride: usize) -> Self {
        Self {
            kernel,
            stride,
            padding: autopad(kernel, 1),
            dilation: 1,
        }
    }

    fn apply(&self, size: Dim) -> Result<Dim, String> {
        size.conv_out(self.kernel, self.stride, self.padding, self.dilation)
            .ok_or_else(|| {
                format!(
                    "window of kernel {} stride {} padding {} dilation {} does not fit extent {}",
                    self.kernel, self.stride, self.padding, self.dilation, size
                )
            })
    }
}

fn feature_map(shape: &Shape) -> Result<[Dim; 4], String> {
    match shape.as_ref() {
        &[b, c, h, w] => Ok([b, c, h, w]),
        _ => Err(format!("expect a 4-d feature map, but got {}", shape)),
    }
}

fn windowed(input: &Shape, channels: usize, window: Window) -> Result<Shape, String> {
    let [b, _, h, w] = feature_map(input)?;
    Ok(Shape::feature_map(b, channels, window.apply(h)?, window.apply(w)?))
}

fn preserved(input: &Shape, channels: usize) -> Result<Shape, String> {
    let [b, _, h, w] = feature_map(input)?;
    Ok(Shape::feature_map(b, channels, h, w))
}

fn check_kernel_3_or_7(kind: ModuleKind, kernel: usize) -> Result<(), String> {
    if kernel != 3 && kernel != 7 {
        return Err(format!("kernel size of {} must be 3 or 7, but got {}", kind, kernel));
    }
    Ok(())
}

/// Infers the output shape of one stage of a module.
///
/// `channels` is the output channel count the module derives from its channel
/// rule. For the detection head the output is `[batch, channels, anchors]` where
/// anchors count the locations of all input levels.
pub fn infer_output_shape(
    kind: ModuleKind,
    args: &[Arg],
    inputs: &[Shape],
    channels: usize,
) -> Result<Shape, String> {
    use ModuleKind as K;

    let reader = ArgReader::new(kind, args);
    let first = inputs
        .first()
        .ok_or_else(|| format!("{} requires at least one input", kind))?;

    let shape = match kind {
        K::Conv => {
            let kernel = reader.usize_or(1, 1)?;
            let dilation = reader.usize_or(5, 1)?;
            let window = Window {
                kernel,
                stride: reader.usize_or(2, 1)?,
                padding: reader
                    .opt_usize(3)?
                    .unwrap_or_else(|| autopad(kernel, dilation)),
                dilation,
            };
            windowed(first, channels, window)?
        }
        K::DWConv => {
            let kernel = reader.usize_or(1, 1)?;
            let dilation = reader.usize_or(3, 1)?;
            let window = Window {
                kernel,
                stride: reader.usize_or(2, 1)?,
                padding: autopad(kernel, dilation),
                dilation,
            };
            windowed(first, channels, window)?
        }
        K::GhostConv => {
            let window = Window::same(reader.usize_or(1, 1)?, reader.usize_or(2, 1)?);
            windowed(first, channels, window)?
        }
        K::RepConv => {
            let kernel = reader.usize_or(1, 3)?;
            let padding = reader.usize_or(3, 1)?;
            if kernel != 3 || padding != 1 {
                return Err(format!(
                    "RepConv requires kernel 3 and padding 1, but got kernel {} and padding {}",
                    kernel, padding
                ));
            }
            let window = Window {
                kernel,
                stride: reader.usize_or(2, 1)?,
                padding,
                dilation: reader.usize_or(5, 1)?,
            };
            windowed(first, channels, window)?
        }
        K::Focus => {
            let [b, c, h, w] = feature_map(first)?;
            let halve = |size: Dim| match size {
                Dim::Size(size) if size % 2 != 0 => Err(format!(
                    "Focus requires even spatial extents, but got {}",
                    first
                )),
                size => Ok(Dim::from(size.size().map(|size| size / 2))),
            };
            let sliced = Shape::feature_map(b, c * 4, halve(h)?, halve(w)?);
            let kernel = reader.usize_or(1, 1)?;
            let window = Window {
                kernel,
                stride: reader.usize_or(2, 1)?,
                padding: reader.opt_usize(3)?.unwrap_or_else(|| autopad(kernel, 1)),
                dilation: 1,
            };
            windowed(&sliced, channels, window)?
        }
        K::ConvTranspose => {
            let [b, _, h, w] = feature_map(first)?;
            let kernel = reader.usize_or(1, 2)?;
            let stride = reader.usize_or(2, 2)?;
            let padding = reader.usize_or(3, 0)?;
            let grow = |size: Dim| {
                size.deconv_out(kernel, stride, padding).ok_or_else(|| {
                    format!(
                        "transposed window of kernel {} stride {} padding {} does not fit extent {}",
                        kernel, stride, padding, size
                    )
                })
            };
            Shape::feature_map(b, channels, grow(h)?, grow(w)?)
        }
        K::LCBHAM => {
            let window = Window::same(reader.usize_or(1, 3)?, reader.usize_or(2, 2)?);
            windowed(first, channels, window)?
        }
        K::Bottleneck => {
            let kernels = reader.kernels(3, &[3, 3])?;
            kernels.iter().try_fold(preserved(first, channels)?, |shape, &kernel| {
                windowed(&shape, channels, Window::same(kernel, 1))
            })?
        }
        K::C2f | K::C3 | K::SPP | K::ChannelAttention => preserved(first, channels)?,
        K::SPPF => {
            let kernel = reader.usize_or(1, 5)?;
            if kernel % 2 == 0 {
                return Err(format!("SPPF requires an odd pooling kernel, but got {}", kernel));
            }
            preserved(first, channels)?
        }
        K::SimAM => {
            let [_, in_channels, _, _] = feature_map(first)?;
            if !in_channels.is_compatible_with(&Dim::Size(channels)) {
                return Err(format!(
                    "SimAM requires equal input and output channels, but got {} and {}",
                    in_channels, channels
                ));
            }
            preserved(first, channels)?
        }
        K::CBAM => {
            check_kernel_3_or_7(kind, reader.usize_or(1, 7)?)?;
            preserved(first, channels)?
        }
        K::SpatialAttention => {
            check_kernel_3_or_7(kind, reader.usize_or(0, 7)?)?;
            preserved(first, channels)?
        }
        K::Upsample => {
            let [b, _, h, w] = feature_map(first)?;
            match reader.opt_usize(0)? {
                Some(size) => Shape::feature_map(b, channels, size, size),
                None => {
                    let factor = reader.opt_r64(1)?.unwrap_or_else(|| r64(2.0));
                    if factor <= 0.0 {
                        return Err(format!("scale factor must be positive, but got {}", factor));
                    }
                    Shape::feature_map(b, channels, h.scale(factor), w.scale(factor))
                }
            }
        }
        K::Concat => {
            let dimension = reader.usize_or(0, 1)?;
            if dimension != 1 {
                return Err(format!(
                    "only channel concatenation is supported, but got dimension {}",
                    dimension
                ));
            }

            let mismatch = || {
                format!(
                    "cannot concatenate {} inputs of shapes [{}]",
                    inputs.len(),
                    inputs.iter().join(", ")
                )
            };
            // every dimension except channels must agree
            let spatial = |shape: &Shape| -> Result<Shape, String> {
                feature_map(shape)?;
                shape.with_channels(Dim::Infer).ok_or_else(mismatch)
            };
            let merged = inputs[1..].iter().try_fold(spatial(first)?, |merged, shape| {
                merged.equalize(&spatial(shape)?).ok_or_else(mismatch)
            })?;
            merged.with_channels(channels).ok_or_else(mismatch)?
        }
        K::Detect => {
            let (batch, anchors) = inputs.iter().try_fold(
                (Dim::Infer, Dim::Size(0)),
                |(batch, anchors), shape| -> Result<_, String> {
                    let [b, _, h, w] = feature_map(shape)?;
                    let batch = batch.equalize(&b).ok_or_else(|| {
                        format!("detection inputs disagree on batch size: {} and {}", batch, b)
                    })?;
                    let locations = match (h, w) {
                        (Dim::Size(h), Dim::Size(w)) => Dim::Size(h * w),
                        _ => Dim::Infer,
                    };
                    Ok((batch, anchors + locations))
                },
            )?;
            Shape::from(vec![batch, Dim::Size(channels), anchors])
        }
    };

    Ok(shape)
}

/// The output channels of the detection head for a class count.
pub fn detect_channels(num_classes: usize) -> usize {
    num_classes + 4 * DETECT_REG_MAX
}

/// How much one stage of a module downsamples its input.
///
/// The factor is the ratio of input to output extent, e.g. 2 for a stride-2
/// convolution and 0.5 for a 2x upsampling. Returns `None` when the factor does
/// not depend on the arguments alone or the module has no spatial output.
pub fn stride_factor(kind: ModuleKind, args: &[Arg]) -> Option<R64> {
    use ModuleKind as K;

    let reader = ArgReader::new(kind, args);
    let stride = |index: usize, default: usize| {
        reader
            .usize_or(index, default)
            .ok()
            .filter(|&stride| stride > 0)
            .map(|stride| r64(stride as f64))
    };

    match kind {
        K::Conv | K::DWConv | K::GhostConv | K::RepConv => stride(2, 1),
        K::LCBHAM => stride(2, 2),
        K::Focus => stride(2, 1).map(|stride| stride * 2.0),
        K::ConvTranspose => stride(2, 2).map(|stride| stride.recip()),
        K::Upsample => match reader.opt_usize(0) {
            Ok(None) => {
                let factor = reader.opt_r64(1).ok()?.unwrap_or_else(|| r64(2.0));
                (factor > 0.0).then(|| factor.recip())
            }
            _ => None,
        },
        K::Bottleneck
        | K::C2f
        | K::C3
        | K::SPPF
        | K::SPP
        | K::SimAM
        | K::CBAM
        | K::ChannelAttention
        | K::SpatialAttention
        | K::Concat => Some(r64(1.0)),
        K::Detect => None,
    }
}
