use crate::{arg::Arg, common::*};

/// The closed set of module kinds a model file may reference.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRefStr,
    strum::Display,
    strum::EnumIter,
)]
pub enum ModuleKind {
    Conv,
    DWConv,
    GhostConv,
    RepConv,
    Focus,
    ConvTranspose,
    LCBHAM,
    Bottleneck,
    C2f,
    C3,
    SPPF,
    SPP,
    SimAM,
    CBAM,
    ChannelAttention,
    SpatialAttention,
    Upsample,
    Concat,
    Detect,
}

/// Number of box regression bins per side emitted by the detection head.
pub const DETECT_REG_MAX: usize = 16;

/// How a module derives its output channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRule {
    /// The positional argument at the index holds the nominal output channels,
    /// which are subject to width scaling.
    FromArg(usize),
    /// Output channels equal the input channels.
    Preserve,
    /// Output channels are the sum of the input channels.
    Sum,
    /// Detection head: `nc + 4 * reg_max` outputs per location.
    Head,
}

/// Accepted number of producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub fn contains(&self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }

    pub fn is_fan_in(&self) -> bool {
        self.max.map_or(true, |max| max > 1)
    }
}

impl Display for Arity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", max),
            Some(max) => write!(f, "{}..={}", self.min, max),
            None => write!(f, "{}..", self.min),
        }
    }
}

/// Expected type of a positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// A non-negative integer.
    Int,
    /// A positive channel count.
    Channels,
    /// A non-negative integer or null.
    OptInt,
    /// An integer or a float.
    Number,
    Bool,
    Str,
    /// A non-negative integer or a list of them.
    IntOrList,
    Any,
}

impl ArgKind {
    pub fn accepts(&self, arg: &Arg) -> bool {
        match self {
            Self::Int => arg.as_usize().is_some(),
            Self::Channels => matches!(arg.as_usize(), Some(channels) if channels > 0),
            Self::OptInt => arg.is_null() || arg.as_usize().is_some(),
            Self::Number => arg.as_r64().is_some(),
            Self::Bool => arg.as_bool().is_some(),
            Self::Str => arg.as_str().is_some(),
            Self::IntOrList => match arg {
                Arg::List(list) => !list.is_empty() && list.iter().all(|arg| arg.as_usize().is_some()),
                arg => arg.as_usize().is_some(),
            },
            Self::Any => true,
        }
    }
}

impl Display for ArgKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Int => "a non-negative integer",
            Self::Channels => "a positive channel count",
            Self::OptInt => "a non-negative integer or None",
            Self::Number => "a number",
            Self::Bool => "a boolean",
            Self::Str => "a string",
            Self::IntOrList => "an integer or a list of integers",
            Self::Any => "any value",
        };
        f.write_str(text)
    }
}

/// A declared positional parameter of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
}

const fn req(name: &'static str, kind: ArgKind) -> Param {
    Param {
        name,
        kind,
        required: true,
    }
}

const fn opt(name: &'static str, kind: ArgKind) -> Param {
    Param {
        name,
        kind,
        required: false,
    }
}

/// Static description of a module kind, as kept in the module registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleDescriptor {
    pub kind: ModuleKind,
    pub name: &'static str,
    /// Alternative spellings accepted in model files.
    pub aliases: &'static [&'static str],
    pub arity: Arity,
    /// Whether the repeat count is passed to the module as a parameter. Other
    /// single-input modules repeat as a chain of identical stages.
    pub supports_repeat: bool,
    pub channel_rule: ChannelRule,
    /// Terminal consumers declare the output taps of the graph.
    pub terminal: bool,
    pub params: &'static [Param],
}

impl ModuleDescriptor {
    pub fn min_inputs(&self) -> usize {
        self.arity.min
    }

    pub fn max_inputs(&self) -> Option<usize> {
        self.arity.max
    }

    pub fn channel_arg_index(&self) -> Option<usize> {
        match self.channel_rule {
            ChannelRule::FromArg(index) => Some(index),
            _ => None,
        }
    }

    /// Checks a positional argument list against the declared parameters.
    pub fn check_args(&self, args: &[Arg]) -> Result<(), String> {
        if args.len() > self.params.len() {
            return Err(format!(
                "{} takes at most {} arguments, but {} are given",
                self.name,
                self.params.len(),
                args.len()
            ));
        }

        self.params
            .iter()
            .enumerate()
            .try_for_each(|(index, param)| match args.get(index) {
                None if param.required => Err(format!(
                    "{} requires argument '{}' at position {}",
                    self.name, param.name, index
                )),
                None => Ok(()),
                Some(arg) if !param.kind.accepts(arg) => Err(format!(
                    "argument '{}' of {} must be {}, but got {}",
                    param.name, self.name, param.kind, arg
                )),
                Some(_) => Ok(()),
            })
    }
}

const SINGLE: Arity = Arity {
    min: 1,
    max: Some(1),
};

const CONV: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::Conv,
    name: "Conv",
    aliases: &[],
    arity: SINGLE,
    supports_repeat: false,
    channel_rule: ChannelRule::FromArg(0),
    terminal: false,
    params: &[
        req("c2", ArgKind::Channels),
        opt("k", ArgKind::Int),
        opt("s", ArgKind::Int),
        opt("p", ArgKind::OptInt),
        opt("g", ArgKind::Int),
        opt("d", ArgKind::Int),
        opt("act", ArgKind::Any),
    ],
};

const DW_CONV: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::DWConv,
    name: "DWConv",
    params: &[
        req("c2", ArgKind::Channels),
        opt("k", ArgKind::Int),
        opt("s", ArgKind::Int),
        opt("d", ArgKind::Int),
        opt("act", ArgKind::Any),
    ],
    ..CONV
};

const GHOST_CONV: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::GhostConv,
    name: "GhostConv",
    params: &[
        req("c2", ArgKind::Channels),
        opt("k", ArgKind::Int),
        opt("s", ArgKind::Int),
        opt("g", ArgKind::Int),
        opt("act", ArgKind::Any),
    ],
    ..CONV
};

const REP_CONV: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::RepConv,
    name: "RepConv",
    ..CONV
};

const FOCUS: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::Focus,
    name: "Focus",
    params: &[
        req("c2", ArgKind::Channels),
        opt("k", ArgKind::Int),
        opt("s", ArgKind::Int),
        opt("p", ArgKind::OptInt),
        opt("g", ArgKind::Int),
        opt("act", ArgKind::Any),
    ],
    ..CONV
};

const CONV_TRANSPOSE: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::ConvTranspose,
    name: "ConvTranspose",
    params: &[
        req("c2", ArgKind::Channels),
        opt("k", ArgKind::Int),
        opt("s", ArgKind::Int),
        opt("p", ArgKind::Int),
        opt("bn", ArgKind::Bool),
        opt("act", ArgKind::Any),
    ],
    ..CONV
};

const LCBHAM: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::LCBHAM,
    name: "LCBHAM",
    params: &[
        req("c2", ArgKind::Channels),
        opt("k", ArgKind::Int),
        opt("s", ArgKind::Int),
    ],
    ..CONV
};

const BOTTLENECK: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::Bottleneck,
    name: "Bottleneck",
    params: &[
        req("c2", ArgKind::Channels),
        opt("shortcut", ArgKind::Bool),
        opt("g", ArgKind::Int),
        opt("k", ArgKind::Any),
        opt("e", ArgKind::Number),
    ],
    ..CONV
};

const C2F: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::C2f,
    name: "C2f",
    supports_repeat: true,
    params: &[
        req("c2", ArgKind::Channels),
        opt("shortcut", ArgKind::Bool),
        opt("g", ArgKind::Int),
        opt("e", ArgKind::Number),
    ],
    ..CONV
};

const C3: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::C3,
    name: "C3",
    ..C2F
};

const SPPF: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::SPPF,
    name: "SPPF",
    params: &[req("c2", ArgKind::Channels), opt("k", ArgKind::Int)],
    ..CONV
};

const SPP: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::SPP,
    name: "SPP",
    params: &[req("c2", ArgKind::Channels), opt("k", ArgKind::IntOrList)],
    ..CONV
};

const SIM_AM: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::SimAM,
    name: "SimAM",
    params: &[req("c2", ArgKind::Channels), opt("e_lambda", ArgKind::Number)],
    ..CONV
};

const CBAM: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::CBAM,
    name: "CBAM",
    channel_rule: ChannelRule::Preserve,
    params: &[opt("c1", ArgKind::Int), opt("kernel_size", ArgKind::Int)],
    ..CONV
};

const CHANNEL_ATTENTION: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::ChannelAttention,
    name: "ChannelAttention",
    params: &[opt("channels", ArgKind::Int)],
    ..CBAM
};

const SPATIAL_ATTENTION: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::SpatialAttention,
    name: "SpatialAttention",
    params: &[opt("kernel_size", ArgKind::Int)],
    ..CBAM
};

const UPSAMPLE: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::Upsample,
    name: "Upsample",
    aliases: &["nn.Upsample"],
    params: &[
        opt("size", ArgKind::OptInt),
        opt("scale_factor", ArgKind::Number),
        opt("mode", ArgKind::Str),
    ],
    ..CBAM
};

const CONCAT: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::Concat,
    name: "Concat",
    aliases: &[],
    arity: Arity { min: 2, max: None },
    supports_repeat: false,
    channel_rule: ChannelRule::Sum,
    terminal: false,
    params: &[opt("dimension", ArgKind::Int)],
};

const DETECT: ModuleDescriptor = ModuleDescriptor {
    kind: ModuleKind::Detect,
    name: "Detect",
    aliases: &[],
    arity: Arity { min: 1, max: None },
    supports_repeat: false,
    channel_rule: ChannelRule::Head,
    terminal: true,
    params: &[req("nc", ArgKind::Int)],
};

impl ModuleKind {
    pub fn descriptor(&self) -> &'static ModuleDescriptor {
        match self {
            Self::Conv => &CONV,
            Self::DWConv => &DW_CONV,
            Self::GhostConv => &GHOST_CONV,
            Self::RepConv => &REP_CONV,
            Self::Focus => &FOCUS,
            Self::ConvTranspose => &CONV_TRANSPOSE,
            Self::LCBHAM => &LCBHAM,
            Self::Bottleneck => &BOTTLENECK,
            Self::C2f => &C2F,
            Self::C3 => &C3,
            Self::SPPF => &SPPF,
            Self::SPP => &SPP,
            Self::SimAM => &SIM_AM,
            Self::CBAM => &CBAM,
            Self::ChannelAttention => &CHANNEL_ATTENTION,
            Self::SpatialAttention => &SPATIAL_ATTENTION,
            Self::Upsample => &UPSAMPLE,
            Self::Concat => &CONCAT,
            Self::Detect => &DETECT,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.descriptor().terminal
    }
}

impl FromStr for ModuleKind {
    type Err = crate::error::Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        crate::registry::lookup(name).map(|descriptor| descriptor.kind)
    }
}

impl Serialize for ModuleKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ModuleKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(D::Error::custom)
    }
}
