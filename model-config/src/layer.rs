use crate::{arg::Arg, common::*, module::ModuleKind, source_ref::SourceRef};

/// The part of the model a layer is declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Section {
    Backbone,
    Head,
}

/// A raw `[from, repeats, module, args]` record of a model file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerRecord {
    pub from: SourceRef,
    pub repeats: usize,
    pub module: String,
    pub args: Vec<Arg>,
}

impl Serialize for LayerRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (&self.from, self.repeats, &self.module, &self.args).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LayerRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (from, repeats, module, args) =
            <(SourceRef, usize, String, Vec<Arg>)>::deserialize(deserializer)?;
        Ok(Self {
            from,
            repeats,
            module,
            args,
        })
    }
}

/// A parsed layer, immutable once produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Declared index, counting backbone layers first.
    pub index: usize,
    pub section: Section,
    pub sources: SourceRef,
    /// Nominal repeat count before depth scaling.
    pub repeats: usize,
    pub kind: ModuleKind,
    /// Positional arguments with symbols already substituted.
    pub args: Vec<Arg>,
}

impl LayerSpec {
    /// The nominal output channels, for modules that declare them in an argument.
    pub fn nominal_channels(&self) -> Option<usize> {
        let index = self.kind.descriptor().channel_arg_index()?;
        self.args.get(index)?.as_usize()
    }
}

impl Display for LayerSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: [{}, {}, {}, [{}]]",
            self.index,
            self.sources,
            self.repeats,
            self.kind,
            self.args.iter().join(", ")
        )
    }
}
