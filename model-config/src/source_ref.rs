use crate::common::*;

/// The `from` field of a layer record.
///
/// Negative integers are offsets relative to the declaring layer, non-negative
/// integers are absolute layer indices and a list declares several producers
/// in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceRef {
    Relative(NonZeroUsize),
    Absolute(usize),
    List(Vec<SourceRef>),
}

/// What a source reference points to once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Resolved {
    /// The graph input.
    Input,
    /// The layer with the given declared index.
    Layer(usize),
}

impl SourceRef {
    pub fn previous() -> Self {
        Self::Relative(NonZeroUsize::MIN)
    }

    pub fn from_ordinal(index: isize) -> Self {
        match NonZeroUsize::new(index.unsigned_abs()) {
            Some(offset) if index < 0 => Self::Relative(offset),
            _ => Self::Absolute(index as usize),
        }
    }

    /// The number of producers this reference declares.
    pub fn len(&self) -> usize {
        match self {
            Self::List(list) => list.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Iterates over the individual references, flattening one list level.
    pub fn iter(&self) -> impl Iterator<Item = &SourceRef> {
        let iter: Box<dyn Iterator<Item = &SourceRef> + '_> = match self {
            Self::List(list) => Box::new(list.iter()),
            single => Box::new(iter::once(single)),
        };
        iter
    }

    /// Resolves a single reference declared by the layer at `curr_index`.
    ///
    /// Offsets count back from the declaring layer, with the graph input sitting
    /// just before layer 0. Absolute indices must point to an earlier layer.
    pub fn resolve(&self, curr_index: usize) -> Result<Resolved, String> {
        match *self {
            Self::Relative(offset) => {
                let offset = offset.get();
                if offset <= curr_index {
                    Ok(Resolved::Layer(curr_index - offset))
                } else if offset == curr_index + 1 {
                    Ok(Resolved::Input)
                } else {
                    Err(format!(
                        "offset -{} reaches before the model input",
                        offset
                    ))
                }
            }
            Self::Absolute(index) => {
                if index < curr_index {
                    Ok(Resolved::Layer(index))
                } else if index == curr_index {
                    Err("a layer cannot consume its own output".into())
                } else {
                    Err(format!("layer {} is declared after layer {}", index, curr_index))
                }
            }
            Self::List(_) => Err("nested source lists are not allowed".into()),
        }
    }
}

impl Display for SourceRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relative(offset) => write!(f, "-{}", offset),
            Self::Absolute(index) => write!(f, "{}", index),
            Self::List(list) => write!(f, "[{}]", list.iter().join(", ")),
        }
    }
}

impl Display for Resolved {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("[input]"),
            Self::Layer(index) => Display::fmt(index, f),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SourceRefRepr {
    Single(isize),
    List(Vec<SourceRefRepr>),
}

impl From<&SourceRef> for SourceRefRepr {
    fn from(from: &SourceRef) -> Self {
        match from {
            SourceRef::Relative(offset) => Self::Single(-(offset.get() as isize)),
            SourceRef::Absolute(index) => Self::Single(*index as isize),
            SourceRef::List(list) => Self::List(list.iter().map(Into::into).collect()),
        }
    }
}

impl From<SourceRefRepr> for SourceRef {
    fn from(from: SourceRefRepr) -> Self {
        match from {
            SourceRefRepr::Single(index) => Self::from_ordinal(index),
            SourceRefRepr::List(list) => Self::List(list.into_iter().map(Into::into).collect()),
        }
    }
}

impl Serialize for SourceRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        SourceRefRepr::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SourceRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = SourceRefRepr::deserialize(deserializer)?;
        Ok(repr.into())
    }
}
