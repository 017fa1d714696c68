use crate::common::*;

/// A positional module argument as written in a model file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    Null,
    Bool(bool),
    Int(i64),
    Float(R64),
    Str(String),
    List(Vec<Arg>),
}

impl Arg {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_usize(&self) -> Option<usize> {
        match *self {
            Self::Int(value) => usize::try_from(value).ok(),
            _ => None,
        }
    }

    /// Reads the argument as a real number, accepting integers too.
    pub fn as_r64(&self) -> Option<R64> {
        match *self {
            Self::Int(value) => R64::try_new(value as f64),
            Self::Float(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Arg]> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    /// Replaces symbolic names by their values, recursing into lists.
    pub fn substitute(self, symbols: &HashMap<&str, Arg>) -> Self {
        match self {
            Self::Str(name) => match symbols.get(name.as_str()) {
                Some(value) => value.clone(),
                None => Self::Str(name),
            },
            Self::List(list) => Self::List(
                list.into_iter()
                    .map(|arg| arg.substitute(symbols))
                    .collect(),
            ),
            arg => arg,
        }
    }
}

impl Display for Arg {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("None"),
            Self::Bool(value) => Display::fmt(value, f),
            Self::Int(value) => Display::fmt(value, f),
            Self::Float(value) => Display::fmt(value, f),
            Self::Str(text) => write!(f, "{:?}", text),
            Self::List(list) => write!(f, "[{}]", list.iter().join(", ")),
        }
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Self::Str(text.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args() -> Result<()> {
        let args: Vec<Arg> = json5::from_str(r#"[null, 2, "nearest", 0.5, true, [5, 9, 13]]"#)?;
        assert_eq!(
            args,
            vec![
                Arg::Null,
                Arg::Int(2),
                Arg::Str("nearest".into()),
                Arg::Float(r64(0.5)),
                Arg::Bool(true),
                Arg::List(vec![Arg::Int(5), Arg::Int(9), Arg::Int(13)]),
            ]
        );
        assert_eq!(args[1].as_r64(), Some(r64(2.0)));
        assert_eq!(args[1].as_usize(), Some(2));
        assert_eq!(Arg::Int(-1).as_usize(), None);
        Ok(())
    }

    #[test]
    fn substitute_symbols() {
        let symbols: HashMap<_, _> = iter::once(("nc", Arg::Int(80))).collect();
        let args = Arg::List(vec!["nc".into(), "nearest".into()]).substitute(&symbols);
        assert_eq!(
            args,
            Arg::List(vec![Arg::Int(80), Arg::Str("nearest".into())])
        );
    }
}
