use crate::common::*;

/// A single dimension of a shape, either a known size or left for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Size(usize),
    Infer,
}

impl Dim {
    pub fn size(&self) -> Option<usize> {
        Option::<usize>::from(*self)
    }

    pub fn is_infer(&self) -> bool {
        matches!(self, Self::Infer)
    }

    pub fn is_compatible_with(&self, other: &Dim) -> bool {
        match (self, other) {
            (Self::Size(lhs), Self::Size(rhs)) => lhs == rhs,
            _ => true,
        }
    }

    /// Merges two dimensions, returning `None` when both are known and differ.
    pub fn equalize(&self, other: &Dim) -> Option<Self> {
        match (self, other) {
            (Self::Size(lhs), Self::Size(rhs)) => (lhs == rhs).then(|| *self),
            (Self::Size(_), Self::Infer) => Some(*self),
            (Self::Infer, Self::Size(_)) => Some(*other),
            (Self::Infer, Self::Infer) => Some(*self),
        }
    }

    /// Multiplies the size by a real factor, rounding down.
    pub fn scale(&self, scale: R64) -> Self {
        match *self {
            Self::Size(size) => {
                let new_size = (scale * size as f64).floor().raw() as usize;
                Self::Size(new_size)
            }
            Self::Infer => Self::Infer,
        }
    }

    /// Output extent of a strided window sliding over this dimension.
    ///
    /// Returns `None` if the dilated kernel does not fit into the padded input
    /// or if the stride is zero.
    pub fn conv_out(
        &self,
        kernel: usize,
        stride: usize,
        padding: usize,
        dilation: usize,
    ) -> Option<Self> {
        if stride == 0 || kernel == 0 || dilation == 0 {
            return None;
        }

        match *self {
            Self::Size(size) => {
                let span = dilation * (kernel - 1) + 1;
                let padded = size + 2 * padding;
                if padded < span {
                    return None;
                }
                Some(Self::Size((padded - span) / stride + 1))
            }
            Self::Infer => Some(Self::Infer),
        }
    }

    /// Output extent of a transposed convolution over this dimension.
    pub fn deconv_out(&self, kernel: usize, stride: usize, padding: usize) -> Option<Self> {
        match *self {
            Self::Size(0) => None,
            Self::Size(size) => {
                let grown = (size - 1) * stride + kernel;
                if grown < 2 * padding {
                    return None;
                }
                Some(Self::Size(grown - 2 * padding))
            }
            Self::Infer => Some(Self::Infer),
        }
    }
}

impl From<usize> for Dim {
    fn from(from: usize) -> Self {
        Self::Size(from)
    }
}

impl From<Option<usize>> for Dim {
    fn from(from: Option<usize>) -> Self {
        match from {
            Some(size) => Self::Size(size),
            None => Self::Infer,
        }
    }
}

impl From<Dim> for Option<usize> {
    fn from(from: Dim) -> Self {
        match from {
            Dim::Size(size) => Some(size),
            Dim::Infer => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size(size) => fmt::Display::fmt(size, f),
            Self::Infer => f.write_str("_"),
        }
    }
}

impl Serialize for Dim {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Size(value) => value.serialize(serializer),
            Self::Infer => "_".serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Dim {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde_json::Value;

        let value = Value::deserialize(deserializer)?;
        let dim = match value {
            Value::String(text) => {
                if text != "_" {
                    return Err(D::Error::custom(format!("'{}' is not a dimension", text)));
                }
                Self::Infer
            }
            Value::Number(value) => {
                let value = value
                    .as_u64()
                    .ok_or_else(|| D::Error::custom(format!("'{}' is not a dimension", value)))?;
                Self::Size(value as usize)
            }
            Value::Null => Self::Infer,
            value => {
                return Err(D::Error::custom(format!("'{}' is not a dimension", value)));
            }
        };
        Ok(dim)
    }
}

impl Add<Dim> for Dim {
    type Output = Dim;

    fn add(self, rhs: Dim) -> Self::Output {
        match (self, rhs) {
            (Self::Size(lhs), Self::Size(rhs)) => Self::Size(lhs + rhs),
            _ => Self::Infer,
        }
    }
}

impl Mul<usize> for Dim {
    type Output = Dim;

    fn mul(self, rhs: usize) -> Self::Output {
        match self {
            Self::Size(lhs) => Self::Size(lhs * rhs),
            Self::Infer => Self::Infer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_output_extent() {
        // 640 input, k=3 s=2 p=1
        assert_eq!(Dim::Size(640).conv_out(3, 2, 1, 1), Some(Dim::Size(320)));
        // 'same' padding keeps the size
        assert_eq!(Dim::Size(80).conv_out(5, 1, 2, 1), Some(Dim::Size(80)));
        // dilation widens the receptive span
        assert_eq!(Dim::Size(20).conv_out(3, 1, 2, 2), Some(Dim::Size(20)));
        assert_eq!(Dim::Size(2).conv_out(7, 1, 0, 1), None);
        assert_eq!(Dim::Infer.conv_out(3, 2, 1, 1), Some(Dim::Infer));
        assert_eq!(Dim::Size(8).conv_out(3, 0, 1, 1), None);
    }

    #[test]
    fn deconv_output_extent() {
        assert_eq!(Dim::Size(20).deconv_out(2, 2, 0), Some(Dim::Size(40)));
        assert_eq!(Dim::Size(0).deconv_out(2, 2, 0), None);
    }

    #[test]
    fn equalize_dims() {
        assert_eq!(Dim::Size(3).equalize(&Dim::Infer), Some(Dim::Size(3)));
        assert_eq!(Dim::Infer.equalize(&Dim::Size(4)), Some(Dim::Size(4)));
        assert_eq!(Dim::Size(3).equalize(&Dim::Size(4)), None);
        assert_eq!(Dim::Size(40).scale(r64(2.0)), Dim::Size(80));
    }
}
