use crate::{common::*, dim::Dim};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(Vec<Dim>);

impl Shape {
    /// Creates a `[batch, channels, height, width]` feature map shape.
    pub fn feature_map(
        b: impl Into<Dim>,
        c: impl Into<Dim>,
        h: impl Into<Dim>,
        w: impl Into<Dim>,
    ) -> Self {
        Self(vec![b.into(), c.into(), h.into(), w.into()])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn size4(&self) -> Option<[Dim; 4]> {
        match self.as_ref() {
            &[s1, s2, s3, s4] => Some([s1, s2, s3, s4]),
            _ => None,
        }
    }

    /// The channel dimension of a feature map shape.
    pub fn channels(&self) -> Option<Dim> {
        let [_b, c, _h, _w] = self.size4()?;
        Some(c)
    }

    pub fn with_channels(&self, c: impl Into<Dim>) -> Option<Self> {
        let [b, _c, h, w] = self.size4()?;
        Some(Self::feature_map(b, c, h, w))
    }

    pub fn equalize(&self, other: &Shape) -> Option<Shape> {
        if self.0.len() != other.0.len() {
            return None;
        }

        let new_shape: Option<Vec<Dim>> = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(lhs, rhs)| lhs.equalize(rhs))
            .collect();
        Some(new_shape?.into())
    }
}

impl From<Vec<Dim>> for Shape {
    fn from(vec: Vec<Dim>) -> Self {
        Self(vec)
    }
}

impl AsRef<[Dim]> for Shape {
    fn as_ref(&self) -> &[Dim] {
        &self.0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        self.0.iter().enumerate().try_for_each(|(index, dim)| {
            if index > 0 {
                f.write_str(", ")?;
            }
            fmt::Display::fmt(dim, f)
        })?;
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_map_accessors() {
        let shape = Shape::feature_map(Dim::Infer, 64, 160, 160);
        assert_eq!(shape.channels(), Some(Dim::Size(64)));
        assert_eq!(
            shape.with_channels(128),
            Some(Shape::feature_map(Dim::Infer, 128, 160, 160))
        );
        assert_eq!(shape.to_string(), "[_, 64, 160, 160]");
        assert_eq!(Shape::from(vec![Dim::Size(3)]).channels(), None);
    }

    #[test]
    fn equalize_shapes() {
        let lhs = Shape::feature_map(Dim::Infer, 64, 40, Dim::Infer);
        let rhs = Shape::feature_map(1, 64, Dim::Infer, 40);
        assert_eq!(lhs.equalize(&rhs), Some(Shape::feature_map(1, 64, 40, 40)));

        let other = Shape::feature_map(1, 64, 20, 20);
        assert_eq!(rhs.equalize(&other), None);
        assert_eq!(rhs.equalize(&Shape::from(vec![Dim::Size(1)])), None);
    }

    #[test]
    fn serde_inferred_dims() {
        let shape: Shape = serde_json::from_str(r#"[1, "_", null, 4]"#).unwrap();
        assert_eq!(shape, Shape::feature_map(1, Dim::Infer, Dim::Infer, 4));
        assert_eq!(
            serde_json::to_string(&shape).unwrap(),
            r#"[1,"_","_",4]"#
        );
    }
}
