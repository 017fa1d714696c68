use crate::{
    common::*,
    error::Error,
    layer::LayerRecord,
    module::ModuleKind,
    scale::{ChannelPolicy, ScaleParams, ScaleTable, DEFAULT_CHANNEL_DIVISOR},
};

/// A declarative detector model file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Number of classes predicted by the detection head.
    pub nc: usize,
    /// Input image channels.
    #[serde(default = "default_input_channels")]
    pub ch: usize,
    #[serde(default)]
    pub scales: ScaleTable,
    /// The scale used when the caller does not pick one.
    #[serde(default)]
    pub scale: Option<String>,
    #[serde(default)]
    pub depth_multiple: Option<R64>,
    #[serde(default)]
    pub width_multiple: Option<R64>,
    #[serde(default)]
    pub channel_divisor: Option<usize>,
    #[serde(default)]
    pub channel_divisor_overrides: IndexMap<ModuleKind, usize>,
    pub backbone: Vec<LayerRecord>,
    pub head: Vec<LayerRecord>,
}

fn default_input_channels() -> usize {
    3
}

/// The scale a compilation runs with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScaleSelection {
    /// The scale key, absent for models without a scale table.
    pub key: Option<String>,
    pub params: ScaleParams,
}

impl ModelSpec {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read model file '{}'", path.display()))?;
        let spec = Self::from_json5_str(&text)
            .with_context(|| format!("failed to parse model file '{}'", path.display()))?;
        Ok(spec)
    }

    pub fn from_json5_str(text: &str) -> Result<Self> {
        let spec: Self = json5::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.nc == 0 {
            return Err(Error::malformed("the class count must be positive"));
        }
        if self.ch == 0 {
            return Err(Error::malformed("the input channel count must be positive"));
        }
        if self.backbone.is_empty() {
            return Err(Error::malformed("the backbone must declare at least one layer"));
        }
        if !self.scales.is_empty()
            && (self.depth_multiple.is_some() || self.width_multiple.is_some())
        {
            return Err(Error::malformed(
                "depth_multiple and width_multiple cannot be combined with a scale table",
            ));
        }
        [("depth_multiple", self.depth_multiple), ("width_multiple", self.width_multiple)]
            .iter()
            .try_for_each(|(name, mult)| match mult {
                Some(mult) if *mult <= 0.0 => Err(Error::malformed(
                    format!("{} must be positive, but got {}", name, mult),
                )),
                _ => Ok(()),
            })?;
        Ok(())
    }

    /// Total number of declared layers.
    pub fn num_layers(&self) -> usize {
        self.backbone.len() + self.head.len()
    }

    /// Picks the scale parameters for a compilation.
    ///
    /// An explicit key must exist in the scale table. Without a key the model's
    /// `scale` field is used, else the first scale of the table. Models without a
    /// table use their legacy depth and width multiples.
    pub fn select_scale(&self, key: Option<&str>) -> Result<ScaleSelection, Error> {
        if self.scales.is_empty() {
            if let Some(key) = key {
                return Err(Error::UnknownScale {
                    key: key.to_owned(),
                    available: vec![],
                });
            }

            return Ok(ScaleSelection {
                key: None,
                params: ScaleParams {
                    depth_mult: self.depth_multiple.unwrap_or_else(|| r64(1.0)),
                    width_mult: self.width_multiple.unwrap_or_else(|| r64(1.0)),
                    max_channels: usize::MAX,
                },
            });
        }

        let key = match (key, &self.scale) {
            (Some(key), _) => key,
            (None, Some(default)) => default.as_str(),
            (None, None) => {
                let (first, _) = self.scales.first().ok_or_else(|| Error::UnknownScale {
                    key: String::new(),
                    available: vec![],
                })?;
                warn!(
                    "no model scale given, assuming scale '{}' from [{}]",
                    first,
                    self.scales.keys().join(", ")
                );
                first
            }
        };

        let params = self.scales.resolve(key)?;
        debug!("selected scale '{}': {}", key, params);

        Ok(ScaleSelection {
            key: Some(key.to_owned()),
            params,
        })
    }

    pub fn channel_policy(&self) -> ChannelPolicy {
        ChannelPolicy {
            divisor: self.channel_divisor.unwrap_or(DEFAULT_CHANNEL_DIVISOR),
            overrides: self.channel_divisor_overrides.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY: &str = r#"{
        nc: 2,
        scales: {
            m: [0.50, 0.75, 768],
            l: [1.00, 1.00, 512],
        },
        backbone: [
            [-1, 1, "Conv", [64, 3, 2]],
            [-1, 4, "C2f", [128, true]],
        ],
        head: [
            [-1, 1, "Detect", ["nc"]],
        ],
    }"#;

    #[test]
    fn select_scales() -> Result<()> {
        let spec = ModelSpec::from_json5_str(TINY)?;
        assert_eq!(spec.ch, 3);
        assert_eq!(spec.num_layers(), 3);

        let m = spec.select_scale(Some("m"))?;
        assert_eq!(m.key.as_deref(), Some("m"));
        assert_eq!(m.params.effective_repeats(4), 2);

        let l = spec.select_scale(Some("l"))?;
        assert_eq!(l.params.effective_repeats(4), 4);

        let fallback = spec.select_scale(None)?;
        assert_eq!(fallback.key.as_deref(), Some("m"));

        assert!(matches!(
            spec.select_scale(Some("x")),
            Err(Error::UnknownScale { .. })
        ));
        Ok(())
    }

    #[test]
    fn legacy_multiples() -> Result<()> {
        let spec = ModelSpec::from_json5_str(
            r#"{
                nc: 80,
                depth_multiple: 0.33,
                width_multiple: 0.50,
                backbone: [[-1, 1, "Conv", [64, 6, 2, 2]]],
                head: [],
            }"#,
        )?;
        let selection = spec.select_scale(None)?;
        assert_eq!(selection.key, None);
        assert_eq!(selection.params.max_channels, usize::MAX);
        assert_eq!(selection.params.effective_channels(64, 8), Ok(32));
        assert!(spec.select_scale(Some("n")).is_err());
        Ok(())
    }

    #[test]
    fn reject_malformed_files() {
        assert!(ModelSpec::from_json5_str(r#"{ nc: 0, backbone: [[-1, 1, "Conv", [16]]], head: [] }"#).is_err());
        assert!(ModelSpec::from_json5_str(r#"{ nc: 1, backbone: [], head: [] }"#).is_err());
        assert!(ModelSpec::from_json5_str(r#"{ nc: 1, backbone: [[-1, 1, "Conv"]], head: [] }"#).is_err());
    }

    #[test]
    fn divisor_overrides() -> Result<()> {
        let spec = ModelSpec::from_json5_str(
            r#"{
                nc: 1,
                channel_divisor: 4,
                channel_divisor_overrides: { Conv: 16 },
                backbone: [[-1, 1, "Conv", [64]]],
                head: [],
            }"#,
        )?;
        let policy = spec.channel_policy();
        assert_eq!(policy.divisor_for(ModuleKind::Conv), 16);
        assert_eq!(policy.divisor_for(ModuleKind::C2f), 4);
        Ok(())
    }
}
