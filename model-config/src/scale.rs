use crate::{common::*, error::Error, module::ModuleKind};

/// Channel alignment used when no divisor is configured.
pub const DEFAULT_CHANNEL_DIVISOR: usize = 8;

/// The (depth, width, max channels) triple of one model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScaleParams {
    pub depth_mult: R64,
    pub width_mult: R64,
    pub max_channels: usize,
}

impl ScaleParams {
    /// Parameters that leave the nominal values untouched.
    pub fn identity() -> Self {
        Self {
            depth_mult: r64(1.0),
            width_mult: r64(1.0),
            max_channels: usize::MAX,
        }
    }

    /// Scales a nominal repeat count, rounding half to even and flooring to 1.
    pub fn effective_repeats(&self, nominal: usize) -> usize {
        let scaled = round_half_even(nominal as f64 * self.depth_mult.raw());
        (scaled as usize).max(1)
    }

    /// Scales a nominal channel count.
    ///
    /// The product with the width multiplier is clamped to `max_channels`, then
    /// rounded up to a multiple of `divisor`. The result never exceeds the largest
    /// multiple of `divisor` that fits into `max_channels`.
    ///
    /// Fails on a zero nominal count or when the aligned count does not fit
    /// into `usize`.
    pub fn effective_channels(&self, nominal: usize, divisor: usize) -> Result<usize, String> {
        if nominal == 0 {
            return Err("the channel count must be positive".into());
        }
        let scaled = (nominal as f64 * self.width_mult.raw()).min(self.max_channels as f64);
        let aligned = ((scaled / divisor as f64).ceil() as usize)
            .max(1)
            .checked_mul(divisor)
            .ok_or_else(|| {
                format!(
                    "{} channels scaled by {} overflow the channel count",
                    nominal, self.width_mult
                )
            })?;
        let ceiling = (self.max_channels / divisor) * divisor;
        Ok(aligned.min(ceiling))
    }

    fn validate(&self) -> Result<(), String> {
        if self.depth_mult <= 0.0 {
            return Err(format!("depth multiplier must be positive, but got {}", self.depth_mult));
        }
        if self.width_mult <= 0.0 {
            return Err(format!("width multiplier must be positive, but got {}", self.width_mult));
        }
        if self.max_channels == 0 {
            return Err("max channels must be positive".into());
        }
        Ok(())
    }
}

fn round_half_even(value: f64) -> f64 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 {
        2.0 * (value / 2.0).round()
    } else {
        rounded
    }
}

impl Display for ScaleParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "depth={} width={} max_channels={}",
            self.depth_mult, self.width_mult, self.max_channels
        )
    }
}

impl Serialize for ScaleParams {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (self.depth_mult, self.width_mult, self.max_channels).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ScaleParams {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (depth_mult, width_mult, max_channels) = <(R64, R64, usize)>::deserialize(deserializer)?;
        let params = Self {
            depth_mult,
            width_mult,
            max_channels,
        };
        params.validate().map_err(D::Error::custom)?;
        Ok(params)
    }
}

/// Scale keys mapped to their parameters, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScaleTable(pub IndexMap<String, ScaleParams>);

impl ScaleTable {
    pub fn resolve(&self, key: &str) -> Result<ScaleParams, Error> {
        self.0.get(key).copied().ok_or_else(|| Error::UnknownScale {
            key: key.to_owned(),
            available: self.keys().map(ToOwned::to_owned).collect(),
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn first(&self) -> Option<(&str, ScaleParams)> {
        self.0.get_index(0).map(|(key, params)| (key.as_str(), *params))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ScaleParams)> for ScaleTable {
    fn from_iter<T: IntoIterator<Item = (String, ScaleParams)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Channel alignment policy, optionally overridden per module kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPolicy {
    pub divisor: usize,
    pub overrides: IndexMap<ModuleKind, usize>,
}

impl ChannelPolicy {
    pub fn new(divisor: usize) -> Self {
        Self {
            divisor,
            overrides: IndexMap::new(),
        }
    }

    pub fn divisor_for(&self, kind: ModuleKind) -> usize {
        self.overrides.get(&kind).copied().unwrap_or(self.divisor)
    }

    /// Checks every divisor is positive and fits into the channel ceiling.
    pub fn validate(&self, scale: &ScaleParams) -> Result<(), Error> {
        iter::once((None, self.divisor))
            .chain(self.overrides.iter().map(|(kind, divisor)| (Some(*kind), *divisor)))
            .try_for_each(|(kind, divisor)| {
                let name = kind.map_or_else(|| "channel divisor".to_owned(), |kind| {
                    format!("channel divisor of {}", kind)
                });
                if divisor == 0 {
                    return Err(Error::malformed(format!("{} must be positive", name)));
                }
                if divisor > scale.max_channels {
                    return Err(Error::malformed(
                        format!(
                            "{} {} exceeds max channels {}",
                            name, divisor, scale.max_channels
                        ),
                    ));
                }
                Ok(())
            })
    }
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_DIVISOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(depth: f64, width: f64, max_channels: usize) -> ScaleParams {
        ScaleParams {
            depth_mult: r64(depth),
            width_mult: r64(width),
            max_channels,
        }
    }

    #[test]
    fn repeats_are_rounded_and_floored() {
        assert_eq!(params(0.50, 0.75, 768).effective_repeats(4), 2);
        assert_eq!(params(1.00, 1.00, 512).effective_repeats(4), 4);
        assert_eq!(params(0.33, 0.25, 1024).effective_repeats(3), 1);
        assert_eq!(params(0.33, 0.25, 1024).effective_repeats(1), 1);
        assert_eq!(params(0.67, 0.75, 768).effective_repeats(1), 1);
        assert_eq!(params(0.67, 0.75, 768).effective_repeats(6), 4);
        // 2.5 rounds to 2
        assert_eq!(params(0.5, 1.0, 512).effective_repeats(5), 2);
        assert_eq!(params(1.5, 1.0, 512).effective_repeats(1), 2);
        assert_eq!(params(1.5, 1.0, 512).effective_repeats(2), 3);
    }

    #[test]
    fn channels_are_aligned_and_capped() -> Result<(), String> {
        let n = params(0.33, 0.25, 1024);
        assert_eq!(n.effective_channels(64, 8)?, 16);
        assert_eq!(n.effective_channels(1024, 8)?, 256);

        let x = params(1.00, 1.25, 512);
        assert_eq!(x.effective_channels(64, 8)?, 80);
        assert_eq!(x.effective_channels(1024, 8)?, 512);

        let odd = params(1.0, 1.0, 100);
        assert_eq!(odd.effective_channels(100, 8)?, 96);
        assert_eq!(odd.effective_channels(1, 8)?, 8);

        for nominal in [3, 16, 64, 100, 256, 512, 1024] {
            let channels = n.effective_channels(nominal, 8)?;
            assert_eq!(channels % 8, 0);
            assert!(channels <= 1024);
        }
        Ok(())
    }

    #[test]
    fn reject_unusable_channels() {
        assert!(params(1.0, 1.0, 512).effective_channels(0, 8).is_err());

        let legacy = ScaleParams {
            width_mult: r64(3.0),
            ..ScaleParams::identity()
        };
        assert!(legacy.effective_channels(usize::MAX / 2, 8).is_err());
        assert_eq!(legacy.effective_channels(64, 8), Ok(192));
    }

    #[test]
    fn resolve_scale_key() -> Result<()> {
        let table: ScaleTable = json5::from_str("{ n: [0.33, 0.25, 1024], s: [0.33, 0.50, 1024] }")?;
        assert_eq!(table.resolve("s")?, params(0.33, 0.50, 1024));
        assert_eq!(table.first().map(|(key, _)| key), Some("n"));

        let err = table.resolve("q").unwrap_err();
        assert_eq!(
            err,
            Error::UnknownScale {
                key: "q".into(),
                available: vec!["n".into(), "s".into()]
            }
        );
        Ok(())
    }

    #[test]
    fn reject_invalid_scales() {
        assert!(json5::from_str::<ScaleParams>("[0, 0.25, 1024]").is_err());
        assert!(json5::from_str::<ScaleParams>("[0.33, 0.25, 0]").is_err());

        let mut policy = ChannelPolicy::new(8);
        assert!(policy.validate(&params(1.0, 1.0, 4)).is_err());
        policy.overrides.insert(ModuleKind::Conv, 0);
        assert!(policy.validate(&params(1.0, 1.0, 512)).is_err());
    }
}
