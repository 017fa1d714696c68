pub use anyhow::{Context as _, Result};
pub use indexmap::IndexMap;
pub use itertools::Itertools as _;
pub use log::{debug, warn};
pub use noisy_float::prelude::*;
pub use once_cell::sync::Lazy;
pub use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
pub use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    fs,
    iter,
    num::NonZeroUsize,
    path::Path,
    str::FromStr,
};
pub use strum::{AsRefStr, IntoEnumIterator as _};
pub use tensor_shape::{Dim, Shape};
