pub use anyhow::{ensure, format_err, Result};
pub use indexmap::IndexMap;
pub use itertools::Itertools as _;
pub use log::debug;
pub use model_config::{
    Arg, ChannelPolicy, ChannelRule, Error, LayerSpec, ModelSpec, ModuleKind, Resolved,
    ScaleParams, ScaleSelection, Section,
};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::{BTreeSet, HashMap},
    fmt::{self, Display, Formatter},
    io::prelude::*,
    iter,
};
pub use tensor_shape::{Dim, Shape};
