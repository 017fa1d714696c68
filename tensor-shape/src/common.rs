pub use noisy_float::prelude::*;
pub use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
pub use std::{
    fmt,
    ops::{Add, Mul},
};
