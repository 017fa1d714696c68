pub use derivative::Derivative;
pub use indexmap::IndexMap;
pub use itertools::Itertools as _;
pub use log::{debug, trace};
pub use model_config::{Arg, ModuleKind};
pub use model_graph::{Graph, Node, NodeKey, Producer, Repeat, TapName};
pub use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
pub use tensor_shape::Shape;
