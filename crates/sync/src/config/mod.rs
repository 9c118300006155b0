mod delta;
mod hints;
mod node;

pub use delta::{apply_delta, create_delta, create_delta_with, decay_delta_artifacts, with_delta};
pub use hints::{BreadCrumb, Crumb, DeltaHints, NoHints};
pub use node::{ConfigMap, ConfigNode, ConfigNodeType, ConfigSequence};
