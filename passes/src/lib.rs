mod merge_wires;
mod tribuf;

pub use merge_wires::merge_wires;
pub use tribuf::{tribuf, TribufConfig, TribufError};
