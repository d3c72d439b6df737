mod state;
mod sig;
mod cell;
mod module;
mod design;
mod sigmap;
mod print;

pub use state::State;
pub use sig::{SigBit, SigSpec, WireId};
pub use cell::{Cell, CellKind, Param, Port};
pub use module::{CellId, Module, Wire};
pub use design::{Design, Selection};
pub use sigmap::SigMap;
pub use print::SigDisplay;
