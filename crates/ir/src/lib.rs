mod defs;
mod features;
pub mod opcodes;

pub use defs::*;
pub use features::*;
pub use opcodes::{ImmediateShape, Opcode};
