pub mod cursor;
pub(crate) mod decoder;
pub mod error;
pub mod leb;
pub(crate) mod local;
pub(crate) mod module;
pub mod reader;
pub(crate) mod section;
pub(crate) mod validator;
pub(crate) mod walker;

#[cfg(test)]
mod test_utils;

use sluice_ir::{DecoderConfig, Module};

pub use cursor::{AdvancementError, ByteCursor};
pub use decoder::Decoder;
pub use error::{DecodeError, DecodeErrorKind, Diagnostic, ErrorCategory, ErrorSink, IndexSpace, Quantity};
pub use local::{LocalDeclReader, LocalRun};
pub use module::{ModuleAssembler, SectionAction};
pub use reader::{DecodeContext, FormatReader, Immediate, ReadResult, Stop};
pub use section::SectionId;
pub use validator::{CodeValidator, SkipBodies, StructureChecker};
pub use walker::InstructionWalker;

/// Decodes a complete module held in memory.
pub fn parse(config: DecoderConfig, bytes: &[u8]) -> Result<Module, DecodeError> {
    let mut decoder = Decoder::new(config);
    decoder.push(bytes)?;
    decoder.finish()
}
