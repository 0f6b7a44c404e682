use std::fmt::Display;

use sluice_ir::{Opcode, ValType};
use thiserror::Error;

use crate::section::SectionId;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ErrorCategory {
    Structural,
    Size,
    Limit,
    Index,
    Type,
    Encoding,
}

/// The counted or sized construct a Limit diagnostic is about.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Quantity {
    Types,
    Imports,
    Functions,
    Tables,
    Memories,
    Globals,
    Exports,
    TableEntries,
    ElementSegments,
    DataSegments,
    ModuleSize,
    FunctionSize,
    Params,
    Results,
    Locals,
    BrTableEntries,
    SelectTypes,
    MemoryPages,
    TableSize,
    Constraints,
}

impl Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Quantity::Types => "types",
            Quantity::Imports => "imports",
            Quantity::Functions => "functions",
            Quantity::Tables => "tables",
            Quantity::Memories => "memories",
            Quantity::Globals => "globals",
            Quantity::Exports => "exports",
            Quantity::TableEntries => "table entries",
            Quantity::ElementSegments => "element segments",
            Quantity::DataSegments => "data segments",
            Quantity::ModuleSize => "module size",
            Quantity::FunctionSize => "function size",
            Quantity::Params => "params",
            Quantity::Results => "results",
            Quantity::Locals => "locals",
            Quantity::BrTableEntries => "br_table entries",
            Quantity::SelectTypes => "select types",
            Quantity::MemoryPages => "memory pages",
            Quantity::TableSize => "table size",
            Quantity::Constraints => "constraints",
        })
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum IndexSpace {
    Signature,
    Function,
    Table,
    Memory,
    Global,
    ElementSegment,
    DataSegment,
    AbstractType,
    Local,
    Label,
}

impl Display for IndexSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IndexSpace::Signature => "signature",
            IndexSpace::Function => "function",
            IndexSpace::Table => "table",
            IndexSpace::Memory => "memory",
            IndexSpace::Global => "global",
            IndexSpace::ElementSegment => "element segment",
            IndexSpace::DataSegment => "data segment",
            IndexSpace::AbstractType => "abstract type",
            IndexSpace::Local => "local",
            IndexSpace::Label => "label",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeErrorKind {
    // structural
    #[error("bad magic number (expected 0061736DH ('\\0asm'), got {0:08X}H)")]
    BadMagic(u32),

    #[error("unexpected version {0}")]
    UnexpectedVersion(u32),

    #[error("invalid section id {0}")]
    InvalidSectionId(u8),

    #[error("duplicate {0} section")]
    DuplicateSection(SectionId),

    #[error("{0} section out of order")]
    SectionOutOfOrder(SectionId),

    #[error("invalid import kind {0:#04x}")]
    InvalidImportKind(u8),

    #[error("invalid export kind {0:#04x}")]
    InvalidExportKind(u8),

    #[error("invalid type form {0:#04x} (expected 0x60)")]
    InvalidTypeForm(u8),

    #[error("invalid element segment flags {0}")]
    InvalidElemFlags(u32),

    #[error("invalid element kind {0:#04x}")]
    InvalidElemKind(u8),

    #[error("invalid data segment flags {0}")]
    InvalidDataFlags(u32),

    #[error("duplicate export \"{0}\"")]
    DuplicateExport(String),

    #[error("function declared without a code section")]
    MissingCodeSection,

    #[error("data count declared without a data section")]
    MissingDataSection,

    #[error("function section declares {declared} bodies, code section has {found}")]
    FunctionBodyCountMismatch { declared: u32, found: u32 },

    #[error("data count declares {declared} segments, data section has {found}")]
    DataCountMismatch { declared: u32, found: u32 },

    #[error("unknown opcode {0}")]
    UnknownOpcode(Opcode),

    #[error("opcode {0} is not allowed in a constant expression")]
    UnexpectedOpcodeInInit(Opcode),

    #[error("expected end of constant expression")]
    ExpectedEndInInit,

    #[error("else without a matching if")]
    UnmatchedElse,

    #[error("function body does not end with end")]
    MissingEnd,

    #[error("function {func_index} was rejected by the code validator")]
    CodeValidationFailed { func_index: u32 },

    // size
    #[error("incomplete {section} section (declared {declared} bytes, consumed {consumed})")]
    IncompleteSection {
        section: SectionId,
        declared: u32,
        consumed: u32,
    },

    #[error("{section} section overflows its declared size of {declared} bytes")]
    OverflowSection { section: SectionId, declared: u32 },

    #[error("incomplete function body (declared {declared} bytes, consumed {consumed})")]
    IncompleteBody { declared: u32, consumed: u32 },

    #[error("function body overflows its declared size of {declared} bytes")]
    OverflowBody { declared: u32 },

    #[error("unexpected end of stream")]
    IncompleteStream,

    // limit
    #[error("too many {quantity}: {value} exceeds the limit of {max}")]
    LimitExceeded {
        quantity: Quantity,
        value: u64,
        max: u64,
    },

    #[error("maximum {max} is below minimum {min}")]
    MaximumBelowMinimum { min: u32, max: u32 },

    // index
    #[error("{space} index {index} out of bounds (length {len})")]
    IndexOutOfBounds {
        space: IndexSpace,
        index: u32,
        len: u32,
    },

    // type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: ValType, actual: ValType },

    #[error("invalid block type {0}")]
    InvalidBlockType(i64),

    #[error("start function must have signature [] -> []")]
    InvalidStartSignature,

    // encoding
    #[error("invalid UTF-8 in name")]
    InvalidUtf8,

    #[error("expected zero byte, got {0:#04x}")]
    ExpectedZeroByte(u8),

    #[error("invalid value type {0:#04x}")]
    InvalidValueType(u8),

    #[error("invalid reference type {0:#04x}")]
    InvalidRefType(u8),

    #[error("illegal table element type {0}")]
    IllegalTableElementType(ValType),

    #[error("invalid heap type {0}")]
    InvalidHeapType(i64),

    #[error("invalid mutability {0:#04x}")]
    InvalidMutability(u8),

    #[error("invalid limits flags {0:#04x}")]
    InvalidLimitsFlags(u8),

    #[error("shared limits require atomics and a maximum")]
    ExpectedSharedMaximum,

    #[error("malformed {0}-bit LEB128")]
    InvalidLeb(u32),

    #[error("invalid abstract type flags {0:#04x}")]
    InvalidAbstractTypeFlags(u8),
}

impl DecodeErrorKind {
    pub fn category(&self) -> ErrorCategory {
        use DecodeErrorKind::*;
        match self {
            BadMagic(_)
            | UnexpectedVersion(_)
            | InvalidSectionId(_)
            | DuplicateSection(_)
            | SectionOutOfOrder(_)
            | InvalidImportKind(_)
            | InvalidExportKind(_)
            | InvalidTypeForm(_)
            | InvalidElemFlags(_)
            | InvalidElemKind(_)
            | InvalidDataFlags(_)
            | DuplicateExport(_)
            | MissingCodeSection
            | MissingDataSection
            | FunctionBodyCountMismatch { .. }
            | DataCountMismatch { .. }
            | UnknownOpcode(_)
            | UnexpectedOpcodeInInit(_)
            | ExpectedEndInInit
            | UnmatchedElse
            | MissingEnd
            | CodeValidationFailed { .. } => ErrorCategory::Structural,

            IncompleteSection { .. }
            | OverflowSection { .. }
            | IncompleteBody { .. }
            | OverflowBody { .. }
            | IncompleteStream => ErrorCategory::Size,

            LimitExceeded { .. } | MaximumBelowMinimum { .. } => ErrorCategory::Limit,

            IndexOutOfBounds { .. } => ErrorCategory::Index,

            TypeMismatch { .. } | InvalidBlockType(_) | InvalidStartSignature => {
                ErrorCategory::Type
            }

            InvalidUtf8
            | ExpectedZeroByte(_)
            | InvalidValueType(_)
            | InvalidRefType(_)
            | IllegalTableElementType(_)
            | InvalidHeapType(_)
            | InvalidMutability(_)
            | InvalidLimitsFlags(_)
            | ExpectedSharedMaximum
            | InvalidLeb(_)
            | InvalidAbstractTypeFlags(_) => ErrorCategory::Encoding,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at offset {offset}")]
pub struct Diagnostic {
    pub kind: DecodeErrorKind,
    pub offset: usize,
}

/// Collects diagnostics in the order they are found.
#[derive(Debug, Default, Clone)]
pub struct ErrorSink {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, offset: usize, kind: DecodeErrorKind) {
        tracing::debug!(offset, category = ?kind.category(), "{kind}");
        self.diagnostics.push(Diagnostic { kind, offset });
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// A failed decode: every diagnostic recorded during the pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", summarize(.diagnostics))]
pub struct DecodeError {
    pub diagnostics: Vec<Diagnostic>,
}

impl DecodeError {
    pub fn first(&self) -> Option<&Diagnostic> {
        self.diagnostics.first()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &DecodeErrorKind> + '_ {
        self.diagnostics.iter().map(|diag| &diag.kind)
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    match diagnostics {
        [] => "decode failed".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}
