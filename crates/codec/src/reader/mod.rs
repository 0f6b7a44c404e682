//! Grammar-level decoding on top of [`ByteCursor`].
//!
//! Every routine either produces a value or stops with a [`Stop`]. Validation
//! failures that leave the stream readable are recorded in the shared
//! [`ErrorSink`] and decoding continues with a dummy value (index 0, `i32`,
//! an empty block type and so on), so one pass surfaces as many independent
//! diagnostics as possible.

mod imports;
mod init_expr;
mod instr;
mod segments;
mod types;

use sluice_ir::{DecoderConfig, FeatureSet, Limits, Module, Name, Opcode};

use crate::{
    cursor::{AdvancementError, ByteCursor},
    error::{DecodeErrorKind, ErrorSink, IndexSpace, Quantity},
    leb::{LEBConstants, S33},
};

pub use instr::Immediate;
pub use types::RefContext;

/// Why a production stopped before completing.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Stop {
    /// The stream is exhausted; the transition must be retried from its
    /// checkpoint after more input arrives.
    NeedMoreBytes(usize),
    /// A read ran past the declared end of the enclosing region.
    Overflow { position: usize },
    /// A diagnostic has been recorded and the rest of the production cannot
    /// be located (an unknown opcode, a count above its ceiling).
    Abandoned,
}

impl From<AdvancementError> for Stop {
    fn from(value: AdvancementError) -> Self {
        match value {
            AdvancementError::NeedMoreBytes(n) => Stop::NeedMoreBytes(n),
            AdvancementError::BoundsExceeded { position, .. } => Stop::Overflow { position },
            // records nothing; direct cursor callers go through
            // FormatReader::stop
            AdvancementError::InvalidLeb { .. } => Stop::Abandoned,
        }
    }
}

pub type ReadResult<T> = Result<T, Stop>;

/// State shared by every reader of one decode: the module under
/// construction, the diagnostics sink and the configuration.
#[derive(Debug, Default)]
pub struct DecodeContext {
    pub module: Module,
    pub sink: ErrorSink,
    pub config: DecoderConfig,
}

impl DecodeContext {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }
}

pub struct FormatReader<'a, 'c> {
    cursor: ByteCursor<'a>,
    ctx: &'c mut DecodeContext,
}

impl<'a, 'c> FormatReader<'a, 'c> {
    pub fn new(cursor: ByteCursor<'a>, ctx: &'c mut DecodeContext) -> Self {
        Self { cursor, ctx }
    }

    pub fn cursor(&self) -> &ByteCursor<'a> {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut ByteCursor<'a> {
        &mut self.cursor
    }

    pub fn module(&self) -> &Module {
        &self.ctx.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.ctx.module
    }

    pub fn features(&self) -> FeatureSet {
        self.ctx.config.features
    }

    pub fn limits(&self) -> &Limits {
        &self.ctx.config.limits
    }

    /// Absolute stream offset of the next byte.
    #[inline]
    pub fn position(&self) -> usize {
        self.cursor.absolute_pos()
    }

    pub fn record(&mut self, offset: usize, kind: DecodeErrorKind) {
        self.ctx.sink.record(offset, kind);
    }

    /// Converts the outcome of a read made outside this reader (on a cursor
    /// over the same bytes), recording a malformed LEB.
    pub fn stop(&mut self, err: AdvancementError) -> Stop {
        if let AdvancementError::InvalidLeb { position, bits } = err {
            self.record(position, DecodeErrorKind::InvalidLeb(bits));
        }
        err.into()
    }

    pub fn read_u8(&mut self) -> ReadResult<u8> {
        Ok(self.cursor.u8()?)
    }

    pub fn read_bytes(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        Ok(self.cursor.bytes(n)?)
    }

    fn leb<T: LEBConstants>(&mut self) -> ReadResult<T> {
        match self.cursor.leb::<T>() {
            Ok(value) => Ok(value),
            Err(AdvancementError::InvalidLeb { position, bits }) => {
                self.record(position, DecodeErrorKind::InvalidLeb(bits));
                Ok(T::from_u64(0))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn read_u32leb(&mut self) -> ReadResult<u32> {
        self.leb()
    }

    pub fn read_u64leb(&mut self) -> ReadResult<u64> {
        self.leb()
    }

    pub fn read_i32leb(&mut self) -> ReadResult<i32> {
        self.leb()
    }

    pub fn read_i64leb(&mut self) -> ReadResult<i64> {
        self.leb()
    }

    pub fn read_s33leb(&mut self) -> ReadResult<i64> {
        self.leb::<S33>().map(|S33(v)| v)
    }

    /// Reads a vector length and checks it against `max`. A count over its
    /// ceiling abandons the production.
    pub fn read_count(&mut self, quantity: Quantity, max: u32) -> ReadResult<u32> {
        let at = self.position();
        let count = self.read_u32leb()?;
        if count > max {
            self.record(
                at,
                DecodeErrorKind::LimitExceeded {
                    quantity,
                    value: count.into(),
                    max: max.into(),
                },
            );
            return Err(Stop::Abandoned);
        }
        Ok(count)
    }

    pub fn read_name(&mut self) -> ReadResult<Name> {
        let len = self.read_u32leb()?;
        let at = self.position();
        let bytes = self.read_bytes(len as usize)?;
        Ok(Name(match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                self.record(at, DecodeErrorKind::InvalidUtf8);
                String::from_utf8_lossy(bytes).into_owned()
            }
        }))
    }

    /// Current length of a module-level index space. Body-scoped spaces
    /// (locals, labels) are checked by code validators and report 0 here.
    pub fn space_len(&self, space: IndexSpace) -> u32 {
        let module = &self.ctx.module;
        let len = match space {
            IndexSpace::Signature => module.signatures.len(),
            IndexSpace::Function => module.functions.len(),
            IndexSpace::Table => module.tables.len(),
            IndexSpace::Memory => module.memories.len(),
            IndexSpace::Global => module.globals.len(),
            IndexSpace::ElementSegment => module.elements.len(),
            // Code is decoded before the data section; a declared count
            // stands in for the segments not seen yet.
            IndexSpace::DataSegment => module
                .data_count
                .map_or(module.data.len(), |count| count as usize),
            IndexSpace::AbstractType => module.abstract_types.len(),
            IndexSpace::Local | IndexSpace::Label => 0,
        };
        u32::try_from(len).unwrap_or(u32::MAX)
    }

    /// Records an Index diagnostic when `index` is outside `space`.
    pub fn check_index(&mut self, at: usize, space: IndexSpace, index: u32) -> bool {
        let len = self.space_len(space);
        if index < len {
            return true;
        }
        self.record(at, DecodeErrorKind::IndexOutOfBounds { space, index, len });
        false
    }

    /// Reads an index into `space`; `None` (with a recorded diagnostic) when
    /// it is out of range.
    pub fn read_index(&mut self, space: IndexSpace) -> ReadResult<Option<u32>> {
        let at = self.position();
        let index = self.read_u32leb()?;
        Ok(self.check_index(at, space, index).then_some(index))
    }

    /// A reserved byte that must be zero.
    pub fn read_zero_byte(&mut self) -> ReadResult<()> {
        let at = self.position();
        let byte = self.read_u8()?;
        if byte != 0 {
            self.record(at, DecodeErrorKind::ExpectedZeroByte(byte));
        }
        Ok(())
    }

    /// Table immediate of `call_indirect`, `table.init` and `table.copy`: a
    /// LEB index with reference-types, a reserved zero byte without.
    pub fn read_implicit_table_index(&mut self) -> ReadResult<u32> {
        if self.features().reference_types() {
            return self.read_table_index();
        }
        let at = self.position();
        self.read_zero_byte()?;
        self.check_index(at, IndexSpace::Table, 0);
        Ok(0)
    }

    /// Memory immediate: a LEB index with multi-memory, a reserved zero byte
    /// without.
    pub fn read_implicit_memory_index(&mut self) -> ReadResult<u32> {
        if self.features().multi_memory() {
            return self.read_memory_index();
        }
        let at = self.position();
        self.read_zero_byte()?;
        self.check_index(at, IndexSpace::Memory, 0);
        Ok(0)
    }

    pub fn read_opcode(&mut self) -> ReadResult<Opcode> {
        let byte = self.read_u8()?;
        if Opcode::is_prefix(byte) {
            let code = self.read_u32leb()?;
            return Ok(Opcode::Prefixed(byte, code));
        }
        Ok(Opcode::Single(byte))
    }
}

macro_rules! index_readers {
    ($($name:ident => $space:ident),* $(,)?) => {
        paste::paste! {
            impl<'a, 'c> FormatReader<'a, 'c> {
                $(
                    #[doc = concat!("Reads a ", stringify!($space), " index; out-of-range indices are reported and read as 0.")]
                    pub fn [< read_ $name _index >](&mut self) -> ReadResult<u32> {
                        Ok(self.read_index(IndexSpace::$space)?.unwrap_or(0))
                    }
                )*
            }
        }
    };
}

index_readers! {
    func => Function,
    table => Table,
    memory => Memory,
    global => Global,
    data => DataSegment,
    elem => ElementSegment,
    sig => Signature,
    abstract => AbstractType,
}

#[cfg(test)]
mod test {
    use sluice_ir::{Function, Signature};

    use super::*;

    pub(crate) fn with_reader<R>(
        bytes: &[u8],
        ctx: &mut DecodeContext,
        f: impl FnOnce(&mut FormatReader<'_, '_>) -> R,
    ) -> R {
        let mut reader = FormatReader::new(ByteCursor::new(bytes, 0), ctx);
        f(&mut reader)
    }

    #[test]
    fn out_of_range_index_is_reported_and_read_as_zero() -> anyhow::Result<()> {
        let mut ctx = DecodeContext::default();
        ctx.module.signatures.push(Signature::default());
        ctx.module.functions.push(Function {
            sig: 0,
            imported: true,
            body: None,
        });

        let (first, second) = with_reader(&[0x00, 0x05], &mut ctx, |r| {
            Ok::<_, Stop>((r.read_func_index()?, r.read_func_index()?))
        })
        .map_err(|stop| anyhow::anyhow!("{stop:?}"))?;

        assert_eq!((first, second), (0, 0));
        let diags = ctx.sink.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].offset, 1);
        assert_eq!(
            diags[0].kind,
            DecodeErrorKind::IndexOutOfBounds {
                space: IndexSpace::Function,
                index: 5,
                len: 1
            }
        );
        Ok(())
    }

    #[test]
    fn count_above_ceiling_abandons() {
        let mut ctx = DecodeContext::default();
        let result = with_reader(&[0x81, 0x01], &mut ctx, |r| {
            r.read_count(Quantity::Exports, 100)
        });
        assert_eq!(result, Err(Stop::Abandoned));
        assert_eq!(
            ctx.sink.diagnostics()[0].kind.to_string(),
            "too many exports: 129 exceeds the limit of 100"
        );
    }

    #[test]
    fn invalid_leb_is_recorded_and_reads_zero() {
        let mut ctx = DecodeContext::default();
        let result = with_reader(&[0xff, 0xff, 0xff, 0xff, 0x7f, 0x01], &mut ctx, |r| {
            r.read_u32leb()
        });
        assert_eq!(result, Ok(0));
        assert_eq!(
            ctx.sink.diagnostics()[0].kind,
            DecodeErrorKind::InvalidLeb(32)
        );
    }

    #[test]
    fn names_are_utf8_checked() {
        let mut ctx = DecodeContext::default();
        let name = with_reader(&[0x03, b'a', 0xff, b'b'], &mut ctx, |r| r.read_name());
        assert_eq!(name, Ok(Name("a\u{fffd}b".to_string())));
        assert_eq!(ctx.sink.diagnostics()[0].offset, 1);
        assert_eq!(ctx.sink.diagnostics()[0].kind, DecodeErrorKind::InvalidUtf8);
    }

    #[test]
    fn reserved_memory_byte_must_be_zero() {
        let mut ctx = DecodeContext::new(
            DecoderConfig::default().with_features(FeatureSet::empty()),
        );
        ctx.module.memories.push(sluice_ir::Memory {
            ty: sluice_ir::MemType(sluice_ir::ResizableLimits::new(1, None)),
            imported: false,
        });
        let result = with_reader(&[0x01], &mut ctx, |r| r.read_implicit_memory_index());
        assert_eq!(result, Ok(0));
        assert_eq!(
            ctx.sink.diagnostics()[0].kind,
            DecodeErrorKind::ExpectedZeroByte(1)
        );
    }

    #[test]
    fn stop_records_malformed_leb_from_outside_cursors() {
        let mut ctx = DecodeContext::default();
        let stop = with_reader(&[], &mut ctx, |r| {
            r.stop(AdvancementError::InvalidLeb {
                position: 12,
                bits: 32,
            })
        });
        assert_eq!(stop, Stop::Abandoned);
        assert_eq!(
            ctx.sink.diagnostics(),
            &[crate::error::Diagnostic {
                kind: DecodeErrorKind::InvalidLeb(32),
                offset: 12
            }]
        );

        let stop = with_reader(&[], &mut ctx, |r| {
            r.stop(AdvancementError::BoundsExceeded {
                position: 3,
                wanted: 1,
            })
        });
        assert_eq!(stop, Stop::Overflow { position: 3 });
        assert_eq!(ctx.sink.len(), 1);
    }

    #[test]
    fn overrun_of_bounded_view_is_overflow() {
        let mut ctx = DecodeContext::default();
        let result = with_reader(&[0x05, b'a'], &mut ctx, |r| r.read_name());
        assert_eq!(result, Err(Stop::Overflow { position: 1 }));
    }
}
