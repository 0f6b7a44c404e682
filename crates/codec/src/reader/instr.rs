use sluice_ir::{BlockType, HeapType, ImmediateShape, MemArg, Opcode, ValType};

use crate::error::{IndexSpace, Quantity};

use super::{FormatReader, ReadResult};

const MEMARG_HAS_MEMORY: u32 = 1 << 6;

/// The decoded immediates of one instruction.
///
/// Module-level indices are checked as they are read. Label depths and local
/// indices are left to the code validator, which knows the control stack and
/// the local count.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Immediate {
    None,
    Block(BlockType),
    Label(u32),
    LabelTable { targets: Box<[u32]>, default: u32 },
    Local(u32),
    Index(u32),
    CallIndirect { sig: u32, table: u32 },
    /// `memory.init`, `table.init`: (segment, destination).
    Init { segment: u32, target: u32 },
    /// `memory.copy`, `table.copy`: (destination, source).
    Copy { dst: u32, src: u32 },
    Select(Box<[ValType]>),
    MemArg(MemArg),
    MemArgLane(MemArg, u8),
    Lane(u8),
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    V128([u8; 16]),
    HeapType(HeapType),
}

impl<'a, 'c> FormatReader<'a, 'c> {
    /// Reads the immediates of `opcode`. Returns `Ok(None)` without consuming
    /// anything when the opcode is unknown under the configured features.
    pub fn read_immediates(&mut self, opcode: Opcode) -> ReadResult<Option<Immediate>> {
        use ImmediateShape as S;

        let Some(shape) = opcode.immediates(self.features()) else {
            return Ok(None);
        };

        Ok(Some(match shape {
            S::None => Immediate::None,
            S::BlockType => Immediate::Block(self.read_block_type()?),
            S::Label => Immediate::Label(self.read_u32leb()?),
            S::LabelTable => {
                let max = self.limits().max_br_table_entries;
                let count = self.read_count(Quantity::BrTableEntries, max)?;
                let targets = (0..count)
                    .map(|_| self.read_u32leb())
                    .collect::<ReadResult<_>>()?;
                let default = self.read_u32leb()?;
                Immediate::LabelTable { targets, default }
            }
            S::CallIndirect => {
                let sig = self.read_sig_index()?;
                let table = self.read_implicit_table_index()?;
                Immediate::CallIndirect { sig, table }
            }
            S::SelectTypes => {
                let max = self.limits().max_select_types;
                let count = self.read_count(Quantity::SelectTypes, max)?;
                Immediate::Select(
                    (0..count)
                        .map(|_| self.read_value_type())
                        .collect::<ReadResult<_>>()?,
                )
            }
            S::Local => Immediate::Local(self.read_u32leb()?),
            S::Global => Immediate::Index(self.read_global_index()?),
            S::Func => Immediate::Index(self.read_func_index()?),
            S::Table => Immediate::Index(self.read_table_index()?),
            S::Memory => Immediate::Index(self.read_implicit_memory_index()?),
            S::Sig => Immediate::Index(self.read_sig_index()?),
            S::Elem => Immediate::Index(self.read_elem_index()?),
            S::Data => Immediate::Index(self.read_data_index()?),
            S::MemoryInit => {
                let segment = self.read_data_index()?;
                let target = self.read_implicit_memory_index()?;
                Immediate::Init { segment, target }
            }
            S::MemoryCopy => {
                let dst = self.read_implicit_memory_index()?;
                let src = self.read_implicit_memory_index()?;
                Immediate::Copy { dst, src }
            }
            S::TableInit => {
                let segment = self.read_elem_index()?;
                let target = self.read_implicit_table_index()?;
                Immediate::Init { segment, target }
            }
            S::TableCopy => {
                let dst = self.read_implicit_table_index()?;
                let src = self.read_implicit_table_index()?;
                Immediate::Copy { dst, src }
            }
            S::MemArg => Immediate::MemArg(self.read_memarg()?),
            S::MemArgLane => {
                let memarg = self.read_memarg()?;
                Immediate::MemArgLane(memarg, self.read_u8()?)
            }
            S::Lane => Immediate::Lane(self.read_u8()?),
            S::I32 => Immediate::I32(self.read_i32leb()?),
            S::I64 => Immediate::I64(self.read_i64leb()?),
            S::F32 => Immediate::F32(self.cursor.u32()?),
            S::F64 => Immediate::F64(self.cursor.u64()?),
            S::V128 | S::Shuffle => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(self.read_bytes(16)?);
                Immediate::V128(bytes)
            }
            S::HeapType => Immediate::HeapType(self.read_heap_type()?),
            S::ZeroByte => {
                self.read_zero_byte()?;
                Immediate::None
            }
        }))
    }

    /// Alignment flags, then (with multi-memory and bit 6 set) a memory index,
    /// then the offset.
    pub fn read_memarg(&mut self) -> ReadResult<MemArg> {
        let at = self.position();
        let flags = self.read_u32leb()?;
        let (align, memory) = if self.features().multi_memory() && flags & MEMARG_HAS_MEMORY != 0
        {
            (flags & !MEMARG_HAS_MEMORY, self.read_memory_index()?)
        } else {
            self.check_index(at, IndexSpace::Memory, 0);
            (flags, 0)
        };
        let offset = self.read_u32leb()?.into();
        Ok(MemArg {
            align,
            offset,
            memory,
        })
    }
}

#[cfg(test)]
mod test {
    use sluice_ir::{opcodes, DecoderConfig, FeatureSet, MemType, Memory, ResizableLimits};

    use super::*;
    use crate::{
        error::DecodeErrorKind,
        reader::{test::with_reader, DecodeContext},
    };

    fn with_memory(features: FeatureSet) -> DecodeContext {
        let mut ctx = DecodeContext::new(DecoderConfig::default().with_features(features));
        for _ in 0..2 {
            ctx.module.memories.push(Memory {
                ty: MemType(ResizableLimits::new(1, None)),
                imported: false,
            });
        }
        ctx
    }

    #[test]
    fn br_table_reads_targets_and_default() {
        let mut ctx = DecodeContext::default();
        let imm = with_reader(&[0x02, 0x00, 0x01, 0x02], &mut ctx, |r| {
            r.read_immediates(Opcode::Single(opcodes::BR_TABLE))
        });
        assert_eq!(
            imm,
            Ok(Some(Immediate::LabelTable {
                targets: Box::new([0, 1]),
                default: 2
            }))
        );
    }

    #[test]
    fn memarg_memory_index_needs_multi_memory() {
        let mut ctx = with_memory(FeatureSet::default() | FeatureSet::MULTI_MEMORY);
        let imm = with_reader(&[0x42, 0x01, 0x10], &mut ctx, |r| {
            r.read_immediates(Opcode::Single(opcodes::I32_LOAD))
        });
        assert_eq!(
            imm,
            Ok(Some(Immediate::MemArg(MemArg {
                align: 2,
                offset: 16,
                memory: 1
            })))
        );

        let mut ctx = with_memory(FeatureSet::default());
        let imm = with_reader(&[0x02, 0x10], &mut ctx, |r| {
            r.read_immediates(Opcode::Single(opcodes::I32_LOAD))
        });
        assert_eq!(
            imm,
            Ok(Some(Immediate::MemArg(MemArg {
                align: 2,
                offset: 16,
                memory: 0
            })))
        );
    }

    #[test]
    fn memory_copy_reads_two_reserved_bytes() {
        let mut ctx = with_memory(FeatureSet::default());
        let imm = with_reader(&[0x00, 0x01], &mut ctx, |r| {
            r.read_immediates(Opcode::Prefixed(opcodes::PREFIX_MISC, opcodes::MISC_MEMORY_COPY))
        });
        assert_eq!(imm, Ok(Some(Immediate::Copy { dst: 0, src: 0 })));
        assert_eq!(ctx.sink.diagnostics()[0].offset, 1);
        assert_eq!(
            ctx.sink.diagnostics()[0].kind,
            DecodeErrorKind::ExpectedZeroByte(1)
        );
    }

    #[test]
    fn unknown_opcode_consumes_nothing() {
        let mut ctx = DecodeContext::default();
        let imm = with_reader(&[0x00], &mut ctx, |r| {
            let imm = r.read_immediates(Opcode::Single(0x06));
            (imm, r.position())
        });
        assert_eq!(imm, (Ok(None), 0));
    }
}
