use sluice_ir::{FeatureSet, Function, ImmediateShape, Opcode};

use crate::{
    cursor::{AdvancementError, ByteCursor},
    local::LocalDeclReader,
};

const MEMARG_HAS_MEMORY: u32 = 1 << 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Decoded {
    opcode: Opcode,
    imm_pc: usize,
    next_pc: usize,
}

/// A restartable cursor over the instructions of one decoded function body.
///
/// Positions (`pc`) are relative to the start of the body, so the first
/// local-declaration byte is pc 0. The walker reads no module context and
/// reports no diagnostics: on malformed bytes it simply stops.
#[derive(Debug, Clone)]
pub struct InstructionWalker<'a> {
    features: FeatureSet,
    code: &'a [u8],
    pc: usize,
    current: Option<Decoded>,
}

impl<'a> InstructionWalker<'a> {
    pub fn new(features: FeatureSet) -> Self {
        Self {
            features,
            code: &[],
            pc: 0,
            current: None,
        }
    }

    /// Moves to the first instruction of `func`, past its local
    /// declarations.
    pub fn reset(&mut self, func: &'a Function) -> &mut Self {
        self.code = func.body.as_ref().map_or(&[][..], |body| &*body.bytes);
        match self.locals().and_then(LocalDeclReader::skip_all) {
            Ok(pc) => {
                self.pc = pc;
                self.decode();
            }
            Err(_) => {
                self.pc = self.code.len();
                self.current = None;
            }
        }
        self
    }

    pub fn more(&self) -> bool {
        self.current.is_some()
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn current(&self) -> Option<Opcode> {
        self.current.map(|decoded| decoded.opcode)
    }

    /// The current opcode and the pc of its first immediate byte.
    pub fn current2(&self) -> Option<(Opcode, usize)> {
        self.current.map(|decoded| (decoded.opcode, decoded.imm_pc))
    }

    /// Advances past the current instruction.
    pub fn next(&mut self) {
        let Some(decoded) = self.current else {
            return;
        };
        self.pc = decoded.next_pc;
        self.decode();
    }

    /// A fresh reader over the local declarations of the current body.
    pub fn locals(&self) -> Result<LocalDeclReader<'a>, AdvancementError> {
        LocalDeclReader::new(self.code, 0, self.features)
    }

    fn decode(&mut self) {
        self.current = None;
        if self.pc >= self.code.len() {
            return;
        }
        let mut cursor = ByteCursor::new(self.code, 0);
        cursor.seek(self.pc);
        match decode_instruction(&mut cursor, self.features) {
            Ok(Some((opcode, imm_pc))) => {
                self.current = Some(Decoded {
                    opcode,
                    imm_pc,
                    next_pc: cursor.pos(),
                });
            }
            Ok(None) => tracing::trace!(pc = self.pc, "walker stopped at unknown opcode"),
            Err(err) => tracing::trace!(pc = self.pc, %err, "walker stopped"),
        }
    }
}

fn decode_instruction(
    cursor: &mut ByteCursor<'_>,
    features: FeatureSet,
) -> Result<Option<(Opcode, usize)>, AdvancementError> {
    let byte = cursor.u8()?;
    let opcode = if Opcode::is_prefix(byte) {
        Opcode::Prefixed(byte, cursor.u32leb()?)
    } else {
        Opcode::Single(byte)
    };
    let imm_pc = cursor.pos();
    let Some(shape) = opcode.immediates(features) else {
        return Ok(None);
    };
    skip_immediates(cursor, shape, features)?;
    Ok(Some((opcode, imm_pc)))
}

fn skip_immediates(
    cursor: &mut ByteCursor<'_>,
    shape: ImmediateShape,
    features: FeatureSet,
) -> Result<(), AdvancementError> {
    use ImmediateShape as S;

    let table = |cursor: &mut ByteCursor<'_>| implicit_index(cursor, features.reference_types());
    let memory = |cursor: &mut ByteCursor<'_>| implicit_index(cursor, features.multi_memory());

    match shape {
        S::None => {}
        S::BlockType => match cursor.peek()? {
            0x40 => cursor.skip(1)?,
            0x7f | 0x7e | 0x7d | 0x7c | 0x7b | 0x70 | 0x6f | 0x6c | 0x6b | 0x69 => {
                skip_value_type(cursor, features)?
            }
            _ => {
                cursor.s33leb()?;
            }
        },
        S::Label | S::Local | S::Global | S::Func | S::Table | S::Sig | S::Elem | S::Data => {
            cursor.u32leb()?;
        }
        S::LabelTable => {
            let count = cursor.u32leb()?;
            for _ in 0..=count {
                cursor.u32leb()?;
            }
        }
        S::CallIndirect => {
            cursor.u32leb()?;
            table(cursor)?;
        }
        S::SelectTypes => {
            for _ in 0..cursor.u32leb()? {
                skip_value_type(cursor, features)?;
            }
        }
        S::Memory => memory(cursor)?,
        S::MemoryInit => {
            cursor.u32leb()?;
            memory(cursor)?;
        }
        S::MemoryCopy => {
            memory(cursor)?;
            memory(cursor)?;
        }
        S::TableInit => {
            cursor.u32leb()?;
            table(cursor)?;
        }
        S::TableCopy => {
            table(cursor)?;
            table(cursor)?;
        }
        S::MemArg => skip_memarg(cursor, features)?,
        S::MemArgLane => {
            skip_memarg(cursor, features)?;
            cursor.skip(1)?;
        }
        S::Lane | S::ZeroByte => cursor.skip(1)?,
        S::I32 => {
            cursor.i32leb()?;
        }
        S::I64 => {
            cursor.i64leb()?;
        }
        S::F32 => cursor.skip(4)?,
        S::F64 => cursor.skip(8)?,
        S::V128 | S::Shuffle => cursor.skip(16)?,
        S::HeapType => {
            cursor.s33leb()?;
        }
    }
    Ok(())
}

/// A LEB index when `indexed`, otherwise a single reserved byte.
fn implicit_index(cursor: &mut ByteCursor<'_>, indexed: bool) -> Result<(), AdvancementError> {
    if indexed {
        cursor.u32leb().map(drop)
    } else {
        cursor.skip(1)
    }
}

fn skip_memarg(cursor: &mut ByteCursor<'_>, features: FeatureSet) -> Result<(), AdvancementError> {
    let flags = cursor.u32leb()?;
    if features.multi_memory() && flags & MEMARG_HAS_MEMORY != 0 {
        cursor.u32leb()?;
    }
    cursor.u32leb()?;
    Ok(())
}

fn skip_value_type(cursor: &mut ByteCursor<'_>, features: FeatureSet) -> Result<(), AdvancementError> {
    match cursor.u8()? {
        0x6c | 0x6b if features.typed_function_references() => {
            cursor.s33leb()?;
        }
        0x69 if features.type_imports() => {
            cursor.u32leb()?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use sluice_ir::{
        opcodes::{self, *},
        DecoderConfig, FunctionBody, Memory, MemType, ResizableLimits, Signature,
    };

    use super::*;
    use crate::reader::{DecodeContext, FormatReader};

    fn function(locals: &[u8], code: &[u8]) -> Function {
        let mut bytes = locals.to_vec();
        bytes.extend_from_slice(code);
        bytes.push(END);
        Function {
            sig: 0,
            imported: false,
            body: Some(FunctionBody {
                offset: 0,
                bytes: bytes.into(),
            }),
        }
    }

    fn walk(func: &Function, features: FeatureSet) -> Vec<(Opcode, usize, usize)> {
        let mut walker = InstructionWalker::new(features);
        walker.reset(func);
        let mut seen = vec![];
        while walker.more() {
            let (opcode, _) = walker.current2().unwrap_or((Opcode::Single(NOP), 0));
            let pc = walker.pc();
            walker.next();
            seen.push((opcode, pc, walker.pc()));
        }
        seen
    }

    #[test]
    fn empty_body_is_a_lone_end() {
        let func = function(&[0x00], &[]);
        assert_eq!(walk(&func, FeatureSet::default()), vec![(Opcode::Single(END), 1, 2)]);
    }

    #[test]
    fn nops_then_end() {
        let func = function(&[0x00], &[NOP]);
        assert_eq!(
            walk(&func, FeatureSet::default()),
            vec![(Opcode::Single(NOP), 1, 2), (Opcode::Single(END), 2, 3)]
        );

        let func = function(&[0x00], &[NOP, NOP]);
        assert_eq!(
            walk(&func, FeatureSet::default()),
            vec![
                (Opcode::Single(NOP), 1, 2),
                (Opcode::Single(NOP), 2, 3),
                (Opcode::Single(END), 3, 4)
            ]
        );
    }

    #[test]
    fn local_declarations_are_skipped() -> anyhow::Result<()> {
        let func = function(&[0x01, 0x01, 0x7f], &[]);
        let mut walker = InstructionWalker::new(FeatureSet::default());
        walker.reset(&func);
        assert_eq!((walker.current(), walker.pc()), (Some(Opcode::Single(END)), 3));

        let func = function(&[0x02, 0x01, 0x7f, 0x02, 0x7e], &[]);
        walker.reset(&func);
        assert_eq!((walker.current(), walker.pc()), (Some(Opcode::Single(END)), 5));
        assert_eq!(walker.locals()?.run_count(), 2);
        Ok(())
    }

    #[test]
    fn immediate_pc_follows_the_opcode() {
        let func = function(&[0x00], &[I32_CONST, 44]);
        let mut walker = InstructionWalker::new(FeatureSet::default());
        walker.reset(&func);
        assert_eq!(walker.current2(), Some((Opcode::Single(I32_CONST), 2)));
        walker.next();
        assert_eq!(walker.pc(), 3);
        assert_eq!(walker.current(), Some(Opcode::Single(END)));
        walker.next();
        assert!(!walker.more());
    }

    #[test]
    fn prefixed_opcodes_carry_their_subcode() {
        // memory.fill 0, i32x4.splat
        let func = function(&[0x00], &[0xfc, 0x0b, 0x00, 0xfd, 0x11]);
        let seen = walk(&func, FeatureSet::default());
        assert_eq!(
            seen[..2],
            [
                (Opcode::Prefixed(0xfc, 0x0b), 1, 4),
                (Opcode::Prefixed(0xfd, 0x11), 4, 6)
            ]
        );
    }

    #[test]
    fn stops_on_malformed_bytes() {
        let func = function(&[0x00], &[NOP, 0x06]);
        let mut walker = InstructionWalker::new(FeatureSet::default());
        walker.reset(&func);
        walker.next();
        assert_eq!(walker.pc(), 2);
        assert!(!walker.more());
        assert_eq!(walker.current(), None);

        // truncated immediate
        let func = Function {
            sig: 0,
            imported: false,
            body: Some(FunctionBody {
                offset: 0,
                bytes: Box::new([0x00, I32_CONST, 0x80]),
            }),
        };
        walker.reset(&func);
        assert!(!walker.more());
    }

    #[test]
    fn reserved_bytes_follow_the_feature_set() {
        // call_indirect 0 0 with a reserved table byte, then memory.size
        let code = [CALL_INDIRECT, 0x00, 0x00, MEMORY_SIZE, 0x00];
        let func = function(&[0x00], &code);
        let pcs: Vec<_> = walk(&func, FeatureSet::empty()).into_iter().map(|(_, pc, _)| pc).collect();
        assert_eq!(pcs, vec![1, 4, 6]);

        // with multi-memory the memarg can name a memory
        let code = [I32_LOAD, 0x42, 0x01, 0x00, DROP];
        let func = function(&[0x00], &code);
        let all = FeatureSet::all();
        let pcs: Vec<_> = walk(&func, all).into_iter().map(|(_, pc, _)| pc).collect();
        assert_eq!(pcs, vec![1, 5, 6]);
    }

    #[test]
    fn agrees_with_the_format_reader() {
        let code = [
            BLOCK, 0x40, LOOP, 0x7f, I32_CONST, 0x80, 0x01, BR_TABLE, 0x02, 0x00, 0x01, 0x00,
            LOCAL_GET, 0x00, I64_CONST, 0x7f, F32_CONST, 0, 0, 0, 0, F64_CONST, 0, 0, 0, 0, 0, 0,
            0, 0, I32_LOAD, 0x02, 0x10, I32_STORE8, 0x00, 0x00, SELECT_T, 0x01, 0x7f,
            REF_NULL, 0x70, REF_IS_NULL, DROP, MEMORY_GROW, 0x00, 0xfc, 0x0a, 0x00, 0x00,
            0xfd, 0x0c, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 0xfd, 0x15, 0x03,
            0xfd, 0x54, 0x00, 0x00, 0x01, END, END,
        ];
        let func = function(&[0x01, 0x01, 0x7f], &code);
        let bytes = func.body.as_ref().map(|body| body.bytes.clone()).unwrap_or_default();
        let features = FeatureSet::default();

        let walked: Vec<_> = walk(&func, features).into_iter().map(|(op, pc, _)| (op, pc)).collect();

        let mut ctx = DecodeContext::new(DecoderConfig::default().with_features(features));
        ctx.module.signatures.push(Signature::default());
        ctx.module.memories.push(Memory {
            ty: MemType(ResizableLimits::new(1, None)),
            imported: false,
        });
        let mut reader = FormatReader::new(ByteCursor::new(&bytes, 0), &mut ctx);
        reader.cursor_mut().seek(3);
        let mut read = vec![];
        while !reader.cursor().is_at_end() {
            let pc = reader.cursor().pos();
            let Ok(opcode) = reader.read_opcode() else { break };
            assert!(matches!(reader.read_immediates(opcode), Ok(Some(_))));
            read.push((opcode, pc));
        }

        assert_eq!(walked, read);
        assert_eq!(walked.len(), 22);
        assert!(ctx.sink.is_empty(), "{:?}", ctx.sink.diagnostics());
        assert_eq!(walked[15], (Opcode::Prefixed(opcodes::PREFIX_MISC, 0x0a), 48));
    }
}
