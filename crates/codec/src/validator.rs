//! The seam through which function bodies are handed to code validation.

use sluice_ir::{opcodes, Function, FunctionBody, Opcode};

use crate::{
    error::{DecodeErrorKind, IndexSpace, Quantity},
    local::LocalDeclReader,
    reader::{FormatReader, Immediate, ReadResult, Stop},
};

pub trait CodeValidator {
    /// Validates one function body. `reader` is bounded to the body and
    /// positioned at its first byte; implementations must consume the whole
    /// body. Diagnostics go to the reader's sink; the returned flag says
    /// whether the body was accepted.
    fn validate(
        &mut self,
        func_index: u32,
        func: &Function,
        body: &FunctionBody,
        reader: &mut FormatReader<'_, '_>,
    ) -> ReadResult<bool>;
}

/// Accepts every body without reading it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipBodies;

impl CodeValidator for SkipBodies {
    fn validate(
        &mut self,
        _func_index: u32,
        _func: &Function,
        _body: &FunctionBody,
        reader: &mut FormatReader<'_, '_>,
    ) -> ReadResult<bool> {
        let rest = reader.cursor().rest().len();
        reader.cursor_mut().skip(rest)?;
        Ok(true)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Frame {
    Block,
    If,
    Else,
}

/// Checks instruction encoding: local declarations, known opcodes,
/// immediates (through [`FormatReader::read_immediates`]), label depths,
/// local indices and `else`/`end` nesting. Operand types are not checked.
#[derive(Debug, Default, Clone)]
pub struct StructureChecker {
    frames: Vec<Frame>,
}

impl StructureChecker {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_locals(&mut self, func: &Function, reader: &mut FormatReader<'_, '_>) -> ReadResult<(u64, bool)> {
        let params = reader
            .module()
            .signatures
            .get(func.sig as usize)
            .map_or(0, |sig| sig.params.len() as u64);
        let max = u64::from(reader.limits().max_locals);

        let mut locals = LocalDeclReader::new(reader.cursor().rest(), reader.position(), reader.features())
            .map_err(|err| reader.stop(err))?;
        let mut total = params;
        let mut typed = true;
        let mut within_limit = true;
        while let Some(run) = locals.next_run().map_err(|err| reader.stop(err))? {
            if run.ty.is_none() {
                reader.record(run.offset, DecodeErrorKind::InvalidValueType(run.type_code));
                typed = false;
            }
            total += u64::from(run.count);
            if total > max && within_limit {
                reader.record(
                    run.offset,
                    DecodeErrorKind::LimitExceeded {
                        quantity: Quantity::Locals,
                        value: total,
                        max,
                    },
                );
                within_limit = false;
            }
        }
        reader.cursor_mut().skip(locals.pos())?;
        Ok((total, typed && within_limit))
    }

    fn check_label(&self, reader: &mut FormatReader<'_, '_>, at: usize, depth: u32) -> bool {
        // the function body itself is the outermost label
        let len = self.frames.len() as u32 + 1;
        if depth < len {
            return true;
        }
        reader.record(
            at,
            DecodeErrorKind::IndexOutOfBounds {
                space: IndexSpace::Label,
                index: depth,
                len,
            },
        );
        false
    }
}

impl CodeValidator for StructureChecker {
    fn validate(
        &mut self,
        _func_index: u32,
        func: &Function,
        _body: &FunctionBody,
        reader: &mut FormatReader<'_, '_>,
    ) -> ReadResult<bool> {
        self.frames.clear();
        let (local_count, mut valid) = self.read_locals(func, reader)?;

        loop {
            let at = reader.position();
            if reader.cursor().is_at_end() {
                reader.record(at, DecodeErrorKind::MissingEnd);
                return Ok(false);
            }

            let opcode = reader.read_opcode()?;
            let imm_at = reader.position();
            let Some(immediate) = reader.read_immediates(opcode)? else {
                reader.record(at, DecodeErrorKind::UnknownOpcode(opcode));
                return Err(Stop::Abandoned);
            };

            match opcode {
                Opcode::Single(opcodes::BLOCK | opcodes::LOOP) => self.frames.push(Frame::Block),
                Opcode::Single(opcodes::IF) => self.frames.push(Frame::If),
                Opcode::Single(opcodes::ELSE) => match self.frames.last_mut() {
                    Some(frame @ Frame::If) => *frame = Frame::Else,
                    _ => {
                        reader.record(at, DecodeErrorKind::UnmatchedElse);
                        valid = false;
                    }
                },
                Opcode::Single(opcodes::END) => {
                    if self.frames.pop().is_none() {
                        // anything after the function's own end is left for
                        // the body size check
                        return Ok(valid);
                    }
                }
                _ => {}
            }

            valid &= match immediate {
                Immediate::Label(depth) => self.check_label(reader, imm_at, depth),
                Immediate::LabelTable { targets, default } => targets
                    .iter()
                    .chain(std::iter::once(&default))
                    .fold(true, |ok, depth| self.check_label(reader, imm_at, *depth) && ok),
                Immediate::Local(index) if u64::from(index) >= local_count => {
                    reader.record(
                        imm_at,
                        DecodeErrorKind::IndexOutOfBounds {
                            space: IndexSpace::Local,
                            index,
                            len: u32::try_from(local_count).unwrap_or(u32::MAX),
                        },
                    );
                    false
                }
                _ => true,
            };
        }
    }
}

#[cfg(test)]
mod test {
    use sluice_ir::{DecoderConfig, FeatureSet, Signature, ValType};

    use super::*;
    use crate::{cursor::ByteCursor, reader::DecodeContext};

    fn check(body: &[u8], ctx: &mut DecodeContext) -> (ReadResult<bool>, usize) {
        let func = Function {
            sig: 0,
            imported: false,
            body: None,
        };
        let fbody = FunctionBody {
            offset: 0,
            bytes: body.into(),
        };
        let mut reader = FormatReader::new(ByteCursor::new(body, 0), ctx);
        let result = StructureChecker::new().validate(0, &func, &fbody, &mut reader);
        (result, reader.cursor().pos())
    }

    fn ctx() -> DecodeContext {
        let mut ctx = DecodeContext::default();
        ctx.module.signatures.push(Signature {
            params: Box::new([ValType::I32]),
            results: Box::new([]),
        });
        ctx
    }

    #[test]
    fn accepts_nested_blocks() {
        let mut ctx = ctx();
        // block; if(i32 local 0); else; end; br 1; end; end
        let body = [
            0x00, 0x02, 0x40, 0x20, 0x00, 0x04, 0x40, 0x05, 0x0b, 0x0c, 0x01, 0x0b, 0x0b,
        ];
        assert_eq!(check(&body, &mut ctx), (Ok(true), body.len()));
        assert!(ctx.sink.is_empty());
    }

    #[test]
    fn label_and_local_indices_are_checked() {
        let mut ctx = ctx();
        // one extra local; local.get 2; br 1; end
        let body = [0x01, 0x01, 0x7e, 0x20, 0x02, 0x0c, 0x01, 0x0b];
        assert_eq!(check(&body, &mut ctx).0, Ok(false));
        let kinds: Vec<_> = ctx.sink.diagnostics().iter().map(|d| (d.offset, d.kind.clone())).collect();
        assert_eq!(
            kinds,
            vec![
                (
                    4,
                    DecodeErrorKind::IndexOutOfBounds {
                        space: IndexSpace::Local,
                        index: 2,
                        len: 2
                    }
                ),
                (
                    6,
                    DecodeErrorKind::IndexOutOfBounds {
                        space: IndexSpace::Label,
                        index: 1,
                        len: 1
                    }
                ),
            ]
        );
    }

    #[test]
    fn unknown_opcode_abandons_the_body() {
        let mut ctx = ctx();
        let body = [0x00, 0x06, 0x0b];
        assert_eq!(check(&body, &mut ctx).0, Err(Stop::Abandoned));
        assert_eq!(ctx.sink.diagnostics()[0].offset, 1);
        assert_eq!(
            ctx.sink.diagnostics()[0].kind,
            DecodeErrorKind::UnknownOpcode(Opcode::Single(0x06))
        );
    }

    #[test]
    fn missing_end_and_stray_else() {
        let mut ctx = ctx();
        assert_eq!(check(&[0x00, 0x05, 0x01], &mut ctx).0, Ok(false));
        let kinds: Vec<_> = ctx.sink.diagnostics().iter().map(|d| d.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![DecodeErrorKind::UnmatchedElse, DecodeErrorKind::MissingEnd]
        );
    }

    #[test]
    fn final_end_stops_before_trailing_bytes() {
        let mut ctx = ctx();
        assert_eq!(check(&[0x00, 0x0b, 0x01], &mut ctx), (Ok(true), 2));
    }

    #[test]
    fn too_many_locals() {
        let mut ctx = DecodeContext::new(DecoderConfig::default().with_features(FeatureSet::default()));
        ctx.module.signatures.push(Signature::default());
        // 50_001 i32 locals
        let body = [0x01, 0xd1, 0x86, 0x03, 0x7f, 0x0b];
        assert_eq!(check(&body, &mut ctx).0, Ok(false));
        assert_eq!(
            ctx.sink.diagnostics()[0].kind,
            DecodeErrorKind::LimitExceeded {
                quantity: Quantity::Locals,
                value: 50_001,
                max: 50_000
            }
        );
    }

    #[test]
    fn malformed_local_count_is_recorded() {
        let mut ctx = ctx();
        let body = [0x80, 0x80, 0x80, 0x80, 0x80, 0x00, 0x0b];
        assert_eq!(check(&body, &mut ctx).0, Err(Stop::Abandoned));
        let kinds: Vec<_> = ctx.sink.diagnostics().iter().map(|d| (d.offset, d.kind.clone())).collect();
        assert_eq!(kinds, vec![(0, DecodeErrorKind::InvalidLeb(32))]);
    }

    #[test]
    fn locals_ceiling_is_checked_after_an_invalid_type() {
        let mut ctx = ctx();
        // 1 local of type 0x01, then 50_000 i32 locals
        let body = [0x02, 0x01, 0x01, 0xd0, 0x86, 0x03, 0x7f, 0x0b];
        assert_eq!(check(&body, &mut ctx).0, Ok(false));
        let kinds: Vec<_> = ctx.sink.diagnostics().iter().map(|d| (d.offset, d.kind.clone())).collect();
        assert_eq!(
            kinds,
            vec![
                (1, DecodeErrorKind::InvalidValueType(0x01)),
                (
                    3,
                    DecodeErrorKind::LimitExceeded {
                        quantity: Quantity::Locals,
                        value: 50_002,
                        max: 50_000
                    }
                ),
            ]
        );
    }

    #[test]
    fn skip_bodies_consumes_everything() {
        let mut ctx = ctx();
        let body = [0x00, 0x06, 0x06];
        let func = Function {
            sig: 0,
            imported: false,
            body: None,
        };
        let fbody = FunctionBody {
            offset: 0,
            bytes: Box::new(body),
        };
        let mut reader = FormatReader::new(ByteCursor::new(&body, 0), &mut ctx);
        assert_eq!(SkipBodies.validate(0, &func, &fbody, &mut reader), Ok(true));
        assert!(reader.cursor().is_at_end());
    }
}
