use sluice_ir::{opcodes, HeapType, InitExpr, Opcode, RefType, ValType};

use crate::error::{DecodeErrorKind, IndexSpace};

use super::{FormatReader, ReadResult, Stop};

impl<'a, 'c> FormatReader<'a, 'c> {
    /// Reads a constant expression followed by `end` and checks that its
    /// type is assignable to `expected`.
    pub fn read_init_expr(&mut self, expected: ValType) -> ReadResult<InitExpr> {
        let at = self.position();
        let opcode = self.read_opcode()?;
        let reference_types = self.features().reference_types();

        let (expr, actual) = match opcode {
            Opcode::Single(opcodes::I32_CONST) => (InitExpr::I32(self.read_i32leb()?), ValType::I32),
            Opcode::Single(opcodes::I64_CONST) => (InitExpr::I64(self.read_i64leb()?), ValType::I64),
            Opcode::Single(opcodes::F32_CONST) => (InitExpr::F32(self.cursor.u32()?), ValType::F32),
            Opcode::Single(opcodes::F64_CONST) => (InitExpr::F64(self.cursor.u64()?), ValType::F64),
            Opcode::Single(opcodes::GLOBAL_GET) => {
                let index = self.read_index(IndexSpace::Global)?;
                // an unknown global has already been reported; don't pile a
                // type mismatch on top
                let actual = index
                    .and_then(|index| self.module().globals.get(index as usize))
                    .map_or(expected, |global| global.ty.0);
                (InitExpr::GlobalGet(index.unwrap_or(0)), actual)
            }
            Opcode::Single(opcodes::REF_NULL) if reference_types => {
                let heap = self.read_heap_type()?;
                (
                    InitExpr::RefNull(heap),
                    ValType::RefType(RefType {
                        nullable: true,
                        heap,
                    }),
                )
            }
            Opcode::Single(opcodes::REF_FUNC) if reference_types => {
                let index = self.read_index(IndexSpace::Function)?;
                let actual = match index {
                    Some(index) if self.features().typed_function_references() => self
                        .module()
                        .functions
                        .get(index as usize)
                        .map_or(ValType::FUNCREF, |func| {
                            ValType::RefType(RefType {
                                nullable: false,
                                heap: HeapType::Sig(func.sig),
                            })
                        }),
                    _ => ValType::FUNCREF,
                };
                (InitExpr::RefFunc(index.unwrap_or(0)), actual)
            }
            other => {
                self.record(at, DecodeErrorKind::UnexpectedOpcodeInInit(other));
                return Err(Stop::Abandoned);
            }
        };

        let end_at = self.position();
        if self.read_u8()? != opcodes::END {
            self.record(end_at, DecodeErrorKind::ExpectedEndInInit);
            return Err(Stop::Abandoned);
        }

        if !actual.is_assignable_to(&expected) {
            self.record(at, DecodeErrorKind::TypeMismatch { expected, actual });
        }

        Ok(expr)
    }
}
