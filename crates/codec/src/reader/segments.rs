use sluice_ir::{DataSegment, ElemItems, ElementSegment, RefType, SegmentMode, ValType};

use crate::error::{DecodeErrorKind, IndexSpace, Quantity};

use super::{FormatReader, ReadResult, RefContext, Stop};

// Element segment flags:
//
// ┌─── element type + exprs vs element kind + function indices
// │┌── if bit 0 is 0: explicit table index; if 1: declarative rather than passive
// ││┌─ passive or declarative
// ↓↓↓
// 000: expr vec<funcidx>                      -> active
// 001: elemkind vec<funcidx>                  -> passive
// 010: tableidx expr elemkind vec<funcidx>    -> active
// 011: elemkind vec<funcidx>                  -> declarative
// 100: expr vec<expr>                         -> active
// 101: reftype vec<expr>                      -> passive
// 110: tableidx expr reftype vec<expr>        -> active
// 111: reftype vec<expr>                      -> declarative
const PASSIVE_OR_DECLARATIVE: u32 = 0b001;
const EXPLICIT_TABLE_OR_DECLARATIVE: u32 = 0b010;
const EXPRESSIONS: u32 = 0b100;

impl<'a, 'c> FormatReader<'a, 'c> {
    pub fn read_element_segment(&mut self) -> ReadResult<ElementSegment> {
        let at = self.position();
        let flags = self.read_u32leb()?;
        let features = self.features();
        if flags > 7 || (flags != 0 && !(features.bulk_memory() || features.reference_types())) {
            self.record(at, DecodeErrorKind::InvalidElemFlags(flags));
            return Err(Stop::Abandoned);
        }

        let mode = if flags & PASSIVE_OR_DECLARATIVE == 0 {
            let table_at = self.position();
            let index = if flags & EXPLICIT_TABLE_OR_DECLARATIVE != 0 {
                self.read_table_index()?
            } else {
                self.check_index(table_at, IndexSpace::Table, 0);
                0
            };
            let offset = self.read_init_expr(ValType::I32)?;
            SegmentMode::Active { index, offset }
        } else if flags & EXPLICIT_TABLE_OR_DECLARATIVE != 0 {
            SegmentMode::Declarative
        } else {
            SegmentMode::Passive
        };

        let type_at = self.position();
        let elem_type = match (flags & 0b011 == 0, flags & EXPRESSIONS != 0) {
            (true, _) => RefType::FUNCREF,
            (false, true) => self.read_ref_type(RefContext::TableElement)?,
            (false, false) => {
                let kind = self.read_u8()?;
                if kind != 0x00 {
                    self.record(type_at, DecodeErrorKind::InvalidElemKind(kind));
                }
                RefType::FUNCREF
            }
        };

        if let SegmentMode::Active { index, .. } = mode {
            let table = self
                .module()
                .tables
                .get(index as usize)
                .map(|table| table.ty.0);
            if let Some(table_type) = table.filter(|ty| !elem_type.is_assignable_to(ty)) {
                self.record(
                    type_at,
                    DecodeErrorKind::TypeMismatch {
                        expected: ValType::RefType(table_type),
                        actual: ValType::RefType(elem_type),
                    },
                );
            }
        }

        let max = self.limits().max_table_entries;
        let count = self.read_count(Quantity::TableEntries, max)?;
        let items = if flags & EXPRESSIONS != 0 {
            let expected = ValType::RefType(elem_type);
            ElemItems::Exprs(
                (0..count)
                    .map(|_| self.read_init_expr(expected))
                    .collect::<ReadResult<_>>()?,
            )
        } else {
            ElemItems::Functions(
                (0..count)
                    .map(|_| self.read_func_index())
                    .collect::<ReadResult<_>>()?,
            )
        };

        Ok(ElementSegment {
            elem_type,
            mode,
            items,
        })
    }

    pub fn read_data_segment(&mut self) -> ReadResult<DataSegment> {
        let at = self.position();
        let flags = self.read_u32leb()?;
        let bulk_memory = self.features().bulk_memory();

        let mode = match flags {
            0 => {
                self.check_index(at, IndexSpace::Memory, 0);
                let offset = self.read_init_expr(ValType::I32)?;
                SegmentMode::Active { index: 0, offset }
            }
            1 if bulk_memory => SegmentMode::Passive,
            2 if bulk_memory => {
                let index = self.read_memory_index()?;
                let offset = self.read_init_expr(ValType::I32)?;
                SegmentMode::Active { index, offset }
            }
            other => {
                self.record(at, DecodeErrorKind::InvalidDataFlags(other));
                return Err(Stop::Abandoned);
            }
        };

        let len = self.read_u32leb()?;
        let bytes = self.read_bytes(len as usize)?.into();
        Ok(DataSegment { mode, bytes })
    }
}
