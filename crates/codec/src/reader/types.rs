use sluice_ir::{
    BlockType, GlobalType, HeapType, MemType, Mutability, RefType, ResizableLimits, Signature,
    TableType, ValType,
};

use crate::error::{DecodeErrorKind, IndexSpace, Quantity};

use super::{FormatReader, ReadResult, Stop};

const FUNC_HEAP: i64 = -0x10;
const EXTERN_HEAP: i64 = -0x11;

/// Where a reference type is being read. Tables may only hold function-like
/// references or `externref`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RefContext {
    TableElement,
    Value,
}

impl<'a, 'c> FormatReader<'a, 'c> {
    /// Decodes the type introduced by `byte`; `None` when the byte is not a
    /// type code or its extension is disabled.
    fn decode_type(&mut self, byte: u8) -> ReadResult<Option<ValType>> {
        let features = self.features();
        Ok(Some(match byte {
            0x7f => ValType::I32,
            0x7e => ValType::I64,
            0x7d => ValType::F32,
            0x7c => ValType::F64,
            0x7b if features.vectors() => ValType::V128,
            0x70 => ValType::FUNCREF,
            0x6f if features.reference_types() => ValType::EXTERNREF,
            0x6c | 0x6b if features.typed_function_references() => {
                let heap = self.read_heap_type()?;
                ValType::RefType(RefType {
                    nullable: byte == 0x6c,
                    heap,
                })
            }
            0x69 if features.type_imports() => {
                let index = self.read_abstract_index()?;
                let nullable = self
                    .module()
                    .abstract_types
                    .get(index as usize)
                    .is_some_and(|ty| ty.nullable);
                ValType::RefType(RefType {
                    nullable,
                    heap: HeapType::Abstract(index),
                })
            }
            _ => return Ok(None),
        }))
    }

    pub fn read_value_type(&mut self) -> ReadResult<ValType> {
        let at = self.position();
        let byte = self.read_u8()?;
        // funcref is only a value type with reference-types; tables accept it
        // in every configuration.
        let decoded = if byte == 0x70 && !self.features().reference_types() {
            None
        } else {
            self.decode_type(byte)?
        };

        Ok(decoded.unwrap_or_else(|| {
            self.record(at, DecodeErrorKind::InvalidValueType(byte));
            ValType::I32
        }))
    }

    pub fn read_ref_type(&mut self, context: RefContext) -> ReadResult<RefType> {
        let at = self.position();
        let byte = self.read_u8()?;
        let decoded = self.decode_type(byte)?;

        match (context, decoded) {
            (RefContext::TableElement, Some(ValType::RefType(rt)))
                if rt.is_function_like() || rt.heap == HeapType::Extern =>
            {
                Ok(rt)
            }
            (RefContext::Value, Some(ValType::RefType(rt))) => Ok(rt),
            (RefContext::TableElement, Some(other)) => {
                self.record(at, DecodeErrorKind::IllegalTableElementType(other));
                Ok(RefType::FUNCREF)
            }
            (RefContext::TableElement, None) => {
                self.record(at, DecodeErrorKind::InvalidRefType(byte));
                Ok(RefType::FUNCREF)
            }
            (RefContext::Value, _) => {
                self.record(at, DecodeErrorKind::InvalidValueType(byte));
                Ok(RefType::FUNCREF)
            }
        }
    }

    pub fn read_heap_type(&mut self) -> ReadResult<HeapType> {
        let at = self.position();
        let code = self.read_s33leb()?;
        Ok(match code {
            FUNC_HEAP => HeapType::Func,
            EXTERN_HEAP => HeapType::Extern,
            index if index >= 0 => {
                let index = index as u32;
                if self.check_index(at, IndexSpace::Signature, index) {
                    HeapType::Sig(index)
                } else {
                    HeapType::Sig(0)
                }
            }
            other => {
                self.record(at, DecodeErrorKind::InvalidHeapType(other));
                HeapType::Func
            }
        })
    }

    pub fn read_block_type(&mut self) -> ReadResult<BlockType> {
        let at = self.position();
        let byte = self.cursor.peek()?;
        match byte {
            0x40 => {
                self.read_u8()?;
                return Ok(BlockType::Empty);
            }
            0x7f | 0x7e | 0x7d | 0x7c | 0x7b | 0x70 | 0x6f | 0x6c | 0x6b | 0x69 => {
                return Ok(BlockType::Val(self.read_value_type()?));
            }
            _ => {}
        }

        let code = self.read_s33leb()?;
        if code >= 0 && (code as u64) < u64::from(self.space_len(IndexSpace::Signature)) {
            return Ok(BlockType::Sig(code as u32));
        }
        self.record(at, DecodeErrorKind::InvalidBlockType(code));
        Ok(BlockType::Empty)
    }

    pub fn read_signature(&mut self) -> ReadResult<Signature> {
        let at = self.position();
        let form = self.read_u8()?;
        if form != 0x60 {
            self.record(at, DecodeErrorKind::InvalidTypeForm(form));
            return Err(Stop::Abandoned);
        }

        let max_params = self.limits().max_params;
        let count = self.read_count(Quantity::Params, max_params)?;
        let params = (0..count)
            .map(|_| self.read_value_type())
            .collect::<ReadResult<Box<[_]>>>()?;

        let max_results = self.limits().max_results;
        let count = self.read_count(Quantity::Results, max_results)?;
        let results = (0..count)
            .map(|_| self.read_value_type())
            .collect::<ReadResult<Box<[_]>>>()?;

        Ok(Signature { params, results })
    }

    /// Reads a limits pair; `ceiling` bounds both ends and is reported as
    /// `quantity`.
    pub fn read_limits(&mut self, quantity: Quantity, ceiling: u32) -> ReadResult<ResizableLimits> {
        let at = self.position();
        let flags = self.read_u8()?;
        if flags & !0x03 != 0 {
            self.record(at, DecodeErrorKind::InvalidLimitsFlags(flags));
        }

        let min_at = self.position();
        let min = self.read_u32leb()?;
        let max = if flags & 0x01 != 0 {
            let max_at = self.position();
            Some((max_at, self.read_u32leb()?))
        } else {
            None
        };
        let shared = flags & 0x02 != 0;

        if shared && (!self.features().atomics() || max.is_none()) {
            self.record(at, DecodeErrorKind::ExpectedSharedMaximum);
        }

        if min > ceiling {
            self.record(
                min_at,
                DecodeErrorKind::LimitExceeded {
                    quantity,
                    value: min.into(),
                    max: ceiling.into(),
                },
            );
        }

        if let Some((max_at, max)) = max {
            if max > ceiling {
                self.record(
                    max_at,
                    DecodeErrorKind::LimitExceeded {
                        quantity,
                        value: max.into(),
                        max: ceiling.into(),
                    },
                );
            }
            if max < min {
                self.record(max_at, DecodeErrorKind::MaximumBelowMinimum { min, max });
            }
        }

        Ok(ResizableLimits {
            min,
            max: max.map(|(_, max)| max),
            shared,
        })
    }

    pub fn read_table_type(&mut self) -> ReadResult<TableType> {
        let elem = self.read_ref_type(RefContext::TableElement)?;
        let ceiling = self.limits().max_table_size;
        let limits = self.read_limits(Quantity::TableSize, ceiling)?;
        Ok(TableType(elem, limits))
    }

    pub fn read_memory_type(&mut self) -> ReadResult<MemType> {
        let ceiling = self.limits().max_memory_pages;
        Ok(MemType(self.read_limits(Quantity::MemoryPages, ceiling)?))
    }

    pub fn read_global_type(&mut self) -> ReadResult<GlobalType> {
        let content = self.read_value_type()?;
        let at = self.position();
        let mutability = match self.read_u8()? {
            0x00 => Mutability::Const,
            0x01 => Mutability::Variable,
            other => {
                self.record(at, DecodeErrorKind::InvalidMutability(other));
                Mutability::Const
            }
        };
        Ok(GlobalType(content, mutability))
    }
}
