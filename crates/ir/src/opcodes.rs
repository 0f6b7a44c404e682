//! Opcode constants and the per-opcode immediate shape table.
//!
//! The table is shared by the full immediate decoder in the codec and by the
//! instruction walker, so both agree on every instruction boundary.

use std::fmt::Display;

use crate::FeatureSet;

pub const UNREACHABLE: u8 = 0x00;
pub const NOP: u8 = 0x01;
pub const BLOCK: u8 = 0x02;
pub const LOOP: u8 = 0x03;
pub const IF: u8 = 0x04;
pub const ELSE: u8 = 0x05;
pub const END: u8 = 0x0b;
pub const BR: u8 = 0x0c;
pub const BR_IF: u8 = 0x0d;
pub const BR_TABLE: u8 = 0x0e;
pub const RETURN: u8 = 0x0f;
pub const CALL: u8 = 0x10;
pub const CALL_INDIRECT: u8 = 0x11;
pub const CALL_REF: u8 = 0x14;
pub const DROP: u8 = 0x1a;
pub const SELECT: u8 = 0x1b;
pub const SELECT_T: u8 = 0x1c;
pub const LOCAL_GET: u8 = 0x20;
pub const LOCAL_SET: u8 = 0x21;
pub const LOCAL_TEE: u8 = 0x22;
pub const GLOBAL_GET: u8 = 0x23;
pub const GLOBAL_SET: u8 = 0x24;
pub const TABLE_GET: u8 = 0x25;
pub const TABLE_SET: u8 = 0x26;
pub const I32_LOAD: u8 = 0x28;
pub const I32_STORE8: u8 = 0x3a;
pub const I64_STORE32: u8 = 0x3e;
pub const MEMORY_SIZE: u8 = 0x3f;
pub const MEMORY_GROW: u8 = 0x40;
pub const I32_CONST: u8 = 0x41;
pub const I64_CONST: u8 = 0x42;
pub const F32_CONST: u8 = 0x43;
pub const F64_CONST: u8 = 0x44;
pub const I32_EQZ: u8 = 0x45;
pub const I32_ADD: u8 = 0x6a;
pub const I64_EXTEND32_S: u8 = 0xc4;
pub const REF_NULL: u8 = 0xd0;
pub const REF_IS_NULL: u8 = 0xd1;
pub const REF_FUNC: u8 = 0xd2;
pub const REF_AS_NON_NULL: u8 = 0xd3;
pub const BR_ON_NULL: u8 = 0xd4;
pub const BR_ON_NON_NULL: u8 = 0xd6;

pub const PREFIX_MISC: u8 = 0xfc;
pub const PREFIX_SIMD: u8 = 0xfd;
pub const PREFIX_ATOMIC: u8 = 0xfe;

pub const MISC_MEMORY_INIT: u32 = 0x08;
pub const MISC_DATA_DROP: u32 = 0x09;
pub const MISC_MEMORY_COPY: u32 = 0x0a;
pub const MISC_MEMORY_FILL: u32 = 0x0b;
pub const MISC_TABLE_INIT: u32 = 0x0c;
pub const MISC_ELEM_DROP: u32 = 0x0d;
pub const MISC_TABLE_COPY: u32 = 0x0e;
pub const MISC_TABLE_GROW: u32 = 0x0f;
pub const MISC_TABLE_SIZE: u32 = 0x10;
pub const MISC_TABLE_FILL: u32 = 0x11;

pub const SIMD_V128_CONST: u32 = 0x0c;
pub const SIMD_I8X16_SHUFFLE: u32 = 0x0d;
pub const SIMD_LAST: u32 = 0x113;

pub const ATOMIC_FENCE: u32 = 0x03;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Opcode {
    Single(u8),
    Prefixed(u8, u32),
}

impl Opcode {
    pub const NOP: Opcode = Opcode::Single(NOP);
    pub const END: Opcode = Opcode::Single(END);
    pub const I32_CONST: Opcode = Opcode::Single(I32_CONST);

    /// The shape of the immediates following this opcode, or `None` when the
    /// opcode is unknown or its extension is disabled.
    pub fn immediates(&self, features: FeatureSet) -> Option<ImmediateShape> {
        use ImmediateShape as S;

        Some(match *self {
            Opcode::Single(code) => match code {
                UNREACHABLE | NOP | ELSE | END | RETURN | DROP | SELECT => S::None,
                BLOCK | LOOP | IF => S::BlockType,
                BR | BR_IF => S::Label,
                BR_TABLE => S::LabelTable,
                CALL => S::Func,
                CALL_INDIRECT => S::CallIndirect,
                CALL_REF if features.typed_function_references() => S::Sig,
                SELECT_T if features.reference_types() => S::SelectTypes,
                LOCAL_GET | LOCAL_SET | LOCAL_TEE => S::Local,
                GLOBAL_GET | GLOBAL_SET => S::Global,
                TABLE_GET | TABLE_SET if features.reference_types() => S::Table,
                I32_LOAD..=I64_STORE32 => S::MemArg,
                MEMORY_SIZE | MEMORY_GROW => S::Memory,
                I32_CONST => S::I32,
                I64_CONST => S::I64,
                F32_CONST => S::F32,
                F64_CONST => S::F64,
                I32_EQZ..=I64_EXTEND32_S => S::None,
                REF_NULL if features.reference_types() => S::HeapType,
                REF_IS_NULL if features.reference_types() => S::None,
                REF_FUNC if features.reference_types() => S::Func,
                REF_AS_NON_NULL if features.typed_function_references() => S::None,
                BR_ON_NULL | BR_ON_NON_NULL if features.typed_function_references() => S::Label,
                _ => return None,
            },

            Opcode::Prefixed(PREFIX_MISC, code) => match code {
                0x00..=0x07 => S::None,
                MISC_MEMORY_INIT if features.bulk_memory() => S::MemoryInit,
                MISC_DATA_DROP if features.bulk_memory() => S::Data,
                MISC_MEMORY_COPY if features.bulk_memory() => S::MemoryCopy,
                MISC_MEMORY_FILL if features.bulk_memory() => S::Memory,
                MISC_TABLE_INIT if features.bulk_memory() => S::TableInit,
                MISC_ELEM_DROP if features.bulk_memory() => S::Elem,
                MISC_TABLE_COPY if features.bulk_memory() => S::TableCopy,
                MISC_TABLE_GROW | MISC_TABLE_SIZE | MISC_TABLE_FILL
                    if features.reference_types() =>
                {
                    S::Table
                }
                _ => return None,
            },

            Opcode::Prefixed(PREFIX_SIMD, code) if features.vectors() => match code {
                0x00..=0x0b => S::MemArg,
                SIMD_V128_CONST => S::V128,
                SIMD_I8X16_SHUFFLE => S::Shuffle,
                0x15..=0x22 => S::Lane,
                0x54..=0x5b => S::MemArgLane,
                0x5c | 0x5d => S::MemArg,
                // unassigned codes sit between the arithmetic groups
                0x0e..=0x14
                | 0x23..=0x53
                | 0x5e..=0x99
                | 0x9b..=0xa1
                | 0xa3
                | 0xa4
                | 0xa7..=0xae
                | 0xb1
                | 0xb5..=0xba
                | 0xbc..=0xc1
                | 0xc3
                | 0xc4
                | 0xc7..=0xce
                | 0xd1
                | 0xd5..=0xe1
                | 0xe3..=0xed
                | 0xef..=SIMD_LAST => S::None,
                _ => return None,
            },

            Opcode::Prefixed(PREFIX_ATOMIC, code) if features.atomics() => match code {
                0x00..=0x02 => S::MemArg,
                ATOMIC_FENCE => S::ZeroByte,
                0x10..=0x4e => S::MemArg,
                _ => return None,
            },

            Opcode::Prefixed(_, _) => return None,
        })
    }

    pub fn is_prefix(byte: u8) -> bool {
        matches!(byte, PREFIX_MISC | PREFIX_SIMD | PREFIX_ATOMIC)
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Opcode::Single(code) => write!(f, "{code:#04x}"),
            Opcode::Prefixed(prefix, code) => write!(f, "{prefix:#04x} {code}"),
        }
    }
}

/// Immediate operand layouts.
///
/// `Memory` and the memory half of `MemoryInit`/`MemoryCopy` are a reserved
/// zero byte unless multi-memory is enabled, and the table of
/// `CallIndirect`/`TableInit`/`TableCopy` is a reserved zero byte unless
/// reference-types is enabled. In every other case an index is an unsigned
/// LEB128.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ImmediateShape {
    None,
    BlockType,
    Label,
    LabelTable,
    CallIndirect,
    SelectTypes,
    Local,
    Global,
    Func,
    Table,
    Memory,
    Sig,
    Elem,
    Data,
    MemoryInit,
    MemoryCopy,
    TableInit,
    TableCopy,
    MemArg,
    MemArgLane,
    Lane,
    I32,
    I64,
    F32,
    F64,
    V128,
    Shuffle,
    HeapType,
    ZeroByte,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extensions_gate_their_opcodes() {
        let mvp = FeatureSet::empty();
        assert_eq!(
            Opcode::Single(SELECT_T).immediates(mvp),
            None,
            "typed select needs reference-types"
        );
        assert_eq!(
            Opcode::Single(SELECT_T).immediates(FeatureSet::REFERENCE_TYPES),
            Some(ImmediateShape::SelectTypes)
        );
        assert_eq!(
            Opcode::Prefixed(PREFIX_SIMD, SIMD_V128_CONST).immediates(mvp),
            None
        );
        assert_eq!(
            Opcode::Prefixed(PREFIX_MISC, 0x03).immediates(mvp),
            Some(ImmediateShape::None)
        );
    }

    #[test]
    fn unknown_single_byte_opcodes_have_no_shape() {
        for code in [0x06u8, 0x12, 0x27, 0xc5, 0xff] {
            assert_eq!(Opcode::Single(code).immediates(FeatureSet::all()), None);
        }
    }

    #[test]
    fn unassigned_vector_opcodes_have_no_shape() {
        let vectors = FeatureSet::VECTORS;
        for code in [0x9a, 0xa2, 0xa5, 0xa6, 0xaf, 0xb0, 0xb2, 0xb3, 0xb4, 0xbb, 0xe2, 0xee, 0x114] {
            assert_eq!(
                Opcode::Prefixed(PREFIX_SIMD, code).immediates(vectors),
                None,
                "{code:#x}"
            );
        }
        for code in [0x0e, 0x53, 0x9b, 0xb5, 0xd5, 0xef, SIMD_LAST] {
            assert_eq!(
                Opcode::Prefixed(PREFIX_SIMD, code).immediates(vectors),
                Some(ImmediateShape::None),
                "{code:#x}"
            );
        }
    }

    #[test]
    fn display_is_hex() {
        assert_eq!(Opcode::END.to_string(), "0x0b");
        assert_eq!(Opcode::Prefixed(PREFIX_MISC, 8).to_string(), "0xfc 8");
    }
}
