use sluice_ir::{FeatureSet, HeapType, RefType, ValType};

use crate::cursor::{AdvancementError, ByteCursor};

/// One run of identically-typed locals.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct LocalRun {
    /// Absolute offset of the run's count.
    pub offset: usize,
    pub count: u32,
    /// `None` when the type code is unknown under the configured features.
    pub ty: Option<ValType>,
    pub type_code: u8,
}

/// Reads the local-declaration prefix of a function body: a vector of
/// `(count, type)` runs.
///
/// Shared by the instruction walker (which only needs to find the first
/// instruction) and the structure checker (which validates each run).
#[derive(Debug, Clone)]
pub struct LocalDeclReader<'a> {
    cursor: ByteCursor<'a>,
    features: FeatureSet,
    runs: u32,
    read: u32,
}

impl<'a> LocalDeclReader<'a> {
    /// `body` starts at the first local-declaration byte, which sits at
    /// absolute offset `base`.
    pub fn new(body: &'a [u8], base: usize, features: FeatureSet) -> Result<Self, AdvancementError> {
        let mut cursor = ByteCursor::new(body, base);
        let runs = cursor.u32leb()?;
        Ok(Self {
            cursor,
            features,
            runs,
            read: 0,
        })
    }

    pub fn run_count(&self) -> u32 {
        self.runs
    }

    /// Position relative to the body start.
    pub fn pos(&self) -> usize {
        self.cursor.pos()
    }

    pub fn next_run(&mut self) -> Result<Option<LocalRun>, AdvancementError> {
        if self.read >= self.runs {
            return Ok(None);
        }
        let offset = self.cursor.absolute_pos();
        let count = self.cursor.u32leb()?;
        let type_code = self.cursor.u8()?;
        let ty = self.decode_type(type_code)?;
        self.read += 1;
        Ok(Some(LocalRun {
            offset,
            count,
            ty,
            type_code,
        }))
    }

    /// Skips every remaining run; returns the body-relative offset of the
    /// first instruction.
    pub fn skip_all(mut self) -> Result<usize, AdvancementError> {
        while self.next_run()?.is_some() {}
        Ok(self.pos())
    }

    fn decode_type(&mut self, code: u8) -> Result<Option<ValType>, AdvancementError> {
        let features = self.features;
        Ok(Some(match code {
            0x7f => ValType::I32,
            0x7e => ValType::I64,
            0x7d => ValType::F32,
            0x7c => ValType::F64,
            0x7b if features.vectors() => ValType::V128,
            0x70 if features.reference_types() => ValType::FUNCREF,
            0x6f if features.reference_types() => ValType::EXTERNREF,
            0x6c | 0x6b if features.typed_function_references() => {
                let heap = match self.cursor.s33leb()? {
                    -0x10 => HeapType::Func,
                    -0x11 => HeapType::Extern,
                    index if (0..=i64::from(u32::MAX)).contains(&index) => {
                        HeapType::Sig(index as u32)
                    }
                    _ => return Ok(None),
                };
                ValType::RefType(RefType {
                    nullable: code == 0x6c,
                    heap,
                })
            }
            0x69 if features.type_imports() => ValType::RefType(RefType {
                nullable: false,
                heap: HeapType::Abstract(self.cursor.u32leb()?),
            }),
            _ => return Ok(None),
        }))
    }
}
