use std::{collections::HashSet, fmt::Display};

use sluice_ir::{CustomSection, Function, Global, Memory, Table};

use crate::{
    error::{DecodeErrorKind, IndexSpace, Quantity},
    reader::{FormatReader, ReadResult},
};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum SectionId {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Element = 9,
    Code = 10,
    Data = 11,
    DataCount = 12,
}

impl SectionId {
    /// Position in the canonical section order. Custom sections may appear
    /// anywhere and have no rank.
    pub fn rank(&self) -> Option<u8> {
        Some(match self {
            SectionId::Custom => return None,
            SectionId::Type => 1,
            SectionId::Import => 2,
            SectionId::Function => 3,
            SectionId::Table => 4,
            SectionId::Memory => 5,
            SectionId::Global => 6,
            SectionId::Export => 7,
            SectionId::Start => 8,
            SectionId::Element => 9,
            SectionId::DataCount => 10,
            SectionId::Code => 11,
            SectionId::Data => 12,
        })
    }
}

impl TryFrom<u8> for SectionId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => SectionId::Custom,
            1 => SectionId::Type,
            2 => SectionId::Import,
            3 => SectionId::Function,
            4 => SectionId::Table,
            5 => SectionId::Memory,
            6 => SectionId::Global,
            7 => SectionId::Export,
            8 => SectionId::Start,
            9 => SectionId::Element,
            10 => SectionId::Code,
            11 => SectionId::Data,
            12 => SectionId::DataCount,
            other => return Err(other),
        })
    }
}

impl Display for SectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SectionId::Custom => "custom",
            SectionId::Type => "type",
            SectionId::Import => "import",
            SectionId::Function => "function",
            SectionId::Table => "table",
            SectionId::Memory => "memory",
            SectionId::Global => "global",
            SectionId::Export => "export",
            SectionId::Start => "start",
            SectionId::Element => "element",
            SectionId::Code => "code",
            SectionId::Data => "data",
            SectionId::DataCount => "data count",
        })
    }
}

impl<'a, 'c> FormatReader<'a, 'c> {
    /// Decodes the payload of every section except Code, whose bodies are
    /// sequenced by the section machine.
    pub fn read_section(&mut self, id: SectionId) -> ReadResult<()> {
        match id {
            SectionId::Custom => self.read_custom_section(),
            SectionId::Type => self.read_type_section(),
            SectionId::Import => self.read_import_section(),
            SectionId::Function => self.read_function_section(),
            SectionId::Table => self.read_table_section(),
            SectionId::Memory => self.read_memory_section(),
            SectionId::Global => self.read_global_section(),
            SectionId::Export => self.read_export_section(),
            SectionId::Start => self.read_start_section(),
            SectionId::Element => self.read_element_section(),
            SectionId::Data => self.read_data_section(),
            SectionId::DataCount => self.read_data_count_section(),
            SectionId::Code => Ok(()),
        }
    }

    fn read_custom_section(&mut self) -> ReadResult<()> {
        let name = self.read_name()?;
        let offset = self.position();
        let payload = self.cursor().rest();
        self.cursor_mut().skip(payload.len())?;
        self.module_mut().customs.push(CustomSection {
            name,
            offset,
            payload: payload.into(),
        });
        Ok(())
    }

    fn read_type_section(&mut self) -> ReadResult<()> {
        let max = self.limits().max_types;
        let count = self.read_count(Quantity::Types, max)?;
        for _ in 0..count {
            let sig = self.read_signature()?;
            self.module_mut().signatures.push(sig);
        }
        Ok(())
    }

    fn read_import_section(&mut self) -> ReadResult<()> {
        let max = self.limits().max_imports;
        let count = self.read_count(Quantity::Imports, max)?;
        for _ in 0..count {
            let import = self.read_import()?;
            self.module_mut().imports.push(import);
        }
        Ok(())
    }

    fn read_function_section(&mut self) -> ReadResult<()> {
        let max = self.limits().max_functions;
        let count = self.read_count(Quantity::Functions, max)?;
        for _ in 0..count {
            let sig = self.read_sig_index()?;
            self.module_mut().functions.push(Function {
                sig,
                imported: false,
                body: None,
            });
        }
        Ok(())
    }

    fn read_table_section(&mut self) -> ReadResult<()> {
        let at = self.position();
        let max = self.limits().max_tables;
        let count = self.read_count(Quantity::Tables, max)?;
        self.check_table_count(at, count);
        for _ in 0..count {
            let ty = self.read_table_type()?;
            self.module_mut().tables.push(Table {
                ty,
                imported: false,
            });
        }
        Ok(())
    }

    fn read_memory_section(&mut self) -> ReadResult<()> {
        let at = self.position();
        let max = self.limits().max_memories;
        let count = self.read_count(Quantity::Memories, max)?;
        self.check_memory_count(at, count);
        for _ in 0..count {
            let ty = self.read_memory_type()?;
            self.module_mut().memories.push(Memory {
                ty,
                imported: false,
            });
        }
        Ok(())
    }

    fn read_global_section(&mut self) -> ReadResult<()> {
        let max = self.limits().max_globals;
        let count = self.read_count(Quantity::Globals, max)?;
        for _ in 0..count {
            let ty = self.read_global_type()?;
            let init = self.read_init_expr(ty.0)?;
            self.module_mut().globals.push(Global {
                ty,
                init: Some(init),
            });
        }
        Ok(())
    }

    fn read_export_section(&mut self) -> ReadResult<()> {
        let max = self.limits().max_exports;
        let count = self.read_count(Quantity::Exports, max)?;
        let mut names: HashSet<String> = self
            .module()
            .exports
            .iter()
            .map(|export| export.name.0.clone())
            .collect();

        for _ in 0..count {
            let at = self.position();
            let export = self.read_export()?;
            if !names.insert(export.name.0.clone()) {
                self.record(at, DecodeErrorKind::DuplicateExport(export.name.0));
                continue;
            }
            self.module_mut().exports.push(export);
        }
        Ok(())
    }

    fn read_start_section(&mut self) -> ReadResult<()> {
        let at = self.position();
        let Some(index) = self.read_index(IndexSpace::Function)? else {
            return Ok(());
        };
        let nullary = self
            .module()
            .signature_of(index)
            .map_or(true, |sig| sig.params.is_empty() && sig.results.is_empty());
        if !nullary {
            self.record(at, DecodeErrorKind::InvalidStartSignature);
        }
        self.module_mut().start = Some(index);
        Ok(())
    }

    fn read_element_section(&mut self) -> ReadResult<()> {
        let max = self.limits().max_element_segments;
        let count = self.read_count(Quantity::ElementSegments, max)?;
        for _ in 0..count {
            let segment = self.read_element_segment()?;
            self.module_mut().elements.push(segment);
        }
        Ok(())
    }

    fn read_data_count_section(&mut self) -> ReadResult<()> {
        let max = self.limits().max_data_segments;
        let count = self.read_count(Quantity::DataSegments, max)?;
        self.module_mut().data_count = Some(count);
        Ok(())
    }

    fn read_data_section(&mut self) -> ReadResult<()> {
        let at = self.position();
        let max = self.limits().max_data_segments;
        let count = self.read_count(Quantity::DataSegments, max)?;
        if let Some(declared) = self.module().data_count.filter(|declared| *declared != count) {
            self.record(
                at,
                DecodeErrorKind::DataCountMismatch {
                    declared,
                    found: count,
                },
            );
        }
        for _ in 0..count {
            let segment = self.read_data_segment()?;
            self.module_mut().data.push(segment);
        }
        Ok(())
    }
}
