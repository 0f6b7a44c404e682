use sluice_ir::{
    AbstractType, Decl, Export, Function, Global, Import, ImportedCommand, Memory, Table,
};

use crate::error::{DecodeErrorKind, IndexSpace, Quantity};

use super::{FormatReader, ReadResult, Stop};

impl<'a, 'c> FormatReader<'a, 'c> {
    /// Reads one import and appends its declaration to the matching index
    /// space.
    pub fn read_import(&mut self) -> ReadResult<Import> {
        let module = self.read_name()?;
        let field = self.read_name()?;
        let at = self.position();
        let kind = self.read_u8()?;
        let type_imports = self.features().type_imports();

        let decl = match kind {
            0x00 => {
                let sig = self.read_sig_index()?;
                let functions = &mut self.module_mut().functions;
                functions.push(Function {
                    sig,
                    imported: true,
                    body: None,
                });
                Decl::Function(functions.len() as u32 - 1)
            }
            0x01 => {
                let ty = self.read_table_type()?;
                self.check_table_count(at, 1);
                let tables = &mut self.module_mut().tables;
                tables.push(Table { ty, imported: true });
                Decl::Table(tables.len() as u32 - 1)
            }
            0x02 => {
                let ty = self.read_memory_type()?;
                self.check_memory_count(at, 1);
                let memories = &mut self.module_mut().memories;
                memories.push(Memory { ty, imported: true });
                Decl::Memory(memories.len() as u32 - 1)
            }
            0x03 => {
                let ty = self.read_global_type()?;
                let globals = &mut self.module_mut().globals;
                globals.push(Global { ty, init: None });
                Decl::Global(globals.len() as u32 - 1)
            }
            0x05 if type_imports => {
                let flags_at = self.position();
                let flags = self.read_u8()?;
                if flags & !0x01 != 0 {
                    self.record(flags_at, DecodeErrorKind::InvalidAbstractTypeFlags(flags));
                }
                let max = self.limits().max_types;
                let count = self.read_count(Quantity::Constraints, max)?;
                let constraints = (0..count)
                    .map(|_| self.read_value_type())
                    .collect::<ReadResult<Box<[_]>>>()?;
                let abstract_types = &mut self.module_mut().abstract_types;
                abstract_types.push(AbstractType {
                    nullable: flags & 0x01 != 0,
                    constraints,
                });
                Decl::AbstractType(abstract_types.len() as u32 - 1)
            }
            0x06 if type_imports => {
                let sig = self.read_sig_index()?;
                let commands = &mut self.module_mut().commands;
                commands.push(ImportedCommand { sig });
                Decl::ImportedCommand(commands.len() as u32 - 1)
            }
            other => {
                self.record(at, DecodeErrorKind::InvalidImportKind(other));
                return Err(Stop::Abandoned);
            }
        };

        Ok(Import {
            module,
            field,
            decl,
        })
    }

    pub fn read_export(&mut self) -> ReadResult<Export> {
        let name = self.read_name()?;
        let at = self.position();
        let kind = self.read_u8()?;
        let decl = match kind {
            0x00 => Decl::Function(self.read_func_index()?),
            0x01 => Decl::Table(self.read_table_index()?),
            0x02 => Decl::Memory(self.read_memory_index()?),
            0x03 => Decl::Global(self.read_global_index()?),
            0x05 if self.features().type_imports() => {
                Decl::AbstractType(self.read_abstract_index()?)
            }
            other => {
                self.record(at, DecodeErrorKind::InvalidExportKind(other));
                return Err(Stop::Abandoned);
            }
        };
        Ok(Export { name, decl })
    }

    /// More than one table needs reference-types.
    pub(crate) fn check_table_count(&mut self, at: usize, adding: u32) {
        let max = if self.features().reference_types() {
            self.limits().max_tables
        } else {
            1
        };
        let total = self.space_len(IndexSpace::Table) as u64 + u64::from(adding);
        if total > u64::from(max) {
            self.record(
                at,
                DecodeErrorKind::LimitExceeded {
                    quantity: Quantity::Tables,
                    value: total,
                    max: max.into(),
                },
            );
        }
    }

    /// More than one memory needs multi-memory.
    pub(crate) fn check_memory_count(&mut self, at: usize, adding: u32) {
        let max = if self.features().multi_memory() {
            self.limits().max_memories
        } else {
            1
        };
        let total = self.space_len(IndexSpace::Memory) as u64 + u64::from(adding);
        if total > u64::from(max) {
            self.record(
                at,
                DecodeErrorKind::LimitExceeded {
                    quantity: Quantity::Memories,
                    value: total,
                    max: max.into(),
                },
            );
        }
    }
}
