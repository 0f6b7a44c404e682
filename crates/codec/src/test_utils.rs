#![allow(dead_code)]

use sluice_ir::{HeapType, NumType, RefType, ValType, VecType};

use crate::section::SectionId;

/// Assembles binary modules for tests.
///
/// Each call appends a section, except that consecutive `import_*` or
/// `export_*` calls share one section.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    sections: Vec<Section>,
}

#[derive(Debug)]
struct Section {
    id: u8,
    count: Option<u32>,
    payload: Vec<u8>,
}

pub fn uleb(out: &mut Vec<u8>, value: u64) {
    leb128::write::unsigned(out, value).expect("writing to a Vec cannot fail");
}

pub fn sleb(out: &mut Vec<u8>, value: i64) {
    leb128::write::signed(out, value).expect("writing to a Vec cannot fail");
}

pub fn name(out: &mut Vec<u8>, name: &str) {
    uleb(out, name.len() as u64);
    out.extend_from_slice(name.as_bytes());
}

pub fn val_type(out: &mut Vec<u8>, ty: ValType) {
    match ty {
        ValType::NumType(NumType::I32) => out.push(0x7f),
        ValType::NumType(NumType::I64) => out.push(0x7e),
        ValType::NumType(NumType::F32) => out.push(0x7d),
        ValType::NumType(NumType::F64) => out.push(0x7c),
        ValType::VecType(VecType::V128) => out.push(0x7b),
        ValType::RefType(RefType::FUNCREF) => out.push(0x70),
        ValType::RefType(RefType::EXTERNREF) => out.push(0x6f),
        ValType::RefType(RefType {
            heap: HeapType::Abstract(index),
            ..
        }) => {
            out.push(0x69);
            uleb(out, index.into());
        }
        ValType::RefType(RefType { nullable, heap }) => {
            out.push(if nullable { 0x6c } else { 0x6b });
            sleb(
                out,
                match heap {
                    HeapType::Func => -0x10,
                    HeapType::Extern => -0x11,
                    HeapType::Sig(index) => index.into(),
                    HeapType::Abstract(_) => unreachable!(),
                },
            );
        }
    }
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a section with a raw payload.
    pub fn section(mut self, id: SectionId, payload: &[u8]) -> Self {
        self.sections.push(Section {
            id: id as u8,
            count: None,
            payload: payload.to_vec(),
        });
        self
    }

    fn entry(mut self, id: SectionId, merge: bool, entry: impl FnOnce(&mut Vec<u8>)) -> Self {
        let id = id as u8;
        match self.sections.last_mut() {
            Some(Section {
                id: last,
                count: Some(count),
                payload,
            }) if merge && *last == id => {
                *count += 1;
                entry(payload);
            }
            _ => {
                let mut payload = vec![];
                entry(&mut payload);
                self.sections.push(Section {
                    id,
                    count: Some(1),
                    payload,
                });
            }
        }
        self
    }

    fn vector<T>(mut self, id: SectionId, items: &[T], mut entry: impl FnMut(&mut Vec<u8>, &T)) -> Self {
        let mut payload = vec![];
        for item in items {
            entry(&mut payload, item);
        }
        self.sections.push(Section {
            id: id as u8,
            count: Some(items.len() as u32),
            payload,
        });
        self
    }

    pub fn types(self, sigs: &[(&[ValType], &[ValType])]) -> Self {
        self.vector(SectionId::Type, sigs, |out, (params, results)| {
            out.push(0x60);
            for types in [params, results] {
                uleb(out, types.len() as u64);
                for ty in types.iter() {
                    val_type(out, *ty);
                }
            }
        })
    }

    pub fn import_func(self, module: &str, field: &str, sig: u32) -> Self {
        self.entry(SectionId::Import, true, |out| {
            name(out, module);
            name(out, field);
            out.push(0x00);
            uleb(out, sig.into());
        })
    }

    pub fn import_memory(self, module: &str, field: &str, min: u32) -> Self {
        self.entry(SectionId::Import, true, |out| {
            name(out, module);
            name(out, field);
            out.extend_from_slice(&[0x02, 0x00]);
            uleb(out, min.into());
        })
    }

    pub fn functions(self, sigs: &[u32]) -> Self {
        self.vector(SectionId::Function, sigs, |out, sig| uleb(out, (*sig).into()))
    }

    pub fn table(self, elem: ValType, min: u32) -> Self {
        self.entry(SectionId::Table, false, |out| {
            val_type(out, elem);
            out.push(0x00);
            uleb(out, min.into());
        })
    }

    pub fn memory(self, min: u32, max: Option<u32>) -> Self {
        self.entry(SectionId::Memory, false, |out| {
            match max {
                Some(max) => {
                    out.push(0x01);
                    uleb(out, min.into());
                    uleb(out, max.into());
                }
                None => {
                    out.push(0x00);
                    uleb(out, min.into());
                }
            }
        })
    }

    pub fn global_i32(self, mutable: bool, value: i32) -> Self {
        self.entry(SectionId::Global, false, |out| {
            out.extend_from_slice(&[0x7f, mutable as u8, 0x41]);
            sleb(out, value.into());
            out.push(0x0b);
        })
    }

    pub fn export_func(self, field: &str, index: u32) -> Self {
        self.entry(SectionId::Export, true, |out| {
            name(out, field);
            out.push(0x00);
            uleb(out, index.into());
        })
    }

    pub fn start(self, index: u32) -> Self {
        let mut payload = vec![];
        uleb(&mut payload, index.into());
        self.section(SectionId::Start, &payload)
    }

    /// An active segment for table 0 at offset 0.
    pub fn elements(self, funcs: &[u32]) -> Self {
        self.entry(SectionId::Element, false, |out| {
            out.extend_from_slice(&[0x00, 0x41, 0x00, 0x0b]);
            uleb(out, funcs.len() as u64);
            for func in funcs {
                uleb(out, (*func).into());
            }
        })
    }

    pub fn data_count(self, count: u32) -> Self {
        let mut payload = vec![];
        uleb(&mut payload, count.into());
        self.section(SectionId::DataCount, &payload)
    }

    /// Bodies are local declarations followed by instructions; sizes are
    /// prepended.
    pub fn code(self, bodies: &[&[u8]]) -> Self {
        self.vector(SectionId::Code, bodies, |out, body| {
            uleb(out, body.len() as u64);
            out.extend_from_slice(body);
        })
    }

    /// An active segment at offset 0 of `memory`.
    pub fn data_active(self, memory: u32, bytes: &[u8]) -> Self {
        self.entry(SectionId::Data, false, |out| {
            if memory == 0 {
                out.push(0x00);
            } else {
                out.push(0x02);
                uleb(out, memory.into());
            }
            out.extend_from_slice(&[0x41, 0x00, 0x0b]);
            uleb(out, bytes.len() as u64);
            out.extend_from_slice(bytes);
        })
    }

    pub fn custom(self, section: &str, payload: &[u8]) -> Self {
        let mut bytes = vec![];
        name(&mut bytes, section);
        bytes.extend_from_slice(payload);
        self.section(SectionId::Custom, &bytes)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = b"\0asm\x01\0\0\0".to_vec();
        for section in &self.sections {
            let mut payload = vec![];
            if let Some(count) = section.count {
                uleb(&mut payload, count.into());
            }
            payload.extend_from_slice(&section.payload);

            out.push(section.id);
            uleb(&mut out, payload.len() as u64);
            out.extend_from_slice(&payload);
        }
        out
    }
}

#[test]
fn builder_emits_canonical_sections() {
    let bytes = ModuleBuilder::new()
        .types(&[(&[ValType::I32], &[])])
        .export_func("a", 0)
        .export_func("b", 0)
        .build();
    assert_eq!(
        bytes,
        [
            &b"\0asm\x01\0\0\0"[..],
            &[0x01, 0x05, 0x01, 0x60, 0x01, 0x7f, 0x00],
            &[0x07, 0x09, 0x02, 0x01, b'a', 0x00, 0x00, 0x01, b'b', 0x00, 0x00],
        ]
        .concat()
    );
}
