use sluice_ir::{DecoderConfig, Function, FunctionBody, Module};

use crate::{
    cursor::ByteCursor,
    error::{DecodeError, DecodeErrorKind, Diagnostic},
    reader::{DecodeContext, FormatReader, ReadResult, Stop},
    section::SectionId,
    validator::CodeValidator,
};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SectionAction {
    Decode,
    Skip,
}

/// Builds the module from the productions the section machine hands it and
/// enforces the rules that span sections.
pub struct ModuleAssembler<V> {
    ctx: DecodeContext,
    seen: [bool; 13],
    last_rank: u8,
    pending_bodies: Vec<u32>,
    validator: V,
}

impl<V: CodeValidator> ModuleAssembler<V> {
    pub fn new(config: DecoderConfig, validator: V) -> Self {
        Self {
            ctx: DecodeContext::new(config),
            seen: [false; 13],
            last_rank: 0,
            pending_bodies: Vec::new(),
            validator,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.ctx.config
    }

    pub fn module(&self) -> &Module {
        &self.ctx.module
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.ctx.sink.diagnostics()
    }

    pub fn record(&mut self, offset: usize, kind: DecodeErrorKind) {
        self.ctx.sink.record(offset, kind);
    }

    pub fn validator_mut(&mut self) -> &mut V {
        &mut self.validator
    }

    /// Checks placement of a section whose id byte sits at `offset`.
    pub fn begin_section(&mut self, id: SectionId, offset: usize) -> SectionAction {
        let Some(rank) = id.rank() else {
            return SectionAction::Decode;
        };

        if !self.ctx.config.features.repeated_sections() {
            if self.seen[id as usize] {
                self.record(offset, DecodeErrorKind::DuplicateSection(id));
                return SectionAction::Skip;
            }
            if rank < self.last_rank {
                self.record(offset, DecodeErrorKind::SectionOutOfOrder(id));
            }
        }

        self.seen[id as usize] = true;
        self.last_rank = self.last_rank.max(rank);
        SectionAction::Decode
    }

    /// Decodes a fully buffered section payload. `view` is bounded to the
    /// declared size.
    pub fn decode_section(&mut self, id: SectionId, view: ByteCursor<'_>) {
        let declared = view.limit().unwrap_or(0);
        let mut reader = FormatReader::new(view, &mut self.ctx);
        let result = reader.read_section(id);
        let consumed = reader.cursor().pos();
        let end = reader.position();
        self.check_size(result, consumed, declared, end, |declared, consumed| {
            match consumed {
                Some(consumed) => DecodeErrorKind::IncompleteSection {
                    section: id,
                    declared,
                    consumed,
                },
                None => DecodeErrorKind::OverflowSection {
                    section: id,
                    declared,
                },
            }
        });
    }

    /// Starts the code section; returns how many bodies to decode.
    pub fn begin_code(&mut self, count: u32, offset: usize) -> u32 {
        self.pending_bodies = self
            .ctx
            .module
            .functions
            .iter()
            .enumerate()
            .filter(|(_, func)| !func.imported && func.body.is_none())
            .map(|(idx, _)| idx as u32)
            .collect();

        let declared = self.pending_bodies.len() as u32;
        if declared != count {
            self.record(
                offset,
                DecodeErrorKind::FunctionBodyCountMismatch {
                    declared,
                    found: count,
                },
            );
        }
        declared.min(count)
    }

    /// Records the `ordinal`th body of the code section on its function and
    /// hands it to the code validator. `view` is bounded to the body.
    pub fn decode_body(&mut self, ordinal: u32, view: ByteCursor<'_>) {
        let Some(&func_index) = self.pending_bodies.get(ordinal as usize) else {
            return;
        };
        let Some(sig) = self
            .ctx
            .module
            .functions
            .get(func_index as usize)
            .map(|func| func.sig)
        else {
            return;
        };

        let declared = view.limit().unwrap_or(0);
        let body = FunctionBody {
            offset: view.absolute_pos(),
            bytes: view.region().into(),
        };
        let func = Function {
            sig,
            imported: false,
            body: None,
        };

        let recorded = self.ctx.sink.len();
        let mut reader = FormatReader::new(view, &mut self.ctx);
        let result = self.validator.validate(func_index, &func, &body, &mut reader);
        let consumed = reader.cursor().pos();
        let end = reader.position();
        tracing::trace!(func_index, offset = body.offset, ?result, "validated body");

        // a rejection always leaves at least one diagnostic behind
        if result == Ok(false) && self.ctx.sink.len() == recorded {
            self.record(body.offset, DecodeErrorKind::CodeValidationFailed { func_index });
        }

        if let Some(func) = self.ctx.module.functions.get_mut(func_index as usize) {
            func.body = Some(body);
        }

        self.check_size(result.map(|_| ()), consumed, declared, end, |declared, consumed| {
            match consumed {
                Some(consumed) => DecodeErrorKind::IncompleteBody { declared, consumed },
                None => DecodeErrorKind::OverflowBody { declared },
            }
        });
    }

    fn check_size(
        &mut self,
        result: ReadResult<()>,
        consumed: usize,
        declared: usize,
        end: usize,
        kind: impl FnOnce(u32, Option<u32>) -> DecodeErrorKind,
    ) {
        let declared32 = u32::try_from(declared).unwrap_or(u32::MAX);
        match result {
            Ok(()) if consumed < declared => {
                let consumed = u32::try_from(consumed).unwrap_or(u32::MAX);
                self.record(end, kind(declared32, Some(consumed)));
            }
            Ok(()) | Err(Stop::Abandoned) => {}
            Err(Stop::Overflow { position }) => self.record(position, kind(declared32, None)),
            // the view is fully buffered, so running dry means it was too short
            Err(Stop::NeedMoreBytes(_)) => self.record(end, kind(declared32, None)),
        }
    }

    /// Cross-section checks at a clean end of stream.
    pub fn finish(mut self, end: usize) -> Result<Module, DecodeError> {
        let module = &self.ctx.module;
        let has_local_functions = module.functions.iter().any(|func| !func.imported);
        if has_local_functions && !self.seen[SectionId::Code as usize] {
            self.record(end, DecodeErrorKind::MissingCodeSection);
        }

        let module = &self.ctx.module;
        if module.data_count.is_some_and(|count| count > 0) && !self.seen[SectionId::Data as usize] {
            self.record(end, DecodeErrorKind::MissingDataSection);
        }

        if self.ctx.sink.is_empty() {
            Ok(self.ctx.module)
        } else {
            Err(self.into_error())
        }
    }

    pub fn into_error(self) -> DecodeError {
        DecodeError {
            diagnostics: self.ctx.sink.into_diagnostics(),
        }
    }
}
