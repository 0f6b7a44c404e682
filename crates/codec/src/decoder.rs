use sluice_ir::{DecoderConfig, Module};

use crate::{
    cursor::{AdvancementError, ByteStore},
    error::{DecodeError, DecodeErrorKind, Diagnostic, Quantity},
    module::{ModuleAssembler, SectionAction},
    section::SectionId,
    validator::{CodeValidator, StructureChecker},
};

const MAGIC: u32 = 0x6d73_6100;
const VERSION: u32 = 1;

/*
 * The section machine is a flat state machine over the buffered stream. Each transition reads
 * from a fresh cursor at the checkpoint position. If the buffered bytes run out partway through,
 * the transition is abandoned and retried from the same checkpoint once more bytes arrive; a
 * transition only records diagnostics after its last read, so a retry never duplicates one.
 *
 * Non-code sections are decoded in one transition once their whole payload is buffered. The
 * code section is decoded body by body.
 */

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
struct SectionSpan {
    id: SectionId,
    start: usize,
    size: u32,
}

impl SectionSpan {
    fn end(&self) -> usize {
        self.start + self.size as usize
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum State {
    Magic,
    Version,
    SectionStart,
    /// The id byte has been read; the size comes next.
    Section { id: u8, offset: usize },
    /// Waiting for (or skipping) a whole section payload.
    SectionBody { span: SectionSpan, skip: bool },
    CodeCount { span: SectionSpan },
    /// Between function bodies of the code section.
    Body { span: SectionSpan, ordinal: u32, remaining: u32 },
    BodyWithSize { span: SectionSpan, ordinal: u32, remaining: u32, start: usize, size: u32 },
    Failed,
}

enum Step {
    Continue,
    Suspend,
}

#[derive(Debug)]
pub struct SectionMachine {
    state: State,
    pos: usize,
}

impl Default for SectionMachine {
    fn default() -> Self {
        Self {
            state: State::Magic,
            pos: 0,
        }
    }
}

impl SectionMachine {
    /// Absolute offset of the checkpoint.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    /// In the accept state: between sections with nothing pending.
    pub fn is_at_section_boundary(&self, end: usize) -> bool {
        self.state == State::SectionStart && self.pos == end
    }

    /// Runs transitions until the buffered bytes are exhausted or the
    /// machine fails.
    pub fn drive<V: CodeValidator>(&mut self, store: &ByteStore, asm: &mut ModuleAssembler<V>) {
        while let Step::Continue = self.step(store, asm) {}
    }

    fn step<V: CodeValidator>(&mut self, store: &ByteStore, asm: &mut ModuleAssembler<V>) -> Step {
        match self.transition(store, asm) {
            Ok(Some((state, pos))) => {
                tracing::trace!(?state, pos, "transition");
                self.state = state;
                self.pos = pos;
                if state == State::Failed {
                    Step::Suspend
                } else {
                    Step::Continue
                }
            }
            Ok(None) => Step::Suspend,
            Err(AdvancementError::NeedMoreBytes(wanted)) => {
                tracing::trace!(state = ?self.state, pos = self.pos, wanted, "suspend");
                Step::Suspend
            }
            Err(err) => {
                // every bounded read is handled inside its transition
                tracing::debug!(state = ?self.state, %err, "unexpected cursor error");
                Step::Suspend
            }
        }
    }

    /// Computes the next checkpoint. `Ok(None)` means the machine is idle.
    fn transition<V: CodeValidator>(
        &self,
        store: &ByteStore,
        asm: &mut ModuleAssembler<V>,
    ) -> Result<Option<(State, usize)>, AdvancementError> {
        let mut cursor = store.cursor_at(self.pos);
        let at = self.pos;

        Ok(Some(match self.state {
            State::Failed => return Ok(None),

            State::Magic => {
                let magic = cursor.u32()?;
                if magic != MAGIC {
                    asm.record(at, DecodeErrorKind::BadMagic(magic));
                    (State::Failed, at)
                } else {
                    (State::Version, cursor.absolute_pos())
                }
            }

            State::Version => {
                let version = cursor.u32()?;
                if version != VERSION {
                    asm.record(at, DecodeErrorKind::UnexpectedVersion(version));
                    (State::Failed, at)
                } else {
                    (State::SectionStart, cursor.absolute_pos())
                }
            }

            State::SectionStart => {
                let id = cursor.u8()?;
                (State::Section { id, offset: at }, cursor.absolute_pos())
            }

            State::Section { id, offset } => {
                let size = match cursor.u32leb() {
                    Err(AdvancementError::InvalidLeb { position, bits }) => {
                        asm.record(position, DecodeErrorKind::InvalidLeb(bits));
                        0
                    }
                    other => other?,
                };
                let start = cursor.absolute_pos();
                let end = start as u64 + u64::from(size);
                let max = asm.config().limits.max_module_size;
                if end > u64::from(max) {
                    asm.record(
                        offset,
                        DecodeErrorKind::LimitExceeded {
                            quantity: Quantity::ModuleSize,
                            value: end,
                            max: max.into(),
                        },
                    );
                    return Ok(Some((State::Failed, offset)));
                }

                let Ok(section) = SectionId::try_from(id) else {
                    asm.record(offset, DecodeErrorKind::InvalidSectionId(id));
                    let span = SectionSpan {
                        id: SectionId::Custom,
                        start,
                        size,
                    };
                    return Ok(Some((State::SectionBody { span, skip: true }, start)));
                };

                tracing::debug!(section = %section, offset, size, "section");
                let span = SectionSpan {
                    id: section,
                    start,
                    size,
                };
                let state = match (asm.begin_section(section, offset), section) {
                    (SectionAction::Skip, _) => State::SectionBody { span, skip: true },
                    (SectionAction::Decode, SectionId::Code) => State::CodeCount { span },
                    (SectionAction::Decode, _) => State::SectionBody { span, skip: false },
                };
                (state, start)
            }

            State::SectionBody { span, skip: true } => (State::SectionStart, span.end()),

            State::SectionBody { span, skip: false } => {
                if store.end() < span.end() {
                    return Err(AdvancementError::NeedMoreBytes(span.end() - store.end()));
                }
                asm.decode_section(span.id, cursor.subview(span.size as usize));
                (State::SectionStart, span.end())
            }

            State::CodeCount { span } => {
                let mut view = cursor.subview(span.size as usize);
                let count = match view.u32leb() {
                    Ok(count) => count,
                    Err(AdvancementError::InvalidLeb { position, bits }) => {
                        asm.record(position, DecodeErrorKind::InvalidLeb(bits));
                        0
                    }
                    Err(AdvancementError::BoundsExceeded { position, .. }) => {
                        asm.record(position, overflow(span));
                        return Ok(Some((State::SectionStart, span.end())));
                    }
                    Err(err) => return Err(err),
                };
                let remaining = asm.begin_code(count, at);
                let state = State::Body {
                    span,
                    ordinal: 0,
                    remaining,
                };
                (state, view.absolute_pos())
            }

            State::Body {
                span,
                ordinal,
                remaining: 0,
            } => {
                if at < span.end() {
                    asm.record(
                        at,
                        DecodeErrorKind::IncompleteSection {
                            section: span.id,
                            declared: span.size,
                            consumed: (at - span.start) as u32,
                        },
                    );
                }
                tracing::trace!(bodies = ordinal, "code section done");
                (State::SectionStart, span.end())
            }

            State::Body {
                span,
                ordinal,
                remaining,
            } => {
                let mut view = cursor.subview(span.end().saturating_sub(at));
                let size = match view.u32leb() {
                    Ok(size) => size,
                    Err(AdvancementError::InvalidLeb { position, bits }) => {
                        asm.record(position, DecodeErrorKind::InvalidLeb(bits));
                        0
                    }
                    Err(AdvancementError::BoundsExceeded { position, .. }) => {
                        asm.record(position, overflow(span));
                        return Ok(Some((State::SectionStart, span.end())));
                    }
                    Err(err) => return Err(err),
                };
                let start = view.absolute_pos();
                if start + size as usize > span.end() {
                    asm.record(at, overflow(span));
                    return Ok(Some((State::SectionStart, span.end())));
                }

                let max = asm.config().limits.max_function_size;
                if size > max {
                    asm.record(
                        at,
                        DecodeErrorKind::LimitExceeded {
                            quantity: Quantity::FunctionSize,
                            value: size.into(),
                            max: max.into(),
                        },
                    );
                    let state = State::Body {
                        span,
                        ordinal: ordinal + 1,
                        remaining: remaining - 1,
                    };
                    return Ok(Some((state, start + size as usize)));
                }

                let state = State::BodyWithSize {
                    span,
                    ordinal,
                    remaining,
                    start,
                    size,
                };
                (state, start)
            }

            State::BodyWithSize {
                span,
                ordinal,
                remaining,
                start,
                size,
            } => {
                let end = start + size as usize;
                if store.end() < end {
                    return Err(AdvancementError::NeedMoreBytes(end - store.end()));
                }
                asm.decode_body(ordinal, cursor.subview(size as usize));
                let state = State::Body {
                    span,
                    ordinal: ordinal + 1,
                    remaining: remaining - 1,
                };
                (state, end)
            }
        }))
    }
}

fn overflow(span: SectionSpan) -> DecodeErrorKind {
    DecodeErrorKind::OverflowSection {
        section: span.id,
        declared: span.size,
    }
}

/// A push-based module decoder.
///
/// Bytes may arrive in chunks of any size; the result does not depend on how
/// the stream was split.
pub struct Decoder<V = StructureChecker> {
    store: ByteStore,
    machine: SectionMachine,
    assembler: ModuleAssembler<V>,
}

impl Decoder<StructureChecker> {
    pub fn new(config: DecoderConfig) -> Self {
        Self::with_validator(config, StructureChecker::new())
    }
}

impl Default for Decoder<StructureChecker> {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl<V: CodeValidator> Decoder<V> {
    pub fn with_validator(config: DecoderConfig, validator: V) -> Self {
        Self {
            store: ByteStore::new(),
            machine: SectionMachine::default(),
            assembler: ModuleAssembler::new(config, validator),
        }
    }

    /// Appends `chunk` and decodes as far as the buffered bytes allow. Fails
    /// only once the stream cannot be decoded any further.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), DecodeError> {
        if !self.machine.is_failed() {
            self.store.append(chunk);
            self.machine.drive(&self.store, &mut self.assembler);
            self.store.discard_before(self.machine.position());
        }

        if self.machine.is_failed() {
            return Err(DecodeError {
                diagnostics: self.assembler.diagnostics().to_vec(),
            });
        }
        Ok(())
    }

    /// Ends the stream.
    pub fn finish(mut self) -> Result<Module, DecodeError> {
        let end = self.store.end();
        if self.machine.is_failed() {
            return Err(self.assembler.into_error());
        }
        if !self.machine.is_at_section_boundary(end) {
            self.assembler.record(end, DecodeErrorKind::IncompleteStream);
            return Err(self.assembler.into_error());
        }
        self.assembler.finish(end)
    }

    /// Diagnostics recorded so far.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.assembler.diagnostics()
    }

    /// Absolute offset up to which the stream has been decoded.
    pub fn position(&self) -> usize {
        self.machine.position()
    }

    /// The module as decoded so far.
    pub fn module(&self) -> &Module {
        self.assembler.module()
    }
}
