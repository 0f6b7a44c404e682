use thiserror::Error;

use crate::leb::{LEBConstants, S33};

/// The non-value outcomes of a cursor read.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvancementError {
    /// The streaming cursor ran out of buffered bytes; retry once more input
    /// has been appended.
    #[error("need {0} more byte(s)")]
    NeedMoreBytes(usize),

    /// A read ran past the end of a bounded view. The declared size of the
    /// region was wrong.
    #[error("read of {wanted} byte(s) at offset {position} exceeds the enclosing region")]
    BoundsExceeded { position: usize, wanted: usize },

    /// A LEB128 was longer than its type allows or set unused bits.
    #[error("malformed {bits}-bit LEB128 at offset {position}")]
    InvalidLeb { position: usize, bits: u32 },
}

/// A position-tracked view over a byte buffer.
///
/// A cursor is either *streaming* (the buffer may grow; running out of bytes
/// is `NeedMoreBytes`) or *complete* (running out of bytes is
/// `BoundsExceeded`). Sub-views made with [`ByteCursor::subview`] are
/// additionally bounded to a declared size: any read past that size is
/// `BoundsExceeded`, even while streaming.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
    limit: usize,
    growable: bool,
}

impl<'a> ByteCursor<'a> {
    /// A cursor over a complete region whose first byte sits at absolute
    /// offset `base`.
    pub fn new(data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            pos: 0,
            base,
            limit: data.len(),
            growable: false,
        }
    }

    pub(crate) fn streaming(data: &'a [u8], base: usize, pos: usize) -> Self {
        Self {
            data,
            pos,
            base,
            limit: usize::MAX,
            growable: true,
        }
    }

    /// Position relative to the start of this view.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Position in the outermost stream.
    #[inline]
    pub fn absolute_pos(&self) -> usize {
        self.base + self.pos
    }

    /// Declared size of a bounded view; `None` for an unbounded streaming
    /// cursor.
    pub fn limit(&self) -> Option<usize> {
        (self.limit != usize::MAX).then_some(self.limit)
    }

    /// Whether the declared region has been fully consumed.
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.limit
    }

    /// Bytes buffered past the current position (within the view).
    pub fn available(&self) -> usize {
        self.data.len().min(self.limit).saturating_sub(self.pos)
    }

    /// The buffered bytes of this view, from its start.
    pub fn region(&self) -> &'a [u8] {
        &self.data[..self.data.len().min(self.limit)]
    }

    /// The buffered bytes of this view, from the current position.
    pub fn rest(&self) -> &'a [u8] {
        let end = self.data.len().min(self.limit);
        &self.data[self.pos.min(end)..end]
    }

    /// Moves to `pos`, relative to the start of this view.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn ensure(&self, wanted: usize) -> Result<(), AdvancementError> {
        let end = self.pos.saturating_add(wanted);
        if end > self.limit {
            return Err(AdvancementError::BoundsExceeded {
                position: self.absolute_pos(),
                wanted,
            });
        }

        if end > self.data.len() {
            return Err(if self.growable {
                AdvancementError::NeedMoreBytes(end - self.data.len())
            } else {
                AdvancementError::BoundsExceeded {
                    position: self.absolute_pos(),
                    wanted,
                }
            });
        }

        Ok(())
    }

    #[inline]
    pub fn peek(&self) -> Result<u8, AdvancementError> {
        self.ensure(1)?;
        Ok(self.data[self.pos])
    }

    #[inline]
    pub fn u8(&mut self) -> Result<u8, AdvancementError> {
        let next = self.peek()?;
        self.pos += 1;
        Ok(next)
    }

    pub fn u32(&mut self) -> Result<u32, AdvancementError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn u64(&mut self) -> Result<u64, AdvancementError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], AdvancementError> {
        self.ensure(n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), AdvancementError> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    #[inline]
    pub fn u32leb(&mut self) -> Result<u32, AdvancementError> {
        self.leb()
    }

    #[inline]
    pub fn u64leb(&mut self) -> Result<u64, AdvancementError> {
        self.leb()
    }

    #[inline]
    pub fn i32leb(&mut self) -> Result<i32, AdvancementError> {
        self.leb()
    }

    #[inline]
    pub fn i64leb(&mut self) -> Result<i64, AdvancementError> {
        self.leb()
    }

    #[inline]
    pub fn s33leb(&mut self) -> Result<i64, AdvancementError> {
        self.leb::<S33>().map(|S33(v)| v)
    }

    pub fn leb<T: LEBConstants>(&mut self) -> Result<T, AdvancementError> {
        let start = self.absolute_pos();
        let mut result = 0u64;
        let mut shift = 0u32;
        for _ in 0..T::max_bytes() {
            let next = self.u8()?;
            let payload = next & 0x7f;
            result |= u64::from(payload) << shift;

            if next & 0x80 == 0 {
                if shift + 7 > T::BITS {
                    // The final byte may only carry the remaining bits; the
                    // rest must be zero (or, for signed values, a copy of the
                    // sign bit).
                    let used = T::BITS - shift;
                    let overflows = if T::SIGNED {
                        let high = payload >> (used - 1);
                        high != 0 && high != (0x7f >> (used - 1))
                    } else {
                        payload >> used != 0
                    };
                    if overflows {
                        return Err(AdvancementError::InvalidLeb {
                            position: start,
                            bits: T::BITS,
                        });
                    }
                }

                shift += 7;
                if T::SIGNED && shift < 64 && next & 0x40 != 0 {
                    result |= !0u64 << shift;
                }
                return Ok(T::from_u64(result));
            }
            shift += 7;
        }

        Err(AdvancementError::InvalidLeb {
            position: start,
            bits: T::BITS,
        })
    }

    /// A nested cursor scoped to exactly `n` bytes from the current position.
    ///
    /// The sub-view shares the backing bytes; its positions are relative to
    /// its own start and its absolute positions are re-based onto the outer
    /// stream. The parent does not move.
    pub fn subview(&self, n: usize) -> ByteCursor<'a> {
        let limit = n.min(self.limit.saturating_sub(self.pos));
        let start = self.pos.min(self.data.len());
        let end = self.pos.saturating_add(limit).min(self.data.len()).max(start);
        ByteCursor {
            data: &self.data[start..end],
            pos: 0,
            base: self.absolute_pos(),
            limit,
            growable: self.growable,
        }
    }
}

/// The growable backing store of a streaming decode.
///
/// Positions handed out by the store are absolute stream offsets; discarding
/// a consumed prefix never changes them.
#[derive(Debug, Default)]
pub struct ByteStore {
    bytes: Vec<u8>,
    base: usize,
}

impl ByteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Absolute offset one past the last buffered byte.
    pub fn end(&self) -> usize {
        self.base + self.bytes.len()
    }

    /// A streaming cursor positioned at absolute offset `position`.
    pub fn cursor_at(&self, position: usize) -> ByteCursor<'_> {
        ByteCursor::streaming(&self.bytes, self.base, position.saturating_sub(self.base))
    }

    /// Drops buffered bytes before absolute offset `position`.
    pub fn discard_before(&mut self, position: usize) {
        let count = position.min(self.end()).saturating_sub(self.base);
        self.bytes.drain(..count);
        self.base += count;
    }
}
