/// Integer types decodable from LEB128.
pub trait LEBConstants: Sized {
    const BITS: u32;
    const SIGNED: bool = false;

    fn from_u64(i: u64) -> Self;

    #[inline]
    fn max_bytes() -> usize {
        divrem::DivCeil::div_ceil(Self::BITS, 7) as usize
    }
}

impl LEBConstants for u32 {
    const BITS: u32 = 32;
    #[inline]
    fn from_u64(i: u64) -> Self {
        i as u32
    }
}

impl LEBConstants for u64 {
    const BITS: u32 = 64;
    #[inline]
    fn from_u64(i: u64) -> Self {
        i
    }
}

impl LEBConstants for i32 {
    const BITS: u32 = 32;
    const SIGNED: bool = true;
    #[inline]
    fn from_u64(i: u64) -> Self {
        i as i32
    }
}

impl LEBConstants for i64 {
    const BITS: u32 = 64;
    const SIGNED: bool = true;
    #[inline]
    fn from_u64(i: u64) -> Self {
        i as i64
    }
}

/// A signed 33-bit integer, used by block types and heap types so that every
/// `u32` index and the negative single-byte type codes share one encoding.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct S33(pub i64);

impl LEBConstants for S33 {
    const BITS: u32 = 33;
    const SIGNED: bool = true;
    #[inline]
    fn from_u64(i: u64) -> Self {
        S33(i as i64)
    }
}
