//! Value: a tagged reference, either a small integer embedded in the word or a
//! pointer into one of the heap arenas.
//!
//! Layout of the low bits:
//!
//! ```text
//! iiii....iiii 001   small integer, 61 bit signed payload
//! wwww....wwww a000  heap pointer, `a` selects the arena, `w` is the word index
//! ```
//!
//! The all-zero word is nil. Word 0 of every arena is reserved so no object
//! ever lives at an address that would encode to nil.
use std::fmt;

use crate::ArenaId;

#[allow(unused)]
#[repr(u64)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueTag {
    Reference = 0b000,
    Integer = 0b001,
}

pub const TAG_BITS: u32 = 3;
pub const TAG_MASK: u64 = 0b111;

const ARENA_SHIFT: u32 = 3;
const WORD_SHIFT: u32 = 4;

pub const SMALL_INTEGER_MAX: i64 = (1 << 60) - 1;
pub const SMALL_INTEGER_MIN: i64 = -(1 << 60);

/// Location of an object header inside an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub arena: ArenaId,
    pub word: usize,
}

impl Address {
    pub fn new(arena: ArenaId, word: usize) -> Self {
        Self { arena, word }
    }
}

/// A generic Value
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Value(u64);

impl Value {
    pub const NIL: Value = Value(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Embeds `value`, or `None` when it does not fit in 61 bits.
    pub fn from_i64(value: i64) -> Option<Self> {
        if !(SMALL_INTEGER_MIN..=SMALL_INTEGER_MAX).contains(&value) {
            return None;
        }
        Some(Self(((value as u64) << TAG_BITS) | ValueTag::Integer as u64))
    }

    pub const fn from_i32(value: i32) -> Self {
        Self((((value as i64) as u64) << TAG_BITS) | ValueTag::Integer as u64)
    }

    pub fn from_usize(value: usize) -> Self {
        debug_assert!(value as u64 <= SMALL_INTEGER_MAX as u64);
        Self(((value as u64) << TAG_BITS) | ValueTag::Integer as u64)
    }

    pub fn from_address(address: Address) -> Self {
        debug_assert!(address.word != 0, "word 0 is reserved");
        Self(((address.word as u64) << WORD_SHIFT) | ((address.arena as u64) << ARENA_SHIFT))
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_integer(self) -> bool {
        self.0 & TAG_MASK == ValueTag::Integer as u64
    }

    /// True for non-nil heap pointers.
    #[inline]
    pub fn is_reference(self) -> bool {
        self.0 != 0 && self.0 & TAG_MASK == ValueTag::Reference as u64
    }

    #[inline]
    pub fn as_i64(self) -> Option<i64> {
        self.is_integer().then(|| (self.0 as i64) >> TAG_BITS)
    }

    pub fn as_usize(self) -> Option<usize> {
        self.as_i64().and_then(|v| usize::try_from(v).ok())
    }

    #[inline]
    pub fn address(self) -> Option<Address> {
        if !self.is_reference() {
            return None;
        }
        let arena = if (self.0 >> ARENA_SHIFT) & 1 == 0 {
            ArenaId::Pointers
        } else {
            ArenaId::Leaf
        };
        Some(Address {
            arena,
            word: (self.0 >> WORD_SHIFT) as usize,
        })
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::NIL
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            return write!(f, "nil");
        }
        if let Some(i) = self.as_i64() {
            return write!(f, "Int({i})");
        }
        match self.address() {
            Some(address) => write!(f, "Ref({:?}@{})", address.arena, address.word),
            None => write!(f, "Invalid({:#x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_the_zero_word() {
        assert_eq!(Value::NIL.raw(), 0);
        assert!(Value::NIL.is_nil());
        assert!(!Value::NIL.is_reference());
        assert!(!Value::NIL.is_integer());
        assert_eq!(Value::NIL.address(), None);
    }

    #[test]
    fn integers_keep_sign_and_limits() {
        for n in [0, 1, -1, 42, -42, SMALL_INTEGER_MAX, SMALL_INTEGER_MIN] {
            let v = Value::from_i64(n).expect("fits");
            assert!(v.is_integer());
            assert!(!v.is_reference());
            assert_eq!(v.as_i64(), Some(n));
        }
        assert_eq!(Value::from_i32(-7).as_i64(), Some(-7));
    }

    #[test]
    fn integers_outside_61_bits_are_rejected() {
        assert!(Value::from_i64(SMALL_INTEGER_MAX + 1).is_none());
        assert!(Value::from_i64(SMALL_INTEGER_MIN - 1).is_none());
        assert!(Value::from_i64(i64::MAX).is_none());
    }

    #[test]
    fn address_encodes_arena_and_word() {
        let a = Address::new(ArenaId::Pointers, 12);
        let b = Address::new(ArenaId::Leaf, 12);
        let va = Value::from_address(a);
        let vb = Value::from_address(b);
        assert_ne!(va, vb);
        assert!(va.is_reference() && vb.is_reference());
        assert_eq!(va.address(), Some(a));
        assert_eq!(vb.address(), Some(b));
        assert_eq!(va.as_i64(), None);
    }

    #[test]
    fn negative_integer_is_not_usize() {
        assert_eq!(Value::from_i32(-1).as_usize(), None);
        assert_eq!(Value::from_i32(9).as_usize(), Some(9));
    }
}
