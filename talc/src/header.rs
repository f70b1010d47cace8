use crate::Value;

/// Words occupied by every header.
pub const HEADER_WORDS: usize = 2;

const KIND_MASK: u64 = 0b11;
const HASH_SHIFT: u32 = 2;
const HASH_MASK: u64 = (1 << 30) - 1;
const SIZE_SHIFT: u32 = 32;

/// Largest identity hash a header can hold, exclusive.
pub const HASH_LIMIT: u32 = 1 << 30;

/// Object kinds. `Pad` and `Forwarded` are private to the collector.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Pointers = 0,
    Bytes = 1,
    Pad = 2,
    Forwarded = 3,
}

impl ObjectKind {
    fn from_bits(bits: u64) -> Self {
        match bits & KIND_MASK {
            0 => ObjectKind::Pointers,
            1 => ObjectKind::Bytes,
            2 => ObjectKind::Pad,
            _ => ObjectKind::Forwarded,
        }
    }
}

/// Decoded header.
///
/// Word 0 holds the class (the forwarding address once forwarded), word 1 packs
/// `kind | hash << 2 | size << 32`. `size` counts slots for pointer objects,
/// bytes for byte objects and payload words for pads and forwarded objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub class: Value,
    pub kind: ObjectKind,
    pub hash: u32,
    pub size: u32,
}

impl Header {
    pub fn new(class: Value, kind: ObjectKind, hash: u32, size: u32) -> Self {
        debug_assert!(hash < HASH_LIMIT);
        Self {
            class,
            kind,
            hash,
            size,
        }
    }

    pub fn pad(payload_words: u32) -> Self {
        Self::new(Value::NIL, ObjectKind::Pad, 0, payload_words)
    }

    /// Header left behind in from-space. Keeps the payload length so linear
    /// walks can still step over the stale copy.
    pub fn forwarded(to: Value, payload_words: u32) -> Self {
        Self::new(to, ObjectKind::Forwarded, 0, payload_words)
    }

    pub fn encode(self) -> [u64; HEADER_WORDS] {
        let packed = (self.kind as u64)
            | ((self.hash as u64 & HASH_MASK) << HASH_SHIFT)
            | ((self.size as u64) << SIZE_SHIFT);
        [self.class.raw(), packed]
    }

    pub fn decode(words: [u64; HEADER_WORDS]) -> Self {
        let packed = words[1];
        Self {
            class: Value::from_raw(words[0]),
            kind: ObjectKind::from_bits(packed),
            hash: ((packed >> HASH_SHIFT) & HASH_MASK) as u32,
            size: (packed >> SIZE_SHIFT) as u32,
        }
    }

    pub fn payload_words(self) -> usize {
        match self.kind {
            ObjectKind::Bytes => (self.size as usize).div_ceil(8),
            ObjectKind::Pointers | ObjectKind::Pad | ObjectKind::Forwarded => self.size as usize,
        }
    }

    pub fn total_words(self) -> usize {
        HEADER_WORDS + self.payload_words()
    }

    pub fn forwarding_address(self) -> Option<Value> {
        (self.kind == ObjectKind::Forwarded).then_some(self.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_word_keeps_every_field() {
        let class = Value::from_raw(0x1230);
        let header = Header::new(class, ObjectKind::Bytes, HASH_LIMIT - 1, 17);
        let decoded = Header::decode(header.encode());
        assert_eq!(decoded, header);
    }

    #[test]
    fn byte_objects_round_up_to_whole_words() {
        let header = Header::new(Value::NIL, ObjectKind::Bytes, 1, 9);
        assert_eq!(header.payload_words(), 2);
        assert_eq!(header.total_words(), HEADER_WORDS + 2);

        let empty = Header::new(Value::NIL, ObjectKind::Bytes, 1, 0);
        assert_eq!(empty.payload_words(), 0);
    }

    #[test]
    fn forwarded_header_remembers_size_and_target() {
        let target = Value::from_raw(0x40);
        let header = Header::forwarded(target, 5);
        assert_eq!(header.forwarding_address(), Some(target));
        assert_eq!(header.total_words(), HEADER_WORDS + 5);
        assert_eq!(Header::pad(3).forwarding_address(), None);
    }
}
