//! Word arenas holding every heap object.
//!
//! There are two arenas: one for pointer-bearing objects, which the collector
//! scans, and one for leaf objects (symbols, strings, bytecode) whose payload
//! is never scanned. Objects are bump allocated, zero filled (zero is nil),
//! and addressed by word index, so back-pointer chains such as
//! `Context.previous` are plain slot values rather than shared Rust references.
//!
//! Collection only happens when explicitly requested through [`Heap::collect`],
//! which the interpreter does at safepoints after spilling its registers.
use std::ops::Range;

use crate::{
    Address, CollectionStats, Collector, CopyingCollector, HASH_LIMIT, HEADER_WORDS, Header,
    ObjectKind, ObjectModel, Value,
};

/// First word past the reserved pad at the start of every arena.
pub const FIRST_OBJECT: usize = HEADER_WORDS;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArenaId {
    Pointers = 0,
    Leaf = 1,
}

impl ArenaId {
    pub const ALL: [ArenaId; 2] = [ArenaId::Pointers, ArenaId::Leaf];

    fn index(self) -> usize {
        self as usize
    }
}

/// Consumers implement this to provide GC roots.
///
/// The visitor receives `&mut Value` so the collector can rewrite roots in
/// place when it relocates their referents.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

impl RootProvider for Vec<Value> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for value in self.iter_mut() {
            visitor(value);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("{arena:?} arena exhausted: {requested} words requested, {used} of {capacity} in use")]
    Exhausted {
        arena: ArenaId,
        requested: usize,
        used: usize,
        capacity: usize,
    },
    #[error("dangling reference {value:?} held by an object in the {arena:?} arena")]
    Dangling { arena: ArenaId, value: Value },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeapCreateInfo {
    /// Capacity of each arena in words.
    pub arena_words: Option<usize>,
    /// Fraction of an arena that may fill up before a safepoint collects.
    pub collect_threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct HeapSettings {
    pub arena_words: usize,
    pub collect_threshold: f64,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            arena_words: 1 << 20,
            collect_threshold: 0.75,
        }
    }
}

impl HeapSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.arena_words < 1024 {
            return Err("arena_words must be at least 1024");
        }
        if self.arena_words > u32::MAX as usize {
            return Err("arena_words must fit in 32 bits");
        }
        if !(self.collect_threshold > 0.0 && self.collect_threshold <= 1.0) {
            return Err("collect_threshold must be in (0, 1]");
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStats {
    pub allocated_objects: u64,
    pub allocated_words: u64,
    pub collections: u64,
    pub last_collection: CollectionStats,
}

/// One arena: a word vector with a reserved pad object at word 0.
#[derive(Debug)]
pub struct Space {
    words: Vec<u64>,
}

impl Space {
    fn with_capacity(capacity: usize) -> Self {
        let mut words = Vec::with_capacity(capacity);
        words.extend(Header::pad(0).encode());
        Self { words }
    }

    pub fn top(&self) -> usize {
        self.words.len()
    }

    fn header(&self, word: usize) -> Header {
        Header::decode([self.words[word], self.words[word + 1]])
    }

    fn set_header(&mut self, word: usize, header: Header) {
        let [class, packed] = header.encode();
        self.words[word] = class;
        self.words[word + 1] = packed;
    }

    fn bump(&mut self, total: usize) -> usize {
        let at = self.words.len();
        self.words.resize(at + total, 0);
        at
    }
}

/// The pair of arenas. This is what the collector operates on through
/// [`ObjectModel`].
#[derive(Debug)]
pub struct Arenas {
    spaces: [Space; 2],
}

impl Arenas {
    pub fn with_capacity(words: usize) -> Self {
        Self {
            spaces: [Space::with_capacity(words), Space::with_capacity(words)],
        }
    }

    pub fn space(&self, arena: ArenaId) -> &Space {
        &self.spaces[arena.index()]
    }

    fn space_mut(&mut self, arena: ArenaId) -> &mut Space {
        &mut self.spaces[arena.index()]
    }

    pub fn header_at(&self, address: Address) -> Header {
        self.space(address.arena).header(address.word)
    }

    pub fn set_class_at(&mut self, address: Address, class: Value) {
        self.space_mut(address.arena).words[address.word] = class.raw();
    }

    pub fn words(&self, arena: ArenaId, range: Range<usize>) -> &[u64] {
        &self.space(arena).words[range]
    }

    /// Appends a raw copy of an object, returning its new address.
    pub fn copy_object(&mut self, arena: ArenaId, words: &[u64]) -> Address {
        let space = self.space_mut(arena);
        let at = space.top();
        space.words.extend_from_slice(words);
        Address::new(arena, at)
    }

    pub fn used(&self, arena: ArenaId) -> usize {
        self.space(arena).top()
    }
}

impl ObjectModel for Arenas {
    fn scan(
        &mut self,
        arena: ArenaId,
        range: Range<usize>,
        fix: &mut dyn FnMut(&mut Self, &mut Value),
    ) {
        let mut word = range.start;
        while word < range.end {
            let header = self.space(arena).header(word);
            let slots = match header.kind {
                ObjectKind::Pointers => header.size as usize,
                ObjectKind::Bytes => 0,
                ObjectKind::Pad | ObjectKind::Forwarded => {
                    word = self.skip(Address::new(arena, word)).word;
                    continue;
                }
            };
            let class_word = std::iter::once(word);
            let slot_words = word + HEADER_WORDS..word + HEADER_WORDS + slots;
            for at in class_word.chain(slot_words) {
                let mut value = Value::from_raw(self.space(arena).words[at]);
                fix(self, &mut value);
                self.space_mut(arena).words[at] = value.raw();
            }
            word = self.skip(Address::new(arena, word)).word;
        }
    }

    fn skip(&self, address: Address) -> Address {
        let header = self.header_at(address);
        Address::new(address.arena, address.word + header.total_words())
    }

    fn mark_forwarded(&mut self, old: Address, new: Address) {
        let header = self.header_at(old);
        debug_assert!(
            matches!(header.kind, ObjectKind::Pointers | ObjectKind::Bytes),
            "forwarding a {:?} object",
            header.kind
        );
        let forwarded = Header::forwarded(Value::from_address(new), header.payload_words() as u32);
        self.space_mut(old.arena).set_header(old.word, forwarded);
    }

    fn is_forwarded(&self, address: Address) -> Option<Address> {
        self.header_at(address)
            .forwarding_address()
            .and_then(Value::address)
    }
}

#[derive(Debug)]
pub struct Heap {
    arenas: Arenas,
    settings: HeapSettings,
    next_hash: u32,
    stats: HeapStats,
}

impl Heap {
    pub fn new(info: HeapCreateInfo) -> Result<Self, &'static str> {
        let mut settings = HeapSettings::default();
        info.arena_words.inspect(|&val| settings.arena_words = val);
        info.collect_threshold
            .inspect(|&val| settings.collect_threshold = val);
        settings.validate()?;

        Ok(Self {
            arenas: Arenas::with_capacity(settings.arena_words.min(1 << 16)),
            settings,
            next_hash: 1,
            stats: HeapStats::default(),
        })
    }

    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    pub fn used_words(&self, arena: ArenaId) -> usize {
        self.arenas.used(arena)
    }

    fn next_identity_hash(&mut self) -> u32 {
        let hash = self.next_hash;
        // skips 0 on wrap, a zero hash never occurs
        self.next_hash = if hash + 1 >= HASH_LIMIT { 1 } else { hash + 1 };
        hash
    }

    fn allocate(&mut self, arena: ArenaId, class: Value, kind: ObjectKind, size: u32) -> Result<Address, HeapError> {
        let hash = self.next_identity_hash();
        let header = Header::new(class, kind, hash, size);
        let total = header.total_words();
        let used = self.arenas.used(arena);
        let capacity = self.settings.arena_words;
        if used + total > capacity {
            return Err(HeapError::Exhausted {
                arena,
                requested: total,
                used,
                capacity,
            });
        }
        let space = self.arenas.space_mut(arena);
        let word = space.bump(total);
        space.set_header(word, header);
        self.stats.allocated_objects += 1;
        self.stats.allocated_words += total as u64;
        Ok(Address::new(arena, word))
    }

    /// Allocates a pointer-bearing object with every slot nil.
    pub fn allocate_pointers(&mut self, class: Value, slots: usize) -> Result<Value, HeapError> {
        let address = self.allocate(ArenaId::Pointers, class, ObjectKind::Pointers, slots as u32)?;
        Ok(Value::from_address(address))
    }

    /// Allocates a leaf object holding a copy of `bytes`.
    pub fn allocate_bytes(&mut self, class: Value, bytes: &[u8]) -> Result<Value, HeapError> {
        let address = self.allocate(ArenaId::Leaf, class, ObjectKind::Bytes, bytes.len() as u32)?;
        let space = self.arenas.space_mut(ArenaId::Leaf);
        let payload = address.word + HEADER_WORDS;
        for (i, chunk) in bytes.chunks(8).enumerate() {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            space.words[payload + i] = u64::from_le_bytes(word);
        }
        Ok(Value::from_address(address))
    }

    fn locate(&self, object: Value) -> Address {
        match object.address() {
            Some(address) => address,
            None => panic!("expected a heap reference, got {object:?}"),
        }
    }

    pub fn header(&self, object: Value) -> Header {
        self.arenas.header_at(self.locate(object))
    }

    pub fn kind(&self, object: Value) -> ObjectKind {
        self.header(object).kind
    }

    /// Rewires the class word. Used during bootstrap only.
    pub fn set_class(&mut self, object: Value, class: Value) {
        let address = self.locate(object);
        self.arenas.set_class_at(address, class);
    }

    pub fn identity_hash(&self, object: Value) -> u32 {
        match object.as_i64() {
            Some(i) => (i as u64 % HASH_LIMIT as u64) as u32,
            None if object.is_nil() => 0,
            None => self.header(object).hash,
        }
    }

    pub fn slot_count(&self, object: Value) -> usize {
        let header = self.header(object);
        debug_assert_eq!(header.kind, ObjectKind::Pointers);
        header.size as usize
    }

    fn slot_word(&self, object: Value, index: usize) -> (ArenaId, usize) {
        let address = self.locate(object);
        let header = self.arenas.header_at(address);
        assert!(
            header.kind == ObjectKind::Pointers && index < header.size as usize,
            "slot {index} out of bounds for {:?} object of size {}",
            header.kind,
            header.size
        );
        (address.arena, address.word + HEADER_WORDS + index)
    }

    pub fn slot(&self, object: Value, index: usize) -> Value {
        let (arena, word) = self.slot_word(object, index);
        Value::from_raw(self.arenas.space(arena).words[word])
    }

    pub fn set_slot(&mut self, object: Value, index: usize, value: Value) {
        let (arena, word) = self.slot_word(object, index);
        self.arenas.space_mut(arena).words[word] = value.raw();
    }

    pub fn byte_len(&self, object: Value) -> usize {
        let header = self.header(object);
        debug_assert_eq!(header.kind, ObjectKind::Bytes);
        header.size as usize
    }

    pub fn byte_at(&self, object: Value, index: usize) -> u8 {
        let address = self.locate(object);
        let header = self.arenas.header_at(address);
        assert!(index < header.size as usize, "byte {index} out of bounds");
        let word = self.arenas.space(address.arena).words[address.word + HEADER_WORDS + index / 8];
        (word >> (8 * (index % 8))) as u8
    }

    pub fn copy_bytes_into(&self, object: Value, out: &mut Vec<u8>) {
        let address = self.locate(object);
        let header = self.arenas.header_at(address);
        let len = header.size as usize;
        let start = address.word + HEADER_WORDS;
        out.clear();
        for word in self.arenas.words(address.arena, start..start + header.payload_words()) {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.truncate(len);
    }

    pub fn bytes(&self, object: Value) -> Vec<u8> {
        let mut out = Vec::new();
        self.copy_bytes_into(object, &mut out);
        out
    }

    pub fn string(&self, object: Value) -> String {
        String::from_utf8_lossy(&self.bytes(object)).into_owned()
    }

    /// Whether any arena crossed the collection threshold.
    pub fn needs_collection(&self) -> bool {
        let limit = (self.settings.arena_words as f64 * self.settings.collect_threshold) as usize;
        ArenaId::ALL
            .iter()
            .any(|&arena| self.arenas.used(arena) > limit)
    }

    /// Runs the default collector. Every live value not reachable from
    /// `roots` is invalid afterwards.
    pub fn collect(&mut self, roots: &mut dyn RootProvider) -> Result<CollectionStats, HeapError> {
        self.collect_with(&mut CopyingCollector, roots)
    }

    pub fn collect_with(
        &mut self,
        collector: &mut dyn Collector,
        roots: &mut dyn RootProvider,
    ) -> Result<CollectionStats, HeapError> {
        let stats = collector.collect(self, roots)?;
        self.stats.collections += 1;
        self.stats.last_collection = stats;
        log::debug!(
            "collection #{}: {} words live, {} words freed",
            self.stats.collections,
            stats.live_words(),
            stats.freed_words
        );
        Ok(stats)
    }

    /// Swaps in fresh arenas and hands back the old ones.
    pub(crate) fn replace_arenas(&mut self) -> Arenas {
        let fresh = Arenas::with_capacity(self.settings.arena_words.min(1 << 16));
        std::mem::replace(&mut self.arenas, fresh)
    }

    pub(crate) fn arenas_mut(&mut self) -> &mut Arenas {
        &mut self.arenas
    }

    /// Addresses of every object in `arena`, found by linear traversal.
    pub fn objects(&self, arena: ArenaId) -> Vec<Address> {
        let mut found = Vec::new();
        let mut at = self.arenas.skip(Address::new(arena, 0));
        while at.word < self.arenas.used(arena) {
            found.push(at);
            at = self.arenas.skip(at);
        }
        found
    }

    /// Checks that every reference in both arenas names a live object header.
    /// Returns the number of objects visited.
    pub fn verify(&mut self) -> Result<usize, HeapError> {
        let mut starts = [Vec::new(), Vec::new()];
        for arena in ArenaId::ALL {
            starts[arena.index()] = self.objects(arena).into_iter().map(|a| a.word).collect();
        }
        let mut problem = None;
        for arena in ArenaId::ALL {
            let top = self.arenas.used(arena);
            self.arenas.scan(arena, FIRST_OBJECT..top, &mut |arenas, slot| {
                let Some(target) = slot.address() else { return };
                let live = starts[target.arena.index()].binary_search(&target.word).is_ok()
                    && matches!(
                        arenas.header_at(target).kind,
                        ObjectKind::Pointers | ObjectKind::Bytes
                    );
                if !live && problem.is_none() {
                    problem = Some(HeapError::Dangling {
                        arena,
                        value: *slot,
                    });
                }
            });
        }
        match problem {
            Some(err) => Err(err),
            None => Ok(starts[0].len() + starts[1].len()),
        }
    }
}
