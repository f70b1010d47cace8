//! The collector contract and a semispace copying collector written against it.
//!
//! A collector sees objects only through [`ObjectModel`]: `scan` visits the
//! references inside a range of objects, `skip` steps to the next object,
//! `mark_forwarded`/`is_forwarded` record and query relocation. Any algorithm
//! built on those four operations can stand in for [`CopyingCollector`].
use std::ops::Range;

use crate::{Address, ArenaId, Arenas, FIRST_OBJECT, Heap, HeapError, ObjectKind, RootProvider, Value};

pub trait ObjectModel {
    /// Visit every reference held by the objects starting inside `range`.
    /// `fix` may relocate the referent and rewrite the slot; it receives the
    /// model itself so it can append relocated copies while the scan runs.
    fn scan(
        &mut self,
        arena: ArenaId,
        range: Range<usize>,
        fix: &mut dyn FnMut(&mut Self, &mut Value),
    );

    /// Address of the object following the one at `address`.
    fn skip(&self, address: Address) -> Address;

    /// Overwrite the header at `old` to record that it now lives at `new`.
    fn mark_forwarded(&mut self, old: Address, new: Address);

    /// The relocation target of `address`, if it has been forwarded.
    fn is_forwarded(&self, address: Address) -> Option<Address>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectionStats {
    pub live_pointer_words: usize,
    pub live_leaf_words: usize,
    pub freed_words: usize,
}

impl CollectionStats {
    pub fn live_words(&self) -> usize {
        self.live_pointer_words + self.live_leaf_words
    }
}

pub trait Collector {
    fn collect(&mut self, heap: &mut Heap, roots: &mut dyn RootProvider) -> Result<CollectionStats, HeapError>;
}

/// Cheney style semispace collector.
///
/// Pointer objects are evacuated and then scanned breadth first. Leaf
/// objects are evacuated but never scanned; their class word is fixed at
/// evacuation time instead.
#[derive(Debug, Default)]
pub struct CopyingCollector;

impl Collector for CopyingCollector {
    fn collect(&mut self, heap: &mut Heap, roots: &mut dyn RootProvider) -> Result<CollectionStats, HeapError> {
        let capacity = heap.settings().arena_words;
        let mut from = heap.replace_arenas();
        let before = from.used(ArenaId::Pointers) + from.used(ArenaId::Leaf);
        let to = heap.arenas_mut();

        roots.visit_roots(&mut |slot| evacuate(&mut from, to, slot));

        let mut scanned = FIRST_OBJECT;
        loop {
            let top = to.used(ArenaId::Pointers);
            if scanned == top {
                break;
            }
            to.scan(ArenaId::Pointers, scanned..top, &mut |to, slot| {
                evacuate(&mut from, to, slot)
            });
            scanned = top;
        }

        for arena in ArenaId::ALL {
            let used = to.used(arena);
            if used > capacity {
                return Err(HeapError::Exhausted {
                    arena,
                    requested: 0,
                    used,
                    capacity,
                });
            }
        }

        let live_pointer_words = to.used(ArenaId::Pointers);
        let live_leaf_words = to.used(ArenaId::Leaf);
        Ok(CollectionStats {
            live_pointer_words,
            live_leaf_words,
            freed_words: before.saturating_sub(live_pointer_words + live_leaf_words),
        })
    }
}

fn evacuate(from: &mut Arenas, to: &mut Arenas, slot: &mut Value) {
    let Some(old) = slot.address() else {
        return;
    };
    if let Some(new) = from.is_forwarded(old) {
        *slot = Value::from_address(new);
        return;
    }
    let header = from.header_at(old);
    debug_assert!(
        matches!(header.kind, ObjectKind::Pointers | ObjectKind::Bytes),
        "reference to a {:?} object at {old:?}",
        header.kind
    );
    let words = from.words(old.arena, old.word..old.word + header.total_words());
    let new = to.copy_object(old.arena, words);
    from.mark_forwarded(old, new);
    if old.arena == ArenaId::Leaf {
        let mut class = header.class;
        evacuate(from, to, &mut class);
        to.set_class_at(new, class);
    }
    *slot = Value::from_address(new);
}
