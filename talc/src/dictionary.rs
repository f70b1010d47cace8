//! Identity dictionaries used for method tables and the `Smalltalk` globals.
//!
//! A dictionary is a pointer object `[tally, bucket0, bucket1, ...]`. The key's
//! identity hash picks a bucket; each bucket heads an intrusive chain of
//! `Link` objects `[key, value, next]`. The bucket count is fixed when the
//! dictionary is created and never changes, chains just grow.
use crate::object::{dictionary, link};
use crate::{Heap, HeapError, Value};

pub const METHOD_DICTIONARY_BUCKETS: usize = 32;
pub const GLOBAL_DICTIONARY_BUCKETS: usize = 128;

pub fn new_dictionary(heap: &mut Heap, class: Value, buckets: usize) -> Result<Value, HeapError> {
    debug_assert!(buckets > 0);
    let dict = heap.allocate_pointers(class, dictionary::BUCKETS + buckets)?;
    heap.set_slot(dict, dictionary::TALLY, Value::from_i32(0));
    Ok(dict)
}

fn bucket_slot(heap: &Heap, dict: Value, key: Value) -> usize {
    let buckets = heap.slot_count(dict) - dictionary::BUCKETS;
    dictionary::BUCKETS + heap.identity_hash(key) as usize % buckets
}

/// The link holding `key`, found by identity.
pub fn dictionary_link(heap: &Heap, dict: Value, key: Value) -> Option<Value> {
    let mut link = heap.slot(dict, bucket_slot(heap, dict, key));
    while !link.is_nil() {
        if heap.slot(link, link::KEY) == key {
            return Some(link);
        }
        link = heap.slot(link, link::NEXT);
    }
    None
}

pub fn dictionary_at(heap: &Heap, dict: Value, key: Value) -> Option<Value> {
    dictionary_link(heap, dict, key).map(|link| heap.slot(link, link::VALUE))
}

/// Inserts or replaces. New links are pushed at the head of their chain.
pub fn dictionary_at_put(
    heap: &mut Heap,
    link_class: Value,
    dict: Value,
    key: Value,
    value: Value,
) -> Result<Value, HeapError> {
    if let Some(link) = dictionary_link(heap, dict, key) {
        heap.set_slot(link, link::VALUE, value);
        return Ok(link);
    }
    let new = heap.allocate_pointers(link_class, link::SIZE)?;
    let slot = bucket_slot(heap, dict, key);
    heap.set_slot(new, link::KEY, key);
    heap.set_slot(new, link::VALUE, value);
    heap.set_slot(new, link::NEXT, heap.slot(dict, slot));
    heap.set_slot(dict, slot, new);
    let tally = heap.slot(dict, dictionary::TALLY).as_i64().unwrap_or(0);
    heap.set_slot(dict, dictionary::TALLY, Value::from_i64(tally + 1).unwrap_or(Value::NIL));
    Ok(new)
}

pub fn dictionary_len(heap: &Heap, dict: Value) -> usize {
    heap.slot(dict, dictionary::TALLY).as_usize().unwrap_or(0)
}

/// Keys in bucket order.
pub fn dictionary_keys(heap: &Heap, dict: Value) -> Vec<Value> {
    let mut keys = Vec::new();
    for slot in dictionary::BUCKETS..heap.slot_count(dict) {
        let mut link = heap.slot(dict, slot);
        while !link.is_nil() {
            keys.push(heap.slot(link, link::KEY));
            link = heap.slot(link, link::NEXT);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeapCreateInfo;

    fn heap() -> Heap {
        Heap::new(HeapCreateInfo::default()).unwrap()
    }

    #[test]
    fn lookup_is_by_identity() {
        let mut heap = heap();
        let dict = new_dictionary(&mut heap, Value::NIL, 8).unwrap();
        let k1 = heap.allocate_bytes(Value::NIL, b"size").unwrap();
        let k2 = heap.allocate_bytes(Value::NIL, b"size").unwrap();
        dictionary_at_put(&mut heap, Value::NIL, dict, k1, Value::from_i32(1)).unwrap();
        assert_eq!(dictionary_at(&heap, dict, k1), Some(Value::from_i32(1)));
        assert_eq!(dictionary_at(&heap, dict, k2), None, "equal bytes, different identity");
    }

    #[test]
    fn collisions_chain_without_resizing() {
        let mut heap = heap();
        let dict = new_dictionary(&mut heap, Value::NIL, 1).unwrap();
        let keys: Vec<Value> = (0..20)
            .map(|_| heap.allocate_pointers(Value::NIL, 0).unwrap())
            .collect();
        for (i, &key) in keys.iter().enumerate() {
            dictionary_at_put(&mut heap, Value::NIL, dict, key, Value::from_usize(i)).unwrap();
        }
        assert_eq!(heap.slot_count(dict), dictionary::BUCKETS + 1);
        assert_eq!(dictionary_len(&heap, dict), 20);
        for (i, &key) in keys.iter().enumerate() {
            assert_eq!(dictionary_at(&heap, dict, key), Some(Value::from_usize(i)));
        }
    }

    #[test]
    fn at_put_replaces_existing_value() {
        let mut heap = heap();
        let dict = new_dictionary(&mut heap, Value::NIL, 4).unwrap();
        let key = heap.allocate_pointers(Value::NIL, 0).unwrap();
        let first = dictionary_at_put(&mut heap, Value::NIL, dict, key, Value::from_i32(1)).unwrap();
        let second = dictionary_at_put(&mut heap, Value::NIL, dict, key, Value::from_i32(2)).unwrap();
        assert_eq!(first, second);
        assert_eq!(dictionary_len(&heap, dict), 1);
        assert_eq!(dictionary_keys(&heap, dict), vec![key]);
        assert_eq!(dictionary_at(&heap, dict, key), Some(Value::from_i32(2)));
    }
}
