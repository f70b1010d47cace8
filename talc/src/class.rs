//! Class objects, metaclass wiring and method lookup.
//!
//! A class is a pointer object laid out by [`crate::object::class`]. Its
//! header class word is its metaclass. Wiring follows one fixed rule, applied
//! once per class/metaclass pair when the pair is created:
//!
//! - `class.isa = metaclass` and `metaclass.isa = Class`
//! - `class.super = super`
//! - `metaclass.super = super.isa`, or `Class` when `super` is `Object`
//! - `Object class` has `Object` as its superclass, which ends every chain
use crate::dictionary::{dictionary_at, dictionary_at_put, dictionary_keys};
use crate::object::class;
use crate::{Heap, HeapError, Value};

/// Header class word of `object`. Callers handle immediates themselves.
pub fn isa(heap: &Heap, object: Value) -> Value {
    heap.header(object).class
}

pub fn superclass(heap: &Heap, class: Value) -> Value {
    heap.slot(class, class::SUPERCLASS)
}

pub fn class_name(heap: &Heap, class: Value) -> String {
    let name = heap.slot(class, class::NAME);
    if name.is_nil() {
        return "<unnamed>".into();
    }
    heap.string(name)
}

pub fn instance_size(heap: &Heap, class: Value) -> usize {
    heap.slot(class, class::INSTANCE_SIZE).as_usize().unwrap_or(0)
}

pub fn instance_variable_names(heap: &Heap, class: Value) -> Vec<String> {
    let names = heap.slot(class, class::INSTANCE_VARIABLES);
    if names.is_nil() {
        return Vec::new();
    }
    (0..heap.slot_count(names))
        .map(|i| heap.string(heap.slot(names, i)))
        .collect()
}

/// Wires a freshly allocated pair below `superclass`.
pub fn wire_pair(heap: &mut Heap, pair: (Value, Value), superclass: Value, root: Value, root_metaclass: Value) {
    let (class, metaclass) = pair;
    heap.set_class(class, metaclass);
    heap.set_class(metaclass, root_metaclass);
    heap.set_slot(class, class::SUPERCLASS, superclass);
    let meta_super = if superclass.is_nil() {
        root
    } else if superclass == root {
        root_metaclass
    } else {
        isa(heap, superclass)
    };
    heap.set_slot(metaclass, class::SUPERCLASS, meta_super);
}

/// Panics unless `class` and its metaclass follow the wiring rule.
pub fn assert_wiring(heap: &Heap, class: Value, root: Value, root_metaclass: Value) {
    let metaclass = isa(heap, class);
    let name = class_name(heap, class);
    assert_eq!(
        isa(heap, metaclass),
        root_metaclass,
        "metaclass of {name} is not an instance of Class"
    );
    let sup = superclass(heap, class);
    let expected = if sup.is_nil() {
        assert_eq!(class, root, "{name} has no superclass but is not the root");
        root
    } else if sup == root {
        root_metaclass
    } else {
        isa(heap, sup)
    };
    assert_eq!(
        superclass(heap, metaclass),
        expected,
        "metaclass of {name} has the wrong superclass"
    );
}

/// Finds `selector` starting at `class` and walking superclasses. Returns the
/// method and the class that defines it.
pub fn lookup_method(heap: &Heap, class: Value, selector: Value) -> Option<(Value, Value)> {
    let mut current = class;
    while !current.is_nil() {
        let methods = heap.slot(current, class::METHODS);
        if !methods.is_nil() {
            if let Some(method) = dictionary_at(heap, methods, selector) {
                return Some((method, current));
            }
        }
        current = superclass(heap, current);
    }
    None
}

pub fn install_method(
    heap: &mut Heap,
    link_class: Value,
    class: Value,
    selector: Value,
    method: Value,
) -> Result<(), HeapError> {
    let methods = heap.slot(class, class::METHODS);
    dictionary_at_put(heap, link_class, methods, selector, method)?;
    Ok(())
}

pub fn selectors(heap: &Heap, class: Value) -> Vec<Value> {
    let methods = heap.slot(class, class::METHODS);
    if methods.is_nil() {
        return Vec::new();
    }
    dictionary_keys(heap, methods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::new_dictionary;
    use crate::HeapCreateInfo;

    struct Fixture {
        heap: Heap,
        object: Value,
        class: Value,
    }

    fn pair(heap: &mut Heap) -> (Value, Value) {
        (
            heap.allocate_pointers(Value::NIL, class::SIZE).unwrap(),
            heap.allocate_pointers(Value::NIL, class::SIZE).unwrap(),
        )
    }

    fn fixture() -> Fixture {
        let mut heap = Heap::new(HeapCreateInfo::default()).unwrap();
        let (object, object_meta) = pair(&mut heap);
        let (class, class_meta) = pair(&mut heap);
        // root_metaclass is not known yet when Object is wired
        wire_pair(&mut heap, (object, object_meta), Value::NIL, object, class);
        wire_pair(&mut heap, (class, class_meta), object, object, class);
        Fixture { heap, object, class }
    }

    fn subclass(f: &mut Fixture, superclass: Value) -> (Value, Value) {
        let p = pair(&mut f.heap);
        wire_pair(&mut f.heap, p, superclass, f.object, f.class);
        let methods = new_dictionary(&mut f.heap, Value::NIL, 4).unwrap();
        f.heap.set_slot(p.0, class::METHODS, methods);
        p
    }

    #[test]
    fn pairs_follow_the_wiring_rule() {
        let mut f = fixture();
        let object = f.object;
        let (a, a_meta) = subclass(&mut f, object);
        let (b, b_meta) = subclass(&mut f, a);
        assert_eq!(superclass(&f.heap, a_meta), f.class);
        assert_eq!(superclass(&f.heap, b_meta), a_meta);
        assert_eq!(superclass(&f.heap, isa(&f.heap, f.object)), f.object);
        for class in [f.object, f.class, a, b] {
            assert_wiring(&f.heap, class, f.object, f.class);
        }
    }

    #[test]
    #[should_panic(expected = "wrong superclass")]
    fn broken_wiring_is_caught() {
        let mut f = fixture();
        let object = f.object;
        let (a, _) = subclass(&mut f, object);
        let (b, b_meta) = subclass(&mut f, a);
        f.heap.set_slot(b_meta, class::SUPERCLASS, f.class);
        assert_wiring(&f.heap, b, f.object, f.class);
    }

    #[test]
    fn lookup_walks_to_the_defining_ancestor() {
        let mut f = fixture();
        let object = f.object;
        let (a, _) = subclass(&mut f, object);
        let (b, _) = subclass(&mut f, a);
        let (c, _) = subclass(&mut f, b);
        let [greet, other, unrelated] = [1, 2, 3].map(|_| f.heap.allocate_bytes(Value::NIL, b"sel").unwrap());
        let method = Value::from_i32(42);
        install_method(&mut f.heap, Value::NIL, a, greet, method).unwrap();
        install_method(&mut f.heap, Value::NIL, b, unrelated, Value::from_i32(1)).unwrap();
        install_method(&mut f.heap, Value::NIL, c, other, Value::from_i32(2)).unwrap();

        assert_eq!(lookup_method(&f.heap, c, greet), Some((method, a)));
        let missing = f.heap.allocate_bytes(Value::NIL, b"sel").unwrap();
        assert_eq!(lookup_method(&f.heap, c, missing), None, "equal spelling is not identity");
        assert_eq!(selectors(&f.heap, b), vec![unrelated]);
    }
}
