use std::collections::HashMap;

use crate::{Heap, HeapError, RootProvider, Value};

/// The global symbol table.
///
/// Every selector and identifier is interned here exactly once, so the
/// dispatch path compares symbols by identity only. The table owns the only
/// Rust-side references to symbols and reports them as roots.
pub struct SymbolTable {
    symbols: HashMap<Box<str>, Value, ahash::RandomState>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            symbols: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Returns the symbol spelled `name`, allocating it on first use.
    pub fn intern(&mut self, heap: &mut Heap, symbol_class: Value, name: &str) -> Result<Value, HeapError> {
        if let Some(&symbol) = self.symbols.get(name) {
            return Ok(symbol);
        }
        let symbol = heap.allocate_bytes(symbol_class, name.as_bytes())?;
        self.symbols.insert(name.into(), symbol);
        Ok(symbol)
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.symbols.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RootProvider for SymbolTable {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for symbol in self.symbols.values_mut() {
            visitor(symbol);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeapCreateInfo;

    #[test]
    fn same_spelling_yields_same_symbol() {
        let mut heap = Heap::new(HeapCreateInfo::default()).unwrap();
        let mut table = SymbolTable::new();
        let a = table.intern(&mut heap, Value::NIL, "value:").unwrap();
        let spelled = String::from("val") + "ue:";
        let b = table.intern(&mut heap, Value::NIL, &spelled).unwrap();
        let c = table.intern(&mut heap, Value::NIL, "value").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
        assert_eq!(heap.string(a), "value:");
    }

    #[test]
    fn symbols_survive_collection_as_roots() {
        let mut heap = Heap::new(HeapCreateInfo::default()).unwrap();
        let mut table = SymbolTable::new();
        heap.allocate_bytes(Value::NIL, b"garbage").unwrap();
        table.intern(&mut heap, Value::NIL, "ifTrue:").unwrap();
        heap.collect(&mut table).unwrap();
        let symbol = table.lookup("ifTrue:").unwrap();
        assert_eq!(heap.string(symbol), "ifTrue:");
        let again = table.intern(&mut heap, Value::NIL, "ifTrue:").unwrap();
        assert_eq!(again, symbol);
    }
}
