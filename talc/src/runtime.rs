//! The runtime context: heap, symbol table, kernel classes and globals.
//!
//! There are no process-wide singletons. Everything a running program can
//! reach hangs off one [`Runtime`] value, which the scheduler owns, so several
//! runtimes can coexist in one test binary.
//!
//! Values handed out by this API are plain heap references. They stay valid
//! until the next collection, which only happens at interpreter safepoints or
//! through [`Runtime::collect_garbage`].
use crate::ast::{ClassDefinition, Expr, MethodNode, method};
use crate::class::{
    assert_wiring, class_name, install_method, instance_variable_names, isa, superclass, wire_pair,
};
use crate::dictionary::{
    GLOBAL_DICTIONARY_BUCKETS, METHOD_DICTIONARY_BUCKETS, dictionary_at, dictionary_at_put,
    new_dictionary,
};
use crate::object::class;
use crate::{
    BinaryOp, CollectionStats, CompileError, Heap, HeapCreateInfo, HeapError, RootProvider,
    RuntimeError, SymbolTable, Value, compile_method, kernel, materialize,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeCreateInfo {
    pub heap: HeapCreateInfo,
    /// Echo Transcript lines to stdout.
    pub echo_transcript: bool,
}

struct KernelClass {
    name: &'static str,
    superclass: Option<&'static str>,
    instance_variables: &'static [&'static str],
}

const fn kernel_class(
    name: &'static str,
    superclass: Option<&'static str>,
    instance_variables: &'static [&'static str],
) -> KernelClass {
    KernelClass {
        name,
        superclass,
        instance_variables,
    }
}

/// Slots every class and metaclass carries.
pub const CLASS_INSTANCE_VARIABLES: &[&str] =
    &["name", "superclass", "methods", "instanceVariables", "instanceSize"];

// Superclasses come before their subclasses. Slot names match the layouts in
// `object.rs`.
const KERNEL_CLASSES: &[KernelClass] = &[
    kernel_class("Object", None, &[]),
    kernel_class("Class", Some("Object"), CLASS_INSTANCE_VARIABLES),
    kernel_class("UndefinedObject", Some("Object"), &[]),
    kernel_class("Boolean", Some("Object"), &[]),
    kernel_class("True", Some("Boolean"), &[]),
    kernel_class("False", Some("Boolean"), &[]),
    kernel_class("SmallInteger", Some("Object"), &[]),
    kernel_class("String", Some("Object"), &[]),
    kernel_class("Symbol", Some("String"), &[]),
    kernel_class("Array", Some("Object"), &[]),
    kernel_class("ByteArray", Some("Object"), &[]),
    kernel_class("Dictionary", Some("Object"), &["tally"]),
    kernel_class("Link", Some("Object"), &["key", "value", "next"]),
    kernel_class(
        "Method",
        Some("Object"),
        &[
            "bytecode",
            "literals",
            "argCount",
            "tempCount",
            "heapVarCount",
            "stackSize",
            "selector",
            "methodClass",
        ],
    ),
    kernel_class("Block", Some("Method"), &["receiver", "parentHeapVars", "home"]),
    kernel_class(
        "Context",
        Some("Object"),
        &["previous", "receiver", "method", "pc", "heapVars", "parentHeapVars", "home"],
    ),
    kernel_class(
        "Process",
        Some("Object"),
        &["id", "name", "link", "context", "accumulator", "state"],
    ),
];

/// The kernel classes, in [`KERNEL_CLASSES`] order.
#[derive(Debug, Clone, Copy)]
pub struct Classes {
    pub object: Value,
    pub class: Value,
    pub undefined_object: Value,
    pub boolean: Value,
    pub true_class: Value,
    pub false_class: Value,
    pub small_integer: Value,
    pub string: Value,
    pub symbol: Value,
    pub array: Value,
    pub byte_array: Value,
    pub dictionary: Value,
    pub link: Value,
    pub method: Value,
    pub block: Value,
    pub context: Value,
    pub process: Value,
}

impl Classes {
    fn from_slice(classes: &[Value]) -> Self {
        let &[
            object,
            class,
            undefined_object,
            boolean,
            true_class,
            false_class,
            small_integer,
            string,
            symbol,
            array,
            byte_array,
            dictionary,
            link,
            method,
            block,
            context,
            process,
        ] = classes
        else {
            panic!("expected {} kernel classes, got {}", KERNEL_CLASSES.len(), classes.len());
        };
        Self {
            object,
            class,
            undefined_object,
            boolean,
            true_class,
            false_class,
            small_integer,
            string,
            symbol,
            array,
            byte_array,
            dictionary,
            link,
            method,
            block,
            context,
            process,
        }
    }

    fn fields_mut(&mut self) -> [&mut Value; 17] {
        [
            &mut self.object,
            &mut self.class,
            &mut self.undefined_object,
            &mut self.boolean,
            &mut self.true_class,
            &mut self.false_class,
            &mut self.small_integer,
            &mut self.string,
            &mut self.symbol,
            &mut self.array,
            &mut self.byte_array,
            &mut self.dictionary,
            &mut self.link,
            &mut self.method,
            &mut self.block,
            &mut self.context,
            &mut self.process,
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Specials {
    pub true_object: Value,
    pub false_object: Value,
    /// The globals dictionary.
    pub smalltalk: Value,
}

/// Symbols the interpreter needs without a lookup.
#[derive(Debug, Clone, Copy)]
pub struct Selectors {
    pub block_return: Value,
    pub binary: [Value; BinaryOp::COUNT],
}

pub struct Runtime {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub classes: Classes,
    pub specials: Specials,
    pub selectors: Selectors,
    transcript: Vec<String>,
    echo: bool,
}

/// Everything the runtime itself keeps alive, plus caller supplied roots.
struct RuntimeRoots<'a> {
    symbols: &'a mut SymbolTable,
    classes: &'a mut Classes,
    specials: &'a mut Specials,
    selectors: &'a mut Selectors,
    extra: &'a mut dyn RootProvider,
}

impl RootProvider for RuntimeRoots<'_> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        self.symbols.visit_roots(visitor);
        for class in self.classes.fields_mut() {
            visitor(class);
        }
        visitor(&mut self.specials.true_object);
        visitor(&mut self.specials.false_object);
        visitor(&mut self.specials.smalltalk);
        visitor(&mut self.selectors.block_return);
        for selector in &mut self.selectors.binary {
            visitor(selector);
        }
        self.extra.visit_roots(visitor);
    }
}

impl Runtime {
    pub fn new(info: RuntimeCreateInfo) -> Result<Self, RuntimeError> {
        let mut heap = Heap::new(info.heap).map_err(RuntimeError::Config)?;

        let mut pairs = Vec::with_capacity(KERNEL_CLASSES.len());
        for _ in KERNEL_CLASSES {
            let class = heap.allocate_pointers(Value::NIL, class::SIZE)?;
            let metaclass = heap.allocate_pointers(Value::NIL, class::SIZE)?;
            pairs.push((class, metaclass));
        }
        let root = pairs[0].0;
        let root_metaclass = pairs[1].0;
        let index_of = |name: &str| KERNEL_CLASSES.iter().position(|k| k.name == name);
        for (kernel, &pair) in KERNEL_CLASSES.iter().zip(&pairs) {
            let superclass = kernel
                .superclass
                .and_then(index_of)
                .map_or(Value::NIL, |i| pairs[i].0);
            wire_pair(&mut heap, pair, superclass, root, root_metaclass);
        }

        let classes: Vec<Value> = pairs.iter().map(|&(class, _)| class).collect();
        let classes = Classes::from_slice(&classes);
        let mut symbols = SymbolTable::new();
        let block_return = symbols.intern(&mut heap, classes.symbol, crate::BLOCK_RETURN_SELECTOR)?;
        let mut binary = [Value::NIL; BinaryOp::COUNT];
        for op in BinaryOp::ALL {
            binary[op as usize] = symbols.intern(&mut heap, classes.symbol, op.selector())?;
        }
        let specials = Specials {
            true_object: heap.allocate_pointers(classes.true_class, 0)?,
            false_object: heap.allocate_pointers(classes.false_class, 0)?,
            smalltalk: new_dictionary(&mut heap, classes.dictionary, GLOBAL_DICTIONARY_BUCKETS)?,
        };

        let mut runtime = Self {
            heap,
            symbols,
            classes,
            specials,
            selectors: Selectors {
                block_return,
                binary,
            },
            transcript: Vec::new(),
            echo: info.echo_transcript,
        };

        let mut inherited: Vec<Vec<String>> = Vec::with_capacity(KERNEL_CLASSES.len());
        for (kernel, &(class, _)) in KERNEL_CLASSES.iter().zip(&pairs) {
            let mut names = kernel
                .superclass
                .and_then(index_of)
                .map(|i| inherited[i].clone())
                .unwrap_or_default();
            names.extend(kernel.instance_variables.iter().map(|n| n.to_string()));
            runtime.finish_class(class, kernel.name, &names)?;
            runtime.set_global(kernel.name, class)?;
            inherited.push(names);
        }
        for &(class, _) in &pairs {
            assert_wiring(&runtime.heap, class, root, root_metaclass);
        }
        log::debug!("bootstrapped {} kernel classes", pairs.len());

        kernel::install(&mut runtime)?;
        Ok(runtime)
    }

    /// Names, method dictionaries and instance-variable lists for a wired pair.
    fn finish_class(&mut self, class: Value, name: &str, instance_variables: &[String]) -> Result<(), HeapError> {
        let metaclass = isa(&self.heap, class);
        let class_ivars: Vec<String> = CLASS_INSTANCE_VARIABLES.iter().map(|n| n.to_string()).collect();
        for (target, target_name, ivars) in [
            (class, name.to_string(), instance_variables.to_vec()),
            (metaclass, format!("{name} class"), class_ivars),
        ] {
            let symbol = self.intern(&target_name)?;
            let methods = new_dictionary(&mut self.heap, self.classes.dictionary, METHOD_DICTIONARY_BUCKETS)?;
            let names = ivars
                .iter()
                .map(|n| self.intern(n))
                .collect::<Result<Vec<_>, _>>()?;
            let names = self.new_array(&names)?;
            let size = if target == metaclass { class::SIZE } else { ivars.len() };
            self.heap.set_slot(target, class::NAME, symbol);
            self.heap.set_slot(target, class::METHODS, methods);
            self.heap.set_slot(target, class::INSTANCE_VARIABLES, names);
            self.heap.set_slot(target, class::INSTANCE_SIZE, Value::from_usize(size));
        }
        Ok(())
    }

    /// Creates a class below `superclass` and registers it as a global.
    pub fn define_class(&mut self, name: &str, superclass: Value, instance_variables: &[&str]) -> Result<Value, RuntimeError> {
        let class = self.heap.allocate_pointers(Value::NIL, class::SIZE)?;
        let metaclass = self.heap.allocate_pointers(Value::NIL, class::SIZE)?;
        let (root, root_metaclass) = (self.classes.object, self.classes.class);
        wire_pair(&mut self.heap, (class, metaclass), superclass, root, root_metaclass);
        let mut names = instance_variable_names(&self.heap, superclass);
        for name in instance_variables {
            if names.iter().any(|n| n == name) {
                return Err(CompileError::new(format!("instance variable `{name}` already defined")).into());
            }
            names.push(name.to_string());
        }
        self.finish_class(class, name, &names)?;
        self.set_global(name, class)?;
        assert_wiring(&self.heap, class, root, root_metaclass);
        log::debug!(
            "defined class {name} < {} with {} instance variables",
            class_name(&self.heap, superclass),
            names.len()
        );
        Ok(class)
    }

    /// Compiles and installs `method` in `class`. Returns the method object.
    pub fn add_method(&mut self, class: Value, mut method: MethodNode) -> Result<Value, RuntimeError> {
        let ivars = instance_variable_names(&self.heap, class);
        let desc = compile_method(&mut method, &ivars)?;
        let compiled = materialize(self, &desc, class)?;
        let selector = self.intern(&desc.selector)?;
        install_method(&mut self.heap, self.classes.link, class, selector, compiled)?;
        log::trace!("installed {}>>{}", class_name(&self.heap, class), desc.selector);
        Ok(compiled)
    }

    /// Defines a class and all its methods.
    pub fn load_class(&mut self, definition: ClassDefinition) -> Result<Value, RuntimeError> {
        let superclass = self.global(&definition.superclass).ok_or_else(|| {
            CompileError::new(format!("unknown superclass `{}`", definition.superclass))
        })?;
        let ivars: Vec<&str> = definition.instance_variables.iter().map(String::as_str).collect();
        let class = self.define_class(&definition.name, superclass, &ivars)?;
        for method in definition.methods {
            self.add_method(class, method)?;
        }
        let metaclass = isa(&self.heap, class);
        for method in definition.class_methods {
            self.add_method(metaclass, method)?;
        }
        Ok(class)
    }

    /// Compiles a top-level statement list as a method of `UndefinedObject`
    /// without installing it. The receiver of a do-it is nil.
    pub fn compile_doit(&mut self, temps: &[&str], body: Vec<Expr>) -> Result<Value, RuntimeError> {
        let mut node = method("doIt", &[], temps, body);
        let desc = compile_method(&mut node, &[])?;
        let receiver_class = self.classes.undefined_object;
        materialize(self, &desc, receiver_class)
    }

    pub fn intern(&mut self, name: &str) -> Result<Value, HeapError> {
        self.symbols.intern(&mut self.heap, self.classes.symbol, name)
    }

    pub fn new_string(&mut self, text: &str) -> Result<Value, HeapError> {
        self.heap.allocate_bytes(self.classes.string, text.as_bytes())
    }

    pub fn new_array(&mut self, items: &[Value]) -> Result<Value, HeapError> {
        let array = self.heap.allocate_pointers(self.classes.array, items.len())?;
        for (i, &item) in items.iter().enumerate() {
            self.heap.set_slot(array, i, item);
        }
        Ok(array)
    }

    pub fn boolean(&self, value: bool) -> Value {
        if value {
            self.specials.true_object
        } else {
            self.specials.false_object
        }
    }

    /// Branch truthiness: everything but false and nil.
    pub fn is_truthy(&self, value: Value) -> bool {
        !value.is_nil() && value != self.specials.false_object
    }

    pub fn class_of(&self, value: Value) -> Value {
        if value.is_integer() {
            self.classes.small_integer
        } else if value.is_nil() {
            self.classes.undefined_object
        } else {
            isa(&self.heap, value)
        }
    }

    pub fn metaclass(&self, class: Value) -> Value {
        isa(&self.heap, class)
    }

    /// Whether `class` is `ancestor` or inherits from it.
    pub fn inherits_from(&self, class: Value, ancestor: Value) -> bool {
        let mut current = class;
        while !current.is_nil() {
            if current == ancestor {
                return true;
            }
            current = superclass(&self.heap, current);
        }
        false
    }

    pub fn is_kind_of(&self, value: Value, class: Value) -> bool {
        self.inherits_from(self.class_of(value), class)
    }

    /// Classes and metaclasses: instances of `Class` or of a metaclass.
    pub fn is_class(&self, value: Value) -> bool {
        if !value.is_reference() {
            return false;
        }
        let class = self.class_of(value);
        class == self.classes.class || self.class_of(class) == self.classes.class
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        let symbol = self.symbols.lookup(name)?;
        dictionary_at(&self.heap, self.specials.smalltalk, symbol)
    }

    pub fn set_global(&mut self, name: &str, value: Value) -> Result<(), HeapError> {
        let symbol = self.intern(name)?;
        dictionary_at_put(&mut self.heap, self.classes.link, self.specials.smalltalk, symbol, value)?;
        Ok(())
    }

    pub fn class_name(&self, class: Value) -> String {
        class_name(&self.heap, class)
    }

    /// Text of a String or Symbol.
    pub fn text(&self, value: Value) -> Option<String> {
        if value.is_reference() && self.is_kind_of(value, self.classes.string) {
            Some(self.heap.string(value))
        } else {
            None
        }
    }

    pub fn print_string(&self, value: Value) -> String {
        self.print_with_depth(value, 0)
    }

    fn print_with_depth(&self, value: Value, depth: usize) -> String {
        if let Some(n) = value.as_i64() {
            return n.to_string();
        }
        if value.is_nil() {
            return "nil".into();
        }
        if value == self.specials.true_object {
            return "true".into();
        }
        if value == self.specials.false_object {
            return "false".into();
        }
        if self.is_class(value) {
            return self.class_name(value);
        }
        let class = self.class_of(value);
        if class == self.classes.symbol {
            return format!("#{}", self.heap.string(value));
        }
        if class == self.classes.string {
            return format!("'{}'", self.heap.string(value));
        }
        if class == self.classes.array {
            if depth > 3 {
                return "(...)".into();
            }
            let items: Vec<String> = (0..self.heap.slot_count(value))
                .map(|i| self.print_with_depth(self.heap.slot(value, i), depth + 1))
                .collect();
            return format!("({})", items.join(" "));
        }
        let name = self.class_name(class);
        let article = match name.chars().next() {
            Some(c) if "AEIOU".contains(c) => "an",
            _ => "a",
        };
        format!("{article} {name}")
    }

    /// Like [`Runtime::print_string`] but strings and symbols print bare.
    pub fn display_string(&self, value: Value) -> String {
        match self.text(value) {
            Some(text) => text,
            None => self.print_string(value),
        }
    }

    /// Appends a line to the Transcript.
    pub fn show(&mut self, line: String) {
        if self.echo {
            println!("{line}");
        }
        self.transcript.push(line);
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn take_transcript(&mut self) -> Vec<String> {
        std::mem::take(&mut self.transcript)
    }

    /// Collects with the runtime's own roots plus `extra`.
    pub fn collect_garbage(&mut self, extra: &mut dyn RootProvider) -> Result<CollectionStats, HeapError> {
        let Runtime {
            heap,
            symbols,
            classes,
            specials,
            selectors,
            ..
        } = self;
        let mut roots = RuntimeRoots {
            symbols,
            classes,
            specials,
            selectors,
            extra,
        };
        heap.collect(&mut roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::class::lookup_method;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeCreateInfo::default()).expect("bootstrap")
    }

    #[test]
    fn kernel_classes_are_registered_as_globals() {
        let rt = runtime();
        assert_eq!(rt.global("Object"), Some(rt.classes.object));
        assert_eq!(rt.global("Process"), Some(rt.classes.process));
        assert_eq!(rt.class_name(rt.metaclass(rt.classes.array)), "Array class");
        assert_eq!(
            instance_variable_names(&rt.heap, rt.classes.block).len(),
            crate::object::block::SIZE
        );
        assert_eq!(
            instance_variable_names(&rt.heap, rt.classes.class).len(),
            class::SIZE
        );
    }

    #[test]
    fn immediates_have_classes() {
        let rt = runtime();
        assert_eq!(rt.class_of(Value::from_i32(3)), rt.classes.small_integer);
        assert_eq!(rt.class_of(Value::NIL), rt.classes.undefined_object);
        assert_eq!(rt.class_of(rt.specials.true_object), rt.classes.true_class);
        assert!(rt.is_kind_of(rt.specials.false_object, rt.classes.boolean));
    }

    #[test]
    fn define_class_inherits_instance_variables() {
        let mut rt = runtime();
        let object = rt.classes.object;
        let animal = rt.define_class("Animal", object, &["name"]).unwrap();
        let dog = rt.define_class("Dog", animal, &["tricks"]).unwrap();
        assert_eq!(instance_variable_names(&rt.heap, dog), vec!["name", "tricks"]);
        assert_eq!(superclass(&rt.heap, rt.metaclass(dog)), rt.metaclass(animal));
        assert!(rt.define_class("Bad", dog, &["name"]).is_err());
    }

    #[test]
    fn added_methods_are_found_by_symbol_identity() {
        let mut rt = runtime();
        let object = rt.classes.object;
        let animal = rt.define_class("Animal", object, &[]).unwrap();
        let compiled = rt.add_method(animal, method("speak", &[], &[], vec![ret(int(1))])).unwrap();
        let spelled = format!("{}{}", "spe", "ak");
        let selector = rt.intern(&spelled).unwrap();
        assert_eq!(lookup_method(&rt.heap, animal, selector), Some((compiled, animal)));
    }

    #[test]
    fn print_strings() {
        let mut rt = runtime();
        let s = rt.new_string("hi").unwrap();
        let sym = rt.intern("hi").unwrap();
        let arr = rt.new_array(&[Value::from_i32(1), s, sym, Value::NIL]).unwrap();
        assert_eq!(rt.print_string(arr), "(1 'hi' #hi nil)");
        assert_eq!(rt.print_string(rt.classes.object), "Object");
        assert_eq!(rt.display_string(s), "hi");
        let obj = rt.heap.allocate_pointers(rt.classes.object, 0).unwrap();
        assert_eq!(rt.print_string(obj), "an Object");
    }

    #[test]
    fn collection_keeps_kernel_reachable() {
        let mut rt = runtime();
        for _ in 0..100 {
            rt.new_string("garbage").unwrap();
        }
        let before = rt.heap.used_words(crate::ArenaId::Leaf);
        rt.collect_garbage(&mut Vec::new()).unwrap();
        assert!(rt.heap.used_words(crate::ArenaId::Leaf) < before);
        rt.heap.verify().unwrap();
        assert_eq!(rt.global("Object"), Some(rt.classes.object));
        assert_eq!(rt.class_name(rt.classes.symbol), "Symbol");
    }
}
