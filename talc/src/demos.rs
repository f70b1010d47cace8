//! Named demo programs for the `talc` binary, built directly as syntax trees.
use crate::ast::*;
use crate::class::instance_variable_names;
use crate::{CLASS_INSTANCE_VARIABLES, CompileError, Runtime, RuntimeError, Scheduler, compile_method};

/// A top-level statement list run as its own process.
#[derive(Debug, Clone)]
pub struct DoIt {
    pub name: String,
    pub temps: Vec<String>,
    pub body: Vec<Expr>,
}

impl DoIt {
    pub fn new(name: &str, temps: &[&str], body: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            temps: temps.iter().map(|t| t.to_string()).collect(),
            body,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub classes: Vec<ClassDefinition>,
    pub doits: Vec<DoIt>,
}

impl Program {
    /// Defines the classes and queues one process per do-it, in order.
    /// Returns the process ids.
    pub fn load(self, scheduler: &mut Scheduler) -> Result<Vec<u64>, RuntimeError> {
        for class in self.classes {
            scheduler.runtime_mut().load_class(class)?;
        }
        let mut ids = Vec::with_capacity(self.doits.len());
        for doit in self.doits {
            let temps: Vec<&str> = doit.temps.iter().map(String::as_str).collect();
            let method = scheduler.runtime_mut().compile_doit(&temps, doit.body)?;
            ids.push(scheduler.spawn_method(method, crate::Value::NIL, &doit.name)?);
        }
        Ok(ids)
    }

    /// Renders every method and do-it without installing anything.
    pub fn disassemble(&self, rt: &Runtime) -> Result<String, CompileError> {
        let mut out = String::new();
        for class in &self.classes {
            let ivars = self.instance_variables(rt, &class.name);
            let class_ivars: Vec<String> = CLASS_INSTANCE_VARIABLES.iter().map(|s| s.to_string()).collect();
            let sides = [(&class.methods, &ivars, ""), (&class.class_methods, &class_ivars, " class")];
            for (methods, ivars, side) in sides {
                for node in methods {
                    let desc = compile_method(&mut node.clone(), ivars)?;
                    out.push_str(&format!("{}{side}>>{}\n", class.name, desc.selector));
                    out.push_str(&render(&desc)?);
                }
            }
        }
        for doit in &self.doits {
            let temps: Vec<&str> = doit.temps.iter().map(String::as_str).collect();
            let mut node = method("doIt", &[], &temps, doit.body.clone());
            let desc = compile_method(&mut node, &[])?;
            out.push_str(&format!("{}\n", doit.name));
            out.push_str(&render(&desc)?);
        }
        Ok(out)
    }

    /// Instance variable names of `class`, searching this program first and
    /// then the runtime's globals.
    fn instance_variables(&self, rt: &Runtime, class: &str) -> Vec<String> {
        match self.classes.iter().find(|c| c.name == class) {
            Some(definition) => {
                let mut names = self.instance_variables(rt, &definition.superclass);
                names.extend(definition.instance_variables.iter().cloned());
                names
            }
            None => rt
                .global(class)
                .map(|c| instance_variable_names(&rt.heap, c))
                .unwrap_or_default(),
        }
    }
}

fn render(desc: &crate::CodeDesc) -> Result<String, CompileError> {
    desc.disassemble().map_err(|err| CompileError::new(err.to_string()))
}

pub struct Demo {
    pub name: &'static str,
    pub about: &'static str,
    /// Run when no demo is named on the command line.
    pub by_default: bool,
    /// Print string of the first do-it's result.
    pub answer: Option<&'static str>,
    pub program: fn() -> Program,
}

pub const DEMOS: &[Demo] = &[
    Demo {
        name: "arithmetic",
        about: "a single inlined binary op",
        by_default: true,
        answer: Some("3"),
        program: arithmetic,
    },
    Demo {
        name: "loop",
        about: "whileTrue: compiled to branches",
        by_default: true,
        answer: Some("5"),
        program: counting_loop,
    },
    Demo {
        name: "closure",
        about: "a block capturing a method temporary",
        by_default: true,
        answer: Some("13"),
        program: closure,
    },
    Demo {
        name: "nested",
        about: "a temporary assigned two blocks down",
        by_default: true,
        answer: Some("111"),
        program: nested_capture,
    },
    Demo {
        name: "return",
        about: "non-local return out of to:do:",
        by_default: true,
        answer: Some("700"),
        program: non_local_return,
    },
    Demo {
        name: "super",
        about: "super sends up a user-defined hierarchy",
        by_default: true,
        answer: Some("'a dog, which is an animal'"),
        program: super_send_demo,
    },
    Demo {
        name: "processes",
        about: "two forked processes taking turns",
        by_default: true,
        answer: Some("0"),
        program: processes,
    },
    Demo {
        name: "gc",
        about: "allocation churn across collections",
        by_default: true,
        answer: Some("'kept after 20000'"),
        program: churn,
    },
    Demo {
        name: "dnu",
        about: "an unknown selector aborts with a Context trace",
        by_default: false,
        answer: None,
        program: does_not_understand,
    },
];

pub fn find(name: &str) -> Option<&'static Demo> {
    DEMOS.iter().find(|demo| demo.name == name)
}

fn single(temps: &[&str], body: Vec<Expr>) -> Program {
    Program {
        classes: Vec::new(),
        doits: vec![DoIt::new("doIt", temps, body)],
    }
}

fn class(name: &str, superclass: &str, instance_variables: &[&str], methods: Vec<MethodNode>) -> ClassDefinition {
    ClassDefinition {
        name: name.into(),
        superclass: superclass.into(),
        instance_variables: instance_variables.iter().map(|v| v.to_string()).collect(),
        methods,
        class_methods: Vec::new(),
    }
}

fn arithmetic() -> Program {
    single(&[], vec![ret(binary(int(1), "+", int(2)))])
}

fn counting_loop() -> Program {
    single(
        &["i"],
        vec![
            assign("i", int(0)),
            send(
                thunk(vec![binary(var("i"), "<", int(5))]),
                "whileTrue:",
                vec![thunk(vec![assign("i", binary(var("i"), "+", int(1)))])],
            ),
            ret(var("i")),
        ],
    )
}

fn closure() -> Program {
    single(
        &["base", "adder"],
        vec![
            assign("base", int(10)),
            assign("adder", block(&["x"], &[], vec![binary(var("base"), "+", var("x"))])),
            ret(binary(var("adder"), "value:", int(3))),
        ],
    )
}

fn nested_capture() -> Program {
    // a := 1. [:b | [:c | a := a + b + c] value: 100] value: 10. ^a
    let inner = block(
        &["c"],
        &[],
        vec![assign("a", binary(binary(var("a"), "+", var("b")), "+", var("c")))],
    );
    let outer = block(&["b"], &[], vec![binary(inner, "value:", int(100))]);
    single(
        &["a"],
        vec![assign("a", int(1)), binary(outer, "value:", int(10)), ret(var("a"))],
    )
}

fn non_local_return() -> Program {
    let find = method(
        "find:",
        &["n"],
        &[],
        vec![
            send(
                int(1),
                "to:do:",
                vec![
                    int(10),
                    block(
                        &["i"],
                        &[],
                        vec![send(
                            binary(var("i"), "=", var("n")),
                            "ifTrue:",
                            vec![thunk(vec![ret(binary(var("i"), "*", int(100)))])],
                        )],
                    ),
                ],
            ),
            ret(int(0)),
        ],
    );
    Program {
        classes: vec![class("Finder", "Object", &[], vec![find])],
        doits: vec![DoIt::new(
            "doIt",
            &[],
            vec![ret(binary(unary(var("Finder"), "new"), "find:", int(7)))],
        )],
    }
}

fn super_send_demo() -> Program {
    let animal = class(
        "Animal",
        "Object",
        &["kind"],
        vec![
            method("kind", &[], &[], vec![ret(var("kind"))]),
            method("describe", &[], &[], vec![ret(string("an animal"))]),
        ],
    );
    let dog = class(
        "Dog",
        "Animal",
        &[],
        vec![
            method("initialize", &[], &[], vec![assign("kind", string("a dog"))]),
            method(
                "describe",
                &[],
                &[],
                vec![ret(binary(
                    binary(var("kind"), ",", string(", which is ")),
                    ",",
                    super_send("describe", vec![]),
                ))],
            ),
        ],
    );
    Program {
        classes: vec![animal, dog],
        doits: vec![DoIt::new(
            "doIt",
            &["dog"],
            vec![
                assign("dog", unary(var("Dog"), "new")),
                unary(var("dog"), "initialize"),
                ret(unary(var("dog"), "describe")),
            ],
        )],
    }
}

fn chatty(tag: &str) -> Expr {
    let line = binary(string(tag), ",", unary(var("i"), "printString"));
    send(
        int(1),
        "to:do:",
        vec![
            int(3),
            block(
                &["i"],
                &[],
                vec![unary(line, "displayNl"), unary(var("Process"), "yield")],
            ),
        ],
    )
}

fn processes() -> Program {
    let fork = |tag: &str| binary(thunk(vec![chatty(tag)]), "forkNamed:", string(tag));
    single(&[], vec![fork("ping "), fork("pong "), ret(int(0))])
}

fn churn() -> Program {
    single(
        &["keep", "junk", "i"],
        vec![
            assign("keep", binary(var("Array"), "new:", int(3))),
            send(var("keep"), "at:put:", vec![int(1), string("kept")]),
            assign("i", int(0)),
            send(
                thunk(vec![binary(var("i"), "<", int(20000))]),
                "whileTrue:",
                vec![thunk(vec![
                    assign("junk", binary(var("Array"), "new:", int(50))),
                    send(var("junk"), "at:put:", vec![int(1), var("keep")]),
                    assign("i", binary(var("i"), "+", int(1))),
                ])],
            ),
            ret(binary(
                binary(binary(var("keep"), "at:", int(1)), ",", string(" after ")),
                ",",
                unary(var("i"), "printString"),
            )),
        ],
    )
}

fn does_not_understand() -> Program {
    single(&[], vec![ret(unary(int(3), "frobnicate"))])
}
