//! Kernel methods, compiled by the crate's own compiler at bootstrap.
//!
//! Most methods are thin wrappers around a primitive. The True/False and
//! Block methods are the non-inlined fallbacks for the control selectors the
//! emitter inlines when it sees literal blocks.
use crate::ast::*;
use crate::{BinaryOp, Runtime, RuntimeError, Value};

/// `^primitive(name, [self, params...])`
fn wrapper(selector: &str, params: &[&str], name: &str) -> MethodNode {
    let mut args = vec![self_ref()];
    args.extend(params.iter().map(|p| var(p)));
    method(selector, params, &[], vec![ret(primitive(name, args))])
}

/// `^expr`
fn answer(selector: &str, params: &[&str], value: Expr) -> MethodNode {
    method(selector, params, &[], vec![ret(value)])
}

fn install_all(rt: &mut Runtime, class: Value, methods: Vec<MethodNode>) -> Result<(), RuntimeError> {
    for m in methods {
        rt.add_method(class, m)?;
    }
    Ok(())
}

pub fn install(rt: &mut Runtime) -> Result<(), RuntimeError> {
    let classes = rt.classes;
    install_all(rt, classes.object, object_methods())?;
    install_all(
        rt,
        classes.undefined_object,
        vec![answer("isNil", &[], true_()), answer("notNil", &[], false_())],
    )?;
    install_all(rt, classes.class, class_methods())?;
    let array_class = rt.metaclass(classes.array);
    install_all(
        rt,
        array_class,
        vec![
            wrapper("new:", &["size"], "arrayNew"),
            answer("new", &[], binary(self_ref(), "new:", int(0))),
        ],
    )?;
    let dictionary_class = rt.metaclass(classes.dictionary);
    install_all(rt, dictionary_class, vec![wrapper("new", &[], "dictionaryNew")])?;
    install_all(rt, classes.small_integer, integer_methods())?;
    install_all(rt, classes.true_class, true_methods())?;
    install_all(rt, classes.false_class, false_methods())?;
    install_all(rt, classes.block, block_methods())?;
    install_all(rt, classes.array, indexable_methods(true))?;
    install_all(rt, classes.byte_array, indexable_methods(false))?;
    let mut string = indexable_methods(false);
    string.extend([
        wrapper(",", &["other"], "stringConcat"),
        wrapper("=", &["other"], "stringEqual"),
        wrapper("asString", &[], "asString"),
        wrapper("asSymbol", &[], "asSymbol"),
    ]);
    install_all(rt, classes.string, string)?;
    install_all(
        rt,
        classes.symbol,
        vec![
            answer("=", &["other"], binary(self_ref(), "==", var("other"))),
            answer("asSymbol", &[], self_ref()),
        ],
    )?;
    install_all(
        rt,
        classes.dictionary,
        vec![
            wrapper("at:", &["key"], "dictionaryAt"),
            wrapper("at:put:", &["key", "value"], "dictionaryAtPut"),
        ],
    )?;
    install_all(
        rt,
        classes.context,
        vec![
            wrapper(crate::BLOCK_RETURN_SELECTOR, &["value"], "blockReturn"),
            wrapper("resume:", &["value"], "returnInto"),
        ],
    )?;
    install_all(rt, classes.process, process_methods())?;
    let process_class = rt.metaclass(classes.process);
    install_all(
        rt,
        process_class,
        vec![
            answer("current", &[], primitive("processCurrent", vec![])),
            answer("yield", &[], primitive("processYield", vec![])),
            answer("disableInterrupts", &[], primitive("disableInterrupts", vec![])),
            answer("enableInterrupts", &[], primitive("enableInterrupts", vec![])),
        ],
    )?;
    log::debug!("installed kernel methods");
    Ok(())
}

fn object_methods() -> Vec<MethodNode> {
    vec![
        answer("==", &["other"], binary(self_ref(), "==", var("other"))),
        answer("~~", &["other"], unary(binary(self_ref(), "==", var("other")), "not")),
        answer("=", &["other"], binary(self_ref(), "==", var("other"))),
        answer("~=", &["other"], unary(binary(self_ref(), "=", var("other")), "not")),
        wrapper("class", &[], "classOf"),
        wrapper("hash", &[], "identityHash"),
        wrapper("identityHash", &[], "identityHash"),
        answer("isNil", &[], false_()),
        answer("notNil", &[], true_()),
        answer("yourself", &[], self_ref()),
        wrapper("printString", &[], "printString"),
        wrapper("displayString", &[], "displayString"),
        method(
            "printNl",
            &[],
            &[],
            vec![primitive("transcriptShow", vec![unary(self_ref(), "printString")])],
        ),
        method("displayNl", &[], &[], vec![primitive("transcriptShow", vec![self_ref()])]),
    ]
}

fn class_methods() -> Vec<MethodNode> {
    vec![
        wrapper("basicNew", &[], "basicNew"),
        answer("new", &[], unary(self_ref(), "basicNew")),
        answer("name", &[], var("name")),
        answer("superclass", &[], var("superclass")),
    ]
}

fn integer_methods() -> Vec<MethodNode> {
    let mut methods: Vec<MethodNode> = BinaryOp::ALL
        .iter()
        .filter(|op| !matches!(op, BinaryOp::Identical | BinaryOp::Equal | BinaryOp::NotEqual))
        .map(|op| wrapper(op.selector(), &["other"], op.primitive()))
        .collect();
    // equality with a non-integer is false, not a failure
    methods.push(answer("=", &["other"], binary(self_ref(), "==", var("other"))));
    methods.push(answer(
        "~=",
        &["other"],
        unary(binary(self_ref(), "==", var("other")), "not"),
    ));
    methods.push(method(
        "timesRepeat:",
        &["body"],
        &["i"],
        vec![
            assign("i", int(1)),
            send(
                thunk(vec![binary(var("i"), "<=", self_ref())]),
                "whileTrue:",
                vec![thunk(vec![
                    unary(var("body"), "value"),
                    assign("i", binary(var("i"), "+", int(1))),
                ])],
            ),
        ],
    ));
    methods.push(method(
        "to:do:",
        &["stop", "body"],
        &["i"],
        vec![
            assign("i", self_ref()),
            send(
                thunk(vec![binary(var("i"), "<=", var("stop"))]),
                "whileTrue:",
                vec![thunk(vec![
                    binary(var("body"), "value:", var("i")),
                    assign("i", binary(var("i"), "+", int(1))),
                ])],
            ),
        ],
    ));
    methods
}

fn true_methods() -> Vec<MethodNode> {
    vec![
        answer("ifTrue:", &["then"], unary(var("then"), "value")),
        answer("ifFalse:", &["else"], nil()),
        answer("ifTrue:ifFalse:", &["then", "else"], unary(var("then"), "value")),
        answer("ifFalse:ifTrue:", &["else", "then"], unary(var("then"), "value")),
        answer("and:", &["other"], unary(var("other"), "value")),
        answer("or:", &["other"], self_ref()),
        answer("not", &[], false_()),
    ]
}

fn false_methods() -> Vec<MethodNode> {
    vec![
        answer("ifTrue:", &["then"], nil()),
        answer("ifFalse:", &["else"], unary(var("else"), "value")),
        answer("ifTrue:ifFalse:", &["then", "else"], unary(var("else"), "value")),
        answer("ifFalse:ifTrue:", &["else", "then"], unary(var("else"), "value")),
        answer("and:", &["other"], self_ref()),
        answer("or:", &["other"], unary(var("other"), "value")),
        answer("not", &[], true_()),
    ]
}

fn block_methods() -> Vec<MethodNode> {
    let value_self = || thunk(vec![unary(self_ref(), "value")]);
    let loop_until = |selector: &str| {
        answer(
            selector,
            &["body"],
            send(value_self(), selector, vec![thunk(vec![unary(var("body"), "value")])]),
        )
    };
    vec![
        wrapper("value", &[], "blockInvoke"),
        wrapper("value:", &["a"], "blockInvoke"),
        wrapper("value:value:", &["a", "b"], "blockInvoke"),
        wrapper("value:value:value:", &["a", "b", "c"], "blockInvoke"),
        answer("numArgs", &[], var("argCount")),
        loop_until("whileTrue:"),
        loop_until("whileFalse:"),
        answer("whileTrue", &[], unary(value_self(), "whileTrue")),
        answer("whileFalse", &[], unary(value_self(), "whileFalse")),
        answer("fork", &[], primitive("processFork", vec![self_ref(), nil()])),
        wrapper("forkNamed:", &["name"], "processFork"),
    ]
}

fn indexable_methods(writable: bool) -> Vec<MethodNode> {
    let mut methods = vec![
        wrapper("size", &[], "size"),
        wrapper("at:", &["index"], "at"),
    ];
    if writable {
        methods.push(wrapper("at:put:", &["index", "value"], "atPut"));
    }
    methods
}

fn process_methods() -> Vec<MethodNode> {
    vec![
        wrapper("resume", &[], "processResume"),
        wrapper("suspend", &[], "processSuspend"),
        answer("isDone", &[], binary(var("state"), "=", int(2))),
        answer("name", &[], var("name")),
    ]
}
