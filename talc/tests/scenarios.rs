use std::time::Duration;

use talc::ast::*;
use talc::demos::{DoIt, Program};
use talc::object::process;
use talc::{
    HeapCreateInfo, ProcessList, Runtime, RuntimeCreateInfo, RuntimeError, Scheduler, SchedulerSettings, Value,
};

fn scheduler_with(info: RuntimeCreateInfo, time_slice: Option<Duration>) -> Scheduler {
    let runtime = Runtime::new(info).unwrap();
    Scheduler::new(runtime, SchedulerSettings { time_slice })
}

fn scheduler() -> Scheduler {
    scheduler_with(RuntimeCreateInfo::default(), None)
}

/// Runs a single do-it and answers the print string of its value.
fn print_it(temps: &[&str], body: Vec<Expr>) -> String {
    let mut sched = scheduler();
    let value = sched.evaluate(temps, body).unwrap();
    sched.runtime().print_string(value)
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

fn run_program(sched: &mut Scheduler, classes: Vec<ClassDefinition>, doits: Vec<DoIt>) -> Result<Vec<u64>, RuntimeError> {
    let ids = Program { classes, doits }.load(sched)?;
    sched.run()?;
    Ok(ids)
}

#[test]
fn one_plus_two() {
    assert_eq!(print_it(&[], vec![ret(binary(int(1), "+", int(2)))]), "3");
}

#[test]
fn inlined_loop_counts_to_five() {
    let body = vec![
        assign("i", int(0)),
        send(
            thunk(vec![binary(var("i"), "<", int(5))]),
            "whileTrue:",
            vec![thunk(vec![assign("i", binary(var("i"), "+", int(1)))])],
        ),
        ret(var("i")),
    ];
    assert_eq!(print_it(&["i"], body), "5");
}

#[test]
fn closure_reads_a_captured_temporary() {
    let body = vec![
        assign("base", int(10)),
        assign("adder", block(&["x"], &[], vec![binary(var("base"), "+", var("x"))])),
        ret(binary(var("adder"), "value:", int(3))),
    ];
    assert_eq!(print_it(&["base", "adder"], body), "13");
}

#[test]
fn unknown_selector_aborts_with_the_context_chain() {
    let mut sched = scheduler();
    let err = sched.evaluate(&[], vec![ret(unary(int(3), "frobnicate"))]).unwrap_err();
    match &err {
        RuntimeError::MessageNotUnderstood { class, selector, trace } => {
            assert_eq!(class, "SmallInteger");
            assert_eq!(selector, "frobnicate");
            assert_eq!(trace.frames, ["UndefinedObject>>doIt"]);
        }
        other => panic!("expected a does-not-understand, got {other}"),
    }
    assert!(err.to_string().contains("UndefinedObject>>doIt"));
}

#[test]
fn captured_temporaries_chain_through_three_block_levels() {
    // a := 1.
    // r := [:b | [:c | [:d | a := a + d] value: c. a := a * 2] value: b. a] value: 5.
    // ^r + (a * 1000)
    let innermost = block(&["d"], &[], vec![assign("a", binary(var("a"), "+", var("d")))]);
    let middle = block(
        &["c"],
        &[],
        vec![
            binary(innermost, "value:", var("c")),
            assign("a", binary(var("a"), "*", int(2))),
        ],
    );
    let outer = block(&["b"], &[], vec![binary(middle, "value:", var("b")), var("a")]);
    let body = vec![
        assign("a", int(1)),
        assign("r", binary(outer, "value:", int(5))),
        ret(binary(var("r"), "+", binary(var("a"), "*", int(1000)))),
    ];
    assert_eq!(print_it(&["a", "r"], body), "12012");
}

#[test]
fn closure_mutates_a_captured_temporary() {
    // x := 10. [:y | x := x + y] value: 3. ^x
    let body = vec![
        assign("x", int(10)),
        binary(
            block(&["y"], &[], vec![assign("x", binary(var("x"), "+", var("y")))]),
            "value:",
            int(3),
        ),
        ret(var("x")),
    ];
    assert_eq!(print_it(&["x"], body), "13");
}

#[test]
fn chaining_block_sees_what_its_nested_block_wrote() {
    // a := 1. ^[[a := 7] value. a] value
    let body = vec![
        assign("a", int(1)),
        ret(unary(
            thunk(vec![unary(thunk(vec![assign("a", int(7))]), "value"), var("a")]),
            "value",
        )),
    ];
    assert_eq!(print_it(&["a"], body), "7");

    // a := 1. [[a := a + 5] value. a := a * 2] value. ^a
    let body = vec![
        assign("a", int(1)),
        unary(
            thunk(vec![
                unary(thunk(vec![assign("a", binary(var("a"), "+", int(5)))]), "value"),
                assign("a", binary(var("a"), "*", int(2))),
            ]),
            "value",
        ),
        ret(var("a")),
    ];
    assert_eq!(print_it(&["a"], body), "12");
}

#[test]
fn every_level_reads_and_assigns_a_chained_temporary() {
    // a := 1.
    // [a := a + 1.
    //  [a := a * 10.
    //   [a := a + 3. [a := a * 2] value. a := a + 1] value.
    //   a := a * 2] value.
    //  a := a + 6] value.
    // ^a
    let update = |op: &str, n: i64| assign("a", binary(var("a"), op, int(n)));
    let level4 = thunk(vec![update("*", 2)]);
    let level3 = thunk(vec![update("+", 3), unary(level4, "value"), update("+", 1)]);
    let level2 = thunk(vec![update("*", 10), unary(level3, "value"), update("*", 2)]);
    let level1 = thunk(vec![update("+", 1), unary(level2, "value"), update("+", 6)]);
    let body = vec![assign("a", int(1)), unary(level1, "value"), ret(var("a"))];
    assert_eq!(print_it(&["a"], body), "100");
}

#[test]
fn sibling_closure_writes_survive_a_chaining_block() {
    // x := 0. inc := [x := x + 1].
    // r := [inc value. [x] value] value.
    // ^r * 10 + x
    let body = vec![
        assign("x", int(0)),
        assign("inc", thunk(vec![assign("x", binary(var("x"), "+", int(1)))])),
        assign(
            "r",
            unary(
                thunk(vec![unary(var("inc"), "value"), unary(thunk(vec![var("x")]), "value")]),
                "value",
            ),
        ),
        ret(binary(binary(var("r"), "*", int(10)), "+", var("x"))),
    ];
    assert_eq!(print_it(&["x", "inc", "r"], body), "11");
}

#[test]
fn non_local_return_restores_the_blocks_it_unwinds() {
    // x := 0. Peek := [x]. [[x := 5. ^1] value] value. ^2
    let mut sched = scheduler();
    let body = vec![
        assign("x", int(0)),
        assign("Peek", thunk(vec![var("x")])),
        unary(
            thunk(vec![unary(thunk(vec![assign("x", int(5)), ret(int(1))]), "value")]),
            "value",
        ),
        ret(int(2)),
    ];
    assert_eq!(sched.evaluate(&["x"], body).unwrap(), Value::from_i32(1));
    let peeked = sched.evaluate(&[], vec![ret(unary(var("Peek"), "value"))]).unwrap();
    assert_eq!(peeked, Value::from_i32(5));
}

#[test]
fn escaped_block_keeps_its_own_copy_of_a_chained_temporary() {
    // x := 0. b := [[x := x + 1]] value. b value. n := b value. ^x * 100 + n
    // b outlives the block that chained x, so its writes stay in that
    // block's copy and never reach the method's x.
    let body = vec![
        assign("x", int(0)),
        assign(
            "b",
            unary(thunk(vec![thunk(vec![assign("x", binary(var("x"), "+", int(1)))])]), "value"),
        ),
        unary(var("b"), "value"),
        assign("n", unary(var("b"), "value")),
        ret(binary(binary(var("x"), "*", int(100)), "+", var("n"))),
    ];
    assert_eq!(print_it(&["x", "b", "n"], body), "2");
}

#[test]
fn block_arguments_are_captured_by_deeper_blocks() {
    // [:x | [:y | [:z | x + y + z] value: 3] value: 2] value: 1
    let innermost = block(
        &["z"],
        &[],
        vec![binary(binary(var("x"), "+", var("y")), "+", var("z"))],
    );
    let middle = block(&["y"], &[], vec![binary(innermost, "value:", int(3))]);
    let outer = block(&["x"], &[], vec![binary(middle, "value:", int(2))]);
    assert_eq!(print_it(&[], vec![ret(binary(outer, "value:", int(1)))]), "6");
}

#[test]
fn blocks_share_one_captured_variable() {
    // counter := 0. inc := [counter := counter + 1]. inc value. inc value. ^counter
    let body = vec![
        assign("counter", int(0)),
        assign(
            "inc",
            thunk(vec![assign("counter", binary(var("counter"), "+", int(1)))]),
        ),
        unary(var("inc"), "value"),
        unary(var("inc"), "value"),
        unary(var("inc"), "value"),
        ret(var("counter")),
    ];
    assert_eq!(print_it(&["counter", "inc"], body), "3");
}

fn finder() -> ClassDefinition {
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
    let escaper = method("escaper", &[], &[], vec![ret(block(&["x"], &[], vec![ret(var("x"))]))]);
    class("Finder", "Object", &[], vec![find, escaper])
}

#[test]
fn non_local_return_unwinds_to_the_home_method() {
    let mut sched = scheduler();
    let found = binary(unary(var("Finder"), "new"), "find:", int(7));
    let missing = binary(unary(var("Finder"), "new"), "find:", int(70));
    let ids = run_program(
        &mut sched,
        vec![finder()],
        vec![
            DoIt::new("found", &[], vec![ret(found)]),
            DoIt::new("missing", &[], vec![ret(missing)]),
        ],
    )
    .unwrap();
    assert_eq!(sched.result_of(ids[0]), Some(Value::from_i32(700)));
    assert_eq!(sched.result_of(ids[1]), Some(Value::from_i32(0)));
}

#[test]
fn non_local_return_into_a_finished_method_is_fatal() {
    let mut sched = scheduler();
    let escaped = binary(unary(unary(var("Finder"), "new"), "escaper"), "value:", int(5));
    let err = run_program(&mut sched, vec![finder()], vec![DoIt::new("doIt", &[], vec![ret(escaped)])]).unwrap_err();
    let trace = match err {
        RuntimeError::DeadContext { trace } => trace,
        other => panic!("expected a dead context, got {other}"),
    };
    assert_eq!(trace.frames.first().map(String::as_str), Some("Context>>blockReturn:"));
    assert!(trace.frames.iter().any(|f| f == "[] in Finder>>escaper"));
}

#[test]
fn super_starts_lookup_above_the_defining_class() {
    let name = |suffix: &str| {
        method(
            "name",
            &[],
            &[],
            vec![ret(binary(super_send("name", vec![]), ",", string(suffix)))],
        )
    };
    let a = class("A", "Object", &[], vec![method("name", &[], &[], vec![ret(string("A"))])]);
    let b = class("B", "A", &[], vec![name("B")]);
    let c = class("C", "B", &[], vec![name("C")]);
    let mut sched = scheduler();
    let ids = run_program(
        &mut sched,
        vec![a, b, c],
        vec![DoIt::new("doIt", &[], vec![ret(unary(unary(var("C"), "new"), "name"))])],
    )
    .unwrap();
    let value = sched.result_of(ids[0]).unwrap();
    assert_eq!(sched.runtime().print_string(value), "'ABC'");
}

#[test]
fn binary_ops_on_other_receivers_become_sends() {
    let money = class(
        "Money",
        "Object",
        &["amount"],
        vec![
            method("amount:", &["a"], &[], vec![assign("amount", var("a"))]),
            method("+", &["n"], &[], vec![ret(binary(var("amount"), "+", var("n")))]),
        ],
    );
    let mut sched = scheduler();
    let sum = binary(binary(unary(var("Money"), "new"), "amount:", int(5)), "+", int(10));
    let mixed = binary(int(3), "+", string("x"));
    let ids = run_program(
        &mut sched,
        vec![money],
        vec![
            DoIt::new("sum", &[], vec![ret(sum)]),
            DoIt::new("mixed", &[], vec![ret(mixed)]),
        ],
    )
    .unwrap();
    assert_eq!(sched.result_of(ids[0]), Some(Value::from_i32(15)));
    assert_eq!(sched.result_of(ids[1]), Some(Value::NIL), "a failed primitive answers nil");
}

#[test]
fn live_data_survives_collections_under_load() {
    let info = RuntimeCreateInfo {
        heap: HeapCreateInfo {
            arena_words: Some(1 << 14),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut sched = scheduler_with(info, None);
    // keep a linked chain of the last arrays alive while churning garbage
    let body = vec![
        assign("head", nil()),
        assign("i", int(0)),
        send(
            thunk(vec![binary(var("i"), "<", int(3000))]),
            "whileTrue:",
            vec![thunk(vec![
                assign("cell", binary(var("Array"), "new:", int(2))),
                send(var("cell"), "at:put:", vec![int(1), var("i")]),
                send(var("cell"), "at:put:", vec![int(2), var("head")]),
                send(
                    binary(binary(var("i"), "\\\\", int(100)), "=", int(0)),
                    "ifTrue:",
                    vec![thunk(vec![assign("head", var("cell"))])],
                ),
                binary(var("Array"), "new:", int(40)),
                assign("i", binary(var("i"), "+", int(1))),
            ])],
        ),
        // sum the indices kept in the chain: 0 + 100 + ... + 2900
        assign("sum", int(0)),
        send(
            thunk(vec![unary(var("head"), "notNil")]),
            "whileTrue:",
            vec![thunk(vec![
                assign("sum", binary(var("sum"), "+", binary(var("head"), "at:", int(1)))),
                assign("head", binary(var("head"), "at:", int(2))),
            ])],
        ),
        ret(var("sum")),
    ];
    let value = sched.evaluate(&["head", "cell", "i", "sum"], body).unwrap();
    assert_eq!(value, Value::from_i32(43_500));
    let rt = sched.runtime_mut();
    assert!(rt.heap.stats().collections > 0, "the loop never filled an arena");
    rt.heap.verify().unwrap();
}

#[test]
fn heap_exhaustion_is_fatal() {
    let info = RuntimeCreateInfo {
        heap: HeapCreateInfo {
            arena_words: Some(1 << 14),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut sched = scheduler_with(info, None);
    // every array stays reachable, so collecting cannot help
    let body = vec![
        assign("head", nil()),
        send(
            thunk(vec![true_()]),
            "whileTrue:",
            vec![thunk(vec![
                assign("cell", binary(var("Array"), "new:", int(30))),
                send(var("cell"), "at:put:", vec![int(1), var("head")]),
                assign("head", var("cell")),
            ])],
        ),
    ];
    let err = sched.evaluate(&["head", "cell"], body).unwrap_err();
    assert!(matches!(err, RuntimeError::Allocation(_)), "{err}");
}

#[test]
fn only_arrays_accept_at_put() {
    let body = vec![
        assign("a", binary(var("Array"), "new:", int(2))),
        primitive("atPut", vec![var("a"), int(1), int(5)]),
        ret(binary(var("a"), "at:", int(1))),
    ];
    assert_eq!(print_it(&["a"], body), "5");

    // byte objects answer nil and keep their bytes
    let body = vec![
        assign("s", string("abc")),
        ret(primitive("atPut", vec![var("s"), int(1), int(120)])),
    ];
    assert_eq!(print_it(&["s"], body), "nil");
    let body = vec![
        assign("s", string("abc")),
        primitive("atPut", vec![var("s"), int(1), int(120)]),
        ret(binary(var("s"), "at:", int(1))),
    ];
    assert_eq!(print_it(&["s"], body), "97");
}

fn show(text: &str) -> Expr {
    unary(string(text), "displayNl")
}

#[test]
fn pending_preemption_sends_the_first_process_to_the_tail() {
    let mut sched = scheduler();
    sched.interrupts().request_preempt();
    run_program(
        &mut sched,
        Vec::new(),
        vec![
            DoIt::new("A", &[], vec![show("A")]),
            DoIt::new("B", &[], vec![show("B")]),
        ],
    )
    .unwrap();
    assert_eq!(sched.runtime().transcript(), ["B", "A"]);
}

#[test]
fn timer_preempts_a_spinning_process() {
    let mut sched = scheduler_with(RuntimeCreateInfo::default(), Some(Duration::from_millis(1)));
    // A spins until B has run, so B can only print first if A was preempted
    let spin = send(
        thunk(vec![send(
            unary(var("Flag"), "isNil"),
            "and:",
            vec![thunk(vec![binary(var("i"), "<", int(100_000_000))])],
        )]),
        "whileTrue:",
        vec![thunk(vec![assign("i", binary(var("i"), "+", int(1)))])],
    );
    run_program(
        &mut sched,
        Vec::new(),
        vec![
            DoIt::new("A", &["i"], vec![assign("i", int(0)), spin, show("A")]),
            DoIt::new("B", &[], vec![assign("Flag", true_()), show("B")]),
        ],
    )
    .unwrap();
    assert_eq!(sched.runtime().transcript(), ["B", "A"]);
}

#[test]
fn requests_while_disabled_wait_for_enable() {
    let mut sched = scheduler();
    sched.interrupts().disable();
    sched.interrupts().request_preempt();
    let a = vec![
        show("A1"),
        unary(var("Process"), "enableInterrupts"),
        show("A2"),
    ];
    run_program(
        &mut sched,
        Vec::new(),
        vec![DoIt::new("A", &[], a), DoIt::new("B", &[], vec![show("B")])],
    )
    .unwrap();
    assert_eq!(sched.runtime().transcript(), ["A1", "B", "A2"]);
    assert!(sched.interrupts().is_enabled());
}

#[test]
fn yield_alternates_between_processes() {
    let chatty = |tag: &'static str| {
        let line = binary(string(tag), ",", unary(var("i"), "printString"));
        send(
            int(1),
            "to:do:",
            vec![
                int(2),
                block(&["i"], &[], vec![unary(line, "displayNl"), unary(var("Process"), "yield")]),
            ],
        )
    };
    let mut sched = scheduler();
    run_program(
        &mut sched,
        Vec::new(),
        vec![
            DoIt::new("A", &[], vec![chatty("a")]),
            DoIt::new("B", &[], vec![chatty("b")]),
        ],
    )
    .unwrap();
    assert_eq!(sched.runtime().transcript(), ["a1", "b1", "a2", "b2"]);
}

#[test]
fn suspended_process_waits_until_resumed() {
    let a = vec![
        assign("Sleeper", unary(var("Process"), "current")),
        unary(var("Sleeper"), "suspend"),
        show("A resumed"),
    ];
    let b = vec![show("B"), unary(var("Sleeper"), "resume"), show("B done")];
    let mut sched = scheduler();
    let ids = run_program(&mut sched, Vec::new(), vec![DoIt::new("A", &[], a), DoIt::new("B", &[], b)]).unwrap();
    assert_eq!(sched.runtime().transcript(), ["B", "B done", "A resumed"]);
    assert!(ids.iter().all(|&id| sched.result_of(id).is_some()));
    assert!(sched.state().waiting.is_empty());
}

#[test]
fn run_ends_when_only_waiting_processes_remain() {
    let a = vec![unary(unary(var("Process"), "current"), "suspend"), show("never")];
    let mut sched = scheduler();
    let ids = run_program(&mut sched, Vec::new(), vec![DoIt::new("A", &[], a)]).unwrap();
    assert!(sched.runtime().transcript().is_empty());
    assert_eq!(sched.result_of(ids[0]), None);
    assert_eq!(sched.state().waiting.len(&sched.runtime().heap), 1);
}

#[test]
fn forked_blocks_run_after_their_parent() {
    let fork = |tag: &str| unary(thunk(vec![show(tag)]), "fork");
    let mut sched = scheduler();
    run_program(
        &mut sched,
        Vec::new(),
        vec![DoIt::new("parent", &[], vec![fork("child 1"), fork("child 2"), show("parent")])],
    )
    .unwrap();
    assert_eq!(sched.runtime().transcript(), ["parent", "child 1", "child 2"]);
    assert_eq!(sched.finished().len(), 3);
}

#[test]
#[should_panic(expected = "already linked")]
fn enqueueing_a_linked_process_panics() {
    let mut rt = Runtime::new(RuntimeCreateInfo::default()).unwrap();
    let p = rt.heap.allocate_pointers(rt.classes.process, process::SIZE).unwrap();
    let mut list = ProcessList::new();
    list.enqueue(&mut rt.heap, p);
    list.enqueue(&mut rt.heap, p);
}
