//! Run with:
//!   cargo bench --bench interpreter

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use talc::ast::*;
use talc::{Runtime, RuntimeCreateInfo, Scheduler, SchedulerSettings, Value};

const DOIT: &str = "BenchDoIt";

fn create_scheduler() -> Scheduler {
    let runtime = Runtime::new(RuntimeCreateInfo::default()).expect("bootstrap failed");
    Scheduler::new(runtime, SchedulerSettings::default())
}

/// Compiles `body` once and parks it in a global, since collections move it.
fn prepare(scheduler: &mut Scheduler, temps: &[&str], body: Vec<Expr>) -> &'static str {
    let rt = scheduler.runtime_mut();
    let doit = rt.compile_doit(temps, body).expect("compile failed");
    rt.set_global(DOIT, doit).expect("global failed");
    DOIT
}

/// Runs a compiled do-it as a fresh process to completion.
fn run_once(scheduler: &mut Scheduler, name: &str) -> Value {
    let doit = scheduler.runtime().global(name).expect("do-it was not parked");
    let id = scheduler
        .spawn_method(doit, Value::NIL, "bench")
        .expect("spawn failed");
    scheduler.run().expect("benchmark failed");
    scheduler.result_of(id).expect("process did not finish")
}

/// Benchmark 1: whileTrue: compiled to branches, no sends at all.
fn bench_inlined_loop(c: &mut Criterion) {
    let mut scheduler = create_scheduler();
    let doit = prepare(
        &mut scheduler,
        &["i", "sum"],
        vec![
            assign("i", int(0)),
            assign("sum", int(0)),
            send(
                thunk(vec![binary(var("i"), "<", int(1000))]),
                "whileTrue:",
                vec![thunk(vec![
                    assign("sum", binary(var("sum"), "+", var("i"))),
                    assign("i", binary(var("i"), "+", int(1))),
                ])],
            ),
            ret(var("sum")),
        ],
    );
    assert_eq!(run_once(&mut scheduler, doit), Value::from_i32(499_500));

    c.bench_function("inlined_loop_1000", |b| {
        b.iter(|| run_once(&mut scheduler, black_box(doit)));
    });
}

/// Benchmark 2: to:do: with a capturing block, one block activation per
/// iteration.
fn bench_block_invocation(c: &mut Criterion) {
    let mut scheduler = create_scheduler();
    let doit = prepare(
        &mut scheduler,
        &["sum"],
        vec![
            assign("sum", int(0)),
            send(
                int(1),
                "to:do:",
                vec![
                    int(1000),
                    block(&["i"], &[], vec![assign("sum", binary(var("sum"), "+", var("i")))]),
                ],
            ),
            ret(var("sum")),
        ],
    );
    assert_eq!(run_once(&mut scheduler, doit), Value::from_i32(500_500));

    c.bench_function("block_invocation_1000", |b| {
        b.iter(|| run_once(&mut scheduler, black_box(doit)));
    });
}

/// Benchmark 3: recursive Fibonacci, two sends per call.
fn bench_sends(c: &mut Criterion) {
    let mut scheduler = create_scheduler();
    let fib = method(
        "fib:",
        &["n"],
        &[],
        vec![
            send(binary(var("n"), "<", int(2)), "ifTrue:", vec![thunk(vec![ret(var("n"))])]),
            ret(binary(
                binary(self_ref(), "fib:", binary(var("n"), "-", int(1))),
                "+",
                binary(self_ref(), "fib:", binary(var("n"), "-", int(2))),
            )),
        ],
    );
    scheduler
        .runtime_mut()
        .load_class(ClassDefinition {
            name: "Fib".into(),
            superclass: "Object".into(),
            instance_variables: Vec::new(),
            methods: vec![fib],
            class_methods: Vec::new(),
        })
        .expect("class definition failed");
    let doit = prepare(
        &mut scheduler,
        &[],
        vec![ret(binary(unary(var("Fib"), "new"), "fib:", int(15)))],
    );
    assert_eq!(run_once(&mut scheduler, doit), Value::from_i32(610));

    c.bench_function("fibonacci_15", |b| {
        b.iter(|| run_once(&mut scheduler, black_box(doit)));
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_inlined_loop, bench_block_invocation, bench_sends
}

criterion_main!(benches);
