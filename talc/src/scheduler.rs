//! Processes and the round-robin scheduler.
//!
//! The runnable and waiting sets are intrusive FIFO lists threaded through
//! each Process object's `link` slot, so the heap owns all scheduling state
//! and the collector sees it through [`SchedulerState`]'s roots.
//!
//! Exactly one process runs at a time. The scheduler dequeues the head of the
//! runnable list and runs the interpreter on it until the process returns,
//! yields, suspends, or the timer unit requests a preemption. Preempted and
//! yielding processes go to the tail.
use std::{sync::Arc, time::Duration};

use crate::object::{ProcessState, process};
use crate::{
    Heap, HeapError, Interpreter, Interrupts, RootProvider, RunOutcome, Runtime, RuntimeError, TimerUnit, Value,
    new_context,
};

/// An intrusive singly linked FIFO of Process objects.
#[derive(Debug, Clone, Copy)]
pub struct ProcessList {
    head: Value,
    tail: Value,
}

impl Default for ProcessList {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessList {
    pub const fn new() -> Self {
        Self {
            head: Value::NIL,
            tail: Value::NIL,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_nil()
    }

    /// Appends `p`. Panics if `p` is already linked into a list.
    pub fn enqueue(&mut self, heap: &mut Heap, p: Value) {
        assert!(
            heap.slot(p, process::LINK).is_nil() && p != self.tail,
            "process is already linked into a list"
        );
        if self.tail.is_nil() {
            self.head = p;
        } else {
            heap.set_slot(self.tail, process::LINK, p);
        }
        self.tail = p;
    }

    pub fn dequeue(&mut self, heap: &mut Heap) -> Option<Value> {
        if self.head.is_nil() {
            return None;
        }
        let p = self.head;
        self.head = heap.slot(p, process::LINK);
        if self.head.is_nil() {
            self.tail = Value::NIL;
        }
        heap.set_slot(p, process::LINK, Value::NIL);
        Some(p)
    }

    /// Unlinks `p` wherever it is. Returns whether it was found.
    pub fn remove(&mut self, heap: &mut Heap, p: Value) -> bool {
        let mut previous = Value::NIL;
        let mut cursor = self.head;
        while !cursor.is_nil() {
            let next = heap.slot(cursor, process::LINK);
            if cursor == p {
                if previous.is_nil() {
                    self.head = next;
                } else {
                    heap.set_slot(previous, process::LINK, next);
                }
                if self.tail == p {
                    self.tail = previous;
                }
                heap.set_slot(p, process::LINK, Value::NIL);
                return true;
            }
            previous = cursor;
            cursor = next;
        }
        false
    }

    pub fn to_vec(&self, heap: &Heap) -> Vec<Value> {
        let mut items = Vec::new();
        let mut cursor = self.head;
        while !cursor.is_nil() {
            items.push(cursor);
            cursor = heap.slot(cursor, process::LINK);
        }
        items
    }

    pub fn len(&self, heap: &Heap) -> usize {
        self.to_vec(heap).len()
    }

    fn visit(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.head);
        visitor(&mut self.tail);
    }
}

#[derive(Debug, Clone)]
pub struct FinishedProcess {
    pub id: u64,
    pub name: String,
    /// Final accumulator of the root activation.
    pub result: Value,
}

/// Heap-resident scheduling state. Everything here is a collection root.
#[derive(Debug)]
pub struct SchedulerState {
    pub runnable: ProcessList,
    pub waiting: ProcessList,
    /// The running process, nil between runs.
    pub current: Value,
    next_id: u64,
    finished: Vec<FinishedProcess>,
}

impl RootProvider for SchedulerState {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        self.runnable.visit(visitor);
        self.waiting.visit(visitor);
        visitor(&mut self.current);
        for finished in &mut self.finished {
            visitor(&mut finished.result);
        }
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerState {
    pub fn new() -> Self {
        Self {
            runnable: ProcessList::new(),
            waiting: ProcessList::new(),
            current: Value::NIL,
            next_id: 0,
            finished: Vec::new(),
        }
    }

    /// Wraps `context` in a new runnable process at the tail of the list.
    pub fn spawn(&mut self, rt: &mut Runtime, context: Value, name: Value) -> Result<Value, HeapError> {
        let p = rt.heap.allocate_pointers(rt.classes.process, process::SIZE)?;
        self.next_id += 1;
        let id = self.next_id;
        rt.heap.set_slot(p, process::ID, Value::from_usize(id as usize));
        rt.heap.set_slot(p, process::NAME, name);
        rt.heap.set_slot(p, process::CONTEXT, context);
        rt.heap.set_slot(p, process::STATE, ProcessState::Runnable.to_value());
        self.runnable.enqueue(&mut rt.heap, p);
        log::debug!("spawned process {id}");
        Ok(p)
    }

    pub fn finished(&self) -> &[FinishedProcess] {
        &self.finished
    }

    /// Moves a runnable process that is not running to the waiting list.
    pub fn suspend(&mut self, heap: &mut Heap, p: Value) -> bool {
        if state(heap, p) != Some(ProcessState::Runnable) || !self.runnable.remove(heap, p) {
            return false;
        }
        heap.set_slot(p, process::STATE, ProcessState::Waiting.to_value());
        self.waiting.enqueue(heap, p);
        true
    }

    /// Moves a waiting process to the tail of the runnable list.
    pub fn resume(&mut self, heap: &mut Heap, p: Value) -> bool {
        if state(heap, p) != Some(ProcessState::Waiting) || !self.waiting.remove(heap, p) {
            return false;
        }
        heap.set_slot(p, process::STATE, ProcessState::Runnable.to_value());
        self.runnable.enqueue(heap, p);
        true
    }
}

fn state(heap: &Heap, p: Value) -> Option<ProcessState> {
    ProcessState::from_value(heap.slot(p, process::STATE))
}

fn describe(rt: &Runtime, p: Value) -> (u64, String) {
    let id = rt.heap.slot(p, process::ID).as_usize().unwrap_or(0) as u64;
    let name = rt.heap.slot(p, process::NAME);
    let name = rt.text(name).unwrap_or_else(|| format!("process {id}"));
    (id, name)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerSettings {
    /// Preemption interval; `None` runs without a timer unit.
    pub time_slice: Option<Duration>,
}

pub struct Scheduler {
    runtime: Runtime,
    state: SchedulerState,
    interrupts: Arc<Interrupts>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(runtime: Runtime, settings: SchedulerSettings) -> Self {
        Self {
            runtime,
            state: SchedulerState::new(),
            interrupts: Arc::new(Interrupts::new()),
            settings,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn interrupts(&self) -> &Arc<Interrupts> {
        &self.interrupts
    }

    pub fn finished(&self) -> &[FinishedProcess] {
        self.state.finished()
    }

    /// The final value of the process with `id`, if it finished.
    pub fn result_of(&self, id: u64) -> Option<Value> {
        self.finished().iter().find(|f| f.id == id).map(|f| f.result)
    }

    /// Queues a process that sends the zero-argument `method` to `receiver`.
    pub fn spawn_method(&mut self, method: Value, receiver: Value, name: &str) -> Result<u64, RuntimeError> {
        let rt = &mut self.runtime;
        let context = new_context(rt, method, receiver, &[], Value::NIL, Value::NIL, None)?;
        let name = rt.new_string(name)?;
        let p = self.state.spawn(rt, context, name)?;
        Ok(describe(rt, p).0)
    }

    /// Runs until the runnable list is empty. A fatal error in any process
    /// aborts the whole run.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let _timer = match self.settings.time_slice {
            Some(slice) => Some(
                TimerUnit::start(Arc::clone(&self.interrupts), slice)
                    .map_err(|_| RuntimeError::Config("could not start the timer unit"))?,
            ),
            None => None,
        };
        while let Some(p) = self.state.runnable.dequeue(&mut self.runtime.heap) {
            self.state.current = p;
            let outcome = Interpreter::new(&mut self.runtime, &mut self.state, &self.interrupts).run();
            // the collector may have moved the process
            let p = self.state.current;
            self.state.current = Value::NIL;
            let heap = &mut self.runtime.heap;
            match outcome {
                Ok(RunOutcome::Returned(result)) => {
                    heap.set_slot(p, process::STATE, ProcessState::Done.to_value());
                    heap.set_slot(p, process::CONTEXT, Value::NIL);
                    heap.set_slot(p, process::ACCUMULATOR, result);
                    let (id, name) = describe(&self.runtime, p);
                    log::info!("{name} finished: {}", self.runtime.print_string(result));
                    self.state.finished.push(FinishedProcess { id, name, result });
                }
                Ok(RunOutcome::Preempted | RunOutcome::Yielded) => {
                    self.state.runnable.enqueue(heap, p);
                }
                Ok(RunOutcome::Suspended) => {
                    heap.set_slot(p, process::STATE, ProcessState::Waiting.to_value());
                    self.state.waiting.enqueue(heap, p);
                    log::debug!("{} suspended", describe(&self.runtime, p).1);
                }
                Err(err) => {
                    heap.set_slot(p, process::STATE, ProcessState::Done.to_value());
                    log::error!("{} aborted: {err}", describe(&self.runtime, p).1);
                    return Err(err);
                }
            }
        }
        let waiting = self.state.waiting.len(&self.runtime.heap);
        if waiting > 0 {
            log::warn!("runnable set empty with {waiting} processes still waiting");
        }
        Ok(())
    }

    /// Compiles a do-it, runs it with everything already queued and returns
    /// its value.
    pub fn evaluate(&mut self, temps: &[&str], body: Vec<crate::ast::Expr>) -> Result<Value, RuntimeError> {
        let doit = self.runtime.compile_doit(temps, body)?;
        let id = self.spawn_method(doit, Value::NIL, "doIt")?;
        self.run()?;
        Ok(self.result_of(id).unwrap_or(Value::NIL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeCreateInfo;

    fn processes(n: usize) -> (Runtime, Vec<Value>) {
        let mut rt = Runtime::new(RuntimeCreateInfo::default()).unwrap();
        let ps = (0..n)
            .map(|_| rt.heap.allocate_pointers(rt.classes.process, process::SIZE).unwrap())
            .collect();
        (rt, ps)
    }

    #[test]
    fn lists_are_fifo() {
        let (mut rt, ps) = processes(3);
        let mut list = ProcessList::new();
        for &p in &ps {
            list.enqueue(&mut rt.heap, p);
        }
        assert_eq!(list.to_vec(&rt.heap), ps);
        assert_eq!(list.dequeue(&mut rt.heap), Some(ps[0]));
        list.enqueue(&mut rt.heap, ps[0]);
        assert_eq!(list.to_vec(&rt.heap), vec![ps[1], ps[2], ps[0]]);
    }

    #[test]
    fn remove_relinks_head_middle_and_tail() {
        let (mut rt, ps) = processes(4);
        let mut list = ProcessList::new();
        for &p in &ps {
            list.enqueue(&mut rt.heap, p);
        }
        assert!(list.remove(&mut rt.heap, ps[1]));
        assert!(list.remove(&mut rt.heap, ps[3]));
        assert!(list.remove(&mut rt.heap, ps[0]));
        assert!(!list.remove(&mut rt.heap, ps[0]));
        assert_eq!(list.to_vec(&rt.heap), vec![ps[2]]);
        list.enqueue(&mut rt.heap, ps[3]);
        assert_eq!(list.to_vec(&rt.heap), vec![ps[2], ps[3]]);
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn enqueue_twice_panics() {
        let (mut rt, ps) = processes(1);
        let mut list = ProcessList::new();
        list.enqueue(&mut rt.heap, ps[0]);
        list.enqueue(&mut rt.heap, ps[0]);
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn enqueue_of_a_linked_middle_element_panics() {
        let (mut rt, ps) = processes(2);
        let mut list = ProcessList::new();
        list.enqueue(&mut rt.heap, ps[0]);
        list.enqueue(&mut rt.heap, ps[1]);
        let mut other = ProcessList::new();
        other.enqueue(&mut rt.heap, ps[0]);
    }

    #[test]
    fn suspend_and_resume_move_between_lists() {
        let (mut rt, _) = processes(0);
        let mut state = SchedulerState::new();
        let a = state.spawn(&mut rt, Value::NIL, Value::NIL).unwrap();
        let b = state.spawn(&mut rt, Value::NIL, Value::NIL).unwrap();
        assert!(state.suspend(&mut rt.heap, a));
        assert!(!state.suspend(&mut rt.heap, a));
        assert_eq!(state.runnable.to_vec(&rt.heap), vec![b]);
        assert_eq!(state.waiting.to_vec(&rt.heap), vec![a]);
        assert!(state.resume(&mut rt.heap, a));
        assert_eq!(state.runnable.to_vec(&rt.heap), vec![b, a]);
        assert!(state.waiting.is_empty());
    }

    #[test]
    fn scheduler_state_survives_collection() {
        let (mut rt, _) = processes(0);
        let mut state = SchedulerState::new();
        state.spawn(&mut rt, Value::NIL, Value::NIL).unwrap();
        state.spawn(&mut rt, Value::NIL, Value::NIL).unwrap();
        rt.collect_garbage(&mut state).unwrap();
        rt.heap.verify().unwrap();
        let ids: Vec<_> = state
            .runnable
            .to_vec(&rt.heap)
            .into_iter()
            .map(|p| rt.heap.slot(p, process::ID))
            .collect();
        assert_eq!(ids, vec![Value::from_i32(1), Value::from_i32(2)]);
    }
}
