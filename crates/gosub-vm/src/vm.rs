//! The explicit control evaluator.
//!
//! One step dequeues a thread, pops its next control node and runs that
//! node's microcode. Threads interleave at node granularity in round-robin
//! order; a thread blocked on a channel or a `sync` primitive is simply not
//! in the run queue until its partner wakes it.

use fastrand::Rng;
use gosub_ast::Program;
use gosub_heap::{Address, Heap};
use gosub_runtime::context::{control as control_stack, scheduler, thread};
use gosub_runtime::control;
use gosub_runtime::env::frame;

use crate::builtins::BuiltinRegistry;
use crate::config::Config;
use crate::error::{VmError, VmResult};
use crate::loader;
use crate::microcode::{Cx, Entry, MicrocodeTable};
use crate::output::{CapturedOutput, OutputSink};
use crate::snapshot::Snapshot;

pub struct Vm<O: OutputSink = CapturedOutput> {
    config: Config,
    heap: Heap,
    table: MicrocodeTable,
    builtins: BuiltinRegistry,
    rng: Rng,
    output: O,
    scheduler: Address,
    globals: Address,
    main_thread: Address,
    steps: u64,
    snapshots: Vec<Snapshot>,
}

impl Vm<CapturedOutput> {
    pub fn new(config: Config) -> VmResult<Self> {
        Self::with_output(config, CapturedOutput::new())
    }
}

impl<O: OutputSink> Vm<O> {
    pub fn with_output(config: Config, output: O) -> VmResult<Self> {
        let mut heap = Heap::new(config.heap_words)?;
        let scheduler = scheduler::create(&mut heap)?;
        let globals = frame::create(&mut heap, Address::NIL)?;
        let rng = match config.seed {
            Some(seed) => Rng::with_seed(seed),
            None => Rng::new(),
        };
        Ok(Vm {
            config,
            heap,
            table: MicrocodeTable::new(),
            builtins: BuiltinRegistry::standard(),
            rng,
            output,
            scheduler,
            globals,
            main_thread: Address::NIL,
            steps: 0,
            snapshots: Vec::new(),
        })
    }

    /// Links `program` into the global frame and makes its main thread
    /// runnable.
    pub fn load(&mut self, program: &Program) -> VmResult<()> {
        let initial = loader::load(&mut self.heap, &self.builtins, self.globals, program)?;
        let id = scheduler::next_id(&mut self.heap, self.scheduler)?;
        // the global frame doubles as the struct frame
        let main = thread::create(&mut self.heap, id, self.globals, self.globals)?;
        let control = thread::control(&self.heap, main)?;
        control_stack::push_owned(&mut self.heap, control, initial)?;
        scheduler::enqueue(&mut self.heap, self.scheduler, main)?;

        let previous = std::mem::replace(&mut self.main_thread, main);
        self.heap.free(previous)?;
        log::debug!("main thread {} ready", id);
        Ok(())
    }

    /// Runs one step. False once no thread is runnable.
    pub fn step(&mut self) -> VmResult<bool> {
        let t = scheduler::dequeue(&mut self.heap, self.scheduler)?;
        if t.is_nil() {
            return Ok(false);
        }
        let control = thread::control(&self.heap, t)?;
        if control_stack::is_empty(&self.heap, control)? {
            log::debug!("thread {} finished", thread::id(&self.heap, t)?);
            self.heap.free(t)?;
            return Ok(true);
        }

        let node = control_stack::pop(&mut self.heap, control)?;
        log::trace!(
            "step {}: thread {} runs {}",
            self.steps + 1,
            thread::id(&self.heap, t)?,
            control::describe(&self.heap, node)
        );
        let result = self.reduce(t, node);
        self.heap.free(node)?;
        self.heap.free(t)?;
        result?;

        self.steps += 1;
        if self.config.visualize {
            let snapshot = Snapshot::capture(&self.heap, self.scheduler, self.steps)?;
            self.snapshots.push(snapshot);
        }
        self.collect_if_needed()?;
        Ok(true)
    }

    fn reduce(&mut self, t: Address, node: Address) -> VmResult<()> {
        let tag = self.heap.tag(node)?;
        let Some(entry) = self.table.lookup(tag) else {
            return Err(VmError::UnsupportedCommand(control::describe(&self.heap, node)));
        };
        let mut cx = Cx {
            heap: &mut self.heap,
            scheduler: self.scheduler,
            thread: t,
            output: &mut self.output,
            builtins: &self.builtins,
            rng: &mut self.rng,
        };
        match entry {
            Entry::Sequential(microcode) => {
                microcode(&mut cx, node)?;
                cx.enqueue_current()
            }
            Entry::Scheduling(microcode) => microcode(&mut cx, node),
        }
    }

    /// Steps until no thread is runnable. A main thread with work left at
    /// that point is blocked forever.
    pub fn run(&mut self) -> VmResult<()> {
        if self.main_thread.is_nil() {
            return Err(VmError::NoMain);
        }
        while self.step()? {}
        let control = thread::control(&self.heap, self.main_thread)?;
        if !control_stack::is_empty(&self.heap, control)? {
            log::debug!("deadlock after {} steps", self.steps);
            return Err(VmError::Deadlock);
        }
        log::debug!("finished after {} steps", self.steps);
        Ok(())
    }

    fn collect_if_needed(&mut self) -> VmResult<()> {
        let low_water = (self.heap.capacity() as f64 * self.config.gc_low_water) as usize;
        if self.config.gc_every_step || self.heap.free_words() < low_water {
            self.collect_garbage()?;
        }
        Ok(())
    }

    /// Traces from the run queue, the main thread and the globals. Parked
    /// threads survive only while something reachable can still wake them.
    pub fn collect_garbage(&mut self) -> VmResult<usize> {
        Ok(self
            .heap
            .mark_and_sweep(&[self.scheduler, self.main_thread, self.globals])?)
    }

    /// Drops the roots and sweeps whatever they kept alive, leaving the heap
    /// empty.
    pub fn teardown(&mut self) -> VmResult<()> {
        let roots = [self.scheduler, self.main_thread, self.globals];
        self.scheduler = Address::NIL;
        self.main_thread = Address::NIL;
        self.globals = Address::NIL;
        for root in roots {
            self.heap.free(root)?;
        }
        self.heap.mark_and_sweep(&[])?;
        if !self.heap.check_all_released() {
            log::warn!("{} records survived teardown", self.heap.live_objects().len());
        }
        Ok(())
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn into_output(self) -> O {
        self.output
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Steps that ran a control node.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
