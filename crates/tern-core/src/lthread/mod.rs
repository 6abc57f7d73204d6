//! Lightweight threads
//!
//! An [`LThread`] runs one module on its own OS thread, with its own
//! [`GlobalState`] and [`Context`]. The spawner keeps a handle to wait for
//! the result, cancel the lthread or resume it after a yield.
//!
//! Globals handed to a new lthread go through `share_or_clone`, so the only
//! mutable values both sides see are shared (lock-protected) ones.

mod group;

pub use group::LThreadGroup;

use crate::bytecode::Module;
use crate::config::{VmConfig, THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME};
use crate::context::permissions::{Permission, PermissionKind};
use crate::context::{Context, ContextConfig};
use crate::error::{CancellationCause, ContextError, LThreadError, VmError};
use crate::state::{GlobalState, Globals};
use crate::value::{share_or_clone, Value};
use crate::vm::Vm;
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Unique identifier of an lthread
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LThreadId(u64);

static NEXT_LTHREAD_ID: AtomicU64 = AtomicU64::new(1);

impl LThreadId {
    fn next() -> Self {
        LThreadId(NEXT_LTHREAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Value yielded by an lthread and when it was yielded
#[derive(Debug, Clone)]
pub struct ExecutedStep {
    /// Yielded value
    pub result: Value,
    /// Time of the yield
    pub end_time: DateTime<Utc>,
}

/// Arguments of [`LThread::spawn`]
#[derive(Debug)]
pub struct LThreadSpawnArgs {
    /// State of the spawner
    pub spawner_state: Arc<GlobalState>,
    /// Globals of the new lthread, shared or cloned on spawn
    pub globals: Globals,
    /// Module to run
    pub module: Arc<Module>,
    /// Context of the lthread. When `None` a child of the spawner's context
    /// allowed to read, use and create any global is created.
    pub context: Option<Arc<Context>>,
    /// Run the module as a test case
    pub is_test_case: bool,
    /// Skip the check of the lthread creation permission
    pub ignore_create_permission: bool,
    /// Pause after every yield until [`LThread::resume_async`] is called
    pub pause_after_yield: bool,
    /// Wait for [`LThread::resume_async`] before starting
    pub start_paused: bool,
    /// Gracefully cancel the lthread's context after this duration
    pub timeout: Option<Duration>,
    /// `self` of the module's code
    pub self_value: Value,
}

#[derive(Debug)]
enum Outcome {
    Running,
    Finished(Value),
    Failed(VmError),
}

/// Handle to a running module
pub struct LThread {
    id: LThreadId,
    state: Arc<GlobalState>,
    spawner_ctx: Arc<Context>,
    pause_after_yield: bool,

    steps: Mutex<Vec<ExecutedStep>>,
    paused: AtomicBool,
    continue_sender: Sender<()>,
    continue_receiver: Receiver<()>,

    outcome: Mutex<Outcome>,
    done: AtomicBool,
    /// Dropped when the lthread finishes, which wakes every waiter
    done_sender: Mutex<Option<Sender<()>>>,
    done_receiver: Receiver<()>,
}

impl LThread {
    /// Spawn an lthread running `args.module`.
    ///
    /// Fails when the spawner may not create lthreads, when a global can be
    /// neither shared nor cloned, or when the spawner's context declares the
    /// simultaneous-instances limit and no token is available.
    pub fn spawn(args: LThreadSpawnArgs) -> Result<Arc<LThread>, LThreadError> {
        let spawner_ctx = args.spawner_state.ctx.clone();
        if !args.ignore_create_permission {
            spawner_ctx
                .check_has_permission(&Permission::create_lthread())
                .map_err(|err| LThreadError::Spawn(err.to_string()))?;
        }

        let ctx = match args.context {
            Some(ctx) => ctx,
            None => Context::new(
                ContextConfig::new()
                    .with_permissions(vec![
                        Permission::all_globals(PermissionKind::Read),
                        Permission::all_globals(PermissionKind::Use),
                        Permission::all_globals(PermissionKind::Create),
                    ])
                    .with_parent(spawner_ctx.clone()),
            )?,
        };

        let state = if args.is_test_case {
            GlobalState::new_test_case(ctx)
        } else {
            GlobalState::new(ctx)
        };
        for (name, value, constant) in args.globals.entries() {
            let value = share_or_clone(&value, &args.spawner_state).map_err(|err| {
                LThreadError::Spawn(format!("failed to share or clone global '{}': {}", name, err))
            })?;
            if constant {
                state.globals.set_constant(&name, value);
            } else {
                state.globals.set(&name, value)?;
            }
        }
        state.set_module(args.module.clone());

        let (continue_sender, continue_receiver) = channel::bounded(1);
        let (done_sender, done_receiver) = channel::bounded(0);
        let lthread = Arc::new(LThread {
            id: LThreadId::next(),
            state: state.clone(),
            spawner_ctx: spawner_ctx.clone(),
            pause_after_yield: args.pause_after_yield,
            steps: Mutex::new(Vec::new()),
            paused: AtomicBool::new(args.start_paused),
            continue_sender,
            continue_receiver,
            outcome: Mutex::new(Outcome::Running),
            done: AtomicBool::new(false),
            done_sender: Mutex::new(Some(done_sender)),
            done_receiver,
        });
        state.set_lthread(&lthread);

        let took_token = spawner_ctx.limiter(THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME).is_some();
        if took_token {
            if let Err(err) = spawner_ctx.take(THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME, 1) {
                state.ctx.cancel();
                return Err(LThreadError::Spawn(err.to_string()));
            }
        }

        if let Some(timeout) = args.timeout {
            let ctx = state.ctx.clone();
            thread::spawn(move || {
                if !ctx.wait_done(timeout) {
                    debug!(context = %ctx.id(), "lthread timeout");
                    ctx.cancel_gracefully_with(CancellationCause::Timeout);
                }
            });
        }

        let runner = lthread.clone();
        let start_paused = args.start_paused;
        let self_value = args.self_value;
        let spawned = thread::Builder::new()
            .name(format!("lthread-{}", lthread.id.as_u64()))
            .spawn(move || runner.run(start_paused, self_value, took_token));
        if let Err(err) = spawned {
            if took_token {
                give_back_instance_token(&spawner_ctx);
            }
            state.ctx.cancel();
            return Err(LThreadError::Spawn(err.to_string()));
        }

        debug!(lthread = lthread.id.as_u64(), module = %args.module.name, "lthread spawned");
        Ok(lthread)
    }

    fn run(self: Arc<Self>, start_paused: bool, self_value: Value, took_token: bool) {
        let outcome = self.execute(start_paused, self_value);

        if took_token {
            give_back_instance_token(&self.spawner_ctx);
        }
        self.state.ctx.cancel_gracefully();
        self.state.ctx.definitely_stop_cpu_accounting();

        let ok = outcome.is_ok();
        *self.outcome.lock() = match outcome {
            Ok(value) => Outcome::Finished(value),
            Err(err) => {
                debug!(lthread = self.id.as_u64(), error = %err, "lthread failed or was cancelled");
                Outcome::Failed(err)
            }
        };
        self.paused.store(false, Ordering::Release);
        self.done.store(true, Ordering::Release);
        self.done_sender.lock().take();
        debug!(lthread = self.id.as_u64(), ok, "lthread finished");
    }

    fn execute(&self, start_paused: bool, self_value: Value) -> Result<Value, VmError> {
        if start_paused {
            self.wait_continue()?;
            self.paused.store(false, Ordering::Release);
        }
        let mut vm = Vm::new(self.state.clone(), VmConfig::default())?.with_self_value(self_value);
        let result = vm.run()?;
        Ok(share_or_clone(&result, &self.state)?)
    }

    /// Block until resumed or until the lthread's context is done
    fn wait_continue(&self) -> Result<(), ContextError> {
        let ctx = &self.state.ctx;
        ctx.do_io(|| {
            select! {
                recv(self.continue_receiver) -> _ => Ok(()),
                recv(ctx.done_receiver()) -> _ => Err(ctx
                    .err()
                    .unwrap_or(ContextError::Cancelled(CancellationCause::Explicit))),
            }
        })
    }

    /// Record a yielded value, then pause until resumed if the lthread
    /// pauses after yields
    pub fn yield_value(&self, value: Value) -> Result<(), LThreadError> {
        if self.is_done() {
            return Err(LThreadError::Done);
        }
        self.steps.lock().push(ExecutedStep {
            result: value,
            end_time: Utc::now(),
        });
        if !self.pause_after_yield {
            return Ok(());
        }

        if self
            .paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LThreadError::Spawn("lthread is already paused".to_string()));
        }
        let resumed = self.wait_continue();
        self.paused.store(false, Ordering::Release);
        resumed?;
        Ok(())
    }

    /// Resume a paused lthread. Does nothing if it is not paused.
    pub fn resume_async(&self) -> Result<(), LThreadError> {
        if self.is_done() {
            return Err(LThreadError::Done);
        }
        if self.is_paused() {
            let _ = self.continue_sender.try_send(());
        }
        Ok(())
    }

    /// Gracefully cancel the lthread's context
    pub fn cancel(&self) {
        self.state.ctx.cancel_gracefully();
    }

    /// Wait for the end of the lthread and return its result. The wait is
    /// not counted as CPU time of the spawner.
    pub fn wait_result(&self) -> Result<Value, LThreadError> {
        if !self.is_done() {
            self.spawner_ctx.do_io(|| {
                let _ = self.done_receiver.recv();
            });
        }
        match &*self.outcome.lock() {
            Outcome::Finished(value) => Ok(value.clone()),
            Outcome::Failed(err) => Err(LThreadError::Vm(err.clone())),
            Outcome::Running => Err(LThreadError::Spawn("lthread has no result".to_string())),
        }
    }

    /// Whether the lthread finished
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Whether the lthread waits for [`LThread::resume_async`]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Values yielded so far
    pub fn executed_steps(&self) -> Vec<ExecutedStep> {
        self.steps.lock().clone()
    }

    /// Identifier
    pub fn id(&self) -> LThreadId {
        self.id
    }

    /// Context of the lthread
    pub fn context(&self) -> &Arc<Context> {
        &self.state.ctx
    }

    /// State of the lthread
    pub fn state(&self) -> &Arc<GlobalState> {
        &self.state
    }
}

/// Return the instance token taken at spawn. The limiter is used directly:
/// the spawner's context may already be done while the bucket it shares
/// with its ancestors is still in use.
fn give_back_instance_token(spawner_ctx: &Context) {
    match spawner_ctx.limiter(THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME) {
        Some(limiter) => limiter.give_back(1),
        None => warn!(context = %spawner_ctx.id(), "no limiter to give the lthread token back to"),
    }
}

impl fmt::Debug for LThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LThread")
            .field("id", &self.id)
            .field("state", &self.state.id())
            .field("done", &self.is_done())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Bytecode, CompiledFunction};
    use tern_bytecode::{BinaryOperator, BytecodeWriter, Opcode};

    fn spawner() -> Arc<GlobalState> {
        GlobalState::new(
            Context::new(ContextConfig::new().with_permissions(vec![
                Permission::create_lthread(),
                Permission::all_globals(PermissionKind::Read),
                Permission::all_globals(PermissionKind::Use),
                Permission::all_globals(PermissionKind::Create),
            ]))
            .unwrap(),
        )
    }

    fn module(w: BytecodeWriter, constants: Vec<Value>) -> Arc<Module> {
        let main = CompiledFunction::new("main", w.into_bytes());
        Arc::new(Module::new("lthread", Bytecode::new(main, constants)))
    }

    fn args(spawner: &Arc<GlobalState>, module: Arc<Module>) -> LThreadSpawnArgs {
        LThreadSpawnArgs {
            spawner_state: spawner.clone(),
            globals: Globals::default(),
            module,
            context: None,
            is_test_case: false,
            ignore_create_permission: false,
            pause_after_yield: false,
            start_paused: false,
            timeout: None,
            self_value: Value::Nil,
        }
    }

    #[test]
    fn test_spawn_and_wait_result() {
        let mut w = BytecodeWriter::new();
        w.emit_push_constant(0);
        w.emit_push_constant(1);
        w.emit_int_bin(BinaryOperator::Add);
        w.emit_return(true);

        let spawner = spawner();
        let lthread = LThread::spawn(args(&spawner, module(w, vec![Value::Int(1), Value::Int(2)]))).unwrap();
        assert_eq!(lthread.wait_result().unwrap(), Value::Int(3));
        assert!(lthread.is_done());
        assert!(lthread.context().is_done());
    }

    #[test]
    fn test_spawn_requires_permission() {
        let spawner = GlobalState::new(Context::new(ContextConfig::default()).unwrap());
        let result = LThread::spawn(args(&spawner, module(BytecodeWriter::new(), vec![])));
        assert!(matches!(result, Err(LThreadError::Spawn(_))));

        let mut unchecked = args(&spawner, module(BytecodeWriter::new(), vec![]));
        unchecked.ignore_create_permission = true;
        let lthread = LThread::spawn(unchecked).unwrap();
        assert_eq!(lthread.wait_result().unwrap(), Value::Nil);
    }

    #[test]
    fn test_globals_are_visible() {
        let mut w = BytecodeWriter::new();
        w.emit_get_global(0);
        w.emit_return(true);

        let spawner = spawner();
        let mut spawn_args = args(&spawner, module(w, vec![Value::str("x")]));
        spawn_args.globals.set("x", Value::list(vec![Value::Int(1)])).unwrap();
        let lthread = LThread::spawn(spawn_args).unwrap();
        assert_eq!(lthread.wait_result().unwrap(), Value::list(vec![Value::Int(1)]));
    }

    #[test]
    fn test_start_paused_waits_for_resume() {
        let spawner = spawner();
        let mut spawn_args = args(&spawner, module(BytecodeWriter::new(), vec![]));
        spawn_args.start_paused = true;
        let lthread = LThread::spawn(spawn_args).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(lthread.is_paused());
        assert!(!lthread.is_done());

        lthread.resume_async().unwrap();
        assert_eq!(lthread.wait_result().unwrap(), Value::Nil);
        assert!(!lthread.is_paused());
        assert!(matches!(lthread.resume_async(), Err(LThreadError::Done)));
    }

    #[test]
    fn test_yield_records_steps() {
        let mut w = BytecodeWriter::new();
        w.emit_push_constant(0);
        w.emit_yield(true);
        w.emit_push_constant(1);
        w.emit_yield(true);
        w.emit_return(false);

        let spawner = spawner();
        let mut spawn_args = args(&spawner, module(w, vec![Value::Int(1), Value::Int(2)]));
        spawn_args.pause_after_yield = true;
        let lthread = LThread::spawn(spawn_args).unwrap();

        while lthread.executed_steps().len() < 1 || !lthread.is_paused() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(lthread.executed_steps()[0].result, Value::Int(1));
        lthread.resume_async().unwrap();

        while lthread.executed_steps().len() < 2 || !lthread.is_paused() {
            thread::sleep(Duration::from_millis(1));
        }
        lthread.resume_async().unwrap();

        assert_eq!(lthread.wait_result().unwrap(), Value::Nil);
        let steps = lthread.executed_steps();
        assert_eq!(steps[1].result, Value::Int(2));
        assert!(steps[0].end_time <= steps[1].end_time);
    }

    #[test]
    fn test_cancel_stops_infinite_loop() {
        let mut w = BytecodeWriter::new();
        w.emit_jump(Opcode::Jump, 0);

        let spawner = spawner();
        let lthread = LThread::spawn(args(&spawner, module(w, vec![]))).unwrap();
        lthread.cancel();
        let err = lthread.wait_result().unwrap_err();
        assert!(matches!(err, LThreadError::Vm(ref e) if e.is_cancellation()));
    }

    #[test]
    fn test_timeout_cancels_lthread() {
        let mut w = BytecodeWriter::new();
        w.emit_jump(Opcode::Jump, 0);

        let spawner = spawner();
        let mut spawn_args = args(&spawner, module(w, vec![]));
        spawn_args.timeout = Some(Duration::from_millis(20));
        let lthread = LThread::spawn(spawn_args).unwrap();
        assert!(lthread.wait_result().is_err());
    }
}
