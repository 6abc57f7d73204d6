//! Integration tests for limits enforced through contexts: CPU time, total
//! time, shared buckets and rate limits

use std::sync::Arc;
use std::time::{Duration, Instant};
use tern_bytecode::{BytecodeWriter, Opcode};
use tern_core::config::{EXECUTION_CPU_TIME_LIMIT_NAME, EXECUTION_TOTAL_LIMIT_NAME};
use tern_core::value::ElementStream;
use tern_core::{
    get_limit, Bytecode, CancellationCause, CompiledFunction, Context, ContextConfig, ContextError,
    GlobalState, LimitValue, Module, Value, Vm, VmError,
};

fn infinite_loop() -> Arc<Module> {
    let mut w = BytecodeWriter::new();
    w.emit_jump(Opcode::Jump, 0);
    Arc::new(Module::new(
        "loop",
        Bytecode::new(CompiledFunction::new("main", w.into_bytes()), vec![]),
    ))
}

fn run_loop(ctx: Arc<Context>) -> VmError {
    let state = GlobalState::new(ctx);
    state.set_module(infinite_loop());
    let mut vm = Vm::new(state, Default::default()).unwrap();
    vm.run().unwrap_err()
}

#[test]
fn test_cpu_time_limit_cancels_busy_loop() {
    let limit = get_limit(
        EXECUTION_CPU_TIME_LIMIT_NAME,
        LimitValue::Duration(Duration::from_millis(50)),
    )
    .unwrap();
    let ctx = Context::new(ContextConfig::new().with_limits(vec![limit])).unwrap();

    let start = Instant::now();
    let err = run_loop(ctx.clone());
    assert!(start.elapsed() >= Duration::from_millis(40));
    assert!(start.elapsed() < Duration::from_millis(150));
    assert!(err.is_cancellation());
    assert_eq!(
        ctx.err(),
        Some(ContextError::Cancelled(CancellationCause::LimitReached(
            EXECUTION_CPU_TIME_LIMIT_NAME.to_string()
        )))
    );
}

#[test]
fn test_total_time_limit_cancels_busy_loop() {
    let limit = get_limit(
        EXECUTION_TOTAL_LIMIT_NAME,
        LimitValue::Duration(Duration::from_millis(30)),
    )
    .unwrap();
    let ctx = Context::new(ContextConfig::new().with_limits(vec![limit])).unwrap();

    let err = run_loop(ctx.clone());
    assert!(err.is_cancellation());
    assert!(matches!(
        ctx.err(),
        Some(ContextError::Cancelled(CancellationCause::LimitReached(_)))
    ));
}

#[test]
fn test_sleeping_does_not_count_cpu_time() {
    let limit = get_limit(
        EXECUTION_CPU_TIME_LIMIT_NAME,
        LimitValue::Duration(Duration::from_millis(50)),
    )
    .unwrap();
    let ctx = Context::new(ContextConfig::new().with_limits(vec![limit])).unwrap();
    let _state = GlobalState::new(ctx.clone());

    ctx.sleep(Duration::from_millis(120)).unwrap();
    assert!(!ctx.is_done());
    ctx.do_io(|| std::thread::sleep(Duration::from_millis(80)));
    assert!(!ctx.is_done());
    ctx.cancel();
}

#[test]
fn test_waiting_for_a_lock_does_not_count_cpu_time() {
    use tern_core::value::Object;

    let limit = get_limit(
        EXECUTION_CPU_TIME_LIMIT_NAME,
        LimitValue::Duration(Duration::from_millis(50)),
    )
    .unwrap();
    let holder_ctx = Context::new(ContextConfig::new()).unwrap();
    let holder = GlobalState::new(holder_ctx);
    let waiter_ctx = Context::new(ContextConfig::new().with_limits(vec![limit])).unwrap();
    let waiter = GlobalState::new(waiter_ctx.clone());

    let object = Arc::new(Object::new(vec![]));
    object.share(&holder).unwrap();
    object.smart_lock().force_lock(&holder).unwrap();

    let releaser = {
        let object = object.clone();
        let holder_id = holder.id();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            object.smart_lock().unlock(holder_id);
        })
    };

    object.smart_lock().force_lock(&waiter).unwrap();
    releaser.join().unwrap();
    assert!(!waiter_ctx.is_done());
    object.smart_lock().unlock(waiter.id());
    waiter_ctx.cancel();
}

#[test]
fn test_child_contexts_share_total_buckets() {
    let limit = get_limit("lthreads/simul-instances", LimitValue::Int(3)).unwrap();
    let parent = Context::new(ContextConfig::new().with_limits(vec![limit])).unwrap();
    let first = parent.bound_child().unwrap();
    let second = parent.bound_child().unwrap();

    first.take("lthreads/simul-instances", 2).unwrap();
    assert_eq!(second.available("lthreads/simul-instances").unwrap(), 1);
    assert!(second.take("lthreads/simul-instances", 2).is_err());

    first.give_back("lthreads/simul-instances", 2).unwrap();
    assert_eq!(parent.available("lthreads/simul-instances").unwrap(), 3);
}

#[test]
fn test_initial_tokens_of_root_context() {
    let limit = get_limit("lthreads/simul-instances", LimitValue::Int(5)).unwrap();
    let ctx = Context::new(
        ContextConfig::new()
            .with_limits(vec![limit])
            .with_limit_tokens("lthreads/simul-instances", 1),
    )
    .unwrap();
    assert_eq!(ctx.available("lthreads/simul-instances").unwrap(), 1);
}

#[test]
fn test_cancellation_of_parent_stops_child_execution() {
    let parent = Context::new(ContextConfig::new()).unwrap();
    let child = parent.bound_child().unwrap();
    let canceller = {
        let parent = parent.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            parent.cancel();
        })
    };

    let err = run_loop(child.clone());
    canceller.join().unwrap();
    assert!(err.is_cancellation());
    assert!(child.is_done());
}

#[test]
fn test_cpu_time_is_split_between_sibling_contexts() {
    let limit = get_limit(
        EXECUTION_CPU_TIME_LIMIT_NAME,
        LimitValue::Duration(Duration::from_millis(100)),
    )
    .unwrap();
    let parent = Context::new(ContextConfig::new().with_limits(vec![limit])).unwrap();
    let siblings: Vec<_> = (0..2)
        .map(|_| {
            let child = parent.bound_child().unwrap();
            std::thread::spawn(move || run_loop(child))
        })
        .collect();

    let start = Instant::now();
    let err = run_loop(parent.clone());
    let elapsed = start.elapsed();
    assert!(err.is_cancellation());
    assert!(elapsed < Duration::from_millis(80), "cancelled after {:?}", elapsed);
    for sibling in siblings {
        assert!(sibling.join().unwrap().is_cancellation());
    }
}

#[test]
fn test_waiting_for_a_stream_does_not_count_cpu_time() {
    let limit = get_limit(
        EXECUTION_CPU_TIME_LIMIT_NAME,
        LimitValue::Duration(Duration::from_millis(50)),
    )
    .unwrap();
    let ctx = Context::new(ContextConfig::new().with_limits(vec![limit])).unwrap();
    let (sender, stream) = ElementStream::channel();

    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_opcode(Opcode::IterNext);
    w.emit_u8(0);
    w.emit_return(true);
    let main = CompiledFunction::new("main", w.into_bytes()).with_locals(1);
    let state = GlobalState::new(ctx.clone());
    state.set_module(Arc::new(Module::new(
        "stream",
        Bytecode::new(main, vec![Value::Stream(Arc::new(stream))]),
    )));

    let closer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        drop(sender);
    });
    let mut vm = Vm::new(state, Default::default()).unwrap();
    assert_eq!(vm.run().unwrap(), Value::Bool(false));
    closer.join().unwrap();
    assert!(!ctx.is_done());
    ctx.cancel();
}
