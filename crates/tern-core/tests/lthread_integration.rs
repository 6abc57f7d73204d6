//! Integration tests for lthreads: spawning from bytecode, groups, the
//! simultaneous instance limit and failure propagation

use std::sync::Arc;
use std::time::Duration;
use tern_bytecode::{BinaryOperator, BytecodeWriter, Opcode};
use tern_core::config::THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME;
use tern_core::state::Globals;
use tern_core::value::Record;
use tern_core::{
    get_limit, Bytecode, CompiledFunction, Context, ContextConfig, GlobalState, LThread,
    LThreadError, LThreadGroup, LThreadSpawnArgs, LimitValue, Module, Permission, PermissionKind,
    Value, ValueError, Vm, VmError,
};

fn spawner_permissions() -> Vec<Permission> {
    vec![
        Permission::create_lthread(),
        Permission::all_globals(PermissionKind::Read),
        Permission::all_globals(PermissionKind::Use),
        Permission::all_globals(PermissionKind::Create),
    ]
}

fn spawner(config: ContextConfig) -> Arc<GlobalState> {
    GlobalState::new(Context::new(config.with_permissions(spawner_permissions())).unwrap())
}

fn module(name: &str, w: BytecodeWriter, constants: Vec<Value>) -> Arc<Module> {
    Arc::new(Module::new(
        name,
        Bytecode::new(CompiledFunction::new("main", w.into_bytes()), constants),
    ))
}

fn returning(value: Value) -> Arc<Module> {
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_return(true);
    module("embedded", w, vec![value])
}

fn looping() -> Arc<Module> {
    let mut w = BytecodeWriter::new();
    w.emit_jump(Opcode::Jump, 0);
    module("looping", w, vec![])
}

fn spawn_args(spawner: &Arc<GlobalState>, module: Arc<Module>) -> LThreadSpawnArgs {
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

/// Main module running `go <meta> <embedded>` and returning the lthread
fn go_module(meta: Value, embedded: Arc<Module>) -> Arc<Module> {
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_push_nil();
    w.emit_opcode(Opcode::SpawnLThread);
    w.emit_u8(0);
    w.emit_u16(1);
    w.emit_u16(2);
    w.emit_return(true);
    module(
        "main",
        w,
        vec![meta, Value::str("callee"), Value::Module(embedded)],
    )
}

fn run_spawner(state: &Arc<GlobalState>, main: Arc<Module>) -> Result<Value, VmError> {
    state.set_module(main);
    Vm::new(state.clone(), Default::default())?.run()
}

#[test]
fn test_spawn_from_bytecode() {
    let state = spawner(ContextConfig::new());
    let result = run_spawner(&state, go_module(Value::Nil, returning(Value::Int(42)))).unwrap();
    let lthread = match result {
        Value::LThread(lthread) => lthread,
        other => panic!("expected an lthread, got {:?}", other),
    };
    assert_eq!(lthread.wait_result().unwrap(), Value::Int(42));
    assert!(!lthread.context().has_permission(&Permission::create_lthread()));
}

#[test]
fn test_spawn_from_bytecode_requires_permission() {
    let state = GlobalState::new(Context::new(ContextConfig::new()).unwrap());
    let err = run_spawner(&state, go_module(Value::Nil, returning(Value::Nil))).unwrap_err();
    assert!(matches!(err.root(), VmError::Context(_) | VmError::Runtime(_)));
}

#[test]
fn test_spawn_with_globals_and_group() {
    let mut w = BytecodeWriter::new();
    w.emit_get_global(0);
    w.emit_push_constant(1);
    w.emit_int_bin(BinaryOperator::Mul);
    w.emit_return(true);
    let embedded = module("embedded", w, vec![Value::str("x"), Value::Int(2)]);

    let group = Arc::new(LThreadGroup::new());
    let globals = Record::new(vec![(Arc::from("x"), Value::Int(21))]);
    let meta = Value::Record(Arc::new(Record::new(vec![
        (Arc::from("globals"), Value::Record(Arc::new(globals))),
        (Arc::from("group"), Value::LThreadGroup(group.clone())),
    ])));

    let state = spawner(ContextConfig::new());
    run_spawner(&state, go_module(meta, embedded)).unwrap();
    assert_eq!(group.len(), 1);
    assert_eq!(group.wait_all_results().unwrap(), Value::list(vec![Value::Int(42)]));
}

#[test]
fn test_invalid_spawn_description() {
    let state = spawner(ContextConfig::new());
    let err = run_spawner(&state, go_module(Value::Int(1), returning(Value::Nil))).unwrap_err();
    assert!(matches!(err.root(), VmError::Value(ValueError::TypeMismatch { .. })));
}

#[test]
fn test_simultaneous_instance_limit() {
    let limit = get_limit(THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME, LimitValue::Int(1)).unwrap();
    let state = spawner(ContextConfig::new().with_limits(vec![limit]));

    let first = LThread::spawn(spawn_args(&state, looping())).unwrap();
    let second = LThread::spawn(spawn_args(&state, returning(Value::Nil)));
    assert!(matches!(second, Err(LThreadError::Spawn(_))));

    first.cancel();
    assert!(first.wait_result().is_err());
    assert_eq!(
        state.ctx.available(THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME).unwrap(),
        1
    );

    let third = LThread::spawn(spawn_args(&state, returning(Value::Int(3)))).unwrap();
    assert_eq!(third.wait_result().unwrap(), Value::Int(3));
}

#[test]
fn test_initial_tokens_restrict_instances() {
    let limit = get_limit(THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME, LimitValue::Int(5)).unwrap();
    let state = spawner(
        ContextConfig::new()
            .with_limits(vec![limit])
            .with_limit_tokens(THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME, 0),
    );
    let result = LThread::spawn(spawn_args(&state, returning(Value::Nil)));
    assert!(matches!(result, Err(LThreadError::Spawn(_))));
}

#[test]
fn test_failure_is_reported_to_waiter() {
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_push_constant(1);
    w.emit_int_bin(BinaryOperator::Div);
    w.emit_return(true);
    let failing = module("failing", w, vec![Value::Int(1), Value::Int(0)]);

    let state = spawner(ContextConfig::new());
    let lthread = LThread::spawn(spawn_args(&state, failing)).unwrap();
    match lthread.wait_result() {
        Err(LThreadError::Vm(err)) => {
            assert_eq!(err.root(), &VmError::Value(ValueError::IntDivisionByZero))
        }
        other => panic!("expected a VM failure, got {:?}", other),
    }
    assert!(lthread.is_done());
}

#[test]
fn test_cancelling_spawner_cancels_lthreads() {
    let state = spawner(ContextConfig::new());
    let lthread = LThread::spawn(spawn_args(&state, looping())).unwrap();

    state.ctx.cancel();
    assert!(lthread.context().wait_done(Duration::from_secs(2)));
    assert!(lthread.context().is_done());
}

#[test]
fn test_paused_after_each_yield() {
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_yield(true);
    w.emit_push_constant(1);
    w.emit_yield(true);
    w.emit_push_constant(2);
    w.emit_return(true);
    let stepping = module(
        "stepping",
        w,
        vec![Value::Int(1), Value::Int(2), Value::Int(3)],
    );

    let state = spawner(ContextConfig::new());
    let mut args = spawn_args(&state, stepping);
    args.pause_after_yield = true;
    let lthread = LThread::spawn(args).unwrap();

    for expected in 1..=2 {
        while !(lthread.is_paused() && lthread.executed_steps().len() == expected) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let steps = lthread.executed_steps();
        assert_eq!(steps[expected - 1].result, Value::Int(expected as i64));
        lthread.resume_async().unwrap();
    }
    assert_eq!(lthread.wait_result().unwrap(), Value::Int(3));
}

#[test]
fn test_instance_token_returns_to_ancestor_after_spawner_cancel() {
    let limit = get_limit(THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME, LimitValue::Int(1)).unwrap();
    let root = Context::new(
        ContextConfig::new()
            .with_limits(vec![limit])
            .with_permissions(spawner_permissions()),
    )
    .unwrap();
    let state = GlobalState::new(root.bound_child().unwrap());

    let mut args = spawn_args(&state, returning(Value::Nil));
    args.start_paused = true;
    let lthread = LThread::spawn(args).unwrap();
    assert_eq!(root.available(THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME).unwrap(), 0);

    state.ctx.cancel();
    assert!(lthread.wait_result().is_err());
    assert_eq!(root.available(THREADS_SIMULTANEOUS_INSTANCES_LIMIT_NAME).unwrap(), 1);
    root.cancel();
}
