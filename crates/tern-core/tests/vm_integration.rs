//! Integration tests for the interpreter: calls, globals, composites, errors

use std::sync::Arc;
use tern_bytecode::{BinaryOperator, BytecodeWriter, Opcode};
use tern_core::value::{Function, List, MessageHandler, NativeFunction, Object, Pattern};
use tern_core::{
    Bytecode, CompiledFunction, Context, ContextConfig, ContextError, GlobalState, Module,
    ModuleKind, Permission, PermissionKind, SourcePosition, Value, ValueError, Vm, VmConfig,
    VmError,
};

fn state_with(permissions: Vec<Permission>) -> Arc<GlobalState> {
    GlobalState::new(Context::new(ContextConfig::new().with_permissions(permissions)).unwrap())
}

fn run_main(state: &Arc<GlobalState>, main: CompiledFunction, constants: Vec<Value>) -> Result<Value, VmError> {
    state.set_module(Arc::new(Module::new("main", Bytecode::new(main, constants))));
    let mut vm = Vm::new(state.clone(), Default::default())?;
    vm.run()
}

fn run(w: BytecodeWriter, locals: usize, constants: Vec<Value>) -> Result<Value, VmError> {
    let main = CompiledFunction::new("main", w.into_bytes()).with_locals(locals);
    run_main(&state_with(vec![]), main, constants)
}

#[test]
fn test_arithmetic_expression() {
    // (1 + 2) * 3
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_push_constant(1);
    w.emit_int_bin(BinaryOperator::Add);
    w.emit_push_constant(2);
    w.emit_int_bin(BinaryOperator::Mul);
    w.emit_return(true);

    let result = run(w, 0, vec![Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
    assert_eq!(result, Value::Int(9));
}

#[test]
fn test_loop_with_locals() {
    // i = 0; sum = 0; while i < 10 { sum = sum + i; i = i + 1 }; return sum
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_set_local(0);
    w.emit_push_constant(0);
    w.emit_set_local(1);

    let loop_start = w.offset() as u16;
    w.emit_get_local(0);
    w.emit_push_constant(2);
    w.emit_opcode(Opcode::Less);
    let exit = w.emit_jump(Opcode::JumpIfFalse, 0);

    w.emit_get_local(1);
    w.emit_get_local(0);
    w.emit_int_bin(BinaryOperator::Add);
    w.emit_set_local(1);
    w.emit_get_local(0);
    w.emit_push_constant(1);
    w.emit_int_bin(BinaryOperator::Add);
    w.emit_set_local(0);
    w.emit_jump(Opcode::Jump, loop_start);

    let end = w.offset() as u16;
    w.patch_jump(exit, end);
    w.emit_get_local(1);
    w.emit_return(true);

    let result = run(w, 2, vec![Value::Int(0), Value::Int(1), Value::Int(10)]).unwrap();
    assert_eq!(result, Value::Int(45));
}

#[test]
fn test_call_compiled_function() {
    let mut body = BytecodeWriter::new();
    body.emit_get_local(0);
    body.emit_get_local(1);
    body.emit_int_bin(BinaryOperator::Sub);
    body.emit_return(true);
    let sub = CompiledFunction::new("sub", body.into_bytes())
        .with_params(2)
        .with_locals(2);
    let sub = Value::Function(Arc::new(Function::new(sub)));

    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_push_constant(1);
    w.emit_push_nil();
    w.emit_push_constant(2);
    w.emit_call(2, false, false);
    w.emit_return(true);

    let result = run(w, 0, vec![Value::Int(10), Value::Int(4), sub]).unwrap();
    assert_eq!(result, Value::Int(6));
}

#[test]
fn test_call_with_wrong_argument_count() {
    let mut body = BytecodeWriter::new();
    body.emit_push_nil();
    body.emit_return(true);
    let f = CompiledFunction::new("f", body.into_bytes()).with_params(1).with_locals(1);

    let mut w = BytecodeWriter::new();
    w.emit_push_nil();
    w.emit_push_constant(0);
    w.emit_call(0, false, false);
    w.emit_return(true);

    let err = run(w, 0, vec![Value::Function(Arc::new(Function::new(f)))]).unwrap_err();
    assert_eq!(
        err.root(),
        &VmError::WrongArgumentCount {
            expected: 1,
            got: 0,
            variadic: false
        }
    );
}

#[test]
fn test_variadic_function_collects_rest() {
    let mut body = BytecodeWriter::new();
    body.emit_get_local(1);
    body.emit_return(true);
    let f = CompiledFunction::new("f", body.into_bytes())
        .with_params(2)
        .variadic()
        .with_locals(2);

    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_push_constant(1);
    w.emit_push_constant(2);
    w.emit_push_nil();
    w.emit_push_constant(3);
    w.emit_call(3, false, false);
    w.emit_return(true);

    let constants = vec![
        Value::Int(1),
        Value::Int(2),
        Value::Int(3),
        Value::Function(Arc::new(Function::new(f))),
    ];
    let result = run(w, 0, constants).unwrap();
    assert_eq!(result, Value::list(vec![Value::Int(2), Value::Int(3)]));
}

#[test]
fn test_must_call_of_failing_native_function() {
    let native = NativeFunction::new("fail", |_, _| Ok(Some(Value::error("not found"))));

    let mut w = BytecodeWriter::new();
    w.emit_push_nil();
    w.emit_push_constant(0);
    w.emit_call(0, false, true);
    w.emit_return(true);

    let err = run(w, 0, vec![Value::NativeFunction(Arc::new(native))]).unwrap_err();
    assert_eq!(err.root(), &VmError::Runtime("not found".to_string()));
}

#[test]
fn test_set_global_requires_permission() {
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(1);
    w.emit_set_global(0);
    w.emit_get_global(0);
    w.emit_return(true);
    let main = || CompiledFunction::new("main", w.buffer().to_vec());
    let constants = || vec![Value::str("counter"), Value::Int(7)];

    let denied = state_with(vec![]);
    let err = run_main(&denied, main(), constants()).unwrap_err();
    assert!(matches!(
        err.root(),
        VmError::Context(ContextError::NotAllowed(_))
    ));
    assert!(!denied.globals.has("counter"));

    let allowed = state_with(vec![Permission::global(PermissionKind::Create, "counter")]);
    assert_eq!(run_main(&allowed, main(), constants()).unwrap(), Value::Int(7));
    assert_eq!(allowed.globals.get("counter"), Some(Value::Int(7)));
}

#[test]
fn test_undefined_global() {
    let mut w = BytecodeWriter::new();
    w.emit_get_global(0);
    w.emit_return(true);

    let err = run(w, 0, vec![Value::str("missing")]).unwrap_err();
    assert_eq!(err.root(), &VmError::GlobalNotDefined("missing".to_string()));
}

#[test]
fn test_object_members() {
    // {a: 1, b: 2}.b
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_push_constant(1);
    w.emit_push_constant(2);
    w.emit_push_constant(3);
    w.emit_create_object(2);
    w.emit_memb(2);
    w.emit_return(true);

    let constants = vec![Value::str("a"), Value::Int(1), Value::str("b"), Value::Int(2)];
    assert_eq!(run(w, 0, constants).unwrap(), Value::Int(2));
}

#[test]
fn test_list_index_out_of_range() {
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_push_constant(1);
    w.emit_create_list(2);
    w.emit_push_constant(2);
    w.emit_opcode(Opcode::At);
    w.emit_return(true);

    let err = run(w, 0, vec![Value::Int(1), Value::Int(2), Value::Int(5)]).unwrap_err();
    assert!(matches!(
        err.root(),
        VmError::Value(ValueError::IndexOutOfRange { .. })
    ));
}

#[test]
fn test_error_location_lists_frames() {
    let mut body = BytecodeWriter::new();
    body.emit_push_constant(0);
    body.emit_push_constant(1);
    body.emit_int_bin(BinaryOperator::Div);
    body.emit_return(true);
    let divide = CompiledFunction::new("divide", body.into_bytes())
        .with_source_map(vec![(0, SourcePosition::new("lib.tn", 3, 5))]);

    let mut w = BytecodeWriter::new();
    w.emit_push_nil();
    w.emit_push_constant(2);
    w.emit_call(0, false, false);
    w.emit_return(true);
    let main = CompiledFunction::new("main", w.into_bytes())
        .with_source_map(vec![(0, SourcePosition::new("main.tn", 1, 1))]);

    let constants = vec![
        Value::Int(1),
        Value::Int(0),
        Value::Function(Arc::new(Function::new(divide))),
    ];
    let err = run_main(&state_with(vec![]), main, constants).unwrap_err();
    match &err {
        VmError::Located(located) => {
            assert_eq!(located.location.len(), 2);
            assert_eq!(located.location[0], SourcePosition::new("lib.tn", 3, 5));
            assert_eq!(located.location[1], SourcePosition::new("main.tn", 1, 1));
        }
        other => panic!("expected a located error, got {:?}", other),
    }
    assert_eq!(err.root(), &VmError::Value(ValueError::IntDivisionByZero));
}

#[test]
fn test_block_lock_released_on_error() {
    let state = state_with(vec![]);
    let object = Arc::new(Object::new(vec![(Arc::from("n"), Value::Int(0))]));
    state.globals.set("obj", Value::Object(object.clone())).unwrap();

    let mut w = BytecodeWriter::new();
    w.emit_get_global(0);
    w.emit_block_lock(1);
    w.emit_push_constant(1);
    w.emit_push_constant(2);
    w.emit_int_bin(BinaryOperator::Div);
    w.emit_block_unlock();
    w.emit_return(true);
    let main = CompiledFunction::new("main", w.into_bytes());

    let constants = vec![Value::str("obj"), Value::Int(1), Value::Int(0)];
    assert!(run_main(&state, main, constants).is_err());
    assert!(object.is_shared());
    assert!(!object.smart_lock().is_held_by(state.id()));
    assert_eq!(state.locked_value_count(), 0);
}

#[test]
fn test_block_unlock_releases_objects() {
    let state = state_with(vec![]);
    let object = Arc::new(Object::new(vec![]));
    state.globals.set("obj", Value::Object(object.clone())).unwrap();

    let mut w = BytecodeWriter::new();
    w.emit_get_global(0);
    w.emit_block_lock(1);
    w.emit_block_unlock();
    w.emit_push_nil();
    w.emit_return(true);
    let main = CompiledFunction::new("main", w.into_bytes());

    assert_eq!(run_main(&state, main, vec![Value::str("obj")]).unwrap(), Value::Nil);
    assert!(!object.smart_lock().is_held_by(state.id()));
    assert_eq!(state.locked_value_count(), 0);
}

#[test]
fn test_abort_handle_stops_infinite_loop() {
    let mut w = BytecodeWriter::new();
    w.emit_jump(Opcode::Jump, 0);
    let state = state_with(vec![]);
    state.set_module(Arc::new(Module::new(
        "main",
        Bytecode::new(CompiledFunction::new("main", w.into_bytes()), vec![]),
    )));

    let mut vm = Vm::new(state, Default::default()).unwrap();
    let handle = vm.abort_handle();
    let aborter = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        handle.abort();
    });
    let err = vm.run().unwrap_err();
    aborter.join().unwrap();
    assert_eq!(err.root(), &VmError::Aborted);
}

#[test]
fn test_cancelled_context_stops_execution() {
    let mut w = BytecodeWriter::new();
    w.emit_jump(Opcode::Jump, 0);
    let state = state_with(vec![]);
    let ctx = state.ctx.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        ctx.cancel();
    });

    let err = run_main(&state, CompiledFunction::new("main", w.into_bytes()), vec![]).unwrap_err();
    canceller.join().unwrap();
    assert!(err.is_cancellation());
}

#[test]
fn test_float_and_num_operations() {
    // (1.5 + 2.0) * 2.0
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_push_constant(1);
    w.emit_num_bin(BinaryOperator::Add);
    w.emit_push_constant(1);
    w.emit_float_bin(BinaryOperator::Mul);
    w.emit_return(true);

    let result = run(w, 0, vec![Value::Float(1.5), Value::Float(2.0)]).unwrap();
    assert_eq!(result, Value::Float(7.0));
}

#[test]
fn test_recursion_is_bounded_by_max_frames() {
    let mut body = BytecodeWriter::new();
    body.emit_push_nil();
    body.emit_get_global(0);
    body.emit_call(0, false, false);
    body.emit_return(true);
    let recurse = Value::Function(Arc::new(Function::new(CompiledFunction::new(
        "recurse",
        body.into_bytes(),
    ))));

    let mut w = BytecodeWriter::new();
    w.emit_push_nil();
    w.emit_get_global(0);
    w.emit_call(0, false, false);
    w.emit_return(true);

    let state = state_with(vec![]);
    state.globals.set("recurse", recurse).unwrap();
    state.set_module(Arc::new(Module::new(
        "main",
        Bytecode::new(CompiledFunction::new("main", w.into_bytes()), vec![Value::str("recurse")]),
    )));
    let mut vm = Vm::new(state, VmConfig::default().with_max_frames(4)).unwrap();
    assert_eq!(vm.run().unwrap_err().root(), &VmError::StackOverflow);
}

#[test]
fn test_main_locals_must_fit_the_stack() {
    let main = CompiledFunction::new("main", vec![]).with_locals(8);
    let state = state_with(vec![]);
    state.set_module(Arc::new(Module::new("main", Bytecode::new(main, vec![]))));
    let result = Vm::new(state, VmConfig::default().with_stack_size(4));
    assert!(matches!(result, Err(VmError::StackOverflow)));
}

#[test]
fn test_captured_globals_are_scoped_to_the_call() {
    let mut body = BytecodeWriter::new();
    body.emit_get_global(0);
    body.emit_return(true);
    let f = Function::new(CompiledFunction::new("f", body.into_bytes()))
        .with_captured_globals(vec![(Arc::from("g"), Value::Int(3))]);

    let mut w = BytecodeWriter::new();
    w.emit_push_nil();
    w.emit_push_constant(1);
    w.emit_call(0, false, false);
    w.emit_return(true);

    let state = state_with(vec![]);
    let main = CompiledFunction::new("main", w.into_bytes());
    let constants = vec![Value::str("g"), Value::Function(Arc::new(f))];
    assert_eq!(run_main(&state, main, constants).unwrap(), Value::Int(3));
    assert!(!state.globals.has("g"));
}

#[test]
fn test_suspend_and_resume() {
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_opcode(Opcode::SuspendVM);
    w.emit_push_constant(1);
    w.emit_int_bin(BinaryOperator::Add);
    w.emit_return(true);

    let state = state_with(vec![]);
    state.set_module(Arc::new(Module::new(
        "main",
        Bytecode::new(
            CompiledFunction::new("main", w.into_bytes()),
            vec![Value::Int(1), Value::Int(2)],
        ),
    )));
    let mut vm = Vm::new(state, Default::default()).unwrap();
    assert_eq!(vm.run().unwrap(), Value::Nil);
    assert!(vm.is_suspended());
    assert_eq!(vm.resume().unwrap(), Value::Int(3));
    assert!(!vm.is_suspended());
    assert!(vm.resume().is_err());
}

#[test]
fn test_failed_assertion_in_test_case() {
    let mut w = BytecodeWriter::new();
    w.emit_push_bool(false);
    w.emit_opcode(Opcode::Assert);
    w.emit_u16(0);
    w.emit_push_nil();
    w.emit_return(true);
    let main = CompiledFunction::new("main", w.into_bytes());
    let module = Module::new("test", Bytecode::new(main, vec![Value::str("assert ok")]))
        .with_kind(ModuleKind::TestCase);

    let state = state_with(vec![]);
    state.set_module(Arc::new(module));
    let err = Vm::new(state, Default::default()).unwrap().run().unwrap_err();
    match err.root() {
        VmError::Assertion(assertion) => {
            assert_eq!(assertion.statement, "assert ok");
            assert!(assertion.in_test);
        }
        other => panic!("expected an assertion error, got {:?}", other),
    }
}

#[test]
fn test_send_value_runs_matching_handlers() {
    let received = Arc::new(List::new(vec![]));
    let handler = {
        let received = received.clone();
        NativeFunction::new("on_five", move |call, args| {
            assert!(matches!(call.self_value, Value::Object(_)));
            received.extend(args);
            Ok(None)
        })
    };
    let object = Arc::new(Object::new(vec![]));
    object.add_handlers([Arc::new(MessageHandler {
        pattern: Pattern::from_value(Value::Int(5)),
        handler: Value::NativeFunction(Arc::new(handler)),
    })]);

    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_opcode(Opcode::GetSelf);
    w.emit_opcode(Opcode::SendValue);
    w.emit_push_constant(1);
    w.emit_opcode(Opcode::GetSelf);
    w.emit_opcode(Opcode::SendValue);
    w.emit_return(true);

    let state = state_with(vec![]);
    state.set_module(Arc::new(Module::new(
        "main",
        Bytecode::new(
            CompiledFunction::new("main", w.into_bytes()),
            vec![Value::Int(5), Value::Int(6)],
        ),
    )));
    let mut vm = Vm::new(state, Default::default())
        .unwrap()
        .with_self_value(Value::Object(object));
    assert_eq!(vm.run().unwrap(), Value::Nil);
    assert_eq!(received.snapshot(), vec![Value::Int(5)]);
}

#[test]
fn test_shared_function_arguments_are_shared_or_cloned() {
    let received = Arc::new(List::new(vec![]));
    let record = {
        let received = received.clone();
        NativeFunction::new("record", move |_, args| {
            received.extend(args);
            Ok(None)
        })
    };

    // f(x) { record(x) }, shared from another state
    let mut body = BytecodeWriter::new();
    body.emit_get_local(0);
    body.emit_push_nil();
    body.emit_push_constant(0);
    body.emit_call(1, false, false);
    body.emit_return(true);
    let origin = state_with(vec![]);
    origin.set_module(Arc::new(Module::new(
        "origin",
        Bytecode::new(
            CompiledFunction::new("origin", vec![]),
            vec![Value::NativeFunction(Arc::new(record))],
        ),
    )));
    let f = Arc::new(Function::new(
        CompiledFunction::new("f", body.into_bytes()).with_params(1).with_locals(1),
    ))
    .share(&origin)
    .unwrap();

    let list = Value::list(vec![Value::Int(1)]);
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_push_nil();
    w.emit_push_constant(1);
    w.emit_call(1, false, false);
    w.emit_return(true);

    let state = state_with(vec![]);
    let main = CompiledFunction::new("main", w.into_bytes());
    run_main(&state, main, vec![list.clone(), Value::Function(f)]).unwrap();

    let received = received.snapshot();
    assert_eq!(received, vec![Value::list(vec![Value::Int(1)])]);
    assert!(!received[0].same(&list));
}

#[test]
fn test_callee_lock_block_keeps_caller_lock() {
    let object = Arc::new(Object::new(vec![]));
    let held = {
        let object = object.clone();
        NativeFunction::new("held", move |call, _| {
            Ok(Some(Value::Bool(object.smart_lock().is_held_by(call.state.id()))))
        })
    };

    // f(o) { lock o { return nil } }
    let mut body = BytecodeWriter::new();
    body.emit_get_local(0);
    body.emit_block_lock(1);
    body.emit_push_nil();
    body.emit_return(true);
    let f = CompiledFunction::new("f", body.into_bytes()).with_params(1).with_locals(1);

    // lock o { f(o); held() }
    let mut w = BytecodeWriter::new();
    w.emit_push_constant(0);
    w.emit_block_lock(1);
    w.emit_push_constant(0);
    w.emit_push_nil();
    w.emit_push_constant(1);
    w.emit_call(1, false, false);
    w.emit_pop();
    w.emit_push_nil();
    w.emit_push_constant(2);
    w.emit_call(0, false, false);
    w.emit_block_unlock();
    w.emit_return(true);

    let state = state_with(vec![]);
    let constants = vec![
        Value::Object(object.clone()),
        Value::Function(Arc::new(Function::new(f))),
        Value::NativeFunction(Arc::new(held)),
    ];
    let main = CompiledFunction::new("main", w.into_bytes());
    assert_eq!(run_main(&state, main, constants).unwrap(), Value::Bool(true));
    assert!(!object.smart_lock().is_held_by(state.id()));
    assert_eq!(state.locked_value_count(), 0);
}
