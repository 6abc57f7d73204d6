//! Concurrency opcode handlers: DropPerms, SpawnLThread, BlockLock, BlockUnlock,
//! CreateReceptionHandler, SendValue

use crate::bytecode::Module;
use crate::context::permissions::Permission;
use crate::context::{Context, ContextConfig};
use crate::error::{ValueError, VmError, VmResult};
use crate::lthread::{LThread, LThreadSpawnArgs};
use crate::state::Globals;
use crate::value::{share_or_clone, MessageHandler, NativeCall, Pattern, Value};
use crate::vm::{OpcodeResult, Vm};
use std::sync::Arc;
use tern_bytecode::Opcode;
use tracing::debug;

impl Vm {
    pub(in crate::vm) fn exec_concurrency_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::DropPerms => {
                let listing = self.pop()?;
                let permissions = Permission::from_listing(&listing)?;
                self.state.ctx.drop_permissions(&permissions);
            }

            Opcode::SpawnLThread => {
                let single_expression = self.read_flag()?;
                let callee_name = self.read_str_constant()?;
                let module_index = self.read_u16()? as usize;
                let module = match self.constant(module_index)? {
                    Value::Module(module) => module,
                    other => return Err(ValueError::mismatch("module", &other).into()),
                };
                let callee = self.pop()?;
                let meta = self.pop()?;
                let lthread = self.spawn_lthread(&meta, single_expression, &callee_name, callee, module)?;
                self.push(Value::LThread(lthread))?;
            }

            Opcode::BlockLock => {
                let count = self.read_u8()? as usize;
                let values = self.pop_n(count)?;
                let start = self.current.locked_values.len();
                self.current.lock_blocks.push(start);
                for value in values {
                    match &value {
                        Value::Object(object) => {
                            if !object.is_shared() {
                                object.share(&self.state)?;
                            }
                            object.smart_lock().force_lock(&self.state)?;
                        }
                        value if !value.is_mutable() => continue,
                        other => {
                            return Err(ValueError::CannotLockUnsharableValue(other.type_name()).into())
                        }
                    }
                    self.state.add_locked_value(value.clone());
                    self.current.locked_values.push(value);
                }
            }

            Opcode::BlockUnlock => {
                let start = self
                    .current
                    .lock_blocks
                    .pop()
                    .ok_or_else(|| VmError::Runtime("no lock block to leave".to_string()))?;
                let unlocked = self.current.locked_values.split_off(start);
                for value in unlocked.iter().rev() {
                    if let Value::Object(object) = value {
                        object.smart_lock().unlock(self.state.id());
                    }
                    self.state.remove_locked_value(value);
                }
            }

            Opcode::CreateReceptionHandler => {
                let handler = self.pop()?;
                let pattern = Pattern::from_value(self.pop()?);
                if !matches!(handler, Value::Function(_) | Value::NativeFunction(_)) {
                    return Err(ValueError::mismatch("function", &handler).into());
                }
                self.push(Value::MessageHandler(Arc::new(MessageHandler { pattern, handler })))?;
            }

            Opcode::SendValue => {
                let receiver = self.pop()?;
                if self.current.self_value.is_nil() {
                    return Err(VmError::Runtime(
                        "values can only be sent from a method".to_string(),
                    ));
                }
                let message = share_or_clone(self.peek(0)?, &self.state)?;
                self.deliver(&receiver, message)?;
                self.replace_top(Value::Nil)?;
            }

            _ => unreachable!("Not a concurrency opcode: {:?}", opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    /// Run the handlers of `receiver` whose pattern matches `message`
    fn deliver(&self, receiver: &Value, message: Value) -> VmResult<()> {
        let object = match receiver {
            Value::Object(object) => object,
            other => return Err(ValueError::mismatch("object", other).into()),
        };
        for handler in object.handlers() {
            if !handler.pattern.test(&message) {
                continue;
            }
            match &handler.handler {
                Value::Function(function) => {
                    let mut vm = Vm::for_function(
                        self.state.clone(),
                        function.clone(),
                        receiver.clone(),
                        vec![message.clone()],
                        self.config.clone(),
                    )?;
                    vm.run()?;
                }
                Value::NativeFunction(native) => {
                    let call = NativeCall {
                        state: &self.state,
                        self_value: receiver,
                    };
                    native.call(&call, vec![message.clone()])?;
                }
                other => return Err(VmError::NotCallable(other.type_name())),
            }
        }
        Ok(())
    }

    /// Spawn the lthread of a `go` expression. `meta` is nil or a
    /// description with optional `group`, `globals` and `allow` properties.
    fn spawn_lthread(
        &self,
        meta: &Value,
        single_expression: bool,
        callee_name: &str,
        callee: Value,
        module: Arc<Module>,
    ) -> VmResult<Arc<LThread>> {
        let property = |name: &str| -> VmResult<Option<Value>> {
            Ok(match meta {
                Value::Nil => None,
                Value::Record(record) => record.prop(name).cloned(),
                Value::Object(object) => object.prop(&self.state, name)?,
                other => return Err(ValueError::mismatch("lthread description", other).into()),
            })
        };

        let globals = Globals::default();
        match property("globals")? {
            None | Some(Value::Nil) => {}
            Some(Value::KeyList(names)) => {
                for name in names.iter() {
                    let value = self
                        .state
                        .globals
                        .get(name)
                        .ok_or_else(|| VmError::GlobalNotDefined(name.to_string()))?;
                    globals.set(name, value)?;
                }
            }
            Some(Value::Record(record)) => {
                for (name, value) in record.entries() {
                    globals.set(name, value.clone())?;
                }
            }
            Some(Value::Object(object)) => {
                for (name, value) in object.entries() {
                    globals.set(&name, value)?;
                }
            }
            Some(other) => return Err(ValueError::mismatch("globals description", &other).into()),
        }
        if single_expression {
            globals.set(callee_name, callee)?;
        }

        let ctx = match property("allow")? {
            None | Some(Value::Nil) => self.state.ctx.child_without(&[Permission::create_lthread()])?,
            Some(listing) => {
                let permissions = Permission::from_listing(&listing)?;
                for permission in &permissions {
                    self.state.ctx.check_has_permission(permission)?;
                }
                Context::new(ContextConfig {
                    permissions,
                    forbidden_permissions: self.state.ctx.forbidden_permissions(),
                    parent: Some(self.state.ctx.clone()),
                    ..Default::default()
                })?
            }
        };

        let group = match property("group")? {
            None | Some(Value::Nil) => None,
            Some(Value::LThreadGroup(group)) => Some(group),
            Some(other) => return Err(ValueError::mismatch("lthread group", &other).into()),
        };

        debug!(module = %module.name, parent = self.state.id().as_u64(), "spawning lthread");
        let lthread = LThread::spawn(LThreadSpawnArgs {
            spawner_state: self.state.clone(),
            globals,
            module,
            context: Some(ctx),
            is_test_case: false,
            ignore_create_permission: false,
            pause_after_yield: false,
            start_paused: false,
            timeout: None,
            self_value: Value::Nil,
        })?;
        if let Some(group) = group {
            group.add(lthread.clone())?;
        }
        Ok(lthread)
    }
}
