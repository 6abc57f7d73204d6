//! Variable opcode handlers: GetLocal, SetLocal, GetGlobal, SetGlobal, GetSelf, ResolveHost, AddHostAlias

use crate::context::{Permission, PermissionKind};
use crate::error::{VmError, VmResult};
use crate::vm::{OpcodeResult, Vm};
use tern_bytecode::Opcode;

fn alias_name(name: &str) -> &str {
    name.strip_prefix('@').unwrap_or(name)
}

impl Vm {
    pub(in crate::vm) fn exec_variable_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::GetLocal => {
                let index = self.read_u8()? as usize;
                let slot = self.local_slot(index)?;
                let value = self.stack[slot].clone();
                self.push(value)?;
            }

            Opcode::SetLocal => {
                let index = self.read_u8()? as usize;
                let slot = self.local_slot(index)?;
                let value = self.pop()?;
                self.stack[slot] = value;
            }

            Opcode::GetGlobal => {
                let name = self.read_str_constant()?;
                let value = self
                    .state
                    .globals
                    .get(&name)
                    .ok_or_else(|| VmError::GlobalNotDefined(name.to_string()))?;
                self.push(value)?;
            }

            Opcode::SetGlobal => {
                let name = self.read_str_constant()?;
                let value = self.pop()?;
                let kind = if self.state.globals.has(&name) {
                    PermissionKind::Update
                } else {
                    PermissionKind::Create
                };
                self.state
                    .ctx
                    .check_has_permission(&Permission::global(kind, name.as_ref()))?;
                self.state.globals.set(&name, value)?;
            }

            Opcode::GetSelf => {
                let value = self.current.self_value.clone();
                self.push(value)?;
            }

            Opcode::ResolveHost => {
                let name = self.read_str_constant()?;
                let name = alias_name(&name);
                let host = self
                    .state
                    .ctx
                    .resolve_host_alias(name)
                    .ok_or_else(|| VmError::Runtime(format!("host alias @{} is not defined", name)))?;
                self.push(host)?;
            }

            Opcode::AddHostAlias => {
                let name = self.read_str_constant()?;
                let host = self.pop()?;
                self.state.ctx.add_host_alias(alias_name(&name), host)?;
            }

            _ => unreachable!("Not a variable opcode: {:?}", opcode),
        }
        Ok(OpcodeResult::Continue)
    }
}
