//! Control flow opcode handlers: Jump, JumpIfFalse, AndJump, OrJump
//!
//! Jump targets are absolute offsets into the current function's code.

use crate::error::VmResult;
use crate::vm::{OpcodeResult, Vm};
use tern_bytecode::Opcode;

impl Vm {
    pub(in crate::vm) fn exec_control_flow_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        let target = self.read_u16()? as usize;
        match opcode {
            Opcode::Jump => self.current.ip = target,

            Opcode::JumpIfFalse => {
                if !self.pop()?.to_bool() {
                    self.current.ip = target;
                }
            }

            Opcode::AndJump => {
                if self.peek(0)?.to_bool() {
                    self.pop()?;
                } else {
                    self.current.ip = target;
                }
            }

            Opcode::OrJump => {
                if self.peek(0)?.to_bool() {
                    self.current.ip = target;
                } else {
                    self.pop()?;
                }
            }

            _ => unreachable!("Not a control flow opcode: {:?}", opcode),
        }
        Ok(OpcodeResult::Continue)
    }
}
