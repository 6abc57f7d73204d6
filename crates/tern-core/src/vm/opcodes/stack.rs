//! Stack opcode handlers: Nop, Pop, CopyTop, Swap, MoveThirdTop, PushConstant, PushNil, PushTrue, PushFalse

use crate::error::VmResult;
use crate::value::Value;
use crate::vm::{OpcodeResult, Vm};
use tern_bytecode::Opcode;

impl Vm {
    pub(in crate::vm) fn exec_stack_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::Nop => {}

            Opcode::Pop => {
                self.pop()?;
            }

            Opcode::CopyTop => {
                let top = self.peek(0)?.clone();
                self.push(top)?;
            }

            Opcode::Swap => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a)?;
                self.push(b)?;
            }

            Opcode::MoveThirdTop => {
                // [a, b, c] -> [b, c, a]
                let mut values = self.pop_n(3)?;
                values.rotate_left(1);
                for value in values {
                    self.push(value)?;
                }
            }

            Opcode::PushConstant => {
                let index = self.read_u16()? as usize;
                let value = self.constant(index)?;
                self.push(value)?;
            }

            Opcode::PushNil => self.push(Value::Nil)?,
            Opcode::PushTrue => self.push(Value::Bool(true))?,
            Opcode::PushFalse => self.push(Value::Bool(false))?,

            _ => unreachable!("Not a stack opcode: {:?}", opcode),
        }
        Ok(OpcodeResult::Continue)
    }
}
