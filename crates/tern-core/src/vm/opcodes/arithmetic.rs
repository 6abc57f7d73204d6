//! Arithmetic opcode handlers: IntBin, FloatBin, NumBin, PseudoArith, Minus, BooleanNot

use crate::error::VmResult;
use crate::value::arith;
use crate::value::Value;
use crate::vm::{OpcodeResult, Vm};
use tern_bytecode::Opcode;

impl Vm {
    pub(in crate::vm) fn exec_arithmetic_ops(&mut self, opcode: Opcode) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::IntBin => {
                let op = self.read_operator()?;
                let right = self.pop()?.as_int()?;
                let left = self.pop()?.as_int()?;
                self.push(arith::int_bin(op, left, right)?)?;
            }

            Opcode::FloatBin => {
                let op = self.read_operator()?;
                let right = self.pop()?.as_float()?;
                let left = self.pop()?.as_float()?;
                self.push(arith::float_bin(op, left, right)?)?;
            }

            Opcode::NumBin => {
                let op = self.read_operator()?;
                let right = self.pop()?;
                let left = self.pop()?;
                self.push(arith::num_bin(op, &left, &right)?)?;
            }

            Opcode::PseudoArith => {
                let op = self.read_operator()?;
                let right = self.pop()?;
                let left = self.pop()?;
                self.push(arith::pseudo_arith(op, &left, &right)?)?;
            }

            Opcode::Minus => {
                let value = self.pop()?;
                self.push(arith::negate(&value)?)?;
            }

            Opcode::BooleanNot => {
                let value = self.pop()?.as_bool()?;
                self.push(Value::Bool(!value))?;
            }

            _ => unreachable!("Not an arithmetic opcode: {:?}", opcode),
        }
        Ok(OpcodeResult::Continue)
    }
}
