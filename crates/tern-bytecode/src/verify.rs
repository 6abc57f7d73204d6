//! Bytecode verification
//!
//! Structural checks run before a function is handed to the interpreter:
//! every opcode is known, operands are complete, jump targets land on
//! instruction boundaries and local/constant references are in range.

use crate::encoder::{BytecodeReader, DecodeError};
use crate::opcode::Opcode;
use std::collections::HashSet;

/// Bytecode verification errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Decoding failed
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid jump target
    #[error("Invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget {
        /// Target that does not start an instruction
        target: usize,
        /// Offset of the jump
        offset: usize,
    },

    /// Invalid constant pool reference
    #[error("Invalid constant pool reference: index {index} at offset {offset}")]
    InvalidConstantRef {
        /// Referenced index
        index: usize,
        /// Offset of the instruction
        offset: usize,
    },

    /// Invalid local variable reference
    #[error("Invalid local variable reference: index {index} (max {max}) at offset {offset}")]
    InvalidLocalRef {
        /// Referenced index
        index: usize,
        /// Number of locals of the function
        max: usize,
        /// Offset of the instruction
        offset: usize,
    },
}

/// Limits an instruction stream is verified against
#[derive(Debug, Clone, Copy)]
pub struct VerifyLimits {
    /// Number of parameter and local slots of the function
    pub local_count: usize,
    /// Size of the constant pool
    pub constant_count: usize,
}

/// Verify one function's instruction stream
pub fn verify_instructions(code: &[u8], limits: VerifyLimits) -> Result<(), VerifyError> {
    let mut reader = BytecodeReader::new(code);
    let mut boundaries = HashSet::new();
    let mut jumps = Vec::new();

    while reader.has_more() {
        let offset = reader.position();
        boundaries.insert(offset);
        let opcode = reader.read_opcode()?;

        match opcode {
            Opcode::GetLocal
            | Opcode::SetLocal
            | Opcode::IterNext
            | Opcode::IterNextChunk
            | Opcode::IterValue => {
                let index = reader.read_u8()? as usize;
                if index >= limits.local_count {
                    return Err(VerifyError::InvalidLocalRef {
                        index,
                        max: limits.local_count,
                        offset,
                    });
                }
            }
            Opcode::PushConstant
            | Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::ResolveHost
            | Opcode::AddHostAlias
            | Opcode::CreateHost
            | Opcode::CreateOption
            | Opcode::ExtractProps
            | Opcode::CreateOptionPattern
            | Opcode::ResolvePattern
            | Opcode::AddPattern
            | Opcode::ResolvePatternNamespace
            | Opcode::AddPatternNamespace
            | Opcode::Memb
            | Opcode::OptionalMemb
            | Opcode::SetMember
            | Opcode::Assert
            | Opcode::PushIncludedChunk => {
                let index = reader.read_u16()? as usize;
                check_constant(index, limits, offset)?;
            }
            _ if opcode.is_jump() => {
                jumps.push((offset, reader.read_u16()? as usize));
            }
            _ => reader.skip_operands(opcode)?,
        }
    }

    for (offset, target) in jumps {
        // Jumping to the end of the stream terminates the function.
        if target != code.len() && !boundaries.contains(&target) {
            return Err(VerifyError::InvalidJumpTarget { target, offset });
        }
    }

    Ok(())
}

fn check_constant(index: usize, limits: VerifyLimits, offset: usize) -> Result<(), VerifyError> {
    if index >= limits.constant_count {
        return Err(VerifyError::InvalidConstantRef { index, offset });
    }
    Ok(())
}
