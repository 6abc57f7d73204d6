//! Tern VM Bytecode Definitions
//!
//! This crate provides the instruction set of the Tern virtual machine along
//! with the encoder, decoder and structural verifier for instruction streams.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod encoder;
pub mod opcode;
pub mod verify;

pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use opcode::{BinaryOperator, OccurrenceModifier, Opcode};
pub use verify::{verify_instructions, VerifyError, VerifyLimits};
