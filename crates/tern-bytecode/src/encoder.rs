//! Bytecode encoding and decoding utilities
//!
//! [`BytecodeWriter`] is used by compilers and tests to assemble instruction
//! streams, [`BytecodeReader`] by the verifier and the interpreter to decode them.

use crate::opcode::{BinaryOperator, Opcode};
use thiserror::Error;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unexpected end of bytecode stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Invalid operator operand
    #[error("Invalid operator {0} at offset {1}")]
    InvalidOperator(u8, usize),
}

/// Bytecode writer for encoding instructions
///
/// Jump targets are absolute offsets into the instruction stream. Forward jumps
/// are emitted with a placeholder and fixed with [`BytecodeWriter::patch_jump`].
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new bytecode writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Get the current bytecode buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the bytecode buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current offset (length of bytecode)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit an opcode
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    /// Overwrite the u16 jump operand of the instruction at `instruction_offset`
    pub fn patch_jump(&mut self, instruction_offset: usize, target: u16) {
        let bytes = target.to_le_bytes();
        self.buffer[instruction_offset + 1] = bytes[0];
        self.buffer[instruction_offset + 2] = bytes[1];
    }

    // ===== Stack & Constants =====

    /// Emit POP
    pub fn emit_pop(&mut self) {
        self.emit_opcode(Opcode::Pop);
    }

    /// Emit PUSH_CONSTANT
    pub fn emit_push_constant(&mut self, index: u16) {
        self.emit_opcode(Opcode::PushConstant);
        self.emit_u16(index);
    }

    /// Emit PUSH_NIL
    pub fn emit_push_nil(&mut self) {
        self.emit_opcode(Opcode::PushNil);
    }

    /// Emit PUSH_TRUE or PUSH_FALSE
    pub fn emit_push_bool(&mut self, value: bool) {
        self.emit_opcode(if value {
            Opcode::PushTrue
        } else {
            Opcode::PushFalse
        });
    }

    // ===== Variables =====

    /// Emit GET_LOCAL
    pub fn emit_get_local(&mut self, index: u8) {
        self.emit_opcode(Opcode::GetLocal);
        self.emit_u8(index);
    }

    /// Emit SET_LOCAL
    pub fn emit_set_local(&mut self, index: u8) {
        self.emit_opcode(Opcode::SetLocal);
        self.emit_u8(index);
    }

    /// Emit GET_GLOBAL
    pub fn emit_get_global(&mut self, name_index: u16) {
        self.emit_opcode(Opcode::GetGlobal);
        self.emit_u16(name_index);
    }

    /// Emit SET_GLOBAL
    pub fn emit_set_global(&mut self, name_index: u16) {
        self.emit_opcode(Opcode::SetGlobal);
        self.emit_u16(name_index);
    }

    // ===== Arithmetic =====

    /// Emit INT_BIN
    pub fn emit_int_bin(&mut self, operator: BinaryOperator) {
        self.emit_opcode(Opcode::IntBin);
        self.emit_u8(operator as u8);
    }

    /// Emit FLOAT_BIN
    pub fn emit_float_bin(&mut self, operator: BinaryOperator) {
        self.emit_opcode(Opcode::FloatBin);
        self.emit_u8(operator as u8);
    }

    /// Emit NUM_BIN
    pub fn emit_num_bin(&mut self, operator: BinaryOperator) {
        self.emit_opcode(Opcode::NumBin);
        self.emit_u8(operator as u8);
    }

    // ===== Control Flow =====

    /// Emit a jump-family instruction and return its offset for patching
    pub fn emit_jump(&mut self, opcode: Opcode, target: u16) -> usize {
        debug_assert!(opcode.is_jump());
        let offset = self.offset();
        self.emit_opcode(opcode);
        self.emit_u16(target);
        offset
    }

    // ===== Composites =====

    /// Emit CREATE_LIST
    pub fn emit_create_list(&mut self, count: u16) {
        self.emit_opcode(Opcode::CreateList);
        self.emit_u16(count);
    }

    /// Emit CREATE_OBJECT with the number of properties (two stack slots each)
    pub fn emit_create_object(&mut self, property_count: u16) {
        self.emit_opcode(Opcode::CreateObject);
        self.emit_u16(property_count * 2);
    }

    /// Emit MEMB
    pub fn emit_memb(&mut self, name_index: u16) {
        self.emit_opcode(Opcode::Memb);
        self.emit_u16(name_index);
    }

    // ===== Calls =====

    /// Emit CALL
    pub fn emit_call(&mut self, arg_count: u8, spread: bool, must: bool) {
        self.emit_opcode(Opcode::Call);
        self.emit_u8(arg_count);
        self.emit_u8(spread as u8);
        self.emit_u8(must as u8);
    }

    /// Emit RETURN
    pub fn emit_return(&mut self, has_value: bool) {
        self.emit_opcode(Opcode::Return);
        self.emit_u8(has_value as u8);
    }

    /// Emit YIELD
    pub fn emit_yield(&mut self, has_value: bool) {
        self.emit_opcode(Opcode::Yield);
        self.emit_u8(has_value as u8);
    }

    // ===== Concurrency =====

    /// Emit BLOCK_LOCK
    pub fn emit_block_lock(&mut self, count: u8) {
        self.emit_opcode(Opcode::BlockLock);
        self.emit_u8(count);
    }

    /// Emit BLOCK_UNLOCK
    pub fn emit_block_unlock(&mut self) {
        self.emit_opcode(Opcode::BlockUnlock);
    }
}

/// Bytecode reader for decoding instructions
#[derive(Debug, Clone)]
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new bytecode reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    // ===== Basic Reading =====

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let value = *self
            .buffer
            .get(self.position)
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        self.position += 1;
        Ok(value)
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        if self.position + 2 > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let bytes = [self.buffer[self.position], self.buffer[self.position + 1]];
        self.position += 2;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Read a boolean flag byte
    pub fn read_flag(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read and decode an opcode
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let offset = self.position;
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset))
    }

    /// Read and decode an operator operand
    pub fn read_operator(&mut self) -> Result<BinaryOperator, DecodeError> {
        let offset = self.position;
        let byte = self.read_u8()?;
        BinaryOperator::from_u8(byte).ok_or(DecodeError::InvalidOperator(byte, offset))
    }

    /// Skip the operands of `opcode`
    pub fn skip_operands(&mut self, opcode: Opcode) -> Result<(), DecodeError> {
        let size = opcode.instruction_size() - 1;
        if self.position + size > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        self.position += size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_emission() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u8(0x42);
        writer.emit_u16(0x1234);

        let bytes = writer.buffer();
        assert_eq!(bytes[0], 0x42);
        assert_eq!(bytes[1], 0x34); // Little-endian
        assert_eq!(bytes[2], 0x12);
    }

    #[test]
    fn test_call_emission() {
        let mut writer = BytecodeWriter::new();
        writer.emit_call(2, false, true);

        assert_eq!(
            writer.buffer(),
            &[Opcode::Call.to_u8(), 2, 0, 1][..]
        );
    }

    #[test]
    fn test_jump_patching() {
        let mut writer = BytecodeWriter::new();
        writer.emit_push_bool(true);
        let jump = writer.emit_jump(Opcode::JumpIfFalse, 0);
        writer.emit_push_nil();
        let target = writer.offset() as u16;
        writer.patch_jump(jump, target);

        let mut reader = BytecodeReader::new(writer.buffer());
        assert_eq!(reader.read_opcode().unwrap(), Opcode::PushTrue);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::JumpIfFalse);
        assert_eq!(reader.read_u16().unwrap(), 5);
    }

    #[test]
    fn test_reader_bounds_checking() {
        let bytes = vec![0x01, 0x02];
        let mut reader = BytecodeReader::new(&bytes);

        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert!(reader.read_u16().is_err());
        assert_eq!(reader.read_u8().unwrap(), 0x02);
        assert_eq!(reader.read_u8(), Err(DecodeError::UnexpectedEnd(2)));
    }

    #[test]
    fn test_reader_invalid_opcode() {
        let bytes = vec![0xEE];
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_opcode(), Err(DecodeError::InvalidOpcode(0xEE, 0)));
    }

    #[test]
    fn test_skip_operands() {
        let mut writer = BytecodeWriter::new();
        writer.emit_call(1, false, false);
        writer.emit_pop();

        let mut reader = BytecodeReader::new(writer.buffer());
        let opcode = reader.read_opcode().unwrap();
        reader.skip_operands(opcode).unwrap();
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Pop);
        assert!(!reader.has_more());
    }
}
