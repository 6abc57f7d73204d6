//! Compiled code as consumed by the VM
//!
//! Bytecode is produced by an external compiler (or by hand in tests): a flat
//! instruction stream per function plus a constant pool shared by every
//! function of a module.

use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use tern_bytecode::{verify_instructions, VerifyError, VerifyLimits};

/// Position in a source chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    /// Name of the chunk (module or included file)
    pub source_name: Arc<str>,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

impl SourcePosition {
    /// Create a position
    pub fn new(source_name: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        Self {
            source_name: source_name.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source_name, self.line, self.column)
    }
}

/// A compiled function (the module's top-level code is one too)
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    /// Function name, used in error messages
    pub name: String,
    /// Number of declared parameters, the rest parameter included
    pub param_count: usize,
    /// Whether excess arguments are collected in a list
    pub is_variadic: bool,
    /// Number of local slots, parameters included
    pub local_count: usize,
    /// Instruction stream
    pub instructions: Vec<u8>,
    /// `(instruction offset, position)` pairs sorted by offset
    pub source_map: Vec<(usize, SourcePosition)>,
}

impl CompiledFunction {
    /// Create a function without parameters or locals
    pub fn new(name: impl Into<String>, instructions: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            param_count: 0,
            is_variadic: false,
            local_count: 0,
            instructions,
            source_map: Vec::new(),
        }
    }

    /// Set the parameter count, growing the local count if needed
    pub fn with_params(mut self, param_count: usize) -> Self {
        self.param_count = param_count;
        self.local_count = self.local_count.max(param_count);
        self
    }

    /// Mark the last parameter as a rest parameter
    pub fn variadic(mut self) -> Self {
        self.is_variadic = true;
        self
    }

    /// Set the number of local slots (parameters included)
    pub fn with_locals(mut self, local_count: usize) -> Self {
        self.local_count = local_count.max(self.param_count);
        self
    }

    /// Attach a source map
    pub fn with_source_map(mut self, source_map: Vec<(usize, SourcePosition)>) -> Self {
        self.source_map = source_map;
        self
    }

    /// Position of the instruction that starts at or before `ip`
    pub fn position_at(&self, ip: usize) -> Option<&SourcePosition> {
        let index = self.source_map.partition_point(|(offset, _)| *offset <= ip);
        index.checked_sub(1).map(|i| &self.source_map[i].1)
    }

    /// Check the instruction stream against the constant pool
    pub fn verify(&self, constant_count: usize) -> Result<(), VerifyError> {
        verify_instructions(
            &self.instructions,
            VerifyLimits {
                local_count: self.local_count,
                constant_count,
            },
        )
    }
}

/// Top-level code of a module and its constant pool
#[derive(Debug, Clone)]
pub struct Bytecode {
    /// Module-level code, run by frame 0
    pub main: Arc<CompiledFunction>,
    /// Constant pool
    pub constants: Arc<[Value]>,
}

impl Bytecode {
    /// Create bytecode from a main function and constants
    pub fn new(main: CompiledFunction, constants: Vec<Value>) -> Self {
        Self {
            main: Arc::new(main),
            constants: constants.into(),
        }
    }

    /// Verify the main function and every function constant
    pub fn verify(&self) -> Result<(), VerifyError> {
        let constant_count = self.constants.len();
        self.main.verify(constant_count)?;
        for constant in self.constants.iter() {
            if let Value::Function(function) = constant {
                function.compiled.verify(constant_count)?;
            }
        }
        Ok(())
    }
}

/// Kind of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleKind {
    /// Regular module
    #[default]
    Plain,
    /// Lifetime job attached to a value, run with that value as `self`
    LifetimeJob,
    /// Test suite
    TestSuite,
    /// Test case, assertions failing inside are tagged as test failures
    TestCase,
}

/// A module ready to be run
#[derive(Debug, Clone)]
pub struct Module {
    /// Module name
    pub name: String,
    /// Module kind
    pub kind: ModuleKind,
    /// Compiled code
    pub bytecode: Bytecode,
}

impl Module {
    /// Create a plain module
    pub fn new(name: impl Into<String>, bytecode: Bytecode) -> Self {
        Self {
            name: name.into(),
            kind: ModuleKind::Plain,
            bytecode,
        }
    }

    /// Set the module kind
    pub fn with_kind(mut self, kind: ModuleKind) -> Self {
        self.kind = kind;
        self
    }
}
