//! Error types of the runtime
//!
//! Each subsystem has its own error enum. [`VmError`] is the error surfaced by
//! a VM run and wraps the others.

use crate::bytecode::SourcePosition;
use crate::context::permissions::Permission;
use crate::value::Value;
use std::fmt;
use thiserror::Error;

/// Errors raised by operations on values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    /// Integer addition or multiplication overflowed
    #[error("integer overflow")]
    IntOverflow,

    /// Integer subtraction or multiplication underflowed
    #[error("integer underflow")]
    IntUnderflow,

    /// Integer division by zero
    #[error("integer division by zero")]
    IntDivisionByZero,

    /// Negation of the minimum integer
    #[error("integer negation with overflow")]
    NegationWithOverflow,

    /// A float operand is NaN or infinite
    #[error("NaN or (+|-)infinity operand in floating point operation")]
    NanOrInfinityOperand,

    /// A float operation produced NaN or an infinity
    #[error("NaN or (+|-)infinity result in floating point operation")]
    NanOrInfinityResult,

    /// The two values have no defined ordering
    #[error("values of type {left} and {right} are not comparable")]
    NotComparable {
        /// Type of the left operand
        left: &'static str,
        /// Type of the right operand
        right: &'static str,
    },

    /// An index is past the end of a sequence
    #[error("index {index} out of range (length {length})")]
    IndexOutOfRange {
        /// Requested index
        index: i64,
        /// Length of the sequence
        length: usize,
    },

    /// A slice starts at a negative index
    #[error("negative lower index of slice")]
    NegativeLowerIndex,

    /// The value can neither be shared nor cloned
    #[error("value of type {0} is not clonable")]
    NotClonable(&'static str),

    /// Deep cloning went too deep
    #[error("maximum cloning depth reached, there is probably a cycle")]
    MaximumCloningDepthReached,

    /// BlockLock on a value that cannot be shared
    #[error("cannot lock unsharable value of type {0}")]
    CannotLockUnsharableValue(&'static str),

    /// Property or member lookup failed
    #[error("property .{0} does not exist")]
    PropertyNotFound(String),

    /// An operand has an unexpected type
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected type description
        expected: &'static str,
        /// Actual type name
        found: &'static str,
    },

    /// Operation not supported on its operands
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl ValueError {
    /// Build a type mismatch error for `found`
    pub fn mismatch(expected: &'static str, found: &Value) -> Self {
        ValueError::TypeMismatch {
            expected,
            found: found.type_name(),
        }
    }
}

/// Errors raised by the limit registry and token buckets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    /// No limit is registered under the name
    #[error("'{0}' is not a registered limit")]
    NotRegistered(String),

    /// The value does not match the registered kind
    #[error("value of limit '{0}' does not have a valid type")]
    KindMismatch(String),

    /// The value is below the registered minimum
    #[error("value for limit '{name}' is too low, minimum is {minimum}")]
    BelowMinimum {
        /// Limit name
        name: String,
        /// Registered minimum
        minimum: i64,
    },

    /// The value is above the hard maximum
    #[error("value for limit '{name}' is too high, hard maximum is {maximum}")]
    AboveMaximum {
        /// Limit name
        name: String,
        /// Hard maximum
        maximum: i64,
    },

    /// The name is already registered with another kind or minimum
    #[error("cannot register the limit '{0}' with a different kind or minimum")]
    ConflictingRegistration(String),

    /// More tokens were requested than the bucket can ever hold
    #[error("count {count} is greater than the capacity {capacity} of the bucket")]
    CountAboveCapacity {
        /// Requested count
        count: i64,
        /// Bucket capacity
        capacity: i64,
    },

    /// A total limit does not have enough tokens left
    #[error("cannot take {requested} tokens from bucket ({name}), only {available} token(s) available")]
    NotEnoughTokens {
        /// Limit name
        name: String,
        /// Requested count
        requested: i64,
        /// Available count
        available: i64,
    },

    /// Decrementation is already paused for this limiter
    #[error("token decrementation already paused")]
    AlreadyPaused,

    /// Decrementation is not paused for this limiter
    #[error("token decrementation is not paused")]
    NotPaused,

    /// The bucket has been destroyed
    #[error("token bucket is destroyed")]
    Destroyed,
}

/// Why a context was cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationCause {
    /// `cancel` or `cancel_gracefully` was called
    Explicit,
    /// A total limit (execution time, CPU time) was depleted
    LimitReached(String),
    /// The parent context was cancelled
    ParentCancelled,
    /// A timeout elapsed
    Timeout,
}

impl fmt::Display for CancellationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationCause::Explicit => write!(f, "cancelled"),
            CancellationCause::LimitReached(name) => write!(f, "limit '{}' reached", name),
            CancellationCause::ParentCancelled => write!(f, "parent context cancelled"),
            CancellationCause::Timeout => write!(f, "timeout"),
        }
    }
}

/// Errors raised by execution contexts
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    /// The context is done
    #[error("context is done: {0}")]
    Cancelled(CancellationCause),

    /// A permission is missing or forbidden
    #[error("not allowed, missing permission: {0}")]
    NotAllowed(Permission),

    /// No limiter exists for the name
    #[error("limit '{0}' is not present in the context")]
    LimitNotDeclared(String),

    /// A limiter operation failed
    #[error(transparent)]
    Limit(#[from] LimitError),

    /// The same limit is declared twice
    #[error("duplicate limit '{0}'")]
    DuplicateLimit(String),

    /// A named pattern is already defined
    #[error("pattern %{0} is already defined")]
    DuplicatePatternDefinition(String),

    /// A pattern namespace is already defined
    #[error("pattern namespace %{0}. is already defined")]
    DuplicateNamespaceDefinition(String),

    /// A host alias is already defined
    #[error("host alias @{0} is already defined")]
    DuplicateHostAlias(String),

    /// User data is already defined for the key
    #[error("user data '{0}' is already defined")]
    DuplicateUserData(String),

    /// The configuration of a child context is not a restriction of its parent
    #[error("invalid child context configuration: {0}")]
    InvalidChildConfig(String),

    /// The context has no associated global state
    #[error("context has no associated state")]
    NoState,

    /// A value could not be shared or cloned
    #[error(transparent)]
    Value(#[from] ValueError),
}

impl ContextError {
    /// Whether the error reports a cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ContextError::Cancelled(_))
    }
}

/// An error annotated with the source positions of the live call frames
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedError {
    /// Message of the underlying error
    pub message: String,
    /// Source positions, innermost first
    pub location: Vec<SourcePosition>,
    /// The underlying error
    pub source: Box<VmError>,
}

impl fmt::Display for LocatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for position in self.location.iter().rev() {
            writeln!(f, "{}:", position)?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LocatedError {}

/// A failed assertion with the values of its sub-expressions
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionError {
    /// Text of the assertion statement
    pub statement: String,
    /// `(expression, value)` pairs recorded while evaluating the statement
    pub intermediary_values: Vec<(String, Value)>,
    /// Whether the assertion was raised inside a test case
    pub in_test: bool,
    /// Location prefix added once the error leaves the VM
    pub location_prefix: Option<String>,
}

impl fmt::Display for AssertionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.location_prefix {
            write!(f, "{} ", prefix)?;
        }
        if self.in_test {
            write!(f, "test assertion failed: {}", self.statement)?;
        } else {
            write!(f, "assertion failed: {}", self.statement)?;
        }
        for (expression, value) in &self.intermediary_values {
            write!(f, "\n  {} = {}", expression, value)?;
        }
        Ok(())
    }
}

impl std::error::Error for AssertionError {}

/// VM errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// Value operation failed
    #[error(transparent)]
    Value(#[from] ValueError),

    /// Context operation failed (including cancellation)
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Stack overflow or too many frames
    #[error("stack overflow")]
    StackOverflow,

    /// Stack underflow
    #[error("stack underflow")]
    StackUnderflow,

    /// Invalid opcode
    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Instruction stream ends in the middle of an instruction
    #[error("unexpected end of bytecode")]
    UnexpectedEndOfBytecode,

    /// Call with a wrong number of arguments
    #[error("wrong number of arguments: expected {expected}{}, got {got}", variadic_suffix(.variadic))]
    WrongArgumentCount {
        /// Number of declared parameters
        expected: usize,
        /// Number of passed arguments
        got: usize,
        /// Whether the callee is variadic
        variadic: bool,
    },

    /// Callee is not a function
    #[error("cannot call a value of type {0}")]
    NotCallable(&'static str),

    /// Read of an undefined global
    #[error("global '{0}' is not defined")]
    GlobalNotDefined(String),

    /// Constant index past the end of the pool
    #[error("constant index {0} out of range")]
    ConstantOutOfRange(usize),

    /// Failed assertion
    #[error(transparent)]
    Assertion(AssertionError),

    /// Error annotated with its location
    #[error(transparent)]
    Located(LocatedError),

    /// Yield outside of an lthread
    #[error("cannot yield: no associated lthread")]
    NoAssociatedLThread,

    /// `Vm::abort` was called
    #[error("execution aborted")]
    Aborted,

    /// Any other runtime error
    #[error("{0}")]
    Runtime(String),
}

impl VmError {
    /// The error without its location wrapper
    pub fn root(&self) -> &VmError {
        match self {
            VmError::Located(located) => located.source.root(),
            other => other,
        }
    }

    /// Whether the error is (or wraps) a context cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self.root(), VmError::Context(ContextError::Cancelled(_)))
    }
}

fn variadic_suffix(variadic: &bool) -> &'static str {
    if *variadic {
        " or more"
    } else {
        ""
    }
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;

/// Errors raised by lthreads
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LThreadError {
    /// The lthread is already done
    #[error("lthread is done")]
    Done,

    /// The lthread could not be spawned
    #[error("cannot spawn lthread: {0}")]
    Spawn(String),

    /// Context error while spawning or waiting
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The lthread's VM failed
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl From<LThreadError> for VmError {
    fn from(err: LThreadError) -> Self {
        match err {
            LThreadError::Vm(err) => err,
            LThreadError::Context(err) => VmError::Context(err),
            other => VmError::Runtime(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lthread_error_into_vm_error() {
        let err: VmError = LThreadError::Vm(VmError::StackOverflow).into();
        assert_eq!(err, VmError::StackOverflow);

        let err: VmError = LThreadError::Done.into();
        assert_eq!(err, VmError::Runtime("lthread is done".to_string()));
    }

    #[test]
    fn test_located_error_root() {
        let err = VmError::Located(LocatedError {
            message: "stack overflow".to_string(),
            location: Vec::new(),
            source: Box::new(VmError::StackOverflow),
        });
        assert_eq!(err.root(), &VmError::StackOverflow);
        assert!(!err.is_cancellation());
    }
}
