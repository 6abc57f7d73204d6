//! Bytecode opcodes for the Tern VM
//!
//! Every instruction is a single opcode byte followed by zero or more fixed-width
//! operands. Multi-byte operands are little-endian. The operand layout of each
//! opcode is described by [`Opcode::operand_widths`].
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Locals, globals, self & host aliases
//! - 0x20-0x2F: Arithmetic
//! - 0x30-0x3F: Comparison, membership & coercion
//! - 0x40-0x4F: Control flow
//! - 0x50-0x5F: Strings, ranges & resource names
//! - 0x60-0x6F: Composite construction & spreading
//! - 0x70-0x8F: Patterns
//! - 0x90-0x9F: Member, index & field access
//! - 0xA0-0xAF: Iteration
//! - 0xB0-0xBF: Calls, returns & diagnostics
//! - 0xC0-0xCF: Concurrency, permissions & messaging

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    CopyTop = 0x02,
    /// Swap top two stack values
    Swap = 0x03,
    /// Move the third value from the top to the top
    MoveThirdTop = 0x04,
    /// Push a constant from the pool (operand: u16 index)
    PushConstant = 0x05,
    /// Push nil
    PushNil = 0x06,
    /// Push true
    PushTrue = 0x07,
    /// Push false
    PushFalse = 0x08,

    // ===== Locals, Globals, Self (0x10-0x1F) =====
    /// Push a local of the current frame (operand: u8 index)
    GetLocal = 0x10,
    /// Pop into a local of the current frame (operand: u8 index)
    SetLocal = 0x11,
    /// Push a global variable (operand: u16 name constant)
    GetGlobal = 0x12,
    /// Pop into a global variable (operand: u16 name constant)
    SetGlobal = 0x13,
    /// Push the receiver of the current frame
    GetSelf = 0x14,
    /// Push the host bound to an alias (operand: u16 alias constant)
    ResolveHost = 0x15,
    /// Pop a host and bind it to an alias (operand: u16 alias constant)
    AddHostAlias = 0x16,

    // ===== Arithmetic (0x20-0x2F) =====
    /// Checked integer binary operation (operand: u8 operator)
    IntBin = 0x20,
    /// Checked float binary operation (operand: u8 operator)
    FloatBin = 0x21,
    /// Int or float binary operation depending on the left operand (operand: u8 operator)
    NumBin = 0x22,
    /// Duration/datetime addition and subtraction (operand: u8 operator)
    PseudoArith = 0x23,
    /// Negate the top value
    Minus = 0x24,
    /// Boolean negation of the top value
    BooleanNot = 0x25,

    // ===== Comparison & Membership (0x30-0x3F) =====
    /// Structural equality
    Equal = 0x30,
    /// Structural inequality
    NotEqual = 0x31,
    /// Identity
    Is = 0x32,
    /// Negated identity
    IsNot = 0x33,
    /// Ordering: less than
    Less = 0x34,
    /// Ordering: less than or equal
    LessEqual = 0x35,
    /// Ordering: greater than
    Greater = 0x36,
    /// Ordering: greater than or equal
    GreaterEqual = 0x37,
    /// Test a value against a pattern (or equality when the right side is not a pattern)
    Match = 0x38,
    /// Check whether a value is an element of a list, tuple or object
    In = 0x39,
    /// Substring test
    SubstrOf = 0x3A,
    /// Property-name membership test on an object or record
    KeyOf = 0x3B,
    /// Replace a nil left operand by the right operand
    NilCoalesce = 0x3C,
    /// Coerce the top value to a boolean
    ToBool = 0x3D,

    // ===== Control Flow (0x40-0x4F) =====
    /// Unconditional jump (operand: u16 target)
    Jump = 0x40,
    /// Pop a boolean and jump if false (operand: u16 target)
    JumpIfFalse = 0x41,
    /// Short-circuit and: jump keeping the value if false, else pop (operand: u16 target)
    AndJump = 0x42,
    /// Short-circuit or: jump keeping the value if true, else pop (operand: u16 target)
    OrJump = 0x43,

    // ===== Strings, Ranges & Resource Names (0x50-0x5F) =====
    /// Concatenate two strings
    StrConcat = 0x50,
    /// Concatenate N values with optional spread elements (operands: u8 count, u16 spread-flags constant)
    Concat = 0x51,
    /// Create an inclusive integer range from two integers
    CreateIntRange = 0x52,
    /// Create an inclusive float range from two floats
    CreateFloatRange = 0x53,
    /// Create a rune range from two runes
    CreateRuneRange = 0x54,
    /// Create a range with an unknown start from an upper bound
    CreateUpperBoundRange = 0x55,
    /// Create a path from N slices (operand: u8 count)
    CreatePath = 0x56,
    /// Create a path pattern from N slices (operand: u8 count)
    CreatePathPattern = 0x57,
    /// Create a host from a hostname[:port] string (operand: u16 scheme constant)
    CreateHost = 0x58,
    /// Create a URL from a host and N path slices (operand: u8 count)
    CreateUrl = 0x59,

    // ===== Composites (0x60-0x6F) =====
    /// Create a list from N stack values (operand: u16 count)
    CreateList = 0x60,
    /// Create a tuple from N stack values (operand: u16 count)
    CreateTuple = 0x61,
    /// Create a key list from N identifiers (operand: u16 count)
    CreateKeyList = 0x62,
    /// Create an object from N key/value slots (operand: u16 slot count)
    CreateObject = 0x63,
    /// Create a record from N key/value slots (operand: u16 slot count)
    CreateRecord = 0x64,
    /// Create a dictionary from N key/value slots (operand: u16 slot count)
    CreateDict = 0x65,
    /// Create a struct (operands: u16 struct type constant, u8 field count)
    CreateStruct = 0x66,
    /// Create a named option from the top value (operand: u16 name constant)
    CreateOption = 0x67,
    /// Create an XML element (operands: u16 tag constant, u8 attribute count, u8 child count)
    CreateXmlElement = 0x68,
    /// Append the properties of an object into the object below it
    SpreadObject = 0x69,
    /// Append the elements of a list into the list below it
    SpreadList = 0x6A,
    /// Append the elements of a tuple into the tuple below it
    SpreadTuple = 0x6B,
    /// Replace an object by a new object holding a subset of its properties (operand: u16 key-list constant)
    ExtractProps = 0x6C,
    /// Append N values to the list below them (operand: u8 count)
    Append = 0x6D,

    // ===== Patterns (0x70-0x8F) =====
    /// Create a list pattern (operands: u16 count, u8 has general element)
    CreateListPattern = 0x70,
    /// Create an object pattern from key/pattern/optional triples (operands: u16 slot count, u8 inexact)
    CreateObjectPattern = 0x71,
    /// Create a record pattern from key/pattern/optional triples (operands: u16 slot count, u8 inexact)
    CreateRecordPattern = 0x72,
    /// Create an option pattern (operand: u16 name constant)
    CreateOptionPattern = 0x73,
    /// Create a union pattern (operand: u16 count)
    CreateUnionPattern = 0x74,
    /// Create an intersection pattern (operand: u16 count)
    CreateIntersectionPattern = 0x75,
    /// Create a string union pattern (operand: u16 count)
    CreateStringUnionPattern = 0x76,
    /// Create a repeated string pattern element (operands: u8 occurrence modifier, u8 exact count)
    CreateRepeatedPatternElement = 0x77,
    /// Create a sequence string pattern (operand: u8 count)
    CreateSequenceStringPattern = 0x78,
    /// Create a pattern namespace from an object or record of patterns
    CreatePatternNamespace = 0x79,
    /// Make the top pattern also match nil
    CreateOptionalPattern = 0x7A,
    /// Convert the top value into an exact-value pattern unless it is a pattern
    ToPattern = 0x7B,
    /// Create a difference pattern from a base and a removed pattern
    DoSetDifference = 0x7C,
    /// Merge the entries of an object pattern into the object pattern below it
    SpreadObjectPattern = 0x7D,
    /// Push a named pattern (operand: u16 name constant)
    ResolvePattern = 0x7E,
    /// Pop a pattern and register it under a name (operand: u16 name constant)
    AddPattern = 0x7F,
    /// Push a pattern namespace (operand: u16 name constant)
    ResolvePatternNamespace = 0x80,
    /// Pop a pattern namespace and register it (operand: u16 name constant)
    AddPatternNamespace = 0x81,
    /// Push a member of a pattern namespace (operands: u16 namespace constant, u16 member constant)
    PatternNamespaceMemb = 0x82,

    // ===== Member & Index Access (0x90-0x9F) =====
    /// Replace the top value by one of its properties (operand: u16 name constant)
    Memb = 0x90,
    /// Like Memb but pushes nil for a missing property (operand: u16 name constant)
    OptionalMemb = 0x91,
    /// Property access with a computed name
    ComputedMemb = 0x92,
    /// Set a property (operand: u16 name constant)
    SetMember = 0x93,
    /// Index access
    At = 0x94,
    /// Index access that yields nil when out of range
    SafeAt = 0x95,
    /// Index assignment
    SetIndex = 0x96,
    /// Slice of a sequence
    Slice = 0x97,
    /// Slice assignment
    SetSlice = 0x98,
    /// Read a struct field by index (operand: u8 field index)
    GetStructField = 0x99,
    /// Write a struct field by index (operand: u8 field index)
    SetStructField = 0x9A,

    // ===== Iteration (0xA0-0xAF) =====
    /// Replace an iterable by an iterator or a stream (operand: u8 has key/value filters)
    IterInit = 0xA0,
    /// Advance an iterator or stream (operand: u8 element local)
    IterNext = 0xA1,
    /// Advance a stream by a chunk (operand: u8 element local)
    IterNextChunk = 0xA2,
    /// Replace an iterator by its current key
    IterKey = 0xA3,
    /// Replace an iterator by its current value (operand: u8 element local)
    IterValue = 0xA4,

    // ===== Calls & Diagnostics (0xB0-0xBF) =====
    /// Capture the N values above a function into a new closure (operand: u8 count)
    BindCapturedLocals = 0xB0,
    /// Call a function (operands: u8 argument count, u8 spread, u8 must)
    Call = 0xB1,
    /// Return from the current function (operand: u8 value on stack)
    Return = 0xB2,
    /// Yield a value to the lthread owning the VM (operand: u8 value on stack)
    Yield = 0xB3,
    /// Suspend the VM; a later resume continues at the next instruction
    SuspendVM = 0xB4,
    /// Pop a boolean and fail with an assertion error if false (operand: u16 statement constant)
    Assert = 0xB5,
    /// Enter an included chunk for error locations (operand: u16 chunk name constant)
    PushIncludedChunk = 0xB6,
    /// Leave the current included chunk
    PopIncludedChunk = 0xB7,

    // ===== Concurrency & Permissions (0xC0-0xCF) =====
    /// Pop a permission listing and drop those permissions from the context
    DropPerms = 0xC0,
    /// Spawn an lthread (operands: u8 single expression, u16 callee name constant, u16 module constant)
    SpawnLThread = 0xC1,
    /// Share and lock N values for the duration of a block (operand: u8 count)
    BlockLock = 0xC2,
    /// Unlock the values locked by the innermost block of the frame
    BlockUnlock = 0xC3,
    /// Create a synchronous message handler from a pattern and a function
    CreateReceptionHandler = 0xC4,
    /// Send a value to a receiver object
    SendValue = 0xC5,
}

impl Opcode {
    /// Convert a byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::CopyTop),
            0x03 => Some(Self::Swap),
            0x04 => Some(Self::MoveThirdTop),
            0x05 => Some(Self::PushConstant),
            0x06 => Some(Self::PushNil),
            0x07 => Some(Self::PushTrue),
            0x08 => Some(Self::PushFalse),

            0x10 => Some(Self::GetLocal),
            0x11 => Some(Self::SetLocal),
            0x12 => Some(Self::GetGlobal),
            0x13 => Some(Self::SetGlobal),
            0x14 => Some(Self::GetSelf),
            0x15 => Some(Self::ResolveHost),
            0x16 => Some(Self::AddHostAlias),

            0x20 => Some(Self::IntBin),
            0x21 => Some(Self::FloatBin),
            0x22 => Some(Self::NumBin),
            0x23 => Some(Self::PseudoArith),
            0x24 => Some(Self::Minus),
            0x25 => Some(Self::BooleanNot),

            0x30 => Some(Self::Equal),
            0x31 => Some(Self::NotEqual),
            0x32 => Some(Self::Is),
            0x33 => Some(Self::IsNot),
            0x34 => Some(Self::Less),
            0x35 => Some(Self::LessEqual),
            0x36 => Some(Self::Greater),
            0x37 => Some(Self::GreaterEqual),
            0x38 => Some(Self::Match),
            0x39 => Some(Self::In),
            0x3A => Some(Self::SubstrOf),
            0x3B => Some(Self::KeyOf),
            0x3C => Some(Self::NilCoalesce),
            0x3D => Some(Self::ToBool),

            0x40 => Some(Self::Jump),
            0x41 => Some(Self::JumpIfFalse),
            0x42 => Some(Self::AndJump),
            0x43 => Some(Self::OrJump),

            0x50 => Some(Self::StrConcat),
            0x51 => Some(Self::Concat),
            0x52 => Some(Self::CreateIntRange),
            0x53 => Some(Self::CreateFloatRange),
            0x54 => Some(Self::CreateRuneRange),
            0x55 => Some(Self::CreateUpperBoundRange),
            0x56 => Some(Self::CreatePath),
            0x57 => Some(Self::CreatePathPattern),
            0x58 => Some(Self::CreateHost),
            0x59 => Some(Self::CreateUrl),

            0x60 => Some(Self::CreateList),
            0x61 => Some(Self::CreateTuple),
            0x62 => Some(Self::CreateKeyList),
            0x63 => Some(Self::CreateObject),
            0x64 => Some(Self::CreateRecord),
            0x65 => Some(Self::CreateDict),
            0x66 => Some(Self::CreateStruct),
            0x67 => Some(Self::CreateOption),
            0x68 => Some(Self::CreateXmlElement),
            0x69 => Some(Self::SpreadObject),
            0x6A => Some(Self::SpreadList),
            0x6B => Some(Self::SpreadTuple),
            0x6C => Some(Self::ExtractProps),
            0x6D => Some(Self::Append),

            0x70 => Some(Self::CreateListPattern),
            0x71 => Some(Self::CreateObjectPattern),
            0x72 => Some(Self::CreateRecordPattern),
            0x73 => Some(Self::CreateOptionPattern),
            0x74 => Some(Self::CreateUnionPattern),
            0x75 => Some(Self::CreateIntersectionPattern),
            0x76 => Some(Self::CreateStringUnionPattern),
            0x77 => Some(Self::CreateRepeatedPatternElement),
            0x78 => Some(Self::CreateSequenceStringPattern),
            0x79 => Some(Self::CreatePatternNamespace),
            0x7A => Some(Self::CreateOptionalPattern),
            0x7B => Some(Self::ToPattern),
            0x7C => Some(Self::DoSetDifference),
            0x7D => Some(Self::SpreadObjectPattern),
            0x7E => Some(Self::ResolvePattern),
            0x7F => Some(Self::AddPattern),
            0x80 => Some(Self::ResolvePatternNamespace),
            0x81 => Some(Self::AddPatternNamespace),
            0x82 => Some(Self::PatternNamespaceMemb),

            0x90 => Some(Self::Memb),
            0x91 => Some(Self::OptionalMemb),
            0x92 => Some(Self::ComputedMemb),
            0x93 => Some(Self::SetMember),
            0x94 => Some(Self::At),
            0x95 => Some(Self::SafeAt),
            0x96 => Some(Self::SetIndex),
            0x97 => Some(Self::Slice),
            0x98 => Some(Self::SetSlice),
            0x99 => Some(Self::GetStructField),
            0x9A => Some(Self::SetStructField),

            0xA0 => Some(Self::IterInit),
            0xA1 => Some(Self::IterNext),
            0xA2 => Some(Self::IterNextChunk),
            0xA3 => Some(Self::IterKey),
            0xA4 => Some(Self::IterValue),

            0xB0 => Some(Self::BindCapturedLocals),
            0xB1 => Some(Self::Call),
            0xB2 => Some(Self::Return),
            0xB3 => Some(Self::Yield),
            0xB4 => Some(Self::SuspendVM),
            0xB5 => Some(Self::Assert),
            0xB6 => Some(Self::PushIncludedChunk),
            0xB7 => Some(Self::PopIncludedChunk),

            0xC0 => Some(Self::DropPerms),
            0xC1 => Some(Self::SpawnLThread),
            0xC2 => Some(Self::BlockLock),
            0xC3 => Some(Self::BlockUnlock),
            0xC4 => Some(Self::CreateReceptionHandler),
            0xC5 => Some(Self::SendValue),

            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Widths in bytes of the operands that follow the opcode byte
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            Self::PushConstant
            | Self::GetGlobal
            | Self::SetGlobal
            | Self::ResolveHost
            | Self::AddHostAlias
            | Self::Jump
            | Self::JumpIfFalse
            | Self::AndJump
            | Self::OrJump
            | Self::CreateHost
            | Self::CreateList
            | Self::CreateTuple
            | Self::CreateKeyList
            | Self::CreateObject
            | Self::CreateRecord
            | Self::CreateDict
            | Self::CreateOption
            | Self::ExtractProps
            | Self::CreateOptionPattern
            | Self::CreateUnionPattern
            | Self::CreateIntersectionPattern
            | Self::CreateStringUnionPattern
            | Self::ResolvePattern
            | Self::AddPattern
            | Self::ResolvePatternNamespace
            | Self::AddPatternNamespace
            | Self::Memb
            | Self::OptionalMemb
            | Self::SetMember
            | Self::Assert
            | Self::PushIncludedChunk => &[2],

            Self::GetLocal
            | Self::SetLocal
            | Self::IntBin
            | Self::FloatBin
            | Self::NumBin
            | Self::PseudoArith
            | Self::CreatePath
            | Self::CreatePathPattern
            | Self::CreateUrl
            | Self::Append
            | Self::CreateSequenceStringPattern
            | Self::GetStructField
            | Self::SetStructField
            | Self::IterInit
            | Self::IterNext
            | Self::IterNextChunk
            | Self::IterValue
            | Self::BindCapturedLocals
            | Self::Return
            | Self::Yield
            | Self::BlockLock => &[1],

            Self::Concat => &[1, 2],
            Self::CreateStruct => &[2, 1],
            Self::CreateXmlElement => &[2, 1, 1],
            Self::CreateListPattern | Self::CreateObjectPattern | Self::CreateRecordPattern => {
                &[2, 1]
            }
            Self::CreateRepeatedPatternElement => &[1, 1],
            Self::PatternNamespaceMemb => &[2, 2],
            Self::Call => &[1, 1, 1],
            Self::SpawnLThread => &[1, 2, 2],

            _ => &[],
        }
    }

    /// Total encoded size of the instruction, opcode byte included
    pub fn instruction_size(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }

    /// Get the name of this opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::CopyTop => "COPY_TOP",
            Self::Swap => "SWAP",
            Self::MoveThirdTop => "MOVE_THIRD_TOP",
            Self::PushConstant => "PUSH_CONSTANT",
            Self::PushNil => "PUSH_NIL",
            Self::PushTrue => "PUSH_TRUE",
            Self::PushFalse => "PUSH_FALSE",
            Self::GetLocal => "GET_LOCAL",
            Self::SetLocal => "SET_LOCAL",
            Self::GetGlobal => "GET_GLOBAL",
            Self::SetGlobal => "SET_GLOBAL",
            Self::GetSelf => "GET_SELF",
            Self::ResolveHost => "RESOLVE_HOST",
            Self::AddHostAlias => "ADD_HOST_ALIAS",
            Self::IntBin => "INT_BIN",
            Self::FloatBin => "FLOAT_BIN",
            Self::NumBin => "NUM_BIN",
            Self::PseudoArith => "PSEUDO_ARITH",
            Self::Minus => "MINUS",
            Self::BooleanNot => "BOOLEAN_NOT",
            Self::Equal => "EQUAL",
            Self::NotEqual => "NOT_EQUAL",
            Self::Is => "IS",
            Self::IsNot => "IS_NOT",
            Self::Less => "LESS",
            Self::LessEqual => "LESS_EQUAL",
            Self::Greater => "GREATER",
            Self::GreaterEqual => "GREATER_EQUAL",
            Self::Match => "MATCH",
            Self::In => "IN",
            Self::SubstrOf => "SUBSTR_OF",
            Self::KeyOf => "KEY_OF",
            Self::NilCoalesce => "NIL_COALESCE",
            Self::ToBool => "TO_BOOL",
            Self::Jump => "JUMP",
            Self::JumpIfFalse => "JUMP_IF_FALSE",
            Self::AndJump => "AND_JUMP",
            Self::OrJump => "OR_JUMP",
            Self::StrConcat => "STR_CONCAT",
            Self::Concat => "CONCAT",
            Self::CreateIntRange => "CREATE_INT_RANGE",
            Self::CreateFloatRange => "CREATE_FLOAT_RANGE",
            Self::CreateRuneRange => "CREATE_RUNE_RANGE",
            Self::CreateUpperBoundRange => "CREATE_UPPER_BOUND_RANGE",
            Self::CreatePath => "CREATE_PATH",
            Self::CreatePathPattern => "CREATE_PATH_PATTERN",
            Self::CreateHost => "CREATE_HOST",
            Self::CreateUrl => "CREATE_URL",
            Self::CreateList => "CREATE_LIST",
            Self::CreateTuple => "CREATE_TUPLE",
            Self::CreateKeyList => "CREATE_KEY_LIST",
            Self::CreateObject => "CREATE_OBJECT",
            Self::CreateRecord => "CREATE_RECORD",
            Self::CreateDict => "CREATE_DICT",
            Self::CreateStruct => "CREATE_STRUCT",
            Self::CreateOption => "CREATE_OPTION",
            Self::CreateXmlElement => "CREATE_XML_ELEMENT",
            Self::SpreadObject => "SPREAD_OBJECT",
            Self::SpreadList => "SPREAD_LIST",
            Self::SpreadTuple => "SPREAD_TUPLE",
            Self::ExtractProps => "EXTRACT_PROPS",
            Self::Append => "APPEND",
            Self::CreateListPattern => "CREATE_LIST_PATTERN",
            Self::CreateObjectPattern => "CREATE_OBJECT_PATTERN",
            Self::CreateRecordPattern => "CREATE_RECORD_PATTERN",
            Self::CreateOptionPattern => "CREATE_OPTION_PATTERN",
            Self::CreateUnionPattern => "CREATE_UNION_PATTERN",
            Self::CreateIntersectionPattern => "CREATE_INTERSECTION_PATTERN",
            Self::CreateStringUnionPattern => "CREATE_STRING_UNION_PATTERN",
            Self::CreateRepeatedPatternElement => "CREATE_REPEATED_PATTERN_ELEMENT",
            Self::CreateSequenceStringPattern => "CREATE_SEQUENCE_STRING_PATTERN",
            Self::CreatePatternNamespace => "CREATE_PATTERN_NAMESPACE",
            Self::CreateOptionalPattern => "CREATE_OPTIONAL_PATTERN",
            Self::ToPattern => "TO_PATTERN",
            Self::DoSetDifference => "DO_SET_DIFFERENCE",
            Self::SpreadObjectPattern => "SPREAD_OBJECT_PATTERN",
            Self::ResolvePattern => "RESOLVE_PATTERN",
            Self::AddPattern => "ADD_PATTERN",
            Self::ResolvePatternNamespace => "RESOLVE_PATTERN_NAMESPACE",
            Self::AddPatternNamespace => "ADD_PATTERN_NAMESPACE",
            Self::PatternNamespaceMemb => "PATTERN_NAMESPACE_MEMB",
            Self::Memb => "MEMB",
            Self::OptionalMemb => "OPTIONAL_MEMB",
            Self::ComputedMemb => "COMPUTED_MEMB",
            Self::SetMember => "SET_MEMBER",
            Self::At => "AT",
            Self::SafeAt => "SAFE_AT",
            Self::SetIndex => "SET_INDEX",
            Self::Slice => "SLICE",
            Self::SetSlice => "SET_SLICE",
            Self::GetStructField => "GET_STRUCT_FIELD",
            Self::SetStructField => "SET_STRUCT_FIELD",
            Self::IterInit => "ITER_INIT",
            Self::IterNext => "ITER_NEXT",
            Self::IterNextChunk => "ITER_NEXT_CHUNK",
            Self::IterKey => "ITER_KEY",
            Self::IterValue => "ITER_VALUE",
            Self::BindCapturedLocals => "BIND_CAPTURED_LOCALS",
            Self::Call => "CALL",
            Self::Return => "RETURN",
            Self::Yield => "YIELD",
            Self::SuspendVM => "SUSPEND_VM",
            Self::Assert => "ASSERT",
            Self::PushIncludedChunk => "PUSH_INCLUDED_CHUNK",
            Self::PopIncludedChunk => "POP_INCLUDED_CHUNK",
            Self::DropPerms => "DROP_PERMS",
            Self::SpawnLThread => "SPAWN_LTHREAD",
            Self::BlockLock => "BLOCK_LOCK",
            Self::BlockUnlock => "BLOCK_UNLOCK",
            Self::CreateReceptionHandler => "CREATE_RECEPTION_HANDLER",
            Self::SendValue => "SEND_VALUE",
        }
    }

    /// Check if this opcode is a jump instruction
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jump | Self::JumpIfFalse | Self::AndJump | Self::OrJump
        )
    }
}

/// Operator operand of `IntBin`, `FloatBin`, `NumBin` and `PseudoArith`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    /// Addition
    Add = 0,
    /// Subtraction
    Sub = 1,
    /// Multiplication
    Mul = 2,
    /// Division
    Div = 3,
    /// Less than
    Less = 4,
    /// Less than or equal
    LessOrEqual = 5,
    /// Greater than
    Greater = 6,
    /// Greater than or equal
    GreaterOrEqual = 7,
}

impl BinaryOperator {
    /// Convert a byte to an operator
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Add),
            1 => Some(Self::Sub),
            2 => Some(Self::Mul),
            3 => Some(Self::Div),
            4 => Some(Self::Less),
            5 => Some(Self::LessOrEqual),
            6 => Some(Self::Greater),
            7 => Some(Self::GreaterOrEqual),
            _ => None,
        }
    }

    /// Source-level symbol of the operator
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
        }
    }
}

/// Occurrence modifier operand of `CreateRepeatedPatternElement`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OccurrenceModifier {
    /// Exactly one
    ExactlyOne = 0,
    /// `?`
    AtMostOne = 1,
    /// `*`
    ZeroOrMore = 2,
    /// `+`
    AtLeastOne = 3,
    /// `=N`
    Exactly = 4,
}

impl OccurrenceModifier {
    /// Convert a byte to a modifier
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::ExactlyOne),
            1 => Some(Self::AtMostOne),
            2 => Some(Self::ZeroOrMore),
            3 => Some(Self::AtLeastOne),
            4 => Some(Self::Exactly),
            _ => None,
        }
    }
}
