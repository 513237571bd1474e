use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, FromRepr, IntoStaticStr};

/// Opcodes at or above this value carry a 16-bit little-endian argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// Stack-machine opcodes, numbered after the classic 2.7-era table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    FromRepr,
    IntoStaticStr,
    Display,
    EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    StopCode = 0,
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    RotFour = 5,
    Nop = 9,

    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryConvert = 13,
    UnaryInvert = 15,

    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryDivide = 21,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,

    StoreMap = 54,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceDivide = 58,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,

    PrintExpr = 70,
    PrintItem = 71,
    PrintNewline = 72,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    BreakLoop = 80,
    WithCleanup = 81,
    LoadLocals = 82,
    ReturnValue = 83,
    ImportStar = 84,
    ExecStmt = 85,
    YieldValue = 86,
    PopBlock = 87,
    EndFinally = 88,
    BuildClass = 89,

    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    ListAppend = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    DupTopx = 99,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildSet = 104,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    ImportName = 108,
    ImportFrom = 109,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    MakeClosure = 134,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    CallFunctionVar = 140,
    CallFunctionKw = 141,
    CallFunctionVarKw = 142,
    SetupWith = 143,
    ExtendedArg = 145,
    SetAdd = 146,
    MapAdd = 147,
}

/// How an instruction's argument names its branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// Target is `next_offset + arg`.
    Relative,
    /// Target is `arg`.
    Absolute,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn has_argument(self) -> bool {
        self.as_byte() >= HAVE_ARGUMENT
    }

    /// Encoded size of the instruction in bytes, excluding any `EXTENDED_ARG` prefix.
    pub fn size(self) -> usize {
        if self.has_argument() {
            3
        } else {
            1
        }
    }

    pub fn jump_kind(self) -> Option<JumpKind> {
        match self {
            Opcode::JumpForward
            | Opcode::ForIter
            | Opcode::SetupLoop
            | Opcode::SetupExcept
            | Opcode::SetupFinally
            | Opcode::SetupWith => Some(JumpKind::Relative),
            Opcode::JumpAbsolute
            | Opcode::PopJumpIfFalse
            | Opcode::PopJumpIfTrue
            | Opcode::JumpIfFalseOrPop
            | Opcode::JumpIfTrueOrPop
            | Opcode::ContinueLoop => Some(JumpKind::Absolute),
            _ => None,
        }
    }

    /// True for instructions after which control never falls through to the next offset.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Opcode::ReturnValue
                | Opcode::JumpAbsolute
                | Opcode::JumpForward
                | Opcode::BreakLoop
                | Opcode::ContinueLoop
                | Opcode::RaiseVarargs
        )
    }

    /// The argument indexes `co_consts`.
    pub fn uses_const(self) -> bool {
        matches!(self, Opcode::LoadConst)
    }

    /// The argument indexes `co_names`.
    pub fn uses_name(self) -> bool {
        matches!(
            self,
            Opcode::LoadName
                | Opcode::StoreName
                | Opcode::DeleteName
                | Opcode::LoadGlobal
                | Opcode::StoreGlobal
                | Opcode::DeleteGlobal
                | Opcode::LoadAttr
                | Opcode::StoreAttr
                | Opcode::DeleteAttr
                | Opcode::ImportName
                | Opcode::ImportFrom
        )
    }

    /// The argument indexes `co_varnames`.
    pub fn uses_local(self) -> bool {
        matches!(
            self,
            Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast
        )
    }

    /// The argument indexes `cellvars ++ freevars`.
    pub fn uses_cell(self) -> bool {
        matches!(
            self,
            Opcode::LoadClosure | Opcode::LoadDeref | Opcode::StoreDeref
        )
    }
}

/// Comparison selector carried by `COMPARE_OP`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromRepr, IntoStaticStr,
)]
#[repr(u8)]
pub enum CompareOp {
    #[strum(serialize = "<")]
    Lt = 0,
    #[strum(serialize = "<=")]
    Le = 1,
    #[strum(serialize = "==")]
    Eq = 2,
    #[strum(serialize = "!=")]
    Ne = 3,
    #[strum(serialize = ">")]
    Gt = 4,
    #[strum(serialize = ">=")]
    Ge = 5,
    #[strum(serialize = "in")]
    In = 6,
    #[strum(serialize = "not in")]
    NotIn = 7,
    #[strum(serialize = "is")]
    Is = 8,
    #[strum(serialize = "is not")]
    IsNot = 9,
    #[strum(serialize = "exception match")]
    ExceptionMatch = 10,
}

impl CompareOp {
    pub fn from_arg(arg: u32) -> Option<Self> {
        u8::try_from(arg).ok().and_then(Self::from_repr)
    }

    pub fn symbol(self) -> &'static str {
        self.into()
    }
}

/// Packed positional/keyword argument counts of the `CALL_FUNCTION` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallArgs {
    pub positional: usize,
    pub keyword: usize,
}

impl CallArgs {
    pub fn unpack(arg: u32) -> Self {
        Self {
            positional: (arg & 0xff) as usize,
            keyword: ((arg >> 8) & 0xff) as usize,
        }
    }

    pub fn pack(positional: usize, keyword: usize) -> u32 {
        ((keyword as u32 & 0xff) << 8) | (positional as u32 & 0xff)
    }

    /// Stack slots the call consumes, excluding the callable and any `*args`/`**kwargs` values.
    pub fn stack_values(&self) -> usize {
        self.positional + 2 * self.keyword
    }
}
