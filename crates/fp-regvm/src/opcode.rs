use strum::{Display, EnumIter, FromRepr, IntoStaticStr};

/// Physical encoding shape of a register instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Up to `MAX_FIXED_REGISTERS` register slots.
    Fixed,
    /// Up to `MAX_BRANCH_REGISTERS` register slots plus a resolved label.
    Branch,
    /// Register count chosen per call site.
    Varargs,
}

pub const MAX_FIXED_REGISTERS: usize = 3;
pub const MAX_BRANCH_REGISTERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    pub shape: Shape,
    /// No observable effect beyond writing the destination.
    pub pure: bool,
    /// The last register slot is written.
    pub dest: bool,
    /// Copies its single input into its destination.
    pub copy: bool,
}

const fn info(shape: Shape, pure: bool, dest: bool) -> OpInfo {
    OpInfo {
        shape,
        pure,
        dest,
        copy: false,
    }
}

const FIXED: OpInfo = info(Shape::Fixed, false, false);
const FIXED_DEST: OpInfo = info(Shape::Fixed, false, true);
const FIXED_PURE: OpInfo = info(Shape::Fixed, true, true);
const COPY: OpInfo = OpInfo {
    shape: Shape::Fixed,
    pure: true,
    dest: true,
    copy: true,
};
const BRANCH: OpInfo = info(Shape::Branch, false, false);
const VARARGS: OpInfo = info(Shape::Varargs, false, false);
const VARARGS_DEST: OpInfo = info(Shape::Varargs, false, true);
const VARARGS_PURE: OpInfo = info(Shape::Varargs, true, true);

/// Register-machine opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr, Display, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum RegOpcode {
    /// Reconciliation copy at a control-flow merge.
    Move = 1,
    LoadConst = 2,
    LoadFast = 3,
    StoreFast = 4,
    /// Raises `UnboundLocalError` when the local (argument) has no value yet.
    CheckLocal = 5,
    LoadGlobal = 6,
    StoreGlobal = 7,
    LoadName = 8,
    StoreName = 9,
    LoadAttr = 10,
    StoreAttr = 11,
    DeleteAttr = 12,
    LoadClosure = 13,
    LoadDeref = 14,
    StoreDeref = 15,
    UnaryOp = 16,
    BinaryOp = 17,
    InplaceOp = 18,
    CompareOp = 19,
    BinarySubscr = 20,
    StoreSubscr = 21,
    DeleteSubscr = 22,
    BuildMap = 23,
    StoreMap = 24,
    GetIter = 25,
    ListAppend = 26,
    /// Checks the length of a sequence and snapshots it as a tuple.
    UnpackSequence = 27,
    /// Reads item `arg` of a tuple made by `UNPACK_SEQUENCE`.
    UnpackItem = 28,
    ReturnValue = 29,

    IntAdd = 40,
    IntSub = 41,
    IntMul = 42,
    IntCompare = 43,
    ListSubscr = 44,
    DictSubscr = 45,
    StoreListSubscr = 46,
    StoreDictSubscr = 47,
    ListContains = 48,
    DictContains = 49,

    Jump = 60,
    JumpIfFalse = 61,
    JumpIfTrue = 62,
    /// Writes the next item, or jumps to the label once the iterator is exhausted.
    ForIter = 63,

    BuildTuple = 80,
    BuildList = 81,
    BuildSet = 82,
    BuildSlice = 83,
    CallFunction = 84,
    CallFunctionVar = 85,
    CallFunctionKw = 86,
    CallFunctionVarKw = 87,
    MakeFunction = 88,
    MakeClosure = 89,
    RaiseVarargs = 90,
}

impl RegOpcode {
    pub const fn info(self) -> OpInfo {
        use RegOpcode::*;
        match self {
            Move | LoadConst | LoadFast | StoreFast => COPY,
            LoadClosure | BuildMap | UnpackItem => FIXED_PURE,
            CheckLocal | StoreGlobal | StoreName | StoreAttr | DeleteAttr | StoreDeref
            | StoreSubscr | DeleteSubscr | StoreMap | ReturnValue | StoreListSubscr
            | StoreDictSubscr => FIXED,
            LoadGlobal | LoadName | LoadAttr | LoadDeref | UnaryOp | BinaryOp | InplaceOp
            | CompareOp | BinarySubscr | GetIter | ListAppend | UnpackSequence | IntAdd
            | IntSub | IntMul | IntCompare | ListSubscr | DictSubscr | ListContains
            | DictContains => FIXED_DEST,
            Jump | JumpIfFalse | JumpIfTrue => BRANCH,
            ForIter => OpInfo {
                dest: true,
                ..BRANCH
            },
            BuildTuple | BuildList | BuildSlice | MakeFunction | MakeClosure => VARARGS_PURE,
            BuildSet | CallFunction | CallFunctionVar | CallFunctionKw | CallFunctionVarKw => {
                VARARGS_DEST
            }
            RaiseVarargs => VARARGS,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn shape(self) -> Shape {
        self.info().shape
    }

    pub fn is_pure(self) -> bool {
        self.info().pure
    }

    pub fn has_dest(self) -> bool {
        self.info().dest
    }

    pub fn is_copy(self) -> bool {
        self.info().copy
    }

    /// Control never reaches the next instruction.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RegOpcode::Jump | RegOpcode::ReturnValue | RegOpcode::RaiseVarargs
        )
    }

    /// Two-way branch: falls through to the first exit, jumps to the second.
    pub fn is_conditional(self) -> bool {
        matches!(
            self,
            RegOpcode::JumpIfFalse | RegOpcode::JumpIfTrue | RegOpcode::ForIter
        )
    }
}

/// Classification of every opcode byte, built at compile time.
pub static OP_TABLE: [Option<OpInfo>; 256] = build_table();

const fn build_table() -> [Option<OpInfo>; 256] {
    let mut table = [None; 256];
    let mut byte = 0;
    while byte < 256 {
        if let Some(opcode) = RegOpcode::from_repr(byte as u8) {
            table[byte] = Some(opcode.info());
        }
        byte += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn table_matches_opcode_info() {
        for opcode in RegOpcode::iter() {
            assert_eq!(OP_TABLE[opcode as usize], Some(opcode.info()));
            assert_eq!(RegOpcode::from_byte(opcode as u8), Some(opcode));
        }
        assert_eq!(OP_TABLE[0], None);
        assert_eq!(OP_TABLE[255], None);
    }

    #[test]
    fn branches_and_copies_are_classified() {
        assert_eq!(RegOpcode::ForIter.shape(), Shape::Branch);
        assert!(RegOpcode::ForIter.has_dest());
        assert!(RegOpcode::ForIter.is_conditional());
        assert!(RegOpcode::StoreFast.is_copy());
        assert!(!RegOpcode::LoadGlobal.is_pure());
        assert!(!RegOpcode::BuildSet.is_pure());
        assert_eq!(RegOpcode::CallFunctionVarKw.name(), "CALL_FUNCTION_VAR_KW");
    }
}
