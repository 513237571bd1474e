//! Type-directed opcode specialization.
//!
//! A flow-insensitive inference gives every register the join of the types of all values
//! written to it. Ops whose operands are known to be ints, lists or dicts are rewritten to
//! fast-path opcodes. The specialized handlers re-check their operands at runtime and fall
//! back to the generic behavior, so a wrong guess costs speed, never correctness.

use fp_bytecode::{CallArgs, CompareOp, Const};
use fp_stackvm::{BinaryOp, UnaryOp};

use crate::error::CompileError;
use crate::ir::{CompilerState, Reg};
use crate::opcode::RegOpcode;

use super::{PassName, RegisterPass};

/// Set in the argument of `INT_ADD`/`INT_SUB`/`INT_MUL` rewritten from an in-place op, so
/// the generic fallback keeps in-place semantics.
pub const INPLACE_FLAG: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// No write seen yet.
    Unknown,
    Int,
    Float,
    List,
    Tuple,
    Dict,
    /// Anything else, or a mix.
    Obj,
}

impl ValueType {
    pub fn join(self, other: ValueType) -> ValueType {
        match (self, other) {
            (ValueType::Unknown, other) | (other, ValueType::Unknown) => other,
            (left, right) if left == right => left,
            _ => ValueType::Obj,
        }
    }

    fn of_const(constant: &Const) -> ValueType {
        match constant {
            Const::Int(_) => ValueType::Int,
            Const::Float(_) => ValueType::Float,
            Const::Tuple(_) => ValueType::Tuple,
            _ => ValueType::Obj,
        }
    }

    fn is_number(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Float)
    }
}

fn arithmetic(op: BinaryOp, left: ValueType, right: ValueType) -> ValueType {
    use ValueType::*;
    match (op, left, right) {
        (
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::FloorDivide
            | BinaryOp::Modulo
            | BinaryOp::Lshift
            | BinaryOp::Rshift
            | BinaryOp::And
            | BinaryOp::Xor
            | BinaryOp::Or
            | BinaryOp::Divide,
            Int,
            Int,
        ) => Int,
        (BinaryOp::TrueDivide, Int, Int) => Float,
        (
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::TrueDivide,
            l,
            r,
        ) if l.is_number() && r.is_number() => Float,
        (BinaryOp::Add, List, List) => List,
        (BinaryOp::Add, Tuple, Tuple) => Tuple,
        (_, Unknown, _) | (_, _, Unknown) => Unknown,
        _ => Obj,
    }
}

/// Type written by `opcode`, given the types of its inputs.
fn result_type(opcode: RegOpcode, arg: u32, inputs: &[ValueType]) -> ValueType {
    let input = |index: usize| inputs.get(index).copied().unwrap_or(ValueType::Obj);
    match opcode {
        RegOpcode::Move | RegOpcode::LoadConst | RegOpcode::LoadFast | RegOpcode::StoreFast => {
            input(0)
        }
        RegOpcode::BinaryOp | RegOpcode::InplaceOp => match BinaryOp::from_arg(arg) {
            Some(op) => arithmetic(op, input(0), input(1)),
            None => ValueType::Obj,
        },
        RegOpcode::UnaryOp => match (UnaryOp::from_arg(arg), input(0)) {
            (Some(UnaryOp::Positive | UnaryOp::Negative | UnaryOp::Invert), ValueType::Int) => {
                ValueType::Int
            }
            (Some(UnaryOp::Positive | UnaryOp::Negative), ValueType::Float) => ValueType::Float,
            (_, ValueType::Unknown) => ValueType::Unknown,
            _ => ValueType::Obj,
        },
        RegOpcode::IntAdd | RegOpcode::IntSub | RegOpcode::IntMul => ValueType::Int,
        RegOpcode::BuildList => ValueType::List,
        RegOpcode::BuildTuple | RegOpcode::UnpackSequence => ValueType::Tuple,
        RegOpcode::BuildMap => ValueType::Dict,
        _ => ValueType::Obj,
    }
}

/// Joins the type of every write into each register until nothing changes.
pub fn infer_types(state: &CompilerState) -> Vec<ValueType> {
    let mut types = vec![ValueType::Unknown; state.num_registers as usize];
    for (index, constant) in state.code.consts.iter().enumerate() {
        types[index] = ValueType::of_const(constant);
    }
    let params = state.code.argcount as usize
        + usize::from(state.code.has_varargs())
        + usize::from(state.code.has_varkeywords());
    for index in 0..params.min(state.num_locals as usize) {
        types[state.local_reg(index as u32) as usize] = ValueType::Obj;
    }

    loop {
        let mut changed = false;
        for op in state.live_blocks().flat_map(|block| block.live_ops()) {
            let Some(dest) = op.dest else {
                continue;
            };
            let inputs: Vec<ValueType> = op
                .inputs
                .iter()
                .map(|&reg| types[reg as usize])
                .collect();
            let written = result_type(op.opcode, op.arg, &inputs);
            let joined = types[dest as usize].join(written);
            if joined != types[dest as usize] {
                types[dest as usize] = joined;
                changed = true;
            }
        }
        if !changed {
            return types;
        }
    }
}

pub struct SpecializePass;

impl RegisterPass for SpecializePass {
    fn name(&self) -> PassName {
        PassName::Specialize
    }

    fn run(&self, state: &mut CompilerState) -> Result<usize, CompileError> {
        let types = infer_types(state);
        let type_of = |reg: Reg| types[reg as usize];
        let mut changes = 0;

        for block in state.blocks.iter_mut().filter(|block| !block.dead) {
            for op in block.ops.iter_mut().filter(|op| !op.dead) {
                let rewritten = match op.opcode {
                    RegOpcode::BinaryOp | RegOpcode::InplaceOp => {
                        let ints = op.inputs.iter().all(|&reg| type_of(reg) == ValueType::Int);
                        match BinaryOp::from_arg(op.arg) {
                            Some(BinaryOp::Add) if ints => Some(RegOpcode::IntAdd),
                            Some(BinaryOp::Subtract) if ints => Some(RegOpcode::IntSub),
                            Some(BinaryOp::Multiply) if ints => Some(RegOpcode::IntMul),
                            _ => None,
                        }
                    }
                    RegOpcode::CompareOp => {
                        let ints = op.inputs.iter().all(|&reg| type_of(reg) == ValueType::Int);
                        let container = op.inputs.get(1).map(|&reg| type_of(reg));
                        match (CompareOp::from_arg(op.arg), container) {
                            (
                                Some(
                                    CompareOp::Lt
                                    | CompareOp::Le
                                    | CompareOp::Eq
                                    | CompareOp::Ne
                                    | CompareOp::Gt
                                    | CompareOp::Ge,
                                ),
                                _,
                            ) if ints => Some(RegOpcode::IntCompare),
                            (Some(CompareOp::In | CompareOp::NotIn), Some(ValueType::List)) => {
                                Some(RegOpcode::ListContains)
                            }
                            (Some(CompareOp::In | CompareOp::NotIn), Some(ValueType::Dict)) => {
                                Some(RegOpcode::DictContains)
                            }
                            _ => None,
                        }
                    }
                    RegOpcode::BinarySubscr => match op.inputs.first().map(|&reg| type_of(reg)) {
                        Some(ValueType::List) => Some(RegOpcode::ListSubscr),
                        Some(ValueType::Dict) => Some(RegOpcode::DictSubscr),
                        _ => None,
                    },
                    RegOpcode::StoreSubscr => match op.inputs.first().map(|&reg| type_of(reg)) {
                        Some(ValueType::List) => Some(RegOpcode::StoreListSubscr),
                        Some(ValueType::Dict) => Some(RegOpcode::StoreDictSubscr),
                        _ => None,
                    },
                    _ => None,
                };
                if let Some(opcode) = rewritten {
                    if matches!(
                        opcode,
                        RegOpcode::IntAdd | RegOpcode::IntSub | RegOpcode::IntMul
                    ) {
                        op.arg = u32::from(op.opcode == RegOpcode::InplaceOp) * INPLACE_FLAG;
                    }
                    op.opcode = opcode;
                    changes += 1;
                }
            }
        }

        changes += specialize_append(state, &types);
        Ok(changes)
    }
}

/// `list.append(x)` becomes `LIST_APPEND` when the receiver is known to be a list and the
/// bound method is used only by the call.
fn specialize_append(state: &mut CompilerState, types: &[ValueType]) -> usize {
    let uses = state.use_counts();
    let append = state
        .code
        .names
        .iter()
        .position(|name| name == "append")
        .map(|index| index as u32);
    let Some(append) = append else {
        return 0;
    };
    let single_positional = CallArgs::pack(1, 0);
    let mut changes = 0;

    for block in state.blocks.iter_mut().filter(|block| !block.dead) {
        let ops = &mut block.ops;
        for index in 0..ops.len() {
            let op = &ops[index];
            if op.dead || op.opcode != RegOpcode::LoadAttr || op.arg != append {
                continue;
            }
            let (Some(&receiver), Some(method)) = (op.inputs.first(), op.dest) else {
                continue;
            };
            if types[receiver as usize] != ValueType::List || uses[method as usize] != 1 {
                continue;
            }
            let mut call = None;
            for later in index + 1..ops.len() {
                let candidate = &ops[later];
                if candidate.dead {
                    continue;
                }
                if candidate.opcode == RegOpcode::CallFunction
                    && candidate.arg == single_positional
                    && candidate.inputs.len() == 2
                    && candidate.inputs[0] == method
                {
                    call = Some(later);
                    break;
                }
                if candidate.dest == Some(receiver) || candidate.dest == Some(method) {
                    break;
                }
            }
            let Some(call) = call else {
                continue;
            };
            let item = ops[call].inputs[1];
            let call_op = &mut ops[call];
            call_op.opcode = RegOpcode::ListAppend;
            call_op.arg = 0;
            call_op.inputs = vec![receiver, item];
            ops[index].dead = true;
            changes += 1;
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::{OptimizationPlan, RegisterOptimizer};
    use crate::registerize::registerize;
    use fp_bytecode::{CodeBuilder, Opcode};
    use std::sync::Arc;

    fn optimized(builder: &mut CodeBuilder) -> CompilerState {
        let code = Arc::new(builder.build().unwrap());
        let mut state = registerize(&code).unwrap();
        RegisterOptimizer::new()
            .apply_plan(&mut state, &OptimizationPlan::for_level(2))
            .unwrap();
        state
    }

    fn live_opcodes(state: &CompilerState) -> Vec<RegOpcode> {
        state
            .live_blocks()
            .flat_map(|block| block.live_ops())
            .map(|op| op.opcode)
            .collect()
    }

    #[test]
    fn join_widens_mixed_types() {
        assert_eq!(ValueType::Unknown.join(ValueType::Int), ValueType::Int);
        assert_eq!(ValueType::Int.join(ValueType::Int), ValueType::Int);
        assert_eq!(ValueType::Int.join(ValueType::List), ValueType::Obj);
    }

    #[test]
    fn constant_ints_use_the_int_fast_path() {
        let mut builder = CodeBuilder::new("f");
        builder.load_int(2).store_fast("a");
        builder.load_int(3).store_fast("b");
        builder.load_fast("a").load_fast("b").op(Opcode::BinaryAdd).ret();
        let state = optimized(&mut builder);
        assert!(live_opcodes(&state).contains(&RegOpcode::IntAdd));
    }

    #[test]
    fn parameters_stay_generic() {
        let mut builder = CodeBuilder::new("f").params(&["a", "b"]);
        builder.load_fast("a").load_fast("b").op(Opcode::BinaryAdd).ret();
        let state = optimized(&mut builder);
        assert_eq!(
            live_opcodes(&state),
            vec![RegOpcode::BinaryOp, RegOpcode::ReturnValue]
        );
    }

    #[test]
    fn list_subscript_and_membership_are_specialized() {
        // xs = [1, 2]; return xs[0] in xs
        let mut builder = CodeBuilder::new("f");
        builder.load_int(1).load_int(2).op_arg(Opcode::BuildList, 2);
        builder.store_fast("xs");
        builder.load_fast("xs").load_int(0).op(Opcode::BinarySubscr);
        builder.load_fast("xs").compare(CompareOp::In).ret();
        let state = optimized(&mut builder);
        let opcodes = live_opcodes(&state);
        assert!(opcodes.contains(&RegOpcode::ListSubscr), "{opcodes:?}");
        assert!(opcodes.contains(&RegOpcode::ListContains), "{opcodes:?}");
    }
}
