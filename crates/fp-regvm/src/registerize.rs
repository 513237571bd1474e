//! Stack-to-register translation.
//!
//! Walks the stack-machine instructions while threading a [`RegisterStack`] of symbolic
//! registers, building the CFG in [`CompilerState`]. Loads of constants and locals push the
//! aliased register without emitting anything. Every block is memoized by source offset, so
//! a second arrival at a merge point reconciles its stack to the recorded entry layout and
//! jumps there instead of translating the code again.
//!
//! The fall-through arm of a two-way branch is translated immediately and always opens a
//! freshly allocated block, so it sits right after the branch in layout order. Taken arms are
//! queued and translated afterwards.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use fp_bytecode::{decode_at, jump_targets, CallArgs, CodeObject, CompareOp, Instruction, Opcode};
use fp_stackvm::{BinaryOp, UnaryOp};
use tracing::trace;

use crate::analysis::DefiniteAssignment;
use crate::error::CompileError;
use crate::ir::{BlockId, CompilerOp, CompilerState, Reg};
use crate::opcode::RegOpcode;
use crate::stack::RegisterStack;
use crate::{compile_bail, compile_ensure};

/// Translates `code` into an unoptimized register CFG.
pub fn registerize(code: &Arc<CodeObject>) -> Result<CompilerState, CompileError> {
    let mut registerizer = Registerizer::new(code)?;
    let entry = registerizer.walk(0, RegisterStack::new())?;
    registerizer.state.entry = entry;
    while let Some(arm) = registerizer.pending.pop_front() {
        let target = registerizer.walk(arm.offset, arm.stack)?;
        registerizer.state.blocks[arm.from].exits.push(target);
    }
    registerizer.state.check_exits()?;
    Ok(registerizer.state)
}

struct PendingArm {
    offset: usize,
    stack: RegisterStack,
    /// Branch block whose taken exit this arm becomes.
    from: BlockId,
}

enum Flow {
    Next,
    Jump(usize),
    Branch { target: usize, taken: RegisterStack },
    Stop,
}

struct Registerizer {
    code: Arc<CodeObject>,
    state: CompilerState,
    leaders: HashSet<usize>,
    assignment: DefiniteAssignment,
    pending: VecDeque<PendingArm>,
}

/// Block bookkeeping of one walk.
#[derive(Default)]
struct Cursor {
    entry: Option<BlockId>,
    current: Option<BlockId>,
    /// Branch block waiting for its fall-through exit.
    fall_from: Option<BlockId>,
}

impl Registerizer {
    fn new(code: &Arc<CodeObject>) -> Result<Self, CompileError> {
        fp_bytecode::validate_code(code)?;
        let mut leaders: HashSet<usize> = jump_targets(&code.code)?.into_iter().collect();
        leaders.insert(0);
        Ok(Self {
            code: code.clone(),
            state: CompilerState::new(code.clone()),
            leaders,
            assignment: DefiniteAssignment::analyze(code)?,
            pending: VecDeque::new(),
        })
    }

    /// Makes `block` the block being filled, linking it after the previous one.
    fn attach(&mut self, cursor: &mut Cursor, block: BlockId) {
        if let Some(previous) = cursor.current {
            self.state.blocks[previous].exits.push(block);
        } else if let Some(branch) = cursor.fall_from.take() {
            self.state.blocks[branch].exits.push(block);
        }
        cursor.entry.get_or_insert(block);
        cursor.current = Some(block);
    }

    /// Block that receives edge code: the current one, or a new synthetic prelude.
    fn edge_host(&mut self, cursor: &mut Cursor) -> BlockId {
        match cursor.current {
            Some(block) => block,
            None => {
                let prelude = self.state.new_block(None);
                self.attach(cursor, prelude);
                prelude
            }
        }
    }

    fn walk(&mut self, start: usize, mut stack: RegisterStack) -> Result<BlockId, CompileError> {
        let mut cursor = Cursor::default();
        let mut pc = start;
        loop {
            if cursor.current.is_none() || self.leaders.contains(&pc) {
                if let Some(&existing) = self.state.block_at.get(&pc) {
                    let moves = self.reconcile_moves(&stack, existing, pc)?;
                    if moves.is_empty() && cursor.current.is_none() && cursor.fall_from.is_none()
                    {
                        return Ok(existing);
                    }
                    let host = self.edge_host(&mut cursor);
                    self.emit_moves(host, moves);
                    self.emit(host, RegOpcode::Jump, 0, Vec::new(), None, None);
                    self.state.blocks[host].exits.push(existing);
                    return Ok(cursor.entry.unwrap_or(host));
                }
                if self.leaders.contains(&pc) && self.has_aliases(&stack) {
                    let host = self.edge_host(&mut cursor);
                    self.materialise(host, &mut stack);
                }
                let block = self.state.new_block(Some(pc));
                self.state.blocks[block].entry_stack = stack.registers().to_vec();
                self.state.block_at.insert(pc, block);
                self.attach(&mut cursor, block);
            }

            let Some(block) = cursor.current else {
                compile_bail!("no open block at offset {}", pc);
            };
            let instr = decode_at(&self.code.code, pc)?;
            trace!(
                offset = instr.offset,
                opcode = %instr.opcode,
                depth = stack.len(),
                "registerize"
            );
            match self.translate(block, &instr, &mut stack)? {
                Flow::Next => pc = instr.next,
                Flow::Jump(target) => pc = target,
                Flow::Branch { target, taken } => {
                    self.pending.push_back(PendingArm {
                        offset: target,
                        stack: taken,
                        from: block,
                    });
                    cursor.fall_from = Some(block);
                    cursor.current = None;
                    pc = instr.next;
                }
                Flow::Stop => return Ok(cursor.entry.unwrap_or(block)),
            }
        }
    }

    fn emit(
        &mut self,
        block: BlockId,
        opcode: RegOpcode,
        arg: u32,
        inputs: Vec<Reg>,
        dest: Option<Reg>,
        source_offset: Option<usize>,
    ) {
        let mut op = CompilerOp::new(opcode, arg, inputs, dest);
        op.source_offset = source_offset;
        self.state.blocks[block].ops.push(op);
    }

    /// Emits `opcode` into a fresh temporary and returns it.
    fn emit_value(
        &mut self,
        block: BlockId,
        opcode: RegOpcode,
        arg: u32,
        inputs: Vec<Reg>,
        offset: usize,
    ) -> Reg {
        let dest = self.state.alloc_register();
        self.emit(block, opcode, arg, inputs, Some(dest), Some(offset));
        dest
    }

    fn copy_opcode(&self, reg: Reg) -> RegOpcode {
        if reg < self.state.num_consts {
            RegOpcode::LoadConst
        } else if self.state.is_local(reg) {
            RegOpcode::LoadFast
        } else {
            RegOpcode::Move
        }
    }

    /// Stack holds a constant or local alias, or the same register twice.
    fn has_aliases(&self, stack: &RegisterStack) -> bool {
        let mut seen = HashSet::new();
        stack
            .registers()
            .iter()
            .any(|&reg| !self.state.is_temp(reg) || !seen.insert(reg))
    }

    /// Gives every stack slot its own temporary, so merge moves only ever write temporaries.
    fn materialise(&mut self, block: BlockId, stack: &mut RegisterStack) {
        let mut seen = HashSet::new();
        for index in 0..stack.len() {
            let reg = stack.registers()[index];
            if self.state.is_temp(reg) && seen.insert(reg) {
                continue;
            }
            let temp = self.state.alloc_register();
            let opcode = self.copy_opcode(reg);
            self.emit(block, opcode, 0, vec![reg], Some(temp), None);
            stack.set(index, temp);
            seen.insert(temp);
        }
    }

    /// Copies every stack slot aliasing `local` into a temporary before `local` is written.
    fn spill_local(&mut self, block: BlockId, stack: &mut RegisterStack, local: Reg, offset: usize) {
        if stack.registers().contains(&local) {
            let temp = self.emit_value(block, RegOpcode::LoadFast, 0, vec![local], offset);
            stack.replace(local, temp);
        }
    }

    /// `(dest, source)` pairs that make `stack` match the entry layout of `target`.
    fn reconcile_moves(
        &self,
        stack: &RegisterStack,
        target: BlockId,
        offset: usize,
    ) -> Result<Vec<(Reg, Reg)>, CompileError> {
        let canonical = &self.state.blocks[target].entry_stack;
        compile_ensure!(
            canonical.len() == stack.len(),
            "stack depth {} does not match depth {} recorded at offset {}",
            stack.len(),
            canonical.len(),
            offset
        );
        Ok(canonical
            .iter()
            .zip(stack.registers())
            .filter(|(dest, source)| dest != source)
            .map(|(&dest, &source)| (dest, source))
            .collect())
    }

    /// Emits the moves as a parallel copy: sources that are overwritten go through temporaries.
    fn emit_moves(&mut self, block: BlockId, moves: Vec<(Reg, Reg)>) {
        let dests: HashSet<Reg> = moves.iter().map(|(dest, _)| *dest).collect();
        let mut staged = Vec::with_capacity(moves.len());
        for (dest, source) in moves {
            if dests.contains(&source) {
                let temp = self.state.alloc_register();
                self.emit(block, RegOpcode::Move, 0, vec![source], Some(temp), None);
                staged.push((dest, temp));
            } else {
                staged.push((dest, source));
            }
        }
        for (dest, source) in staged {
            self.emit(block, RegOpcode::Move, 0, vec![source], Some(dest), None);
        }
    }

    fn target(instr: &Instruction) -> Result<usize, CompileError> {
        match instr.jump_target() {
            Some(target) => Ok(target),
            None => compile_bail!("{} at offset {} has no target", instr.opcode, instr.offset),
        }
    }

    fn translate(
        &mut self,
        block: BlockId,
        instr: &Instruction,
        stack: &mut RegisterStack,
    ) -> Result<Flow, CompileError> {
        let offset = instr.offset;
        let arg = instr.arg;

        if let Some((op, in_place)) = BinaryOp::from_opcode(instr.opcode) {
            let right = stack.pop()?;
            let left = stack.pop()?;
            let opcode = if in_place {
                RegOpcode::InplaceOp
            } else {
                RegOpcode::BinaryOp
            };
            let dest = self.emit_value(block, opcode, op as u32, vec![left, right], offset);
            stack.push(dest);
            return Ok(Flow::Next);
        }
        if let Some(op) = UnaryOp::from_opcode(instr.opcode) {
            let value = stack.pop()?;
            let dest = self.emit_value(block, RegOpcode::UnaryOp, op as u32, vec![value], offset);
            stack.push(dest);
            return Ok(Flow::Next);
        }

        match instr.opcode {
            Opcode::Nop => {}
            Opcode::PopTop => {
                stack.pop()?;
            }
            Opcode::RotTwo => stack.rotate(2)?,
            Opcode::RotThree => stack.rotate(3)?,
            Opcode::RotFour => stack.rotate(4)?,
            Opcode::DupTop => {
                let top = stack.peek(1)?;
                stack.push(top);
            }
            Opcode::DupTopx => {
                let count = arg as usize;
                compile_ensure!(
                    count <= stack.len(),
                    "DUP_TOPX {} at offset {} on a stack of depth {}",
                    count,
                    offset,
                    stack.len()
                );
                let top = stack.registers()[stack.len() - count..].to_vec();
                for reg in top {
                    stack.push(reg);
                }
            }
            Opcode::LoadConst => {
                stack.push(self.state.const_reg(arg));
            }
            Opcode::LoadFast => {
                let local = self.state.local_reg(arg);
                if !self.assignment.is_assigned(offset, arg as usize) {
                    self.emit(
                        block,
                        RegOpcode::CheckLocal,
                        arg,
                        vec![local],
                        None,
                        Some(offset),
                    );
                }
                stack.push(local);
            }
            Opcode::StoreFast => {
                let value = stack.pop()?;
                let local = self.state.local_reg(arg);
                self.spill_local(block, stack, local, offset);
                if value != local {
                    self.emit(
                        block,
                        RegOpcode::StoreFast,
                        arg,
                        vec![value],
                        Some(local),
                        Some(offset),
                    );
                }
            }
            Opcode::LoadName | Opcode::LoadGlobal | Opcode::LoadClosure | Opcode::LoadDeref => {
                let opcode = match instr.opcode {
                    Opcode::LoadName => RegOpcode::LoadName,
                    Opcode::LoadGlobal => RegOpcode::LoadGlobal,
                    Opcode::LoadClosure => RegOpcode::LoadClosure,
                    _ => RegOpcode::LoadDeref,
                };
                let dest = self.emit_value(block, opcode, arg, Vec::new(), offset);
                stack.push(dest);
            }
            Opcode::StoreName | Opcode::StoreGlobal | Opcode::StoreDeref => {
                let value = stack.pop()?;
                let opcode = match instr.opcode {
                    Opcode::StoreName => RegOpcode::StoreName,
                    Opcode::StoreGlobal => RegOpcode::StoreGlobal,
                    _ => RegOpcode::StoreDeref,
                };
                self.emit(block, opcode, arg, vec![value], None, Some(offset));
            }
            Opcode::LoadAttr => {
                let target = stack.pop()?;
                let dest = self.emit_value(block, RegOpcode::LoadAttr, arg, vec![target], offset);
                stack.push(dest);
            }
            Opcode::StoreAttr => {
                let target = stack.pop()?;
                let value = stack.pop()?;
                self.emit(
                    block,
                    RegOpcode::StoreAttr,
                    arg,
                    vec![target, value],
                    None,
                    Some(offset),
                );
            }
            Opcode::DeleteAttr => {
                let target = stack.pop()?;
                self.emit(
                    block,
                    RegOpcode::DeleteAttr,
                    arg,
                    vec![target],
                    None,
                    Some(offset),
                );
            }
            Opcode::CompareOp => {
                compile_ensure!(
                    CompareOp::from_arg(arg).is_some(),
                    "COMPARE_OP {} at offset {} has no comparison",
                    arg,
                    offset
                );
                let right = stack.pop()?;
                let left = stack.pop()?;
                let dest =
                    self.emit_value(block, RegOpcode::CompareOp, arg, vec![left, right], offset);
                stack.push(dest);
            }
            Opcode::BinarySubscr => {
                let key = stack.pop()?;
                let container = stack.pop()?;
                let dest =
                    self.emit_value(block, RegOpcode::BinarySubscr, 0, vec![container, key], offset);
                stack.push(dest);
            }
            Opcode::StoreSubscr => {
                let key = stack.pop()?;
                let container = stack.pop()?;
                let value = stack.pop()?;
                self.emit(
                    block,
                    RegOpcode::StoreSubscr,
                    0,
                    vec![container, key, value],
                    None,
                    Some(offset),
                );
            }
            Opcode::DeleteSubscr => {
                let key = stack.pop()?;
                let container = stack.pop()?;
                self.emit(
                    block,
                    RegOpcode::DeleteSubscr,
                    0,
                    vec![container, key],
                    None,
                    Some(offset),
                );
            }
            Opcode::BuildTuple | Opcode::BuildList | Opcode::BuildSet => {
                let opcode = match instr.opcode {
                    Opcode::BuildTuple => RegOpcode::BuildTuple,
                    Opcode::BuildList => RegOpcode::BuildList,
                    _ => RegOpcode::BuildSet,
                };
                let items = stack.fill_array(arg as usize)?;
                let dest = self.emit_value(block, opcode, arg, items, offset);
                stack.push(dest);
            }
            Opcode::BuildMap => {
                let dest = self.emit_value(block, RegOpcode::BuildMap, arg, Vec::new(), offset);
                stack.push(dest);
            }
            Opcode::StoreMap => {
                let key = stack.pop()?;
                let value = stack.pop()?;
                let map = stack.peek(1)?;
                self.emit(
                    block,
                    RegOpcode::StoreMap,
                    0,
                    vec![map, key, value],
                    None,
                    Some(offset),
                );
            }
            Opcode::BuildSlice => {
                compile_ensure!(
                    arg == 2 || arg == 3,
                    "BUILD_SLICE {} at offset {}",
                    arg,
                    offset
                );
                let parts = stack.fill_array(arg as usize)?;
                let dest = self.emit_value(block, RegOpcode::BuildSlice, arg, parts, offset);
                stack.push(dest);
            }
            Opcode::UnpackSequence => {
                let sequence = stack.pop()?;
                let tuple =
                    self.emit_value(block, RegOpcode::UnpackSequence, arg, vec![sequence], offset);
                let items: Vec<Reg> = (0..arg)
                    .map(|index| {
                        self.emit_value(block, RegOpcode::UnpackItem, index, vec![tuple], offset)
                    })
                    .collect();
                for &item in items.iter().rev() {
                    stack.push(item);
                }
            }
            Opcode::ListAppend => {
                let item = stack.pop()?;
                let list = stack.peek(arg as usize)?;
                self.emit_value(block, RegOpcode::ListAppend, 0, vec![list, item], offset);
            }
            Opcode::CallFunction
            | Opcode::CallFunctionVar
            | Opcode::CallFunctionKw
            | Opcode::CallFunctionVarKw => {
                let (opcode, extra) = match instr.opcode {
                    Opcode::CallFunction => (RegOpcode::CallFunction, 0),
                    Opcode::CallFunctionVar => (RegOpcode::CallFunctionVar, 1),
                    Opcode::CallFunctionKw => (RegOpcode::CallFunctionKw, 1),
                    _ => (RegOpcode::CallFunctionVarKw, 2),
                };
                let counts = CallArgs::unpack(arg);
                let operands = stack.fill_array(1 + counts.stack_values() + extra)?;
                let dest = self.emit_value(block, opcode, arg, operands, offset);
                stack.push(dest);
            }
            Opcode::MakeFunction | Opcode::MakeClosure => {
                let code = stack.pop()?;
                let mut operands = vec![code];
                let opcode = if instr.opcode == Opcode::MakeClosure {
                    operands.push(stack.pop()?);
                    RegOpcode::MakeClosure
                } else {
                    RegOpcode::MakeFunction
                };
                operands.extend(stack.fill_array(arg as usize)?);
                let dest = self.emit_value(block, opcode, arg, operands, offset);
                stack.push(dest);
            }
            Opcode::RaiseVarargs => {
                compile_ensure!(arg <= 3, "RAISE_VARARGS {} at offset {}", arg, offset);
                let operands = stack.fill_array(arg as usize)?;
                self.emit(
                    block,
                    RegOpcode::RaiseVarargs,
                    arg,
                    operands,
                    None,
                    Some(offset),
                );
                return Ok(Flow::Stop);
            }
            Opcode::GetIter => {
                let iterable = stack.pop()?;
                let dest = self.emit_value(block, RegOpcode::GetIter, 0, vec![iterable], offset);
                stack.push(dest);
            }
            Opcode::ForIter => {
                let target = Self::target(instr)?;
                let iterator = stack.peek(1)?;
                let mut taken = stack.clone();
                taken.pop()?;
                let item = self.emit_value(block, RegOpcode::ForIter, 0, vec![iterator], offset);
                stack.push(item);
                return Ok(Flow::Branch { target, taken });
            }
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let target = Self::target(instr)?;
                let condition = stack.pop()?;
                let opcode = if instr.opcode == Opcode::PopJumpIfFalse {
                    RegOpcode::JumpIfFalse
                } else {
                    RegOpcode::JumpIfTrue
                };
                self.emit(block, opcode, 0, vec![condition], None, Some(offset));
                return Ok(Flow::Branch {
                    target,
                    taken: stack.clone(),
                });
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                let target = Self::target(instr)?;
                let condition = stack.peek(1)?;
                let opcode = if instr.opcode == Opcode::JumpIfFalseOrPop {
                    RegOpcode::JumpIfFalse
                } else {
                    RegOpcode::JumpIfTrue
                };
                self.emit(block, opcode, 0, vec![condition], None, Some(offset));
                let taken = stack.clone();
                stack.pop()?;
                return Ok(Flow::Branch { target, taken });
            }
            Opcode::JumpForward | Opcode::JumpAbsolute | Opcode::ContinueLoop => {
                return Ok(Flow::Jump(Self::target(instr)?));
            }
            Opcode::SetupLoop => {
                stack.push_frame(Self::target(instr)?);
            }
            Opcode::PopBlock => {
                stack.pop_frame()?;
            }
            Opcode::BreakLoop => {
                let frame = stack.pop_frame()?;
                stack.truncate(frame.level);
                return Ok(Flow::Jump(frame.target));
            }
            Opcode::ReturnValue => {
                let value = stack.pop()?;
                self.emit(
                    block,
                    RegOpcode::ReturnValue,
                    0,
                    vec![value],
                    None,
                    Some(offset),
                );
                return Ok(Flow::Stop);
            }
            opcode => return Err(CompileError::Unsupported { opcode, offset }),
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::format_ir;
    use fp_bytecode::CodeBuilder;
    use pretty_assertions::assert_eq;

    fn compile(builder: &mut CodeBuilder) -> CompilerState {
        let code = Arc::new(builder.build().unwrap());
        registerize(&code).expect("code should registerize")
    }

    fn opcodes(state: &CompilerState) -> Vec<RegOpcode> {
        state
            .live_blocks()
            .flat_map(|block| block.live_ops())
            .map(|op| op.opcode)
            .collect()
    }

    #[test]
    fn constant_and_local_loads_emit_nothing() {
        let mut builder = CodeBuilder::new("f").params(&["a"]);
        builder.load_fast("a").load_int(1).op(Opcode::BinaryAdd).ret();
        let state = compile(&mut builder);
        assert_eq!(
            opcodes(&state),
            vec![RegOpcode::BinaryOp, RegOpcode::ReturnValue]
        );
        let add = &state.blocks[0].ops[0];
        assert_eq!(add.inputs, vec![state.local_reg(0), state.const_reg(0)]);
        assert_eq!(add.dest, Some(state.first_temp()));
    }

    #[test]
    fn rot_two_only_reorders_the_virtual_stack() {
        // a, b = b, a
        let mut builder = CodeBuilder::new("swap").params(&["a", "b"]);
        builder.load_fast("b").load_fast("a").op(Opcode::RotTwo);
        builder.store_fast("a").store_fast("b");
        builder.load_none().ret();
        let state = compile(&mut builder);
        let listing = format_ir(&state);
        assert_eq!(
            opcodes(&state),
            vec![
                RegOpcode::LoadFast,
                RegOpcode::StoreFast,
                RegOpcode::StoreFast,
                RegOpcode::ReturnValue
            ],
            "{listing}"
        );
    }

    #[test]
    fn store_spills_aliases_of_the_overwritten_local() {
        // the old x is still on the stack when x is overwritten
        let mut builder = CodeBuilder::new("f").params(&["x"]);
        builder.load_fast("x").load_int(2).store_fast("x").ret();
        let state = compile(&mut builder);
        let ops: Vec<&CompilerOp> = state.blocks[0].live_ops().collect();
        assert_eq!(ops[0].opcode, RegOpcode::LoadFast);
        assert_eq!(ops[0].inputs, vec![state.local_reg(0)]);
        let spilled = ops[0].dest.unwrap();
        assert_eq!(ops[1].opcode, RegOpcode::StoreFast);
        assert_eq!(ops[2].opcode, RegOpcode::ReturnValue);
        assert_eq!(ops[2].inputs, vec![spilled]);
    }

    #[test]
    fn maybe_unbound_loads_keep_a_check() {
        let mut builder = CodeBuilder::new("f");
        builder.load_fast("ghost").ret();
        let state = compile(&mut builder);
        assert_eq!(
            opcodes(&state),
            vec![RegOpcode::CheckLocal, RegOpcode::ReturnValue]
        );
    }

    #[test]
    fn conditional_branch_has_fallthrough_first() {
        // return 1 if a else 2
        let mut builder = CodeBuilder::new("f").params(&["a"]);
        let other = builder.new_label();
        builder.load_fast("a");
        builder.jump(Opcode::PopJumpIfFalse, other);
        builder.load_int(1).ret();
        builder.bind(other);
        builder.load_int(2).ret();
        let state = compile(&mut builder);
        let entry = &state.blocks[state.entry];
        assert_eq!(entry.exits.len(), 2);
        assert_eq!(entry.exits[0], entry.id + 1);
        assert_eq!(state.blocks[entry.exits[1]].source_offset, Some(10));
    }

    #[test]
    fn conditional_expression_materialises_aliases_at_the_join() {
        // return (a if c else b) + 1
        let mut builder = CodeBuilder::new("f").params(&["c", "a", "b"]);
        let other = builder.new_label();
        let join = builder.new_label();
        builder.load_fast("c");
        builder.jump(Opcode::PopJumpIfFalse, other);
        builder.load_fast("a");
        builder.jump(Opcode::JumpForward, join);
        builder.bind(other);
        builder.load_fast("b");
        builder.bind(join);
        builder.load_int(1).op(Opcode::BinaryAdd).ret();
        let state = compile(&mut builder);
        let join_block = state
            .live_blocks()
            .find(|block| block.source_offset == Some(15))
            .expect("join block");
        let canonical = join_block.entry_stack[0];
        assert!(state.is_temp(canonical));
        let moves: Vec<&CompilerOp> = state
            .live_blocks()
            .flat_map(|block| block.live_ops())
            .filter(|op| op.dest == Some(canonical))
            .collect();
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0].inputs, vec![state.local_reg(1)]);
        assert_eq!(moves[1].opcode, RegOpcode::Move);
        assert_eq!(moves[1].inputs, vec![state.local_reg(2)]);
    }

    #[test]
    fn unsupported_opcode_is_reported_with_offset() {
        let mut builder = CodeBuilder::new("f");
        builder.load_int(1).op(Opcode::PrintItem);
        builder.load_none().ret();
        let code = Arc::new(builder.build().unwrap());
        let err = registerize(&code).unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(err.to_string(), "unsupported opcode PRINT_ITEM at offset 3");
    }
}
