use crate::error::CompileError;
use crate::ir::{BlockId, CompilerState};
use crate::opcode::RegOpcode;

use super::{PassName, RegisterPass};

/// Merges a block into its only predecessor when that predecessor has no other exit.
pub struct FuseBlocksPass;

impl RegisterPass for FuseBlocksPass {
    fn name(&self) -> PassName {
        PassName::FuseBlocks
    }

    fn run(&self, state: &mut CompilerState) -> Result<usize, CompileError> {
        let mut changes = 0;
        for id in state.live_block_ids() {
            if state.blocks[id].dead {
                continue;
            }
            while let Some(next) = fusable(state, id) {
                fuse(state, id, next);
                changes += 1;
            }
        }
        Ok(changes)
    }
}

fn fusable(state: &CompilerState, id: BlockId) -> Option<BlockId> {
    let block = &state.blocks[id];
    let &[next] = block.exits.as_slice() else {
        return None;
    };
    if block
        .last_live_op()
        .is_some_and(|op| op.opcode.is_conditional())
    {
        return None;
    }
    let successor = &state.blocks[next];
    if next == id || next == state.entry || successor.dead || successor.entries != [id] {
        return None;
    }
    // The merged block inherits the successor's fall-through, which needs the successor to be
    // laid out right after `id` already.
    if successor.falls_through() && state.next_live(id) != Some(next) {
        return None;
    }
    Some(next)
}

fn fuse(state: &mut CompilerState, id: BlockId, next: BlockId) {
    let successor = &mut state.blocks[next];
    let mut absorbed = std::mem::take(&mut successor.ops);
    let exits = std::mem::take(&mut successor.exits);
    successor.entries.clear();
    successor.dead = true;

    let block = &mut state.blocks[id];
    if let Some(last) = block.ops.iter_mut().rev().find(|op| !op.dead) {
        if last.opcode == RegOpcode::Jump {
            last.dead = true;
        }
    }
    block.ops.append(&mut absorbed);
    block.exits = exits.clone();

    for exit in exits {
        let entries = &mut state.blocks[exit].entries;
        for entry in entries.iter_mut().filter(|entry| **entry == next) {
            *entry = id;
        }
        entries.dedup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::CompilerOp;
    use crate::registerize::registerize;
    use fp_bytecode::{CodeBuilder, Opcode};
    use std::sync::Arc;

    #[test]
    fn straight_line_jump_is_fused_away() {
        let mut builder = CodeBuilder::new("f");
        let next = builder.new_label();
        builder.jump(Opcode::JumpAbsolute, next);
        builder.bind(next);
        builder.load_int(1).ret();
        let code = Arc::new(builder.build().unwrap());
        let mut state = registerize(&code).unwrap();
        state.mark_entries();
        assert_eq!(state.live_blocks().count(), 2);

        assert_eq!(FuseBlocksPass.run(&mut state).unwrap(), 1);
        state.sweep();
        assert_eq!(state.live_blocks().count(), 1);
        assert_eq!(state.op_count(), 1);
        state.check_exits().unwrap();
    }

    #[test]
    fn non_adjacent_fallthrough_block_is_kept() {
        let mut builder = CodeBuilder::new("f").params(&["a"]);
        builder.load_none().ret();
        let mut state = CompilerState::new(Arc::new(builder.build().unwrap()));
        let local = state.local_reg(0);
        let ret = |reg| CompilerOp::new(RegOpcode::ReturnValue, 0, vec![reg], None);

        let b0 = state.new_block(Some(0));
        let b1 = state.new_block(Some(3));
        let b2 = state.new_block(Some(6));
        let b3 = state.new_block(Some(9));
        state.blocks[b0].ops = vec![CompilerOp::new(RegOpcode::Jump, 0, Vec::new(), None)];
        state.blocks[b0].exits = vec![b2];
        state.blocks[b1].ops = vec![ret(local)];
        state.blocks[b2].ops = vec![CompilerOp::new(RegOpcode::JumpIfTrue, 0, vec![local], None)];
        state.blocks[b2].exits = vec![b3, b1];
        state.blocks[b3].ops = vec![ret(local)];
        state.mark_entries();

        assert_eq!(FuseBlocksPass.run(&mut state).unwrap(), 0);
        assert!(!state.blocks[b2].dead);
    }
}
