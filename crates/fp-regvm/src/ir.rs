//! The register IR: symbolic operations grouped into basic blocks.
//!
//! Blocks live in one arena owned by [`CompilerState`] and refer to each other by index.
//! Allocation order is layout order: a block that falls through is always followed by its
//! first exit among the live blocks.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use fp_bytecode::CodeObject;
use itertools::Itertools;

use crate::compile_ensure;
use crate::error::CompileError;
use crate::opcode::RegOpcode;

/// Symbolic register: constants first, then locals, then temporaries.
pub type Reg = u32;
pub type BlockId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOp {
    pub opcode: RegOpcode,
    pub arg: u32,
    pub inputs: Vec<Reg>,
    pub dest: Option<Reg>,
    pub dead: bool,
    /// Stack-machine instruction this op was translated from.
    pub source_offset: Option<usize>,
}

impl CompilerOp {
    pub fn new(opcode: RegOpcode, arg: u32, inputs: Vec<Reg>, dest: Option<Reg>) -> Self {
        Self {
            opcode,
            arg,
            inputs,
            dest,
            dead: false,
            source_offset: None,
        }
    }

    pub fn has_dest(&self) -> bool {
        self.dest.is_some()
    }

    /// Source register of a copy op.
    pub fn copy_source(&self) -> Option<Reg> {
        if self.opcode.is_copy() {
            self.inputs.first().copied()
        } else {
            None
        }
    }

    /// Every register slot in encoding order: inputs, then the destination.
    pub fn registers(&self) -> impl Iterator<Item = Reg> + '_ {
        self.inputs.iter().copied().chain(self.dest)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Stack-machine offset this block starts at; `None` for synthetic preludes.
    pub source_offset: Option<usize>,
    /// Byte offset in the encoded stream, set during lowering.
    pub encoded_offset: usize,
    pub ops: Vec<CompilerOp>,
    /// Successors: the fall-through first, then the taken branch.
    pub exits: Vec<BlockId>,
    pub entries: Vec<BlockId>,
    /// Register stack layout every predecessor must reconcile to.
    pub entry_stack: Vec<Reg>,
    pub dead: bool,
}

impl BasicBlock {
    pub fn live_ops(&self) -> impl Iterator<Item = &CompilerOp> {
        self.ops.iter().filter(|op| !op.dead)
    }

    pub fn last_live_op(&self) -> Option<&CompilerOp> {
        self.ops.iter().rev().find(|op| !op.dead)
    }

    /// Control can leave this block by running off its end into `exits[0]`.
    pub fn falls_through(&self) -> bool {
        !self.exits.is_empty()
            && !matches!(self.last_live_op(), Some(op) if op.opcode == RegOpcode::Jump)
    }
}

/// Per-function compilation context.
#[derive(Debug, Clone)]
pub struct CompilerState {
    pub code: Arc<CodeObject>,
    pub blocks: Vec<BasicBlock>,
    pub block_at: HashMap<usize, BlockId>,
    pub entry: BlockId,
    pub num_registers: u32,
    pub num_consts: u32,
    pub num_locals: u32,
}

impl CompilerState {
    pub fn new(code: Arc<CodeObject>) -> Self {
        let num_consts = code.num_consts() as u32;
        let num_locals = code.num_locals() as u32;
        Self {
            code,
            blocks: Vec::new(),
            block_at: HashMap::new(),
            entry: 0,
            num_registers: num_consts + num_locals,
            num_consts,
            num_locals,
        }
    }

    pub fn new_block(&mut self, source_offset: Option<usize>) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock {
            id,
            source_offset,
            ..BasicBlock::default()
        });
        id
    }

    pub fn alloc_register(&mut self) -> Reg {
        let reg = self.num_registers;
        self.num_registers += 1;
        reg
    }

    pub fn const_reg(&self, index: u32) -> Reg {
        index
    }

    pub fn local_reg(&self, index: u32) -> Reg {
        self.num_consts + index
    }

    /// First register that is neither a constant nor a local.
    pub fn first_temp(&self) -> Reg {
        self.num_consts + self.num_locals
    }

    pub fn is_temp(&self, reg: Reg) -> bool {
        reg >= self.first_temp()
    }

    pub fn is_local(&self, reg: Reg) -> bool {
        reg >= self.num_consts && reg < self.first_temp()
    }

    pub fn live_blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().filter(|block| !block.dead)
    }

    pub fn live_block_ids(&self) -> Vec<BlockId> {
        self.live_blocks().map(|block| block.id).collect()
    }

    /// Next live block after `id` in layout order.
    pub fn next_live(&self, id: BlockId) -> Option<BlockId> {
        self.blocks[id + 1..]
            .iter()
            .find(|block| !block.dead)
            .map(|block| block.id)
    }

    /// Rebuilds every block's entry list from the exit lists; returns how many lists changed.
    pub fn mark_entries(&mut self) -> usize {
        let mut entries: Vec<Vec<BlockId>> = vec![Vec::new(); self.blocks.len()];
        for block in self.live_blocks() {
            for &exit in &block.exits {
                if !entries[exit].contains(&block.id) {
                    entries[exit].push(block.id);
                }
            }
        }
        let mut changed = 0;
        for (block, entries) in self.blocks.iter_mut().zip(entries) {
            if block.entries != entries {
                block.entries = entries;
                changed += 1;
            }
        }
        changed
    }

    /// Drops dead ops from their blocks and empties dead blocks.
    pub fn sweep(&mut self) {
        for block in &mut self.blocks {
            if block.dead {
                block.ops.clear();
                block.exits.clear();
                block.entries.clear();
            } else {
                block.ops.retain(|op| !op.dead);
            }
        }
    }

    /// Number of reads of every register by live ops.
    pub fn use_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.num_registers as usize];
        for block in self.live_blocks() {
            for op in block.live_ops() {
                for &reg in &op.inputs {
                    counts[reg as usize] += 1;
                }
            }
        }
        counts
    }

    /// Checks that every live block's exit count agrees with its terminating op.
    pub fn check_exits(&self) -> Result<(), CompileError> {
        for block in self.live_blocks() {
            let expected = match block.last_live_op() {
                Some(op) if op.opcode.is_conditional() => 2,
                Some(op) if op.opcode == RegOpcode::Jump => 1,
                Some(op) if op.opcode.is_terminal() => 0,
                _ => 1,
            };
            compile_ensure!(
                block.exits.len() == expected,
                "block {} has {} exits, expected {}",
                block.id,
                block.exits.len(),
                expected
            );
            for &exit in &block.exits {
                compile_ensure!(
                    exit < self.blocks.len() && !self.blocks[exit].dead,
                    "block {} exits to dead block {}",
                    block.id,
                    exit
                );
            }
        }
        Ok(())
    }

    pub fn op_count(&self) -> usize {
        self.live_blocks().map(|block| block.live_ops().count()).sum()
    }

    /// Highest register referenced by a live op, plus one.
    pub fn registers_in_use(&self) -> u32 {
        self.live_blocks()
            .flat_map(|block| block.live_ops())
            .flat_map(|op| op.registers())
            .map(|reg| reg + 1)
            .max()
            .unwrap_or(0)
            .max(self.first_temp())
    }
}

fn format_reg(state: &CompilerState, reg: Reg) -> String {
    if reg < state.num_consts {
        format!("c{}", reg)
    } else if state.is_local(reg) {
        let index = reg - state.num_consts;
        match state.code.varname_at(index) {
            Some(name) => name.to_string(),
            None => format!("l{}", index),
        }
    } else {
        format!("r{}", reg)
    }
}

/// Listing of the live IR, one block per paragraph.
pub fn format_ir(state: &CompilerState) -> String {
    let mut out = String::new();
    for block in state.live_blocks() {
        let origin = block
            .source_offset
            .map_or_else(|| "prelude".to_string(), |offset| format!("@{}", offset));
        let _ = writeln!(
            out,
            "block {} ({}) -> [{}]",
            block.id,
            origin,
            block.exits.iter().join(", ")
        );
        for op in block.live_ops() {
            let inputs = op.inputs.iter().map(|&reg| format_reg(state, reg)).join(", ");
            let _ = match op.dest {
                Some(dest) => writeln!(
                    out,
                    "    {} = {} {} [{}]",
                    format_reg(state, dest),
                    op.opcode,
                    op.arg,
                    inputs
                ),
                None => writeln!(out, "    {} {} [{}]", op.opcode, op.arg, inputs),
            };
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fp_bytecode::CodeBuilder;

    fn state() -> CompilerState {
        let mut builder = CodeBuilder::new("f").params(&["a"]);
        builder.load_int(1).ret();
        CompilerState::new(Arc::new(builder.build().unwrap()))
    }

    #[test]
    fn registers_alias_consts_then_locals() {
        let mut state = state();
        assert_eq!(state.const_reg(0), 0);
        assert_eq!(state.local_reg(0), 1);
        assert_eq!(state.first_temp(), 2);
        assert_eq!(state.alloc_register(), 2);
        assert!(state.is_temp(2));
        assert!(state.is_local(1));
        assert!(!state.is_local(0));
    }

    #[test]
    fn entries_follow_exits() {
        let mut state = state();
        let a = state.new_block(Some(0));
        let b = state.new_block(Some(3));
        let c = state.new_block(None);
        state.blocks[a].exits = vec![b, c];
        state.blocks[b].exits = vec![c];
        assert_eq!(state.mark_entries(), 2);
        assert_eq!(state.blocks[c].entries, vec![a, b]);
        assert_eq!(state.mark_entries(), 0);
        assert_eq!(state.next_live(a), Some(b));
    }

    #[test]
    fn jump_terminated_blocks_do_not_fall_through() {
        let mut block = BasicBlock {
            exits: vec![4],
            ..BasicBlock::default()
        };
        assert!(block.falls_through());
        block
            .ops
            .push(CompilerOp::new(RegOpcode::Jump, 0, Vec::new(), None));
        assert!(!block.falls_through());
    }
}
