//! Register compaction by interference-graph colouring.
//!
//! Temporaries whose live ranges never overlap share a register. Constants and locals keep
//! their fixed slots. Handlers read every input before writing their destination, so an op's
//! destination may reuse the register of an input that dies at that op.

use std::collections::HashSet;

use crate::analysis::LocalSet;
use crate::error::CompileError;
use crate::ir::{BlockId, CompilerState, Reg};

use super::{PassName, RegisterPass};

pub struct CompactRegistersPass;

impl RegisterPass for CompactRegistersPass {
    fn name(&self) -> PassName {
        PassName::CompactRegisters
    }

    fn run(&self, state: &mut CompilerState) -> Result<usize, CompileError> {
        let first_temp = state.first_temp();
        let temps = (state.num_registers - first_temp) as usize;
        if temps == 0 {
            return Ok(0);
        }
        let Some(live_out) = liveness(state) else {
            return Ok(0);
        };

        let mut interference = vec![HashSet::new(); temps];
        for (id, live_out) in live_out {
            let mut live = live_out;
            for op in state.blocks[id].ops.iter().rev().filter(|op| !op.dead) {
                if let Some(dest) = op.dest.filter(|&dest| dest >= first_temp) {
                    let slot = (dest - first_temp) as usize;
                    for other in 0..temps {
                        if other != slot && live.contains(other) {
                            interference[slot].insert(other);
                            interference[other].insert(slot);
                        }
                    }
                    live.remove(slot);
                }
                for &input in op.inputs.iter().filter(|&&input| input >= first_temp) {
                    live.insert((input - first_temp) as usize);
                }
            }
        }

        let mut order = Vec::with_capacity(temps);
        let mut seen = vec![false; temps];
        for op in state.live_blocks().flat_map(|block| block.live_ops()) {
            for reg in op.registers().filter(|&reg| reg >= first_temp) {
                let slot = (reg - first_temp) as usize;
                if !seen[slot] {
                    seen[slot] = true;
                    order.push(slot);
                }
            }
        }

        let mut colour: Vec<Option<u32>> = vec![None; temps];
        let mut colours = 0;
        for &slot in &order {
            let taken: HashSet<u32> = interference[slot]
                .iter()
                .filter_map(|&other| colour[other])
                .collect();
            let chosen = (0..).find(|candidate| !taken.contains(candidate)).unwrap_or(0);
            colour[slot] = Some(chosen);
            colours = colours.max(chosen + 1);
        }

        let mut changes = 0;
        let rename = |reg: Reg| -> Reg {
            if reg < first_temp {
                return reg;
            }
            match colour[(reg - first_temp) as usize] {
                Some(assigned) => first_temp + assigned,
                None => reg,
            }
        };
        for block in state.blocks.iter_mut().filter(|block| !block.dead) {
            for op in block.ops.iter_mut().filter(|op| !op.dead) {
                for input in &mut op.inputs {
                    let renamed = rename(*input);
                    changes += usize::from(renamed != *input);
                    *input = renamed;
                }
                if let Some(dest) = op.dest {
                    let renamed = rename(dest);
                    changes += usize::from(renamed != dest);
                    op.dest = Some(renamed);
                }
            }
        }
        state.num_registers = first_temp + colours;
        Ok(changes)
    }
}

/// Live-out sets of temporaries per live block, or `None` when a temporary can be read
/// before any write, which no correct registerization produces.
fn liveness(state: &CompilerState) -> Option<Vec<(BlockId, LocalSet)>> {
    let first_temp = state.first_temp();
    let temps = (state.num_registers - first_temp) as usize;
    let ids = state.live_block_ids();

    let mut gen = vec![LocalSet::new(temps); state.blocks.len()];
    let mut kill = vec![LocalSet::new(temps); state.blocks.len()];
    for &id in &ids {
        for op in state.blocks[id].live_ops() {
            for &input in op.inputs.iter().filter(|&&input| input >= first_temp) {
                let slot = (input - first_temp) as usize;
                if !kill[id].contains(slot) {
                    gen[id].insert(slot);
                }
            }
            if let Some(dest) = op.dest.filter(|&dest| dest >= first_temp) {
                kill[id].insert((dest - first_temp) as usize);
            }
        }
    }

    let mut live_in = vec![LocalSet::new(temps); state.blocks.len()];
    let mut live_out = vec![LocalSet::new(temps); state.blocks.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for &id in ids.iter().rev() {
            let mut out = LocalSet::new(temps);
            for &exit in &state.blocks[id].exits {
                out.union_with(&live_in[exit]);
            }
            let mut input = out.clone();
            input.subtract(&kill[id]);
            input.union_with(&gen[id]);
            if input != live_in[id] || out != live_out[id] {
                live_in[id] = input;
                live_out[id] = out;
                changed = true;
            }
        }
    }

    if !live_in[state.entry].is_empty() {
        return None;
    }
    Some(ids.into_iter().map(|id| (id, live_out[id].clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::CompilerOp;
    use crate::opcode::RegOpcode;
    use fp_bytecode::CodeBuilder;
    use std::sync::Arc;

    #[test]
    fn disjoint_temporaries_share_a_register() {
        let mut builder = CodeBuilder::new("f").params(&["a"]);
        builder.load_none().ret();
        let mut state = CompilerState::new(Arc::new(builder.build().unwrap()));
        state.new_block(Some(0));
        let a = state.local_reg(0);
        let t0 = state.alloc_register();
        let t1 = state.alloc_register();
        let t2 = state.alloc_register();
        state.blocks[0].ops = vec![
            CompilerOp::new(RegOpcode::UnaryOp, 1, vec![a], Some(t0)),
            CompilerOp::new(RegOpcode::UnaryOp, 1, vec![t0], Some(t1)),
            CompilerOp::new(RegOpcode::BinaryOp, 4, vec![t1, a], Some(t2)),
            CompilerOp::new(RegOpcode::ReturnValue, 0, vec![t2], None),
        ];
        let before = state.num_registers;
        CompactRegistersPass.run(&mut state).unwrap();
        assert_eq!(state.num_registers, state.first_temp() + 1);
        assert!(state.num_registers < before);
        let ops = &state.blocks[0].ops;
        assert_eq!(ops[3].inputs, vec![state.first_temp()]);
    }

    #[test]
    fn overlapping_temporaries_stay_apart() {
        let mut builder = CodeBuilder::new("f").params(&["a"]);
        builder.load_none().ret();
        let mut state = CompilerState::new(Arc::new(builder.build().unwrap()));
        state.new_block(Some(0));
        let a = state.local_reg(0);
        let t0 = state.alloc_register();
        let t1 = state.alloc_register();
        let t2 = state.alloc_register();
        state.blocks[0].ops = vec![
            CompilerOp::new(RegOpcode::UnaryOp, 1, vec![a], Some(t0)),
            CompilerOp::new(RegOpcode::UnaryOp, 1, vec![a], Some(t1)),
            CompilerOp::new(RegOpcode::BinaryOp, 4, vec![t0, t1], Some(t2)),
            CompilerOp::new(RegOpcode::ReturnValue, 0, vec![t2], None),
        ];
        CompactRegistersPass.run(&mut state).unwrap();
        assert_eq!(state.num_registers, state.first_temp() + 2);
        let add = &state.blocks[0].ops[2];
        assert_ne!(add.inputs[0], add.inputs[1]);
    }
}
