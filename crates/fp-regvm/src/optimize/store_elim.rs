use crate::error::CompileError;
use crate::ir::CompilerState;
use crate::opcode::RegOpcode;

use super::{PassName, RegisterPass};

/// Writes a temporary's value straight into the register it is copied to.
///
/// `t = op(...); x = MOVE t` becomes `x = op(...)` when the copy is the only read of `t` and
/// nothing between the two touches `x`.
pub struct StoreElimPass;

impl RegisterPass for StoreElimPass {
    fn name(&self) -> PassName {
        PassName::StoreElim
    }

    fn run(&self, state: &mut CompilerState) -> Result<usize, CompileError> {
        let uses = state.use_counts();
        let first_temp = state.first_temp();
        let mut changes = 0;

        for block in state.blocks.iter_mut().filter(|block| !block.dead) {
            let ops = &mut block.ops;
            for index in 0..ops.len() {
                let op = &ops[index];
                if op.dead || !matches!(op.opcode, RegOpcode::Move | RegOpcode::StoreFast) {
                    continue;
                }
                let (Some(source), Some(target)) = (op.copy_source(), op.dest) else {
                    continue;
                };
                if source < first_temp || source == target || uses[source as usize] != 1 {
                    continue;
                }
                let Some(def) = (0..index)
                    .rev()
                    .find(|&prior| !ops[prior].dead && ops[prior].dest == Some(source))
                else {
                    continue;
                };
                if ops[def].opcode.is_conditional() {
                    continue;
                }
                let touched = ops[def + 1..index]
                    .iter()
                    .filter(|op| !op.dead)
                    .any(|op| op.registers().any(|reg| reg == target || reg == source));
                if touched {
                    continue;
                }
                ops[def].dest = Some(target);
                ops[index].dead = true;
                changes += 1;
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::CompilerOp;
    use fp_bytecode::CodeBuilder;
    use std::sync::Arc;

    #[test]
    fn result_is_written_into_the_local() {
        let mut builder = CodeBuilder::new("f").params(&["a", "x"]);
        builder.load_none().ret();
        let mut state = CompilerState::new(Arc::new(builder.build().unwrap()));
        state.new_block(Some(0));
        let a = state.local_reg(0);
        let x = state.local_reg(1);
        let t = state.alloc_register();
        state.blocks[0].ops = vec![
            CompilerOp::new(RegOpcode::BinaryOp, 0, vec![a, a], Some(t)),
            CompilerOp::new(RegOpcode::StoreFast, 1, vec![t], Some(x)),
            CompilerOp::new(RegOpcode::ReturnValue, 0, vec![x], None),
        ];
        assert_eq!(StoreElimPass.run(&mut state).unwrap(), 1);
        assert_eq!(state.blocks[0].ops[0].dest, Some(x));
        assert!(state.blocks[0].ops[1].dead);
    }

    #[test]
    fn intervening_read_of_the_target_blocks_the_rewrite() {
        let mut builder = CodeBuilder::new("f").params(&["a", "x"]);
        builder.load_none().ret();
        let mut state = CompilerState::new(Arc::new(builder.build().unwrap()));
        state.new_block(Some(0));
        let a = state.local_reg(0);
        let x = state.local_reg(1);
        let t = state.alloc_register();
        let u = state.alloc_register();
        state.blocks[0].ops = vec![
            CompilerOp::new(RegOpcode::BinaryOp, 0, vec![a, a], Some(t)),
            CompilerOp::new(RegOpcode::UnaryOp, 1, vec![x], Some(u)),
            CompilerOp::new(RegOpcode::StoreFast, 1, vec![t], Some(x)),
            CompilerOp::new(RegOpcode::ReturnValue, 0, vec![u], None),
        ];
        assert_eq!(StoreElimPass.run(&mut state).unwrap(), 0);
    }
}
