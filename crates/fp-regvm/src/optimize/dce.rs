use crate::error::CompileError;
use crate::ir::CompilerState;

use super::{PassName, RegisterPass};

/// Removes pure ops whose destination is never read, until no more become unused.
pub struct DeadCodePass;

impl RegisterPass for DeadCodePass {
    fn name(&self) -> PassName {
        PassName::DeadCode
    }

    fn run(&self, state: &mut CompilerState) -> Result<usize, CompileError> {
        let mut uses = state.use_counts();
        let mut changes = 0;
        loop {
            let mut removed = 0;
            for block in state.blocks.iter_mut().filter(|block| !block.dead) {
                for op in block.ops.iter_mut().rev().filter(|op| !op.dead) {
                    let Some(dest) = op.dest else {
                        continue;
                    };
                    if !op.opcode.is_pure() || uses[dest as usize] != 0 {
                        continue;
                    }
                    op.dead = true;
                    for &input in &op.inputs {
                        uses[input as usize] -= 1;
                    }
                    removed += 1;
                }
            }
            if removed == 0 {
                break;
            }
            changes += removed;
        }
        Ok(changes)
    }
}
