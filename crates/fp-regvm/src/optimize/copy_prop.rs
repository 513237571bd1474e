use std::collections::HashMap;

use crate::error::CompileError;
use crate::ir::{CompilerState, Reg};

use super::{PassName, RegisterPass};

/// Within each block, reads of a copy's destination are redirected to the copy's source.
///
/// A mapping is forgotten as soon as either side is written again, so the rewrite never
/// crosses a redefinition. Dead copies are left for dead-code elimination.
pub struct CopyPropagationPass;

impl RegisterPass for CopyPropagationPass {
    fn name(&self) -> PassName {
        PassName::CopyPropagation
    }

    fn run(&self, state: &mut CompilerState) -> Result<usize, CompileError> {
        let mut changes = 0;
        for block in state.blocks.iter_mut().filter(|block| !block.dead) {
            let mut copies: HashMap<Reg, Reg> = HashMap::new();
            for op in block.ops.iter_mut().filter(|op| !op.dead) {
                for input in &mut op.inputs {
                    if let Some(&source) = copies.get(input) {
                        *input = source;
                        changes += 1;
                    }
                }
                if let Some(dest) = op.dest {
                    copies.retain(|&copy, &mut source| copy != dest && source != dest);
                    if let Some(source) = op.copy_source() {
                        if source != dest {
                            copies.insert(dest, source);
                        }
                    }
                }
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::CompilerOp;
    use crate::opcode::RegOpcode;
    use fp_bytecode::CodeBuilder;
    use std::sync::Arc;

    fn state() -> CompilerState {
        let mut builder = CodeBuilder::new("f").params(&["a", "b"]);
        builder.load_none().ret();
        let mut state = CompilerState::new(Arc::new(builder.build().unwrap()));
        state.new_block(Some(0));
        state
    }

    #[test]
    fn reads_are_redirected_to_the_source() {
        let mut state = state();
        let a = state.local_reg(0);
        let t = state.alloc_register();
        let u = state.alloc_register();
        state.blocks[0].ops = vec![
            CompilerOp::new(RegOpcode::LoadFast, 0, vec![a], Some(t)),
            CompilerOp::new(RegOpcode::BinaryOp, 0, vec![t, t], Some(u)),
            CompilerOp::new(RegOpcode::ReturnValue, 0, vec![u], None),
        ];
        assert_eq!(CopyPropagationPass.run(&mut state).unwrap(), 2);
        assert_eq!(state.blocks[0].ops[1].inputs, vec![a, a]);
    }

    #[test]
    fn overwritten_source_stops_propagation() {
        let mut state = state();
        let a = state.local_reg(0);
        let b = state.local_reg(1);
        let t = state.alloc_register();
        state.blocks[0].ops = vec![
            CompilerOp::new(RegOpcode::LoadFast, 0, vec![a], Some(t)),
            CompilerOp::new(RegOpcode::StoreFast, 0, vec![b], Some(a)),
            CompilerOp::new(RegOpcode::ReturnValue, 0, vec![t], None),
        ];
        assert_eq!(CopyPropagationPass.run(&mut state).unwrap(), 0);
        assert_eq!(state.blocks[0].ops[2].inputs, vec![t]);
    }
}
