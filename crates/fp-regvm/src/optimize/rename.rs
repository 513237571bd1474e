use std::collections::HashMap;

use crate::error::CompileError;
use crate::ir::{CompilerState, Reg};

use super::{PassName, RegisterPass};

/// Renumbers temporaries densely in order of first appearance and shrinks the register file.
pub struct RenameRegistersPass;

impl RegisterPass for RenameRegistersPass {
    fn name(&self) -> PassName {
        PassName::RenameRegisters
    }

    fn run(&self, state: &mut CompilerState) -> Result<usize, CompileError> {
        let first_temp = state.first_temp();
        let mut mapping: HashMap<Reg, Reg> = HashMap::new();
        let mut changes = 0;

        for block in state.blocks.iter_mut().filter(|block| !block.dead) {
            for op in block.ops.iter_mut().filter(|op| !op.dead) {
                let slots = op.inputs.iter_mut().chain(op.dest.as_mut());
                for reg in slots.filter(|reg| **reg >= first_temp) {
                    let next = first_temp + mapping.len() as Reg;
                    let renamed = *mapping.entry(*reg).or_insert(next);
                    if renamed != *reg {
                        *reg = renamed;
                        changes += 1;
                    }
                }
            }
        }

        state.num_registers = first_temp + mapping.len() as Reg;
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

    #[test]
    fn gaps_are_closed() {
        let mut builder = CodeBuilder::new("f");
        builder.load_none().ret();
        let mut state = CompilerState::new(Arc::new(builder.build().unwrap()));
        state.new_block(Some(0));
        let unused = state.alloc_register();
        let t = state.alloc_register();
        assert_ne!(unused, t);
        state.blocks[0].ops = vec![
            CompilerOp::new(RegOpcode::LoadConst, 0, vec![0], Some(t)),
            CompilerOp::new(RegOpcode::ReturnValue, 0, vec![t], None),
        ];
        assert_eq!(RenameRegistersPass.run(&mut state).unwrap(), 2);
        assert_eq!(state.num_registers, state.first_temp() + 1);
        assert_eq!(state.blocks[0].ops[1].inputs, vec![state.first_temp()]);
        assert_eq!(RenameRegistersPass.run(&mut state).unwrap(), 0);
    }
}
