mod support;

use eyre::Result;
use fp_regvm::encode::lower;
use fp_regvm::{
    compile, registerize, CompileError, CompilerOptions, CompilerState, OptimizationPlan,
    PassName, RegOpcode, RegisterOptimizer,
};
use pretty_assertions::assert_eq;
use support::programs::{self, Program};

fn optimized(program: &Program, level: u8) -> Result<CompilerState> {
    let mut state = registerize(&program.code)?;
    RegisterOptimizer::new().apply_plan(&mut state, &OptimizationPlan::for_level(level))?;
    Ok(state)
}

fn live_ops(state: &CompilerState) -> Vec<(RegOpcode, u32, Vec<u32>)> {
    state
        .live_blocks()
        .flat_map(|block| block.live_ops())
        .map(|op| (op.opcode, op.arg, op.registers().collect()))
        .collect()
}

fn compilable() -> impl Iterator<Item = Program> {
    programs::corpus()
        .into_iter()
        .filter(|program| program.compiles)
}

#[test]
fn constant_operands_feed_int_add_directly() -> Result<()> {
    let program = programs::constant_sum();
    let compiled = compile(&program.code, &CompilerOptions::default())?;
    let decoded = compiled.instructions()?;
    let shapes: Vec<_> = decoded
        .iter()
        .map(|instr| (instr.opcode, instr.registers.clone()))
        .collect();
    // c0 = 40, c1 = 2, the sum lands in the first temporary
    assert_eq!(
        shapes,
        vec![
            (RegOpcode::IntAdd, vec![0, 1, 2]),
            (RegOpcode::ReturnValue, vec![2]),
        ]
    );
    assert_eq!(compiled.num_registers, 3);
    Ok(())
}

#[test]
fn range_loop_needs_no_reconciliation() -> Result<()> {
    let program = programs::range_sum();
    let state = registerize(&program.code)?;
    assert!(live_ops(&state)
        .iter()
        .all(|(opcode, _, _)| *opcode != RegOpcode::Move));
    let header = state
        .live_blocks()
        .find(|block| block.last_live_op().map(|op| op.opcode) == Some(RegOpcode::ForIter))
        .expect("loop header");
    assert_eq!(header.exits.len(), 2);
    assert_eq!(header.exits[0], header.id + 1);
    assert_eq!(header.entry_stack.len(), 1);
    Ok(())
}

#[test]
fn append_calls_become_list_append() -> Result<()> {
    let state = optimized(&programs::list_building(), 2)?;
    let ops = live_ops(&state);
    let opcodes: Vec<RegOpcode> = ops.iter().map(|(opcode, _, _)| *opcode).collect();
    assert!(opcodes.contains(&RegOpcode::ListAppend), "{opcodes:?}");
    assert!(!opcodes.contains(&RegOpcode::LoadAttr), "{opcodes:?}");
    assert!(opcodes.contains(&RegOpcode::ListSubscr), "{opcodes:?}");
    assert!(opcodes.contains(&RegOpcode::ListContains), "{opcodes:?}");

    let xs = state.local_reg(state.code.varnames.iter().position(|n| n == "xs").unwrap() as u32);
    let append = ops
        .iter()
        .find(|(opcode, _, _)| *opcode == RegOpcode::ListAppend)
        .unwrap();
    assert_eq!(append.2[0], xs);
    Ok(())
}

#[test]
fn dict_subscripts_are_specialized() -> Result<()> {
    let state = optimized(&programs::dict_building(), 2)?;
    let opcodes: Vec<RegOpcode> = live_ops(&state).into_iter().map(|op| op.0).collect();
    assert!(opcodes.contains(&RegOpcode::StoreDictSubscr), "{opcodes:?}");
    assert!(opcodes.contains(&RegOpcode::DictSubscr), "{opcodes:?}");
    assert!(!opcodes.contains(&RegOpcode::StoreSubscr), "{opcodes:?}");
    Ok(())
}

#[test]
fn loop_counters_use_int_fast_paths() -> Result<()> {
    let state = optimized(&programs::while_with_continue(), 2)?;
    let ops = live_ops(&state);
    assert!(ops
        .iter()
        .any(|(opcode, _, _)| *opcode == RegOpcode::IntCompare));
    assert!(ops
        .iter()
        .any(|(opcode, arg, _)| *opcode == RegOpcode::IntAdd
            && *arg == fp_regvm::optimize::INPLACE_FLAG));
    Ok(())
}

#[test]
fn unsupported_opcodes_are_reported_with_their_offset() {
    let program = programs::print_fallback();
    let err = compile(&program.code, &CompilerOptions::default()).unwrap_err();
    assert!(err.is_unsupported());
    assert_eq!(err.to_string(), "unsupported opcode PRINT_ITEM at offset 3");
    assert!(matches!(err, CompileError::Unsupported { offset: 3, .. }));
}

#[test]
fn oversized_variadic_ops_are_rejected() {
    let program = programs::wide_tuple();
    for level in 0..=2 {
        let err = compile(&program.code, &CompilerOptions::with_level(level)).unwrap_err();
        assert!(!err.is_unsupported());
        assert_eq!(
            err.to_string(),
            format!(
                "register compiler invariant violated: BUILD_TUPLE has {} registers, at most 255 fit",
                programs::WIDE_TUPLE_LEN + 1
            ),
            "level {level}"
        );
    }
}

#[test]
fn register_files_beyond_u16_are_rejected() -> Result<()> {
    let program = programs::constant_sum();
    let mut state = registerize(&program.code)?;
    state.mark_entries();
    state.num_registers = u32::from(u16::MAX) + 2;
    let err = lower(&mut state, true).unwrap_err();
    assert!(matches!(err, CompileError::Invariant { .. }));
    assert_eq!(
        err.to_string(),
        "register compiler invariant violated: 65537 registers do not fit the encoding"
    );
    Ok(())
}

#[test]
fn conditional_branches_fall_through_to_the_next_block() -> Result<()> {
    for program in compilable() {
        for level in 0..=2 {
            let state = optimized(&program, level)?;
            for block in state.live_blocks() {
                let Some(last) = block.last_live_op() else {
                    continue;
                };
                if last.opcode.is_conditional() {
                    assert_eq!(
                        state.next_live(block.id),
                        Some(block.exits[0]),
                        "{} level {} block {}",
                        program.name,
                        level,
                        block.id
                    );
                }
            }
        }
    }
    Ok(())
}

#[test]
fn encoding_preserves_the_op_sequence() -> Result<()> {
    for program in compilable() {
        for level in 0..=2 {
            let mut state = optimized(&program, level)?;
            let expected = live_ops(&state);
            let compiled = lower(&mut state, true)?;
            let decoded: Vec<_> = compiled
                .instructions()?
                .into_iter()
                .map(|instr| (instr.opcode, instr.arg, instr.registers))
                .collect();
            assert_eq!(decoded, expected, "{} level {}", program.name, level);
        }
    }
    Ok(())
}

#[test]
fn branch_labels_land_on_block_starts() -> Result<()> {
    for program in compilable() {
        let compiled = compile(&program.code, &CompilerOptions::default())?;
        let decoded = compiled.instructions()?;
        for (index, instr) in decoded.iter().enumerate() {
            let Some(label) = instr.label else {
                continue;
            };
            assert!(
                decoded.iter().any(|other| other.offset == label as usize),
                "{}: label {} of {}",
                program.name,
                label,
                instr.opcode
            );
            if instr.opcode.is_conditional() {
                assert!(index + 1 < decoded.len(), "{} ends in a branch", program.name);
            }
        }
    }
    Ok(())
}

#[test]
fn single_passes_reach_a_fixed_point() -> Result<()> {
    let passes = [
        PassName::FuseBlocks,
        PassName::CopyPropagation,
        PassName::StoreElim,
        PassName::DeadCode,
        PassName::Specialize,
        PassName::CompactRegisters,
        PassName::RenameRegisters,
    ];
    let optimizer = RegisterOptimizer::new();
    for program in compilable() {
        let state = optimized(&program, 2)?;
        for pass in passes {
            let mut rerun = state.clone();
            optimizer.apply_plan(&mut rerun, &OptimizationPlan { passes: vec![pass] })?;
            assert_eq!(
                rerun.op_count(),
                state.op_count(),
                "{} shrank when re-running {}",
                program.name,
                pass.as_str()
            );
        }
    }
    Ok(())
}

#[test]
fn optimization_never_adds_registers() -> Result<()> {
    for program in compilable() {
        let initial = registerize(&program.code)?.num_registers;
        for level in 0..=2 {
            let state = optimized(&program, level)?;
            assert!(
                state.num_registers <= initial,
                "{} level {}: {} > {}",
                program.name,
                level,
                state.num_registers,
                initial
            );
        }
    }

    let program = programs::range_sum();
    let initial = registerize(&program.code)?.num_registers;
    assert!(optimized(&program, 2)?.num_registers < initial);
    Ok(())
}

#[test]
fn custom_plans_report_per_pass_changes() -> Result<()> {
    let program = programs::swap();
    let mut state = registerize(&program.code)?;
    let plan = OptimizationPlan::parse("copy_propagation, dead_code, rename_registers")?;
    let report = RegisterOptimizer::new().apply_plan(&mut state, &plan)?;
    assert!(report.changes_for(PassName::CopyPropagation) > 0);
    assert!(report.changes_for(PassName::DeadCode) > 0);
    assert_eq!(
        report.total_changes,
        report.per_pass.iter().map(|(_, changes)| changes).sum::<usize>()
    );
    Ok(())
}
