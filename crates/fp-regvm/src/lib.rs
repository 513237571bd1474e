//! Stack-to-register bytecode compiler and threaded register interpreter.
//!
//! `compile` registerizes a code object into a basic-block IR, runs the configured
//! optimization plan and lowers the result into a compact byte stream. `Engine` caches
//! compilations per code object and runs them, falling back to the stack interpreter for
//! functions the compiler rejects.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod encode;
pub mod engine;
pub mod error;
pub mod interp;
pub mod ir;
pub mod opcode;
pub mod optimize;
pub mod registerize;
pub mod stack;

use std::sync::Arc;

use fp_bytecode::CodeObject;
use tracing::debug;

pub use cache::{CacheLookup, CodeCache};
pub use config::{CompilerOptions, EngineOptions};
pub use encode::{decode_all, format_register_code, CompileStats, DecodedInstr, RegisterCode};
pub use engine::{Engine, Session};
pub use error::CompileError;
pub use interp::execute;
pub use ir::{format_ir, BasicBlock, CompilerOp, CompilerState};
pub use opcode::RegOpcode;
pub use optimize::{OptimizationPlan, OptimizationReport, PassName, RegisterOptimizer};
pub use registerize::registerize;
pub use stack::RegisterStack;

/// Compiles one code object. Nested code objects in its constants are compiled lazily when
/// the functions they define are first called.
pub fn compile(
    code: &Arc<CodeObject>,
    options: &CompilerOptions,
) -> Result<RegisterCode, CompileError> {
    let mut state = registerize(code)?;
    let initial_registers = state.num_registers;
    let report = RegisterOptimizer::new().apply_plan(&mut state, &options.plan)?;
    let mut compiled = encode::lower(&mut state, options.verify_layout)?;
    compiled.stats.source_instructions = fp_bytecode::instructions(&code.code).count();
    compiled.stats.optimizer_changes = report.total_changes;
    debug!(
        function = %code.name,
        blocks = compiled.stats.blocks,
        ops = compiled.stats.ops,
        registers = compiled.num_registers,
        initial_registers,
        changes = report.total_changes,
        "compiled to register code"
    );
    Ok(compiled)
}
