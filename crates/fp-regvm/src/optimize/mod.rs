//! Optimization passes over the register IR.
//!
//! Each pass reports how many changes it made. The optimizer sweeps dead ops and refreshes
//! block entry lists after every pass, so passes see a tidy graph.

mod compact;
mod copy_prop;
mod dce;
mod fuse;
mod rename;
mod specialize;
mod store_elim;

use std::collections::HashMap;

use tracing::debug;

use crate::error::{invariant_error, CompileError};
use crate::ir::CompilerState;

pub use compact::CompactRegistersPass;
pub use copy_prop::CopyPropagationPass;
pub use dce::DeadCodePass;
pub use fuse::FuseBlocksPass;
pub use rename::RenameRegistersPass;
pub use specialize::{infer_types, SpecializePass, ValueType, INPLACE_FLAG};
pub use store_elim::StoreElimPass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassName {
    MarkEntries,
    FuseBlocks,
    CopyPropagation,
    StoreElim,
    DeadCode,
    Specialize,
    CompactRegisters,
    RenameRegisters,
}

impl PassName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassName::MarkEntries => "mark_entries",
            PassName::FuseBlocks => "fuse_blocks",
            PassName::CopyPropagation => "copy_propagation",
            PassName::StoreElim => "store_elim",
            PassName::DeadCode => "dead_code",
            PassName::Specialize => "specialize",
            PassName::CompactRegisters => "compact_registers",
            PassName::RenameRegisters => "rename_registers",
        }
    }

    pub fn from_ident(ident: &str) -> Option<Self> {
        match ident.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "mark_entries" => Some(PassName::MarkEntries),
            "fuse_blocks" => Some(PassName::FuseBlocks),
            "copy_propagation" | "copy_prop" => Some(PassName::CopyPropagation),
            "store_elim" => Some(PassName::StoreElim),
            "dead_code" | "dce" => Some(PassName::DeadCode),
            "specialize" => Some(PassName::Specialize),
            "compact_registers" => Some(PassName::CompactRegisters),
            "rename_registers" => Some(PassName::RenameRegisters),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizationPlan {
    pub passes: Vec<PassName>,
}

impl OptimizationPlan {
    pub fn empty() -> Self {
        Self { passes: Vec::new() }
    }

    /// Level 0 only renumbers registers; level 1 cleans up copies; level 2 adds store
    /// elimination, type specialization and register compaction.
    pub fn for_level(level: u8) -> Self {
        use PassName::*;
        let passes = match level {
            0 => vec![RenameRegisters],
            1 => vec![
                MarkEntries,
                FuseBlocks,
                CopyPropagation,
                DeadCode,
                RenameRegisters,
            ],
            _ => vec![
                MarkEntries,
                FuseBlocks,
                CopyPropagation,
                StoreElim,
                DeadCode,
                Specialize,
                DeadCode,
                CompactRegisters,
                RenameRegisters,
            ],
        };
        Self { passes }
    }

    /// Parses a pass list separated by commas, whitespace or `|`.
    pub fn parse(text: &str) -> Result<Self, CompileError> {
        let mut passes = Vec::new();
        for token in text.split(|ch: char| ch == ',' || ch.is_whitespace() || ch == '|') {
            let ident = token.trim().trim_matches('"').trim_matches('`');
            if ident.is_empty() {
                continue;
            }
            let pass = PassName::from_ident(ident).ok_or_else(|| {
                invariant_error(format!("unknown register optimization pass: {ident}"))
            })?;
            passes.push(pass);
        }
        Ok(Self { passes })
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl Default for OptimizationPlan {
    fn default() -> Self {
        Self::for_level(2)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OptimizationReport {
    pub total_changes: usize,
    pub per_pass: Vec<(PassName, usize)>,
}

impl OptimizationReport {
    pub fn changes_for(&self, name: PassName) -> usize {
        self.per_pass
            .iter()
            .filter(|(pass, _)| *pass == name)
            .map(|(_, changes)| changes)
            .sum()
    }
}

pub trait RegisterPass: Send + Sync {
    fn name(&self) -> PassName;
    fn run(&self, state: &mut CompilerState) -> Result<usize, CompileError>;
}

struct MarkEntriesPass;

impl RegisterPass for MarkEntriesPass {
    fn name(&self) -> PassName {
        PassName::MarkEntries
    }

    fn run(&self, state: &mut CompilerState) -> Result<usize, CompileError> {
        Ok(state.mark_entries())
    }
}

pub struct RegisterOptimizer {
    registry: HashMap<PassName, Box<dyn RegisterPass>>,
}

impl RegisterOptimizer {
    pub fn new() -> Self {
        let mut optimizer = Self {
            registry: HashMap::new(),
        };
        optimizer.register(Box::new(MarkEntriesPass));
        optimizer.register(Box::new(FuseBlocksPass));
        optimizer.register(Box::new(CopyPropagationPass));
        optimizer.register(Box::new(StoreElimPass));
        optimizer.register(Box::new(DeadCodePass));
        optimizer.register(Box::new(SpecializePass));
        optimizer.register(Box::new(CompactRegistersPass));
        optimizer.register(Box::new(RenameRegistersPass));
        optimizer
    }

    pub fn register(&mut self, pass: Box<dyn RegisterPass>) {
        self.registry.insert(pass.name(), pass);
    }

    pub fn apply_plan(
        &self,
        state: &mut CompilerState,
        plan: &OptimizationPlan,
    ) -> Result<OptimizationReport, CompileError> {
        let mut report = OptimizationReport::default();
        state.mark_entries();

        for pass_name in &plan.passes {
            let pass = self.registry.get(pass_name).ok_or_else(|| {
                invariant_error(format!(
                    "unknown register optimization pass: {}",
                    pass_name.as_str()
                ))
            })?;
            let changes = pass.run(state)?;
            state.sweep();
            state.mark_entries();
            debug!(
                function = %state.code.name,
                pass = pass_name.as_str(),
                changes,
                ops = state.op_count(),
                "register pass"
            );
            report.total_changes += changes;
            report.per_pass.push((*pass_name, changes));
        }

        state.check_exits()?;
        Ok(report)
    }
}

impl Default for RegisterOptimizer {
    fn default() -> Self {
        Self::new()
    }
}
