use fp_stackvm::DEFAULT_MAX_DEPTH;

use crate::optimize::OptimizationPlan;

/// Configuration for one compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Passes run between registerization and lowering
    pub plan: OptimizationPlan,
    /// Re-check branch fallthrough adjacency while lowering
    pub verify_layout: bool,
}

impl CompilerOptions {
    pub fn with_level(level: u8) -> Self {
        Self {
            plan: OptimizationPlan::for_level(level),
            ..Self::default()
        }
    }
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            plan: OptimizationPlan::default(),
            verify_layout: true,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub compiler: CompilerOptions,
    /// Total instructions one top-level invocation may execute, across both interpreters
    pub instruction_limit: Option<u64>,
    /// Nested call depth after which `RuntimeError` is raised
    pub max_depth: usize,
    /// When disabled every function runs on the stack interpreter
    pub enable_register_vm: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            compiler: CompilerOptions::default(),
            instruction_limit: None,
            max_depth: DEFAULT_MAX_DEPTH,
            enable_register_vm: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::PassName;

    #[test]
    fn defaults_run_the_full_pipeline() {
        let options = EngineOptions::default();
        assert!(options.enable_register_vm);
        assert!(options.compiler.verify_layout);
        assert_eq!(options.compiler.plan, OptimizationPlan::for_level(2));
        assert_eq!(
            CompilerOptions::with_level(0).plan.passes,
            vec![PassName::RenameRegisters]
        );
    }
}
