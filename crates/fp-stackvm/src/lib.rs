pub mod builtins;
pub mod error;
pub mod frame;
pub mod methods;
pub mod object;
pub mod value;
pub mod vm;

use std::cell::Cell;
use std::rc::Rc;

pub use builtins::{lookup_builtin, Builtin};
pub use error::{Exception, ExceptionKind, VmError};
pub use frame::{bind_arguments, gather_call_args, module_frame, seed_constants, Frame};
pub use methods::Method;
pub use object::{BinaryOp, UnaryOp};
pub use value::{Dict, Function, Globals, Range, Set, Value};
pub use vm::{execute, StackVm, StackVmOptions};

/// Nested call depth after which `RuntimeError` is raised.
pub const DEFAULT_MAX_DEPTH: usize = 200;

/// The seam between the object model and an execution engine.
///
/// Calling a `Function` value goes back through the runner, so each engine decides how the
/// callee is executed.
pub trait FunctionRunner {
    fn call_function(
        &self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, VmError>;

    fn limits(&self) -> &ExecLimits;

    /// Receives `PRINT_ITEM`/`PRINT_NEWLINE` output.
    fn write_output(&self, text: &str);
}

/// Instruction ceiling and call depth shared by every frame of one top-level invocation.
#[derive(Debug)]
pub struct ExecLimits {
    instruction_limit: Option<u64>,
    max_depth: usize,
    executed: Cell<u64>,
    depth: Cell<usize>,
}

impl ExecLimits {
    pub fn new(instruction_limit: Option<u64>, max_depth: usize) -> Self {
        Self {
            instruction_limit,
            max_depth,
            executed: Cell::new(0),
            depth: Cell::new(0),
        }
    }

    /// Charges one executed instruction.
    #[inline]
    pub fn step(&self) -> Result<(), VmError> {
        let executed = self.executed.get() + 1;
        self.executed.set(executed);
        match self.instruction_limit {
            Some(limit) if executed > limit => Err(VmError::InstructionLimit { limit }),
            _ => Ok(()),
        }
    }

    pub fn executed(&self) -> u64 {
        self.executed.get()
    }

    pub fn enter(&self) -> Result<DepthGuard<'_>, VmError> {
        let depth = self.depth.get() + 1;
        if depth > self.max_depth {
            raise!(RuntimeError, "maximum recursion depth exceeded");
        }
        self.depth.set(depth);
        Ok(DepthGuard { limits: self })
    }
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self::new(None, DEFAULT_MAX_DEPTH)
    }
}

pub struct DepthGuard<'a> {
    limits: &'a ExecLimits,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.limits.depth.set(self.limits.depth.get() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_fails_past_the_ceiling() {
        let limits = ExecLimits::new(Some(2), DEFAULT_MAX_DEPTH);
        assert!(limits.step().is_ok());
        assert!(limits.step().is_ok());
        assert_eq!(limits.step(), Err(VmError::InstructionLimit { limit: 2 }));
    }

    #[test]
    fn depth_guard_unwinds() {
        let limits = ExecLimits::new(None, 1);
        {
            let _outer = limits.enter().unwrap();
            let err = limits.enter().err().unwrap();
            assert_eq!(err.exception_kind(), Some(ExceptionKind::RuntimeError));
        }
        assert!(limits.enter().is_ok());
    }
}
