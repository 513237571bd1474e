use fp_bytecode::{BytecodeError, Opcode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// The function uses an opcode with no register form; it runs on the stack interpreter.
    #[error("unsupported opcode {opcode} at offset {offset}")]
    Unsupported { opcode: Opcode, offset: usize },
    /// A compiler defect: the build is rejected instead of producing a corrupt artifact.
    #[error("register compiler invariant violated: {message}")]
    Invariant { message: String },
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

impl CompileError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, CompileError::Unsupported { .. })
    }
}

pub fn invariant_error(message: impl Into<String>) -> CompileError {
    CompileError::Invariant {
        message: message.into(),
    }
}

/// Returns early with an invariant error.
#[macro_export]
macro_rules! compile_bail {
    ($($arg:tt)*) => {
        return Err($crate::error::invariant_error(format!($($arg)*)))
    };
}

/// Returns an invariant error unless the condition holds.
#[macro_export]
macro_rules! compile_ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::compile_bail!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checked(depth: usize) -> Result<usize, CompileError> {
        compile_ensure!(depth < 4, "stack depth {} exceeds {}", depth, 4);
        Ok(depth)
    }

    #[test]
    fn ensure_reports_context() {
        assert_eq!(checked(2).unwrap(), 2);
        let err = checked(9).unwrap_err();
        assert_eq!(
            err.to_string(),
            "register compiler invariant violated: stack depth 9 exceeds 4"
        );
        assert!(!err.is_unsupported());
    }
}
