use std::fmt;

use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

/// Built-in exception classes visible to bytecode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr,
)]
pub enum ExceptionKind {
    Exception,
    TypeError,
    ValueError,
    KeyError,
    IndexError,
    NameError,
    UnboundLocalError,
    AttributeError,
    ZeroDivisionError,
    RuntimeError,
    AssertionError,
    StopIteration,
    OverflowError,
}

impl ExceptionKind {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// `except` matching: every kind is a subclass of `Exception`, and `UnboundLocalError`
    /// is a `NameError`.
    pub fn is_subclass_of(self, base: ExceptionKind) -> bool {
        self == base
            || base == ExceptionKind::Exception
            || (self == ExceptionKind::UnboundLocalError && base == ExceptionKind::NameError)
    }
}

/// A raised exception value.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub message: String,
}

impl Exception {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// An exception raised by the executing code or by the object model.
    #[error("{0}")]
    Exception(Exception),
    #[error("instruction limit of {limit} exceeded")]
    InstructionLimit { limit: u64 },
    #[error("unsupported bytecode: {message}")]
    Unsupported { message: String },
    #[error("vm error: {message}")]
    Runtime { message: String },
}

impl VmError {
    pub fn exception(kind: ExceptionKind, message: impl Into<String>) -> Self {
        VmError::Exception(Exception::new(kind, message))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::exception(ExceptionKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::exception(ExceptionKind::ValueError, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        VmError::Runtime {
            message: message.into(),
        }
    }

    pub fn exception_kind(&self) -> Option<ExceptionKind> {
        match self {
            VmError::Exception(exception) => Some(exception.kind),
            _ => None,
        }
    }
}

/// Raises an exception of the given kind with a formatted message.
#[macro_export]
macro_rules! raise {
    ($kind:ident, $($arg:tt)*) => {
        return Err($crate::VmError::exception(
            $crate::ExceptionKind::$kind,
            format!($($arg)*),
        ))
    };
}
