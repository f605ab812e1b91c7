use gosub_heap::HeapError;
use gosub_runtime::RuntimeError;

/// Fatal evaluation errors. The run stops at the first one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("all goroutines are asleep - deadlock!")]
    Deadlock,

    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("cannot call non-function ({0})")]
    NotCallable(&'static str),

    #[error("wrong number of arguments: want {expected}, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("integer divide by zero")]
    DivisionByZero,

    #[error("floating-point divide by zero")]
    FloatDivisionByZero,

    #[error("invalid operation: operator {op} not defined on {left} and {right}")]
    InvalidOperation {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("{0} is not in a loop")]
    OutsideLoop(&'static str),

    #[error("return outside function")]
    ReturnOutsideFunction,

    #[error("undefined builtin: {0}")]
    UnknownBuiltin(String),

    #[error("cannot take the address of {0}")]
    NotAddressable(String),

    #[error("function main is undeclared in the main package")]
    NoMain,
}

impl From<HeapError> for VmError {
    fn from(err: HeapError) -> Self {
        VmError::Runtime(err.into())
    }
}

pub type VmResult<T> = Result<T, VmError>;
