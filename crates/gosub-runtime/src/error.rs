use gosub_heap::{HeapError, Tag};

/// Errors raised while manipulating runtime objects.
///
/// `Heap` wraps protocol violations of the memory layer. The remaining
/// variants are dynamic errors of the interpreted program and carry the
/// message the program's user sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Heap(#[from] HeapError),

    #[error("type mismatch: expected {expected}, found {found:?}")]
    TypeMismatch { expected: &'static str, found: Tag },

    #[error("undefined: {0}")]
    Undefined(String),

    #[error("{owner} has no field or method {name}")]
    NoMember { owner: String, name: String },

    #[error("index out of range [{index}] with length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("slice bounds out of range [:{high}] with capacity {cap}")]
    SliceBounds { high: i64, cap: usize },

    #[error("invalid slice indices: {high} < {low}")]
    InvalidSliceIndices { low: i64, high: i64 },

    #[error("makeslice: len out of range")]
    MakeSliceLen,

    #[error("makeslice: cap out of range")]
    MakeSliceCap,

    #[error("makechan: size out of range")]
    MakeChanSize,

    #[error("invalid memory address or nil pointer dereference")]
    NilDereference,

    #[error("sync: unlock of unlocked mutex")]
    UnlockOfUnlocked,

    #[error("sync: negative WaitGroup counter")]
    NegativeWaitGroup,

    #[error("semaphore released without a waiter to wake")]
    SemaphoreAccounting,

    #[error("send on closed channel")]
    SendOnClosed,

    #[error("close of closed channel")]
    CloseOfClosed,

    #[error("close of nil channel")]
    CloseOfNil,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Shorthand for a `TypeMismatch` against the tag found at run time.
pub(crate) fn mismatch<T>(expected: &'static str, found: Tag) -> RuntimeResult<T> {
    Err(RuntimeError::TypeMismatch { expected, found })
}
