//! Callable values and pointers.

use gosub_heap::{Address, Heap, Tag};

use crate::error::{mismatch, RuntimeError, RuntimeResult};
use crate::objects::string;

// =============================================================================
// Closure
// =============================================================================

/// Layout: child 0 = function literal node, child 1 = captured frame.
///
/// The whole defining frame is captured, so a closure sees later writes to
/// the variables it closes over.
pub mod closure {
    use super::*;

    pub const LITERAL: usize = 0;
    pub const FRAME: usize = 1;

    pub fn create(heap: &mut Heap, literal: Address, frame: Address) -> RuntimeResult<Address> {
        let f = heap.allocate_object(Tag::Function, 0, 2)?;
        heap.set_child(f, Tag::Function, LITERAL, literal)?;
        heap.set_child(f, Tag::Function, FRAME, frame)?;
        Ok(f)
    }

    #[inline]
    pub fn literal(heap: &Heap, f: Address) -> RuntimeResult<Address> {
        Ok(heap.child(f, Tag::Function, LITERAL)?)
    }

    #[inline]
    pub fn frame(heap: &Heap, f: Address) -> RuntimeResult<Address> {
        Ok(heap.child(f, Tag::Function, FRAME)?)
    }
}

// =============================================================================
// Bound method
// =============================================================================

/// Layout: child 0 = callee (closure or builtin), child 1 = receiver.
pub mod bound_method {
    use super::*;

    pub const CALLEE: usize = 0;
    pub const RECEIVER: usize = 1;

    pub fn create(heap: &mut Heap, callee: Address, receiver: Address) -> RuntimeResult<Address> {
        let m = heap.allocate_object(Tag::BoundMethod, 0, 2)?;
        heap.set_child(m, Tag::BoundMethod, CALLEE, callee)?;
        heap.set_child(m, Tag::BoundMethod, RECEIVER, receiver)?;
        Ok(m)
    }

    #[inline]
    pub fn callee(heap: &Heap, m: Address) -> RuntimeResult<Address> {
        Ok(heap.child(m, Tag::BoundMethod, CALLEE)?)
    }

    #[inline]
    pub fn receiver(heap: &Heap, m: Address) -> RuntimeResult<Address> {
        Ok(heap.child(m, Tag::BoundMethod, RECEIVER)?)
    }
}

// =============================================================================
// Builtin
// =============================================================================

/// Layout: child 0 = qualified name, e.g. `fmt.Println` or
/// `sync.Mutex.Lock`.
pub mod builtin {
    use super::*;

    pub const NAME: usize = 0;

    pub fn create(heap: &mut Heap, name: &str) -> RuntimeResult<Address> {
        let key = string::create(heap, name)?;
        let b = match heap.allocate_object(Tag::Builtin, 0, 1) {
            Ok(b) => b,
            Err(err) => {
                heap.free(key)?;
                return Err(err.into());
            }
        };
        heap.set_child_owned(b, Tag::Builtin, NAME, key)?;
        Ok(b)
    }

    pub fn name(heap: &Heap, b: Address) -> RuntimeResult<String> {
        match heap.tag(b)? {
            Tag::Builtin => string::to_string(heap, heap.child(b, Tag::Builtin, NAME)?),
            other => mismatch("builtin", other),
        }
    }
}

// =============================================================================
// Pointer
// =============================================================================

/// Layout: child 0 = target variable.
pub mod pointer {
    use super::*;

    pub const TARGET: usize = 0;

    pub fn create(heap: &mut Heap, target: Address) -> RuntimeResult<Address> {
        let p = heap.allocate_object(Tag::Pointer, 0, 1)?;
        heap.set_child(p, Tag::Pointer, TARGET, target)?;
        Ok(p)
    }

    /// Target variable, borrowed. Dereferencing nil is an error.
    pub fn target(heap: &Heap, p: Address) -> RuntimeResult<Address> {
        match heap.tag(p)? {
            Tag::Pointer => Ok(heap.child(p, Tag::Pointer, TARGET)?),
            Tag::Nil => Err(RuntimeError::NilDereference),
            other => mismatch("pointer", other),
        }
    }
}
