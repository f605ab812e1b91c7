//! Typed views over heap addresses.
//!
//! Each submodule owns one record shape: its slot layout, constructors and
//! accessors. `auto_cast` recovers the shape of an arbitrary address from its
//! tag alone.

use gosub_heap::{Address, Heap, Tag};

use crate::error::RuntimeResult;

pub mod array;
pub mod channel;
pub mod function;
pub mod list;
pub mod primitive;
pub mod slice;
pub mod string;
pub mod structs;
pub mod sync;
pub mod types;
pub mod variable;

mod format;

pub use format::{display, format_float};

/// What an address holds. Scalars are decoded; everything else stays an
/// address to be used with its shape module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Object {
    Nil,
    Bool(bool),
    Int32(i32),
    Float32(f32),
    Rune(char),
    String(Address),
    Array(Address),
    Slice(Address),
    Struct(Address),
    Channel(Address),
    Function(Address),
    BoundMethod(Address),
    Builtin(Address),
    Pointer(Address),
    Mutex(Address),
    Semaphore(Address),
    WaitGroup(Address),
    Variable(Address),
    List(Tag, Address),
    Environment(Tag, Address),
    Context(Tag, Address),
    Type(Tag, Address),
    Control(Tag, Address),
}

pub fn auto_cast(heap: &Heap, addr: Address) -> RuntimeResult<Object> {
    let tag = heap.tag(addr)?;
    Ok(match tag {
        Tag::Nil => Object::Nil,
        Tag::Bool => Object::Bool(primitive::to_bool(heap, addr)?),
        Tag::Int32 => Object::Int32(primitive::to_int32(heap, addr)?),
        Tag::Float32 => Object::Float32(primitive::to_float32(heap, addr)?),
        Tag::Rune => Object::Rune(primitive::to_rune(heap, addr)?),
        Tag::String => Object::String(addr),
        Tag::Array => Object::Array(addr),
        Tag::Slice => Object::Slice(addr),
        Tag::Struct => Object::Struct(addr),
        Tag::Channel => Object::Channel(addr),
        Tag::Function => Object::Function(addr),
        Tag::BoundMethod => Object::BoundMethod(addr),
        Tag::Builtin => Object::Builtin(addr),
        Tag::Pointer => Object::Pointer(addr),
        Tag::Mutex => Object::Mutex(addr),
        Tag::Semaphore => Object::Semaphore(addr),
        Tag::WaitGroup => Object::WaitGroup(addr),
        Tag::Variable => Object::Variable(addr),
        Tag::LinkedList | Tag::Queue => Object::List(tag, addr),
        Tag::Frame | Tag::Entry => Object::Environment(tag, addr),
        Tag::Control
        | Tag::Stash
        | Tag::Env
        | Tag::Thread
        | Tag::Scheduler
        | Tag::Waker
        | Tag::WaitingInstance => Object::Context(tag, addr),
        Tag::TypeNil
        | Tag::TypeBool
        | Tag::TypeInt32
        | Tag::TypeFloat32
        | Tag::TypeRune
        | Tag::TypeString
        | Tag::TypeArray
        | Tag::TypeSlice
        | Tag::TypeChannel
        | Tag::TypeFunction
        | Tag::TypeStruct
        | Tag::TypeStructDecl
        | Tag::TypePointer
        | Tag::TypeMutex
        | Tag::TypeWaitGroup
        | Tag::TypeBuiltin => Object::Type(tag, addr),
        Tag::Literal
        | Tag::Name
        | Tag::NameAddress
        | Tag::Var
        | Tag::VarI
        | Tag::Assign
        | Tag::AssignI
        | Tag::Unary
        | Tag::UnaryI
        | Tag::Binary
        | Tag::BinaryI
        | Tag::LogicalI
        | Tag::Postfix
        | Tag::PostfixI
        | Tag::Sequence
        | Tag::Block
        | Tag::ExitScopeI
        | Tag::If
        | Tag::IfI
        | Tag::For
        | Tag::ForI
        | Tag::MarkerI
        | Tag::Break
        | Tag::Continue
        | Tag::FunctionLit
        | Tag::Call
        | Tag::CallI
        | Tag::ExprStmt
        | Tag::PopI
        | Tag::Return
        | Tag::ReturnI
        | Tag::RestoreEnvI
        | Tag::GoCall
        | Tag::GoCallI
        | Tag::Member
        | Tag::MemberI
        | Tag::MemberAddress
        | Tag::MemberAddressI
        | Tag::MethodMember
        | Tag::MethodMemberI
        | Tag::Index
        | Tag::IndexI
        | Tag::IndexAddress
        | Tag::IndexAddressI
        | Tag::SliceExpr
        | Tag::SliceExprI
        | Tag::Make
        | Tag::MakeI
        | Tag::Zero
        | Tag::Constructor
        | Tag::ConstructorI
        | Tag::StructLiteral
        | Tag::StructLiteralI
        | Tag::AddressOf
        | Tag::AddressOfI
        | Tag::Deref
        | Tag::DerefI
        | Tag::DerefAddress
        | Tag::DerefAddressI
        | Tag::ChanSend
        | Tag::ChanSendI
        | Tag::ChanReceive
        | Tag::ChanReceiveI
        | Tag::Select
        | Tag::SelectI
        | Tag::CaseSend
        | Tag::CaseReceive
        | Tag::CaseDefault => Object::Control(tag, addr),
    })
}

impl Object {
    /// Short Go-flavoured name of the value's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Object::Nil => "nil",
            Object::Bool(_) => "bool",
            Object::Int32(_) => "int32",
            Object::Float32(_) => "float32",
            Object::Rune(_) => "rune",
            Object::String(_) => "string",
            Object::Array(_) => "array",
            Object::Slice(_) => "slice",
            Object::Struct(_) => "struct",
            Object::Channel(_) => "chan",
            Object::Function(_) | Object::BoundMethod(_) | Object::Builtin(_) => "func",
            Object::Pointer(_) => "pointer",
            Object::Mutex(_) => "mutex",
            Object::Semaphore(_) => "semaphore",
            Object::WaitGroup(_) => "waitgroup",
            Object::Variable(_) => "variable",
            Object::List(..) => "list",
            Object::Environment(..) => "environment",
            Object::Context(..) => "context",
            Object::Type(..) => "type",
            Object::Control(..) => "control",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_cast_follows_the_tag() {
        let mut heap = Heap::new(1 << 12).unwrap();
        let n = primitive::new_int32(&mut heap, 3).unwrap();
        let s = string::create(&mut heap, "x").unwrap();
        let q = list::queue::create(&mut heap).unwrap();
        let ty = types::simple(&mut heap, Tag::TypeString).unwrap();
        assert_eq!(auto_cast(&heap, Address::NIL).unwrap(), Object::Nil);
        assert_eq!(auto_cast(&heap, n).unwrap(), Object::Int32(3));
        assert_eq!(auto_cast(&heap, s).unwrap(), Object::String(s));
        assert_eq!(auto_cast(&heap, q).unwrap(), Object::List(Tag::Queue, q));
        assert_eq!(auto_cast(&heap, ty).unwrap(), Object::Type(Tag::TypeString, ty));
        assert_eq!(auto_cast(&heap, n).unwrap().kind(), "int32");
        for obj in [n, s, q, ty] {
            heap.free(obj).unwrap();
        }
        assert!(auto_cast(&heap, n).is_err());
    }
}
