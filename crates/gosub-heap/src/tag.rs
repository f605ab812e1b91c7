//! Record tags.
//!
//! Every heap record starts with one of these. The numbering is grouped by
//! category so a raw header can be classified without decoding it fully.

use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive)]
#[repr(u16)]
pub enum Tag {
    // Primitives
    Nil = 0,
    Bool = 1,
    Int32 = 2,
    Float32 = 3,
    Rune = 4,

    // Composite values
    String = 16,
    Array = 17,
    LinkedList = 18,
    Queue = 19,
    Function = 20,
    BoundMethod = 21,
    Builtin = 22,
    Pointer = 23,
    Mutex = 24,
    Semaphore = 25,
    WaitGroup = 26,

    // Environment
    Frame = 48,
    Entry = 49,

    // Context
    Control = 56,
    Stash = 57,
    Env = 58,
    Thread = 59,
    Scheduler = 60,
    Waker = 61,
    WaitingInstance = 62,

    // User-level values
    Variable = 72,
    Struct = 73,
    Channel = 74,
    Slice = 75,

    // Type descriptors
    TypeNil = 88,
    TypeBool = 89,
    TypeInt32 = 90,
    TypeFloat32 = 91,
    TypeRune = 92,
    TypeString = 93,
    TypeArray = 94,
    TypeSlice = 95,
    TypeChannel = 96,
    TypeFunction = 97,
    TypeStruct = 98,
    TypeStructDecl = 99,
    TypePointer = 100,
    TypeMutex = 101,
    TypeWaitGroup = 102,
    TypeBuiltin = 103,

    // Control nodes
    Literal = 128,
    Name = 129,
    NameAddress = 130,
    Var = 131,
    VarI = 132,
    Assign = 133,
    AssignI = 134,
    Unary = 135,
    UnaryI = 136,
    Binary = 137,
    BinaryI = 138,
    LogicalI = 139,
    Postfix = 140,
    PostfixI = 141,
    Sequence = 142,
    Block = 143,
    ExitScopeI = 144,
    If = 145,
    IfI = 146,
    For = 147,
    ForI = 148,
    MarkerI = 149,
    Break = 150,
    Continue = 151,
    FunctionLit = 152,
    Call = 153,
    CallI = 154,
    ExprStmt = 155,
    PopI = 156,
    Return = 158,
    ReturnI = 159,
    RestoreEnvI = 160,
    GoCall = 161,
    GoCallI = 162,
    Member = 163,
    MemberI = 164,
    MemberAddress = 165,
    MemberAddressI = 166,
    MethodMember = 167,
    MethodMemberI = 168,
    Index = 169,
    IndexI = 170,
    IndexAddress = 171,
    IndexAddressI = 172,
    SliceExpr = 173,
    SliceExprI = 174,
    Make = 175,
    MakeI = 176,
    Zero = 177,
    Constructor = 178,
    ConstructorI = 179,
    StructLiteral = 180,
    StructLiteralI = 181,
    AddressOf = 182,
    AddressOfI = 183,
    Deref = 184,
    DerefI = 185,
    DerefAddress = 186,
    DerefAddressI = 187,
    ChanSend = 188,
    ChanSendI = 189,
    ChanReceive = 190,
    ChanReceiveI = 191,
    Select = 192,
    SelectI = 193,
    CaseSend = 194,
    CaseReceive = 195,
    CaseDefault = 196,
}

/// Size of a dispatch table indexed by tag discriminant.
pub const TAG_TABLE_SIZE: usize = Tag::CaseDefault as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagCategory {
    Primitive,
    Complex,
    Environment,
    Context,
    User,
    Type,
    Control,
}

impl Tag {
    #[inline]
    pub fn from_raw(raw: u16) -> Option<Self> {
        Self::try_from(raw).ok()
    }

    pub fn category(self) -> TagCategory {
        match self as u16 {
            0..=15 => TagCategory::Primitive,
            16..=47 => TagCategory::Complex,
            48..=55 => TagCategory::Environment,
            56..=71 => TagCategory::Context,
            72..=87 => TagCategory::User,
            88..=127 => TagCategory::Type,
            _ => TagCategory::Control,
        }
    }

    #[inline]
    pub fn is_control(self) -> bool {
        self.category() == TagCategory::Control
    }

    #[inline]
    pub fn is_type(self) -> bool {
        self.category() == TagCategory::Type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_round_trip() {
        assert_eq!(Tag::from_raw(Tag::Channel as u16), Some(Tag::Channel));
        assert_eq!(Tag::from_raw(5), None);
        assert_eq!(Tag::from_raw(Tag::CaseDefault as u16 + 1), None);
    }

    #[test]
    fn test_categories() {
        assert_eq!(Tag::Nil.category(), TagCategory::Primitive);
        assert_eq!(Tag::WaitGroup.category(), TagCategory::Complex);
        assert_eq!(Tag::Entry.category(), TagCategory::Environment);
        assert_eq!(Tag::WaitingInstance.category(), TagCategory::Context);
        assert_eq!(Tag::Slice.category(), TagCategory::User);
        assert!(Tag::TypeBuiltin.is_type());
        assert!(Tag::Literal.is_control());
        assert!(Tag::CaseDefault.is_control());
        assert!(!Tag::Thread.is_control());
    }
}
