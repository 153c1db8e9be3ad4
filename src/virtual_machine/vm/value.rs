/// Index of an interned string in the heap's string arena.
///
/// Handles are only created by [`Heap`](super::heap::Heap), so they are only
/// meaningful inside the state that produced them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct StrHandle(pub(super) u32);

/// Runtime value stored on the evaluation stack and in scope slots.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Value {
    /// 64-bit signed integer. Heap handles travel as packed integers too.
    Int(i64),
    /// Interned string.
    Str(StrHandle),
}

impl Value {
    /// Returns the type name for error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Str(_) => "Str",
        }
    }

    pub const fn from_bool(b: bool) -> Self {
        Value::Int(b as i64)
    }
}
