//! Reserved words and the instruction set.
//!
//! The [`for_each_keyword!`](crate::for_each_keyword) macro holds the canonical
//! reserved-word table and invokes a callback macro for code generation, so
//! the builder, the keyword fingerprint test and [`Keyword`] itself never
//! duplicate the list.
//!
//! [`Instruction`] is the executable form produced by the
//! [`builder`](super::builder) and linked by the [`resolver`](super::resolver).

use std::fmt;

/// Invokes a callback macro with the complete reserved-word list.
///
/// Each entry is `Name = "word" [| "alias"]*`.
#[macro_export]
macro_rules! for_each_keyword {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Stack and variables
            // =========================
            /// N prev ; pushes a copy of the value N below the top
            Prev = "prev",
            /// value = name ; declares or reassigns `name`
            Assign = "=",
            // =========================
            // Arithmetic
            // =========================
            /// b a + ; b + a (Int) or concatenation (Str)
            Plus = "+",
            /// b a - ; b - a
            Minus = "-",
            /// b a * ; b * a
            Star = "*",
            /// b a / ; b / a (fails on a = 0)
            Slash = "/",
            /// b a % ; b % a (fails on a = 0)
            Percent = "%",
            // =========================
            // Comparison / logic
            // =========================
            /// b a == ; 1 if equal (Int or Str)
            EqEq = "==",
            /// b a != ; 1 if different (Int or Str)
            NotEq = "!=",
            /// b a > ; 1 if b > a
            Greater = ">",
            /// b a < ; 1 if b < a
            Less = "<",
            /// b a >= ; 1 if b >= a
            GreaterEq = ">=",
            /// b a <= ; 1 if b <= a
            LessEq = "<=",
            /// b a and ; 1 if both are nonzero
            And = "and",
            /// b a or ; 1 if either is nonzero
            Or = "or",
            /// a not ; 1 if a is zero
            Not = "not" | "!",
            // =========================
            // Control flow
            // =========================
            /// opens a conditional block
            If = "if",
            /// starts another conditional branch
            Elif = "elif",
            /// starts the fallback branch
            Else = "else",
            /// pops the condition of the current branch
            Then = "then",
            /// closes the innermost block
            End = "end",
            /// closes the innermost `if` block
            EndIf = "endi",
            /// closes the innermost `while` block
            EndWhile = "endw",
            /// opens a loop; the condition follows
            While = "while",
            /// pops the loop condition
            Run = "run",
            /// target jmp ; continues at instruction `target`
            Jmp = "jmp",
            // =========================
            // Heap
            // =========================
            /// size <type> alloc ; pushes a handle to a new cell
            Alloc = "alloc",
            /// handle free ; releases the cell
            Free = "free",
            /// handle index pget ; pushes the element
            PGet = "pget",
            /// handle index value pset ; stores the element
            PSet = "pset",
            /// integer cell type marker
            Int = "int",
            /// string cell type marker
            Str = "str",
            // =========================
            // Output
            // =========================
            /// a print ; writes a
            Print = "print",
            /// a println ; writes a and a newline
            PrintLn = "println",
            // =========================
            // Macros
            // =========================
            /// macro name def ... end ; defines a macro
            Macro = "macro",
            /// marks the start of a macro body
            Def = "def",
        }
    };
}

#[macro_export]
macro_rules! define_keywords {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $word:literal $( | $alias:literal )*
        ),* $(,)?
    ) => {
        /// A reserved word of the language.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Keyword {
            $(
                $(#[$doc])*
                $name,
            )*
        }

        impl Keyword {
            /// Looks up the keyword spelled by `word`, including aliases.
            pub fn from_word(word: &str) -> Option<Keyword> {
                match word {
                    $( $word $( | $alias )* => Some(Keyword::$name), )*
                    _ => None,
                }
            }

            /// Returns the canonical spelling of the keyword.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $( Keyword::$name => $word, )*
                }
            }
        }
    };
}

for_each_keyword!(define_keywords);

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved jump destination (instruction index).
///
/// Every target starts as [`Target::UNRESOLVED`] and is filled in by the
/// resolver. The sentinel lies outside any program, so a jump through it
/// fails with `InvalidJump` instead of landing somewhere arbitrary.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Target(usize);

impl Target {
    pub const UNRESOLVED: Target = Target(usize::MAX);

    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    pub const fn is_resolved(self) -> bool {
        self.0 != usize::MAX
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_resolved() {
            write!(f, "@{}", self.0)
        } else {
            f.write_str("@?")
        }
    }
}

/// Where a failed branch test continues.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Branch {
    pub target: Target,
    /// Set when the target is the body of an `else`, which runs one scope deeper.
    pub enter_scope: bool,
}

impl Branch {
    pub const UNRESOLVED: Branch = Branch {
        target: Target::UNRESOLVED,
        enter_scope: false,
    };
}

/// Two-operand operators. Operands are popped `a` first, then `b`; the result is `b OP a`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

impl BinaryOp {
    pub const fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Ge => ">=",
            BinaryOp::Le => "<=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    /// Maps an operator keyword to its operation.
    pub const fn from_keyword(keyword: Keyword) -> Option<BinaryOp> {
        Some(match keyword {
            Keyword::Plus => BinaryOp::Add,
            Keyword::Minus => BinaryOp::Sub,
            Keyword::Star => BinaryOp::Mul,
            Keyword::Slash => BinaryOp::Div,
            Keyword::Percent => BinaryOp::Mod,
            Keyword::EqEq => BinaryOp::Eq,
            Keyword::NotEq => BinaryOp::Ne,
            Keyword::Greater => BinaryOp::Gt,
            Keyword::Less => BinaryOp::Lt,
            Keyword::GreaterEq => BinaryOp::Ge,
            Keyword::LessEq => BinaryOp::Le,
            Keyword::And => BinaryOp::And,
            Keyword::Or => BinaryOp::Or,
            _ => return None,
        })
    }
}

/// Element type of a heap cell, chosen at `alloc` time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CellKind {
    Int,
    Str,
}

impl CellKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CellKind::Int => "int",
            CellKind::Str => "str",
        }
    }
}

/// Resolved location of a variable in the scope slot array.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum VarSlot {
    /// Top-level variable, absolute slot index.
    Global(usize),
    /// Macro-local variable, index relative to the active macro frame.
    Local(usize),
}

/// Which block kinds a closing word may close.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CloseKind {
    /// `end`: whatever is innermost.
    Any,
    /// `endi`
    If,
    /// `endw`
    While,
}

/// Instruction categories used by the execution profile.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Category {
    Stack = 0,
    Arithmetic = 1,
    Logic = 2,
    Control = 3,
    Scope = 4,
    Heap = 5,
    Call = 6,
    Output = 7,
}

/// One executable instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Instruction {
    PushInt(i64),
    /// Index into the program's string literal pool.
    PushStr(u32),
    Binary(BinaryOp),
    Not,
    Prev,
    /// Opens a conditional. `test` is false when a `then` performs the test instead.
    If { test: bool, on_false: Branch },
    Then { on_false: Branch },
    /// Reached by fall-through: leaves the finished branch and jumps to `exit`.
    Elif { exit: Target },
    /// Reached by fall-through: leaves the finished branch and jumps to `exit`.
    Else { exit: Target },
    EndIf,
    While,
    Run { exit: Target },
    EndWhile { loop_start: Target },
    /// Closing word before resolution; never present in a resolved program.
    Close(CloseKind),
    Declare(VarSlot),
    Reassign(VarSlot),
    Load(VarSlot),
    Alloc(CellKind),
    Free,
    PGet,
    PSet,
    Print,
    PrintLn,
    Jump,
    /// Macro definition site; skips the body.
    Macro { skip: Target },
    /// Macro entry.
    Def,
    Call { entry: Target },
    Return,
}

impl Instruction {
    /// Returns the source spelling used in diagnostics.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::PushInt(_) => "push int",
            Instruction::PushStr(_) => "push str",
            Instruction::Binary(op) => op.symbol(),
            Instruction::Not => "not",
            Instruction::Prev => "prev",
            Instruction::If { .. } => "if",
            Instruction::Then { .. } => "then",
            Instruction::Elif { .. } => "elif",
            Instruction::Else { .. } => "else",
            Instruction::EndIf => "end",
            Instruction::While => "while",
            Instruction::Run { .. } => "run",
            Instruction::EndWhile { .. } => "end",
            Instruction::Close(CloseKind::Any) => "end",
            Instruction::Close(CloseKind::If) => "endi",
            Instruction::Close(CloseKind::While) => "endw",
            Instruction::Declare(_) => "=",
            Instruction::Reassign(_) => "=",
            Instruction::Load(_) => "load",
            Instruction::Alloc(_) => "alloc",
            Instruction::Free => "free",
            Instruction::PGet => "pget",
            Instruction::PSet => "pset",
            Instruction::Print => "print",
            Instruction::PrintLn => "println",
            Instruction::Jump => "jmp",
            Instruction::Macro { .. } => "macro",
            Instruction::Def => "def",
            Instruction::Call { .. } => "call",
            Instruction::Return => "end",
        }
    }

    /// Returns the profile category of the instruction.
    pub const fn category(&self) -> Category {
        match self {
            Instruction::PushInt(_) | Instruction::PushStr(_) | Instruction::Prev => {
                Category::Stack
            }
            Instruction::Binary(
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod,
            ) => Category::Arithmetic,
            Instruction::Binary(_) | Instruction::Not => Category::Logic,
            Instruction::If { .. }
            | Instruction::Then { .. }
            | Instruction::Elif { .. }
            | Instruction::Else { .. }
            | Instruction::EndIf
            | Instruction::While
            | Instruction::Run { .. }
            | Instruction::EndWhile { .. }
            | Instruction::Close(_)
            | Instruction::Jump => Category::Control,
            Instruction::Declare(_) | Instruction::Reassign(_) | Instruction::Load(_) => {
                Category::Scope
            }
            Instruction::Alloc(_) | Instruction::Free | Instruction::PGet | Instruction::PSet => {
                Category::Heap
            }
            Instruction::Macro { .. }
            | Instruction::Def
            | Instruction::Call { .. }
            | Instruction::Return => Category::Call,
            Instruction::Print | Instruction::PrintLn => Category::Output,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushInt(v) => write!(f, "PUSH_INT {v}"),
            Instruction::PushStr(id) => write!(f, "PUSH_STR #{id}"),
            Instruction::Binary(op) => write!(f, "{}", op.symbol()),
            Instruction::If { test, on_false } => {
                write!(f, "IF test={test} else={}", on_false.target)
            }
            Instruction::Then { on_false } => write!(f, "THEN else={}", on_false.target),
            Instruction::Elif { exit } => write!(f, "ELIF exit={exit}"),
            Instruction::Else { exit } => write!(f, "ELSE exit={exit}"),
            Instruction::Run { exit } => write!(f, "RUN exit={exit}"),
            Instruction::EndWhile { loop_start } => write!(f, "END_WHILE loop={loop_start}"),
            Instruction::Declare(slot) => write!(f, "DECLARE {slot:?}"),
            Instruction::Reassign(slot) => write!(f, "REASSIGN {slot:?}"),
            Instruction::Load(slot) => write!(f, "LOAD {slot:?}"),
            Instruction::Alloc(kind) => write!(f, "ALLOC {}", kind.as_str()),
            Instruction::Macro { skip } => write!(f, "MACRO skip={skip}"),
            Instruction::Call { entry } => write!(f, "CALL {entry}"),
            other => write!(f, "{}", other.mnemonic().to_uppercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_from_word_handles_aliases() {
        assert_eq!(Keyword::from_word("not"), Some(Keyword::Not));
        assert_eq!(Keyword::from_word("!"), Some(Keyword::Not));
        assert_eq!(Keyword::from_word("endw"), Some(Keyword::EndWhile));
        assert_eq!(Keyword::from_word("println"), Some(Keyword::PrintLn));
    }

    #[test]
    fn keyword_lookup_is_case_sensitive() {
        assert_eq!(Keyword::from_word("IF"), None);
        assert_eq!(Keyword::from_word("Print"), None);
        assert_eq!(Keyword::from_word("$m"), None);
    }

    #[test]
    fn binary_op_from_keyword() {
        assert_eq!(BinaryOp::from_keyword(Keyword::Percent), Some(BinaryOp::Mod));
        assert_eq!(BinaryOp::from_keyword(Keyword::Or), Some(BinaryOp::Or));
        assert_eq!(BinaryOp::from_keyword(Keyword::Not), None);
        assert_eq!(BinaryOp::from_keyword(Keyword::If), None);
    }

    #[test]
    fn unresolved_target_is_out_of_any_program() {
        assert!(!Target::UNRESOLVED.is_resolved());
        assert!(Target::new(0).is_resolved());
        assert_eq!(Target::UNRESOLVED.to_string(), "@?");
        assert_eq!(Target::new(12).to_string(), "@12");
    }

    #[test]
    fn categories() {
        assert_eq!(Instruction::Binary(BinaryOp::Mul).category(), Category::Arithmetic);
        assert_eq!(Instruction::Binary(BinaryOp::Le).category(), Category::Logic);
        assert_eq!(Instruction::PSet.category(), Category::Heap);
        assert_eq!(Instruction::Return.category(), Category::Call);
    }
}
