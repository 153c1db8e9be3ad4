//! Resolved program representation.
//!
//! A [`Program`] bundles the linked instruction sequence with its string
//! literal pool and the source position of every instruction. It can only be
//! produced by the [`resolver`](super::resolver), so every jump target inside
//! it has been filled in.

use crate::virtual_machine::isa::Instruction;
use std::fmt;

/// 1-based line and column of a word in the source text.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
}

impl SourcePos {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Linked, immutable program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction>,
    positions: Vec<SourcePos>,
    strings: Vec<String>,
}

impl Program {
    /// Wraps fully resolved parts. Only the resolver constructs programs.
    pub(crate) fn new(
        instructions: Vec<Instruction>,
        positions: Vec<SourcePos>,
        strings: Vec<String>,
    ) -> Self {
        debug_assert_eq!(instructions.len(), positions.len());
        Self {
            instructions,
            positions,
            strings,
        }
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, ip: usize) -> Option<&Instruction> {
        self.instructions.get(ip)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Source position of the word that produced instruction `ip`.
    pub fn position(&self, ip: usize) -> Option<SourcePos> {
        self.positions.get(ip).copied()
    }

    /// String literal pool, indexed by `PushStr` operands.
    pub fn strings(&self) -> &[String] {
        &self.strings
    }
}

/// Numbered listing, one instruction per line.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (ip, (instr, pos)) in self.instructions.iter().zip(&self.positions).enumerate() {
            write!(f, "{ip:>4}  {:<8} {instr}", pos.to_string())?;
            if let Instruction::PushStr(id) = instr
                && let Some(s) = self.strings.get(*id as usize)
            {
                write!(f, "  ; {s:?}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
