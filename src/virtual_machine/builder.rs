//! Lexical words to unresolved instructions.
//!
//! The builder maps every word to an [`Instruction`], interns string
//! literals, classifies identifiers and assigns every variable its scope
//! slot. Jump targets are left as [`Target::UNRESOLVED`]; macro calls are
//! recorded by name. Both are completed by the [`resolver`](super::resolver).
//!
//! # Identifiers
//!
//! - `value = name` declares `name` in the current block, or reassigns it when
//!   it is already visible from an enclosing open block
//! - a bare `name` pushes the variable and must already be visible
//! - `elif` and `else` drop the names of the branch they close
//! - macro bodies see their own names plus top-level names declared before
//!   the macro; their names live in slots relative to the call frame

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{
    BinaryOp, Branch, CellKind, CloseKind, Instruction, Keyword, Target, VarSlot,
};
use crate::virtual_machine::lexer::Word;
use crate::virtual_machine::program::SourcePos;
use std::collections::HashMap;

const MACRO_SIGIL: char = '$';

/// Builder output: instructions with unresolved targets and unlinked calls.
#[derive(Debug, Clone, Default)]
pub struct UnlinkedProgram {
    pub instructions: Vec<Instruction>,
    pub positions: Vec<SourcePos>,
    pub strings: Vec<String>,
    /// Macro name to the index of its `macro` instruction.
    pub macros: HashMap<String, usize>,
    pub calls: Vec<MacroCall>,
    /// Macro name to the latest top-level variable its body reads or writes.
    pub globals_used: HashMap<String, GlobalUse>,
}

/// A `$name` call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroCall {
    /// Index of the `Call` instruction.
    pub index: usize,
    pub name: String,
    /// Macro whose body contains the call, `None` outside macros.
    pub caller: Option<String>,
    /// Top-level variables declared before the call.
    pub live_globals: usize,
}

/// Top-level variable a macro body depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalUse {
    /// Top-level variables that must be live when the macro runs.
    pub needed: usize,
    pub name: String,
}

impl UnlinkedProgram {
    fn push(&mut self, instr: Instruction, pos: SourcePos) -> usize {
        self.instructions.push(instr);
        self.positions.push(pos);
        self.instructions.len() - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    TopLevel,
    If,
    While,
    Macro,
}

/// Names declared by one open block.
#[derive(Debug)]
struct ScopeFrame {
    kind: FrameKind,
    names: Vec<(String, VarSlot)>,
    /// Inside a condition region (`while .. run`, `elif .. then`, `macro .. def`).
    condition: bool,
    /// `if` frames only: the current branch already has its test.
    tested: bool,
}

impl ScopeFrame {
    fn new(kind: FrameKind, condition: bool) -> Self {
        Self {
            kind,
            names: Vec::new(),
            condition,
            tested: false,
        }
    }
}

struct Builder {
    out: UnlinkedProgram,
    string_ids: HashMap<String, u32>,
    /// `scopes[0]` is the top level and is never popped.
    scopes: Vec<ScopeFrame>,
    /// Macro whose body is being built.
    current_macro: Option<String>,
}

/// Builds unresolved instructions from a word stream.
pub fn build(words: &[Word]) -> Result<UnlinkedProgram, VMError> {
    let mut builder = Builder {
        out: UnlinkedProgram::default(),
        string_ids: HashMap::new(),
        scopes: vec![ScopeFrame::new(FrameKind::TopLevel, false)],
        current_macro: None,
    };

    let mut i = 0;
    while i < words.len() {
        let word = &words[i];
        let consumed = builder
            .word(word, words.get(i + 1))
            .map_err(|e| e.at(word.pos.line, word.pos.column))?;
        i += consumed;
    }

    Ok(builder.out)
}

/// Returns true for words made of letters, digits and `_`, not starting with a digit.
pub fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Returns true for an optional `-` followed by ASCII digits.
fn is_int_literal(word: &str) -> bool {
    let digits = word.strip_prefix('-').unwrap_or(word);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

impl Builder {
    /// Handles `word` (and possibly `next`), returning how many words were consumed.
    fn word(&mut self, word: &Word, next: Option<&Word>) -> Result<usize, VMError> {
        let pos = word.pos;

        if word.literal {
            let id = self.intern(&word.text);
            self.out.push(Instruction::PushStr(id), pos);
            return Ok(1);
        }

        let text = word.text.as_str();
        if is_int_literal(text) {
            let value = text.parse::<i64>().map_err(|_| {
                VMError::syntax(format!("integer literal `{text}` out of range"))
            })?;
            self.out.push(Instruction::PushInt(value), pos);
            return Ok(1);
        }

        if let Some(keyword) = Keyword::from_word(text) {
            return self.keyword(keyword, pos, next);
        }

        if let Some(name) = text.strip_prefix(MACRO_SIGIL) {
            if !is_identifier(name) {
                return Err(VMError::syntax(format!("invalid macro name in `{text}`")));
            }
            let index = self.out.push(
                Instruction::Call {
                    entry: Target::UNRESOLVED,
                },
                pos,
            );
            self.out.calls.push(MacroCall {
                index,
                name: name.to_string(),
                caller: self.current_macro.clone(),
                live_globals: self.scopes[0].names.len(),
            });
            return Ok(1);
        }

        if is_identifier(text) {
            let slot = self
                .lookup(text)
                .ok_or_else(|| VMError::syntax(format!("undeclared identifier `{text}`")))?;
            self.note_global(slot, text);
            self.out.push(Instruction::Load(slot), pos);
            return Ok(1);
        }

        Err(VMError::syntax(format!("unknown word `{text}`")))
    }

    fn keyword(
        &mut self,
        keyword: Keyword,
        pos: SourcePos,
        next: Option<&Word>,
    ) -> Result<usize, VMError> {
        if let Some(op) = BinaryOp::from_keyword(keyword) {
            self.out.push(Instruction::Binary(op), pos);
            return Ok(1);
        }

        let instr = match keyword {
            Keyword::Assign => {
                let name = expect_name(next, "`=` must be followed by a variable name")?;
                self.assign(name, pos)?;
                return Ok(2);
            }
            Keyword::Int | Keyword::Str => {
                let kind = if keyword == Keyword::Int {
                    CellKind::Int
                } else {
                    CellKind::Str
                };
                match next {
                    Some(w) if !w.literal && Keyword::from_word(&w.text) == Some(Keyword::Alloc) => {
                        self.out.push(Instruction::Alloc(kind), pos);
                        return Ok(2);
                    }
                    _ => {
                        return Err(VMError::syntax(format!(
                            "type marker `{keyword}` must be followed by `alloc`"
                        )));
                    }
                }
            }
            Keyword::Alloc => {
                return Err(VMError::syntax(
                    "`alloc` needs a preceding type marker (`int` or `str`)",
                ));
            }
            Keyword::Macro => {
                let name = expect_name(next, "`macro` must be followed by a macro name")?;
                self.define_macro(name, pos)?;
                return Ok(2);
            }
            Keyword::Prev => Instruction::Prev,
            Keyword::Not => Instruction::Not,
            Keyword::If => {
                self.scopes.push(ScopeFrame::new(FrameKind::If, false));
                Instruction::If {
                    test: true,
                    on_false: Branch::UNRESOLVED,
                }
            }
            Keyword::Then => {
                self.then()?;
                Instruction::Then {
                    on_false: Branch::UNRESOLVED,
                }
            }
            Keyword::Elif => {
                self.next_branch(true);
                Instruction::Elif {
                    exit: Target::UNRESOLVED,
                }
            }
            Keyword::Else => {
                self.next_branch(false);
                Instruction::Else {
                    exit: Target::UNRESOLVED,
                }
            }
            Keyword::While => {
                self.scopes.push(ScopeFrame::new(FrameKind::While, true));
                Instruction::While
            }
            Keyword::Run => {
                self.end_condition(FrameKind::While);
                Instruction::Run {
                    exit: Target::UNRESOLVED,
                }
            }
            Keyword::Def => {
                self.end_condition(FrameKind::Macro);
                Instruction::Def
            }
            Keyword::End | Keyword::EndIf | Keyword::EndWhile => {
                if self.scopes.len() == 1 {
                    return Err(VMError::syntax(format!(
                        "`{keyword}` without a matching block"
                    )));
                }
                if self.scopes.pop().is_some_and(|s| s.kind == FrameKind::Macro) {
                    self.current_macro = None;
                }
                Instruction::Close(match keyword {
                    Keyword::EndIf => CloseKind::If,
                    Keyword::EndWhile => CloseKind::While,
                    _ => CloseKind::Any,
                })
            }
            Keyword::Jmp => Instruction::Jump,
            Keyword::Free => Instruction::Free,
            Keyword::PGet => Instruction::PGet,
            Keyword::PSet => Instruction::PSet,
            Keyword::Print => Instruction::Print,
            Keyword::PrintLn => Instruction::PrintLn,
            // Operators were handled by `BinaryOp::from_keyword` above.
            Keyword::Plus
            | Keyword::Minus
            | Keyword::Star
            | Keyword::Slash
            | Keyword::Percent
            | Keyword::EqEq
            | Keyword::NotEq
            | Keyword::Greater
            | Keyword::Less
            | Keyword::GreaterEq
            | Keyword::LessEq
            | Keyword::And
            | Keyword::Or => unreachable!("operator keywords map to BinaryOp"),
        };

        self.out.push(instr, pos);
        Ok(1)
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(id) = self.string_ids.get(s) {
            return *id;
        }
        let id = self.out.strings.len() as u32;
        self.out.strings.push(s.to_string());
        self.string_ids.insert(s.to_string(), id);
        id
    }

    /// Index of the innermost open macro frame, if any.
    fn macro_frame(&self) -> Option<usize> {
        self.scopes.iter().position(|s| s.kind == FrameKind::Macro)
    }

    /// Finds the innermost visible slot for `name`.
    fn lookup(&self, name: &str) -> Option<VarSlot> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|frame| frame.names.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, slot)| *slot)
    }

    fn assign(&mut self, name: &str, pos: SourcePos) -> Result<(), VMError> {
        if let Some(slot) = self.lookup(name) {
            self.note_global(slot, name);
            self.out.push(Instruction::Reassign(slot), pos);
            return Ok(());
        }

        let slot = match self.macro_frame() {
            Some(start) => VarSlot::Local(self.live_names(start)),
            None => VarSlot::Global(self.live_names(0)),
        };

        // An untested `if` frame accepts names until a `then` shows up; see `then`.
        let Some(frame) = self.scopes.last_mut() else {
            return Err(VMError::syntax("no open scope"));
        };
        if frame.condition {
            return Err(VMError::syntax(format!(
                "cannot declare `{name}` inside a condition"
            )));
        }
        frame.names.push((name.to_string(), slot));
        self.out.push(Instruction::Declare(slot), pos);
        Ok(())
    }

    /// Records `name` against the macro being built when it is a top-level slot.
    fn note_global(&mut self, slot: VarSlot, name: &str) {
        let (Some(owner), VarSlot::Global(index)) = (&self.current_macro, slot) else {
            return;
        };
        let used = self
            .out
            .globals_used
            .entry(owner.clone())
            .or_insert(GlobalUse {
                needed: 0,
                name: String::new(),
            });
        if index + 1 > used.needed {
            used.needed = index + 1;
            used.name = name.to_string();
        }
    }

    /// Number of names declared in `scopes[from..]`.
    fn live_names(&self, from: usize) -> usize {
        self.scopes[from..].iter().map(|s| s.names.len()).sum()
    }

    fn define_macro(&mut self, name: &str, pos: SourcePos) -> Result<(), VMError> {
        if self.scopes.len() > 1 {
            return Err(VMError::syntax(format!(
                "macro `{name}` must be defined at top level"
            )));
        }
        if self.out.macros.contains_key(name) {
            return Err(VMError::syntax(format!("macro `{name}` is already defined")));
        }
        let index = self.out.push(
            Instruction::Macro {
                skip: Target::UNRESOLVED,
            },
            pos,
        );
        self.out.macros.insert(name.to_string(), index);
        self.current_macro = Some(name.to_string());
        self.scopes.push(ScopeFrame::new(FrameKind::Macro, true));
        Ok(())
    }

    /// `then` closes the condition region of the current `if` branch.
    fn then(&mut self) -> Result<(), VMError> {
        let Some(frame) = self.scopes.last_mut() else {
            return Ok(());
        };
        if frame.kind != FrameKind::If {
            return Ok(());
        }
        if !frame.tested && !frame.names.is_empty() {
            return Err(VMError::syntax(format!(
                "cannot declare `{}` before `then`",
                frame.names[0].0
            )));
        }
        frame.condition = false;
        frame.tested = true;
        Ok(())
    }

    /// `elif` / `else` close the names of the previous branch.
    fn next_branch(&mut self, needs_condition: bool) {
        if let Some(frame) = self.scopes.last_mut()
            && frame.kind == FrameKind::If
        {
            frame.names.clear();
            frame.condition = needs_condition;
            frame.tested = !needs_condition;
        }
    }

    /// `run` / `def` close the condition region of a `while` / `macro` frame.
    fn end_condition(&mut self, kind: FrameKind) {
        if let Some(frame) = self.scopes.last_mut()
            && frame.kind == kind
        {
            frame.condition = false;
        }
    }
}

fn expect_name<'a>(next: Option<&'a Word>, message: &str) -> Result<&'a str, VMError> {
    match next {
        Some(w) if !w.literal && is_identifier(&w.text) && Keyword::from_word(&w.text).is_none() => {
            Ok(&w.text)
        }
        _ => Err(VMError::syntax(message)),
    }
}
