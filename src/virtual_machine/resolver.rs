//! Block matching and jump resolution.
//!
//! The resolver walks the builder output once with a stack of open blocks,
//! fills in every branch target, turns each closing word into the
//! instruction matching its block (`EndIf`, `EndWhile` or `Return`) and
//! finally links macro calls to their `def`.
//!
//! Calls may precede the macro definition, so linking also checks that every
//! top-level variable a macro body touches is already declared at each call
//! site, including through the macros it calls in turn.
//!
//! An `if` branch is tested either by the `if` word itself (`cond if ...`) or
//! by a `then` that follows it (`if cond then ...`). `elif` branches always
//! need a `then`; `else` has no test.

use crate::virtual_machine::builder::{GlobalUse, MacroCall, UnlinkedProgram};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Branch, CloseKind, Instruction, Target};
use crate::virtual_machine::program::Program;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opener {
    If,
    Elif,
    Else,
}

#[derive(Debug)]
enum OpenBlock {
    If {
        start: usize,
        /// Word that opened the current branch.
        opener: Opener,
        /// Test instruction of the current branch.
        test: Option<usize>,
        /// True once a `then` has claimed the test of the current branch.
        then_seen: bool,
        /// `elif` / `else` instructions whose exit jumps past the block.
        exits: Vec<usize>,
    },
    While {
        start: usize,
        run: Option<usize>,
    },
    Macro {
        start: usize,
        def: Option<usize>,
    },
}

impl OpenBlock {
    fn start(&self) -> usize {
        match self {
            OpenBlock::If { start, .. }
            | OpenBlock::While { start, .. }
            | OpenBlock::Macro { start, .. } => *start,
        }
    }

    fn word(&self) -> &'static str {
        match self {
            OpenBlock::If { .. } => "if",
            OpenBlock::While { .. } => "while",
            OpenBlock::Macro { .. } => "macro",
        }
    }
}

/// Resolves every target and link, producing an executable [`Program`].
pub fn resolve(unlinked: UnlinkedProgram) -> Result<Program, VMError> {
    let UnlinkedProgram {
        mut instructions,
        positions,
        strings,
        macros,
        calls,
        globals_used,
    } = unlinked;

    let locate = |err: VMError, ip: usize| match positions.get(ip) {
        Some(pos) => err.at(pos.line, pos.column),
        None => err,
    };

    let mut open: Vec<OpenBlock> = Vec::new();
    // `macro` index to `def` index.
    let mut entries: HashMap<usize, usize> = HashMap::new();

    for ip in 0..instructions.len() {
        match_instruction(&mut instructions, &mut open, &mut entries, ip)
            .map_err(|e| locate(e, ip))?;
    }

    if let Some(block) = open.last() {
        return Err(locate(
            VMError::syntax(format!("`{}` block is never closed", block.word())),
            block.start(),
        ));
    }

    for call in &calls {
        let name = &call.name;
        let entry = macros
            .get(name)
            .and_then(|start| entries.get(start))
            .ok_or_else(|| locate(VMError::syntax(format!("undefined macro `{name}`")), call.index))?;
        instructions[call.index] = Instruction::Call {
            entry: Target::new(*entry),
        };
    }

    let needs = global_requirements(&calls, globals_used);
    for call in calls.iter().filter(|c| c.caller.is_none()) {
        if let Some(need) = needs.get(&call.name)
            && call.live_globals < need.needed
        {
            return Err(locate(
                VMError::syntax(format!(
                    "macro `{}` uses `{}` before it is declared",
                    call.name, need.name
                )),
                call.index,
            ));
        }
    }

    Ok(Program::new(instructions, positions, strings))
}

/// Folds the top-level variables each macro needs into every macro calling it.
fn global_requirements(
    calls: &[MacroCall],
    mut needs: HashMap<String, GlobalUse>,
) -> HashMap<String, GlobalUse> {
    let mut changed = true;
    while changed {
        changed = false;
        for call in calls {
            let Some(caller) = &call.caller else {
                continue;
            };
            let Some(callee) = needs.get(&call.name).cloned() else {
                continue;
            };
            if needs.get(caller).is_none_or(|own| own.needed < callee.needed) {
                needs.insert(caller.clone(), callee);
                changed = true;
            }
        }
    }
    needs
}

fn match_instruction(
    instructions: &mut [Instruction],
    open: &mut Vec<OpenBlock>,
    entries: &mut HashMap<usize, usize>,
    ip: usize,
) -> Result<(), VMError> {
    match instructions[ip] {
        Instruction::If { .. } => open.push(OpenBlock::If {
            start: ip,
            opener: Opener::If,
            test: Some(ip),
            then_seen: false,
            exits: Vec::new(),
        }),
        Instruction::While => open.push(OpenBlock::While {
            start: ip,
            run: None,
        }),
        Instruction::Macro { .. } => open.push(OpenBlock::Macro {
            start: ip,
            def: None,
        }),

        Instruction::Then { .. } => {
            let Some(OpenBlock::If {
                start,
                opener,
                test,
                then_seen,
                ..
            }) = open.last_mut()
            else {
                return Err(VMError::syntax("`then` outside of an `if` block"));
            };
            if *then_seen || *opener == Opener::Else {
                return Err(VMError::syntax("unexpected `then` in a branch that is already tested"));
            }
            if *opener == Opener::If {
                instructions[*start] = Instruction::If {
                    test: false,
                    on_false: Branch::UNRESOLVED,
                };
            }
            *test = Some(ip);
            *then_seen = true;
        }

        Instruction::Elif { .. } | Instruction::Else { .. } => {
            let is_else = matches!(instructions[ip], Instruction::Else { .. });
            let word = if is_else { "else" } else { "elif" };
            let Some(OpenBlock::If {
                opener,
                test,
                then_seen,
                exits,
                ..
            }) = open.last_mut()
            else {
                return Err(VMError::syntax(format!("`{word}` outside of an `if` block")));
            };
            if *opener == Opener::Else {
                return Err(VMError::syntax(format!("`{word}` after `else`")));
            }
            let test_ip = current_test(*opener, *test, *then_seen)?;
            set_on_false(
                instructions,
                test_ip,
                Branch {
                    target: Target::new(ip + 1),
                    enter_scope: is_else,
                },
            );
            exits.push(ip);
            *opener = if is_else { Opener::Else } else { Opener::Elif };
            *test = None;
            *then_seen = false;
        }

        Instruction::Run { .. } => match open.last_mut() {
            Some(OpenBlock::While { run: run @ None, .. }) => *run = Some(ip),
            _ => return Err(VMError::syntax("`run` outside of a `while` condition")),
        },

        Instruction::Def => match open.last_mut() {
            Some(OpenBlock::Macro { def: def @ None, .. }) => *def = Some(ip),
            _ => return Err(VMError::syntax("`def` outside of a macro header")),
        },

        Instruction::Close(kind) => {
            let word = match kind {
                CloseKind::Any => "end",
                CloseKind::If => "endi",
                CloseKind::While => "endw",
            };
            let block = open
                .pop()
                .ok_or_else(|| VMError::syntax(format!("`{word}` without a matching block")))?;
            instructions[ip] = close_block(instructions, entries, block, kind, word, ip)?;
        }

        _ => {}
    }
    Ok(())
}

/// Completes `block`, closed by the word at `ip`, and returns the instruction
/// that replaces the closing word.
fn close_block(
    instructions: &mut [Instruction],
    entries: &mut HashMap<usize, usize>,
    block: OpenBlock,
    kind: CloseKind,
    word: &str,
    ip: usize,
) -> Result<Instruction, VMError> {
    let mismatch = |block: &OpenBlock| {
        VMError::syntax(format!("`{word}` cannot close a `{}` block", block.word()))
    };
    let past_end = Target::new(ip + 1);

    match block {
        OpenBlock::If {
            opener,
            test,
            then_seen,
            ref exits,
            ..
        } => {
            if kind == CloseKind::While {
                return Err(mismatch(&block));
            }
            if opener != Opener::Else {
                let test_ip = current_test(opener, test, then_seen)?;
                set_on_false(
                    instructions,
                    test_ip,
                    Branch {
                        target: past_end,
                        enter_scope: false,
                    },
                );
            }
            for exit_ip in exits {
                instructions[*exit_ip] = match instructions[*exit_ip] {
                    Instruction::Elif { .. } => Instruction::Elif { exit: past_end },
                    _ => Instruction::Else { exit: past_end },
                };
            }
            Ok(Instruction::EndIf)
        }
        OpenBlock::While { start, run } => {
            if kind == CloseKind::If {
                return Err(mismatch(&block));
            }
            let run = run.ok_or_else(|| VMError::syntax("`while` block without `run`"))?;
            instructions[run] = Instruction::Run { exit: past_end };
            Ok(Instruction::EndWhile {
                loop_start: Target::new(start),
            })
        }
        OpenBlock::Macro { start, def } => {
            if kind != CloseKind::Any {
                return Err(mismatch(&block));
            }
            let def = def.ok_or_else(|| VMError::syntax("macro without `def`"))?;
            instructions[start] = Instruction::Macro { skip: past_end };
            entries.insert(start, def);
            Ok(Instruction::Return)
        }
    }
}

/// Returns the test instruction of the branch being closed.
fn current_test(opener: Opener, test: Option<usize>, then_seen: bool) -> Result<usize, VMError> {
    match (opener, test) {
        (Opener::Elif, _) if !then_seen => Err(VMError::syntax("`elif` branch without `then`")),
        (_, Some(ip)) => Ok(ip),
        _ => Err(VMError::syntax("branch without a condition")),
    }
}

fn set_on_false(instructions: &mut [Instruction], test_ip: usize, branch: Branch) {
    instructions[test_ip] = match instructions[test_ip] {
        Instruction::If { test, .. } => Instruction::If {
            test,
            on_false: branch,
        },
        _ => Instruction::Then { on_false: branch },
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::builder::build;
    use crate::virtual_machine::lexer::tokenize;

    fn resolve_source(source: &str) -> Result<Program, VMError> {
        resolve(build(&tokenize(source)?)?)
    }

    fn syntax_message(source: &str) -> String {
        match resolve_source(source).unwrap_err().root() {
            VMError::SyntaxError { message } => message.clone(),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    fn branch(target: usize, enter_scope: bool) -> Branch {
        Branch {
            target: Target::new(target),
            enter_scope,
        }
    }

    #[test]
    fn postfix_if_else() {
        // 0:0 1:if 2:1 3:println 4:else 5:2 6:println 7:end
        let program = resolve_source("0 if 1 println else 2 println end").unwrap();
        assert_eq!(
            program.get(1),
            Some(&Instruction::If {
                test: true,
                on_false: branch(5, true),
            })
        );
        assert_eq!(
            program.get(4),
            Some(&Instruction::Else {
                exit: Target::new(8)
            })
        );
        assert_eq!(program.get(7), Some(&Instruction::EndIf));
    }

    #[test]
    fn prefix_if_with_elif() {
        // 0:if 1:0 2:then 3:1 4:print 5:elif 6:1 7:then 8:2 9:print 10:endi
        let program = resolve_source("if 0 then 1 print elif 1 then 2 print endi").unwrap();
        assert_eq!(
            program.get(0),
            Some(&Instruction::If {
                test: false,
                on_false: Branch::UNRESOLVED,
            })
        );
        assert_eq!(
            program.get(2),
            Some(&Instruction::Then {
                on_false: branch(6, false)
            })
        );
        assert_eq!(
            program.get(5),
            Some(&Instruction::Elif {
                exit: Target::new(11)
            })
        );
        assert_eq!(
            program.get(7),
            Some(&Instruction::Then {
                on_false: branch(11, false)
            })
        );
        assert_eq!(program.get(10), Some(&Instruction::EndIf));
    }

    #[test]
    fn nested_ifs_close_innermost_first() {
        // 0:1 1:if 2:0 3:if 4:2 5:println 6:end 7:3 8:println 9:end
        let program = resolve_source("1 if 0 if 2 println end 3 println end").unwrap();
        assert_eq!(
            program.get(3),
            Some(&Instruction::If {
                test: true,
                on_false: branch(7, false),
            })
        );
        assert_eq!(
            program.get(1),
            Some(&Instruction::If {
                test: true,
                on_false: branch(10, false),
            })
        );
    }

    #[test]
    fn while_loop() {
        // 0:while 1:1 2:run 3:endw
        let program = resolve_source("while 1 run endw").unwrap();
        assert_eq!(
            program.get(2),
            Some(&Instruction::Run {
                exit: Target::new(4)
            })
        );
        assert_eq!(
            program.get(3),
            Some(&Instruction::EndWhile {
                loop_start: Target::new(0)
            })
        );
    }

    #[test]
    fn macro_links_forward_calls() {
        // 0:call 1:macro 2:def 3:1 4:print 5:end
        let program = resolve_source("$m macro m def 1 print end").unwrap();
        assert_eq!(
            program.get(0),
            Some(&Instruction::Call {
                entry: Target::new(2)
            })
        );
        assert_eq!(
            program.get(1),
            Some(&Instruction::Macro {
                skip: Target::new(6)
            })
        );
        assert_eq!(program.get(5), Some(&Instruction::Return));
    }

    #[test]
    fn no_unresolved_targets_remain() {
        let program = resolve_source(
            "1 = i while i 3 <= run i print 1 i + = i end \
             if i 0 > then 1 print elif 0 then 2 print else 3 print end",
        )
        .unwrap();
        for instr in program.instructions() {
            match instr {
                Instruction::Then { on_false } => assert!(on_false.target.is_resolved()),
                Instruction::If { test: true, on_false } => assert!(on_false.target.is_resolved()),
                Instruction::Elif { exit } | Instruction::Else { exit } | Instruction::Run { exit } => {
                    assert!(exit.is_resolved())
                }
                Instruction::Close(_) => panic!("closing word left unresolved"),
                _ => {}
            }
        }
    }

    #[test]
    fn unclosed_block_points_at_opener() {
        let err = resolve_source("1 2\n  while 1 run").unwrap_err();
        assert_eq!(err.position(), Some((2, 3)));
        assert!(err.to_string().contains("`while` block is never closed"));
    }

    #[test]
    fn mismatched_closers() {
        assert!(syntax_message("1 if endw").contains("`endw` cannot close a `if` block"));
        assert!(syntax_message("while 1 run endi").contains("`endi` cannot close a `while` block"));
        assert!(syntax_message("macro m def endi").contains("cannot close a `macro` block"));
    }

    #[test]
    fn elif_needs_then() {
        assert!(syntax_message("0 if elif 1 end").contains("without `then`"));
    }

    #[test]
    fn else_is_last() {
        assert!(syntax_message("0 if else else end").contains("after `else`"));
        assert!(syntax_message("0 if else 1 then end").contains("already tested"));
    }

    #[test]
    fn stray_branch_words() {
        assert!(syntax_message("1 then").contains("outside of an `if` block"));
        assert!(syntax_message("else").contains("outside of an `if` block"));
        assert!(syntax_message("1 run").contains("outside of a `while`"));
        assert!(syntax_message("def").contains("outside of a macro header"));
    }

    #[test]
    fn while_without_run() {
        assert!(syntax_message("while 1 end").contains("without `run`"));
    }

    #[test]
    fn macro_global_declared_after_call() {
        let err = resolve_source("$m 5 = g macro m def g print end").unwrap_err();
        assert_eq!(err.position(), Some((1, 1)));
        assert!(err.to_string().contains("macro `m` uses `g` before it is declared"));

        assert!(resolve_source("5 = g $m macro m def g print end").is_ok());
        assert!(resolve_source("5 = g macro m def g print end $m").is_ok());
    }

    #[test]
    fn macro_global_through_nested_call() {
        let source = "$n 5 = g macro m def g print end macro n def $m end";
        assert!(syntax_message(source).contains("macro `n` uses `g` before it is declared"));
        assert!(resolve_source("5 = g $n macro m def g print end macro n def $m end").is_ok());
    }

    #[test]
    fn recursive_macros_resolve() {
        let source = "1 = k macro a def k if 0 = k $b end end macro b def $a end $a";
        assert!(resolve_source(source).is_ok());
        assert!(syntax_message("$a 1 = k macro a def $b end macro b def k = k $a end")
            .contains("macro `a` uses `k` before it is declared"));
    }

    #[test]
    fn undefined_macro() {
        let err = resolve_source("1 print $missing").unwrap_err();
        assert_eq!(err.position(), Some((1, 9)));
        assert!(err.to_string().contains("undefined macro `missing`"));
    }
}
