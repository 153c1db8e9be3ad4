//! Stack-based virtual machine for the Lantern scripting language.
//!
//! Source text goes through a two-phase pipeline before it runs:
//!
//! ```text
//! source -> lexer -> words -> builder -> resolver -> Program -> ProgramState
//! ```
//!
//! # Architecture
//!
//! - **Values**: `Int(i64)` or `Str` (a handle into an interned string arena)
//! - **Evaluation stack**: bounded LIFO, 64 values by default
//! - **Scopes**: one flat slot array tagged with block depth; variables are
//!   resolved to slot positions at build time
//! - **Heap**: typed cells (`int` or `str`) behind generation-checked handles
//! - **Macros**: plain call/return over a bounded call stack
//! - **Failure model**: the first error stops the run and is reported with
//!   the source position of the offending word
//!
//! # Modules
//!
//! - [`lexer`]: Source text to positioned words
//! - [`isa`]: Reserved-word table and instruction set
//! - [`builder`]: Words to unresolved instructions with scope slots
//! - [`resolver`]: Block matching, jump targets and macro linking
//! - [`program`]: Resolved program and source positions
//! - [`compiler`]: End-to-end pipeline and diagnostics
//! - [`errors`]: Compile and execution error types
//! - [`vm`]: Execution engine, heap and scope manager

pub mod builder;
pub mod compiler;
pub mod errors;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod lexer;
pub mod program;
pub mod resolver;
pub mod vm;
