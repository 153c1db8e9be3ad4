//! Lantern library.
//!
//! Provides the Lantern compiler pipeline and its stack-based virtual machine.

pub mod utils;
pub mod virtual_machine;
