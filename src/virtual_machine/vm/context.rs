/// Default evaluation stack capacity.
pub const DEFAULT_STACK_CAPACITY: usize = 64;
/// Default macro call stack capacity.
pub const DEFAULT_CALL_STACK_CAPACITY: usize = 64;

/// Execution limits for a single run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VmConfig {
    /// Maximum number of values on the evaluation stack.
    pub stack_capacity: usize,
    /// Maximum number of nested macro calls.
    pub call_stack_capacity: usize,
    /// Maximum number of executed instructions, unlimited when `None`.
    pub max_steps: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_capacity: DEFAULT_STACK_CAPACITY,
            call_stack_capacity: DEFAULT_CALL_STACK_CAPACITY,
            max_steps: None,
        }
    }
}

impl VmConfig {
    pub fn with_stack_capacity(mut self, capacity: usize) -> Self {
        self.stack_capacity = capacity;
        self
    }

    pub fn with_call_stack_capacity(mut self, capacity: usize) -> Self {
        self.call_stack_capacity = capacity;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

/// Macro call stack frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) struct CallFrame {
    /// Instruction to resume at after the macro returns.
    pub(super) return_ip: usize,
    /// Scope slot count at the call; macro-local slots are relative to it.
    pub(super) base: usize,
}
