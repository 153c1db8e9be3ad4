//! Execution engine.
//!
//! [`ProgramState`] owns everything a run touches: the evaluation stack, the
//! heap, the scope slots and the macro call stack. It executes one
//! instruction per [`ProgramState::step`], so a host can drive it
//! incrementally, or run it to completion with [`ProgramState::run`].
//!
//! Binary operators pop `a` (the top) then `b` and push `b OP a`. Integer
//! arithmetic wraps on overflow.

pub mod context;
pub mod heap;
pub mod profile;
pub mod scope;
pub mod stack;
pub mod value;


pub use context::VmConfig;
pub use heap::{CellHandle, MAX_CELL_LEN};
pub use profile::ExecProfile;
pub use value::{StrHandle, Value};

use crate::debug;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{BinaryOp, Branch, CellKind, Instruction, Target, VarSlot};
use crate::virtual_machine::program::Program;
use context::CallFrame;
use heap::Heap;
use scope::Scope;
use stack::Stack;
use std::io::Write;

/// Where a run currently stands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Running,
    /// The instruction pointer ran off the end of the program.
    Halted(i32),
}

/// State of one program run.
pub struct ProgramState {
    program: Program,
    config: VmConfig,
    /// Instruction pointer.
    ip: usize,
    stack: Stack,
    heap: Heap,
    scope: Scope,
    call_stack: Vec<CallFrame>,
    /// Arena handle of each program string literal.
    literals: Vec<StrHandle>,
    steps: u64,
    profile: ExecProfile,
    status: Status,
    /// First error raised; every later step returns it again.
    failure: Option<VMError>,
}

impl ProgramState {
    /// Creates a fresh run of `program`.
    pub fn new(program: Program, config: VmConfig) -> Self {
        let mut heap = Heap::new();
        let literals = program.strings().iter().map(|s| heap.intern(s)).collect();
        let status = if program.is_empty() {
            Status::Halted(0)
        } else {
            Status::Running
        };

        Self {
            program,
            config,
            ip: 0,
            stack: Stack::new(config.stack_capacity),
            heap,
            scope: Scope::new(),
            call_stack: Vec::new(),
            literals,
            steps: 0,
            profile: ExecProfile::new(),
            status,
            failure: None,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Error that stopped the run, if any.
    pub fn failure(&self) -> Option<&VMError> {
        self.failure.as_ref()
    }

    /// Evaluation stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        self.stack.as_slice()
    }

    /// Number of executed instructions.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn profile(&self) -> &ExecProfile {
        &self.profile
    }

    /// Current block depth.
    pub fn scope_depth(&self) -> u32 {
        self.scope.depth()
    }

    /// Number of live variable slots.
    pub fn live_slots(&self) -> usize {
        self.scope.len()
    }

    /// Number of live heap cells.
    pub fn live_cells(&self) -> usize {
        self.heap.live_cells()
    }

    /// Number of distinct strings in the arena.
    pub fn interned_strings(&self) -> usize {
        self.heap.string_count()
    }

    /// Renders `value` the way `print` writes it.
    #[cfg(test)]
    fn render(&self, value: Value) -> Result<String, VMError> {
        match value {
            Value::Int(v) => Ok(v.to_string()),
            Value::Str(h) => self.heap.string(h).map(str::to_string),
        }
    }

    /// Runs until the program halts or fails, returning the exit code.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<i32, VMError> {
        loop {
            if let Status::Halted(code) = self.step(out)? {
                return Ok(code);
            }
        }
    }

    /// Executes a single instruction.
    ///
    /// Errors carry the source position of the failing instruction. Once a
    /// step has failed, every further step returns the same error.
    pub fn step<W: Write>(&mut self, out: &mut W) -> Result<Status, VMError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if let Status::Halted(_) = self.status {
            return Ok(self.status);
        }

        let current = self.ip;
        let result = self.fetch_and_exec(out);
        if let Err(err) = result {
            let err = match self.program.position(current) {
                Some(pos) => err.at(pos.line, pos.column),
                None => err,
            };
            self.failure = Some(err.clone());
            return Err(err);
        }

        if self.ip == self.program.len() {
            self.status = Status::Halted(0);
        }
        Ok(self.status)
    }

    fn fetch_and_exec<W: Write>(&mut self, out: &mut W) -> Result<(), VMError> {
        if let Some(limit) = self.config.max_steps
            && self.steps >= limit
        {
            return Err(VMError::StepLimitExceeded { limit });
        }

        let instruction = *self.program.get(self.ip).ok_or(VMError::InvalidJump {
            target: self.ip as i64,
            len: self.program.len(),
        })?;
        debug!(
            "{:>4}  {:<24} depth={} stack={}",
            self.ip,
            instruction.to_string(),
            self.scope.depth(),
            self.stack.len()
        );

        self.steps += 1;
        self.profile.record(instruction.category());
        self.ip += 1;
        self.exec(instruction, out)?;

        if self.heap.wants_sweep() {
            self.sweep_strings();
        }
        Ok(())
    }

    /// Frees arena strings no longer held by the stack, a variable or a literal.
    fn sweep_strings(&mut self) {
        let live = self
            .stack
            .as_slice()
            .iter()
            .copied()
            .chain(self.scope.values())
            .filter_map(|v| match v {
                Value::Str(h) => Some(h),
                Value::Int(_) => None,
            })
            .chain(self.literals.iter().copied());
        let freed = self.heap.sweep_strings(live);
        debug!(
            "string sweep freed {} string(s), {} live",
            freed,
            self.heap.string_count()
        );
    }

    fn exec<W: Write>(&mut self, instruction: Instruction, out: &mut W) -> Result<(), VMError> {
        let instr = instruction.mnemonic();
        match instruction {
            Instruction::PushInt(v) => self.stack.push(Value::Int(v)),
            Instruction::PushStr(id) => self.op_push_str(instr, id),
            Instruction::Binary(op) => self.op_binary(instr, op),
            Instruction::Not => self.op_not(instr),
            Instruction::Prev => self.op_prev(instr),
            Instruction::If { test, on_false } => {
                if test {
                    self.op_test(instr, on_false)
                } else {
                    Ok(())
                }
            }
            Instruction::Then { on_false } => self.op_test(instr, on_false),
            Instruction::Elif { exit } | Instruction::Else { exit } => {
                self.op_leave_branch(instr, exit)
            }
            Instruction::EndIf => self.scope.leave(instr),
            Instruction::While => Ok(()),
            Instruction::Run { exit } => self.op_test(
                instr,
                Branch {
                    target: exit,
                    enter_scope: false,
                },
            ),
            Instruction::EndWhile { loop_start } => self.op_leave_branch(instr, loop_start),
            Instruction::Close(_) => Err(VMError::IllegalInstruction {
                instruction: instr,
                reason: "block close was never resolved",
            }),
            Instruction::Declare(slot) => self.op_declare(instr, slot),
            Instruction::Reassign(slot) => self.op_reassign(instr, slot),
            Instruction::Load(slot) => self.op_load(instr, slot),
            Instruction::Alloc(kind) => self.op_alloc(instr, kind),
            Instruction::Free => self.op_free(instr),
            Instruction::PGet => self.op_pget(instr),
            Instruction::PSet => self.op_pset(instr),
            Instruction::Print => self.op_print(instr, out, false),
            Instruction::PrintLn => self.op_print(instr, out, true),
            Instruction::Jump => self.op_jump(instr),
            Instruction::Macro { skip } => self.jump_to(skip),
            Instruction::Def => self.op_def(instr),
            Instruction::Call { entry } => self.op_call(entry),
            Instruction::Return => self.op_return(instr),
        }
    }

    /// Moves the instruction pointer to `target`. `len` itself halts the program.
    fn jump_to(&mut self, target: Target) -> Result<(), VMError> {
        if target.index() > self.program.len() {
            return Err(VMError::InvalidJump {
                target: target.index() as i64,
                len: self.program.len(),
            });
        }
        self.ip = target.index();
        Ok(())
    }

    fn op_push_str(&mut self, instr: &'static str, id: u32) -> Result<(), VMError> {
        let handle = *self
            .literals
            .get(id as usize)
            .ok_or(VMError::IllegalInstruction {
                instruction: instr,
                reason: "string literal is not in the pool",
            })?;
        self.stack.push(Value::Str(handle))
    }

    fn op_binary(&mut self, instr: &'static str, op: BinaryOp) -> Result<(), VMError> {
        let a = self.stack.pop(instr)?;
        let b = self.stack.pop(instr)?;

        let result = match (b, a) {
            (Value::Int(b), Value::Int(a)) => Value::Int(int_binary(op, b, a)?),
            (Value::Str(b), Value::Str(a)) => match op {
                BinaryOp::Add => {
                    let joined = format!("{}{}", self.heap.string(b)?, self.heap.string(a)?);
                    Value::Str(self.heap.intern_owned(joined))
                }
                BinaryOp::Eq => Value::from_bool(self.heap.string(b)? == self.heap.string(a)?),
                BinaryOp::Ne => Value::from_bool(self.heap.string(b)? != self.heap.string(a)?),
                _ => {
                    return Err(VMError::InvalidDataType {
                        instruction: instr,
                        actual: "Str".to_string(),
                    });
                }
            },
            (b, a) => {
                return Err(VMError::InvalidDataType {
                    instruction: instr,
                    actual: format!("{} and {}", b.type_name(), a.type_name()),
                });
            }
        };
        self.stack.push(result)
    }

    fn op_not(&mut self, instr: &'static str) -> Result<(), VMError> {
        let v = self.stack.pop_int(instr)?;
        self.stack.push(Value::from_bool(v == 0))
    }

    fn op_prev(&mut self, instr: &'static str) -> Result<(), VMError> {
        let offset = self.stack.pop_int(instr)?;
        let value = self.stack.peek_below(offset)?;
        self.stack.push(value)
    }

    /// Pops a branch condition. Nonzero enters the branch scope; zero takes `on_false`.
    fn op_test(&mut self, instr: &'static str, on_false: Branch) -> Result<(), VMError> {
        if self.stack.pop_int(instr)? != 0 {
            self.scope.enter();
            return Ok(());
        }
        if on_false.enter_scope {
            self.scope.enter();
        }
        self.jump_to(on_false.target)
    }

    fn op_leave_branch(&mut self, instr: &'static str, target: Target) -> Result<(), VMError> {
        self.scope.leave(instr)?;
        self.jump_to(target)
    }

    /// Absolute slot index of an existing variable.
    fn slot_index(&self, instr: &'static str, slot: VarSlot) -> Result<usize, VMError> {
        match slot {
            VarSlot::Global(i) => {
                if !self.call_stack.is_empty() && self.scope.depth_of(i) != Some(0) {
                    return Err(VMError::IllegalInstruction {
                        instruction: instr,
                        reason: "top-level variable is not live at depth 0",
                    });
                }
                Ok(i)
            }
            VarSlot::Local(i) => self.local_base(instr).map(|base| base + i),
        }
    }

    fn local_base(&self, instr: &'static str) -> Result<usize, VMError> {
        self.call_stack
            .last()
            .map(|frame| frame.base)
            .ok_or(VMError::IllegalInstruction {
                instruction: instr,
                reason: "macro-local variable outside a macro call",
            })
    }

    fn op_declare(&mut self, instr: &'static str, slot: VarSlot) -> Result<(), VMError> {
        let index = match slot {
            VarSlot::Global(i) => i,
            VarSlot::Local(i) => self.local_base(instr)? + i,
        };
        let value = self.stack.pop(instr)?;
        self.scope.declare(instr, index, value)
    }

    fn op_reassign(&mut self, instr: &'static str, slot: VarSlot) -> Result<(), VMError> {
        let index = self.slot_index(instr, slot)?;
        let value = self.stack.pop(instr)?;
        self.scope.set(instr, index, value)
    }

    fn op_load(&mut self, instr: &'static str, slot: VarSlot) -> Result<(), VMError> {
        let index = self.slot_index(instr, slot)?;
        let value = self.scope.get(instr, index)?;
        self.stack.push(value)
    }

    fn op_alloc(&mut self, instr: &'static str, kind: CellKind) -> Result<(), VMError> {
        let size = self.stack.pop_int(instr)?;
        let len = usize::try_from(size)
            .ok()
            .filter(|n| *n <= MAX_CELL_LEN)
            .ok_or_else(|| VMError::InvalidDataType {
                instruction: instr,
                actual: format!("cell size {size}"),
            })?;
        let handle = self.heap.alloc(kind, len);
        self.stack.push(Value::Int(handle.pack()))
    }

    fn op_free(&mut self, instr: &'static str) -> Result<(), VMError> {
        let handle = self.stack.pop_int(instr)?;
        self.heap.free(handle)
    }

    fn op_pget(&mut self, instr: &'static str) -> Result<(), VMError> {
        let index = self.stack.pop_int(instr)?;
        let handle = self.stack.pop_int(instr)?;
        let value = self.heap.load(handle, index)?;
        self.stack.push(value)
    }

    fn op_pset(&mut self, instr: &'static str) -> Result<(), VMError> {
        let value = self.stack.pop(instr)?;
        let index = self.stack.pop_int(instr)?;
        let handle = self.stack.pop_int(instr)?;
        self.heap.store(instr, handle, index, value)
    }

    fn op_print<W: Write>(
        &mut self,
        instr: &'static str,
        out: &mut W,
        newline: bool,
    ) -> Result<(), VMError> {
        let value = self.stack.pop(instr)?;
        let written = match value {
            Value::Int(v) => write!(out, "{v}"),
            Value::Str(h) => out.write_all(self.heap.string(h)?.as_bytes()),
        };
        written
            .and_then(|_| if newline { writeln!(out) } else { Ok(()) })
            .map_err(|e| VMError::Output(e.to_string()))
    }

    fn op_jump(&mut self, instr: &'static str) -> Result<(), VMError> {
        let target = self.stack.pop_int(instr)?;
        let len = self.program.len();
        match usize::try_from(target) {
            Ok(t) if t < len => {
                self.ip = t;
                Ok(())
            }
            _ => Err(VMError::InvalidJump { target, len }),
        }
    }

    fn op_call(&mut self, entry: Target) -> Result<(), VMError> {
        if self.call_stack.len() >= self.config.call_stack_capacity {
            return Err(VMError::StackOverflow {
                stack: "call",
                capacity: self.config.call_stack_capacity,
            });
        }
        self.call_stack.push(CallFrame {
            return_ip: self.ip,
            base: self.scope.len(),
        });
        self.jump_to(entry)
    }

    fn op_def(&mut self, instr: &'static str) -> Result<(), VMError> {
        if self.call_stack.is_empty() {
            return Err(VMError::IllegalInstruction {
                instruction: instr,
                reason: "macro body entered without a call",
            });
        }
        self.scope.enter();
        Ok(())
    }

    fn op_return(&mut self, instr: &'static str) -> Result<(), VMError> {
        let frame = self.call_stack.pop().ok_or(VMError::IllegalInstruction {
            instruction: instr,
            reason: "return without an active macro call",
        })?;
        self.scope.leave(instr)?;
        self.ip = frame.return_ip;
        Ok(())
    }
}

fn int_binary(op: BinaryOp, b: i64, a: i64) -> Result<i64, VMError> {
    Ok(match op {
        BinaryOp::Add => b.wrapping_add(a),
        BinaryOp::Sub => b.wrapping_sub(a),
        BinaryOp::Mul => b.wrapping_mul(a),
        BinaryOp::Div => {
            if a == 0 {
                return Err(VMError::DivisionByZero);
            }
            b.wrapping_div(a)
        }
        BinaryOp::Mod => {
            if a == 0 {
                return Err(VMError::DivisionByZero);
            }
            b.wrapping_rem(a)
        }
        BinaryOp::Eq => (b == a) as i64,
        BinaryOp::Ne => (b != a) as i64,
        BinaryOp::Gt => (b > a) as i64,
        BinaryOp::Lt => (b < a) as i64,
        BinaryOp::Ge => (b >= a) as i64,
        BinaryOp::Le => (b <= a) as i64,
        BinaryOp::And => (b != 0 && a != 0) as i64,
        BinaryOp::Or => (b != 0 || a != 0) as i64,
    })
}
