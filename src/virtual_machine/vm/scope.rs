use super::value::Value;
use crate::virtual_machine::errors::VMError;

/// Flat array of variable slots, each tagged with the block depth that owns it.
///
/// Leaving a block evicts every slot of the departing depth. Slots are only
/// ever appended and evicted at the end, so indices resolved at build time
/// stay valid for the lifetime of the slot.
pub(super) struct Scope {
    slots: Vec<(Value, u32)>,
    depth: u32,
}

impl Scope {
    pub(super) fn new() -> Self {
        Self {
            slots: Vec::new(),
            depth: 0,
        }
    }

    pub(super) fn depth(&self) -> u32 {
        self.depth
    }

    pub(super) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(super) fn enter(&mut self) {
        self.depth += 1;
    }

    /// Evicts the slots of the current depth and returns to the enclosing one.
    pub(super) fn leave(&mut self, instr: &'static str) -> Result<(), VMError> {
        if self.depth == 0 {
            return Err(VMError::IllegalInstruction {
                instruction: instr,
                reason: "no open scope to leave",
            });
        }
        while self.slots.last().is_some_and(|(_, d)| *d == self.depth) {
            self.slots.pop();
        }
        self.depth -= 1;
        Ok(())
    }

    /// Values of every live slot.
    pub(super) fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.slots.iter().map(|(v, _)| *v)
    }

    /// Depth of the slot at `index`, if it is live.
    pub(super) fn depth_of(&self, index: usize) -> Option<u32> {
        self.slots.get(index).map(|(_, d)| *d)
    }

    /// Creates slot `index` at the current depth. It must be the next free slot.
    pub(super) fn declare(
        &mut self,
        instr: &'static str,
        index: usize,
        value: Value,
    ) -> Result<(), VMError> {
        if index != self.slots.len() {
            return Err(VMError::IllegalInstruction {
                instruction: instr,
                reason: "declaration does not match the live scope",
            });
        }
        self.slots.push((value, self.depth));
        Ok(())
    }

    pub(super) fn get(&self, instr: &'static str, index: usize) -> Result<Value, VMError> {
        self.slots
            .get(index)
            .map(|(v, _)| *v)
            .ok_or(VMError::IllegalInstruction {
                instruction: instr,
                reason: "variable slot is not live",
            })
    }

    pub(super) fn set(
        &mut self,
        instr: &'static str,
        index: usize,
        value: Value,
    ) -> Result<(), VMError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(VMError::IllegalInstruction {
                instruction: instr,
                reason: "variable slot is not live",
            })?;
        slot.0 = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leave_evicts_only_departing_depth() {
        let mut scope = Scope::new();
        scope.declare("=", 0, Value::Int(1)).unwrap();
        scope.enter();
        scope.declare("=", 1, Value::Int(2)).unwrap();
        scope.enter();
        scope.leave("end").unwrap();
        assert_eq!(scope.len(), 2);
        scope.leave("end").unwrap();
        assert_eq!(scope.len(), 1);
        assert_eq!(scope.depth(), 0);
        assert_eq!(scope.get("x", 0).unwrap(), Value::Int(1));
    }

    #[test]
    fn declaration_must_be_next_slot() {
        let mut scope = Scope::new();
        assert!(matches!(
            scope.declare("=", 1, Value::Int(0)),
            Err(VMError::IllegalInstruction { .. })
        ));
    }

    #[test]
    fn leave_at_top_level_fails() {
        let mut scope = Scope::new();
        assert!(scope.leave("end").is_err());
    }

    #[test]
    fn set_and_get() {
        let mut scope = Scope::new();
        scope.declare("=", 0, Value::Int(1)).unwrap();
        scope.set("=", 0, Value::Int(5)).unwrap();
        assert_eq!(scope.get("x", 0).unwrap(), Value::Int(5));
        assert_eq!(scope.depth_of(0), Some(0));
        assert!(scope.get("x", 1).is_err());
    }
}
