use super::value::Value;
use crate::virtual_machine::errors::VMError;

/// Bounded evaluation stack.
///
/// Every pop takes the mnemonic of the instruction performing it so the
/// resulting error names the culprit.
pub(super) struct Stack {
    values: Vec<Value>,
    capacity: usize,
}

impl Stack {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.values.len()
    }

    pub(super) fn as_slice(&self) -> &[Value] {
        &self.values
    }

    /// Pushes `value`.
    ///
    /// Returns [`VMError::StackOverflow`] once the capacity is reached.
    pub(super) fn push(&mut self, value: Value) -> Result<(), VMError> {
        if self.values.len() >= self.capacity {
            return Err(VMError::StackOverflow {
                stack: "evaluation",
                capacity: self.capacity,
            });
        }
        self.values.push(value);
        Ok(())
    }

    /// Pops the top value.
    ///
    /// Returns [`VMError::StackUnderflow`] if the stack is empty.
    pub(super) fn pop(&mut self, instr: &'static str) -> Result<Value, VMError> {
        self.values
            .pop()
            .ok_or(VMError::StackUnderflow { instruction: instr })
    }

    /// Pops the top value, which must be an integer.
    ///
    /// Returns [`VMError::InvalidDataType`] if it is not.
    pub(super) fn pop_int(&mut self, instr: &'static str) -> Result<i64, VMError> {
        match self.pop(instr)? {
            Value::Int(v) => Ok(v),
            other => Err(VMError::InvalidDataType {
                instruction: instr,
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// Returns the value `offset` positions below the top (`0` is the top).
    ///
    /// Returns [`VMError::InvalidStackAccess`] for offsets outside the stack.
    pub(super) fn peek_below(&self, offset: i64) -> Result<Value, VMError> {
        let size = self.values.len();
        usize::try_from(offset)
            .ok()
            .filter(|n| *n < size)
            .map(|n| self.values[size - 1 - n])
            .ok_or(VMError::InvalidStackAccess { offset, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_lifo() {
        let mut stack = Stack::new(4);
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::Int(2)).unwrap();
        assert_eq!(stack.pop("t").unwrap(), Value::Int(2));
        assert_eq!(stack.pop_int("t").unwrap(), 1);
        assert_eq!(
            stack.pop("print"),
            Err(VMError::StackUnderflow {
                instruction: "print"
            })
        );
    }

    #[test]
    fn overflow_at_capacity() {
        let mut stack = Stack::new(2);
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::Int(2)).unwrap();
        assert_eq!(
            stack.push(Value::Int(3)),
            Err(VMError::StackOverflow {
                stack: "evaluation",
                capacity: 2
            })
        );
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn peek_below_bounds() {
        let mut stack = Stack::new(8);
        for v in [10, 20, 30] {
            stack.push(Value::Int(v)).unwrap();
        }
        assert_eq!(stack.peek_below(0).unwrap(), Value::Int(30));
        assert_eq!(stack.peek_below(2).unwrap(), Value::Int(10));
        assert_eq!(
            stack.peek_below(3),
            Err(VMError::InvalidStackAccess { offset: 3, size: 3 })
        );
        assert!(stack.peek_below(-1).is_err());
    }
}
