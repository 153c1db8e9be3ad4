use lantern_derive::Error;

/// Errors raised while compiling or executing a Lantern program.
///
/// Build and resolve failures are always [`VMError::SyntaxError`]; everything
/// else is raised by the execution engine. Errors leaving the public pipeline
/// are wrapped in [`VMError::Located`] with the offending source position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VMError {
    /// Unknown word, undeclared identifier, unbalanced block or malformed literal.
    #[error("syntax error: {message}")]
    SyntaxError { message: String },
    /// Evaluation stack or macro call stack is full.
    #[error("stack overflow: {stack} stack capacity of {capacity} exceeded")]
    StackOverflow {
        stack: &'static str,
        capacity: usize,
    },
    /// Pop on an empty evaluation stack.
    #[error("stack underflow: `{instruction}` found an empty stack")]
    StackUnderflow { instruction: &'static str },
    /// `prev` offset outside the current stack.
    #[error("invalid stack access: offset {offset} with {size} value(s) on the stack")]
    InvalidStackAccess { offset: i64, size: usize },
    /// Jump target outside the program.
    #[error("invalid jump: target {target} outside program of {len} instruction(s)")]
    InvalidJump { target: i64, len: usize },
    /// Operator applied to a value type it does not support.
    #[error("invalid data type: `{instruction}` cannot operate on {actual}")]
    InvalidDataType {
        instruction: &'static str,
        actual: String,
    },
    /// Heap handle that is stale, freed, unknown, or indexed out of range.
    #[error("invalid pointer {handle:#x}: {reason}")]
    InvalidPointer { handle: i64, reason: String },
    /// Instruction reached in a state it has no handler for.
    #[error("illegal instruction `{instruction}`: {reason}")]
    IllegalInstruction {
        instruction: &'static str,
        reason: &'static str,
    },
    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// The configured step budget ran out before the program halted.
    #[error("step limit of {limit} instruction(s) exceeded")]
    StepLimitExceeded { limit: u64 },
    /// Source file could not be read.
    #[error("io error: {path}: {source}")]
    IoError { path: String, source: String },
    /// Program output could not be written.
    #[error("output error: {0}")]
    Output(String),
    /// Any error tagged with the source position that caused it.
    #[error("{line}:{column}: {source}")]
    Located {
        line: usize,
        column: usize,
        source: Box<VMError>,
    },
}

impl VMError {
    /// Builds a [`VMError::SyntaxError`].
    pub fn syntax(message: impl Into<String>) -> Self {
        VMError::SyntaxError {
            message: message.into(),
        }
    }

    /// Tags the error with a source position. Already-located errors are kept as is.
    pub fn at(self, line: usize, column: usize) -> Self {
        match self {
            located @ VMError::Located { .. } => located,
            other => VMError::Located {
                line,
                column,
                source: Box::new(other),
            },
        }
    }

    /// Returns the underlying error, looking through [`VMError::Located`].
    pub fn root(&self) -> &VMError {
        match self {
            VMError::Located { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the source position attached to the error, if any.
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            VMError::Located { line, column, .. } => Some((*line, *column)),
            _ => None,
        }
    }

    /// Short name of the error kind, as shown in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self.root() {
            VMError::SyntaxError { .. } => "SyntaxError",
            VMError::StackOverflow { .. } => "StackOverflow",
            VMError::StackUnderflow { .. } => "StackUnderflow",
            VMError::InvalidStackAccess { .. } => "InvalidStackAccess",
            VMError::InvalidJump { .. } => "InvalidJump",
            VMError::InvalidDataType { .. } => "InvalidDataType",
            VMError::InvalidPointer { .. } => "InvalidPointer",
            VMError::IllegalInstruction { .. } => "IllegalInstruction",
            VMError::DivisionByZero => "DivisionByZero",
            VMError::StepLimitExceeded { .. } => "StepLimitExceeded",
            VMError::IoError { .. } => "IoError",
            VMError::Output(_) => "Output",
            VMError::Located { .. } => "Located",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn located_wraps_once() {
        let err = VMError::DivisionByZero.at(3, 7).at(9, 9);
        assert_eq!(err.position(), Some((3, 7)));
        assert_eq!(err.root(), &VMError::DivisionByZero);
        assert_eq!(err.to_string(), "3:7: division by zero");
    }

    #[test]
    fn kind_name_looks_through_location() {
        let err = VMError::syntax("unknown word `foo`").at(1, 1);
        assert_eq!(err.kind_name(), "SyntaxError");
    }

    #[test]
    fn display_interpolates_fields() {
        let err = VMError::StackOverflow {
            stack: "evaluation",
            capacity: 64,
        };
        assert_eq!(
            err.to_string(),
            "stack overflow: evaluation stack capacity of 64 exceeded"
        );
    }
}
