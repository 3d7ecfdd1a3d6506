use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("operand stack underflow at line {0}")]
    StackUnderflow(usize),

    #[error("operand stack overflow (max {0})")]
    StackOverflow(usize),

    #[error("call depth exceeded (max {0})")]
    CallDepthExceeded(usize),

    #[error("unknown label: {0}")]
    UnknownLabel(String),

    #[error("type error: expected {expected}, got {got}")]
    TypeError {
        expected: &'static str,
        got: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("WAITFOR at line {0} would block forever")]
    Blocked(usize),

    #[error("max execution steps exceeded ({0})")]
    ExecutionLimitExceeded(u64),

    #[error("script error: {0}")]
    Script(#[from] statescript::ScriptError),
}
