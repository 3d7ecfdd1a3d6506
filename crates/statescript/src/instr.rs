use serde::{Deserialize, Serialize};
use std::fmt;

use crate::expr::Expr;
use crate::value::Value;

/// An instruction argument.
///
/// Values and names print bare; composite expressions print inside braces
/// so the engine's embedded evaluator picks them up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Value(Value),
    Name(String),
    Expr(Expr),
}

impl Operand {
    /// Wrap an expression, keeping atoms bare.
    pub fn from_expr(expr: Expr) -> Operand {
        match expr {
            Expr::Value(v) => Operand::Value(v),
            Expr::Name(n) => Operand::Name(n),
            other => Operand::Expr(other),
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(v) => write!(f, "{v}"),
            Operand::Name(n) => write!(f, "{n}"),
            Operand::Expr(e) => write!(f, "{{{e}}}"),
        }
    }
}

/// A condition. Always printed inside braces, even for a bare name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guard(pub Expr);

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0)
    }
}

/// StateScript instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    /// Load-time binding of a state slot.
    Init { name: String, value: Operand },

    /// Run-time assignment of a state slot.
    Set { name: String, value: Operand },

    /// Jump to a label, optionally only when the guard holds.
    Goto { label: String, guard: Option<Guard> },

    /// Call a label when the guard holds; `RETURN` resumes after it.
    CallIf { label: String, guard: Guard },

    /// Call a label; `RETURN` resumes after it.
    Call { label: String },

    Return,

    /// Terminate the running script.
    Kill,

    /// Sleep; the engine may store the time actually waited in `var`.
    Wait { time: Operand, var: Option<String> },

    /// Block until the guard holds.
    WaitFor { guard: Guard },

    /// Start a label on a new thread with the given arguments.
    Thread { label: String, args: Vec<Operand> },

    // Operand stack
    Push(Operand),
    Pop(String),
    Peek(String),

    Inc(String),
    Dec(String),

    // Engine built-ins
    SpawnBot {
        template: Operand,
        location: Operand,
        attributes: Vec<Operand>,
    },
    MoveTo {
        prop: Operand,
        location: Operand,
    },
    Animate {
        prop: Operand,
        location: Operand,
        time: Operand,
    },
    Delete {
        prop: Operand,
    },
}

impl Instr {
    /// The instruction keyword as it appears in script text.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instr::Init { .. } => "INIT",
            Instr::Set { .. } => "SET",
            Instr::Goto { .. } => "GOTO",
            Instr::CallIf { .. } => "CALLIF",
            Instr::Call { .. } => "CALL",
            Instr::Return => "RETURN",
            Instr::Kill => "KILL",
            Instr::Wait { .. } => "WAIT",
            Instr::WaitFor { .. } => "WAITFOR",
            Instr::Thread { .. } => "THREAD",
            Instr::Push(_) => "PUSH",
            Instr::Pop(_) => "POP",
            Instr::Peek(_) => "PEEK",
            Instr::Inc(_) => "INC",
            Instr::Dec(_) => "DEC",
            Instr::SpawnBot { .. } => "SPAWNBOT",
            Instr::MoveTo { .. } => "MOVETO",
            Instr::Animate { .. } => "ANIMATE",
            Instr::Delete { .. } => "DELETE",
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Operand]) -> fmt::Result {
    for item in items {
        write!(f, " {item}")?;
    }
    Ok(())
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.mnemonic();
        match self {
            Instr::Init { name, value } | Instr::Set { name, value } => {
                write!(f, "{m} {name} {value}")
            }
            Instr::Goto { label, guard } => match guard {
                Some(g) => write!(f, "{m} {label} {g}"),
                None => write!(f, "{m} {label}"),
            },
            Instr::CallIf { label, guard } => write!(f, "{m} {label} {guard}"),
            Instr::Call { label } => write!(f, "{m} {label}"),
            Instr::Return | Instr::Kill => write!(f, "{m}"),
            Instr::Wait { time, var } => match var {
                Some(v) => write!(f, "{m} {time} {v}"),
                None => write!(f, "{m} {time}"),
            },
            Instr::WaitFor { guard } => write!(f, "{m} {guard}"),
            Instr::Thread { label, args } => {
                write!(f, "{m} {label}")?;
                write_list(f, args)
            }
            Instr::Push(value) => write!(f, "{m} {value}"),
            Instr::Pop(name) | Instr::Peek(name) | Instr::Inc(name) | Instr::Dec(name) => {
                write!(f, "{m} {name}")
            }
            Instr::SpawnBot {
                template,
                location,
                attributes,
            } => {
                write!(f, "{m} {template} {location}")?;
                write_list(f, attributes)
            }
            Instr::MoveTo { prop, location } => write!(f, "{m} {prop} {location}"),
            Instr::Animate {
                prop,
                location,
                time,
            } => write!(f, "{m} {prop} {location} {time}"),
            Instr::Delete { prop } => write!(f, "{m} {prop}"),
        }
    }
}
