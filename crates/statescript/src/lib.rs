pub mod expr;
pub mod instr;
pub mod script;
pub mod value;

pub use expr::{BinOp, Expr, UnaryOp};
pub use instr::{Guard, Instr, Operand};
pub use script::{Line, Script, ScriptError};
pub use value::{float_text, Value};
