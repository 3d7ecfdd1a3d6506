pub mod ast;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod typeck;
#[cfg(test)]
mod tests;

pub use error::CompileError;

use statescript::Script;
use tracing::debug;

/// Pipeline switches.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Run the type checker before generating code.
    pub typecheck: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { typecheck: true }
    }
}

/// Compile ClearScript source to a StateScript script with default options.
/// `to_string()` on the result gives the script text.
pub fn compile(source: &str) -> Result<Script, CompileError> {
    compile_with(source, &CompileOptions::default())
}

pub fn compile_with(source: &str, options: &CompileOptions) -> Result<Script, CompileError> {
    let program = parse_source(source)?;
    if options.typecheck {
        typeck::check(&program)?;
    } else {
        debug!("type check skipped");
    }
    codegen::emit(&program)
}

/// Lex and parse only.
pub fn parse_source(source: &str) -> Result<ast::Program, CompileError> {
    let tokens = lexer::lex(source)?;
    debug!(tokens = tokens.len(), "lexed source");
    let program = parser::parse(source, tokens)?;
    debug!(statements = program.stmts.len(), "parsed program");
    Ok(program)
}
