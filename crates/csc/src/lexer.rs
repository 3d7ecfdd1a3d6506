use std::fmt;
use std::ops::Range;

use logos::Logos;

use statescript::float_text;

use crate::error::{CompileError, LexErrorKind};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexErrorKind)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum TokenKind {
    // Keywords
    #[token("int")]
    Int,
    #[token("float")]
    Float,
    #[token("function")]
    Function,
    #[token("goto")]
    Goto,
    #[token("label")]
    Label,
    #[token("do")]
    Do,
    #[token("in")]
    In,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("return")]
    Return,
    #[token("wait")]
    Wait,
    #[token("waitfor")]
    WaitFor,
    #[token("kill")]
    Kill,
    #[token("thread")]
    Thread,
    #[token("set")]
    Set,
    #[token("push")]
    Push,
    #[token("pop")]
    Pop,
    #[token("peek")]
    Peek,
    #[token("spawnbot")]
    SpawnBot,
    #[token("moveto")]
    MoveTo,
    #[token("animate")]
    Animate,
    #[token("delete")]
    Delete,
    #[token("raw")]
    Raw,
    #[token("class")]
    Class,
    #[token("struct")]
    Struct,
    #[token("method")]
    Method,
    #[token("this")]
    This,
    #[token("new")]
    New,
    #[token("for")]
    For,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("break")]
    Break,
    #[token("default")]
    Default,
    #[token("const")]
    Const,
    #[token("enum")]
    Enum,
    #[token("auto")]
    Auto,

    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().map_err(|_| LexErrorKind::InvalidNumber))]
    IntLit(i64),
    #[regex(r"[0-9]+\.[0-9]*", |lex| lex.slice().parse::<f64>().map_err(|_| LexErrorKind::InvalidNumber))]
    FloatLit(f64),
    #[token("\"", |lex| string_body(lex, '"'))]
    #[token("'", |lex| string_body(lex, '\''))]
    StringLit(String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"//[^\n]*", |lex| lex.slice()[2..].trim().to_string())]
    #[token("/*", block_comment)]
    Comment(String),

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("=")]
    Eq,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // Punctuation
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token(".")]
    Dot,
    #[token("?")]
    Question,

    /// Appended once by [`lex`]; never matched.
    Eof,
}

/// Scans a string literal after its opening quote.
fn string_body(lex: &mut logos::Lexer<TokenKind>, quote: char) -> Result<String, LexErrorKind> {
    let mut out = String::new();
    let mut chars = lex.remainder().char_indices();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            lex.bump(i + c.len_utf8());
            return Ok(out);
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some((_, 'n')) => out.push('\n'),
            Some((_, 't')) => out.push('\t'),
            Some((_, other)) => out.push(other),
            None => break,
        }
    }
    lex.bump(lex.remainder().len());
    Err(LexErrorKind::UnterminatedString)
}

fn block_comment(lex: &mut logos::Lexer<TokenKind>) -> Result<String, LexErrorKind> {
    match lex.remainder().find("*/") {
        Some(end) => {
            let text = lex.remainder()[..end].trim().to_string();
            lex.bump(end + 2);
            Ok(text)
        }
        None => {
            lex.bump(lex.remainder().len());
            Err(LexErrorKind::UnterminatedComment)
        }
    }
}

fn escape(s: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in s.chars() {
        match c {
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            c => write!(f, "{c}")?,
        }
    }
    Ok(())
}

/// Canonical source text. Relexing the rendering of a token stream yields
/// the same kinds.
impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Int => "int",
            TokenKind::Float => "float",
            TokenKind::Function => "function",
            TokenKind::Goto => "goto",
            TokenKind::Label => "label",
            TokenKind::Do => "do",
            TokenKind::In => "in",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::Return => "return",
            TokenKind::Wait => "wait",
            TokenKind::WaitFor => "waitfor",
            TokenKind::Kill => "kill",
            TokenKind::Thread => "thread",
            TokenKind::Set => "set",
            TokenKind::Push => "push",
            TokenKind::Pop => "pop",
            TokenKind::Peek => "peek",
            TokenKind::SpawnBot => "spawnbot",
            TokenKind::MoveTo => "moveto",
            TokenKind::Animate => "animate",
            TokenKind::Delete => "delete",
            TokenKind::Raw => "raw",
            TokenKind::Class => "class",
            TokenKind::Struct => "struct",
            TokenKind::Method => "method",
            TokenKind::This => "this",
            TokenKind::New => "new",
            TokenKind::For => "for",
            TokenKind::Switch => "switch",
            TokenKind::Case => "case",
            TokenKind::Break => "break",
            TokenKind::Default => "default",
            TokenKind::Const => "const",
            TokenKind::Enum => "enum",
            TokenKind::Auto => "auto",
            TokenKind::IntLit(n) => return write!(f, "{n}"),
            TokenKind::FloatLit(n) => return f.write_str(&float_text(*n)),
            TokenKind::StringLit(s) => {
                f.write_str("\"")?;
                escape(s, f)?;
                return f.write_str("\"");
            }
            TokenKind::Ident(s) => s,
            TokenKind::Comment(s) => return write!(f, "/* {s} */"),
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::EqEq => "==",
            TokenKind::BangEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::LtEq => "<=",
            TokenKind::Gt => ">",
            TokenKind::GtEq => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::Eq => "=",
            TokenKind::PlusPlus => "++",
            TokenKind::MinusMinus => "--",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Semi => ";",
            TokenKind::Dot => ".",
            TokenKind::Question => "?",
            TokenKind::Eof => "",
        };
        f.write_str(text)
    }
}

impl TokenKind {
    /// How the token reads in a diagnostic.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier `{name}`"),
            TokenKind::IntLit(_) | TokenKind::FloatLit(_) => format!("number `{self}`"),
            TokenKind::StringLit(_) => format!("string {self}"),
            TokenKind::Comment(_) => "comment".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("`{other}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
    pub span: Range<usize>,
}

/// Byte offsets of line starts, for offset -> (line, col) lookups.
struct LineIndex<'a> {
    source: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        LineIndex { source, starts }
    }

    fn position(&self, offset: usize) -> (usize, usize) {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let col = self.source[self.starts[line]..offset].chars().count() + 1;
        (line + 1, col)
    }
}

pub fn lex(source: &str) -> Result<Vec<Token>, CompileError> {
    let index = LineIndex::new(source);
    let mut tokens = Vec::new();
    let mut lexer = TokenKind::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let (line, col) = index.position(span.start);
        match result {
            Ok(kind) => tokens.push(Token {
                kind,
                line,
                col,
                span,
            }),
            Err(kind) => {
                let kind = match kind {
                    LexErrorKind::UnexpectedCharacter(_) => LexErrorKind::UnexpectedCharacter(
                        lexer.slice().chars().next().unwrap_or('\0'),
                    ),
                    other => other,
                };
                return Err(CompileError::Lex { kind, line, col });
            }
        }
    }

    let (line, col) = index.position(source.len());
    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
        col,
        span: source.len()..source.len(),
    });
    Ok(tokens)
}
