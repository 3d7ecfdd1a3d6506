use crate::ast::*;
use crate::error::CompileError;
use crate::lexer::{Token, TokenKind};

/// Parses a token stream produced by [`crate::lexer::lex`] from `source`.
///
/// `source` is only consulted for `raw` blocks, which are copied verbatim.
pub fn parse(source: &str, tokens: Vec<Token>) -> Result<Program, CompileError> {
    let mut parser = Parser::new(source, tokens);
    parser.parse_program()
}

struct Parser<'src> {
    source: &'src str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'src> Parser<'src> {
    fn new(source: &'src str, tokens: Vec<Token>) -> Self {
        let mut tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|t| !matches!(t.kind, TokenKind::Comment(_)))
            .collect();
        if !matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof) {
            let end = source.len();
            let (line, col) = tokens.last().map(|t| (t.line, t.col)).unwrap_or((1, 1));
            tokens.push(Token {
                kind: TokenKind::Eof,
                line,
                col,
                span: end..end,
            });
        }
        Parser {
            source,
            tokens,
            pos: 0,
        }
    }

    fn current(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn here(&self) -> Pos {
        let tok = self.current();
        Pos {
            line: tok.line,
            col: tok.col,
        }
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<Token, CompileError> {
        if self.check(expected) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("`{expected}`")))
        }
    }

    fn expect_ident(&mut self) -> Result<String, CompileError> {
        match self.peek() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn error(&self, msg: String) -> CompileError {
        let tok = self.current();
        CompileError::Parse {
            line: tok.line,
            col: tok.col,
            msg,
        }
    }

    fn error_at(&self, pos: Pos, msg: String) -> CompileError {
        CompileError::Parse {
            line: pos.line,
            col: pos.col,
            msg,
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        self.error(format!("expected {expected}, got {}", self.peek().describe()))
    }

    fn parse_program(&mut self) -> Result<Program, CompileError> {
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        Ok(Program { stmts })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CompileError> {
        let pos = self.here();
        let kind = match self.peek() {
            TokenKind::Const => self.parse_const()?,
            TokenKind::Int | TokenKind::Float => match self.parse_decl()? {
                Property::Scalar(decl) => StmtKind::Var(decl),
                Property::Array(decl) => StmtKind::Array(decl),
            },
            TokenKind::Function => StmtKind::Function(self.parse_function(&TokenKind::Function)?),
            TokenKind::Class | TokenKind::Struct => self.parse_aggregate()?,
            TokenKind::Label => {
                self.advance();
                self.expect(&TokenKind::Colon)?;
                StmtKind::Label(self.expect_ident()?)
            }
            TokenKind::Goto => self.parse_goto()?,
            TokenKind::If => self.parse_if()?,
            TokenKind::While => {
                self.advance();
                let condition = self.parse_paren_expr()?;
                let body = self.parse_block()?;
                StmtKind::While { condition, body }
            }
            TokenKind::For => self.parse_for()?,
            TokenKind::Switch => self.parse_switch()?,
            TokenKind::Return => {
                self.advance();
                self.expect(&TokenKind::Semi)?;
                StmtKind::Return
            }
            TokenKind::Raw => self.parse_raw()?,
            TokenKind::Kill
            | TokenKind::Wait
            | TokenKind::WaitFor
            | TokenKind::Thread
            | TokenKind::Set
            | TokenKind::Push
            | TokenKind::Pop
            | TokenKind::Peek
            | TokenKind::SpawnBot
            | TokenKind::MoveTo
            | TokenKind::Animate
            | TokenKind::Delete => self.parse_engine_op()?,
            _ => {
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::Semi)?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt { pos, kind })
    }

    fn parse_type(&mut self) -> Result<ScalarType, CompileError> {
        match self.peek() {
            TokenKind::Int => {
                self.advance();
                Ok(ScalarType::Int)
            }
            TokenKind::Float => {
                self.advance();
                Ok(ScalarType::Float)
            }
            _ => Err(self.unexpected("`int` or `float`")),
        }
    }

    fn parse_const(&mut self) -> Result<StmtKind, CompileError> {
        self.expect(&TokenKind::Const)?;
        let ty = self.parse_type()?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::Eq)?;
        let value = self.parse_expr()?;
        self.expect(&TokenKind::Semi)?;
        Ok(StmtKind::Var(VarDecl {
            ty,
            name,
            value: Some(value),
            is_const: true,
        }))
    }

    /// `int x;`, `float y = e;` or `int[] a = [..];`
    fn parse_decl(&mut self) -> Result<Property, CompileError> {
        let ty = self.parse_type()?;
        let is_array = if self.eat(&TokenKind::LBracket) {
            self.expect(&TokenKind::RBracket)?;
            true
        } else {
            false
        };
        let name = self.expect_ident()?;
        let value = if self.eat(&TokenKind::Eq) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semi)?;

        if is_array {
            Ok(Property::Array(ArrayDecl {
                elem_ty: ty,
                name,
                init: value,
            }))
        } else {
            Ok(Property::Scalar(VarDecl {
                ty,
                name,
                value,
                is_const: false,
            }))
        }
    }

    /// `function name(a, b) { .. }`, or `method name(..) { .. }` in a class.
    fn parse_function(&mut self, keyword: &TokenKind) -> Result<FunctionDecl, CompileError> {
        let pos = self.here();
        self.expect(keyword)?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if !params.is_empty() {
                self.expect(&TokenKind::Comma)?;
            }
            params.push(self.expect_ident()?);
        }
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(FunctionDecl {
            pos,
            name,
            params,
            body,
        })
    }

    fn parse_aggregate(&mut self) -> Result<StmtKind, CompileError> {
        let kind = match self.advance().kind {
            TokenKind::Class => AggregateKind::Class,
            _ => AggregateKind::Struct,
        };
        let name = self.expect_ident()?;
        self.expect(&TokenKind::LBrace)?;

        let mut properties = Vec::new();
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            match self.peek() {
                TokenKind::Method if kind == AggregateKind::Class => {
                    methods.push(self.parse_function(&TokenKind::Method)?);
                }
                TokenKind::Int | TokenKind::Float => properties.push(self.parse_decl()?),
                _ if kind == AggregateKind::Class => {
                    return Err(self.unexpected("property or method"));
                }
                _ => return Err(self.unexpected("property")),
            }
        }
        self.expect(&TokenKind::RBrace)?;

        Ok(StmtKind::Aggregate(Aggregate {
            kind,
            name,
            properties,
            methods,
        }))
    }

    /// `goto name;` or `goto name if (cond);`
    fn parse_goto(&mut self) -> Result<StmtKind, CompileError> {
        self.expect(&TokenKind::Goto)?;
        let label = self.expect_ident()?;
        let condition = if self.eat(&TokenKind::If) {
            Some(self.parse_paren_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semi)?;
        Ok(StmtKind::Goto { label, condition })
    }

    fn parse_if(&mut self) -> Result<StmtKind, CompileError> {
        self.expect(&TokenKind::If)?;
        let condition = self.parse_paren_expr()?;
        let then_body = self.parse_block()?;
        let else_body = if self.eat(&TokenKind::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(StmtKind::If {
            condition,
            then_body,
            else_body,
        })
    }

    fn parse_for(&mut self) -> Result<StmtKind, CompileError> {
        self.expect(&TokenKind::For)?;
        self.expect(&TokenKind::LParen)?;

        let init = match self.peek() {
            TokenKind::Semi => None,
            TokenKind::Int | TokenKind::Float => {
                let ty = self.parse_type()?;
                let name = self.expect_ident()?;
                let value = if self.eat(&TokenKind::Eq) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Some(ForInit::Decl(VarDecl {
                    ty,
                    name,
                    value,
                    is_const: false,
                }))
            }
            _ => Some(ForInit::Expr(self.parse_expr()?)),
        };
        self.expect(&TokenKind::Semi)?;

        let condition = if self.check(&TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::Semi)?;

        let step = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::RParen)?;

        let body = self.parse_block()?;
        Ok(StmtKind::For {
            init,
            condition,
            step,
            body,
        })
    }

    fn parse_switch(&mut self) -> Result<StmtKind, CompileError> {
        self.expect(&TokenKind::Switch)?;
        let scrutinee = self.parse_paren_expr()?;
        self.expect(&TokenKind::LBrace)?;

        let mut cases = Vec::new();
        let mut default = None;
        loop {
            match self.peek() {
                TokenKind::Case => {
                    let pos = self.here();
                    self.advance();
                    let value = self.parse_expr()?;
                    self.expect(&TokenKind::Colon)?;
                    let body = self.parse_case_body()?;
                    cases.push(Case { pos, value, body });
                }
                TokenKind::Default => {
                    self.advance();
                    self.expect(&TokenKind::Colon)?;
                    default = Some(self.parse_case_body()?);
                }
                TokenKind::RBrace => break,
                _ => return Err(self.unexpected("`case`, `default` or `}`")),
            }
        }
        self.expect(&TokenKind::RBrace)?;

        Ok(StmtKind::Switch {
            scrutinee,
            cases,
            default,
        })
    }

    /// Statements up to the next label of the switch; `break;` ends the list.
    fn parse_case_body(&mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Case | TokenKind::Default | TokenKind::RBrace => break,
                TokenKind::Break => {
                    self.advance();
                    self.expect(&TokenKind::Semi)?;
                    break;
                }
                TokenKind::Eof => return Err(self.unexpected("`}`")),
                _ => body.push(self.parse_stmt()?),
            }
        }
        Ok(body)
    }

    /// `raw { ... }`: the source between the outer braces, line by line.
    fn parse_raw(&mut self) -> Result<StmtKind, CompileError> {
        self.expect(&TokenKind::Raw)?;
        let open = self.expect(&TokenKind::LBrace)?;
        let mut depth = 1usize;
        let close = loop {
            let tok = self.advance();
            match tok.kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        break tok;
                    }
                }
                TokenKind::Eof => {
                    return Err(self.error("expected `}` closing raw block, got end of input".into()))
                }
                _ => {}
            }
        };

        let text = &self.source[open.span.end..close.span.start];
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Ok(StmtKind::Raw(lines))
    }

    fn parse_engine_op(&mut self) -> Result<StmtKind, CompileError> {
        let keyword = self.advance();
        let pos = Pos {
            line: keyword.line,
            col: keyword.col,
        };
        self.expect(&TokenKind::LParen)?;

        let kind = match keyword.kind {
            TokenKind::Kill => StmtKind::Kill,
            TokenKind::Wait => {
                let time = self.parse_expr()?;
                let var = if self.eat(&TokenKind::Comma) {
                    Some(self.expect_ident()?)
                } else {
                    None
                };
                StmtKind::Wait { time, var }
            }
            TokenKind::WaitFor => StmtKind::WaitFor(self.parse_expr()?),
            TokenKind::Thread => {
                let label = self.expect_ident()?;
                let mut args = Vec::new();
                while self.eat(&TokenKind::Comma) {
                    args.push(self.parse_expr()?);
                }
                StmtKind::Thread { label, args }
            }
            TokenKind::Set => {
                let name = self.expect_ident()?;
                self.expect(&TokenKind::Comma)?;
                let value = self.parse_expr()?;
                StmtKind::Set { name, value }
            }
            TokenKind::Push => StmtKind::Push(self.parse_expr()?),
            TokenKind::Pop => StmtKind::Pop(self.expect_ident()?),
            TokenKind::Peek => StmtKind::Peek(self.expect_ident()?),
            builtin => {
                let args = self.parse_args()?;
                self.expect(&TokenKind::RParen)?;
                self.expect(&TokenKind::Semi)?;
                return self.builtin(&builtin, pos, args);
            }
        };

        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::Semi)?;
        Ok(kind)
    }

    /// Comma separated expressions up to (not including) `)`.
    fn parse_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if !args.is_empty() {
                self.expect(&TokenKind::Comma)?;
            }
            args.push(self.parse_expr()?);
        }
        Ok(args)
    }

    fn builtin(
        &self,
        keyword: &TokenKind,
        pos: Pos,
        args: Vec<Expr>,
    ) -> Result<StmtKind, CompileError> {
        let count = args.len();
        let kind = match keyword {
            TokenKind::SpawnBot if count >= 2 && count % 2 == 0 => {
                let mut args = args.into_iter();
                match (args.next(), args.next()) {
                    (Some(template), Some(location)) => Some(StmtKind::SpawnBot {
                        template,
                        location,
                        attributes: args.collect(),
                    }),
                    _ => None,
                }
            }
            TokenKind::MoveTo => <[Expr; 2]>::try_from(args)
                .ok()
                .map(|[prop, location]| StmtKind::MoveTo { prop, location }),
            TokenKind::Animate => <[Expr; 3]>::try_from(args)
                .ok()
                .map(|[prop, location, time]| StmtKind::Animate {
                    prop,
                    location,
                    time,
                }),
            TokenKind::Delete => <[Expr; 1]>::try_from(args)
                .ok()
                .map(|[prop]| StmtKind::Delete(prop)),
            _ => None,
        };

        kind.ok_or_else(|| {
            let shape = match keyword {
                TokenKind::SpawnBot => "a template, a location and attribute/value pairs",
                TokenKind::MoveTo => "a prop and a location",
                TokenKind::Animate => "a prop, a location and a time",
                _ => "a prop",
            };
            self.error_at(
                pos,
                format!("`{keyword}` expects {shape}, got {count} argument(s)"),
            )
        })
    }

    fn parse_paren_expr(&mut self) -> Result<Expr, CompileError> {
        self.expect(&TokenKind::LParen)?;
        let expr = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        Ok(expr)
    }

    // Expressions, loosest binding first.

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, CompileError> {
        let condition = self.parse_or()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(condition);
        }
        let then_value = self.parse_expr()?;
        self.expect(&TokenKind::Colon)?;
        let else_value = self.parse_expr()?;
        Ok(Expr {
            pos: condition.pos,
            kind: ExprKind::Ternary {
                condition: Box::new(condition),
                then_value: Box::new(then_value),
                else_value: Box::new(else_value),
            },
        })
    }

    fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr {
            pos: left.pos,
            kind: ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        }
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.parse_and()?;
            left = Self::binary(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.parse_equality()?;
            left = Self::binary(BinOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::BangEq => BinOp::Neq,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::LtEq => BinOp::Lte,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::GtEq => BinOp::Gte,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek() {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::PlusPlus => UnaryOp::PreInc,
            TokenKind::MinusMinus => UnaryOp::PreDec,
            _ => return self.parse_postfix(),
        };
        let pos = self.here();
        self.advance();
        let expr = self.parse_unary()?;
        Ok(Expr {
            pos,
            kind: ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;
        loop {
            let pos = expr.pos;
            let kind = match self.peek() {
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    ExprKind::Index {
                        array: Box::new(expr),
                        index: Box::new(index),
                    }
                }
                TokenKind::Dot => {
                    self.advance();
                    let member = self.expect_ident()?;
                    ExprKind::Member {
                        object: Box::new(expr),
                        member,
                    }
                }
                TokenKind::LParen => {
                    let ExprKind::Ident(name) = expr.kind else {
                        return Err(self.error("only named functions can be called".into()));
                    };
                    self.advance();
                    let args = self.parse_args()?;
                    self.expect(&TokenKind::RParen)?;
                    ExprKind::Call { name, args }
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let op = match self.advance().kind {
                        TokenKind::PlusPlus => UnaryOp::PostInc,
                        _ => UnaryOp::PostDec,
                    };
                    ExprKind::Unary {
                        op,
                        expr: Box::new(expr),
                    }
                }
                _ => break,
            };
            expr = Expr { pos, kind };
        }

        if self.check(&TokenKind::Eq) {
            let ExprKind::Ident(target) = expr.kind else {
                return Err(self.error_at(expr.pos, "invalid assignment target".into()));
            };
            self.advance();
            let value = self.parse_expr()?;
            expr = Expr {
                pos: expr.pos,
                kind: ExprKind::Assign {
                    target,
                    value: Box::new(value),
                },
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let pos = self.here();
        let kind = match self.peek().clone() {
            TokenKind::IntLit(n) => ExprKind::Int(n),
            TokenKind::FloatLit(n) => ExprKind::Float(n),
            TokenKind::StringLit(s) => ExprKind::Str(s),
            TokenKind::Ident(name) => ExprKind::Ident(name),
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    if !elements.is_empty() {
                        self.expect(&TokenKind::Comma)?;
                    }
                    elements.push(self.parse_expr()?);
                }
                self.expect(&TokenKind::RBracket)?;
                return Ok(Expr {
                    pos,
                    kind: ExprKind::Array(elements),
                });
            }
            TokenKind::LParen => return self.parse_paren_expr(),
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        Ok(Expr { pos, kind })
    }
}
