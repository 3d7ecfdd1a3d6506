use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::ast::*;
use crate::error::{CompileError, TypeError, TypeErrorKind, TypeErrors};

/// Static type checking pass.
///
/// Collects every error it finds; the pipeline fails if there is at least
/// one. Arguments of engine operations that name engine entities (props,
/// templates, locations, thread labels) are not checked.
pub fn check(program: &Program) -> Result<(), CompileError> {
    let mut checker = TypeChecker::default();
    checker.check_block(&program.stmts);
    debug!(
        symbols = checker.symbols.len(),
        errors = checker.errors.len(),
        "type check finished"
    );
    if checker.errors.is_empty() {
        Ok(())
    } else {
        Err(CompileError::Type(TypeErrors(checker.errors)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Int,
    Float,
    Str,
    Array(Box<Type>),
    /// Parameters and stack-bound names; compatible with everything.
    Unknown,
}

impl Type {
    fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float | Type::Unknown)
    }

    /// Whether a value of type `value` may be stored in a slot of this type.
    fn accepts(&self, value: &Type) -> bool {
        match (self, value) {
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            (Type::Float, Type::Int) => true,
            (target, value) => target == value,
        }
    }
}

impl From<ScalarType> for Type {
    fn from(ty: ScalarType) -> Self {
        match ty {
            ScalarType::Int => Type::Int,
            ScalarType::Float => Type::Float,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Str => write!(f, "string"),
            Type::Array(elem) => write!(f, "{elem}[]"),
            Type::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Default)]
struct TypeChecker {
    symbols: HashMap<String, Type>,
    errors: Vec<TypeError>,
}

impl TypeChecker {
    fn error(&mut self, kind: TypeErrorKind, pos: Pos, msg: String) {
        self.errors.push(TypeError {
            kind,
            line: pos.line,
            msg,
        });
    }

    /// Registers a name bound at run time by the stack or the engine.
    fn bind_unknown(&mut self, name: &str) {
        self.symbols
            .entry(name.to_string())
            .or_insert(Type::Unknown);
    }

    fn check_block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_var(&mut self, decl: &VarDecl, pos: Pos) {
        let ty = Type::from(decl.ty);
        if let Some(value) = &decl.value {
            let value_ty = self.infer(value);
            if !ty.accepts(&value_ty) {
                self.error(
                    TypeErrorKind::IncompatibleType,
                    pos,
                    format!(
                        "cannot initialize `{}` of type `{ty}` with a value of type `{value_ty}`",
                        decl.name
                    ),
                );
            }
        }
        self.symbols.insert(decl.name.clone(), ty);
    }

    fn check_array(&mut self, decl: &ArrayDecl, pos: Pos) {
        let elem = Type::from(decl.elem_ty);
        match decl.init.as_ref().map(|e| &e.kind) {
            Some(ExprKind::Array(elements)) => {
                for element in elements {
                    let ty = self.infer(element);
                    if !elem.accepts(&ty) {
                        self.error(
                            TypeErrorKind::IncompatibleType,
                            element.pos,
                            format!("array element of type `{ty}` in `{elem}[]` `{}`", decl.name),
                        );
                    }
                }
            }
            Some(_) => {
                let target = Type::Array(Box::new(elem.clone()));
                if let Some(init) = &decl.init {
                    let ty = self.infer(init);
                    if !target.accepts(&ty) {
                        self.error(
                            TypeErrorKind::IncompatibleType,
                            pos,
                            format!(
                                "cannot initialize `{}` of type `{target}` with a value of type `{ty}`",
                                decl.name
                            ),
                        );
                    }
                }
            }
            None => {}
        }
        self.symbols
            .insert(decl.name.clone(), Type::Array(Box::new(elem)));
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Var(decl) => self.check_var(decl, stmt.pos),
            StmtKind::Array(decl) => self.check_array(decl, stmt.pos),
            StmtKind::Function(function) => {
                for param in &function.params {
                    self.bind_unknown(param);
                }
                self.check_block(&function.body);
            }
            // Templates only; nothing reads their properties directly.
            StmtKind::Aggregate(_) => {}
            StmtKind::Label(_) | StmtKind::Return | StmtKind::Kill | StmtKind::Raw(_) => {}
            StmtKind::Goto { condition, .. } => {
                if let Some(condition) = condition {
                    self.infer(condition);
                }
            }
            StmtKind::If {
                condition,
                then_body,
                else_body,
            } => {
                self.infer(condition);
                self.check_block(then_body);
                if let Some(else_body) = else_body {
                    self.check_block(else_body);
                }
            }
            StmtKind::While { condition, body } => {
                self.infer(condition);
                self.check_block(body);
            }
            StmtKind::For {
                init,
                condition,
                step,
                body,
            } => {
                match init {
                    Some(ForInit::Decl(decl)) => self.check_var(decl, stmt.pos),
                    Some(ForInit::Expr(expr)) => {
                        self.infer(expr);
                    }
                    None => {}
                }
                if let Some(condition) = condition {
                    self.infer(condition);
                }
                if let Some(step) = step {
                    self.infer(step);
                }
                self.check_block(body);
            }
            StmtKind::Switch {
                scrutinee,
                cases,
                default,
            } => {
                self.infer(scrutinee);
                for case in cases {
                    self.infer(&case.value);
                    self.check_block(&case.body);
                }
                if let Some(default) = default {
                    self.check_block(default);
                }
            }
            StmtKind::Expr(expr) | StmtKind::WaitFor(expr) | StmtKind::Push(expr) => {
                self.infer(expr);
            }
            StmtKind::Wait { time, var } => {
                let ty = self.infer(time);
                if !ty.is_numeric() {
                    self.error(
                        TypeErrorKind::NonNumericOperand,
                        time.pos,
                        format!("wait time must be numeric, got `{ty}`"),
                    );
                }
                if let Some(var) = var {
                    self.bind_unknown(var);
                }
            }
            StmtKind::Set { name, value } => {
                self.infer(value);
                self.bind_unknown(name);
            }
            StmtKind::Pop(name) | StmtKind::Peek(name) => self.bind_unknown(name),
            StmtKind::Thread { .. }
            | StmtKind::SpawnBot { .. }
            | StmtKind::MoveTo { .. }
            | StmtKind::Animate { .. }
            | StmtKind::Delete(_) => {}
        }
    }

    fn infer(&mut self, expr: &Expr) -> Type {
        match &expr.kind {
            ExprKind::Int(_) => Type::Int,
            ExprKind::Float(_) => Type::Float,
            ExprKind::Str(_) => Type::Str,
            ExprKind::Ident(name) => match self.symbols.get(name) {
                Some(ty) => ty.clone(),
                None => {
                    self.error(
                        TypeErrorKind::UndefinedIdentifier,
                        expr.pos,
                        format!("undefined identifier `{name}`"),
                    );
                    Type::Unknown
                }
            },
            ExprKind::Binary { op, left, right } => {
                let lt = self.infer(left);
                let rt = self.infer(right);
                self.binary(*op, lt, rt, expr.pos)
            }
            ExprKind::Unary { op, expr: operand } => {
                let ty = self.infer(operand);
                match op {
                    UnaryOp::Not => Type::Int,
                    _ if ty.is_numeric() => ty,
                    _ => {
                        self.error(
                            TypeErrorKind::NonNumericOperand,
                            expr.pos,
                            format!("`{}` requires a numeric operand, got `{ty}`", op.symbol()),
                        );
                        Type::Unknown
                    }
                }
            }
            ExprKind::Index { array, index } => {
                let array_ty = self.infer(array);
                let index_ty = self.infer(index);
                let elem = match array_ty {
                    Type::Array(elem) => *elem,
                    Type::Unknown => Type::Unknown,
                    other => {
                        self.error(
                            TypeErrorKind::NotIndexable,
                            expr.pos,
                            format!("cannot index into a value of type `{other}`"),
                        );
                        return Type::Unknown;
                    }
                };
                if !matches!(index_ty, Type::Int | Type::Unknown) {
                    self.error(
                        TypeErrorKind::NonIntegerIndex,
                        index.pos,
                        format!("array index must be `int`, got `{index_ty}`"),
                    );
                }
                elem
            }
            ExprKind::Member { object, member } => {
                if let Some(ty) = expr.slot_path().and_then(|path| self.symbols.get(&path)) {
                    return ty.clone();
                }
                let base = object.slot_path().and_then(|path| self.symbols.get(&path));
                match base {
                    Some(Type::Array(_)) if member == "length" => Type::Int,
                    _ => Type::Unknown,
                }
            }
            ExprKind::Call { args, .. } => {
                for arg in args {
                    self.infer(arg);
                }
                Type::Unknown
            }
            ExprKind::Array(elements) => {
                let types: Vec<Type> = elements.iter().map(|e| self.infer(e)).collect();
                let elem = types.into_iter().next().unwrap_or(Type::Unknown);
                Type::Array(Box::new(elem))
            }
            ExprKind::Ternary {
                condition,
                then_value,
                else_value,
            } => {
                self.infer(condition);
                let ty = self.infer(then_value);
                self.infer(else_value);
                ty
            }
            ExprKind::Assign { target, value } => {
                let value_ty = self.infer(value);
                let Some(target_ty) = self.symbols.get(target).cloned() else {
                    self.error(
                        TypeErrorKind::UndefinedIdentifier,
                        expr.pos,
                        format!("undefined identifier `{target}`"),
                    );
                    return Type::Unknown;
                };
                if !target_ty.accepts(&value_ty) {
                    self.error(
                        TypeErrorKind::IncompatibleType,
                        expr.pos,
                        format!(
                            "cannot assign a value of type `{value_ty}` to `{target}` of type `{target_ty}`"
                        ),
                    );
                }
                target_ty
            }
        }
    }

    fn binary(&mut self, op: BinOp, left: Type, right: Type, pos: Pos) -> Type {
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                if !(left.is_numeric() && right.is_numeric()) {
                    self.error(
                        TypeErrorKind::NonNumericOperand,
                        pos,
                        format!(
                            "`{}` is not supported between `{left}` and `{right}`",
                            op.symbol()
                        ),
                    );
                    return Type::Unknown;
                }
                match (left, right) {
                    (Type::Float, _) | (_, Type::Float) => Type::Float,
                    (Type::Int, Type::Int) => Type::Int,
                    _ => Type::Unknown,
                }
            }
            BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
                let numeric = left.is_numeric() && right.is_numeric();
                let strings = matches!(op, BinOp::Eq | BinOp::Neq)
                    && matches!(
                        (&left, &right),
                        (Type::Str | Type::Unknown, Type::Str | Type::Unknown)
                    );
                if !(numeric || strings) {
                    self.error(
                        TypeErrorKind::UnsupportedOperands,
                        pos,
                        format!(
                            "comparison `{}` is not supported between `{left}` and `{right}`",
                            op.symbol()
                        ),
                    );
                }
                Type::Int
            }
            BinOp::And | BinOp::Or => Type::Int,
        }
    }
}
