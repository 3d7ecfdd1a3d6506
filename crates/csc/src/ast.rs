use serde::{Deserialize, Serialize};

/// Source position of a node, 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

/// A complete source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

/// Declarable element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Int,
    Float,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub pos: Pos,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDecl {
    pub ty: ScalarType,
    pub name: String,
    pub value: Option<Expr>,
    pub is_const: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayDecl {
    pub elem_ty: ScalarType,
    pub name: String,
    pub init: Option<Expr>,
}

/// A function, or a method inside a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub pos: Pos,
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    Class,
    Struct,
}

/// A declaration: a property of an aggregate, or a declaration statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Property {
    Scalar(VarDecl),
    Array(ArrayDecl),
}

/// `class` or `struct`. A template only; it produces no code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub kind: AggregateKind,
    pub name: String,
    pub properties: Vec<Property>,
    pub methods: Vec<FunctionDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub pos: Pos,
    pub value: Expr,
    pub body: Vec<Stmt>,
}

/// The `init` part of a `for` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ForInit {
    Decl(VarDecl),
    Expr(Expr),
}

/// Statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StmtKind {
    Var(VarDecl),
    Array(ArrayDecl),
    Function(FunctionDecl),
    Aggregate(Aggregate),
    Label(String),
    Goto {
        label: String,
        condition: Option<Expr>,
    },
    If {
        condition: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    For {
        init: Option<ForInit>,
        condition: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    Switch {
        scrutinee: Expr,
        cases: Vec<Case>,
        default: Option<Vec<Stmt>>,
    },
    Return,
    Expr(Expr),

    // Engine operations
    Kill,
    Wait {
        time: Expr,
        var: Option<String>,
    },
    WaitFor(Expr),
    Thread {
        label: String,
        args: Vec<Expr>,
    },
    Set {
        name: String,
        value: Expr,
    },
    Push(Expr),
    Pop(String),
    Peek(String),
    SpawnBot {
        template: Expr,
        location: Expr,
        attributes: Vec<Expr>,
    },
    MoveTo {
        prop: Expr,
        location: Expr,
    },
    Animate {
        prop: Expr,
        location: Expr,
        time: Expr,
    },
    Delete(Expr),

    /// Target text copied through untouched, one entry per line.
    Raw(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub pos: Pos,
    pub kind: ExprKind,
}

/// Expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Index {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        member: String,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Array(Vec<Expr>),
    Ternary {
        condition: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
    Assign {
        target: String,
        value: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::PreInc | UnaryOp::PostInc => "++",
            UnaryOp::PreDec | UnaryOp::PostDec => "--",
        }
    }

    pub fn is_step(self) -> bool {
        !matches!(self, UnaryOp::Neg | UnaryOp::Not)
    }
}

impl Expr {
    /// The flattened state-slot name of an identifier or member path
    /// (`a.b.c` -> `a_b_c`). `None` for anything else.
    pub fn slot_path(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name.clone()),
            ExprKind::Member { object, member } => {
                object.slot_path().map(|base| format!("{base}_{member}"))
            }
            _ => None,
        }
    }
}
