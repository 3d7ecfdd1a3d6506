use std::collections::HashMap;

use statescript as ss;
use statescript::{Guard, Instr, Operand, Script, ScriptError, Value};
use tracing::{debug, warn};

use crate::ast::*;
use crate::error::CompileError;

/// Lowers a program to a StateScript script.
///
/// Each call owns its label counter and buffers, so independent programs can
/// be generated concurrently with separate calls.
pub fn emit(program: &Program) -> Result<Script, CompileError> {
    let mut emitter = Emitter::default();
    emitter.emit_program(program)
}

#[derive(Default)]
struct Emitter {
    /// Lines of the function or main body being generated.
    out: Script,
    /// Load-time bindings from top-level declarations.
    inits: Vec<Instr>,
    label_counter: usize,
    /// Declared function name -> parameter count. The label is the name.
    functions: HashMap<String, usize>,
    /// `label:` statements seen so far.
    user_labels: HashMap<String, Pos>,
    /// How many call-framed bodies (if/else branches, switch cases)
    /// enclose the current statement.
    branch_depth: usize,
}

fn codegen_error(pos: Pos, msg: String) -> CompileError {
    CompileError::Codegen {
        line: pos.line,
        col: pos.col,
        msg,
    }
}

/// A string operand is written as `[text]` on one line, so it cannot hold
/// a line break or a closing bracket.
fn check_string(pos: Pos, s: &str) -> Result<(), CompileError> {
    if s.contains(['\n', '\r', ']']) {
        return Err(codegen_error(
            pos,
            format!("string {s:?} contains a line break or `]` and cannot be emitted"),
        ));
    }
    Ok(())
}

/// Folds literals (and negated numeric literals) to a value.
fn constant(expr: &Expr) -> Option<Value> {
    match &expr.kind {
        ExprKind::Int(n) => Some(Value::Int(*n)),
        ExprKind::Float(n) => Some(Value::Float(*n)),
        ExprKind::Str(s) => Some(Value::Str(s.clone())),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            expr,
        } => match constant(expr)? {
            Value::Int(n) => Some(Value::Int(n.checked_neg()?)),
            Value::Float(n) => Some(Value::Float(-n)),
            Value::Str(_) => None,
        },
        _ => None,
    }
}

fn lower_binop(op: BinOp) -> ss::BinOp {
    match op {
        BinOp::Add => ss::BinOp::Add,
        BinOp::Sub => ss::BinOp::Sub,
        BinOp::Mul => ss::BinOp::Mul,
        BinOp::Div => ss::BinOp::Div,
        BinOp::Eq => ss::BinOp::Eq,
        BinOp::Neq => ss::BinOp::Neq,
        BinOp::Lt => ss::BinOp::Lt,
        BinOp::Lte => ss::BinOp::Lte,
        BinOp::Gt => ss::BinOp::Gt,
        BinOp::Gte => ss::BinOp::Gte,
        BinOp::And => ss::BinOp::And,
        BinOp::Or => ss::BinOp::Or,
    }
}

impl Emitter {
    fn label(&mut self, purpose: &str) -> String {
        self.label_counter += 1;
        format!("_{purpose}_{}", self.label_counter)
    }

    fn emit_program(&mut self, program: &Program) -> Result<Script, CompileError> {
        self.collect_functions(&program.stmts)?;

        // Top-level functions first, each followed by a blank line.
        for stmt in &program.stmts {
            if let StmtKind::Function(function) = &stmt.kind {
                self.emit_function(function)?;
                self.out.blank();
            }
        }
        let functions = std::mem::take(&mut self.out);

        for stmt in &program.stmts {
            match &stmt.kind {
                StmtKind::Function(_) => {}
                StmtKind::Var(decl) => self.bind(&decl.name, decl.value.as_ref(), true)?,
                StmtKind::Array(decl) => self.emit_array(decl, stmt.pos, true)?,
                _ => self.emit_stmt(stmt)?,
            }
        }
        let main = std::mem::take(&mut self.out);

        let mut script = Script::new();
        let has_inits = !self.inits.is_empty();
        for init in self.inits.drain(..) {
            script.push(init);
        }
        if has_inits && !(main.lines.is_empty() && functions.lines.is_empty()) {
            script.blank();
        }
        if !main.lines.is_empty() {
            script.push(Instr::Goto {
                label: "_main".into(),
                guard: None,
            });
            script.blank();
        }
        script.lines.extend(functions.lines);
        if !main.lines.is_empty() {
            script.label("_main");
            script.lines.extend(main.lines);
        }

        // User labels may still collide with `_main` or a generated label.
        if let Err(ScriptError::DuplicateLabel(name)) = script.label_index() {
            let pos = self.user_labels.get(&name).copied().unwrap_or_default();
            return Err(codegen_error(
                pos,
                format!("label `{name}` is defined more than once"),
            ));
        }

        debug!(
            lines = script.lines.len(),
            labels = script.labels().count(),
            functions = self.functions.len(),
            "generated script"
        );
        Ok(script)
    }

    /// Registers every function declaration, nested ones included, so calls
    /// may precede the declaration they invoke.
    fn collect_functions(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Function(function) => {
                    if self
                        .functions
                        .insert(function.name.clone(), function.params.len())
                        .is_some()
                    {
                        return Err(codegen_error(
                            function.pos,
                            format!("function `{}` is declared more than once", function.name),
                        ));
                    }
                    self.collect_functions(&function.body)?;
                }
                StmtKind::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    self.collect_functions(then_body)?;
                    if let Some(else_body) = else_body {
                        self.collect_functions(else_body)?;
                    }
                }
                StmtKind::While { body, .. } | StmtKind::For { body, .. } => {
                    self.collect_functions(body)?;
                }
                StmtKind::Switch { cases, default, .. } => {
                    for case in cases {
                        self.collect_functions(&case.body)?;
                    }
                    if let Some(default) = default {
                        self.collect_functions(default)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// `:name`, parameter pops in declaration order, body, trailing `RETURN`.
    fn emit_function(&mut self, function: &FunctionDecl) -> Result<(), CompileError> {
        self.out.label(function.name.clone());
        for param in &function.params {
            self.out.push(Instr::Pop(param.clone()));
        }

        let outer_depth = std::mem::take(&mut self.branch_depth);
        self.emit_block(&function.body)?;
        self.branch_depth = outer_depth;

        if !matches!(function.body.last(), Some(Stmt { kind: StmtKind::Return, .. })) {
            self.out.push(Instr::Return);
        }
        Ok(())
    }

    fn emit_block(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.emit_stmt(stmt)?;
        }
        Ok(())
    }

    /// A body entered through `CALL`/`CALLIF`: `:label`, statements, `RETURN`.
    fn emit_framed(&mut self, label: String, stmts: &[Stmt]) -> Result<(), CompileError> {
        self.out.label(label);
        self.branch_depth += 1;
        self.emit_block(stmts)?;
        self.branch_depth -= 1;
        self.out.push(Instr::Return);
        Ok(())
    }

    /// Binds a declared slot. Top-level bindings become `INIT`; a top-level
    /// initializer that is not a literal is initialized to 0 and computed
    /// with `SET` where it appears.
    fn bind(&mut self, name: &str, value: Option<&Expr>, top_level: bool) -> Result<(), CompileError> {
        if top_level {
            let init = match value {
                None => Value::Int(0),
                Some(expr) => match constant(expr) {
                    Some(value) => {
                        if let Value::Str(s) = &value {
                            check_string(expr.pos, s)?;
                        }
                        value
                    }
                    None => {
                        let value = self.operand(expr)?;
                        self.out.push(Instr::Set {
                            name: name.to_string(),
                            value,
                        });
                        Value::Int(0)
                    }
                },
            };
            self.inits.push(Instr::Init {
                name: name.to_string(),
                value: Operand::Value(init),
            });
        } else {
            let value = match value {
                Some(expr) => self.operand(expr)?,
                None => Operand::Value(Value::Int(0)),
            };
            self.out.push(Instr::Set {
                name: name.to_string(),
                value,
            });
        }
        Ok(())
    }

    /// One slot per element (`a_0`, `a_1`, ..) plus `a_length`.
    fn emit_array(&mut self, decl: &ArrayDecl, pos: Pos, top_level: bool) -> Result<(), CompileError> {
        let elements: &[Expr] = match decl.init.as_ref().map(|e| &e.kind) {
            None => &[],
            Some(ExprKind::Array(elements)) => elements,
            Some(_) => {
                return Err(codegen_error(
                    pos,
                    format!("array `{}` must be initialized with an array literal", decl.name),
                ))
            }
        };
        for (i, element) in elements.iter().enumerate() {
            self.bind(&format!("{}_{i}", decl.name), Some(element), top_level)?;
        }

        let length = Operand::Value(Value::Int(elements.len() as i64));
        let name = format!("{}_length", decl.name);
        if top_level {
            self.inits.push(Instr::Init { name, value: length });
        } else {
            self.out.push(Instr::Set { name, value: length });
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Var(decl) => self.bind(&decl.name, decl.value.as_ref(), false)?,
            StmtKind::Array(decl) => self.emit_array(decl, stmt.pos, false)?,
            StmtKind::Function(function) => {
                let skip = self.label("fn_skip");
                self.out.push(Instr::Goto {
                    label: skip.clone(),
                    guard: None,
                });
                self.emit_function(function)?;
                self.out.label(skip);
            }
            StmtKind::Aggregate(aggregate) => {
                if !aggregate.properties.is_empty() || !aggregate.methods.is_empty() {
                    let kind = match aggregate.kind {
                        AggregateKind::Class => "class",
                        AggregateKind::Struct => "struct",
                    };
                    warn!(
                        name = %aggregate.name,
                        line = stmt.pos.line,
                        "{kind} declaration produces no code; declare instance fields as flattened variables"
                    );
                }
            }
            StmtKind::Label(name) => {
                if self.functions.contains_key(name)
                    || self.user_labels.insert(name.clone(), stmt.pos).is_some()
                {
                    return Err(codegen_error(
                        stmt.pos,
                        format!("label `{name}` is defined more than once"),
                    ));
                }
                self.out.label(name.clone());
            }
            StmtKind::Goto { label, condition } => {
                let guard = condition.as_ref().map(|c| self.guard(c)).transpose()?;
                self.out.push(Instr::Goto {
                    label: label.clone(),
                    guard,
                });
            }
            StmtKind::If {
                condition,
                then_body,
                else_body,
            } => self.emit_if(condition, then_body, else_body.as_deref())?,
            StmtKind::While { condition, body } => {
                self.emit_loop("while", Some(condition), body, None)?;
            }
            StmtKind::For {
                init,
                condition,
                step,
                body,
            } => {
                match init {
                    Some(ForInit::Decl(decl)) => self.bind(&decl.name, decl.value.as_ref(), false)?,
                    Some(ForInit::Expr(expr)) => self.emit_expr_stmt(expr)?,
                    None => {}
                }
                self.emit_loop("for", condition.as_ref(), body, step.as_ref())?;
            }
            StmtKind::Switch {
                scrutinee,
                cases,
                default,
            } => self.emit_switch(scrutinee, cases, default.as_deref())?,
            StmtKind::Return => {
                if self.branch_depth > 0 {
                    return Err(codegen_error(
                        stmt.pos,
                        "`return` inside an if/else or switch body would only leave that body".into(),
                    ));
                }
                self.out.push(Instr::Return);
            }
            StmtKind::Expr(expr) => self.emit_expr_stmt(expr)?,
            StmtKind::Kill => self.out.push(Instr::Kill),
            StmtKind::Wait { time, var } => {
                let time = self.operand(time)?;
                self.out.push(Instr::Wait {
                    time,
                    var: var.clone(),
                });
            }
            StmtKind::WaitFor(condition) => {
                let guard = self.guard(condition)?;
                self.out.push(Instr::WaitFor { guard });
            }
            StmtKind::Thread { label, args } => {
                let args = self.operands(args)?;
                self.out.push(Instr::Thread {
                    label: label.clone(),
                    args,
                });
            }
            StmtKind::Set { name, value } => {
                let value = self.operand(value)?;
                self.out.push(Instr::Set {
                    name: name.clone(),
                    value,
                });
            }
            StmtKind::Push(value) => {
                let value = self.operand(value)?;
                self.out.push(Instr::Push(value));
            }
            StmtKind::Pop(name) => self.out.push(Instr::Pop(name.clone())),
            StmtKind::Peek(name) => self.out.push(Instr::Peek(name.clone())),
            StmtKind::SpawnBot {
                template,
                location,
                attributes,
            } => {
                let instr = Instr::SpawnBot {
                    template: self.operand(template)?,
                    location: self.operand(location)?,
                    attributes: self.operands(attributes)?,
                };
                self.out.push(instr);
            }
            StmtKind::MoveTo { prop, location } => {
                let instr = Instr::MoveTo {
                    prop: self.operand(prop)?,
                    location: self.operand(location)?,
                };
                self.out.push(instr);
            }
            StmtKind::Animate {
                prop,
                location,
                time,
            } => {
                let instr = Instr::Animate {
                    prop: self.operand(prop)?,
                    location: self.operand(location)?,
                    time: self.operand(time)?,
                };
                self.out.push(instr);
            }
            StmtKind::Delete(prop) => {
                let prop = self.operand(prop)?;
                self.out.push(Instr::Delete { prop });
            }
            StmtKind::Raw(lines) => {
                for line in lines {
                    self.out.raw(line.clone());
                }
            }
        }
        Ok(())
    }

    /// `CALLIF then {c}; [CALL else;] GOTO end`, then each body under its
    /// label ending in `RETURN`, then `:end`.
    ///
    /// `CALL else` is reached again when the then-body returns, so with an
    /// else branch the condition is pushed before `CALLIF`. The else body
    /// pops it into `_if_n` first thing and skips to its `RETURN` when it
    /// held. The stack keeps one saved condition per active `if`, so a
    /// recursive call from the then-body cannot clobber it.
    fn emit_if(
        &mut self,
        condition: &Expr,
        then_body: &[Stmt],
        else_body: Option<&[Stmt]>,
    ) -> Result<(), CompileError> {
        let guard = self.guard(condition)?;
        let taken = else_body.map(|_| self.label("if"));
        let then_label = self.label("if_then");
        let else_labels = else_body.map(|_| (self.label("if_else"), self.label("if_else_done")));
        let end_label = self.label("if_end");

        if taken.is_some() {
            self.out.push(Instr::Push(Operand::from_expr(guard.0.clone())));
        }
        self.out.push(Instr::CallIf {
            label: then_label.clone(),
            guard,
        });
        if let Some((else_label, _)) = &else_labels {
            self.out.push(Instr::Call {
                label: else_label.clone(),
            });
        }
        self.out.push(Instr::Goto {
            label: end_label.clone(),
            guard: None,
        });

        self.emit_framed(then_label, then_body)?;
        if let (Some(slot), Some((else_label, done_label)), Some(body)) =
            (taken, else_labels, else_body)
        {
            self.out.label(else_label);
            self.out.push(Instr::Pop(slot.clone()));
            self.out.push(Instr::Goto {
                label: done_label.clone(),
                guard: Some(Guard(ss::Expr::Name(slot))),
            });
            self.branch_depth += 1;
            let result = self.emit_block(body);
            self.branch_depth -= 1;
            result?;
            self.out.label(done_label);
            self.out.push(Instr::Return);
        }
        self.out.label(end_label);
        Ok(())
    }

    /// `:loop; GOTO end {!(c)}; body; step; GOTO loop; :end`. Without a
    /// condition the loop only ends through a jump out of its body.
    fn emit_loop(
        &mut self,
        purpose: &str,
        condition: Option<&Expr>,
        body: &[Stmt],
        step: Option<&Expr>,
    ) -> Result<(), CompileError> {
        let loop_label = self.label(purpose);
        let end_label = self.label(&format!("{purpose}_end"));

        self.out.label(loop_label.clone());
        if let Some(condition) = condition {
            let negated = ss::Expr::not(self.lower(condition)?);
            self.out.push(Instr::Goto {
                label: end_label.clone(),
                guard: Some(Guard(negated)),
            });
        }
        self.emit_block(body)?;
        if let Some(step) = step {
            self.emit_expr_stmt(step)?;
        }
        self.out.push(Instr::Goto {
            label: loop_label,
            guard: None,
        });
        self.out.label(end_label);
        Ok(())
    }

    /// The scrutinee is stored once in `_switch_n` and only read by the
    /// case checks, which all run before any body does.
    ///
    /// Each check pushes 0 and calls the case when it matches; the case
    /// replaces the 0 with 1 on entry. Popping it into `_switch_hit_n` after
    /// the call tells whether to jump to the end, so a recursive call from
    /// a case body cannot make the default statements run as well.
    fn emit_switch(
        &mut self,
        scrutinee: &Expr,
        cases: &[Case],
        default: Option<&[Stmt]>,
    ) -> Result<(), CompileError> {
        let slot = self.label("switch");
        let end_label = self.label("switch_end");
        let hit = self.label("switch_hit");

        let value = self.operand(scrutinee)?;
        self.out.push(Instr::Set {
            name: slot.clone(),
            value,
        });

        let mut bodies = Vec::with_capacity(cases.len());
        for case in cases {
            let matches = ss::Expr::binary(
                ss::BinOp::Eq,
                ss::Expr::name(slot.clone()),
                self.lower(&case.value)?,
            );
            let case_label = self.label("case");
            self.out.push(Instr::Push(Operand::Value(Value::Int(0))));
            self.out.push(Instr::CallIf {
                label: case_label.clone(),
                guard: Guard(matches),
            });
            self.out.push(Instr::Pop(hit.clone()));
            self.out.push(Instr::Goto {
                label: end_label.clone(),
                guard: Some(Guard(ss::Expr::name(hit.clone()))),
            });
            bodies.push((case_label, &case.body));
        }

        if let Some(default) = default {
            self.branch_depth += 1;
            let result = self.emit_block(default);
            self.branch_depth -= 1;
            result?;
        }
        self.out.push(Instr::Goto {
            label: end_label.clone(),
            guard: None,
        });

        for (label, body) in bodies {
            self.out.label(label);
            self.out.push(Instr::Pop(hit.clone()));
            self.out.push(Instr::Push(Operand::Value(Value::Int(1))));
            self.branch_depth += 1;
            let result = self.emit_block(body);
            self.branch_depth -= 1;
            result?;
            self.out.push(Instr::Return);
        }
        self.out.label(end_label);
        Ok(())
    }

    fn emit_expr_stmt(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Assign { target, value } => {
                let value = self.operand(value)?;
                self.out.push(Instr::Set {
                    name: target.clone(),
                    value,
                });
            }
            ExprKind::Unary { op, expr: operand } if op.is_step() => {
                let slot = self.slot(operand)?;
                let instr = match op {
                    UnaryOp::PreInc | UnaryOp::PostInc => Instr::Inc(slot),
                    _ => Instr::Dec(slot),
                };
                self.out.push(instr);
            }
            ExprKind::Call { name, args } => {
                if let Some(&arity) = self.functions.get(name) {
                    if arity != args.len() {
                        return Err(codegen_error(
                            expr.pos,
                            format!(
                                "function `{name}` takes {arity} argument(s), got {}",
                                args.len()
                            ),
                        ));
                    }
                } else {
                    debug!(label = %name, "call to a label not declared as a function");
                }
                for arg in args.iter().rev() {
                    let value = self.operand(arg)?;
                    self.out.push(Instr::Push(value));
                }
                self.out.push(Instr::Call {
                    label: name.clone(),
                });
            }
            _ => {
                return Err(codegen_error(
                    expr.pos,
                    "expression statement has no effect".into(),
                ))
            }
        }
        Ok(())
    }

    fn operand(&self, expr: &Expr) -> Result<Operand, CompileError> {
        Ok(Operand::from_expr(self.lower(expr)?))
    }

    fn operands(&self, exprs: &[Expr]) -> Result<Vec<Operand>, CompileError> {
        exprs.iter().map(|e| self.operand(e)).collect()
    }

    fn guard(&self, expr: &Expr) -> Result<Guard, CompileError> {
        Ok(Guard(self.lower(expr)?))
    }

    /// The flattened state slot an lvalue-shaped expression names:
    /// `a.b` -> `a_b`, `a[2]` -> `a_2`, `a.length` -> `a_length`.
    fn slot(&self, expr: &Expr) -> Result<String, CompileError> {
        match &expr.kind {
            ExprKind::Ident(name) => Ok(name.clone()),
            ExprKind::Member { object, member } => Ok(format!("{}_{member}", self.slot(object)?)),
            ExprKind::Index { array, index } => {
                let base = self.slot(array)?;
                match index.kind {
                    ExprKind::Int(i) if i >= 0 => Ok(format!("{base}_{i}")),
                    _ => Err(codegen_error(
                        index.pos,
                        format!(
                            "array `{base}` is indexed by a non-constant expression; \
                             only literal indexes can be resolved to a slot"
                        ),
                    )),
                }
            }
            _ => Err(codegen_error(
                expr.pos,
                "expression does not name a state slot".into(),
            )),
        }
    }

    fn lower(&self, expr: &Expr) -> Result<ss::Expr, CompileError> {
        match &expr.kind {
            ExprKind::Int(n) => Ok(ss::Expr::Value(Value::Int(*n))),
            ExprKind::Float(n) => Ok(ss::Expr::Value(Value::Float(*n))),
            ExprKind::Str(s) => {
                check_string(expr.pos, s)?;
                Ok(ss::Expr::Value(Value::Str(s.clone())))
            }
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. } => {
                Ok(ss::Expr::Name(self.slot(expr)?))
            }
            ExprKind::Binary { op, left, right } => Ok(ss::Expr::binary(
                lower_binop(*op),
                self.lower(left)?,
                self.lower(right)?,
            )),
            ExprKind::Unary { op, expr: operand } => {
                if let Some(value) = constant(expr) {
                    return Ok(ss::Expr::Value(value));
                }
                let op = match op {
                    UnaryOp::Neg => ss::UnaryOp::Neg,
                    UnaryOp::Not => ss::UnaryOp::Not,
                    step => {
                        return Err(codegen_error(
                            expr.pos,
                            format!("`{}` can only be used as a statement", step.symbol()),
                        ))
                    }
                };
                Ok(ss::Expr::Unary {
                    op,
                    expr: Box::new(self.lower(operand)?),
                })
            }
            ExprKind::Ternary {
                condition,
                then_value,
                else_value,
            } => Ok(ss::Expr::Cond {
                condition: Box::new(self.lower(condition)?),
                then_value: Box::new(self.lower(then_value)?),
                else_value: Box::new(self.lower(else_value)?),
            }),
            ExprKind::Call { name, .. } => Err(codegen_error(
                expr.pos,
                format!("call to `{name}` used as a value; calls cannot produce values"),
            )),
            ExprKind::Array(_) => Err(codegen_error(
                expr.pos,
                "array literal outside an array declaration".into(),
            )),
            ExprKind::Assign { target, .. } => Err(codegen_error(
                expr.pos,
                format!("assignment to `{target}` used as a value"),
            )),
        }
    }
}
