use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use statescript::{BinOp, Expr, Guard, Instr, Line, Operand, Script, UnaryOp, Value};
use tracing::debug;

use crate::error::VmError;

const MAX_STACK: usize = 4096;
const MAX_CALL_DEPTH: usize = 256;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// `RETURN` with nothing to return to.
    Returned,
    /// `KILL`.
    Killed,
    /// Execution ran past the last line.
    EndOfScript,
}

/// An engine-side effect the simulator records instead of performing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub line: usize,
    pub kind: &'static str,
    pub args: Vec<Value>,
    /// Verbatim text, for raw lines.
    pub text: Option<String>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if let Some(text) = &self.text {
            write!(f, " {text}")?;
        }
        Ok(())
    }
}

/// Executes a [`Script`] with flat state, an operand stack and a return stack.
pub struct Vm {
    script: Script,
    labels: HashMap<String, usize>,
    state: BTreeMap<String, Value>,
    stack: Vec<Value>,
    returns: Vec<usize>,
    step_count: u64,
    max_steps: u64,
    /// Engine effects, in execution order.
    pub events: Vec<Event>,
    /// Indices of executed instruction lines.
    pub trace: Vec<usize>,
    pub trace_enabled: bool,
}

impl Vm {
    pub fn new(script: Script) -> Result<Self, VmError> {
        let labels = script
            .label_index()?
            .into_iter()
            .map(|(name, idx)| (name.to_string(), idx))
            .collect();
        Ok(Vm {
            script,
            labels,
            state: BTreeMap::new(),
            stack: Vec::new(),
            returns: Vec::new(),
            step_count: 0,
            max_steps: 100_000,
            events: Vec::new(),
            trace: Vec::new(),
            trace_enabled: false,
        })
    }

    pub fn set_max_steps(&mut self, max: u64) {
        self.max_steps = max;
    }

    /// Seed a state slot before running. `INIT` lines still win.
    pub fn set_state(&mut self, name: impl Into<String>, value: Value) {
        self.state.insert(name.into(), value);
    }

    pub fn state(&self) -> &BTreeMap<String, Value> {
        &self.state
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.state.get(name)
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    /// Apply load-time bindings, then execute from the first line.
    pub fn run(&mut self) -> Result<Exit, VmError> {
        self.load()?;
        let exit = self.execute()?;
        debug!(steps = self.step_count, ?exit, "script finished");
        Ok(exit)
    }

    fn load(&mut self) -> Result<(), VmError> {
        let inits: Vec<(String, Operand)> = self
            .script
            .instrs()
            .filter_map(|instr| match instr {
                Instr::Init { name, value } => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect();
        for (name, value) in inits {
            let value = self.eval_operand(&value)?;
            self.state.insert(name, value);
        }
        Ok(())
    }

    fn execute(&mut self) -> Result<Exit, VmError> {
        let mut ip = 0;
        loop {
            let Some(line) = self.script.lines.get(ip).cloned() else {
                return Ok(Exit::EndOfScript);
            };
            let instr = match line {
                Line::Instr(instr) => instr,
                Line::Raw(text) => {
                    self.events.push(Event {
                        line: ip,
                        kind: "RAW",
                        args: Vec::new(),
                        text: Some(text),
                    });
                    ip += 1;
                    continue;
                }
                Line::Label(_) | Line::Blank => {
                    ip += 1;
                    continue;
                }
            };

            self.step_count += 1;
            if self.step_count > self.max_steps {
                return Err(VmError::ExecutionLimitExceeded(self.max_steps));
            }
            if self.trace_enabled {
                self.trace.push(ip);
            }

            // Advance before executing; transfers overwrite.
            let here = ip;
            ip += 1;

            match instr {
                Instr::Init { .. } => {}
                Instr::Set { name, value } => {
                    let value = self.eval_operand(&value)?;
                    self.state.insert(name, value);
                }
                Instr::Goto { label, guard } => {
                    if self.guard_holds(guard.as_ref())? {
                        ip = self.resolve(&label)?;
                    }
                }
                Instr::CallIf { label, guard } => {
                    if self.guard_holds(Some(&guard))? {
                        ip = self.call(&label, ip)?;
                    }
                }
                Instr::Call { label } => {
                    ip = self.call(&label, ip)?;
                }
                Instr::Return => match self.returns.pop() {
                    Some(resume) => ip = resume,
                    None => return Ok(Exit::Returned),
                },
                Instr::Kill => return Ok(Exit::Killed),
                Instr::Wait { time, var } => {
                    let time = self.eval_operand(&time)?;
                    if let Some(var) = var {
                        self.state.insert(var, time.clone());
                    }
                    self.event(here, "WAIT", vec![time]);
                }
                Instr::WaitFor { guard } => {
                    if !self.guard_holds(Some(&guard))? {
                        return Err(VmError::Blocked(here));
                    }
                    self.event(here, "WAITFOR", Vec::new());
                }
                Instr::Thread { label, args } => {
                    self.resolve(&label)?;
                    let mut values = vec![Value::Str(label)];
                    values.extend(self.eval_all(&args)?);
                    self.event(here, "THREAD", values);
                }
                Instr::Push(value) => {
                    let value = self.eval_operand(&value)?;
                    if self.stack.len() >= MAX_STACK {
                        return Err(VmError::StackOverflow(MAX_STACK));
                    }
                    self.stack.push(value);
                }
                Instr::Pop(name) => {
                    let value = self.stack.pop().ok_or(VmError::StackUnderflow(here))?;
                    self.state.insert(name, value);
                }
                Instr::Peek(name) => {
                    let value = self.stack.last().cloned().ok_or(VmError::StackUnderflow(here))?;
                    self.state.insert(name, value);
                }
                Instr::Inc(name) => self.step_slot(name, 1.0)?,
                Instr::Dec(name) => self.step_slot(name, -1.0)?,
                Instr::SpawnBot {
                    template,
                    location,
                    attributes,
                } => {
                    let mut values = vec![self.eval_operand(&template)?, self.eval_operand(&location)?];
                    values.extend(self.eval_all(&attributes)?);
                    self.event(here, "SPAWNBOT", values);
                }
                Instr::MoveTo { prop, location } => {
                    let values = self.eval_all(&[prop, location])?;
                    self.event(here, "MOVETO", values);
                }
                Instr::Animate {
                    prop,
                    location,
                    time,
                } => {
                    let values = self.eval_all(&[prop, location, time])?;
                    self.event(here, "ANIMATE", values);
                }
                Instr::Delete { prop } => {
                    let values = self.eval_all(&[prop])?;
                    self.event(here, "DELETE", values);
                }
            }
        }
    }

    fn resolve(&self, label: &str) -> Result<usize, VmError> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| VmError::UnknownLabel(label.to_string()))
    }

    fn call(&mut self, label: &str, resume: usize) -> Result<usize, VmError> {
        let target = self.resolve(label)?;
        if self.returns.len() >= MAX_CALL_DEPTH {
            return Err(VmError::CallDepthExceeded(MAX_CALL_DEPTH));
        }
        self.returns.push(resume);
        Ok(target)
    }

    fn event(&mut self, line: usize, kind: &'static str, args: Vec<Value>) {
        self.events.push(Event {
            line,
            kind,
            args,
            text: None,
        });
    }

    fn step_slot(&mut self, name: String, delta: f64) -> Result<(), VmError> {
        let current = self.state.get(&name).cloned().unwrap_or(Value::Int(0));
        let n = current.as_number().ok_or(VmError::TypeError {
            expected: "number",
            got: current.type_name(),
        })?;
        self.state.insert(name, Value::number(n + delta));
        Ok(())
    }

    fn guard_holds(&self, guard: Option<&Guard>) -> Result<bool, VmError> {
        match guard {
            Some(Guard(expr)) => Ok(self.eval(expr)?.is_truthy()),
            None => Ok(true),
        }
    }

    fn eval_all(&self, operands: &[Operand]) -> Result<Vec<Value>, VmError> {
        operands.iter().map(|o| self.eval_operand(o)).collect()
    }

    fn eval_operand(&self, operand: &Operand) -> Result<Value, VmError> {
        match operand {
            Operand::Value(v) => Ok(v.clone()),
            // Undefined slots read as zero.
            Operand::Name(n) => Ok(self.state.get(n).cloned().unwrap_or(Value::Int(0))),
            Operand::Expr(e) => self.eval(e),
        }
    }

    /// Evaluate an embedded expression against the current state.
    pub fn eval(&self, expr: &Expr) -> Result<Value, VmError> {
        match expr {
            Expr::Value(v) => Ok(v.clone()),
            Expr::Name(n) => Ok(self.state.get(n).cloned().unwrap_or(Value::Int(0))),
            Expr::Unary { op, expr } => {
                let v = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::bool(!v.is_truthy())),
                    UnaryOp::Neg => Ok(Value::number(-number(&v)?)),
                }
            }
            Expr::Cond {
                condition,
                then_value,
                else_value,
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(then_value)
                } else {
                    self.eval(else_value)
                }
            }
            Expr::Binary { op, left, right } => match op {
                BinOp::And => {
                    let l = self.eval(left)?.is_truthy();
                    Ok(Value::bool(l && self.eval(right)?.is_truthy()))
                }
                BinOp::Or => {
                    let l = self.eval(left)?.is_truthy();
                    Ok(Value::bool(l || self.eval(right)?.is_truthy()))
                }
                _ => {
                    let l = self.eval(left)?;
                    let r = self.eval(right)?;
                    binary(*op, &l, &r)
                }
            },
        }
    }
}

fn number(v: &Value) -> Result<f64, VmError> {
    v.as_number().ok_or(VmError::TypeError {
        expected: "number",
        got: v.type_name(),
    })
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, VmError> {
    match op {
        BinOp::Eq => Ok(Value::bool(values_equal(l, r))),
        BinOp::Neq => Ok(Value::bool(!values_equal(l, r))),
        BinOp::Add => match (l, r) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => Ok(Value::number(number(l)? + number(r)?)),
        },
        BinOp::Sub => Ok(Value::number(number(l)? - number(r)?)),
        BinOp::Mul => Ok(Value::number(number(l)? * number(r)?)),
        BinOp::Div => {
            let d = number(r)?;
            if d == 0.0 {
                return Err(VmError::DivisionByZero);
            }
            Ok(Value::number(number(l)? / d))
        }
        BinOp::Lt => Ok(Value::bool(number(l)? < number(r)?)),
        BinOp::Lte => Ok(Value::bool(number(l)? <= number(r)?)),
        BinOp::Gt => Ok(Value::bool(number(l)? > number(r)?)),
        BinOp::Gte => Ok(Value::bool(number(l)? >= number(r)?)),
        // `eval` short-circuits these before both sides are evaluated.
        BinOp::And => Ok(Value::bool(l.is_truthy() && r.is_truthy())),
        BinOp::Or => Ok(Value::bool(l.is_truthy() || r.is_truthy())),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}
