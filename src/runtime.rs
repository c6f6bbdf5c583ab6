use crate::ast::{
    ArrowBody, AssignOp, BinaryOp, Expr, ExprKind, LogicalOp, Pos, Program, Property, Stmt,
    StmtKind, SwitchCase, UnaryOp,
};
use crate::environment::{AssignError, Environment, Scope};
use crate::error::{runtime_error, security_error, Error, Result};
use crate::stdlib;
use log::debug;
use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt::{self, Debug, Display, Formatter},
    rc::Rc,
    time::{Duration, Instant},
};

/// Names that alias host capabilities. Referencing one of these, as an
/// identifier or a property key, is a `SecurityError`, checked before
/// normal resolution so the rejection does not depend on whether the name
/// happens to be bound.
const FORBIDDEN_NAMES: &[&str] = &[
    "eval",
    "exec",
    "Function",
    "require",
    "import",
    "module",
    "process",
    "global",
    "globalThis",
    "window",
    "document",
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
    "fs",
    "child_process",
    "__proto__",
    "prototype",
    "constructor",
];

#[derive(Clone)]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<BTreeMap<String, Value>>>),
    Function(Rc<Function>),
    Builtin(Builtin),
}

pub enum FunctionBody {
    Block(Vec<Stmt>),
    Expr(Expr),
}

pub struct Function {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
    pub closure: Scope,
}

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    /// `None` accepts any argument count.
    pub arity: Option<usize>,
    pub func: fn(&mut Interpreter, Vec<Value>) -> Result<Value>,
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(map: BTreeMap<String, Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Null => "null",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) | Value::Builtin(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Null => false,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_nested(other, &mut Vec::new())
    }
}

impl Value {
    /// Structural equality that terminates on self-referential containers.
    /// `visited` holds the container pairs currently under comparison; a
    /// pair seen again is tentatively equal, so the acyclic parts decide.
    fn eq_nested(&self, other: &Value, visited: &mut Vec<(*const (), *const ())>) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ());
                if visited.contains(&pair) {
                    return true;
                }
                visited.push(pair);
                let (a, b) = (a.borrow(), b.borrow());
                let equal = a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.eq_nested(y, visited));
                visited.pop();
                equal
            }
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ());
                if visited.contains(&pair) {
                    return true;
                }
                visited.push(pair);
                let (a, b) = (a.borrow(), b.borrow());
                let equal = a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
                        ka == kb && va.eq_nested(vb, visited)
                    });
                visited.pop();
                equal
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            // No coercion: values of different types are never equal.
            _ => false,
        }
    }

    /// Rendering that terminates on self-referential containers. `visited`
    /// holds the containers on the current rendering path; one seen again
    /// renders degenerately as `[...]`/`{...}`.
    fn fmt_nested(
        &self,
        f: &mut Formatter,
        visited: &mut Vec<*const ()>,
        quote_strings: bool,
    ) -> fmt::Result {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) if quote_strings => write!(f, "\"{}\"", s),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if visited.contains(&ptr) {
                    return write!(f, "[...]");
                }
                visited.push(ptr);
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f, visited, true)?;
                }
                visited.pop();
                write!(f, "]")
            }
            Value::Object(map) => {
                let ptr = Rc::as_ptr(map) as *const ();
                if visited.contains(&ptr) {
                    return write!(f, "{{...}}");
                }
                visited.push(ptr);
                write!(f, "{{")?;
                for (i, (key, value)) in map.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", key)?;
                    value.fmt_nested(f, visited, true)?;
                }
                visited.pop();
                write!(f, "}}")
            }
            Value::Function(function) => match &function.name {
                Some(name) => write!(f, "function {}({})", name, function.params.join(", ")),
                None => write!(f, "function({})", function.params.join(", ")),
            },
            Value::Builtin(builtin) => write!(f, "<built-in {}>", builtin.name),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        self.fmt_nested(f, &mut Vec::new(), false)
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.fmt_nested(f, &mut Vec::new(), true)
    }
}

/// Iterative teardown. A loop that rewraps a value (`a = [a]`) builds
/// nesting far deeper than source nesting allows, and the derived
/// recursive drop would exhaust the host stack on such chains.
impl Drop for Value {
    fn drop(&mut self) {
        // Only the sole owner of a non-empty container has anything to
        // tear down; everything else drops shallowly.
        let deep = match self {
            Value::Array(items) => Rc::strong_count(items) == 1 && !items.borrow().is_empty(),
            Value::Object(map) => Rc::strong_count(map) == 1 && !map.borrow().is_empty(),
            _ => false,
        };
        if !deep {
            return;
        }
        let mut stack = vec![std::mem::replace(self, Value::Null)];
        while let Some(mut value) = stack.pop() {
            match &mut value {
                Value::Array(items) if Rc::strong_count(items) == 1 => {
                    stack.append(&mut items.borrow_mut());
                }
                Value::Object(map) if Rc::strong_count(map) == 1 => {
                    let mut map = map.borrow_mut();
                    while let Some((_, child)) = map.pop_first() {
                        stack.push(child);
                    }
                }
                _ => {}
            }
            // The container behind `value` is empty now, so dropping it
            // here cannot recurse.
        }
    }
}

/// The non-local exits (`return`/`break`/`continue`) travel up the
/// evaluation call chain as a tagged outcome instead of host exceptions, so
/// every statement boundary decides explicitly whether to propagate or
/// consume them.
#[derive(Debug)]
pub enum Flow {
    Normal(Value),
    Return(Value),
    Break,
    Continue,
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub timeout: Duration,
    pub memory_limit_bytes: usize,
    pub max_output_len: usize,
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            timeout: Duration::from_millis(5_000),
            memory_limit_bytes: 16 * 1024 * 1024,
            max_output_len: 64 * 1024,
            max_call_depth: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Fresh,
    Running,
    Failed,
    Cleaned,
}

/// One isolated execution context: a global scope, an output buffer, and
/// resource-limit counters. Two interpreters never share state.
pub struct Interpreter {
    globals: Scope,
    limits: Limits,
    deadline: Instant,
    depth: usize,
    expr_depth: usize,
    allocated_bytes: usize,
    output: String,
    output_truncated: bool,
    state: ContextState,
}

/// Bound on expression evaluation recursion. The parser caps source
/// nesting, but left-leaning operator and index chains grow the tree one
/// level per operand without nesting in the source, so evaluation carries
/// its own cap.
const MAX_EXPR_DEPTH: usize = 2_000;

impl Interpreter {
    pub fn new(limits: Limits) -> Self {
        Interpreter {
            globals: stdlib::create_global_env(),
            limits,
            deadline: Instant::now(),
            depth: 0,
            expr_depth: 0,
            allocated_bytes: 0,
            output: String::new(),
            output_truncated: false,
            state: ContextState::Fresh,
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// Drains the output buffer accumulated by `print`/`println`.
    pub fn take_output(&mut self) -> String {
        self.output_truncated = false;
        std::mem::take(&mut self.output)
    }

    pub fn set_global(&self, name: impl Into<String>, value: Value) {
        self.globals.define(name, value, false);
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    /// Discards all bindings and rebuilds a builtins-only global scope.
    pub fn reset(&mut self) {
        self.globals = stdlib::create_global_env();
        self.output.clear();
        self.output_truncated = false;
        self.allocated_bytes = 0;
        self.depth = 0;
        self.expr_depth = 0;
        self.state = ContextState::Fresh;
    }

    /// Releases the context. Idempotent; any later `run` fails with a
    /// `RuntimeError`.
    pub fn cleanup(&mut self) {
        self.globals = Environment::root();
        self.output.clear();
        self.state = ContextState::Cleaned;
    }

    /// Runs a program against this context's persistent global scope and
    /// returns the value of its last expression statement, if any.
    pub fn run(&mut self, program: &Program) -> Result<Option<Value>> {
        if self.state == ContextState::Cleaned {
            return runtime_error("execution context has been cleaned up");
        }
        self.state = ContextState::Running;
        self.deadline = Instant::now() + self.limits.timeout;
        self.depth = 0;
        self.expr_depth = 0;

        let globals = Rc::clone(&self.globals);
        let mut last = None;
        for stmt in &program.body {
            match self.exec_stmt(stmt, &globals) {
                Ok(Flow::Normal(value)) => {
                    if matches!(stmt.kind, StmtKind::Expression(_)) {
                        last = Some(value);
                    }
                }
                Ok(Flow::Return(_)) => {
                    self.state = ContextState::Failed;
                    return self.illegal_unwind("return", "a function", stmt.pos);
                }
                Ok(Flow::Break) => {
                    self.state = ContextState::Failed;
                    return self.illegal_unwind("break", "a loop", stmt.pos);
                }
                Ok(Flow::Continue) => {
                    self.state = ContextState::Failed;
                    return self.illegal_unwind("continue", "a loop", stmt.pos);
                }
                Err(err) => {
                    debug!("execution failed: {}", err);
                    self.state = ContextState::Failed;
                    return Err(err);
                }
            }
        }

        Ok(last)
    }

    fn illegal_unwind<T>(&self, keyword: &str, context: &str, pos: Pos) -> Result<T> {
        rt_err(
            format!("illegal '{}' outside of {}", keyword, context),
            pos,
        )
    }

    /// Cooperative limit check, run before every statement, loop iteration
    /// and function call.
    fn check_limits(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(Error::Timeout {
                limit_ms: self.limits.timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// Records an approximate allocation and fails once the context exceeds
    /// its memory ceiling.
    pub(crate) fn charge(&mut self, bytes: usize) -> Result<()> {
        self.allocated_bytes = self.allocated_bytes.saturating_add(bytes);
        if self.allocated_bytes > self.limits.memory_limit_bytes {
            return Err(Error::QuotaExceeded {
                message: format!(
                    "memory limit of {} bytes exceeded",
                    self.limits.memory_limit_bytes
                ),
            });
        }
        Ok(())
    }

    /// Appends to the bounded output buffer, truncating at the configured
    /// maximum instead of growing without bound.
    pub(crate) fn write_output(&mut self, text: &str) {
        let remaining = self.limits.max_output_len.saturating_sub(self.output.len());
        if remaining == 0 {
            self.output_truncated = true;
            return;
        }
        if text.len() <= remaining {
            self.output.push_str(text);
        } else {
            let mut end = remaining;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            self.output.push_str(&text[..end]);
            self.output_truncated = true;
        }
    }

    fn check_denylist(&self, name: &str, pos: Pos) -> Result<()> {
        if FORBIDDEN_NAMES.contains(&name) {
            return security_error(format!(
                "use of forbidden name '{}' (line {}, column {})",
                name, pos.line, pos.column
            ));
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt], env: &Scope) -> Result<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt, env)? {
                Flow::Normal(_) => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal(Value::Null))
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Scope) -> Result<Flow> {
        self.check_limits()?;

        match &stmt.kind {
            StmtKind::Expression(expr) => Ok(Flow::Normal(self.eval_expr(expr, env)?)),
            StmtKind::Block(body) => {
                let block_env = Environment::nested(env);
                self.exec_block(body, &block_env)
            }
            StmtKind::If {
                condition,
                consequent,
                alternate,
            } => {
                if self.eval_expr(condition, env)?.is_truthy() {
                    self.exec_stmt(consequent, env)
                } else if let Some(alternate) = alternate {
                    self.exec_stmt(alternate, env)
                } else {
                    Ok(Flow::Normal(Value::Null))
                }
            }
            StmtKind::While { condition, body } => {
                loop {
                    self.check_limits()?;
                    if !self.eval_expr(condition, env)?.is_truthy() {
                        break;
                    }
                    match self.exec_stmt(body, env)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal(_) => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal(Value::Null))
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                // The loop gets its own scope so `for (var i = ...)` does
                // not leak into the enclosing one.
                let loop_env = Environment::nested(env);
                if let Some(init) = init {
                    self.exec_stmt(init, &loop_env)?;
                }
                loop {
                    self.check_limits()?;
                    if let Some(test) = test {
                        if !self.eval_expr(test, &loop_env)?.is_truthy() {
                            break;
                        }
                    }
                    match self.exec_stmt(body, &loop_env)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal(_) => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                    if let Some(update) = update {
                        self.eval_expr(update, &loop_env)?;
                    }
                }
                Ok(Flow::Normal(Value::Null))
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::VariableDeclaration {
                name,
                init,
                constant,
            } => {
                self.check_denylist(name, stmt.pos)?;
                let value = match init {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Null,
                };
                env.define(name.clone(), value, *constant);
                Ok(Flow::Normal(Value::Null))
            }
            StmtKind::FunctionDeclaration { name, params, body } => {
                self.check_denylist(name, stmt.pos)?;
                self.charge(64)?;
                let function = Value::Function(Rc::new(Function {
                    name: Some(name.clone()),
                    params: params.clone(),
                    body: FunctionBody::Block(body.clone()),
                    closure: Rc::clone(env),
                }));
                env.define(name.clone(), function, false);
                Ok(Flow::Normal(Value::Null))
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => self.exec_switch(discriminant, cases, env),
        }
    }

    fn exec_switch(
        &mut self,
        discriminant: &Expr,
        cases: &[SwitchCase],
        env: &Scope,
    ) -> Result<Flow> {
        let subject = self.eval_expr(discriminant, env)?;

        let mut start = None;
        for (index, case) in cases.iter().enumerate() {
            if let Some(test) = &case.test {
                if self.eval_expr(test, env)? == subject {
                    start = Some(index);
                    break;
                }
            }
        }
        if start.is_none() {
            start = cases.iter().position(|case| case.test.is_none());
        }
        let Some(start) = start else {
            return Ok(Flow::Normal(Value::Null));
        };

        let switch_env = Environment::nested(env);
        // Cases fall through until a `break`.
        for case in &cases[start..] {
            match self.exec_block(&case.body, &switch_env)? {
                Flow::Break => return Ok(Flow::Normal(Value::Null)),
                Flow::Normal(_) => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal(Value::Null))
    }

    fn eval_expr(&mut self, expr: &Expr, env: &Scope) -> Result<Value> {
        if self.expr_depth >= MAX_EXPR_DEPTH {
            return rt_err("expression too deeply nested", expr.pos);
        }
        self.expr_depth += 1;
        let result = self.eval_expr_kind(expr, env);
        self.expr_depth -= 1;
        result
    }

    fn eval_expr_kind(&mut self, expr: &Expr, env: &Scope) -> Result<Value> {
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::String(s) => Ok(Value::String(s.clone())),
            ExprKind::Boolean(b) => Ok(Value::Boolean(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Identifier(name) => {
                self.check_denylist(name, expr.pos)?;
                match env.get(name) {
                    Some(value) => Ok(value),
                    None => rt_err(format!("undefined variable '{}'", name), expr.pos),
                }
            }
            ExprKind::Array(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval_expr(element, env)?);
                }
                self.charge(24 + 16 * items.len())?;
                Ok(Value::array(items))
            }
            ExprKind::Object(properties) => {
                let mut map = BTreeMap::new();
                for Property { key, value } in properties {
                    self.check_denylist(key, expr.pos)?;
                    map.insert(key.clone(), self.eval_expr(value, env)?);
                }
                self.charge(48 + 32 * map.len())?;
                Ok(Value::object(map))
            }
            ExprKind::Unary { operator, operand } => {
                let value = self.eval_expr(operand, env)?;
                match (*operator, value) {
                    (UnaryOp::Not, value) => Ok(Value::Boolean(!value.is_truthy())),
                    (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Plus, Value::Number(n)) => Ok(Value::Number(n)),
                    (_, value) => rt_err(
                        format!("unary operand must be a number, got {}", value.type_name()),
                        operand.pos,
                    ),
                }
            }
            ExprKind::Binary {
                operator,
                left,
                right,
            } => {
                let left_val = self.eval_expr(left, env)?;
                let right_val = self.eval_expr(right, env)?;
                self.binary_op(*operator, left_val, right_val, expr.pos)
            }
            ExprKind::Logical {
                operator,
                left,
                right,
            } => {
                let left_val = self.eval_expr(left, env)?;
                match operator {
                    // Short-circuit: the deciding operand is the result.
                    LogicalOp::And if !left_val.is_truthy() => Ok(left_val),
                    LogicalOp::Or if left_val.is_truthy() => Ok(left_val),
                    _ => self.eval_expr(right, env),
                }
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval_expr(test, env)?.is_truthy() {
                    self.eval_expr(consequent, env)
                } else {
                    self.eval_expr(alternate, env)
                }
            }
            ExprKind::Assignment {
                operator,
                target,
                value,
            } => self.eval_assignment(*operator, target, value, env),
            ExprKind::Call { callee, arguments } => {
                let callee_val = self.eval_expr(callee, env)?;
                let mut args = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    args.push(self.eval_expr(argument, env)?);
                }
                self.call_value(callee_val, args, expr.pos)
            }
            ExprKind::Member {
                object,
                property,
                computed,
            } => {
                let object_val = self.eval_expr(object, env)?;
                let key = self.eval_expr(property, env)?;
                self.member_get(&object_val, &key, *computed, expr.pos)
            }
            ExprKind::ArrowFunction { param, body } => {
                self.charge(64)?;
                let body = match body {
                    ArrowBody::Expr(expr) => FunctionBody::Expr((**expr).clone()),
                    ArrowBody::Block(stmts) => FunctionBody::Block(stmts.clone()),
                };
                Ok(Value::Function(Rc::new(Function {
                    name: None,
                    params: vec![param.clone()],
                    body,
                    closure: Rc::clone(env),
                })))
            }
            ExprKind::Function { name, params, body } => {
                self.charge(64)?;
                Ok(Value::Function(Rc::new(Function {
                    name: name.clone(),
                    params: params.clone(),
                    body: FunctionBody::Block(body.clone()),
                    closure: Rc::clone(env),
                })))
            }
        }
    }

    fn binary_op(&mut self, op: BinaryOp, left: Value, right: Value, pos: Pos) -> Result<Value> {
        match op {
            BinaryOp::Add => match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                // '+' doubles as concatenation when either side is a string.
                (Value::String(_), _) | (_, Value::String(_)) => {
                    let joined = format!("{}{}", left, right);
                    self.charge(joined.len())?;
                    Ok(Value::String(joined))
                }
                _ => rt_err(
                    format!(
                        "cannot add {} and {}",
                        left.type_name(),
                        right.type_name()
                    ),
                    pos,
                ),
            },
            BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo
            | BinaryOp::Power => {
                let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                    return rt_err(
                        format!(
                            "arithmetic requires numbers, got {} and {}",
                            left.type_name(),
                            right.type_name()
                        ),
                        pos,
                    );
                };
                match op {
                    BinaryOp::Subtract => Ok(Value::Number(a - b)),
                    BinaryOp::Multiply => Ok(Value::Number(a * b)),
                    BinaryOp::Divide => {
                        if *b == 0.0 {
                            rt_err("division by zero", pos)
                        } else {
                            Ok(Value::Number(a / b))
                        }
                    }
                    BinaryOp::Modulo => {
                        if *b == 0.0 {
                            rt_err("modulo by zero", pos)
                        } else {
                            Ok(Value::Number(a % b))
                        }
                    }
                    BinaryOp::Power => Ok(Value::Number(a.powf(*b))),
                    _ => unreachable!(),
                }
            }
            BinaryOp::Equal => Ok(Value::Boolean(left == right)),
            BinaryOp::NotEqual => Ok(Value::Boolean(left != right)),
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                let ordering = match (&left, &right) {
                    (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => {
                        return rt_err(
                            format!(
                                "cannot compare {} and {}",
                                left.type_name(),
                                right.type_name()
                            ),
                            pos,
                        )
                    }
                };
                let result = match (op, ordering) {
                    (_, None) => false, // NaN comparisons
                    (BinaryOp::Less, Some(ord)) => ord.is_lt(),
                    (BinaryOp::LessEqual, Some(ord)) => ord.is_le(),
                    (BinaryOp::Greater, Some(ord)) => ord.is_gt(),
                    (BinaryOp::GreaterEqual, Some(ord)) => ord.is_ge(),
                    _ => unreachable!(),
                };
                Ok(Value::Boolean(result))
            }
        }
    }

    fn eval_assignment(
        &mut self,
        operator: AssignOp,
        target: &Expr,
        value: &Expr,
        env: &Scope,
    ) -> Result<Value> {
        let new_value = self.eval_expr(value, env)?;

        match &target.kind {
            ExprKind::Identifier(name) => {
                self.check_denylist(name, target.pos)?;
                let value = match operator {
                    AssignOp::Assign => new_value,
                    AssignOp::AddAssign | AssignOp::SubAssign => {
                        let old = match env.get(name) {
                            Some(value) => value,
                            None => {
                                return rt_err(
                                    format!("undefined variable '{}'", name),
                                    target.pos,
                                )
                            }
                        };
                        let op = compound_op(operator);
                        self.binary_op(op, old, new_value, target.pos)?
                    }
                };
                match env.assign(name, value.clone()) {
                    Ok(()) => Ok(value),
                    Err(AssignError::Undefined) => rt_err(
                        format!("cannot assign to undefined variable '{}'", name),
                        target.pos,
                    ),
                    Err(AssignError::Constant) => rt_err(
                        format!("cannot assign to constant '{}'", name),
                        target.pos,
                    ),
                }
            }
            ExprKind::Member {
                object,
                property,
                computed,
            } => {
                let object_val = self.eval_expr(object, env)?;
                let key = self.eval_expr(property, env)?;
                let value = match operator {
                    AssignOp::Assign => new_value,
                    AssignOp::AddAssign | AssignOp::SubAssign => {
                        let old = self.member_get(&object_val, &key, *computed, target.pos)?;
                        self.binary_op(compound_op(operator), old, new_value, target.pos)?
                    }
                };
                self.member_set(&object_val, &key, value.clone(), target.pos)?;
                Ok(value)
            }
            _ => rt_err("invalid assignment target", target.pos),
        }
    }

    fn member_get(&self, object: &Value, key: &Value, computed: bool, pos: Pos) -> Result<Value> {
        if let Value::String(name) = key {
            self.check_denylist(name, pos)?;
        }

        match (object, key) {
            (Value::Null, _) => rt_err("cannot access property of null", pos),
            (Value::Object(map), Value::String(name)) => {
                Ok(map.borrow().get(name).cloned().unwrap_or(Value::Null))
            }
            (Value::Array(items), Value::Number(index)) => {
                let items = items.borrow();
                let i = index_for(*index, items.len(), pos)?;
                Ok(items[i].clone())
            }
            (Value::String(s), Value::Number(index)) => {
                let chars: Vec<char> = s.chars().collect();
                let i = index_for(*index, chars.len(), pos)?;
                Ok(Value::String(chars[i].to_string()))
            }
            _ if computed => rt_err(
                format!(
                    "cannot index {} with {}",
                    object.type_name(),
                    key.type_name()
                ),
                pos,
            ),
            _ => rt_err(
                format!("cannot access property of {}", object.type_name()),
                pos,
            ),
        }
    }

    fn member_set(&mut self, object: &Value, key: &Value, value: Value, pos: Pos) -> Result<()> {
        if let Value::String(name) = key {
            self.check_denylist(name, pos)?;
        }

        match (object, key) {
            (Value::Null, _) => rt_err("cannot access property of null", pos),
            (Value::Object(map), Value::String(name)) => {
                self.charge(32 + name.len())?;
                map.borrow_mut().insert(name.clone(), value);
                Ok(())
            }
            (Value::Array(items), Value::Number(index)) => {
                let mut items = items.borrow_mut();
                let i = index_for(*index, items.len(), pos)?;
                items[i] = value;
                Ok(())
            }
            _ => rt_err(
                format!("cannot assign to property of {}", object.type_name()),
                pos,
            ),
        }
    }

    pub(crate) fn call_value(&mut self, callee: Value, args: Vec<Value>, pos: Pos) -> Result<Value> {
        match &callee {
            Value::Function(function) => self.call_function(function, args, pos),
            Value::Builtin(builtin) => {
                if let Some(arity) = builtin.arity {
                    if args.len() != arity {
                        return rt_err(
                            format!(
                                "{} expects {} argument{}, got {}",
                                builtin.name,
                                arity,
                                if arity == 1 { "" } else { "s" },
                                args.len()
                            ),
                            pos,
                        );
                    }
                }
                (builtin.func)(self, args)
            }
            other => rt_err(
                format!("cannot call a value of type {}", other.type_name()),
                pos,
            ),
        }
    }

    fn call_function(&mut self, function: &Function, args: Vec<Value>, pos: Pos) -> Result<Value> {
        self.check_limits()?;
        if self.depth >= self.limits.max_call_depth {
            return rt_err(
                format!("maximum call depth of {} exceeded", self.limits.max_call_depth),
                pos,
            );
        }
        if args.len() != function.params.len() {
            let name = function.name.as_deref().unwrap_or("function");
            return rt_err(
                format!(
                    "{} expects {} argument{}, got {}",
                    name,
                    function.params.len(),
                    if function.params.len() == 1 { "" } else { "s" },
                    args.len()
                ),
                pos,
            );
        }

        // Lexical scoping: the call frame extends the closure's captured
        // environment, not the caller's.
        let call_env = Environment::nested(&function.closure);
        for (param, arg) in function.params.iter().zip(args) {
            call_env.define(param.clone(), arg, false);
        }

        self.depth += 1;
        let outcome = match &function.body {
            FunctionBody::Expr(expr) => self.eval_expr(expr, &call_env).map(Flow::Normal),
            FunctionBody::Block(body) => self.exec_block(body, &call_env),
        };
        self.depth -= 1;

        match outcome? {
            Flow::Return(value) | Flow::Normal(value) => Ok(value),
            Flow::Break => self.illegal_unwind("break", "a loop", pos),
            Flow::Continue => self.illegal_unwind("continue", "a loop", pos),
        }
    }
}

fn compound_op(operator: AssignOp) -> BinaryOp {
    match operator {
        AssignOp::AddAssign => BinaryOp::Add,
        AssignOp::SubAssign => BinaryOp::Subtract,
        AssignOp::Assign => unreachable!("plain assignment has no binary op"),
    }
}

fn index_for(index: f64, len: usize, pos: Pos) -> Result<usize> {
    if index.fract() != 0.0 || index < 0.0 {
        return rt_err(format!("invalid index {}", index), pos);
    }
    let i = index as usize;
    if i >= len {
        return rt_err(
            format!("index {} out of bounds for length {}", i, len),
            pos,
        );
    }
    Ok(i)
}

pub(crate) fn rt_err<T>(message: impl Display, pos: Pos) -> Result<T> {
    runtime_error(format!(
        "{} (line {}, column {})",
        message, pos.line, pos.column
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::tokenizer::tokenize;
    use test_case::test_case;

    fn run_source(interp: &mut Interpreter, source: &str) -> Result<Option<Value>> {
        let tokens = tokenize(source)?;
        let program = parse(&tokens)?;
        interp.run(&program)
    }

    fn eval(source: &str) -> Result<Option<Value>> {
        let mut interp = Interpreter::new(Limits::default());
        run_source(&mut interp, source)
    }

    fn eval_value(source: &str) -> Value {
        eval(source).unwrap().expect("expected a result value")
    }

    fn eval_output(source: &str) -> String {
        let mut interp = Interpreter::new(Limits::default());
        run_source(&mut interp, source).unwrap();
        interp.take_output()
    }

    #[test_case("1 + 2 * 3", 7.0)]
    #[test_case("(1 + 2) * 3", 9.0)]
    #[test_case("10 % 3", 1.0)]
    #[test_case("2 ^ 3 ^ 2", 512.0; "power is right associative")]
    #[test_case("-2 ^ 2", -4.0; "negation applies to the whole power")]
    #[test_case("2 ^ -1", 0.5)]
    #[test_case("+5", 5.0)]
    fn test_arithmetic(source: &str, expected: f64) {
        assert_eq!(eval_value(source), Value::Number(expected));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(
            eval_value("\"count: \" + 3"),
            Value::String("count: 3".to_string())
        );
        assert_eq!(
            eval_value("1 + \"!\""),
            Value::String("1!".to_string())
        );
    }

    #[test]
    fn test_mixed_type_arithmetic_fails() {
        assert!(eval("1 + true").is_err());
        assert!(eval("null - 1").is_err());
        assert!(eval("[1] * 2").is_err());
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval("1 / 0").unwrap_err();
        assert_eq!(err.kind(), "RuntimeError");
        assert!(eval("5 % 0").is_err());
    }

    #[test]
    fn test_equality_has_no_coercion() {
        assert_eq!(eval_value("1 == 1"), Value::Boolean(true));
        assert_eq!(eval_value("1 == \"1\""), Value::Boolean(false));
        assert_eq!(eval_value("0 == false"), Value::Boolean(false));
        assert_eq!(eval_value("null == null"), Value::Boolean(true));
        assert_eq!(eval_value("[1, 2] == [1, 2]"), Value::Boolean(true));
        assert_eq!(eval_value("1 != 2"), Value::Boolean(true));
    }

    #[test]
    fn test_logical_short_circuit() {
        // The right side must not be evaluated when the left decides.
        assert_eq!(
            eval_value("false and missing_variable"),
            Value::Boolean(false)
        );
        assert_eq!(eval_value("true or missing_variable"), Value::Boolean(true));
        assert_eq!(eval_value("1 and 2"), Value::Number(2.0));
        assert_eq!(eval_value("0 or 3"), Value::Number(3.0));
        assert_eq!(eval_value("not 0"), Value::Boolean(true));
    }

    #[test]
    fn test_conditional_expression() {
        assert_eq!(
            eval_value("\"big\" if 11 > 10 else \"small\""),
            Value::String("big".to_string())
        );
        // The untaken branch is never evaluated.
        assert_eq!(
            eval_value("1 if true else missing_variable"),
            Value::Number(1.0)
        );
    }

    #[test]
    fn test_scoping_shadowing_does_not_leak() {
        let output = eval_output(
            "var x = 10\nfunction f() { var x = 20\n return x }\nprint(f())\nprint(x)",
        );
        assert_eq!(output, "2010");
    }

    #[test]
    fn test_closures_capture_by_reference() {
        let output = eval_output(
            "function make(n) { return function() { n = n + 1\n return n } }\n\
             var c = make(0)\nprintln(c())\nprintln(c())",
        );
        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn test_arrow_functions() {
        assert_eq!(eval_value("(x -> x * 2)(21)"), Value::Number(42.0));
        let output = eval_output(
            "var base = 10\nvar add = n -> { return base + n }\nprintln(add(5))",
        );
        assert_eq!(output, "15\n");
    }

    #[test]
    fn test_recursion() {
        assert_eq!(
            eval_value("function fact(n) { return 1 if n <= 1 else n * fact(n - 1) }\nfact(5)"),
            Value::Number(120.0)
        );
    }

    #[test]
    fn test_call_depth_limit() {
        let err = eval("function f() { return f() }\nf()").unwrap_err();
        assert_eq!(err.kind(), "RuntimeError");
        assert!(err.to_string().contains("call depth"));
    }

    #[test]
    fn test_undefined_variable_names_position() {
        let err = eval("\nmystery").unwrap_err();
        assert_eq!(err.kind(), "RuntimeError");
        let message = err.to_string();
        assert!(message.contains("mystery"));
        assert!(message.contains("line 2"));
    }

    #[test]
    fn test_const_rejects_reassignment() {
        let err = eval("const x = 1\nx = 2").unwrap_err();
        assert!(err.to_string().contains("constant"));
        assert!(eval("const x = 1\nx += 1").is_err());
    }

    #[test]
    fn test_compound_assignment() {
        assert_eq!(eval_value("var x = 1\nx += 4\nx"), Value::Number(5.0));
        assert_eq!(eval_value("var x = 10\nx -= 4\nx"), Value::Number(6.0));
        assert_eq!(
            eval_value("var a = [1, 2]\na[0] += 10\na[0]"),
            Value::Number(11.0)
        );
        assert_eq!(
            eval_value("var o = {n: 1}\no.n += 1\no.n"),
            Value::Number(2.0)
        );
    }

    #[test]
    fn test_member_and_index_access() {
        assert_eq!(eval_value("[10, 20, 30][1]"), Value::Number(20.0));
        assert_eq!(
            eval_value("var o = {greeting: \"hi\"}\no.greeting"),
            Value::String("hi".to_string())
        );
        assert_eq!(eval_value("\"abc\"[2]"), Value::String("c".to_string()));
        // Missing object keys read as null.
        assert_eq!(eval_value("({a: 1}).b"), Value::Null);
        assert!(eval("[1][5]").is_err());
        assert!(eval("[1][-1]").is_err());
    }

    #[test]
    fn test_member_access_on_null_fails() {
        let err = eval("var o = null\no.field").unwrap_err();
        assert_eq!(err.kind(), "RuntimeError");
        assert!(err.to_string().contains("null"));
    }

    #[test]
    fn test_calling_non_callable_fails() {
        let err = eval("var x = 5\nx(1)").unwrap_err();
        assert!(err.to_string().contains("cannot call"));
    }

    #[test]
    fn test_while_and_for_loops() {
        assert_eq!(
            eval_value("var sum = 0\nvar i = 1\nwhile (i <= 5) { sum += i\n i += 1 }\nsum"),
            Value::Number(15.0)
        );
        assert_eq!(
            eval_value("var sum = 0\nfor (var i = 0; i < 10; i += 1) { sum += i }\nsum"),
            Value::Number(45.0)
        );
        // The loop variable does not leak out of the for scope.
        assert!(eval("for (var i = 0; i < 3; i += 1) {}\ni").is_err());
    }

    #[test]
    fn test_break_and_continue() {
        assert_eq!(
            eval_value(
                "var sum = 0\nfor (var i = 0; i < 10; i += 1) {\n\
                 if (i == 3) { continue }\nif (i == 6) { break }\nsum += i }\nsum"
            ),
            Value::Number(12.0) // 0+1+2+4+5
        );
    }

    #[test]
    fn test_illegal_unwinds() {
        assert!(eval("break").is_err());
        assert!(eval("continue").is_err());
        assert!(eval("return 1").is_err());
        // break cannot cross a function boundary into an enclosing loop
        assert!(eval(
            "function f() { break }\nwhile (true) { f() }"
        )
        .is_err());
    }

    #[test]
    fn test_switch_matching_and_fallthrough() {
        let source = "function describe(n) {\n\
             switch (n) {\n\
                 case 1:\n return \"one\"\n\
                 case 2:\n case_two()\n\
                 default:\n return \"other\"\n\
             }\n}";
        assert_eq!(
            eval_value(&format!("{}\ndescribe(1)", source)),
            Value::String("one".to_string())
        );
        assert_eq!(
            eval_value(&format!("{}\ndescribe(9)", source)),
            Value::String("other".to_string())
        );

        // break leaves the switch without falling through
        let out = eval_output(
            "switch (2) {\n case 2:\n print(\"two\")\n break\n default:\n print(\"other\")\n}",
        );
        assert_eq!(out, "two");
    }

    #[test_case("eval(\"1\")")]
    #[test_case("require(\"x\")")]
    #[test_case("import(\"x\")")]
    #[test_case("var o = {}\no.__proto__")]
    #[test_case("var o = {}\no[\"constructor\"]")]
    #[test_case("({}).prototype = 1")]
    #[test_case("process")]
    fn test_sandbox_denylist(source: &str) {
        let err = eval(source).unwrap_err();
        assert_eq!(err.kind(), "SecurityError");
    }

    #[test]
    fn test_timeout_stops_infinite_loop() {
        let mut interp = Interpreter::new(Limits {
            timeout: Duration::from_millis(100),
            ..Limits::default()
        });
        let start = Instant::now();
        let err = run_source(&mut interp, "while (true) { }").unwrap_err();
        assert_eq!(err.kind(), "TimeoutError");
        assert!(start.elapsed() < Duration::from_millis(2_000));
        assert_eq!(interp.state(), ContextState::Failed);
    }

    #[test]
    fn test_memory_quota() {
        let mut interp = Interpreter::new(Limits {
            memory_limit_bytes: 4 * 1024,
            ..Limits::default()
        });
        let err = run_source(
            &mut interp,
            "var all = []\nwhile (true) { push(all, [1, 2, 3, 4]) }",
        )
        .unwrap_err();
        assert_eq!(err.kind(), "QuotaExceededError");
    }

    #[test]
    fn test_output_truncated_at_limit() {
        let mut interp = Interpreter::new(Limits {
            max_output_len: 10,
            ..Limits::default()
        });
        run_source(&mut interp, "for (var i = 0; i < 50; i += 1) { print(\"abc\") }").unwrap();
        assert_eq!(interp.output().len(), 10);
    }

    #[test]
    fn test_partial_output_survives_failure() {
        let mut interp = Interpreter::new(Limits::default());
        let result = run_source(&mut interp, "println(\"before\")\nboom()");
        assert!(result.is_err());
        assert_eq!(interp.output(), "before\n");
    }

    #[test]
    fn test_contexts_are_isolated() {
        let mut a = Interpreter::new(Limits::default());
        let mut b = Interpreter::new(Limits::default());
        run_source(&mut a, "var x = 10").unwrap();
        run_source(&mut b, "var x = 20").unwrap();
        assert_eq!(a.get_global("x"), Some(Value::Number(10.0)));
        assert_eq!(b.get_global("x"), Some(Value::Number(20.0)));

        a.cleanup();
        assert_eq!(b.get_global("x"), Some(Value::Number(20.0)));
        assert!(run_source(&mut b, "x").is_ok());
    }

    #[test]
    fn test_cleanup_is_idempotent_and_final() {
        let mut interp = Interpreter::new(Limits::default());
        run_source(&mut interp, "var x = 1").unwrap();
        interp.cleanup();
        interp.cleanup();
        assert_eq!(interp.state(), ContextState::Cleaned);
        assert!(run_source(&mut interp, "1").is_err());
    }

    #[test]
    fn test_repl_style_reentry_sees_prior_declarations() {
        let mut interp = Interpreter::new(Limits::default());
        run_source(&mut interp, "var counter = 0").unwrap();
        run_source(&mut interp, "counter += 1").unwrap();
        let value = run_source(&mut interp, "counter").unwrap();
        assert_eq!(value, Some(Value::Number(1.0)));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Number(42.0)), "42");
        assert_eq!(format!("{}", Value::Number(2.5)), "2.5");
        assert_eq!(format!("{}", Value::Null), "null");
        let list = Value::array(vec![Value::Number(1.0), Value::String("x".to_string())]);
        assert_eq!(format!("{}", list), "[1, \"x\"]");
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Number(1.0));
        assert_eq!(format!("{}", Value::object(map)), "{a: 1}");
    }

    #[test]
    fn test_self_referential_values_print_degenerately() {
        assert_eq!(
            eval_output("var a = [1]\npush(a, a)\nprint(a)"),
            "[1, [...]]"
        );
        assert_eq!(
            eval_output("var o = {name: \"x\"}\no.self = o\nprint(o)"),
            "{name: \"x\", self: {...}}"
        );
        assert_eq!(
            eval_value("var a = [1]\npush(a, a)\ntoString(a)"),
            Value::String("[1, [...]]".to_string())
        );
    }

    #[test]
    fn test_self_referential_equality_terminates() {
        assert_eq!(
            eval_value("var a = [1]\npush(a, a)\na == a"),
            Value::Boolean(true)
        );
        // Two distinct cycles of the same shape compare equal; the acyclic
        // parts decide.
        assert_eq!(
            eval_value("var a = [1]\npush(a, a)\nvar b = [1]\npush(b, b)\na == b"),
            Value::Boolean(true)
        );
        assert_eq!(
            eval_value("var a = [1]\npush(a, a)\nvar b = [2]\npush(b, b)\na == b"),
            Value::Boolean(false)
        );
        assert_eq!(
            eval_value("var o = {}\no.self = o\nvar p = {}\np.self = p\no == p"),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_long_operator_chains_are_bounded() {
        // Long enough to out-recurse the evaluator, short enough to parse.
        let source = format!("0{}", " + 1".repeat(3_000));
        let err = eval(&source).unwrap_err();
        assert_eq!(err.kind(), "RuntimeError");

        let source = format!("0{}", " + 1".repeat(500));
        assert_eq!(eval_value(&source), Value::Number(500.0));
    }

    #[test]
    fn test_deeply_rewrapped_values_tear_down_cleanly() {
        // Each iteration nests the array one level deeper, far past any
        // depth a recursive teardown could survive.
        let mut interp = Interpreter::new(Limits::default());
        run_source(
            &mut interp,
            "var a = []\nfor (var i = 0; i < 100000; i = i + 1) { a = [a] }",
        )
        .unwrap();

        // Rebinding drops the old chain mid-run; the interpreter drop
        // covers the teardown of the final one.
        run_source(&mut interp, "a = null").unwrap();
        drop(interp);
    }
}
