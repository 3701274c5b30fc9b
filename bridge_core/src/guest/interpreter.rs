use super::ast::{
    AssignOp, BinaryOp, Expr, ExprKind, Function, FunctionBody, Import, LogicalOp, ModuleExport,
    Pattern, Program, Stmt, UnaryOp, UpdateOp, VarKind,
};
use super::builtins;
use super::scope::{Scope, ScopeRef};
use super::value::{Closure, FunctionRef, GuestFunction, Promise, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Default limit on nested guest calls before a `RangeError` is raised.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 100;

const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Error,
    TypeError,
    ReferenceError,
    RangeError,
    SyntaxError,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorType::Error => "Error",
            ErrorType::TypeError => "TypeError",
            ErrorType::ReferenceError => "ReferenceError",
            ErrorType::RangeError => "RangeError",
            ErrorType::SyntaxError => "SyntaxError",
        };
        f.write_str(name)
    }
}

/// An exception propagating through guest code.
#[derive(Debug, Clone, Error)]
pub enum Exception {
    /// Raised by the runtime itself.
    #[error("{kind}: {message}")]
    Error { kind: ErrorType, message: String },

    /// Raised by a guest `throw` statement or a rejected promise.
    #[error("Uncaught {}", describe_thrown(.0))]
    Thrown(Value),
}

fn describe_thrown(value: &Value) -> String {
    if let Value::Object(props) = value {
        let props = props.read();
        if let (Some(name), Some(message)) = (props.get("name"), props.get("message")) {
            return format!("{}: {}", name.to_js_string(), message.to_js_string());
        }
    }
    value.inspect()
}

impl Exception {
    pub fn type_error(message: impl Into<String>) -> Self {
        Exception::Error {
            kind: ErrorType::TypeError,
            message: message.into(),
        }
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        Exception::Error {
            kind: ErrorType::ReferenceError,
            message: message.into(),
        }
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Exception::Error {
            kind: ErrorType::RangeError,
            message: message.into(),
        }
    }

    pub fn error(kind: ErrorType, message: impl Into<String>) -> Self {
        Exception::Error {
            kind,
            message: message.into(),
        }
    }

    /// The value a `catch` clause observes.
    pub fn to_value(&self) -> Value {
        match self {
            Exception::Error { kind, message } => error_object(&kind.to_string(), message),
            Exception::Thrown(value) => value.clone(),
        }
    }
}

/// Builds a `{ name, message }` error object.
pub fn error_object(name: &str, message: &str) -> Value {
    let mut props = IndexMap::new();
    props.insert("name".to_string(), Value::from(name));
    props.insert("message".to_string(), Value::from(message));
    Value::object(props)
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Tree-walking evaluator. One interpreter is created per module evaluation
/// or per host call; all persistent state lives in scopes and values.
pub struct Interpreter {
    depth: usize,
    max_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALL_DEPTH)
    }
}

impl Interpreter {
    pub fn new(max_depth: usize) -> Self {
        Self {
            depth: 0,
            max_depth,
        }
    }

    /// Evaluates a module body in `scope`. The scope must already hold the
    /// per-module bindings (`module`, `exports`, `require`, ...).
    pub fn run_module(&mut self, program: &Program, scope: &ScopeRef) -> Result<(), Exception> {
        self.hoist(&program.body, scope);
        for stmt in &program.body {
            if !matches!(self.exec(stmt, scope)?, Flow::Normal) {
                break;
            }
        }
        Ok(())
    }

    /// Calls a guest or native function.
    pub fn call(&mut self, callee: &Value, args: &[Value]) -> Result<Value, Exception> {
        let Value::Function(function) = callee else {
            return Err(Exception::type_error(format!(
                "{} is not a function",
                callee.inspect()
            )));
        };
        if self.depth >= self.max_depth {
            return Err(Exception::range_error("Maximum call stack size exceeded"));
        }
        self.depth += 1;
        let result = match function.as_ref() {
            GuestFunction::Native(native) => (native.call)(self, args),
            GuestFunction::Closure(closure) => self.call_closure(closure, args),
        };
        self.depth -= 1;
        result
    }

    fn call_closure(&mut self, closure: &Closure, args: &[Value]) -> Result<Value, Exception> {
        let scope = Scope::child(&closure.env);
        let outcome = self.invoke(&closure.decl, args, &scope);
        if !closure.decl.is_async {
            return outcome;
        }
        let settled = match outcome {
            Ok(Value::Promise(inner)) => inner.as_ref().clone(),
            Ok(value) => Promise::Fulfilled(value),
            Err(exception) => Promise::Rejected(exception.to_value()),
        };
        Ok(Value::Promise(Arc::new(settled)))
    }

    fn invoke(&mut self, decl: &Function, args: &[Value], scope: &ScopeRef) -> Result<Value, Exception> {
        for (index, param) in decl.params.iter().enumerate() {
            let value = if param.rest {
                Value::array(args.iter().skip(index).cloned().collect())
            } else {
                args.get(index).cloned().unwrap_or_default()
            };
            let value = match (&value, &param.default) {
                (Value::Undefined, Some(default)) => self.eval(default, scope)?,
                _ => value,
            };
            self.bind_pattern(&param.pattern, value, scope, true)?;
        }

        match &decl.body {
            Some(FunctionBody::Block(body)) => {
                self.hoist(body, scope);
                for stmt in body {
                    match self.exec(stmt, scope)? {
                        Flow::Normal => {}
                        Flow::Return(value) => return Ok(value),
                        Flow::Break | Flow::Continue => break,
                    }
                }
                Ok(Value::Undefined)
            }
            Some(FunctionBody::Expr(expr)) => self.eval(expr, scope),
            None => Ok(Value::Undefined),
        }
    }

    fn make_closure(&self, decl: &Arc<Function>, scope: &ScopeRef, inferred: Option<&str>) -> Value {
        let name = decl
            .name
            .as_deref()
            .or(inferred)
            .unwrap_or_default()
            .to_string();
        Value::Function(Arc::new(GuestFunction::Closure(Closure {
            decl: decl.clone(),
            env: scope.clone(),
            name,
        })))
    }

    /// Function declarations are visible throughout their enclosing block.
    fn hoist(&mut self, body: &[Stmt], scope: &ScopeRef) {
        for stmt in body {
            match stmt {
                Stmt::Function(decl) if decl.has_body() => {
                    let closure = self.make_closure(decl, scope, None);
                    if let Some(name) = &decl.name {
                        scope.declare(name.clone(), closure, true);
                    }
                }
                Stmt::Export(ModuleExport::Declaration(inner)) => {
                    if let Stmt::Function(decl) = inner.as_ref() {
                        if !decl.has_body() {
                            continue;
                        }
                        let closure = self.make_closure(decl, scope, None);
                        if let Some(name) = &decl.name {
                            scope.declare(name.clone(), closure.clone(), true);
                            set_export(scope, name, closure);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn exec_block(&mut self, body: &[Stmt], parent: &ScopeRef) -> Result<Flow, Exception> {
        let scope = Scope::child(parent);
        self.hoist(body, &scope);
        for stmt in body {
            match self.exec(stmt, &scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &ScopeRef) -> Result<Flow, Exception> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || self.exec_inner(stmt, scope))
    }

    fn exec_inner(&mut self, stmt: &Stmt, scope: &ScopeRef) -> Result<Flow, Exception> {
        match stmt {
            Stmt::Var {
                kind,
                decls,
                declare,
                ..
            } => {
                if !declare {
                    for decl in decls {
                        let value = match &decl.init {
                            Some(init) => self.eval_named(init, scope, single_name(&decl.target))?,
                            None => Value::Undefined,
                        };
                        self.bind_pattern(&decl.target, value, scope, *kind != VarKind::Const)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Function(_) => Ok(Flow::Normal),
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.exec(consequent, scope)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { test, body } => {
                while self.eval(test, scope)?.truthy() {
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body, scope),
            Stmt::ForOf {
                kind,
                target,
                iterable,
                body,
            } => {
                let iterable = self.eval(iterable, scope)?;
                for item in iterate(&iterable)? {
                    let iteration = Scope::child(scope);
                    self.bind_pattern(target, item, &iteration, *kind != VarKind::Const)?;
                    match self.exec(body, &iteration)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(body) => self.exec_block(body, scope),
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Continue(_) => Ok(Flow::Continue),
            Stmt::Throw { value, .. } => Err(Exception::Thrown(self.eval(value, scope)?)),
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => self.exec_try(block, param.as_ref(), handler.as_deref(), finalizer.as_deref(), scope),
            Stmt::Export(export) => self.exec_export(export, scope),
            Stmt::Import(import) => {
                self.exec_import(import, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::TypeAlias { .. } | Stmt::Interface { .. } | Stmt::Empty => Ok(Flow::Normal),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        scope: &ScopeRef,
    ) -> Result<Flow, Exception> {
        let loop_scope = Scope::child(scope);
        if let Some(init) = init {
            self.exec(init, &loop_scope)?;
        }
        loop {
            if let Some(test) = test {
                if !self.eval(test, &loop_scope)?.truthy() {
                    break;
                }
            }
            match self.exec(body, &loop_scope)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            if let Some(update) = update {
                self.eval(update, &loop_scope)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        block: &[Stmt],
        param: Option<&Pattern>,
        handler: Option<&[Stmt]>,
        finalizer: Option<&[Stmt]>,
        scope: &ScopeRef,
    ) -> Result<Flow, Exception> {
        let mut result = self.exec_block(block, scope);
        let caught = match &result {
            Err(exception) => Some(exception.to_value()),
            Ok(_) => None,
        };
        if let (Some(caught), Some(handler)) = (caught, handler) {
            let catch_scope = Scope::child(scope);
            if let Some(param) = param {
                self.bind_pattern(param, caught, &catch_scope, true)?;
            }
            result = self.exec_block(handler, &catch_scope);
        }
        if let Some(finalizer) = finalizer {
            match self.exec_block(finalizer, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        result
    }

    fn exec_export(&mut self, export: &ModuleExport, scope: &ScopeRef) -> Result<Flow, Exception> {
        match export {
            ModuleExport::Declaration(decl) => {
                self.exec(decl, scope)?;
                if let Stmt::Var { decls, declare: false, .. } = decl.as_ref() {
                    for decl in decls {
                        for name in decl.target.bound_names() {
                            let value = scope.lookup(name).unwrap_or_default();
                            set_export(scope, name, value);
                        }
                    }
                }
            }
            ModuleExport::Default { value, .. } => {
                let value = self.eval(value, scope)?;
                set_export(scope, "default", value);
            }
            ModuleExport::Assign { value, .. } => {
                let value = self.eval(value, scope)?;
                if let Some(Value::Object(module)) = scope.lookup("module") {
                    module.write().insert("exports".to_string(), value);
                }
            }
            ModuleExport::Named { specifiers, .. } => {
                for specifier in specifiers {
                    let value = scope.lookup(&specifier.local).ok_or_else(|| {
                        Exception::reference_error(format!("{} is not defined", specifier.local))
                    })?;
                    set_export(scope, &specifier.exported, value);
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_import(&mut self, import: &Import, scope: &ScopeRef) -> Result<(), Exception> {
        let require = scope
            .lookup("require")
            .ok_or_else(|| Exception::reference_error("require is not defined"))?;
        let exports = self.call(&require, &[Value::from(import.source.as_str())])?;

        if let Some(local) = &import.default {
            let default = match self.get_member(&exports, "default") {
                Ok(Value::Undefined) | Err(_) => exports.clone(),
                Ok(value) => value,
            };
            scope.declare(local.clone(), default, false);
        }
        if let Some(local) = &import.namespace {
            scope.declare(local.clone(), exports.clone(), false);
        }
        for specifier in &import.named {
            let value = self.get_member(&exports, &specifier.imported)?;
            scope.declare(specifier.local.clone(), value, false);
        }
        Ok(())
    }

    fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        value: Value,
        scope: &ScopeRef,
        mutable: bool,
    ) -> Result<(), Exception> {
        match pattern {
            Pattern::Ident(name) => {
                scope.declare(name.clone(), value, mutable);
                Ok(())
            }
            Pattern::Object(props) => {
                if value.is_nullish() {
                    return Err(Exception::type_error(format!(
                        "Cannot destructure '{}' as it is {}.",
                        value.to_js_string(),
                        value.to_js_string()
                    )));
                }
                for prop in props {
                    let mut item = self.get_member(&value, &prop.key)?;
                    if let (Value::Undefined, Some(default)) = (&item, &prop.default) {
                        item = self.eval(default, scope)?;
                    }
                    self.bind_pattern(&prop.value, item, scope, mutable)?;
                }
                Ok(())
            }
            Pattern::Array(items) => {
                let values = iterate(&value)?;
                for (index, item) in items.iter().enumerate() {
                    if let Some(item) = item {
                        let element = values.get(index).cloned().unwrap_or_default();
                        self.bind_pattern(item, element, scope, mutable)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Evaluates `expr`, naming an anonymous function after the binding it
    /// initializes.
    fn eval_named(&mut self, expr: &Expr, scope: &ScopeRef, name: Option<&str>) -> Result<Value, Exception> {
        match &expr.kind {
            ExprKind::Function(decl) if decl.name.is_none() => Ok(self.make_closure(decl, scope, name)),
            _ => self.eval(expr, scope),
        }
    }

    pub fn eval(&mut self, expr: &Expr, scope: &ScopeRef) -> Result<Value, Exception> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || self.eval_inner(expr, scope))
    }

    fn eval_inner(&mut self, expr: &Expr, scope: &ScopeRef) -> Result<Value, Exception> {
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::from(s.as_str())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Undefined => Ok(Value::Undefined),
            ExprKind::Ident(name) => scope
                .lookup(name)
                .ok_or_else(|| Exception::reference_error(format!("{} is not defined", name))),
            ExprKind::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                Ok(Value::array(values))
            }
            ExprKind::Object(props) => {
                let mut map = IndexMap::new();
                for prop in props {
                    let value = self.eval_named(&prop.value, scope, Some(&prop.key))?;
                    map.insert(prop.key.clone(), value);
                }
                Ok(Value::object(map))
            }
            ExprKind::Function(decl) => Ok(self.make_closure(decl, scope, None)),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                })
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                Ok(binary_op(*op, &left, &right))
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            ExprKind::Assign { op, target, value } => self.eval_assign(*op, target, value, scope),
            ExprKind::Update { op, prefix, target } => {
                let current = self.eval(target, scope)?.to_number();
                let updated = match op {
                    UpdateOp::Increment => current + 1.0,
                    UpdateOp::Decrement => current - 1.0,
                };
                self.assign_to(target, Value::Number(updated), scope)?;
                Ok(Value::Number(if *prefix { updated } else { current }))
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, scope),
            ExprKind::Member { object, property } => {
                let object = self.eval(object, scope)?;
                self.get_member(&object, property)
            }
            ExprKind::Index { object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                self.get_index(&object, &index)
            }
            ExprKind::Await(operand) => {
                let value = self.eval(operand, scope)?;
                match value {
                    Value::Promise(promise) => match promise.as_ref() {
                        Promise::Fulfilled(value) => Ok(value.clone()),
                        Promise::Rejected(reason) => Err(Exception::Thrown(reason.clone())),
                    },
                    other => Ok(other),
                }
            }
            ExprKind::Typeof(operand) => {
                if let ExprKind::Ident(name) = &operand.kind {
                    if !scope.has(name) {
                        return Ok(Value::from("undefined"));
                    }
                }
                let value = self.eval(operand, scope)?;
                Ok(Value::from(value.type_of()))
            }
        }
    }

    fn eval_assign(
        &mut self,
        op: AssignOp,
        target: &Expr,
        value: &Expr,
        scope: &ScopeRef,
    ) -> Result<Value, Exception> {
        let value = match op.binary() {
            None => {
                let name = match &target.kind {
                    ExprKind::Ident(name) => Some(name.as_str()),
                    _ => None,
                };
                self.eval_named(value, scope, name)?
            }
            Some(binary) => {
                let current = self.eval(target, scope)?;
                let rhs = self.eval(value, scope)?;
                binary_op(binary, &current, &rhs)
            }
        };
        self.assign_to(target, value.clone(), scope)?;
        Ok(value)
    }

    fn assign_to(&mut self, target: &Expr, value: Value, scope: &ScopeRef) -> Result<(), Exception> {
        match &target.kind {
            ExprKind::Ident(name) => scope.assign(name, value),
            ExprKind::Member { object, property } => {
                let object = self.eval(object, scope)?;
                set_member(&object, property, value)
            }
            ExprKind::Index { object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                if let (Value::Array(items), Some(position)) = (&object, array_index(&index)) {
                    let mut items = items.write();
                    if position >= items.len() {
                        items.resize(position + 1, Value::Undefined);
                    }
                    items[position] = value;
                    return Ok(());
                }
                set_member(&object, &index.to_js_string(), value)
            }
            _ => Err(Exception::error(
                ErrorType::SyntaxError,
                "Invalid left-hand side in assignment",
            )),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], scope: &ScopeRef) -> Result<Value, Exception> {
        let function = self.eval(callee, scope)?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, scope)?);
        }
        if !function.is_function() {
            return Err(Exception::type_error(format!(
                "{} is not a function",
                describe_callee(callee)
            )));
        }
        self.call(&function, &values)
    }

    pub fn get_member(&mut self, object: &Value, property: &str) -> Result<Value, Exception> {
        let value = match object {
            Value::Undefined | Value::Null => {
                return Err(Exception::type_error(format!(
                    "Cannot read properties of {} (reading '{}')",
                    object.to_js_string(),
                    property
                )))
            }
            Value::Object(props) => props.read().get(property).cloned().unwrap_or_default(),
            Value::Array(items) => match property {
                "length" => Value::Number(items.read().len() as f64),
                _ => builtins::array_method(items, property).unwrap_or_default(),
            },
            Value::String(text) => match property {
                "length" => Value::Number(text.chars().count() as f64),
                _ => builtins::string_method(text, property).unwrap_or_default(),
            },
            Value::Number(n) => builtins::number_method(*n, property).unwrap_or_default(),
            Value::Function(function) => function_property(function, property),
            Value::Bool(_) | Value::Promise(_) => Value::Undefined,
        };
        Ok(value)
    }

    fn get_index(&mut self, object: &Value, index: &Value) -> Result<Value, Exception> {
        match (object, array_index(index)) {
            (Value::Array(items), Some(position)) => {
                Ok(items.read().get(position).cloned().unwrap_or_default())
            }
            (Value::String(text), Some(position)) => Ok(text
                .chars()
                .nth(position)
                .map(|ch| Value::from(ch.to_string()))
                .unwrap_or_default()),
            _ => self.get_member(object, &index.to_js_string()),
        }
    }
}

fn single_name(pattern: &Pattern) -> Option<&str> {
    match pattern {
        Pattern::Ident(name) => Some(name.as_str()),
        _ => None,
    }
}

fn describe_callee(callee: &Expr) -> String {
    match &callee.kind {
        ExprKind::Ident(name) => name.clone(),
        ExprKind::Member { object, property } => {
            format!("{}.{}", describe_callee(object), property)
        }
        _ => "expression".to_string(),
    }
}

fn function_property(function: &FunctionRef, property: &str) -> Value {
    match property {
        "name" => Value::from(function.name()),
        "length" => Value::Number(function.arity() as f64),
        _ => Value::Undefined,
    }
}

fn array_index(index: &Value) -> Option<usize> {
    match index {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        _ => None,
    }
}

fn set_member(object: &Value, property: &str, value: Value) -> Result<(), Exception> {
    match object {
        Value::Undefined | Value::Null => Err(Exception::type_error(format!(
            "Cannot set properties of {} (setting '{}')",
            object.to_js_string(),
            property
        ))),
        Value::Object(props) => {
            props.write().insert(property.to_string(), value);
            Ok(())
        }
        Value::Array(items) if property == "length" => {
            let length = value.to_number();
            if length < 0.0 || length.fract() != 0.0 {
                return Err(Exception::range_error("Invalid array length"));
            }
            items.write().resize(length as usize, Value::Undefined);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Writes `name` onto the current `module.exports` object.
fn set_export(scope: &ScopeRef, name: &str, value: Value) {
    let Some(Value::Object(module)) = scope.lookup("module") else {
        return;
    };
    let exports = module.read().get("exports").cloned();
    if let Some(Value::Object(exports)) = exports {
        exports.write().insert(name.to_string(), value);
    }
}

fn iterate(value: &Value) -> Result<Vec<Value>, Exception> {
    match value {
        Value::Array(items) => Ok(items.read().clone()),
        Value::String(text) => Ok(text.chars().map(|ch| Value::from(ch.to_string())).collect()),
        other => Err(Exception::type_error(format!(
            "{} is not iterable",
            other.to_js_string()
        ))),
    }
}

/// Applies a binary operator with the guest language's coercion rules.
pub fn binary_op(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let stringy = |v: &Value| {
                matches!(
                    v,
                    Value::String(_) | Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Promise(_)
                )
            };
            if stringy(left) || stringy(right) {
                Value::from(format!("{}{}", left.to_js_string(), right.to_js_string()))
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::LtEq => ordering.is_le(),
                _ => ordering.is_ge(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::{parse, Dialect};

    /// Runs `source` as a module and returns its exports object.
    fn run(source: &str) -> Result<Value, Exception> {
        let program = parse(source, Dialect::Script).expect("source should parse");
        let scope = Scope::global();
        builtins::install_globals(&scope);
        let exports = Value::empty_object();
        let mut module = IndexMap::new();
        module.insert("exports".to_string(), exports);
        let module = Value::object(module);
        scope.declare("module", module.clone(), false);
        let mut interpreter = Interpreter::default();
        interpreter.run_module(&program, &scope)?;
        let exports = match &module {
            Value::Object(props) => props.read().get("exports").cloned().unwrap_or_default(),
            _ => Value::Undefined,
        };
        Ok(exports)
    }

    fn export(exports: &Value, name: &str) -> Value {
        exports
            .as_object()
            .and_then(|props| props.read().get(name).cloned())
            .unwrap_or_default()
    }

    #[test]
    fn test_exported_function_can_be_called() {
        let exports = run("export function add(left, right) { return left + right; }").unwrap();
        let add = export(&exports, "add");
        let result = Interpreter::default()
            .call(&add, &[Value::Number(2.0), Value::Number(3.0)])
            .unwrap();
        assert_eq!(result.as_number(), Some(5.0));
    }

    #[test]
    fn test_closures_capture_their_scope() {
        let exports = run(
            "function counter() { let n = 0; return () => { n += 1; return n; }; }\n\
             const next = counter();\n\
             next(); next();\n\
             export const value = next();",
        )
        .unwrap();
        assert_eq!(export(&exports, "value").as_number(), Some(3.0));
    }

    #[test]
    fn test_loops_and_destructuring() {
        let exports = run(
            "let total = 0;\n\
             for (let i = 0; i < 10; i++) { if (i % 2) continue; total += i; }\n\
             for (const [a, b] of [[1, 2], [3, 4]]) { total += a * b; }\n\
             const { x, y = 5 } = { x: 1 };\n\
             export const result = total + x + y;",
        )
        .unwrap();
        assert_eq!(export(&exports, "result").as_number(), Some(20.0 + 14.0 + 6.0));
    }

    #[test]
    fn test_try_catch_and_finally() {
        let exports = run(
            "let log = '';\n\
             try { undefinedThing(); } catch (e) { log += e.name; } finally { log += '!'; }\n\
             try { throw { name: 'Custom', message: 'x' }; } catch ({ name }) { log += name; }\n\
             export { log };",
        )
        .unwrap();
        assert_eq!(export(&exports, "log").as_str(), Some("ReferenceError!Custom"));
    }

    #[test]
    fn test_async_functions_settle_and_await() {
        let exports = run(
            "async function inner(v) { return v * 2; }\n\
             async function outer() { const r = await inner(4); return r + 1; }\n\
             async function fails() { throw 'bad'; }\n\
             export const p = outer();\n\
             export const q = fails();",
        )
        .unwrap();
        match export(&exports, "p") {
            Value::Promise(promise) => match promise.as_ref() {
                Promise::Fulfilled(v) => assert_eq!(v.as_number(), Some(9.0)),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("expected promise, got {:?}", other),
        }
        assert!(matches!(
            export(&exports, "q"),
            Value::Promise(ref p) if matches!(p.as_ref(), Promise::Rejected(_))
        ));
    }

    #[test]
    fn test_call_depth_limit_raises_range_error() {
        let error = run("function f(n) { return f(n + 1); }\nf(0);").unwrap_err();
        assert!(matches!(
            error,
            Exception::Error {
                kind: ErrorType::RangeError,
                ..
            }
        ));
    }

    #[test]
    fn test_export_assign_replaces_exports() {
        let exports = run("export = function named(a) { return a; };").unwrap();
        assert!(exports.is_function());
        assert_eq!(exports.as_function().map(|f| f.name().to_string()), Some("named".to_string()));
    }

    #[test]
    fn test_const_reassignment_is_a_type_error() {
        let error = run("const a = 1;\na = 2;").unwrap_err();
        assert_eq!(error.to_string(), "TypeError: Assignment to constant variable.");
    }

    #[test]
    fn test_coercions() {
        assert_eq!(
            binary_op(BinaryOp::Add, &Value::from("a"), &Value::Number(1.0)).as_str(),
            Some("a1")
        );
        assert_eq!(
            binary_op(BinaryOp::Add, &Value::Bool(true), &Value::Number(1.0)).as_number(),
            Some(2.0)
        );
        assert!(!binary_op(BinaryOp::Lt, &Value::Number(f64::NAN), &Value::Number(1.0)).truthy());
        assert!(binary_op(BinaryOp::Lt, &Value::from("a"), &Value::from("b")).truthy());
    }

    #[test]
    fn test_anonymous_functions_take_binding_names() {
        let exports = run("const f = () => 1;\nexport const obj = { g: function () {} };\nexport { f };").unwrap();
        let f = export(&exports, "f");
        assert_eq!(f.as_function().map(|f| f.name().to_string()).as_deref(), Some("f"));
        let obj = export(&exports, "obj");
        let g = obj.as_object().and_then(|o| o.read().get("g").cloned()).unwrap();
        assert_eq!(g.as_function().map(|f| f.name().to_string()).as_deref(), Some("g"));
    }

    #[test]
    fn test_long_operator_chains_evaluate() {
        let source = format!("export const v = 1{};", " + 1".repeat(220));
        let exports = run(&source).unwrap();
        assert_eq!(export(&exports, "v").as_number(), Some(221.0));
    }
}
