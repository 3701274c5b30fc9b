//! Semantic checks for the typed dialect.
//!
//! The checker walks one module, assigns a [`Type`] to every binding and
//! expression, reports diagnostics, and records the types of the module's
//! exports. Types of sibling modules in the same program are visible
//! through `import` when they were checked first; anything else imports as
//! `any`.

use super::diagnostics::Diagnostic;
use super::options::CompilerOptions;
use super::types::{ParamType, PropertyType, Signature, Type};
use crate::guest::ast::{
    AssignOp, BinaryOp, Expr, ExprKind, Function, FunctionBody, Import, LogicalOp, ModuleExport,
    Pattern, Program, Stmt, TypeAnn, UnaryOp, VarDecl, VarKind,
};
use crate::guest::Span;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

/// Statically known type of one exported name.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedSymbol {
    pub name: String,
    pub ty: Type,
    /// Call signatures in declaration order. Overloaded functions list
    /// their overloads, not the implementation.
    pub signatures: Vec<Signature>,
    pub is_async: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleTypes {
    pub exports: IndexMap<String, ExportedSymbol>,
}

impl ModuleTypes {
    pub fn get(&self, name: &str) -> Option<&ExportedSymbol> {
        self.exports.get(name)
    }

    /// The module seen as one object value, for namespace imports.
    pub fn as_object(&self) -> Type {
        Type::Object(
            self.exports
                .values()
                .map(|symbol| PropertyType {
                    name: symbol.name.clone(),
                    ty: symbol.ty.clone(),
                    optional: false,
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
struct Binding {
    ty: Type,
    /// Set while a `typeof` guard narrows `ty`; assignments still check
    /// against the declared type.
    declared: Option<Type>,
    mutable: bool,
    signatures: Vec<Signature>,
    is_async: bool,
    overloaded: bool,
}

impl Binding {
    fn value(ty: Type, mutable: bool) -> Self {
        let signatures = ty.signature().cloned().into_iter().collect();
        Self {
            ty,
            declared: None,
            mutable,
            signatures,
            is_async: false,
            overloaded: false,
        }
    }
}

enum ExportSource {
    Local(String),
    Value { ty: Type, is_async: bool },
}

struct FunctionContext {
    is_async: bool,
    declared: Option<Type>,
    returns: Vec<Type>,
    bare_return: bool,
}

pub struct Checker<'a> {
    file: String,
    dir: PathBuf,
    options: &'a CompilerOptions,
    modules: &'a HashMap<PathBuf, ModuleTypes>,
    scopes: Vec<HashMap<String, Binding>>,
    aliases: HashMap<String, TypeAnn>,
    resolving: HashSet<String>,
    functions: Vec<FunctionContext>,
    exported: Vec<(String, ExportSource)>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Checker<'a> {
    pub fn new(
        file: &Path,
        options: &'a CompilerOptions,
        modules: &'a HashMap<PathBuf, ModuleTypes>,
    ) -> Self {
        Self {
            file: file.display().to_string(),
            dir: file.parent().map(Path::to_path_buf).unwrap_or_default(),
            options,
            modules,
            scopes: vec![HashMap::new()],
            aliases: HashMap::new(),
            resolving: HashSet::new(),
            functions: Vec::new(),
            exported: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn check(mut self, program: &Program) -> (ModuleTypes, Vec<Diagnostic>) {
        self.collect_type_declarations(&program.body);
        self.hoist(&program.body);
        for stmt in &program.body {
            self.check_stmt(stmt);
        }
        let types = self.finish_exports();
        (types, self.diagnostics)
    }

    fn error(&mut self, span: Span, code: u32, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(&self.file, span, code, message));
    }

    fn strict_nulls(&self) -> bool {
        self.options.strict_null_checks
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn set_binding(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    fn declare_if_absent(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.entry(name.to_string()).or_insert(binding);
        }
    }

    // ---- type annotations ----

    fn collect_type_declarations(&mut self, body: &[Stmt]) {
        for stmt in body {
            let stmt = match stmt {
                Stmt::Export(ModuleExport::Declaration(inner)) => inner.as_ref(),
                other => other,
            };
            match stmt {
                Stmt::TypeAlias { name, ty, .. } => {
                    self.aliases.insert(name.clone(), ty.clone());
                }
                Stmt::Interface { name, members, .. } => {
                    self.aliases
                        .insert(name.clone(), TypeAnn::Object(members.clone()));
                }
                _ => {}
            }
        }
    }

    fn resolve_ann(&mut self, ann: &TypeAnn, span: Span) -> Type {
        match ann {
            TypeAnn::Named { name, args } => self.resolve_named(name, args, span),
            TypeAnn::Array(inner) => Type::Array(Box::new(self.resolve_ann(inner, span))),
            TypeAnn::Tuple(items) => {
                Type::Tuple(items.iter().map(|item| self.resolve_ann(item, span)).collect())
            }
            TypeAnn::Union(members) => Type::union(
                members
                    .iter()
                    .map(|member| self.resolve_ann(member, span))
                    .collect(),
            ),
            TypeAnn::Object(members) => Type::Object(
                members
                    .iter()
                    .map(|member| PropertyType {
                        name: member.name.clone(),
                        ty: self.resolve_ann(&member.ty, span),
                        optional: member.optional,
                    })
                    .collect(),
            ),
            TypeAnn::Function { params, ret } => {
                let params = params
                    .iter()
                    .map(|param| ParamType {
                        name: param.name.clone(),
                        ty: self.resolve_ann(&param.ty, span),
                        optional: param.optional,
                        rest: param.rest,
                    })
                    .collect();
                let ret = self.resolve_ann(ret, span);
                Type::function(params, ret)
            }
        }
    }

    fn resolve_named(&mut self, name: &str, args: &[TypeAnn], span: Span) -> Type {
        let arg = |checker: &mut Self, index: usize, fallback: Type| match args.get(index) {
            Some(ann) => checker.resolve_ann(ann, span),
            None => fallback,
        };
        match name {
            "number" => Type::Number,
            "string" => Type::String,
            "boolean" => Type::Boolean,
            "any" => Type::Any,
            "unknown" => Type::Unknown,
            "void" => Type::Void,
            "never" => Type::Never,
            "null" => Type::Null,
            "undefined" => Type::Undefined,
            "object" => Type::Object(Vec::new()),
            "Array" => Type::Array(Box::new(arg(self, 0, Type::Any))),
            "Promise" => Type::Promise(Box::new(arg(self, 0, Type::Any))),
            "Record" => {
                let key = arg(self, 0, Type::String);
                let value = arg(self, 1, Type::Any);
                Type::Record(Box::new(key), Box::new(value))
            }
            "Function" => Type::function(
                vec![ParamType {
                    name: "args".to_string(),
                    ty: Type::Array(Box::new(Type::Any)),
                    optional: false,
                    rest: true,
                }],
                Type::Any,
            ),
            _ => match self.aliases.get(name).cloned() {
                Some(target) => {
                    if !self.resolving.insert(name.to_string()) {
                        return Type::Reference {
                            name: name.to_string(),
                            target: Box::new(Type::Any),
                        };
                    }
                    let resolved = self.resolve_ann(&target, span);
                    self.resolving.remove(name);
                    match resolved {
                        Type::Object(_)
                        | Type::Union(_)
                        | Type::Function(_)
                        | Type::Tuple(_)
                        | Type::Record(..)
                        | Type::Array(_)
                        | Type::Promise(_) => Type::Reference {
                            name: name.to_string(),
                            target: Box::new(resolved),
                        },
                        primitive => primitive,
                    }
                }
                None => {
                    self.error(span, 2304, format!("Cannot find name '{}'.", name));
                    Type::Any
                }
            },
        }
    }

    // ---- declarations ----

    /// Pre-declares every name a block introduces so that functions can
    /// refer to bindings declared after them.
    fn hoist(&mut self, body: &[Stmt]) {
        let mut functions: IndexMap<String, Vec<&Function>> = IndexMap::new();
        for stmt in body {
            let stmt = match stmt {
                Stmt::Export(ModuleExport::Declaration(inner)) => inner.as_ref(),
                other => other,
            };
            match stmt {
                Stmt::Var {
                    kind,
                    decls,
                    declare,
                    ..
                } => {
                    for decl in decls {
                        if *declare {
                            self.declare_ambient(decl);
                            continue;
                        }
                        for name in decl.target.bound_names() {
                            self.declare_if_absent(
                                name,
                                Binding::value(Type::Any, *kind != VarKind::Const),
                            );
                        }
                    }
                }
                Stmt::Function(decl) => {
                    if let Some(name) = &decl.name {
                        functions.entry(name.clone()).or_default().push(decl);
                    }
                }
                Stmt::Import(import) => self.bind_import(import),
                _ => {}
            }
        }

        for (name, decls) in functions {
            let overloads: Vec<&Function> = decls.iter().copied().filter(|d| !d.has_body()).collect();
            let implementation = decls.iter().copied().find(|d| d.has_body());
            let is_async = decls.iter().any(|d| d.is_async);
            let (signatures, overloaded) = match implementation {
                Some(implementation) if overloads.is_empty() => {
                    (vec![self.declared_signature(implementation)], false)
                }
                _ => (
                    overloads
                        .iter()
                        .map(|d| self.declared_signature(d))
                        .collect::<Vec<_>>(),
                    true,
                ),
            };
            let ty = signatures
                .first()
                .cloned()
                .map(|s| Type::Function(Box::new(s)))
                .unwrap_or(Type::Any);
            self.set_binding(
                &name,
                Binding {
                    ty,
                    declared: None,
                    mutable: true,
                    signatures,
                    is_async,
                    overloaded,
                },
            );
        }
    }

    fn declare_ambient(&mut self, decl: &VarDecl) {
        let ty = match &decl.ty {
            Some(ann) => self.resolve_ann(ann, decl.span),
            None => Type::Any,
        };
        for name in decl.target.bound_names() {
            self.set_binding(name, Binding::value(ty.clone(), true));
        }
    }

    /// Signature from annotations alone, before the body is checked.
    fn declared_signature(&mut self, decl: &Function) -> Signature {
        let params = decl
            .params
            .iter()
            .map(|param| {
                let ty = match &param.ty {
                    Some(ann) => self.resolve_ann(ann, param.span),
                    None if param.rest => Type::Array(Box::new(Type::Any)),
                    None => Type::Any,
                };
                ParamType {
                    name: param.identifier().unwrap_or_default().to_string(),
                    ty,
                    optional: param.optional || param.default.is_some(),
                    rest: param.rest,
                }
            })
            .collect();
        let ret = match &decl.return_type {
            Some(ann) => {
                let ret = self.resolve_ann(ann, decl.span);
                if decl.is_async && !matches!(ret.resolved(), Type::Promise(_)) {
                    Type::Promise(Box::new(ret))
                } else {
                    ret
                }
            }
            None if decl.is_async => Type::Promise(Box::new(Type::Any)),
            None => Type::Any,
        };
        Signature { params, ret }
    }

    fn bind_import(&mut self, import: &Import) {
        let module = self.resolve_module(&import.source);
        if let Some(local) = &import.default {
            let binding = match module.and_then(|m| m.get("default")) {
                Some(symbol) => symbol_binding(symbol),
                None => Binding::value(Type::Any, false),
            };
            self.set_binding(local, binding);
        }
        if let Some(local) = &import.namespace {
            let ty = module.map(ModuleTypes::as_object).unwrap_or(Type::Any);
            self.set_binding(local, Binding::value(ty, false));
        }
        for specifier in &import.named {
            let binding = match module {
                Some(module) => match module.get(&specifier.imported) {
                    Some(symbol) => symbol_binding(symbol),
                    None => {
                        self.error(
                            import.span,
                            2305,
                            format!(
                                "Module '\"{}\"' has no exported member '{}'.",
                                import.source, specifier.imported
                            ),
                        );
                        Binding::value(Type::Any, false)
                    }
                },
                None => Binding::value(Type::Any, false),
            };
            self.set_binding(&specifier.local, binding);
        }
    }

    /// Types of a relative import checked earlier in the same program.
    fn resolve_module(&self, specifier: &str) -> Option<&'a ModuleTypes> {
        if !(specifier.starts_with("./") || specifier.starts_with("../")) {
            return None;
        }
        let modules = self.modules;
        let base = normalize_path(&self.dir.join(specifier));
        let candidates = [
            base.clone(),
            base.with_extension("ts"),
            base.join("index.ts"),
        ];
        candidates.iter().find_map(|candidate| modules.get(candidate))
    }

    // ---- statements ----

    fn check_stmt(&mut self, stmt: &Stmt) {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || self.check_stmt_inner(stmt))
    }

    fn check_stmt_inner(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Var {
                kind,
                decls,
                declare,
                ..
            } => {
                if !declare {
                    for decl in decls {
                        self.check_var_decl(*kind, decl);
                    }
                }
            }
            Stmt::Function(decl) => self.check_function_decl(decl),
            Stmt::Return { value, .. } => {
                let ty = match value {
                    Some(expr) => Some((self.expr_type(expr), expr.span)),
                    None => None,
                };
                self.record_return(ty);
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                self.expr_type(test);
                let when_true = self.narrowings(test, true);
                self.with_narrowing(when_true, |checker| checker.check_stmt(consequent));
                if let Some(alternate) = alternate {
                    let when_false = self.narrowings(test, false);
                    self.with_narrowing(when_false, |checker| checker.check_stmt(alternate));
                }
            }
            Stmt::While { test, body } => {
                self.expr_type(test);
                self.check_stmt(body);
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                self.push_scope();
                if let Some(init) = init.as_deref() {
                    self.hoist(std::slice::from_ref(init));
                    self.check_stmt(init);
                }
                if let Some(test) = test {
                    self.expr_type(test);
                }
                if let Some(update) = update {
                    self.expr_type(update);
                }
                self.check_stmt(body);
                self.pop_scope();
            }
            Stmt::ForOf {
                kind,
                target,
                iterable,
                body,
            } => {
                let iterable_ty = self.expr_type(iterable);
                if !matches!(
                    iterable_ty.resolved(),
                    Type::Array(_) | Type::Tuple(_) | Type::String | Type::Any
                ) {
                    self.error(
                        iterable.span,
                        2488,
                        format!(
                            "Type '{}' must have a '[Symbol.iterator]()' method that returns an iterator.",
                            iterable_ty
                        ),
                    );
                }
                self.push_scope();
                self.bind_pattern(target, &iterable_ty.element_type(), *kind != VarKind::Const);
                self.check_stmt(body);
                self.pop_scope();
            }
            Stmt::Block(body) => self.check_block(body),
            Stmt::Expr(expr) => {
                self.expr_type(expr);
            }
            Stmt::Throw { value, .. } => {
                self.expr_type(value);
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                self.check_block(block);
                if let Some(handler) = handler {
                    self.push_scope();
                    if let Some(param) = param {
                        self.bind_pattern(param, &Type::Any, true);
                    }
                    self.hoist(handler);
                    for stmt in handler {
                        self.check_stmt(stmt);
                    }
                    self.pop_scope();
                }
                if let Some(finalizer) = finalizer {
                    self.check_block(finalizer);
                }
            }
            Stmt::Export(export) => self.check_export(export),
            Stmt::TypeAlias { ty, span, .. } => {
                self.resolve_ann(ty, *span);
            }
            Stmt::Interface { members, span, .. } => {
                for member in members {
                    self.resolve_ann(&member.ty, *span);
                }
            }
            Stmt::Import(_) | Stmt::Break(_) | Stmt::Continue(_) | Stmt::Empty => {}
        }
    }

    fn check_block(&mut self, body: &[Stmt]) {
        self.push_scope();
        self.hoist(body);
        for stmt in body {
            self.check_stmt(stmt);
        }
        self.pop_scope();
    }

    fn check_var_decl(&mut self, kind: VarKind, decl: &VarDecl) {
        let declared = decl.ty.as_ref().map(|ann| self.resolve_ann(ann, decl.span));
        let mut is_async = false;
        let init_ty = match &decl.init {
            Some(init) => {
                let ty = self.expr_type(init);
                if let Some(expected) = &declared {
                    self.check_assignable(&ty, expected, init.span);
                }
                is_async = matches!(&init.kind, ExprKind::Function(f) if f.is_async);
                Some(ty)
            }
            None => None,
        };
        let ty = declared
            .or_else(|| init_ty.map(Type::widened))
            .unwrap_or(Type::Any);
        let mutable = kind != VarKind::Const;
        match &decl.target {
            Pattern::Ident(name) => {
                let mut binding = Binding::value(ty, mutable);
                binding.is_async = is_async;
                self.set_binding(name, binding);
            }
            pattern => self.bind_pattern(pattern, &ty, mutable),
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, ty: &Type, mutable: bool) {
        match pattern {
            Pattern::Ident(name) => self.set_binding(name, Binding::value(ty.clone(), mutable)),
            Pattern::Object(props) => {
                for prop in props {
                    let prop_ty = ty.property(&prop.key).unwrap_or(Type::Any);
                    self.bind_pattern(&prop.value, &prop_ty, mutable);
                }
            }
            Pattern::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    let Some(item) = item else { continue };
                    let item_ty = match ty.resolved() {
                        Type::Tuple(types) => types.get(index).cloned().unwrap_or(Type::Undefined),
                        other => other.element_type(),
                    };
                    self.bind_pattern(item, &item_ty, mutable);
                }
            }
        }
    }

    fn check_function_decl(&mut self, decl: &Function) {
        let signature = self.check_function(decl, false);
        let Some(name) = &decl.name else { return };
        if !decl.has_body() {
            return;
        }
        if let Some(binding) = self.scopes.last_mut().and_then(|scope| scope.get_mut(name)) {
            if !binding.overloaded {
                binding.ty = Type::Function(Box::new(signature.clone()));
                binding.signatures = vec![signature];
            }
        }
    }

    /// Checks a function's parameters and body and returns its signature
    /// with the return type declared or inferred.
    fn check_function(&mut self, decl: &Function, contextual: bool) -> Signature {
        self.push_scope();
        if let Some(name) = &decl.name {
            if self.lookup(name).is_none() {
                self.set_binding(name, Binding::value(Type::Any, false));
            }
        }
        let mut params = Vec::with_capacity(decl.params.len());
        for param in &decl.params {
            let declared = param.ty.as_ref().map(|ann| self.resolve_ann(ann, param.span));
            let default_ty = param.default.as_ref().map(|default| {
                let ty = self.expr_type(default);
                (ty, default.span)
            });
            if let (Some(expected), Some((actual, span))) = (&declared, &default_ty) {
                self.check_assignable(actual, expected, *span);
            }
            let ty = match (declared, default_ty) {
                (Some(ty), _) => ty,
                (None, Some((ty, _))) => ty.widened(),
                (None, None) => {
                    if self.options.no_implicit_any && !contextual {
                        let name = param.identifier().unwrap_or("__0");
                        self.error(
                            param.span,
                            7006,
                            format!("Parameter '{}' implicitly has an 'any' type.", name),
                        );
                    }
                    if param.rest {
                        Type::Array(Box::new(Type::Any))
                    } else {
                        Type::Any
                    }
                }
            };
            self.bind_pattern(&param.pattern, &ty, true);
            params.push(ParamType {
                name: param.identifier().unwrap_or_default().to_string(),
                ty,
                optional: param.optional || param.default.is_some(),
                rest: param.rest,
            });
        }

        let declared_ret = decl
            .return_type
            .as_ref()
            .map(|ann| self.resolve_ann(ann, decl.span));
        let declared_inner = match declared_ret {
            Some(ret) if decl.is_async => match ret.resolved() {
                Type::Promise(inner) => Some(inner.as_ref().clone()),
                Type::Any => Some(Type::Any),
                _ => {
                    self.error(
                        decl.span,
                        1064,
                        format!(
                            "The return type of an async function or method must be the global Promise<T> type. Did you mean to write 'Promise<{}>'?",
                            ret
                        ),
                    );
                    Some(Type::Any)
                }
            },
            other => other,
        };

        self.functions.push(FunctionContext {
            is_async: decl.is_async,
            declared: declared_inner.clone(),
            returns: Vec::new(),
            bare_return: false,
        });
        match &decl.body {
            Some(FunctionBody::Block(body)) => {
                self.hoist(body);
                for stmt in body {
                    self.check_stmt(stmt);
                }
            }
            Some(FunctionBody::Expr(expr)) => {
                let ty = self.expr_type(expr);
                self.record_return(Some((ty, expr.span)));
            }
            None => {}
        }
        let context = self.functions.pop();
        self.pop_scope();

        let inner = match (declared_inner, context) {
            (Some(declared), Some(context)) => {
                let must_return = !matches!(
                    declared.resolved(),
                    Type::Void | Type::Any | Type::Undefined | Type::Unknown | Type::Never
                );
                if let Some(FunctionBody::Block(body)) = &decl.body {
                    if must_return && context.returns.is_empty() && !ends_in_throw(body) {
                        self.error(
                            decl.span,
                            2355,
                            "A function whose declared type is neither 'undefined', 'void', nor 'any' must return a value.",
                        );
                    }
                }
                declared
            }
            (Some(declared), None) => declared,
            (None, Some(context)) if decl.has_body() => {
                let mut returns = context.returns;
                if returns.is_empty() {
                    Type::Void
                } else {
                    if context.bare_return {
                        returns.push(Type::Undefined);
                    }
                    Type::union(returns).widened()
                }
            }
            (None, _) => Type::Any,
        };

        let ret = if decl.is_async {
            match inner {
                Type::Promise(inner) => Type::Promise(inner),
                inner => Type::Promise(Box::new(inner)),
            }
        } else {
            inner
        };
        Signature { params, ret }
    }

    fn record_return(&mut self, value: Option<(Type, Span)>) {
        let declared = self.functions.last().and_then(|f| f.declared.clone());
        let is_async = self.functions.last().is_some_and(|f| f.is_async);
        match value {
            Some((ty, span)) => {
                let ty = match ty.resolved() {
                    Type::Promise(inner) if is_async => inner.as_ref().clone(),
                    _ => ty,
                };
                if let Some(expected) = &declared {
                    self.check_assignable(&ty, expected, span);
                }
                if let Some(context) = self.functions.last_mut() {
                    context.returns.push(ty);
                }
            }
            None => {
                if let Some(context) = self.functions.last_mut() {
                    context.bare_return = true;
                }
            }
        }
    }

    fn check_export(&mut self, export: &ModuleExport) {
        match export {
            ModuleExport::Declaration(inner) => {
                self.check_stmt(inner);
                let names: Vec<String> = match inner.as_ref() {
                    Stmt::Var {
                        decls,
                        declare: false,
                        ..
                    } => decls
                        .iter()
                        .flat_map(|d| d.target.bound_names())
                        .map(str::to_string)
                        .collect(),
                    Stmt::Function(decl) => decl.name.iter().cloned().collect(),
                    _ => Vec::new(),
                };
                for name in names {
                    if !self.exported.iter().any(|(exported, _)| *exported == name) {
                        self.exported
                            .push((name.clone(), ExportSource::Local(name)));
                    }
                }
            }
            ModuleExport::Default { value, .. } => {
                let source = self.export_source(value);
                self.exported.retain(|(name, _)| name != "default");
                self.exported.push(("default".to_string(), source));
            }
            ModuleExport::Assign { value, .. } => {
                let ty = self.expr_type(value);
                self.exported.clear();
                self.export_assignment(value, ty);
            }
            ModuleExport::Named { specifiers, span } => {
                for specifier in specifiers {
                    if self.lookup(&specifier.local).is_none() {
                        self.error(
                            *span,
                            2304,
                            format!("Cannot find name '{}'.", specifier.local),
                        );
                        continue;
                    }
                    self.exported.push((
                        specifier.exported.clone(),
                        ExportSource::Local(specifier.local.clone()),
                    ));
                }
            }
        }
    }

    fn export_source(&mut self, value: &Expr) -> ExportSource {
        match &value.kind {
            ExprKind::Ident(name) if self.lookup(name).is_some() => {
                ExportSource::Local(name.clone())
            }
            ExprKind::Function(f) => {
                let is_async = f.is_async;
                let ty = self.expr_type(value);
                ExportSource::Value { ty, is_async }
            }
            _ => ExportSource::Value {
                ty: self.expr_type(value),
                is_async: false,
            },
        }
    }

    /// `export = value` replaces the whole export set; a function is keyed
    /// by its name and an object contributes its properties.
    fn export_assignment(&mut self, value: &Expr, ty: Type) {
        if ty.signature().is_some() {
            let (name, source) = match &value.kind {
                ExprKind::Ident(name) => (name.clone(), ExportSource::Local(name.clone())),
                ExprKind::Function(f) => (
                    f.name.clone().unwrap_or_else(|| "default".to_string()),
                    ExportSource::Value {
                        ty,
                        is_async: f.is_async,
                    },
                ),
                _ => (
                    "default".to_string(),
                    ExportSource::Value {
                        ty,
                        is_async: false,
                    },
                ),
            };
            self.exported.push((name, source));
            return;
        }

        match (&value.kind, ty.resolved()) {
            (ExprKind::Object(props), _) => {
                let mut sources = Vec::with_capacity(props.len());
                for prop in props {
                    let source = match &prop.value.kind {
                        ExprKind::Ident(name) if self.lookup(name).is_some() => {
                            ExportSource::Local(name.clone())
                        }
                        ExprKind::Function(f) => ExportSource::Value {
                            ty: ty.property(&prop.key).unwrap_or(Type::Any),
                            is_async: f.is_async,
                        },
                        _ => ExportSource::Value {
                            ty: ty.property(&prop.key).unwrap_or(Type::Any),
                            is_async: false,
                        },
                    };
                    sources.push((prop.key.clone(), source));
                }
                self.exported.extend(sources);
            }
            (_, Type::Object(props)) => {
                let sources: Vec<(String, ExportSource)> = props
                    .iter()
                    .map(|prop| {
                        (
                            prop.name.clone(),
                            ExportSource::Value {
                                ty: prop.ty.clone(),
                                is_async: false,
                            },
                        )
                    })
                    .collect();
                self.exported.extend(sources);
            }
            _ => self.exported.push((
                "default".to_string(),
                ExportSource::Value {
                    ty,
                    is_async: false,
                },
            )),
        }
    }

    fn finish_exports(&mut self) -> ModuleTypes {
        let exported = std::mem::take(&mut self.exported);
        let mut exports = IndexMap::new();
        for (name, source) in exported {
            let symbol = match source {
                ExportSource::Local(local) => match self.lookup(&local) {
                    Some(binding) => ExportedSymbol {
                        name: name.clone(),
                        ty: binding.ty.clone(),
                        signatures: binding.signatures.clone(),
                        is_async: binding.is_async,
                    },
                    None => continue,
                },
                ExportSource::Value { ty, is_async } => ExportedSymbol {
                    name: name.clone(),
                    signatures: ty.signature().cloned().into_iter().collect(),
                    ty,
                    is_async,
                },
            };
            exports.insert(name, symbol);
        }
        ModuleTypes { exports }
    }

    // ---- expressions ----

    fn check_assignable(&mut self, actual: &Type, expected: &Type, span: Span) {
        if !actual.is_assignable_to(expected, self.strict_nulls()) {
            self.error(
                span,
                2322,
                format!("Type '{}' is not assignable to type '{}'.", actual, expected),
            );
        }
    }

    fn expr_type(&mut self, expr: &Expr) -> Type {
        self.expr_type_in(expr, false)
    }

    /// Bindings narrowed by a `typeof` guard in `test` when it evaluates to
    /// `outcome`.
    fn narrowings(&self, test: &Expr, outcome: bool) -> Vec<(String, Binding)> {
        let Some((name, tag, positive)) = typeof_guard(test) else {
            return Vec::new();
        };
        let Some(binding) = self.lookup(name) else {
            return Vec::new();
        };
        let keep_matching = positive == outcome;
        let narrowed = match binding.ty.resolved() {
            Type::Union(members) => Type::union(
                members
                    .iter()
                    .filter(|member| match typeof_matches(member, tag) {
                        Some(matches) => matches == keep_matching,
                        None => true,
                    })
                    .cloned()
                    .collect(),
            ),
            Type::Unknown if keep_matching => match typeof_type(tag) {
                Some(ty) => ty,
                None => return Vec::new(),
            },
            _ => return Vec::new(),
        };
        if narrowed == Type::Never || narrowed == binding.ty {
            return Vec::new();
        }
        let mut binding = binding.clone();
        binding.declared = Some(binding.declared.take().unwrap_or_else(|| binding.ty.clone()));
        binding.ty = narrowed;
        vec![(name.to_string(), binding)]
    }

    fn with_narrowing<T>(&mut self, narrowed: Vec<(String, Binding)>, f: impl FnOnce(&mut Self) -> T) -> T {
        if narrowed.is_empty() {
            return f(self);
        }
        self.push_scope();
        for (name, binding) in narrowed {
            self.set_binding(&name, binding);
        }
        let result = f(self);
        self.pop_scope();
        result
    }

    /// `contextual` is set for function expressions passed as arguments,
    /// whose parameters take their types from the callee.
    fn expr_type_in(&mut self, expr: &Expr, contextual: bool) -> Type {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || self.expr_type_inner(expr, contextual))
    }

    fn expr_type_inner(&mut self, expr: &Expr, contextual: bool) -> Type {
        match &expr.kind {
            ExprKind::Number(_) => Type::Number,
            ExprKind::Str(_) => Type::String,
            ExprKind::Bool(_) => Type::Boolean,
            ExprKind::Null => Type::Null,
            ExprKind::Undefined => Type::Undefined,
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(binding) => binding.ty.clone(),
                None => match global_type(name) {
                    Some(ty) => ty,
                    None => {
                        self.error(expr.span, 2304, format!("Cannot find name '{}'.", name));
                        Type::Any
                    }
                },
            },
            ExprKind::Array(items) => {
                let types: Vec<Type> = items.iter().map(|item| self.expr_type(item)).collect();
                Type::Array(Box::new(Type::union(types)))
            }
            ExprKind::Object(props) => Type::Object(
                props
                    .iter()
                    .map(|prop| PropertyType {
                        name: prop.key.clone(),
                        ty: self.expr_type(&prop.value).widened(),
                        optional: false,
                    })
                    .collect(),
            ),
            ExprKind::Function(decl) => Type::Function(Box::new(self.check_function(decl, contextual))),
            ExprKind::Unary { op, operand } => {
                self.expr_type(operand);
                match op {
                    UnaryOp::Neg | UnaryOp::Plus => Type::Number,
                    UnaryOp::Not => Type::Boolean,
                }
            }
            ExprKind::Binary { op, left, right } => {
                let left_ty = self.expr_type(left);
                let right_ty = self.expr_type(right);
                self.binary_type(*op, (&left_ty, left.span), (&right_ty, right.span))
            }
            ExprKind::Logical { op, left, right } => {
                let left_ty = self.expr_type(left);
                let guard = self.narrowings(left, *op == LogicalOp::And);
                let right_ty = self.with_narrowing(guard, |checker| checker.expr_type(right));
                match op {
                    LogicalOp::And => right_ty,
                    LogicalOp::Or | LogicalOp::Nullish => {
                        let left_ty = match left_ty {
                            Type::Union(members) => Type::union(
                                members
                                    .into_iter()
                                    .filter(|m| !matches!(m, Type::Null | Type::Undefined))
                                    .collect(),
                            ),
                            other => other,
                        };
                        Type::union(vec![left_ty, right_ty])
                    }
                }
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr_type(test);
                let when_true = self.narrowings(test, true);
                let consequent = self.with_narrowing(when_true, |checker| checker.expr_type(consequent));
                let when_false = self.narrowings(test, false);
                let alternate = self.with_narrowing(when_false, |checker| checker.expr_type(alternate));
                Type::union(vec![consequent, alternate])
            }
            ExprKind::Assign { op, target, value } => self.assign_type(*op, target, value),
            ExprKind::Update { target, .. } => {
                self.check_mutable(target);
                let ty = self.expr_type(target);
                if !ty.is_numeric() {
                    self.error(
                        target.span,
                        2356,
                        "An arithmetic operand must be of type 'any', 'number', 'bigint' or an enum type.",
                    );
                }
                Type::Number
            }
            ExprKind::Call { callee, args } => self.call_type(expr.span, callee, args),
            ExprKind::Member { object, property } => {
                let object_ty = self.expr_type(object);
                match object_ty.property(property) {
                    Some(ty) => ty,
                    None if matches!(object_ty.resolved(), Type::Unknown) => Type::Any,
                    None => {
                        self.error(
                            expr.span,
                            2339,
                            format!(
                                "Property '{}' does not exist on type '{}'.",
                                property, object_ty
                            ),
                        );
                        Type::Any
                    }
                }
            }
            ExprKind::Index { object, index } => {
                let object_ty = self.expr_type(object);
                self.expr_type(index);
                match (object_ty.resolved(), &index.kind) {
                    (Type::Tuple(items), ExprKind::Number(n)) => {
                        items.get(*n as usize).cloned().unwrap_or(Type::Undefined)
                    }
                    (Type::Object(_), ExprKind::Str(key)) => {
                        object_ty.property(key).unwrap_or(Type::Any)
                    }
                    (Type::Array(element), _) => element.as_ref().clone(),
                    (Type::Tuple(items), _) => Type::union(items.clone()),
                    (Type::Record(_, value), _) => value.as_ref().clone(),
                    (Type::String, _) => Type::String,
                    _ => Type::Any,
                }
            }
            ExprKind::Await(inner) => {
                let ty = self.expr_type(inner);
                match ty.resolved() {
                    Type::Promise(inner) => inner.as_ref().clone(),
                    _ => ty,
                }
            }
            ExprKind::Typeof(operand) => {
                self.expr_type(operand);
                Type::String
            }
        }
    }

    fn binary_type(&mut self, op: BinaryOp, left: (&Type, Span), right: (&Type, Span)) -> Type {
        let (left_ty, left_span) = left;
        let (right_ty, right_span) = right;
        match op {
            BinaryOp::Add => {
                if left_ty.is_any() || right_ty.is_any() {
                    Type::Any
                } else if left_ty.is_numeric() && right_ty.is_numeric() {
                    Type::Number
                } else if left_ty.is_stringish() || right_ty.is_stringish() {
                    Type::String
                } else {
                    self.error(
                        left_span.merge(&right_span),
                        2365,
                        format!(
                            "Operator '+' cannot be applied to types '{}' and '{}'.",
                            left_ty, right_ty
                        ),
                    );
                    Type::Any
                }
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                if !left_ty.is_numeric() {
                    self.error(
                        left_span,
                        2362,
                        "The left-hand side of an arithmetic operation must be of type 'any', 'number', 'bigint' or an enum type.",
                    );
                }
                if !right_ty.is_numeric() {
                    self.error(
                        right_span,
                        2363,
                        "The right-hand side of an arithmetic operation must be of type 'any', 'number', 'bigint' or an enum type.",
                    );
                }
                Type::Number
            }
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::StrictEq | BinaryOp::StrictNotEq => {
                Type::Boolean
            }
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
                let comparable = left_ty.is_any()
                    || right_ty.is_any()
                    || (left_ty.is_numeric() && right_ty.is_numeric())
                    || (left_ty.is_stringish() && right_ty.is_stringish());
                if !comparable {
                    self.error(
                        left_span.merge(&right_span),
                        2365,
                        format!(
                            "Operator '{}' cannot be applied to types '{}' and '{}'.",
                            op.symbol(),
                            left_ty,
                            right_ty
                        ),
                    );
                }
                Type::Boolean
            }
        }
    }

    fn check_mutable(&mut self, target: &Expr) {
        if let ExprKind::Ident(name) = &target.kind {
            if self.lookup(name).is_some_and(|binding| !binding.mutable) {
                self.error(
                    target.span,
                    2588,
                    format!("Cannot assign to '{}' because it is a constant.", name),
                );
            }
        }
    }

    fn assign_type(&mut self, op: AssignOp, target: &Expr, value: &Expr) -> Type {
        self.check_mutable(target);
        let target_ty = match &target.kind {
            ExprKind::Ident(name) => match self.lookup(name).and_then(|b| b.declared.clone()) {
                Some(declared) => declared,
                None => self.expr_type(target),
            },
            _ => self.expr_type(target),
        };
        let value_ty = self.expr_type(value);
        match op.binary() {
            None => {
                self.check_assignable(&value_ty, &target_ty, target.span);
                value_ty
            }
            Some(binary) => {
                let result = self.binary_type(
                    binary,
                    (&target_ty, target.span),
                    (&value_ty, value.span),
                );
                self.check_assignable(&result, &target_ty, target.span);
                result
            }
        }
    }

    fn call_type(&mut self, span: Span, callee: &Expr, args: &[Expr]) -> Type {
        let callee_ty = self.expr_type(callee);
        let arg_types: Vec<(Type, Span)> = args
            .iter()
            .map(|arg| (self.expr_type_in(arg, true), arg.span))
            .collect();

        if callee_ty.is_any() {
            return Type::Any;
        }

        let overloads = match &callee.kind {
            ExprKind::Ident(name) => self
                .lookup(name)
                .filter(|binding| binding.signatures.len() > 1)
                .map(|binding| binding.signatures.clone()),
            _ => None,
        };
        if let Some(overloads) = overloads {
            for signature in &overloads {
                if self.match_call(signature, &arg_types, span).is_empty() {
                    return signature.ret.clone();
                }
            }
            self.error(span, 2769, "No overload matches this call.");
            return Type::Any;
        }

        match callee_ty.signature().cloned() {
            Some(signature) => {
                let problems = self.match_call(&signature, &arg_types, span);
                self.diagnostics.extend(problems);
                signature.ret
            }
            None => {
                self.error(callee.span, 2349, "This expression is not callable.");
                Type::Any
            }
        }
    }

    fn match_call(&self, signature: &Signature, args: &[(Type, Span)], span: Span) -> Vec<Diagnostic> {
        let min = signature.min_args();
        let max = signature.max_args();
        let count = args.len();
        if count < min || max.is_some_and(|max| count > max) {
            let (code, message) = match max {
                None => (
                    2555,
                    format!("Expected at least {} arguments, but got {}.", min, count),
                ),
                Some(max) if max == min => {
                    (2554, format!("Expected {} arguments, but got {}.", min, count))
                }
                Some(max) => (
                    2554,
                    format!("Expected {}-{} arguments, but got {}.", min, max, count),
                ),
            };
            return vec![Diagnostic::error(&self.file, span, code, message)];
        }

        let mut problems = Vec::new();
        for (index, (actual, arg_span)) in args.iter().enumerate() {
            let Some(expected) = signature.param_type_at(index) else {
                continue;
            };
            if !actual.is_assignable_to(&expected, self.strict_nulls()) {
                problems.push(Diagnostic::error(
                    &self.file,
                    *arg_span,
                    2345,
                    format!(
                        "Argument of type '{}' is not assignable to parameter of type '{}'.",
                        actual, expected
                    ),
                ));
            }
        }
        problems
    }
}

fn symbol_binding(symbol: &ExportedSymbol) -> Binding {
    Binding {
        ty: symbol.ty.clone(),
        declared: None,
        mutable: false,
        signatures: symbol.signatures.clone(),
        is_async: symbol.is_async,
        overloaded: symbol.signatures.len() > 1,
    }
}

/// Splits `typeof name === 'tag'` into its name, tag and polarity. Either
/// operand order is accepted, as are `==`, `!=`, `!==` and a leading `!`.
fn typeof_guard(test: &Expr) -> Option<(&str, &str, bool)> {
    match &test.kind {
        ExprKind::Unary {
            op: UnaryOp::Not,
            operand,
        } => typeof_guard(operand).map(|(name, tag, positive)| (name, tag, !positive)),
        ExprKind::Binary { op, left, right } => {
            let positive = match op {
                BinaryOp::Eq | BinaryOp::StrictEq => true,
                BinaryOp::NotEq | BinaryOp::StrictNotEq => false,
                _ => return None,
            };
            let (operand, tag) = match (&left.kind, &right.kind) {
                (ExprKind::Typeof(operand), ExprKind::Str(tag)) => (operand, tag),
                (ExprKind::Str(tag), ExprKind::Typeof(operand)) => (operand, tag),
                _ => return None,
            };
            match &operand.kind {
                ExprKind::Ident(name) => Some((name.as_str(), tag.as_str(), positive)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Whether values of `ty` report `tag` from `typeof`. `None` when it cannot
/// be known statically.
fn typeof_matches(ty: &Type, tag: &str) -> Option<bool> {
    let matches = match ty.resolved() {
        Type::Any | Type::Unknown => return None,
        Type::String => tag == "string",
        Type::Number => tag == "number",
        Type::Boolean => tag == "boolean",
        Type::Undefined | Type::Void => tag == "undefined",
        Type::Function(_) => tag == "function",
        Type::Null
        | Type::Array(_)
        | Type::Tuple(_)
        | Type::Object(_)
        | Type::Record(..)
        | Type::Promise(_) => tag == "object",
        Type::Never => false,
        Type::Union(_) | Type::Reference { .. } => return None,
    };
    Some(matches)
}

fn typeof_type(tag: &str) -> Option<Type> {
    match tag {
        "string" => Some(Type::String),
        "number" => Some(Type::Number),
        "boolean" => Some(Type::Boolean),
        "undefined" => Some(Type::Undefined),
        _ => None,
    }
}

fn ends_in_throw(body: &[Stmt]) -> bool {
    matches!(body.last(), Some(Stmt::Throw { .. }))
}

fn param(name: &str, ty: Type, optional: bool) -> ParamType {
    ParamType {
        name: name.to_string(),
        ty,
        optional,
        rest: false,
    }
}

/// Types of the built-ins every module scope provides.
fn global_type(name: &str) -> Option<Type> {
    let ty = match name {
        "console" | "Math" | "JSON" | "Array" | "Promise" | "Error" | "TypeError"
        | "RangeError" | "module" | "exports" => Type::Any,
        "undefined" => Type::Undefined,
        "NaN" | "Infinity" => Type::Number,
        "__filename" | "__dirname" => Type::String,
        "require" => Type::function(vec![param("id", Type::String, false)], Type::Any),
        "String" => Type::function(vec![param("value", Type::Any, true)], Type::String),
        "Number" => Type::function(vec![param("value", Type::Any, true)], Type::Number),
        "Boolean" => Type::function(vec![param("value", Type::Any, true)], Type::Boolean),
        "parseFloat" => Type::function(vec![param("string", Type::String, false)], Type::Number),
        "parseInt" => Type::function(
            vec![
                param("string", Type::String, false),
                param("radix", Type::Number, true),
            ],
            Type::Number,
        ),
        "isNaN" => Type::function(vec![param("number", Type::Number, false)], Type::Boolean),
        _ => return None,
    };
    Some(ty)
}

/// Folds `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
