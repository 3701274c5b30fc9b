//! Syntax tree shared by both guest dialects.
//!
//! Type annotations are kept on the tree so the typed checker can read them;
//! the interpreter ignores them.

use super::span::Span;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub target: Pattern,
    pub ty: Option<TypeAnn>,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Var {
        kind: VarKind,
        decls: Vec<VarDecl>,
        declare: bool,
        span: Span,
    },
    Function(Arc<Function>),
    Return {
        value: Option<Expr>,
        span: Span,
    },
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        kind: VarKind,
        target: Pattern,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Expr(Expr),
    Break(Span),
    Continue(Span),
    Throw {
        value: Expr,
        span: Span,
    },
    Try {
        block: Vec<Stmt>,
        param: Option<Pattern>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Export(ModuleExport),
    Import(Import),
    TypeAlias {
        name: String,
        ty: TypeAnn,
        span: Span,
    },
    Interface {
        name: String,
        members: Vec<TypeMember>,
        span: Span,
    },
    Empty,
}

/// The forms an `export` statement can take.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleExport {
    /// `export function ...`, `export const ...`, `export type ...`
    Declaration(Box<Stmt>),
    /// `export default <expr>`
    Default { value: Expr, span: Span },
    /// `export = <expr>`
    Assign { value: Expr, span: Span },
    /// `export { a, b as c }`
    Named {
        specifiers: Vec<ExportSpecifier>,
        span: Span,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSpecifier {
    pub local: String,
    pub exported: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub source: String,
    pub default: Option<String>,
    pub namespace: Option<String>,
    pub named: Vec<ImportSpecifier>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSpecifier {
    pub imported: String,
    pub local: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: Option<String>,
    pub params: Vec<Param>,
    /// `None` for overload signatures and `declare`d functions.
    pub body: Option<FunctionBody>,
    pub return_type: Option<TypeAnn>,
    pub is_async: bool,
    pub is_arrow: bool,
    pub span: Span,
}

impl Function {
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub pattern: Pattern,
    pub ty: Option<TypeAnn>,
    pub default: Option<Expr>,
    pub optional: bool,
    pub rest: bool,
    pub span: Span,
}

impl Param {
    /// The parameter's name when it is a plain identifier with no default
    /// value and no rest marker.
    pub fn simple_name(&self) -> Option<&str> {
        match &self.pattern {
            Pattern::Ident(name) if self.default.is_none() && !self.rest => Some(name.as_str()),
            _ => None,
        }
    }

    /// The parameter's identifier, ignoring defaults and rest markers.
    pub fn identifier(&self) -> Option<&str> {
        match &self.pattern {
            Pattern::Ident(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Ident(String),
    Object(Vec<PropPattern>),
    Array(Vec<Option<Pattern>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropPattern {
    pub key: String,
    pub value: Pattern,
    pub default: Option<Expr>,
}

impl Pattern {
    /// Every name the pattern introduces, in source order.
    pub fn bound_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Pattern::Ident(name) => names.push(name.as_str()),
            Pattern::Object(props) => {
                for prop in props {
                    prop.value.collect_names(names);
                }
            }
            Pattern::Array(items) => {
                for item in items.iter().flatten() {
                    item.collect_names(names);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<Property>),
    Function(Arc<Function>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Update {
        op: UpdateOp,
        prefix: bool,
        target: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Await(Box<Expr>),
    Typeof(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNotEq => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::LtEq => "<=",
            BinaryOp::GtEq => ">=",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    /// The binary operator a compound assignment applies.
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

/// A type annotation as written in typed sources.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeAnn {
    /// `number`, `Foo`, `Promise<T>`, `Record<K, V>`
    Named { name: String, args: Vec<TypeAnn> },
    Array(Box<TypeAnn>),
    Tuple(Vec<TypeAnn>),
    Union(Vec<TypeAnn>),
    Object(Vec<TypeMember>),
    Function {
        params: Vec<FnTypeParam>,
        ret: Box<TypeAnn>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnTypeParam {
    pub name: String,
    pub ty: TypeAnn,
    pub optional: bool,
    pub rest: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeMember {
    pub name: String,
    pub ty: TypeAnn,
    pub optional: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_name_rejects_defaults_and_rest() {
        let plain = Param {
            pattern: Pattern::Ident("x".to_string()),
            ty: None,
            default: None,
            optional: false,
            rest: false,
            span: Span::default(),
        };
        assert_eq!(plain.simple_name(), Some("x"));

        let defaulted = Param {
            default: Some(Expr::new(ExprKind::Number(1.0), Span::default())),
            ..plain.clone()
        };
        assert_eq!(defaulted.simple_name(), None);
        assert_eq!(defaulted.identifier(), Some("x"));

        let rest = Param {
            rest: true,
            ..plain
        };
        assert_eq!(rest.simple_name(), None);
    }

    #[test]
    fn test_bound_names_walk_nested_patterns() {
        let pattern = Pattern::Object(vec![
            PropPattern {
                key: "a".to_string(),
                value: Pattern::Ident("a".to_string()),
                default: None,
            },
            PropPattern {
                key: "b".to_string(),
                value: Pattern::Array(vec![
                    Some(Pattern::Ident("c".to_string())),
                    None,
                    Some(Pattern::Ident("d".to_string())),
                ]),
                default: None,
            },
        ]);
        assert_eq!(pattern.bound_names(), vec!["a", "c", "d"]);
    }
}
