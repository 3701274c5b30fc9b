//! Static types of the typed dialect.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Any,
    Unknown,
    Number,
    String,
    Boolean,
    Null,
    Undefined,
    Void,
    Never,
    Array(Box<Type>),
    Tuple(Vec<Type>),
    Union(Vec<Type>),
    Object(Vec<PropertyType>),
    Function(Box<Signature>),
    Promise(Box<Type>),
    Record(Box<Type>, Box<Type>),
    /// An interface or aliased compound type. Renders as its name but is
    /// compared structurally through `target`.
    Reference { name: String, target: Box<Type> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyType {
    pub name: String,
    pub ty: Type,
    pub optional: bool,
}

/// A parameter of a call signature. Destructured parameters have an empty
/// name.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamType {
    pub name: String,
    pub ty: Type,
    pub optional: bool,
    pub rest: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<ParamType>,
    pub ret: Type,
}

impl Signature {
    /// Arguments a call must supply.
    pub fn min_args(&self) -> usize {
        self.params
            .iter()
            .take_while(|p| !p.optional && !p.rest)
            .count()
    }

    /// Arguments a call may supply, `None` with a rest parameter.
    pub fn max_args(&self) -> Option<usize> {
        if self.params.iter().any(|p| p.rest) {
            None
        } else {
            Some(self.params.len())
        }
    }

    /// The declared type the argument at `index` is checked against.
    pub fn param_type_at(&self, index: usize) -> Option<Type> {
        match self.params.get(index) {
            Some(param) if param.rest => Some(param.ty.element_type()),
            Some(param) => Some(param.ty.clone()),
            None => self
                .params
                .last()
                .filter(|p| p.rest)
                .map(|p| p.ty.element_type()),
        }
    }
}

impl Type {
    pub fn function(params: Vec<ParamType>, ret: Type) -> Type {
        Type::Function(Box::new(Signature { params, ret }))
    }

    /// Builds a union, flattening nested unions and dropping duplicates.
    /// A single member collapses to itself.
    pub fn union(members: Vec<Type>) -> Type {
        let mut flat: Vec<Type> = Vec::new();
        for member in members {
            let parts = match member {
                Type::Union(inner) => inner,
                other => vec![other],
            };
            for part in parts {
                if part == Type::Any {
                    return Type::Any;
                }
                if !flat.contains(&part) {
                    flat.push(part);
                }
            }
        }
        match flat.len() {
            0 => Type::Never,
            1 => flat.remove(0),
            _ => Type::Union(flat),
        }
    }

    /// Strips interface and alias names.
    pub fn resolved(&self) -> &Type {
        match self {
            Type::Reference { target, .. } => target.resolved(),
            other => other,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self.resolved(), Type::Any)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.resolved(), Type::Number | Type::Any)
    }

    pub fn is_stringish(&self) -> bool {
        match self.resolved() {
            Type::String => true,
            Type::Union(members) => members.iter().all(Type::is_stringish),
            _ => false,
        }
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self.resolved() {
            Type::Function(signature) => Some(signature),
            _ => None,
        }
    }

    /// Element type of an array, tuple or rest parameter type.
    pub fn element_type(&self) -> Type {
        match self.resolved() {
            Type::Array(element) => element.as_ref().clone(),
            Type::Tuple(items) => Type::union(items.clone()),
            Type::String => Type::String,
            _ => Type::Any,
        }
    }

    /// Type of `self.name`, when known.
    pub fn property(&self, name: &str) -> Option<Type> {
        match self.resolved() {
            Type::Any => Some(Type::Any),
            Type::Object(props) => props.iter().find(|p| p.name == name).map(|p| p.ty.clone()),
            Type::Record(_, value) => Some(value.as_ref().clone()),
            Type::Array(_) | Type::Tuple(_) => array_property(self, name),
            Type::String => match name {
                "length" => Some(Type::Number),
                "toUpperCase" | "toLowerCase" | "trim" => {
                    Some(Type::function(Vec::new(), Type::String))
                }
                "split" => Some(Type::function(
                    vec![param("separator", Type::String)],
                    Type::Array(Box::new(Type::String)),
                )),
                "includes" | "startsWith" | "endsWith" => Some(Type::function(
                    vec![param("searchString", Type::String)],
                    Type::Boolean,
                )),
                "indexOf" => Some(Type::function(
                    vec![param("searchString", Type::String)],
                    Type::Number,
                )),
                _ => None,
            },
            Type::Number => match name {
                "toFixed" | "toString" => Some(Type::function(
                    vec![ParamType {
                        name: "digits".to_string(),
                        ty: Type::Number,
                        optional: true,
                        rest: false,
                    }],
                    Type::String,
                )),
                _ => None,
            },
            Type::Promise(_) => match name {
                "then" | "catch" | "finally" => Some(Type::Any),
                _ => None,
            },
            Type::Function(_) => match name {
                "name" => Some(Type::String),
                "length" => Some(Type::Number),
                _ => None,
            },
            Type::Union(members) => {
                let mut found = Vec::new();
                for member in members {
                    found.push(member.property(name)?);
                }
                Some(Type::union(found))
            }
            _ => None,
        }
    }

    /// Whether a value of `self` may be stored where `target` is expected.
    /// Without `strict_nulls`, `null` and `undefined` fit everywhere.
    pub fn is_assignable_to(&self, target: &Type, strict_nulls: bool) -> bool {
        let source = self.resolved();
        let target = target.resolved();
        match (source, target) {
            (_, Type::Any | Type::Unknown) | (Type::Any | Type::Never, _) => true,
            (Type::Null | Type::Undefined, _) if !strict_nulls => true,
            (Type::Undefined, Type::Void) => true,
            (Type::Union(members), _) => members
                .iter()
                .all(|member| member.is_assignable_to(target, strict_nulls)),
            (_, Type::Union(members)) => members
                .iter()
                .any(|member| source.is_assignable_to(member, strict_nulls)),
            (Type::Array(a), Type::Array(b)) => a.is_assignable_to(b, strict_nulls),
            (Type::Tuple(items), Type::Array(element)) => items
                .iter()
                .all(|item| item.is_assignable_to(element, strict_nulls)),
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(x, y)| x.is_assignable_to(y, strict_nulls))
            }
            (Type::Promise(a), Type::Promise(b)) => a.is_assignable_to(b, strict_nulls),
            (Type::Record(_, a), Type::Record(_, b)) => a.is_assignable_to(b, strict_nulls),
            (Type::Object(props), Type::Record(_, value)) => props
                .iter()
                .all(|p| p.ty.is_assignable_to(value, strict_nulls)),
            (_, Type::Object(expected)) => expected.iter().all(|wanted| {
                match source.property(&wanted.name) {
                    Some(actual) => actual.is_assignable_to(&wanted.ty, strict_nulls),
                    None => wanted.optional,
                }
            }),
            (Type::Function(a), Type::Function(b)) => {
                let params_fit = a.params.iter().zip(&b.params).all(|(x, y)| {
                    y.ty.is_assignable_to(&x.ty, strict_nulls)
                        || x.ty.is_assignable_to(&y.ty, strict_nulls)
                });
                let ret_fits = matches!(b.ret, Type::Void) || a.ret.is_assignable_to(&b.ret, strict_nulls);
                a.min_args() <= b.params.len() && params_fit && ret_fits
            }
            (a, b) => a == b,
        }
    }

    /// The type an inferred binding takes. `[]` infers as `any[]`.
    pub fn widened(self) -> Type {
        match self {
            Type::Array(element) if *element == Type::Never => Type::Array(Box::new(Type::Any)),
            other => other,
        }
    }
}

fn param(name: &str, ty: Type) -> ParamType {
    ParamType {
        name: name.to_string(),
        ty,
        optional: false,
        rest: false,
    }
}

fn array_property(array: &Type, name: &str) -> Option<Type> {
    let element = array.element_type();
    let elements = Type::Array(Box::new(element.clone()));
    let callback = |ret: Type| {
        Type::function(
            vec![
                param("value", element.clone()),
                ParamType {
                    name: "index".to_string(),
                    ty: Type::Number,
                    optional: true,
                    rest: false,
                },
            ],
            ret,
        )
    };
    let ty = match name {
        "length" => Type::Number,
        "push" => Type::function(
            vec![ParamType {
                name: "items".to_string(),
                ty: elements.clone(),
                optional: false,
                rest: true,
            }],
            Type::Number,
        ),
        "pop" => Type::function(Vec::new(), element.clone()),
        "join" => Type::function(
            vec![ParamType {
                name: "separator".to_string(),
                ty: Type::String,
                optional: true,
                rest: false,
            }],
            Type::String,
        ),
        "indexOf" => Type::function(vec![param("searchElement", element.clone())], Type::Number),
        "includes" => Type::function(vec![param("searchElement", element.clone())], Type::Boolean),
        "slice" | "concat" => Type::function(
            vec![ParamType {
                name: "args".to_string(),
                ty: Type::Array(Box::new(Type::Any)),
                optional: false,
                rest: true,
            }],
            elements.clone(),
        ),
        "map" => Type::function(vec![param("callbackfn", callback(Type::Any))], Type::Array(Box::new(Type::Any))),
        "filter" => Type::function(vec![param("predicate", callback(Type::Any))], elements.clone()),
        "forEach" => Type::function(vec![param("callbackfn", callback(Type::Void))], Type::Void),
        "reduce" => Type::function(
            vec![
                param("callbackfn", Type::Any),
                ParamType {
                    name: "initialValue".to_string(),
                    ty: Type::Any,
                    optional: true,
                    rest: false,
                },
            ],
            Type::Any,
        ),
        _ => return None,
    };
    Some(ty)
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => f.write_str("any"),
            Type::Unknown => f.write_str("unknown"),
            Type::Number => f.write_str("number"),
            Type::String => f.write_str("string"),
            Type::Boolean => f.write_str("boolean"),
            Type::Null => f.write_str("null"),
            Type::Undefined => f.write_str("undefined"),
            Type::Void => f.write_str("void"),
            Type::Never => f.write_str("never"),
            Type::Array(element) => match element.as_ref() {
                Type::Union(_) | Type::Function(_) => write!(f, "({})[]", element),
                _ => write!(f, "{}[]", element),
            },
            Type::Tuple(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Type::Union(members) => {
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    match member {
                        Type::Function(_) => write!(f, "({})", member)?,
                        _ => write!(f, "{}", member)?,
                    }
                }
                Ok(())
            }
            Type::Object(props) if props.is_empty() => f.write_str("{}"),
            Type::Object(props) => {
                f.write_str("{ ")?;
                for prop in props {
                    let optional = if prop.optional { "?" } else { "" };
                    write!(f, "{}{}: {}; ", prop.name, optional, prop.ty)?;
                }
                f.write_str("}")
            }
            Type::Function(signature) => {
                f.write_str("(")?;
                for (i, param) in signature.params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    let rest = if param.rest { "..." } else { "" };
                    let optional = if param.optional { "?" } else { "" };
                    if param.name.is_empty() {
                        write!(f, "{}__{}{}: {}", rest, i, optional, param.ty)?;
                    } else {
                        write!(f, "{}{}{}: {}", rest, param.name, optional, param.ty)?;
                    }
                }
                write!(f, ") => {}", signature.ret)
            }
            Type::Promise(inner) => write!(f, "Promise<{}>", inner),
            Type::Record(key, value) => write!(f, "Record<{}, {}>", key, value),
            Type::Reference { name, .. } => f.write_str(name),
        }
    }
}
