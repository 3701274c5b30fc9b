use super::ast;
use super::interpreter::{Exception, Interpreter};
use super::scope::ScopeRef;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Map, Number};
use std::fmt;
use std::sync::Arc;

pub type ArrayRef = Arc<RwLock<Vec<Value>>>;
pub type ObjectRef = Arc<RwLock<IndexMap<String, Value>>>;
pub type FunctionRef = Arc<GuestFunction>;

/// Signature shared by every native built-in.
pub type NativeFn =
    Arc<dyn Fn(&mut Interpreter, &[Value]) -> Result<Value, Exception> + Send + Sync>;

/// A guest runtime value.
///
/// Compound values are shared references, so cloning a `Value` aliases the
/// same array, object or function.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(FunctionRef),
    Promise(Arc<Promise>),
}

/// A promise is settled as soon as it is created; the guest runtime has no
/// event loop.
#[derive(Debug, Clone)]
pub enum Promise {
    Fulfilled(Value),
    Rejected(Value),
}

pub enum GuestFunction {
    Closure(Closure),
    Native(NativeFunction),
}

pub struct Closure {
    pub decl: Arc<ast::Function>,
    pub env: ScopeRef,
    pub name: String,
}

pub struct NativeFunction {
    pub name: String,
    pub params: &'static [&'static str],
    pub call: NativeFn,
}

impl GuestFunction {
    pub fn name(&self) -> &str {
        match self {
            GuestFunction::Closure(closure) => &closure.name,
            GuestFunction::Native(native) => &native.name,
        }
    }

    pub fn is_async(&self) -> bool {
        match self {
            GuestFunction::Closure(closure) => closure.decl.is_async,
            GuestFunction::Native(_) => false,
        }
    }

    /// Number of parameters before the first defaulted or rest parameter.
    pub fn arity(&self) -> usize {
        match self {
            GuestFunction::Closure(closure) => closure
                .decl
                .params
                .iter()
                .take_while(|param| param.default.is_none() && !param.rest)
                .count(),
            GuestFunction::Native(native) => native.params.len(),
        }
    }
}

impl fmt::Debug for GuestFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name().is_empty() {
            write!(f, "[Function (anonymous)]")
        } else {
            write!(f, "[Function: {}]", self.name())
        }
    }
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    pub fn object(props: IndexMap<String, Value>) -> Value {
        Value::Object(Arc::new(RwLock::new(props)))
    }

    pub fn empty_object() -> Value {
        Value::object(IndexMap::new())
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Promise(_) => "object",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Value::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => parse_numeric(s),
            Value::Array(items) => {
                let items = items.read();
                match items.as_slice() {
                    [] => 0.0,
                    [single] => single.to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// String conversion as performed by `String(value)` and `+`.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Array(items) => items
                .read()
                .iter()
                .map(|item| {
                    if item.is_nullish() {
                        String::new()
                    } else {
                        item.to_js_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(function) => {
                format!("function {}() {{ [code] }}", function.name())
            }
            Value::Promise(_) => "[object Promise]".to_string(),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }

    /// Rendering used by `console.log`: strings print bare at the top level
    /// and quoted inside containers.
    pub fn display(&self) -> String {
        match self {
            Value::String(s) => s.to_string(),
            other => other.inspect(),
        }
    }

    pub fn inspect(&self) -> String {
        self.inspect_depth(0)
    }

    fn inspect_depth(&self, depth: usize) -> String {
        const MAX_DEPTH: usize = 4;
        match self {
            Value::String(s) => format!("'{}'", s),
            Value::Array(items) => {
                if depth >= MAX_DEPTH {
                    return "[Array]".to_string();
                }
                let items = items.read();
                if items.is_empty() {
                    return "[]".to_string();
                }
                let rendered: Vec<_> = items.iter().map(|v| v.inspect_depth(depth + 1)).collect();
                format!("[ {} ]", rendered.join(", "))
            }
            Value::Object(props) => {
                if depth >= MAX_DEPTH {
                    return "[Object]".to_string();
                }
                let props = props.read();
                if props.is_empty() {
                    return "{}".to_string();
                }
                let rendered: Vec<_> = props
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.inspect_depth(depth + 1)))
                    .collect();
                format!("{{ {} }}", rendered.join(", "))
            }
            Value::Function(function) => format!("{:?}", function),
            Value::Promise(promise) => match promise.as_ref() {
                Promise::Fulfilled(v) => format!("Promise {{ {} }}", v.inspect_depth(depth + 1)),
                Promise::Rejected(v) => {
                    format!("Promise {{ <rejected> {} }}", v.inspect_depth(depth + 1))
                }
            },
            other => other.to_js_string(),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s.as_str()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// JSON projection following `JSON.stringify` rules: functions and
    /// `undefined` are dropped from objects and become `null` elsewhere.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(items) => {
                serde_json::Value::Array(items.read().iter().map(Value::to_json).collect())
            }
            Value::Object(props) => {
                let mut map = Map::new();
                for (key, value) in props.read().iter() {
                    if matches!(value, Value::Undefined | Value::Function(_)) {
                        continue;
                    }
                    map.insert(key.clone(), value.to_json());
                }
                serde_json::Value::Object(map)
            }
            Value::Promise(_) => serde_json::Value::Object(Map::new()),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::from(n as i64);
    }
    Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn parse_numeric(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().any(|c| c.is_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

/// Formats a number the way the guest language prints it.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inspect())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::from("").truthy());
        assert!(Value::from("0").truthy());
        assert!(!Value::Number(f64::NAN).truthy());
        assert!(Value::array(vec![]).truthy());
        assert!(!Value::Null.truthy());
    }

    #[test]
    fn test_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::from("5").loose_equals(&Value::Number(5.0)));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        let a = Value::empty_object();
        assert!(a.strict_equals(&a.clone()));
        assert!(!a.strict_equals(&Value::empty_object()));
    }

    #[test]
    fn test_string_conversion() {
        let array = Value::array(vec![Value::Number(1.0), Value::Null, Value::from("x")]);
        assert_eq!(array.to_js_string(), "1,,x");
        assert_eq!(Value::from(" 12 ").to_number(), 12.0);
        assert!(Value::from("12px").to_number().is_nan());
    }

    #[test]
    fn test_json_projection_drops_functions_in_objects() {
        let value = Value::from_json(&json!({"a": 1, "b": [true, null, "s"], "c": 1.5}));
        if let Value::Object(props) = &value {
            props.write().insert("f".to_string(), Value::Undefined);
        }
        assert_eq!(value.to_json(), json!({"a": 1, "b": [true, null, "s"], "c": 1.5}));
    }

    #[test]
    fn test_inspect_quotes_nested_strings() {
        let value = Value::array(vec![Value::from("a"), Value::Number(2.0)]);
        assert_eq!(value.display(), "[ 'a', 2 ]");
        assert_eq!(Value::from("top").display(), "top");
    }
}
