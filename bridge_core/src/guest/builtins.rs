//! Built-in globals and the methods available on arrays, strings and numbers.

use super::interpreter::{error_object, ErrorType, Exception, Interpreter};
use super::scope::ScopeRef;
use super::value::{format_number, ArrayRef, GuestFunction, NativeFunction, Promise, Value};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Wraps a Rust closure as a guest function with fixed parameter names.
pub fn native<F>(name: &str, params: &'static [&'static str], call: F) -> Value
where
    F: Fn(&mut Interpreter, &[Value]) -> Result<Value, Exception> + Send + Sync + 'static,
{
    Value::Function(Arc::new(GuestFunction::Native(NativeFunction {
        name: name.to_string(),
        params,
        call: Arc::new(call),
    })))
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn math1(name: &str, f: fn(f64) -> f64) -> (String, Value) {
    (
        name.to_string(),
        native(name, &["x"], move |_, args| Ok(Value::Number(f(arg(args, 0).to_number())))),
    )
}

fn console_line(args: &[Value]) -> String {
    args.iter().map(Value::display).collect::<Vec<_>>().join(" ")
}

/// Installs the standard globals into a fresh module scope.
pub fn install_globals(scope: &ScopeRef) {
    let mut console = IndexMap::new();
    for name in ["log", "info", "debug"] {
        console.insert(
            name.to_string(),
            native(name, &["message"], |_, args| {
                info!(target: "guest", "{}", console_line(args));
                Ok(Value::Undefined)
            }),
        );
    }
    for name in ["error", "warn"] {
        console.insert(
            name.to_string(),
            native(name, &["message"], |_, args| {
                warn!(target: "guest", "{}", console_line(args));
                Ok(Value::Undefined)
            }),
        );
    }
    scope.declare("console", Value::object(console), false);

    let mut math: IndexMap<String, Value> = [
        math1("floor", f64::floor),
        math1("ceil", f64::ceil),
        math1("abs", f64::abs),
        math1("sqrt", f64::sqrt),
        math1("trunc", f64::trunc),
        math1("round", |x| (x + 0.5).floor()),
    ]
    .into_iter()
    .collect();
    math.insert(
        "max".to_string(),
        native("max", &["values"], |_, args| {
            Ok(Value::Number(args.iter().map(Value::to_number).fold(
                f64::NEG_INFINITY,
                |acc, x| if x.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(x) },
            )))
        }),
    );
    math.insert(
        "min".to_string(),
        native("min", &["values"], |_, args| {
            Ok(Value::Number(args.iter().map(Value::to_number).fold(
                f64::INFINITY,
                |acc, x| if x.is_nan() || acc.is_nan() { f64::NAN } else { acc.min(x) },
            )))
        }),
    );
    math.insert(
        "pow".to_string(),
        native("pow", &["x", "y"], |_, args| {
            Ok(Value::Number(arg(args, 0).to_number().powf(arg(args, 1).to_number())))
        }),
    );
    math.insert("PI".to_string(), Value::Number(std::f64::consts::PI));
    math.insert("E".to_string(), Value::Number(std::f64::consts::E));
    scope.declare("Math", Value::object(math), false);

    scope.declare(
        "String",
        native("String", &["value"], |_, args| {
            Ok(Value::from(args.first().map(Value::to_js_string).unwrap_or_default()))
        }),
        false,
    );
    scope.declare(
        "Number",
        native("Number", &["value"], |_, args| {
            Ok(Value::Number(args.first().map(Value::to_number).unwrap_or(0.0)))
        }),
        false,
    );
    scope.declare(
        "Boolean",
        native("Boolean", &["value"], |_, args| Ok(Value::Bool(arg(args, 0).truthy()))),
        false,
    );
    scope.declare(
        "parseFloat",
        native("parseFloat", &["string"], |_, args| {
            Ok(Value::Number(parse_float_prefix(&arg(args, 0).to_js_string())))
        }),
        false,
    );
    scope.declare(
        "parseInt",
        native("parseInt", &["string", "radix"], |_, args| {
            let radix = match arg(args, 1) {
                Value::Undefined => 10,
                radix => radix.to_number() as u32,
            };
            Ok(Value::Number(parse_int_prefix(&arg(args, 0).to_js_string(), radix)))
        }),
        false,
    );
    scope.declare(
        "isNaN",
        native("isNaN", &["number"], |_, args| Ok(Value::Bool(arg(args, 0).to_number().is_nan()))),
        false,
    );
    scope.declare("NaN", Value::Number(f64::NAN), false);
    scope.declare("Infinity", Value::Number(f64::INFINITY), false);

    let mut array = IndexMap::new();
    array.insert(
        "isArray".to_string(),
        native("isArray", &["value"], |_, args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))
        }),
    );
    scope.declare("Array", Value::object(array), false);

    let mut promise = IndexMap::new();
    promise.insert(
        "resolve".to_string(),
        native("resolve", &["value"], |_, args| {
            Ok(match arg(args, 0) {
                Value::Promise(existing) => Value::Promise(existing),
                value => Value::Promise(Arc::new(Promise::Fulfilled(value))),
            })
        }),
    );
    promise.insert(
        "reject".to_string(),
        native("reject", &["reason"], |_, args| {
            Ok(Value::Promise(Arc::new(Promise::Rejected(arg(args, 0)))))
        }),
    );
    scope.declare("Promise", Value::object(promise), false);

    let mut json = IndexMap::new();
    json.insert(
        "stringify".to_string(),
        native("stringify", &["value"], |_, args| {
            let value = arg(args, 0);
            if matches!(value, Value::Undefined | Value::Function(_)) {
                return Ok(Value::Undefined);
            }
            serde_json::to_string(&value.to_json())
                .map(Value::from)
                .map_err(|e| Exception::type_error(e.to_string()))
        }),
    );
    json.insert(
        "parse".to_string(),
        native("parse", &["text"], |_, args| {
            serde_json::from_str::<serde_json::Value>(&arg(args, 0).to_js_string())
                .map(|json| Value::from_json(&json))
                .map_err(|e| Exception::error(ErrorType::SyntaxError, e.to_string()))
        }),
    );
    scope.declare("JSON", Value::object(json), false);

    for name in ["Error", "TypeError", "RangeError"] {
        scope.declare(
            name,
            native(name, &["message"], move |_, args| {
                Ok(error_object(name, &args.first().map(Value::to_js_string).unwrap_or_default()))
            }),
            false,
        );
    }
}

fn parse_float_prefix(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let mut end = 0;
    for (index, ch) in trimmed.char_indices() {
        let ok = ch.is_ascii_digit()
            || ch == '.'
            || ((ch == '-' || ch == '+') && index == 0)
            || ((ch == 'e' || ch == 'E') && index > 0);
        if !ok {
            break;
        }
        end = index + ch.len_utf8();
    }
    // Shrink until the prefix parses, e.g. "1.5e" -> "1.5".
    let mut candidate = &trimmed[..end];
    while !candidate.is_empty() {
        if let Ok(value) = candidate.parse::<f64>() {
            return value;
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    f64::NAN
}

fn parse_int_prefix(text: &str, radix: u32) -> f64 {
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let mut value: f64 = 0.0;
    let mut seen = false;
    for ch in digits.chars() {
        let Some(digit) = ch.to_digit(radix) else {
            break;
        };
        value = value * f64::from(radix) + f64::from(digit);
        seen = true;
    }
    match (seen, negative) {
        (false, _) => f64::NAN,
        (true, true) => -value,
        (true, false) => value,
    }
}

/// Resolves a possibly negative slice bound against `len`.
fn relative_index(value: Option<&Value>, len: usize, default: usize) -> usize {
    match value {
        None | Some(Value::Undefined) => default,
        Some(value) => {
            let n = value.to_number();
            if n.is_nan() {
                0
            } else if n < 0.0 {
                len.saturating_sub((-n) as usize)
            } else {
                (n as usize).min(len)
            }
        }
    }
}

pub fn array_method(array: &ArrayRef, name: &str) -> Option<Value> {
    let items = array.clone();
    let method = match name {
        "push" => native("push", &["items"], move |_, args| {
            let mut items = items.write();
            items.extend(args.iter().cloned());
            Ok(Value::Number(items.len() as f64))
        }),
        "pop" => native("pop", &[], move |_, _| Ok(items.write().pop().unwrap_or_default())),
        "join" => native("join", &["separator"], move |_, args| {
            let separator = match arg(args, 0) {
                Value::Undefined => ",".to_string(),
                other => other.to_js_string(),
            };
            let joined = items
                .read()
                .iter()
                .map(|item| if item.is_nullish() { String::new() } else { item.to_js_string() })
                .collect::<Vec<_>>()
                .join(&separator);
            Ok(Value::from(joined))
        }),
        "indexOf" => native("indexOf", &["searchElement"], move |_, args| {
            let needle = arg(args, 0);
            let position = items.read().iter().position(|item| item.strict_equals(&needle));
            Ok(Value::Number(position.map(|p| p as f64).unwrap_or(-1.0)))
        }),
        "includes" => native("includes", &["searchElement"], move |_, args| {
            let needle = arg(args, 0);
            let found = items.read().iter().any(|item| {
                item.strict_equals(&needle)
                    || matches!((item, &needle), (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan())
            });
            Ok(Value::Bool(found))
        }),
        "slice" => native("slice", &["start", "end"], move |_, args| {
            let snapshot = items.read().clone();
            let len = snapshot.len();
            let start = relative_index(args.first(), len, 0);
            let end = relative_index(args.get(1), len, len);
            Ok(Value::array(if start < end { snapshot[start..end].to_vec() } else { Vec::new() }))
        }),
        "concat" => native("concat", &["items"], move |_, args| {
            let mut result = items.read().clone();
            for value in args {
                match value {
                    Value::Array(other) => result.extend(other.read().iter().cloned()),
                    other => result.push(other.clone()),
                }
            }
            Ok(Value::array(result))
        }),
        "map" => native("map", &["callbackfn"], move |interp, args| {
            let callback = arg(args, 0);
            let snapshot = items.read().clone();
            let this = Value::Array(items.clone());
            let mut mapped = Vec::with_capacity(snapshot.len());
            for (index, item) in snapshot.into_iter().enumerate() {
                mapped.push(interp.call(&callback, &[item, Value::Number(index as f64), this.clone()])?);
            }
            Ok(Value::array(mapped))
        }),
        "filter" => native("filter", &["predicate"], move |interp, args| {
            let callback = arg(args, 0);
            let snapshot = items.read().clone();
            let this = Value::Array(items.clone());
            let mut kept = Vec::new();
            for (index, item) in snapshot.into_iter().enumerate() {
                let keep = interp.call(&callback, &[item.clone(), Value::Number(index as f64), this.clone()])?;
                if keep.truthy() {
                    kept.push(item);
                }
            }
            Ok(Value::array(kept))
        }),
        "forEach" => native("forEach", &["callbackfn"], move |interp, args| {
            let callback = arg(args, 0);
            let snapshot = items.read().clone();
            let this = Value::Array(items.clone());
            for (index, item) in snapshot.into_iter().enumerate() {
                interp.call(&callback, &[item, Value::Number(index as f64), this.clone()])?;
            }
            Ok(Value::Undefined)
        }),
        "reduce" => native("reduce", &["callbackfn", "initialValue"], move |interp, args| {
            let callback = arg(args, 0);
            let snapshot = items.read().clone();
            let mut iter = snapshot.into_iter().enumerate();
            let mut accumulator = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match iter.next() {
                    Some((_, first)) => first,
                    None => {
                        return Err(Exception::type_error(
                            "Reduce of empty array with no initial value",
                        ))
                    }
                },
            };
            for (index, item) in iter {
                accumulator = interp.call(&callback, &[accumulator, item, Value::Number(index as f64)])?;
            }
            Ok(accumulator)
        }),
        _ => return None,
    };
    Some(method)
}

pub fn string_method(text: &Arc<str>, name: &str) -> Option<Value> {
    let text = text.clone();
    let method = match name {
        "toUpperCase" => native("toUpperCase", &[], move |_, _| Ok(Value::from(text.to_uppercase()))),
        "toLowerCase" => native("toLowerCase", &[], move |_, _| Ok(Value::from(text.to_lowercase()))),
        "trim" => native("trim", &[], move |_, _| Ok(Value::from(text.trim()))),
        "includes" => native("includes", &["searchString"], move |_, args| {
            Ok(Value::Bool(text.contains(arg(args, 0).to_js_string().as_str())))
        }),
        "startsWith" => native("startsWith", &["searchString"], move |_, args| {
            Ok(Value::Bool(text.starts_with(arg(args, 0).to_js_string().as_str())))
        }),
        "endsWith" => native("endsWith", &["searchString"], move |_, args| {
            Ok(Value::Bool(text.ends_with(arg(args, 0).to_js_string().as_str())))
        }),
        "indexOf" => native("indexOf", &["searchString"], move |_, args| {
            let needle = arg(args, 0).to_js_string();
            let position = text
                .find(needle.as_str())
                .map(|byte| text[..byte].chars().count() as f64)
                .unwrap_or(-1.0);
            Ok(Value::Number(position))
        }),
        "charAt" => native("charAt", &["pos"], move |_, args| {
            let position = arg(args, 0).to_number();
            let ch = if position >= 0.0 {
                text.chars().nth(position as usize)
            } else {
                None
            };
            Ok(Value::from(ch.map(String::from).unwrap_or_default()))
        }),
        "slice" => native("slice", &["start", "end"], move |_, args| {
            let chars: Vec<char> = text.chars().collect();
            let start = relative_index(args.first(), chars.len(), 0);
            let end = relative_index(args.get(1), chars.len(), chars.len());
            let sliced: String = if start < end { chars[start..end].iter().collect() } else { String::new() };
            Ok(Value::from(sliced))
        }),
        "split" => native("split", &["separator"], move |_, args| {
            let parts = match arg(args, 0) {
                Value::Undefined => vec![Value::from(text.as_ref())],
                separator => {
                    let separator = separator.to_js_string();
                    if separator.is_empty() {
                        text.chars().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        text.split(separator.as_str()).map(Value::from).collect()
                    }
                }
            };
            Ok(Value::array(parts))
        }),
        _ => return None,
    };
    Some(method)
}

pub fn number_method(n: f64, name: &str) -> Option<Value> {
    let method = match name {
        "toFixed" => native("toFixed", &["fractionDigits"], move |_, args| {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
            Ok(Value::from(format!("{:.*}", digits, n)))
        }),
        "toString" => native("toString", &[], move |_, _| Ok(Value::from(format_number(n)))),
        _ => return None,
    };
    Some(method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::scope::Scope;

    fn global(scope: &ScopeRef, path: &[&str]) -> Value {
        let mut value = scope.lookup(path[0]).unwrap();
        for segment in &path[1..] {
            value = value
                .as_object()
                .and_then(|o| o.read().get(*segment).cloned())
                .unwrap();
        }
        value
    }

    #[test]
    fn test_math_and_conversions() {
        let scope = Scope::global();
        install_globals(&scope);
        let mut interp = Interpreter::default();

        let max = global(&scope, &["Math", "max"]);
        let result = interp.call(&max, &[Value::Number(1.0), Value::Number(7.0)]).unwrap();
        assert_eq!(result.as_number(), Some(7.0));

        let parse_int = global(&scope, &["parseInt"]);
        let result = interp.call(&parse_int, &[Value::from("42px")]).unwrap();
        assert_eq!(result.as_number(), Some(42.0));

        let parse_float = global(&scope, &["parseFloat"]);
        let result = interp.call(&parse_float, &[Value::from("1.5e")]).unwrap();
        assert_eq!(result.as_number(), Some(1.5));
    }

    #[test]
    fn test_json_stringify_integers() {
        let scope = Scope::global();
        install_globals(&scope);
        let stringify = global(&scope, &["JSON", "stringify"]);
        let value = Value::array(vec![Value::Number(5.0), Value::from("x")]);
        let result = Interpreter::default().call(&stringify, &[value]).unwrap();
        assert_eq!(result.as_str(), Some("[5,\"x\"]"));
    }

    #[test]
    fn test_array_methods() {
        let array = match Value::array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]) {
            Value::Array(items) => items,
            _ => unreachable!(),
        };
        let mut interp = Interpreter::default();
        let double = native("double", &["x"], |_, args| Ok(Value::Number(arg(args, 0).to_number() * 2.0)));

        let map = array_method(&array, "map").unwrap();
        let mapped = interp.call(&map, &[double]).unwrap();
        assert_eq!(mapped.to_js_string(), "2,4,6");

        let slice = array_method(&array, "slice").unwrap();
        let sliced = interp.call(&slice, &[Value::Number(-2.0)]).unwrap();
        assert_eq!(sliced.to_js_string(), "2,3");

        let push = array_method(&array, "push").unwrap();
        interp.call(&push, &[Value::Number(4.0)]).unwrap();
        assert_eq!(array.read().len(), 4);
    }

    #[test]
    fn test_string_methods() {
        let text: Arc<str> = Arc::from("Hello, World");
        let mut interp = Interpreter::default();
        let split = string_method(&text, "split").unwrap();
        let parts = interp.call(&split, &[Value::from(", ")]).unwrap();
        assert_eq!(parts.to_js_string(), "Hello,World");
        let upper = string_method(&text, "toUpperCase").unwrap();
        assert_eq!(interp.call(&upper, &[]).unwrap().as_str(), Some("HELLO, WORLD"));
        assert!(string_method(&text, "nope").is_none());
    }
}
