use crate::environment::{Environment, Scope};
use crate::error::{runtime_error, Result};
use crate::runtime::{Builtin, Interpreter, Value};
use itertools::Itertools;
use rand::Rng;
use std::collections::BTreeMap;

type BuiltinFn = fn(&mut Interpreter, Vec<Value>) -> Result<Value>;

fn builtin(name: &'static str, arity: Option<usize>, func: BuiltinFn) -> Value {
    Value::Builtin(Builtin { name, arity, func })
}

/// Creates a global scope seeded with the fixed built-in table, the only
/// capabilities a sandboxed program ever sees.
pub fn create_global_env() -> Scope {
    let env = Environment::root();

    macro_rules! define_builtin {
        ($name:expr, $arity:expr, $func:expr) => {
            env.define($name, builtin($name, $arity, $func as BuiltinFn), true);
        };
    }

    // Console-style output, captured in the context's bounded buffer.
    define_builtin!("print", None, |interp, args| {
        let text = args.iter().map(|v| v.to_string()).join(" ");
        interp.write_output(&text);
        Ok(Value::Null)
    });

    define_builtin!("println", None, |interp, args| {
        let mut text = args.iter().map(|v| v.to_string()).join(" ");
        text.push('\n');
        interp.write_output(&text);
        Ok(Value::Null)
    });

    define_builtin!("len", Some(1), |_interp, args| match &args[0] {
        Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
        Value::Array(items) => Ok(Value::Number(items.borrow().len() as f64)),
        Value::Object(map) => Ok(Value::Number(map.borrow().len() as f64)),
        other => runtime_error(format!(
            "len() takes a string, array, or object, got {}",
            other.type_name()
        )),
    });

    define_builtin!("push", Some(2), |interp, mut args| {
        let value = args.pop().unwrap_or(Value::Null);
        match &args[0] {
            Value::Array(items) => {
                interp.charge(16)?;
                let mut items = items.borrow_mut();
                items.push(value);
                Ok(Value::Number(items.len() as f64))
            }
            other => runtime_error(format!(
                "push() takes an array as its first argument, got {}",
                other.type_name()
            )),
        }
    });

    define_builtin!("pop", Some(1), |_interp, args| match &args[0] {
        Value::Array(items) => Ok(items.borrow_mut().pop().unwrap_or(Value::Null)),
        other => runtime_error(format!(
            "pop() takes an array, got {}",
            other.type_name()
        )),
    });

    define_builtin!("keys", Some(1), |interp, args| match &args[0] {
        Value::Object(map) => {
            let keys: Vec<Value> = map
                .borrow()
                .keys()
                .map(|k| Value::String(k.clone()))
                .collect();
            interp.charge(24 + 16 * keys.len())?;
            Ok(Value::array(keys))
        }
        other => runtime_error(format!(
            "keys() takes an object, got {}",
            other.type_name()
        )),
    });

    define_builtin!("values", Some(1), |interp, args| match &args[0] {
        Value::Object(map) => {
            let values: Vec<Value> = map.borrow().values().cloned().collect();
            interp.charge(24 + 16 * values.len())?;
            Ok(Value::array(values))
        }
        other => runtime_error(format!(
            "values() takes an object, got {}",
            other.type_name()
        )),
    });

    define_builtin!("type", Some(1), |_interp, args| {
        Ok(Value::String(args[0].type_name().to_string()))
    });

    define_builtin!("parseInt", Some(1), |_interp, args| match &args[0] {
        Value::String(s) => Ok(Value::Number(
            s.trim().parse::<f64>().map_or(f64::NAN, f64::trunc),
        )),
        Value::Number(n) => Ok(Value::Number(n.trunc())),
        _ => Ok(Value::Number(f64::NAN)),
    });

    define_builtin!("parseFloat", Some(1), |_interp, args| match &args[0] {
        Value::String(s) => Ok(Value::Number(s.trim().parse().unwrap_or(f64::NAN))),
        Value::Number(n) => Ok(Value::Number(*n)),
        _ => Ok(Value::Number(f64::NAN)),
    });

    define_builtin!("toString", Some(1), |interp, args| {
        let text = args[0].to_string();
        interp.charge(text.len())?;
        Ok(Value::String(text))
    });

    env.define("Math", math_namespace(), true);
    env.define("String", string_namespace(), true);
    env.define("Array", array_namespace(), true);

    env
}

fn expect_number(name: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        other => runtime_error(format!(
            "{} takes a number, got {}",
            name,
            other.type_name()
        )),
    }
}

fn expect_string<'a>(name: &str, value: &'a Value) -> Result<&'a str> {
    match value {
        Value::String(s) => Ok(s),
        other => runtime_error(format!(
            "{} takes a string, got {}",
            name,
            other.type_name()
        )),
    }
}

fn math_namespace() -> Value {
    let mut map = BTreeMap::new();

    macro_rules! math_fn {
        ($name:expr, $func:expr) => {
            map.insert(
                $name.trim_start_matches("Math.").to_string(),
                builtin($name, Some(1), $func as BuiltinFn),
            );
        };
    }

    math_fn!("Math.abs", |_i, args| {
        Ok(Value::Number(expect_number("Math.abs", &args[0])?.abs()))
    });
    math_fn!("Math.floor", |_i, args| {
        Ok(Value::Number(expect_number("Math.floor", &args[0])?.floor()))
    });
    math_fn!("Math.ceil", |_i, args| {
        Ok(Value::Number(expect_number("Math.ceil", &args[0])?.ceil()))
    });
    math_fn!("Math.round", |_i, args| {
        Ok(Value::Number(expect_number("Math.round", &args[0])?.round()))
    });
    math_fn!("Math.sqrt", |_i, args| {
        Ok(Value::Number(expect_number("Math.sqrt", &args[0])?.sqrt()))
    });

    map.insert(
        "pow".to_string(),
        builtin("Math.pow", Some(2), |_i, args| {
            let base = expect_number("Math.pow", &args[0])?;
            let exp = expect_number("Math.pow", &args[1])?;
            Ok(Value::Number(base.powf(exp)))
        }),
    );
    map.insert(
        "min".to_string(),
        builtin("Math.min", Some(2), |_i, args| {
            let a = expect_number("Math.min", &args[0])?;
            let b = expect_number("Math.min", &args[1])?;
            Ok(Value::Number(a.min(b)))
        }),
    );
    map.insert(
        "max".to_string(),
        builtin("Math.max", Some(2), |_i, args| {
            let a = expect_number("Math.max", &args[0])?;
            let b = expect_number("Math.max", &args[1])?;
            Ok(Value::Number(a.max(b)))
        }),
    );
    map.insert(
        "random".to_string(),
        builtin("Math.random", Some(0), |_i, _args| {
            Ok(Value::Number(rand::thread_rng().gen()))
        }),
    );
    map.insert("PI".to_string(), Value::Number(std::f64::consts::PI));
    map.insert("E".to_string(), Value::Number(std::f64::consts::E));

    Value::object(map)
}

fn string_namespace() -> Value {
    let mut map = BTreeMap::new();

    map.insert(
        "upper".to_string(),
        builtin("String.upper", Some(1), |i, args| {
            let s = expect_string("String.upper", &args[0])?.to_uppercase();
            i.charge(s.len())?;
            Ok(Value::String(s))
        }),
    );
    map.insert(
        "lower".to_string(),
        builtin("String.lower", Some(1), |i, args| {
            let s = expect_string("String.lower", &args[0])?.to_lowercase();
            i.charge(s.len())?;
            Ok(Value::String(s))
        }),
    );
    map.insert(
        "trim".to_string(),
        builtin("String.trim", Some(1), |i, args| {
            let s = expect_string("String.trim", &args[0])?.trim().to_string();
            i.charge(s.len())?;
            Ok(Value::String(s))
        }),
    );
    map.insert(
        "split".to_string(),
        builtin("String.split", Some(2), |i, args| {
            let s = expect_string("String.split", &args[0])?;
            let sep = expect_string("String.split", &args[1])?;
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(sep).map(|p| Value::String(p.to_string())).collect()
            };
            i.charge(24 + 16 * parts.len() + s.len())?;
            Ok(Value::array(parts))
        }),
    );
    map.insert(
        "replace".to_string(),
        builtin("String.replace", Some(3), |i, args| {
            let s = expect_string("String.replace", &args[0])?;
            let from = expect_string("String.replace", &args[1])?;
            let to = expect_string("String.replace", &args[2])?;
            let replaced = s.replace(from, to);
            i.charge(replaced.len())?;
            Ok(Value::String(replaced))
        }),
    );
    map.insert(
        "substring".to_string(),
        builtin("String.substring", Some(3), |i, args| {
            let s = expect_string("String.substring", &args[0])?;
            let start = expect_number("String.substring", &args[1])? as usize;
            let end = expect_number("String.substring", &args[2])? as usize;
            let chars: Vec<char> = s.chars().collect();
            let end = end.min(chars.len());
            let start = start.min(end);
            let sub: String = chars[start..end].iter().collect();
            i.charge(sub.len())?;
            Ok(Value::String(sub))
        }),
    );
    map.insert(
        "indexOf".to_string(),
        builtin("String.indexOf", Some(2), |_i, args| {
            let s = expect_string("String.indexOf", &args[0])?;
            let needle = expect_string("String.indexOf", &args[1])?;
            match s.find(needle) {
                // Byte offset converted to a character index.
                Some(byte) => Ok(Value::Number(s[..byte].chars().count() as f64)),
                None => Ok(Value::Number(-1.0)),
            }
        }),
    );
    map.insert(
        "charAt".to_string(),
        builtin("String.charAt", Some(2), |_i, args| {
            let s = expect_string("String.charAt", &args[0])?;
            let index = expect_number("String.charAt", &args[1])?;
            if index < 0.0 || index.fract() != 0.0 {
                return Ok(Value::String(String::new()));
            }
            Ok(Value::String(
                s.chars()
                    .nth(index as usize)
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            ))
        }),
    );

    Value::object(map)
}

fn array_namespace() -> Value {
    let mut map = BTreeMap::new();

    map.insert(
        "isArray".to_string(),
        builtin("Array.isArray", Some(1), |_i, args| {
            Ok(Value::Boolean(matches!(args[0], Value::Array(_))))
        }),
    );
    map.insert(
        "join".to_string(),
        builtin("Array.join", Some(2), |i, args| {
            let Value::Array(items) = &args[0] else {
                return runtime_error("Array.join takes an array as its first argument");
            };
            let sep = expect_string("Array.join", &args[1])?;
            let joined = items.borrow().iter().map(|v| v.to_string()).join(sep);
            i.charge(joined.len())?;
            Ok(Value::String(joined))
        }),
    );
    map.insert(
        "concat".to_string(),
        builtin("Array.concat", Some(2), |i, args| {
            let (Value::Array(a), Value::Array(b)) = (&args[0], &args[1]) else {
                return runtime_error("Array.concat takes two arrays");
            };
            let combined: Vec<Value> = a.borrow().iter().chain(b.borrow().iter()).cloned().collect();
            i.charge(24 + 16 * combined.len())?;
            Ok(Value::array(combined))
        }),
    );
    map.insert(
        "reverse".to_string(),
        builtin("Array.reverse", Some(1), |i, args| {
            let Value::Array(items) = &args[0] else {
                return runtime_error("Array.reverse takes an array");
            };
            let reversed: Vec<Value> = items.borrow().iter().rev().cloned().collect();
            i.charge(24 + 16 * reversed.len())?;
            Ok(Value::array(reversed))
        }),
    );
    map.insert(
        "slice".to_string(),
        builtin("Array.slice", Some(3), |i, args| {
            let Value::Array(items) = &args[0] else {
                return runtime_error("Array.slice takes an array as its first argument");
            };
            let start = expect_number("Array.slice", &args[1])? as usize;
            let end = expect_number("Array.slice", &args[2])? as usize;
            let items = items.borrow();
            let end = end.min(items.len());
            let start = start.min(end);
            let sliced = items[start..end].to_vec();
            i.charge(24 + 16 * sliced.len())?;
            Ok(Value::array(sliced))
        }),
    );

    Value::object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::runtime::{Interpreter, Limits};
    use crate::tokenizer::tokenize;

    fn eval(source: &str) -> Result<Option<Value>> {
        let mut interp = Interpreter::new(Limits::default());
        let program = parse(&tokenize(source)?)?;
        interp.run(&program)
    }

    fn eval_value(source: &str) -> Value {
        eval(source).unwrap().expect("expected a result value")
    }

    #[test]
    fn test_builtins_installed() {
        let env = create_global_env();
        for name in ["print", "println", "len", "push", "pop", "keys", "values",
                     "type", "parseInt", "parseFloat", "toString", "Math", "String", "Array"] {
            assert!(env.get(name).is_some(), "missing builtin {}", name);
        }
    }

    #[test]
    fn test_len_and_type() {
        assert_eq!(eval_value("len([1, 2, 3])"), Value::Number(3.0));
        assert_eq!(eval_value("len(\"héllo\")"), Value::Number(5.0));
        assert_eq!(eval_value("len({a: 1, b: 2})"), Value::Number(2.0));
        assert_eq!(
            eval_value("type([1])"),
            Value::String("array".to_string())
        );
        assert_eq!(
            eval_value("type(x -> x)"),
            Value::String("function".to_string())
        );
        assert!(eval("len(5)").is_err());
    }

    #[test]
    fn test_push_pop_mutate_in_place() {
        assert_eq!(
            eval_value("var a = [1]\npush(a, 2)\nlen(a)"),
            Value::Number(2.0)
        );
        assert_eq!(eval_value("var a = [1, 2]\npop(a)"), Value::Number(2.0));
        assert_eq!(eval_value("pop([])"), Value::Null);
    }

    #[test]
    fn test_keys_and_values() {
        assert_eq!(
            eval_value("keys({b: 2, a: 1})"),
            Value::array(vec![
                Value::String("a".to_string()),
                Value::String("b".to_string()),
            ])
        );
        assert_eq!(
            eval_value("values({b: 2, a: 1})"),
            Value::array(vec![Value::Number(1.0), Value::Number(2.0)])
        );
    }

    #[test]
    fn test_number_parsing() {
        assert_eq!(eval_value("parseInt(\"42.9\")"), Value::Number(42.0));
        assert_eq!(eval_value("parseFloat(\" 2.5 \")"), Value::Number(2.5));
        let Value::Number(n) = eval_value("parseInt(\"nope\")") else {
            panic!("expected a number");
        };
        assert!(n.is_nan());
    }

    #[test]
    fn test_math_namespace() {
        assert_eq!(eval_value("Math.abs(-3)"), Value::Number(3.0));
        assert_eq!(eval_value("Math.pow(2, 10)"), Value::Number(1024.0));
        assert_eq!(eval_value("Math.min(3, 7)"), Value::Number(3.0));
        assert_eq!(eval_value("Math.floor(2.9)"), Value::Number(2.0));
        let Value::Number(pi) = eval_value("Math.PI") else {
            panic!("expected a number");
        };
        assert!((pi - std::f64::consts::PI).abs() < 1e-12);

        let Value::Number(r) = eval_value("Math.random()") else {
            panic!("expected a number");
        };
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn test_string_namespace() {
        assert_eq!(
            eval_value("String.upper(\"abc\")"),
            Value::String("ABC".to_string())
        );
        assert_eq!(
            eval_value("String.split(\"a,b\", \",\")"),
            Value::array(vec![
                Value::String("a".to_string()),
                Value::String("b".to_string()),
            ])
        );
        assert_eq!(
            eval_value("String.replace(\"aaa\", \"a\", \"b\")"),
            Value::String("bbb".to_string())
        );
        assert_eq!(
            eval_value("String.substring(\"hello\", 1, 3)"),
            Value::String("el".to_string())
        );
        assert_eq!(
            eval_value("String.indexOf(\"hello\", \"llo\")"),
            Value::Number(2.0)
        );
        assert_eq!(
            eval_value("String.indexOf(\"hello\", \"z\")"),
            Value::Number(-1.0)
        );
    }

    #[test]
    fn test_array_namespace() {
        assert_eq!(eval_value("Array.isArray([])"), Value::Boolean(true));
        assert_eq!(eval_value("Array.isArray(\"no\")"), Value::Boolean(false));
        assert_eq!(
            eval_value("Array.join([1, 2, 3], \"-\")"),
            Value::String("1-2-3".to_string())
        );
        assert_eq!(
            eval_value("Array.reverse([1, 2])"),
            Value::array(vec![Value::Number(2.0), Value::Number(1.0)])
        );
        assert_eq!(
            eval_value("Array.slice([1, 2, 3, 4], 1, 3)"),
            Value::array(vec![Value::Number(2.0), Value::Number(3.0)])
        );
    }

    #[test]
    fn test_wrong_arity_reported() {
        let err = eval("len()").unwrap_err();
        assert!(err.to_string().contains("argument"));
        assert!(eval("Math.pow(2)").is_err());
    }
}
