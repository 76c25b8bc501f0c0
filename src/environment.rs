use num_bigint::BigInt;

use crate::{
    error::EvaluateError,
    evaluator::Evaluator,
    scope::Scope,
    types::Type,
    value::{Callable, FunctionValue, ObjectValue, Primitive, RuntimeValue},
};

type BuiltinFn = fn(&mut Evaluator, Vec<RuntimeValue>) -> Result<RuntimeValue, EvaluateError>;

#[derive(Clone)]
struct Builtin(BuiltinFn);

impl Callable for Builtin {
    fn invoke(
        &self,
        evaluator: &mut Evaluator,
        arguments: Vec<RuntimeValue>,
    ) -> Result<RuntimeValue, EvaluateError> {
        (self.0)(evaluator, arguments)
    }
}

fn builtin(name: &str, function: BuiltinFn) -> RuntimeValue {
    FunctionValue::new(name, Builtin(function)).into()
}

fn expect_arity(
    name: &str,
    arguments: &[RuntimeValue],
    expected: usize,
) -> Result<(), EvaluateError> {
    if arguments.len() == expected {
        Ok(())
    } else {
        Err(EvaluateError::ArityMismatch {
            name: name.into(),
            expected,
            found: arguments.len(),
        })
    }
}

fn print(
    evaluator: &mut Evaluator,
    arguments: Vec<RuntimeValue>,
) -> Result<RuntimeValue, EvaluateError> {
    expect_arity("print", &arguments, 1)?;
    evaluator.write_line(&arguments[0].to_string())?;
    Ok(RuntimeValue::nil())
}

fn log(
    evaluator: &mut Evaluator,
    mut arguments: Vec<RuntimeValue>,
) -> Result<RuntimeValue, EvaluateError> {
    expect_arity("log", &arguments, 1)?;
    let value = arguments.remove(0);
    evaluator.write_line(&format!("log: {value}"))?;
    Ok(value)
}

fn list(
    _evaluator: &mut Evaluator,
    arguments: Vec<RuntimeValue>,
) -> Result<RuntimeValue, EvaluateError> {
    Ok(RuntimeValue::list(arguments))
}

/// `range(a, b)`: the integers from `a` up to but excluding `b`.
fn range(
    _evaluator: &mut Evaluator,
    arguments: Vec<RuntimeValue>,
) -> Result<RuntimeValue, EvaluateError> {
    expect_arity("range", &arguments, 2)?;
    let (start, end) = match (arguments[0].as_primitive(), arguments[1].as_primitive()) {
        (Some(Primitive::Integer(start)), Some(Primitive::Integer(end))) => (start, end),
        _ => {
            return Err(EvaluateError::InvalidArgument {
                function: "range".into(),
                details: format!(
                    "expected two integers but found {} and {}",
                    arguments[0].kind_name(),
                    arguments[1].kind_name()
                ),
            })
        }
    };

    let mut values = Vec::new();
    let mut current = start.clone();
    while &current < end {
        values.push(RuntimeValue::integer(current.clone()));
        current += BigInt::from(1);
    }
    Ok(RuntimeValue::list(values))
}

fn function(
    _evaluator: &mut Evaluator,
    arguments: Vec<RuntimeValue>,
) -> Result<RuntimeValue, EvaluateError> {
    Ok(RuntimeValue::list(arguments))
}

/// Method of the built-in `object`: returns its arguments without the
/// receiver.
fn method(
    _evaluator: &mut Evaluator,
    arguments: Vec<RuntimeValue>,
) -> Result<RuntimeValue, EvaluateError> {
    Ok(RuntimeValue::list(arguments.into_iter().skip(1).collect()))
}

/// The global scope programs are evaluated in.
pub fn values() -> Scope<RuntimeValue> {
    let object = Scope::new();
    let members: [(&str, RuntimeValue); 2] = [
        ("property", RuntimeValue::string("property")),
        ("method", builtin("method", method)),
    ];

    let scope = Scope::new();
    let globals: [(&str, RuntimeValue); 7] = [
        ("print", builtin("print", print)),
        ("log", builtin("log", log)),
        ("list", builtin("list", list)),
        ("range", builtin("range", range)),
        ("variable", RuntimeValue::string("variable")),
        ("function", builtin("function", function)),
        (
            "object",
            ObjectValue {
                name: Some("Object".into()),
                scope: object.clone(),
            }
            .into(),
        ),
    ];

    for (name, value) in members {
        // distinct names in a fresh frame
        let _ = object.define(name, value);
    }
    for (name, value) in globals {
        let _ = scope.define(name, value);
    }
    scope
}

/// Static types of everything in [`values`].
pub fn types() -> Scope<Type> {
    let object = Scope::new();
    let members = [
        ("property", Type::String),
        ("method", Type::function(vec![], Type::Iterable)),
    ];

    let scope = Scope::new();
    let globals = [
        ("print", Type::function(vec![Type::Any], Type::Nil)),
        ("log", Type::function(vec![Type::Any], Type::Any)),
        ("list", Type::variadic(Type::Iterable)),
        (
            "range",
            Type::function(vec![Type::Integer, Type::Integer], Type::Iterable),
        ),
        ("variable", Type::String),
        ("function", Type::function(vec![], Type::Iterable)),
        ("object", Type::Object(object.clone())),
    ];

    for (name, ty) in members {
        let _ = object.define(name, ty);
    }
    for (name, ty) in globals {
        let _ = scope.define(name, ty);
    }
    scope
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, io, rc::Rc};

    use super::*;
    use crate::{analyzer::analyze, lexer::lex, parser::parse_source};

    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run(input: &str) -> (Result<RuntimeValue, EvaluateError>, String) {
        let source = parse_source(&lex(input).unwrap()).unwrap();
        let buffer = SharedBuffer::default();
        let mut evaluator = Evaluator::with_output(values(), Box::new(buffer.clone()));
        let result = evaluator.evaluate_source(&source);
        let output = String::from_utf8(buffer.0.borrow().clone()).unwrap();
        (result, output)
    }

    fn integers(values: &[i64]) -> RuntimeValue {
        RuntimeValue::list(values.iter().map(|&v| RuntimeValue::integer(v)).collect())
    }

    #[test]
    fn print_and_log() {
        assert_eq!(
            run("print(\"hi\");"),
            (Ok(RuntimeValue::nil()), "hi\n".to_string())
        );
        assert_eq!(
            run("log(1) + 1;"),
            (Ok(RuntimeValue::integer(2)), "log: 1\n".to_string())
        );
        assert!(matches!(
            run("print(1, 2);").0,
            Err(EvaluateError::ArityMismatch { .. })
        ));
    }

    #[test]
    fn list_and_range() {
        assert_eq!(run("list(1, 2, 3);").0, Ok(integers(&[1, 2, 3])));
        assert_eq!(run("list();").0, Ok(integers(&[])));
        assert_eq!(run("range(2, 5);").0, Ok(integers(&[2, 3, 4])));
        assert_eq!(run("range(5, 2);").0, Ok(integers(&[])));
        assert!(matches!(
            run("range(1, \"a\");").0,
            Err(EvaluateError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn sample_values() {
        assert_eq!(run("variable;").0, Ok(RuntimeValue::string("variable")));
        assert_eq!(run("function(1, 2);").0, Ok(integers(&[1, 2])));
        assert_eq!(
            run("object.property;").0,
            Ok(RuntimeValue::string("property"))
        );
        assert_eq!(run("object.method(1, 2);").0, Ok(integers(&[1, 2])));
        assert_eq!(
            run("print(object);").1,
            "OBJECT Object { method = DEF method(...), property = property }\n"
        );
    }

    #[test]
    fn types_match_values() {
        let check = |input: &str| {
            let source = parse_source(&lex(input).unwrap()).unwrap();
            analyze(&source, types())
        };

        assert!(check("print(1); log(\"a\"); variable + \"!\";").is_ok());
        assert!(check("FOR i IN range(0, 3) DO print(i + 1); END").is_ok());
        assert!(check("LET p: String = object.property; object.method();").is_ok());
        assert!(check("FOR x IN function() DO END").is_ok());
        assert!(check("range(1);").is_err());
        assert!(check("FOR i IN list(1, \"a\", NIL) DO print(i); END").is_ok());
        assert!(check("list();").is_ok());
        assert!(check("LET n: Integer = list(1);").is_err());
    }
}
