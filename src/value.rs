use std::fmt;

use bigdecimal::BigDecimal;
use derive_more::From;
use dyn_clone::DynClone;
use num_bigint::{BigInt, Sign};

use crate::{ast, error::EvaluateError, evaluator::Evaluator, scope::Scope};

/// Anything that can sit behind a function value: user closures and the
/// built-ins.
pub trait Callable: DynClone {
    fn invoke(
        &self,
        evaluator: &mut Evaluator,
        arguments: Vec<RuntimeValue>,
    ) -> Result<RuntimeValue, EvaluateError>;

    /// Called as `receiver.name(arguments)`. The receiver goes first.
    fn invoke_method(
        &self,
        evaluator: &mut Evaluator,
        receiver: RuntimeValue,
        mut arguments: Vec<RuntimeValue>,
    ) -> Result<RuntimeValue, EvaluateError> {
        arguments.insert(0, receiver);
        self.invoke(evaluator, arguments)
    }

    /// A copy that no longer keeps `frame` alive, for storing inside `frame`
    /// itself. `None` if this callable does not hold `frame`.
    fn detach_from(&self, _frame: &Scope<RuntimeValue>) -> Option<Box<dyn Callable>> {
        None
    }

    /// Undoes [`Callable::detach_from`] once the value leaves its frame.
    fn attach(&self) -> Option<Box<dyn Callable>> {
        None
    }
}

dyn_clone::clone_trait_object!(Callable);

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Nil,
    Boolean(bool),
    Integer(BigInt),
    Decimal(BigDecimal),
    Character(char),
    String(String),
    List(Vec<RuntimeValue>),
}

#[derive(Clone)]
pub struct FunctionValue {
    pub name: String,
    pub definition: Box<dyn Callable>,
}

impl FunctionValue {
    pub fn new(name: impl Into<String>, definition: impl Callable + 'static) -> Self {
        FunctionValue {
            name: name.into(),
            definition: Box::new(definition),
        }
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionValue")
            .field("name", &self.name)
            .field("definition", &"<callable>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ObjectValue {
    pub name: Option<String>,
    pub scope: Scope<RuntimeValue>,
}

#[derive(Debug, Clone, From)]
pub enum RuntimeValue {
    Primitive(Primitive),
    Function(FunctionValue),
    Object(ObjectValue),
}

impl RuntimeValue {
    pub fn nil() -> Self {
        Primitive::Nil.into()
    }

    pub fn boolean(value: bool) -> Self {
        Primitive::Boolean(value).into()
    }

    pub fn integer(value: impl Into<BigInt>) -> Self {
        Primitive::Integer(value.into()).into()
    }

    pub fn decimal(value: BigDecimal) -> Self {
        Primitive::Decimal(value).into()
    }

    pub fn string(value: impl Into<String>) -> Self {
        Primitive::String(value.into()).into()
    }

    pub fn list(values: Vec<RuntimeValue>) -> Self {
        Primitive::List(values).into()
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            RuntimeValue::Primitive(primitive) => Some(primitive),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, RuntimeValue::Primitive(Primitive::String(_)))
    }

    /// Name of the value's runtime kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            RuntimeValue::Primitive(primitive) => primitive.kind_name(),
            RuntimeValue::Function(_) => "Function",
            RuntimeValue::Object(_) => "Object",
        }
    }

    /// Prepares the value for being bound in `frame`. Functions that
    /// captured `frame`, and objects created in it, stop keeping it alive,
    /// so the frame and the values bound in it do not form a cycle.
    pub fn detach_from(self, frame: &Scope<RuntimeValue>) -> Self {
        match self {
            RuntimeValue::Object(object) => match object.scope.released_from(frame) {
                Some(scope) => ObjectValue {
                    name: object.name,
                    scope,
                }
                .into(),
                None => object.into(),
            },
            RuntimeValue::Function(function) => match function.definition.detach_from(frame) {
                Some(definition) => FunctionValue {
                    name: function.name,
                    definition,
                }
                .into(),
                None => function.into(),
            },
            RuntimeValue::Primitive(Primitive::List(values)) => RuntimeValue::list(
                values
                    .into_iter()
                    .map(|value| value.detach_from(frame))
                    .collect(),
            ),
            other => other,
        }
    }

    /// The value as read out of a frame: functions and objects take a
    /// strong hold on their enclosing scope again.
    pub fn attach(self) -> Self {
        match self {
            RuntimeValue::Object(object) => ObjectValue {
                scope: object.scope.anchored(),
                name: object.name,
            }
            .into(),
            RuntimeValue::Function(function) => match function.definition.attach() {
                Some(definition) => FunctionValue {
                    name: function.name,
                    definition,
                }
                .into(),
                None => function.into(),
            },
            RuntimeValue::Primitive(Primitive::List(values)) => {
                RuntimeValue::list(values.into_iter().map(RuntimeValue::attach).collect())
            }
            other => other,
        }
    }

    /// Renders the value. Members of nested objects are not expanded, since
    /// an object may hold a reference to itself.
    fn render(&self, f: &mut fmt::Formatter<'_>, expand_objects: bool) -> fmt::Result {
        match self {
            RuntimeValue::Primitive(primitive) => primitive.render(f, expand_objects),
            RuntimeValue::Function(function) => write!(f, "DEF {}(...)", function.name),
            RuntimeValue::Object(object) => {
                f.write_str("OBJECT ")?;
                if let Some(name) = &object.name {
                    write!(f, "{name} ")?;
                }
                if !expand_objects {
                    return f.write_str("{...}");
                }

                let names = object.scope.names();
                if names.is_empty() {
                    return f.write_str("{}");
                }

                f.write_str("{ ")?;
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} = ")?;
                    if let Some(member) = object.scope.get(name, true) {
                        member.render(f, false)?;
                    }
                }
                f.write_str(" }")
            }
        }
    }
}

impl Primitive {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Primitive::Nil => "Nil",
            Primitive::Boolean(_) => "Boolean",
            Primitive::Integer(_) => "Integer",
            Primitive::Decimal(_) => "Decimal",
            Primitive::Character(_) => "Character",
            Primitive::String(_) => "String",
            Primitive::List(_) => "List",
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, expand_objects: bool) -> fmt::Result {
        match self {
            Primitive::Nil => f.write_str("NIL"),
            Primitive::Boolean(true) => f.write_str("TRUE"),
            Primitive::Boolean(false) => f.write_str("FALSE"),
            Primitive::Integer(value) => write!(f, "{value}"),
            Primitive::Decimal(value) => f.write_str(&decimal_text(value)),
            Primitive::Character(value) => write!(f, "{value}"),
            Primitive::String(value) => f.write_str(value),
            Primitive::List(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    value.render(f, expand_objects)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Canonical text of a decimal, keeping its scale: `0.0` stays `0.0` and
/// `1.50` stays `1.50`. A scale of zero or below is written with an
/// exponent (`1.0e10`) so the text still reads back as a decimal.
pub fn decimal_text(value: &BigDecimal) -> String {
    let (unscaled, scale) = value.as_bigint_and_exponent();
    let sign = if unscaled.sign() == Sign::Minus { "-" } else { "" };
    let digits = unscaled.magnitude().to_string();

    if scale > 0 {
        let scale = scale.unsigned_abs() as usize;
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (whole, fraction) = padded.split_at(padded.len() - scale);
        format!("{sign}{whole}.{fraction}")
    } else {
        let exponent = digits.len() as i64 - 1 - scale;
        let (first, rest) = digits.split_at(1);
        let rest = if rest.is_empty() { "0" } else { rest };
        format!("{sign}{first}.{rest}e{exponent}")
    }
}

impl From<&ast::Literal> for RuntimeValue {
    fn from(literal: &ast::Literal) -> Self {
        let primitive = match literal {
            ast::Literal::Nil => Primitive::Nil,
            ast::Literal::Boolean(value) => Primitive::Boolean(*value),
            ast::Literal::Integer(value) => Primitive::Integer(value.clone()),
            ast::Literal::Decimal(value) => Primitive::Decimal(value.clone()),
            ast::Literal::Character(value) => Primitive::Character(*value),
            ast::Literal::String(value) => Primitive::String(value.clone()),
        };
        primitive.into()
    }
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, true)
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, true)
    }
}

impl PartialEq for RuntimeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RuntimeValue::Primitive(left), RuntimeValue::Primitive(right)) => left == right,
            (RuntimeValue::Function(_), RuntimeValue::Function(_)) => false, // functions are never equal
            (RuntimeValue::Object(left), RuntimeValue::Object(right)) => {
                left.scope.ptr_eq(&right.scope)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[derive(Clone)]
    struct Noop;

    impl Callable for Noop {
        fn invoke(
            &self,
            _evaluator: &mut Evaluator,
            _arguments: Vec<RuntimeValue>,
        ) -> Result<RuntimeValue, EvaluateError> {
            Ok(RuntimeValue::nil())
        }
    }

    #[test]
    fn renders_primitives() {
        assert_eq!(RuntimeValue::nil().to_string(), "NIL");
        assert_eq!(RuntimeValue::boolean(true).to_string(), "TRUE");
        assert_eq!(RuntimeValue::integer(-12).to_string(), "-12");
        assert_eq!(
            RuntimeValue::decimal(BigDecimal::from_str("1.50").unwrap()).to_string(),
            "1.50"
        );
        assert_eq!(RuntimeValue::string("hi").to_string(), "hi");
        assert_eq!(
            RuntimeValue::list(vec![RuntimeValue::integer(1), RuntimeValue::string("a")])
                .to_string(),
            "[1, a]"
        );
    }

    #[test]
    fn decimals_keep_their_scale() {
        let text = |literal: &str| decimal_text(&BigDecimal::from_str(literal).unwrap());

        assert_eq!(text("0.0"), "0.0");
        assert_eq!(text("0.00"), "0.00");
        assert_eq!(text("100.0"), "100.0");
        assert_eq!(text("-0.05"), "-0.05");
        assert_eq!(text("1.0e10"), "1.0e10");
        assert_eq!(text("12.5e3"), "1.25e4");
        assert_eq!(text("2.50e-3"), "0.00250");
        // Zero carries no sign.
        assert_eq!(text("-0.0"), "0.0");
        assert_eq!(
            RuntimeValue::decimal(BigDecimal::new(BigInt::from(7), 0)).to_string(),
            "7.0e0"
        );
    }

    #[test]
    fn renders_functions_and_objects() {
        let function: RuntimeValue = FunctionValue::new("f", Noop).into();
        assert_eq!(function.to_string(), "DEF f(...)");

        let scope = Scope::new();
        scope.define("b", RuntimeValue::integer(2)).unwrap();
        scope.define("a", RuntimeValue::integer(1)).unwrap();
        let object: RuntimeValue = ObjectValue {
            name: Some("Point".into()),
            scope: scope.clone(),
        }
        .into();
        assert_eq!(object.to_string(), "OBJECT Point { a = 1, b = 2 }");

        scope.define("self", object.clone()).unwrap();
        assert_eq!(
            object.to_string(),
            "OBJECT Point { a = 1, b = 2, self = OBJECT Point {...} }"
        );

        let empty: RuntimeValue = ObjectValue {
            name: None,
            scope: Scope::new(),
        }
        .into();
        assert_eq!(empty.to_string(), "OBJECT {}");
    }

    #[test]
    fn equality() {
        assert_eq!(RuntimeValue::integer(1), RuntimeValue::integer(1));
        assert_ne!(RuntimeValue::integer(1), RuntimeValue::string("1"));

        let function: RuntimeValue = FunctionValue::new("f", Noop).into();
        assert_ne!(function, function.clone());

        let object: RuntimeValue = ObjectValue {
            name: None,
            scope: Scope::new(),
        }
        .into();
        assert_eq!(object, object.clone());
    }
}
