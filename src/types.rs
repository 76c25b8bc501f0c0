use std::fmt;

use crate::{error::AnalyzeError, scope::Scope};

/// Static types. `Comparable`, `Equatable` and `Iterable` are constraints a
/// concrete type can satisfy rather than types a value has.
#[derive(Debug, Clone)]
pub enum Type {
    Any,
    Nil,
    Boolean,
    Integer,
    Decimal,
    String,
    Comparable,
    Equatable,
    Iterable,
    Function {
        parameters: Vec<Type>,
        returns: Box<Type>,
    },
    /// A function taking any number of arguments of any type.
    Variadic {
        returns: Box<Type>,
    },
    Object(Scope<Type>),
}

impl Type {
    /// The type spelled `name` in a declaration, if it is one of the named
    /// types.
    pub fn from_name(name: &str) -> Option<Type> {
        let ty = match name {
            "Any" => Type::Any,
            "Nil" => Type::Nil,
            "Boolean" => Type::Boolean,
            "Integer" => Type::Integer,
            "Decimal" => Type::Decimal,
            "String" => Type::String,
            "Comparable" => Type::Comparable,
            "Equatable" => Type::Equatable,
            "Iterable" => Type::Iterable,
            _ => return None,
        };
        Some(ty)
    }

    pub fn function(parameters: Vec<Type>, returns: Type) -> Type {
        Type::Function {
            parameters,
            returns: Box::new(returns),
        }
    }

    pub fn variadic(returns: Type) -> Type {
        Type::Variadic {
            returns: Box::new(returns),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(*self, Type::Integer | Type::Decimal)
    }
}

// Objects are nominal by identity of their member scope.
impl PartialEq for Type {
    fn eq(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Any, Type::Any)
            | (Type::Nil, Type::Nil)
            | (Type::Boolean, Type::Boolean)
            | (Type::Integer, Type::Integer)
            | (Type::Decimal, Type::Decimal)
            | (Type::String, Type::String)
            | (Type::Comparable, Type::Comparable)
            | (Type::Equatable, Type::Equatable)
            | (Type::Iterable, Type::Iterable) => true,
            (
                Type::Function {
                    parameters: a_params,
                    returns: a_returns,
                },
                Type::Function {
                    parameters: b_params,
                    returns: b_returns,
                },
            ) => a_params == b_params && a_returns == b_returns,
            (Type::Variadic { returns: a }, Type::Variadic { returns: b }) => a == b,
            (Type::Object(a), Type::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => f.write_str("Any"),
            Type::Nil => f.write_str("Nil"),
            Type::Boolean => f.write_str("Boolean"),
            Type::Integer => f.write_str("Integer"),
            Type::Decimal => f.write_str("Decimal"),
            Type::String => f.write_str("String"),
            Type::Comparable => f.write_str("Comparable"),
            Type::Equatable => f.write_str("Equatable"),
            Type::Iterable => f.write_str("Iterable"),
            Type::Function {
                parameters,
                returns,
            } => {
                let parameters: Vec<String> = parameters.iter().map(Type::to_string).collect();
                write!(f, "Function({}) -> {}", parameters.join(", "), returns)
            }
            Type::Variadic { returns } => write!(f, "Function(Any...) -> {returns}"),
            Type::Object(members) => write!(f, "Object{{{}}}", members.names().join(", ")),
        }
    }
}

/// Succeeds when a value of type `found` may be used where `expected` is
/// required. This is a fixed table, not a lattice: there is no transitivity
/// beyond what is listed here.
pub fn require_subtype(found: &Type, expected: &Type) -> Result<(), AnalyzeError> {
    let ok = found == expected
        || match expected {
            Type::Any => true,
            Type::Comparable => matches!(found, Type::Integer | Type::Decimal | Type::String),
            Type::Equatable => matches!(
                found,
                Type::Integer | Type::Decimal | Type::String | Type::Boolean
            ),
            _ => false,
        };

    if ok {
        Ok(())
    } else {
        Err(AnalyzeError::NotSubtype {
            found: found.clone(),
            expected: expected.clone(),
        })
    }
}
