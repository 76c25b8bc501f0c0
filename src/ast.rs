use bigdecimal::BigDecimal;
use derive_more::{Display, From};
use num_bigint::BigInt;

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Let {
    pub name: String,
    pub type_name: Option<String>,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Def {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct If {
    pub condition: Expr,
    pub then_body: Vec<Stmt>,
    pub else_body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct For {
    pub name: String,
    pub iterable: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Return {
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub target: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, From)]
pub enum Stmt {
    Let(Let),
    Def(Def),
    If(If),
    For(For),
    Return(Return),
    Expression(Expression),
    Assignment(Assignment),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Boolean(bool),
    Integer(BigInt),
    Decimal(BigDecimal),
    Character(char),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BinaryOp {
    #[display(fmt = "+")]
    Add,
    #[display(fmt = "-")]
    Subtract,
    #[display(fmt = "*")]
    Multiply,
    #[display(fmt = "/")]
    Divide,

    #[display(fmt = "<")]
    Less,
    #[display(fmt = "<=")]
    LessEqual,
    #[display(fmt = ">")]
    Greater,
    #[display(fmt = ">=")]
    GreaterEqual,
    #[display(fmt = "==")]
    Equal,
    #[display(fmt = "!=")]
    NotEqual,

    #[display(fmt = "AND")]
    And,
    #[display(fmt = "OR")]
    Or,
}

impl BinaryOp {
    pub fn from_literal(literal: &str) -> Option<BinaryOp> {
        match literal {
            "+" => Some(Self::Add),
            "-" => Some(Self::Subtract),
            "*" => Some(Self::Multiply),
            "/" => Some(Self::Divide),
            "<" => Some(Self::Less),
            "<=" => Some(Self::LessEqual),
            ">" => Some(Self::Greater),
            ">=" => Some(Self::GreaterEqual),
            "==" => Some(Self::Equal),
            "!=" => Some(Self::NotEqual),
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            _ => None,
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            *self,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            *self,
            Self::Less | Self::LessEqual | Self::Greater | Self::GreaterEqual
        )
    }

    pub fn is_equality(&self) -> bool {
        matches!(*self, Self::Equal | Self::NotEqual)
    }

    pub fn is_logical(&self) -> bool {
        matches!(*self, Self::And | Self::Or)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub inner: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binary {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub receiver: Box<Expr>,
    pub name: String,
}

/// A call to a free function, `name(args)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub arguments: Vec<Expr>,
}

/// A call through an object, `receiver.name(args)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub receiver: Box<Expr>,
    pub name: String,
    pub arguments: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectExpr {
    pub name: Option<String>,
    pub fields: Vec<Let>,
    pub methods: Vec<Def>,
}

#[derive(Debug, Clone, PartialEq, From)]
pub enum Expr {
    Literal(Literal),
    Group(Group),
    Binary(Binary),
    Variable(Variable),
    Property(Property),
    Function(Function),
    Method(Method),
    Object(ObjectExpr),
}
