//! The analyzer's output: the same tree shape as [`crate::ast`], with every
//! binding and every expression annotated with its resolved [`Type`].

use derive_more::From;

use crate::{
    ast::{BinaryOp, Literal},
    types::Type,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Let {
    pub name: String,
    pub ty: Type,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Def {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub returns: Type,
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
    pub ty: Type,
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
pub struct LiteralExpr {
    pub value: Literal,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub inner: Box<Expr>,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binary {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub receiver: Box<Expr>,
    pub name: String,
    pub ty: Type,
}

/// `function` is the callee's resolved signature; `ty` is what the call
/// produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub arguments: Vec<Expr>,
    pub function: Type,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub receiver: Box<Expr>,
    pub name: String,
    pub arguments: Vec<Expr>,
    pub function: Type,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectExpr {
    pub name: Option<String>,
    pub fields: Vec<Let>,
    pub methods: Vec<Def>,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, From)]
pub enum Expr {
    Literal(LiteralExpr),
    Group(Group),
    Binary(Binary),
    Variable(Variable),
    Property(Property),
    Function(Function),
    Method(Method),
    Object(ObjectExpr),
}

impl Expr {
    pub fn ty(&self) -> &Type {
        match self {
            Expr::Literal(expr) => &expr.ty,
            Expr::Group(expr) => &expr.ty,
            Expr::Binary(expr) => &expr.ty,
            Expr::Variable(expr) => &expr.ty,
            Expr::Property(expr) => &expr.ty,
            Expr::Function(expr) => &expr.ty,
            Expr::Method(expr) => &expr.ty,
            Expr::Object(expr) => &expr.ty,
        }
    }
}
