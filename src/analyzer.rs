use log::{debug, trace};

use crate::{
    ast::{self, BinaryOp},
    error::AnalyzeError,
    ir,
    scope::Scope,
    types::{require_subtype, Type},
};

/// Name bound inside function and method bodies holding the expected return
/// type. `$` cannot start an identifier, so user code can never shadow it.
const RETURNS: &str = "$RETURNS";

struct Analyzer {
    scope: Scope<Type>,
}

impl Analyzer {
    fn new(scope: Scope<Type>) -> Self {
        Analyzer { scope }
    }

    /// Runs `f` with `scope` active, restoring the previous scope whether or
    /// not `f` succeeds.
    fn in_scope<T>(
        &mut self,
        scope: Scope<Type>,
        f: impl FnOnce(&mut Self) -> Result<T, AnalyzeError>,
    ) -> Result<T, AnalyzeError> {
        let previous = std::mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = previous;
        result
    }

    fn resolve_type(&self, name: &str) -> Result<Type, AnalyzeError> {
        Type::from_name(name).ok_or_else(|| AnalyzeError::UnknownType { name: name.into() })
    }

    fn resolve_optional_type(&self, name: &Option<String>) -> Result<Option<Type>, AnalyzeError> {
        name.as_deref().map(|name| self.resolve_type(name)).transpose()
    }

    fn analyze_block(&mut self, stmts: &[ast::Stmt]) -> Result<Vec<ir::Stmt>, AnalyzeError> {
        stmts.iter().map(|stmt| self.analyze_stmt(stmt)).collect()
    }

    fn analyze_stmt(&mut self, stmt: &ast::Stmt) -> Result<ir::Stmt, AnalyzeError> {
        match stmt {
            ast::Stmt::Let(stmt) => Ok(self.analyze_let(stmt)?.into()),
            ast::Stmt::Def(stmt) => Ok(self.analyze_def(stmt)?.into()),
            ast::Stmt::If(stmt) => self.analyze_if(stmt),
            ast::Stmt::For(stmt) => self.analyze_for(stmt),
            ast::Stmt::Return(stmt) => self.analyze_return(stmt),
            ast::Stmt::Expression(stmt) => Ok(ir::Expression {
                expr: self.analyze_expr(&stmt.expr)?,
            }
            .into()),
            ast::Stmt::Assignment(stmt) => self.analyze_assignment(stmt),
        }
    }

    fn analyze_let(&mut self, stmt: &ast::Let) -> Result<ir::Let, AnalyzeError> {
        if self.scope.contains(&stmt.name, true) {
            return Err(AnalyzeError::AlreadyDefined {
                name: stmt.name.clone(),
            });
        }

        let declared = self.resolve_optional_type(&stmt.type_name)?;
        let value = stmt
            .value
            .as_ref()
            .map(|value| self.analyze_expr(value))
            .transpose()?;

        let ty = match (declared, &value) {
            (Some(declared), _) => declared,
            (None, Some(value)) => value.ty().clone(),
            (None, None) => Type::Any,
        };
        if let Some(value) = &value {
            require_subtype(value.ty(), &ty)?;
        }

        self.scope.define(stmt.name.as_str(), ty.clone())?;
        Ok(ir::Let {
            name: stmt.name.clone(),
            ty,
            value,
        })
    }

    fn analyze_def(&mut self, stmt: &ast::Def) -> Result<ir::Def, AnalyzeError> {
        if self.scope.contains(&stmt.name, true) {
            return Err(AnalyzeError::AlreadyDefined {
                name: stmt.name.clone(),
            });
        }

        let mut parameters = Vec::with_capacity(stmt.parameters.len());
        for parameter in &stmt.parameters {
            let type_name =
                parameter
                    .type_name
                    .as_deref()
                    .ok_or_else(|| AnalyzeError::MissingParameterType {
                        function: stmt.name.clone(),
                        parameter: parameter.name.clone(),
                    })?;
            parameters.push(ir::Parameter {
                name: parameter.name.clone(),
                ty: self.resolve_type(type_name)?,
            });
        }
        let returns = self
            .resolve_optional_type(&stmt.return_type)?
            .unwrap_or(Type::Any);

        // Bound before the body so the function can call itself.
        self.scope.define(
            stmt.name.as_str(),
            Type::function(
                parameters.iter().map(|p| p.ty.clone()).collect(),
                returns.clone(),
            ),
        )?;

        let body_scope = self.scope.child();
        body_scope.define(RETURNS, returns.clone())?;
        for parameter in &parameters {
            body_scope.define(parameter.name.as_str(), parameter.ty.clone())?;
        }
        trace!("analyzing body of '{}'", stmt.name);
        let body = self.in_scope(body_scope, |analyzer| analyzer.analyze_block(&stmt.body))?;

        Ok(ir::Def {
            name: stmt.name.clone(),
            parameters,
            returns,
            body,
        })
    }

    fn analyze_if(&mut self, stmt: &ast::If) -> Result<ir::Stmt, AnalyzeError> {
        let condition = self.analyze_expr(&stmt.condition)?;
        require_subtype(condition.ty(), &Type::Boolean)?;

        let then_body = self.in_scope(self.scope.child(), |analyzer| {
            analyzer.analyze_block(&stmt.then_body)
        })?;
        let else_body = self.in_scope(self.scope.child(), |analyzer| {
            analyzer.analyze_block(&stmt.else_body)
        })?;

        Ok(ir::If {
            condition,
            then_body,
            else_body,
        }
        .into())
    }

    fn analyze_for(&mut self, stmt: &ast::For) -> Result<ir::Stmt, AnalyzeError> {
        let iterable = self.analyze_expr(&stmt.iterable)?;
        if *iterable.ty() != Type::Iterable {
            return Err(AnalyzeError::NotIterable {
                found: iterable.ty().clone(),
            });
        }

        // Loop variables are always integers, whatever the iterable holds.
        let body_scope = self.scope.child();
        body_scope.define(stmt.name.as_str(), Type::Integer)?;
        let body = self.in_scope(body_scope, |analyzer| analyzer.analyze_block(&stmt.body))?;

        Ok(ir::For {
            name: stmt.name.clone(),
            ty: Type::Integer,
            iterable,
            body,
        }
        .into())
    }

    fn analyze_return(&mut self, stmt: &ast::Return) -> Result<ir::Stmt, AnalyzeError> {
        let expected = self
            .scope
            .get(RETURNS, false)
            .ok_or(AnalyzeError::ReturnOutsideFunction)?;

        let value = match &stmt.value {
            Some(value) => {
                let value = self.analyze_expr(value)?;
                require_subtype(value.ty(), &expected)?;
                Some(value)
            }
            None if expected == Type::Nil => None,
            None => return Err(AnalyzeError::MissingReturnValue { expected }),
        };

        Ok(ir::Return { value }.into())
    }

    fn analyze_assignment(&mut self, stmt: &ast::Assignment) -> Result<ir::Stmt, AnalyzeError> {
        let target = match &stmt.target {
            ast::Expr::Variable(_) | ast::Expr::Property(_) => self.analyze_expr(&stmt.target)?,
            _ => return Err(AnalyzeError::InvalidAssignmentTarget),
        };
        let value = self.analyze_expr(&stmt.value)?;
        require_subtype(value.ty(), target.ty())?;

        Ok(ir::Assignment { target, value }.into())
    }

    fn analyze_expr(&mut self, expr: &ast::Expr) -> Result<ir::Expr, AnalyzeError> {
        match expr {
            ast::Expr::Literal(literal) => Ok(analyze_literal(literal).into()),
            ast::Expr::Group(group) => {
                let inner = self.analyze_expr(&group.inner)?;
                Ok(ir::Group {
                    ty: inner.ty().clone(),
                    inner: Box::new(inner),
                }
                .into())
            }
            ast::Expr::Binary(binary) => self.analyze_binary(binary),
            ast::Expr::Variable(variable) => {
                let ty = self.scope.get(&variable.name, false).ok_or_else(|| {
                    AnalyzeError::Undefined {
                        name: variable.name.clone(),
                    }
                })?;
                Ok(ir::Variable {
                    name: variable.name.clone(),
                    ty,
                }
                .into())
            }
            ast::Expr::Property(property) => {
                let receiver = self.analyze_expr(&property.receiver)?;
                let ty = member_of(receiver.ty(), &property.name)?;
                Ok(ir::Property {
                    receiver: Box::new(receiver),
                    name: property.name.clone(),
                    ty,
                }
                .into())
            }
            ast::Expr::Function(call) => {
                let function = self.scope.get(&call.name, false).ok_or_else(|| {
                    AnalyzeError::Undefined {
                        name: call.name.clone(),
                    }
                })?;
                let (arguments, ty) = self.analyze_call(&call.name, &function, &call.arguments)?;
                Ok(ir::Function {
                    name: call.name.clone(),
                    arguments,
                    function,
                    ty,
                }
                .into())
            }
            ast::Expr::Method(call) => {
                let receiver = self.analyze_expr(&call.receiver)?;
                let function = member_of(receiver.ty(), &call.name)?;
                let (arguments, ty) = self.analyze_call(&call.name, &function, &call.arguments)?;
                Ok(ir::Method {
                    receiver: Box::new(receiver),
                    name: call.name.clone(),
                    arguments,
                    function,
                    ty,
                }
                .into())
            }
            ast::Expr::Object(object) => Ok(self.analyze_object(object)?.into()),
        }
    }

    fn analyze_binary(&mut self, binary: &ast::Binary) -> Result<ir::Expr, AnalyzeError> {
        let left = self.analyze_expr(&binary.left)?;
        let right = self.analyze_expr(&binary.right)?;

        let unsupported = || AnalyzeError::UnsupportedOperator {
            op: binary.op.to_string(),
            left: left.ty().clone(),
            right: right.ty().clone(),
        };

        let ty = match binary.op {
            BinaryOp::Add if *left.ty() == Type::String || *right.ty() == Type::String => {
                Type::String
            }
            op if op.is_arithmetic() => {
                if left.ty().is_numeric() && left.ty() == right.ty() {
                    left.ty().clone()
                } else {
                    return Err(unsupported());
                }
            }
            op if op.is_comparison() => {
                require_subtype(left.ty(), &Type::Comparable)?;
                require_subtype(right.ty(), left.ty())?;
                Type::Boolean
            }
            op if op.is_equality() => {
                require_subtype(left.ty(), &Type::Equatable)?;
                require_subtype(right.ty(), left.ty())?;
                Type::Boolean
            }
            _ => {
                require_subtype(left.ty(), &Type::Boolean)?;
                require_subtype(right.ty(), &Type::Boolean)?;
                Type::Boolean
            }
        };

        Ok(ir::Binary {
            op: binary.op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
        }
        .into())
    }

    /// Checks a call against `function`'s signature, returning the analyzed
    /// arguments and the call's result type.
    fn analyze_call(
        &mut self,
        name: &str,
        function: &Type,
        arguments: &[ast::Expr],
    ) -> Result<(Vec<ir::Expr>, Type), AnalyzeError> {
        let (parameters, returns) = match function {
            Type::Function {
                parameters,
                returns,
            } => (parameters, returns),
            Type::Variadic { returns } => {
                let analyzed = arguments
                    .iter()
                    .map(|argument| self.analyze_expr(argument))
                    .collect::<Result<_, _>>()?;
                return Ok((analyzed, (**returns).clone()));
            }
            other => {
                return Err(AnalyzeError::NotAFunction {
                    name: name.into(),
                    found: other.clone(),
                })
            }
        };

        if arguments.len() != parameters.len() {
            return Err(AnalyzeError::ArityMismatch {
                name: name.into(),
                expected: parameters.len(),
                found: arguments.len(),
            });
        }

        let mut analyzed = Vec::with_capacity(arguments.len());
        for (argument, parameter) in arguments.iter().zip(parameters) {
            let argument = self.analyze_expr(argument)?;
            require_subtype(argument.ty(), parameter)?;
            analyzed.push(argument);
        }

        Ok((analyzed, (**returns).clone()))
    }

    fn analyze_object(&mut self, object: &ast::ObjectExpr) -> Result<ir::ObjectExpr, AnalyzeError> {
        if let Some(name) = &object.name {
            if Type::from_name(name).is_some() {
                return Err(AnalyzeError::ReservedObjectName { name: name.clone() });
            }
        }

        let members = self.scope.child();
        let object_type = Type::Object(members.clone());

        let mut fields = Vec::with_capacity(object.fields.len());
        for field in &object.fields {
            if members.contains(&field.name, true) {
                return Err(AnalyzeError::DuplicateField {
                    name: field.name.clone(),
                });
            }
            if field.value.is_none() {
                return Err(AnalyzeError::MissingFieldValue {
                    name: field.name.clone(),
                });
            }
            // Initializers see the fields declared before them.
            fields.push(self.in_scope(members.clone(), |analyzer| analyzer.analyze_let(field))?);
        }

        let mut declared_returns = Vec::with_capacity(object.methods.len());
        for method in &object.methods {
            if members.contains(&method.name, true) {
                return Err(AnalyzeError::DuplicateField {
                    name: method.name.clone(),
                });
            }
            let declared = self.resolve_optional_type(&method.return_type)?;
            members.define(
                method.name.as_str(),
                Type::function(
                    vec![Type::Any; method.parameters.len()],
                    declared.clone().unwrap_or(Type::Any),
                ),
            )?;
            declared_returns.push(declared);
        }

        let mut methods = Vec::with_capacity(object.methods.len());
        for (method, declared) in object.methods.iter().zip(declared_returns) {
            let body_scope = members.child();
            body_scope.define(RETURNS, declared.clone().unwrap_or(Type::Any))?;
            body_scope.define("this", object_type.clone())?;
            let mut parameters = Vec::with_capacity(method.parameters.len());
            for parameter in &method.parameters {
                body_scope.define(parameter.name.as_str(), Type::Any)?;
                parameters.push(ir::Parameter {
                    name: parameter.name.clone(),
                    ty: Type::Any,
                });
            }

            trace!("analyzing body of method '{}'", method.name);
            let body = self.in_scope(body_scope, |analyzer| analyzer.analyze_block(&method.body))?;

            let returns = match (declared, body.last()) {
                (Some(declared), _) => declared,
                (None, Some(ir::Stmt::Expression(last))) => last.expr.ty().clone(),
                (None, _) => Type::Any,
            };
            members.set(
                &method.name,
                Type::function(vec![Type::Any; parameters.len()], returns.clone()),
            );

            methods.push(ir::Def {
                name: method.name.clone(),
                parameters,
                returns,
                body,
            });
        }

        Ok(ir::ObjectExpr {
            name: object.name.clone(),
            fields,
            methods,
            ty: object_type,
        })
    }
}

fn analyze_literal(literal: &ast::Literal) -> ir::LiteralExpr {
    let ty = match literal {
        ast::Literal::Nil => Type::Nil,
        ast::Literal::Boolean(_) => Type::Boolean,
        ast::Literal::Integer(_) => Type::Integer,
        ast::Literal::Decimal(_) => Type::Decimal,
        ast::Literal::Character(_) => Type::Any,
        ast::Literal::String(_) => Type::String,
    };
    ir::LiteralExpr {
        value: literal.clone(),
        ty,
    }
}

/// Type of member `name` of `receiver`, looked up in the object's own frame.
fn member_of(receiver: &Type, name: &str) -> Result<Type, AnalyzeError> {
    match receiver {
        Type::Object(members) => {
            members
                .get(name, true)
                .ok_or_else(|| AnalyzeError::UnknownMember { name: name.into() })
        }
        other => Err(AnalyzeError::NotAnObject {
            found: other.clone(),
        }),
    }
}

pub fn analyze(source: &ast::Source, scope: Scope<Type>) -> Result<ir::Source, AnalyzeError> {
    let mut analyzer = Analyzer::new(scope);

    let mut statements = Vec::with_capacity(source.statements.len());
    for stmt in &source.statements {
        statements.push(analyzer.analyze_stmt(stmt)?);
    }

    debug!("analyzed {} statement(s)", statements.len());
    Ok(ir::Source { statements })
}
