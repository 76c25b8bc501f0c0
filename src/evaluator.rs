use std::{
    cmp::Ordering,
    collections::HashSet,
    io::{self, Write},
    rc::Rc,
};

use bigdecimal::BigDecimal;
use log::{debug, trace};
use num_bigint::{BigInt, Sign};

use crate::{
    ast::{self, BinaryOp},
    error::EvaluateError,
    scope::{Scope, WeakScope},
    value::{Callable, FunctionValue, ObjectValue, Primitive, RuntimeValue},
};

/// Result of executing one statement: either carry on, or unwind to the
/// nearest call with a value.
enum Flow {
    Next(RuntimeValue),
    Return(RuntimeValue),
}

struct CallFrame {
    name: String,
    returns: Option<String>,
}

#[derive(Clone)]
enum Captured {
    Shared(Scope<RuntimeValue>),
    /// The closure is bound inside the frame it captured.
    Own(WeakScope<RuntimeValue>),
}

/// A user-defined function or method together with the scope it was defined
/// in.
#[derive(Clone)]
struct Closure {
    def: Rc<ast::Def>,
    captured: Captured,
    is_method: bool,
}

impl Closure {
    fn scope(&self) -> Result<Scope<RuntimeValue>, EvaluateError> {
        match &self.captured {
            Captured::Shared(scope) => Ok(scope.clone()),
            Captured::Own(scope) => scope.upgrade().ok_or_else(|| EvaluateError::DroppedScope {
                name: self.def.name.clone(),
            }),
        }
    }

    fn with_captured(&self, captured: Captured) -> Box<dyn Callable> {
        Box::new(Closure {
            captured,
            ..self.clone()
        })
    }
}

impl Callable for Closure {
    fn invoke(
        &self,
        evaluator: &mut Evaluator,
        arguments: Vec<RuntimeValue>,
    ) -> Result<RuntimeValue, EvaluateError> {
        if self.is_method {
            return Err(EvaluateError::UnboundMethod {
                name: self.def.name.clone(),
            });
        }
        evaluator.call_closure(self, None, arguments)
    }

    fn invoke_method(
        &self,
        evaluator: &mut Evaluator,
        receiver: RuntimeValue,
        mut arguments: Vec<RuntimeValue>,
    ) -> Result<RuntimeValue, EvaluateError> {
        if self.is_method {
            evaluator.call_closure(self, Some(receiver), arguments)
        } else {
            arguments.insert(0, receiver);
            evaluator.call_closure(self, None, arguments)
        }
    }

    fn detach_from(&self, frame: &Scope<RuntimeValue>) -> Option<Box<dyn Callable>> {
        match &self.captured {
            Captured::Shared(scope) if scope.ptr_eq(frame) => {
                Some(self.with_captured(Captured::Own(scope.downgrade())))
            }
            _ => None,
        }
    }

    fn attach(&self) -> Option<Box<dyn Callable>> {
        match &self.captured {
            Captured::Own(scope) => scope
                .upgrade()
                .map(|scope| self.with_captured(Captured::Shared(scope))),
            Captured::Shared(_) => None,
        }
    }
}

pub struct Evaluator {
    scope: Scope<RuntimeValue>,
    frames: Vec<CallFrame>,
    output: Box<dyn Write>,
}

impl Evaluator {
    /// An evaluator writing program output to stdout.
    pub fn new(scope: Scope<RuntimeValue>) -> Self {
        Self::with_output(scope, Box::new(io::stdout()))
    }

    pub fn with_output(scope: Scope<RuntimeValue>, output: Box<dyn Write>) -> Self {
        Evaluator {
            scope,
            frames: Vec::new(),
            output,
        }
    }

    /// The currently active scope.
    pub fn scope(&self) -> &Scope<RuntimeValue> {
        &self.scope
    }

    /// Writes one line of program output.
    pub fn write_line(&mut self, text: &str) -> Result<(), EvaluateError> {
        writeln!(self.output, "{text}")?;
        Ok(())
    }

    /// Runs every statement of `source` in the active scope, returning the
    /// value of the last one (nil for an empty program).
    pub fn evaluate_source(&mut self, source: &ast::Source) -> Result<RuntimeValue, EvaluateError> {
        let mut last = RuntimeValue::nil();
        for stmt in &source.statements {
            match self.execute_stmt(stmt)? {
                Flow::Next(value) => last = value,
                Flow::Return(_) => return Err(EvaluateError::ReturnOutsideFunction),
            }
        }

        debug!("evaluated {} statement(s)", source.statements.len());
        self.output.flush()?;
        Ok(last)
    }

    /// Runs `f` with `scope` active, restoring the previous scope whether or
    /// not `f` succeeds.
    fn in_scope<T>(
        &mut self,
        scope: Scope<RuntimeValue>,
        f: impl FnOnce(&mut Self) -> Result<T, EvaluateError>,
    ) -> Result<T, EvaluateError> {
        let previous = std::mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = previous;
        result
    }

    fn execute_block(&mut self, stmts: &[ast::Stmt]) -> Result<Flow, EvaluateError> {
        let mut last = RuntimeValue::nil();
        for stmt in stmts {
            match self.execute_stmt(stmt)? {
                Flow::Next(value) => last = value,
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        Ok(Flow::Next(last))
    }

    fn execute_stmt(&mut self, stmt: &ast::Stmt) -> Result<Flow, EvaluateError> {
        match stmt {
            ast::Stmt::Let(stmt) => self.execute_let(stmt).map(Flow::Next),
            ast::Stmt::Def(stmt) => self.execute_def(stmt).map(Flow::Next),
            ast::Stmt::If(stmt) => self.execute_if(stmt),
            ast::Stmt::For(stmt) => self.execute_for(stmt),
            ast::Stmt::Return(stmt) => self.execute_return(stmt),
            ast::Stmt::Expression(stmt) => self.evaluate_expr(&stmt.expr).map(Flow::Next),
            ast::Stmt::Assignment(stmt) => self.execute_assignment(stmt).map(Flow::Next),
        }
    }

    fn execute_let(&mut self, stmt: &ast::Let) -> Result<RuntimeValue, EvaluateError> {
        if self.scope.contains(&stmt.name, true) {
            return Err(EvaluateError::AlreadyDefined {
                name: stmt.name.clone(),
            });
        }

        let value = match &stmt.value {
            Some(value) => self.evaluate_expr(value)?,
            None => RuntimeValue::nil(),
        };
        self.scope
            .define(stmt.name.as_str(), value.clone().detach_from(&self.scope))?;
        Ok(value)
    }

    fn execute_def(&mut self, stmt: &ast::Def) -> Result<RuntimeValue, EvaluateError> {
        if self.scope.contains(&stmt.name, true) {
            return Err(EvaluateError::AlreadyDefined {
                name: stmt.name.clone(),
            });
        }

        let function = self.closure(stmt, self.scope.clone(), false)?;
        self.scope
            .define(stmt.name.as_str(), function.clone().detach_from(&self.scope))?;
        Ok(function)
    }

    /// Builds a function value for `def`, rejecting repeated parameter names.
    fn closure(
        &self,
        def: &ast::Def,
        captured: Scope<RuntimeValue>,
        is_method: bool,
    ) -> Result<RuntimeValue, EvaluateError> {
        let mut seen = HashSet::new();
        for parameter in &def.parameters {
            if !seen.insert(parameter.name.as_str()) {
                return Err(EvaluateError::DuplicateParameter {
                    function: def.name.clone(),
                    parameter: parameter.name.clone(),
                });
            }
        }

        let closure = Closure {
            def: Rc::new(def.clone()),
            captured: Captured::Shared(captured),
            is_method,
        };
        Ok(FunctionValue::new(def.name.as_str(), closure).into())
    }

    fn call_closure(
        &mut self,
        closure: &Closure,
        this: Option<RuntimeValue>,
        arguments: Vec<RuntimeValue>,
    ) -> Result<RuntimeValue, EvaluateError> {
        let def = &closure.def;
        if arguments.len() != def.parameters.len() {
            return Err(EvaluateError::ArityMismatch {
                name: def.name.clone(),
                expected: def.parameters.len(),
                found: arguments.len(),
            });
        }

        let scope = closure.scope()?.child();
        if let Some(this) = this {
            scope.define("this", this)?;
        }
        for (parameter, argument) in def.parameters.iter().zip(arguments) {
            scope.define(parameter.name.as_str(), argument)?;
        }

        trace!("calling '{}'", def.name);
        self.frames.push(CallFrame {
            name: def.name.clone(),
            returns: def.return_type.clone(),
        });
        let result = self.in_scope(scope, |evaluator| evaluator.execute_block(&def.body));
        self.frames.pop();

        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Next(_) => Ok(RuntimeValue::nil()),
        }
    }

    fn execute_if(&mut self, stmt: &ast::If) -> Result<Flow, EvaluateError> {
        let condition = match self.evaluate_expr(&stmt.condition)? {
            RuntimeValue::Primitive(Primitive::Boolean(condition)) => condition,
            other => {
                return Err(EvaluateError::ExpectedBoolean {
                    found: other.kind_name().into(),
                })
            }
        };

        let body = if condition {
            &stmt.then_body
        } else {
            &stmt.else_body
        };
        self.in_scope(self.scope.child(), |evaluator| evaluator.execute_block(body))
    }

    fn execute_for(&mut self, stmt: &ast::For) -> Result<Flow, EvaluateError> {
        let elements = match self.evaluate_expr(&stmt.iterable)? {
            RuntimeValue::Primitive(Primitive::List(elements)) => elements,
            other => {
                return Err(EvaluateError::NotIterable {
                    found: other.kind_name().into(),
                })
            }
        };

        for element in elements {
            let iteration = self.scope.child();
            iteration.define(stmt.name.as_str(), element)?;
            if let flow @ Flow::Return(_) =
                self.in_scope(iteration, |evaluator| evaluator.execute_block(&stmt.body))?
            {
                return Ok(flow);
            }
        }

        Ok(Flow::Next(RuntimeValue::nil()))
    }

    fn execute_return(&mut self, stmt: &ast::Return) -> Result<Flow, EvaluateError> {
        let (function, returns_nil) = match self.frames.last() {
            Some(frame) => (frame.name.clone(), frame.returns.as_deref() == Some("Nil")),
            None => return Err(EvaluateError::ReturnOutsideFunction),
        };

        match &stmt.value {
            Some(value) => Ok(Flow::Return(self.evaluate_expr(value)?)),
            None if returns_nil => Ok(Flow::Return(RuntimeValue::nil())),
            None => Err(EvaluateError::MissingReturnValue { function }),
        }
    }

    fn execute_assignment(&mut self, stmt: &ast::Assignment) -> Result<RuntimeValue, EvaluateError> {
        match &stmt.target {
            ast::Expr::Variable(variable) => {
                let value = self.evaluate_expr(&stmt.value)?;
                match self.scope.frame_of(&variable.name) {
                    Some(frame) => {
                        frame.set(&variable.name, value.clone().detach_from(&frame));
                    }
                    None => self
                        .scope
                        .define(variable.name.as_str(), value.clone().detach_from(&self.scope))?,
                }
                Ok(value)
            }
            ast::Expr::Property(property) => {
                let object = self.evaluate_object(&property.receiver)?;
                let value = self.evaluate_expr(&stmt.value)?;
                let stored = value.clone().detach_from(&object.scope);
                if object.scope.contains(&property.name, true) {
                    object.scope.set(&property.name, stored);
                } else {
                    object.scope.define(property.name.as_str(), stored)?;
                }
                Ok(value)
            }
            _ => Err(EvaluateError::InvalidAssignmentTarget),
        }
    }

    fn evaluate_object(&mut self, receiver: &ast::Expr) -> Result<ObjectValue, EvaluateError> {
        match self.evaluate_expr(receiver)? {
            RuntimeValue::Object(object) => Ok(object),
            other => Err(EvaluateError::NotAnObject {
                found: other.kind_name().into(),
            }),
        }
    }

    fn evaluate_arguments(
        &mut self,
        arguments: &[ast::Expr],
    ) -> Result<Vec<RuntimeValue>, EvaluateError> {
        arguments
            .iter()
            .map(|argument| self.evaluate_expr(argument))
            .collect()
    }

    fn lookup(&self, name: &str) -> Result<RuntimeValue, EvaluateError> {
        self.scope
            .get(name, false)
            .map(RuntimeValue::attach)
            .ok_or_else(|| EvaluateError::Undefined { name: name.into() })
    }

    fn evaluate_expr(&mut self, expr: &ast::Expr) -> Result<RuntimeValue, EvaluateError> {
        match expr {
            ast::Expr::Literal(literal) => Ok(literal.into()),
            ast::Expr::Group(group) => self.evaluate_expr(&group.inner),
            ast::Expr::Binary(binary) => {
                let left = self.evaluate_expr(&binary.left)?;
                let right = self.evaluate_expr(&binary.right)?;
                apply_binary(binary.op, &left, &right)
            }
            ast::Expr::Variable(variable) => self.lookup(&variable.name),
            ast::Expr::Property(property) => {
                let object = self.evaluate_object(&property.receiver)?;
                member(&object, &property.name)
            }
            ast::Expr::Function(call) => {
                let function = as_function(&call.name, self.lookup(&call.name)?)?;
                let arguments = self.evaluate_arguments(&call.arguments)?;
                function.definition.invoke(self, arguments)
            }
            ast::Expr::Method(call) => {
                let object = self.evaluate_object(&call.receiver)?;
                let function = as_function(&call.name, member(&object, &call.name)?)?;
                let arguments = self.evaluate_arguments(&call.arguments)?;
                function
                    .definition
                    .invoke_method(self, RuntimeValue::Object(object), arguments)
            }
            ast::Expr::Object(object) => self.evaluate_object_expr(object),
        }
    }

    fn evaluate_object_expr(
        &mut self,
        object: &ast::ObjectExpr,
    ) -> Result<RuntimeValue, EvaluateError> {
        let members = self.scope.detached_child();

        // Initializers run inside the member scope so they see earlier fields.
        self.in_scope(members.clone(), |evaluator| {
            for field in &object.fields {
                if members.contains(&field.name, true) {
                    return Err(EvaluateError::DuplicateField {
                        name: field.name.clone(),
                    });
                }
                evaluator.execute_let(field)?;
            }
            Ok(())
        })?;

        for method in &object.methods {
            if members.contains(&method.name, true) {
                return Err(EvaluateError::DuplicateField {
                    name: method.name.clone(),
                });
            }
            let function = self.closure(method, members.clone(), true)?;
            members.define(method.name.as_str(), function.detach_from(&members))?;
        }

        Ok(ObjectValue {
            name: object.name.clone(),
            scope: members,
        }
        .into())
    }
}

/// Reads a member from the object's own frame.
fn member(object: &ObjectValue, name: &str) -> Result<RuntimeValue, EvaluateError> {
    object
        .scope
        .get(name, true)
        .map(RuntimeValue::attach)
        .ok_or_else(|| EvaluateError::UnknownMember { name: name.into() })
}

fn as_function(name: &str, value: RuntimeValue) -> Result<FunctionValue, EvaluateError> {
    match value {
        RuntimeValue::Function(function) => Ok(function),
        other => Err(EvaluateError::NotAFunction {
            name: name.into(),
            found: other.kind_name().into(),
        }),
    }
}

fn apply_binary(
    op: BinaryOp,
    left: &RuntimeValue,
    right: &RuntimeValue,
) -> Result<RuntimeValue, EvaluateError> {
    let mismatch = || EvaluateError::TypeMismatch {
        op: op.to_string(),
        left: left.kind_name().into(),
        right: right.kind_name().into(),
    };

    if op == BinaryOp::Add && (left.is_string() || right.is_string()) {
        return Ok(RuntimeValue::string(format!("{left}{right}")));
    }

    if op.is_arithmetic() {
        return match (left.as_primitive(), right.as_primitive()) {
            (Some(Primitive::Integer(a)), Some(Primitive::Integer(b))) => {
                Ok(RuntimeValue::integer(integer_arithmetic(op, a, b)?))
            }
            (Some(Primitive::Decimal(a)), Some(Primitive::Decimal(b))) => {
                Ok(RuntimeValue::decimal(decimal_arithmetic(op, a, b)?))
            }
            _ => Err(mismatch()),
        };
    }

    if op.is_equality() {
        let equal = values_equal(left, right).ok_or_else(mismatch)?;
        return Ok(RuntimeValue::boolean(equal == (op == BinaryOp::Equal)));
    }

    if op.is_comparison() {
        let ordering = compare_values(left, right).ok_or_else(mismatch)?;
        let result = match op {
            BinaryOp::Less => ordering == Ordering::Less,
            BinaryOp::LessEqual => ordering != Ordering::Greater,
            BinaryOp::Greater => ordering == Ordering::Greater,
            _ => ordering != Ordering::Less,
        };
        return Ok(RuntimeValue::boolean(result));
    }

    // Both operands have already been evaluated: AND and OR do not
    // short-circuit.
    match (left.as_primitive(), right.as_primitive()) {
        (Some(Primitive::Boolean(a)), Some(Primitive::Boolean(b))) => Ok(RuntimeValue::boolean(
            if op == BinaryOp::And { *a && *b } else { *a || *b },
        )),
        _ => Err(mismatch()),
    }
}

fn integer_arithmetic(op: BinaryOp, a: &BigInt, b: &BigInt) -> Result<BigInt, EvaluateError> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        _ => {
            if b.sign() == Sign::NoSign {
                return Err(EvaluateError::DivisionByZero);
            }
            a / b
        }
    })
}

fn decimal_arithmetic(
    op: BinaryOp,
    a: &BigDecimal,
    b: &BigDecimal,
) -> Result<BigDecimal, EvaluateError> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        _ => {
            if b.sign() == Sign::NoSign {
                return Err(EvaluateError::DivisionByZero);
            }
            divide_decimal(a, b)?
        }
    })
}

/// `a / b` at `a`'s scale, rounding half to even. The division is done on
/// the unscaled integers so every digit up to the rounding one is exact.
fn divide_decimal(a: &BigDecimal, b: &BigDecimal) -> Result<BigDecimal, EvaluateError> {
    let (a_digits, scale) = a.as_bigint_and_exponent();
    let (b_digits, b_scale) = b.as_bigint_and_exponent();

    // At `scale`, the quotient's unscaled value is a_digits * 10^b_scale / b_digits.
    let shift = power_of_ten(b_scale.unsigned_abs())?;
    let (numerator, denominator) = if b_scale >= 0 {
        (a_digits * shift, b_digits)
    } else {
        (a_digits, b_digits * shift)
    };

    let mut quotient = &numerator / &denominator;
    let remainder = &numerator % &denominator;
    let round_away = match (remainder.magnitude() * 2u32).cmp(denominator.magnitude()) {
        Ordering::Greater => true,
        Ordering::Equal => (&quotient % 2u32).sign() != Sign::NoSign,
        Ordering::Less => false,
    };
    if round_away {
        if (numerator.sign() == Sign::Minus) == (denominator.sign() == Sign::Minus) {
            quotient += BigInt::from(1);
        } else {
            quotient -= BigInt::from(1);
        }
    }
    Ok(BigDecimal::new(quotient, scale))
}

fn power_of_ten(exponent: u64) -> Result<BigInt, EvaluateError> {
    let exponent = u32::try_from(exponent).map_err(|_| EvaluateError::ScaleOutOfRange)?;
    Ok(BigInt::from(10).pow(exponent))
}

/// `None` when the two values cannot be compared for equality at all.
fn values_equal(left: &RuntimeValue, right: &RuntimeValue) -> Option<bool> {
    match (left, right) {
        (RuntimeValue::Primitive(Primitive::Nil), RuntimeValue::Primitive(Primitive::Nil)) => {
            Some(true)
        }
        (RuntimeValue::Primitive(Primitive::Nil), _)
        | (_, RuntimeValue::Primitive(Primitive::Nil)) => Some(false),
        (RuntimeValue::Primitive(a), RuntimeValue::Primitive(b))
            if a.kind_name() == b.kind_name() =>
        {
            Some(a == b)
        }
        (RuntimeValue::Object(a), RuntimeValue::Object(b)) => Some(a.scope.ptr_eq(&b.scope)),
        (RuntimeValue::Function(_), RuntimeValue::Function(_)) => Some(false),
        _ => None,
    }
}

fn compare_values(left: &RuntimeValue, right: &RuntimeValue) -> Option<Ordering> {
    match (left.as_primitive()?, right.as_primitive()?) {
        (Primitive::Integer(a), Primitive::Integer(b)) => Some(a.cmp(b)),
        (Primitive::Decimal(a), Primitive::Decimal(b)) => Some(a.cmp(b)),
        (Primitive::String(a), Primitive::String(b)) => Some(a.cmp(b)),
        (Primitive::Character(a), Primitive::Character(b)) => Some(a.cmp(b)),
        (Primitive::Boolean(a), Primitive::Boolean(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

pub fn evaluate(
    source: &ast::Source,
    scope: Scope<RuntimeValue>,
) -> Result<RuntimeValue, EvaluateError> {
    Evaluator::new(scope).evaluate_source(source)
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, str::FromStr};

    use super::*;
    use crate::{lexer::lex, parser::parse_source};

    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone)]
    struct Print;

    impl Callable for Print {
        fn invoke(
            &self,
            evaluator: &mut Evaluator,
            arguments: Vec<RuntimeValue>,
        ) -> Result<RuntimeValue, EvaluateError> {
            for argument in &arguments {
                evaluator.write_line(&argument.to_string())?;
            }
            Ok(RuntimeValue::nil())
        }
    }

    #[derive(Clone)]
    struct List;

    impl Callable for List {
        fn invoke(
            &self,
            _evaluator: &mut Evaluator,
            arguments: Vec<RuntimeValue>,
        ) -> Result<RuntimeValue, EvaluateError> {
            Ok(RuntimeValue::list(arguments))
        }
    }

    fn test_scope() -> Scope<RuntimeValue> {
        let scope = Scope::new();
        scope
            .define("print", FunctionValue::new("print", Print).into())
            .unwrap();
        scope
            .define("list", FunctionValue::new("list", List).into())
            .unwrap();
        scope
    }

    fn source(input: &str) -> ast::Source {
        parse_source(&lex(input).expect("lexes")).expect("parses")
    }

    fn run(input: &str) -> Result<RuntimeValue, EvaluateError> {
        evaluate(&source(input), test_scope())
    }

    fn run_with_output(input: &str) -> (Result<RuntimeValue, EvaluateError>, String) {
        let buffer = SharedBuffer::default();
        let mut evaluator = Evaluator::with_output(test_scope(), Box::new(buffer.clone()));
        let result = evaluator.evaluate_source(&source(input));
        let output = String::from_utf8(buffer.0.borrow().clone()).unwrap();
        (result, output)
    }

    fn decimal(text: &str) -> RuntimeValue {
        RuntimeValue::decimal(BigDecimal::from_str(text).unwrap())
    }

    #[test]
    fn let_binds_values() {
        assert_eq!(run("LET x = 5;"), Ok(RuntimeValue::integer(5)));
        assert_eq!(run("LET x; x;"), Ok(RuntimeValue::nil()));
        assert_eq!(
            run("LET x = 1; LET x = 2;"),
            Err(EvaluateError::AlreadyDefined { name: "x".into() })
        );
        assert_eq!(
            run("y;"),
            Err(EvaluateError::Undefined { name: "y".into() })
        );
    }

    #[test]
    fn for_loops_restore_scope() {
        let (result, output) =
            run_with_output("LET i = 10; FOR i IN list(1, 2, 3) DO print(i); END i;");
        assert_eq!(result, Ok(RuntimeValue::integer(10)));
        assert_eq!(output, "1\n2\n3\n");

        assert_eq!(
            run("FOR i IN 5 DO END"),
            Err(EvaluateError::NotIterable {
                found: "Integer".into()
            })
        );
    }

    #[test]
    fn if_requires_boolean() {
        assert_eq!(
            run("LET r = 0; IF 1 < 2 DO r = 1; ELSE r = 2; END r;"),
            Ok(RuntimeValue::integer(1))
        );
        assert_eq!(
            run("IF FALSE DO 1; ELSE 2; END"),
            Ok(RuntimeValue::integer(2))
        );
        assert_eq!(
            run("IF 1 DO END"),
            Err(EvaluateError::ExpectedBoolean {
                found: "Integer".into()
            })
        );
        assert!(matches!(
            run("IF TRUE DO LET a = 1; END a;"),
            Err(EvaluateError::Undefined { .. })
        ));
    }

    #[test]
    fn functions_and_returns() {
        assert_eq!(
            run("DEF add(a, b) DO RETURN a + b; END add(2, 3);"),
            Ok(RuntimeValue::integer(5))
        );
        assert_eq!(run("DEF f() DO 1; END f();"), Ok(RuntimeValue::nil()));
        assert_eq!(
            run("DEF f(n) DO FOR i IN list(1, 2) DO IF i == n DO RETURN i; END END RETURN 0; END f(2);"),
            Ok(RuntimeValue::integer(2))
        );
        assert_eq!(
            run("DEF fact(n) DO IF n <= 1 DO RETURN 1; END RETURN n * fact(n - 1); END fact(20);"),
            Ok(RuntimeValue::integer(2_432_902_008_176_640_000_i64))
        );
        assert_eq!(
            run("DEF f(a) DO END f();"),
            Err(EvaluateError::ArityMismatch {
                name: "f".into(),
                expected: 1,
                found: 0,
            })
        );
        assert_eq!(
            run("DEF f(a, a) DO END"),
            Err(EvaluateError::DuplicateParameter {
                function: "f".into(),
                parameter: "a".into(),
            })
        );
        assert!(matches!(
            run("LET x = 1; x();"),
            Err(EvaluateError::NotAFunction { .. })
        ));
    }

    #[test]
    fn bare_returns() {
        assert_eq!(run("RETURN 1;"), Err(EvaluateError::ReturnOutsideFunction));
        assert_eq!(
            run("IF TRUE DO RETURN 1; END"),
            Err(EvaluateError::ReturnOutsideFunction)
        );
        assert_eq!(run("DEF f(): Nil DO RETURN; END f();"), Ok(RuntimeValue::nil()));
        assert_eq!(
            run("DEF f() DO RETURN; END f();"),
            Err(EvaluateError::MissingReturnValue {
                function: "f".into()
            })
        );
    }

    #[test]
    fn closures_capture_defining_scope() {
        assert_eq!(
            run("LET count = 0; DEF bump() DO count = count + 1; END bump(); bump(); count;"),
            Ok(RuntimeValue::integer(2))
        );
        assert_eq!(
            run("DEF outer() DO LET x = 7; DEF inner() DO RETURN x; END RETURN inner; END \
                 LET f = outer(); f();"),
            Ok(RuntimeValue::integer(7))
        );
    }

    #[test]
    fn assignment_defines_when_unbound() {
        assert_eq!(run("z = 3; z;"), Ok(RuntimeValue::integer(3)));
        assert_eq!(
            run("LET x = 1; IF TRUE DO x = 2; END x;"),
            Ok(RuntimeValue::integer(2))
        );
    }

    #[test]
    fn errors_restore_scope() {
        let mut evaluator = Evaluator::with_output(test_scope(), Box::new(io::sink()));
        let root = evaluator.scope().clone();

        let result =
            evaluator.evaluate_source(&source("DEF f() DO LET a = 1; RETURN missing; END f();"));
        assert!(result.is_err());
        assert!(evaluator.scope().ptr_eq(&root));

        let result = evaluator.evaluate_source(&source("FOR i IN list(1) DO 1 / 0; END"));
        assert_eq!(result, Err(EvaluateError::DivisionByZero));
        assert!(evaluator.scope().ptr_eq(&root));
        assert!(!root.contains("a", false));
        assert!(!root.contains("i", false));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run("7 / 2;"), Ok(RuntimeValue::integer(3)));
        assert_eq!(run("-7 / 2;"), Ok(RuntimeValue::integer(-3)));
        assert_eq!(run("1.0 / 3.0;"), Ok(decimal("0.3")));
        assert_eq!(run("2.5 / 2.0;"), Ok(decimal("1.2")));
        assert_eq!(run("3.5 / 2.0;"), Ok(decimal("1.8")));
        assert_eq!(run("1.5 + 2.25;"), Ok(decimal("3.75")));
        assert_eq!(run("1.0 / 0.0;"), Err(EvaluateError::DivisionByZero));
        assert_eq!(
            run("1 + 1.0;"),
            Err(EvaluateError::TypeMismatch {
                op: "+".into(),
                left: "Integer".into(),
                right: "Decimal".into(),
            })
        );
        assert_eq!(
            run("99999999999999999999 + 1;"),
            Ok(RuntimeValue::integer(
                BigInt::from_str("100000000000000000000").unwrap()
            ))
        );
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(run("\"a\" + 1;"), Ok(RuntimeValue::string("a1")));
        assert_eq!(run("NIL + \"b\";"), Ok(RuntimeValue::string("NILb")));
        assert_eq!(run("\"x\" + TRUE;"), Ok(RuntimeValue::string("xTRUE")));
    }

    #[test]
    fn comparison_and_equality() {
        assert_eq!(run("1 < 2;"), Ok(RuntimeValue::boolean(true)));
        assert_eq!(run("2.0 >= 2.00;"), Ok(RuntimeValue::boolean(true)));
        assert_eq!(run("\"a\" > \"b\";"), Ok(RuntimeValue::boolean(false)));
        assert_eq!(run("'a' < 'b';"), Ok(RuntimeValue::boolean(true)));
        assert_eq!(run("1 == 1;"), Ok(RuntimeValue::boolean(true)));
        assert_eq!(run("1 != 2;"), Ok(RuntimeValue::boolean(true)));
        assert_eq!(run("NIL == NIL;"), Ok(RuntimeValue::boolean(true)));
        assert_eq!(run("NIL == 1;"), Ok(RuntimeValue::boolean(false)));
        assert!(matches!(
            run("1 == \"1\";"),
            Err(EvaluateError::TypeMismatch { .. })
        ));
        assert!(matches!(
            run("1 < 1.0;"),
            Err(EvaluateError::TypeMismatch { .. })
        ));
        assert_eq!(
            run("DEF f() DO END f == f;"),
            Ok(RuntimeValue::boolean(false))
        );
    }

    #[test]
    fn logical_operators_are_eager() {
        let (result, output) = run_with_output("FALSE AND print(1) == NIL;");
        assert_eq!(result, Ok(RuntimeValue::boolean(false)));
        assert_eq!(output, "1\n");

        assert_eq!(run("TRUE OR FALSE;"), Ok(RuntimeValue::boolean(true)));
        assert!(matches!(
            run("TRUE AND 1;"),
            Err(EvaluateError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn objects() {
        assert_eq!(
            run("LET o = OBJECT DO LET x = 1; LET y = x + 1; END; o.y;"),
            Ok(RuntimeValue::integer(2))
        );
        assert_eq!(
            run("LET o = OBJECT DO LET x = 1; DEF get() DO RETURN this.x; END END; o.x = 5; o.get();"),
            Ok(RuntimeValue::integer(5))
        );
        assert_eq!(
            run("LET o = OBJECT DO LET x = 1; DEF add(n) DO RETURN x + n; END END; o.add(2);"),
            Ok(RuntimeValue::integer(3))
        );
        assert_eq!(
            run("LET o = OBJECT DO END; o.fresh = 4; o.fresh;"),
            Ok(RuntimeValue::integer(4))
        );
        assert_eq!(
            run("LET x = 1; LET o = OBJECT DO END; o.x = 9; x;"),
            Ok(RuntimeValue::integer(1))
        );
        assert_eq!(
            run("LET x = 1; LET o = OBJECT DO END; o.x;"),
            Err(EvaluateError::UnknownMember { name: "x".into() })
        );
        assert_eq!(
            run("OBJECT DO LET x = 1; LET x = 2; END;"),
            Err(EvaluateError::DuplicateField { name: "x".into() })
        );
        assert_eq!(
            run("OBJECT DO DEF m() DO END DEF m() DO END END;"),
            Err(EvaluateError::DuplicateField { name: "m".into() })
        );
        assert!(matches!(
            run("LET n = 1; n.m();"),
            Err(EvaluateError::NotAnObject { .. })
        ));
        assert_eq!(
            run("LET a = OBJECT DO END; LET b = a; a == b;"),
            Ok(RuntimeValue::boolean(true))
        );
        assert_eq!(
            run("OBJECT DO END == OBJECT DO END;"),
            Ok(RuntimeValue::boolean(false))
        );
    }

    #[test]
    fn methods_need_a_receiver() {
        assert_eq!(
            run("LET o = OBJECT DO LET x = 1; DEF get() DO RETURN this.x; END END; \
                 LET m = o.get; m();"),
            Err(EvaluateError::UnboundMethod { name: "get".into() })
        );
        assert_eq!(
            run("LET o = OBJECT DO DEF get() DO RETURN this; END END; LET m = o.get; m(o);"),
            Err(EvaluateError::UnboundMethod { name: "get".into() })
        );
        assert_eq!(
            run("DEF first(a, b) DO RETURN b; END \
                 LET o = OBJECT DO END; o.f = first; o.f(2);"),
            Ok(RuntimeValue::integer(2))
        );
    }

    #[test]
    fn decimal_division_is_exact_to_the_last_digit() {
        let zeros = "0".repeat(300);
        assert_eq!(
            run(&format!("1.{zeros} / 3.0;")),
            Ok(decimal(&format!("0.{}", "3".repeat(300))))
        );
        assert_eq!(
            run(&format!("2.{zeros} / 3.0;")),
            Ok(decimal(&format!("0.{}7", "6".repeat(299))))
        );
        assert_eq!(run("-2.5 / 2.0;"), Ok(decimal("-1.2")));
        assert_eq!(run("-3.5 / 2.0;"), Ok(decimal("-1.8")));
        assert_eq!(run("1.00 / 8.0;"), Ok(decimal("0.12")));
        assert_eq!(run("1.0 / 0.3e1;"), Ok(decimal("0.3")));
    }

    #[derive(Clone)]
    struct Marker(Rc<()>);

    impl Callable for Marker {
        fn invoke(
            &self,
            _evaluator: &mut Evaluator,
            _arguments: Vec<RuntimeValue>,
        ) -> Result<RuntimeValue, EvaluateError> {
            Ok(RuntimeValue::nil())
        }
    }

    #[test]
    fn finished_frames_are_released() {
        let marker = Rc::new(());
        let scope = test_scope();
        scope
            .define("marker", FunctionValue::new("marker", Marker(Rc::clone(&marker))).into())
            .unwrap();

        let result = evaluate(
            &source(
                "DEF outer() DO
                     LET m = marker;
                     DEF inner() DO RETURN m; END
                 END
                 outer();
                 outer();
                 FOR i IN list(1, 2) DO
                     LET o = OBJECT DO
                         LET m = marker;
                         LET nested = OBJECT DO LET n = m; END;
                         DEF get() DO RETURN this.m; END
                     END;
                     o.get();
                 END
                 LET kept = OBJECT DO LET m = marker; DEF get() DO RETURN m; END END;
                 kept.get();",
            ),
            scope,
        );
        assert!(result.is_ok());
        assert!(Rc::strong_count(&marker) > 1);

        drop(result);
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn escaping_values_keep_their_scopes() {
        assert_eq!(
            run("DEF make(n) DO
                     RETURN OBJECT DO
                         LET own = n;
                         DEF get() DO RETURN own + n; END
                     END;
                 END
                 LET a = make(1);
                 LET b = make(10);
                 a.get() + b.get();"),
            Ok(RuntimeValue::integer(22))
        );
        assert_eq!(
            run("DEF outer() DO
                     LET x = 3;
                     DEF inner() DO RETURN x; END
                     RETURN list(inner);
                 END
                 FOR f IN outer() DO LET g = f; END
                 LET fs = outer();
                 FOR f IN fs DO f(); END"),
            Ok(RuntimeValue::nil())
        );
    }
}
