use std::rc::Rc;
use std::time::Instant;

use crate::ast::{
    DeclarationKind, Expression, ExpressionKind, FunctionBody, FunctionDef, LogicalOperator,
    LoopBinding, MemberProperty, Program, Statement, StatementKind, TemplateElement,
    UnaryOperator, UpdateOperator,
};
use crate::config::InterpreterOptions;
use crate::stack::ensure_sufficient_stack;
use crate::token::Span;

use super::builtins;
use super::environment::Environment;
use super::error::{ErrorInfo, Exception, RuntimeError};
use super::operators;
use super::snapshot::{
    ConsoleOutput, ExecutionState, SourceLocation, StackFrame, VariableScope, capture_arguments,
    capture_value, capture_variables,
};
use super::value::{Closure, PropertyMap, Value, format_number};

/// Control-flow marker for statement execution.
pub(super) enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub(super) type ExecResult<T> = Result<T, Exception>;

/// A function invocation that has not returned yet.
struct ActiveFrame {
    call_id: u64,
    function_name: String,
    arguments: Vec<(String, Value)>,
    /// Scope created for this invocation.
    function_env: Environment,
    /// Scope of the caller at the call site.
    caller_env: Environment,
    call_site: Span,
    return_value: Option<Value>,
}

/// Assignable place resolved from an expression.
enum Reference {
    Binding(String),
    Property { object: Value, key: String },
}

/// State of one run: scopes, live call stack, console log and snapshots.
pub(super) struct InterpreterRuntime {
    options: InterpreterOptions,
    global_env: Environment,
    frames: Vec<ActiveFrame>,
    pub(super) output: Rc<Vec<ConsoleOutput>>,
    snapshots: Vec<ExecutionState>,
    /// Statement currently executing; reported as the snapshot position.
    location: Span,
    next_call_id: u64,
    started: Instant,
}

impl InterpreterRuntime {
    pub(super) fn new(options: InterpreterOptions) -> Self {
        let intrinsics = Environment::new();
        builtins::install(&intrinsics);
        Self {
            options,
            global_env: Environment::new_global(&intrinsics),
            frames: Vec::new(),
            output: Rc::new(Vec::new()),
            snapshots: Vec::new(),
            location: Span::default(),
            next_call_id: 0,
            started: Instant::now(),
        }
    }

    /// Executes `program` and returns every snapshot taken. Runtime errors end
    /// the run and are recorded on one final snapshot.
    pub(super) fn run(mut self, program: &Program) -> Vec<ExecutionState> {
        let global = self.global_env.clone();
        let outcome = self
            .capture_snapshot(&global)
            .and_then(|()| self.exec_program(&program.body, &global));

        if let Err(exception) = outcome {
            tracing::debug!(
                error = %exception.error,
                line = exception.span.line,
                "run stopped by uncaught error"
            );
            self.frames.clear();
            self.location = exception.span;
            let info = exception.to_error_info();
            self.push_snapshot(&global, Some(info));
        }
        tracing::debug!(snapshots = self.snapshots.len(), "run finished");
        self.snapshots
    }

    pub(super) fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn exec_program(&mut self, body: &[Statement], env: &Environment) -> ExecResult<()> {
        match self.exec_block(body, env)? {
            Completion::Normal => Ok(()),
            Completion::Return(_) => Err(self.raise(RuntimeError::ReturnOutsideFunction)),
            Completion::Break => Err(self.raise(RuntimeError::IllegalControlFlow {
                statement: "break",
            })),
            Completion::Continue => Err(self.raise(RuntimeError::IllegalControlFlow {
                statement: "continue",
            })),
        }
    }

    // Snapshots

    /// Records the current state, failing once the step ceiling is reached.
    fn capture_snapshot(&mut self, env: &Environment) -> ExecResult<()> {
        if self.snapshots.len() >= self.options.max_steps {
            tracing::debug!(limit = self.options.max_steps, "step ceiling reached");
            return Err(self.raise(RuntimeError::StepLimitExceeded {
                limit: self.options.max_steps,
            }));
        }
        self.push_snapshot(env, None);
        Ok(())
    }

    fn push_snapshot(&mut self, env: &Environment, error_state: Option<ErrorInfo>) {
        let previous = self.snapshots.last();

        // The scope each stack level is currently executing in: a frame's
        // caller scope belongs to the level below it.
        let global_level = self.frames.first().map_or(env, |frame| &frame.caller_env);
        let global_variables = capture_variables(
            &global_level.visible_bindings(&self.global_env),
            previous.map(|state| &state.global_variables),
            VariableScope::Global,
        );

        let call_stack = self
            .frames
            .iter()
            .enumerate()
            .map(|(index, frame)| {
                let active = self
                    .frames
                    .get(index + 1)
                    .map_or(env, |next| &next.caller_env);
                let previous_frame = previous
                    .and_then(|state| state.call_stack.get(index))
                    .filter(|before| before.call_id == frame.call_id);
                StackFrame {
                    call_id: frame.call_id,
                    function_name: frame.function_name.clone(),
                    arguments: capture_arguments(
                        &frame.arguments,
                        previous_frame.map(|before| before.arguments.as_slice()),
                    ),
                    local_variables: capture_variables(
                        &active.visible_bindings(&frame.function_env),
                        previous_frame.map(|before| &before.local_variables),
                        VariableScope::Local,
                    ),
                    return_value: frame.return_value.as_ref().map(capture_value),
                    source_location: SourceLocation {
                        line: frame.call_site.line,
                        column: frame.call_site.column,
                    },
                }
            })
            .collect();

        let state = ExecutionState {
            step: self.snapshots.len(),
            current_line: self.location.line,
            current_column: self.location.column,
            call_stack,
            output: Rc::clone(&self.output),
            error_state,
            global_variables,
        };
        self.snapshots.push(state);
    }

    // Errors

    fn raise(&self, error: RuntimeError) -> Exception {
        self.raise_at(error, self.location)
    }

    pub(super) fn raise_at(&self, error: RuntimeError, span: Span) -> Exception {
        let stack = self
            .frames
            .iter()
            .rev()
            .map(|frame| format!("{} (line {})", frame.function_name, frame.call_site.line))
            .collect();
        Exception { error, span, stack }
    }

    // Statements

    /// Runs `statements` in `env`, after binding their function declarations.
    fn exec_block(
        &mut self,
        statements: &[Statement],
        env: &Environment,
    ) -> ExecResult<Completion> {
        self.hoist_functions(statements, env);
        for statement in statements {
            match self.exec_statement(statement, env)? {
                Completion::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_scoped(
        &mut self,
        statements: &[Statement],
        env: &Environment,
    ) -> ExecResult<Completion> {
        let scope = Environment::new_enclosed(env);
        self.exec_block(statements, &scope)
    }

    fn hoist_functions(&mut self, statements: &[Statement], env: &Environment) {
        for statement in statements {
            if let StatementKind::FunctionDeclaration(def) = &statement.kind {
                self.declare_function(def, env);
            }
        }
    }

    fn declare_function(&mut self, def: &Rc<FunctionDef>, env: &Environment) {
        let closure = Closure {
            name: def.display_name().to_string(),
            def: Rc::clone(def),
            env: env.clone(),
        };
        env.define(def.display_name(), Value::Function(Rc::new(closure)));
    }

    fn exec_statement(
        &mut self,
        statement: &Statement,
        env: &Environment,
    ) -> ExecResult<Completion> {
        ensure_sufficient_stack(|| self.exec_statement_inner(statement, env))
    }

    fn exec_statement_inner(
        &mut self,
        statement: &Statement,
        env: &Environment,
    ) -> ExecResult<Completion> {
        self.location = statement.span;
        match &statement.kind {
            StatementKind::VariableDeclaration { kind, declarations } => {
                for declarator in declarations {
                    if *kind == DeclarationKind::Var
                        && declarator.init.is_none()
                        && env.lookup(&declarator.name).is_some()
                    {
                        continue;
                    }
                    let value = match &declarator.init {
                        Some(init) => self.eval_named(init, env, &declarator.name)?,
                        None => Value::Undefined,
                    };
                    match kind {
                        DeclarationKind::Let => env.define(&declarator.name, value),
                        DeclarationKind::Const => env.define_constant(&declarator.name, value),
                        DeclarationKind::Var => env.define_var(&declarator.name, value),
                    }
                }
                self.capture_snapshot(env)?;
                Ok(Completion::Normal)
            }
            StatementKind::FunctionDeclaration(def) => {
                if !env.has_own(def.display_name()) {
                    self.declare_function(def, env);
                }
                self.capture_snapshot(env)?;
                Ok(Completion::Normal)
            }
            StatementKind::Expression(expression) => {
                self.eval_expression(expression, env)?;
                self.capture_snapshot(env)?;
                Ok(Completion::Normal)
            }
            StatementKind::Block(body) => self.exec_scoped(body, env),
            StatementKind::If {
                condition,
                consequent,
                alternate,
            } => {
                let test = self.eval_expression(condition, env)?;
                self.capture_snapshot(env)?;
                if test.is_truthy() {
                    self.exec_statement(consequent, env)
                } else if let Some(alternate) = alternate {
                    self.exec_statement(alternate, env)
                } else {
                    Ok(Completion::Normal)
                }
            }
            StatementKind::While { condition, body } => {
                loop {
                    if !self.loop_test(statement.span, Some(condition), env)? {
                        break;
                    }
                    match self.exec_statement(body, env)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal)
            }
            StatementKind::DoWhile { body, condition } => {
                loop {
                    match self.exec_statement(body, env)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if !self.loop_test(statement.span, Some(condition), env)? {
                        break;
                    }
                }
                Ok(Completion::Normal)
            }
            StatementKind::For {
                init,
                test,
                update,
                body,
            } => self.exec_for(
                statement.span,
                init.as_deref(),
                test.as_ref(),
                update.as_ref(),
                body,
                env,
            ),
            StatementKind::ForOf {
                binding,
                iterable,
                body,
            } => {
                let iterable_value = self.eval_expression(iterable, env)?;
                let items: Vec<Value> = match &iterable_value {
                    Value::Array(_) => Vec::new(),
                    Value::String(text) => text
                        .chars()
                        .map(|c| Value::string(c.to_string()))
                        .collect(),
                    other => {
                        return Err(self.raise_at(
                            RuntimeError::NotIterable {
                                value: other.describe(),
                            },
                            iterable.span,
                        ));
                    }
                };
                // Arrays are read live so elements pushed by the body are visited.
                let next_item = |index: usize| match &iterable_value {
                    Value::Array(array) => array.borrow().get(index).cloned(),
                    _ => items.get(index).cloned(),
                };
                self.exec_iteration(statement.span, binding, next_item, body, env)
            }
            StatementKind::ForIn {
                binding,
                object,
                body,
            } => {
                let target = self.eval_expression(object, env)?;
                let keys = builtins::enumerable_keys(&target);
                let next_key =
                    |index: usize| keys.get(index).map(|key| Value::string(key.as_str()));
                self.exec_iteration(statement.span, binding, next_key, body, env)
            }
            StatementKind::Break => Ok(Completion::Break),
            StatementKind::Continue => Ok(Completion::Continue),
            StatementKind::Return(argument) => {
                let value = match argument {
                    Some(argument) => self.eval_expression(argument, env)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            StatementKind::Throw(argument) => {
                let value = self.eval_expression(argument, env)?;
                Err(self.raise_at(RuntimeError::thrown(value), statement.span))
            }
            StatementKind::Try {
                block,
                handler,
                finalizer,
            } => {
                let outcome = self.exec_scoped(block, env);
                let outcome = match (outcome, handler) {
                    (Err(exception), Some(handler)) if exception.error.is_catchable() => {
                        tracing::trace!(error = %exception.error, "exception caught");
                        let scope = Environment::new_enclosed(env);
                        if let Some(param) = &handler.param {
                            scope.define(param, exception.error.to_value());
                        }
                        self.exec_block(&handler.body, &scope)
                    }
                    (outcome, _) => outcome,
                };
                let Some(finalizer) = finalizer else {
                    return outcome;
                };
                if let Err(exception) = &outcome
                    && !exception.error.is_catchable()
                {
                    return outcome;
                }
                match self.exec_scoped(finalizer, env)? {
                    Completion::Normal => outcome,
                    abrupt => Ok(abrupt),
                }
            }
            StatementKind::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval_expression(discriminant, env)?;
                let scope = Environment::new_enclosed(env);
                let mut start = None;
                for (index, case) in cases.iter().enumerate() {
                    if let Some(test) = &case.test {
                        let candidate = self.eval_expression(test, &scope)?;
                        if operators::strict_equals(&value, &candidate) {
                            start = Some(index);
                            break;
                        }
                    }
                }
                let Some(start) =
                    start.or_else(|| cases.iter().position(|case| case.test.is_none()))
                else {
                    return Ok(Completion::Normal);
                };
                for case in cases {
                    self.hoist_functions(&case.body, &scope);
                }
                for case in &cases[start..] {
                    for statement in &case.body {
                        match self.exec_statement(statement, &scope)? {
                            Completion::Normal => {}
                            Completion::Break => return Ok(Completion::Normal),
                            abrupt => return Ok(abrupt),
                        }
                    }
                }
                Ok(Completion::Normal)
            }
            StatementKind::Empty => Ok(Completion::Normal),
        }
    }

    /// Evaluates a loop test (absent tests pass) and records the loop snapshot.
    fn loop_test(
        &mut self,
        span: Span,
        condition: Option<&Expression>,
        env: &Environment,
    ) -> ExecResult<bool> {
        self.location = span;
        let proceed = match condition {
            Some(condition) => self.eval_expression(condition, env)?.is_truthy(),
            None => true,
        };
        self.location = span;
        self.capture_snapshot(env)?;
        Ok(proceed)
    }

    fn exec_for(
        &mut self,
        span: Span,
        init: Option<&Statement>,
        test: Option<&Expression>,
        update: Option<&Expression>,
        body: &Statement,
        env: &Environment,
    ) -> ExecResult<Completion> {
        let mut iteration_env = Environment::new_enclosed(env);
        if let Some(init) = init {
            self.exec_statement(init, &iteration_env)?;
        }
        loop {
            if !self.loop_test(span, test, &iteration_env)? {
                break;
            }
            match self.exec_statement(body, &iteration_env)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
            iteration_env = iteration_env.fork();
            if let Some(update) = update {
                self.location = span;
                self.eval_expression(update, &iteration_env)?;
            }
        }
        Ok(Completion::Normal)
    }

    /// Shared driver for `for ... of` and `for ... in`: binds each produced
    /// value in a fresh scope, with one snapshot per iteration plus one when
    /// the sequence is exhausted.
    fn exec_iteration(
        &mut self,
        span: Span,
        binding: &LoopBinding,
        next: impl Fn(usize) -> Option<Value>,
        body: &Statement,
        env: &Environment,
    ) -> ExecResult<Completion> {
        let mut index = 0;
        loop {
            self.location = span;
            let iteration_env = Environment::new_enclosed(env);
            let item = next(index);
            if let Some(item) = &item {
                self.bind_loop_variable(binding, item.clone(), &iteration_env, span)?;
            }
            self.capture_snapshot(&iteration_env)?;
            if item.is_none() {
                break;
            }
            match self.exec_statement(body, &iteration_env)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
            index += 1;
        }
        Ok(Completion::Normal)
    }

    fn bind_loop_variable(
        &mut self,
        binding: &LoopBinding,
        value: Value,
        env: &Environment,
        span: Span,
    ) -> ExecResult<()> {
        match binding.kind {
            Some(DeclarationKind::Let) => env.define(&binding.name, value),
            Some(DeclarationKind::Const) => env.define_constant(&binding.name, value),
            Some(DeclarationKind::Var) => env.define_var(&binding.name, value),
            None => env
                .assign(&binding.name, value)
                .map_err(|error| self.raise_at(error, span))?,
        }
        Ok(())
    }

    // Expressions

    fn eval_expression(&mut self, expression: &Expression, env: &Environment) -> ExecResult<Value> {
        ensure_sufficient_stack(|| self.eval_expression_inner(expression, env))
    }

    /// Evaluates `expression`, naming it after `name` if it is an anonymous function.
    fn eval_named(
        &mut self,
        expression: &Expression,
        env: &Environment,
        name: &str,
    ) -> ExecResult<Value> {
        if let ExpressionKind::Function(def) = &expression.kind
            && def.name.is_none()
        {
            return Ok(self.make_closure(def, env, name));
        }
        self.eval_expression(expression, env)
    }

    fn make_closure(&self, def: &Rc<FunctionDef>, env: &Environment, name: &str) -> Value {
        Value::Function(Rc::new(Closure {
            name: name.to_string(),
            def: Rc::clone(def),
            env: env.clone(),
        }))
    }

    fn eval_expression_inner(
        &mut self,
        expression: &Expression,
        env: &Environment,
    ) -> ExecResult<Value> {
        let span = expression.span;
        match &expression.kind {
            ExpressionKind::Number(value) => Ok(Value::Number(*value)),
            ExpressionKind::String(value) => Ok(Value::string(value.as_str())),
            ExpressionKind::Boolean(value) => Ok(Value::Boolean(*value)),
            ExpressionKind::Null => Ok(Value::Null),
            ExpressionKind::Undefined => Ok(Value::Undefined),
            ExpressionKind::Template(elements) => {
                let mut text = String::new();
                for element in elements {
                    match element {
                        TemplateElement::Text(part) => text.push_str(part),
                        TemplateElement::Interpolation(inner) => {
                            text.push_str(&self.eval_expression(inner, env)?.to_display_string());
                        }
                    }
                }
                Ok(Value::string(text))
            }
            ExpressionKind::Identifier(name) => {
                env.get(name).map_err(|error| self.raise_at(error, span))
            }
            ExpressionKind::This => Ok(env.this_value()),
            ExpressionKind::Array(elements) => {
                let values = self.eval_list(elements, env)?;
                Ok(Value::array(values))
            }
            ExpressionKind::Object(properties) => {
                let mut map = PropertyMap::default();
                for property in properties {
                    let value = self.eval_named(&property.value, env, &property.key)?;
                    map.insert(property.key.as_str(), value);
                }
                Ok(Value::object(map))
            }
            ExpressionKind::Function(def) => Ok(self.make_closure(def, env, def.display_name())),
            ExpressionKind::Unary { op, argument } => {
                if *op == UnaryOperator::Typeof
                    && let ExpressionKind::Identifier(name) = &argument.kind
                    && env.lookup(name).is_none()
                {
                    return Ok(Value::string("undefined"));
                }
                let value = self.eval_expression(argument, env)?;
                Ok(match op {
                    UnaryOperator::Not => Value::Boolean(!value.is_truthy()),
                    UnaryOperator::Negate => Value::Number(-value.to_number()),
                    UnaryOperator::Plus => Value::Number(value.to_number()),
                    UnaryOperator::Typeof => Value::string(value.type_of()),
                })
            }
            ExpressionKind::Update { op, prefix, target } => {
                let reference = self.resolve_reference(target, env)?;
                let old = self.read_reference(&reference, env, target.span)?.to_number();
                let new = match op {
                    UpdateOperator::Increment => old + 1.0,
                    UpdateOperator::Decrement => old - 1.0,
                };
                self.write_reference(&reference, Value::Number(new), env, target.span)?;
                self.capture_snapshot(env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            ExpressionKind::Binary { left, op, right } => {
                let left = self.eval_expression(left, env)?;
                let right = self.eval_expression(right, env)?;
                Ok(operators::binary(*op, &left, &right))
            }
            ExpressionKind::Logical { left, op, right } => {
                let left = self.eval_expression(left, env)?;
                let short_circuits = match op {
                    LogicalOperator::And => !left.is_truthy(),
                    LogicalOperator::Or => left.is_truthy(),
                    LogicalOperator::Nullish => !left.is_nullish(),
                };
                if short_circuits {
                    Ok(left)
                } else {
                    self.eval_expression(right, env)
                }
            }
            ExpressionKind::Assign { op, target, value } => {
                let reference = self.resolve_reference(target, env)?;
                let value = match op.binary_operator() {
                    None => match &reference {
                        Reference::Binding(name) => self.eval_named(value, env, name)?,
                        Reference::Property { .. } => self.eval_expression(value, env)?,
                    },
                    Some(binary) => {
                        let current = self.read_reference(&reference, env, target.span)?;
                        let operand = self.eval_expression(value, env)?;
                        operators::binary(binary, &current, &operand)
                    }
                };
                self.write_reference(&reference, value.clone(), env, target.span)?;
                Ok(value)
            }
            ExpressionKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval_expression(test, env)?.is_truthy() {
                    self.eval_expression(consequent, env)
                } else {
                    self.eval_expression(alternate, env)
                }
            }
            ExpressionKind::Member { object, property } => {
                let object = self.eval_expression(object, env)?;
                let key = self.property_key(property, env)?;
                self.get_property(&object, &key, span)
            }
            ExpressionKind::Call { callee, args } => {
                let (function, this) = match &callee.kind {
                    ExpressionKind::Member { object, property } => {
                        let receiver = self.eval_expression(object, env)?;
                        let key = self.property_key(property, env)?;
                        let function = self.get_property(&receiver, &key, callee.span)?;
                        (function, Some(receiver))
                    }
                    _ => (self.eval_expression(callee, env)?, None),
                };
                let arguments = self.eval_list(args, env)?;
                if !function.is_callable() {
                    return Err(self.raise_at(
                        RuntimeError::NotCallable {
                            callee: describe_callee(callee),
                        },
                        callee.span,
                    ));
                }
                self.call_value(function, this, arguments, env, span)
            }
            ExpressionKind::New { callee, args } => {
                let constructor = self.eval_expression(callee, env)?;
                let arguments = self.eval_list(args, env)?;
                match constructor {
                    Value::Function(closure) if !closure.def.is_arrow => {
                        let instance = Value::object(PropertyMap::default());
                        let result = self.call_function(
                            &closure,
                            Some(instance.clone()),
                            arguments,
                            env,
                            span,
                        )?;
                        Ok(match result {
                            Value::Object(_) | Value::Array(_) => result,
                            _ => instance,
                        })
                    }
                    Value::Builtin(builtin) if builtin.is_constructor() => {
                        self.construct_builtin(builtin, arguments, span)
                    }
                    _ => Err(self.raise_at(
                        RuntimeError::NotConstructor {
                            callee: describe_callee(callee),
                        },
                        callee.span,
                    )),
                }
            }
        }
    }

    fn eval_list(
        &mut self,
        expressions: &[Expression],
        env: &Environment,
    ) -> ExecResult<Vec<Value>> {
        let mut values = Vec::with_capacity(expressions.len());
        for expression in expressions {
            values.push(self.eval_expression(expression, env)?);
        }
        Ok(values)
    }

    // Calls

    pub(super) fn call_value(
        &mut self,
        function: Value,
        this: Option<Value>,
        args: Vec<Value>,
        env: &Environment,
        call_site: Span,
    ) -> ExecResult<Value> {
        match function {
            Value::Function(closure) => self.call_function(&closure, this, args, env, call_site),
            Value::Builtin(builtin) => self.call_builtin(builtin, args, call_site),
            Value::BoundMethod { receiver, method } => {
                self.call_method(&receiver, &method, args, env, call_site)
            }
            other => Err(self.raise_at(
                RuntimeError::NotCallable {
                    callee: other.describe(),
                },
                call_site,
            )),
        }
    }

    /// Invokes a user function: pushes a frame, snapshots entry and return,
    /// and pops the frame whether or not the body completed.
    fn call_function(
        &mut self,
        closure: &Rc<Closure>,
        this: Option<Value>,
        args: Vec<Value>,
        caller_env: &Environment,
        call_site: Span,
    ) -> ExecResult<Value> {
        if self.frames.len() >= self.options.max_call_depth {
            return Err(self.raise_at(RuntimeError::CallDepthExceeded, call_site));
        }
        let def = &closure.def;
        let this = if def.is_arrow {
            None
        } else {
            Some(this.unwrap_or(Value::Undefined))
        };
        let scope = Environment::new_function_scope(&closure.env, this);
        let mut args = args.into_iter();
        let arguments: Vec<(String, Value)> = def
            .params
            .iter()
            .map(|param| (param.clone(), args.next().unwrap_or(Value::Undefined)))
            .collect();
        for (name, value) in &arguments {
            scope.define(name, value.clone());
        }

        let call_id = self.next_call_id;
        self.next_call_id += 1;
        tracing::trace!(function = %closure.name, call_id, depth = self.frames.len() + 1, "call");
        self.frames.push(ActiveFrame {
            call_id,
            function_name: closure.name.clone(),
            arguments,
            function_env: scope.clone(),
            caller_env: caller_env.clone(),
            call_site,
            return_value: None,
        });

        let caller_location = self.location;
        let result = ensure_sufficient_stack(|| self.invoke(closure, &scope));
        self.frames.pop();
        if result.is_ok() {
            self.location = caller_location;
        }
        result
    }

    fn invoke(&mut self, closure: &Closure, scope: &Environment) -> ExecResult<Value> {
        self.location = closure.def.span;
        self.capture_snapshot(scope)?;
        let value = match &closure.def.body {
            FunctionBody::Block(body) => match self.exec_block(body, scope)? {
                Completion::Return(value) => value,
                Completion::Normal => Value::Undefined,
                Completion::Break => {
                    return Err(self.raise(RuntimeError::IllegalControlFlow { statement: "break" }));
                }
                Completion::Continue => {
                    return Err(self.raise(RuntimeError::IllegalControlFlow {
                        statement: "continue",
                    }));
                }
            },
            FunctionBody::Expression(expression) => {
                self.location = expression.span;
                self.eval_expression(expression, scope)?
            }
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.return_value = Some(value.clone());
        }
        self.capture_snapshot(scope)?;
        Ok(value)
    }

    // Properties and references

    fn property_key(&mut self, property: &MemberProperty, env: &Environment) -> ExecResult<String> {
        match property {
            MemberProperty::Named(name) => Ok(name.clone()),
            MemberProperty::Computed(expression) => {
                Ok(match self.eval_expression(expression, env)? {
                    Value::Number(number) => format_number(number),
                    other => other.to_display_string(),
                })
            }
        }
    }

    fn get_property(&self, object: &Value, key: &str, span: Span) -> ExecResult<Value> {
        let value = match object {
            Value::Undefined | Value::Null => {
                return Err(self.raise_at(
                    RuntimeError::PropertyOfNullish {
                        base: object.nullish_name(),
                        property: key.to_string(),
                    },
                    span,
                ));
            }
            Value::Array(items) => {
                if key == "length" {
                    Value::Number(items.borrow().len() as f64)
                } else if let Some(index) = array_index(key) {
                    items.borrow().get(index).cloned().unwrap_or(Value::Undefined)
                } else {
                    builtins::bound_method(object, key).unwrap_or(Value::Undefined)
                }
            }
            Value::String(text) => {
                if key == "length" {
                    Value::Number(text.chars().count() as f64)
                } else if let Some(index) = array_index(key) {
                    text.chars()
                        .nth(index)
                        .map_or(Value::Undefined, |c| Value::string(c.to_string()))
                } else {
                    builtins::bound_method(object, key).unwrap_or(Value::Undefined)
                }
            }
            Value::Object(map) => map.borrow().get(key).cloned().unwrap_or(Value::Undefined),
            Value::Number(_) | Value::Boolean(_) => {
                builtins::bound_method(object, key).unwrap_or(Value::Undefined)
            }
            Value::Function(closure) => match key {
                "name" => Value::string(closure.name.as_str()),
                "length" => Value::Number(closure.def.params.len() as f64),
                _ => Value::Undefined,
            },
            Value::Builtin(builtin) => builtin.static_member(key).unwrap_or(Value::Undefined),
            Value::BoundMethod { method, .. } => match key {
                "name" => Value::String(Rc::clone(method)),
                _ => Value::Undefined,
            },
        };
        Ok(value)
    }

    fn set_property(&self, object: &Value, key: &str, value: Value, span: Span) -> ExecResult<()> {
        match object {
            Value::Undefined | Value::Null => Err(self.raise_at(
                RuntimeError::SetPropertyOfNullish {
                    base: object.nullish_name(),
                    property: key.to_string(),
                },
                span,
            )),
            Value::Array(items) => {
                if key == "length" {
                    let length = value.to_number();
                    if length < 0.0 || length.fract() != 0.0 || length > MAX_INDEX as f64 {
                        return Err(self.raise_at(RuntimeError::InvalidArrayLength, span));
                    }
                    items.borrow_mut().resize(length as usize, Value::Undefined);
                } else if let Some(index) = array_index(key) {
                    if index > MAX_INDEX {
                        return Err(self.raise_at(RuntimeError::InvalidArrayLength, span));
                    }
                    let mut items = items.borrow_mut();
                    if index >= items.len() {
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                }
                Ok(())
            }
            Value::Object(map) => {
                map.borrow_mut().insert(key, value);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn resolve_reference(
        &mut self,
        target: &Expression,
        env: &Environment,
    ) -> ExecResult<Reference> {
        match &target.kind {
            ExpressionKind::Identifier(name) => Ok(Reference::Binding(name.clone())),
            ExpressionKind::Member { object, property } => {
                let object = self.eval_expression(object, env)?;
                let key = self.property_key(property, env)?;
                Ok(Reference::Property { object, key })
            }
            _ => Err(self.raise_at(RuntimeError::InvalidAssignmentTarget, target.span)),
        }
    }

    fn read_reference(
        &self,
        reference: &Reference,
        env: &Environment,
        span: Span,
    ) -> ExecResult<Value> {
        match reference {
            Reference::Binding(name) => env.get(name).map_err(|error| self.raise_at(error, span)),
            Reference::Property { object, key } => self.get_property(object, key, span),
        }
    }

    fn write_reference(
        &self,
        reference: &Reference,
        value: Value,
        env: &Environment,
        span: Span,
    ) -> ExecResult<()> {
        match reference {
            Reference::Binding(name) => env
                .assign(name, value)
                .map_err(|error| self.raise_at(error, span)),
            Reference::Property { object, key } => self.set_property(object, key, value, span),
        }
    }
}

/// Largest array index assignment will grow an array to.
const MAX_INDEX: usize = 10_000_000;

/// Canonical array index (`"3"`, not `"03"` or `"3.0"`).
fn array_index(key: &str) -> Option<usize> {
    let index = key.parse::<usize>().ok()?;
    (index.to_string() == key).then_some(index)
}

/// Source-like rendering of a callee for error messages.
fn describe_callee(expression: &Expression) -> String {
    match &expression.kind {
        ExpressionKind::Identifier(name) => name.clone(),
        ExpressionKind::This => "this".to_string(),
        ExpressionKind::Member { object, property } => match property {
            MemberProperty::Named(name) => format!("{}.{name}", describe_callee(object)),
            MemberProperty::Computed(_) => format!("{}[...]", describe_callee(object)),
        },
        ExpressionKind::Call { callee, .. } => format!("{}(...)", describe_callee(callee)),
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::builtins::Builtin;

    #[test]
    fn array_indices_must_be_canonical() {
        assert_eq!(array_index("3"), Some(3));
        assert_eq!(array_index("03"), None);
        assert_eq!(array_index("-1"), None);
        assert_eq!(array_index("length"), None);
    }

    #[test]
    fn describes_member_callees() {
        let program = crate::parser::parse("a.b[0].c();").expect("valid program");
        let StatementKind::Expression(expression) = &program.body[0].kind else {
            panic!("expected expression statement");
        };
        let ExpressionKind::Call { callee, .. } = &expression.kind else {
            panic!("expected call");
        };
        assert_eq!(describe_callee(callee), "a.b[...].c");
    }

    #[test]
    fn builtin_lookup_does_not_leak_into_globals() {
        let runtime = InterpreterRuntime::new(InterpreterOptions::default());
        assert!(runtime.global_env.lookup("console").is_some());
        assert!(runtime.global_env.bindings().is_empty());
        assert!(matches!(
            runtime.global_env.lookup("parseInt"),
            Some(Value::Builtin(Builtin::ParseInt))
        ));
    }
}
