use std::fmt;
use std::io::{self, Write};
use std::path::Path as FilePath;

use crate::ast::{BinaryOp, Primitive, Reference, Value};
use crate::builtinops::{Command, get_builtin_ops};
use crate::config::SessionConfig;
use crate::parser::{Line, parse_line};
use crate::persist;
use crate::scope::{Location, Path, Scope};
use crate::{DataError, Error, MAX_EVAL_DEPTH};

/// What an operand has to be reduced to before an operator or command can use it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Container,
    Addable,
    Subtractible,
    Multiplicable,
    Divisible,
}

impl Capability {
    /// The capability the operands of an arithmetic operator are coerced to.
    /// Comparisons evaluate their operands fully instead.
    pub fn for_operator(op: BinaryOp) -> Option<Capability> {
        match op {
            BinaryOp::Add => Some(Capability::Addable),
            BinaryOp::Subtract => Some(Capability::Subtractible),
            BinaryOp::Multiply => Some(Capability::Multiplicable),
            BinaryOp::Divide => Some(Capability::Divisible),
            _ => None,
        }
    }

    fn accept_primitive(self, node: &Value, primitive: &Primitive) -> Result<Reduced, Error> {
        match self {
            Capability::Container => Err(Error::Unevaluable {
                expression: node.to_string(),
                reason: format!("{primitive} is not a collection"),
            }),
            _ => Ok(Reduced::Primitive(primitive.clone())),
        }
    }

    fn accept_container(self, node: &Value, path: &Path) -> Result<Reduced, Error> {
        match self {
            Capability::Container => Ok(Reduced::Container(path.clone())),
            _ => Err(Error::Unevaluable {
                expression: node.to_string(),
                reason: format!("the collection {path} is not {self}"),
            }),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let adjective = match self {
            Capability::Container => "a collection",
            Capability::Addable => "addable",
            Capability::Subtractible => "subtractible",
            Capability::Multiplicable => "multiplicable",
            Capability::Divisible => "divisible",
        };
        write!(f, "{adjective}")
    }
}

/// The first thing found along an evaluation chain that satisfies a capability
#[derive(Debug, Clone, PartialEq)]
pub enum Reduced {
    Primitive(Primitive),
    /// A scope in the store, addressed rather than copied
    Container(Path),
}

impl Value {
    /// Fully reduce this node, executing any side effects, with `args` standing in
    /// for the `$n` placeholders.
    pub fn evaluate(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Primitive, Error> {
        match self {
            Value::Primitive(p) => Ok(p.clone()),
            Value::Reference(reference) => {
                let held = match interp.resolve(reference) {
                    Ok(Value::Container(scope)) => {
                        return Err(Error::Unevaluable {
                            expression: self.to_string(),
                            reason: format!("{} is a collection", scope.path()),
                        });
                    }
                    Ok(held) => held.clone(),
                    Err(err) => return Err(Error::evaluation(self, err.into())),
                };
                interp.nested(|interp| held.evaluate(interp, args))
            }
            Value::Argument(n) => match args.get(*n) {
                Some(arg) => interp.nested(|interp| arg.evaluate(interp, &[])),
                None => Err(unsupplied(self)),
            },
            Value::Binary { op, lhs, rhs } => {
                let (a, b) = match Capability::for_operator(*op) {
                    Some(capability) => (
                        lhs.evaluate_to_primitive(capability, interp, args)?,
                        rhs.evaluate_to_primitive(capability, interp, args)?,
                    ),
                    None => (lhs.evaluate(interp, args)?, rhs.evaluate(interp, args)?),
                };
                op.apply(&a, &b)
                    .map_err(|err| Error::evaluation(self, err.into()))
            }
            Value::Invocation {
                target,
                args: call_args,
            } => {
                let target = target.replace_arguments(args);
                let call_args: Vec<Value> = call_args
                    .iter()
                    .map(|arg| arg.replace_arguments(args))
                    .collect();
                interp.nested(|interp| target.invoke(interp, &call_args))
            }
            Value::Container(scope) => Err(Error::Unevaluable {
                expression: scope.path().to_string(),
                reason: "a collection has no value".to_owned(),
            }),
            Value::Command(command) => command.invoke(interp, args),
        }
    }

    /// Call this node as a command with `args`.
    ///
    /// Only a command, or a reference to one, accepts arguments.
    pub fn invoke(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Primitive, Error> {
        let command = match self {
            Value::Command(command) => *command,
            Value::Reference(reference) => match interp.resolve(reference) {
                Ok(Value::Command(command)) => *command,
                Ok(_) => return Err(not_a_command(self)),
                Err(err) => return Err(Error::evaluation(self, err.into())),
            },
            _ => return Err(not_a_command(self)),
        };
        command.invoke(interp, args)
    }

    /// Follow the evaluation chain until something satisfies `capability`.
    ///
    /// References are dereferenced and computed nodes are evaluated, and the
    /// result is coerced again rather than stopping after one step.
    pub fn evaluate_to(
        &self,
        capability: Capability,
        interp: &mut Interpreter,
        args: &[Value],
    ) -> Result<Reduced, Error> {
        match self {
            Value::Primitive(p) => capability.accept_primitive(self, p),
            Value::Container(scope) => capability.accept_container(self, scope.path()),
            Value::Reference(reference) => {
                let held = match interp.resolve(reference) {
                    Ok(Value::Container(scope)) => {
                        return capability.accept_container(self, scope.path());
                    }
                    Ok(held) => held.clone(),
                    Err(err) => return Err(Error::evaluation(self, err.into())),
                };
                interp.nested(|interp| held.evaluate_to(capability, interp, args))
            }
            Value::Argument(n) => match args.get(*n) {
                Some(arg) => interp.nested(|interp| arg.evaluate_to(capability, interp, &[])),
                None => Err(unsupplied(self)),
            },
            Value::Binary { .. } | Value::Invocation { .. } | Value::Command(_) => {
                let result = Value::Primitive(self.evaluate(interp, args)?);
                result.evaluate_to(capability, interp, args)
            }
        }
    }

    /// Coerce to an arithmetic capability; the chain always ends in a primitive.
    pub fn evaluate_to_primitive(
        &self,
        capability: Capability,
        interp: &mut Interpreter,
        args: &[Value],
    ) -> Result<Primitive, Error> {
        match self.evaluate_to(capability, interp, args)? {
            Reduced::Primitive(p) => Ok(p),
            Reduced::Container(path) => Err(Error::Unevaluable {
                expression: self.to_string(),
                reason: format!("the collection {path} is not {capability}"),
            }),
        }
    }

    /// Coerce to a scope in the store
    pub fn evaluate_to_container(
        &self,
        interp: &mut Interpreter,
        args: &[Value],
    ) -> Result<Path, Error> {
        match self.evaluate_to(Capability::Container, interp, args)? {
            Reduced::Container(path) => Ok(path),
            Reduced::Primitive(p) => Err(Error::Unevaluable {
                expression: self.to_string(),
                reason: format!("{p} is not a collection"),
            }),
        }
    }

    /// Substitute `$n` placeholders. Everything else, references included, is copied.
    pub fn replace_arguments(&self, args: &[Value]) -> Value {
        match self {
            Value::Argument(n) => args.get(*n).cloned().unwrap_or_else(|| self.clone()),
            Value::Binary { op, lhs, rhs } => Value::Binary {
                op: *op,
                lhs: Box::new(lhs.replace_arguments(args)),
                rhs: Box::new(rhs.replace_arguments(args)),
            },
            Value::Invocation {
                target,
                args: call_args,
            } => Value::Invocation {
                target: Box::new(target.replace_arguments(args)),
                args: call_args
                    .iter()
                    .map(|arg| arg.replace_arguments(args))
                    .collect(),
            },
            other => other.clone(),
        }
    }

    /// Produce a side-effect free tree ready for later, possibly repeated, evaluation.
    ///
    /// Placeholders are substituted and operators over two literals are folded.
    /// References stay references, so a deferred command re-reading them sees the
    /// store as it is at that time.
    pub fn pre_evaluate(&self, args: &[Value]) -> Value {
        self.replace_arguments(args).folded()
    }

    fn folded(self) -> Value {
        match self {
            Value::Binary { op, lhs, rhs } => {
                let lhs = lhs.folded();
                let rhs = rhs.folded();
                if let (Value::Primitive(a), Value::Primitive(b)) = (&lhs, &rhs)
                    && let Ok(result) = op.apply(a, b)
                {
                    return Value::Primitive(result);
                }
                Value::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                }
            }
            Value::Invocation { target, args } => Value::Invocation {
                target: Box::new(target.folded()),
                args: args.into_iter().map(Value::folded).collect(),
            },
            other => other,
        }
    }
}

fn not_a_command(node: &Value) -> Error {
    Error::Unevaluable {
        expression: node.to_string(),
        reason: format!("{node} is not a command and takes no arguments"),
    }
}

fn unsupplied(node: &Value) -> Error {
    Error::Unevaluable {
        expression: node.to_string(),
        reason: "no such argument was supplied".to_owned(),
    }
}

/// One interpreter session: the store, the current-scope cursor and the output sink.
pub struct Interpreter {
    root: Scope,
    cursor: Path,
    output: Box<dyn Write>,
    config: SessionConfig,
    running: bool,
    depth: usize,
}

impl Interpreter {
    /// Create a session writing to standard output
    pub fn new(config: SessionConfig) -> Self {
        Self::with_output(config, Box::new(io::stdout()))
    }

    /// Create a session writing results and errors to `output`
    pub fn with_output(config: SessionConfig, output: Box<dyn Write>) -> Self {
        let mut interp = Interpreter {
            root: Scope::new(),
            cursor: Path::root(),
            output,
            config,
            running: true,
            depth: 0,
        };
        interp.load_system_commands();
        interp
    }

    fn load_system_commands(&mut self) {
        for op in get_builtin_ops() {
            for name in op.names() {
                let command = Value::Command(Command::new(op, name));
                if !self.root.insert(name, command) {
                    tracing::warn!(command = name, "could not load system command");
                }
            }
        }
    }

    pub fn root(&self) -> &Scope {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Scope {
        &mut self.root
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Path of the scope plain names are resolved in
    pub fn cursor(&self) -> &Path {
        &self.cursor
    }

    /// Move the cursor; the target must be an existing scope.
    pub fn set_cursor(&mut self, path: Path) -> Result<(), Error> {
        self.root.scope(&path)?;
        tracing::debug!(scope = %path, "moved cursor");
        self.cursor = path;
        Ok(())
    }

    pub fn current_scope(&self) -> Result<&Scope, Error> {
        Ok(self.root.scope(&self.cursor)?)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// End the session after the current line
    pub fn quit(&mut self) {
        self.running = false;
    }

    /// Write one line to the output sink
    pub fn write_line(&mut self, text: &str) -> Result<(), Error> {
        writeln!(self.output, "{text}")
            .and_then(|()| self.output.flush())
            .map_err(|err| Error::Io {
                path: "<output>".to_owned(),
                message: err.to_string(),
            })
    }

    /// Resolve a dotted reference to the value it names.
    ///
    /// A first name bound to a command in the root always means that command.
    /// Otherwise the first name is searched in the current scope, then in the root
    /// scope; every further name is searched locally in the container named before it.
    pub fn resolve(&self, reference: &Reference) -> Result<&Value, DataError> {
        let first = reference.first();
        let current = self.root.scope(&self.cursor)?;
        let command = matches!(self.root.lookup(first), Some(Value::Command(_)));
        let base = if command || (!current.contains(first) && self.root.contains(first)) {
            &self.root
        } else {
            current
        };
        let location = Location {
            parent: base.path().clone(),
            name: reference.first().to_owned(),
        };
        let mut value = self.root.get(&location)?;
        let mut path = location.path();
        for name in reference.names().iter().skip(1) {
            value = match value {
                Value::Container(scope) => {
                    scope.lookup(name).ok_or_else(|| DataError::Missing {
                        path: scope.path().clone(),
                        name: name.clone(),
                    })?
                }
                _ => return Err(DataError::NotAContainer { path }),
            };
            path = path.child(name);
        }
        Ok(value)
    }

    /// The slot an assignment to `reference` writes to, relative to the current
    /// scope. Every name but the last must already be a collection; the last
    /// need not exist.
    pub fn locate(&self, reference: &Reference) -> Result<Location, DataError> {
        let (name, parents) = reference
            .names()
            .split_last()
            .ok_or_else(|| DataError::NotATarget {
                expression: reference.to_string(),
            })?;
        let mut parent = self.cursor.clone();
        for step in parents {
            parent = parent.child(step);
        }
        self.root.scope(&parent)?;
        Ok(Location {
            parent,
            name: name.clone(),
        })
    }

    /// Run `f` one evaluation level deeper, failing once the depth limit is reached.
    pub(crate) fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(Error::Unevaluable {
                expression: "...".to_owned(),
                reason: format!("evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"),
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Parse, pre-evaluate and evaluate one line without reporting the outcome.
    /// Blank lines evaluate to void.
    pub fn execute_line(&mut self, line: &str) -> Result<Primitive, Error> {
        self.execute_with_arguments(line, &[])
    }

    /// As [`Interpreter::execute_line`], with `args` bound to `$0`, `$1`, ...
    pub fn execute_with_arguments(
        &mut self,
        line: &str,
        args: &[Value],
    ) -> Result<Primitive, Error> {
        if self.root.scope(&self.cursor).is_err() {
            tracing::warn!(scope = %self.cursor, "current scope vanished, returning to root");
            self.cursor = Path::root();
        }

        let Some(Line {
            head,
            args: line_args,
        }) = parse_line(line, &self.config.parse)?
        else {
            return Ok(Primitive::Void);
        };
        tracing::debug!(head = %head, args = line_args.len(), "parsed line");

        let head = head.pre_evaluate(args);
        let line_args: Vec<Value> = line_args.iter().map(|arg| arg.pre_evaluate(args)).collect();
        tracing::trace!(head = %head, "pre-evaluated line");

        let result = if line_args.is_empty() {
            head.evaluate(self, &[])?
        } else {
            head.invoke(self, &line_args)?
        };
        tracing::debug!(result = %result, "evaluated line");
        Ok(result)
    }

    /// Execute one line and report it: `Result: <text form>` for values, raw text
    /// for text, nothing for void, `Error: <message>` for failures.
    ///
    /// Returns `false` if the line failed.
    pub fn dispatch_line(&mut self, line: &str) -> bool {
        match self.execute_line(line) {
            Ok(result) => {
                self.report(&result);
                true
            }
            Err(err) => {
                self.report_error(&err);
                false
            }
        }
    }

    fn report(&mut self, result: &Primitive) {
        let written = match result {
            Primitive::Void => Ok(()),
            Primitive::Text(text) => self.write_line(text),
            other => self.write_line(&format!("Result: {other}")),
        };
        if let Err(err) = written {
            tracing::error!(error = %err, "could not report result");
        }
    }

    /// Report a failure the way a failing line is reported
    pub fn report_error(&mut self, err: &Error) {
        tracing::debug!(error = ?err, "line failed");
        if let Err(write_err) = self.write_line(&format!("Error: {err}")) {
            tracing::error!(error = %write_err, "could not report error");
        }
    }

    /// Replay `lines` with `args` bound to the placeholders, reporting each result.
    ///
    /// The first failing line aborts the rest; mutations made by earlier lines stay.
    pub fn run_lines(
        &mut self,
        origin: &str,
        lines: &[String],
        args: &[Value],
    ) -> Result<Primitive, Error> {
        for (number, line) in lines.iter().enumerate() {
            if !self.running {
                break;
            }
            match self.execute_with_arguments(line, args) {
                Ok(result) => self.report(&result),
                Err(err) => {
                    tracing::info!(origin, line = number + 1, "script aborted");
                    return Err(Error::evaluation(format!("{origin}:{}", number + 1), err));
                }
            }
        }
        Ok(Primitive::Void)
    }

    /// Read a script file and replay it, aborting on the first failing line
    pub fn run_file(&mut self, file: &FilePath, args: &[Value]) -> Result<Primitive, Error> {
        let lines = persist::read_file(file)?;
        tracing::info!(file = %file.display(), lines = lines.len(), "running script");
        self.run_lines(&file.display().to_string(), &lines, args)
    }

    /// Feed the startup script through the interactive dispatch path. Failing lines
    /// are reported and do not stop the following ones; a missing script is skipped.
    pub fn run_startup(&mut self) {
        let Some(file) = self.config.startup_script.clone() else {
            return;
        };
        let lines = match persist::read_file(&file) {
            Ok(lines) => lines,
            Err(err) => {
                tracing::debug!(file = %file.display(), error = %err, "no startup script");
                return;
            }
        };
        tracing::info!(file = %file.display(), lines = lines.len(), "running startup script");
        for line in &lines {
            if !self.running {
                break;
            }
            self.dispatch_line(line);
        }
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("cursor", &self.cursor)
            .field("slots", &self.root.len())
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}
