//! Built-in command registry.
//!
//! Every command is defined once in [`BUILTIN_OPS`] and installed into the root scope
//! under its name and each synonym, so commands live in the same namespace as data and
//! are found by ordinary reference resolution.
//!
//! ## Eager vs Deferred Commands
//!
//! - **Eager**: arguments are reduced before the body runs, each according to its
//!   [`ParamKind`]: fully evaluated to a primitive, coerced to a scope, or turned into
//!   an assignment target (e.g. `set`, `create`, `print`)
//! - **Deferred**: the body receives the pre-evaluated argument trees and evaluates
//!   them itself, possibly repeatedly (e.g. `if`, `while`, `for`, `run`)
//!
//! ```text
//! set hp, 12                      ; eager: target + value
//! while hp > 0, set(hp, hp - 5)   ; deferred: condition and body re-evaluated
//! ```
//!
//! ## Adding New Commands
//!
//! 1. **Implement the body** with the eager or deferred signature
//! 2. **Add to BUILTIN_OPS** with its synonyms, arity and parameter kinds
//! 3. **Add tests** covering the happy path, arity and error cases

use std::collections::HashMap;
use std::fmt;
use std::path::Path as FilePath;
use std::sync::LazyLock;

use crate::ast::{NumberType, Primitive, Value};
use crate::evaluator::Interpreter;
use crate::persist;
use crate::scope::{Location, Path, Scope};
use crate::{DataError, Error};

/// Indentation of nested listing levels
const TAB: &str = "   ";

/// Number of arguments a command accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    Any,
}

impl Arity {
    /// Check an argument count before the command body runs
    pub fn validate(&self, command: &str, got: usize) -> Result<(), Error> {
        let ok = match *self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Range(min, max) => (min..=max).contains(&got),
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Arity {
                command: command.to_owned(),
                expected: self.to_string(),
                got,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// How an eager command wants one argument reduced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A reference naming the slot to write; resolved to its parent scope and name
    Target,
    /// Fully evaluated to a primitive
    Value,
    /// Coerced to a scope of the store
    Scope,
}

/// A reduced eager-command argument
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Primitive),
    Scope(Path),
    Target(Location),
}

/// Reduced arguments, consumed front to back by a command body
#[derive(Debug)]
pub struct ArgList {
    command: &'static str,
    args: std::vec::IntoIter<Arg>,
}

impl ArgList {
    fn new(command: &'static str, args: Vec<Arg>) -> Self {
        ArgList {
            command,
            args: args.into_iter(),
        }
    }

    pub fn target(&mut self) -> Result<Location, Error> {
        match self.args.next() {
            Some(Arg::Target(location)) => Ok(location),
            other => Err(self.unexpected("target", other)),
        }
    }

    pub fn value(&mut self) -> Result<Primitive, Error> {
        match self.args.next() {
            Some(Arg::Value(value)) => Ok(value),
            other => Err(self.unexpected("value", other)),
        }
    }

    pub fn optional_value(&mut self) -> Result<Option<Primitive>, Error> {
        match self.args.next() {
            None => Ok(None),
            Some(Arg::Value(value)) => Ok(Some(value)),
            other => Err(self.unexpected("value", other)),
        }
    }

    pub fn optional_scope(&mut self) -> Result<Option<Path>, Error> {
        match self.args.next() {
            None => Ok(None),
            Some(Arg::Scope(path)) => Ok(Some(path)),
            other => Err(self.unexpected("collection", other)),
        }
    }

    pub fn scope(&mut self) -> Result<Path, Error> {
        match self.args.next() {
            Some(Arg::Scope(path)) => Ok(path),
            other => Err(self.unexpected("collection", other)),
        }
    }

    /// All remaining arguments as values
    pub fn rest_values(mut self) -> Result<Vec<Primitive>, Error> {
        let mut values = Vec::new();
        while let Some(value) = self.optional_value()? {
            values.push(value);
        }
        Ok(values)
    }

    fn unexpected(&self, wanted: &str, got: Option<Arg>) -> Error {
        Error::Unevaluable {
            expression: self.command.to_owned(),
            reason: format!("expected a {wanted} argument, got {got:?}"),
        }
    }
}

/// Argument discipline and body of a built-in command
#[derive(Clone, Copy)]
pub enum Discipline {
    /// Receives reduced arguments
    Eager(fn(&mut Interpreter, ArgList) -> Result<Primitive, Error>),
    /// Receives the pre-evaluated argument trees
    Deferred(fn(&mut Interpreter, &[Value]) -> Result<Primitive, Error>),
}

impl fmt::Debug for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discipline::Eager(_) => write!(f, "Eager(<fn>)"),
            Discipline::Deferred(_) => write!(f, "Deferred(<fn>)"),
        }
    }
}

/// Definition of a built-in command
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    pub name: &'static str,
    /// Further names the command is installed under
    pub synonyms: &'static [&'static str],
    pub discipline: Discipline,
    pub arity: Arity,
    /// Kind of each eager argument; positions past the end repeat the last kind
    pub params: &'static [ParamKind],
    /// One-line usage shown by the front end's help
    pub usage: &'static str,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        // The primary name uniquely identifies a command
        self.name == other.name
    }
}

impl BuiltinOp {
    /// The primary name followed by the synonyms
    pub fn names(&self) -> impl Iterator<Item = &'static str> + use<> {
        let synonyms: &'static [&'static str] = self.synonyms;
        std::iter::once(self.name).chain(synonyms.iter().copied())
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.discipline, Discipline::Deferred(_))
    }

    pub fn param_kind(&self, position: usize) -> ParamKind {
        self.params
            .get(position)
            .or(self.params.last())
            .copied()
            .unwrap_or(ParamKind::Value)
    }
}

/// A built-in command as stored in a scope slot, remembering the name it was
/// installed under
#[derive(Debug, Clone, Copy)]
pub struct Command {
    op: &'static BuiltinOp,
    name: &'static str,
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.name == other.name
    }
}

impl Command {
    pub fn new(op: &'static BuiltinOp, name: &'static str) -> Self {
        Command { op, name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn op(&self) -> &'static BuiltinOp {
        self.op
    }

    /// Validate the arity, reduce the arguments as the discipline requires and run
    /// the body.
    pub fn invoke(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Primitive, Error> {
        self.op.arity.validate(self.name, args.len())?;
        tracing::trace!(command = self.name, args = args.len(), "invoking command");
        match self.op.discipline {
            Discipline::Eager(body) => {
                let reduced = args
                    .iter()
                    .enumerate()
                    .map(|(i, arg)| reduce(interp, self.op.param_kind(i), arg))
                    .collect::<Result<Vec<_>, _>>()?;
                body(interp, ArgList::new(self.name, reduced))
            }
            Discipline::Deferred(body) => body(interp, args),
        }
    }
}

fn reduce(interp: &mut Interpreter, kind: ParamKind, arg: &Value) -> Result<Arg, Error> {
    match kind {
        ParamKind::Value => Ok(Arg::Value(arg.evaluate(interp, &[])?)),
        ParamKind::Scope => Ok(Arg::Scope(arg.evaluate_to_container(interp, &[])?)),
        ParamKind::Target => Ok(Arg::Target(target(interp, arg)?)),
    }
}

fn target(interp: &Interpreter, arg: &Value) -> Result<Location, Error> {
    match arg {
        Value::Reference(reference) => Ok(interp.locate(reference)?),
        other => Err(DataError::NotATarget {
            expression: other.to_string(),
        }
        .into()),
    }
}

//
// Store commands
//

fn set(interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    let location = args.target()?;
    let value = args.value()?;
    let scope = interp.root_mut().scope_mut(&location.parent)?;
    if let Some(Value::Command(_)) = scope.lookup(&location.name) {
        return Err(occupied(&location));
    }
    scope.assign(&location.name, Value::Primitive(value));
    Ok(Primitive::Void)
}

fn create(interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    let location = args.target()?;
    let container = Value::Container(Scope::nested(location.path()));
    insert(interp, &location, container)?;
    Ok(Primitive::Void)
}

fn remove(interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    let location = args.target()?;
    take(interp, &location)?;
    Ok(Primitive::Void)
}

fn copy(interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    let source = args.target()?;
    let destination = args.target()?;
    let value = interp.root().get(&source)?.clone();
    insert(interp, &destination, value)?;
    Ok(Primitive::Void)
}

fn move_slot(interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    let source = args.target()?;
    let destination = args.target()?;
    interp.root().get(&source)?;
    if destination.path().starts_with(&source.path()) {
        return Err(Error::Unevaluable {
            expression: format!("move({source}, {destination})"),
            reason: "a collection can not be moved into itself".to_owned(),
        });
    }
    if interp
        .root()
        .scope(&destination.parent)?
        .contains(&destination.name)
    {
        return Err(occupied(&destination));
    }
    let value = take(interp, &source)?;
    insert(interp, &destination, value)?;
    Ok(Primitive::Void)
}

fn clear(interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    let path = args.optional_scope()?.unwrap_or_else(|| interp.cursor().clone());
    let scope = interp.root_mut().scope_mut(&path)?;
    scope.retain(|_, value| matches!(value, Value::Command(_)));
    tracing::debug!(scope = %path, "cleared");
    Ok(Primitive::Void)
}

fn sort(interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    let path = args.optional_scope()?.unwrap_or_else(|| interp.cursor().clone());
    let descending = flag(args.optional_value()?)?;
    interp.root_mut().scope_mut(&path)?.sort(descending);
    Ok(Primitive::Void)
}

fn insert(interp: &mut Interpreter, location: &Location, value: Value) -> Result<(), Error> {
    let scope = interp.root_mut().scope_mut(&location.parent)?;
    if scope.insert(&location.name, value) {
        Ok(())
    } else {
        Err(occupied(location))
    }
}

/// Detach a slot from its scope. Built-in commands stay where they are.
fn take(interp: &mut Interpreter, location: &Location) -> Result<Value, Error> {
    let scope = interp.root_mut().scope_mut(&location.parent)?;
    if let Some(Value::Command(_)) = scope.lookup(&location.name) {
        return Err(Error::Unevaluable {
            expression: location.to_string(),
            reason: "a built-in command can not be removed or moved".to_owned(),
        });
    }
    scope.remove(&location.name).ok_or_else(|| {
        DataError::Missing {
            path: location.parent.clone(),
            name: location.name.clone(),
        }
        .into()
    })
}

fn occupied(location: &Location) -> Error {
    DataError::Occupied {
        path: location.parent.clone(),
        name: location.name.clone(),
    }
    .into()
}

//
// Output commands
//

fn list(interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    let path = args.optional_scope()?.unwrap_or_else(|| interp.cursor().clone());
    let recurse = flag(args.optional_value()?)?;
    let hidden = flag(args.optional_value()?)?;

    let mut lines = Vec::new();
    listing(interp.root().scope(&path)?, recurse, hidden, 0, &mut lines);
    for line in &lines {
        interp.write_line(line)?;
    }
    Ok(Primitive::Void)
}

/// Render one line per visible slot. Built-in commands and names starting with `_`
/// count as hidden.
pub fn listing(scope: &Scope, recurse: bool, hidden: bool, depth: usize, lines: &mut Vec<String>) {
    let indent = TAB.repeat(depth);
    for (name, value) in scope.iter() {
        if !hidden && (name.starts_with('_') || matches!(value, Value::Command(_))) {
            continue;
        }
        match value {
            Value::Container(inner) if recurse => {
                lines.push(format!("{indent}{name}:"));
                listing(inner, recurse, hidden, depth + 1, lines);
            }
            other => lines.push(format!("{indent}{name}: {other}")),
        }
    }
}

fn flag(value: Option<Primitive>) -> Result<bool, Error> {
    match value {
        Some(value) => Ok(value.to_boolean()?),
        None => Ok(false),
    }
}

fn print(interp: &mut Interpreter, args: ArgList) -> Result<Primitive, Error> {
    let text = args
        .rest_values()?
        .iter()
        .map(Primitive::to_text)
        .collect::<Vec<_>>()
        .join(" ");
    interp.write_line(&text)?;
    Ok(Primitive::Void)
}

fn text(_interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    Ok(Primitive::Text(args.value()?.to_string()))
}

fn void(_interp: &mut Interpreter, args: ArgList) -> Result<Primitive, Error> {
    args.rest_values()?;
    Ok(Primitive::Void)
}

//
// Session commands
//

fn env(interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    let path = args.optional_scope()?.unwrap_or_else(Path::root);
    interp.set_cursor(path)?;
    Ok(Primitive::Void)
}

fn quit(interp: &mut Interpreter, _args: ArgList) -> Result<Primitive, Error> {
    tracing::debug!("quit requested");
    interp.quit();
    Ok(Primitive::Void)
}

fn save(interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    let path = args.scope()?;
    let file = args.value()?.to_text();
    let lines = persist::write_lines_for(interp.root().scope(&path)?);
    persist::write_file(FilePath::new(&file), &lines)?;
    tracing::info!(scope = %path, file, lines = lines.len(), "saved");
    Ok(Primitive::Void)
}

fn load(interp: &mut Interpreter, mut args: ArgList) -> Result<Primitive, Error> {
    let file = args.value()?.to_text();
    let into = args.optional_scope()?.unwrap_or_else(|| interp.cursor().clone());
    let lines = persist::read_file(FilePath::new(&file))?;
    tracing::info!(scope = %into, file, lines = lines.len(), "loading");

    let previous = interp.cursor().clone();
    interp.set_cursor(into)?;
    let result = interp.run_lines(&file, &lines, &[]);
    if let Err(err) = interp.set_cursor(previous) {
        tracing::warn!(error = %err, "could not restore the current scope after loading");
        interp.set_cursor(Path::root())?;
    }
    result.map(|_| Primitive::Void)
}

//
// Deferred commands
//

fn condition(interp: &mut Interpreter, expr: &Value) -> Result<bool, Error> {
    let value = expr.evaluate(interp, &[])?;
    value
        .to_boolean()
        .map_err(|err| Error::evaluation(expr, err.into()))
}

fn if_command(interp: &mut Interpreter, args: &[Value]) -> Result<Primitive, Error> {
    let branch = if condition(interp, &args[0])? {
        args.get(1)
    } else {
        args.get(2)
    };
    match branch {
        Some(branch) => branch.evaluate(interp, &[]),
        None => Ok(Primitive::Void),
    }
}

fn while_command(interp: &mut Interpreter, args: &[Value]) -> Result<Primitive, Error> {
    let (test, body) = (&args[0], &args[1..]);
    while interp.is_running() && condition(interp, test)? {
        for statement in body {
            statement.evaluate(interp, &[])?;
        }
    }
    Ok(Primitive::Void)
}

fn for_command(interp: &mut Interpreter, args: &[Value]) -> Result<Primitive, Error> {
    let location = target(interp, &args[0])?;
    let from = bound(interp, &args[1])?;
    let to = bound(interp, &args[2])?;
    let body = &args[3..];
    let step: NumberType = if from <= to { 1.0 } else { -1.0 };

    let mut i = from;
    while interp.is_running() && (if step > 0.0 { i <= to } else { i >= to }) {
        interp
            .root_mut()
            .scope_mut(&location.parent)?
            .assign(&location.name, Value::Primitive(Primitive::Number(i)));
        for statement in body {
            statement.evaluate(interp, &[])?;
        }
        i += step;
    }
    Ok(Primitive::Void)
}

fn bound(interp: &mut Interpreter, expr: &Value) -> Result<NumberType, Error> {
    match expr.evaluate(interp, &[])? {
        Primitive::Number(n) => Ok(n),
        other => Err(Error::Unevaluable {
            expression: expr.to_string(),
            reason: format!("a loop bound must be a number, not {}", other.kind()),
        }),
    }
}

fn run(interp: &mut Interpreter, args: &[Value]) -> Result<Primitive, Error> {
    let file = args[0].evaluate(interp, &[])?.to_text();
    interp.run_file(FilePath::new(&file), &args[1..])
}

/// Central registry of all built-in commands
static BUILTIN_OPS: &[BuiltinOp] = &[
    BuiltinOp {
        name: "set",
        synonyms: &["assign"],
        discipline: Discipline::Eager(set),
        arity: Arity::Exact(2),
        params: &[ParamKind::Target, ParamKind::Value],
        usage: "set <variable>, <value>: assign a value, creating the variable if needed",
    },
    BuiltinOp {
        name: "create",
        synonyms: &["new"],
        discipline: Discipline::Eager(create),
        arity: Arity::Exact(1),
        params: &[ParamKind::Target],
        usage: "create <name>: add an empty collection",
    },
    BuiltinOp {
        name: "remove",
        synonyms: &["rm", "delete"],
        discipline: Discipline::Eager(remove),
        arity: Arity::Exact(1),
        params: &[ParamKind::Target],
        usage: "remove <name>: delete a variable or collection",
    },
    BuiltinOp {
        name: "copy",
        synonyms: &["cp"],
        discipline: Discipline::Eager(copy),
        arity: Arity::Exact(2),
        params: &[ParamKind::Target, ParamKind::Target],
        usage: "copy <source>, <destination>: duplicate a variable or collection",
    },
    BuiltinOp {
        name: "move",
        synonyms: &["mv"],
        discipline: Discipline::Eager(move_slot),
        arity: Arity::Exact(2),
        params: &[ParamKind::Target, ParamKind::Target],
        usage: "move <source>, <destination>: rename or relocate a variable or collection",
    },
    BuiltinOp {
        name: "list",
        synonyms: &["ls"],
        discipline: Discipline::Eager(list),
        arity: Arity::Range(0, 3),
        params: &[ParamKind::Scope, ParamKind::Value, ParamKind::Value],
        usage: "list [collection], [recurse], [hidden]: show the variables of a collection",
    },
    BuiltinOp {
        name: "clear",
        synonyms: &[],
        discipline: Discipline::Eager(clear),
        arity: Arity::Range(0, 1),
        params: &[ParamKind::Scope],
        usage: "clear [collection]: remove every variable from a collection",
    },
    BuiltinOp {
        name: "sort",
        synonyms: &[],
        discipline: Discipline::Eager(sort),
        arity: Arity::Range(0, 2),
        params: &[ParamKind::Scope, ParamKind::Value],
        usage: "sort [collection], [descending]: order a collection by value",
    },
    BuiltinOp {
        name: "print",
        synonyms: &["echo"],
        discipline: Discipline::Eager(print),
        arity: Arity::Any,
        params: &[ParamKind::Value],
        usage: "print <values>...: write values separated by spaces",
    },
    BuiltinOp {
        name: "text",
        synonyms: &[],
        discipline: Discipline::Eager(text),
        arity: Arity::Exact(1),
        params: &[ParamKind::Value],
        usage: "text <value>: the text form of a value",
    },
    BuiltinOp {
        name: "void",
        synonyms: &[],
        discipline: Discipline::Eager(void),
        arity: Arity::Any,
        params: &[ParamKind::Value],
        usage: "void <values>...: evaluate and discard",
    },
    BuiltinOp {
        name: "env",
        synonyms: &["cd"],
        discipline: Discipline::Eager(env),
        arity: Arity::Range(0, 1),
        params: &[ParamKind::Scope],
        usage: "env [collection]: make a collection the current one (none: the root)",
    },
    BuiltinOp {
        name: "save",
        synonyms: &[],
        discipline: Discipline::Eager(save),
        arity: Arity::Exact(2),
        params: &[ParamKind::Scope, ParamKind::Value],
        usage: "save <collection>, <file>: write a collection as replayable lines",
    },
    BuiltinOp {
        name: "load",
        synonyms: &[],
        discipline: Discipline::Eager(load),
        arity: Arity::Range(1, 2),
        params: &[ParamKind::Value, ParamKind::Scope],
        usage: "load <file>, [collection]: replay a saved file into a collection",
    },
    BuiltinOp {
        name: "quit",
        synonyms: &["exit"],
        discipline: Discipline::Eager(quit),
        arity: Arity::Exact(0),
        params: &[],
        usage: "quit: end the session",
    },
    BuiltinOp {
        name: "if",
        synonyms: &[],
        discipline: Discipline::Deferred(if_command),
        arity: Arity::Range(2, 3),
        params: &[],
        usage: "if <condition>, <then>, [else]: evaluate one branch",
    },
    BuiltinOp {
        name: "while",
        synonyms: &[],
        discipline: Discipline::Deferred(while_command),
        arity: Arity::AtLeast(1),
        params: &[],
        usage: "while <condition>, <body>...: repeat the body while the condition holds",
    },
    BuiltinOp {
        name: "for",
        synonyms: &[],
        discipline: Discipline::Deferred(for_command),
        arity: Arity::AtLeast(3),
        params: &[],
        usage: "for <variable>, <from>, <to>, <body>...: count from one bound to the other",
    },
    BuiltinOp {
        name: "run",
        synonyms: &[],
        discipline: Discipline::Deferred(run),
        arity: Arity::AtLeast(1),
        params: &[],
        usage: "run <file>, <arguments>...: execute a script with $0, $1, ... bound",
    },
];

/// Lookup map from every command name and synonym to its definition
static BUILTIN_BY_NAME: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| {
        BUILTIN_OPS
            .iter()
            .flat_map(|op| op.names().map(move |name| (name, op)))
            .collect()
    });

/// Find a built-in command by its name or a synonym
pub fn find_builtin(name: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_NAME.get(name).copied()
}

/// Get all built-in commands
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::SessionConfig;
    use crate::ast::{val, var};
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Captured(Rc<RefCell<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn take(&self) -> String {
            String::from_utf8(std::mem::take(&mut *self.0.borrow_mut())).unwrap()
        }
    }

    fn session() -> (Interpreter, Captured) {
        let out = Captured::default();
        let interp = Interpreter::with_output(SessionConfig::detached(), Box::new(out.clone()));
        (interp, out)
    }

    fn run_all(interp: &mut Interpreter, lines: &[&str]) {
        for line in lines {
            interp
                .execute_line(line)
                .unwrap_or_else(|e| panic!("'{line}' failed: {e}"));
        }
    }

    #[test]
    fn test_registry_names_and_synonyms() {
        for name in ["set", "assign", "rm", "delete", "cd", "exit", "echo", "run"] {
            assert!(find_builtin(name).is_some(), "missing builtin {name}");
        }
        assert!(find_builtin("lambda").is_none());

        assert_eq!(find_builtin("mv"), find_builtin("move"));
        assert!(find_builtin("while").unwrap().is_deferred());
        assert!(!find_builtin("print").unwrap().is_deferred());

        // Every name is installed exactly once
        let total: usize = get_builtin_ops().iter().map(|op| op.names().count()).sum();
        assert_eq!(BUILTIN_BY_NAME.len(), total);
    }

    #[test]
    fn test_param_kinds_repeat_the_last() {
        let print = find_builtin("print").unwrap();
        assert_eq!(print.param_kind(0), ParamKind::Value);
        assert_eq!(print.param_kind(7), ParamKind::Value);

        let load = find_builtin("load").unwrap();
        assert_eq!(load.param_kind(0), ParamKind::Value);
        assert_eq!(load.param_kind(1), ParamKind::Scope);
    }

    #[test]
    fn test_arity_validation() {
        use Arity::*;

        Exact(2).validate("f", 2).unwrap();
        Exact(2).validate("f", 1).unwrap_err();
        Exact(2).validate("f", 3).unwrap_err();

        AtLeast(1).validate("f", 1).unwrap();
        AtLeast(1).validate("f", 2).unwrap();
        AtLeast(1).validate("f", 0).unwrap_err();

        Range(1, 3).validate("f", 1).unwrap();
        Range(1, 3).validate("f", 3).unwrap();
        Range(1, 3).validate("f", 0).unwrap_err();
        Range(1, 3).validate("f", 4).unwrap_err();

        Any.validate("f", 0).unwrap();
        Any.validate("f", 100).unwrap();

        match Exact(2).validate("set", 1).unwrap_err() {
            Error::Arity {
                command,
                expected,
                got,
            } => {
                assert_eq!(command, "set");
                assert_eq!(expected, "exactly 2");
                assert_eq!(got, 1);
            }
            other => panic!("Expected an arity error, got {other:?}"),
        }
    }

    #[test]
    fn test_arity_is_checked_before_reduction() {
        let (mut interp, _) = session();
        // The argument would fail to evaluate; the arity error comes first.
        let err = interp.execute_line("quit missing").unwrap_err();
        assert!(matches!(err, Error::Arity { .. }), "got {err:?}");
        assert!(interp.is_running());
    }

    #[test]
    fn test_copy_is_deep_and_move_relocates() {
        let (mut interp, _) = session();
        run_all(
            &mut interp,
            &[
                "create a",
                "set a.hp, 12",
                "copy a, b",
                "set a.hp, 1",
                "move b, c",
            ],
        );
        assert_eq!(interp.execute_line("c.hp").unwrap(), Primitive::Number(12.0));
        assert_eq!(interp.execute_line("a.hp").unwrap(), Primitive::Number(1.0));
        assert!(interp.execute_line("b").is_err());

        let moved = interp.root().scope(&Path::root().child("c")).unwrap();
        assert_eq!(moved.path().to_string(), "root.c");

        let err = interp.execute_line("copy a, c").unwrap_err();
        assert!(err.to_string().contains("already exists"));
        let err = interp.execute_line("move a, a.inner").unwrap_err();
        assert!(err.to_string().contains("into itself"));
        let err = interp.execute_line("remove nothing").unwrap_err();
        assert!(err.to_string().contains("No variable nothing exists in root."));
    }

    #[test]
    fn test_set_refuses_to_shadow_commands() {
        let (mut interp, _) = session();
        let err = interp.execute_line("set print, 5").unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(matches!(
            interp.root().lookup("print"),
            Some(Value::Command(_))
        ));
    }

    #[test]
    fn test_commands_can_not_be_removed_or_moved() {
        let (mut interp, _) = session();
        let err = interp.execute_line("remove set").unwrap_err();
        assert!(err.to_string().contains("can not be removed or moved"), "{err}");
        let err = interp.execute_line("move print, shout").unwrap_err();
        assert!(err.to_string().contains("can not be removed or moved"), "{err}");

        assert!(matches!(interp.root().lookup("set"), Some(Value::Command(_))));
        assert!(matches!(interp.root().lookup("print"), Some(Value::Command(_))));
        assert!(interp.root().lookup("shout").is_none());
    }

    #[test]
    fn test_list_output() {
        let (mut interp, out) = session();
        run_all(
            &mut interp,
            &[
                "set b, 2",
                "set a, \"x\"",
                "set _secret, 1",
                "create group",
                "set group.hp, 12",
                "list",
            ],
        );
        assert_eq!(out.take(), "b: 2\na: \"x\"\ngroup: {...}\n");

        run_all(&mut interp, &["list group", "create group.inner"]);
        assert_eq!(out.take(), "hp: 12\n");

        let mut lines = Vec::new();
        listing(interp.root(), true, false, 0, &mut lines);
        assert_eq!(
            lines,
            vec!["b: 2", "a: \"x\"", "group:", "   hp: 12", "   inner:"]
        );

        lines.clear();
        listing(interp.root(), false, true, 0, &mut lines);
        assert!(lines.contains(&"_secret: 1".to_owned()));
        assert!(lines.contains(&"set: set".to_owned()));
    }

    #[test]
    fn test_print_text_and_void() {
        let (mut interp, out) = session();
        run_all(&mut interp, &["print \"hp:\", 3, true", "echo(1 + 1)"]);
        assert_eq!(out.take(), "hp: 3 true\n2\n");

        assert_eq!(
            interp.execute_line("text \"a\"").unwrap(),
            Primitive::Text("\"a\"".into())
        );
        assert_eq!(
            interp.execute_line("text 2.5").unwrap(),
            Primitive::Text("2.5".into())
        );
        assert_eq!(
            interp.execute_line("void 1, 2").unwrap(),
            Primitive::Void
        );
        assert!(interp.execute_line("void 1/0").is_err());
    }

    #[test]
    fn test_clear_keeps_commands_and_sort_reorders() {
        let (mut interp, _) = session();
        run_all(
            &mut interp,
            &[
                "create scores",
                "set scores.c, 3",
                "set scores.a, 1",
                "set scores.b, 2",
                "sort scores",
            ],
        );
        let scores = interp.root().scope(&Path::root().child("scores")).unwrap();
        let order: Vec<_> = scores.iter().map(|(name, _)| name).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        run_all(&mut interp, &["sort scores, true"]);
        let scores = interp.root().scope(&Path::root().child("scores")).unwrap();
        let order: Vec<_> = scores.iter().map(|(name, _)| name).collect();
        assert_eq!(order, vec!["c", "b", "a"]);

        let commands = interp.root().len() - 1;
        run_all(&mut interp, &["set x, 1", "clear"]);
        assert_eq!(interp.root().len(), commands);
        assert!(interp.root().lookup("set").is_some());
        assert!(interp.root().lookup("scores").is_none());
    }

    #[test]
    fn test_deferred_commands_see_updates() {
        let (mut interp, out) = session();
        run_all(&mut interp, &["for i, 3, 1, print(i)"]);
        assert_eq!(out.take(), "3\n2\n1\n");

        run_all(&mut interp, &["set n, 2", "while n, print(n), set(n, n - 1)"]);
        assert_eq!(out.take(), "2\n1\n");

        let err = interp.execute_line("for 5, 1, 2, void").unwrap_err();
        assert!(err.to_string().contains("does not name a variable"));
        let err = interp.execute_line("for k, \"a\", 2").unwrap_err();
        assert!(err.to_string().contains("must be a number"));
    }

    #[test]
    fn test_quit_stops_loops() {
        let (mut interp, _) = session();
        interp.execute_line("while true, quit").unwrap();
        assert!(!interp.is_running());
    }

    #[test]
    fn test_deferred_arguments_are_trees() {
        let (mut interp, _) = session();
        let cmd = match interp.root().lookup("if").unwrap() {
            Value::Command(cmd) => *cmd,
            other => panic!("expected a command, got {other:?}"),
        };
        // The untaken branch would fail if it were reduced eagerly.
        let result = cmd
            .invoke(&mut interp, &[val(true), val(1), var("missing")])
            .unwrap();
        assert_eq!(result, Primitive::Number(1.0));
    }
}
