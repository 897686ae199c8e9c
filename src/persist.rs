//! Saving scopes as replayable lines.
//!
//! A saved scope is a script: one `set` line per primitive slot and one `create` line
//! per nested container, followed by that container's own lines under a dotted prefix.
//! Loading replays the script with the target scope as the current one.

use std::fs;
use std::path::Path as FilePath;

use crate::Error;
use crate::ast::Value;
use crate::scope::Scope;

/// The lines that rebuild the contents of `scope` when replayed inside an empty
/// scope. Built-in commands are not saved.
pub fn write_lines_for(scope: &Scope) -> Vec<String> {
    let mut lines = Vec::new();
    write_into(scope, "", &mut lines);
    lines
}

fn write_into(scope: &Scope, prefix: &str, lines: &mut Vec<String>) {
    for (name, value) in scope.iter() {
        match value {
            Value::Primitive(p) => lines.push(format!("set {prefix}{name}, {p}")),
            Value::Container(inner) => {
                lines.push(format!("create {prefix}{name}"));
                write_into(inner, &format!("{prefix}{name}."), lines);
            }
            Value::Command(_) => {}
            // Only primitives, containers and commands are ever stored
            other => tracing::warn!(name, value = %other, "skipping unsaveable value"),
        }
    }
}

/// Split a script into its non-blank lines
pub fn read_lines(source: &str) -> Vec<String> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn read_file(path: &FilePath) -> Result<Vec<String>, Error> {
    let source = fs::read_to_string(path).map_err(|err| io_error(path, &err))?;
    Ok(read_lines(&source))
}

pub fn write_file(path: &FilePath, lines: &[String]) -> Result<(), Error> {
    let mut contents = lines.join("\n");
    contents.push('\n');
    fs::write(path, contents).map_err(|err| io_error(path, &err))
}

fn io_error(path: &FilePath, err: &std::io::Error) -> Error {
    Error::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
