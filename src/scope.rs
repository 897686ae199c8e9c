//! The hierarchical scope store.
//!
//! A [`Scope`] is an ordered mapping from names to [`Value`]s. Nested scopes live
//! inside their parent's slots (as [`Value::Container`]), so the whole store is one tree
//! owned top-down by the root scope. Each scope remembers its [`Path`] from the root
//! for diagnostics and for addressing it again later; it never holds its parent.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;

use crate::DataError;
use crate::ast::Value;

/// Root-to-scope sequence of names. The empty path is the root scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path {
    names: Vec<String>,
}

impl Path {
    pub fn root() -> Self {
        Path::default()
    }

    pub fn is_root(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The path of a slot named `name` inside the scope at this path
    pub fn child(&self, name: &str) -> Path {
        let mut names = self.names.clone();
        names.push(name.to_owned());
        Path { names }
    }

    pub fn parent(&self) -> Option<Path> {
        let (_, parent) = self.names.split_last()?;
        Some(Path {
            names: parent.to_vec(),
        })
    }

    pub fn last(&self) -> Option<&str> {
        self.names.last().map(String::as_str)
    }

    /// Check whether `self` is `other` or lies beneath it
    pub fn starts_with(&self, other: &Path) -> bool {
        self.names.starts_with(&other.names)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root")?;
        for name in &self.names {
            write!(f, ".{name}")?;
        }
        Ok(())
    }
}

/// The place an assignment-like command writes to: a scope and a name inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub parent: Path,
    pub name: String,
}

impl Location {
    pub fn path(&self) -> Path {
        self.parent.child(&self.name)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Ordered namespace of slots
#[derive(Debug, Clone, Default)]
pub struct Scope {
    path: Path,
    slots: IndexMap<String, Value>,
}

impl Scope {
    /// Create an empty root scope
    pub fn new() -> Self {
        Scope::default()
    }

    /// Create an empty scope that will live at `path`
    pub fn nested(path: Path) -> Self {
        Scope {
            path,
            slots: IndexMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Local-only lookup; parents are never searched.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.slots.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Add a new slot at the end. Returns `false` without touching the scope if
    /// the name is already taken.
    pub fn insert(&mut self, name: &str, mut value: Value) -> bool {
        if self.slots.contains_key(name) {
            return false;
        }
        rebase(&mut value, self.path.child(name));
        self.slots.insert(name.to_owned(), value);
        true
    }

    /// Create or overwrite a slot. An existing slot keeps its position.
    pub fn assign(&mut self, name: &str, mut value: Value) {
        rebase(&mut value, self.path.child(name));
        self.slots.insert(name.to_owned(), value);
    }

    /// Remove a slot, preserving the order of the remaining ones
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.slots.shift_remove(name)
    }

    /// Slots in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slots.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Keep only the slots for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &Value) -> bool) {
        self.slots.retain(|name, value| keep(name, value));
    }

    /// Reorder slots by their values, names breaking ties
    pub fn sort(&mut self, descending: bool) {
        self.slots.sort_by(|name_a, a, name_b, b| {
            let ordering = a.compare(b).then_with(|| name_a.cmp(name_b));
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    /// Find the scope at an absolute `path`, descending from this (root) scope.
    pub fn scope(&self, path: &Path) -> Result<&Scope, DataError> {
        let mut current = self;
        for name in path.names() {
            current = match current.slots.get(name) {
                Some(Value::Container(scope)) => scope,
                Some(_) => {
                    return Err(DataError::NotAContainer {
                        path: current.path.child(name),
                    });
                }
                None => {
                    return Err(DataError::Missing {
                        path: current.path.clone(),
                        name: name.clone(),
                    });
                }
            };
        }
        Ok(current)
    }

    /// Mutable counterpart of [`Scope::scope`]
    pub fn scope_mut(&mut self, path: &Path) -> Result<&mut Scope, DataError> {
        let mut current = self;
        for name in path.names() {
            let here = current.path.clone();
            current = match current.slots.get_mut(name) {
                Some(Value::Container(scope)) => scope,
                Some(_) => {
                    return Err(DataError::NotAContainer {
                        path: here.child(name),
                    });
                }
                None => {
                    return Err(DataError::Missing {
                        path: here,
                        name: name.clone(),
                    });
                }
            };
        }
        Ok(current)
    }

    /// The value stored at `location`
    pub fn get(&self, location: &Location) -> Result<&Value, DataError> {
        let parent = self.scope(&location.parent)?;
        parent
            .lookup(&location.name)
            .ok_or_else(|| DataError::Missing {
                path: parent.path.clone(),
                name: location.name.clone(),
            })
    }

    /// Structural ordering of two scopes: slot by slot, then by size.
    pub fn compare(&self, other: &Scope) -> Ordering {
        self.iter()
            .zip(other.iter())
            .map(|((name_a, a), (name_b, b))| name_a.cmp(name_b).then_with(|| a.compare(b)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| self.len().cmp(&other.len()))
    }
}

/// Equality of contents in order; the scope's own location does not matter.
impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((name_a, a), (name_b, b))| name_a == name_b && a == b)
    }
}

/// Point a container (and everything beneath it) at its new position in the tree.
fn rebase(value: &mut Value, path: Path) {
    if let Value::Container(scope) = value {
        for (name, child) in scope.slots.iter_mut() {
            rebase(child, path.child(name));
        }
        scope.path = path;
    }
}
