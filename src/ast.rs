//! This module defines the value types the interpreter works with. [`Primitive`] covers
//! the leaf data (numbers, text, booleans and void) together with its pure arithmetic
//! and comparison operations. [`Value`] is the expression tree built by the parser and
//! also the content of every slot in the scope store: literals, references, positional
//! argument placeholders, binary operators, invocations, nested scopes and commands.
//! Display renders the canonical text form, which the parser reads back.

use std::cmp::Ordering;
use std::fmt;

use crate::ComputationError;
use crate::builtinops::Command;
use crate::scope::Scope;

/// Type alias for number values in interpreter
pub(crate) type NumberType = f64;

/// The primitive kinds, in their total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Number,
    Text,
    Boolean,
    Void,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Number => "number",
            Kind::Text => "text",
            Kind::Boolean => "boolean",
            Kind::Void => "void",
        };
        write!(f, "{name}")
    }
}

/// Concrete leaf data. Primitives are immutable; every operation builds a new one.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Number(NumberType),
    Text(String),
    Boolean(bool),
    /// The "no result" marker
    Void,
}

impl Primitive {
    pub fn kind(&self) -> Kind {
        match self {
            Primitive::Number(_) => Kind::Number,
            Primitive::Text(_) => Kind::Text,
            Primitive::Boolean(_) => Kind::Boolean,
            Primitive::Void => Kind::Void,
        }
    }

    /// Numeric addition, or concatenation as soon as one side is text.
    pub fn add(&self, other: &Primitive) -> Result<Primitive, ComputationError> {
        match (self, other) {
            (Primitive::Number(a), Primitive::Number(b)) => finite("+", *a, *b, a + b),
            (Primitive::Text(a), Primitive::Text(b)) => Ok(Primitive::Text(format!("{a}{b}"))),
            (Primitive::Text(a), Primitive::Number(b)) => Ok(Primitive::Text(format!("{a}{b}"))),
            (Primitive::Number(a), Primitive::Text(b)) => Ok(Primitive::Text(format!("{a}{b}"))),
            _ => Err(self.mismatch("+", other)),
        }
    }

    pub fn subtract(&self, other: &Primitive) -> Result<Primitive, ComputationError> {
        match (self, other) {
            (Primitive::Number(a), Primitive::Number(b)) => finite("-", *a, *b, a - b),
            _ => Err(self.mismatch("-", other)),
        }
    }

    pub fn multiply(&self, other: &Primitive) -> Result<Primitive, ComputationError> {
        match (self, other) {
            (Primitive::Number(a), Primitive::Number(b)) => finite("*", *a, *b, a * b),
            _ => Err(self.mismatch("*", other)),
        }
    }

    pub fn divide(&self, other: &Primitive) -> Result<Primitive, ComputationError> {
        match (self, other) {
            (Primitive::Number(a), Primitive::Number(b)) if *b == 0.0 => {
                Err(ComputationError::DivisionByZero {
                    dividend: a.to_string(),
                })
            }
            (Primitive::Number(a), Primitive::Number(b)) => finite("/", *a, *b, a / b),
            _ => Err(self.mismatch("/", other)),
        }
    }

    /// Total order: by kind first (number < text < boolean < void), then naturally.
    pub fn compare(&self, other: &Primitive) -> Ordering {
        match (self, other) {
            (Primitive::Number(a), Primitive::Number(b)) => a.total_cmp(b),
            (Primitive::Text(a), Primitive::Text(b)) => a.cmp(b),
            (Primitive::Boolean(a), Primitive::Boolean(b)) => a.cmp(b),
            _ => self.kind().cmp(&other.kind()),
        }
    }

    /// Booleans as they are, numbers by being non-zero. Text and void are not conditions.
    pub fn to_boolean(&self) -> Result<bool, ComputationError> {
        match self {
            Primitive::Boolean(b) => Ok(*b),
            Primitive::Number(n) => Ok(*n != 0.0),
            other => Err(ComputationError::NotABoolean { kind: other.kind() }),
        }
    }

    /// Text is returned raw; everything else renders its text form.
    pub fn to_text(&self) -> String {
        match self {
            Primitive::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn mismatch(&self, op: &'static str, other: &Primitive) -> ComputationError {
        ComputationError::Mismatch {
            op,
            lhs: self.kind(),
            rhs: other.kind(),
        }
    }
}

fn finite(
    op: &'static str,
    lhs: NumberType,
    rhs: NumberType,
    result: NumberType,
) -> Result<Primitive, ComputationError> {
    if result.is_finite() {
        Ok(Primitive::Number(result))
    } else {
        Err(ComputationError::NotFinite {
            op,
            lhs: lhs.to_string(),
            rhs: rhs.to_string(),
        })
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Number(n) => write!(f, "{n}"),
            Primitive::Text(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Primitive::Boolean(b) => write!(f, "{b}"),
            Primitive::Void => write!(f, "void"),
        }
    }
}

/// Binary operators. Arithmetic ones coerce their operands through the matching
/// capability; comparisons fully evaluate both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
        }
    }

    /// Node name used to order values of different kinds.
    pub fn type_name(self) -> &'static str {
        match self {
            BinaryOp::Add => "sum",
            BinaryOp::Subtract => "difference",
            BinaryOp::Multiply => "product",
            BinaryOp::Divide => "quotient",
            BinaryOp::Equal | BinaryOp::NotEqual => "equality",
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                "comparison"
            }
        }
    }

    pub fn is_comparison(self) -> bool {
        !matches!(
            self,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide
        )
    }

    /// Apply the operator to two reduced operands.
    pub fn apply(self, lhs: &Primitive, rhs: &Primitive) -> Result<Primitive, ComputationError> {
        let ordering = || lhs.compare(rhs);
        match self {
            BinaryOp::Add => lhs.add(rhs),
            BinaryOp::Subtract => lhs.subtract(rhs),
            BinaryOp::Multiply => lhs.multiply(rhs),
            BinaryOp::Divide => lhs.divide(rhs),
            BinaryOp::Equal => Ok(Primitive::Boolean(ordering().is_eq())),
            BinaryOp::NotEqual => Ok(Primitive::Boolean(ordering().is_ne())),
            BinaryOp::Less => Ok(Primitive::Boolean(ordering().is_lt())),
            BinaryOp::LessEqual => Ok(Primitive::Boolean(ordering().is_le())),
            BinaryOp::Greater => Ok(Primitive::Boolean(ordering().is_gt())),
            BinaryOp::GreaterEqual => Ok(Primitive::Boolean(ordering().is_ge())),
        }
    }
}

/// A dotted name (`a.b.c`) resolved against the store at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    names: Vec<String>,
}

impl Reference {
    /// Build a reference from its components. An empty reference names nothing
    /// and fails to resolve.
    pub fn new(names: Vec<String>) -> Self {
        Reference { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn first(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names.join("."))
    }
}

/// Core value type: every expression tree node and every stored slot value.
///
/// Trees are immutable once built. `Clone` is the deep copy: a cloned value shares
/// nothing with the original, so it can be stored in a new slot or substituted as an
/// argument independently.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Literal primitive (including the void marker)
    Primitive(Primitive),
    /// Named slot, resolved at evaluation time
    Reference(Reference),
    /// Positional placeholder `$n`, replaced by the n-th invocation argument
    Argument(usize),
    Binary {
        op: BinaryOp,
        lhs: Box<Value>,
        rhs: Box<Value>,
    },
    /// `target(args...)`; a whole input line is an invocation of its head
    Invocation {
        target: Box<Value>,
        args: Vec<Value>,
    },
    /// Nested scope stored in a slot
    Container(Scope),
    /// Built-in command stored in a slot
    Command(Command),
}

impl Value {
    /// Node name used to order values of different kinds.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Primitive(p) => match p.kind() {
                Kind::Number => "number",
                Kind::Text => "text",
                Kind::Boolean => "boolean",
                Kind::Void => "void",
            },
            Value::Reference(_) => "variable",
            Value::Argument(_) => "argument",
            Value::Binary { op, .. } => op.type_name(),
            Value::Invocation { .. } => "invocation",
            Value::Container(_) => "collection",
            Value::Command(_) => "command",
        }
    }

    /// Structural ordering used to sort scope contents.
    ///
    /// Primitives come first in their own total order; every other node kind follows,
    /// ordered by type name, and same-kind nodes compare their primary fields.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Primitive(a), Value::Primitive(b)) => a.compare(b),
            (Value::Primitive(_), _) => Ordering::Less,
            (_, Value::Primitive(_)) => Ordering::Greater,
            (Value::Reference(a), Value::Reference(b)) => a.cmp(b),
            (Value::Argument(a), Value::Argument(b)) => a.cmp(b),
            (
                Value::Binary {
                    op: op_a,
                    lhs: lhs_a,
                    rhs: rhs_a,
                },
                Value::Binary {
                    op: op_b,
                    lhs: lhs_b,
                    rhs: rhs_b,
                },
            ) if op_a.type_name() == op_b.type_name() => lhs_a
                .compare(lhs_b)
                .then_with(|| rhs_a.compare(rhs_b))
                .then_with(|| op_a.symbol().cmp(op_b.symbol())),
            (
                Value::Invocation {
                    target: target_a,
                    args: args_a,
                },
                Value::Invocation {
                    target: target_b,
                    args: args_b,
                },
            ) => target_a.compare(target_b).then_with(|| {
                args_a
                    .iter()
                    .zip(args_b)
                    .map(|(a, b)| a.compare(b))
                    .find(|o| o.is_ne())
                    .unwrap_or_else(|| args_a.len().cmp(&args_b.len()))
            }),
            (Value::Container(a), Value::Container(b)) => a.compare(b),
            (Value::Command(a), Value::Command(b)) => a.name().cmp(b.name()),
            _ => self.type_name().cmp(other.type_name()),
        }
    }

    /// Check whether the tree still contains `$n` placeholders
    pub fn has_arguments(&self) -> bool {
        match self {
            Value::Argument(_) => true,
            Value::Binary { lhs, rhs, .. } => lhs.has_arguments() || rhs.has_arguments(),
            Value::Invocation { target, args } => {
                target.has_arguments() || args.iter().any(Value::has_arguments)
            }
            _ => false,
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<Primitive> for Value {
    fn from(p: Primitive) -> Self {
        Value::Primitive(p)
    }
}

impl From<&str> for Primitive {
    fn from(s: &str) -> Self {
        Primitive::Text(s.to_owned())
    }
}

impl From<String> for Primitive {
    fn from(s: String) -> Self {
        Primitive::Text(s)
    }
}

impl From<bool> for Primitive {
    fn from(b: bool) -> Self {
        Primitive::Boolean(b)
    }
}

macro_rules! impl_from_number {
    ($num_type:ty) => {
        impl From<$num_type> for Primitive {
            fn from(n: $num_type) -> Self {
                Primitive::Number(NumberType::from(n))
            }
        }
    };
}

impl_from_number!(i8);
impl_from_number!(i16);
impl_from_number!(i32);
impl_from_number!(u8);
impl_from_number!(u16);
impl_from_number!(u32);
impl_from_number!(f32);
impl_from_number!(NumberType);

/// Helper function for creating literal Values in tests
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Primitive>>(value: T) -> Value {
    Value::Primitive(value.into())
}

/// Helper function for creating references from dotted text
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn var(dotted: &str) -> Value {
    Value::Reference(Reference::new(
        dotted.split('.').map(str::to_owned).collect(),
    ))
}

/// Helper function for creating binary nodes
pub(crate) fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Value {
    Value::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Primitive(p) => write!(f, "{p}"),
            Value::Reference(r) => write!(f, "{r}"),
            Value::Argument(n) => write!(f, "${n}"),
            Value::Binary { op, lhs, rhs } => write!(f, "({lhs}{}{rhs})", op.symbol()),
            Value::Invocation { target, args } => {
                write!(f, "{target}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Value::Container(_) => write!(f, "{{...}}"),
            Value::Command(cmd) => write!(f, "{}", cmd.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_arithmetic_data_driven() {
        let n = |x: f64| Primitive::Number(x);
        let t = |s: &str| Primitive::Text(s.to_owned());

        let test_cases = vec![
            (n(2.0).add(&n(3.0)), Ok(n(5.0))),
            (n(2.0).subtract(&n(3.0)), Ok(n(-1.0))),
            (n(2.5).multiply(&n(4.0)), Ok(n(10.0))),
            (n(7.0).divide(&n(2.0)), Ok(n(3.5))),
            (t("hp: ").add(&n(12.0)), Ok(t("hp: 12"))),
            (n(12.0).add(&t(" hp")), Ok(t("12 hp"))),
            (t("a").add(&t("b")), Ok(t("ab"))),
            (
                t("a").subtract(&n(1.0)),
                Err(ComputationError::Mismatch {
                    op: "-",
                    lhs: Kind::Text,
                    rhs: Kind::Number,
                }),
            ),
            (
                Primitive::Boolean(true).add(&n(1.0)),
                Err(ComputationError::Mismatch {
                    op: "+",
                    lhs: Kind::Boolean,
                    rhs: Kind::Number,
                }),
            ),
            (
                n(1.0).divide(&n(0.0)),
                Err(ComputationError::DivisionByZero {
                    dividend: "1".to_owned(),
                }),
            ),
        ];

        for (i, (actual, expected)) in test_cases.into_iter().enumerate() {
            assert_eq!(actual, expected, "Test case {} failed", i + 1);
        }
    }

    #[test]
    fn test_division_undoes_multiplication() {
        let samples = [-7.25, -3.0, -0.5, 0.0, 0.1, 1.0, 2.0, 3.3, 1e6, 123_456.789];
        for a in samples {
            for b in samples.iter().copied().filter(|b| *b != 0.0) {
                let a = Primitive::Number(a);
                let b = Primitive::Number(b);
                let Ok(Primitive::Number(back)) = a
                    .multiply(&b)
                    .and_then(|product| product.divide(&b))
                else {
                    panic!("{a} * {b} / {b} did not produce a number");
                };
                let Primitive::Number(expected) = a else {
                    unreachable!()
                };
                assert!(
                    (back - expected).abs() <= 1e-9 * expected.abs().max(1.0),
                    "{expected} came back as {back}"
                );
            }
        }
    }

    #[test]
    fn test_overflow_is_a_computation_error() {
        let huge = Primitive::Number(f64::MAX);
        assert!(matches!(
            huge.multiply(&Primitive::Number(2.0)),
            Err(ComputationError::NotFinite { op: "*", .. })
        ));
    }

    #[test]
    fn test_primitive_total_order() {
        let mut values = vec![
            Primitive::Void,
            Primitive::Boolean(true),
            Primitive::Text("b".into()),
            Primitive::Number(10.0),
            Primitive::Boolean(false),
            Primitive::Text("a".into()),
            Primitive::Number(-1.0),
        ];
        values.sort_by(Primitive::compare);
        assert_eq!(
            values,
            vec![
                Primitive::Number(-1.0),
                Primitive::Number(10.0),
                Primitive::Text("a".into()),
                Primitive::Text("b".into()),
                Primitive::Boolean(false),
                Primitive::Boolean(true),
                Primitive::Void,
            ]
        );
    }

    #[test]
    fn test_to_boolean_and_text() {
        assert_eq!(Primitive::Boolean(false).to_boolean(), Ok(false));
        assert_eq!(Primitive::Number(3.0).to_boolean(), Ok(true));
        assert_eq!(Primitive::Number(0.0).to_boolean(), Ok(false));
        assert!(Primitive::Text("yes".into()).to_boolean().is_err());
        assert!(Primitive::Void.to_boolean().is_err());

        assert_eq!(Primitive::Text("raw".into()).to_text(), "raw");
        assert_eq!(Primitive::Number(2.5).to_text(), "2.5");
        assert_eq!(Primitive::Boolean(true).to_text(), "true");
    }

    #[test]
    fn test_text_forms() {
        let test_cases = vec![
            (val(5), "5"),
            (val(-2.5), "-2.5"),
            (val("say \"hi\"\n"), r#""say \"hi\"\n""#),
            (val(true), "true"),
            (Value::Primitive(Primitive::Void), "void"),
            (var("group.hp"), "group.hp"),
            (Value::Argument(2), "$2"),
            (binary(BinaryOp::Divide, val(1), val(0)), "(1/0)"),
            (
                binary(
                    BinaryOp::Less,
                    binary(BinaryOp::Add, var("x"), val(1)),
                    val(3),
                ),
                "((x+1)<3)",
            ),
            (
                Value::Invocation {
                    target: Box::new(var("print")),
                    args: vec![var("x"), val("y")],
                },
                r#"print(x, "y")"#,
            ),
        ];

        for (value, expected) in test_cases {
            assert_eq!(value.to_string(), expected);
        }
    }

    #[test]
    fn test_value_compare_is_total_across_kinds() {
        let mut values = vec![
            var("zeta"),
            val("text"),
            Value::Argument(0),
            val(false),
            binary(BinaryOp::Add, val(1), val(2)),
            val(3),
            var("alpha"),
        ];
        values.sort_by(Value::compare);
        assert_eq!(
            values,
            vec![
                val(3),
                val("text"),
                val(false),
                Value::Argument(0),
                binary(BinaryOp::Add, val(1), val(2)),
                var("alpha"),
                var("zeta"),
            ]
        );
    }

    #[test]
    fn test_clone_is_independent() {
        let original = binary(BinaryOp::Multiply, var("a"), val(2));
        let mut copy = original.clone();
        assert_eq!(copy, original);
        if let Value::Binary { rhs, .. } = &mut copy {
            **rhs = val(3);
        }
        assert_ne!(copy, original);
        assert_eq!(original.to_string(), "(a*2)");
    }
}
