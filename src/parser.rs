//! Input line parser.
//!
//! ```text
//! line       := atom ' '+ expression ( ',' expression )*
//!             | expression ( ','? expression ( ',' expression )* )?
//! expression := additive ( ('==' | '!=' | '<=' | '>=' | '<' | '>') additive )?
//! additive   := term ( ('+' | '-') term )*
//! term       := unary ( ('*' | '/') unary )*
//! unary      := '-' unary | atom
//! atom       := number | text | '$' digits | '(' expression ')'
//!             | 'true' | 'false' | reference ( '(' arguments ')' )?
//! reference  := identifier ( '.' identifier )*
//! ```
//!
//! A head followed by a space passes what comes next as its first argument unless
//! that starts with a binary operator: `print -5` prints minus five, while `x - 5`
//! and `x -` followed by a space are subtractions.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, multispace1, satisfy},
    combinator::{cut, opt, recognize, value},
    error::ErrorKind,
    multi::{many0, separated_list0, separated_list1},
    sequence::{pair, preceded, terminated},
};

use crate::ast::{BinaryOp, NumberType, Primitive, Reference, Value, binary};
use crate::{MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Parser options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseConfig {
    /// Treat `#` outside of text as the start of a comment running to end of line
    pub handle_comments: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
        }
    }
}

/// One parsed input line: a head expression and its arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub head: Value,
    pub args: Vec<Value>,
}

impl Line {
    /// The line as a single invocation of its head
    pub fn into_invocation(self) -> Value {
        Value::Invocation {
            target: Box::new(self.head),
            args: self.args,
        }
    }
}

fn failure<T>(input: &str, kind: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Failure(nom::error::Error::new(input, kind)))
}

/// Parse a number: digits with an optional fractional part
fn parse_number(input: &str) -> IResult<&str, Value> {
    let (rest, digits) = recognize(pair(digit1, opt(pair(char('.'), digit1)))).parse(input)?;
    match digits.parse::<NumberType>() {
        Ok(n) if n.is_finite() => Ok((rest, Value::Primitive(Primitive::Number(n)))),
        _ => failure(input, ErrorKind::Float),
    }
}

/// Parse a text literal. Anything after the opening quote is committed.
fn parse_text(input: &str) -> IResult<&str, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut chars = remaining.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), Value::Primitive(Primitive::Text(text)))),
            Some('\\') => {
                match chars.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(_) => return failure(remaining, ErrorKind::Escaped),
                    // Backslash at the end of input
                    None => return failure(chars.as_str(), ErrorKind::Char),
                }
                remaining = chars.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = chars.as_str();
            }
            None => return failure(remaining, ErrorKind::Char),
        }
    }
}

/// Parse a positional placeholder `$n`
fn parse_argument(input: &str) -> IResult<&str, Value> {
    let (rest, digits) = preceded(char('$'), cut(digit1)).parse(input)?;
    match digits.parse::<usize>() {
        Ok(n) => Ok((rest, Value::Argument(n))),
        Err(_) => failure(input, ErrorKind::Digit),
    }
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

/// Parse a literal keyword, a reference, or an invocation `name(args...)`
fn parse_named(input: &str, depth: usize) -> IResult<&str, Value> {
    let (input, names) = separated_list1(char('.'), parse_identifier).parse(input)?;

    if let [single] = names.as_slice() {
        match *single {
            "true" => return Ok((input, Value::Primitive(Primitive::Boolean(true)))),
            "false" => return Ok((input, Value::Primitive(Primitive::Boolean(false)))),
            _ => {}
        }
    }

    let reference = Value::Reference(Reference::new(
        names.into_iter().map(str::to_owned).collect(),
    ));

    // The opening parenthesis must follow the name directly
    let (input, args) = opt(preceded(
        char('('),
        cut(terminated(
            separated_list0(preceded(multispace0, char(',')), |input| {
                parse_expression(input, depth + 1)
            }),
            preceded(multispace0, char(')')),
        )),
    ))
    .parse(input)?;

    match args {
        Some(args) => Ok((
            input,
            Value::Invocation {
                target: Box::new(reference),
                args,
            },
        )),
        None => Ok((input, reference)),
    }
}

fn parse_parenthesized(input: &str, depth: usize) -> IResult<&str, Value> {
    preceded(
        char('('),
        cut(terminated(
            |input| parse_expression(input, depth + 1),
            preceded(multispace0, char(')')),
        )),
    )
    .parse(input)
}

fn parse_atom(input: &str, depth: usize) -> IResult<&str, Value> {
    preceded(
        multispace0,
        alt((
            parse_number,
            parse_text,
            parse_argument,
            |input| parse_parenthesized(input, depth),
            |input| parse_named(input, depth),
        )),
    )
    .parse(input)
}

fn parse_unary(input: &str, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return failure(input, ErrorKind::TooLarge);
    }
    let (rest, minus) = opt(preceded(multispace0, char('-'))).parse(input)?;
    if minus.is_none() {
        return parse_atom(input, depth);
    }
    let (rest, operand) = cut(|input| parse_unary(input, depth + 1)).parse(rest)?;
    let negated = match operand {
        Value::Primitive(Primitive::Number(n)) => Value::Primitive(Primitive::Number(-n)),
        other => binary(BinaryOp::Subtract, Value::Primitive(Primitive::Number(0.0)), other),
    };
    Ok((rest, negated))
}

fn parse_term(input: &str, depth: usize) -> IResult<&str, Value> {
    let operator = alt((
        value(BinaryOp::Multiply, char('*')),
        value(BinaryOp::Divide, char('/')),
    ));
    parse_left_associative(input, depth, operator, parse_unary)
}

fn parse_additive(input: &str, depth: usize) -> IResult<&str, Value> {
    let operator = alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Subtract, char('-')),
    ));
    parse_left_associative(input, depth, operator, parse_term)
}

/// Fold `operand (operator operand)*` to the left
fn parse_left_associative<'a>(
    input: &'a str,
    depth: usize,
    mut operator: impl Parser<&'a str, Output = BinaryOp, Error = nom::error::Error<&'a str>>,
    operand: fn(&'a str, usize) -> IResult<&'a str, Value>,
) -> IResult<&'a str, Value> {
    let (mut input, mut lhs) = operand(input, depth)?;
    loop {
        let (rest, op) = opt(preceded(multispace0, |i| operator.parse(i))).parse(input)?;
        let Some(op) = op else {
            return Ok((input, lhs));
        };
        let (rest, rhs) = cut(|input| operand(input, depth)).parse(rest)?;
        lhs = binary(op, lhs, rhs);
        input = rest;
    }
}

fn parse_comparison_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Equal, tag("==")),
        value(BinaryOp::NotEqual, tag("!=")),
        value(BinaryOp::LessEqual, tag("<=")),
        value(BinaryOp::GreaterEqual, tag(">=")),
        value(BinaryOp::Less, tag("<")),
        value(BinaryOp::Greater, tag(">")),
    ))
    .parse(input)
}

/// Parse one expression; comparisons do not chain
fn parse_expression(input: &str, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return failure(input, ErrorKind::TooLarge);
    }
    let (input, lhs) = parse_additive(input, depth)?;
    let (input, comparison) = opt(pair(
        preceded(multispace0, parse_comparison_op),
        cut(|input| parse_additive(input, depth)),
    ))
    .parse(input)?;
    match comparison {
        Some((op, rhs)) => Ok((input, binary(op, lhs, rhs))),
        None => Ok((input, lhs)),
    }
}

/// Whether `input` carries on the expression before it rather than starting an argument
fn continues_expression(input: &str) -> bool {
    let mut chars = input.chars();
    match chars.next() {
        None | Some('+' | '*' | '/' | '<' | '>' | '=' | '!' | ',') => true,
        Some('-') => chars.next().is_none_or(|c| c.is_whitespace()),
        Some(_) => false,
    }
}

/// `head arg, arg, ...` with a single atom as the head
fn parse_command_line(input: &str) -> IResult<&str, Line> {
    let (input, head) = parse_atom(input, 0)?;
    let (input, _) = multispace1.parse(input)?;
    if continues_expression(input) {
        return Err(nom::Err::Error(nom::error::Error::new(input, ErrorKind::Verify)));
    }
    let (input, first) = parse_expression(input, 0)?;
    let (input, rest) = many0(preceded(
        (multispace0, char(',')),
        cut(|input| parse_expression(input, 0)),
    ))
    .parse(input)?;

    let args = std::iter::once(first).chain(rest).collect();
    Ok((input, Line { head, args }))
}

/// A line whose head is a whole expression
fn parse_expression_line(input: &str) -> IResult<&str, Line> {
    let (input, head) = parse_expression(input, 0)?;
    let (input, first) = opt(alt((
        preceded(
            (multispace0, char(',')),
            cut(|input| parse_expression(input, 0)),
        ),
        |input| parse_expression(input, 0),
    )))
    .parse(input)?;
    let (input, rest) = many0(preceded(
        (multispace0, char(',')),
        cut(|input| parse_expression(input, 0)),
    ))
    .parse(input)?;

    let args = first.into_iter().chain(rest).collect();
    Ok((input, Line { head, args }))
}

fn parse_line_body(input: &str) -> IResult<&str, Line> {
    alt((parse_command_line, parse_expression_line)).parse(input)
}

/// Cut a line at the first `#` that is not inside a text literal
fn strip_comment(line: &str) -> &str {
    let mut in_text = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_text => escaped = true,
            '"' => in_text = !in_text,
            '#' if !in_text => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Convert nom parsing errors to structured errors with positions
fn to_parse_error(source: &str, error: nom::Err<nom::error::Error<&str>>) -> ParseError {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = source.len().saturating_sub(e.input.len());
            let (kind, message) = match e.code {
                ErrorKind::TooLarge => (
                    ParseErrorKind::TooDeeplyNested,
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                ),
                _ if e.input.trim().is_empty() => {
                    (ParseErrorKind::Incomplete, "Unexpected end of input".to_owned())
                }
                ErrorKind::Escaped => (
                    ParseErrorKind::InvalidSyntax,
                    "Unknown escape sequence".to_owned(),
                ),
                ErrorKind::Float => (
                    ParseErrorKind::InvalidSyntax,
                    "Number out of range".to_owned(),
                ),
                ErrorKind::Char => (
                    ParseErrorKind::InvalidSyntax,
                    "Expected character".to_owned(),
                ),
                _ => (ParseErrorKind::InvalidSyntax, "Invalid syntax".to_owned()),
            };
            ParseError::with_context(kind, message, source, position)
        }
        nom::Err::Incomplete(_) => ParseError::with_context(
            ParseErrorKind::Incomplete,
            "Incomplete input",
            source,
            source.len(),
        ),
    }
}

/// Parse one input line. Blank and comment-only lines yield `None`.
pub fn parse_line(input: &str, config: &ParseConfig) -> Result<Option<Line>, ParseError> {
    let source = if config.handle_comments {
        strip_comment(input)
    } else {
        input
    };
    if source.trim().is_empty() {
        return Ok(None);
    }

    match terminated(parse_line_body, multispace0).parse(source) {
        Ok(("", line)) => Ok(Some(line)),
        Ok((remaining, _)) => Err(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!("Unexpected remaining input: '{remaining}'"),
            source,
            source.len() - remaining.len(),
        )),
        Err(e) => Err(to_parse_error(source, e)),
    }
}

/// Parse a single expression, as used for the arguments of a line
pub fn parse_expression_text(input: &str) -> Result<Value, ParseError> {
    match terminated(|input| parse_expression(input, 0), multispace0).parse(input) {
        Ok(("", value)) => Ok(value),
        Ok((remaining, _)) => Err(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!("Unexpected remaining input: '{remaining}'"),
            input,
            input.len() - remaining.len(),
        )),
        Err(e) => Err(to_parse_error(input, e)),
    }
}
