//! Best-effort parsing of free-text variable values.
//!
//! Input that reads as a literal (number, boolean, quoted string, list,
//! tuple or mapping) becomes the matching JSON value. Anything else is kept
//! verbatim as a string, so [`parse_value`] never fails.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit0, digit1, multispace0, one_of},
    combinator::{all_consuming, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::separated_list0,
    sequence::{delimited, pair, separated_pair, tuple},
    IResult,
};
use serde_json::{Map, Number, Value};

type ParseResult<'a, T> = IResult<&'a str, T>;

/// Containers nested deeper than this are not treated as literals.
const MAX_DEPTH: usize = 64;

/// Parse `raw` as a literal, falling back to the raw text.
pub fn parse_value(raw: &str) -> Value {
    match all_consuming(delimited(multispace0, |i| literal(i, 0), multispace0))(raw) {
        Ok((_, parsed)) => parsed,
        Err(_) => Value::String(raw.to_string()),
    }
}

fn literal(input: &str, depth: usize) -> ParseResult<'_, Value> {
    if depth > MAX_DEPTH {
        return fail(input, ErrorKind::TooLarge);
    }
    alt((
        quoted_string,
        boolean,
        number,
        |i| sequence(i, depth),
        |i| tuple_literal(i, depth),
        |i| mapping(i, depth),
    ))(input)
}

fn fail<T>(input: &str, kind: ErrorKind) -> ParseResult<'_, T> {
    Err(nom::Err::Error(Error::new(input, kind)))
}

fn quoted_string(input: &str) -> ParseResult<'_, Value> {
    let (body, quote) = one_of("\"'")(input)?;
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((idx, c)) = chars.next() {
        if c == quote {
            return Ok((&body[idx + c.len_utf8()..], Value::String(out)));
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some((_, 'n')) => out.push('\n'),
            Some((_, 't')) => out.push('\t'),
            Some((_, 'r')) => out.push('\r'),
            Some((_, '0')) => out.push('\0'),
            Some((_, e @ ('\\' | '\'' | '"'))) => out.push(e),
            // Unknown escapes keep their backslash.
            Some((_, other)) => {
                out.push('\\');
                out.push(other);
            }
            None => break,
        }
    }
    fail(input, ErrorKind::Char)
}

fn boolean(input: &str) -> ParseResult<'_, Value> {
    alt((
        value(Value::Bool(true), alt((tag("True"), tag("true")))),
        value(Value::Bool(false), alt((tag("False"), tag("false")))),
    ))(input)
}

fn number(input: &str) -> ParseResult<'_, Value> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        digit1,
        opt(pair(char('.'), digit0)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;

    let is_float = text.contains(|c: char| matches!(c, '.' | 'e' | 'E'));
    if is_float {
        return match text.parse::<f64>().ok().and_then(Number::from_f64) {
            Some(n) => Ok((rest, Value::Number(n))),
            None => fail(input, ErrorKind::Float),
        };
    }

    // Leading zeros are not an integer literal ("007" stays text).
    let digits = text.trim_start_matches(['+', '-']);
    if digits.len() > 1 && digits.starts_with('0') {
        return fail(input, ErrorKind::Digit);
    }
    match text.parse::<i64>() {
        Ok(n) => Ok((rest, Value::from(n))),
        Err(_) => fail(input, ErrorKind::Digit),
    }
}

fn comma(input: &str) -> ParseResult<'_, char> {
    delimited(multispace0, char(','), multispace0)(input)
}

/// Comma separated literals with an optional trailing comma. Returns the
/// values and whether a trailing comma was present.
fn elements(input: &str, depth: usize) -> ParseResult<'_, (Vec<Value>, bool)> {
    let (rest, values) = separated_list0(comma, |i| literal(i, depth + 1))(input)?;
    let (rest, trailing) = opt(comma)(rest)?;
    if values.is_empty() && trailing.is_some() {
        return fail(input, ErrorKind::SeparatedList);
    }
    Ok((rest, (values, trailing.is_some())))
}

fn sequence(input: &str, depth: usize) -> ParseResult<'_, Value> {
    let (rest, (values, _)) = delimited(
        pair(char('['), multispace0),
        |i| elements(i, depth),
        pair(multispace0, char(']')),
    )(input)?;
    Ok((rest, Value::Array(values)))
}

/// `(1, 2)` is a list; `(1)` is just a parenthesised `1`.
fn tuple_literal(input: &str, depth: usize) -> ParseResult<'_, Value> {
    let (rest, (mut values, trailing)) = delimited(
        pair(char('('), multispace0),
        |i| elements(i, depth),
        pair(multispace0, char(')')),
    )(input)?;
    if values.len() == 1 && !trailing {
        return Ok((rest, values.remove(0)));
    }
    Ok((rest, Value::Array(values)))
}

fn mapping(input: &str, depth: usize) -> ParseResult<'_, Value> {
    let (rest, _) = pair(char('{'), multispace0)(input)?;
    let (rest, entries) = separated_list0(
        comma,
        separated_pair(
            |i| literal(i, depth + 1),
            delimited(multispace0, char(':'), multispace0),
            |i| literal(i, depth + 1),
        ),
    )(rest)?;
    let (rest, _) = opt(comma)(rest)?;
    let (rest, _) = pair(multispace0, char('}'))(rest)?;

    let map = entries
        .into_iter()
        .map(|(key, val)| (key_text(key), val))
        .collect::<Map<String, Value>>();
    Ok((rest, Value::Object(map)))
}

/// JSON object keys are strings; other keys use their JSON text.
fn key_text(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
