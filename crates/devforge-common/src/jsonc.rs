//! Reading of JSON with comments and trailing commas.
//!
//! Configuration files and feature manifests are authored as JSONC. The
//! text is normalized with `nom` into strict JSON and then handed to
//! `serde_json`. Newlines inside comments are kept so parser diagnostics
//! still point at the right line.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{multispace1, not_line_ending},
    combinator::{recognize, value},
    multi::many0,
    sequence::preceded,
};

/// Parses JSONC text into a `serde_json::Value`.
///
/// # Errors
///
/// Returns a diagnostic if the text has an unterminated string or comment,
/// or is not valid JSON once comments are removed.
pub fn parse(input: &str) -> Result<serde_json::Value, String> {
    let json = normalize(input)?;
    serde_json::from_str(&json).map_err(|e| e.to_string())
}

/// Rewrites JSONC into strict JSON.
///
/// # Errors
///
/// Returns a diagnostic for unterminated strings or block comments.
pub fn normalize(input: &str) -> Result<String, String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(c) = rest.chars().next() {
        if c == '"' {
            let (remaining, literal) = string_literal(rest)?;
            out.push_str(literal);
            rest = remaining;
            continue;
        }
        if rest.starts_with("/*") && block_comment(rest).is_err() {
            return Err("unterminated block comment".into());
        }
        if let Ok((remaining, comment_text)) = comment(rest) {
            out.push(' ');
            out.extend(comment_text.chars().filter(|&ch| ch == '\n'));
            rest = remaining;
            continue;
        }
        if c == ',' && closes_container(&rest[1..]) {
            rest = &rest[1..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    Ok(out)
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(preceded(tag("//"), not_line_ending)).parse(input)
}

fn block_comment(input: &str) -> IResult<&str, &str> {
    recognize((tag("/*"), take_until("*/"), tag("*/"))).parse(input)
}

fn comment(input: &str) -> IResult<&str, &str> {
    alt((line_comment, block_comment)).parse(input)
}

/// Skippable items: whitespace or comments.
fn skip_trivia(input: &str) -> IResult<&str, ()> {
    let (input, _) = many0(alt((value((), multispace1), value((), comment)))).parse(input)?;
    Ok((input, ()))
}

/// Whether the next significant character closes an object or array.
fn closes_container(input: &str) -> bool {
    skip_trivia(input).is_ok_and(|(rest, ())| rest.starts_with('}') || rest.starts_with(']'))
}

/// Returns a double-quoted literal verbatim, escapes included.
fn string_literal(input: &str) -> Result<(&str, &str), String> {
    let mut chars = input.char_indices().skip(1);
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((&input[idx + 1..], &input[..=idx])),
            '\\' => {
                let _ = chars.next();
            }
            _ => {}
        }
    }
    Err("unterminated string literal".into())
}
