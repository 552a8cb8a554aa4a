//! `{placeholder}` scanning and substitution.
//!
//! Substitution is a single left-to-right pass: text produced by a substitution is
//! never scanned again, so an argument containing `{x}` stays literal. Inside rule
//! expressions a value is rendered for the lexical position of its placeholder, so
//! an argument can never end the string literal or comment it sits in.

use serde_json::{Map, Value};
use thiserror::Error;

/// Placeholders that always resolve, to their own name.
pub const RESERVED_ROOTS: [&str; 2] = ["character", "gameState"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unresolved placeholder '{{{0}}}'")]
    Unresolved(String),

    #[error("argument '{name}' cannot be placed in the rule: {reason}")]
    UnsafeArgument { name: String, reason: &'static str },
}

/// Where a placeholder sits inside a rule expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexical {
    Code,
    Quoted(u8),
    LongBracket(usize),
    LineComment,
}

/// A `{name}` token found in a template, with its byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placeholder<'a> {
    name: &'a str,
    start: usize,
    end: usize,
}

fn scan(text: &str) -> Vec<Placeholder<'_>> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let name_start = i + 1;
        let mut j = name_start;
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
            j += 1;
        }
        let is_ident = j > name_start && !bytes[name_start].is_ascii_digit();
        if is_ident && bytes.get(j) == Some(&b'}') {
            found.push(Placeholder {
                name: &text[name_start..j],
                start: i,
                end: j + 1,
            });
            i = j + 1;
        } else {
            i += 1;
        }
    }

    found
}

/// Names of every placeholder in `text`, in order of appearance.
pub fn placeholders(text: &str) -> Vec<&str> {
    scan(text).into_iter().map(|p| p.name).collect()
}

/// Placeholder names found in any string nested inside `value`.
pub fn value_placeholders(value: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_value_placeholders(value, &mut names);
    names
}

fn collect_value_placeholders(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(placeholders(s).into_iter().map(str::to_string)),
        Value::Array(items) => items
            .iter()
            .for_each(|item| collect_value_placeholders(item, out)),
        Value::Object(map) => map
            .values()
            .for_each(|item| collect_value_placeholders(item, out)),
        _ => {}
    }
}

/// Text form of a bound argument inside an expression or path.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Replace every placeholder in `text` with its bound value.
pub fn substitute(text: &str, bindings: &Map<String, Value>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for placeholder in scan(text) {
        out.push_str(&text[cursor..placeholder.start]);
        out.push_str(&lookup_text(placeholder.name, bindings)?);
        cursor = placeholder.end;
    }

    out.push_str(&text[cursor..]);
    Ok(out)
}

/// Substitute into a rule expression.
///
/// Inside a quoted literal the rendered value is escaped for that quote; inside a
/// long bracket or line comment a value that would close it is refused; in code
/// position a string must be a bare word and negative numbers are parenthesized.
pub fn substitute_expression(
    text: &str,
    bindings: &Map<String, Value>,
) -> Result<String, TemplateError> {
    let bytes = text.as_bytes();
    let found = scan(text);
    let mut pending = found.iter().peekable();
    let mut out = String::with_capacity(text.len());
    let mut state = Lexical::Code;
    let mut cursor = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(placeholder) = pending.next_if(|p| p.start == i) {
            out.push_str(&text[cursor..i]);
            out.push_str(&render_in(placeholder.name, state, bindings)?);
            i = placeholder.end;
            cursor = i;
            continue;
        }

        let b = bytes[i];
        match state {
            Lexical::Code => match b {
                b'\'' | b'"' => {
                    state = Lexical::Quoted(b);
                    i += 1;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    i += 2;
                    state = match long_bracket_level(bytes, i) {
                        Some(level) => {
                            i += level + 2;
                            Lexical::LongBracket(level)
                        }
                        None => Lexical::LineComment,
                    };
                }
                b'[' => match long_bracket_level(bytes, i) {
                    Some(level) => {
                        i += level + 2;
                        state = Lexical::LongBracket(level);
                    }
                    None => i += 1,
                },
                _ => i += 1,
            },
            Lexical::Quoted(quote) => {
                if b == b'\\' {
                    i += 1;
                    // the escaped byte, unless a placeholder starts there
                    if pending.peek().map(|p| p.start) != Some(i) {
                        i += 1;
                    }
                } else {
                    if b == quote || b == b'\n' {
                        state = Lexical::Code;
                    }
                    i += 1;
                }
            }
            Lexical::LongBracket(level) => {
                if closes_long_bracket(bytes, i, level) {
                    i += level + 2;
                    state = Lexical::Code;
                } else {
                    i += 1;
                }
            }
            Lexical::LineComment => {
                if b == b'\n' {
                    state = Lexical::Code;
                }
                i += 1;
            }
        }
    }

    out.push_str(&text[cursor..]);
    Ok(out)
}

/// `Some(level)` when a `[==[` opener starts at `i`.
fn long_bracket_level(bytes: &[u8], i: usize) -> Option<usize> {
    if bytes.get(i) != Some(&b'[') {
        return None;
    }
    let mut j = i + 1;
    while bytes.get(j) == Some(&b'=') {
        j += 1;
    }
    (bytes.get(j) == Some(&b'[')).then_some(j - i - 1)
}

fn closes_long_bracket(bytes: &[u8], i: usize, level: usize) -> bool {
    bytes.get(i) == Some(&b']')
        && (1..=level).all(|k| bytes.get(i + k) == Some(&b'='))
        && bytes.get(i + level + 1) == Some(&b']')
}

fn render_in(name: &str, position: Lexical, bindings: &Map<String, Value>) -> Result<String, TemplateError> {
    if RESERVED_ROOTS.contains(&name) {
        return Ok(name.to_string());
    }
    let value = bindings
        .get(name)
        .ok_or_else(|| TemplateError::Unresolved(name.to_string()))?;
    let refuse = |reason| TemplateError::UnsafeArgument {
        name: name.to_string(),
        reason,
    };

    match position {
        Lexical::Quoted(quote) => Ok(escape_quoted(&render(value), quote)),
        Lexical::LongBracket(_) => {
            let text = render(value);
            if text.contains(']') {
                return Err(refuse("contains ']' inside a long-bracket string"));
            }
            Ok(text)
        }
        Lexical::LineComment => {
            let text = render(value);
            if text.contains(['\n', '\r']) {
                return Err(refuse("contains a line break inside a comment"));
            }
            Ok(text)
        }
        Lexical::Code => match value {
            Value::String(s) if is_bare_word(s) => Ok(s.clone()),
            Value::String(_) => Err(refuse("text outside a quoted literal must be a bare word")),
            Value::Number(n) if n.as_f64().is_some_and(|f| f < 0.0) => Ok(format!("({})", n)),
            other => Ok(render(other)),
        },
    }
}

fn is_bare_word(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn escape_quoted(text: &str, quote: u8) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\x00"),
            c if c == char::from(quote) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Resolve an effect value.
///
/// A string that is exactly one placeholder takes the argument's typed value;
/// other strings are substituted textually; arrays and objects recurse.
pub fn resolve_value(value: &Value, bindings: &Map<String, Value>) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => {
            let found = scan(s);
            if let [only] = found.as_slice() {
                if only.start == 0 && only.end == s.len() {
                    if RESERVED_ROOTS.contains(&only.name) {
                        return Ok(Value::String(only.name.to_string()));
                    }
                    return bindings
                        .get(only.name)
                        .cloned()
                        .ok_or_else(|| TemplateError::Unresolved(only.name.to_string()));
                }
            }
            substitute(s, bindings).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, bindings))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| resolve_value(v, bindings).map(|v| (k.clone(), v)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn lookup_text(name: &str, bindings: &Map<String, Value>) -> Result<String, TemplateError> {
    if RESERVED_ROOTS.contains(&name) {
        return Ok(name.to_string());
    }
    bindings
        .get(name)
        .map(render)
        .ok_or_else(|| TemplateError::Unresolved(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_placeholders_found_in_order() {
        assert_eq!(
            placeholders("{a} > 0 and {b_2} < {a}"),
            vec!["a", "b_2", "a"]
        );
    }

    #[test]
    fn test_non_placeholder_braces_ignored() {
        assert!(placeholders("rules.count({1, 2}) > 0").is_empty());
        assert!(placeholders("{ spaced }").is_empty());
        assert!(placeholders("{9lives}").is_empty());
        assert!(placeholders("{}").is_empty());
    }

    #[test]
    fn test_substitute_number() {
        let out = substitute("{x} > 0", &bindings(json!({ "x": 5 }))).unwrap();
        assert_eq!(out, "5 > 0");
    }

    #[test]
    fn test_substitution_happens_once() {
        let b = bindings(json!({ "x": "{y}", "y": "boom" }));
        let out = substitute("name == '{x}'", &b).unwrap();
        assert_eq!(out, "name == '{y}'");
    }

    #[test]
    fn test_reserved_roots_resolve_to_themselves() {
        let out = substitute("{character}.hp > 0", &Map::new()).unwrap();
        assert_eq!(out, "character.hp > 0");
    }

    #[test]
    fn test_unresolved_placeholder() {
        let err = substitute("{missing} > 0", &Map::new()).unwrap_err();
        assert_eq!(err, TemplateError::Unresolved("missing".into()));
    }

    #[test]
    fn test_render_forms() {
        assert_eq!(render(&json!("human")), "human");
        assert_eq!(render(&json!(2.5)), "2.5");
        assert_eq!(render(&json!(true)), "true");
        assert_eq!(render(&json!(null)), "nil");
        assert_eq!(render(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn test_quoted_argument_cannot_close_its_literal() {
        let b = bindings(json!({ "raceId": "dragon') or ('x" }));
        let out = substitute_expression("rules.contains(gameData.races, '{raceId}')", &b).unwrap();
        assert_eq!(out, "rules.contains(gameData.races, 'dragon\\') or (\\'x')");

        let b = bindings(json!({ "name": "a\\\" .. \"\nb" }));
        let out = substitute_expression("character.name == \"{name}\"", &b).unwrap();
        assert_eq!(out, "character.name == \"a\\\\\\\" .. \\\"\\nb\"");
    }

    #[test]
    fn test_expression_numbers_and_bare_words() {
        let b = bindings(json!({ "x": 5, "n": -3, "flag": true, "word": "elf" }));
        assert_eq!(substitute_expression("{x} > 0", &b).unwrap(), "5 > 0");
        assert_eq!(substitute_expression("10 -{n}", &b).unwrap(), "10 -(-3)");
        assert_eq!(substitute_expression("{flag} and {word}", &b).unwrap(), "true and elf");
    }

    #[test]
    fn test_unquoted_text_refused() {
        let b = bindings(json!({ "word": "1 or true" }));
        let err = substitute_expression("{word} == 1", &b).unwrap_err();
        assert!(matches!(err, TemplateError::UnsafeArgument { ref name, .. } if name == "word"));
    }

    #[test]
    fn test_long_bracket_and_comment_positions() {
        let b = bindings(json!({ "text": "x]] or true --", "line": "a\nor true" }));
        assert!(substitute_expression("s == [[{text}]]", &b).is_err());
        assert!(substitute_expression("true -- {line}", &b).is_err());
        let plain = bindings(json!({ "text": "fine", "line": "fine" }));
        assert_eq!(substitute_expression("s == [==[{text}]==]", &plain).unwrap(), "s == [==[fine]==]");
    }

    #[test]
    fn test_expression_substitution_happens_once() {
        let b = bindings(json!({ "x": "{y}", "y": "boom" }));
        assert_eq!(substitute_expression("name == '{x}'", &b).unwrap(), "name == '{y}'");
    }

    #[test]
    fn test_escaped_quote_in_template_keeps_literal_open() {
        let b = bindings(json!({ "x": "'" }));
        let out = substitute_expression("s == 'it\\'s {x}'", &b).unwrap();
        assert_eq!(out, "s == 'it\\'s \\''");
    }

    #[test]
    fn test_resolve_value_keeps_type_for_whole_placeholder() {
        let b = bindings(json!({ "amount": 7, "item": "rope" }));
        assert_eq!(resolve_value(&json!("{amount}"), &b).unwrap(), json!(7));
        assert_eq!(
            resolve_value(&json!("{amount} feet of {item}"), &b).unwrap(),
            json!("7 feet of rope")
        );
    }

    #[test]
    fn test_resolve_value_recurses() {
        let b = bindings(json!({ "name": "Ser Bors", "hp": 10 }));
        let resolved = resolve_value(&json!({ "who": "{name}", "stats": ["{hp}", 3] }), &b).unwrap();
        assert_eq!(resolved, json!({ "who": "Ser Bors", "stats": [10, 3] }));
    }

    #[test]
    fn test_literal_values_pass_through() {
        assert_eq!(resolve_value(&json!(42), &Map::new()).unwrap(), json!(42));
        assert_eq!(resolve_value(&json!("plain"), &Map::new()).unwrap(), json!("plain"));
    }

    #[test]
    fn test_value_placeholders() {
        let names = value_placeholders(&json!({ "a": "{x}", "b": ["{y} and {x}"] }));
        assert_eq!(names, vec!["x", "y", "x"]);
    }
}
