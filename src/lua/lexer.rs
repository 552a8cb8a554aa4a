//! Tokenizer for rule expressions.
//!
//! Shared by the static safety filter and the dialect lowering pass. It understands
//! enough of both Lua and C-style syntax to tell identifiers apart from string
//! literals and comments; it is not a parser.

use thiserror::Error;

/// Token categories produced by [`tokenize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Punct,
}

/// A token with its byte span in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

impl<'a> Token<'a> {
    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == p
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }

    /// Contents of a string literal without its delimiters.
    ///
    /// Escapes are left as written; callers only compare against plain names.
    pub fn string_contents(&self) -> &'a str {
        if self.kind != TokenKind::Str {
            return self.text;
        }
        let text = self.text;
        if text.starts_with('[') {
            let open = text[1..].find('[').map(|i| i + 2).unwrap_or(text.len());
            let close = text.len().saturating_sub(open);
            return text.get(open..close).unwrap_or("");
        }
        text.get(1..text.len().saturating_sub(1)).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct LexError {
    pub offset: usize,
    pub message: String,
}

const MULTI_CHAR_PUNCT: &[&str] = &[
    "...", "===", "!==", "==", "~=", "!=", "<=", ">=", "&&", "||", "..", "//", "::", "=>", "<<",
    ">>",
];

/// Split an expression into tokens, dropping whitespace and `--` comments.
pub fn tokenize(src: &str) -> Result<Vec<Token<'_>>, LexError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if src[i..].starts_with("--") {
            i = skip_comment(src, i)?;
            continue;
        }

        let start = i;

        if b.is_ascii_alphabetic() || b == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(token(src, TokenKind::Ident, start, i));
            continue;
        }

        if b.is_ascii_digit() || (b == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            i = scan_number(bytes, i);
            tokens.push(token(src, TokenKind::Number, start, i));
            continue;
        }

        if b == b'"' || b == b'\'' || b == b'`' {
            i = scan_quoted(src, i, b)?;
            tokens.push(token(src, TokenKind::Str, start, i));
            continue;
        }

        if b == b'[' {
            if let Some(level) = long_bracket_level(bytes, i) {
                i = scan_long_bracket(src, i, level)?;
                tokens.push(token(src, TokenKind::Str, start, i));
                continue;
            }
        }

        if let Some(p) = MULTI_CHAR_PUNCT.iter().find(|p| src[i..].starts_with(**p)) {
            i += p.len();
            tokens.push(token(src, TokenKind::Punct, start, i));
            continue;
        }

        let width = src[i..].chars().next().map(char::len_utf8).unwrap_or(1);
        i += width;
        tokens.push(token(src, TokenKind::Punct, start, i));
    }

    Ok(tokens)
}

fn token(src: &str, kind: TokenKind, start: usize, end: usize) -> Token<'_> {
    Token {
        kind,
        text: &src[start..end],
        start,
        end,
    }
}

fn skip_comment(src: &str, start: usize) -> Result<usize, LexError> {
    let bytes = src.as_bytes();
    let body = start + 2;
    if let Some(level) = long_bracket_level(bytes, body) {
        return scan_long_bracket(src, body, level);
    }
    Ok(src[body..]
        .find('\n')
        .map(|n| body + n + 1)
        .unwrap_or(src.len()))
}

fn scan_number(bytes: &[u8], start: usize) -> usize {
    let hex = bytes[start] == b'0' && matches!(bytes.get(start + 1), Some(b'x') | Some(b'X'));
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i];
        let exponent = if hex {
            matches!(c, b'p' | b'P')
        } else {
            matches!(c, b'e' | b'E')
        };
        if exponent && matches!(bytes.get(i + 1), Some(b'+') | Some(b'-')) {
            i += 2;
            continue;
        }
        if c.is_ascii_alphanumeric() || c == b'.' {
            i += 1;
            continue;
        }
        break;
    }
    i
}

fn scan_quoted(src: &str, start: usize, quote: u8) -> Result<usize, LexError> {
    let bytes = src.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if quote != b'`' => break,
            c if c == quote => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(LexError {
        offset: start,
        message: "unterminated string literal".to_string(),
    })
}

/// Returns the `=` level of a Lua long bracket opening at `i`, if there is one.
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

fn scan_long_bracket(src: &str, start: usize, level: usize) -> Result<usize, LexError> {
    let close = format!("]{}]", "=".repeat(level));
    let body = start + level + 2;
    src[body..]
        .find(&close)
        .map(|n| body + n + close.len())
        .ok_or_else(|| LexError {
            offset: start,
            message: "unterminated long bracket".to_string(),
        })
}
