//! Lowering of C-style rule expressions to Lua.
//!
//! Ruleset authors write `a && !b`, `x != y`, `v === null`; the interpreter is Lua.
//! Tokens are rewritten in place and everything between them (spacing, comments,
//! string literals) is copied through untouched.

use super::lexer::{tokenize, LexError, TokenKind};

/// Rewrite C-style operators and literals into their Lua spelling.
pub fn lower(expr: &str) -> Result<String, LexError> {
    let tokens = tokenize(expr)?;
    let mut out = String::with_capacity(expr.len() + 8);
    let mut cursor = 0;

    for tok in &tokens {
        let replacement = match (tok.kind, tok.text) {
            (TokenKind::Punct, "&&") => Some(" and "),
            (TokenKind::Punct, "||") => Some(" or "),
            (TokenKind::Punct, "!=") | (TokenKind::Punct, "!==") => Some(" ~= "),
            (TokenKind::Punct, "===") => Some(" == "),
            (TokenKind::Punct, "!") => Some(" not "),
            (TokenKind::Ident, "null") | (TokenKind::Ident, "undefined") => Some("nil"),
            _ => None,
        };

        if let Some(replacement) = replacement {
            out.push_str(&expr[cursor..tok.start]);
            out.push_str(replacement);
            cursor = tok.end;
        }
    }

    out.push_str(&expr[cursor..]);
    Ok(out)
}

/// Wrap a lowered expression so the chunk yields its value.
///
/// Newlines keep a trailing `--` comment from swallowing the closing paren.
pub fn as_return_chunk(lowered: &str) -> String {
    format!("return (\n{}\n)", lowered)
}
