//! Static safety filter for rule expressions.
//!
//! Runs before any interpreter is created and does not depend on the sandbox
//! blocklist: an expression that fails here is never executed.

use std::fmt;

use serde::Serialize;

use super::lexer::{tokenize, Token, TokenKind};

/// Upper bound on iterations for a numeric `for` loop with literal bounds.
pub const MAX_STATIC_ITERATIONS: f64 = 10_000.0;

const DYNAMIC_EVALUATION: &[&str] = &[
    "eval",
    "load",
    "loadstring",
    "loadfile",
    "dofile",
    "Function",
    "setTimeout",
    "setInterval",
    "dump",
];

const HOST_ACCESS: &[&str] = &[
    "require",
    "import",
    "io",
    "os",
    "fs",
    "net",
    "http",
    "https",
    "socket",
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
    "process",
    "child_process",
    "package",
    "module",
    "exports",
    "print",
    "window",
    "document",
    "Deno",
    "Bun",
];

const REFLECTION: &[&str] = &[
    "debug",
    "getmetatable",
    "setmetatable",
    "rawget",
    "rawset",
    "rawequal",
    "rawlen",
    "getfenv",
    "setfenv",
    "newproxy",
    "collectgarbage",
    "coroutine",
    "_G",
    "_ENV",
    "globalThis",
    "constructor",
    "prototype",
    "Reflect",
    "Proxy",
    "arguments",
    "caller",
    "callee",
];

const UNBOUNDED_LOOPS: &[&str] = &["while", "repeat", "until", "goto", "function"];

/// Why an expression was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    DynamicEvaluation,
    HostAccess,
    Reflection,
    UnboundedLoop,
    Malformed,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ViolationKind::DynamicEvaluation => "dynamic code evaluation",
            ViolationKind::HostAccess => "host access",
            ViolationKind::Reflection => "reflection escape",
            ViolationKind::UnboundedLoop => "unbounded loop",
            ViolationKind::Malformed => "malformed expression",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyViolation {
    pub kind: ViolationKind,
    pub token: String,
    pub offset: usize,
}

impl fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via '{}' at offset {}", self.kind, self.token, self.offset)
    }
}

/// Outcome of running the filter over one expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SafetyReport {
    pub violations: Vec<SafetyViolation>,
}

impl SafetyReport {
    pub fn is_safe(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Quick predicate form of [`check_expression`].
pub fn is_safe(expr: &str) -> bool {
    check_expression(expr).is_safe()
}

/// Inspect an expression and report every construct the sandbox refuses to run.
pub fn check_expression(expr: &str) -> SafetyReport {
    let tokens = match tokenize(expr) {
        Ok(tokens) => tokens,
        Err(err) => {
            return SafetyReport {
                violations: vec![SafetyViolation {
                    kind: ViolationKind::Malformed,
                    token: err.message,
                    offset: err.offset,
                }],
            }
        }
    };

    let mut violations = Vec::new();

    for (idx, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::Ident => {
                if tok.text == "for" {
                    if !is_bounded_for(&tokens[idx + 1..]) {
                        violations.push(violation(ViolationKind::UnboundedLoop, tok));
                    }
                } else if let Some(kind) = classify_name(tok.text) {
                    violations.push(violation(kind, tok));
                }
            }
            TokenKind::Str => {
                let indexed = idx > 0 && tokens[idx - 1].is_punct("[");
                if indexed {
                    if let Some(kind) = classify_name(tok.string_contents()) {
                        violations.push(violation(kind, tok));
                    }
                }
            }
            TokenKind::Punct if tok.text == "=>" => {
                violations.push(violation(ViolationKind::UnboundedLoop, tok));
            }
            _ => {}
        }
    }

    SafetyReport { violations }
}

fn violation(kind: ViolationKind, tok: &Token<'_>) -> SafetyViolation {
    SafetyViolation {
        kind,
        token: tok.text.to_string(),
        offset: tok.start,
    }
}

fn classify_name(name: &str) -> Option<ViolationKind> {
    if DYNAMIC_EVALUATION.contains(&name) {
        Some(ViolationKind::DynamicEvaluation)
    } else if HOST_ACCESS.contains(&name) {
        Some(ViolationKind::HostAccess)
    } else if REFLECTION.contains(&name) || name.starts_with("__") {
        Some(ViolationKind::Reflection)
    } else if UNBOUNDED_LOOPS.contains(&name) {
        Some(ViolationKind::UnboundedLoop)
    } else {
        None
    }
}

/// Accepts only `for NAME = A, B [, STEP] do` with literal bounds and a small trip count.
fn is_bounded_for(rest: &[Token<'_>]) -> bool {
    let mut pos = 0;
    let mut next = || {
        let tok = rest.get(pos);
        pos += 1;
        tok
    };

    if !matches!(next(), Some(t) if t.kind == TokenKind::Ident) {
        return false;
    }
    if !matches!(next(), Some(t) if t.is_punct("=")) {
        return false;
    }

    let mut bounds = Vec::with_capacity(3);
    loop {
        let Some(value) = literal_number(&mut next) else {
            return false;
        };
        bounds.push(value);
        match next() {
            Some(t) if t.is_punct(",") && bounds.len() < 3 => continue,
            Some(t) if t.is_ident("do") && bounds.len() >= 2 => break,
            _ => return false,
        }
    }

    let (start, stop) = (bounds[0], bounds[1]);
    let step = bounds.get(2).copied().unwrap_or(1.0);
    if step == 0.0 || !step.is_finite() {
        return false;
    }
    let trips = ((stop - start) / step).floor() + 1.0;
    trips.is_finite() && trips <= MAX_STATIC_ITERATIONS
}

fn literal_number<'t, 'a: 't>(
    next: &mut impl FnMut() -> Option<&'t Token<'a>>,
) -> Option<f64> {
    let mut tok = next()?;
    let mut sign = 1.0;
    if tok.is_punct("-") {
        sign = -1.0;
        tok = next()?;
    }
    if tok.kind != TokenKind::Number {
        return None;
    }
    tok.text.parse::<f64>().ok().map(|n| n * sign)
}
