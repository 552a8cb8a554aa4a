//! Lua sandbox configuration.
//!
//! Strips the interpreter down to a pure expression environment. This is the
//! second line of defence; [`super::safety`] rejects the same names before a state
//! is ever created.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use mlua::{Function, Lua, LuaOptions, MultiValue, StdLib, Table, Value};

/// Upper bound on estimated backtracking steps for one pattern call.
pub const MAX_PATTERN_WORK: f64 = 10_000_000.0;

/// Longest pattern accepted by the guarded string functions.
pub const MAX_PATTERN_LEN: usize = 512;

/// Pattern functions that run entirely inside one native call.
const PATTERN_FUNCTIONS: &[&str] = &["find", "match", "gmatch", "gsub"];

/// Standard libraries loaded into every rule state.
pub fn allowed_libs() -> StdLib {
    StdLib::STRING | StdLib::MATH | StdLib::TABLE | StdLib::UTF8
}

/// Globals removed from every rule state.
const BLOCKED_GLOBALS: &[&str] = &[
    "os",
    "io",
    "debug",
    "package",
    "coroutine",
    "print",
    "loadfile",
    "dofile",
    "load",
    "loadstring",
    "rawget",
    "rawset",
    "rawequal",
    "rawlen",
    "collectgarbage",
    "getfenv",
    "setfenv",
    "newproxy",
    "getmetatable",
    "setmetatable",
];

/// Create a fresh state with only the allowed libraries and the sandbox applied.
pub fn new_sandboxed_state() -> Result<Lua> {
    let lua = Lua::new_with(allowed_libs(), LuaOptions::new())?;
    apply_sandbox(&lua)?;
    Ok(lua)
}

/// Apply sandbox restrictions to a Lua state.
pub fn apply_sandbox(lua: &Lua) -> Result<()> {
    let globals = lua.globals();

    for name in BLOCKED_GLOBALS {
        globals.set(*name, Value::Nil)?;
    }

    // string.dump would hand out bytecode of host-registered helpers
    if let Value::Table(string) = globals.get::<Value>("string")? {
        string.set("dump", Value::Nil)?;
        guard_native_string_calls(lua, &string)?;
    }

    let deny_require = lua.create_function(|_lua, module: String| -> mlua::Result<Value> {
        Err(mlua::Error::runtime(format!(
            "require '{}' is not allowed in rule expressions",
            module
        )))
    })?;
    globals.set("require", deny_require)?;

    Ok(())
}

/// Wall-clock limit shared with native helpers, which the instruction hook never sees.
pub struct Deadline {
    pub at: Instant,
    pub fired: Arc<AtomicBool>,
}

/// Fail with a timeout if the evaluation deadline has passed.
pub fn check_deadline(lua: &Lua) -> mlua::Result<()> {
    if let Some(deadline) = lua.app_data_ref::<Deadline>() {
        if Instant::now() >= deadline.at {
            deadline.fired.store(true, Ordering::SeqCst);
            return Err(mlua::Error::runtime("rule expression timed out"));
        }
    }
    Ok(())
}

// Pattern matching backtracks inside a single C call and allocates nothing, so
// neither the instruction hook nor the memory ceiling can stop it. The wrappers
// check the deadline first and refuse patterns whose worst case is too large.
fn guard_native_string_calls(lua: &Lua, string: &Table) -> Result<()> {
    for name in PATTERN_FUNCTIONS {
        let key = format!("ruleweave.string.{}", name);
        let original: Function = string.get(*name)?;
        lua.set_named_registry_value(&key, original)?;

        let plain_flag = if *name == "find" { Some(3) } else { None };
        let guarded = lua.create_function(move |lua, args: MultiValue| {
            check_deadline(lua)?;
            let plain = plain_flag
                .and_then(|i| args.get(i))
                .is_some_and(|v| !matches!(v, Value::Nil | Value::Boolean(false)));
            if !plain {
                check_pattern_cost(args.get(0), args.get(1))?;
            }
            let original: Function = lua.named_registry_value(&key)?;
            original.call::<MultiValue>(args)
        })?;
        string.set(*name, guarded)?;
    }

    // An empty piece repeated n times loops n times without allocating.
    let rep: Function = string.get("rep")?;
    lua.set_named_registry_value("ruleweave.string.rep", rep)?;
    let guarded_rep = lua.create_function(|lua, args: MultiValue| {
        check_deadline(lua)?;
        let empty = |v: Option<&Value>| match v {
            Some(Value::String(s)) => s.as_bytes().is_empty(),
            None | Some(Value::Nil) => true,
            _ => false,
        };
        if empty(args.get(0)) && empty(args.get(2)) {
            return Ok(MultiValue::from_iter([Value::String(lua.create_string("")?)]));
        }
        let original: Function = lua.named_registry_value("ruleweave.string.rep")?;
        original.call::<MultiValue>(args)
    })?;
    string.set("rep", guarded_rep)?;

    Ok(())
}

fn check_pattern_cost(subject: Option<&Value>, pattern: Option<&Value>) -> mlua::Result<()> {
    let Some(Value::String(pattern)) = pattern else {
        return Ok(());
    };
    let pattern = pattern.as_bytes();
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(mlua::Error::runtime(format!(
            "pattern longer than {} bytes",
            MAX_PATTERN_LEN
        )));
    }

    let subject_len = match subject {
        Some(Value::String(s)) => s.as_bytes().len(),
        Some(Value::Integer(_)) | Some(Value::Number(_)) => 32,
        _ => 0,
    };
    let work = pattern_work(&pattern, subject_len);
    if work > MAX_PATTERN_WORK {
        return Err(mlua::Error::runtime(format!(
            "pattern too expensive for a {}-byte subject",
            subject_len
        )));
    }
    Ok(())
}

/// Worst-case steps for matching: every start position times `n` per backtracking quantifier.
pub fn pattern_work(pattern: &[u8], subject_len: usize) -> f64 {
    let n = subject_len.max(2) as f64;
    n.powi(backtracking_quantifiers(pattern) as i32 + 1) * pattern.len().max(1) as f64
}

/// Count `*`, `+` and `-` quantifiers in a Lua pattern.
fn backtracking_quantifiers(pattern: &[u8]) -> u32 {
    let mut count = 0;
    let mut i = usize::from(pattern.first() == Some(&b'^'));

    while i < pattern.len() {
        match pattern[i] {
            b'%' => match pattern.get(i + 1) {
                Some(b'b') => {
                    i += 4;
                    continue;
                }
                Some(b'f') => {
                    i = skip_set(pattern, i + 2);
                    continue;
                }
                _ => i += 2,
            },
            b'[' => i = skip_set(pattern, i),
            b'(' | b')' => {
                i += 1;
                continue;
            }
            _ => i += 1,
        }
        if matches!(pattern.get(i), Some(b'*' | b'+' | b'-')) {
            count += 1;
            i += 1;
        }
    }

    count
}

/// Index just past the `[...]` set opening at `start`.
fn skip_set(pattern: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    if pattern.get(i) == Some(&b'^') {
        i += 1;
    }
    if pattern.get(i) == Some(&b']') {
        i += 1;
    }
    while i < pattern.len() {
        match pattern[i] {
            b'%' => i += 2,
            b']' => return i + 1,
            _ => i += 1,
        }
    }
    pattern.len()
}

/// Check if a Lua state has sandbox applied.
pub fn is_sandboxed(lua: &Lua) -> bool {
    let globals = lua.globals();

    for name in BLOCKED_GLOBALS {
        match globals.get::<Value>(*name) {
            Ok(Value::Nil) => continue,
            _ => return false,
        }
    }

    match globals.get::<Table>("string") {
        Ok(string) => matches!(string.get::<Value>("dump"), Ok(Value::Nil)),
        Err(_) => true,
    }
}
