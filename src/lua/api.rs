//! Lua API bindings available to rule expressions.
//!
//! Registers a `rules` table of pure helpers. Nothing here touches host state.

use anyhow::Result;
use mlua::{Function, Lua, Table, Value};

/// Register the `rules` module in the Lua global namespace.
pub fn register_api(lua: &Lua) -> Result<()> {
    let rules = lua.create_table()?;

    rules.set("contains", create_contains(lua)?)?;
    rules.set("count", create_count(lua)?)?;
    rules.set("lookup", create_lookup(lua)?)?;
    rules.set("clamp", create_clamp(lua)?)?;
    rules.set("log", create_log(lua)?)?;

    lua.globals().set("rules", rules)?;
    Ok(())
}

fn create_contains(lua: &Lua) -> Result<Function> {
    let func = lua.create_function(|_lua, (haystack, needle): (Value, Value)| {
        let Value::Table(table) = haystack else {
            return Ok(false);
        };
        for pair in table.clone().pairs::<Value, Value>() {
            let (key, value) = pair?;
            if values_equal(&value, &needle) {
                return Ok(true);
            }
            // keys count too, so `rules.contains(gameData.races, raceId)` works on maps
            if matches!(value, Value::Table(_)) && values_equal(&key, &needle) {
                return Ok(true);
            }
        }
        Ok(false)
    })?;
    Ok(func)
}

fn create_count(lua: &Lua) -> Result<Function> {
    let func = lua.create_function(|_lua, value: Value| {
        let count = match value {
            Value::Table(table) => count_entries(&table)?,
            Value::String(s) => s.as_bytes().len(),
            _ => 0,
        };
        Ok(count)
    })?;
    Ok(func)
}

fn create_lookup(lua: &Lua) -> Result<Function> {
    let func = lua.create_function(|_lua, (root, path, default): (Value, String, Value)| {
        let mut current = root;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            let Value::Table(table) = current else {
                return Ok(default);
            };
            current = match segment.parse::<i64>() {
                Ok(index) => table.get::<Value>(index + 1)?,
                Err(_) => table.get::<Value>(segment)?,
            };
        }
        Ok(match current {
            Value::Nil => default,
            other => other,
        })
    })?;
    Ok(func)
}

fn create_clamp(lua: &Lua) -> Result<Function> {
    let func = lua.create_function(|_lua, (x, lo, hi): (f64, f64, f64)| Ok(x.max(lo).min(hi)))?;
    Ok(func)
}

fn create_log(lua: &Lua) -> Result<Function> {
    let func = lua.create_function(|_lua, (level, message): (String, String)| {
        log_message(&level, &message);
        Ok(())
    })?;
    Ok(func)
}

fn count_entries(table: &Table) -> mlua::Result<usize> {
    let mut count = 0;
    for pair in table.clone().pairs::<Value, Value>() {
        pair?;
        count += 1;
    }
    Ok(count)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Number(y)) | (Value::Number(y), Value::Integer(x)) => {
            (*x as f64) == *y
        }
        (Value::String(x), Value::String(y)) => *x.as_bytes() == *y.as_bytes(),
        _ => a == b,
    }
}

/// Route a script log call into tracing.
fn log_message(level: &str, message: &str) {
    match level.to_lowercase().as_str() {
        "debug" | "trace" => tracing::debug!(target: "ruleweave::script", "{}", message),
        "warn" | "warning" => tracing::warn!(target: "ruleweave::script", "{}", message),
        "error" => tracing::error!(target: "ruleweave::script", "{}", message),
        _ => tracing::info!(target: "ruleweave::script", "{}", message),
    }
}
