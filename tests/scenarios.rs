use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Map, Value};

use ruleweave::error::SandboxError;
use ruleweave::lua::{is_safe, ExpressionEvaluator, LuaEvaluator};
use ruleweave::ruleset::{load, load_file};
use ruleweave::{ErrorKind, InMemoryState, Phase, RulesetManager, StateStore};

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn sample_ruleset() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("rulesets/heroic-fantasy.yaml")
}

fn fresh_state() -> Arc<InMemoryState> {
    Arc::new(
        InMemoryState::from_json(json!({
            "character": { "race": "", "damageTaken": 0, "maxHp": 10, "xp": 0 },
            "gameState": { "log": [], "hoursElapsed": 0 }
        }))
        .unwrap(),
    )
}

fn manager(store: Arc<InMemoryState>) -> RulesetManager {
    let manager = RulesetManager::new(
        Arc::new(LuaEvaluator::default()),
        store,
        Duration::from_millis(250),
    );
    let document = load_file(sample_ruleset()).unwrap().unwrap();
    let id = manager.insert_loaded(document);
    manager.set_active(&id).unwrap();
    manager
}

#[test]
fn select_race_scenario() {
    let store = fresh_state();
    let manager = manager(Arc::clone(&store));
    manager.set_phase(Phase::CharacterCreation);

    let first = manager.invoke("select_race", &args(json!({ "raceId": "elf" })));
    assert!(first.success, "{}", first.summary);
    assert_eq!(store.to_json()["character"]["race"], json!("elf"));

    // A race is already chosen, so the same call is now refused.
    let before = store.to_json();
    let second = manager.invoke("select_race", &args(json!({ "raceId": "dwarf" })));
    assert!(!second.success);
    assert_eq!(second.kind(), Some(ErrorKind::ValidationFailure));
    assert_eq!(second.failed_validations[0].expression, "character.race == ''");
    assert_eq!(store.to_json(), before);
}

#[test]
fn unknown_race_lists_failing_rule() {
    let store = fresh_state();
    let manager = manager(Arc::clone(&store));

    let result = manager.invoke_in(
        Phase::CharacterCreation,
        "select_race",
        &args(json!({ "raceId": "dragon" })),
    );
    assert_eq!(result.failed_validations.len(), 1);
    assert_eq!(
        result.failed_validations[0].expression,
        "rules.contains(gameData.races, 'dragon')"
    );
    assert_eq!(store.to_json()["character"]["race"], json!(""));
}

#[test]
fn defaults_and_enums_flow_through() {
    let store = fresh_state();
    let manager = manager(Arc::clone(&store));

    let travel = manager.invoke_in(Phase::Exploration, "travel", &args(json!({ "destination": "Oakvale" })));
    assert!(travel.success, "{}", travel.summary);
    let state = store.to_json();
    assert_eq!(state["gameState"]["location"], json!("Oakvale"));
    assert_eq!(state["gameState"]["hoursElapsed"], json!(1));

    let bad_class = manager.invoke_in(
        Phase::CharacterCreation,
        "select_class",
        &args(json!({ "classId": "bard" })),
    );
    assert_eq!(bad_class.kind(), Some(ErrorKind::Argument));
}

#[test]
fn injected_argument_cannot_escape() {
    let store = fresh_state();
    let manager = manager(Arc::clone(&store));
    let before = store.to_json();

    // Substitution happens once, inside a string literal: this is just an odd race id.
    let result = manager.invoke_in(
        Phase::CharacterCreation,
        "select_race",
        &args(json!({ "raceId": "{raceId}" })),
    );
    assert_eq!(result.kind(), Some(ErrorKind::ValidationFailure));

    // Quotes in the argument are escaped, so the rule still sees one string literal.
    for race in ["dragon') or ('x", "') or os.exit(1) or ('", "elf\\') or ('"] {
        let result = manager.invoke_in(
            Phase::CharacterCreation,
            "select_race",
            &args(json!({ "raceId": race })),
        );
        assert_eq!(result.kind(), Some(ErrorKind::ValidationFailure), "{}", race);
        assert_eq!(result.failed_validations[0].index, 1);
    }
    assert_eq!(store.to_json(), before);
}

#[test]
fn every_phase_function_is_callable() {
    let manager = manager(fresh_state());
    let active = manager.snapshot().unwrap();
    for phase in Phase::ALL {
        let declared: Vec<&str> = active
            .document()
            .functions(phase)
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        let schemas = manager.list_phase_function_schemas(phase).unwrap();
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, declared);
    }
}

#[test]
fn reload_is_idempotent() {
    let document = load_file(sample_ruleset()).unwrap().unwrap();
    let reloaded = load(document.to_json().unwrap().as_bytes()).unwrap();
    assert_eq!(reloaded.functions_by_phase, document.functions_by_phase);
    assert_eq!(reloaded.game_data, document.game_data);
    assert_eq!(reloaded.prompt_templates, document.prompt_templates);
}

#[test]
fn safety_filter_examples() {
    assert!(!is_safe("eval('x')"));
    assert!(!is_safe("require('fs')"));
    assert!(is_safe("character.level >= 5 && character.hp > 0"));
}

fn napping_ruleset(rule: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "metadata": { "id": "slow", "name": "Slow", "version": "1" },
        "functionsByPhase": {
            "rest": [{
                "id": "nap", "name": "nap", "parameters": [],
                "ruleValidations": [rule],
                "effects": [{ "target": "gameState.napped", "operation": "set", "value": true }]
            }]
        }
    }))
    .unwrap()
}

#[test]
fn unbounded_rule_is_refused_before_running() {
    let store = fresh_state();
    let manager = RulesetManager::new(
        Arc::new(LuaEvaluator::default()),
        Arc::clone(&store) as Arc<dyn StateStore>,
        Duration::from_millis(50),
    );
    let id = manager
        .load_ruleset(&napping_ruleset("(function() while true do end end)()"))
        .unwrap();
    manager.set_active(&id).unwrap();

    let result = manager.invoke_in(Phase::Rest, "nap", &Map::new());
    assert_eq!(result.kind(), Some(ErrorKind::SecurityViolation));
    assert!(store.to_json()["gameState"].get("napped").is_none());
}

/// Never finishes in time.
struct StallingEvaluator;

impl ExpressionEvaluator for StallingEvaluator {
    fn evaluate(
        &self,
        _expr: &str,
        _context: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, SandboxError> {
        thread::sleep(timeout);
        Err(SandboxError::Timeout(timeout.as_millis() as u64))
    }
}

#[test]
fn timed_out_rule_aborts_invocation() {
    let store = fresh_state();
    let manager = RulesetManager::new(
        Arc::new(StallingEvaluator),
        Arc::clone(&store) as Arc<dyn StateStore>,
        Duration::from_millis(20),
    );
    let id = manager.load_ruleset(&napping_ruleset("character.xp >= 0")).unwrap();
    manager.set_active(&id).unwrap();

    let result = manager.invoke_in(Phase::Rest, "nap", &Map::new());
    assert_eq!(result.kind(), Some(ErrorKind::Runtime));
    assert!(result.error.unwrap().message.contains("20 ms time limit"));
    assert!(store.to_json()["gameState"].get("napped").is_none());
}

#[test]
fn concurrent_invocations_on_shared_roots_serialize() {
    let store = fresh_state();
    let manager = Arc::new(manager(Arc::clone(&store)));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                manager.invoke_in(Phase::Progression, "gain_xp", &args(json!({ "amount": 10 })))
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().success);
    }
    assert_eq!(store.to_json()["character"]["xp"], json!(100));
}

#[test]
fn concurrent_invocations_on_disjoint_roots() {
    let store = fresh_state();
    let manager = Arc::new(manager(Arc::clone(&store)));

    let xp = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            (0..5)
                .map(|_| manager.invoke_in(Phase::Progression, "gain_xp", &args(json!({ "amount": 1 }))))
                .all(|r| r.success)
        })
    };
    let travel = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            (0..5)
                .map(|_| {
                    manager.invoke_in(
                        Phase::Exploration,
                        "travel",
                        &args(json!({ "destination": "road", "hours": 2 })),
                    )
                })
                .all(|r| r.success)
        })
    };

    assert!(xp.join().unwrap());
    assert!(travel.join().unwrap());
    let state = store.to_json();
    assert_eq!(state["character"]["xp"], json!(5));
    assert_eq!(state["gameState"]["hoursElapsed"], json!(10));
}
