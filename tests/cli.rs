use assert_fs::prelude::*;
use predicates::prelude::*;
use std::path::PathBuf;

fn bin(home: &assert_fs::TempDir) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("ruleweave").expect("binary");
    cmd.env("RUST_LOG", "off")
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("RULEWEAVE_RULESETS_DIR")
        .env_remove("RULEWEAVE_DEFAULT_RULESET")
        .env_remove("RULEWEAVE_EVAL_TIMEOUT_MS")
        .env_remove("RULEWEAVE_EVAL_MEMORY_LIMIT");
    cmd
}

fn sample_ruleset() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("rulesets/heroic-fantasy.yaml")
}

#[test]
fn validate_sample_ruleset() {
    let tmp = assert_fs::TempDir::new().unwrap();
    bin(&tmp)
        .arg("validate")
        .arg(sample_ruleset())
        .assert()
        .success()
        .stdout(predicate::str::contains("heroic-fantasy@1.0.0: valid"));
}

#[test]
fn validate_reports_every_error() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let file = tmp.child("broken.json");
    file.write_str(
        r#"{
            "metadata": { "id": "broken", "name": "Broken", "version": "1" },
            "functionsByPhase": {
                "shopping": [],
                "combat": [{
                    "id": "hit", "name": "hit", "parameters": [],
                    "ruleValidations": ["{target} > 0"],
                    "effects": [{ "target": "character.hp", "operation": "multiply", "value": 2 }]
                }]
            }
        }"#,
    )
    .unwrap();

    bin(&tmp)
        .arg("validate")
        .arg(file.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("3 structural error(s)"))
        .stdout(predicate::str::contains("functionsByPhase.shopping"))
        .stdout(predicate::str::contains("ruleValidations[0]"))
        .stdout(predicate::str::contains("effects[0].operation"));
}

#[test]
fn validate_flags_unsafe_rules() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let file = tmp.child("sneaky.yaml");
    file.write_str(
        "metadata: { id: sneaky, name: Sneaky, version: 1 }\n\
         functionsByPhase:\n  combat:\n    - id: a\n      name: a\n      ruleValidations: [\"os.execute('ls') == nil\"]\n",
    )
    .unwrap();

    bin(&tmp)
        .arg("validate")
        .arg(file.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("unsafe rule expression"));
}

#[test]
fn schemas_prints_json() {
    let tmp = assert_fs::TempDir::new().unwrap();
    bin(&tmp)
        .args(["schemas", "--phase", "character_creation"])
        .arg(sample_ruleset())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"select_race\""))
        .stdout(predicate::str::contains("\"additionalProperties\": false"));
}

#[test]
fn invoke_writes_state() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let state = tmp.child("state.json");
    state
        .write_str(r#"{ "character": { "race": "" }, "gameState": { "log": [] } }"#)
        .unwrap();

    bin(&tmp)
        .arg("invoke")
        .arg(sample_ruleset())
        .args(["--phase", "character_creation", "--function", "select_race"])
        .args(["--args", r#"{"raceId":"elf"}"#])
        .arg("--state")
        .arg(state.path())
        .arg("--write")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"));

    state.assert(predicate::str::contains("\"race\": \"elf\""));
    state.assert(predicate::str::contains("Chose race elf"));
}

#[test]
fn invoke_rejected_leaves_state() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let state = tmp.child("state.json");
    let original = r#"{ "character": { "race": "" }, "gameState": { "log": [] } }"#;
    state.write_str(original).unwrap();

    bin(&tmp)
        .arg("invoke")
        .arg(sample_ruleset())
        .args(["--phase", "character_creation", "--function", "select_race"])
        .args(["--args", r#"{"raceId":"dragon"}"#])
        .arg("--state")
        .arg(state.path())
        .arg("--write")
        .assert()
        .failure()
        .stdout(predicate::str::contains("failedValidations"));

    state.assert(original);
}

#[test]
fn check_expression() {
    let tmp = assert_fs::TempDir::new().unwrap();
    bin(&tmp)
        .args(["check", "character.level >= 5 && character.hp > 0"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("safe"));

    bin(&tmp)
        .args(["check", "require('fs')"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("host access"));
}

#[test]
fn list_rulesets_dir() {
    let tmp = assert_fs::TempDir::new().unwrap();
    let dir = tmp.child("rules");
    dir.create_dir_all().unwrap();
    dir.child("fantasy.yaml")
        .write_str(&std::fs::read_to_string(sample_ruleset()).unwrap())
        .unwrap();

    bin(&tmp)
        .arg("list")
        .arg("--dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("heroic-fantasy@1.0.0"));

    bin(&tmp)
        .arg("list")
        .env("RULEWEAVE_RULESETS_DIR", dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Heroic Fantasy Basics"));
}
