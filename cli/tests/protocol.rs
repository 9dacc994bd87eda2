use std::path::PathBuf;
use std::time::Duration;

use muzzle::{EngineProcess, Request, ScriptSource};
use serde_json::json;

fn engine(args: &[&str]) -> EngineProcess {
    EngineProcess::spawn(env!("CARGO_BIN_EXE_muzzle"), args)
        .unwrap()
        .with_timeout(Duration::from_secs(30))
}

fn scratch_file(name: &str, content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("muzzle-cli-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_execute_round_trip() {
    smol::block_on(async {
        let mut engine = engine(&["serve"]);

        let script = ScriptSource::new(
            "module.exports = { greet(name) { console.log('hi', name); return 'hello ' + name; } }",
        );
        let loaded = engine.call(&Request::load("s1", &script)).await;
        assert!(loaded.ok, "{:?}", loaded.error);

        let response = engine
            .call(&Request::execute(Some("s1"), Some("greet"), vec![json!("Ada")]))
            .await;
        assert!(response.ok, "{:?}", response.error);
        assert_eq!(response.result, json!("hello Ada"));
        assert_eq!(response.log.len(), 1);
        assert_eq!(response.log[0].message, "hi Ada");

        let missing = engine
            .call(&Request::execute(Some("s2"), Some("greet"), vec![]))
            .await;
        assert!(!missing.ok);
        assert_eq!(missing.error.as_deref(), Some("session s2 is not initialized"));

        engine.close_stdin();
        assert!(engine.wait().await.unwrap().success());
    });
}

#[test]
fn test_kill_answers_then_exits() {
    smol::block_on(async {
        let mut engine = engine(&["serve"]);

        let response = engine.call(&Request::kill()).await;
        assert!(response.ok);

        let status = engine.wait().await.unwrap();
        assert!(status.success());
    });
}

#[test]
fn test_user_error_keeps_engine_alive() {
    smol::block_on(async {
        let mut engine = engine(&["serve"]);

        let script = ScriptSource::new("module.exports = { boom() { throw new Error('nope'); } }");
        assert!(engine.call(&Request::load("s1", &script)).await.ok);

        let failed = engine
            .call(&Request::execute(Some("s1"), Some("boom"), vec![]))
            .await;
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("nope"));
        assert!(failed.stack.is_some_and(|stack| stack.contains("s1:1:")));

        let described = engine.call(&Request::describe(Some("s1"))).await;
        assert!(described.ok);
        assert_eq!(described.result, json!({ "boom": { "type": "function" } }));

        assert!(engine.call(&Request::kill()).await.ok);
        assert!(engine.wait().await.unwrap().success());
    });
}

#[test]
fn test_single_mode_from_files() {
    let script = scratch_file("single.js", "(event) => scale * event.value");
    let variables = scratch_file("single-vars.json", r#"{ "scale": 3 }"#);

    smol::block_on(async {
        let mut engine = engine(&[
            "single",
            "--script",
            script.to_str().unwrap(),
            "--variables",
            variables.to_str().unwrap(),
        ]);

        let response = engine
            .call(&Request::execute(None, None, vec![json!({ "value": 7 })]))
            .await;
        assert!(response.ok, "{:?}", response.error);
        assert_eq!(response.result, json!(21));

        let rejected = engine.call(&Request::unload("script")).await;
        assert!(!rejected.ok);

        engine.close_stdin();
        assert!(engine.wait().await.unwrap().success());
    });
}

#[test]
fn test_missing_script_file_fails_to_start() {
    smol::block_on(async {
        let mut engine = engine(&["single", "--script", "/nonexistent/muzzle-script.js"]);
        let status = engine.wait().await.unwrap();
        assert!(!status.success());
    });
}
