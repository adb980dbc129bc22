#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use jsonschema::JSONSchema;
use serde_json::{json, Value};
use ulid::Ulid;

fn sfb_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_sfb") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/sfb");
            if !path.exists() {
                let status = Command::new("cargo")
                    .args(["build", "-p", "skill-feedback-cli", "--bin", "sfb"])
                    .status();
                match status {
                    Ok(value) if value.success() => {}
                    Ok(value) => panic!("failed to build sfb binary (status={value})"),
                    Err(err) => panic!("failed to invoke cargo build: {err}"),
                }
            }
            path
        }
    }
}

fn sfb_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(sfb_binary_path());
    command.env_remove("RUST_LOG");
    command.arg("--db").arg(db_path);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run sfb command {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "command failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn temp_path(label: &str, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sfb-contract-{label}-{}.{extension}", Ulid::new()))
}

fn fixture_lines() -> Vec<String> {
    vec![
        json!({"type": "user", "message": {"content": "push the auth fix to the release branch"}}),
        json!({"type": "assistant", "message": {"content": [
            {"type": "text", "text": "Editing the handler."},
            {"type": "tool_use", "id": "t1", "name": "Edit",
             "input": {"file_path": "src/auth.rs", "old_string": "a", "new_string": "b"}}
        ]}}),
        json!({"type": "user", "message": {"content": [
            {"type": "tool_result", "tool_use_id": "t1", "content": "ok"}
        ]}}),
        json!({"type": "assistant", "message": {"content": [
            {"type": "tool_use", "id": "t2", "name": "Bash", "input": {"command": "git push origin release | tee log"}}
        ]}}),
        json!({"type": "user", "message": {"content": [
            {"type": "tool_result", "tool_use_id": "t2", "is_error": true,
             "content": "rejected: non-fast-forward, git push needs a rebase"}
        ]}}),
        json!({"type": "user", "message": {"content": "I said to rebase the branch before you push"}}),
        json!({"type": "assistant", "message": {"content": [
            {"type": "tool_use", "id": "t3", "name": "Edit",
             "input": {"file_path": "src/auth.rs", "old_string": "b", "new_string": "c"}}
        ]}}),
    ]
    .into_iter()
    .map(|value| value.to_string())
    .chain(std::iter::once("not json at all".to_string()))
    .collect()
}

fn write_transcript(label: &str, lines: &[String]) -> PathBuf {
    let path = temp_path(label, "jsonl");
    if let Err(err) = fs::write(&path, lines.join("\n")) {
        panic!("failed to write transcript fixture {}: {err}", path.display());
    }
    path
}

fn assert_extraction_schema(value: &Value) {
    let schema_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../contracts/extraction/v1/extraction.schema.json");
    let body = match fs::read_to_string(&schema_path) {
        Ok(value) => value,
        Err(err) => panic!("failed to read {}: {err}", schema_path.display()),
    };
    let schema: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(err) => panic!("failed to parse {}: {err}", schema_path.display()),
    };
    let compiled = match JSONSchema::compile(&schema) {
        Ok(value) => value,
        Err(err) => panic!("failed to compile {}: {err}", schema_path.display()),
    };
    if let Some(errors) = compiled
        .validate(value)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>())
    {
        panic!("schema validation failed:\n{}", errors.join("\n"));
    }
}

#[test]
fn help_lists_expected_subcommands() {
    let output = match Command::new(sfb_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["extract", "trace", "feedback", "report", "catalog"] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn extract_emits_schema_valid_linked_extraction() {
    let db_path = temp_path("extract", "sqlite3");
    let transcript = write_transcript("extract", &fixture_lines());

    let output = sfb_output(&db_path, &["extract", transcript.to_str().unwrap_or("")]);
    assert_success(&output);
    let payload = stdout_json(&output);
    assert_extraction_schema(&payload);

    assert_eq!(payload["contract_version"], json!("extraction.v1"));
    assert_eq!(payload["variant"], json!("extract"));
    assert_eq!(payload["metrics"]["malformed_lines"], json!(1));
    assert_eq!(payload["metrics"]["error_count"], json!(1));
    assert_eq!(payload["metrics"]["correction_count"], json!(1));
    assert_eq!(payload["metrics"]["backtrack_count"], json!(1));
    assert_eq!(payload["errors"][0]["tool"], json!("Bash"));
    assert_eq!(payload["tool_timeline"][1]["input_summary"], json!("git push origin release"));
    assert_eq!(payload["tool_timeline"][1]["success"], json!(false));

    let top = &payload["improvement_targets"][0];
    assert_eq!(top["target"]["file"], json!("RULES.md"));
    assert_eq!(top["target"]["section"], json!("## Git Workflow"));
    assert_eq!(top["link_count"], json!(2));
    assert!(!db_path.exists(), "extract without --record must not create a store");

    let _ = fs::remove_file(&transcript);
}

#[test]
fn trace_omits_linking_fields() {
    let db_path = temp_path("trace", "sqlite3");
    let transcript = write_transcript("trace", &fixture_lines());

    let output = sfb_output(&db_path, &["trace", transcript.to_str().unwrap_or("")]);
    assert_success(&output);
    let payload = stdout_json(&output);
    assert_extraction_schema(&payload);

    assert_eq!(payload["variant"], json!("trace"));
    assert!(payload.get("improvement_targets").is_none());
    assert!(payload["errors"][0].get("linked_target").is_none());
    assert!(payload["corrections"][0].get("linked_target").is_none());

    let _ = fs::remove_file(&transcript);
}

#[test]
fn missing_transcript_exits_non_zero() {
    let db_path = temp_path("missing", "sqlite3");
    let missing = temp_path("missing", "jsonl");

    let output = sfb_output(&db_path, &["extract", missing.to_str().unwrap_or("")]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to read"),
        "expected stable error shape, got stderr={stderr}"
    );
}

#[test]
fn unparseable_transcript_exits_non_zero() {
    let db_path = temp_path("garbage", "sqlite3");
    let transcript = write_transcript("garbage", &["{oops".to_string(), "still not json".to_string()]);

    let output = sfb_output(&db_path, &["trace", transcript.to_str().unwrap_or("")]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no parseable transcript events"),
        "expected stable error shape, got stderr={stderr}"
    );

    let _ = fs::remove_file(&transcript);
}

#[test]
fn empty_transcript_yields_empty_extraction() {
    let db_path = temp_path("empty", "sqlite3");
    let transcript = write_transcript("empty", &[]);

    let output = sfb_output(&db_path, &["extract", transcript.to_str().unwrap_or("")]);
    assert_success(&output);
    let payload = stdout_json(&output);
    assert_extraction_schema(&payload);
    assert_eq!(payload["metrics"]["total_lines"], json!(0));
    assert_eq!(payload["improvement_targets"], json!([]));

    let _ = fs::remove_file(&transcript);
}

#[test]
fn recorded_feedback_flows_through_triage_and_report() {
    let db_path = temp_path("flow", "sqlite3");
    let transcript = write_transcript("flow", &fixture_lines());
    let transcript_arg = transcript.to_str().unwrap_or("");

    let mut ids = Vec::new();
    for _ in 0..3 {
        let output = sfb_output(&db_path, &["extract", transcript_arg, "--record"]);
        assert_success(&output);
        let recorded = stdout_json(&output);
        assert_eq!(recorded["triage_status"], json!("open"));
        assert_extraction_schema(&recorded["extraction"]);
        ids.push(recorded["feedback_id"].as_str().unwrap_or_default().to_string());
    }

    let listing = stdout_json(&sfb_output(&db_path, &["feedback", "list"]));
    assert_eq!(listing["contract_version"], json!("feedback_list.v1"));
    assert_eq!(listing["records"].as_array().map(Vec::len), Some(3));
    assert_eq!(listing["records"][0]["feedback_id"], json!(ids[0]));

    let triaged = sfb_output(
        &db_path,
        &["feedback", "triage", "--id", &ids[0], "--status", "dismissed"],
    );
    assert_success(&triaged);
    assert_eq!(stdout_json(&triaged)["triage_status"], json!("dismissed"));

    let open = stdout_json(&sfb_output(&db_path, &["feedback", "list", "--status", "open"]));
    assert_eq!(open["records"].as_array().map(Vec::len), Some(2));

    let shown = sfb_output(&db_path, &["feedback", "show", "--id", &ids[1]]);
    assert_success(&shown);
    assert_eq!(stdout_json(&shown)["source"], json!(transcript_arg));

    let report = sfb_output(&db_path, &["report", "--json"]);
    assert_success(&report);
    let report = stdout_json(&report);
    assert_eq!(report["contract_version"], json!("structure_report.v1"));
    assert_eq!(report["status"], json!("open"));
    assert_eq!(report["total_scanned"], json!(2));
    assert_eq!(report["top_targets"][0]["link_count"], json!(4));

    let text = sfb_output(&db_path, &["report", "--status", "dismissed"]);
    assert_success(&text);
    let text = String::from_utf8_lossy(&text.stdout);
    assert!(text.contains("Scanned: 1 feedback records (status: dismissed)"));
    assert!(text.contains("Split candidates\n  none"));

    let _ = fs::remove_file(&transcript);
    let _ = fs::remove_file(&db_path);
}

#[test]
fn unknown_feedback_id_exits_non_zero() {
    let db_path = temp_path("unknown", "sqlite3");

    let output = sfb_output(
        &db_path,
        &["feedback", "show", "--id", &Ulid::new().to_string()],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("feedback not found"),
        "expected stable error shape, got stderr={stderr}"
    );

    let triage = sfb_output(
        &db_path,
        &["feedback", "triage", "--id", "not-a-ulid", "--status", "accepted"],
    );
    assert!(!triage.status.success());

    let _ = fs::remove_file(&db_path);
}

#[test]
fn empty_store_report_is_success() {
    let db_path = temp_path("empty-report", "sqlite3");

    let output = sfb_output(&db_path, &["report"]);
    assert_success(&output);
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("Scanned: 0 feedback records (status: open)"));
    assert!(text.contains("New skill candidates\n  none"));

    let _ = fs::remove_file(&db_path);
}

#[test]
fn catalog_show_falls_back_to_builtin_on_malformed_file() {
    let db_path = temp_path("catalog", "sqlite3");
    let catalog_path = temp_path("catalog", "json");
    if let Err(err) = fs::write(&catalog_path, "{ not valid json") {
        panic!("failed to write catalog fixture: {err}");
    }

    let output = sfb_output(
        &db_path,
        &["--catalog", catalog_path.to_str().unwrap_or(""), "catalog", "show"],
    );
    assert_success(&output);
    let payload = stdout_json(&output);
    assert!(payload["claude_md"]["RULES.md"]["## Git Workflow"].is_array());

    let _ = fs::remove_file(&catalog_path);
}
