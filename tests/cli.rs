//! CLI test cases.
//!
//! Everything here runs offline against the fixtures in `tests/fixtures`.
//! We pass `--freeze-time` wherever we compare output, so reports don't
//! depend on how fast the machine is.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("ocr-quality").unwrap()
}

/// Run a command that should succeed, and return its stdout.
fn stdout_of(cmd: &mut Command) -> Vec<u8> {
    cmd.assert().success().get_output().stdout.clone()
}

/// Parse one JSON document from stdout.
fn json_of(cmd: &mut Command) -> Value {
    serde_json::from_slice(&stdout_of(cmd)).unwrap()
}

/// Parse JSONL from stdout.
fn jsonl_of(output: &[u8]) -> Vec<Value> {
    String::from_utf8(output.to_owned())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_process_single_column() {
    let report = json_of(
        cmd()
            .arg("process")
            .arg("tests/fixtures/document.json")
            .arg("--freeze-time"),
    );
    assert_eq!(report["extracted_text"], "Иван Иванов\nДата: 01.02.2023");
    assert_eq!(report["total_pages"], 1);
    assert_eq!(report["has_multiple_columns"], false);
    assert_eq!(report["pages"][0]["page_number"], 1);
    assert_eq!(report["pages"][0]["columns_count"], 1);
    assert_eq!(report["metrics"]["cer"], 0.0);
    assert_eq!(report["metrics"]["exact_match"], 1.0);
    assert_eq!(report["structured_data"]["date"]["value"], "01.02.2023");
    assert_eq!(report["processing_time"], 0.0);
    assert_eq!(report["noise_processed"], false);
}

#[test]
fn test_process_two_columns() {
    let report = json_of(
        cmd()
            .arg("process")
            .arg("tests/fixtures/two_column.json")
            .arg("--freeze-time"),
    );
    assert_eq!(report["has_multiple_columns"], true);
    let columns = &report["pages"][0]["columns"];
    assert_eq!(columns[0]["side"], "left");
    assert_eq!(columns[0]["language"], "ru");
    assert_eq!(columns[0]["text"], "Фамилия: Иванов\nДата: 01.02.2023");
    assert_eq!(columns[1]["side"], "right");
    assert_eq!(columns[1]["language"], "en");
    assert_eq!(columns[1]["items_count"], 4);
    // No reference text, so no text metrics.
    assert!(report["metrics"].get("cer").is_none());
}

#[test]
fn test_process_with_config_file() {
    // The config requires five tokens per column, so the page stays whole.
    let report = json_of(
        cmd()
            .arg("process")
            .arg("tests/fixtures/two_column.json")
            .arg("--config")
            .arg("tests/fixtures/config.toml")
            .arg("--freeze-time"),
    );
    assert_eq!(report["has_multiple_columns"], false);
    assert_eq!(report["pages"][0]["columns_count"], 1);
}

#[test]
fn test_process_with_ground_truth_file_and_schema() {
    let report = json_of(
        cmd()
            .arg("process")
            .arg("tests/fixtures/two_column.json")
            .arg("--ground-truth-file")
            .arg("tests/fixtures/ground_truth.txt")
            .arg("--schema")
            .arg("tests/fixtures/schema.json")
            .arg("--freeze-time"),
    );
    assert!(report["metrics"]["cer"].as_f64().unwrap() > 0.0);
    assert_eq!(report["json_validity"], true);
    assert_eq!(report["schema_consistency"], false);
    let missing = report["missing_keys"].as_array().unwrap();
    assert!(missing.contains(&Value::from("passport")));
}

#[test]
fn test_noise_reports_noise_metrics() {
    let report = json_of(
        cmd()
            .arg("noise")
            .arg("tests/fixtures/document.json")
            .arg("--freeze-time"),
    );
    assert_eq!(report["noise_processed"], true);
    assert_eq!(report["metrics"]["extra"]["noise_cer"], 0.0);
    assert_eq!(report["metrics"]["extra"]["noise_wer"], 0.0);
}

#[test]
fn test_process_is_deterministic() {
    let run = || {
        stdout_of(
            cmd()
                .arg("process")
                .arg("tests/fixtures/two_column.json")
                .arg("--ground-truth-file")
                .arg("tests/fixtures/ground_truth.txt")
                .arg("--freeze-time"),
        )
    };
    assert_eq!(run(), run());
}

#[test]
fn test_process_writes_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("report.json");
    cmd()
        .arg("process")
        .arg("tests/fixtures/document.json")
        .arg("-o")
        .arg(&out)
        .assert()
        .success();
    let report: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(report["total_pages"], 1);
}

#[test]
fn test_process_missing_input() {
    cmd()
        .arg("process")
        .arg("tests/fixtures/no_such_file.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open file"));
}

#[test]
fn test_batch_jsonl() {
    let output = stdout_of(
        cmd()
            .arg("batch")
            .arg("tests/fixtures/batch.jsonl")
            .args(["--jobs", "2"])
            .arg("--freeze-time"),
    );
    let records = jsonl_of(&output);
    let ids = records.iter().map(|r| r["id"].clone()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["doc-1", "doc-2", "doc-3"]);
    assert!(records.iter().all(|r| r["status"] == "ok"));
    assert_eq!(records[0]["extracted_text"], "Иван Иванов");
    assert_eq!(records[1]["structured_data"]["inn"]["value"], "7707083893");
    assert_eq!(records[2]["structured_data"]["email"]["value"], "ivan@example.com");
}

#[test]
fn test_batch_from_stdin_with_take_first() {
    let input = std::fs::read("tests/fixtures/batch.jsonl").unwrap();
    let output = assert_cmd::Command::cargo_bin("ocr-quality")
        .unwrap()
        .args(["batch", "--take-first", "1", "--freeze-time"])
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let records = jsonl_of(&output);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], "doc-1");
}

#[test]
fn test_batch_failures() {
    // Two of three records fail, which is far above the default threshold.
    cmd()
        .arg("batch")
        .arg("tests/fixtures/batch_with_failures.jsonl")
        .assert()
        .failure()
        .stderr(predicate::str::contains("were failures"));

    let output = stdout_of(
        cmd()
            .arg("batch")
            .arg("tests/fixtures/batch_with_failures.jsonl")
            .args(["--allowed-failure-rate", "0.7"])
            .arg("--freeze-time"),
    );
    let records = jsonl_of(&output);
    assert_eq!(records[0]["status"], "ok");
    assert_eq!(records[1]["id"], "empty");
    assert_eq!(records[1]["status"], "failed");
    assert_eq!(records[2]["status"], "failed");
    assert!(records[2]["errors"].to_string().contains("confidence"));
}

#[test]
fn test_batch_broken_line() {
    // A line that isn't JSON fails on its own, and the records around it are
    // still written.
    let assert = cmd()
        .arg("batch")
        .arg("tests/fixtures/batch_with_broken_line.jsonl")
        .arg("--freeze-time")
        .assert()
        .failure()
        .stderr(predicate::str::contains("were failures"));
    let records = jsonl_of(&assert.get_output().stdout);
    assert_eq!(records.len(), 3);

    let output = stdout_of(
        cmd()
            .arg("batch")
            .arg("tests/fixtures/batch_with_broken_line.jsonl")
            .args(["--allowed-failure-rate", "0.5"])
            .arg("--freeze-time"),
    );
    let records = jsonl_of(&output);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["id"], "doc-1");
    assert_eq!(records[0]["status"], "ok");
    assert_eq!(records[1]["id"], Value::Null);
    assert_eq!(records[1]["status"], "failed");
    assert!(records[1]["errors"].to_string().contains("line 2"));
    assert_eq!(records[2]["id"], "doc-3");
    assert_eq!(records[2]["status"], "ok");
}

#[test]
fn test_metrics_jsonl() {
    let output = stdout_of(cmd().arg("metrics").arg("tests/fixtures/metrics.jsonl"));
    let records = jsonl_of(&output);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["quality_score"], 1.0);
    assert_eq!(records[1]["word_precision"], 0.5);
    assert_eq!(records[2]["fields"]["date"]["exact_match"], 0.0);
    assert_eq!(records[2]["exact_match_per_document"], 0.0);
}

#[test]
fn test_metrics_csv() {
    let output = stdout_of(cmd().arg("metrics").arg("tests/fixtures/metrics.csv"));
    let records = jsonl_of(&output);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["id"], "a");
    assert!(records[0].get("fields").is_none());
    assert_eq!(records[1]["fields"]["phone"]["exact_match"], 1.0);
    assert_eq!(records[2]["fields"]["date"]["exact_match"], 0.0);
    assert!(records[2]["fields"].get("phone").is_none());
}

#[test]
fn test_schema_types() {
    let types = [
        "Document",
        "Report",
        "BatchInput",
        "BatchOutput",
        "MetricsInput",
        "MetricsOutput",
        "Config",
        "Schema",
    ];
    for schema_type in types {
        println!("Testing schema type: {}", schema_type);
        let schema = json_of(cmd().arg("schema").arg(schema_type));
        assert!(schema.get("$schema").is_some());
    }
}
