//! Drives the `sextant` binary against a throwaway repository with a checked-in index snapshot.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn fixture_index() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../testdata/index.json")
        .canonicalize()
        .expect("fixture index must exist at testdata/index.json")
}

/// Git repository with `.sextant/index.json` copied in, plus a private data dir.
fn workspace() -> (TempDir, TempDir) {
    let repo_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init(repo_dir.path()).unwrap();
    std::fs::write(repo_dir.path().join("README.md"), "fixture\n").unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = git2::Signature::now("test", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();

    let snapshot_dir = repo_dir.path().join(".sextant");
    std::fs::create_dir_all(&snapshot_dir).unwrap();
    std::fs::copy(fixture_index(), snapshot_dir.join("index.json")).unwrap();
    (repo_dir, data_dir)
}

fn sextant(repo: &Path, data: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sextant"))
        .arg("--path")
        .arg(repo)
        .args(args)
        .env("SEXTANT_STORAGE_DATA_DIR", data)
        .env_remove("RUST_LOG")
        .output()
        .expect("run sextant binary")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "sextant failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

fn stderr_json(output: &Output) -> Value {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let line = stderr
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .expect("error JSON on stderr");
    serde_json::from_str(line).expect("stderr error is JSON")
}

#[test]
fn status_lists_backends() {
    let (repo, data) = workspace();
    let status = stdout_json(&sextant(repo.path(), data.path(), &["status"]));

    let backends = status["backends"].as_array().unwrap();
    let index = backends
        .iter()
        .find(|b| b["backendId"] == "index")
        .expect("index backend listed");
    assert_eq!(index["available"], true);
    let lsp = backends.iter().find(|b| b["backendId"] == "lsp").unwrap();
    assert_eq!(lsp["available"], false);
    assert_eq!(status["repoState"]["headCommit"].as_str().unwrap().len(), 40);
}

#[test]
fn search_prints_envelope_with_provenance() {
    let (repo, data) = workspace();
    let envelope = stdout_json(&sextant(
        repo.path(),
        data.path(),
        &["search", "Engine", "--limit", "5"],
    ));

    assert_eq!(envelope["results"][0]["stableId"], "src/engine/Engine");
    assert_eq!(envelope["provenance"]["cached"], false);
    assert!(envelope["provenance"]["repoStateId"].is_string());
    assert!(envelope["drilldowns"].is_array());
}

#[test]
fn impact_reports_callers() {
    let (repo, data) = workspace();
    let envelope = stdout_json(&sextant(
        repo.path(),
        data.path(),
        &["impact", "src/engine/Engine#search()", "--depth", "3"],
    ));

    let items = envelope["items"].as_array().unwrap();
    assert!(items.iter().any(|i| i["kind"] == "direct-caller"));
    assert!(
        items
            .iter()
            .any(|i| i["kind"] == "transitive-caller" && i["stableId"] == "src/cli/main()")
    );
    assert_eq!(envelope["stableId"], "src/engine/Engine#search()");
}

#[test]
fn unknown_symbol_exits_nonzero_with_error_json() {
    let (repo, data) = workspace();
    let output = sextant(repo.path(), data.path(), &["refs", "src/nowhere/missing()"]);

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let error = stderr_json(&output);
    assert_eq!(error["code"], "symbol_not_found");
    assert!(error["message"].is_string());
}

#[test]
fn invalid_scope_is_rejected() {
    let (repo, data) = workspace();
    let output = sextant(
        repo.path(),
        data.path(),
        &["search", "Engine", "--scope", "../outside"],
    );

    assert!(!output.status.success());
    assert_eq!(stderr_json(&output)["code"], "scope_invalid");
}
