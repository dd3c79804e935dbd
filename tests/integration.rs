use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn dix_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dix");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt covers cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.html"),
        "<html><body><nav>menu</nav><div id=\"content\" class=\"content-inner\"><h1>Beta</h1>\
         <p>Beta discusses deployment with Kubernetes.</p><script>var x = 1;</script></div></body></html>",
    )
    .unwrap();
    fs::write(files_dir.join("ignored.bin"), "not indexed").unwrap();

    let config_content = format!(
        r#"[chunking]
size = 8
overlap = 2

[embedding]
provider = "hash"
dims = 64

[store]
backend = "flat"

[store.flat]
root = "{}/store"
"#,
        root.display()
    );

    let config_path = config_dir.join("docindex.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dix(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dix_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("DB_BACKEND")
        .env_remove("DOCINDEX_EMBEDDING_PROVIDER")
        .stdin(Stdio::null())
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dix binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("not JSON ({}): {}", e, stdout))
}

#[test]
fn test_add_is_idempotent() {
    let (tmp, config_path) = setup_test_env();
    let doc = tmp.path().join("files/alpha.md");
    let doc = doc.to_str().unwrap();

    let (stdout, stderr, success) = run_dix(&config_path, &["add", doc]);
    assert!(success, "add failed: {}", stderr);
    assert_eq!(json(&stdout)["status"], "added");

    let (stdout, _, success) = run_dix(&config_path, &["add", doc]);
    assert!(success);
    assert_eq!(json(&stdout)["status"], "already_present");

    let (stdout, _, _) = run_dix(&config_path, &["exists", doc]);
    assert_eq!(json(&stdout)["exists"], true);
}

#[test]
fn test_add_missing_file_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("files/nope.pdf");

    let (stdout, _, success) = run_dix(&config_path, &["add", missing.to_str().unwrap()]);
    assert!(!success);
    assert_eq!(json(&stdout)["status"], "failed");
}

#[test]
fn test_add_dir_view_query_remove() {
    let (tmp, config_path) = setup_test_env();
    let files = tmp.path().join("files");

    let (stdout, stderr, success) = run_dix(&config_path, &["add-dir", files.to_str().unwrap()]);
    assert!(success, "add-dir failed: {}", stderr);
    let outcomes = json(&stdout);
    let outcomes = outcomes.as_array().unwrap();
    assert_eq!(outcomes.len(), 2, "ignored.bin must not be picked up");
    assert!(outcomes.iter().all(|o| o["status"] == "added"));

    let (stdout, _, success) = run_dix(&config_path, &["view"]);
    assert!(success);
    let view = json(&stdout);
    assert_eq!(view["backend"], "flat");
    assert_eq!(view["truncated"], false);
    let records = view["records"].as_array().unwrap();
    assert!(!records.is_empty());
    assert!(records
        .iter()
        .all(|r| !r["text"].as_str().unwrap().contains("var x")));

    let (stdout, _, success) = run_dix(
        &config_path,
        &["query", "Kubernetes deployment", "--n-results", "1"],
    );
    assert!(success);
    assert_eq!(json(&stdout).as_array().unwrap().len(), 1);

    let beta = files.join("beta.html");
    let beta = beta.to_str().unwrap();
    let (stdout, stderr, success) = run_dix(&config_path, &["remove", beta, "--yes"]);
    assert!(success, "remove failed: {}", stderr);
    assert_eq!(json(&stdout)["remaining"], 0);

    let (stdout, _, _) = run_dix(&config_path, &["exists", beta]);
    assert_eq!(json(&stdout)["exists"], false);
}

#[test]
fn test_remove_without_yes_needs_confirmation() {
    let (tmp, config_path) = setup_test_env();
    let doc = tmp.path().join("files/alpha.md");
    let doc = doc.to_str().unwrap();
    run_dix(&config_path, &["add", doc]);

    // stdin is closed, so the prompt reads an empty answer.
    let (_, _, success) = run_dix(&config_path, &["remove", doc]);
    assert!(!success);

    let (stdout, _, _) = run_dix(&config_path, &["exists", doc]);
    assert_eq!(json(&stdout)["exists"], true);
}

#[test]
fn test_empty_query_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_dix(&config_path, &["query", "   "]);
    assert!(!success);
    assert!(stderr.contains("invalid query"));
}

#[test]
fn test_bad_config_fails_fast() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(&config_path, "[chunking]\nsize = 5\noverlap = 5\n").unwrap();

    let (_, stderr, success) = run_dix(&config_path, &["view"]);
    assert!(!success);
    assert!(stderr.contains("invalid configuration"));
}
