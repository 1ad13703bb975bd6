use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const NO_KEY_ENV: &str = "SENTINELLE_TEST_NO_SUCH_KEY";

fn sentinelle_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sentinelle");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[store]
backend = "sqlite"
path = "{}/data/sentinelle.sqlite"

[embedding.text]
provider = "disabled"

[embedding.image]
provider = "disabled"

[judge]
api_key_env = "{}"
"#,
        root.display(),
        NO_KEY_ENV
    );

    let config_path = config_dir.join("sentinelle.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sentinelle(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sentinelle_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove(NO_KEY_ENV)
        .env_remove("QDRANT_URL")
        .env_remove("LLM_MODEL")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sentinelle binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sentinelle(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Collections ready."));
    assert!(tmp.path().join("data/sentinelle.sqlite").exists());

    let (stdout, stderr, success) = run_sentinelle(&config_path, &["init"]);
    assert!(success, "second init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Collections ready."));
}

#[test]
fn test_moderate_prints_degraded_trace() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sentinelle(
        &config_path,
        &["moderate", "--user", "user123", "--text", "stalking and doxxing"],
    );
    assert!(success, "moderate failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("No image provided."));
    assert!(stdout.contains("No OCR text."));
    assert!(stdout.contains("No audio provided or transcription."));
    assert!(stdout.contains("Memory: user history fetched (0 flags)."));
    assert!(stdout.contains("Memory: 0 similar imagery hits."));
    assert!(stdout.contains("Final verdict computed (degraded: LLM not configured)."));
    assert!(stdout.contains("is_gbv: false"));
}

#[test]
fn test_moderate_json_report() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sentinelle(
        &config_path,
        &["moderate", "--user", "user456", "--text", "hello there", "--json"],
    );
    assert!(success, "moderate --json failed: stdout={}, stderr={}", stdout, stderr);

    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["steps"].as_array().unwrap().len(), 7);
    assert_eq!(report["observed"]["user_id"], "user456");
    assert_eq!(report["observed"]["combined_text"], "hello there");
    assert_eq!(report["archivist"]["history"]["flags"], 0);
    assert_eq!(report["verdict"]["is_gbv"], false);
    assert_eq!(report["verdict"]["severity"], 1);
    assert_eq!(report["verdict"]["reason"], "LLM not configured");
    assert_eq!(report["verdict"]["degraded"], true);
}

#[test]
fn test_moderate_missing_image_file_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("nope.png");

    let (_, stderr, success) = run_sentinelle(
        &config_path,
        &["moderate", "--user", "u", "--image", missing.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("Failed to read"));
}

#[test]
fn test_history_zero_state() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sentinelle(&config_path, &["history", "nobody"]);
    assert!(success, "history failed: stdout={}, stderr={}", stdout, stderr);

    let history: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(history["flags"], 0);
    assert_eq!(history["toxicity_score"], 0.0);
    assert_eq!(history["notes"], serde_json::json!([]));
}

#[test]
fn test_seed_requires_text_embedder() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_sentinelle(&config_path, &["seed"]);
    assert!(!success);
    assert!(stderr.contains("text embedder"));
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(&bad, "[store]\nbackend = \"postgres\"\n").unwrap();

    let (_, stderr, success) = run_sentinelle(&bad, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Unknown store backend"));
}
