use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tutor_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tutor"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let project = root.join("project");
    fs::create_dir_all(project.join("src")).unwrap();
    fs::write(
        project.join("src/main.rs"),
        "mod store;\n\nfn main() {\n    store::open();\n}\n",
    )
    .unwrap();
    fs::write(project.join("src/store.rs"), "pub fn open() {}\n").unwrap();
    fs::write(project.join("README.md"), "# Project\n\nA tiny project.\n").unwrap();

    let config_content = format!(
        r#"[llm]
provider = "disabled"

[generation]
output_dir = "{root}/output"

[cache]
dir = "{root}/data/cache"
prompt_db = "{root}/data/prompts.sqlite"

[crawl]
include_globs = ["**/*.rs", "**/*.md"]

[logging]
level = "error"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("tutor.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_tutor(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tutor_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tutor binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_tutor(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Cache initialized"));
    assert!(tmp.path().join("data/prompts.sqlite").exists());
    assert!(tmp.path().join("data/cache/repos").is_dir());

    // second run is a no-op
    let (_, stderr, success) = run_tutor(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_plan_without_cache_is_full() {
    let (tmp, config_path) = setup_test_env();
    let project = tmp.path().join("project");

    let (stdout, stderr, success) = run_tutor(
        &config_path,
        &["plan", project.to_str().unwrap(), "--repo-url", "https://github.com/acme/tiny"],
    );
    assert!(success, "plan failed: {}", stderr);
    assert!(stdout.contains("Files:      3"));
    assert!(stdout.contains("No cached generation found."));
    assert!(stdout.contains("Plan: full"));
}

#[test]
fn test_cache_stats_on_empty_cache() {
    let (_tmp, config_path) = setup_test_env();
    run_tutor(&config_path, &["init"]);

    let (stdout, stderr, success) = run_tutor(&config_path, &["cache", "stats"]);
    assert!(success, "cache stats failed: {}", stderr);
    assert!(stdout.contains("Entries:       0"));
    assert!(stdout.contains("Repositories:     0"));
}

#[test]
fn test_cache_clear_unknown_repo() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_tutor(&config_path, &["cache", "clear", "https://github.com/acme/unknown"]);
    assert!(success, "cache clear failed: {}", stderr);
    assert!(stdout.contains("No cached generation for https://github.com/acme/unknown"));
}

#[test]
fn test_generate_with_disabled_provider_fails_cleanly() {
    let (tmp, config_path) = setup_test_env();
    let project = tmp.path().join("project");

    let (_, stderr, success) = run_tutor(&config_path, &["generate", project.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "unexpected stderr: {}", stderr);
    assert!(!tmp.path().join("output").exists());
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[generation]\nmax_abstractions = 0\n").unwrap();

    let (_, stderr, success) = run_tutor(&config_path, &["cache", "stats"]);
    assert!(!success);
    assert!(stderr.contains("max_abstractions"), "unexpected stderr: {}", stderr);
}
