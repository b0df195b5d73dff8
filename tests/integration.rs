use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mhtml_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("mhtml-search");
    path
}

fn archive(html: &str) -> String {
    format!(
        "From: <Saved by Blink>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/related; type=\"text/html\"; boundary=\"----Boundary\"\r\n\
\r\n\
------Boundary\r\n\
Content-Type: text/html\r\n\
Content-Location: https://example.com/\r\n\
\r\n\
{}\r\n\
------Boundary\r\n\
Content-Type: image/png\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0KGgo=\r\n\
------Boundary--\r\n",
        html
    )
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let pages = root.join("pages");
    fs::create_dir_all(pages.join("2024")).unwrap();

    fs::write(
        pages.join("a.mhtml"),
        archive(r#"<html><body><script>{"name": "John", "age": 30}</script></body></html>"#),
    )
    .unwrap();
    fs::write(
        pages.join("2024").join("b.mhtml"),
        archive(r#"<div data-state="{"user": "Jane", "role": "admin"}"></div>"#),
    )
    .unwrap();
    fs::write(
        pages.join("2024").join("c.MHT"),
        archive("<p>{not: valid}</p><p>no json here</p>"),
    )
    .unwrap();
    fs::write(pages.join("readme.txt"), r#"{"name": "John"}"#).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/index.db"

[scan]
threads = 4
"#,
        root.display()
    );
    let config_path = root.join("mhtml-search.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mhtml(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mhtml_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mhtml-search binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn pages_dir(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .join("pages")
        .to_str()
        .unwrap()
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mhtml(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Index initialized"));
    assert!(tmp.path().join("data").join("index.db").exists());

    // idempotent
    let (_, stderr, success) = run_mhtml(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_index_reports_summary() {
    let (_tmp, config_path) = setup_test_env();
    let pages = pages_dir(&config_path);

    let (stdout, stderr, success) = run_mhtml(&config_path, &["index", "--path", &pages]);
    assert!(success, "index failed: {}", stderr);
    assert!(stdout.contains("archives found:     3"), "{}", stdout);
    assert!(stdout.contains("errors:             0"), "{}", stdout);
    assert!(stdout.contains("fragments:          2"), "{}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_reindex_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let pages = pages_dir(&config_path);

    run_mhtml(&config_path, &["index", "--path", &pages]);
    run_mhtml(&config_path, &["index", "--path", &pages]);

    let (stdout, stderr, success) = run_mhtml(
        &config_path,
        &[
            "--format",
            "json",
            "sql",
            "SELECT (SELECT COUNT(*) FROM mhtml_files) AS archives, (SELECT COUNT(*) FROM json_data) AS fragments",
        ],
    );
    assert!(success, "sql failed: {}", stderr);
    let rows: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows[0]["archives"], 3);
    assert_eq!(rows[0]["fragments"], 2);
}

#[test]
fn test_sql_like_returns_matching_paths() {
    let (_tmp, config_path) = setup_test_env();
    let pages = pages_dir(&config_path);
    run_mhtml(&config_path, &["index", "--path", &pages]);

    let (stdout, stderr, success) = run_mhtml(
        &config_path,
        &[
            "--format",
            "json",
            "sql",
            "SELECT file_path FROM mhtml_files WHERE file_path LIKE '%.mhtml' ORDER BY file_path",
        ],
    );
    assert!(success, "sql failed: {}", stderr);
    let rows: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0]["file_path"].as_str().unwrap().ends_with("b.mhtml"));
    assert!(rows[1]["file_path"].as_str().unwrap().ends_with("a.mhtml"));
}

#[test]
fn test_sql_free_text_search() {
    let (_tmp, config_path) = setup_test_env();
    let pages = pages_dir(&config_path);
    run_mhtml(&config_path, &["index", "--path", &pages]);

    let (stdout, stderr, success) =
        run_mhtml(&config_path, &["--format", "csv", "sql", "Jane"]);
    assert!(success, "search failed: {}", stderr);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "file_path,json_data");
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains("b.mhtml"));
}

#[test]
fn test_sql_error_is_reported_not_fatal() {
    let (_tmp, config_path) = setup_test_env();
    run_mhtml(&config_path, &["init"]);

    let (_, stderr, success) = run_mhtml(&config_path, &["sql", "SELECT * FROM missing_table"]);
    assert!(success);
    assert!(stderr.contains("Query error"));
    assert!(stderr.contains("No results found"));
}

#[test]
fn test_sql_stacked_statements_leave_index_intact() {
    let (_tmp, config_path) = setup_test_env();
    let pages = pages_dir(&config_path);
    run_mhtml(&config_path, &["index", "--path", &pages]);

    let (stdout, stderr, success) = run_mhtml(
        &config_path,
        &["sql", "SELECT 1 AS one; DELETE FROM mhtml_files"],
    );
    assert!(success);
    assert!(stdout.is_empty(), "{}", stdout);
    assert!(stderr.contains("Query error"), "{}", stderr);

    let (stdout, _, _) = run_mhtml(
        &config_path,
        &["--format", "json", "sql", "SELECT COUNT(*) AS n FROM mhtml_files"],
    );
    let rows: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows[0]["n"], 3);
}

#[test]
fn test_scan_finds_john() {
    let (_tmp, config_path) = setup_test_env();
    let pages = pages_dir(&config_path);

    let (stdout, stderr, success) = run_mhtml(
        &config_path,
        &["--format", "json", "scan", &pages, "--query", "John"],
    );
    assert!(success, "scan failed: {}", stderr);
    let rows: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0]["file_path"].as_str().unwrap().ends_with("a.mhtml"));
    assert!(rows[0]["json_data"]
        .as_str()
        .unwrap()
        .contains(r#""name": "John""#));
}

#[test]
fn test_scan_rejects_malformed_json() {
    let (_tmp, config_path) = setup_test_env();
    let pages = pages_dir(&config_path);

    let (_, stderr, success) =
        run_mhtml(&config_path, &["scan", &pages, "--query", "not: valid"]);
    assert!(success);
    assert!(stderr.contains("No results found"));
}

#[test]
fn test_limit_truncates_with_notice() {
    let (_tmp, config_path) = setup_test_env();
    let pages = pages_dir(&config_path);
    run_mhtml(&config_path, &["index", "--path", &pages]);

    let (stdout, stderr, success) = run_mhtml(
        &config_path,
        &["--limit", "1", "sql", "SELECT file_path FROM mhtml_files"],
    );
    assert!(success);
    assert!(stderr.contains("Showing first 1 of 3 results"));
    // header, rule, one row
    assert_eq!(stdout.lines().count(), 3);
}

#[test]
fn test_stats_after_index() {
    let (_tmp, config_path) = setup_test_env();
    let pages = pages_dir(&config_path);
    run_mhtml(&config_path, &["index", "--path", &pages]);

    let (stdout, stderr, success) = run_mhtml(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Archives:    3"));
    assert!(stdout.contains("Fragments:   2"));
    assert!(stdout.contains("Empty:       1"));
}

#[test]
fn test_unwritable_index_fails() {
    let (_tmp, config_path) = setup_test_env();
    let blocker = config_path.parent().unwrap().join("blocker");
    fs::write(&blocker, "not a directory").unwrap();
    let db = blocker.join("index.db");

    let (_, _, success) = run_mhtml(
        &config_path,
        &["--index-db", db.to_str().unwrap(), "init"],
    );
    assert!(!success);
}

#[cfg(feature = "analytics")]
#[test]
fn test_scan_with_analytics() {
    let (_tmp, config_path) = setup_test_env();
    let pages = pages_dir(&config_path);

    let (stdout, stderr, success) = run_mhtml(
        &config_path,
        &[
            "--format",
            "json",
            "scan",
            &pages,
            "--analytics",
            "--query",
            "SELECT COUNT(*) AS fragments, COUNT(DISTINCT file_path) AS archives FROM mhtml_data",
        ],
    );
    assert!(success, "scan failed: {}", stderr);
    let rows: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows[0]["fragments"], 2);
    assert_eq!(rows[0]["archives"], 2);
}

#[cfg(feature = "analytics")]
#[test]
fn test_sql_with_analytics_over_index() {
    let (_tmp, config_path) = setup_test_env();
    let pages = pages_dir(&config_path);
    run_mhtml(&config_path, &["index", "--path", &pages]);

    let (stdout, stderr, success) = run_mhtml(
        &config_path,
        &[
            "--format",
            "json",
            "sql",
            "--analytics",
            "SELECT file_path, COUNT(*) AS n FROM mhtml_data GROUP BY file_path ORDER BY file_path",
        ],
    );
    assert!(success, "sql failed: {}", stderr);
    let rows: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["n"], 1);
}
