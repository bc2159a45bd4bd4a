//! End-to-end tests for the ytetl binary

mod common;

use assert_cmd::Command;
use common::{search_page, sqlite_url, API_KEY};
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const ENV_VARS: [&str; 11] = [
    "YT_QUERY",
    "YT_MAX_TOTAL",
    "YT_API_KEY",
    "YT_API_BASE_URL",
    "DB_URL",
    "YTETL_DATA_DIR",
    "YTETL_TABLE",
    "YTETL_LOAD_MODE",
    "YTETL_QUERY_CONCURRENCY",
    "YTETL_PAGE_DELAY_MS",
    "YTETL_MAX_ATTEMPTS",
];

/// The binary, isolated from the caller's environment and any `.env` file.
fn ytetl(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ytetl").unwrap();
    cmd.current_dir(dir.path()).arg("--data-dir").arg(dir.path().join("data"));
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_load_without_db_url_fails() {
    let dir = TempDir::new().unwrap();

    ytetl(&dir)
        .arg("load")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("DB_URL"));
}

#[test]
fn test_extract_without_api_key_fails() {
    let dir = TempDir::new().unwrap();

    ytetl(&dir)
        .args(["extract", "--query", "kpop"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("YT_API_KEY"));
}

#[test]
fn test_extract_without_query_fails() {
    let dir = TempDir::new().unwrap();

    ytetl(&dir)
        .args(["extract", "--api-key", "k"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("YT_QUERY"));
}

#[test]
fn test_transform_without_runs_fails() {
    let dir = TempDir::new().unwrap();

    ytetl(&dir)
        .arg("transform")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no runs recorded"));
}

#[test]
fn test_rejects_unknown_load_mode() {
    let dir = TempDir::new().unwrap();

    ytetl(&dir)
        .args(["load", "--load-mode", "merge"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("merge"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_then_reload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_page("v", 0, 3, None)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_url = sqlite_url(dir.path());

    ytetl(&dir)
        .args(["run", "--query", "kpop", "--run-id", "20240301T000000Z-cafef00d"])
        .args(["--page-delay-ms", "0"])
        .env("YT_API_KEY", API_KEY)
        .env("YT_API_BASE_URL", server.uri())
        .env("DB_URL", &db_url)
        .assert()
        .success()
        .stdout(predicate::str::contains("run_id: 20240301T000000Z-cafef00d"))
        .stdout(predicate::str::contains("rows loaded: 3 (upsert)"));

    assert!(dir
        .path()
        .join("data/runs/20240301T000000Z-cafef00d.json")
        .exists());

    // Loading the same run again from its manifest changes nothing.
    ytetl(&dir)
        .args(["load", "--run-id", "20240301T000000Z-cafef00d"])
        .env("DB_URL", &db_url)
        .assert()
        .success()
        .stdout(predicate::str::contains("loaded 3 rows from 1 files (upsert)"));
}
