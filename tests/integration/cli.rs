//! End-to-end command tests against the built binary

use assert_cmd::Command;
use chrono::NaiveDate;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use paper_harvester::harvester::HarvestStatus;
use paper_harvester::output::Dataset;
use paper_harvester::resume::CheckpointStore;
use paper_harvester::FeedId;

const ONE_RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">
  <opensearch:totalResults>1</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/abs/2401.05555v1</id>
    <updated>2024-01-09T20:00:00Z</updated>
    <published>2024-01-09T20:00:00Z</published>
    <title>Only Paper</title>
    <summary>Alone.</summary>
    <author><name>Grace Hopper</name></author>
    <category term="cs.AI"/>
  </entry>
</feed>"#;

fn harvester(checkpoints: &TempDir, data: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("paper-harvester").unwrap();
    cmd.arg("--checkpoint-dir")
        .arg(checkpoints.path())
        .arg("--data-dir")
        .arg(data.path());
    cmd
}

#[test]
fn run_once_rejects_a_non_operating_date() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();

    let output = harvester(&checkpoints, &data)
        .args(["run-once", "--date", "2024-01-13", "--feeds", "cs.AI"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not an operating day"), "stderr: {stderr}");
    assert!(std::fs::read_dir(data.path()).unwrap().next().is_none());
}

#[test]
fn run_once_rejects_an_unknown_feed() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();

    harvester(&checkpoints, &data)
        .args(["run-once", "--date", "2024-01-10", "--feeds", "not a feed"])
        .assert()
        .failure();
}

#[test]
fn page_size_out_of_range_is_a_usage_error() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();

    harvester(&checkpoints, &data)
        .args(["--page-size", "0", "status", "--date", "2024-01-10"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn status_reports_unstarted_feeds_as_json() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();

    let output = harvester(&checkpoints, &data)
        .args([
            "--output-format",
            "json",
            "status",
            "--date",
            "2024-01-10",
            "--feeds",
            "cs.AI,stat.ML",
        ])
        .output()
        .unwrap();

    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["publish_date"], "2024-01-10");
    let feeds = report["feeds"].as_array().unwrap();
    assert_eq!(feeds.len(), 2);
    assert_eq!(feeds[0]["feed"], "cs.AI");
    assert_eq!(feeds[0]["started"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_once_writes_dataset_from_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ONE_RECORD))
        .mount(&server)
        .await;

    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let base_url = format!("{}/api/query", server.uri());

    let mut cmd = harvester(&checkpoints, &data);
    cmd.args([
        "--base-url",
        &base_url,
        "--min-request-interval-ms",
        "0",
        "--output-format",
        "json",
        "run-once",
        "--date",
        "2024-01-10",
        "--feeds",
        "cs.AI",
    ]);
    let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap();

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["overall_status"], "complete");
    assert_eq!(report["total_records"], 1);

    let dataset = Dataset::load(&data.path().join("papers_2024-01-10.json")).unwrap();
    assert_eq!(dataset.records.len(), 1);
    assert_eq!(dataset.records[0].record.id.as_str(), "2401.05555");
}

#[tokio::test(flavor = "multi_thread")]
async fn run_once_fails_when_a_feed_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ONE_RECORD))
        .mount(&server)
        .await;

    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
    let corrupt = CheckpointStore::new(checkpoints.path())
        .checkpoint_path(&FeedId::parse("cs.LG").unwrap(), date);
    std::fs::write(corrupt, "{ not json").unwrap();
    let base_url = format!("{}/api/query", server.uri());

    let mut cmd = harvester(&checkpoints, &data);
    cmd.args([
        "--base-url",
        &base_url,
        "--min-request-interval-ms",
        "0",
        "--output-format",
        "json",
        "run-once",
        "--date",
        "2024-01-10",
        "--feeds",
        "cs.AI,cs.LG",
    ]);
    let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap();

    assert!(!output.status.success());
    let dataset = Dataset::load(&data.path().join("papers_2024-01-10.json")).unwrap();
    assert_eq!(dataset.overall_status, HarvestStatus::PartialComplete);
    let errored = &dataset.feeds[&FeedId::parse("cs.LG").unwrap()];
    assert_eq!(errored.status, HarvestStatus::Failed);
    assert!(errored.last_error.is_some());
}
