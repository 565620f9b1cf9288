use std::fs;
use std::path::{Path, PathBuf};

use kaiso_core::{JisCode, LinkStatus, StagingRecord};
use kaiso_reconcile::{ReconcileConfig, ReconcilePipeline};
use kaiso_storage::StorageError;
use tempfile::{tempdir, TempDir};

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

fn links_page() -> PathBuf {
    fixtures().join("links").join("sample").join("page.html")
}

/// Workspace with the fixture directory and the one-record staging file.
fn workspace() -> (TempDir, ReconcileConfig) {
    let dir = tempdir().unwrap();
    let config = ReconcileConfig::for_workspace(dir.path());
    fs::create_dir_all(dir.path().join("data")).unwrap();
    fs::copy(fixtures().join("directory.json"), &config.directory_path).unwrap();
    fs::copy(fixtures().join("links/sample/staging.json"), &config.staging_path).unwrap();
    (dir, config)
}

fn read_staging(path: &Path) -> Vec<StagingRecord> {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn record<'a>(records: &'a [StagingRecord], code: &str) -> &'a StagingRecord {
    records
        .iter()
        .find(|r| r.jis_code.as_str() == code)
        .unwrap_or_else(|| panic!("no staging record for {code}"))
}

#[tokio::test]
async fn full_run_merges_links_and_reports_the_rest() {
    let (_dir, config) = workspace();
    let pipeline = ReconcilePipeline::new(config.clone()).unwrap();
    let summary = pipeline.run(Some(links_page().as_path())).await.unwrap();

    assert_eq!(summary.candidates, 8);
    let codes = |v: &[JisCode]| v.iter().map(|c| c.as_str().to_string()).collect::<Vec<_>>();
    assert_eq!(codes(summary.merge.added.as_slice()), vec!["13102", "14100", "14130", "14382"]);
    assert_eq!(codes(summary.merge.updated.as_slice()), vec!["13101"]);

    let records = read_staging(&config.staging_path);
    let sorted: Vec<_> = records.iter().map(|r| r.jis_code.as_str()).collect();
    assert_eq!(sorted, vec!["13101", "13102", "14100", "14130", "14382"]);

    // designated city: direct page link wins, ward document kept as a sub-link
    let yokohama = record(&records, "14100");
    assert_eq!(
        yokohama.url.as_deref(),
        Some("https://www.city.yokohama.lg.jp/kurashi/kaiso.html")
    );
    assert_eq!(yokohama.pdf_url, None);
    assert_eq!(yokohama.link_status, LinkStatus::Ok);
    assert_eq!(yokohama.sub_links.len(), 1);
    assert_eq!(yokohama.sub_links[0].name, "鶴見区");
    assert_eq!(yokohama.sub_links[0].url, "https://example.city.yokohama.lg.jp/x.pdf");

    // newest link wins, previous one is traced in notes
    let chiyoda = record(&records, "13101");
    assert_eq!(chiyoda.url.as_deref(), Some("https://new.example.jp/b"));
    assert!(chiyoda.notes.as_deref().unwrap().contains("https://old.example.jp/a"));
    assert!(chiyoda.has_domain_warning);

    // untrusted host
    let hakone = record(&records, "14382");
    assert!(hakone.has_domain_warning);
    assert_eq!(hakone.link_status, LinkStatus::NeedsReview);
    assert!(!hakone.is_published);

    let kawasaki = record(&records, "14130");
    assert!(!kawasaki.has_domain_warning);
    assert!(kawasaki.is_published);

    let reports_dir = PathBuf::from(&summary.reports_dir);
    let audit = fs::read_to_string(reports_dir.join("audit.md")).unwrap();
    assert!(audit.contains("- Matched: 5"));
    assert!(audit.contains("- Missing: 2"));
    assert!(audit.contains("札幌市"));
    assert!(audit.contains("14150 神奈川県相模原市"));

    let unresolved_text = fs::read_to_string(reports_dir.join("unresolved.json")).unwrap();
    let unresolved: Vec<serde_json::Value> = serde_json::from_str(&unresolved_text).unwrap();
    let kinds: Vec<_> = unresolved.iter().map(|u| u["kind"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["ambiguous", "unmatched"]);
    assert_eq!(unresolved[1]["reason"], "no_directory_entry");
    assert!(summary.summary_line().contains("matched=5 missing=2"));
}

#[tokio::test]
async fn rerunning_the_same_input_leaves_staging_byte_identical() {
    let (_dir, config) = workspace();
    let pipeline = ReconcilePipeline::new(config.clone()).unwrap();
    pipeline.run(Some(links_page().as_path())).await.unwrap();
    let first = fs::read(&config.staging_path).unwrap();

    let summary = pipeline.run(Some(links_page().as_path())).await.unwrap();
    let second = fs::read(&config.staging_path).unwrap();
    assert_eq!(first, second);
    assert!(summary.merge.added.is_empty());
    assert!(summary.merge.updated.is_empty());
    assert_eq!(summary.merge.unchanged.len(), 5);
}

#[tokio::test]
async fn prefecture_label_disambiguates_shared_names() {
    let dir = tempdir().unwrap();
    let config = ReconcileConfig::for_workspace(dir.path());
    fs::create_dir_all(dir.path().join("data")).unwrap();
    fs::write(
        &config.directory_path,
        r#"[
  {"jisCode":"01","name":"中央区","prefectureName":"A県","slug":"a-chuo"},
  {"jisCode":"02","name":"中央区","prefectureName":"B県","slug":"b-chuo"}
]"#,
    )
    .unwrap();
    let input = dir.path().join("candidates.json");
    fs::write(
        &input,
        r#"[{"prefectureLabel":"A県","rawName":"中央区",
             "href":"https://www.city.chuo-a.lg.jp/kaiso.html"}]"#,
    )
    .unwrap();

    let pipeline = ReconcilePipeline::new(config.clone()).unwrap();
    pipeline.init_staging().await.unwrap();
    let summary = pipeline.run(Some(input.as_path())).await.unwrap();

    assert_eq!(summary.merge.added, vec![JisCode::parse("01").unwrap()]);
    let records = read_staging(&config.staging_path);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].link_status, LinkStatus::Ok);
}

#[tokio::test]
async fn missing_staging_file_is_fatal() {
    let dir = tempdir().unwrap();
    let config = ReconcileConfig::for_workspace(dir.path());
    fs::create_dir_all(dir.path().join("data")).unwrap();
    fs::copy(fixtures().join("directory.json"), &config.directory_path).unwrap();

    let pipeline = ReconcilePipeline::new(config.clone()).unwrap();
    let err = pipeline.run(Some(links_page().as_path())).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::MissingInput { .. })
    ));
    assert!(!config.staging_path.exists());
}

#[tokio::test]
async fn missing_candidate_input_is_reported() {
    let (_dir, config) = workspace();
    let pipeline = ReconcilePipeline::new(config).unwrap();
    let err = pipeline.run(None).await.unwrap_err();
    assert!(err.to_string().contains("KAISO_INPUT_PATH"));
}

#[tokio::test]
async fn seed_and_audit_cover_the_whole_directory() {
    let (_dir, config) = workspace();
    let pipeline = ReconcilePipeline::new(config.clone()).unwrap();
    pipeline.run(Some(links_page().as_path())).await.unwrap();

    assert_eq!(pipeline.seed().await.unwrap(), 2);
    assert_eq!(pipeline.seed().await.unwrap(), 0);
    let records = read_staging(&config.staging_path);
    assert_eq!(records.len(), 7);
    assert_eq!(record(&records, "14384").link_status, LinkStatus::Unknown);

    let report = pipeline.audit().await.unwrap();
    assert_eq!(report.matched.len(), 5);
    assert_eq!(report.missing.len(), 2);
    assert!(report.malformed.is_empty());
    assert!(report.orphans.is_empty());
    assert_eq!(report.status_counts.get("UNKNOWN"), Some(&2));
}

#[tokio::test]
async fn init_refuses_to_overwrite_staging() {
    let (_dir, config) = workspace();
    let pipeline = ReconcilePipeline::new(config).unwrap();
    let err = pipeline.init_staging().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::StagingExists { .. })
    ));
}
