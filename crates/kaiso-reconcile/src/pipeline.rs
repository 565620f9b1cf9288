use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use kaiso_adapters::load_candidates;
use kaiso_core::{
    Candidate, DirectorySnapshot, MatchResult, MatchedCandidate, StagingSet, UnmatchedReason,
};
use kaiso_storage::{
    load_directory_snapshot, HealthCheckConfig, LinkHealth, LinkHealthChecker, LinkHealthReport,
    StagingFile,
};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::{AuditReport, UnresolvedCandidate};
use crate::classify::LinkClassifier;
use crate::matcher::Matcher;
use crate::normalize::{NameKey, Normalizer};
use crate::rules::RuleSet;
use crate::staging::{merge, seed_missing, MergeOutcome};

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub workspace_root: PathBuf,
    pub directory_path: PathBuf,
    pub staging_path: PathBuf,
    pub rules_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub input_path: Option<PathBuf>,
    pub base_url: Option<String>,
    pub audit_sample_size: usize,
    pub link_check_concurrency: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ReconcileConfig {
    /// Defaults laid out under `root`: `data/directory.json`,
    /// `data/staging.json`, `rules/` and `reports/`.
    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            directory_path: root.join("data").join("directory.json"),
            staging_path: root.join("data").join("staging.json"),
            rules_dir: root.join("rules"),
            reports_dir: root.join("reports"),
            input_path: None,
            base_url: None,
            audit_sample_size: 20,
            link_check_concurrency: 8,
            http_timeout_secs: 10,
            user_agent: "kaiso-bot/0.1".to_string(),
            workspace_root: root,
        }
    }

    pub fn from_env() -> Self {
        let root = env_path("KAISO_WORKSPACE_ROOT", PathBuf::from("."));
        let defaults = Self::for_workspace(root);
        Self {
            directory_path: env_path("KAISO_DIRECTORY_PATH", defaults.directory_path),
            staging_path: env_path("KAISO_STAGING_PATH", defaults.staging_path),
            rules_dir: env_path("KAISO_RULES_DIR", defaults.rules_dir),
            reports_dir: env_path("KAISO_REPORTS_DIR", defaults.reports_dir),
            input_path: std::env::var("KAISO_INPUT_PATH").ok().map(PathBuf::from),
            base_url: std::env::var("KAISO_BASE_URL").ok().filter(|v| !v.trim().is_empty()),
            audit_sample_size: env_parse("KAISO_AUDIT_SAMPLE_SIZE", defaults.audit_sample_size),
            link_check_concurrency: env_parse(
                "KAISO_LINK_CHECK_CONCURRENCY",
                defaults.link_check_concurrency,
            ),
            http_timeout_secs: env_parse("KAISO_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            user_agent: std::env::var("KAISO_USER_AGENT").unwrap_or(defaults.user_agent),
            workspace_root: defaults.workspace_root,
        }
    }
}

/// Matched candidates ready for the merge plus everything that needs review.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub matched: Vec<MatchedCandidate>,
    pub unresolved: Vec<UnresolvedCandidate>,
}

fn key_name(key: &NameKey) -> String {
    match key {
        NameKey::Plain(name) => name.clone(),
        NameKey::Ward { ward, city } => format!("{city}{ward}"),
        NameKey::AmbiguousWard { ward, .. } => ward.clone(),
        NameKey::Unparseable => String::new(),
    }
}

/// Normalizer, classifier and the name tables the matcher needs, built once
/// from a rule set.
pub struct Reconciler {
    normalizer: Normalizer,
    classifier: LinkClassifier,
    admin_unit_suffixes: Vec<String>,
}

impl Reconciler {
    pub fn from_rules(rules: &RuleSet) -> Result<Self> {
        Ok(Self {
            normalizer: Normalizer::new(&rules.names, &rules.designated_cities),
            classifier: LinkClassifier::from_config(&rules.trust)?,
            admin_unit_suffixes: rules.names.admin_unit_suffixes.clone(),
        })
    }

    pub fn classifier(&self) -> &LinkClassifier {
        &self.classifier
    }

    pub fn reconcile(
        &self,
        snapshot: &DirectorySnapshot,
        candidates: &[Candidate],
    ) -> ReconcileOutcome {
        let matcher = Matcher::new(snapshot, &self.admin_unit_suffixes);
        let mut outcome = ReconcileOutcome::default();

        for candidate in candidates {
            let key = self.normalizer.normalize(&candidate.raw_name, &candidate.prefecture_label);
            let normalized = key_name(&key);
            match matcher.reconcile(&key, &candidate.prefecture_label) {
                MatchResult::Matched(entry) => {
                    let link = self.classifier.assess(&candidate.href, &entry.slug);
                    debug!(
                        code = %entry.code,
                        name = %candidate.raw_name,
                        document = link.is_document,
                        trusted = link.trusted,
                        "candidate matched"
                    );
                    if !link.trusted {
                        warn!(
                            code = %entry.code,
                            href = %candidate.href,
                            "link host is not trusted"
                        );
                    }
                    let via_ward = match &key {
                        NameKey::Ward { ward, .. } => Some(ward.clone()),
                        _ => None,
                    };
                    outcome.matched.push(MatchedCandidate {
                        candidate: candidate.clone(),
                        entry,
                        via_ward,
                        link,
                    });
                }
                MatchResult::Ambiguous(entries) => {
                    warn!(
                        prefecture = %candidate.prefecture_label,
                        name = %candidate.raw_name,
                        competing = entries.len(),
                        "ambiguous candidate left for review"
                    );
                    outcome.unresolved.push(UnresolvedCandidate::Ambiguous {
                        candidate: candidate.clone(),
                        normalized,
                        entries,
                    });
                }
                MatchResult::Unmatched(reason) => {
                    warn!(
                        prefecture = %candidate.prefecture_label,
                        name = %candidate.raw_name,
                        ?reason,
                        "candidate unmatched"
                    );
                    let suggestions = match reason {
                        UnmatchedReason::NoDirectoryEntry => {
                            matcher.suggest(&normalized, &candidate.prefecture_label)
                        }
                        UnmatchedReason::Unparseable => Vec::new(),
                    };
                    outcome.unresolved.push(UnresolvedCandidate::Unmatched {
                        candidate: candidate.clone(),
                        normalized,
                        reason,
                        suggestions,
                    });
                }
            }
        }

        info!(
            candidates = candidates.len(),
            matched = outcome.matched.len(),
            unresolved = outcome.unresolved.len(),
            "reconciliation complete"
        );
        outcome
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidates: usize,
    pub merge: MergeOutcome,
    pub audit: String,
    pub reports_dir: String,
}

impl RunSummary {
    pub fn summary_line(&self) -> String {
        format!(
            "run={} candidates={} {} reports={}",
            self.run_id, self.candidates, self.audit, self.reports_dir
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkCheckSummary {
    pub checked: usize,
    pub healthy: usize,
    pub report_path: String,
}

impl LinkCheckSummary {
    pub fn summary_line(&self) -> String {
        format!(
            "checked={} healthy={} unhealthy={} report={}",
            self.checked,
            self.healthy,
            self.checked - self.healthy,
            self.report_path
        )
    }
}

pub struct ReconcilePipeline {
    config: ReconcileConfig,
    rules: RuleSet,
    reconciler: Reconciler,
}

impl ReconcilePipeline {
    /// Rule tables come from `rules_dir` when it exists, else the built-in set.
    pub fn new(config: ReconcileConfig) -> Result<Self> {
        let rules = if config.rules_dir.is_dir() {
            RuleSet::from_dir(&config.rules_dir)?
        } else {
            RuleSet::builtin()?
        };
        Self::with_rules(config, rules)
    }

    pub fn with_rules(config: ReconcileConfig, rules: RuleSet) -> Result<Self> {
        info!(rules = %rules.versions(), "rule tables loaded");
        let reconciler = Reconciler::from_rules(&rules)?;
        Ok(Self {
            config,
            rules,
            reconciler,
        })
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn staging_file(&self) -> StagingFile {
        StagingFile::new(&self.config.staging_path)
    }

    fn input_path(&self, input: Option<&Path>) -> Result<PathBuf> {
        input
            .map(Path::to_path_buf)
            .or_else(|| self.config.input_path.clone())
            .ok_or_else(|| anyhow!("no candidate input given and KAISO_INPUT_PATH is not set"))
    }

    pub async fn init_staging(&self) -> Result<PathBuf> {
        let staging = self.staging_file();
        staging.init().await?;
        info!(path = %staging.path().display(), "initialised empty staging file");
        Ok(staging.path().to_path_buf())
    }

    pub async fn extract(&self, input: Option<&Path>) -> Result<Vec<Candidate>> {
        let path = self.input_path(input)?;
        load_candidates(&path, self.config.base_url.as_deref()).await
    }

    /// Extract, reconcile, merge into staging and write the run reports.
    pub async fn run(&self, input: Option<&Path>) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        self.run_with_id(run_id, input)
            .instrument(info_span!("reconcile_run", %run_id))
            .await
    }

    async fn run_with_id(&self, run_id: Uuid, input: Option<&Path>) -> Result<RunSummary> {
        let started_at = Utc::now();
        let snapshot = load_directory_snapshot(&self.config.directory_path).await?;
        let staging = self.staging_file();
        let loaded = staging.load().await?;
        info!(directory = snapshot.len(), staged = loaded.records.len(), "inputs loaded");

        let candidates = self.extract(input).await?;
        let outcome = self.reconciler.reconcile(&snapshot, &candidates);
        let merged = merge(loaded.records.clone(), &outcome.matched);
        staging.save(&merged.records, &loaded.content_hash).await?;

        let report = AuditReport::build(
            &loaded.records,
            &merged.records,
            &snapshot,
            outcome.unresolved,
            self.reconciler.classifier(),
            self.config.audit_sample_size,
        );
        let reports_dir = self.write_reports(run_id, &report).await?;

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            candidates: candidates.len(),
            audit: report.summary_line(),
            merge: MergeOutcome {
                records: StagingSet::new(),
                ..merged
            },
            reports_dir: reports_dir.display().to_string(),
        })
    }

    /// Audit the current staging file without merging anything.
    pub async fn audit(&self) -> Result<AuditReport> {
        let snapshot = load_directory_snapshot(&self.config.directory_path).await?;
        let loaded = self.staging_file().load().await?;
        let report = AuditReport::build(
            &loaded.records,
            &loaded.records,
            &snapshot,
            Vec::new(),
            self.reconciler.classifier(),
            self.config.audit_sample_size,
        );
        self.write_reports(Uuid::new_v4(), &report).await?;
        Ok(report)
    }

    /// Add `UNKNOWN` records for directory entries staging has never seen.
    pub async fn seed(&self) -> Result<usize> {
        let snapshot = load_directory_snapshot(&self.config.directory_path).await?;
        let staging = self.staging_file();
        let mut loaded = staging.load().await?;
        let added = seed_missing(&mut loaded.records, &snapshot);
        staging.save(&loaded.records, &loaded.content_hash).await?;
        Ok(added.len())
    }

    async fn write_reports(&self, run_id: Uuid, report: &AuditReport) -> Result<PathBuf> {
        let reports_dir = self.config.reports_dir.join(run_id.to_string());
        fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        fs::write(reports_dir.join("audit.md"), report.render_markdown())
            .await
            .context("writing audit.md")?;

        let unresolved = serde_json::to_vec_pretty(&report.unresolved)
            .context("serializing unresolved candidates")?;
        fs::write(reports_dir.join("unresolved.json"), unresolved)
            .await
            .context("writing unresolved.json")?;

        info!(dir = %reports_dir.display(), "reports written");
        Ok(reports_dir)
    }

    /// Every distinct URL in staging, primary and ward links alike.
    fn staged_urls(records: &StagingSet) -> Vec<String> {
        let mut urls = BTreeSet::new();
        for record in records.values() {
            urls.extend(record.url.iter().cloned());
            urls.extend(record.pdf_url.iter().cloned());
            urls.extend(record.sub_links.iter().map(|s| s.url.clone()));
        }
        urls.into_iter().collect()
    }

    pub async fn check_links(&self) -> Result<LinkCheckSummary> {
        let loaded = self.staging_file().load().await?;
        let urls = Self::staged_urls(&loaded.records);
        let checker = LinkHealthChecker::new(HealthCheckConfig {
            concurrency: self.config.link_check_concurrency,
            timeout: Duration::from_secs(self.config.http_timeout_secs),
            user_agent: Some(self.config.user_agent.clone()),
        })?;
        info!(urls = urls.len(), "checking staged links");
        let reports = checker.check_all(urls).await;

        fs::create_dir_all(&self.config.reports_dir)
            .await
            .with_context(|| format!("creating {}", self.config.reports_dir.display()))?;
        let report_path = self.config.reports_dir.join("link_health.md");
        fs::write(&report_path, render_link_health(&reports))
            .await
            .with_context(|| format!("writing {}", report_path.display()))?;

        Ok(LinkCheckSummary {
            checked: reports.len(),
            healthy: reports.iter().filter(|r| r.health.is_healthy()).count(),
            report_path: report_path.display().to_string(),
        })
    }
}

pub fn render_link_health(reports: &[LinkHealthReport]) -> String {
    let mut out = format!(
        "# Link Health\n\n- Generated: {}\n- Checked: {}\n\n",
        Utc::now(),
        reports.len()
    );
    let _ = writeln!(out, "| URL | Outcome |");
    let _ = writeln!(out, "| --- | --- |");
    for report in reports {
        let outcome = match &report.health {
            LinkHealth::Reachable { status } => format!("reachable ({status})"),
            LinkHealth::HttpError { status } => format!("http error ({status})"),
            LinkHealth::TimedOut => "timed out".to_string(),
            LinkHealth::Failed { reason } => format!("failed: {reason}"),
        };
        let _ = writeln!(out, "| {} | {} |", report.url, outcome);
    }
    out
}
