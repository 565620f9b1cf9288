//! Coverage and quality report over a reconciliation run.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use kaiso_core::{
    Candidate, DirectoryEntry, DirectorySnapshot, JisCode, LinkStatus, StagingSet, UnmatchedReason,
};
use serde::Serialize;
use tracing::warn;

use crate::classify::LinkClassifier;

/// A candidate that did not resolve to exactly one directory entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnresolvedCandidate {
    Unmatched {
        candidate: Candidate,
        normalized: String,
        reason: UnmatchedReason,
        suggestions: Vec<String>,
    },
    Ambiguous {
        candidate: Candidate,
        normalized: String,
        entries: Vec<DirectoryEntry>,
    },
}

impl UnresolvedCandidate {
    pub fn candidate(&self) -> &Candidate {
        match self {
            UnresolvedCandidate::Unmatched { candidate, .. } => candidate,
            UnresolvedCandidate::Ambiguous { candidate, .. } => candidate,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, UnresolvedCandidate::Ambiguous { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedKind {
    PdfOnlyWithoutDocument,
    OkWithoutUrl,
    DocumentInUrl,
    PublishedWithoutLink,
}

impl MalformedKind {
    pub fn describe(&self) -> &'static str {
        match self {
            MalformedKind::PdfOnlyWithoutDocument => {
                "PDF_ONLY but pdfUrl is missing or not a document link"
            }
            MalformedKind::OkWithoutUrl => "OK but url is missing",
            MalformedKind::DocumentInUrl => "url holds a document link",
            MalformedKind::PublishedWithoutLink => "published with no link",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedRecord {
    pub code: JisCode,
    pub kind: MalformedKind,
}

fn malformed_kinds(
    record: &kaiso_core::StagingRecord,
    classifier: &LinkClassifier,
) -> Vec<MalformedKind> {
    let mut out = Vec::new();
    if record.link_status == LinkStatus::PdfOnly
        && !record.pdf_url.as_deref().is_some_and(|u| classifier.is_document(u))
    {
        out.push(MalformedKind::PdfOnlyWithoutDocument);
    }
    if record.link_status == LinkStatus::Ok && record.url.is_none() {
        out.push(MalformedKind::OkWithoutUrl);
    }
    if record.url.as_deref().is_some_and(|u| classifier.is_document(u)) {
        out.push(MalformedKind::DocumentInUrl);
    }
    if record.is_published && !record.has_link() {
        out.push(MalformedKind::PublishedWithoutLink);
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub generated_at: DateTime<Utc>,
    pub directory_total: usize,
    pub matched: Vec<JisCode>,
    pub missing: Vec<JisCode>,
    pub missing_sample: Vec<DirectoryEntry>,
    pub added: Vec<JisCode>,
    pub updated: Vec<JisCode>,
    pub status_counts: BTreeMap<String, usize>,
    pub domain_warnings: usize,
    pub orphans: Vec<JisCode>,
    pub unresolved: Vec<UnresolvedCandidate>,
    pub malformed: Vec<MalformedRecord>,
}

impl AuditReport {
    /// `before` and `after` are the staging sets around the merge; pass the
    /// same set twice for a read-only audit.
    pub fn build(
        before: &StagingSet,
        after: &StagingSet,
        snapshot: &DirectorySnapshot,
        unresolved: Vec<UnresolvedCandidate>,
        classifier: &LinkClassifier,
        sample_size: usize,
    ) -> Self {
        let mut matched = Vec::new();
        let mut missing = Vec::new();
        let mut missing_sample = Vec::new();
        for entry in snapshot.entries() {
            if after.get(&entry.code).is_some_and(|r| r.has_link()) {
                matched.push(entry.code.clone());
            } else {
                missing.push(entry.code.clone());
                if missing_sample.len() < sample_size {
                    missing_sample.push(entry.clone());
                }
            }
        }

        let mut added = Vec::new();
        let mut updated = Vec::new();
        for (code, record) in after {
            match before.get(code) {
                None => added.push(code.clone()),
                Some(previous) if previous != record => updated.push(code.clone()),
                Some(_) => {}
            }
        }

        let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut domain_warnings = 0usize;
        let mut orphans = Vec::new();
        let mut malformed = Vec::new();
        for (code, record) in after {
            *status_counts.entry(record.link_status.as_str().to_string()).or_default() += 1;
            if record.has_domain_warning {
                domain_warnings += 1;
            }
            if !snapshot.contains(code) {
                orphans.push(code.clone());
            }
            for kind in malformed_kinds(record, classifier) {
                warn!(%code, problem = kind.describe(), "malformed staging record");
                malformed.push(MalformedRecord {
                    code: code.clone(),
                    kind,
                });
            }
        }

        Self {
            generated_at: Utc::now(),
            directory_total: snapshot.len(),
            matched,
            missing,
            missing_sample,
            added,
            updated,
            status_counts,
            domain_warnings,
            orphans,
            unresolved,
            malformed,
        }
    }

    pub fn ambiguous_count(&self) -> usize {
        self.unresolved.iter().filter(|u| u.is_ambiguous()).count()
    }

    pub fn unmatched_count(&self) -> usize {
        self.unresolved.len() - self.ambiguous_count()
    }

    pub fn summary_line(&self) -> String {
        format!(
            concat!(
                "directory={} matched={} missing={} added={} updated={} ",
                "warnings={} unmatched={} ambiguous={} malformed={}"
            ),
            self.directory_total,
            self.matched.len(),
            self.missing.len(),
            self.added.len(),
            self.updated.len(),
            self.domain_warnings,
            self.unmatched_count(),
            self.ambiguous_count(),
            self.malformed.len()
        )
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Reburial Permit Link Audit\n");
        let _ = writeln!(out, "- Generated: {}", self.generated_at);
        let _ = writeln!(out, "- Directory entries: {}", self.directory_total);
        let _ = writeln!(out, "- Matched: {}", self.matched.len());
        let _ = writeln!(out, "- Missing: {}", self.missing.len());
        let _ = writeln!(out, "- Added this run: {}", self.added.len());
        let _ = writeln!(out, "- Updated this run: {}", self.updated.len());
        let _ = writeln!(out, "- Domain warnings: {}", self.domain_warnings);

        let _ = writeln!(out, "\n## Link Status");
        for (status, count) in &self.status_counts {
            let _ = writeln!(out, "- {status}: {count}");
        }

        let _ = writeln!(out, "\n## Missing (first {})", self.missing_sample.len());
        for entry in &self.missing_sample {
            let _ = writeln!(out, "- {} {} {}", entry.code, entry.prefecture_name, entry.name);
        }

        if !self.orphans.is_empty() {
            let _ = writeln!(out, "\n## Orphan Staging Records");
            for code in &self.orphans {
                let _ = writeln!(out, "- {code}");
            }
        }

        let _ = writeln!(out, "\n## Unresolved Candidates");
        if self.unresolved.is_empty() {
            let _ = writeln!(out, "- none");
        }
        for item in &self.unresolved {
            match item {
                UnresolvedCandidate::Unmatched {
                    candidate,
                    normalized,
                    reason,
                    suggestions,
                } => {
                    let _ = write!(
                        out,
                        "- unmatched [{}] {} ({}) → {:?}",
                        candidate.prefecture_label, candidate.raw_name, normalized, reason
                    );
                    if !suggestions.is_empty() {
                        let _ = write!(out, "; did you mean: {}", suggestions.join(", "));
                    }
                    let _ = writeln!(out);
                }
                UnresolvedCandidate::Ambiguous {
                    candidate,
                    normalized,
                    entries,
                } => {
                    let competing = entries
                        .iter()
                        .map(|e| format!("{} {}{}", e.code, e.prefecture_name, e.name))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let _ = writeln!(
                        out,
                        "- ambiguous [{}] {} ({}) → {}",
                        candidate.prefecture_label, candidate.raw_name, normalized, competing
                    );
                }
            }
        }

        if !self.malformed.is_empty() {
            let _ = writeln!(out, "\n## Malformed Records");
            for item in &self.malformed {
                let _ = writeln!(out, "- {}: {}", item.code, item.kind.describe());
            }
        }
        out
    }
}
