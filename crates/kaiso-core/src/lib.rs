//! Core domain model for the municipality link reconciliation pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "kaiso-core";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid JIS code {value:?}: expected 2 to 6 ASCII digits")]
pub struct InvalidJisCode {
    pub value: String,
}

/// Administrative identifier of a municipality. Usually five digits, or six
/// when the check digit is carried along; shorter digit strings starting with
/// the two-digit prefecture part are accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JisCode(String);

impl JisCode {
    pub fn parse(value: &str) -> Result<Self, InvalidJisCode> {
        let trimmed = value.trim();
        let valid =
            (2..=6).contains(&trimmed.len()) && trimmed.bytes().all(|b| b.is_ascii_digit());
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidJisCode {
                value: value.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-digit prefecture prefix.
    pub fn prefecture_prefix(&self) -> &str {
        &self.0[..2]
    }
}

impl TryFrom<String> for JisCode {
    type Error = InvalidJisCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JisCode> for String {
    fn from(code: JisCode) -> Self {
        code.0
    }
}

impl fmt::Display for JisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical municipality as exported from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    #[serde(rename = "jisCode", alias = "code")]
    pub code: JisCode,
    pub name: String,
    pub prefecture_name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("duplicate JIS code {code} in directory snapshot")]
pub struct DuplicateCode {
    pub code: JisCode,
}

/// Read-only view over the canonical directory, validated for code uniqueness.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    entries: BTreeMap<JisCode, DirectoryEntry>,
}

impl DirectorySnapshot {
    pub fn from_entries(entries: Vec<DirectoryEntry>) -> Result<Self, DuplicateCode> {
        let mut map = BTreeMap::new();
        for entry in entries {
            if map.contains_key(&entry.code) {
                return Err(DuplicateCode { code: entry.code });
            }
            map.insert(entry.code.clone(), entry);
        }
        Ok(Self { entries: map })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, code: &JisCode) -> Option<&DirectoryEntry> {
        self.entries.get(code)
    }

    pub fn contains(&self, code: &JisCode) -> bool {
        self.entries.contains_key(code)
    }

    /// Entries in JIS code order.
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.values()
    }
}

/// One extracted link, carrying the nearest preceding heading as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub prefecture_label: String,
    pub raw_name: String,
    pub href: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Ok,
    PdfOnly,
    NeedsReview,
    Unknown,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Ok => "OK",
            LinkStatus::PdfOnly => "PDF_ONLY",
            LinkStatus::NeedsReview => "NEEDS_REVIEW",
            LinkStatus::Unknown => "UNKNOWN",
        }
    }
}

/// Ward-level link nested under a designated-city record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubLink {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingRecord {
    pub jis_code: JisCode,
    pub prefecture: String,
    pub municipality: String,
    pub slug: String,
    pub url: Option<String>,
    pub pdf_url: Option<String>,
    pub link_status: LinkStatus,
    pub is_published: bool,
    pub has_domain_warning: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_links: Vec<SubLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl StagingRecord {
    /// Link-less record for a directory entry nobody has resolved yet.
    pub fn unresolved(entry: &DirectoryEntry) -> Self {
        Self {
            jis_code: entry.code.clone(),
            prefecture: entry.prefecture_name.clone(),
            municipality: entry.name.clone(),
            slug: entry.slug.clone(),
            url: None,
            pdf_url: None,
            link_status: LinkStatus::Unknown,
            is_published: false,
            has_domain_warning: false,
            sub_links: Vec::new(),
            notes: None,
        }
    }

    pub fn has_link(&self) -> bool {
        self.url.is_some() || self.pdf_url.is_some()
    }

    pub fn append_note(&mut self, note: &str) {
        match &mut self.notes {
            Some(existing) if !existing.is_empty() => {
                existing.push(' ');
                existing.push_str(note);
            }
            _ => self.notes = Some(note.to_string()),
        }
    }
}

/// Staging collection keyed (and therefore ordered) by JIS code.
pub type StagingSet = BTreeMap<JisCode, StagingRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// Name normalized to nothing.
    Unparseable,
    /// No directory entry under any strategy.
    NoDirectoryEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Matched(DirectoryEntry),
    Ambiguous(Vec<DirectoryEntry>),
    Unmatched(UnmatchedReason),
}

impl MatchResult {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchResult::Matched(_))
    }
}

/// Static classification of a link plus the trust verdict for its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAssessment {
    pub is_document: bool,
    pub trusted: bool,
    /// Name of the trust rule that accepted the host, if any.
    pub trust_rule: Option<String>,
}

/// Handoff contract from reconciliation into the staging merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedCandidate {
    pub candidate: Candidate,
    pub entry: DirectoryEntry,
    /// Ward name when the candidate was collapsed onto its designated city.
    pub via_ward: Option<String>,
    pub link: LinkAssessment,
}
