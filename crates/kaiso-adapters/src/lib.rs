//! Candidate sources: heading + anchor markup, and candidate JSON files.

use std::path::Path;

use anyhow::{Context, Result};
use kaiso_core::Candidate;
use kaiso_storage::{read_json_file, read_text_file};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const CRATE_NAME: &str = "kaiso-adapters";

const HEADING_TAGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Markup,
    CandidateJson,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
}

pub trait CandidateSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn candidates(&self, input: &str) -> Result<Vec<Candidate>, AdapterError>;
}

/// Remove BOM, zero-width and bidi marks, and non-whitespace control characters.
pub fn strip_invisible(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !matches!(*c,
                '\u{200B}'..='\u{200F}' |
                '\u{2028}'..='\u{202F}' |
                '\u{2060}'..='\u{2064}' |
                '\u{FEFF}'
            ) && !(c.is_control() && !c.is_whitespace())
        })
        .collect()
}

/// Invisible characters removed, whitespace runs collapsed to one space, trimmed.
pub fn sanitize_text(text: &str) -> String {
    strip_invisible(text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_heading(element: &ElementRef<'_>) -> bool {
    HEADING_TAGS.contains(&element.value().name())
}

fn inside_heading(element: &ElementRef<'_>) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|e| HEADING_TAGS.contains(&e.name()))
    })
}

fn addressable(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    !(href.is_empty() || href.starts_with('#') || lower.starts_with("javascript:"))
}

/// Extracts one candidate per anchor, labelled with the nearest preceding
/// heading. Permissive: markup without that structure yields nothing.
#[derive(Debug, Clone)]
pub struct HeadingAnchorExtractor {
    selector: Selector,
    base_url: Option<Url>,
}

impl HeadingAnchorExtractor {
    pub fn new() -> Self {
        let selector = Selector::parse("h1, h2, h3, h4, h5, h6, a")
            .expect("static selector is valid");
        Self {
            selector,
            base_url: None,
        }
    }

    /// Resolve relative hrefs against `base`.
    pub fn with_base_url(mut self, base: &str) -> Result<Self, AdapterError> {
        let parsed = Url::parse(base)
            .map_err(|e| AdapterError::Message(format!("invalid base url {base:?}: {e}")))?;
        self.base_url = Some(parsed);
        Ok(self)
    }

    fn resolve(&self, href: &str) -> String {
        match &self.base_url {
            Some(base) => base
                .join(href)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.to_string()),
            None => href.to_string(),
        }
    }

    pub fn extract(&self, markup: &str) -> Vec<Candidate> {
        let document = Html::parse_fragment(markup);
        let mut current_heading: Option<String> = None;
        let mut out = Vec::new();
        let mut dropped_without_heading = 0usize;

        for element in document.select(&self.selector) {
            if is_heading(&element) {
                current_heading = Some(sanitize_text(&element.text().collect::<String>()));
                continue;
            }
            if inside_heading(&element) {
                continue;
            }
            let Some(href) = element.value().attr("href").map(str::trim) else {
                continue;
            };
            if !addressable(href) {
                continue;
            }
            let Some(label) = &current_heading else {
                dropped_without_heading += 1;
                continue;
            };
            let raw_name = sanitize_text(&element.text().collect::<String>());
            debug!(prefecture = %label, name = %raw_name, href, "extracted candidate");
            out.push(Candidate {
                prefecture_label: label.clone(),
                raw_name,
                href: self.resolve(href),
            });
        }

        if dropped_without_heading > 0 {
            debug!(dropped_without_heading, "anchors before the first heading were dropped");
        }
        out
    }
}

impl Default for HeadingAnchorExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateSource for HeadingAnchorExtractor {
    fn kind(&self) -> SourceKind {
        SourceKind::Markup
    }

    fn candidates(&self, input: &str) -> Result<Vec<Candidate>, AdapterError> {
        Ok(self.extract(input))
    }
}

/// Candidates previously written by the `extract` command.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateJsonSource;

impl CandidateSource for CandidateJsonSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CandidateJson
    }

    fn candidates(&self, input: &str) -> Result<Vec<Candidate>, AdapterError> {
        serde_json::from_str(input)
            .map_err(|e| AdapterError::Message(format!("invalid candidate JSON: {e}")))
    }
}

pub fn source_for_path(path: &Path) -> Box<dyn CandidateSource> {
    if is_candidate_json(path) {
        Box::new(CandidateJsonSource)
    } else {
        Box::new(HeadingAnchorExtractor::new())
    }
}

fn is_candidate_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

pub async fn load_candidates_file(path: impl AsRef<Path>) -> Result<Vec<Candidate>> {
    let candidates: Vec<Candidate> = read_json_file(path.as_ref()).await?;
    Ok(candidates)
}

/// Read `path` and produce candidates with the source its extension selects.
/// `base_url` only applies to markup input.
pub async fn load_candidates(
    path: impl AsRef<Path>,
    base_url: Option<&str>,
) -> Result<Vec<Candidate>> {
    let path = path.as_ref();
    let source: Box<dyn CandidateSource> = match base_url {
        Some(base) if !is_candidate_json(path) => {
            Box::new(HeadingAnchorExtractor::new().with_base_url(base)?)
        }
        _ => source_for_path(path),
    };
    let candidates = match source.kind() {
        SourceKind::CandidateJson => load_candidates_file(path).await?,
        SourceKind::Markup => {
            let text = read_text_file(path).await?;
            source
                .candidates(&text)
                .with_context(|| format!("extracting candidates from {}", path.display()))?
        }
    };
    info!(
        path = %path.display(),
        kind = ?source.kind(),
        candidates = candidates.len(),
        "loaded candidates"
    );
    Ok(candidates)
}
