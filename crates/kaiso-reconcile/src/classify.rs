//! Static link classification: document vs page, and domain trust.
//!
//! Trust is an ordered list of named rules evaluated first-match-wins. A host
//! no rule accepts is untrusted; a false warning is cheaper than a missed one.

use anyhow::{bail, Context, Result};
use kaiso_core::LinkAssessment;
use regex::Regex;
use url::Url;

use crate::rules::TrustRulesConfig;

fn lower(values: &[String]) -> Vec<String> {
    values.iter().map(|s| s.to_ascii_lowercase()).collect()
}

fn parse_href(href: &str) -> Option<Url> {
    let href = href.trim();
    Url::parse(href)
        .or_else(|_| Url::parse("http://relative.invalid/").and_then(|base| base.join(href)))
        .ok()
}

/// Lowercased host of an absolute http(s) URL.
pub fn host_of(href: &str) -> Option<String> {
    let url = Url::parse(href.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

#[derive(Debug, Clone)]
pub struct DocumentRules {
    extensions: Vec<String>,
    query_keys: Vec<String>,
}

impl DocumentRules {
    pub fn new(extensions: &[String], query_keys: &[String]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            query_keys: query_keys.iter().map(|k| k.to_ascii_lowercase()).collect(),
        }
    }

    fn has_document_extension(&self, value: &str) -> bool {
        let last_segment = value.rsplit('/').next().unwrap_or(value);
        last_segment
            .rsplit_once('.')
            .is_some_and(|(_, ext)| self.extensions.iter().any(|e| e == ext))
    }

    /// Fixed binary format judged from the path suffix or embedded format
    /// markers in the query string. Never fetches anything.
    pub fn is_document(&self, href: &str) -> bool {
        let Some(url) = parse_href(href) else {
            return false;
        };
        if self.has_document_extension(&url.path().to_ascii_lowercase()) {
            return true;
        }
        url.query_pairs().any(|(key, value)| {
            let value = value.to_ascii_lowercase();
            self.has_document_extension(&value)
                || (self.query_keys.contains(&key.to_ascii_lowercase())
                    && self.extensions.contains(&value))
        })
    }
}

pub trait TrustRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// `host` is lowercased; `expected_slug` names the municipality the link
    /// is supposed to belong to.
    fn accepts(&self, host: &str, expected_slug: &str) -> bool;
}

pub struct GovernmentSuffixRule {
    suffixes: Vec<String>,
}

impl TrustRule for GovernmentSuffixRule {
    fn name(&self) -> &'static str {
        "government-suffix"
    }

    fn accepts(&self, host: &str, _expected_slug: &str) -> bool {
        self.suffixes.iter().any(|s| host.ends_with(s.as_str()))
    }
}

pub struct TrustedPlatformRule {
    hosts: Vec<String>,
}

impl TrustRule for TrustedPlatformRule {
    fn name(&self) -> &'static str {
        "trusted-platform"
    }

    fn accepts(&self, host: &str, _expected_slug: &str) -> bool {
        self.hosts
            .iter()
            .any(|p| host == p || host.ends_with(&format!(".{p}")))
    }
}

/// Keyword host under a prefecture geographic domain, e.g.
/// `town.hakone.kanagawa.jp`. The pattern's `region` group is checked
/// against the enumerated prefecture labels.
pub struct GovernmentNamingRule {
    pattern: Regex,
    regions: Vec<String>,
}

impl TrustRule for GovernmentNamingRule {
    fn name(&self) -> &'static str {
        "government-naming"
    }

    fn accepts(&self, host: &str, _expected_slug: &str) -> bool {
        self.pattern
            .captures(host)
            .and_then(|caps| caps.name("region"))
            .is_some_and(|region| self.regions.iter().any(|r| r == region.as_str()))
    }
}

pub struct NameFragmentRule {
    keywords: Vec<String>,
    alternations: Vec<(String, String)>,
    unit_tokens: Vec<String>,
}

impl NameFragmentRule {
    const MIN_FRAGMENT_LEN: usize = 3;

    fn fold(&self, text: &str) -> String {
        let mut out = text.to_ascii_lowercase().replace(['-', '_'], "");
        for (from, to) in &self.alternations {
            out = out.replace(from.as_str(), to);
        }
        out
    }

    /// Romanized place fragment from a slug such as `kanagawa-yokohama-shi`:
    /// the last token that is not an administrative unit word, in folded
    /// form. Too short once folded (`tsu` becomes `tu`) means no fragment.
    pub fn fragment(&self, slug: &str) -> Option<String> {
        slug.to_ascii_lowercase()
            .split(|c: char| c == '-' || c == '_' || c == '/')
            .filter(|t| !t.is_empty() && !self.unit_tokens.iter().any(|u| u == t))
            .last()
            .map(|t| self.fold(t))
            .filter(|t| t.len() >= Self::MIN_FRAGMENT_LEN)
    }
}

impl TrustRule for NameFragmentRule {
    fn name(&self) -> &'static str {
        "name-fragment"
    }

    fn accepts(&self, host: &str, expected_slug: &str) -> bool {
        let Some(fragment) = self.fragment(expected_slug) else {
            return false;
        };
        let has_keyword = host
            .split(['.', '-'])
            .any(|label| self.keywords.iter().any(|k| k == label));
        has_keyword && self.fold(host).contains(&fragment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustVerdict {
    pub trusted: bool,
    pub rule: Option<&'static str>,
}

pub struct TrustAssessor {
    rules: Vec<Box<dyn TrustRule>>,
}

impl TrustAssessor {
    pub fn from_config(config: &TrustRulesConfig) -> Result<Self> {
        let pattern = Regex::new(&config.government_naming_pattern)
            .with_context(|| format!("compiling government_naming_pattern v{}", config.version))?;
        if !pattern.capture_names().any(|name| name == Some("region")) {
            bail!(
                "government_naming_pattern v{} has no `region` capture group",
                config.version
            );
        }
        Ok(Self::with_rules(vec![
            Box::new(GovernmentSuffixRule {
                suffixes: lower(&config.government_suffixes),
            }),
            Box::new(TrustedPlatformRule {
                hosts: lower(&config.trusted_platforms),
            }),
            Box::new(GovernmentNamingRule {
                pattern,
                regions: lower(&config.government_regions),
            }),
            Box::new(NameFragmentRule {
                keywords: lower(&config.government_keywords),
                alternations: config
                    .phonetic_alternations
                    .iter()
                    .map(|(a, b)| (a.to_ascii_lowercase(), b.to_ascii_lowercase()))
                    .collect(),
                unit_tokens: lower(&config.slug_unit_tokens),
            }),
        ]))
    }

    pub fn with_rules(rules: Vec<Box<dyn TrustRule>>) -> Self {
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn assess(&self, href: &str, expected_slug: &str) -> TrustVerdict {
        let Some(host) = host_of(href) else {
            return TrustVerdict {
                trusted: false,
                rule: None,
            };
        };
        match self.rules.iter().find(|r| r.accepts(&host, expected_slug)) {
            Some(rule) => TrustVerdict {
                trusted: true,
                rule: Some(rule.name()),
            },
            None => TrustVerdict {
                trusted: false,
                rule: None,
            },
        }
    }
}

pub struct LinkClassifier {
    documents: DocumentRules,
    trust: TrustAssessor,
}

impl LinkClassifier {
    pub fn from_config(config: &TrustRulesConfig) -> Result<Self> {
        Ok(Self::new(
            DocumentRules::new(&config.document_extensions, &config.document_query_keys),
            TrustAssessor::from_config(config)?,
        ))
    }

    pub fn new(documents: DocumentRules, trust: TrustAssessor) -> Self {
        Self { documents, trust }
    }

    pub fn is_document(&self, href: &str) -> bool {
        self.documents.is_document(href)
    }

    pub fn assess_trust(&self, href: &str, expected_slug: &str) -> TrustVerdict {
        self.trust.assess(href, expected_slug)
    }

    pub fn assess(&self, href: &str, expected_slug: &str) -> LinkAssessment {
        let verdict = self.assess_trust(href, expected_slug);
        LinkAssessment {
            is_document: self.is_document(href),
            trusted: verdict.trusted,
            trust_rule: verdict.rule.map(str::to_string),
        }
    }
}
