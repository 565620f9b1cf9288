//! Versioned rule tables that parameterise the normalizer and the classifier.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

const BUILTIN_DESIGNATED_CITIES: &str = include_str!("../../../rules/designated_cities.yaml");
const BUILTIN_NAME_RULES: &str = include_str!("../../../rules/name_rules.yaml");
const BUILTIN_DOMAIN_TRUST: &str = include_str!("../../../rules/domain_trust.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct DesignatedCity {
    pub prefecture: String,
    pub city: String,
    pub wards: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DesignatedCityTable {
    pub version: u32,
    #[serde(default)]
    pub cities: Vec<DesignatedCity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NameRules {
    pub version: u32,
    #[serde(default)]
    pub organizational_suffixes: Vec<String>,
    #[serde(default)]
    pub admin_unit_suffixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrustRulesConfig {
    pub version: u32,
    #[serde(default)]
    pub government_suffixes: Vec<String>,
    #[serde(default)]
    pub trusted_platforms: Vec<String>,
    pub government_naming_pattern: String,
    #[serde(default)]
    pub government_regions: Vec<String>,
    #[serde(default)]
    pub government_keywords: Vec<String>,
    #[serde(default)]
    pub phonetic_alternations: Vec<(String, String)>,
    #[serde(default)]
    pub slug_unit_tokens: Vec<String>,
    #[serde(default)]
    pub document_extensions: Vec<String>,
    #[serde(default)]
    pub document_query_keys: Vec<String>,
}

/// Everything the normalizer and classifier are built from. Loaded once per
/// run and passed in; nothing reads these tables from global state.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub designated_cities: DesignatedCityTable,
    pub names: NameRules,
    pub trust: TrustRulesConfig,
}

fn parse_yaml<T: DeserializeOwned>(text: &str, label: &str) -> Result<T> {
    serde_yaml::from_str(text).with_context(|| format!("parsing {label}"))
}

fn read_yaml<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<T> {
    let path = dir.join(file);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_yaml(&text, &path.display().to_string())
}

impl RuleSet {
    /// The tables shipped in the repository's `rules/` directory.
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            designated_cities: parse_yaml(
                BUILTIN_DESIGNATED_CITIES,
                "builtin designated_cities.yaml",
            )?,
            names: parse_yaml(BUILTIN_NAME_RULES, "builtin name_rules.yaml")?,
            trust: parse_yaml(BUILTIN_DOMAIN_TRUST, "builtin domain_trust.yaml")?,
        })
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        Ok(Self {
            designated_cities: read_yaml(dir, "designated_cities.yaml")?,
            names: read_yaml(dir, "name_rules.yaml")?,
            trust: read_yaml(dir, "domain_trust.yaml")?,
        })
    }

    pub fn versions(&self) -> String {
        format!(
            "designated_cities=v{} name_rules=v{} domain_trust=v{}",
            self.designated_cities.version, self.names.version, self.trust.version
        )
    }
}
