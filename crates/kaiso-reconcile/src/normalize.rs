//! Municipality name normalization and designated-city ward aliasing.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use kaiso_adapters::strip_invisible;
use regex::Regex;

use crate::rules::{DesignatedCityTable, NameRules};

const PREFECTURES: [&str; 47] = [
    "北海道", "青森県", "岩手県", "宮城県", "秋田県", "山形県", "福島県",
    "茨城県", "栃木県", "群馬県", "埼玉県", "千葉県", "東京都", "神奈川県",
    "新潟県", "富山県", "石川県", "福井県", "山梨県", "長野県", "岐阜県",
    "静岡県", "愛知県", "三重県", "滋賀県", "京都府", "大阪府", "兵庫県",
    "奈良県", "和歌山県", "鳥取県", "島根県", "岡山県", "広島県", "山口県",
    "徳島県", "香川県", "愛媛県", "高知県", "福岡県", "佐賀県", "長崎県",
    "熊本県", "大分県", "宮崎県", "鹿児島県", "沖縄県",
];

static PREFECTURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&PREFECTURES.join("|")).expect("prefecture pattern"));

static PARENTHESIZED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[（(【\[][^）)】\]]*[）)】\]]").expect("parenthesized pattern"));

fn fold_kana(c: char) -> char {
    match c {
        'ヶ' | 'ｹ' => 'ケ',
        'ヵ' | 'ｶ' => 'カ',
        other => other,
    }
}

/// The one name normalization used for directory names and candidates alike:
/// invisible characters and all whitespace removed, small-ke variants folded.
pub fn canonical_name(name: &str) -> String {
    strip_invisible(name)
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(fold_kana)
        .collect()
}

/// Prefecture key for a heading label or a directory prefecture name: the
/// first prefecture name found in the text, else the whole canonical text.
pub fn prefecture_key(label: &str) -> String {
    let canonical = canonical_name(label);
    match PREFECTURE_RE.find(&canonical) {
        Some(m) => m.as_str().to_string(),
        None => canonical,
    }
}

/// Lookup key produced from a raw anchor name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameKey {
    Plain(String),
    /// A ward collapsed onto its designated city.
    Ward { ward: String, city: String },
    /// A ward name shared by several designated cities of the prefecture.
    AmbiguousWard { ward: String, cities: Vec<String> },
    Unparseable,
}

#[derive(Debug, Clone)]
struct CityWards {
    prefecture: String,
    city: String,
    wards: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    organizational_suffixes: Vec<String>,
    cities: Vec<CityWards>,
    /// prefecture -> ward -> cities having that ward
    wards_by_prefecture: HashMap<String, HashMap<String, Vec<String>>>,
}

impl Normalizer {
    pub fn new(names: &NameRules, designated: &DesignatedCityTable) -> Self {
        let mut organizational_suffixes: Vec<String> = names
            .organizational_suffixes
            .iter()
            .map(|s| canonical_name(s))
            .filter(|s| !s.is_empty())
            .collect();
        organizational_suffixes
            .sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
        organizational_suffixes.dedup();

        let mut cities = Vec::new();
        let mut wards_by_prefecture: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
        for entry in &designated.cities {
            let prefecture = prefecture_key(&entry.prefecture);
            let city = canonical_name(&entry.city);
            let wards: HashSet<String> = entry.wards.iter().map(|w| canonical_name(w)).collect();
            for ward in &wards {
                let owners = wards_by_prefecture
                    .entry(prefecture.clone())
                    .or_default()
                    .entry(ward.clone())
                    .or_default();
                if !owners.contains(&city) {
                    owners.push(city.clone());
                }
            }
            cities.push(CityWards {
                prefecture,
                city,
                wards,
            });
        }

        Self {
            organizational_suffixes,
            cities,
            wards_by_prefecture,
        }
    }

    fn strip_suffixes(&self, mut name: String) -> String {
        loop {
            let Some(suffix) = self
                .organizational_suffixes
                .iter()
                .find(|s| name.len() > s.len() && name.ends_with(s.as_str()))
            else {
                return name;
            };
            name.truncate(name.len() - suffix.len());
        }
    }

    /// Cleaned name before alias resolution.
    pub fn clean(&self, raw_name: &str) -> String {
        let canonical = canonical_name(raw_name);
        let without_notes = PARENTHESIZED_RE.replace_all(&canonical, "").into_owned();
        self.strip_suffixes(without_notes)
    }

    /// `prefecture` is a heading label or prefecture name; empty means unknown.
    pub fn normalize(&self, raw_name: &str, prefecture: &str) -> NameKey {
        let name = self.clean(raw_name);
        if name.is_empty() {
            return NameKey::Unparseable;
        }
        let prefecture = if prefecture.trim().is_empty() {
            String::new()
        } else {
            prefecture_key(prefecture)
        };

        // "<city><ward>" form
        for city in &self.cities {
            if !prefecture.is_empty() && city.prefecture != prefecture {
                continue;
            }
            if let Some(rest) = name.strip_prefix(city.city.as_str()) {
                if city.wards.contains(rest) {
                    return NameKey::Ward {
                        ward: rest.to_string(),
                        city: city.city.clone(),
                    };
                }
            }
        }

        // ward-only form needs the prefecture to know which cities to look at
        if let Some(owners) = self
            .wards_by_prefecture
            .get(&prefecture)
            .and_then(|wards| wards.get(&name))
        {
            return match owners.as_slice() {
                [city] => NameKey::Ward {
                    ward: name.clone(),
                    city: city.clone(),
                },
                _ => NameKey::AmbiguousWard {
                    ward: name.clone(),
                    cities: owners.clone(),
                },
            };
        }

        NameKey::Plain(name)
    }
}
