//! Candidate-to-directory reconciliation.

use std::collections::HashMap;

use kaiso_core::{DirectoryEntry, DirectorySnapshot, MatchResult, UnmatchedReason};
use strsim::jaro_winkler;

use crate::normalize::{canonical_name, prefecture_key, NameKey};

const SUGGESTION_THRESHOLD: f64 = 0.75;
const SUGGESTION_LIMIT: usize = 3;

/// Pure lookup over a directory snapshot. Never picks among several
/// plausible entries.
#[derive(Debug)]
pub struct Matcher<'a> {
    by_prefecture_and_name: HashMap<(String, String), Vec<&'a DirectoryEntry>>,
    by_name: HashMap<String, Vec<&'a DirectoryEntry>>,
    admin_unit_suffixes: Vec<String>,
}

impl<'a> Matcher<'a> {
    pub fn new(snapshot: &'a DirectorySnapshot, admin_unit_suffixes: &[String]) -> Self {
        let mut by_prefecture_and_name: HashMap<(String, String), Vec<&'a DirectoryEntry>> =
            HashMap::new();
        let mut by_name: HashMap<String, Vec<&'a DirectoryEntry>> = HashMap::new();
        for entry in snapshot.entries() {
            let name = canonical_name(&entry.name);
            by_prefecture_and_name
                .entry((prefecture_key(&entry.prefecture_name), name.clone()))
                .or_default()
                .push(entry);
            by_name.entry(name).or_default().push(entry);
        }
        Self {
            by_prefecture_and_name,
            by_name,
            admin_unit_suffixes: admin_unit_suffixes.iter().map(|s| canonical_name(s)).collect(),
        }
    }

    fn exact(&self, name: &str, prefecture: &str) -> &[&'a DirectoryEntry] {
        let hits = if prefecture.is_empty() {
            self.by_name.get(name)
        } else {
            self.by_prefecture_and_name
                .get(&(prefecture.to_string(), name.to_string()))
        };
        hits.map(Vec::as_slice).unwrap_or(&[])
    }

    /// Exact composite-key lookup, then the admin-unit suffix fallback.
    fn lookup(&self, name: &str, prefecture: &str) -> Vec<&'a DirectoryEntry> {
        let mut hits = self.exact(name, prefecture).to_vec();
        if hits.is_empty() {
            // also for names already ending in a unit: 四日市 -> 四日市市
            for suffix in &self.admin_unit_suffixes {
                hits.extend_from_slice(self.exact(&format!("{name}{suffix}"), prefecture));
            }
        }
        hits.sort_by(|a, b| a.code.cmp(&b.code));
        hits.dedup_by(|a, b| a.code == b.code);
        hits
    }

    fn resolve(hits: Vec<&'a DirectoryEntry>) -> MatchResult {
        match hits.as_slice() {
            [] => MatchResult::Unmatched(UnmatchedReason::NoDirectoryEntry),
            [entry] => MatchResult::Matched((*entry).clone()),
            many => MatchResult::Ambiguous(many.iter().map(|e| (*e).clone()).collect()),
        }
    }

    pub fn reconcile(&self, key: &NameKey, prefecture_label: &str) -> MatchResult {
        let prefecture = if prefecture_label.trim().is_empty() {
            String::new()
        } else {
            prefecture_key(prefecture_label)
        };
        match key {
            NameKey::Unparseable => MatchResult::Unmatched(UnmatchedReason::Unparseable),
            NameKey::Plain(name) => Self::resolve(self.lookup(name, &prefecture)),
            NameKey::Ward { city, .. } => Self::resolve(self.lookup(city, &prefecture)),
            NameKey::AmbiguousWard { cities, .. } => {
                let mut hits: Vec<&'a DirectoryEntry> = cities
                    .iter()
                    .flat_map(|city| self.exact(city, &prefecture).to_vec())
                    .collect();
                hits.sort_by(|a, b| a.code.cmp(&b.code));
                hits.dedup_by(|a, b| a.code == b.code);
                if hits.is_empty() {
                    MatchResult::Unmatched(UnmatchedReason::NoDirectoryEntry)
                } else {
                    // the ward belongs to several cities even if only one is loaded
                    MatchResult::Ambiguous(hits.into_iter().cloned().collect())
                }
            }
        }
    }

    /// Closest directory names in the same prefecture, for the review report.
    pub fn suggest(&self, name: &str, prefecture_label: &str) -> Vec<String> {
        let prefecture = prefecture_key(prefecture_label);
        let mut scored: Vec<(f64, &str)> = self
            .by_prefecture_and_name
            .iter()
            .filter(|((pref, _), _)| prefecture.is_empty() || *pref == prefecture)
            .flat_map(|((_, canonical), entries)| {
                let score = jaro_winkler(name, canonical);
                entries.iter().map(move |e| (score, e.name.as_str()))
            })
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(b.1)));
        let mut out: Vec<String> = Vec::new();
        for (_, candidate) in scored {
            if !out.iter().any(|s| s == candidate) {
                out.push(candidate.to_string());
            }
            if out.len() == SUGGESTION_LIMIT {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaiso_core::JisCode;

    fn entry(code: &str, name: &str, prefecture: &str) -> DirectoryEntry {
        DirectoryEntry {
            code: JisCode::parse(code).unwrap(),
            name: name.into(),
            prefecture_name: prefecture.into(),
            slug: name.into(),
        }
    }

    fn suffixes() -> Vec<String> {
        ["市", "町", "村", "区"].iter().map(|s| s.to_string()).collect()
    }

    fn snapshot(entries: Vec<DirectoryEntry>) -> DirectorySnapshot {
        DirectorySnapshot::from_entries(entries).unwrap()
    }

    #[test]
    fn composite_key_matches_exactly() {
        let snap = snapshot(vec![
            entry("14100", "横浜市", "神奈川県"),
            entry("13101", "千代田区", "東京都"),
        ]);
        let matcher = Matcher::new(&snap, &suffixes());
        let result = matcher.reconcile(&NameKey::Plain("横浜市".into()), "神奈川県");
        assert_eq!(result, MatchResult::Matched(entry("14100", "横浜市", "神奈川県")));
    }

    #[test]
    fn suffix_fallback_appends_to_names_ending_in_a_unit() {
        let snap = snapshot(vec![
            entry("24202", "四日市市", "三重県"),
            entry("34213", "廿日市市", "広島県"),
        ]);
        let matcher = Matcher::new(&snap, &suffixes());
        assert_eq!(
            matcher.reconcile(&NameKey::Plain("四日市".into()), "三重県"),
            MatchResult::Matched(entry("24202", "四日市市", "三重県"))
        );
        assert_eq!(
            matcher.reconcile(&NameKey::Plain("廿日市".into()), "広島県"),
            MatchResult::Matched(entry("34213", "廿日市市", "広島県"))
        );
    }

    #[test]
    fn wrong_prefecture_is_unmatched_not_rescued_by_name() {
        let snap = snapshot(vec![
            entry("14100", "横浜市", "神奈川県"),
            entry("01100", "札幌市", "北海道"),
        ]);
        let matcher = Matcher::new(&snap, &suffixes());
        assert_eq!(
            matcher.reconcile(&NameKey::Plain("札幌市".into()), "神奈川県"),
            MatchResult::Unmatched(UnmatchedReason::NoDirectoryEntry)
        );
    }

    #[test]
    fn missing_admin_suffix_is_recovered() {
        let snap = snapshot(vec![entry("14382", "箱根町", "神奈川県")]);
        let matcher = Matcher::new(&snap, &suffixes());
        assert!(matcher
            .reconcile(&NameKey::Plain("箱根".into()), "神奈川県")
            .is_matched());
    }

    #[test]
    fn suffix_fallback_that_hits_two_units_is_ambiguous() {
        let snap = snapshot(vec![
            entry("99201", "みどり市", "X県"),
            entry("99301", "みどり町", "X県"),
        ]);
        let matcher = Matcher::new(&snap, &suffixes());
        match matcher.reconcile(&NameKey::Plain("みどり".into()), "X県") {
            MatchResult::Ambiguous(entries) => assert_eq!(entries.len(), 2),
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn shared_names_need_the_prefecture() {
        let snap = snapshot(vec![entry("00001", "中央区", "A県"), entry("00002", "中央区", "B県")]);
        let matcher = Matcher::new(&snap, &suffixes());
        let key = NameKey::Plain("中央区".into());
        assert_eq!(
            matcher.reconcile(&key, "A県"),
            MatchResult::Matched(entry("00001", "中央区", "A県"))
        );
        match matcher.reconcile(&key, "") {
            MatchResult::Ambiguous(entries) => {
                let codes: Vec<_> = entries.iter().map(|e| e.code.as_str()).collect();
                assert_eq!(codes, vec!["00001", "00002"]);
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn wards_resolve_to_their_city_and_ambiguous_wards_do_not() {
        let snap = snapshot(vec![
            entry("14100", "横浜市", "神奈川県"),
            entry("14150", "相模原市", "神奈川県"),
        ]);
        let matcher = Matcher::new(&snap, &suffixes());
        let ward = NameKey::Ward {
            ward: "鶴見区".into(),
            city: "横浜市".into(),
        };
        assert_eq!(
            matcher.reconcile(&ward, "神奈川県"),
            MatchResult::Matched(entry("14100", "横浜市", "神奈川県"))
        );

        let shared = NameKey::AmbiguousWard {
            ward: "緑区".into(),
            cities: vec!["横浜市".into(), "相模原市".into()],
        };
        assert!(matches!(matcher.reconcile(&shared, "神奈川県"), MatchResult::Ambiguous(_)));
    }

    #[test]
    fn unparseable_names_never_match() {
        let snap = snapshot(vec![entry("14100", "横浜市", "神奈川県")]);
        let matcher = Matcher::new(&snap, &suffixes());
        assert_eq!(
            matcher.reconcile(&NameKey::Unparseable, "神奈川県"),
            MatchResult::Unmatched(UnmatchedReason::Unparseable)
        );
    }

    #[test]
    fn reconcile_is_deterministic() {
        let snap = snapshot(vec![entry("00001", "中央区", "A県"), entry("00002", "中央区", "B県")]);
        let matcher = Matcher::new(&snap, &suffixes());
        let key = NameKey::Plain("中央区".into());
        for label in ["", "A県", "B県", "C県"] {
            assert_eq!(matcher.reconcile(&key, label), matcher.reconcile(&key, label));
        }
    }

    #[test]
    fn suggestions_are_scoped_to_the_prefecture() {
        let snap = snapshot(vec![
            entry("14384", "湯河原町", "神奈川県"),
            entry("14383", "真鶴町", "神奈川県"),
            entry("22100", "湯河原村", "静岡県"),
        ]);
        let matcher = Matcher::new(&snap, &suffixes());
        let got = matcher.suggest("湯河原まち", "神奈川県");
        assert_eq!(got.first().map(String::as_str), Some("湯河原町"));
        assert!(!got.contains(&"湯河原村".to_string()));
    }
}
