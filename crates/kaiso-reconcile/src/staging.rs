//! Upsert of reconciled links into the staging set.

use std::collections::BTreeMap;

use kaiso_core::{
    DirectorySnapshot, JisCode, LinkStatus, MatchedCandidate, StagingRecord, StagingSet, SubLink,
};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    #[serde(skip)]
    pub records: StagingSet,
    pub added: Vec<JisCode>,
    pub updated: Vec<JisCode>,
    pub unchanged: Vec<JisCode>,
}

fn show(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

/// Group matches by code, keeping document order inside each group.
fn group_by_code(matches: &[MatchedCandidate]) -> BTreeMap<JisCode, Vec<&MatchedCandidate>> {
    let mut groups: BTreeMap<JisCode, Vec<&MatchedCandidate>> = BTreeMap::new();
    for m in matches {
        groups.entry(m.entry.code.clone()).or_default().push(m);
    }
    groups
}

fn sub_links(group: &[&MatchedCandidate]) -> Vec<SubLink> {
    let mut out: Vec<SubLink> = Vec::new();
    for m in group {
        let Some(ward) = &m.via_ward else {
            continue;
        };
        if out.iter().any(|s| s.url == m.candidate.href) {
            continue;
        }
        out.push(SubLink {
            name: ward.clone(),
            url: m.candidate.href.clone(),
        });
    }
    out
}

fn apply_group(mut record: StagingRecord, group: &[&MatchedCandidate]) -> StagingRecord {
    let Some(primary) = group
        .iter()
        .find(|m| m.via_ward.is_none())
        .or_else(|| group.first())
    else {
        return record;
    };

    let previous = record.has_link().then(|| record.clone());

    let href = primary.candidate.href.clone();
    let (url, pdf_url) = if primary.link.is_document {
        (None, Some(href))
    } else {
        (Some(href), None)
    };
    let warning = !primary.link.trusted;

    record.prefecture = primary.entry.prefecture_name.clone();
    record.municipality = primary.entry.name.clone();
    record.slug = primary.entry.slug.clone();
    record.link_status = if warning {
        LinkStatus::NeedsReview
    } else if primary.link.is_document {
        LinkStatus::PdfOnly
    } else {
        LinkStatus::Ok
    };
    record.has_domain_warning = warning;
    record.is_published = !warning;

    if let Some(old) = previous {
        let overwritten = old.url != url
            || old.pdf_url != pdf_url
            || old.link_status != record.link_status
            || old.is_published != record.is_published;
        if overwritten {
            record.append_note(&format!(
                "(previous url: {}, pdfUrl: {}, linkStatus: {}, isPublished: {})",
                show(&old.url),
                show(&old.pdf_url),
                old.link_status.as_str(),
                old.is_published
            ));
        }
    }
    record.url = url;
    record.pdf_url = pdf_url;

    let wards = sub_links(group);
    if !wards.is_empty() {
        record.sub_links = wards;
    }
    record
}

/// Upsert matches into `existing`. Codes with no match keep their record
/// as-is; merging nothing yields the input set.
pub fn merge(existing: StagingSet, matches: &[MatchedCandidate]) -> MergeOutcome {
    let mut outcome = MergeOutcome {
        records: existing,
        ..MergeOutcome::default()
    };

    for (code, group) in group_by_code(matches) {
        match outcome.records.get(&code) {
            None => {
                let base = StagingRecord::unresolved(&group[0].entry);
                let record = apply_group(base, &group);
                debug!(%code, status = record.link_status.as_str(), "staging record added");
                outcome.records.insert(code.clone(), record);
                outcome.added.push(code);
            }
            Some(current) => {
                let record = apply_group(current.clone(), &group);
                if &record == current {
                    outcome.unchanged.push(code);
                } else {
                    debug!(%code, status = record.link_status.as_str(), "staging record updated");
                    outcome.records.insert(code.clone(), record);
                    outcome.updated.push(code);
                }
            }
        }
    }

    info!(
        added = outcome.added.len(),
        updated = outcome.updated.len(),
        unchanged = outcome.unchanged.len(),
        total = outcome.records.len(),
        "staging merge complete"
    );
    outcome
}

/// Add link-less `UNKNOWN` records for directory entries staging has never
/// seen. Returns the codes added.
pub fn seed_missing(records: &mut StagingSet, snapshot: &DirectorySnapshot) -> Vec<JisCode> {
    let mut added = Vec::new();
    for entry in snapshot.entries() {
        if records.contains_key(&entry.code) {
            continue;
        }
        records.insert(entry.code.clone(), StagingRecord::unresolved(entry));
        added.push(entry.code.clone());
    }
    info!(added = added.len(), total = records.len(), "seeded missing staging records");
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaiso_core::{Candidate, DirectoryEntry, LinkAssessment};

    fn entry(code: &str, name: &str, prefecture: &str, slug: &str) -> DirectoryEntry {
        DirectoryEntry {
            code: JisCode::parse(code).unwrap(),
            name: name.into(),
            prefecture_name: prefecture.into(),
            slug: slug.into(),
        }
    }

    fn matched(
        entry: &DirectoryEntry,
        href: &str,
        ward: Option<&str>,
        document: bool,
        trusted: bool,
    ) -> MatchedCandidate {
        MatchedCandidate {
            candidate: Candidate {
                prefecture_label: entry.prefecture_name.clone(),
                raw_name: ward.unwrap_or(&entry.name).to_string(),
                href: href.into(),
            },
            entry: entry.clone(),
            via_ward: ward.map(str::to_string),
            link: LinkAssessment {
                is_document: document,
                trusted,
                trust_rule: trusted.then(|| "government-suffix".to_string()),
            },
        }
    }

    fn code(value: &str) -> JisCode {
        JisCode::parse(value).unwrap()
    }

    #[test]
    fn ward_document_link_becomes_pdf_url_of_the_city() {
        let yokohama = entry("14100", "横浜市", "神奈川県", "yokohama");
        let href = "https://example.city.yokohama.lg.jp/x.pdf";
        let m = matched(&yokohama, href, Some("鶴見区"), true, true);
        let outcome = merge(StagingSet::new(), &[m]);

        let record = &outcome.records[&code("14100")];
        assert_eq!(record.pdf_url.as_deref(), Some("https://example.city.yokohama.lg.jp/x.pdf"));
        assert_eq!(record.url, None);
        assert_eq!(record.link_status, LinkStatus::PdfOnly);
        assert!(record.is_published);
        assert!(!record.has_domain_warning);
        assert_eq!(
            record.sub_links,
            vec![SubLink {
                name: "鶴見区".into(),
                url: "https://example.city.yokohama.lg.jp/x.pdf".into()
            }]
        );
        assert_eq!(outcome.added, vec![code("14100")]);
    }

    #[test]
    fn newer_link_wins_and_old_value_is_noted() {
        let chiyoda = entry("13101", "千代田区", "東京都", "chiyoda");
        let mut existing = StagingSet::new();
        let mut old = StagingRecord::unresolved(&chiyoda);
        old.url = Some("https://old.example.jp/a".into());
        old.link_status = LinkStatus::Ok;
        old.is_published = true;
        existing.insert(code("13101"), old);

        let m = matched(&chiyoda, "https://new.example.jp/b", None, false, false);
        let outcome = merge(existing, &[m]);

        let record = &outcome.records[&code("13101")];
        assert_eq!(record.url.as_deref(), Some("https://new.example.jp/b"));
        assert_eq!(
            record.notes.as_deref(),
            Some(concat!(
                "(previous url: https://old.example.jp/a, pdfUrl: -, ",
                "linkStatus: OK, isPublished: true)"
            ))
        );
        assert!(record.has_domain_warning);
        assert_eq!(record.link_status, LinkStatus::NeedsReview);
        assert!(!record.is_published);
        assert_eq!(outcome.updated, vec![code("13101")]);
    }

    #[test]
    fn status_change_on_the_same_link_is_noted() {
        let chiyoda = entry("13101", "千代田区", "東京都", "chiyoda");
        let mut existing = StagingSet::new();
        let mut old = StagingRecord::unresolved(&chiyoda);
        old.url = Some("https://www.city.chiyoda.lg.jp/kaiso.html".into());
        old.link_status = LinkStatus::NeedsReview;
        existing.insert(code("13101"), old);

        let matches = vec![matched(
            &chiyoda,
            "https://www.city.chiyoda.lg.jp/kaiso.html",
            None,
            false,
            true,
        )];
        let outcome = merge(existing, &matches);

        let record = &outcome.records[&code("13101")];
        assert_eq!(record.link_status, LinkStatus::Ok);
        assert!(record.is_published);
        let notes = record.notes.as_deref().unwrap();
        assert!(notes.contains("linkStatus: NEEDS_REVIEW"));
        assert!(notes.contains("isPublished: false"));

        let again = merge(outcome.records.clone(), &matches);
        assert_eq!(again.unchanged, vec![code("13101")]);
    }

    #[test]
    fn merging_nothing_leaves_staging_unchanged() {
        let mut existing = StagingSet::new();
        for (c, n) in [("14100", "横浜市"), ("13101", "千代田区")] {
            existing.insert(code(c), StagingRecord::unresolved(&entry(c, n, "X県", "x")));
        }
        let outcome = merge(existing.clone(), &[]);
        assert_eq!(outcome.records, existing);
        assert!(outcome.added.is_empty());
        assert!(outcome.updated.is_empty());
        assert!(outcome.unchanged.is_empty());
    }

    #[test]
    fn rerunning_the_same_matches_is_a_no_op() {
        let city = entry("14130", "川崎市", "神奈川県", "kawasaki");
        let href = "https://www.city.kawasaki.jp/kaiso.html";
        let matches = vec![matched(&city, href, None, false, true)];
        let first = merge(StagingSet::new(), &matches);
        let second = merge(first.records.clone(), &matches);
        assert_eq!(second.records, first.records);
        assert_eq!(second.unchanged, vec![code("14130")]);
        assert!(second.records[&code("14130")].notes.is_none());
    }

    #[test]
    fn direct_city_link_is_primary_and_ward_links_are_deduplicated() {
        let yokohama = entry("14100", "横浜市", "神奈川県", "yokohama");
        let tsurumi = "https://www.city.yokohama.lg.jp/tsurumi.pdf";
        let matches = vec![
            matched(&yokohama, tsurumi, Some("鶴見区"), true, true),
            matched(&yokohama, "https://www.city.yokohama.lg.jp/kaiso.html", None, false, true),
            matched(&yokohama, tsurumi, Some("鶴見区"), true, true),
            matched(&yokohama, "https://www.city.yokohama.lg.jp/naka.pdf", Some("中区"), true, true),
        ];
        let outcome = merge(StagingSet::new(), &matches);
        let record = &outcome.records[&code("14100")];
        assert_eq!(record.url.as_deref(), Some("https://www.city.yokohama.lg.jp/kaiso.html"));
        assert_eq!(record.link_status, LinkStatus::Ok);
        let wards: Vec<_> = record.sub_links.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(wards, vec!["鶴見区", "中区"]);
    }

    #[test]
    fn existing_sub_links_survive_a_run_without_ward_links() {
        let yokohama = entry("14100", "横浜市", "神奈川県", "yokohama");
        let first = merge(
            StagingSet::new(),
            &[matched(&yokohama, "https://www.city.yokohama.lg.jp/t.pdf", Some("鶴見区"), true, true)],
        );
        let second = merge(
            first.records,
            &[matched(&yokohama, "https://www.city.yokohama.lg.jp/t.pdf", None, true, true)],
        );
        assert_eq!(second.records[&code("14100")].sub_links.len(), 1);
    }

    #[test]
    fn one_record_per_code_and_untouched_codes_stay() {
        let a = entry("14100", "横浜市", "神奈川県", "yokohama");
        let b = entry("14130", "川崎市", "神奈川県", "kawasaki");
        let mut existing = StagingSet::new();
        existing.insert(b.code.clone(), StagingRecord::unresolved(&b));
        let matches = vec![
            matched(&a, "https://www.city.yokohama.lg.jp/a.html", None, false, true),
            matched(&a, "https://www.city.yokohama.lg.jp/b.html", None, false, true),
        ];
        let outcome = merge(existing, &matches);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(
            outcome.records[&code("14100")].url.as_deref(),
            Some("https://www.city.yokohama.lg.jp/a.html")
        );
        assert_eq!(outcome.records[&code("14130")], StagingRecord::unresolved(&b));
    }

    #[test]
    fn seeding_adds_only_unseen_entries() {
        let a = entry("14100", "横浜市", "神奈川県", "yokohama");
        let b = entry("14130", "川崎市", "神奈川県", "kawasaki");
        let snapshot = DirectorySnapshot::from_entries(vec![a.clone(), b.clone()]).unwrap();
        let mut records = merge(
            StagingSet::new(),
            &[matched(&a, "https://www.city.yokohama.lg.jp/a.html", None, false, true)],
        )
        .records;
        let added = seed_missing(&mut records, &snapshot);
        assert_eq!(added, vec![code("14130")]);
        assert_eq!(records[&code("14130")].link_status, LinkStatus::Unknown);
        assert!(records[&code("14100")].has_link());
        assert!(seed_missing(&mut records, &snapshot).is_empty());
    }
}
