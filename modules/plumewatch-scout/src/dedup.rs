//! Headline deduplication: collapse near-duplicate candidates (same incident
//! reported by multiple outlets) into EventGroups.
//!
//! Similarity is a token-set ratio: compare the sorted shared tokens against
//! each side's full sorted token string and take the best normalized edit
//! ratio. Outlet suffixes and stopwords are stripped first so that
//! "Fire at XYZ plant - NTV" and "XYZ plant fire | Hürriyet" collide.

use std::collections::BTreeSet;

use tracing::debug;

use plumewatch_common::{Candidate, EventGroup};

/// Default assignment threshold (0–1 scale; ≈82/100 on a percentage scale).
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.82;

/// Separators outlets append to syndicated headlines ("... - NTV").
const SUFFIX_SEPARATORS: &[&str] = &[" - ", " | ", " – ", " — "];

/// Connective tokens that carry no event identity.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "at", "in", "on", "of", "to", "for", "and", "as", "by", "with", "after",
    "amid", "over", "bir", "ve", "ile", "için", "sonra", "da", "de",
];

/// Normalize a headline for comparison and keying: strip a trailing outlet
/// suffix, lowercase, collapse everything non-alphanumeric to single spaces.
pub fn normalize_headline(headline: &str) -> String {
    let mut text = headline.trim();

    // Only treat a separator in the latter half as an outlet suffix;
    // earlier ones are part of the headline itself.
    let cut = SUFFIX_SEPARATORS
        .iter()
        .filter_map(|sep| text.rfind(sep))
        .filter(|&idx| idx * 2 >= text.len())
        .max();
    if let Some(idx) = cut {
        text = text[..idx].trim_end();
    }

    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn token_set(normalized: &str) -> BTreeSet<&str> {
    normalized
        .split_whitespace()
        .filter(|t| !STOPWORDS.contains(t))
        .collect()
}

fn joined(tokens: &BTreeSet<&str>) -> String {
    tokens.iter().copied().collect::<Vec<_>>().join(" ")
}

/// Token-set similarity between two normalized headlines, 0.0–1.0.
///
/// fuzzywuzzy-style: build the sorted intersection string and the two
/// intersection-plus-remainder strings, return the best pairwise normalized
/// Levenshtein ratio. A headline whose content tokens are a subset of the
/// other's scores 1.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let set_a = token_set(a);
    let set_b = token_set(b);

    if set_a.is_empty() || set_b.is_empty() {
        return if set_a == set_b { 1.0 } else { 0.0 };
    }

    let inter: BTreeSet<&str> = set_a.intersection(&set_b).copied().collect();
    if inter.is_empty() {
        return 0.0;
    }

    let t0 = joined(&inter);
    let mut t1 = t0.clone();
    for t in set_a.difference(&set_b) {
        t1.push(' ');
        t1.push_str(t);
    }
    let mut t2 = t0.clone();
    for t in set_b.difference(&set_a) {
        t2.push(' ');
        t2.push_str(t);
    }

    strsim::normalized_levenshtein(&t0, &t1)
        .max(strsim::normalized_levenshtein(&t0, &t2))
        .max(strsim::normalized_levenshtein(&t1, &t2))
}

/// Group candidates into EventGroups.
///
/// Greedy single pass: each candidate joins the first existing group whose
/// representative headline is at least `similarity_threshold` similar,
/// otherwise starts a new group. O(n·g), fine at tens of candidates.
///
/// Invariants: every candidate lands in exactly one group; `group_key` is
/// the normalized representative headline; output is ordered by descending
/// recency of each group's most recent member (undated groups last).
pub fn group(candidates: Vec<Candidate>, similarity_threshold: f64) -> Vec<EventGroup> {
    let mut groups: Vec<Vec<Candidate>> = Vec::new();

    for candidate in candidates {
        let normalized = normalize_headline(&candidate.headline);

        let matched = groups.iter_mut().find(|members| {
            let rep = representative(members);
            similarity(&normalize_headline(&rep.headline), &normalized) >= similarity_threshold
        });

        match matched {
            Some(members) => members.push(candidate),
            None => groups.push(vec![candidate]),
        }
    }

    let mut groups: Vec<EventGroup> = groups
        .into_iter()
        .map(|members| {
            let group_key = normalize_headline(&representative(&members).headline);
            EventGroup { group_key, members }
        })
        .collect();

    // Most recent first; groups with no parsable timestamp sink to the end.
    groups.sort_by_key(|g| std::cmp::Reverse(g.latest_published()));

    debug!(groups = groups.len(), "Deduplication complete");
    groups
}

fn representative(members: &[Candidate]) -> &Candidate {
    members
        .iter()
        .max_by_key(|c| (c.summary.len(), c.headline.len()))
        .expect("group is never empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candidate(headline: &str, url: &str) -> Candidate {
        Candidate {
            headline: headline.to_string(),
            url: url.to_string(),
            summary: String::new(),
            published_at: None,
        }
    }

    // --- normalize_headline ---

    #[test]
    fn normalize_strips_outlet_suffix() {
        assert_eq!(
            normalize_headline("Fire breaks out at XYZ Textile plant - NTV Haber"),
            "fire breaks out at xyz textile plant"
        );
        assert_eq!(
            normalize_headline("Fire breaks out at XYZ Textile plant | Hürriyet"),
            "fire breaks out at xyz textile plant"
        );
    }

    #[test]
    fn normalize_keeps_early_dash() {
        // A dash in the first half is headline content, not an outlet suffix.
        assert_eq!(
            normalize_headline("Soma - area plant halts production after explosion"),
            "soma area plant halts production after explosion"
        );
    }

    #[test]
    fn normalize_collapses_punctuation() {
        assert_eq!(
            normalize_headline("Blaze, smoke & sirens: refinery fire!"),
            "blaze smoke sirens refinery fire"
        );
    }

    // --- similarity ---

    #[test]
    fn identical_headlines_score_one() {
        let n = normalize_headline("Fire at XYZ Textile plant in City A");
        assert_eq!(similarity(&n, &n), 1.0);
    }

    #[test]
    fn same_event_different_outlets_scores_high() {
        let a = normalize_headline("Fire breaks out at XYZ Textile factory in City A - NTV");
        let b = normalize_headline("XYZ Textile factory fire in City A | Hürriyet");
        assert!(similarity(&a, &b) >= 0.9, "got {}", similarity(&a, &b));
    }

    #[test]
    fn unrelated_events_score_low() {
        let a = normalize_headline("Fire at XYZ Textile plant in City A");
        let b = normalize_headline("Chemical leak at ABC refinery in City B");
        assert!(similarity(&a, &b) < 0.5, "got {}", similarity(&a, &b));
    }

    #[test]
    fn no_shared_tokens_scores_zero() {
        assert_eq!(similarity("warehouse collapse", "refinery blaze"), 0.0);
    }

    #[test]
    fn empty_versus_nonempty_scores_zero() {
        assert_eq!(similarity("", "refinery blaze"), 0.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    // --- group ---

    #[test]
    fn near_duplicates_form_one_group() {
        let groups = group(
            vec![
                candidate("Fire breaks out at XYZ Textile factory in City A - NTV", "u1"),
                candidate("XYZ Textile factory fire in City A | Hürriyet", "u2"),
            ],
            DEFAULT_SIMILARITY_THRESHOLD,
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
    }

    #[test]
    fn distinct_events_form_distinct_groups() {
        let groups = group(
            vec![
                candidate("Fire at XYZ Textile plant in City A", "u1"),
                candidate("Chemical leak at ABC refinery in City B", "u2"),
            ],
            DEFAULT_SIMILARITY_THRESHOLD,
        );
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn every_candidate_lands_in_exactly_one_group() {
        let candidates = vec![
            candidate("Fire at XYZ Textile plant in City A", "u1"),
            candidate("XYZ Textile plant fire in City A", "u2"),
            candidate("Chemical leak at ABC refinery in City B", "u3"),
            candidate("Warehouse collapse injures two in City C", "u4"),
        ];
        let total: usize = group(candidates, DEFAULT_SIMILARITY_THRESHOLD)
            .iter()
            .map(|g| g.members.len())
            .sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn representative_has_longest_summary() {
        let mut a = candidate("Fire at XYZ Textile plant in City A", "u1");
        a.summary = "short".to_string();
        let mut b = candidate("XYZ Textile plant fire in City A", "u2");
        b.summary = "a much more detailed summary of the same incident".to_string();

        let groups = group(vec![a, b], DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].representative().url, "u2");
    }

    #[test]
    fn grouping_is_idempotent_over_representatives() {
        let candidates = vec![
            candidate("Fire breaks out at XYZ Textile factory in City A - NTV", "u1"),
            candidate("XYZ Textile factory fire in City A | Hürriyet", "u2"),
            candidate("Chemical leak at ABC refinery in City B", "u3"),
        ];
        let first = group(candidates, DEFAULT_SIMILARITY_THRESHOLD);
        let mut first_keys: Vec<String> = first.iter().map(|g| g.group_key.clone()).collect();

        let reps: Vec<Candidate> = first.iter().map(|g| g.representative().clone()).collect();
        let second = group(reps, DEFAULT_SIMILARITY_THRESHOLD);
        let mut second_keys: Vec<String> = second.iter().map(|g| g.group_key.clone()).collect();

        first_keys.sort();
        second_keys.sort();
        assert_eq!(first_keys, second_keys, "no re-splitting on a second pass");
    }

    #[test]
    fn groups_ordered_by_descending_recency() {
        let mut old = candidate("Chemical leak at ABC refinery in City B", "u1");
        old.published_at = Some(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap());
        let mut fresh = candidate("Fire at XYZ Textile plant in City A", "u2");
        fresh.published_at = Some(Utc.with_ymd_and_hms(2025, 6, 9, 8, 0, 0).unwrap());
        let undated = candidate("Warehouse collapse injures two in City C", "u3");

        let groups = group(vec![old, undated, fresh], DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].members[0].url, "u2");
        assert_eq!(groups[1].members[0].url, "u1");
        assert_eq!(groups[2].members[0].url, "u3");
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group(Vec::new(), DEFAULT_SIMILARITY_THRESHOLD).is_empty());
    }
}
