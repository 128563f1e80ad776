//! Cross-cutting properties of the parser and the matching engine.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use readpat::errors::{Error, ParseError};
use readpat::pattern::Pattern;
use readpat::{parse_query, parse_simplified, PatternConfig, TargetSet};

fn conf() -> Arc<PatternConfig> {
    Arc::new(PatternConfig::default())
}

fn random_seq(rng: &mut Xoshiro256PlusPlus, len: usize) -> Vec<u8> {
    (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
}

/// Owned summary of the best fair match, for comparing pattern trees.
fn fingerprint(
    pattern: &Pattern,
    targets: &TargetSet<'_>,
) -> Option<(i64, Option<(usize, usize)>, Vec<(String, Option<(usize, usize)>)>)> {
    let m = pattern.search(targets).best_match(true)?;
    let mut groups: Vec<_> = m
        .groups()
        .iter()
        .map(|g| (g.name.clone(), g.range))
        .collect();
    groups.sort();
    Some((m.score(), m.range(), groups))
}

#[test]
fn printed_patterns_match_like_their_originals() {
    let queries = [
        "(UMI:N{4})ATTA",
        "ATTA & GACA | TTTT",
        "[-7: ATTAGC ]",
        "^ATTA",
        "A{2:5}",
        "(G1:ATTA)(G2:N{2:4})",
        "<<GATTACA",
        "atta & GACA",
    ];
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    for query in queries {
        let parsed = parse_query(query, conf()).unwrap();
        let reparsed = parse_simplified(&parsed.to_string(), conf()).unwrap();
        for _ in 0..25 {
            let len = 12 + rng.gen_range(0..8);
            let seq = random_seq(&mut rng, len);
            let targets = TargetSet::from_seqs([seq.as_slice()]);
            assert_eq!(
                fingerprint(&parsed, &targets),
                fingerprint(&reparsed, &targets),
                "query {query:?} diverged on {}",
                String::from_utf8_lossy(&seq)
            );
        }
    }
}

#[test]
fn printed_multi_read_pattern_round_trips() {
    let query = "(B1:ATTA) \\ GACA && ~CCCCCC \\ *";
    let parsed = parse_query(query, conf()).unwrap();
    let reparsed = parse_simplified(&parsed.to_string(), conf()).unwrap();
    let seqs: [&[u8]; 2] = [b"CCATTACC", b"GGGACAGG"];
    let targets = TargetSet::from_seqs(seqs);
    let original = fingerprint(&parsed, &targets);
    assert!(original.is_some());
    assert_eq!(original, fingerprint(&reparsed, &targets));
}

#[test]
fn unbalanced_opens_are_counted_in_the_error() {
    let err = parse_query("((( ATTA", conf()).unwrap_err();
    assert!(
        err.to_string().contains("3 unbalanced"),
        "got: {err}"
    );
}

#[test]
fn alternation_arms_may_reuse_a_group_name() {
    let pattern = parse_query("(G:ATTA)|(G:GACA)", conf()).unwrap();
    let targets = TargetSet::from_seqs([b"CCGACACC".as_slice()]);
    let m = pattern.search(&targets).best_match(true).unwrap();
    assert_eq!(m.group("G").unwrap().range, Some((2, 6)));
}

#[test]
fn reusing_a_group_name_outside_an_alternation_fails() {
    let err = parse_query("(G:ATTA) & (G:GACA)", conf()).unwrap_err();
    assert!(matches!(
        err,
        Error::Parse(ParseError::DuplicateGroupEdge { .. })
    ));
}

fn fair_ranges(pattern: &Pattern, targets: &TargetSet<'_>) -> Vec<(usize, usize)> {
    pattern
        .search(targets)
        .matches(true)
        .filter_map(|m| m.range())
        .collect()
}

#[test]
fn loosening_the_threshold_never_drops_matches() {
    let target = b"GGATTAGACTGGATTAGACAGG".as_slice();
    let targets = TargetSet::from_seqs([target]);
    let mut previous: Option<Vec<(usize, usize)>> = None;
    for threshold in [-5, -10, -20] {
        let pattern = parse_query(&format!("[{threshold}: ATTAGACA ]"), conf()).unwrap();
        let ranges = fair_ranges(&pattern, &targets);
        if let Some(prev) = &previous {
            assert!(
                prev.iter().all(|r| ranges.contains(r)),
                "threshold {threshold} lost {prev:?} from {ranges:?}"
            );
            assert!(ranges.len() >= prev.len());
        }
        previous = Some(ranges);
    }
}

#[test]
fn raising_the_error_budget_never_drops_matches() {
    let target = b"GGATTAGACTGGATTAGACAGG".as_slice();
    let targets = TargetSet::from_seqs([target]);
    let mut previous: Option<Vec<(usize, usize)>> = None;
    for budget in [0, 1, 2] {
        let conf = Arc::new(PatternConfig {
            bitap_max_errors: budget,
            ..PatternConfig::default()
        });
        let pattern = parse_query("ATTAGACA", conf).unwrap();
        let ranges = fair_ranges(&pattern, &targets);
        if let Some(prev) = &previous {
            assert!(
                prev.iter().all(|r| ranges.contains(r)),
                "budget {budget} lost {prev:?} from {ranges:?}"
            );
        }
        previous = Some(ranges);
    }
}

#[test]
fn fair_streams_yield_best_first() {
    let pattern = parse_query("[-15: ATTA ]", conf()).unwrap();
    let targets = TargetSet::from_seqs([b"CCATTACCATAACCATTA".as_slice()]);
    let all: Vec<_> = pattern.search(&targets).matches(true).collect();
    assert!(all.len() > 2);
    assert!(all.iter().all(|m| m.score() >= -15));
    for pair in all.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.score() >= b.score());
        if a.score() == b.score() {
            let len = |m: &readpat::Match<'_>| -> usize {
                m.ranges().iter().map(|r| r.to - r.from).sum()
            };
            assert!(len(a) >= len(b));
        }
    }
}

#[test]
fn unfair_results_are_a_subset_of_fair_results() {
    let pattern = parse_query("ATTA GACA", conf()).unwrap();
    let targets = TargetSet::from_seqs([b"ATTAGACAATTAGGGACA".as_slice()]);
    let key = |m: &readpat::Match<'_>| {
        let mut spans: Vec<(usize, usize)> =
            m.ranges().iter().map(|r| (r.from, r.to)).collect();
        spans.sort();
        (m.score(), spans)
    };
    let fair: Vec<_> = pattern.search(&targets).matches(true).map(|m| key(&m)).collect();
    for m in pattern.search(&targets).matches(false) {
        assert!(fair.contains(&key(&m)), "unfair match {:?} missing", key(&m));
    }
}

#[test]
fn end_anchored_stick_resolves_per_target_length() {
    let pattern = parse_query("(ATTA) $", conf()).unwrap();
    let at_end = TargetSet::from_seqs([b"CCCCATTA".as_slice()]);
    // Three trailing symbols: no alignment that reaches the read end stays
    // above the score threshold.
    let inside = TargetSet::from_seqs([b"CCCCATTACCC".as_slice()]);
    assert!(pattern.search(&at_end).matched());
    assert!(!pattern.search(&inside).matched());
}
