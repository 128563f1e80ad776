//! Combination of operand match streams into combined matches.
//!
//! Fair combination materializes every operand, walks the full cartesian
//! product, ranks and deduplicates. Unfair combination pulls operands
//! lazily and enumerates index tuples by ascending index sum, so
//! combinations of early (good) operand matches surface first; each operand
//! supplies at most `unfair_limit` matches.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::config::PatternConfig;
use crate::matches::{compare_matches, MatchIntermediate, MatchStream};

/// How operand matches merge into a combined match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CombinePolicy {
    /// All operands on one read; ranges may overlap within the limit and
    /// every pairwise overlap is penalized.
    Intersection,
    /// All operands on one read in left-to-right order; consecutive ranges
    /// may overlap within the limit, gaps between them are penalized.
    Following,
    /// Each operand match alone is a combined match.
    First,
    /// All operands required, each on its own reads; ranges never interact.
    LogicalAnd,
    /// At least one operand present; absent operands contribute nothing.
    LogicalOr,
}

pub(crate) struct OperandInput<'a> {
    pub stream: MatchStream<'a>,
    pub complexity: u64,
}

pub(crate) fn combine<'a>(
    conf: Arc<PatternConfig>,
    policy: CombinePolicy,
    fair: bool,
    target_count: usize,
    operands: Vec<OperandInput<'a>>,
) -> MatchStream<'a> {
    if policy == CombinePolicy::First {
        return combine_first(conf, fair, operands);
    }
    if fair {
        let lists: Vec<Vec<MatchIntermediate<'a>>> =
            operands.into_iter().map(|o| o.stream.collect()).collect();
        Box::new(combine_fair(&conf, policy, target_count, lists).into_iter())
    } else {
        Box::new(UnfairCombiner::new(conf, policy, target_count, operands))
    }
}

fn combine_first<'a>(
    conf: Arc<PatternConfig>,
    fair: bool,
    operands: Vec<OperandInput<'a>>,
) -> MatchStream<'a> {
    if fair {
        let mut all: Vec<MatchIntermediate<'a>> = Vec::new();
        for (i, o) in operands.into_iter().enumerate() {
            all.extend(o.stream.map(|mut m| {
                m.stamp_pattern_index(i);
                m
            }));
        }
        all.sort_by(compare_matches);
        let mut seen = FxHashSet::default();
        all.retain(|m| seen.insert(m.dedup_key()));
        Box::new(all.into_iter())
    } else {
        let limit = conf.unfair_limit;
        let mut seen = FxHashSet::default();
        Box::new(
            operands
                .into_iter()
                .enumerate()
                .flat_map(move |(i, o)| {
                    o.stream.take(limit).map(move |mut m| {
                        m.stamp_pattern_index(i);
                        m
                    })
                })
                .filter(move |m| seen.insert(m.dedup_key())),
        )
    }
}

fn combine_fair<'a>(
    conf: &PatternConfig,
    policy: CombinePolicy,
    target_count: usize,
    lists: Vec<Vec<MatchIntermediate<'a>>>,
) -> Vec<MatchIntermediate<'a>> {
    let k = lists.len();
    let none_slot = policy == CombinePolicy::LogicalOr;
    let sizes: Vec<usize> = lists
        .iter()
        .map(|l| l.len() + none_slot as usize)
        .collect();
    let mut out = Vec::new();
    if sizes.iter().any(|&s| s == 0) {
        return out;
    }
    let mut idx = vec![0usize; k];
    'product: loop {
        {
            let parts: Vec<Option<&MatchIntermediate<'a>>> = idx
                .iter()
                .enumerate()
                .map(|(o, &i)| {
                    if none_slot {
                        (i > 0).then(|| &lists[o][i - 1])
                    } else {
                        Some(&lists[o][i])
                    }
                })
                .collect();
            if let Some(m) = combine_parts(conf, policy, target_count, &parts) {
                out.push(m);
            }
        }
        for d in (0..k).rev() {
            idx[d] += 1;
            if idx[d] < sizes[d] {
                continue 'product;
            }
            idx[d] = 0;
        }
        break;
    }
    out.sort_by(compare_matches);
    let mut seen = FxHashSet::default();
    out.retain(|m| seen.insert(m.dedup_key()));
    out
}

struct Span {
    from: usize,
    to: usize,
    upper_left: Option<usize>,
    upper_right: Option<usize>,
}

fn span(m: &MatchIntermediate) -> Span {
    let (from, to) = match m.overall_range() {
        Some(r) => r,
        None => panic!("combined operand match carries no ranges"),
    };
    Span {
        from,
        to,
        upper_left: m.upper_left,
        upper_right: m.upper_right,
    }
}

/// Overlap of two spans on one read: `None` when the overlap breaks the
/// configured limit or consumes case-protected letters, otherwise the score
/// penalty (0 for disjoint spans).
fn overlap_penalty(conf: &PatternConfig, a: &Span, b: &Span) -> Option<i64> {
    let (first, second) = if a.from <= b.from { (a, b) } else { (b, a) };
    let ov = first.to.min(second.to).saturating_sub(second.from);
    if ov == 0 {
        return Some(0);
    }
    if ov > conf.max_overlap {
        return None;
    }
    if first.upper_right.is_some_and(|d| ov > d) {
        return None;
    }
    if second.upper_left.is_some_and(|d| ov > d) {
        return None;
    }
    Some(conf.single_overlap_penalty * ov as i64)
}

fn combine_parts<'a>(
    conf: &PatternConfig,
    policy: CombinePolicy,
    target_count: usize,
    parts: &[Option<&MatchIntermediate<'a>>],
) -> Option<MatchIntermediate<'a>> {
    use CombinePolicy::*;

    let mut penalty = 0i64;
    match policy {
        Intersection => {
            let spans: Vec<Span> = parts.iter().map(|p| span(p.unwrap())).collect();
            for i in 0..spans.len() {
                for j in i + 1..spans.len() {
                    penalty += overlap_penalty(conf, &spans[i], &spans[j])?;
                }
            }
        }
        Following => {
            let spans: Vec<Span> = parts.iter().map(|p| span(p.unwrap())).collect();
            for pair in spans.windows(2) {
                let (prev, next) = (&pair[0], &pair[1]);
                if next.from < prev.from {
                    return None;
                }
                if next.from >= prev.to {
                    penalty += conf.insertion_penalty * (next.from - prev.to) as i64;
                } else {
                    penalty += overlap_penalty(conf, prev, next)?;
                }
            }
        }
        LogicalAnd => {}
        LogicalOr => {
            if parts.iter().all(Option::is_none) {
                return None;
            }
        }
        First => unreachable!("single-operand policy goes through combine_first"),
    }

    let score: i64 = parts.iter().flatten().map(|m| m.score).sum::<i64>() + penalty;
    if score < conf.score_threshold {
        return None;
    }

    let mut combined = MatchIntermediate::empty(target_count);
    combined.score = score;
    for (i, part) in parts.iter().enumerate() {
        let Some(m) = part else { continue };
        let mut ranges = m.ranges.clone();
        for r in &mut ranges {
            r.pattern_index = i;
        }
        combined.ranges.extend(ranges);
        let mut edges = m.edges.clone();
        for e in &mut edges {
            e.pattern_index = i;
        }
        combined.edges.extend(edges);
    }

    if matches!(policy, Intersection | Following) {
        let (cfrom, cto) = combined
            .overall_range()
            .expect("single-read combination always has ranges");
        for m in parts.iter().flatten() {
            let s = span(m);
            if let Some(d) = s.upper_left {
                let dist = s.from + d - cfrom;
                combined.upper_left = Some(combined.upper_left.map_or(dist, |u| u.min(dist)));
            }
            if let Some(d) = s.upper_right {
                let dist = cto - s.to + d;
                combined.upper_right = Some(combined.upper_right.map_or(dist, |u| u.min(dist)));
            }
        }
    }
    Some(combined)
}

struct OperandState<'a> {
    stream: MatchStream<'a>,
    cache: Vec<MatchIntermediate<'a>>,
    done: bool,
}

impl<'a> OperandState<'a> {
    /// Grows the cache to cover `idx`. False when the stream ends or the
    /// pull limit cuts it off first.
    fn ensure(&mut self, idx: usize, limit: usize) -> bool {
        while self.cache.len() <= idx && !self.done {
            if self.cache.len() >= limit {
                self.done = true;
                break;
            }
            match self.stream.next() {
                Some(m) => self.cache.push(m),
                None => self.done = true,
            }
        }
        self.cache.len() > idx
    }
}

struct UnfairCombiner<'a> {
    conf: Arc<PatternConfig>,
    policy: CombinePolicy,
    target_count: usize,
    operands: Vec<OperandState<'a>>,
    /// Operand indices, cheapest first: the cheap operand is pulled deeper
    /// before expensive operands move off their best matches.
    digit_order: Vec<usize>,
    none_slot: bool,
    stage: usize,
    current: Option<Vec<usize>>,
    seen: FxHashSet<Vec<(usize, usize, usize)>>,
    dead: bool,
}

impl<'a> UnfairCombiner<'a> {
    fn new(
        conf: Arc<PatternConfig>,
        policy: CombinePolicy,
        target_count: usize,
        operands: Vec<OperandInput<'a>>,
    ) -> Self {
        let complexity: Vec<u64> = operands.iter().map(|o| o.complexity).collect();
        let mut digit_order: Vec<usize> = (0..operands.len()).collect();
        digit_order.sort_by_key(|&o| complexity[o]);
        Self {
            none_slot: policy == CombinePolicy::LogicalOr,
            conf,
            policy,
            target_count,
            operands: operands
                .into_iter()
                .map(|o| OperandState {
                    stream: o.stream,
                    cache: Vec::new(),
                    done: false,
                })
                .collect(),
            digit_order,
            stage: 0,
            current: None,
            seen: FxHashSet::default(),
            dead: false,
        }
    }

    /// Largest usable index per digit position under the current caches.
    /// Caps only shrink over time, so the stage loop terminates.
    fn caps(&self, limit: usize) -> Vec<usize> {
        self.digit_order
            .iter()
            .map(|&o| {
                let st = &self.operands[o];
                if self.none_slot {
                    if st.done {
                        st.cache.len()
                    } else {
                        limit
                    }
                } else if st.done {
                    st.cache.len().saturating_sub(1)
                } else {
                    limit - 1
                }
            })
            .collect()
    }
}

impl<'a> Iterator for UnfairCombiner<'a> {
    type Item = MatchIntermediate<'a>;

    fn next(&mut self) -> Option<MatchIntermediate<'a>> {
        let limit = self.conf.unfair_limit.max(1);
        let k = self.operands.len();
        loop {
            if self.dead {
                return None;
            }
            if self.policy != CombinePolicy::LogicalOr {
                for o in 0..k {
                    if !self.operands[o].ensure(0, limit) {
                        self.dead = true;
                        return None;
                    }
                }
            }
            let caps = self.caps(limit);
            let tuple = match &mut self.current {
                Some(v) => {
                    if next_composition(v, &caps) {
                        v.clone()
                    } else {
                        self.current = None;
                        self.stage += 1;
                        continue;
                    }
                }
                None => {
                    if self.stage > caps.iter().sum::<usize>() {
                        return None;
                    }
                    match first_composition(self.stage, &caps) {
                        Some(v) => {
                            self.current = Some(v.clone());
                            v
                        }
                        None => {
                            self.stage += 1;
                            continue;
                        }
                    }
                }
            };

            let mut op_idx = vec![0usize; k];
            for (d, &i) in tuple.iter().enumerate() {
                op_idx[self.digit_order[d]] = i;
            }
            let mut available = true;
            for (o, &i) in op_idx.iter().enumerate() {
                let need = if self.none_slot {
                    if i == 0 {
                        continue;
                    }
                    i - 1
                } else {
                    i
                };
                if !self.operands[o].ensure(need, limit) {
                    available = false;
                    break;
                }
            }
            if !available {
                continue;
            }

            let combined = {
                let parts: Vec<Option<&MatchIntermediate<'a>>> = op_idx
                    .iter()
                    .enumerate()
                    .map(|(o, &i)| {
                        if self.none_slot {
                            (i > 0).then(|| &self.operands[o].cache[i - 1])
                        } else {
                            Some(&self.operands[o].cache[i])
                        }
                    })
                    .collect();
                combine_parts(&self.conf, self.policy, self.target_count, &parts)
            };
            if let Some(m) = combined {
                if self.seen.insert(m.dedup_key()) {
                    return Some(m);
                }
            }
        }
    }
}

/// First tuple with the given digit sum: greedy left to right, so the
/// cheapest digit takes the deepest index available.
fn first_composition(total: usize, caps: &[usize]) -> Option<Vec<usize>> {
    let mut v = vec![0usize; caps.len()];
    let mut rem = total;
    for (i, &c) in caps.iter().enumerate() {
        v[i] = rem.min(c);
        rem -= v[i];
    }
    (rem == 0).then_some(v)
}

/// Next tuple with the same digit sum, moving one unit rightward.
fn next_composition(v: &mut [usize], caps: &[usize]) -> bool {
    let k = v.len();
    let mut suffix = 0usize;
    for i in (0..k.saturating_sub(1)).rev() {
        suffix += v[i + 1];
        let cap_sum: usize = caps[i + 1..].iter().sum();
        if v[i] > 0 && suffix + 1 <= cap_sum {
            v[i] -= 1;
            let mut rem = suffix + 1;
            for j in i + 1..k {
                v[j] = rem.min(caps[j]);
                rem -= v[j];
            }
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matches::MatchedRange;
    use crate::sequence::Target;

    const TARGET: &[u8] = b"ACGTACGTACGTACGT";

    fn mi(from: usize, to: usize, score: i64) -> MatchIntermediate<'static> {
        MatchIntermediate {
            score,
            target_count: 1,
            ranges: vec![MatchedRange::new(Target::new(TARGET), 1, from, to)],
            edges: vec![],
            upper_left: None,
            upper_right: None,
        }
    }

    fn input(matches: Vec<MatchIntermediate<'static>>) -> OperandInput<'static> {
        OperandInput {
            stream: Box::new(matches.into_iter()),
            complexity: 1,
        }
    }

    fn conf() -> Arc<PatternConfig> {
        Arc::new(PatternConfig::default())
    }

    fn scores(s: MatchStream) -> Vec<i64> {
        s.map(|m| m.score).collect()
    }

    #[test]
    fn compositions_enumerate_by_sum() {
        let caps = [2, 2];
        let mut seen = Vec::new();
        for total in 0..=4 {
            let mut v = match first_composition(total, &caps) {
                Some(v) => v,
                None => continue,
            };
            loop {
                seen.push(v.clone());
                if !next_composition(&mut v, &caps) {
                    break;
                }
            }
        }
        assert_eq!(
            seen,
            vec![
                vec![0, 0],
                vec![1, 0],
                vec![0, 1],
                vec![2, 0],
                vec![1, 1],
                vec![0, 2],
                vec![2, 1],
                vec![1, 2],
                vec![2, 2],
            ]
        );
    }

    #[test]
    fn following_penalizes_gaps() {
        let ops = vec![input(vec![mi(0, 4, 0)]), input(vec![mi(5, 9, 0)])];
        let out: Vec<_> =
            combine(conf(), CombinePolicy::Following, false, 1, ops).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, PatternConfig::default().insertion_penalty);
        assert_eq!(out[0].overall_range(), Some((0, 9)));
    }

    #[test]
    fn following_rejects_reordered_operands() {
        let ops = vec![input(vec![mi(5, 9, 0)]), input(vec![mi(0, 4, 0)])];
        assert!(combine(conf(), CombinePolicy::Following, false, 1, ops)
            .next()
            .is_none());
    }

    #[test]
    fn following_overlap_is_limited_and_penalized() {
        let c = PatternConfig::default();
        let ops = vec![input(vec![mi(0, 4, 0)]), input(vec![mi(3, 7, 0)])];
        let out: Vec<_> = combine(conf(), CombinePolicy::Following, false, 1, ops).collect();
        assert_eq!(out[0].score, c.single_overlap_penalty);

        let ops = vec![input(vec![mi(0, 4, 0)]), input(vec![mi(1, 5, 0)])];
        assert!(combine(conf(), CombinePolicy::Following, false, 1, ops)
            .next()
            .is_none());
    }

    #[test]
    fn uppercase_blocks_overlap() {
        let mut left = mi(0, 4, 0);
        left.upper_right = Some(0);
        let ops = vec![input(vec![left]), input(vec![mi(3, 7, 0)])];
        assert!(combine(conf(), CombinePolicy::Following, false, 1, ops)
            .next()
            .is_none());
    }

    #[test]
    fn intersection_allows_disjoint_ranges_in_any_order() {
        let ops = vec![input(vec![mi(8, 12, 0)]), input(vec![mi(0, 4, 0)])];
        let out: Vec<_> = combine(conf(), CombinePolicy::Intersection, false, 1, ops).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 0);
        assert_eq!(out[0].ranges.len(), 2);
        assert_eq!(out[0].ranges[0].pattern_index, 0);
        assert_eq!(out[0].ranges[1].pattern_index, 1);
    }

    #[test]
    fn logical_or_tolerates_missing_operands() {
        let ops = vec![input(vec![]), input(vec![mi(0, 4, -5)])];
        let out: Vec<_> = combine(conf(), CombinePolicy::LogicalOr, false, 2, ops).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, -5);

        let ops = vec![input(vec![]), input(vec![])];
        assert!(combine(conf(), CombinePolicy::LogicalOr, false, 2, ops)
            .next()
            .is_none());
    }

    #[test]
    fn unfair_surfaces_best_index_sums_first() {
        // Operand matches are pre-ordered best first; the first combined
        // match must pair both heads.
        let ops = vec![
            input(vec![mi(0, 4, 0), mi(1, 5, -9)]),
            input(vec![mi(6, 10, 0), mi(7, 11, -9)]),
        ];
        let out = scores(combine(conf(), CombinePolicy::Intersection, false, 1, ops));
        assert_eq!(out[0], 0);
        // Later stages mix in one degraded operand before both.
        assert_eq!(out, vec![0, -9, -9, -18]);
    }

    #[test]
    fn unfair_dedups_identical_range_sets() {
        // Same ranges reached through different index tuples count once.
        let ops = vec![
            input(vec![mi(0, 4, 0), mi(0, 4, -9)]),
            input(vec![mi(6, 10, 0)]),
        ];
        let out = scores(combine(conf(), CombinePolicy::Intersection, false, 1, ops));
        assert_eq!(out, vec![0]);
    }

    #[test]
    fn fair_ranks_and_dedups_combinations() {
        let ops = vec![
            input(vec![mi(0, 4, -9), mi(0, 4, 0)]),
            input(vec![mi(4, 8, 0)]),
        ];
        let out = scores(combine(conf(), CombinePolicy::Intersection, true, 1, ops));
        // Both tuples produce the same range pair; the better one wins.
        assert_eq!(out, vec![0]);
    }

    #[test]
    fn combined_below_threshold_is_dropped() {
        let c = PatternConfig::default().with_score_threshold(-10);
        let ops = vec![input(vec![mi(0, 4, -9)]), input(vec![mi(4, 8, -9)])];
        assert!(combine(c, CombinePolicy::Intersection, false, 1, ops)
            .next()
            .is_none());
    }

    #[test]
    fn combined_uppercase_distances_take_the_minimum() {
        let mut a = mi(2, 6, 0);
        a.upper_left = Some(1);
        a.upper_right = Some(1);
        let b = mi(8, 12, 0);
        let ops = vec![input(vec![a]), input(vec![b])];
        let out: Vec<_> = combine(conf(), CombinePolicy::Following, false, 1, ops).collect();
        // Protected letter sits at 3 and 4; combined span is [2, 12).
        assert_eq!(out[0].upper_left, Some(1));
        assert_eq!(out[0].upper_right, Some(7));
    }
}
