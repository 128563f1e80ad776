use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::OnceLock;

use serde::Serialize;

use crate::groups::GroupEdge;
use crate::sequence::Target;

/// The target span one operand pattern contributed to a match.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct MatchedRange<'a> {
    pub target: Target<'a>,
    pub target_id: usize,
    /// Index of the contributing operand within its combining pattern;
    /// 0 for a match produced by a leaf.
    pub pattern_index: usize,
    pub from: usize,
    /// Exclusive.
    pub to: usize,
}

impl<'a> MatchedRange<'a> {
    pub fn new(target: Target<'a>, target_id: usize, from: usize, to: usize) -> Self {
        Self {
            target,
            target_id,
            pattern_index: 0,
            from,
            to,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.to - self.from
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.to == self.from
    }
}

/// A group edge resolved against a concrete target.
///
/// `position` is -1 only for edges that carry an explicit override value
/// instead of a coordinate. The engine always produces coordinates; override
/// edges exist for downstream correction pipelines that substitute a
/// consensus value for a matched group.
#[derive(Clone, Debug, Serialize)]
pub struct MatchedGroupEdge<'a> {
    pub target: Target<'a>,
    pub target_id: usize,
    pub pattern_index: usize,
    pub edge: GroupEdge,
    pub position: i64,
    pub override_value: Option<Vec<u8>>,
}

impl<'a> MatchedGroupEdge<'a> {
    pub fn new(target: Target<'a>, target_id: usize, edge: GroupEdge, position: usize) -> Self {
        Self {
            target,
            target_id,
            pattern_index: 0,
            edge,
            position: position as i64,
            override_value: None,
        }
    }

    /// An edge carrying a value override; its paired edge must also be an
    /// override edge of the same group.
    pub fn with_override(
        target: Target<'a>,
        target_id: usize,
        edge: GroupEdge,
        value: Vec<u8>,
    ) -> Self {
        Self {
            target,
            target_id,
            pattern_index: 0,
            edge,
            position: -1,
            override_value: Some(value),
        }
    }
}

/// One named capture assembled from a start/end edge pair.
#[derive(Clone, Debug, Serialize)]
pub struct MatchedGroup<'a> {
    pub name: String,
    pub target: Target<'a>,
    pub target_id: usize,
    /// `None` for override-valued groups.
    pub range: Option<(usize, usize)>,
    pub seq: Cow<'a, [u8]>,
    pub qual: Option<&'a [u8]>,
}

/// One result of matching a pattern against a target set.
///
/// Immutable; group assembly runs on the first `groups()` call and is cached.
#[derive(Debug, Serialize)]
pub struct Match<'a> {
    target_count: usize,
    score: i64,
    ranges: Vec<MatchedRange<'a>>,
    edges: Vec<MatchedGroupEdge<'a>>,
    #[serde(skip)]
    groups: OnceLock<Vec<MatchedGroup<'a>>>,
}

impl<'a> Match<'a> {
    pub(crate) fn new(
        target_count: usize,
        score: i64,
        ranges: Vec<MatchedRange<'a>>,
        edges: Vec<MatchedGroupEdge<'a>>,
    ) -> Self {
        Self {
            target_count,
            score,
            ranges,
            edges,
            groups: OnceLock::new(),
        }
    }

    #[inline]
    pub fn score(&self) -> i64 {
        self.score
    }

    #[inline]
    pub fn target_count(&self) -> usize {
        self.target_count
    }

    #[inline]
    pub fn ranges(&self) -> &[MatchedRange<'a>] {
        &self.ranges
    }

    #[inline]
    pub fn edges(&self) -> &[MatchedGroupEdge<'a>] {
        &self.edges
    }

    /// Overall `[from, to)` span when every contributing range lies on one
    /// target; `None` for multi-target or range-less (negation) matches.
    pub fn range(&self) -> Option<(usize, usize)> {
        let first = self.ranges.first()?;
        let mut from = first.from;
        let mut to = first.to;
        for r in &self.ranges[1..] {
            if r.target_id != first.target_id {
                return None;
            }
            from = from.min(r.from);
            to = to.max(r.to);
        }
        Some((from, to))
    }

    /// Assembles and caches the named groups of this match.
    ///
    /// Panics when the edge list violates pairing (duplicate, missing or
    /// reversed edges): that is an engine defect, not bad input.
    pub fn groups(&self) -> &[MatchedGroup<'a>] {
        self.groups.get_or_init(|| assemble_groups(&self.edges))
    }

    pub fn group(&self, name: &str) -> Option<&MatchedGroup<'a>> {
        self.groups().iter().find(|g| g.name == name)
    }
}

fn assemble_groups<'a>(edges: &[MatchedGroupEdge<'a>]) -> Vec<MatchedGroup<'a>> {
    let mut names: Vec<&str> = Vec::new();
    for e in edges {
        if !names.contains(&e.edge.name()) {
            names.push(e.edge.name());
        }
    }

    let mut groups = Vec::with_capacity(names.len());
    for name in names {
        let mut start = None;
        let mut end = None;
        for e in edges.iter().filter(|e| e.edge.name() == name) {
            let slot = if e.edge.is_start() { &mut start } else { &mut end };
            if slot.is_some() {
                panic!("duplicate {} edge for group '{name}'", side(e.edge.is_start()));
            }
            *slot = Some(e);
        }
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) => (s, e),
            (s, _) => panic!(
                "group '{name}' is missing its {} edge",
                side(s.is_none())
            ),
        };
        assert!(
            start.target_id == end.target_id,
            "group '{name}' edges resolved on different targets"
        );

        if start.position == -1 || end.position == -1 {
            assert!(
                start.position == -1 && end.position == -1,
                "group '{name}' mixes an override edge with a positioned edge"
            );
            let value = start
                .override_value
                .clone()
                .unwrap_or_else(|| panic!("override edges of group '{name}' carry no value"));
            groups.push(MatchedGroup {
                name: name.to_owned(),
                target: start.target,
                target_id: start.target_id,
                range: None,
                seq: Cow::Owned(value),
                qual: None,
            });
            continue;
        }

        let (from, to) = (start.position as usize, end.position as usize);
        assert!(
            from <= to && to <= start.target.len(),
            "group '{name}' has a reversed or out-of-range span {from}..{to}"
        );
        groups.push(MatchedGroup {
            name: name.to_owned(),
            target: start.target,
            target_id: start.target_id,
            range: Some((from, to)),
            seq: Cow::Borrowed(&start.target.seq()[from..to]),
            qual: start.target.qual().map(|q| &q[from..to]),
        });
    }
    groups
}

fn side(is_start: bool) -> &'static str {
    if is_start {
        "start"
    } else {
        "end"
    }
}

/// Search-time match representation. Extends the public `Match` fields with
/// the per-side distances to the nearest case-significant letter, which bound
/// how much of this match a combinator may overlap.
#[derive(Clone, Debug)]
pub(crate) struct MatchIntermediate<'a> {
    pub score: i64,
    pub target_count: usize,
    pub ranges: Vec<MatchedRange<'a>>,
    pub edges: Vec<MatchedGroupEdge<'a>>,
    /// Distance from the left match border to the first uppercase letter.
    pub upper_left: Option<usize>,
    /// Distance from the right match border to the last uppercase letter.
    pub upper_right: Option<usize>,
}

impl<'a> MatchIntermediate<'a> {
    pub fn empty(target_count: usize) -> Self {
        Self {
            score: 0,
            target_count,
            ranges: Vec::new(),
            edges: Vec::new(),
            upper_left: None,
            upper_right: None,
        }
    }

    pub fn finish(self) -> Match<'a> {
        Match::new(self.target_count, self.score, self.ranges, self.edges)
    }

    /// Overall span; meaningful only for single-target matches.
    pub fn overall_range(&self) -> Option<(usize, usize)> {
        let first = self.ranges.first()?;
        let mut from = first.from;
        let mut to = first.to;
        for r in &self.ranges[1..] {
            from = from.min(r.from);
            to = to.max(r.to);
        }
        Some((from, to))
    }

    pub fn total_range_len(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }

    /// Identity of a combined result: the set of contributing ranges.
    pub fn dedup_key(&self) -> Vec<(usize, usize, usize)> {
        let mut key: Vec<_> = self
            .ranges
            .iter()
            .map(|r| (r.target_id, r.from, r.to))
            .collect();
        key.sort_unstable();
        key
    }

    pub fn stamp_pattern_index(&mut self, index: usize) {
        for r in &mut self.ranges {
            r.pattern_index = index;
        }
        for e in &mut self.edges {
            e.pattern_index = index;
        }
    }
}

/// Ranking used everywhere matches are sorted: score descending, then total
/// matched length descending, then leftmost position ascending.
pub(crate) fn compare_matches(a: &MatchIntermediate, b: &MatchIntermediate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.total_range_len().cmp(&a.total_range_len()))
        .then_with(|| {
            let pos = |m: &MatchIntermediate| {
                m.ranges
                    .iter()
                    .map(|r| (r.target_id, r.from))
                    .min()
                    .unwrap_or((usize::MAX, usize::MAX))
            };
            pos(a).cmp(&pos(b))
        })
}

pub(crate) type MatchStream<'a> = Box<dyn Iterator<Item = MatchIntermediate<'a>> + 'a>;

/// Iterator over the matches of one search. Fairness was chosen when the
/// stream was created; fair streams buffer fully before the first item.
pub struct Matches<'a> {
    inner: MatchStream<'a>,
}

impl<'a> Matches<'a> {
    pub(crate) fn new(inner: MatchStream<'a>) -> Self {
        Self { inner }
    }
}

impl<'a> Iterator for Matches<'a> {
    type Item = Match<'a>;

    fn next(&mut self) -> Option<Match<'a>> {
        self.inner.next().map(MatchIntermediate::finish)
    }
}
