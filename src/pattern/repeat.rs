use std::iter;
use std::sync::Arc;

use crate::config::PatternConfig;
use crate::errors::*;
use crate::groups::{BorderPosition, GroupEdgePosition};
use crate::matches::{compare_matches, MatchIntermediate, MatchStream, MatchedGroupEdge, MatchedRange};
use crate::pattern::SearchContext;
use crate::sequence::{base_mask, is_case_significant, is_nucleotide, letters_match};

/// Runs of one letter, `min_repeats` to `max_repeats` long (`None` max is
/// unbounded).
///
/// A candidate is a target section plus a repeat count: the count may exceed
/// the section length, turning the surplus into deletions, so short tails
/// still satisfy the minimum. Sections never exceed the count; the engine
/// does not pad runs with inserted target symbols. Candidate identity is the
/// section range plus the repeat count, which makes same-range matches with
/// different counts distinct results.
#[derive(Debug)]
pub struct RepeatPattern {
    pub(crate) conf: Arc<PatternConfig>,
    pub(crate) letter: u8,
    pub(crate) min_repeats: usize,
    pub(crate) max_repeats: Option<usize>,
    pub(crate) fixed_left: Option<BorderPosition>,
    pub(crate) fixed_right: Option<BorderPosition>,
    pub(crate) group_edges: Vec<GroupEdgePosition>,
    uppercase: bool,
}

impl RepeatPattern {
    pub fn new(
        conf: Arc<PatternConfig>,
        letter: u8,
        min_repeats: usize,
        max_repeats: Option<usize>,
        group_edges: Vec<GroupEdgePosition>,
    ) -> Result<Self> {
        Self::with_borders(conf, letter, min_repeats, max_repeats, None, None, group_edges)
    }

    pub fn with_borders(
        conf: Arc<PatternConfig>,
        letter: u8,
        min_repeats: usize,
        max_repeats: Option<usize>,
        fixed_left: Option<BorderPosition>,
        fixed_right: Option<BorderPosition>,
        group_edges: Vec<GroupEdgePosition>,
    ) -> Result<Self> {
        if !is_nucleotide(letter) {
            return Err(ConfigError::InvalidLetter {
                letter: letter as char,
            }
            .into());
        }
        check_repeat_bounds(min_repeats, max_repeats)?;
        let group_edges = check_repeat_edges(group_edges, max_repeats)?;
        Ok(Self {
            conf,
            letter,
            min_repeats,
            max_repeats,
            fixed_left,
            fixed_right,
            group_edges,
            uppercase: is_case_significant(letter),
        })
    }

    pub fn group_edges(&self) -> &[GroupEdgePosition] {
        &self.group_edges
    }

    pub fn min_repeats(&self) -> usize {
        self.min_repeats
    }

    pub fn max_repeats(&self) -> Option<usize> {
        self.max_repeats
    }

    pub fn estimate_max_length(&self) -> Option<usize> {
        self.max_repeats
    }

    pub(crate) fn estimate_complexity(&self) -> u64 {
        if self.fixed_left.is_some() || self.fixed_right.is_some() {
            return 1;
        }
        base_mask(self.letter).count_ones() as u64 * self.max_repeats.unwrap_or(64) as u64
    }

    pub(crate) fn match_stream<'a>(&'a self, ctx: SearchContext<'a>) -> MatchStream<'a> {
        if ctx.from >= ctx.to {
            return Box::new(iter::empty());
        }
        let table = SectionTable::build(self.letter, ctx.target.seq(), ctx.from, ctx.to);
        if self.fixed_left.is_some() || self.fixed_right.is_some() {
            let anchors = match resolve_anchors(self.fixed_left, self.fixed_right, ctx) {
                Some(a) => a,
                None => return Box::new(iter::empty()),
            };
            let mut out = Vec::new();
            self.push_candidates(&table, ctx, None, anchors, &mut out);
            out.sort_by(compare_matches);
            return Box::new(out.into_iter());
        }
        if ctx.fair {
            let mut out = Vec::new();
            self.push_candidates(&table, ctx, None, (None, None), &mut out);
            out.sort_by(compare_matches);
            Box::new(out.into_iter())
        } else {
            Box::new(RepeatUnfairIter {
                pattern: self,
                ctx,
                table,
                errors: 0,
                buffer: Vec::new().into_iter(),
            })
        }
    }

    /// Candidates in start-ascending, section-length-descending, count-
    /// ascending order. `errs_exact` keeps only candidates costing exactly
    /// that many errors; `None` accepts the whole budget.
    fn push_candidates<'a>(
        &'a self,
        table: &SectionTable,
        ctx: SearchContext<'a>,
        errs_exact: Option<usize>,
        anchors: (Option<usize>, Option<usize>),
        out: &mut Vec<MatchIntermediate<'a>>,
    ) {
        let budget = self.conf.bitap_max_errors;
        let (aleft, aright) = anchors;
        for s in ctx.from..ctx.to {
            if aleft.is_some_and(|l| l != s) {
                continue;
            }
            let mut lmax = table.longest(s, errs_exact.unwrap_or(budget));
            if let Some(max) = self.max_repeats {
                lmax = lmax.min(max);
            }
            for l in (1..=lmax).rev() {
                if aright.is_some_and(|r| s + l != r + 1) {
                    continue;
                }
                let mism = table.mismatches(s, l);
                let r_hi = self.max_repeats.map_or(l + budget, |m| m.min(l + budget));
                for r in l.max(self.min_repeats)..=r_hi {
                    let errs = mism + (r - l);
                    if errs > budget {
                        break;
                    }
                    if errs_exact.is_some_and(|e| errs != e) {
                        continue;
                    }
                    let score = (l - mism) as i64 * self.conf.match_score
                        + mism as i64 * self.conf.mismatch_score
                        + (r - l) as i64 * self.conf.gap_score;
                    if score < self.conf.score_threshold {
                        continue;
                    }
                    out.push(repeat_match(
                        ctx,
                        s,
                        l,
                        score,
                        &self.group_edges,
                        self.uppercase,
                    ));
                }
            }
        }
    }
}

struct RepeatUnfairIter<'a> {
    pattern: &'a RepeatPattern,
    ctx: SearchContext<'a>,
    table: SectionTable,
    errors: usize,
    buffer: std::vec::IntoIter<MatchIntermediate<'a>>,
}

impl<'a> Iterator for RepeatUnfairIter<'a> {
    type Item = MatchIntermediate<'a>;

    fn next(&mut self) -> Option<MatchIntermediate<'a>> {
        loop {
            if let Some(m) = self.buffer.next() {
                return Some(m);
            }
            if self.errors > self.pattern.conf.bitap_max_errors {
                return None;
            }
            let mut out = Vec::new();
            self.pattern
                .push_candidates(&self.table, self.ctx, Some(self.errors), (None, None), &mut out);
            self.errors += 1;
            self.buffer = out.into_iter();
        }
    }
}

/// Runs of any nucleotide, exact lengths only: no mismatch budget applies
/// and counts never diverge from section lengths, so candidate enumeration
/// is a direct double loop over start and length.
#[derive(Debug)]
pub struct RepeatNPattern {
    pub(crate) conf: Arc<PatternConfig>,
    pub(crate) letter: u8,
    pub(crate) min_repeats: usize,
    pub(crate) max_repeats: Option<usize>,
    pub(crate) fixed_left: Option<BorderPosition>,
    pub(crate) fixed_right: Option<BorderPosition>,
    pub(crate) group_edges: Vec<GroupEdgePosition>,
    uppercase: bool,
}

impl RepeatNPattern {
    pub fn new(
        conf: Arc<PatternConfig>,
        min_repeats: usize,
        max_repeats: Option<usize>,
        group_edges: Vec<GroupEdgePosition>,
    ) -> Result<Self> {
        Self::with_borders(conf, b'N', min_repeats, max_repeats, None, None, group_edges)
    }

    pub fn with_borders(
        conf: Arc<PatternConfig>,
        letter: u8,
        min_repeats: usize,
        max_repeats: Option<usize>,
        fixed_left: Option<BorderPosition>,
        fixed_right: Option<BorderPosition>,
        group_edges: Vec<GroupEdgePosition>,
    ) -> Result<Self> {
        if !matches!(letter, b'N' | b'n') {
            return Err(ConfigError::InvalidLetter {
                letter: letter as char,
            }
            .into());
        }
        check_repeat_bounds(min_repeats, max_repeats)?;
        let group_edges = check_repeat_edges(group_edges, max_repeats)?;
        Ok(Self {
            conf,
            letter,
            min_repeats,
            max_repeats,
            fixed_left,
            fixed_right,
            group_edges,
            uppercase: letter == b'N',
        })
    }

    pub fn group_edges(&self) -> &[GroupEdgePosition] {
        &self.group_edges
    }

    pub fn min_repeats(&self) -> usize {
        self.min_repeats
    }

    pub fn max_repeats(&self) -> Option<usize> {
        self.max_repeats
    }

    pub fn estimate_max_length(&self) -> Option<usize> {
        self.max_repeats
    }

    pub(crate) fn estimate_complexity(&self) -> u64 {
        if self.fixed_left.is_some() || self.fixed_right.is_some() {
            return 1;
        }
        4 * self.max_repeats.unwrap_or(64) as u64
    }

    pub(crate) fn match_stream<'a>(&'a self, ctx: SearchContext<'a>) -> MatchStream<'a> {
        if ctx.from >= ctx.to {
            return Box::new(iter::empty());
        }
        let anchored = self.fixed_left.is_some() || self.fixed_right.is_some();
        let anchors = match resolve_anchors(self.fixed_left, self.fixed_right, ctx) {
            Some(a) => a,
            None => return Box::new(iter::empty()),
        };
        let (aleft, aright) = anchors;

        let table = SectionTable::build(self.letter, ctx.target.seq(), ctx.from, ctx.to);
        let mut out = Vec::new();
        for s in ctx.from..ctx.to {
            if aleft.is_some_and(|l| l != s) {
                continue;
            }
            let mut lmax = table.longest(s, 0);
            if let Some(max) = self.max_repeats {
                lmax = lmax.min(max);
            }
            for l in (self.min_repeats..=lmax).rev() {
                if aright.is_some_and(|r| s + l != r + 1) {
                    continue;
                }
                let score = l as i64 * self.conf.match_score;
                if score < self.conf.score_threshold {
                    continue;
                }
                out.push(repeat_match(
                    ctx,
                    s,
                    l,
                    score,
                    &self.group_edges,
                    self.uppercase,
                ));
            }
        }
        if ctx.fair || anchored {
            out.sort_by(compare_matches);
        }
        Box::new(out.into_iter())
    }
}

fn check_repeat_bounds(min_repeats: usize, max_repeats: Option<usize>) -> Result<()> {
    if min_repeats == 0 {
        return Err(ConfigError::ZeroRepeats.into());
    }
    if let Some(max) = max_repeats {
        if min_repeats > max {
            return Err(ConfigError::MinOverMax {
                min: min_repeats,
                max,
            }
            .into());
        }
    }
    Ok(())
}

/// Repeat lengths are elastic, so edge positions are clamped to the bound
/// instead of rejected; the match maps anything past the section end onto
/// the section end.
fn check_repeat_edges(
    group_edges: Vec<GroupEdgePosition>,
    max_repeats: Option<usize>,
) -> Result<Vec<GroupEdgePosition>> {
    for g in &group_edges {
        if group_edges.iter().filter(|o| o.edge == g.edge).count() > 1 {
            return Err(ConfigError::DuplicateEdge {
                name: g.edge.name().to_owned(),
                is_start: g.edge.is_start(),
            }
            .into());
        }
    }
    Ok(match max_repeats {
        Some(max) => group_edges
            .into_iter()
            .map(|g| GroupEdgePosition::new(g.edge, g.position.min(max)))
            .collect(),
        None => group_edges,
    })
}

fn resolve_anchors(
    fixed_left: Option<BorderPosition>,
    fixed_right: Option<BorderPosition>,
    ctx: SearchContext,
) -> Option<(Option<usize>, Option<usize>)> {
    let tlen = ctx.target.len();
    let resolve = |b: Option<BorderPosition>| match b {
        Some(b) => match b.resolve(tlen) {
            Some(p) if p >= ctx.from && p < ctx.to => Some(Some(p)),
            _ => None,
        },
        None => Some(None),
    };
    Some((resolve(fixed_left)?, resolve(fixed_right)?))
}

fn repeat_match<'a>(
    ctx: SearchContext<'a>,
    s: usize,
    len: usize,
    score: i64,
    group_edges: &[GroupEdgePosition],
    uppercase: bool,
) -> MatchIntermediate<'a> {
    let edges = group_edges
        .iter()
        .map(|g| {
            MatchedGroupEdge::new(
                ctx.target,
                ctx.target_id,
                g.edge.clone(),
                s + g.position.min(len),
            )
        })
        .collect();
    MatchIntermediate {
        score,
        target_count: 1,
        ranges: vec![MatchedRange::new(ctx.target, ctx.target_id, s, s + len)],
        edges,
        upper_left: uppercase.then_some(0),
        upper_right: uppercase.then_some(0),
    }
}

/// Per-search index over one target slice: prefix mismatch counts plus the
/// positions of mismatching symbols, giving O(1) answers to "how far can a
/// run from `s` reach with `e` bad symbols".
struct SectionTable {
    from: usize,
    to: usize,
    prefix: Vec<usize>,
    mpos: Vec<usize>,
}

impl SectionTable {
    fn build(letter: u8, target: &[u8], from: usize, to: usize) -> Self {
        let mut prefix = Vec::with_capacity(to - from + 1);
        prefix.push(0);
        let mut mpos = Vec::new();
        for (i, &c) in target[from..to].iter().enumerate() {
            let miss = !letters_match(letter, c);
            if miss {
                mpos.push(from + i);
            }
            prefix.push(prefix[i] + miss as usize);
        }
        Self {
            from,
            to,
            prefix,
            mpos,
        }
    }

    fn mismatches(&self, s: usize, len: usize) -> usize {
        self.prefix[s - self.from + len] - self.prefix[s - self.from]
    }

    /// Longest section starting at `s` containing at most `e` mismatching
    /// symbols.
    fn longest(&self, s: usize, e: usize) -> usize {
        let before = self.prefix[s - self.from];
        let bound = match self.mpos.get(before + e) {
            Some(&p) => p,
            None => self.to,
        };
        bound - s
    }
}
