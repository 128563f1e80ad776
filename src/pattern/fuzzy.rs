use std::collections::hash_map::Entry;
use std::iter;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::align::{align, AlignMode, Alignment};
use crate::bitap::{BitapIter, BitapMatcher, MAX_BITAP_LEN};
use crate::config::PatternConfig;
use crate::errors::*;
use crate::groups::{BorderPosition, GroupEdgePosition};
use crate::matches::{
    compare_matches, MatchIntermediate, MatchStream, MatchedGroupEdge, MatchedRange,
};
use crate::pattern::SearchContext;
use crate::sequence::{base_mask, is_case_significant, is_nucleotide};

/// Approximate search for one motif, the workhorse leaf of every query.
///
/// Candidate end positions come from the bit-parallel prefilter; each is
/// refined by alignment into an exact range, score and group edge placement.
/// Left and right cuts expand the motif into `(1 + left) * (1 + right)`
/// sequence variants searched side by side, so partially missing adapters
/// still match. Fixed borders switch candidate generation to the anchored
/// positions only.
#[derive(Debug)]
pub struct FuzzyMatchPattern {
    pub(crate) conf: Arc<PatternConfig>,
    pub(crate) seq: Vec<u8>,
    pub(crate) left_cut: usize,
    pub(crate) right_cut: usize,
    pub(crate) fixed_left: Option<BorderPosition>,
    pub(crate) fixed_right: Option<BorderPosition>,
    pub(crate) group_edges: Vec<GroupEdgePosition>,
    variants: Vec<SeqVariant>,
}

/// One cut variant of the motif, with its own prefilter and shifted edges.
#[derive(Debug)]
struct SeqVariant {
    seq: Vec<u8>,
    edges: Vec<GroupEdgePosition>,
    bitap: BitapMatcher,
    /// Motif symbols after the bit-parallel window; 0 when the window
    /// reaches the motif end.
    tail: usize,
    upper_left: Option<usize>,
    upper_right: Option<usize>,
}

impl FuzzyMatchPattern {
    pub fn new(
        conf: Arc<PatternConfig>,
        seq: &[u8],
        group_edges: Vec<GroupEdgePosition>,
    ) -> Result<Self> {
        Self::with_borders(conf, seq, 0, 0, None, None, group_edges)
    }

    pub fn with_cuts(
        conf: Arc<PatternConfig>,
        seq: &[u8],
        left_cut: usize,
        right_cut: usize,
        group_edges: Vec<GroupEdgePosition>,
    ) -> Result<Self> {
        Self::with_borders(conf, seq, left_cut, right_cut, None, None, group_edges)
    }

    pub fn with_borders(
        conf: Arc<PatternConfig>,
        seq: &[u8],
        left_cut: usize,
        right_cut: usize,
        fixed_left: Option<BorderPosition>,
        fixed_right: Option<BorderPosition>,
        group_edges: Vec<GroupEdgePosition>,
    ) -> Result<Self> {
        if seq.is_empty() {
            return Err(ConfigError::EmptySequence.into());
        }
        if let Some(&bad) = seq.iter().find(|&&c| !is_nucleotide(c)) {
            return Err(ConfigError::InvalidLetter {
                letter: bad as char,
            }
            .into());
        }
        if left_cut + right_cut >= seq.len() {
            return Err(ConfigError::CutsExceedLength {
                left: left_cut,
                right: right_cut,
                len: seq.len(),
            }
            .into());
        }
        for g in &group_edges {
            if g.position > seq.len() {
                return Err(ConfigError::EdgeOutOfRange {
                    position: g.position,
                    len: seq.len(),
                }
                .into());
            }
            if group_edges.iter().filter(|o| o.edge == g.edge).count() > 1 {
                return Err(ConfigError::DuplicateEdge {
                    name: g.edge.name().to_owned(),
                    is_start: g.edge.is_start(),
                }
                .into());
            }
        }
        if let (Some(BorderPosition::FromStart(l)), Some(BorderPosition::FromStart(r))) =
            (fixed_left, fixed_right)
        {
            if l > r {
                return Err(ConfigError::BordersConflict { left: l, right: r }.into());
            }
        }

        let mut variants = Vec::with_capacity((left_cut + 1) * (right_cut + 1));
        for cl in 0..=left_cut {
            for cr in 0..=right_cut {
                variants.push(SeqVariant::build(seq, &group_edges, cl, cr));
            }
        }

        Ok(Self {
            conf,
            seq: seq.to_vec(),
            left_cut,
            right_cut,
            fixed_left,
            fixed_right,
            group_edges,
            variants,
        })
    }

    pub fn seq(&self) -> &[u8] {
        &self.seq
    }

    pub fn group_edges(&self) -> &[GroupEdgePosition] {
        &self.group_edges
    }

    pub fn estimate_max_length(&self) -> Option<usize> {
        Some(self.seq.len() + self.conf.bitap_max_errors)
    }

    /// More wildcard ambiguity and more cut variants mean more candidates to
    /// refine; anchored patterns are near free.
    pub(crate) fn estimate_complexity(&self) -> u64 {
        if self.fixed_left.is_some() || self.fixed_right.is_some() {
            return self.variants.len() as u64;
        }
        let letter_cost: u64 = self
            .seq
            .iter()
            .map(|&c| base_mask(c).count_ones() as u64)
            .sum();
        self.variants.len() as u64 * letter_cost
    }

    pub(crate) fn match_stream<'a>(&'a self, ctx: SearchContext<'a>) -> MatchStream<'a> {
        if ctx.from >= ctx.to {
            return Box::new(iter::empty());
        }
        if self.fixed_left.is_some() || self.fixed_right.is_some() {
            return self.fixed_border_stream(ctx);
        }
        if ctx.fair {
            Box::new(self.collect_fair(ctx).into_iter())
        } else {
            Box::new(FuzzyUnfairIter {
                pattern: self,
                ctx,
                stage: 0,
                variant: 0,
                hits: None,
                pending: Vec::new().into_iter(),
                seen: vec![FxHashSet::default(); self.variants.len()],
            })
        }
    }

    /// Pattern end positions implied by one bit-parallel hit. When the
    /// window stops short of the motif end, indels spread the implied end
    /// over an error-budget band.
    fn candidate_ends(&self, variant: usize, bitap_end: usize, ctx: SearchContext) -> Vec<usize> {
        let v = &self.variants[variant];
        if v.tail == 0 {
            return vec![bitap_end];
        }
        let budget = self.conf.bitap_max_errors;
        let center = bitap_end + v.tail;
        let lo = center.saturating_sub(budget).max(ctx.from);
        let hi = (center + budget).min(ctx.to - 1);
        (lo..=hi).collect()
    }

    fn refine<'a>(
        &'a self,
        variant: usize,
        ctx: SearchContext<'a>,
        end: usize,
    ) -> Option<MatchIntermediate<'a>> {
        let v = &self.variants[variant];
        let window_from = (end + 1)
            .saturating_sub(v.seq.len() + self.conf.bitap_max_errors)
            .max(ctx.from);
        let aln = align(
            &self.conf,
            &v.seq,
            ctx.target.seq(),
            AlignMode::LeftAdded { window_from, end },
        );
        (aln.score >= self.conf.score_threshold).then(|| build_match(v, ctx, &aln))
    }

    fn collect_fair<'a>(&'a self, ctx: SearchContext<'a>) -> Vec<MatchIntermediate<'a>> {
        let budget = self.conf.bitap_max_errors;
        let mut best: FxHashMap<(usize, usize), MatchIntermediate<'a>> = FxHashMap::default();
        for (vi, v) in self.variants.iter().enumerate() {
            let mut seen = FxHashSet::default();
            for be in v.bitap.find_iter(ctx.target.seq(), ctx.from, ctx.to, budget) {
                for end in self.candidate_ends(vi, be, ctx) {
                    if !seen.insert(end) {
                        continue;
                    }
                    if let Some(m) = self.refine(vi, ctx, end) {
                        insert_best(&mut best, m);
                    }
                }
            }
        }
        let mut all: Vec<_> = best.into_values().collect();
        all.sort_by(compare_matches);
        all
    }

    /// Anchored search: candidates exist only where the fixed borders put
    /// them, and the result is always sorted.
    fn fixed_border_stream<'a>(&'a self, ctx: SearchContext<'a>) -> MatchStream<'a> {
        let tlen = ctx.target.len();
        let left = match self.fixed_left {
            Some(b) => match b.resolve(tlen) {
                Some(p) if p >= ctx.from && p < ctx.to => Some(p),
                _ => return Box::new(iter::empty()),
            },
            None => None,
        };
        let right = match self.fixed_right {
            Some(b) => match b.resolve(tlen) {
                Some(p) if p >= ctx.from && p < ctx.to => Some(p),
                _ => return Box::new(iter::empty()),
            },
            None => None,
        };

        let budget = self.conf.bitap_max_errors;
        let mut best: FxHashMap<(usize, usize), MatchIntermediate<'a>> = FxHashMap::default();
        for v in &self.variants {
            match (left, right) {
                (Some(l), Some(r)) => {
                    if l <= r {
                        self.refine_anchored(v, ctx, l, r, &mut best);
                    }
                }
                (Some(l), None) => {
                    let center = l + v.seq.len() - 1;
                    let lo = center.saturating_sub(budget).max(l);
                    let hi = (center + budget).min(ctx.to - 1);
                    for end in lo..=hi {
                        self.refine_anchored(v, ctx, l, end, &mut best);
                    }
                }
                (None, Some(r)) => {
                    let window_from = (r + 1)
                        .saturating_sub(v.seq.len() + budget)
                        .max(ctx.from);
                    let aln = align(
                        &self.conf,
                        &v.seq,
                        ctx.target.seq(),
                        AlignMode::LeftAdded { window_from, end: r },
                    );
                    if aln.score >= self.conf.score_threshold {
                        insert_best(&mut best, build_match(v, ctx, &aln));
                    }
                }
                (None, None) => unreachable!(),
            }
        }
        let mut all: Vec<_> = best.into_values().collect();
        all.sort_by(compare_matches);
        Box::new(all.into_iter())
    }

    fn refine_anchored<'a>(
        &'a self,
        v: &'a SeqVariant,
        ctx: SearchContext<'a>,
        from: usize,
        end: usize,
        best: &mut FxHashMap<(usize, usize), MatchIntermediate<'a>>,
    ) {
        let aln = align(
            &self.conf,
            &v.seq,
            ctx.target.seq(),
            AlignMode::Global { from, to: end + 1 },
        );
        if aln.score >= self.conf.score_threshold {
            insert_best(best, build_match(v, ctx, &aln));
        }
    }
}

impl SeqVariant {
    fn build(seq: &[u8], edges: &[GroupEdgePosition], cl: usize, cr: usize) -> Self {
        let vseq = seq[cl..seq.len() - cr].to_vec();
        let vlen = vseq.len();
        let vedges = edges
            .iter()
            .map(|g| {
                let p = g.position.clamp(cl, seq.len() - cr) - cl;
                GroupEdgePosition::new(g.edge.clone(), p)
            })
            .collect();

        // Motifs beyond the bit-parallel width search on whichever half
        // carries less wildcard ambiguity; alignment verifies the rest.
        let (wstart, wend) = if vlen <= MAX_BITAP_LEN {
            (0, vlen)
        } else {
            let amb = |s: &[u8]| -> u32 { s.iter().map(|&c| base_mask(c).count_ones()).sum() };
            if amb(&vseq[..MAX_BITAP_LEN]) < amb(&vseq[vlen - MAX_BITAP_LEN..]) {
                (0, MAX_BITAP_LEN)
            } else {
                (vlen - MAX_BITAP_LEN, vlen)
            }
        };
        let bitap = BitapMatcher::new(&vseq[wstart..wend]);
        let upper_left = vseq.iter().position(|&c| is_case_significant(c));
        let upper_right = vseq
            .iter()
            .rposition(|&c| is_case_significant(c))
            .map(|i| vlen - 1 - i);

        Self {
            seq: vseq,
            edges: vedges,
            bitap,
            tail: vlen - wend,
            upper_left,
            upper_right,
        }
    }
}

fn build_match<'a>(
    v: &SeqVariant,
    ctx: SearchContext<'a>,
    aln: &Alignment,
) -> MatchIntermediate<'a> {
    let edges = v
        .edges
        .iter()
        .map(|g| {
            MatchedGroupEdge::new(
                ctx.target,
                ctx.target_id,
                g.edge.clone(),
                aln.edge_position(g.position),
            )
        })
        .collect();
    MatchIntermediate {
        score: aln.score,
        target_count: 1,
        ranges: vec![MatchedRange::new(ctx.target, ctx.target_id, aln.from, aln.to)],
        edges,
        upper_left: v.upper_left,
        upper_right: v.upper_right,
    }
}

fn insert_best<'a>(
    best: &mut FxHashMap<(usize, usize), MatchIntermediate<'a>>,
    m: MatchIntermediate<'a>,
) {
    let key = (m.ranges[0].from, m.ranges[0].to);
    match best.entry(key) {
        Entry::Occupied(mut e) => {
            if m.score > e.get().score {
                e.insert(m);
            }
        }
        Entry::Vacant(e) => {
            e.insert(m);
        }
    }
}

/// Unfair traversal: error budgets from 0 up, cut variants inside each
/// budget, bit-parallel hits left to right. Each refined end position is
/// tried once per variant.
struct FuzzyUnfairIter<'a> {
    pattern: &'a FuzzyMatchPattern,
    ctx: SearchContext<'a>,
    /// Next (errors, variant) stage to open, counted as one number.
    stage: usize,
    variant: usize,
    hits: Option<BitapIter<'a>>,
    pending: std::vec::IntoIter<usize>,
    seen: Vec<FxHashSet<usize>>,
}

impl<'a> Iterator for FuzzyUnfairIter<'a> {
    type Item = MatchIntermediate<'a>;

    fn next(&mut self) -> Option<MatchIntermediate<'a>> {
        loop {
            if let Some(end) = self.pending.next() {
                if !self.seen[self.variant].insert(end) {
                    continue;
                }
                if let Some(m) = self.pattern.refine(self.variant, self.ctx, end) {
                    return Some(m);
                }
                continue;
            }
            if let Some(be) = self.hits.as_mut().and_then(Iterator::next) {
                self.pending = self
                    .pattern
                    .candidate_ends(self.variant, be, self.ctx)
                    .into_iter();
                continue;
            }
            let nv = self.pattern.variants.len();
            if self.stage >= (self.pattern.conf.bitap_max_errors + 1) * nv {
                return None;
            }
            let errors = self.stage / nv;
            self.variant = self.stage % nv;
            self.stage += 1;
            self.hits = Some(self.pattern.variants[self.variant].bitap.find_iter(
                self.ctx.target.seq(),
                self.ctx.from,
                self.ctx.to,
                errors,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::GroupEdge;
    use crate::pattern::SinglePattern;
    use crate::sequence::Target;

    fn conf() -> Arc<PatternConfig> {
        Arc::new(PatternConfig::default())
    }

    fn find_all(p: FuzzyMatchPattern, target: &[u8], fair: bool) -> Vec<(i64, usize, usize)> {
        let p = SinglePattern::Fuzzy(p);
        let t = Target::new(target);
        p.find(t, 0, target.len(), fair)
            .map(|m| {
                let (from, to) = m.range().unwrap();
                (m.score(), from, to)
            })
            .collect()
    }

    fn find(p: FuzzyMatchPattern, target: &[u8]) -> Vec<(i64, usize, usize)> {
        find_all(p, target, false)
    }

    #[test]
    fn exact_motif_is_found() {
        let p = FuzzyMatchPattern::new(conf(), b"ATTAGACA", vec![]).unwrap();
        let hits = find(p, b"TTATTAGACATT");
        assert_eq!(hits[0], (0, 2, 10));
    }

    #[test]
    fn substitution_is_scored_and_thresholded() {
        let c = PatternConfig::default();
        let p = FuzzyMatchPattern::new(c.with_score_threshold(-9), b"ATTAGACA", vec![]).unwrap();
        let hits = find(p, b"TTATTACACATT");
        assert_eq!(hits[0], (c.mismatch_score, 2, 10));

        let strict = FuzzyMatchPattern::new(c.with_score_threshold(0), b"ATTAGACA", vec![]).unwrap();
        assert!(find(strict, b"TTATTACACATT").is_empty());
    }

    #[test]
    fn unfair_reports_lower_error_matches_first() {
        let p = FuzzyMatchPattern::new(conf(), b"ATTAGACA", vec![]).unwrap();
        // Exact copy late in the target, one-mismatch copy early.
        let hits = find(p, b"ATTACACATTATTAGACA");
        assert_eq!(hits[0], (0, 10, 18));
        assert!(hits.contains(&(-9, 0, 8)));
    }

    #[test]
    fn group_edges_follow_the_alignment() {
        let edges = vec![
            GroupEdgePosition::new(GroupEdge::start("UMI").unwrap(), 2),
            GroupEdgePosition::new(GroupEdge::end("UMI").unwrap(), 6),
        ];
        let p = SinglePattern::Fuzzy(FuzzyMatchPattern::new(conf(), b"ATTAGACA", edges).unwrap());
        let m = p.find(Target::new(b"GGATTAGACAGG"), 0, 12, false).next().unwrap();
        let g = m.group("UMI").unwrap();
        assert_eq!(g.range, Some((4, 8)));
        assert_eq!(&*g.seq, b"TAGA");
    }

    #[test]
    fn left_cut_variants_match_truncated_motifs() {
        let p = FuzzyMatchPattern::with_cuts(conf(), b"ATTAGACA", 2, 0, vec![]).unwrap();
        // Target starts mid-motif: the two-letter cut variant fits exactly.
        let hits = find(p, b"TAGACATT");
        assert!(hits.contains(&(0, 0, 6)));
    }

    #[test]
    fn cut_edges_clamp_into_the_variant() {
        let edges = vec![
            GroupEdgePosition::new(GroupEdge::start("G1").unwrap(), 0),
            GroupEdgePosition::new(GroupEdge::end("G1").unwrap(), 3),
        ];
        let p = SinglePattern::Fuzzy(
            FuzzyMatchPattern::with_cuts(conf(), b"ATTAGACA", 2, 0, edges).unwrap(),
        );
        let m = p
            .find(Target::new(b"TAGACA"), 0, 6, true)
            .find(|m| m.range() == Some((0, 6)))
            .unwrap();
        // Start clamps to the cut boundary, end keeps one remaining symbol.
        assert_eq!(m.group("G1").unwrap().range, Some((0, 1)));
    }

    #[test]
    fn fixed_left_border_anchors_the_start() {
        let p = || {
            FuzzyMatchPattern::with_borders(
                conf(),
                b"ATTA",
                0,
                0,
                Some(BorderPosition::FromStart(0)),
                None,
                vec![],
            )
            .unwrap()
        };
        assert_eq!(find(p(), b"ATTAGACA")[0], (0, 0, 4));
        assert!(find(p(), b"GATTAGAC").iter().all(|&(s, _, _)| s < 0));
    }

    #[test]
    fn fixed_right_border_anchors_the_end() {
        let p = || {
            FuzzyMatchPattern::with_borders(
                conf(),
                b"GACA",
                0,
                0,
                None,
                Some(BorderPosition::FromEnd(0)),
                vec![],
            )
            .unwrap()
        };
        assert_eq!(find(p(), b"ATTAGACA")[0], (0, 4, 8));
        assert!(find(p(), b"GACATTTT").iter().all(|&(s, _, _)| s < 0));
    }

    #[test]
    fn both_borders_fix_the_whole_range() {
        let p = || {
            FuzzyMatchPattern::with_borders(
                conf(),
                b"ATTAGACA",
                0,
                0,
                Some(BorderPosition::FromStart(0)),
                Some(BorderPosition::FromEnd(0)),
                vec![],
            )
            .unwrap()
        };
        assert_eq!(find(p(), b"ATTAGACA"), vec![(0, 0, 8)]);
        assert!(find(p(), b"ATTAGACAGG").iter().all(|&(s, _, _)| s < 0));
    }

    #[test]
    fn long_motifs_window_the_prefilter() {
        let motif: Vec<u8> = b"ACGT".iter().copied().cycle().take(70).collect();
        let mut target = b"TT".to_vec();
        target.extend_from_slice(&motif);
        target.extend_from_slice(b"TT");
        let p = SinglePattern::Fuzzy(FuzzyMatchPattern::new(conf(), &motif, vec![]).unwrap());
        let m = p
            .find(Target::new(&target), 0, target.len(), false)
            .next()
            .unwrap();
        assert_eq!(m.score(), 0);
        assert_eq!(m.range(), Some((2, 72)));
    }

    #[test]
    fn fair_scores_never_increase() {
        let p = FuzzyMatchPattern::new(conf(), b"ATTAGACA", vec![]).unwrap();
        let hits = find_all(p, b"ATTACACATTATTAGACATTATAAGACA", true);
        assert!(!hits.is_empty());
        for w in hits.windows(2) {
            assert!(w[0].0 >= w[1].0);
        }
        assert_eq!(hits[0].0, 0);
    }

    #[test]
    fn construction_rejects_bad_input() {
        assert!(matches!(
            FuzzyMatchPattern::new(conf(), b"", vec![]),
            Err(Error::Config(ConfigError::EmptySequence))
        ));
        assert!(matches!(
            FuzzyMatchPattern::new(conf(), b"ACXT", vec![]),
            Err(Error::Config(ConfigError::InvalidLetter { letter: 'X' }))
        ));
        assert!(matches!(
            FuzzyMatchPattern::with_cuts(conf(), b"ACGT", 2, 2, vec![]),
            Err(Error::Config(ConfigError::CutsExceedLength { .. }))
        ));
        let far = vec![GroupEdgePosition::new(GroupEdge::start("X").unwrap(), 9)];
        assert!(matches!(
            FuzzyMatchPattern::new(conf(), b"ACGT", far),
            Err(Error::Config(ConfigError::EdgeOutOfRange { .. }))
        ));
    }

    #[test]
    fn uppercase_distances_are_reported() {
        let p = FuzzyMatchPattern::new(conf(), b"attAGAca", vec![]).unwrap();
        let ctx = SearchContext {
            target: Target::new(b"ATTAGACA"),
            target_id: 1,
            from: 0,
            to: 8,
            fair: false,
        };
        let m = p.match_stream(ctx).next().unwrap();
        assert_eq!(m.upper_left, Some(3));
        assert_eq!(m.upper_right, Some(2));
    }
}
