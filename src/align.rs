use crate::config::PatternConfig;
use crate::sequence::letters_match;

/// How the alignment window is anchored on the target.
#[derive(Clone, Copy, Debug)]
pub(crate) enum AlignMode {
    /// Right end fixed at `end` (inclusive, from a bit-parallel hit); the
    /// pattern may start anywhere at or after `window_from`.
    LeftAdded { window_from: usize, end: usize },
    /// Both ends fixed; `to` is exclusive.
    Global { from: usize, to: usize },
}

/// Result of refining one candidate: exact range, score, and the mapping
/// from pattern edges to target coordinates used to place group edges.
#[derive(Clone, Debug)]
pub(crate) struct Alignment {
    pub score: i64,
    pub from: usize,
    pub to: usize,
    edge_map: Vec<usize>,
}

impl Alignment {
    /// Target coordinate of a pattern edge (0..=pattern length), clamped to
    /// the matched range.
    pub fn edge_position(&self, pattern_edge: usize) -> usize {
        let i = pattern_edge.min(self.edge_map.len() - 1);
        self.edge_map[i].clamp(self.from, self.to)
    }
}

/// Aligns the full pattern against a target window with linear gap scores.
/// The pattern is always consumed entirely; only the target side is windowed.
pub(crate) fn align(
    conf: &PatternConfig,
    pattern: &[u8],
    target: &[u8],
    mode: AlignMode,
) -> Alignment {
    let (win_from, win_to, free_left) = match mode {
        AlignMode::LeftAdded { window_from, end } => (window_from, end + 1, true),
        AlignMode::Global { from, to } => (from, to, false),
    };
    debug_assert!(win_from <= win_to && win_to <= target.len());

    let m = pattern.len();
    let w = win_to - win_from;
    let cols = w + 1;
    let window = &target[win_from..win_to];

    // dp[i * cols + j]: best score aligning pattern[..i] against window[..j].
    let mut dp = vec![0i64; (m + 1) * cols];
    for j in 0..=w {
        dp[j] = if free_left { 0 } else { j as i64 * conf.gap_score };
    }
    for i in 1..=m {
        dp[i * cols] = i as i64 * conf.gap_score;
        for j in 1..=w {
            let sub = if letters_match(pattern[i - 1], window[j - 1]) {
                conf.match_score
            } else {
                conf.mismatch_score
            };
            let diag = dp[(i - 1) * cols + j - 1] + sub;
            let del = dp[(i - 1) * cols + j] + conf.gap_score;
            let ins = dp[i * cols + j - 1] + conf.gap_score;
            dp[i * cols + j] = diag.max(del).max(ins);
        }
    }

    let score = dp[m * cols + w];

    // Trace back preferring substitution over deletion over insertion so the
    // edge map is deterministic.
    let mut edge_map = vec![0usize; m + 1];
    let mut i = m;
    let mut j = w;
    edge_map[m] = win_from + j;
    while i > 0 {
        let here = dp[i * cols + j];
        if j > 0 {
            let sub = if letters_match(pattern[i - 1], window[j - 1]) {
                conf.match_score
            } else {
                conf.mismatch_score
            };
            if here == dp[(i - 1) * cols + j - 1] + sub {
                edge_map[i - 1] = win_from + j - 1;
                i -= 1;
                j -= 1;
                continue;
            }
        }
        if here == dp[(i - 1) * cols + j] + conf.gap_score {
            edge_map[i - 1] = win_from + j;
            i -= 1;
            continue;
        }
        debug_assert!(j > 0);
        j -= 1;
    }

    let from = if free_left { win_from + j } else { win_from };
    Alignment {
        score,
        from,
        to: win_to,
        edge_map,
    }
}
