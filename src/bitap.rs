use memchr::memmem;

use crate::sequence::base_mask;

/// Longest pattern the u64 state words can carry.
pub(crate) const MAX_BITAP_LEN: usize = 63;

/// Bit-parallel approximate matcher for one pattern sequence, tolerating
/// substitutions and indels up to a per-search error budget.
///
/// Wildcards on either side participate through the mask table: bit `i` of
/// `peq[c]` is set when pattern symbol `i` and target symbol `c` can be
/// aligned as a match.
#[derive(Debug)]
pub(crate) struct BitapMatcher {
    len: usize,
    peq: Box<[u64; 256]>,
    /// Byte sequence for the zero-error exact fast path; `None` when the
    /// pattern contains wildcards or mixed case.
    exact: Option<Vec<u8>>,
}

impl BitapMatcher {
    /// Panics when the sequence is empty or longer than [`MAX_BITAP_LEN`];
    /// callers window longer candidates first.
    pub fn new(seq: &[u8]) -> Self {
        assert!(!seq.is_empty() && seq.len() <= MAX_BITAP_LEN);

        let mut peq = Box::new([0u64; 256]);
        for c in 0u16..256 {
            let cm = base_mask(c as u8);
            if cm == 0 {
                continue;
            }
            let mut word = 0u64;
            for (i, &p) in seq.iter().enumerate() {
                if base_mask(p) & cm != 0 {
                    word |= 1 << i;
                }
            }
            peq[c as usize] = word;
        }

        let exact = seq
            .iter()
            .all(|&c| matches!(c, b'A' | b'C' | b'G' | b'T'))
            .then(|| seq.to_vec());

        Self {
            len: seq.len(),
            peq,
            exact,
        }
    }

    /// End positions (inclusive) of substrings of `target[from..to]` matching
    /// within `errors` edits, in left-to-right order.
    pub fn find_iter<'a>(
        &'a self,
        target: &'a [u8],
        from: usize,
        to: usize,
        errors: usize,
    ) -> BitapIter<'a> {
        let to = to.min(target.len());
        let from = from.min(to);
        // Exact uppercase literal at zero errors: substring search is enough,
        // provided the window itself is plain uppercase ACGT. A wildcard or
        // lowercase symbol in the target matches by mask, not by byte.
        // Occurrences may overlap, so each find restarts one past the last
        // hit instead of using the non-overlapping find_iter.
        if errors == 0 {
            if let Some(exact) = &self.exact {
                let window = &target[from..to];
                if window
                    .iter()
                    .all(|&c| matches!(c, b'A' | b'C' | b'G' | b'T'))
                {
                    return BitapIter::Exact {
                        finder: memmem::Finder::new(exact),
                        haystack: window,
                        offset: from,
                        pos: 0,
                        pattern_len: self.len,
                    };
                }
            }
        }
        let mut r = Vec::with_capacity(errors + 1);
        for k in 0..=errors as u64 {
            r.push((1u64 << k) - 1);
        }
        BitapIter::Scan {
            peq: &self.peq,
            match_bit: 1u64 << (self.len - 1),
            target,
            pos: from,
            end: to,
            r,
        }
    }
}

pub(crate) enum BitapIter<'a> {
    Exact {
        finder: memmem::Finder<'a>,
        haystack: &'a [u8],
        offset: usize,
        pos: usize,
        pattern_len: usize,
    },
    Scan {
        peq: &'a [u64; 256],
        match_bit: u64,
        target: &'a [u8],
        pos: usize,
        end: usize,
        r: Vec<u64>,
    },
}

impl Iterator for BitapIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match self {
            BitapIter::Exact {
                finder,
                haystack,
                offset,
                pos,
                pattern_len,
            } => {
                let start = *pos + finder.find(&haystack[*pos..])?;
                *pos = start + 1;
                Some(*offset + start + *pattern_len - 1)
            }
            BitapIter::Scan {
                peq,
                match_bit,
                target,
                pos,
                end,
                r,
            } => {
                while *pos < *end {
                    let c = target[*pos] as usize;
                    let eq = peq[c];
                    let mut prev_old = r[0];
                    r[0] = ((r[0] << 1) | 1) & eq;
                    let mut prev_new = r[0];
                    for k in 1..r.len() {
                        let old = r[k];
                        // insertion, substitution and deletion arcs from the
                        // row above; the low bit is free at any error level.
                        r[k] = ((old << 1) & eq)
                            | prev_old
                            | (prev_old << 1)
                            | (prev_new << 1)
                            | 1;
                        prev_old = old;
                        prev_new = r[k];
                    }
                    let here = *pos;
                    *pos += 1;
                    if r[r.len() - 1] & *match_bit != 0 {
                        return Some(here);
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn ends(seq: &[u8], target: &[u8], errors: usize) -> Vec<usize> {
        BitapMatcher::new(seq)
            .find_iter(target, 0, target.len(), errors)
            .collect()
    }

    #[test]
    fn exact_occurrences() {
        assert_eq!(ends(b"GACA", b"ATTAGACAGACA", 0), vec![7, 11]);
        assert_eq!(ends(b"GACA", b"ATTA", 0), Vec::<usize>::new());
    }

    #[test]
    fn exact_occurrences_may_overlap() {
        assert_eq!(ends(b"AAA", b"AAAAA", 0), vec![2, 3, 4]);
    }

    #[test]
    fn wildcards_take_the_scan_path() {
        assert_eq!(ends(b"GANA", b"ATTAGACAGATA", 0), vec![7, 11]);
        assert_eq!(ends(b"gaca", b"ATTAGACA", 0), vec![7]);
    }

    #[test]
    fn target_side_wildcards_match_at_zero_errors() {
        // N and lowercase in the read match by mask, not by byte.
        assert_eq!(ends(b"GACA", b"TTGANATT", 0), vec![5]);
        assert_eq!(ends(b"GACA", b"TTgacaTT", 0), vec![5]);
    }

    #[test]
    fn one_substitution() {
        assert_eq!(ends(b"GACA", b"ATTAGATA", 0), Vec::<usize>::new());
        assert!(ends(b"GACA", b"ATTAGATA", 1).contains(&7));
    }

    #[test]
    fn one_deletion() {
        // Target misses the C of the pattern.
        assert!(ends(b"GACA", b"ATTGAA", 1).contains(&5));
    }

    #[test]
    fn one_insertion() {
        // Target carries an extra symbol inside the pattern.
        assert!(ends(b"GACA", b"GATCA", 1).contains(&4));
    }

    #[test]
    fn range_limits_the_scan() {
        let m = BitapMatcher::new(b"GACA");
        let hits: Vec<_> = m.find_iter(b"GACAGACA", 1, 8, 0).collect();
        assert_eq!(hits, vec![7]);
    }

    fn edit_distance(a: &[u8], b: &[u8]) -> usize {
        let mut dp: Vec<usize> = (0..=b.len()).collect();
        for i in 1..=a.len() {
            let mut prev = dp[0];
            dp[0] = i;
            for j in 1..=b.len() {
                let cur = dp[j];
                let sub = if a[i - 1] == b[j - 1] { prev } else { prev + 1 };
                dp[j] = sub.min(dp[j] + 1).min(dp[j - 1] + 1);
                prev = cur;
            }
        }
        dp[b.len()]
    }

    /// A position is reported at budget `e` iff some substring ending there
    /// is within edit distance `e` of the pattern.
    #[test]
    fn agrees_with_dp_edit_distance() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let alphabet = b"ACGT";
        for _ in 0..50 {
            let target: Vec<u8> = (0..40)
                .map(|_| alphabet[rng.gen_range(0..4)])
                .collect();
            let pat: Vec<u8> = (0..6).map(|_| alphabet[rng.gen_range(0..4)]).collect();
            for errors in 0..=2usize {
                let reported = ends(&pat, &target, errors);
                for end in 0..target.len() {
                    // The empty substring (whole pattern deleted) costs its
                    // full length.
                    let mut best = pat.len();
                    for start in 0..=end {
                        best = best.min(edit_distance(&pat, &target[start..=end]));
                    }
                    let expected = best <= errors;
                    assert_eq!(
                        reported.contains(&end),
                        expected,
                        "pat {:?} target {:?} end {} errors {}",
                        std::str::from_utf8(&pat).unwrap(),
                        std::str::from_utf8(&target).unwrap(),
                        end,
                        errors
                    );
                }
            }
        }
    }
}
