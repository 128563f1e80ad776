use serde::Serialize;

/// 4-bit base masks for IUPAC nucleotide codes, case-insensitive.
/// A=1, C=2, G=4, T=8; wildcards are unions; 0 marks a non-nucleotide byte.
static MASK_LUT: [u8; 256] = {
    let mut l = [0u8; 256];
    let codes: [(u8, u8); 16] = [
        (b'A', 1),
        (b'C', 2),
        (b'G', 4),
        (b'T', 8),
        (b'U', 8),
        (b'W', 1 | 8),
        (b'S', 2 | 4),
        (b'M', 1 | 2),
        (b'K', 4 | 8),
        (b'R', 1 | 4),
        (b'Y', 2 | 8),
        (b'B', 2 | 4 | 8),
        (b'D', 1 | 4 | 8),
        (b'H', 1 | 2 | 8),
        (b'V', 1 | 2 | 4),
        (b'N', 1 | 2 | 4 | 8),
    ];
    let mut i = 0;
    while i < codes.len() {
        let c = codes[i].0;
        let m = codes[i].1;
        l[c as usize] = m;
        l[(c + 32) as usize] = m;
        i += 1;
    }
    l
};

/// Base mask of a letter; 0 when the byte is not a nucleotide code.
#[inline]
pub fn base_mask(letter: u8) -> u8 {
    MASK_LUT[letter as usize]
}

#[inline]
pub fn is_nucleotide(letter: u8) -> bool {
    MASK_LUT[letter as usize] != 0
}

/// Whether two letters can be aligned as a match.
#[inline]
pub fn letters_match(a: u8, b: u8) -> bool {
    MASK_LUT[a as usize] & MASK_LUT[b as usize] != 0
}

/// Case marks overlap protection, so it is only meaningful on valid letters.
#[inline]
pub fn is_case_significant(letter: u8) -> bool {
    letter.is_ascii_uppercase() && is_nucleotide(letter)
}

/// One read being searched: its sequence and optional per-symbol quality.
/// Quality is carried through to group extraction but never scored.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Target<'a> {
    seq: &'a [u8],
    qual: Option<&'a [u8]>,
}

impl<'a> Target<'a> {
    pub fn new(seq: &'a [u8]) -> Self {
        Self { seq, qual: None }
    }

    /// Panics when the quality string length differs from the sequence.
    pub fn with_qual(seq: &'a [u8], qual: &'a [u8]) -> Self {
        assert!(
            seq.len() == qual.len(),
            "quality length {} does not match sequence length {}",
            qual.len(),
            seq.len()
        );
        Self {
            seq,
            qual: Some(qual),
        }
    }

    #[inline]
    pub fn seq(&self) -> &'a [u8] {
        self.seq
    }

    #[inline]
    pub fn qual(&self) -> Option<&'a [u8]> {
        self.qual
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

/// The ordered reads of one record. Target ids are 1-based: `get(1)` is the
/// first read, matching the `R1..Rn` default group names.
#[derive(Clone, Debug, Serialize)]
pub struct TargetSet<'a> {
    targets: Vec<Target<'a>>,
}

impl<'a> TargetSet<'a> {
    pub fn new(targets: Vec<Target<'a>>) -> Self {
        Self { targets }
    }

    pub fn from_seqs(seqs: impl IntoIterator<Item = &'a [u8]>) -> Self {
        Self {
            targets: seqs.into_iter().map(Target::new).collect(),
        }
    }

    /// Panics when `id` is 0 or beyond the last read.
    #[inline]
    pub fn get(&self, id: usize) -> Target<'a> {
        assert!(id >= 1 && id <= self.targets.len(), "no target with id {id}");
        self.targets[id - 1]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Target<'a>> + '_ {
        self.targets.iter().copied()
    }
}
