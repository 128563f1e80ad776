//! Query string scanning: quoted spans and bracket balance.
//!
//! Every grammar stage works from one shared scan instead of re-walking the
//! raw string. Quotes are found first; brackets are balanced outside quotes
//! only, so quoted operator characters never confuse the grammar.

use memchr::memmem;

use crate::errors::ScanError;

/// A quoted span, both quote characters included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QuoteSpan {
    pub start: usize,
    pub end: usize,
}

impl QuoteSpan {
    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos <= self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BracketKind {
    Paren,
    Square,
    Brace,
}

impl BracketKind {
    fn of_open(c: u8) -> Option<Self> {
        match c {
            b'(' => Some(BracketKind::Paren),
            b'[' => Some(BracketKind::Square),
            b'{' => Some(BracketKind::Brace),
            _ => None,
        }
    }

    fn of_close(c: u8) -> Option<Self> {
        match c {
            b')' => Some(BracketKind::Paren),
            b']' => Some(BracketKind::Square),
            b'}' => Some(BracketKind::Brace),
            _ => None,
        }
    }
}

/// A balanced bracket pair of one kind. `nested_level` counts the same-kind
/// pairs strictly containing this one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BracketPair {
    pub open: usize,
    pub close: usize,
    pub nested_level: usize,
}

/// Finds every quoted span. Single and double quotes open a span closed only
/// by the same character; a backslash inside makes the next character
/// literal. An unclosed quote is fatal.
pub(crate) fn find_all_quotes(query: &str) -> Result<Vec<QuoteSpan>, ScanError> {
    let bytes = query.as_bytes();
    let mut spans = Vec::new();
    let mut open: Option<(u8, usize)> = None;
    let mut i = 0;
    while i < bytes.len() {
        match open {
            None => {
                if bytes[i] == b'\'' || bytes[i] == b'"' {
                    open = Some((bytes[i], i));
                }
            }
            Some((quote, start)) => {
                if bytes[i] == b'\\' {
                    i += 1;
                } else if bytes[i] == quote {
                    spans.push(QuoteSpan { start, end: i });
                    open = None;
                }
            }
        }
        i += 1;
    }
    if let Some((quote, position)) = open {
        return Err(ScanError::UnterminatedQuote {
            kind: if quote == b'\'' { "single" } else { "double" },
            position,
        });
    }
    Ok(spans)
}

/// Balances all three bracket kinds outside quotes and returns the pairs of
/// the requested kind, sorted by opening position.
pub(crate) fn find_all_brackets(
    query: &str,
    kind: BracketKind,
) -> Result<Vec<BracketPair>, ScanError> {
    let quotes = find_all_quotes(query)?;
    let bytes = query.as_bytes();
    let mut stack: Vec<(BracketKind, usize)> = Vec::new();
    let mut found: Vec<BracketPair> = Vec::new();
    for (i, &c) in bytes.iter().enumerate() {
        if is_in_quotes(&quotes, i) {
            continue;
        }
        if let Some(k) = BracketKind::of_open(c) {
            stack.push((k, i));
        } else if let Some(k) = BracketKind::of_close(c) {
            match stack.pop() {
                Some((opened, open)) if opened == k => {
                    if k == kind {
                        found.push(BracketPair {
                            open,
                            close: i,
                            nested_level: 0,
                        });
                    }
                }
                _ => {
                    return Err(ScanError::MismatchedBracket {
                        found: c as char,
                        position: i,
                    })
                }
            }
        }
    }
    if !stack.is_empty() {
        return Err(ScanError::UnbalancedBrackets { count: stack.len() });
    }
    let levels: Vec<usize> = found
        .iter()
        .map(|p| {
            found
                .iter()
                .filter(|o| o.open < p.open && p.close < o.close)
                .count()
        })
        .collect();
    for (pair, level) in found.iter_mut().zip(levels) {
        pair.nested_level = level;
    }
    found.sort_by_key(|p| p.open);
    Ok(found)
}

pub(crate) fn is_in_quotes(quotes: &[QuoteSpan], pos: usize) -> bool {
    quotes.iter().any(|q| q.contains(pos))
}

/// First position at or after `pos` outside every quoted span. Adjacent
/// spans are skipped in one call.
pub(crate) fn next_outside_quotes(quotes: &[QuoteSpan], mut pos: usize) -> usize {
    while let Some(q) = quotes.iter().find(|q| q.contains(pos)) {
        pos = q.end + 1;
    }
    pos
}

/// First occurrence of `needle` at or after `from` lying fully outside every
/// quoted span.
pub(crate) fn non_quoted_find(
    quotes: &[QuoteSpan],
    query: &str,
    needle: &str,
    from: usize,
) -> Option<usize> {
    if from >= query.len() {
        return None;
    }
    let finder = memmem::Finder::new(needle.as_bytes());
    let mut pos = from;
    while let Some(offset) = finder.find(&query.as_bytes()[pos..]) {
        let at = pos + offset;
        match (at..at + needle.len()).find(|&p| is_in_quotes(quotes, p)) {
            None => return Some(at),
            Some(inside) => pos = next_outside_quotes(quotes, inside),
        }
    }
    None
}
