//! Pattern matching engine for locating barcodes, adapters and other motifs
//! in nucleotide sequencing reads.
//!
//! # Overview
//! readpat compiles a query language for fuzzy sequence patterns into
//! searchable pattern trees.
//!
//! This is useful for:
//! * Extracting UMIs and cell barcodes from custom library layouts
//! * Locating adapters and primers with mismatch and indel tolerance
//! * Demultiplexing paired reads with per-read patterns
//! * Prototyping barcode layouts before committing to a pipeline
//!
//! ## Queries
//! A query describes where motifs sit in a read and which parts to capture
//! as named groups:
//! ```text
//! (UMI:N{4})ATTAGACA        four captured letters, then a motif
//! ^(BC:ATTN)GACA            motif anchored to the read start
//! [-7: ATTAGACA ]           accept hits scoring at least -7
//! (B1:ATTA) \ (B2:GACA)     one pattern per read of a paired record
//! ```
//! Motif letters are IUPAC codes, so `N` matches anything and `W` matches
//! `A` or `T`. Lowercase letters additionally allow combining operators to
//! overlap them. `&` requires both operands anywhere in the read, `|` takes
//! alternatives, and juxtaposition (or `+`) requires left-to-right order.
//! `\` splits a query across the reads of a record; `&&`, `||` and `~`
//! combine those record-level patterns.
//!
//! ## Searching
//! [`parse_query`] turns a query into a [`Pattern`], which is searched
//! against a [`TargetSet`] holding one byte sequence per read:
//! ```
//! use std::sync::Arc;
//! use readpat::{parse_query, PatternConfig, TargetSet};
//!
//! let conf = Arc::new(PatternConfig::default());
//! let pattern = parse_query("(UMI:N{4})ATTA", conf).unwrap();
//!
//! let targets = TargetSet::from_seqs([b"TGCAATTAGG".as_slice()]);
//! let m = pattern.search(&targets).best_match(true).unwrap();
//! assert_eq!(m.score(), 0);
//! assert_eq!(m.group("UMI").unwrap().range, Some((0, 4)));
//! ```
//! Matching is approximate: hits collect mismatch, gap and overlap
//! penalties, and every hit scoring at least `score_threshold` is reported.
//! Streams come in two flavors picked per search: *fair* enumerates
//! everything and yields strictly best-first, *unfair* yields quickly in
//! roughly decreasing quality. `best_match(true)` is exact; filtering
//! pipelines usually take the first unfair hit instead.
//!
//! ## Groups
//! Each match exposes its captured groups by name, [`Match::groups`]
//! assembles them lazily. Every read also carries a default whole-read
//! group `R1`, `R2`, ... unless the query declares that name itself.
//!
//! ## Reloading patterns
//! Formatting a pattern prints a constructor form that
//! [`parse_simplified`] parses back, so compiled queries can be stored in
//! text form:
//! ```text
//! SequencePattern([RepeatNPattern(N, 4, 4, -1, -1, [...]), ...])
//! ```

pub mod config;
pub mod display;
pub mod errors;
pub mod groups;
pub mod matches;
pub mod parse;
pub mod pattern;
pub mod sequence;

mod align;
mod bitap;
mod sorter;

// commonly used functions and types

pub use crate::config::PatternConfig;
pub use crate::display::render_match;
pub use crate::errors::{Error, Result};
pub use crate::matches::{Match, Matches};
pub use crate::parse::*;
pub use crate::pattern::{Pattern, SearchResult};
pub use crate::sequence::*;
