//! Query parsing. Two grammars share the scanning and token machinery:
//! the normal grammar people write (`(UMI:N{4})ATTA & GACA`) and the
//! constructor form the [`Display`](std::fmt::Display) impls print, which
//! round-trips any parsed pattern.

mod normal;
mod scanner;
mod simplified;
mod tokens;

use std::sync::Arc;

use crate::config::PatternConfig;
use crate::errors::Result;
use crate::pattern::Pattern;

/// Parses a query in the normal grammar into a ready-to-search pattern.
pub fn parse_query(query: &str, conf: Arc<PatternConfig>) -> Result<Pattern> {
    normal::parse(query, conf)
}

/// Parses the constructor form produced by formatting a pattern.
pub fn parse_simplified(query: &str, conf: Arc<PatternConfig>) -> Result<Pattern> {
    simplified::parse(query, conf)
}
