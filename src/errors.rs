use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for query parsing and pattern construction.
///
/// Matching itself never fails: "no match" is the end of the match stream.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid configuration yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors found while scanning quotes and brackets, before any grammar runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("unterminated {kind} quote opened at position {position}")]
    UnterminatedQuote { kind: &'static str, position: usize },
    #[error("mismatched closing bracket '{found}' at position {position}")]
    MismatchedBracket { found: char, position: usize },
    #[error("{count} unbalanced opening bracket(s) in query")]
    UnbalancedBrackets { count: usize },
}

/// Errors from the grammar stages. The query is rejected wholesale; there is
/// no partial parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("query contains non-ascii byte at position {position}")]
    NonAscii { position: usize },
    #[error("grammar could not consume: {tokens}")]
    UnconsumedTokens { tokens: String },
    #[error("group name must be alphanumeric and non-empty, got '{name}'")]
    InvalidGroupName { name: String },
    #[error("empty group name at position {position}")]
    EmptyGroupName { position: usize },
    #[error("duplicate {} edge for group '{name}'", edge_side(.is_start))]
    DuplicateGroupEdge { name: String, is_start: bool },
    #[error("group '{name}' is missing its {} edge", edge_side(.missing_start))]
    UnpairedGroupEdge { name: String, missing_start: bool },
    #[error("invalid number '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },
    #[error("malformed {construct} at position {position}: {reason}")]
    MalformedArguments {
        construct: String,
        position: usize,
        reason: &'static str,
    },
    #[error("misplaced '{found}' at position {position}: {reason}")]
    Misplaced {
        found: String,
        position: usize,
        reason: &'static str,
    },
    #[error("group '{name}' must not contain the '{operator}' operator")]
    GroupOverOperator { name: String, operator: char },
    #[error("group '{name}' must appear in every alternation branch")]
    AlternationGroupMismatch { name: String },
    #[error("unknown constructor '{name}' at position {position}")]
    UnknownConstructor { name: String, position: usize },
}

/// Impossible parameter combinations caught at pattern construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pattern sequence is empty")]
    EmptySequence,
    #[error("invalid nucleotide letter '{letter}'")]
    InvalidLetter { letter: char },
    #[error("cut lengths {left}+{right} leave no symbols of a {len}-symbol sequence")]
    CutsExceedLength { left: usize, right: usize, len: usize },
    #[error("min repeats {min} is greater than max repeats {max}")]
    MinOverMax { min: usize, max: usize },
    #[error("min repeats must be at least 1")]
    ZeroRepeats,
    #[error("group edge position {position} is outside the pattern (length {len})")]
    EdgeOutOfRange { position: usize, len: usize },
    #[error("duplicate {} edge for group '{name}' in one pattern", edge_side(.is_start))]
    DuplicateEdge { name: String, is_start: bool },
    #[error("fixed left border {left} is beyond fixed right border {right}")]
    BordersConflict { left: usize, right: usize },
    #[error("{construct} needs at least {required} operands, got {count}")]
    FewOperands {
        construct: &'static str,
        required: usize,
        count: usize,
    },
    #[error("invalid filter for {construct}: {reason}")]
    InvalidFilter {
        construct: &'static str,
        reason: &'static str,
    },
}

fn edge_side(is_start: &bool) -> &'static str {
    if *is_start {
        "start"
    } else {
        "end"
    }
}

