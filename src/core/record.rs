use crate::core::hash::{FuzzyHash, HASH_MARKER, StrictHash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Post-kind prefix carried by every identity token.
pub const POST_PREFIX: &str = "t3_";

/// Length of a bare identity body written by older versions of the log.
const LEGACY_ID_LEN: usize = 6;

/// Identity token naming one candidate post, e.g. `t3_abc123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PostId(String);

impl PostId {
    /// Parses a full identity token (`t3_` followed by a non-empty body).
    pub fn parse(token: &str) -> Option<Self> {
        match token.strip_prefix(POST_PREFIX) {
            Some(body) if !body.is_empty() && !body.contains([',', '\n', '\r']) => {
                Some(Self(token.to_string()))
            }
            _ => None,
        }
    }

    /// Builds an identity from a bare body by synthesizing the prefix.
    pub fn from_body(body: &str) -> Option<Self> {
        Self::parse(&format!("{POST_PREFIX}{body}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity without the post-kind prefix.
    pub fn body(&self) -> &str {
        &self.0[POST_PREFIX.len()..]
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PostId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
            .or_else(|| Self::from_body(&value))
            .ok_or_else(|| format!("invalid post id: {value:?}"))
    }
}

impl From<PostId> for String {
    fn from(id: PostId) -> Self {
        id.0
    }
}

/// One line of the append-only log after classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    pub identity: Option<PostId>,
    pub strict: Vec<StrictHash>,
    pub fuzzy: Vec<FuzzyHash>,
    /// Fields that matched no rule.
    pub ignored: usize,
}

impl LogRecord {
    pub fn is_empty(&self) -> bool {
        self.identity.is_none() && self.strict.is_empty() && self.fuzzy.is_empty()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Field {
    Identity(PostId),
    Fuzzy(FuzzyHash),
    Strict(StrictHash),
    Unrecognized,
}

/// Classifies one comma-separated field.
///
/// Rules are tried in order: current identity, fuzzy token, strict token,
/// then the legacy bare identity, which is only accepted at position 0.
fn classify(index: usize, field: &str) -> Field {
    if let Some(id) = PostId::parse(field) {
        return Field::Identity(id);
    }
    if field.starts_with(HASH_MARKER) {
        return match field.len() {
            len if len == FuzzyHash::TOKEN_LEN => FuzzyHash::parse(field)
                .map(Field::Fuzzy)
                .unwrap_or(Field::Unrecognized),
            len if len == StrictHash::TOKEN_LEN => StrictHash::parse(field)
                .map(Field::Strict)
                .unwrap_or(Field::Unrecognized),
            _ => Field::Unrecognized,
        };
    }
    if index == 0 && is_legacy_body(field) {
        if let Some(id) = PostId::from_body(field) {
            return Field::Identity(id);
        }
    }
    Field::Unrecognized
}

fn is_legacy_body(field: &str) -> bool {
    field.len() == LEGACY_ID_LEN
        && field
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
}

/// Parses one log line. Never fails: unknown fields are counted and dropped.
pub fn parse_line(line: &str) -> LogRecord {
    let mut record = LogRecord::default();
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return record;
    }

    for (index, field) in line.split(',').enumerate() {
        match classify(index, field.trim()) {
            Field::Identity(id) => {
                if record.identity.is_none() {
                    record.identity = Some(id);
                } else {
                    record.ignored += 1;
                }
            }
            Field::Fuzzy(hash) => record.fuzzy.push(hash),
            Field::Strict(hash) => record.strict.push(hash),
            Field::Unrecognized => record.ignored += 1,
        }
    }
    record
}

/// Formats a record in the current log format, newline included.
pub fn format_record(id: &PostId, hashes: Option<(&StrictHash, &FuzzyHash)>) -> String {
    match hashes {
        Some((strict, fuzzy)) => format!("{id},{strict},{fuzzy}\n"),
        None => format!("{id}\n"),
    }
}
