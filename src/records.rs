//! Conversation log loading.
//!
//! The log is newline-delimited JSON, one message per line. Every line is
//! validated against a strict schema and turned into either a
//! [`MessageRecord`] or a [`RejectReason`]. Bad lines are counted and
//! reported, never fatal on their own.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tokens::{TokenCounter, TokenizerError};

/// Content that is technically non-empty but carries nothing to embed.
const PLACEHOLDER_CONTENT: &[&str] = &["{}", "[]"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Label used when rendering transcripts.
    pub fn speaker(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role '{other}' (expected user or assistant)")),
        }
    }
}

/// A validated chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub content: String,
    pub role: Role,
    pub conversation_id: String,
    pub message_id: String,
    /// Epoch seconds, UTC.
    pub timestamp: i64,
}

/// Limits applied to message content.
#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    pub min_content_chars: usize,
    pub max_content_chars: usize,
    /// cl100k tokens; the embedding service refuses longer input
    pub max_content_tokens: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            min_content_chars: 3,
            max_content_chars: 30_000,
            max_content_tokens: 8_191,
        }
    }
}

/// Why a single line was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    InvalidUtf8,
    MalformedJson(String),
    NotAnObject,
    MissingField(&'static str),
    InvalidField(&'static str),
    EmptyContent,
    PlaceholderContent,
    TooShort { len: usize, min: usize },
    Oversized { len: usize, max: usize },
    TooManyTokens { tokens: usize, max: usize },
    InvalidRole(String),
    InvalidTimestamp(String),
    DuplicateMessageId(String),
}

impl RejectReason {
    /// Stable short name used to group rejections in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::InvalidUtf8 => "invalid_utf8",
            RejectReason::MalformedJson(_) => "malformed_json",
            RejectReason::NotAnObject => "not_an_object",
            RejectReason::MissingField(_) => "missing_field",
            RejectReason::InvalidField(_) => "invalid_field",
            RejectReason::EmptyContent => "empty_content",
            RejectReason::PlaceholderContent => "placeholder_content",
            RejectReason::TooShort { .. } => "too_short",
            RejectReason::Oversized { .. } => "oversized",
            RejectReason::TooManyTokens { .. } => "too_many_tokens",
            RejectReason::InvalidRole(_) => "invalid_role",
            RejectReason::InvalidTimestamp(_) => "invalid_timestamp",
            RejectReason::DuplicateMessageId(_) => "duplicate_message_id",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidUtf8 => write!(f, "line is not valid UTF-8"),
            RejectReason::MalformedJson(err) => write!(f, "malformed JSON: {err}"),
            RejectReason::NotAnObject => write!(f, "record is not a JSON object"),
            RejectReason::MissingField(field) => write!(f, "missing required field '{field}'"),
            RejectReason::InvalidField(field) => write!(f, "field '{field}' must be a string"),
            RejectReason::EmptyContent => write!(f, "content is empty"),
            RejectReason::PlaceholderContent => write!(f, "content is an empty placeholder"),
            RejectReason::TooShort { len, min } => {
                write!(f, "content has {len} chars, minimum is {min}")
            }
            RejectReason::Oversized { len, max } => {
                write!(f, "content has {len} chars, maximum is {max}")
            }
            RejectReason::TooManyTokens { tokens, max } => {
                write!(f, "content has {tokens} tokens, maximum is {max}")
            }
            RejectReason::InvalidRole(role) => write!(f, "invalid role '{role}'"),
            RejectReason::InvalidTimestamp(ts) => write!(f, "invalid timestamp {ts}"),
            RejectReason::DuplicateMessageId(id) => write!(f, "duplicate message_id '{id}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// 1-based line number in the source.
    pub line: usize,
    pub reason: RejectReason,
}

/// Outcome of a load: the accepted records in source order plus every rejection.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub records: Vec<MessageRecord>,
    pub rejections: Vec<Rejection>,
}

impl LoadReport {
    pub fn accepted(&self) -> usize {
        self.records.len()
    }

    pub fn rejected(&self) -> usize {
        self.rejections.len()
    }

    /// Rejection counts grouped by reason kind.
    pub fn rejections_by_kind(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for rejection in &self.rejections {
            *counts.entry(rejection.reason.kind()).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read conversation log: {0}")]
    Io(#[from] std::io::Error),

    #[error("conversation log has no valid records ({rejected} rejected)")]
    NoValidRecords { rejected: usize },

    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
}

/// Load and validate a conversation log from disk.
pub fn load_records(path: &Path, opts: &LoaderOptions) -> Result<LoadReport, LoadError> {
    let file = File::open(path)?;
    log::info!("Loading conversation log from {}", path.display());
    load_from_reader(BufReader::new(file), opts)
}

/// Load and validate records from any buffered source.
pub fn load_from_reader<R: BufRead>(reader: R, opts: &LoaderOptions) -> Result<LoadReport, LoadError> {
    let counter = TokenCounter::cl100k()?;
    let mut report = LoadReport::default();
    let mut seen_ids = HashSet::new();

    for (idx, line) in reader.split(b'\n').enumerate() {
        let line_no = idx + 1;
        let bytes = line?;

        let outcome = match String::from_utf8(bytes) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => parse_line(&text, opts, &counter),
            Err(_) => Err(RejectReason::InvalidUtf8),
        };

        let outcome = outcome.and_then(|record| {
            if seen_ids.insert(record.message_id.clone()) {
                Ok(record)
            } else {
                Err(RejectReason::DuplicateMessageId(record.message_id))
            }
        });

        match outcome {
            Ok(record) => report.records.push(record),
            Err(reason) => {
                log::debug!("rejecting line {line_no}: {reason}");
                report.rejections.push(Rejection {
                    line: line_no,
                    reason,
                });
            }
        }
    }

    if !report.rejections.is_empty() {
        log::warn!(
            "Rejected {} of {} lines: {:?}",
            report.rejected(),
            report.rejected() + report.accepted(),
            report.rejections_by_kind()
        );
    }

    if report.records.is_empty() {
        return Err(LoadError::NoValidRecords {
            rejected: report.rejected(),
        });
    }

    log::info!("Loaded {} valid records", report.accepted());
    Ok(report)
}

/// Validate a single non-blank line.
///
/// Length is checked in chars first, then in tokens, so only content that
/// could plausibly fit is tokenized.
pub fn parse_line(line: &str, opts: &LoaderOptions, counter: &TokenCounter) -> Result<MessageRecord, RejectReason> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| RejectReason::MalformedJson(e.to_string()))?;
    let obj = value.as_object().ok_or(RejectReason::NotAnObject)?;

    let content = required_str(obj, "content")?.trim();
    if content.is_empty() {
        return Err(RejectReason::EmptyContent);
    }
    if PLACEHOLDER_CONTENT.contains(&content) {
        return Err(RejectReason::PlaceholderContent);
    }
    let len = content.chars().count();
    if len < opts.min_content_chars {
        return Err(RejectReason::TooShort {
            len,
            min: opts.min_content_chars,
        });
    }
    if len > opts.max_content_chars {
        return Err(RejectReason::Oversized {
            len,
            max: opts.max_content_chars,
        });
    }
    let tokens = counter.count(content);
    if tokens > opts.max_content_tokens {
        return Err(RejectReason::TooManyTokens {
            tokens,
            max: opts.max_content_tokens,
        });
    }

    let role = required_str(obj, "role")?;
    let role = Role::from_str(role).map_err(|_| RejectReason::InvalidRole(role.to_string()))?;

    let conversation_id = non_empty_str(obj, "conversation_id")?;
    let message_id = non_empty_str(obj, "message_id")?;

    let timestamp = obj
        .get("timestamp")
        .filter(|v| !v.is_null())
        .ok_or(RejectReason::MissingField("timestamp"))?;
    let timestamp = parse_timestamp(timestamp)?;

    Ok(MessageRecord {
        content: content.to_string(),
        role,
        conversation_id: conversation_id.to_string(),
        message_id: message_id.to_string(),
        timestamp,
    })
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, RejectReason> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(RejectReason::MissingField(field)),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(RejectReason::InvalidField(field)),
    }
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, RejectReason> {
    let value = required_str(obj, field)?.trim();
    if value.is_empty() {
        return Err(RejectReason::MissingField(field));
    }
    Ok(value)
}

/// Normalize an integer, float or ISO-8601 timestamp to epoch seconds.
pub fn parse_timestamp(value: &Value) -> Result<i64, RejectReason> {
    let invalid = || RejectReason::InvalidTimestamp(value.to_string());

    match value {
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                return Ok(secs);
            }
            match n.as_f64() {
                Some(secs) if secs.is_finite() && secs.abs() < i64::MAX as f64 => {
                    Ok(secs.floor() as i64)
                }
                _ => Err(invalid()),
            }
        }
        Value::String(s) => parse_iso8601(s.trim()).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Parse RFC 3339, or an offset-less ISO-8601 datetime interpreted as UTC.
pub fn parse_iso8601(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().timestamp())
}
