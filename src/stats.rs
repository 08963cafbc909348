//! Corpus analytics and conversation transcripts.

use std::collections::{BTreeMap, HashSet};

use chrono::DateTime;
use serde::Serialize;

use crate::records::{MessageRecord, Role};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorpusStats {
    pub total_messages: usize,
    pub conversations: usize,
    pub by_role: BTreeMap<Role, usize>,
    /// UTC day (`YYYY-MM-DD`) to message count
    pub by_day: BTreeMap<String, usize>,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}

pub fn corpus_stats<'a, I>(records: I) -> CorpusStats
where
    I: IntoIterator<Item = &'a MessageRecord>,
{
    let mut stats = CorpusStats::default();
    let mut conversations = HashSet::new();

    for record in records {
        stats.total_messages += 1;
        conversations.insert(record.conversation_id.as_str());
        *stats.by_role.entry(record.role).or_default() += 1;
        *stats.by_day.entry(utc_day(record.timestamp)).or_default() += 1;

        stats.first_timestamp = Some(stats.first_timestamp.map_or(record.timestamp, |t| t.min(record.timestamp)));
        stats.last_timestamp = Some(stats.last_timestamp.map_or(record.timestamp, |t| t.max(record.timestamp)));
    }

    stats.conversations = conversations.len();
    stats
}

pub fn utc_day(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "out-of-range".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptLine {
    pub slot: usize,
    pub role: Role,
    pub timestamp: i64,
    pub content: String,
}

/// Messages of one conversation ordered by timestamp, then slot.
pub fn conversation_transcript<'a, I>(records: I, conversation_id: &str) -> Vec<TranscriptLine>
where
    I: IntoIterator<Item = (usize, &'a MessageRecord)>,
{
    let mut lines: Vec<TranscriptLine> = records
        .into_iter()
        .filter(|(_, r)| r.conversation_id == conversation_id)
        .map(|(slot, r)| TranscriptLine {
            slot,
            role: r.role,
            timestamp: r.timestamp,
            content: r.content.clone(),
        })
        .collect();
    lines.sort_by_key(|l| (l.timestamp, l.slot));
    lines
}

pub fn render_transcript(lines: &[TranscriptLine]) -> String {
    lines
        .iter()
        .map(|l| format!("{}: {}", l.role.speaker(), l.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(conversation: &str, id: &str, role: Role, timestamp: i64) -> MessageRecord {
        MessageRecord {
            content: format!("message {id}"),
            role,
            conversation_id: conversation.to_string(),
            message_id: id.to_string(),
            timestamp,
        }
    }

    fn corpus() -> Vec<MessageRecord> {
        vec![
            record("c1", "m1", Role::User, 1_700_000_000),
            record("c1", "m2", Role::Assistant, 1_700_000_060),
            record("c2", "m3", Role::User, 1_700_090_000),
            record("c1", "m4", Role::User, 1_700_000_030),
            record("c1", "m5", Role::Assistant, 1_700_000_030),
        ]
    }

    #[test]
    fn test_stats_counts() {
        let records = corpus();
        let stats = corpus_stats(&records);

        assert_eq!(stats.total_messages, 5);
        assert_eq!(stats.conversations, 2);
        assert_eq!(stats.by_role[&Role::User], 3);
        assert_eq!(stats.by_role[&Role::Assistant], 2);
        assert_eq!(stats.by_day["2023-11-14"], 4);
        assert_eq!(stats.by_day["2023-11-15"], 1);
        assert_eq!(stats.first_timestamp, Some(1_700_000_000));
        assert_eq!(stats.last_timestamp, Some(1_700_090_000));
    }

    #[test]
    fn test_stats_empty() {
        let stats = corpus_stats(&Vec::<MessageRecord>::new());
        assert_eq!(stats, CorpusStats::default());
    }

    #[test]
    fn test_transcript_orders_by_time_then_slot() {
        let records = corpus();
        let lines = conversation_transcript(records.iter().enumerate(), "c1");

        let slots: Vec<usize> = lines.iter().map(|l| l.slot).collect();
        assert_eq!(slots, vec![0, 3, 4, 1]);

        let text = render_transcript(&lines);
        assert_eq!(
            text,
            "User: message m1\nUser: message m4\nAssistant: message m5\nAssistant: message m2"
        );
    }

    #[test]
    fn test_transcript_unknown_conversation() {
        let records = corpus();
        assert!(conversation_transcript(records.iter().enumerate(), "nope").is_empty());
    }

    #[test]
    fn test_stats_serialize_roles_as_names() {
        let records = corpus();
        let json = serde_json::to_value(corpus_stats(&records)).unwrap();
        assert_eq!(json["by_role"]["user"], 3);
    }
}
