use chrono::{DateTime, NaiveDate};

use crate::cli::errors::{CliError, CliResult};
use crate::records::Role;
use crate::semantic::SearchFilters;

const SECONDS_PER_DAY: i64 = 86_400;

/// Which end of a date range a bare date stands for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Start,
    End,
}

/// Parse `YYYY-MM-DD` or RFC 3339 into epoch seconds.
///
/// A bare date used as an end bound covers the whole day.
pub fn parse_time_bound(field: &str, value: &str, bound: Bound) -> CliResult<i64> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CliError::validation(field, "date cannot be empty"));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        CliError::validation(field, format!("'{value}' is not a date (expected YYYY-MM-DD or RFC 3339)"))
    })?;
    let start = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| CliError::validation(field, format!("'{value}' is out of range")))?
        .and_utc()
        .timestamp();

    Ok(match bound {
        Bound::Start => start,
        Bound::End => start + SECONDS_PER_DAY - 1,
    })
}

pub fn parse_role(value: &str) -> CliResult<Role> {
    value
        .trim()
        .to_lowercase()
        .parse::<Role>()
        .map_err(|e| CliError::validation("role", e))
}

/// Validates search filter input
pub fn validate_search_filters(
    role: Option<&str>,
    since: Option<&str>,
    until: Option<&str>,
    conversation: Option<&str>,
) -> CliResult<SearchFilters> {
    let filters = SearchFilters {
        role: role.map(parse_role).transpose()?,
        since: since.map(|v| parse_time_bound("since", v, Bound::Start)).transpose()?,
        until: until.map(|v| parse_time_bound("until", v, Bound::End)).transpose()?,
        conversation_id: conversation.map(|c| c.trim().to_string()),
    };

    if let (Some(since), Some(until)) = (filters.since, filters.until) {
        if since > until {
            return Err(CliError::invalid_input("--since must not be later than --until"));
        }
    }
    if matches!(filters.conversation_id.as_deref(), Some("")) {
        return Err(CliError::validation("conversation", "conversation id cannot be empty"));
    }

    Ok(filters)
}

/// Validates search query input
pub fn validate_query(query: &str, top_k: Option<usize>, max_top_k: usize) -> CliResult<()> {
    if query.trim().is_empty() {
        return Err(CliError::validation("query", "query cannot be empty"));
    }
    if let Some(k) = top_k {
        if k == 0 || k > max_top_k {
            return Err(CliError::validation(
                "top_k",
                format!("must be between 1 and {max_top_k}"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_date_bounds() {
        assert_eq!(parse_time_bound("since", "2024-01-02", Bound::Start).unwrap(), 1_704_153_600);
        assert_eq!(parse_time_bound("until", "2024-01-02", Bound::End).unwrap(), 1_704_239_999);
    }

    #[test]
    fn test_rfc3339_bound() {
        assert_eq!(
            parse_time_bound("since", "2024-01-02T01:00:00+01:00", Bound::Start).unwrap(),
            1_704_153_600
        );
    }

    #[test]
    fn test_bad_dates() {
        assert!(parse_time_bound("since", "yesterday", Bound::Start).is_err());
        assert!(parse_time_bound("since", "2024-13-01", Bound::Start).is_err());
        assert!(parse_time_bound("since", " ", Bound::Start).is_err());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(parse_role("Assistant").unwrap(), Role::Assistant);
        assert!(parse_role("system").is_err());
    }

    #[test]
    fn test_filters() {
        let filters = validate_search_filters(Some("user"), Some("2024-01-01"), Some("2024-01-31"), None).unwrap();
        assert_eq!(filters.role, Some(Role::User));
        assert!(filters.since.unwrap() < filters.until.unwrap());

        assert!(validate_search_filters(None, Some("2024-02-01"), Some("2024-01-01"), None).is_err());
        assert!(validate_search_filters(None, None, None, Some("  ")).is_err());
        assert!(validate_search_filters(None, None, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_query_validation() {
        assert!(validate_query("faiss", Some(5), 100).is_ok());
        assert!(validate_query("faiss", None, 100).is_ok());
        assert!(validate_query("   ", Some(5), 100).is_err());
        assert!(validate_query("faiss", Some(0), 100).is_err());
        assert!(validate_query("faiss", Some(101), 100).is_err());
    }
}
