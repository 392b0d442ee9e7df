use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{DecisionKind, Durability, Outcome};

use super::pattern::OriginPattern;

/// Version of the store file layout written by this crate.
pub const STORE_VERSION: &str = "3";

/// Prefix of the header line.
pub const VERSION_PREFIX: &str = "#VERSION ";

/// Full header line, without the trailing newline.
pub fn header_line() -> String {
    format!(
        "{}{} - note, do not edit or modify this line. It may cause removal of this file.",
        VERSION_PREFIX, STORE_VERSION
    )
}

/// Version token of a header line, or `None` when the line is not a header.
pub fn parse_header(line: &str) -> Option<&str> {
    line.strip_prefix(VERSION_PREFIX)
        .and_then(|rest| rest.split_whitespace().next())
}

/// One remembered answer as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RememberedEntry {
    pub kind: DecisionKind,
    pub pattern: OriginPattern,
    pub timestamp: DateTime<Utc>,
    pub durability: Durability,
    pub outcome: Outcome,
}

/// One line of the store file: answers for several kinds sharing an origin pattern.
///
/// Encoded as `kind:C{VALUE};kind2:C{VALUE}; <millis> <origin-regex>` where `C`
/// is `A` for a remembered allow or sandbox and `N` for a remembered deny.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreLine {
    pub pattern: OriginPattern,
    pub timestamp: DateTime<Utc>,
    pub decisions: Vec<(DecisionKind, Outcome)>,
}

impl StoreLine {
    pub fn new(pattern: OriginPattern, timestamp: DateTime<Utc>) -> Self {
        StoreLine {
            pattern,
            timestamp,
            decisions: Vec::new(),
        }
    }

    /// Parse a line. `Ok(None)` means the line is well formed but carries no
    /// remembered answer this crate understands.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let (block, rest) = line
            .split_once(' ')
            .ok_or_else(|| "missing timestamp".to_string())?;
        let (millis, pattern) = rest
            .trim_start()
            .split_once(' ')
            .ok_or_else(|| "missing origin pattern".to_string())?;

        let millis: i64 = millis
            .parse()
            .map_err(|_| format!("invalid timestamp {millis:?}"))?;
        let timestamp = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| format!("timestamp out of range: {millis}"))?;

        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err("empty origin pattern".to_string());
        }
        let pattern = OriginPattern::new(pattern).map_err(|e| e.to_string())?;

        let mut decisions = Vec::new();
        for item in block.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(decision) = parse_decision(item)? {
                if !decisions.iter().any(|(kind, _)| *kind == decision.0) {
                    decisions.push(decision);
                }
            }
        }

        if decisions.is_empty() {
            return Ok(None);
        }

        Ok(Some(StoreLine {
            pattern,
            timestamp,
            decisions,
        }))
    }

    pub fn encode(&self) -> String {
        let mut line = String::new();
        for (kind, outcome) in &self.decisions {
            let marker = if outcome.is_denied() { 'N' } else { 'A' };
            line.push_str(&format!("{}:{}{{{}}};", kind.key(), marker, outcome.as_str()));
        }
        line.push_str(&format!(
            " {} {}",
            self.timestamp.timestamp_millis(),
            self.pattern.as_str()
        ));
        line
    }

    pub fn outcome_for(&self, kind: DecisionKind) -> Option<Outcome> {
        self.decisions
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, outcome)| *outcome)
    }

    /// Insert or replace the answer for `kind`.
    pub fn set(&mut self, kind: DecisionKind, outcome: Outcome, timestamp: DateTime<Utc>) {
        match self.decisions.iter_mut().find(|(k, _)| *k == kind) {
            Some(existing) => existing.1 = outcome,
            None => self.decisions.push((kind, outcome)),
        }
        self.timestamp = timestamp;
    }

    /// Remove the answer for `kind`; true when one was present.
    pub fn remove(&mut self, kind: DecisionKind) -> bool {
        let before = self.decisions.len();
        self.decisions.retain(|(k, _)| *k != kind);
        self.decisions.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn entries(&self, durability: Durability) -> impl Iterator<Item = RememberedEntry> + '_ {
        self.decisions.iter().map(move |(kind, outcome)| RememberedEntry {
            kind: *kind,
            pattern: self.pattern.clone(),
            timestamp: self.timestamp,
            durability,
            outcome: *outcome,
        })
    }
}

/// Set `kind` on the line holding `pattern`, appending a new line when none does.
pub fn upsert(
    lines: &mut Vec<StoreLine>,
    pattern: &OriginPattern,
    kind: DecisionKind,
    outcome: Outcome,
    timestamp: DateTime<Utc>,
) {
    match lines.iter_mut().find(|line| line.pattern == *pattern) {
        Some(line) => line.set(kind, outcome, timestamp),
        None => {
            let mut line = StoreLine::new(pattern.clone(), timestamp);
            line.set(kind, outcome, timestamp);
            lines.push(line);
        }
    }
}

/// Remove `kind` from the line whose pattern source is `pattern`, dropping
/// the line once it is empty. True when something was removed.
pub fn remove(lines: &mut Vec<StoreLine>, kind: DecisionKind, pattern: &str) -> bool {
    let mut removed = false;
    for line in lines.iter_mut().filter(|line| line.pattern.as_str() == pattern) {
        removed |= line.remove(kind);
    }
    lines.retain(|line| !line.is_empty());
    removed
}

/// First answer for `kind` in `lines` whose pattern matches `origin`.
pub fn find(lines: &[StoreLine], kind: DecisionKind, origin: &str) -> Option<Outcome> {
    lines
        .iter()
        .filter(|line| line.pattern.matches(origin))
        .find_map(|line| line.outcome_for(kind))
}

/// Parse `kind:C{VALUE}`. Once-only markers (`y`, `n`), unset markers (`X`)
/// and unknown kinds yield `Ok(None)`.
fn parse_decision(item: &str) -> Result<Option<(DecisionKind, Outcome)>, String> {
    let (key, value) = item
        .split_once(':')
        .ok_or_else(|| format!("malformed decision {item:?}"))?;

    let mut chars = value.chars();
    let marker = chars
        .next()
        .ok_or_else(|| format!("empty decision value in {item:?}"))?;

    let inner = chars
        .as_str()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| format!("malformed decision value in {item:?}"))?;

    let kind = match key.trim().parse::<DecisionKind>() {
        Ok(kind) => kind,
        Err(_) => return Ok(None),
    };

    match marker {
        'N' => Ok(Some((kind, Outcome::Deny))),
        'A' => {
            let outcome = inner.parse::<Outcome>()?;
            Ok(Some((kind, outcome)))
        }
        'y' | 'n' | 'X' => Ok(None),
        other => Err(format!("unknown decision marker {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_header() {
        let header = header_line();
        assert!(header.starts_with("#VERSION 3 - note"));
        assert_eq!(parse_header(&header), Some("3"));
        assert_eq!(parse_header("#VERSION 2"), Some("2"));
        assert_eq!(parse_header("run-unsigned-application:A{ALLOW}; 1 .*"), None);
    }

    #[test]
    fn test_parse_multi_kind_line() {
        let line = StoreLine::parse(
            concat!(
                "run-unsigned-application:A{SANDBOX};allow-library-codebase:N{DENY};",
                r" 1363278653454 http://example\.com/.*",
            ),
        )
        .unwrap()
        .unwrap();

        assert_eq!(line.timestamp, ts(1363278653454));
        assert_eq!(line.outcome_for(DecisionKind::RunUnsignedApplication), Some(Outcome::Sandbox));
        assert_eq!(line.outcome_for(DecisionKind::AllowLibraryCodebase), Some(Outcome::Deny));
        assert_eq!(line.outcome_for(DecisionKind::AcceptPartialSignature), None);
        assert!(line.pattern.matches("http://example.com/app2"));
    }

    #[test]
    fn test_legacy_values_and_markers() {
        let line = StoreLine::parse(
            "run-unsigned-application:A{YES};accept-partial-signature:y{YES};\
             trust-unverified-publisher:X{NO}; 1 .*",
        )
        .unwrap()
        .unwrap();

        assert_eq!(line.decisions, vec![(DecisionKind::RunUnsignedApplication, Outcome::Allow)]);

        // Deny marker wins over a contradictory value
        let line = StoreLine::parse("run-unsigned-application:N{YES}; 1 .*").unwrap().unwrap();
        assert_eq!(line.outcome_for(DecisionKind::RunUnsignedApplication), Some(Outcome::Deny));
    }

    #[test]
    fn test_once_only_line_is_empty() {
        assert_eq!(StoreLine::parse("run-unsigned-application:n{NO}; 1 .*").unwrap(), None);
        assert_eq!(StoreLine::parse("SomeOldDialog:A{YES}; 1 .*").unwrap(), None);
    }

    #[test]
    fn test_malformed_lines() {
        assert!(StoreLine::parse("garbage").is_err());
        assert!(StoreLine::parse("run-unsigned-application:A{ALLOW}; soon .*").is_err());
        assert!(StoreLine::parse("run-unsigned-application:A{ALLOW}; 1 (").is_err());
        assert!(StoreLine::parse("run-unsigned-application:Q{ALLOW}; 1 .*").is_err());
        assert!(StoreLine::parse("run-unsigned-application:A{MAYBE}; 1 .*").is_err());
        assert!(StoreLine::parse("run-unsigned-application:A; 1 .*").is_err());
    }

    #[test]
    fn test_encode_parses_back() {
        let pattern = OriginPattern::quote_and_star("http://example.com/").unwrap();
        let mut line = StoreLine::new(pattern, ts(1000));
        line.set(DecisionKind::RunUnsignedApplication, Outcome::Sandbox, ts(2000));
        line.set(DecisionKind::AllowLibraryCodebase, Outcome::Deny, ts(3000));

        let encoded = line.encode();
        assert_eq!(
            encoded,
            concat!(
                "run-unsigned-application:A{SANDBOX};allow-library-codebase:N{DENY};",
                r" 3000 http://example\.com/.*",
            )
        );
        assert_eq!(StoreLine::parse(&encoded).unwrap(), Some(line));
    }

    #[test]
    fn test_set_replaces_and_remove() {
        let pattern = OriginPattern::quote("http://example.com/").unwrap();
        let mut line = StoreLine::new(pattern, ts(1));
        line.set(DecisionKind::RunUnsignedApplication, Outcome::Allow, ts(1));
        line.set(DecisionKind::RunUnsignedApplication, Outcome::Deny, ts(2));

        assert_eq!(line.decisions.len(), 1);
        assert_eq!(line.outcome_for(DecisionKind::RunUnsignedApplication), Some(Outcome::Deny));

        assert!(line.remove(DecisionKind::RunUnsignedApplication));
        assert!(!line.remove(DecisionKind::RunUnsignedApplication));
        assert!(line.is_empty());
    }
}
