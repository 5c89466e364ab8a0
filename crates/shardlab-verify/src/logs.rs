//! Log classification.
//!
//! Replica logs are scanned for error lines (those carrying the `E>` marker).
//! Some error lines are harmless races of cluster bootstrap and are matched
//! by named allowlist patterns; whatever is left is a real error.

use serde::{Deserialize, Serialize};

/// Marker of an error line in database logs.
pub const ERROR_MARKER: &str = "E>";

/// A named allowlist entry. A line matches when it contains every needle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenignPattern {
    /// Short name, used in logs and reports.
    pub name: String,

    /// Substrings that must all be present.
    pub needles: Vec<String>,
}

impl BenignPattern {
    /// Creates a pattern requiring every needle.
    pub fn new<I, S>(name: impl Into<String>, needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            needles: needles.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a pattern from a single substring, named after it.
    pub fn substring(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self::new(needle.clone(), [needle])
    }

    /// Returns true if `line` matches.
    pub fn matches(&self, line: &str) -> bool {
        !self.needles.is_empty() && self.needles.iter().all(|n| line.contains(n.as_str()))
    }
}

/// The known-benign error lines of a bootstrapping cluster.
pub fn default_allowlist() -> Vec<BenignPattern> {
    vec![
        BenignPattern::new(
            "bootstrap-not-finished",
            ["E> ER_LOADING: Instance bootstrap hasn't finished yet"],
        ),
        BenignPattern::new("reload-cleanup", ["E> Cleanup", "reload.lua"]),
        BenignPattern::new(
            "socket-eof",
            ["SystemError unexpected EOF when reading from socket"],
        ),
        BenignPattern::new(
            "unresolved-hostname",
            ["SystemError getaddrinfo: Name does not resolve"],
        ),
        BenignPattern::new(
            "storage-user-missing",
            ["ER_NO_SUCH_USER: User 'storage' is not found"],
        ),
        BenignPattern::new(
            "storage-session-denied",
            ["ER_ACCESS_DENIED: Session access to universe '' is denied for user 'storage'"],
        ),
        BenignPattern::new(
            "storage-read-denied",
            ["ER_ACCESS_DENIED: Read access to universe '' is denied for user 'storage'"],
        ),
        BenignPattern::new(
            "buckets-count-invalid-argument",
            [
                "Exception during calling 'vshard.storage.buckets_count' on ",
                ": Invalid argument",
            ],
        ),
        BenignPattern::new(
            "coordination-connection-refused",
            [r#""code":77,"message":"Connection refused""#],
        ),
    ]
}

/// Separates real error lines from benign ones.
#[derive(Debug, Clone)]
pub struct LogClassifier {
    patterns: Vec<BenignPattern>,
}

impl Default for LogClassifier {
    fn default() -> Self {
        Self {
            patterns: default_allowlist(),
        }
    }
}

impl LogClassifier {
    /// Creates a classifier with the default allowlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a classifier that treats every error line as real.
    pub fn strict() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Adds an allowlist pattern.
    pub fn with_pattern(mut self, pattern: BenignPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Adds one substring pattern per entry.
    pub fn with_substrings<I, S>(mut self, substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns
            .extend(substrings.into_iter().map(BenignPattern::substring));
        self
    }

    /// Returns the allowlist.
    pub fn patterns(&self) -> &[BenignPattern] {
        &self.patterns
    }

    /// Returns the name of the first pattern matching `line`.
    pub fn benign_match(&self, line: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.matches(line))
            .map(|p| p.name.as_str())
    }

    /// Returns the error lines of `log` that no pattern allows, in order.
    pub fn real_errors<'a>(&self, log: &'a str) -> Vec<&'a str> {
        log.lines()
            .filter(|line| line.contains(ERROR_MARKER))
            .filter(|line| self.benign_match(line).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BENIGN: &[&str] = &[
        "2020-01-01 main/101/t1 E> ER_LOADING: Instance bootstrap hasn't finished yet",
        "2020-01-01 main/102/t1 E> Cleanup of reload.lua failed",
        "2020-01-01 main/103/t1 E> SystemError unexpected EOF when reading from socket",
        "2020-01-01 main/104/t1 E> SystemError getaddrinfo: Name does not resolve",
        "2020-01-01 main/105/t1 E> ER_NO_SUCH_USER: User 'storage' is not found",
        "2020-01-01 main/106/t1 E> ER_ACCESS_DENIED: Session access to universe '' is denied for user 'storage'",
        "2020-01-01 main/107/t1 E> ER_ACCESS_DENIED: Read access to universe '' is denied for user 'storage'",
        "2020-01-01 main/108/t1 E> Exception during calling 'vshard.storage.buckets_count' on t2: Invalid argument",
        r#"2020-01-01 main/109/t1 E> consul error {"code":77,"message":"Connection refused"}"#,
        "2020-01-01 main/110/t1 E> ER_LOADING: Instance bootstrap hasn't finished yet",
    ];

    #[test]
    fn test_only_benign_errors() {
        let log = BENIGN.join("\n");
        assert!(LogClassifier::new().real_errors(&log).is_empty());
    }

    #[test]
    fn test_one_real_error_among_benign() {
        let real = "2020-01-01 main/111/t1 E> ER_WAL_IO: Failed to write to disk";
        let mut lines: Vec<&str> = BENIGN.to_vec();
        lines.insert(4, real);
        lines.insert(0, "2020-01-01 main/100/t1 I> ready to accept requests");

        let log = lines.join("\n");
        assert_eq!(LogClassifier::new().real_errors(&log), vec![real]);
    }

    #[test]
    fn test_non_error_lines_ignored() {
        let log = "I> ER_LOADING\nW> something odd\nplain text";
        assert!(LogClassifier::strict().real_errors(log).is_empty());
    }

    #[test]
    fn test_all_needles_required() {
        let classifier = LogClassifier::new();
        assert_eq!(
            classifier.benign_match("E> Cleanup of reload.lua"),
            Some("reload-cleanup")
        );
        assert_eq!(classifier.benign_match("E> Cleanup of init.lua"), None);
    }

    #[test]
    fn test_extra_substrings() {
        let log = "E> flaky thing\nE> real thing";
        let classifier = LogClassifier::new().with_substrings(["flaky"]);
        assert_eq!(classifier.real_errors(log), vec!["E> real thing"]);
        assert_eq!(classifier.patterns().len(), default_allowlist().len() + 1);
    }

    #[test]
    fn test_order_preserved() {
        let log = "E> first\nI> fine\nE> second\nE> third";
        assert_eq!(
            LogClassifier::strict().real_errors(log),
            vec!["E> first", "E> second", "E> third"]
        );
    }
}
