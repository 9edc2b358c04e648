//! Parsing of `faild -s` output

use faildctl_proto::Stats;
use std::num::ParseIntError;
use thiserror::Error;
use tracing::debug;

/// A `key: value` line whose value is not an integer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value {value:?} for faild statistic {key:?}: {source}")]
pub struct StatsParseError {
    /// Statistic name
    pub key: String,
    /// Offending value, trimmed
    pub value: String,
    /// Integer parse failure
    pub source: ParseIntError,
}

/// Parse faild's statistics output into `stats`.
///
/// Every line is split on `:`; lines with fewer than two fields are skipped.
/// The first non-integer value aborts parsing, and entries inserted before it
/// stay in `stats`.
pub fn parse_faild_stats(output: &str, stats: &mut Stats) -> Result<(), StatsParseError> {
    for line in output.lines() {
        let mut fields = line.split(':');
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };

        let key = key.trim();
        let value = value.trim();
        let parsed = value.parse::<i64>().map_err(|source| StatsParseError {
            key: key.to_string(),
            value: value.to_string(),
            source,
        })?;

        debug!("{}: {}", key, parsed);
        stats.insert(key.to_string(), parsed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_lines_without_colon_are_skipped() {
        let mut stats = Stats::new();
        parse_faild_stats("a: 1\nb: 2\nmalformed\n", &mut stats).unwrap();

        assert_eq!(stats.len(), 2);
        assert_eq!(stats["a"], 1);
        assert_eq!(stats["b"], 2);
    }

    #[test]
    fn test_bad_value_keeps_partial_results() {
        let mut stats = Stats::new();
        let err = parse_faild_stats("a: 1\nb: notanumber\nc: 3\n", &mut stats).unwrap_err();

        assert_eq!(err.key, "b");
        assert_eq!(err.value, "notanumber");
        assert_eq!(stats.len(), 1);
        assert_eq!(stats["a"], 1);
    }

    #[test]
    fn test_whitespace_and_negative_values() {
        let mut stats = Stats::new();
        parse_faild_stats("  rx_packets :   42  \r\ndelta:-7\n\n", &mut stats).unwrap();
        assert_eq!(stats["rx_packets"], 42);
        assert_eq!(stats["delta"], -7);
    }

    #[test]
    fn test_existing_entries_are_kept() {
        let mut stats = Stats::new();
        stats.insert("established_tcp_sessions".to_string(), 5);
        parse_faild_stats("drops: 0\n", &mut stats).unwrap();
        assert_eq!(stats["established_tcp_sessions"], 5);
        assert_eq!(stats["drops"], 0);
    }

    #[test]
    fn test_empty_value_is_an_error() {
        let mut stats = Stats::new();
        assert!(parse_faild_stats("state:\n", &mut stats).is_err());
    }

    proptest! {
        #[test]
        fn test_rendered_stats_parse_back(
            entries in prop::collection::hash_map("[a-z_]{1,16}", any::<i64>(), 0..20)
        ) {
            let output: String = entries
                .iter()
                .map(|(k, v)| format!("{}: {}\n", k, v))
                .collect();

            let mut stats = Stats::new();
            parse_faild_stats(&output, &mut stats).unwrap();
            prop_assert_eq!(stats, entries);
        }
    }
}
