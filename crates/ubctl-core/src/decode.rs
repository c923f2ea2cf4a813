//! Decoders for the daemon's human-readable `status` and `stats` output.
//!
//! Both decoders are lenient: lines that cannot be understood are logged at
//! `trace` and skipped, and fields that never appear keep their zero value.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Why a single output line was skipped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
enum DecodeError {
    #[error("missing {0:?} separator")]
    MissingSeparator(char),

    #[error("value {value:?} for {key} is not a number")]
    NotANumber { key: String, value: String },

    #[error("unknown key {0}")]
    UnknownKey(String),
}

fn split_line(line: &str, separator: char) -> Result<(&str, &str), DecodeError> {
    line.split_once(separator)
        .map(|(key, value)| (key.trim(), value.trim()))
        .ok_or(DecodeError::MissingSeparator(separator))
}

// ── status ──────────────────────────────────────────────────────────────

/// Decoded `status` output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub version: String,
    pub verbosity: i64,
    pub threads: i64,
    pub modules: Vec<String>,
    pub uptime: Uptime,
    pub options: StatusOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Uptime {
    pub seconds: u64,
    /// `"1d 1h 1m 5s"` style rendering of `seconds`.
    pub formatted: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusOptions {
    /// `"open"` when the options line mentions the control interface.
    pub control: String,
}

impl StatusInfo {
    /// Decode `key: value` lines. Unknown keys and malformed values are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut info = StatusInfo::default();
        for line in raw.lines() {
            if let Err(e) = info.apply_line(line) {
                trace!(line, reason = %e, "skipping status line");
            }
        }
        info
    }

    fn apply_line(&mut self, line: &str) -> Result<(), DecodeError> {
        let (key, value) = split_line(line, ':')?;
        let number = |value: &str| {
            value.parse::<i64>().map_err(|_| DecodeError::NotANumber {
                key: key.to_string(),
                value: value.to_string(),
            })
        };

        match key {
            "version" => self.version = value.to_string(),
            "verbosity" => self.verbosity = number(value)?,
            "threads" => self.threads = number(value)?,
            "modules" => {
                // `2 [ validator iterator ]`: names are inside the brackets.
                let inner = match (value.find('['), value.rfind(']')) {
                    (Some(open), Some(close)) if open < close => &value[open + 1..close],
                    _ => value,
                };
                self.modules = inner.split_whitespace().map(str::to_string).collect();
            }
            "uptime" => {
                let first = value.split_whitespace().next().unwrap_or_default();
                let seconds = first.parse::<u64>().map_err(|_| DecodeError::NotANumber {
                    key: key.to_string(),
                    value: first.to_string(),
                })?;
                self.uptime = Uptime {
                    seconds,
                    formatted: format_uptime(seconds),
                };
            }
            "options" => {
                if value.contains("control") {
                    self.options.control = "open".to_string();
                }
            }
            _ => return Err(DecodeError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

/// Render a duration in seconds as `Nd Nh Nm Ns`, omitting leading zero
/// units. Zero renders as `"0s"`.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3_600;
    let minutes = seconds % 3_600 / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m {secs}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

// ── stats ───────────────────────────────────────────────────────────────

/// Decoded `stats` output (totals only; per-thread lines are ignored).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsInfo {
    pub queries: QueryStats,
    pub cache: CacheStats,
    pub recursion: RecursionStats,
    pub request_list: RequestListStats,
    pub tcp_usage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub total: u64,
    pub ip_ratelimited: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub prefetch: u64,
    pub zero_ttl: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecursionStats {
    pub replies: u64,
    pub time_avg: f64,
    pub time_median: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestListStats {
    pub avg: f64,
    pub max: u64,
    pub overwritten: u64,
    pub exceeded: u64,
    pub current_all: u64,
    pub current_user: u64,
}

#[derive(Debug, Clone, Copy)]
enum StatField {
    QueriesTotal,
    QueriesIpRatelimited,
    CacheHits,
    CacheMisses,
    CachePrefetch,
    CacheZeroTtl,
    RecursionReplies,
    RequestListAvg,
    RequestListMax,
    RequestListOverwritten,
    RequestListExceeded,
    RequestListCurrentAll,
    RequestListCurrentUser,
    RecursionTimeAvg,
    RecursionTimeMedian,
    TcpUsage,
}

const STAT_PREFIXES: &[(&str, StatField)] = &[
    ("total.num.queries", StatField::QueriesTotal),
    ("total.num.queries_ip_ratelimited", StatField::QueriesIpRatelimited),
    ("total.num.cachehits", StatField::CacheHits),
    ("total.num.cachemiss", StatField::CacheMisses),
    ("total.num.prefetch", StatField::CachePrefetch),
    ("total.num.zero_ttl", StatField::CacheZeroTtl),
    ("total.num.recursivereplies", StatField::RecursionReplies),
    ("total.requestlist.avg", StatField::RequestListAvg),
    ("total.requestlist.max", StatField::RequestListMax),
    ("total.requestlist.overwritten", StatField::RequestListOverwritten),
    ("total.requestlist.exceeded", StatField::RequestListExceeded),
    ("total.requestlist.current.all", StatField::RequestListCurrentAll),
    ("total.requestlist.current.user", StatField::RequestListCurrentUser),
    ("total.recursion.time.avg", StatField::RecursionTimeAvg),
    ("total.recursion.time.median", StatField::RecursionTimeMedian),
    ("total.tcpusage", StatField::TcpUsage),
];

/// The table entry with the longest prefix of `key`, so that
/// `total.num.queries_ip_ratelimited` is not taken for `total.num.queries`.
fn stat_field(key: &str) -> Option<StatField> {
    STAT_PREFIXES
        .iter()
        .filter(|(prefix, _)| key.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|&(_, field)| field)
}

impl StatsInfo {
    /// Decode `key=value` lines. Values that are not numbers and keys outside
    /// the known set are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut stats = StatsInfo::default();
        for line in raw.lines() {
            if let Err(e) = stats.apply_line(line) {
                trace!(line, reason = %e, "skipping stats line");
            }
        }
        stats
    }

    fn apply_line(&mut self, line: &str) -> Result<(), DecodeError> {
        let (key, value) = split_line(line, '=')?;
        let number: f64 = value.parse().map_err(|_| DecodeError::NotANumber {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        let field = stat_field(key).ok_or_else(|| DecodeError::UnknownKey(key.to_string()))?;
        self.set(field, number);
        Ok(())
    }

    fn set(&mut self, field: StatField, value: f64) {
        // Counters arrive as decimals; negative or fractional input saturates/truncates.
        let count = value as u64;
        match field {
            StatField::QueriesTotal => self.queries.total = count,
            StatField::QueriesIpRatelimited => self.queries.ip_ratelimited = count,
            StatField::CacheHits => self.cache.hits = count,
            StatField::CacheMisses => self.cache.misses = count,
            StatField::CachePrefetch => self.cache.prefetch = count,
            StatField::CacheZeroTtl => self.cache.zero_ttl = count,
            StatField::RecursionReplies => self.recursion.replies = count,
            StatField::RequestListAvg => self.request_list.avg = value,
            StatField::RequestListMax => self.request_list.max = count,
            StatField::RequestListOverwritten => self.request_list.overwritten = count,
            StatField::RequestListExceeded => self.request_list.exceeded = count,
            StatField::RequestListCurrentAll => self.request_list.current_all = count,
            StatField::RequestListCurrentUser => self.request_list.current_user = count,
            StatField::RecursionTimeAvg => self.recursion.time_avg = value,
            StatField::RecursionTimeMedian => self.recursion.time_median = value,
            StatField::TcpUsage => self.tcp_usage = value,
        }
    }
}
