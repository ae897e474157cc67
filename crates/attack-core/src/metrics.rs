use crate::result::AttackResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Latency distribution of a run. All zero when there were no requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub mean: Duration,
    pub max: Duration,
}

/// Summary of a completed result collection.
///
/// Built once from the full set of results. An empty collection yields zero
/// requests, a success ratio of 0.0 and zeroed latencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub requests: u64,
    /// Fraction of requests with a status in `[200, 400)`
    pub success: f64,
    pub latencies: LatencyMetrics,
    /// From the first tick until the last result arrived
    pub wait: Duration,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Distinct error strings and how often each occurred
    pub errors: BTreeMap<String, u64>,
    /// Requests per status code; code 0 counts requests without a response
    pub status_codes: BTreeMap<u16, u64>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    /// Span between the first and last issue timestamps
    pub duration: Duration,
}

impl Metrics {
    pub fn new(results: &[AttackResult], wait: Duration) -> Self {
        let mut metrics = Metrics {
            wait,
            ..Metrics::default()
        };
        if results.is_empty() {
            return metrics;
        }

        let mut latencies = Vec::with_capacity(results.len());
        let mut successes = 0u64;
        let mut total = Duration::ZERO;

        for result in results {
            latencies.push(result.latency);
            total += result.latency;
            metrics.bytes_in += result.bytes_in;
            metrics.bytes_out += result.bytes_out;
            *metrics.status_codes.entry(result.code).or_insert(0) += 1;

            if result.is_success() {
                successes += 1;
            }
            if !result.error.is_empty() {
                *metrics.errors.entry(result.error.clone()).or_insert(0) += 1;
            }

            metrics.earliest = Some(match metrics.earliest {
                Some(t) => t.min(result.timestamp),
                None => result.timestamp,
            });
            metrics.latest = Some(match metrics.latest {
                Some(t) => t.max(result.timestamp),
                None => result.timestamp,
            });
        }

        latencies.sort_unstable();
        let n = latencies.len() as u64;

        metrics.requests = n;
        metrics.success = successes as f64 / n as f64;
        metrics.latencies = LatencyMetrics {
            p50: nearest_rank(&latencies, 50.0),
            p95: nearest_rank(&latencies, 95.0),
            p99: nearest_rank(&latencies, 99.0),
            mean: mean(total, n),
            max: latencies[latencies.len() - 1],
        };

        if let (Some(earliest), Some(latest)) = (metrics.earliest, metrics.latest) {
            metrics.duration = (latest - earliest).to_std().unwrap_or_default();
        }

        metrics
    }

    pub fn failures(&self) -> u64 {
        self.status_codes
            .iter()
            .filter(|(code, _)| !crate::result::is_success_code(**code))
            .map(|(_, count)| count)
            .sum()
    }

    /// Achieved request rate over the issue span.
    pub fn rate(&self) -> f64 {
        if self.requests < 2 || self.duration.is_zero() {
            return 0.0;
        }
        // n requests cover n - 1 intervals
        (self.requests - 1) as f64 / self.duration.as_secs_f64()
    }
}

/// Nearest-rank percentile over ascending `sorted` values: the element at
/// index `ceil(p / 100 * n) - 1`, clamped to the slice. When `p / 100 * n` is
/// a whole number that rank is taken as is, so p50 of ten values is the fifth.
pub fn nearest_rank(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let n = sorted.len();
    let rank = (p * n as f64 / 100.0).ceil() as i64 - 1;
    let idx = rank.clamp(0, n as i64 - 1) as usize;
    sorted[idx]
}

fn mean(total: Duration, n: u64) -> Duration {
    if n == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((total.as_nanos() / n as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(latency_ms: u64, code: u16, error: &str) -> AttackResult {
        AttackResult {
            timestamp: Utc::now(),
            latency: Duration::from_millis(latency_ms),
            bytes_out: 0,
            bytes_in: 10,
            code,
            error: error.to_string(),
            headers: BTreeMap::new(),
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_five_successful_requests() {
        let results: Vec<_> = [10, 20, 30, 40, 50]
            .into_iter()
            .map(|l| result(l, 200, ""))
            .collect();

        let metrics = Metrics::new(&results, ms(60));
        assert_eq!(metrics.requests, 5);
        assert_eq!(metrics.success, 1.0);
        assert_eq!(metrics.latencies.mean, ms(30));
        assert_eq!(metrics.latencies.p50, ms(30));
        assert_eq!(metrics.latencies.p95, ms(50));
        assert_eq!(metrics.latencies.p99, ms(50));
        assert_eq!(metrics.latencies.max, ms(50));
        assert_eq!(metrics.wait, ms(60));
        assert_eq!(metrics.bytes_in, 50);
        assert!(metrics.errors.is_empty());
    }

    #[test]
    fn test_order_does_not_matter() {
        let results: Vec<_> = [50, 10, 40, 20, 30]
            .into_iter()
            .map(|l| result(l, 200, ""))
            .collect();

        let metrics = Metrics::new(&results, Duration::ZERO);
        assert_eq!(metrics.latencies.p50, ms(30));
        assert_eq!(metrics.latencies.max, ms(50));
    }

    #[test]
    fn test_empty_results() {
        let metrics = Metrics::new(&[], ms(5));
        assert_eq!(metrics.requests, 0);
        assert_eq!(metrics.success, 0.0);
        assert_eq!(metrics.latencies, LatencyMetrics::default());
        assert_eq!(metrics.wait, ms(5));
        assert!(metrics.errors.is_empty());
        assert!(metrics.earliest.is_none());
        assert_eq!(metrics.rate(), 0.0);
    }

    #[test]
    fn test_mixed_results() {
        let results = vec![
            result(10, 200, ""),
            result(20, 200, ""),
            result(30, 200, ""),
            result(1000, 0, "timeout"),
        ];

        let metrics = Metrics::new(&results, Duration::ZERO);
        assert_eq!(metrics.requests, 4);
        assert_eq!(metrics.success, 0.75);
        assert_eq!(metrics.errors.len(), 1);
        assert_eq!(metrics.errors["timeout"], 1);
        assert_eq!(metrics.failures(), 1);
        assert_eq!(metrics.status_codes[&200], 3);
        assert_eq!(metrics.status_codes[&0], 1);
    }

    #[test]
    fn test_errors_grouped_by_exact_string() {
        let results = vec![
            result(1, 503, "503 Service Unavailable"),
            result(1, 503, "503 Service Unavailable"),
            result(1, 0, "connect: Connection refused (os error 111)"),
            result(1, 302, ""),
        ];

        let metrics = Metrics::new(&results, Duration::ZERO);
        assert_eq!(metrics.success, 0.25);
        assert_eq!(metrics.errors["503 Service Unavailable"], 2);
        assert_eq!(metrics.errors["connect: Connection refused (os error 111)"], 1);
        assert_eq!(
            metrics.requests,
            (metrics.success * metrics.requests as f64) as u64 + metrics.failures()
        );
    }

    #[test]
    fn test_nearest_rank_whole_number_ranks() {
        let sorted: Vec<_> = (1..=10).map(|v| ms(v * 10)).collect();

        // 0.5 * 10 = 5 exactly: fifth value, not the sixth
        assert_eq!(nearest_rank(&sorted, 50.0), ms(50));
        // ceil(9.5) - 1 = 9
        assert_eq!(nearest_rank(&sorted, 95.0), ms(100));
        assert_eq!(nearest_rank(&sorted, 90.0), ms(90));
        assert_eq!(nearest_rank(&sorted, 0.0), ms(10));
        assert_eq!(nearest_rank(&sorted, 100.0), ms(100));
    }

    #[test]
    fn test_nearest_rank_single_value() {
        let sorted = vec![ms(7)];
        assert_eq!(nearest_rank(&sorted, 1.0), ms(7));
        assert_eq!(nearest_rank(&sorted, 99.0), ms(7));
        assert_eq!(nearest_rank(&[], 50.0), Duration::ZERO);
    }

    #[test]
    fn test_duration_and_rate_from_timestamps() {
        let start = Utc::now();
        let results: Vec<_> = (0..5)
            .map(|i| {
                let mut r = result(1, 200, "");
                r.timestamp = start + chrono::Duration::milliseconds(i * 100);
                r
            })
            .collect();

        let metrics = Metrics::new(&results, Duration::ZERO);
        assert_eq!(metrics.duration, ms(400));
        assert_eq!(metrics.earliest, Some(start));
        assert!((metrics.rate() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_serialize() {
        let metrics = Metrics::new(&[result(10, 200, "")], ms(10));
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["requests"], 1);
        assert_eq!(json["success"], 1.0);
        assert!(json["latencies"]["p99"].is_object());
    }
}
