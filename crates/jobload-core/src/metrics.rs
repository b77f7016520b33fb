use crate::records::{Sample, WorkerResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Latency percentiles and the sample count each needs before it is reported.
const P90_MIN_SAMPLES: usize = 10;
const P95_MIN_SAMPLES: usize = 20;
const P99_MIN_SAMPLES: usize = 100;

/// Aggregate view over one endpoint's samples. Times are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    /// Percentage of failed samples
    pub error_rate: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    /// Samples per second of test duration
    pub throughput: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub sent_kb_per_sec: f64,
    pub received_kb_per_sec: f64,
}

/// Summarizes `samples`, reading each sample's time with `time_of`.
///
/// Latency figures cover successful samples only. Rates are per second of
/// `test_duration`, the wall-clock length of the run.
pub fn summarize<S, F>(samples: &[S], time_of: F, test_duration: Duration) -> MetricsSummary
where
    S: Sample,
    F: Fn(&S) -> Duration,
{
    let total = samples.len();
    let successes = samples.iter().filter(|s| s.succeeded()).count();
    let failures = total - successes;

    let mut times: Vec<f64> = samples
        .iter()
        .filter(|s| s.succeeded())
        .map(|s| time_of(s).as_secs_f64())
        .collect();
    times.sort_by(|a, b| a.total_cmp(b));

    let bytes_sent: u64 = samples.iter().map(|s| s.bytes_sent()).sum();
    let bytes_received: u64 = samples.iter().map(|s| s.bytes_received()).sum();
    let secs = test_duration.as_secs_f64();

    let mut summary = MetricsSummary {
        total,
        successes,
        failures,
        error_rate: percentage(failures, total),
        bytes_sent,
        bytes_received,
        ..Default::default()
    };

    if let (Some(&min), Some(&max)) = (times.first(), times.last()) {
        summary.min = min;
        summary.max = max;
        summary.mean = times.iter().sum::<f64>() / times.len() as f64;
        summary.median = percentile(&times, 50.0);
        summary.p90 = gated_percentile(&times, 90.0, P90_MIN_SAMPLES);
        summary.p95 = gated_percentile(&times, 95.0, P95_MIN_SAMPLES);
        summary.p99 = gated_percentile(&times, 99.0, P99_MIN_SAMPLES);
    }

    if secs > 0.0 {
        summary.throughput = total as f64 / secs;
        summary.sent_kb_per_sec = bytes_sent as f64 / 1024.0 / secs;
        summary.received_kb_per_sec = bytes_received as f64 / 1024.0 / secs;
    }

    summary
}

/// Share of failed workers, in percent.
pub fn overall_error_rate(workers: &[WorkerResult]) -> f64 {
    let failed = workers.iter().filter(|w| !w.success).count();
    percentage(failed, workers.len())
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn gated_percentile(sorted: &[f64], p: f64, min_samples: usize) -> f64 {
    if sorted.len() < min_samples {
        0.0
    } else {
        percentile(sorted, p)
    }
}

/// Linear interpolation between closest ranks over an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = p / 100.0 * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{FinalStatus, ProcessRecord, TokenSample};

    fn token_sample(ms: u64, success: bool) -> TokenSample {
        TokenSample {
            latency: Duration::from_millis(ms),
            bytes_sent: 100,
            bytes_received: 412,
            success,
            error: None,
        }
    }

    #[test]
    fn test_percentiles_zero_below_resolution() {
        let samples: Vec<_> = (1..=10).map(|i| token_sample(i * 100, true)).collect();
        let summary = summarize(&samples, |s| s.latency, Duration::from_secs(10));

        assert_eq!(summary.total, 10);
        assert!((summary.p90 - 0.91).abs() < 1e-9);
        assert_eq!(summary.p95, 0.0);
        assert_eq!(summary.p99, 0.0);
        assert!((summary.median - 0.55).abs() < 1e-9);
        assert!((summary.mean - 0.55).abs() < 1e-9);
        assert!((summary.min - 0.1).abs() < 1e-9);
        assert!((summary.max - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_p99_with_hundred_samples() {
        let samples: Vec<_> = (1..=100).map(|i| token_sample(i, true)).collect();
        let summary = summarize(&samples, |s| s.latency, Duration::from_secs(1));

        assert!(summary.p95 > 0.0);
        assert!((summary.p99 - 0.09901).abs() < 1e-9);
        assert!((summary.throughput - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_rate_and_byte_rates() {
        let samples = vec![
            token_sample(100, true),
            token_sample(300, true),
            token_sample(5000, false),
            token_sample(5000, false),
        ];
        let summary = summarize(&samples, |s| s.latency, Duration::from_secs(2));

        assert_eq!(summary.successes, 2);
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.error_rate, 50.0);
        // Failed samples do not count toward latency.
        assert!((summary.max - 0.3).abs() < 1e-9);
        assert_eq!(summary.bytes_sent, 400);
        assert!((summary.sent_kb_per_sec - 400.0 / 1024.0 / 2.0).abs() < 1e-9);
        assert!((summary.received_kb_per_sec - 1648.0 / 1024.0 / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_collection() {
        let samples: Vec<ProcessRecord> = Vec::new();
        let summary = summarize(&samples, |s| s.latency, Duration::ZERO);
        assert_eq!(summary, MetricsSummary::default());

        let failed_only = vec![ProcessRecord {
            process_id: None,
            latency: Duration::from_secs(1),
            bytes_sent: 0,
            bytes_received: 0,
            success: false,
            final_status: FinalStatus::HttpError(500),
        }];
        let summary = summarize(&failed_only, |s| s.latency, Duration::from_secs(1));
        assert_eq!(summary.error_rate, 100.0);
        assert_eq!(summary.mean, 0.0);
    }
}
