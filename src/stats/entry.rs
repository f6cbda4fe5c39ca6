use std::collections::BTreeMap;

use serde::Serialize;

/// Coarse histogram bucket for a response time in milliseconds: exact below
/// 100 ms, floored to 10 ms below one second, floored to 100 ms above.
pub(crate) fn bucket_response_time(ms: u64) -> u64 {
    if ms < 100 {
        ms
    } else if ms < 1000 {
        ms / 10 * 10
    } else {
        ms / 100 * 100
    }
}

/// Rolling statistics for one `(method, name)` endpoint.
///
/// Timing aggregates cover every outcome; successes and failures split
/// only the `num_requests`/`num_failures` counters and content length.
/// Lifetime counters persist until `clear_all`; `num_reqs_per_sec` is
/// interval-scoped and reset on every flush.
#[derive(Debug, Clone)]
pub(crate) struct EndpointStats {
    pub(crate) name: String,
    pub(crate) method: String,
    pub(crate) num_requests: u64,
    pub(crate) num_failures: u64,
    pub(crate) total_response_time: u64,
    pub(crate) total_response_time_sq: u128,
    pub(crate) min_response_time: u64,
    pub(crate) max_response_time: u64,
    pub(crate) total_content_length: u64,
    pub(crate) response_times: BTreeMap<u64, u64>,
    pub(crate) num_reqs_per_sec: BTreeMap<u64, u64>,
}

/// Wire shape of one endpoint entry inside a `stats` frame.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEntry {
    pub name: String,
    pub method: String,
    pub num_requests: u64,
    pub num_failures: u64,
    pub total_response_time: u64,
    pub min_response_time: u64,
    pub max_response_time: u64,
    pub total_content_length: u64,
    pub response_times: BTreeMap<u64, u64>,
    pub num_reqs_per_sec: BTreeMap<u64, u64>,
}

impl EndpointStats {
    pub(crate) fn new(method: &str, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            method: method.to_owned(),
            num_requests: 0,
            num_failures: 0,
            total_response_time: 0,
            total_response_time_sq: 0,
            min_response_time: u64::MAX,
            max_response_time: 0,
            total_content_length: 0,
            response_times: BTreeMap::new(),
            num_reqs_per_sec: BTreeMap::new(),
        }
    }

    /// Timing shared by every outcome: running sum, sum of squares,
    /// extrema, the coarse histogram, and the per-second throughput.
    fn record(&mut self, response_time_ms: u64, now_secs: u64) {
        self.total_response_time = self.total_response_time.saturating_add(response_time_ms);
        self.total_response_time_sq = self
            .total_response_time_sq
            .saturating_add(u128::from(response_time_ms).saturating_mul(u128::from(response_time_ms)));
        self.min_response_time = self.min_response_time.min(response_time_ms);
        self.max_response_time = self.max_response_time.max(response_time_ms);

        let bucket = bucket_response_time(response_time_ms);
        let slot = self.response_times.entry(bucket).or_insert(0);
        *slot = slot.saturating_add(1);

        let per_sec = self.num_reqs_per_sec.entry(now_secs).or_insert(0);
        *per_sec = per_sec.saturating_add(1);
    }

    pub(crate) fn record_success(&mut self, response_time_ms: u64, content_length: u64, now_secs: u64) {
        self.num_requests = self.num_requests.saturating_add(1);
        self.total_content_length = self.total_content_length.saturating_add(content_length);
        self.record(response_time_ms, now_secs);
    }

    pub(crate) fn record_failure(&mut self, response_time_ms: u64, now_secs: u64) {
        self.num_failures = self.num_failures.saturating_add(1);
        self.record(response_time_ms, now_secs);
    }

    /// Successes and failures both carry timing.
    fn observations(&self) -> u64 {
        self.num_requests.saturating_add(self.num_failures)
    }

    /// Mean of recorded response times, zero when empty.
    pub(crate) fn mean_response_time(&self) -> u64 {
        self.total_response_time
            .checked_div(self.observations())
            .unwrap_or(0)
    }

    /// Population variance of recorded response times, zero when empty.
    pub(crate) fn response_time_variance(&self) -> u128 {
        if self.observations() == 0 {
            return 0;
        }
        let count = u128::from(self.observations());
        let mean_sq = self
            .total_response_time_sq
            .checked_div(count)
            .unwrap_or(0);
        let mean = u128::from(self.mean_response_time());
        mean_sq.saturating_sub(mean.saturating_mul(mean))
    }

    pub(crate) fn reset_interval(&mut self) {
        self.num_reqs_per_sec.clear();
    }

    pub(crate) fn snapshot(&self) -> SnapshotEntry {
        let min_response_time = if self.observations() > 0 {
            self.min_response_time
        } else {
            0
        };
        SnapshotEntry {
            name: self.name.clone(),
            method: self.method.clone(),
            num_requests: self.num_requests,
            num_failures: self.num_failures,
            total_response_time: self.total_response_time,
            min_response_time,
            max_response_time: self.max_response_time,
            total_content_length: self.total_content_length,
            response_times: self.response_times.clone(),
            num_reqs_per_sec: self.num_reqs_per_sec.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_follow_the_coarse_rounding_rule() {
        let cases = [
            (0, 0),
            (1, 1),
            (42, 42),
            (99, 99),
            (100, 100),
            (101, 100),
            (109, 100),
            (110, 110),
            (999, 990),
            (1000, 1000),
            (1049, 1000),
            (1099, 1000),
            (1100, 1100),
            (25_049, 25_000),
        ];
        for (input, expected) in cases {
            let bucket = bucket_response_time(input);
            if bucket != expected {
                panic!("bucket({}) = {}, expected {}", input, bucket, expected);
            }
        }
    }

    #[test]
    fn both_outcomes_update_lifetime_counters() {
        let mut entry = EndpointStats::new("GET", "/api");
        entry.record_success(10, 512, 100);
        entry.record_success(30, 256, 100);
        entry.record_failure(20, 100);

        if entry.num_requests != 2 || entry.num_failures != 1 {
            panic!(
                "Unexpected counters: requests={} failures={}",
                entry.num_requests, entry.num_failures
            );
        }
        if entry.total_response_time != 60 || entry.total_content_length != 768 {
            panic!(
                "Unexpected totals: time={} length={}",
                entry.total_response_time, entry.total_content_length
            );
        }
        if entry.min_response_time != 10 || entry.max_response_time != 30 {
            panic!(
                "Unexpected extrema: min={} max={}",
                entry.min_response_time, entry.max_response_time
            );
        }
        if entry.num_reqs_per_sec.get(&100) != Some(&3) {
            panic!("Expected 3 requests in second 100");
        }
    }

    #[test]
    fn failure_timing_feeds_the_histogram() {
        let mut entry = EndpointStats::new("GET", "/api");
        entry.record_failure(250, 5);

        if entry.num_requests != 0 || entry.num_failures != 1 {
            panic!(
                "Unexpected counters: requests={} failures={}",
                entry.num_requests, entry.num_failures
            );
        }
        if entry.min_response_time != 250 || entry.max_response_time != 250 {
            panic!(
                "Failure timing missing from extrema: min={} max={}",
                entry.min_response_time, entry.max_response_time
            );
        }
        if entry.response_times.get(&250) != Some(&1) {
            panic!("Failure timing missing from histogram");
        }
        if entry.total_content_length != 0 {
            panic!("Failures must not add content length");
        }
        if entry.snapshot().min_response_time != 250 {
            panic!("Snapshot dropped the failure-only minimum");
        }
    }

    #[test]
    fn variance_matches_sum_of_squares() {
        let mut entry = EndpointStats::new("GET", "/api");
        // Values 10 and 30: mean 20, E[x^2] = 500, variance 100.
        entry.record_success(10, 0, 0);
        entry.record_failure(30, 0);
        if entry.mean_response_time() != 20 {
            panic!("Expected mean 20, got {}", entry.mean_response_time());
        }
        if entry.response_time_variance() != 100 {
            panic!(
                "Expected variance 100, got {}",
                entry.response_time_variance()
            );
        }
    }

    #[test]
    fn interval_reset_keeps_lifetime_counters() {
        let mut entry = EndpointStats::new("GET", "/api");
        entry.record_success(10, 0, 7);
        entry.reset_interval();
        if !entry.num_reqs_per_sec.is_empty() {
            panic!("Interval counters survived reset");
        }
        if entry.num_requests != 1 {
            panic!("Lifetime counter lost on interval reset");
        }
    }

    #[test]
    fn empty_entry_snapshot_reports_zero_min() {
        let entry = EndpointStats::new("GET", "/api");
        let snapshot = entry.snapshot();
        if snapshot.min_response_time != 0 {
            panic!(
                "Expected zero min for empty entry, got {}",
                snapshot.min_response_time
            );
        }
    }
}
