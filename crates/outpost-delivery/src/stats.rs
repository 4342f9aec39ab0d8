//! Delivery counters shared by every output.
//!
//! Clients hold an `Arc<dyn StatsSink>` and only ever increment; storage and
//! export belong to the sink. Two sinks are provided: [`Statistics`] keeps a
//! counter per output kind and [`Outcome`], [`PromStatistics`] keeps a
//! labelled `destination`/`status` counter that renders in the Prometheus
//! text exposition format.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Write as _},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};

use crate::outcome::Outcome;

/// Counter surface a [`DeliveryClient`](crate::DeliveryClient) reports to.
///
/// Implementations must tolerate concurrent calls from many clients.
pub trait StatsSink: fmt::Debug + Send + Sync {
    /// Records one post by `output` that ended with `outcome`.
    fn record(&self, output: &str, outcome: Outcome);
}

/// Per-output counters, one per [`Outcome`].
#[derive(Debug, Default)]
pub struct OutputCounters {
    counts: [AtomicU64; Outcome::COUNT],
}

impl OutputCounters {
    fn increment(&self, outcome: Outcome) {
        self.counts[outcome.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Current value for `outcome`.
    pub fn get(&self, outcome: Outcome) -> u64 {
        self.counts[outcome.index()].load(Ordering::Relaxed)
    }

    /// Sum over every outcome.
    pub fn total(&self) -> u64 {
        Outcome::ALL.iter().map(|o| self.get(*o)).sum()
    }

    /// Posts that were not accepted.
    pub fn failures(&self) -> u64 {
        self.total() - self.get(Outcome::Accepted)
    }
}

/// Counters keyed by output kind.
///
/// The map lock is only taken for writing the first time an output kind is
/// seen; increments after that are lock-free.
#[derive(Debug, Default)]
pub struct Statistics {
    outputs: RwLock<HashMap<String, Arc<OutputCounters>>>,
}

impl Statistics {
    /// Creates an empty set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, output: &str) -> Arc<OutputCounters> {
        {
            let outputs = self.outputs.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(counters) = outputs.get(output) {
                return Arc::clone(counters);
            }
        }

        let mut outputs = self.outputs.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(outputs.entry(output.to_string()).or_default())
    }

    /// Returns the counters for `output`, if it has recorded anything.
    pub fn output(&self, output: &str) -> Option<Arc<OutputCounters>> {
        let outputs = self.outputs.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        outputs.get(output).cloned()
    }

    /// Current value for one output and outcome.
    pub fn count(&self, output: &str, outcome: Outcome) -> u64 {
        self.output(output).map_or(0, |counters| counters.get(outcome))
    }

    /// Copies every non-zero counter, ordered by output then outcome.
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<Outcome, u64>> {
        let outputs = self.outputs.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        outputs
            .iter()
            .map(|(name, counters)| {
                let values = Outcome::ALL
                    .iter()
                    .map(|o| (*o, counters.get(*o)))
                    .filter(|(_, value)| *value > 0)
                    .collect();
                (name.clone(), values)
            })
            .collect()
    }
}

impl StatsSink for Statistics {
    fn record(&self, output: &str, outcome: Outcome) {
        self.counters(output).increment(outcome);
    }
}

const METRIC_NAME: &str = "outpost_outputs_total";
const STATUS_OK: &str = "ok";
const STATUS_ERROR: &str = "error";

/// Labelled counter `outpost_outputs_total{destination, status}`.
///
/// `status` is `ok` for accepted posts and `error` for everything else, the
/// finer breakdown lives in [`Statistics`].
#[derive(Debug, Default)]
pub struct PromStatistics {
    samples: Mutex<BTreeMap<String, StatusCounts>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct StatusCounts {
    ok: u64,
    error: u64,
}

impl StatusCounts {
    fn labelled(self) -> [(&'static str, u64); 2] {
        [(STATUS_ERROR, self.error), (STATUS_OK, self.ok)]
    }
}

impl PromStatistics {
    /// Creates an empty counter family.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for one label pair. Unknown statuses read as zero.
    pub fn get(&self, destination: &str, status: &str) -> u64 {
        let samples = self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(counts) = samples.get(destination) else {
            return 0;
        };
        match status {
            STATUS_OK => counts.ok,
            STATUS_ERROR => counts.error,
            _ => 0,
        }
    }

    /// Renders the counter family in the Prometheus text format.
    pub fn render(&self) -> String {
        let samples = self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut out = String::new();
        let _ = writeln!(out, "# HELP {METRIC_NAME} Posts per destination and status.");
        let _ = writeln!(out, "# TYPE {METRIC_NAME} counter");
        for (destination, counts) in samples.iter() {
            let destination = escape_label(destination);
            for (status, value) in counts.labelled() {
                if value == 0 {
                    continue;
                }
                let _ = writeln!(
                    out,
                    "{METRIC_NAME}{{destination=\"{destination}\",status=\"{status}\"}} {value}"
                );
            }
        }
        out
    }
}

impl StatsSink for PromStatistics {
    fn record(&self, output: &str, outcome: Outcome) {
        let mut samples = self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !samples.contains_key(output) {
            samples.insert(output.to_string(), StatusCounts::default());
        }
        let Some(counts) = samples.get_mut(output) else {
            return;
        };
        if outcome.is_success() {
            counts.ok += 1;
        } else {
            counts.error += 1;
        }
    }
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_count_per_output_and_outcome() {
        let stats = Statistics::new();
        stats.record("webhook", Outcome::Accepted);
        stats.record("webhook", Outcome::Accepted);
        stats.record("webhook", Outcome::NotFound);
        stats.record("slack", Outcome::Error);

        assert_eq!(stats.count("webhook", Outcome::Accepted), 2);
        assert_eq!(stats.count("webhook", Outcome::NotFound), 1);
        assert_eq!(stats.count("slack", Outcome::Error), 1);
        assert_eq!(stats.count("slack", Outcome::Accepted), 0);
        assert_eq!(stats.count("unknown", Outcome::Accepted), 0);

        let webhook = stats.output("webhook").unwrap();
        assert_eq!(webhook.total(), 3);
        assert_eq!(webhook.failures(), 1);
    }

    #[test]
    fn snapshot_skips_zero_counters() {
        let stats = Statistics::new();
        stats.record("webhook", Outcome::TooManyRequests);

        let snapshot = stats.snapshot();
        let webhook = &snapshot["webhook"];
        assert_eq!(webhook.len(), 1);
        assert_eq!(webhook[&Outcome::TooManyRequests], 1);
    }

    #[test]
    fn prom_statistics_collapse_failures_into_error_status() {
        let prom = PromStatistics::new();
        prom.record("webhook", Outcome::Accepted);
        prom.record("webhook", Outcome::Forbidden);
        prom.record("webhook", Outcome::Error);

        assert_eq!(prom.get("webhook", "ok"), 1);
        assert_eq!(prom.get("webhook", "error"), 2);
        assert_eq!(prom.get("slack", "ok"), 0);
        assert_eq!(prom.get("webhook", "pending"), 0);
    }

    #[test]
    fn prom_render_lists_error_before_ok_and_skips_zero() {
        let prom = PromStatistics::new();
        prom.record("alpha", Outcome::Accepted);
        prom.record("beta", Outcome::NotFound);
        prom.record("beta", Outcome::Accepted);

        let rendered = prom.render();
        let samples: Vec<&str> = rendered.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(samples, [
            "outpost_outputs_total{destination=\"alpha\",status=\"ok\"} 1",
            "outpost_outputs_total{destination=\"beta\",status=\"error\"} 1",
            "outpost_outputs_total{destination=\"beta\",status=\"ok\"} 1",
        ]);
    }

    #[test]
    fn prom_render_escapes_label_values() {
        let prom = PromStatistics::new();
        prom.record("web\"hook", Outcome::Accepted);

        let rendered = prom.render();
        assert!(rendered.contains("# TYPE outpost_outputs_total counter"));
        assert!(rendered
            .contains("outpost_outputs_total{destination=\"web\\\"hook\",status=\"ok\"} 1"));
    }
}
