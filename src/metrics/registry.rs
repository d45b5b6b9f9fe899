use metrics::{Counter, Key, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// A label set, kept sorted by key so equal sets compare equal
pub type Labels = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct MetricKey {
    name: String,
    labels: Labels,
}

/// One counter value as seen at snapshot time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub name: String,
    pub labels: Labels,
    pub value: u64,
}

struct Tally {
    counter: Counter,
    value: u64,
}

/// Registry of monotonically increasing counters
///
/// Owns a Prometheus recorder that is never installed as the global
/// recorder, so every registry is independent. Constructed once by the
/// binary and shared through `Arc`.
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    counters: Mutex<BTreeMap<MetricKey, Tally>>,
}

static METADATA: Metadata<'static> = Metadata::new(module_path!(), Level::INFO, None);

fn key(name: &str, labels: &[(&str, &str)]) -> MetricKey {
    let mut labels: Labels = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.sort();
    MetricKey {
        name: name.to_string(),
        labels,
    }
}

impl MetricKey {
    fn to_recorder_key(&self) -> Key {
        let labels: Vec<Label> = self
            .labels
            .iter()
            .map(|(k, v)| Label::new(k.clone(), v.clone()))
            .collect();
        Key::from_parts(self.name.clone(), labels)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self {
            recorder,
            handle,
            counters: Mutex::new(BTreeMap::new()),
        }
    }

    // A panic while holding the lock cannot leave a tally half-written
    fn lock(&self) -> MutexGuard<'_, BTreeMap<MetricKey, Tally>> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sets the HELP text rendered for `name`
    pub fn describe(&self, name: &str, help: &str) {
        self.recorder
            .describe_counter(name.to_string().into(), None, help.to_string().into());
    }

    /// Adds one to a counter, creating it at zero first
    pub fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        self.add_amount(name, labels, 1);
    }

    /// Adds `value` to a counter
    pub fn add_amount(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        let mut counters = self.lock();
        let tally = counters
            .entry(key(name, labels))
            .or_insert_with_key(|metric| Tally {
                counter: self
                    .recorder
                    .register_counter(&metric.to_recorder_key(), &METADATA),
                value: 0,
            });
        tally.counter.increment(value);
        tally.value = tally.value.saturating_add(value);
    }

    /// Current value of one labeled counter
    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        self.lock().get(&key(name, labels)).map(|t| t.value)
    }

    /// Sum of a counter across all label sets
    pub fn total(&self, name: &str) -> u64 {
        self.lock()
            .iter()
            .filter(|(k, _)| k.name == name)
            .map(|(_, t)| t.value)
            .sum()
    }

    /// Copy of every counter, sorted by name then labels
    pub fn snapshot(&self) -> Vec<MetricSample> {
        self.lock()
            .iter()
            .map(|(k, t)| MetricSample {
                name: k.name.clone(),
                labels: k.labels.clone(),
                value: t.value,
            })
            .collect()
    }

    /// Renders all counters in the Prometheus text exposition format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
