//! Latest statistics snapshot per agent

use faildctl_proto::Stats;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One poll's worth of statistics for a single agent. Never mutated after
/// construction; the next poll replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    values: Stats,
}

impl StatsSnapshot {
    /// Wrap the values returned by an agent
    pub fn new(values: Stats) -> Self {
        Self { values }
    }

    /// Value of a single metric
    pub fn get(&self, metric: &str) -> Option<i64> {
        self.values.get(metric).copied()
    }

    /// Metric names and values
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of metrics
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot holds no metrics
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Underlying map
    pub fn values(&self) -> &Stats {
        &self.values
    }
}

impl From<Stats> for StatsSnapshot {
    fn from(values: Stats) -> Self {
        Self::new(values)
    }
}

/// A point-in-time metric value, exported as a gauge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaugeSample {
    /// Agent the value belongs to
    pub agent: String,
    /// Metric name
    pub metric: String,
    /// Value at the last poll
    pub value: i64,
}

/// Shared store holding the most recent snapshot of every agent.
///
/// Cloning the store yields another handle onto the same data.
#[derive(Debug, Clone, Default)]
pub struct StatsStore {
    inner: Arc<Mutex<HashMap<String, Arc<StatsSnapshot>>>>,
}

impl StatsStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot for `agent_id`
    pub fn set(&self, agent_id: impl Into<String>, snapshot: StatsSnapshot) {
        self.inner.lock().insert(agent_id.into(), Arc::new(snapshot));
    }

    /// Latest snapshot for `agent_id`
    pub fn get(&self, agent_id: &str) -> Option<Arc<StatsSnapshot>> {
        self.inner.lock().get(agent_id).cloned()
    }

    /// Copy of the whole store.
    ///
    /// Later `set` calls never show up in the returned map, and iterating it
    /// does not hold the store lock.
    pub fn dump(&self) -> HashMap<String, Arc<StatsSnapshot>> {
        self.inner.lock().clone()
    }

    /// Number of agents with a snapshot
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no agent has reported yet
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Flatten the current dump into gauge samples, sorted by agent then metric
    pub fn gauges(&self) -> Vec<GaugeSample> {
        let mut samples: Vec<GaugeSample> = self
            .dump()
            .iter()
            .flat_map(|(agent, snapshot)| {
                snapshot.iter().map(move |(metric, value)| GaugeSample {
                    agent: agent.clone(),
                    metric: metric.to_string(),
                    value,
                })
            })
            .collect();
        samples.sort_by(|a, b| (&a.agent, &a.metric).cmp(&(&b.agent, &b.metric)));
        samples
    }
}
