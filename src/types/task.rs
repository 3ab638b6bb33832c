//! Task identity and configuration types
//!
//! A [`TaskConfiguration`] is an immutable value: model, parameters and the
//! destination it must execute on. Value identity is what the pool manager
//! routes and reference-counts by.

use std::collections::BTreeMap;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────

/// External identifier of one computation task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random task id
    pub fn generate() -> Self {
        Self(format!("task-{}", &uuid::Uuid::new_v4().to_string()[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty id carries no identity and is treated as missing
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Index of one host participating in a distributed task
pub type HostIndex = u32;

/// Simulated time of a task
///
/// Totally ordered and hashable so it can key the quorum table. `-0.0` and
/// `0.0` compare and hash as the same point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    pub fn new(t: f64) -> Self {
        // Normalize negative zero
        Self(if t == 0.0 { 0.0 } else { t })
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl From<f64> for SimTime {
    fn from(t: f64) -> Self {
        Self::new(t)
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        SimTime::new(self.0).0.total_cmp(&SimTime::new(other.0).0)
    }
}

impl Hash for SimTime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        SimTime::new(self.0).0.to_bits().hash(state);
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────
// Destinations
// ─────────────────────────────────────────────────────────────────

/// Opaque identity of a remote execution server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteDestination(String);

impl RemoteDestination {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a task configuration executes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// In this process, on the shared local pool
    #[default]
    Local,
    /// On a specific remote execution server
    Remote(RemoteDestination),
}

impl Destination {
    pub fn remote(address: impl Into<String>) -> Self {
        Destination::Remote(RemoteDestination::new(address))
    }

    /// The remote server, if any
    pub fn remote_destination(&self) -> Option<&RemoteDestination> {
        match self {
            Destination::Local => None,
            Destination::Remote(dest) => Some(dest),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Destination::Local)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Local => f.write_str("local"),
            Destination::Remote(dest) => write!(f, "remote:{}", dest),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Configuration
// ─────────────────────────────────────────────────────────────────

/// Model, parameters and destination policy of one computation task
///
/// Read-only once built. Two configurations with equal fields are the same
/// configuration for routing and cleanup purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskConfiguration {
    /// Human-readable name (e.g. "sir-model/beta=0.3/rep-2")
    pub name: String,

    /// Model identifier understood by the task factory
    pub model: String,

    /// Model parameters as canonical strings
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Replication index within an experiment
    #[serde(default)]
    pub replication: u32,

    /// Where the task executes
    #[serde(default)]
    pub destination: Destination,
}

impl TaskConfiguration {
    /// Create a local configuration with no parameters
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            parameters: BTreeMap::new(),
            replication: 0,
            destination: Destination::Local,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.parameters.insert(key.into(), value.to_string());
        self
    }

    pub fn with_replication(mut self, replication: u32) -> Self {
        self.replication = replication;
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// The remote server this configuration targets, if any
    pub fn remote_destination(&self) -> Option<&RemoteDestination> {
        self.destination.remote_destination()
    }

    /// Look up and parse a parameter
    pub fn parameter<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.parameters.get(key).and_then(|v| v.parse().ok())
    }
}

impl fmt::Display for TaskConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sim_time_ordering_and_identity() {
        assert!(SimTime::new(1.0) < SimTime::new(5.0));
        assert_eq!(SimTime::new(-0.0), SimTime::ZERO);

        let mut set = HashSet::new();
        set.insert(SimTime::new(0.0));
        set.insert(SimTime::new(-0.0));
        set.insert(SimTime::new(5.0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_configuration_value_identity() {
        let a = TaskConfiguration::new("remote-B", "sir")
            .with_parameter("beta", 0.3)
            .with_destination(Destination::remote("server-x:9000"));
        let b = TaskConfiguration::new("remote-B", "sir")
            .with_parameter("beta", 0.3)
            .with_destination(Destination::remote("server-x:9000"));
        assert_eq!(a, b);

        let c = b.clone().with_replication(1);
        assert_ne!(a, c);
    }

    #[test]
    fn test_destination_accessors() {
        let local = TaskConfiguration::new("local-A", "sir");
        assert!(local.remote_destination().is_none());
        assert_eq!(local.destination.to_string(), "local");

        let remote = local.with_destination(Destination::remote("server-x"));
        assert_eq!(remote.remote_destination().unwrap().as_str(), "server-x");
    }

    #[test]
    fn test_parameter_parsing() {
        let config = TaskConfiguration::new("t", "m").with_parameter("steps", 40);
        assert_eq!(config.parameter::<u32>("steps"), Some(40));
        assert_eq!(config.parameter::<u32>("missing"), None);
    }

    #[test]
    fn test_empty_task_id_is_missing() {
        assert!(TaskId::new("  ").is_empty());
        assert!(!TaskId::generate().is_empty());
    }

    #[test]
    fn test_configuration_toml_roundtrip() {
        let text = r#"
name = "remote-B"
model = "sir"
destination = { remote = "server-x:9000" }

[parameters]
beta = "0.3"
"#;
        let config: TaskConfiguration = toml::from_str(text).unwrap();
        assert_eq!(config.remote_destination().unwrap().as_str(), "server-x:9000");
        assert_eq!(config.parameter::<f64>("beta"), Some(0.3));
    }
}
