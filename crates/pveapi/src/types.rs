//! Core types exchanged with the control plane.

use devices::{Attributes, DeviceCollection, Value, coerce_bool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Kind of guest managed by the plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmKind {
    /// Full virtual machine
    Qemu,
    /// Container
    Lxc,
}

impl VmKind {
    /// Name used in API paths and identity tokens.
    pub fn as_str(&self) -> &'static str {
        match self {
            VmKind::Qemu => "qemu",
            VmKind::Lxc => "lxc",
        }
    }

    /// Parse a kind from its API name.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "qemu" => Some(VmKind::Qemu),
            "lxc" => Some(VmKind::Lxc),
            _ => None,
        }
    }
}

impl fmt::Display for VmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to a guest: where it lives and what it is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmRef {
    /// Numeric guest id, unique across the cluster
    pub vmid: u32,
    /// Node hosting the guest
    pub node: String,
    /// Guest kind
    pub kind: VmKind,
}

impl VmRef {
    pub fn new(vmid: u32, node: impl Into<String>, kind: VmKind) -> Self {
        Self {
            vmid,
            node: node.into(),
            kind,
        }
    }
}

impl fmt::Display for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {}", self.kind, self.vmid, self.node)
    }
}

/// Power state of a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Running,
    Stopped,
    Paused,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmStatus::Running => "running",
            VmStatus::Stopped => "stopped",
            VmStatus::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

/// Handle of an asynchronous task (a UPID on Proxmox VE).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exit status the plane reports for a successful task.
pub const TASK_OK: &str = "OK";

/// State of an asynchronous task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Still executing
    Running,
    /// Finished with the given exit status
    Stopped { exit_status: String },
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }
}

/// Configuration of a guest as pushed to or reported by the plane.
///
/// Scalars live in `attributes`; device collections (`disk`, `net`, `mp`,
/// `rootfs`) live in `devices`, keyed by collection name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// Guest name (hostname for containers)
    pub name: String,
    /// Scalar attributes
    #[serde(default)]
    pub attributes: Attributes,
    /// Device collections by name
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceCollection>,
}

impl VmConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set a scalar attribute.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Set a string attribute, skipping empty strings.
    pub fn set_str(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.set(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// String attribute, empty when absent.
    pub fn str_attr(&self, key: &str) -> String {
        match self.attributes.get(key) {
            Some(Value::Str(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Integer attribute, `default` when absent or not numeric.
    pub fn int_attr(&self, key: &str, default: i64) -> i64 {
        match self.attributes.get(key) {
            Some(Value::Int(i)) => *i,
            Some(Value::Str(s)) => s.parse().unwrap_or(default),
            Some(Value::Bool(b)) => i64::from(*b),
            None => default,
        }
    }

    /// Boolean attribute; the plane reports booleans as `0`/`1`.
    pub fn bool_attr(&self, key: &str, default: bool) -> bool {
        match self.attributes.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Int(i)) => coerce_bool(*i).unwrap_or(default),
            Some(Value::Str(s)) => match s.as_str() {
                "1" => true,
                "0" => false,
                _ => default,
            },
            None => default,
        }
    }

    /// A device collection, empty when the plane reported none.
    pub fn devices(&self, name: &str) -> DeviceCollection {
        self.devices.get(name).cloned().unwrap_or_default()
    }

    pub fn set_devices(&mut self, name: impl Into<String>, collection: DeviceCollection) {
        self.devices.insert(name.into(), collection);
    }
}

/// A disk size as written in guest configuration (`32G`, `512M`).
///
/// A bare number is read as gigabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiskSize(u64);

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

impl DiskSize {
    pub fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn from_gib(gib: u64) -> Self {
        Self(gib * GIB)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for DiskSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (number, unit) = match trimmed.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => (&trimmed[..idx], Some(c)),
            _ => (trimmed, None),
        };

        let scale = match unit.map(|c| c.to_ascii_uppercase()) {
            Some('K') => KIB,
            Some('M') => MIB,
            Some('G') | None => GIB,
            Some('T') => TIB,
            Some(other) => return Err(format!("unknown size unit '{other}' in '{s}'")),
        };

        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid disk size '{s}'"))?;
        if !value.is_finite() || value < 0.0 {
            return Err(format!("invalid disk size '{s}'"));
        }

        Ok(Self((value * scale as f64).round() as u64))
    }
}

impl fmt::Display for DiskSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        for (scale, unit) in [(TIB, 'T'), (GIB, 'G'), (MIB, 'M'), (KIB, 'K')] {
            if bytes >= scale && bytes % scale == 0 {
                return write!(f, "{}{unit}", bytes / scale);
            }
        }
        // Not a whole number of KiB; round up so a resize never shrinks
        write!(f, "{}K", bytes.div_ceil(KIB))
    }
}

/// Configuration for waiting on asynchronous work.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Delay before the second check
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between checks
    pub max_delay: Duration,
    /// Total time budget before giving up
    pub max_wait: Duration,
    /// Fixed wait used when the plane returns no task handle
    pub fallback_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            max_wait: Duration::from_secs(300),
            fallback_delay: Duration::from_secs(5),
        }
    }
}

impl PollConfig {
    /// Create a poll config with custom backoff and the default limits.
    pub fn new(base_delay: Duration, backoff_factor: f64, max_wait: Duration) -> Self {
        Self {
            base_delay,
            backoff_factor,
            max_wait,
            ..Default::default()
        }
    }

    /// Calculate the delay after a given check (0-indexed).
    ///
    /// Never negative and never above `max_delay`, whatever the factor.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        if delay.is_nan() {
            return self.max_delay;
        }
        let capped = delay.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// Millisecond delays and a short budget; for tests against an
    /// in-memory plane.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(1),
            max_wait: Duration::from_millis(50),
            fallback_delay: Duration::ZERO,
        }
    }
}
