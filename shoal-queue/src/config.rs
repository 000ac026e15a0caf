//! Upload queue configuration: global cap, group definitions, strategies

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{QueueError, Result};

/// Name of the hard-coded group that always schedules first
pub const PRIVILEGED_GROUP: &str = "privileged";

/// Name of the built-in group for ordinary users
pub const DEFAULT_GROUP: &str = "default";

/// Name of the built-in group for users flagged as leechers
pub const LEECHERS_GROUP: &str = "leechers";

/// Per-group ordering discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Release uploads in enqueue order across the whole group
    FirstInFirstOut,
    /// Rotate across users, releasing whoever has waited longest since
    /// becoming ready
    RoundRobin,
}

impl Strategy {
    /// Canonical configuration string for this strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FirstInFirstOut => "FirstInFirstOut",
            Strategy::RoundRobin => "RoundRobin",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = QueueError;

    /// Parse a strategy name, ignoring case
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "firstinfirstout" => Ok(Strategy::FirstInFirstOut),
            "roundrobin" => Ok(Strategy::RoundRobin),
            _ => Err(QueueError::InvalidStrategy(s.to_string())),
        }
    }
}

impl Serialize for Strategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Strategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Scheduling class definition as supplied by configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupOptions {
    /// Lower values are scheduled earlier; 0 is reserved for the
    /// privileged group
    pub priority: u32,
    /// Maximum concurrently active uploads for the group
    pub slots: usize,
    /// Ordering discipline within the group
    pub strategy: Strategy,
}

/// Upload queue options delivered by the configuration source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Global concurrent upload cap; also the privileged group's slot count
    pub slots: usize,
    /// Built-in group for ordinary users
    pub default: GroupOptions,
    /// Built-in group for leechers
    pub leechers: GroupOptions,
    /// Operator-defined groups, keyed by name
    #[serde(default)]
    pub user_defined: HashMap<String, GroupOptions>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            slots: 10,
            default: GroupOptions {
                priority: 1,
                slots: 10,
                strategy: Strategy::FirstInFirstOut,
            },
            leechers: GroupOptions {
                priority: 2,
                slots: 1,
                strategy: Strategy::RoundRobin,
            },
            user_defined: HashMap::new(),
        }
    }
}

impl QueueOptions {
    /// Validate group definitions.
    ///
    /// Invalid options are rejected as a unit: a queue configured from a
    /// previous snapshot keeps that snapshot when this fails.
    pub fn validate(&self) -> Result<()> {
        if self.default.priority == 0 {
            return Err(QueueError::ReservedPriority(DEFAULT_GROUP.to_string()));
        }
        if self.leechers.priority == 0 {
            return Err(QueueError::ReservedPriority(LEECHERS_GROUP.to_string()));
        }
        for (name, group) in &self.user_defined {
            if name == PRIVILEGED_GROUP || name == DEFAULT_GROUP || name == LEECHERS_GROUP {
                return Err(QueueError::ReservedGroupName(name.clone()));
            }
            if group.priority == 0 {
                return Err(QueueError::ReservedPriority(name.clone()));
            }
        }
        Ok(())
    }

    /// Stable hash over the group portion of the options, used by the
    /// configurator to skip rebuilds for identical snapshots. User-defined
    /// groups are folded in sorted name order so map iteration order cannot
    /// perturb the value.
    pub(crate) fn group_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.default.hash(&mut hasher);
        self.leechers.hash(&mut hasher);
        let mut names: Vec<&String> = self.user_defined.keys().collect();
        names.sort();
        for name in names {
            name.hash(&mut hasher);
            self.user_defined[name].hash(&mut hasher);
        }
        hasher.finish()
    }
}
