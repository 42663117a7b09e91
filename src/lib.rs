//! A link state interior routing engine, speaking the IS-IS protocol.
//!
//! The engine discovers neighbors over broadcast and point-to-point circuits, floods link state
//! PDUs so every router converges to the same database, and computes shortest paths from it. It
//! does not do any I/O itself: received PDUs are handed to [`Router::process_pdu`], and PDUs to
//! send are emitted on a channel as [`OutboundPdu`]s. The computed routes are published through a
//! [`RouteExporter`](route_export::RouteExporter).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use circuit::CircuitConfig;
use error::ConfigError;
use level::LevelType;
use pdu::tlv::AreaAddress;
use system_id::SystemId;

pub use router::{OutboundPdu, Router};

pub mod adjacency;
pub mod circuit;
pub mod dis;
pub mod error;
mod flooding;
pub mod level;
pub mod lsdb;
pub mod metric;
pub mod metrics;
mod origination;
pub mod pdu;
pub mod route_export;
pub mod router;
pub mod sequence_number;
pub mod spf;
pub mod system_id;
mod task;

pub use task::Tasks;

/// Maximum amount of area addresses a router can be configured with.
pub const MAX_AREA_ADDRESSES: usize = 3;

/// Config of a [`Router`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The system id of the router.
    pub system_id: SystemId,
    /// Hostname advertised in our LSPs.
    #[serde(default)]
    pub hostname: Option<String>,
    /// The areas this router is part of.
    pub area_addresses: Vec<AreaAddress>,
    /// The levels this router takes part in.
    #[serde(default = "default_level_type")]
    pub level_type: LevelType,
    /// Start with the overload bit set.
    #[serde(default)]
    pub overload: bool,
    /// Cleartext password for level 1 LSPs and sequence number PDUs.
    #[serde(default)]
    pub area_password: Option<String>,
    /// Cleartext password for level 2 LSPs and sequence number PDUs.
    #[serde(default)]
    pub domain_password: Option<String>,
    #[serde(default)]
    pub timers: Timers,
    #[serde(default)]
    pub circuits: Vec<CircuitConfig>,
}

/// Protocol timers. All values are in seconds unless noted otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timers {
    /// Lifetime of the LSPs we originate.
    pub lsp_lifetime: u16,
    /// Interval after which our LSPs are refreshed.
    pub lsp_refresh_interval: u16,
    /// Interval between CSNPs sent by the designated router.
    pub csnp_interval: u16,
    /// Interval between retransmissions of unacknowledged LSPs on point-to-point circuits.
    pub retransmit_interval: u16,
    /// Delay before the first shortest path computation after a quiet period, in milliseconds.
    pub spf_initial_delay_ms: u64,
    /// Maximum delay between shortest path computations, in milliseconds.
    pub spf_max_delay_ms: u64,
}

fn default_level_type() -> LevelType {
    LevelType::Level12
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            lsp_lifetime: 1200,
            lsp_refresh_interval: 900,
            csnp_interval: 10,
            retransmit_interval: 5,
            spf_initial_delay_ms: 50,
            spf_max_delay_ms: 5000,
        }
    }
}

impl Timers {
    pub fn lsp_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.lsp_refresh_interval as u64)
    }

    pub fn csnp_interval(&self) -> Duration {
        Duration::from_secs(self.csnp_interval as u64)
    }

    pub fn retransmit_interval(&self) -> Duration {
        Duration::from_secs(self.retransmit_interval as u64)
    }

    pub fn spf_initial_delay(&self) -> Duration {
        Duration::from_millis(self.spf_initial_delay_ms)
    }

    pub fn spf_max_delay(&self) -> Duration {
        Duration::from_millis(self.spf_max_delay_ms)
    }
}

impl Config {
    /// A config for a router in the given area, without circuits.
    pub fn new(system_id: SystemId, area_address: AreaAddress) -> Self {
        Self {
            system_id,
            hostname: None,
            area_addresses: vec![area_address],
            level_type: default_level_type(),
            overload: false,
            area_password: None,
            domain_password: None,
            timers: Timers::default(),
            circuits: Vec::new(),
        }
    }

    /// Check the config for values the router can't work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.area_addresses.is_empty() {
            return Err(ConfigError::NoAreaAddress);
        }
        if self.area_addresses.len() > MAX_AREA_ADDRESSES {
            return Err(ConfigError::TooManyAreaAddresses {
                max: MAX_AREA_ADDRESSES,
                got: self.area_addresses.len(),
            });
        }
        for (name, value) in [
            ("lsp_refresh_interval", self.timers.lsp_refresh_interval),
            ("csnp_interval", self.timers.csnp_interval),
            ("retransmit_interval", self.timers.retransmit_interval),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        if self.timers.lsp_refresh_interval >= self.timers.lsp_lifetime {
            return Err(ConfigError::RefreshInterval);
        }
        let mut seen = Vec::with_capacity(self.circuits.len());
        for circuit in &self.circuits {
            if circuit.id.get() == 0 {
                return Err(ConfigError::ReservedCircuitId);
            }
            if seen.contains(&circuit.id) {
                return Err(ConfigError::DuplicateCircuit(circuit.id));
            }
            if circuit.hold_time() == 0 {
                return Err(ConfigError::ZeroHoldTime(circuit.id));
            }
            seen.push(circuit.id);
        }
        Ok(())
    }

    /// The password for LSPs and sequence number PDUs on the given level.
    pub fn password(&self, level: level::Level) -> Option<&str> {
        match level {
            level::Level::L1 => self.area_password.as_deref(),
            level::Level::L2 => self.domain_password.as_deref(),
        }
    }
}
