//! Circuits and the adjacencies formed over them.
//!
//! Every circuit owns the adjacencies with the neighbors reachable over it, and on broadcast
//! circuits the result of the designated router election. All of this lives behind a single lock
//! per circuit, so an adjacency going down and its removal from the flooding fan-out happen
//! atomically.

use core::fmt;
use std::{
    collections::BTreeMap,
    iter,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    adjacency::{Adjacency, AdjacencyState, ChangeReason, StateChange},
    dis::{self, Candidate},
    error::PduError,
    level::{Level, LevelType},
    metric::Metric,
    pdu::{
        tlv::{AreaAddress, Authentication, ThreeWayAdjacency, ThreeWayState, TlvsExt, NLPID_IPV4},
        LanHello, P2pHello, Pdu, Tlv,
    },
    sequence_number::SeqNo,
    system_id::{LanId, LspId, SystemId},
    Config,
};

/// Default interval between hellos, in seconds.
pub const DEFAULT_HELLO_INTERVAL: u16 = 10;
/// Default multiplier of the hello interval to get the hold time.
pub const DEFAULT_HOLD_MULTIPLIER: u16 = 3;
/// Default metric of a circuit.
pub const DEFAULT_CIRCUIT_METRIC: u32 = 10;

/// Number of area addresses we support, advertised as 0 in hellos.
const MAX_AREA_ADDRESSES: u8 = crate::MAX_AREA_ADDRESSES as u8;

/// Local identifier of a circuit. On broadcast circuits this is also the pseudonode id used when
/// we are the designated router, so it must not be 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CircuitId(u8);

/// The kind of medium of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Medium {
    Broadcast,
    PointToPoint,
}

/// Configuration of a single circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub id: CircuitId,
    #[serde(default)]
    pub name: String,
    pub medium: Medium,
    #[serde(default = "default_level_type")]
    pub level_type: LevelType,
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Interval between hellos, in seconds.
    #[serde(default = "default_hello_interval")]
    pub hello_interval: u16,
    #[serde(default = "default_hold_multiplier")]
    pub hold_multiplier: u16,
    #[serde(default = "default_metric")]
    pub metric: u32,
    /// Prefixes configured on the circuit, advertised in our LSPs.
    #[serde(default)]
    pub prefixes: Vec<Ipv4Net>,
    /// Cleartext password required in hellos.
    #[serde(default)]
    pub hello_password: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Where a PDU has to be sent on a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// All level 1 routers on a broadcast circuit.
    AllL1Is,
    /// All level 2 routers on a broadcast circuit.
    AllL2Is,
    /// The neighbor on a point-to-point circuit.
    PointToPoint,
}

/// The designated router on a broadcast circuit, as currently seen by us.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisView {
    /// The elected router.
    pub elected: Option<SystemId>,
    /// The LAN id of the elected router, once it announced it.
    pub lan_id: Option<LanId>,
}

/// A change of the designated router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisChange {
    pub level: Level,
    pub from: DisView,
    pub to: DisView,
}

/// The effects of processing an event on a circuit.
#[derive(Debug, Default)]
pub struct AdjacencyOutcome {
    pub changes: Vec<StateChange>,
    pub dis_changes: Vec<DisChange>,
    /// The levels of an `Up` adjacency changed.
    pub levels_changed: bool,
    /// The hello was refused. Effects of the refusal, like tearing down an existing adjacency,
    /// are still listed.
    pub rejected: Option<PduError>,
}

/// A circuit.
pub struct Circuit {
    config: CircuitConfig,
    levels: Option<LevelType>,
    state: Mutex<CircuitState>,
}

pub(crate) struct CircuitState {
    enabled: bool,
    adjacencies: Adjacencies,
    /// LSPs sent on a point-to-point circuit which are not acknowledged yet.
    retransmit: BTreeMap<(Level, LspId), SeqNo>,
}

enum Adjacencies {
    Broadcast([LanLevel; 2]),
    PointToPoint(Option<Adjacency>),
}

#[derive(Default)]
struct LanLevel {
    adjacencies: BTreeMap<SystemId, Adjacency>,
    dis: DisView,
}

fn default_level_type() -> LevelType {
    LevelType::Level12
}

fn default_priority() -> u8 {
    dis::DEFAULT_PRIORITY
}

fn default_hello_interval() -> u16 {
    DEFAULT_HELLO_INTERVAL
}

fn default_hold_multiplier() -> u16 {
    DEFAULT_HOLD_MULTIPLIER
}

fn default_metric() -> u32 {
    DEFAULT_CIRCUIT_METRIC
}

fn default_enabled() -> bool {
    true
}

impl CircuitId {
    /// Create a new `CircuitId`.
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// The raw id.
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Medium::Broadcast => f.pad("broadcast"),
            Medium::PointToPoint => f.pad("point-to-point"),
        }
    }
}

impl CircuitConfig {
    /// A circuit with default settings.
    pub fn new(id: CircuitId, medium: Medium) -> Self {
        Self {
            id,
            name: String::new(),
            medium,
            level_type: default_level_type(),
            priority: default_priority(),
            hello_interval: default_hello_interval(),
            hold_multiplier: default_hold_multiplier(),
            metric: default_metric(),
            prefixes: Vec::new(),
            hello_password: None,
            enabled: default_enabled(),
        }
    }

    /// Interval between hellos.
    pub fn hello_interval(&self) -> Duration {
        Duration::from_secs(self.hello_interval as u64)
    }

    /// Hold time advertised in our hellos, in seconds.
    pub fn hold_time(&self) -> u16 {
        self.hello_interval.saturating_mul(self.hold_multiplier)
    }
}

impl Destination {
    /// The multicast destination for the given level on broadcast circuits.
    pub fn all_is(level: Level) -> Self {
        match level {
            Level::L1 => Destination::AllL1Is,
            Level::L2 => Destination::AllL2Is,
        }
    }
}

impl Circuit {
    /// Create a new `Circuit`. `router_levels` are the levels the router takes part in.
    pub fn new(config: CircuitConfig, router_levels: LevelType) -> Self {
        let levels = config.level_type.intersection(router_levels);
        let adjacencies = match config.medium {
            Medium::Broadcast => Adjacencies::Broadcast(Default::default()),
            Medium::PointToPoint => Adjacencies::PointToPoint(None),
        };
        let state = Mutex::new(CircuitState {
            enabled: config.enabled,
            adjacencies,
            retransmit: BTreeMap::new(),
        });
        Self {
            config,
            levels,
            state,
        }
    }

    /// The id of this circuit.
    pub fn id(&self) -> CircuitId {
        self.config.id
    }

    /// The configuration of this circuit.
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// The levels active on this circuit, if any.
    pub fn levels(&self) -> Option<LevelType> {
        self.levels
    }

    /// Checks if the circuit runs on the given level.
    pub fn has_level(&self, level: Level) -> bool {
        self.levels.is_some_and(|l| l.contains(level))
    }

    /// The metric of this circuit.
    pub fn metric(&self) -> Metric {
        Metric::new(self.config.metric)
    }

    /// Checks if the circuit is administratively enabled.
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Snapshot of the adjacencies on this circuit, across levels.
    pub fn adjacencies(&self) -> Vec<Adjacency> {
        let state = self.lock();
        match &state.adjacencies {
            Adjacencies::Broadcast(levels) => levels
                .iter()
                .flat_map(|l| l.adjacencies.values().cloned())
                .collect(),
            Adjacencies::PointToPoint(adj) => adj.iter().cloned().collect(),
        }
    }

    /// The designated router for the given level, broadcast circuits only.
    pub fn dis(&self, level: Level) -> DisView {
        match &self.lock().adjacencies {
            Adjacencies::Broadcast(levels) => levels[level.index()].dis,
            Adjacencies::PointToPoint(_) => DisView::default(),
        }
    }

    /// Checks if there is an `Up` adjacency on this circuit for the given level.
    pub fn is_up(&self, level: Level) -> bool {
        !self.up_neighbors(level).is_empty()
    }

    /// The system ids of the `Up` adjacencies for the given level.
    pub fn up_neighbors(&self, level: Level) -> Vec<SystemId> {
        self.lock().up_neighbors(level)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap()
    }

    /// Process a LAN hello.
    pub(crate) fn process_lan_hello(
        &self,
        config: &Config,
        hello: &LanHello,
        now: Instant,
    ) -> Result<AdjacencyOutcome, PduError> {
        let mut state = self.lock();
        if !state.enabled {
            return Err(PduError::CircuitDisabled(self.id()));
        }
        let Adjacencies::Broadcast(lan) = &mut state.adjacencies else {
            return Err(PduError::MediumMismatch);
        };
        if hello.source == config.system_id {
            return Ok(AdjacencyOutcome::default());
        }
        self.authenticate(&hello.tlvs)?;
        let levels = self.levels.ok_or(PduError::LevelMismatch)?;
        if !levels.contains(hello.level) || !hello.circuit_type.contains(hello.level) {
            return Err(PduError::LevelMismatch);
        }
        check_max_area_addresses(hello.source, hello.max_area_addresses);

        let mut outcome = AdjacencyOutcome::default();
        let lvl = &mut lan[hello.level.index()];

        let teardown = if hello.level == Level::L1
            && !areas_intersect(&config.area_addresses, &hello.tlvs.area_addresses())
        {
            outcome.rejected = Some(PduError::AreaMismatch);
            Some(ChangeReason::AreaMismatch)
        } else if hello.hold_time == 0 {
            Some(ChangeReason::ZeroHoldTime)
        } else {
            None
        };

        if let Some(reason) = teardown {
            if let Some(mut adj) = lvl.adjacencies.remove(&hello.source) {
                debug!(circuit = %self.id(), neighbor = %hello.source, ?reason, "Removing adjacency");
                outcome.changes.extend(adj.tear_down(reason, now));
            }
        } else {
            let adj = lvl
                .adjacencies
                .entry(hello.source)
                .or_insert_with(|| Adjacency::new(hello.source, hello.level.into(), now));
            outcome
                .changes
                .extend(adj.process_lan_hello(hello, config.system_id, now));
        }

        outcome.dis_changes.extend(lvl.elect(
            hello.level,
            config.system_id,
            self.config.priority,
            self.id(),
        ));

        Ok(outcome)
    }

    /// Process a point-to-point hello.
    pub(crate) fn process_p2p_hello(
        &self,
        config: &Config,
        hello: &P2pHello,
        now: Instant,
    ) -> Result<AdjacencyOutcome, PduError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.enabled {
            return Err(PduError::CircuitDisabled(self.id()));
        }
        let Adjacencies::PointToPoint(slot) = &mut state.adjacencies else {
            return Err(PduError::MediumMismatch);
        };
        if hello.source == config.system_id {
            return Ok(AdjacencyOutcome::default());
        }
        self.authenticate(&hello.tlvs)?;
        let levels = self.levels.ok_or(PduError::LevelMismatch)?;
        check_max_area_addresses(hello.source, hello.max_area_addresses);

        let mut outcome = AdjacencyOutcome::default();

        let mut usable = levels.intersection(hello.circuit_type);
        let mut reason = ChangeReason::LevelMismatch;
        if usable.is_some_and(|l| l.contains(Level::L1))
            && !areas_intersect(&config.area_addresses, &hello.tlvs.area_addresses())
        {
            usable = usable.and_then(|l| l.without(Level::L1));
            reason = ChangeReason::AreaMismatch;
        }

        let teardown = match usable {
            None => {
                outcome.rejected = Some(match reason {
                    ChangeReason::AreaMismatch => PduError::AreaMismatch,
                    _ => PduError::LevelMismatch,
                });
                Some(reason)
            }
            Some(_) if hello.hold_time == 0 => Some(ChangeReason::ZeroHoldTime),
            Some(_) if slot.as_ref().is_some_and(|a| a.neighbor() != hello.source) => {
                Some(ChangeReason::NeighborReplaced)
            }
            Some(_) => None,
        };

        if let Some(reason) = teardown {
            if let Some(mut adj) = slot.take() {
                debug!(circuit = %self.id(), neighbor = %adj.neighbor(), ?reason, "Removing adjacency");
                outcome.changes.extend(adj.tear_down(reason, now));
                state.retransmit.clear();
            }
            if reason != ChangeReason::NeighborReplaced {
                return Ok(outcome);
            }
        }

        // Only reachable with usable levels.
        let Some(usable) = usable else {
            return Ok(outcome);
        };

        let adj = slot.get_or_insert_with(|| Adjacency::new(hello.source, usable, now));
        if adj.levels() != usable {
            outcome.levels_changed = adj.is_up();
            adj.set_levels(usable);
        }
        let changes = adj.process_p2p_hello(hello, config.system_id, now);
        if changes.iter().any(|c| c.from == AdjacencyState::Up) {
            state.retransmit.clear();
        }
        outcome.changes.extend(changes);

        Ok(outcome)
    }

    /// Remove all adjacencies whose hold time expired.
    pub(crate) fn expire(&self, config: &Config, now: Instant) -> AdjacencyOutcome {
        self.remove_adjacencies(config, now, ChangeReason::HoldTimerExpired, |adj| {
            adj.is_expired(now)
        })
    }

    /// Enable or disable the circuit. Disabling tears down every adjacency.
    pub(crate) fn set_enabled(&self, config: &Config, enabled: bool, now: Instant) -> AdjacencyOutcome {
        self.lock().enabled = enabled;
        if enabled {
            return AdjacencyOutcome::default();
        }
        self.remove_adjacencies(config, now, ChangeReason::CircuitDisabled, |_| true)
    }

    fn remove_adjacencies(
        &self,
        config: &Config,
        now: Instant,
        reason: ChangeReason,
        remove: impl Fn(&Adjacency) -> bool,
    ) -> AdjacencyOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut outcome = AdjacencyOutcome::default();
        match &mut state.adjacencies {
            Adjacencies::Broadcast(lan) => {
                for level in Level::ALL {
                    let lvl = &mut lan[level.index()];
                    let expired = lvl
                        .adjacencies
                        .values()
                        .filter(|adj| remove(adj))
                        .map(Adjacency::neighbor)
                        .collect::<Vec<_>>();
                    if expired.is_empty() {
                        continue;
                    }
                    for neighbor in expired {
                        if let Some(mut adj) = lvl.adjacencies.remove(&neighbor) {
                            debug!(circuit = %self.id(), %neighbor, %level, ?reason, "Removing adjacency");
                            outcome.changes.extend(adj.tear_down(reason, now));
                        }
                    }
                    outcome.dis_changes.extend(lvl.elect(
                        level,
                        config.system_id,
                        self.config.priority,
                        self.id(),
                    ));
                }
            }
            Adjacencies::PointToPoint(slot) => {
                if slot.as_ref().is_some_and(|adj| remove(adj)) {
                    if let Some(mut adj) = slot.take() {
                        debug!(circuit = %self.id(), neighbor = %adj.neighbor(), ?reason, "Removing adjacency");
                        outcome.changes.extend(adj.tear_down(reason, now));
                    }
                    state.retransmit.clear();
                }
            }
        }
        outcome
    }

    /// Build the hellos to send on this circuit. A disabled circuit, or one without levels,
    /// sends nothing. With `goodbye` set the hold time is 0, so neighbors drop us immediately.
    pub(crate) fn hellos(&self, config: &Config, goodbye: bool) -> Vec<(Destination, Pdu)> {
        let Some(levels) = self.levels else {
            return Vec::new();
        };
        let state = self.lock();
        if !state.enabled && !goodbye {
            return Vec::new();
        }

        let hold_time = if goodbye { 0 } else { self.config.hold_time() };
        let mut common = vec![
            Tlv::AreaAddresses(config.area_addresses.clone()),
            Tlv::ProtocolsSupported(vec![NLPID_IPV4]),
        ];
        if !self.config.prefixes.is_empty() {
            common.push(Tlv::Ipv4InterfaceAddresses(
                self.config.prefixes.iter().map(|p| p.addr()).collect(),
            ));
        }
        if let Some(password) = &self.config.hello_password {
            common.push(Tlv::Authentication(Authentication::cleartext(password)));
        }

        match &state.adjacencies {
            Adjacencies::Broadcast(lan) => levels
                .levels()
                .map(|level| {
                    let lvl = &lan[level.index()];
                    let mut tlvs = common.clone();
                    tlvs.push(Tlv::IsNeighbors(lvl.adjacencies.keys().copied().collect()));
                    let hello = LanHello {
                        level,
                        circuit_type: levels,
                        source: config.system_id,
                        hold_time,
                        priority: self.config.priority,
                        lan_id: lvl
                            .dis
                            .lan_id
                            .unwrap_or(LanId::new(config.system_id, self.id().get())),
                        max_area_addresses: 0,
                        tlvs,
                    };
                    (Destination::all_is(level), hello.into())
                })
                .collect(),
            Adjacencies::PointToPoint(adj) => {
                let local_circuit_id = self.id().get() as u32;
                let three_way = adj
                    .as_ref()
                    .map(|adj| adj.three_way_tlv(local_circuit_id))
                    .unwrap_or(ThreeWayAdjacency {
                        state: ThreeWayState::Down,
                        local_circuit_id: Some(local_circuit_id),
                        neighbor: None,
                    });
                let mut tlvs = common;
                tlvs.push(Tlv::ThreeWayAdjacency(three_way));
                let hello = P2pHello {
                    circuit_type: levels,
                    source: config.system_id,
                    hold_time,
                    local_circuit_id: self.id().get(),
                    max_area_addresses: 0,
                    tlvs,
                };
                vec![(Destination::PointToPoint, hello.into())]
            }
        }
    }

    /// Check the authentication TLV against the hello password, if one is configured.
    fn authenticate(&self, tlvs: &[Tlv]) -> Result<(), PduError> {
        match &self.config.hello_password {
            None => Ok(()),
            Some(password) => match tlvs.authentication() {
                Some(auth) if auth.matches(password) => Ok(()),
                _ => Err(PduError::AuthenticationFailure),
            },
        }
    }
}

impl CircuitState {
    /// Checks if the circuit is administratively enabled.
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn up_neighbors(&self, level: Level) -> Vec<SystemId> {
        if !self.enabled {
            return Vec::new();
        }
        match &self.adjacencies {
            Adjacencies::Broadcast(lan) => lan[level.index()]
                .adjacencies
                .values()
                .filter(|adj| adj.is_up())
                .map(Adjacency::neighbor)
                .collect(),
            Adjacencies::PointToPoint(adj) => adj
                .iter()
                .filter(|adj| adj.is_up() && adj.levels().contains(level))
                .map(Adjacency::neighbor)
                .collect(),
        }
    }

    /// Remember an LSP sent on a point-to-point circuit, until it is acknowledged.
    pub(crate) fn track_retransmit(&mut self, level: Level, lsp_id: LspId, seqno: SeqNo) {
        if matches!(self.adjacencies, Adjacencies::PointToPoint(_)) {
            self.retransmit.insert((level, lsp_id), seqno);
        }
    }

    /// Handle an acknowledgement. Returns true if a pending retransmission was cleared.
    pub(crate) fn acknowledge(&mut self, level: Level, lsp_id: LspId, seqno: SeqNo) -> bool {
        match self.retransmit.get(&(level, lsp_id)) {
            Some(pending) if *pending <= seqno => {
                self.retransmit.remove(&(level, lsp_id));
                true
            }
            _ => false,
        }
    }

    /// LSPs which still need to be acknowledged.
    pub(crate) fn pending_retransmits(&self) -> Vec<(Level, LspId)> {
        self.retransmit.keys().copied().collect()
    }
}

impl LanLevel {
    /// Rerun the election. Only `Up` neighbors take part, and only if there is at least one.
    fn elect(
        &mut self,
        level: Level,
        own_id: SystemId,
        priority: u8,
        circuit_id: CircuitId,
    ) -> Option<DisChange> {
        let up = self
            .adjacencies
            .values()
            .filter(|adj| adj.is_up())
            .collect::<Vec<_>>();

        let elected = if up.is_empty() {
            None
        } else {
            dis::elect(
                iter::once(Candidate {
                    priority,
                    system_id: own_id,
                })
                .chain(up.iter().map(|adj| Candidate {
                    priority: adj.priority(),
                    system_id: adj.neighbor(),
                })),
            )
        };

        let lan_id = match elected {
            Some(id) if id == own_id => Some(LanId::new(own_id, circuit_id.get())),
            Some(id) => self
                .adjacencies
                .get(&id)
                .and_then(Adjacency::lan_id)
                .filter(|lan_id| lan_id.system_id() == id),
            None => None,
        };

        let to = DisView { elected, lan_id };
        if to == self.dis {
            return None;
        }
        let from = std::mem::replace(&mut self.dis, to);
        debug!(%level, ?from, ?to, "Designated router changed");
        Some(DisChange { level, from, to })
    }
}

fn areas_intersect(own: &[AreaAddress], theirs: &[&AreaAddress]) -> bool {
    theirs.iter().any(|area| own.contains(*area))
}

fn check_max_area_addresses(neighbor: SystemId, max_area_addresses: u8) {
    let theirs = if max_area_addresses == 0 {
        MAX_AREA_ADDRESSES
    } else {
        max_area_addresses
    };
    if theirs != MAX_AREA_ADDRESSES {
        warn!(%neighbor, theirs, ours = MAX_AREA_ADDRESSES, "Maximum area addresses mismatch");
    }
}
