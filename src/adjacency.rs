//! The adjacency state machine, one instance per neighbor on a circuit.
//!
//! An adjacency starts `Down`, moves to `Initializing` once the neighbor is heard, and to `Up`
//! once the neighbor confirms it hears us as well. Any state can go back to `Down`, at which point
//! the adjacency is removed by its circuit.

use core::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::{
    level::LevelType,
    pdu::{
        tlv::{AreaAddress, ThreeWayAdjacency, ThreeWayState, TlvsExt},
        LanHello, P2pHello,
    },
    system_id::{LanId, SystemId},
};

/// State of an adjacency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdjacencyState {
    Down,
    Initializing,
    Up,
}

/// Why an adjacency changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    /// A hello was received from a neighbor which does not report hearing us yet.
    HelloReceived,
    /// The neighbor reports hearing us.
    TwoWay,
    /// The neighbor stopped reporting us.
    NeighborLostUs,
    /// No hello was received within the hold time.
    HoldTimerExpired,
    /// The neighbor sent a hello with a hold time of 0.
    ZeroHoldTime,
    /// The circuit was administratively disabled.
    CircuitDisabled,
    /// The neighbor is not in any of our areas.
    AreaMismatch,
    /// The neighbor no longer shares a level with us on this circuit.
    LevelMismatch,
    /// A different neighbor showed up on a point-to-point circuit.
    NeighborReplaced,
}

/// A state transition of an adjacency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub neighbor: SystemId,
    pub levels: LevelType,
    pub from: AdjacencyState,
    pub to: AdjacencyState,
    pub reason: ChangeReason,
}

/// An adjacency with a single neighbor.
#[derive(Debug, Clone)]
pub struct Adjacency {
    neighbor: SystemId,
    state: AdjacencyState,
    levels: LevelType,
    hold_time: Duration,
    hold_deadline: Instant,
    priority: u8,
    lan_id: Option<LanId>,
    area_addresses: Vec<AreaAddress>,
    neighbor_circuit_id: Option<u32>,
    up_since: Option<Instant>,
}

impl Adjacency {
    /// Create a new adjacency in the `Down` state.
    pub fn new(neighbor: SystemId, levels: LevelType, now: Instant) -> Self {
        Self {
            neighbor,
            state: AdjacencyState::Down,
            levels,
            hold_time: Duration::ZERO,
            hold_deadline: now,
            priority: 0,
            lan_id: None,
            area_addresses: Vec::new(),
            neighbor_circuit_id: None,
            up_since: None,
        }
    }

    /// The system id of the neighbor.
    pub fn neighbor(&self) -> SystemId {
        self.neighbor
    }

    /// The current state.
    pub fn state(&self) -> AdjacencyState {
        self.state
    }

    /// Checks if the adjacency is `Up`.
    pub fn is_up(&self) -> bool {
        self.state == AdjacencyState::Up
    }

    /// The levels this adjacency is used for.
    pub fn levels(&self) -> LevelType {
        self.levels
    }

    /// The hold time last advertised by the neighbor.
    pub fn hold_time(&self) -> Duration {
        self.hold_time
    }

    /// When the adjacency goes down if no further hello is received.
    pub fn hold_deadline(&self) -> Instant {
        self.hold_deadline
    }

    /// The neighbor's priority to become designated router, broadcast circuits only.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// The neighbor's view of the designated router, broadcast circuits only.
    pub fn lan_id(&self) -> Option<LanId> {
        self.lan_id
    }

    /// The area addresses advertised by the neighbor.
    pub fn area_addresses(&self) -> &[AreaAddress] {
        &self.area_addresses
    }

    /// The extended circuit id of the neighbor, point-to-point circuits only.
    pub fn neighbor_circuit_id(&self) -> Option<u32> {
        self.neighbor_circuit_id
    }

    /// Since when the adjacency is `Up`.
    pub fn up_since(&self) -> Option<Instant> {
        self.up_since
    }

    /// Checks if the hold time expired.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.hold_deadline
    }

    /// Set the levels this adjacency is used for.
    pub(crate) fn set_levels(&mut self, levels: LevelType) {
        self.levels = levels;
    }

    /// Move the adjacency to `Down`, returning the transition if it wasn't `Down` already.
    pub(crate) fn tear_down(&mut self, reason: ChangeReason, now: Instant) -> Option<StateChange> {
        if self.state == AdjacencyState::Down {
            return None;
        }
        Some(self.transition(AdjacencyState::Down, reason, now))
    }

    /// Process a hello received on a broadcast circuit. The hello must come from our neighbor and
    /// have a non zero hold time.
    pub(crate) fn process_lan_hello(
        &mut self,
        hello: &LanHello,
        own_id: SystemId,
        now: Instant,
    ) -> Vec<StateChange> {
        debug_assert_eq!(hello.source, self.neighbor);

        self.refresh(hello.hold_time, now);
        self.priority = hello.priority;
        self.lan_id = Some(hello.lan_id);
        self.area_addresses = hello.tlvs.area_addresses().into_iter().cloned().collect();

        let sees_us = hello.tlvs.is_neighbors().contains(&own_id);
        trace!(neighbor = %self.neighbor, sees_us, state = %self.state, "Processing LAN hello");

        let mut changes = Vec::new();
        match (self.state, sees_us) {
            (AdjacencyState::Down, false) => {
                changes.push(self.transition(AdjacencyState::Initializing, ChangeReason::HelloReceived, now));
            }
            (AdjacencyState::Down, true) => {
                changes.push(self.transition(AdjacencyState::Initializing, ChangeReason::HelloReceived, now));
                changes.push(self.transition(AdjacencyState::Up, ChangeReason::TwoWay, now));
            }
            (AdjacencyState::Initializing, true) => {
                changes.push(self.transition(AdjacencyState::Up, ChangeReason::TwoWay, now));
            }
            (AdjacencyState::Up, false) => {
                changes.push(self.transition(AdjacencyState::Down, ChangeReason::NeighborLostUs, now));
                changes.push(self.transition(AdjacencyState::Initializing, ChangeReason::HelloReceived, now));
            }
            (AdjacencyState::Initializing, false) | (AdjacencyState::Up, true) => {}
        }
        changes
    }

    /// Process a hello received on a point-to-point circuit. The hello must come from our
    /// neighbor and have a non zero hold time. Hellos carrying a three-way TLV follow the
    /// three-way handshake, others bring the adjacency up immediately.
    pub(crate) fn process_p2p_hello(
        &mut self,
        hello: &P2pHello,
        own_id: SystemId,
        now: Instant,
    ) -> Vec<StateChange> {
        debug_assert_eq!(hello.source, self.neighbor);

        let three_way = hello.tlvs.three_way();
        if let Some(ThreeWayAdjacency {
            neighbor: Some((reflected, _)),
            ..
        }) = three_way
        {
            if *reflected != own_id {
                trace!(neighbor = %self.neighbor, %reflected, "Ignoring hello meant for another system");
                return Vec::new();
            }
        }

        self.refresh(hello.hold_time, now);
        self.area_addresses = hello.tlvs.area_addresses().into_iter().cloned().collect();

        let remote_state = match three_way {
            Some(tw) => {
                if let Some(circuit_id) = tw.local_circuit_id {
                    self.neighbor_circuit_id = Some(circuit_id);
                }
                tw.state
            }
            // Without the three-way TLV the neighbor hearing us can't be verified.
            None => ThreeWayState::Up,
        };

        trace!(neighbor = %self.neighbor, ?remote_state, state = %self.state, "Processing P2P hello");

        let mut changes = Vec::new();
        match (self.state, remote_state) {
            (AdjacencyState::Down, ThreeWayState::Down) => {
                changes.push(self.transition(AdjacencyState::Initializing, ChangeReason::HelloReceived, now));
            }
            (AdjacencyState::Down, ThreeWayState::Initializing) => {
                changes.push(self.transition(AdjacencyState::Initializing, ChangeReason::HelloReceived, now));
                changes.push(self.transition(AdjacencyState::Up, ChangeReason::TwoWay, now));
            }
            (AdjacencyState::Down, ThreeWayState::Up) if three_way.is_none() => {
                changes.push(self.transition(AdjacencyState::Initializing, ChangeReason::HelloReceived, now));
                changes.push(self.transition(AdjacencyState::Up, ChangeReason::TwoWay, now));
            }
            (AdjacencyState::Initializing, ThreeWayState::Initializing | ThreeWayState::Up) => {
                changes.push(self.transition(AdjacencyState::Up, ChangeReason::TwoWay, now));
            }
            (AdjacencyState::Up, ThreeWayState::Down) => {
                changes.push(self.transition(AdjacencyState::Down, ChangeReason::NeighborLostUs, now));
                changes.push(self.transition(AdjacencyState::Initializing, ChangeReason::HelloReceived, now));
            }
            // The neighbor claims an adjacency we don't have, wait for it to reset.
            (AdjacencyState::Down, ThreeWayState::Up)
            | (AdjacencyState::Initializing, ThreeWayState::Down)
            | (AdjacencyState::Up, ThreeWayState::Initializing | ThreeWayState::Up) => {}
        }
        changes
    }

    /// The three-way TLV we advertise to this neighbor.
    pub(crate) fn three_way_tlv(&self, local_circuit_id: u32) -> ThreeWayAdjacency {
        ThreeWayAdjacency {
            state: match self.state {
                AdjacencyState::Down => ThreeWayState::Down,
                AdjacencyState::Initializing => ThreeWayState::Initializing,
                AdjacencyState::Up => ThreeWayState::Up,
            },
            local_circuit_id: Some(local_circuit_id),
            neighbor: self
                .neighbor_circuit_id
                .map(|circuit_id| (self.neighbor, circuit_id)),
        }
    }

    fn refresh(&mut self, hold_time: u16, now: Instant) {
        self.hold_time = Duration::from_secs(hold_time as u64);
        self.hold_deadline = now + self.hold_time;
    }

    fn transition(&mut self, to: AdjacencyState, reason: ChangeReason, now: Instant) -> StateChange {
        let from = self.state;
        self.state = to;
        self.up_since = match to {
            AdjacencyState::Up => Some(now),
            _ => None,
        };
        StateChange {
            neighbor: self.neighbor,
            levels: self.levels,
            from,
            to,
            reason,
        }
    }
}

impl fmt::Display for AdjacencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdjacencyState::Down => f.pad("Down"),
            AdjacencyState::Initializing => f.pad("Initializing"),
            AdjacencyState::Up => f.pad("Up"),
        }
    }
}
