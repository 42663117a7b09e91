use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use bytes::Bytes;
use rand::Rng;
use tokio::{
    sync::{mpsc, Notify},
    time::{Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, trace};

use crate::{
    adjacency::{Adjacency, AdjacencyState},
    circuit::{AdjacencyOutcome, Circuit, CircuitId, Destination, DisView, Medium},
    error::{ConfigError, PduError},
    level::{Level, LevelType},
    lsdb::Lsdb,
    metrics::Metrics,
    origination::Originator,
    pdu::{self, DecodeError, Pdu},
    route_export::{NextHop, RouteExporter, RouteSet},
    spf::{self, ShortestPathTree, SpfBackoff},
    system_id::SystemId,
    task::Tasks,
    Config,
};

/// Interval at which hold timers are checked.
const HOLD_CHECK_INTERVAL: Duration = Duration::from_secs(1);
/// Interval at which the remaining lifetime of LSPs is checked.
const AGING_INTERVAL: Duration = Duration::from_secs(1);
/// Maximum deviation of the hello interval, as a fraction of the interval.
const HELLO_JITTER: f64 = 0.25;

/// A PDU to be sent by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPdu {
    /// The circuit to send the PDU on.
    pub circuit: CircuitId,
    /// Who on the circuit should receive the PDU.
    pub destination: Destination,
    /// The encoded PDU.
    pub pdu: Bytes,
}

/// Pending shortest path computation of a level.
#[derive(Default)]
pub(crate) struct SpfTrigger {
    pending: AtomicBool,
    notify: Notify,
}

/// A link state router. The router itself does no I/O: received PDUs are passed to
/// [`Router::process_pdu`], PDUs to send come out of the channel returned by [`Router::new`].
///
/// All state is shared between clones, so a clone can be handed to every task which needs to
/// access the router.
pub struct Router<M> {
    pub(crate) config: Arc<Config>,
    pub(crate) circuits: Arc<BTreeMap<CircuitId, Circuit>>,
    lsdbs: [Lsdb; 2],
    pub(crate) originator: Arc<Mutex<Originator>>,
    spf: Arc<[SpfTrigger; 2]>,
    trees: Arc<Mutex<[Option<Arc<ShortestPathTree>>; 2]>>,
    exporter: RouteExporter,
    outbound: mpsc::UnboundedSender<OutboundPdu>,
    pub(crate) metrics: M,
}

impl<M> Router<M>
where
    M: Metrics + Clone + Send + 'static,
{
    /// Create a new `Router`. The returned receiver yields every PDU the router wants to send.
    ///
    /// No tasks are started, call [`Router::spawn_tasks`] to run the protocol timers.
    pub fn new(
        config: Config,
        metrics: M,
    ) -> Result<(Self, mpsc::UnboundedReceiver<OutboundPdu>), ConfigError> {
        config.validate()?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let circuits = config
            .circuits
            .iter()
            .map(|c| (c.id, Circuit::new(c.clone(), config.level_type)))
            .collect();

        let router = Router {
            originator: Arc::new(Mutex::new(Originator::new(config.overload))),
            config: Arc::new(config),
            circuits: Arc::new(circuits),
            lsdbs: [Lsdb::new(Level::L1), Lsdb::new(Level::L2)],
            spf: Arc::new(Default::default()),
            trees: Arc::new(Mutex::new([None, None])),
            exporter: RouteExporter::new(),
            outbound,
            metrics,
        };

        info!(system_id = %router.config.system_id, circuits = router.circuits.len(), "Starting router");
        for level in router.config.level_type.levels() {
            router.originate(level, false);
        }

        Ok((router, outbound_rx))
    }

    /// Start the protocol timers. The tasks run until the returned handle is dropped.
    pub fn spawn_tasks(&self) -> Tasks {
        let mut tasks = Tasks::new();
        for circuit in self.circuits.keys() {
            tasks.push(tokio::spawn(self.clone().hello_sender(*circuit)));
        }
        tasks.push(tokio::spawn(self.clone().hold_timer_checker()));
        tasks.push(tokio::spawn(self.clone().lsdb_aging()));
        tasks.push(tokio::spawn(self.clone().periodic_csnp_sender()));
        tasks.push(tokio::spawn(self.clone().retransmitter()));
        tasks.push(tokio::spawn(self.clone().lsp_refresher()));
        for level in self.config.level_type.levels() {
            tasks.push(tokio::spawn(self.clone().spf_scheduler(level)));
        }
        tasks
    }

    /// Process a PDU received on a circuit.
    pub fn process_pdu(&self, circuit: CircuitId, buf: &[u8]) -> Result<(), PduError> {
        self.metrics.pdu_received();
        let res = self.dispatch(circuit, buf);
        if let Err(ref e) = res {
            match e {
                PduError::Decode(DecodeError::ChecksumInvalid) => {
                    self.metrics.pdu_checksum_invalid()
                }
                PduError::Decode(_) => self.metrics.pdu_malformed(),
                PduError::AuthenticationFailure => self.metrics.pdu_auth_failure(),
                _ => {}
            }
            debug!(%circuit, err = %e, "Dropping received PDU");
        }
        res
    }

    fn dispatch(&self, circuit_id: CircuitId, buf: &[u8]) -> Result<(), PduError> {
        let circuit = self
            .circuits
            .get(&circuit_id)
            .ok_or(PduError::UnknownCircuit(circuit_id))?;
        let pdu = pdu::decode(buf)?;
        trace!(circuit = %circuit_id, pdu_type = ?pdu.pdu_type(), "Received PDU");

        let now = Instant::now();
        match pdu {
            Pdu::LanHello(hello) => {
                let outcome = circuit.process_lan_hello(&self.config, &hello, now)?;
                self.apply_outcome(circuit, outcome)
            }
            Pdu::P2pHello(hello) => {
                let outcome = circuit.process_p2p_hello(&self.config, &hello, now)?;
                self.apply_outcome(circuit, outcome)
            }
            Pdu::Lsp(lsp) => self.process_lsp(circuit, lsp),
            Pdu::Csnp(csnp) => self.process_csnp(circuit, csnp),
            Pdu::Psnp(psnp) => self.process_psnp(circuit, psnp),
        }
    }

    /// Act on adjacency and designated router changes on a circuit.
    fn apply_outcome(&self, circuit: &Circuit, mut outcome: AdjacencyOutcome) -> Result<(), PduError> {
        let rejected = outcome.rejected.take();
        let own = self.config.system_id;
        let mut changed = outcome.levels_changed;
        let mut csnp = [false; 2];

        for change in &outcome.changes {
            let Some(levels) = circuit.levels().and_then(|l| l.intersection(change.levels)) else {
                continue;
            };
            if change.to == AdjacencyState::Up && change.from != AdjacencyState::Up {
                changed = true;
                for level in levels.levels() {
                    info!(circuit = %circuit.id(), neighbor = %change.neighbor, %level, "Adjacency up");
                    self.metrics.adjacency_up(level);
                    csnp[level.index()] |= match circuit.config().medium {
                        Medium::PointToPoint => true,
                        Medium::Broadcast => circuit.dis(level).elected == Some(own),
                    };
                }
            } else if change.from == AdjacencyState::Up && change.to != AdjacencyState::Up {
                changed = true;
                for level in levels.levels() {
                    info!(circuit = %circuit.id(), neighbor = %change.neighbor, %level, reason = ?change.reason, "Adjacency down");
                    self.metrics.adjacency_down(level, change.reason);
                }
            }
        }

        for dis in &outcome.dis_changes {
            changed = true;
            info!(circuit = %circuit.id(), level = %dis.level, from = ?dis.from.elected, to = ?dis.to.elected, "Designated router changed");
            self.metrics.dis_changed(dis.level);
            if dis.to.elected == Some(own) && dis.from.elected != Some(own) {
                csnp[dis.level.index()] = true;
            }
        }

        if changed {
            // Adjacencies on one level can change the attached bit on the other.
            for level in self.config.level_type.levels() {
                self.originate(level, false);
            }
        }
        for level in Level::ALL {
            if csnp[level.index()] {
                self.send_csnps(circuit, level);
            }
        }

        match rejected {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Send hellos on every circuit.
    pub fn send_hellos(&self) {
        for circuit in self.circuits.values() {
            self.send_circuit_hellos(circuit);
        }
    }

    fn send_circuit_hellos(&self, circuit: &Circuit) {
        for (destination, pdu) in circuit.hellos(&self.config, false) {
            self.send(circuit.id(), destination, pdu.encode().freeze());
        }
    }

    /// Tear down adjacencies whose hold time expired.
    pub fn check_hold_timers(&self) {
        let now = Instant::now();
        for circuit in self.circuits.values() {
            let outcome = circuit.expire(&self.config, now);
            // Expiry never rejects anything.
            let _ = self.apply_outcome(circuit, outcome);
        }
    }

    /// Count down the lifetime of the LSPs in both databases, flood purges for expired LSPs and
    /// drop purges which were held long enough.
    pub fn age_lsdb(&self) {
        let now = Instant::now();
        let own = self.config.system_id;
        for level in self.config.level_type.levels() {
            let aged = self.lsdb(level).write().age(now);
            for purge in &aged.purged {
                debug!(%level, lsp_id = %purge.lsp_id(), "LSP expired");
                self.metrics.lsp_purged(level);
                self.flood(level, purge, None, now);
            }
            if !aged.purged.is_empty() {
                self.schedule_spf(level);
            }
            let own_affected = aged
                .purged
                .iter()
                .map(|e| e.lsp_id())
                .chain(aged.removed.iter().copied())
                .any(|id| id.system_id() == own);
            if own_affected {
                self.originate(level, false);
            }
        }
    }

    /// Reissue all our LSPs with a new sequence number.
    pub fn refresh(&self) {
        for level in self.config.level_type.levels() {
            self.originate(level, true);
        }
    }

    /// Administratively enable or disable a circuit. Disabling a circuit sends hellos with a zero
    /// hold time, and tears down every adjacency on it. Returns false if the circuit is unknown.
    pub fn set_circuit_enabled(&self, circuit_id: CircuitId, enabled: bool) -> bool {
        let Some(circuit) = self.circuits.get(&circuit_id) else {
            return false;
        };
        if circuit.is_enabled() == enabled {
            return true;
        }
        info!(circuit = %circuit_id, enabled, "Changing circuit state");
        if !enabled {
            for (destination, pdu) in circuit.hellos(&self.config, true) {
                self.send(circuit_id, destination, pdu.encode().freeze());
            }
        }
        let outcome = circuit.set_enabled(&self.config, enabled, Instant::now());
        let _ = self.apply_outcome(circuit, outcome);
        if enabled {
            self.send_circuit_hellos(circuit);
        }
        // Prefixes of the circuit come and go with it.
        for level in self.config.level_type.levels() {
            self.originate(level, false);
        }
        true
    }

    /// Mark the shortest path tree of a level as stale.
    pub(crate) fn schedule_spf(&self, level: Level) {
        trace!(%level, "Scheduling SPF");
        let trigger = &self.spf[level.index()];
        trigger.pending.store(true, Ordering::Release);
        trigger.notify.notify_one();
    }

    /// Checks if a shortest path computation is scheduled for the level.
    pub fn spf_pending(&self, level: Level) -> bool {
        self.spf[level.index()].pending.load(Ordering::Acquire)
    }

    /// Compute the shortest path tree of a level right away, and publish the resulting routes.
    pub fn run_spf(&self, level: Level) -> Arc<ShortestPathTree> {
        self.spf[level.index()].pending.store(false, Ordering::Release);
        let start = std::time::Instant::now();
        let lsps = self.lsdb(level).entries();
        let default_route = level == Level::L1 && self.config.level_type == LevelType::Level1;
        let tree = Arc::new(spf::compute(
            level,
            self.config.system_id,
            &lsps,
            default_route,
        ));
        let elapsed = start.elapsed();
        debug!(%level, nodes = tree.nodes.len(), prefixes = tree.prefixes.len(), ?elapsed, "Computed shortest path tree");
        self.metrics.spf_ran(level, elapsed);

        let mut trees = self.trees.lock().unwrap();
        trees[level.index()] = Some(Arc::clone(&tree));
        self.export_routes(&trees);
        tree
    }

    /// Build the route set from the current shortest path trees and publish it if it changed.
    ///
    /// The caller holds the lock on the trees until the set is published, so a set built from
    /// older trees can't replace a newer one.
    fn export_routes(&self, trees: &[Option<Arc<ShortestPathTree>>; 2]) {
        let routes = RouteSet::from_trees(trees.iter().flatten().map(Arc::as_ref), |level, hop| {
            self.resolve_next_hops(level, hop)
        });
        let amount = routes.len();
        if self.exporter.publish(routes) {
            debug!(routes = amount, "Published new route set");
            self.metrics.routes_published(amount);
        }
    }

    /// The adjacencies to forward to for a first hop router: every circuit with an `Up`
    /// adjacency to it on the level, restricted to the ones with the lowest metric.
    fn resolve_next_hops(&self, level: Level, neighbor: SystemId) -> Vec<NextHop> {
        let mut best = None;
        let mut hops = Vec::new();
        for circuit in self.circuits.values() {
            if !circuit.has_level(level) || !circuit.up_neighbors(level).contains(&neighbor) {
                continue;
            }
            let cost = circuit.metric().as_link_cost();
            match best {
                Some(b) if cost > b => continue,
                Some(b) if cost == b => {}
                _ => {
                    best = Some(cost);
                    hops.clear();
                }
            }
            hops.push(NextHop {
                circuit: circuit.id(),
                neighbor,
            });
        }
        hops
    }

    /// Hand a PDU to the transport.
    pub(crate) fn send(&self, circuit: CircuitId, destination: Destination, pdu: Bytes) {
        if self
            .outbound
            .send(OutboundPdu {
                circuit,
                destination,
                pdu,
            })
            .is_err()
        {
            trace!(%circuit, "Transport is gone, dropping outbound PDU");
        }
    }

    /// The config of the router.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a circuit.
    pub fn circuit(&self, circuit: CircuitId) -> Option<&Circuit> {
        self.circuits.get(&circuit)
    }

    /// Snapshot of the adjacencies on a circuit.
    pub fn adjacencies(&self, circuit: CircuitId) -> Vec<Adjacency> {
        self.circuits
            .get(&circuit)
            .map(Circuit::adjacencies)
            .unwrap_or_default()
    }

    /// The designated router of a broadcast circuit on a level.
    pub fn dis(&self, circuit: CircuitId, level: Level) -> Option<DisView> {
        self.circuits.get(&circuit).map(|c| c.dis(level))
    }

    /// The link state database of a level.
    pub fn lsdb(&self, level: Level) -> &Lsdb {
        &self.lsdbs[level.index()]
    }

    /// The last computed shortest path tree of a level.
    pub fn shortest_path_tree(&self, level: Level) -> Option<Arc<ShortestPathTree>> {
        self.trees.lock().unwrap()[level.index()].clone()
    }

    /// The currently published routes.
    pub fn routes(&self) -> Arc<RouteSet> {
        self.exporter.load()
    }

    /// A stream of the published route sets, starting with the current one.
    pub fn subscribe_routes(&self) -> WatchStream<Arc<RouteSet>> {
        self.exporter.subscribe()
    }

    /// Task which sends hellos on a circuit, with a jittered interval.
    async fn hello_sender(self, circuit_id: CircuitId) {
        loop {
            let interval = match self.circuits.get(&circuit_id) {
                Some(circuit) => {
                    self.send_circuit_hellos(circuit);
                    circuit.config().hello_interval()
                }
                None => return,
            };
            tokio::time::sleep(jitter(interval)).await;
        }
    }

    async fn hold_timer_checker(self) {
        let mut interval = tokio::time::interval(HOLD_CHECK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.check_hold_timers();
        }
    }

    async fn lsdb_aging(self) {
        let mut interval = tokio::time::interval(AGING_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.age_lsdb();
        }
    }

    async fn periodic_csnp_sender(self) {
        let mut interval = tokio::time::interval(self.config.timers.csnp_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.send_periodic_csnps();
        }
    }

    async fn retransmitter(self) {
        let mut interval = tokio::time::interval(self.config.timers.retransmit_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately, nothing can be pending yet.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.retransmit();
        }
    }

    async fn lsp_refresher(self) {
        let mut interval = tokio::time::interval(self.config.timers.lsp_refresh_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            debug!("Refreshing own LSPs");
            self.refresh();
        }
    }

    /// Task which runs the shortest path computation of a level when it is scheduled, backing
    /// off while changes keep coming in.
    async fn spf_scheduler(self, level: Level) {
        let mut backoff = SpfBackoff::new(
            self.config.timers.spf_initial_delay(),
            self.config.timers.spf_max_delay(),
        );
        let spf = Arc::clone(&self.spf);
        loop {
            spf[level.index()].notify.notified().await;
            let delay = backoff.next_delay(Instant::now());
            trace!(%level, ?delay, "Delaying SPF");
            tokio::time::sleep(delay).await;
            if self.spf_pending(level) {
                self.run_spf(level);
                backoff.ran(Instant::now());
            }
        }
    }
}

/// Apply a random deviation of up to [`HELLO_JITTER`] to an interval.
fn jitter(interval: Duration) -> Duration {
    let factor = rand::rng().random_range(1.0 - HELLO_JITTER..=1.0 + HELLO_JITTER);
    interval.mul_f64(factor)
}

impl<M> Clone for Router<M>
where
    M: Clone,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            circuits: self.circuits.clone(),
            lsdbs: self.lsdbs.clone(),
            originator: self.originator.clone(),
            spf: self.spf.clone(),
            trees: self.trees.clone(),
            exporter: self.exporter.clone(),
            outbound: self.outbound.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
