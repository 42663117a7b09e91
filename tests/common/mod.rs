//! An in memory network of routers, delivering PDUs in random order.

#![allow(dead_code)]

use ipnet::Ipv4Net;
use isis::{
    circuit::{CircuitConfig, CircuitId, Medium},
    level::{Level, LevelType},
    metrics::NoMetrics,
    system_id::SystemId,
    Config, OutboundPdu, Router,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

/// Upper bound on delivery rounds, so a flooding loop fails the test instead of hanging it.
const MAX_ROUNDS: usize = 1_000;

/// Log to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn system_id(n: u8) -> SystemId {
    SystemId::new([0, 0, 0, 0, 0, n])
}

pub fn config(n: u8, level_type: LevelType) -> Config {
    let mut config = Config::new(system_id(n), "49.0001".parse().expect("Valid area; qed"));
    config.hostname = Some(format!("r{n}"));
    config.level_type = level_type;
    config
}

pub fn circuit(id: u8, medium: Medium, metric: u32) -> CircuitConfig {
    let mut circuit = CircuitConfig::new(CircuitId::new(id), medium);
    circuit.metric = metric;
    circuit
}

pub fn prefix(s: &str) -> Ipv4Net {
    s.parse().expect("Valid prefix; qed")
}

/// A router in the network, with the receiving end of its outbound queue.
pub struct Node {
    pub router: Router<NoMetrics>,
    outbound: UnboundedReceiver<OutboundPdu>,
}

/// Routers and the segments connecting their circuits. A segment with two members is a
/// point-to-point link, more members form a LAN.
pub struct Network {
    pub nodes: Vec<Node>,
    segments: Vec<Vec<(usize, CircuitId)>>,
    rng: StdRng,
    /// Drop everything sent by these routers.
    pub muted: Vec<usize>,
}

impl Network {
    pub fn new(configs: Vec<Config>, segments: Vec<Vec<(usize, u8)>>, seed: u64) -> Self {
        init_tracing();
        let nodes = configs
            .into_iter()
            .map(|config| {
                let (router, outbound) = Router::new(config, NoMetrics).expect("Valid config; qed");
                Node { router, outbound }
            })
            .collect();
        Self {
            nodes,
            segments: segments
                .into_iter()
                .map(|s| s.into_iter().map(|(n, c)| (n, CircuitId::new(c))).collect())
                .collect(),
            rng: StdRng::seed_from_u64(seed),
            muted: Vec::new(),
        }
    }

    pub fn router(&self, n: usize) -> &Router<NoMetrics> {
        &self.nodes[n].router
    }

    /// Deliver PDUs until no router has anything left to send. PDUs sent in the same round are
    /// delivered in random order.
    pub fn deliver(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let mut pending = Vec::new();
            for (n, node) in self.nodes.iter_mut().enumerate() {
                while let Ok(pdu) = node.outbound.try_recv() {
                    if !self.muted.contains(&n) {
                        pending.push((n, pdu));
                    }
                }
            }
            if pending.is_empty() {
                return;
            }
            pending.shuffle(&mut self.rng);

            for (from, pdu) in pending {
                let Some(segment) = self
                    .segments
                    .iter()
                    .find(|s| s.contains(&(from, pdu.circuit)))
                else {
                    continue;
                };
                for &(to, circuit) in segment {
                    if to == from {
                        continue;
                    }
                    // Refusals are part of normal operation, e.g. LSPs before the adjacency is up.
                    let _ = self.nodes[to].router.process_pdu(circuit, &pdu.pdu);
                }
            }
        }
        panic!("Network didn't quiesce within {MAX_ROUNDS} rounds");
    }

    /// Exchange hellos until adjacencies settle, then let the databases synchronize.
    pub fn converge(&mut self) {
        for _ in 0..4 {
            for node in &self.nodes {
                node.router.send_hellos();
            }
            self.deliver();
        }
        for node in &self.nodes {
            node.router.send_periodic_csnps();
            node.router.retransmit();
        }
        self.deliver();
    }

    /// Run the shortest path computation on every router.
    pub fn run_spf(&self) {
        for node in &self.nodes {
            for level in node.router.config().level_type.levels() {
                node.router.run_spf(level);
            }
        }
    }

    /// The (id, sequence number, purge) triples in a router's database of a level.
    pub fn database(&self, n: usize, level: Level) -> Vec<(String, u32, bool)> {
        self.router(n)
            .lsdb(level)
            .entries()
            .iter()
            .map(|e| (e.lsp_id().to_string(), e.seqno().into(), e.is_purge()))
            .collect()
    }

    /// Checks that every router taking part in the level has the same database.
    pub fn assert_synchronized(&self, level: Level) {
        let members = (0..self.nodes.len())
            .filter(|n| self.router(*n).config().level_type.contains(level))
            .collect::<Vec<_>>();
        let reference = self.database(members[0], level);
        for n in &members[1..] {
            assert_eq!(
                self.database(*n, level),
                reference,
                "database of router {n} differs from router {}",
                members[0]
            );
        }
    }
}
