//! Shortest path computation over the link state database of a single level.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet, BinaryHeap},
    net::Ipv4Addr,
    sync::Arc,
    time::Duration,
};

use ipnet::Ipv4Net;
use tokio::time::Instant;
use tracing::trace;

use crate::{
    level::Level,
    lsdb::LspEntry,
    metric::Metric,
    pdu::{tlv::TlvsExt, LspFlags},
    system_id::{LanId, SystemId},
};

/// Cost and first hops of the shortest paths to a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub cost: Metric,
    /// The neighbors of the root through which the destination is reached at `cost`. Empty for
    /// destinations attached to the root itself.
    pub next_hops: BTreeSet<SystemId>,
}

/// Result of a shortest path computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortestPathTree {
    pub level: Level,
    pub root: SystemId,
    /// Every reachable router, except the root.
    pub nodes: BTreeMap<SystemId, Path>,
    /// Every reachable prefix, except those advertised by the root.
    pub prefixes: BTreeMap<Ipv4Net, Path>,
}

/// A node in the graph, assembled from all fragments of its LSP.
#[derive(Default)]
struct Node {
    flags: Option<LspFlags>,
    links: BTreeMap<LanId, Metric>,
    prefixes: BTreeMap<Ipv4Net, Metric>,
}

/// Exponential backoff between successive computations.
#[derive(Debug, Clone)]
pub struct SpfBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    last_run: Option<Instant>,
}

impl ShortestPathTree {
    /// The path to the given router.
    pub fn node(&self, system_id: &SystemId) -> Option<&Path> {
        self.nodes.get(system_id)
    }

    /// The path to the given prefix.
    pub fn prefix(&self, prefix: &Ipv4Net) -> Option<&Path> {
        self.prefixes.get(prefix)
    }
}

/// Compute the shortest paths from `root` over the given LSPs, which must all be of the same
/// level.
///
/// Only nodes with a live fragment 0 take part. A link is only used if both ends advertise it.
/// Links leaving a pseudonode are free, router links which advertise a zero metric cost
/// [`DEFAULT_LINK_METRIC`](crate::metric::DEFAULT_LINK_METRIC). Overloaded routers are reachable
/// but never used for transit. If `default_via_attached` is set, a default route is added towards
/// the closest routers with the attached bit set.
pub fn compute(
    level: Level,
    root: SystemId,
    lsps: &[Arc<LspEntry>],
    default_via_attached: bool,
) -> ShortestPathTree {
    let graph = build_graph(lsps);
    let root_node = LanId::router(root);

    let mut paths: BTreeMap<LanId, Path> = BTreeMap::new();
    let mut settled = BTreeSet::new();
    let mut frontier = BinaryHeap::new();

    paths.insert(
        root_node,
        Path {
            cost: Metric::ZERO,
            next_hops: BTreeSet::new(),
        },
    );
    // At equal cost pseudonodes are settled before routers, so every zero cost link into a router
    // is relaxed before the router itself is settled.
    frontier.push(Reverse((Metric::ZERO, false, root_node)));

    while let Some(Reverse((cost, _, id))) = frontier.pop() {
        if !settled.insert(id) {
            continue;
        }
        let Some(node) = graph.get(&id) else {
            continue;
        };
        if id != root_node && node.flags.is_some_and(|f| f.overload()) {
            trace!(%id, "Not transiting overloaded router");
            continue;
        }
        let inherited = paths
            .get(&id)
            .map(|p| p.next_hops.clone())
            .unwrap_or_default();

        for (&neighbor, &metric) in &node.links {
            if settled.contains(&neighbor) || (id.is_pseudonode() && neighbor.is_pseudonode()) {
                continue;
            }
            if !graph
                .get(&neighbor)
                .is_some_and(|n| n.links.contains_key(&id))
            {
                trace!(from = %id, to = %neighbor, "Skipping one way link");
                continue;
            }

            let link_cost = if id.is_pseudonode() {
                Metric::ZERO
            } else {
                metric.as_link_cost()
            };
            let new_cost = cost + link_cost;
            let next_hops = if id == root_node {
                if neighbor.is_pseudonode() {
                    BTreeSet::new()
                } else {
                    BTreeSet::from([neighbor.system_id()])
                }
            } else if inherited.is_empty() {
                // A pseudonode attached to the root.
                BTreeSet::from([neighbor.system_id()])
            } else {
                inherited.clone()
            };

            match paths.get_mut(&neighbor) {
                Some(path) if path.cost < new_cost => {}
                Some(path) if path.cost == new_cost => path.next_hops.extend(next_hops),
                _ => {
                    paths.insert(
                        neighbor,
                        Path {
                            cost: new_cost,
                            next_hops,
                        },
                    );
                    frontier.push(Reverse((new_cost, !neighbor.is_pseudonode(), neighbor)));
                }
            }
        }
    }

    let mut tree = ShortestPathTree {
        level,
        root,
        nodes: BTreeMap::new(),
        prefixes: BTreeMap::new(),
    };

    let own_prefixes = graph
        .get(&root_node)
        .map(|n| n.prefixes.keys().copied().collect::<BTreeSet<_>>())
        .unwrap_or_default();

    let mut closest_attached: Option<Path> = None;
    for (id, path) in paths {
        if id.is_pseudonode() || id == root_node {
            continue;
        }
        let Some(node) = graph.get(&id) else {
            continue;
        };
        for (&prefix, &metric) in &node.prefixes {
            if own_prefixes.contains(&prefix) {
                continue;
            }
            merge(&mut tree.prefixes, prefix, path.cost + metric, &path.next_hops);
        }
        if default_via_attached && node.flags.is_some_and(|f| f.attached()) {
            match &mut closest_attached {
                Some(closest) if closest.cost < path.cost => {}
                Some(closest) if closest.cost == path.cost => {
                    closest.next_hops.extend(path.next_hops.iter().copied())
                }
                _ => closest_attached = Some(path.clone()),
            }
        }
        tree.nodes.insert(id.system_id(), path);
    }

    if let Some(closest) = closest_attached {
        let default = Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0).expect("0 is a valid prefix length; qed");
        merge(&mut tree.prefixes, default, closest.cost, &closest.next_hops);
    }

    tree
}

fn merge(
    prefixes: &mut BTreeMap<Ipv4Net, Path>,
    prefix: Ipv4Net,
    cost: Metric,
    next_hops: &BTreeSet<SystemId>,
) {
    match prefixes.get_mut(&prefix) {
        Some(existing) if existing.cost < cost => {}
        Some(existing) if existing.cost == cost => {
            existing.next_hops.extend(next_hops.iter().copied())
        }
        _ => {
            prefixes.insert(
                prefix,
                Path {
                    cost,
                    next_hops: next_hops.clone(),
                },
            );
        }
    }
}

fn build_graph(lsps: &[Arc<LspEntry>]) -> BTreeMap<LanId, Node> {
    let mut graph: BTreeMap<LanId, Node> = BTreeMap::new();
    for entry in lsps.iter().filter(|e| !e.is_purge()) {
        let lsp = entry.lsp();
        let node = graph.entry(lsp.lsp_id.lan_id()).or_default();
        if lsp.lsp_id.fragment() == 0 {
            node.flags = Some(lsp.flags);
        }
        for reach in lsp.tlvs.is_reach() {
            node.links
                .entry(reach.neighbor())
                .and_modify(|m| *m = (*m).min(reach.metric()))
                .or_insert(reach.metric());
        }
        if !lsp.lsp_id.lan_id().is_pseudonode() {
            for reach in lsp.tlvs.ip_reach() {
                node.prefixes
                    .entry(reach.prefix())
                    .and_modify(|m| *m = (*m).min(reach.metric()))
                    .or_insert(reach.metric());
            }
        }
    }
    // Without a live fragment 0 a node doesn't exist.
    graph.retain(|_, node| node.flags.is_some());
    graph
}

impl SpfBackoff {
    /// Create a new `SpfBackoff`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            last_run: None,
        }
    }

    /// The delay to wait before running a computation triggered at `now`. The delay doubles, up
    /// to the maximum, as long as computations keep following each other within the maximum
    /// delay. After a quiet period it starts over at the initial delay.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        self.current = match self.last_run {
            Some(last) if now.saturating_duration_since(last) < self.max => {
                (self.current * 2).min(self.max)
            }
            _ => self.initial,
        };
        self.current
    }

    /// Record that a computation ran.
    pub fn ran(&mut self, at: Instant) {
        self.last_run = Some(at);
    }
}
