//! Publication of the computed routes to the forwarding plane.

use core::fmt;
use std::{
    collections::BTreeMap,
    net::Ipv4Addr,
    sync::Arc,
};

use arc_swap::ArcSwap;
use ip_network_table_deps_treebitmap::IpLookupTable;
use ipnet::Ipv4Net;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::{
    circuit::CircuitId,
    level::Level,
    metric::Metric,
    spf::ShortestPathTree,
    system_id::SystemId,
};

/// A neighbor to forward traffic to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NextHop {
    pub circuit: CircuitId,
    pub neighbor: SystemId,
}

/// A route to a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: Ipv4Net,
    /// The level the route was computed on.
    pub level: Level,
    pub cost: Metric,
    /// Equal cost next hops, never empty.
    pub next_hops: Vec<NextHop>,
}

/// An immutable set of routes, with longest prefix match lookup.
pub struct RouteSet {
    routes: BTreeMap<Ipv4Net, Route>,
    lookup: IpLookupTable<Ipv4Addr, Ipv4Net>,
}

/// Publishes route sets. Every publication replaces the previous set atomically.
#[derive(Clone)]
pub struct RouteExporter {
    current: Arc<ArcSwap<RouteSet>>,
    notify: Arc<watch::Sender<Arc<RouteSet>>>,
}

impl RouteSet {
    /// Create a new `RouteSet`. Later routes for the same prefix replace earlier ones.
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Self {
        let routes = routes
            .into_iter()
            .map(|r| (r.prefix, r))
            .collect::<BTreeMap<_, _>>();
        let mut lookup = IpLookupTable::new();
        for prefix in routes.keys() {
            lookup.insert(prefix.addr(), prefix.prefix_len() as u32, *prefix);
        }
        Self { routes, lookup }
    }

    /// An empty `RouteSet`.
    pub fn empty() -> Self {
        Self::new([])
    }

    /// Build the routes from the shortest path trees of both levels. Level 1 routes are preferred
    /// over level 2 routes for the same prefix. `resolve` maps a first hop router to the
    /// neighbors to forward to on the given level; prefixes whose first hops can't be resolved are
    /// left out.
    pub fn from_trees<'a>(
        trees: impl IntoIterator<Item = &'a ShortestPathTree>,
        resolve: impl Fn(Level, SystemId) -> Vec<NextHop>,
    ) -> Self {
        let mut routes: BTreeMap<Ipv4Net, Route> = BTreeMap::new();
        for tree in trees {
            for (prefix, path) in &tree.prefixes {
                if routes
                    .get(prefix)
                    .is_some_and(|existing| existing.level <= tree.level)
                {
                    continue;
                }
                let mut next_hops = path
                    .next_hops
                    .iter()
                    .flat_map(|hop| resolve(tree.level, *hop))
                    .collect::<Vec<_>>();
                next_hops.sort();
                next_hops.dedup();
                if next_hops.is_empty() {
                    continue;
                }
                routes.insert(
                    *prefix,
                    Route {
                        prefix: *prefix,
                        level: tree.level,
                        cost: path.cost,
                        next_hops,
                    },
                );
            }
        }
        Self::new(routes.into_values())
    }

    /// The route for exactly this prefix.
    pub fn get(&self, prefix: &Ipv4Net) -> Option<&Route> {
        self.routes.get(prefix)
    }

    /// The route with the longest prefix containing the address.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<&Route> {
        self.lookup
            .longest_match(addr)
            .and_then(|(_, _, prefix)| self.routes.get(prefix))
    }

    /// Iterate over all routes, ordered by prefix.
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    /// Amount of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Checks if there are no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl PartialEq for RouteSet {
    fn eq(&self, other: &Self) -> bool {
        self.routes == other.routes
    }
}

impl Eq for RouteSet {}

impl fmt::Debug for RouteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.routes.values()).finish()
    }
}

impl Default for RouteSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl RouteExporter {
    /// Create a new `RouteExporter` with an empty route set.
    pub fn new() -> Self {
        let initial = Arc::new(RouteSet::empty());
        let (notify, _) = watch::channel(Arc::clone(&initial));
        Self {
            current: Arc::new(ArcSwap::new(initial)),
            notify: Arc::new(notify),
        }
    }

    /// The currently published route set.
    pub fn load(&self) -> Arc<RouteSet> {
        self.current.load_full()
    }

    /// A stream yielding the current route set, followed by every newly published one.
    /// Intermediate sets may be skipped if the consumer is slow, the last one is always seen.
    pub fn subscribe(&self) -> WatchStream<Arc<RouteSet>> {
        WatchStream::new(self.notify.subscribe())
    }

    /// Publish a new route set. Returns false, and publishes nothing, if the set is identical
    /// to the current one.
    pub(crate) fn publish(&self, routes: RouteSet) -> bool {
        if *self.current.load_full() == routes {
            return false;
        }
        let routes = Arc::new(routes);
        self.current.store(Arc::clone(&routes));
        self.notify.send_replace(routes);
        true
    }
}

impl Default for RouteExporter {
    fn default() -> Self {
        Self::new()
    }
}
