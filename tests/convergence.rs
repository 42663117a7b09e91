mod common;

use std::{
    collections::BTreeSet,
    sync::{Arc, Barrier},
    thread,
};

use common::{circuit, config, prefix, system_id, Network};
use isis::{
    circuit::{CircuitId, Medium},
    level::{Level, LevelType},
    metric::Metric,
    system_id::{LanId, LspId},
};

/// A - B metric 1, B - C metric 1, A - C metric 5. C advertises 10.3.0.0/24.
fn triangle(seed: u64) -> Network {
    let mut a = config(1, LevelType::Level2);
    a.circuits = vec![
        circuit(1, Medium::PointToPoint, 1),
        circuit(2, Medium::PointToPoint, 5),
    ];
    let mut b = config(2, LevelType::Level2);
    b.circuits = vec![
        circuit(1, Medium::PointToPoint, 1),
        circuit(2, Medium::PointToPoint, 1),
    ];
    let mut c = config(3, LevelType::Level2);
    let mut stub = circuit(3, Medium::PointToPoint, 4);
    stub.prefixes = vec![prefix("10.3.0.1/24")];
    c.circuits = vec![
        circuit(1, Medium::PointToPoint, 1),
        circuit(2, Medium::PointToPoint, 5),
        stub,
    ];

    Network::new(
        vec![a, b, c],
        vec![
            vec![(0, 1), (1, 1)],
            vec![(1, 2), (2, 1)],
            vec![(0, 2), (2, 2)],
        ],
        seed,
    )
}

#[test]
fn databases_converge_regardless_of_delivery_order() {
    for seed in 0..16 {
        let mut network = triangle(seed);
        network.converge();
        network.assert_synchronized(Level::L2);
        // Every router has its own LSP in every database.
        for n in 0..3 {
            let own = LspId::new(LanId::router(system_id(n as u8 + 1)), 0);
            assert!(network.router(0).lsdb(Level::L2).get(&own).is_some());
        }
    }
}

#[test]
fn shortest_path_through_cheaper_links() {
    let mut network = triangle(7);
    network.converge();
    network.run_spf();

    let tree = network
        .router(0)
        .shortest_path_tree(Level::L2)
        .expect("SPF ran; qed");
    let to_c = tree.node(&system_id(3)).expect("C is reachable; qed");
    assert_eq!(to_c.cost, Metric::new(2));
    assert_eq!(to_c.next_hops, BTreeSet::from([system_id(2)]));

    let routes = network.router(0).routes();
    let route = routes
        .get(&prefix("10.3.0.0/24"))
        .expect("Prefix of C is routed; qed");
    assert_eq!(route.cost, Metric::new(6));
    assert_eq!(route.next_hops.len(), 1);
    assert_eq!(route.next_hops[0].circuit, CircuitId::new(1));
    assert_eq!(route.next_hops[0].neighbor, system_id(2));
    assert_eq!(
        routes
            .lookup("10.3.0.77".parse().expect("Valid address; qed"))
            .map(|r| r.prefix),
        Some(prefix("10.3.0.0/24"))
    );

    // C doesn't route to its own prefix.
    assert!(network.router(2).routes().get(&prefix("10.3.0.0/24")).is_none());
}

#[test]
fn equal_cost_paths_are_kept() {
    // A square: A - B - D and A - C - D, all metric 1. D advertises a prefix.
    let mut a = config(1, LevelType::Level2);
    a.circuits = vec![
        circuit(1, Medium::PointToPoint, 1),
        circuit(2, Medium::PointToPoint, 1),
    ];
    let mut b = config(2, LevelType::Level2);
    b.circuits = vec![
        circuit(1, Medium::PointToPoint, 1),
        circuit(2, Medium::PointToPoint, 1),
    ];
    let mut c = b.clone();
    c.system_id = system_id(3);
    c.hostname = Some("r3".into());
    let mut d = config(4, LevelType::Level2);
    let mut stub = circuit(3, Medium::PointToPoint, 1);
    stub.prefixes = vec![prefix("10.4.0.0/16")];
    d.circuits = vec![
        circuit(1, Medium::PointToPoint, 1),
        circuit(2, Medium::PointToPoint, 1),
        stub,
    ];

    let mut network = Network::new(
        vec![a, b, c, d],
        vec![
            vec![(0, 1), (1, 1)],
            vec![(0, 2), (2, 1)],
            vec![(1, 2), (3, 1)],
            vec![(2, 2), (3, 2)],
        ],
        3,
    );
    network.converge();
    network.assert_synchronized(Level::L2);
    network.run_spf();

    let routes = network.router(0).routes();
    let route = routes
        .get(&prefix("10.4.0.0/16"))
        .expect("Prefix of D is routed; qed");
    assert_eq!(route.cost, Metric::new(3));
    let neighbors = route
        .next_hops
        .iter()
        .map(|h| h.neighbor)
        .collect::<BTreeSet<_>>();
    assert_eq!(neighbors, BTreeSet::from([system_id(2), system_id(3)]));
}

#[test]
fn overloaded_router_is_not_transited() {
    let mut network = triangle(11);
    network.converge();
    network.router(1).set_overload(true);
    network.deliver();
    network.assert_synchronized(Level::L2);
    network.run_spf();

    let tree = network
        .router(0)
        .shortest_path_tree(Level::L2)
        .expect("SPF ran; qed");
    // B is still reachable itself, C is now reached over the direct link.
    assert_eq!(
        tree.node(&system_id(2)).map(|p| p.cost),
        Some(Metric::new(1))
    );
    let to_c = tree.node(&system_id(3)).expect("C is reachable; qed");
    assert_eq!(to_c.cost, Metric::new(5));
    assert_eq!(to_c.next_hops, BTreeSet::from([system_id(3)]));
}

#[test]
fn level_1_router_gets_default_route() {
    // A is level 1 only, B is level 1 and 2 with a level 2 neighbor C.
    let mut a = config(1, LevelType::Level1);
    a.circuits = vec![circuit(1, Medium::PointToPoint, 1)];
    let mut b = config(2, LevelType::Level12);
    b.circuits = vec![
        circuit(1, Medium::PointToPoint, 1),
        circuit(2, Medium::PointToPoint, 1),
    ];
    let mut c = config(3, LevelType::Level2);
    c.area_addresses = vec!["49.0002".parse().expect("Valid area; qed")];
    c.circuits = vec![circuit(1, Medium::PointToPoint, 1)];

    let mut network = Network::new(
        vec![a, b, c],
        vec![vec![(0, 1), (1, 1)], vec![(1, 2), (2, 1)]],
        5,
    );
    network.converge();
    network.assert_synchronized(Level::L1);
    network.assert_synchronized(Level::L2);

    let b_l1 = LspId::new(LanId::router(system_id(2)), 0);
    let lsp = network
        .router(0)
        .lsdb(Level::L1)
        .get(&b_l1)
        .expect("A has the level 1 LSP of B; qed");
    assert!(lsp.lsp().flags.attached());

    network.run_spf();
    let routes = network.router(0).routes();
    let default = routes
        .lookup("192.0.2.1".parse().expect("Valid address; qed"))
        .expect("Default route exists; qed");
    assert_eq!(default.prefix, prefix("0.0.0.0/0"));
    assert_eq!(default.next_hops[0].neighbor, system_id(2));
}

#[test]
fn concurrent_levels_publish_both() {
    // A is level 1 with a prefix, C is level 2 with a prefix, B takes part in both levels and
    // computes its levels on separate threads.
    for seed in 0..20 {
        let mut a = config(1, LevelType::Level1);
        let mut stub = circuit(2, Medium::PointToPoint, 1);
        stub.prefixes = vec![prefix("10.1.0.0/24")];
        a.circuits = vec![circuit(1, Medium::PointToPoint, 1), stub];
        let mut b = config(2, LevelType::Level12);
        b.circuits = vec![
            circuit(1, Medium::PointToPoint, 1),
            circuit(2, Medium::PointToPoint, 1),
        ];
        let mut c = config(3, LevelType::Level2);
        c.area_addresses = vec!["49.0002".parse().expect("Valid area; qed")];
        let mut stub = circuit(2, Medium::PointToPoint, 1);
        stub.prefixes = vec![prefix("10.3.0.0/24")];
        c.circuits = vec![circuit(1, Medium::PointToPoint, 1), stub];

        let mut network = Network::new(
            vec![a, b, c],
            vec![vec![(0, 1), (1, 1)], vec![(1, 2), (2, 1)]],
            seed,
        );
        network.converge();

        let barrier = Arc::new(Barrier::new(2));
        let handles = [Level::L1, Level::L2].map(|level| {
            let router = network.router(1).clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                router.run_spf(level);
            })
        });
        for handle in handles {
            handle.join().expect("SPF thread doesn't panic; qed");
        }

        let routes = network.router(1).routes();
        assert_eq!(
            routes.get(&prefix("10.1.0.0/24")).map(|r| r.level),
            Some(Level::L1)
        );
        assert_eq!(
            routes.get(&prefix("10.3.0.0/24")).map(|r| r.level),
            Some(Level::L2)
        );
    }
}
