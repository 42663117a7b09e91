mod common;

use common::{circuit, config, prefix, system_id, Network};
use isis::{
    circuit::{CircuitId, Medium},
    level::{Level, LevelType},
    metric::Metric,
    pdu::tlv::TlvsExt,
    system_id::{LanId, LspId},
    Config,
};

const LAN: CircuitId = CircuitId::new(1);

fn lan_router(n: u8, priority: u8, enabled: bool) -> Config {
    let mut config = config(n, LevelType::Level2);
    let mut lan = circuit(1, Medium::Broadcast, 10);
    lan.priority = priority;
    lan.enabled = enabled;
    let mut stub = circuit(2, Medium::PointToPoint, 10);
    stub.prefixes = vec![prefix(&format!("10.{n}.0.0/24"))];
    config.circuits = vec![lan, stub];
    config
}

fn pseudonode(n: u8) -> LspId {
    LspId::new(LanId::new(system_id(n), LAN.get()), 0)
}

#[test]
fn designated_router_is_preempted() {
    let mut network = Network::new(
        vec![
            lan_router(1, 10, true),
            lan_router(2, 20, true),
            lan_router(3, 30, false),
        ],
        vec![vec![(0, 1), (1, 1), (2, 1)]],
        42,
    );
    network.converge();

    for n in 0..2 {
        let dis = network.router(n).dis(LAN, Level::L2).expect("Circuit exists; qed");
        assert_eq!(dis.elected, Some(system_id(2)));
        assert_eq!(dis.lan_id, Some(LanId::new(system_id(2), LAN.get())));
    }
    // The third router is disabled and sees nobody.
    assert!(network.router(2).adjacencies(LAN).is_empty());

    let lsp = network
        .router(0)
        .lsdb(Level::L2)
        .get(&pseudonode(2))
        .expect("Pseudonode LSP is flooded; qed");
    let mut members = lsp
        .lsp()
        .tlvs
        .is_reach()
        .iter()
        .map(|r| (r.neighbor().system_id(), r.metric()))
        .collect::<Vec<_>>();
    members.sort();
    assert_eq!(
        members,
        vec![(system_id(1), Metric::ZERO), (system_id(2), Metric::ZERO)]
    );

    // A better candidate shows up and takes over.
    assert!(network.router(2).set_circuit_enabled(LAN, true));
    network.converge();
    for n in 0..3 {
        let dis = network.router(n).dis(LAN, Level::L2).expect("Circuit exists; qed");
        assert_eq!(dis.elected, Some(system_id(3)));
    }
    network.assert_synchronized(Level::L2);

    let old = network
        .router(0)
        .lsdb(Level::L2)
        .get(&pseudonode(2))
        .expect("Purge is held; qed");
    assert!(old.is_purge());
    let new = network
        .router(0)
        .lsdb(Level::L2)
        .get(&pseudonode(3))
        .expect("New pseudonode LSP is flooded; qed");
    assert!(!new.is_purge());
    assert_eq!(new.lsp().tlvs.is_reach().len(), 3);
}

#[test]
fn routes_across_lan() {
    let mut network = Network::new(
        vec![
            lan_router(1, 64, true),
            lan_router(2, 64, true),
            lan_router(3, 64, true),
        ],
        vec![vec![(0, 1), (1, 1), (2, 1)]],
        9,
    );
    network.converge();
    network.assert_synchronized(Level::L2);
    network.run_spf();

    // Equal priorities, the highest system id wins.
    assert_eq!(
        network.router(0).dis(LAN, Level::L2).and_then(|d| d.elected),
        Some(system_id(3))
    );

    let routes = network.router(0).routes();
    for n in [2, 3] {
        let route = routes
            .get(&prefix(&format!("10.{n}.0.0/24")))
            .expect("Prefix of LAN neighbor is routed; qed");
        // LAN circuit metric, free hop out of the pseudonode, stub metric.
        assert_eq!(route.cost, Metric::new(20));
        assert_eq!(route.next_hops.len(), 1);
        assert_eq!(route.next_hops[0].circuit, LAN);
        assert_eq!(route.next_hops[0].neighbor, system_id(n));
    }
    assert_eq!(routes.len(), 2);
}

#[test]
fn equal_cost_paths_over_lan_and_point_to_point() {
    // 1 reaches 2 over a LAN at 5, and over a link to 3 at 4 plus the LAN of 2 and 3 at 1.
    let mut r1 = config(1, LevelType::Level2);
    r1.circuits = vec![
        circuit(1, Medium::Broadcast, 5),
        circuit(2, Medium::PointToPoint, 4),
    ];
    let mut r2 = config(2, LevelType::Level2);
    let mut stub = circuit(3, Medium::PointToPoint, 1);
    stub.prefixes = vec![prefix("10.2.0.0/24")];
    r2.circuits = vec![
        circuit(1, Medium::Broadcast, 5),
        circuit(2, Medium::Broadcast, 1),
        stub,
    ];
    let mut r3 = config(3, LevelType::Level2);
    r3.circuits = vec![
        circuit(1, Medium::PointToPoint, 4),
        circuit(2, Medium::Broadcast, 1),
    ];

    let mut network = Network::new(
        vec![r1, r2, r3],
        vec![
            vec![(0, 1), (1, 1)],
            vec![(1, 2), (2, 2)],
            vec![(0, 2), (2, 1)],
        ],
        17,
    );
    network.converge();
    network.assert_synchronized(Level::L2);
    network.run_spf();

    let tree = network
        .router(0)
        .shortest_path_tree(Level::L2)
        .expect("SPF ran; qed");
    let to_2 = tree.node(&system_id(2)).expect("2 is reachable; qed");
    assert_eq!(to_2.cost, Metric::new(5));
    assert_eq!(to_2.next_hops.len(), 2);

    let routes = network.router(0).routes();
    let route = routes
        .get(&prefix("10.2.0.0/24"))
        .expect("Prefix of 2 is routed; qed");
    assert_eq!(route.cost, Metric::new(6));
    let mut hops = route
        .next_hops
        .iter()
        .map(|h| (h.circuit, h.neighbor))
        .collect::<Vec<_>>();
    hops.sort();
    assert_eq!(
        hops,
        vec![
            (CircuitId::new(1), system_id(2)),
            (CircuitId::new(2), system_id(3)),
        ]
    );
}
