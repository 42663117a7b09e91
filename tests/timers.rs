mod common;

use std::time::Duration;

use common::{circuit, config, prefix, system_id, Network};
use futures::StreamExt;
use isis::{
    circuit::{CircuitId, Medium},
    level::{Level, LevelType},
    metrics::NoMetrics,
    pdu::{self, tlv::TlvsExt, Pdu},
    system_id::{LanId, LspId},
    Router,
};

fn pair(seed: u64) -> Network {
    let mut a = config(1, LevelType::Level2);
    a.circuits = vec![circuit(1, Medium::PointToPoint, 10)];
    let mut b = config(2, LevelType::Level2);
    let mut stub = circuit(2, Medium::PointToPoint, 10);
    stub.prefixes = vec![prefix("10.2.0.0/24")];
    b.circuits = vec![circuit(1, Medium::PointToPoint, 10), stub];
    Network::new(vec![a, b], vec![vec![(0, 1), (1, 1)]], seed)
}

fn own_lsp(network: &Network, n: usize) -> (u32, usize) {
    let id = LspId::new(LanId::router(system_id(n as u8 + 1)), 0);
    let lsp = network
        .router(n)
        .lsdb(Level::L2)
        .get(&id)
        .expect("Own LSP exists; qed");
    (lsp.seqno().into(), lsp.lsp().tlvs.is_reach().len())
}

#[tokio::test(start_paused = true)]
async fn hold_timer_expiry_reoriginates() {
    let mut network = pair(1);
    network.converge();
    assert_eq!(network.router(0).adjacencies(CircuitId::new(1)).len(), 1);
    let (seqno, neighbors) = own_lsp(&network, 0);
    assert_eq!(neighbors, 1);

    // B goes silent.
    network.muted.push(1);
    tokio::time::advance(Duration::from_secs(20)).await;
    network.router(0).check_hold_timers();
    assert_eq!(network.router(0).adjacencies(CircuitId::new(1)).len(), 1);

    tokio::time::advance(Duration::from_secs(11)).await;
    network.router(0).check_hold_timers();
    assert!(network.router(0).adjacencies(CircuitId::new(1)).is_empty());

    let (new_seqno, neighbors) = own_lsp(&network, 0);
    assert!(new_seqno > seqno);
    assert_eq!(neighbors, 0);
    assert!(network.router(0).spf_pending(Level::L2));
}

#[tokio::test]
async fn zero_hold_time_tears_down_immediately() {
    let mut network = pair(2);
    network.converge();
    network.run_spf();
    assert!(network
        .router(0)
        .routes()
        .get(&prefix("10.2.0.0/24"))
        .is_some());

    assert!(network.router(1).set_circuit_enabled(CircuitId::new(1), false));
    network.deliver();
    assert!(network.router(0).adjacencies(CircuitId::new(1)).is_empty());
    assert_eq!(own_lsp(&network, 0).1, 0);

    network.run_spf();
    assert!(network.router(0).routes().is_empty());
}

#[tokio::test]
async fn unknown_circuit_is_rejected() {
    let network = pair(3);
    assert!(!network.router(0).set_circuit_enabled(CircuitId::new(9), false));
}

#[tokio::test]
async fn route_subscribers_see_convergence() {
    let mut network = pair(4);
    let mut routes = network.router(0).subscribe_routes();
    let initial = routes.next().await.expect("Current set is yielded; qed");
    assert!(initial.is_empty());

    network.converge();
    network.run_spf();
    let published = routes.next().await.expect("New set is published; qed");
    assert_eq!(published.len(), 1);
    assert!(published.get(&prefix("10.2.0.0/24")).is_some());
}

#[tokio::test(start_paused = true)]
async fn spawned_tasks_run_protocol() {
    let mut config = config(1, LevelType::Level2);
    config.circuits = vec![circuit(1, Medium::PointToPoint, 10)];
    let (router, mut outbound) = Router::new(config, NoMetrics).expect("Valid config; qed");

    let tasks = router.spawn_tasks();
    assert!(!tasks.is_empty());

    tokio::time::sleep(Duration::from_secs(25)).await;

    // Hellos are sent about every 10 seconds.
    let mut hellos = 0;
    while let Ok(out) = outbound.try_recv() {
        if let Ok(Pdu::P2pHello(hello)) = pdu::decode(&out.pdu) {
            assert_eq!(hello.source, system_id(1));
            hellos += 1;
        }
    }
    assert!((2..=4).contains(&hellos));

    // The initial origination scheduled a shortest path computation.
    assert!(router.shortest_path_tree(Level::L2).is_some());
    assert!(!router.spf_pending(Level::L2));

    drop(tasks);
    tokio::task::yield_now().await;
}
