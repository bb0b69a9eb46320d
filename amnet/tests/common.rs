//! Common test utilities for amnet integration tests.

#![allow(dead_code)]

use amnet::{AmConfig, Cluster, Endpoint};

/// Two ranks on distinct hosts, so every message crosses the network
/// core.
pub fn net_pair() -> (Cluster, Endpoint, Endpoint) {
    net_pair_with(AmConfig::default())
}

pub fn net_pair_with(config: AmConfig) -> (Cluster, Endpoint, Endpoint) {
    let cluster = Cluster::builder()
        .ranks(2)
        .hosts(&[0, 1])
        .config(config)
        .build()
        .expect("cluster");
    let ep0 = cluster.create_endpoint(0).expect("endpoint 0");
    let ep1 = cluster.create_endpoint(1).expect("endpoint 1");
    (cluster, ep0, ep1)
}

/// Two ranks sharing one host, so every message takes the mailbox
/// fast path.
pub fn nbrhd_pair() -> (Cluster, Endpoint, Endpoint) {
    nbrhd_pair_with(AmConfig::default())
}

pub fn nbrhd_pair_with(config: AmConfig) -> (Cluster, Endpoint, Endpoint) {
    let cluster = Cluster::builder()
        .ranks(2)
        .hosts(&[0, 0])
        .config(config)
        .build()
        .expect("cluster");
    let ep0 = cluster.create_endpoint(0).expect("endpoint 0");
    let ep1 = cluster.create_endpoint(1).expect("endpoint 1");
    (cluster, ep0, ep1)
}

/// Polls `ep` until `done` reports true. Single-threaded tests settle
/// within a poll or two; the bound only exists to turn a logic bug
/// into a panic instead of a hang.
pub fn poll_until(ep: &Endpoint, done: impl Fn() -> bool, what: &str) {
    for _ in 0..100_000 {
        if done() {
            return;
        }
        ep.poll();
        std::hint::spin_loop();
    }
    panic!("timed out waiting for {}", what);
}
