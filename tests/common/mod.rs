//! Shared test topology
//!
//! Builds a zone/rack/host cluster: for every (host, rack) one store per
//! zone is added, followed by a batch of regions with one voter on each of
//! those stores. Every region therefore starts fully isolated across zones.
//! Load is skewed by store ID unless `uniform_load` is set.

#![allow(dead_code)]

use region_balancer::{
    BalanceRegionScheduler, ClusterSnapshot, ClusterView, LabelConstraint, LabelOp,
    OperatorController, OperatorLimits, Peer, PlacementRule, Region, ReplicationConfig,
    SchedulerConfig, Store, StoreState,
};
use std::sync::Arc;

pub const ZONES: [&str; 3] = ["az1", "az2", "az3"];
pub const RACKS: [&str; 3] = ["rack1", "rack2", "rack3"];
pub const STORE_CAPACITY_MB: u64 = 1_000_000;
pub const REGION_SIZE_MB: u64 = 10;
pub const COLUMNAR_ENGINE: &str = "tiflash";

#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    hosts: usize,
    regions_per_rack: usize,
    labels: bool,
    columnar_stores: usize,
    tombstones: bool,
    uniform_load: bool,
}

/// 3 zones × 3 racks × 3 hosts, 10 regions per (host, rack)
pub fn topology() -> TopologyBuilder {
    TopologyBuilder {
        hosts: 3,
        regions_per_rack: 10,
        labels: false,
        columnar_stores: 0,
        tombstones: false,
        uniform_load: false,
    }
}

impl TopologyBuilder {
    pub fn hosts(mut self, hosts: usize) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn regions_per_rack(mut self, regions: usize) -> Self {
        self.regions_per_rack = regions;
        self
    }

    /// Label stores with az/rack/host and isolate replicas by zone
    pub fn with_labels(mut self) -> Self {
        self.labels = true;
        self
    }

    /// Add columnar stores, a learner replica per region and the rules
    /// placing it
    pub fn with_columnar(mut self, stores: usize) -> Self {
        self.columnar_stores = stores;
        self
    }

    /// Retire the first two thirds of the general stores
    pub fn with_tombstones(mut self) -> Self {
        self.tombstones = true;
        self
    }

    /// Give every general store the same used space
    pub fn uniform_load(mut self) -> Self {
        self.uniform_load = true;
        self
    }

    pub fn general_store_count(&self) -> u64 {
        (self.hosts * RACKS.len() * ZONES.len()) as u64
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        let general = self.general_store_count();
        let mut stores = Vec::new();
        let mut regions = Vec::new();
        let mut store_id = 0u64;
        let mut region_id = 0u64;

        for host in 1..=self.hosts {
            for rack in RACKS {
                for zone in ZONES {
                    store_id += 1;
                    let used = if self.uniform_load { 1_000 } else { store_id * 1_000 };
                    let mut store = Store::new(store_id, STORE_CAPACITY_MB, used);
                    if self.labels {
                        store = store
                            .with_label("az", zone)
                            .with_label("rack", rack)
                            .with_label("host", format!("host{}", host));
                    }
                    stores.push(store);
                }

                for _ in 0..self.regions_per_rack {
                    region_id += 1;
                    let mut peers = vec![
                        Peer::voter(store_id - 2),
                        Peer::voter(store_id - 1),
                        Peer::voter(store_id),
                    ];
                    if self.columnar_stores > 0 {
                        let columnar = general + 1 + region_id % self.columnar_stores as u64;
                        peers.push(Peer::learner(columnar));
                    }
                    regions.push(Region::new(region_id, REGION_SIZE_MB, peers));
                }
            }
        }

        for i in 0..self.columnar_stores as u64 {
            let id = general + 1 + i;
            stores.push(
                Store::new(id, STORE_CAPACITY_MB, (i + 1) * 5_000)
                    .with_label("engine", COLUMNAR_ENGINE)
                    .with_label("host", format!("columnar{}", i + 1)),
            );
        }

        if self.tombstones {
            let retired = general * 2 / 3;
            for store in stores.iter_mut().filter(|s| s.id.0 <= retired) {
                store.state = StoreState::Tombstone;
            }
        }

        let replication = if self.labels {
            ReplicationConfig {
                max_replicas: 3,
                location_labels: vec!["az".into(), "rack".into(), "host".into()],
                isolation_level: "az".into(),
            }
        } else {
            ReplicationConfig::default()
        };

        let rules = if self.columnar_stores > 0 {
            let mut voters = PlacementRule::voters("pd", "default", 3);
            if self.labels {
                voters = voters
                    .with_location_labels(&["az", "rack", "host"])
                    .with_isolation_level("az");
            }
            vec![
                voters,
                PlacementRule::learners("tiflash-override", "learner-replica", 1)
                    .with_constraint(LabelConstraint::new(
                        "engine",
                        LabelOp::In,
                        &[COLUMNAR_ENGINE],
                    ))
                    .with_location_labels(&["host"]),
            ]
        } else {
            Vec::new()
        };

        ClusterSnapshot {
            replication,
            stores,
            regions,
            rules,
        }
    }

    pub fn build(&self) -> ClusterView {
        self.snapshot()
            .into_view(1)
            .expect("topology snapshot must be valid")
    }
}

/// Scheduler config matching the topology: rules on when columnar stores
/// exist
pub fn scheduler_config(rules: bool) -> SchedulerConfig {
    SchedulerConfig {
        placement_rules_enabled: rules,
        ..Default::default()
    }
}

pub fn controller(limits: OperatorLimits) -> Arc<OperatorController> {
    OperatorController::new(limits).expect("valid limits")
}

pub fn scheduler(
    config: SchedulerConfig,
    controller: Arc<OperatorController>,
) -> BalanceRegionScheduler {
    BalanceRegionScheduler::new(config, controller).expect("valid scheduler config")
}

/// Stores with the given used space, one single-replica region each
pub fn flat_cluster(used_mb: &[u64]) -> ClusterView {
    let stores = used_mb
        .iter()
        .enumerate()
        .map(|(i, used)| Store::new(i as u64 + 1, 1_000, *used));
    let regions = (1..=used_mb.len() as u64).map(|id| Region::new(id, 1, vec![Peer::voter(id)]));

    ClusterView::builder()
        .replication(ReplicationConfig {
            max_replicas: 1,
            ..Default::default()
        })
        .stores(stores)
        .regions(regions)
        .build()
        .expect("flat cluster must be valid")
}
