//! Distribution of nodes and seeds over the racks of a datacenter.
use snafu::{Snafu, ensure};

use crate::crd::DseRack;

/// Seeds per datacenter when there are at most three racks.
///
/// Two would be enough for a single datacenter, but from here it is not
/// possible to tell whether the datacenter is part of a multi-datacenter
/// cluster.
const DEFAULT_SEED_COUNT: i32 = 3;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("the datacenter does not declare any racks"))]
    NoRacks,
}

/// Desired size of a single rack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RackInformation {
    pub rack_name: String,
    pub node_count: i32,
    pub seed_count: i32,
}

/// Number of seeds for a datacenter with `node_count` nodes in `rack_count` racks.
///
/// All nodes are seeds if there are fewer than three of them; with more than
/// three racks every rack gets one seed; otherwise there are three seeds.
pub fn seed_count(node_count: i32, rack_count: i32) -> i32 {
    if node_count < DEFAULT_SEED_COUNT {
        node_count
    } else if rack_count > DEFAULT_SEED_COUNT {
        rack_count
    } else {
        DEFAULT_SEED_COUNT
    }
}

/// Calculates how many nodes and seeds each rack should run.
///
/// Nodes are split evenly, the first `node_count % racks.len()` racks (in
/// declaration order) get one extra node. Seeds are split the same way.
/// Callers pass `0` as `node_count` for parked datacenters.
pub fn calculate_rack_information(
    node_count: u16,
    racks: &[DseRack],
) -> Result<Vec<RackInformation>, Error> {
    ensure!(!racks.is_empty(), NoRacksSnafu);

    let node_count = i32::from(node_count);
    let rack_count = i32::try_from(racks.len()).unwrap_or(i32::MAX);
    let seed_count = seed_count(node_count, rack_count);

    let (nodes_per_rack, extra_nodes) = (node_count / rack_count, node_count % rack_count);
    let (seeds_per_rack, extra_seeds) = (seed_count / rack_count, seed_count % rack_count);

    Ok((0..)
        .zip(racks)
        .map(|(rack_index, rack)| RackInformation {
            rack_name: rack.name.clone(),
            node_count: nodes_per_rack + i32::from(rack_index < extra_nodes),
            seed_count: seeds_per_rack + i32::from(rack_index < extra_seeds),
        })
        .collect())
}
