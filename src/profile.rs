// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Port model and VL-ID map.
//!
//! Static tables for the two shipped topologies. Poll-mode ports 0-7 carry
//! four VLAN flows each; raw-socket ports 12-13 (plus 14-15 in ATE) carry
//! multi-target flows over kernel interfaces. VL-ID blocks are contiguous
//! runs of 128 per queue on poll ports; raw and external flows use the
//! narrower (and, in window-pacing mode, non-contiguous) blocks below.
//!
//! Everything here is immutable after `Profile::load`.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// VL-IDs per poll-mode queue block.
pub const VL_BLOCK_LEN: u16 = 128;

/// VLAN flows (and thus VL blocks) per poll-mode port.
pub const FLOWS_PER_PORT: usize = 4;

/// Poll-mode ports driving the fabric.
pub const POLL_PORT_COUNT: u16 = 8;

/// Reserved VL range for latency probes: one slot per (port, vlan).
pub const LATENCY_VL_BASE: u16 = 4600;

/// Which static table set to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// Production wiring through the switch fabric.
    Normal,
    /// Back-to-back pairs for bench validation.
    Ate,
}

/// Port speed class for rate selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortClass {
    Fast,
    Mid,
    Slow,
}

/// A possibly non-contiguous VL-ID block.
///
/// `nth(i) = start + (i / block_size) * step + (i % block_size)`; contiguous
/// blocks have `step == block_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlBlock {
    pub start: u16,
    pub count: u16,
    pub block_size: u16,
    pub step: u16,
}

impl VlBlock {
    pub const fn contiguous(start: u16, count: u16) -> Self {
        Self {
            start,
            count,
            block_size: count,
            step: count,
        }
    }

    pub const fn strided(start: u16, count: u16, block_size: u16, step: u16) -> Self {
        Self {
            start,
            count,
            block_size,
            step,
        }
    }

    #[inline]
    pub fn nth(&self, i: u16) -> u16 {
        debug_assert!(i < self.count);
        self.start + (i / self.block_size) * self.step + (i % self.block_size)
    }

    pub fn contains(&self, vl_id: u16) -> bool {
        if vl_id < self.start {
            return false;
        }
        let offset = vl_id - self.start;
        let stride_index = offset / self.step;
        let within = offset % self.step;
        within < self.block_size
            && stride_index * self.block_size + within < self.count
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.count).map(|i| self.nth(i))
    }
}

/// One poll-mode port's VLAN and VL-ID assignment.
#[derive(Debug, Clone, Copy)]
pub struct PollPortProfile {
    pub port_id: u16,
    /// 802.1Q tags stamped on generated flows, one per queue slot.
    pub tx_vlans: [u16; FLOWS_PER_PORT],
    /// Tags expected back, steering 1:1 onto RX queues.
    pub rx_vlans: [u16; FLOWS_PER_PORT],
    /// First VL-ID of each 128-wide TX block.
    pub tx_vl_ids: [u16; FLOWS_PER_PORT],
    /// First VL-ID of each 128-wide block expected on receive.
    pub rx_vl_ids: [u16; FLOWS_PER_PORT],
}

/// External flow a poll-mode worker additionally emits toward a raw port.
#[derive(Debug, Clone, Copy)]
pub struct ExtTxTarget {
    pub queue_id: u16,
    pub vlan_id: u16,
    pub vl: VlBlock,
    pub rate_mbps: u32,
}

#[derive(Debug, Clone)]
pub struct ExtTxProfile {
    pub port_id: u16,
    pub dest_port: u16,
    pub targets: Vec<ExtTxTarget>,
}

/// One independent flow out of a raw-socket port.
#[derive(Debug, Clone, Copy)]
pub struct RawTxTarget {
    pub dest_port: u16,
    pub rate_mbps: u32,
    pub vl: VlBlock,
}

/// Accepted origin for validation on receive.
#[derive(Debug, Clone, Copy)]
pub struct RxSource {
    pub source_port: u16,
    pub vl: VlBlock,
}

#[derive(Debug, Clone)]
pub struct RawPortProfile {
    pub port_id: u16,
    pub interface: &'static str,
    pub is_1g: bool,
    pub tx_targets: Vec<RawTxTarget>,
    pub rx_sources: Vec<RxSource>,
}

/// Complete loaded port map for one run.
pub struct Profile {
    pub topology: Topology,
    pub window_mode: bool,
    pub poll_ports: Vec<PollPortProfile>,
    pub raw_ports: Vec<RawPortProfile>,
    pub ext_tx: Vec<ExtTxProfile>,
}

const NORMAL_POLL_PORTS: [PollPortProfile; 8] = [
    PollPortProfile {
        port_id: 0,
        tx_vlans: [105, 106, 107, 108],
        rx_vlans: [253, 254, 255, 256],
        tx_vl_ids: [1027, 1155, 1283, 1411],
        rx_vl_ids: [3587, 3715, 3843, 3971],
    },
    PollPortProfile {
        port_id: 1,
        tx_vlans: [109, 110, 111, 112],
        rx_vlans: [249, 250, 251, 252],
        tx_vl_ids: [1539, 1667, 1795, 1923],
        rx_vl_ids: [3075, 3203, 3331, 3459],
    },
    PollPortProfile {
        port_id: 2,
        tx_vlans: [97, 98, 99, 100],
        rx_vlans: [245, 246, 247, 248],
        tx_vl_ids: [3, 131, 259, 387],
        rx_vl_ids: [2563, 2691, 2819, 2947],
    },
    PollPortProfile {
        port_id: 3,
        tx_vlans: [101, 102, 103, 104],
        rx_vlans: [241, 242, 243, 244],
        tx_vl_ids: [515, 643, 771, 899],
        rx_vl_ids: [2051, 2179, 2307, 2435],
    },
    PollPortProfile {
        port_id: 4,
        tx_vlans: [113, 114, 115, 116],
        rx_vlans: [229, 230, 231, 232],
        tx_vl_ids: [2051, 2179, 2307, 2435],
        rx_vl_ids: [515, 643, 771, 899],
    },
    PollPortProfile {
        port_id: 5,
        tx_vlans: [117, 118, 119, 120],
        rx_vlans: [225, 226, 227, 228],
        tx_vl_ids: [2563, 2691, 2819, 2947],
        rx_vl_ids: [3, 131, 259, 387],
    },
    PollPortProfile {
        port_id: 6,
        tx_vlans: [121, 122, 123, 124],
        rx_vlans: [237, 238, 239, 240],
        tx_vl_ids: [3075, 3203, 3331, 3459],
        rx_vl_ids: [1539, 1667, 1795, 1923],
    },
    PollPortProfile {
        port_id: 7,
        tx_vlans: [125, 126, 127, 128],
        rx_vlans: [233, 234, 235, 236],
        tx_vl_ids: [3587, 3715, 3843, 3971],
        rx_vl_ids: [1027, 1155, 1283, 1411],
    },
];

const ATE_POLL_PORTS: [PollPortProfile; 8] = [
    PollPortProfile {
        port_id: 0,
        tx_vlans: [105, 106, 107, 108],
        rx_vlans: [237, 238, 239, 240],
        tx_vl_ids: [1027, 1155, 1283, 1411],
        rx_vl_ids: [1539, 1667, 1795, 1923],
    },
    PollPortProfile {
        port_id: 1,
        tx_vlans: [109, 110, 111, 112],
        rx_vlans: [233, 234, 235, 236],
        tx_vl_ids: [1539, 1667, 1795, 1923],
        rx_vl_ids: [1027, 1155, 1283, 1411],
    },
    PollPortProfile {
        port_id: 2,
        tx_vlans: [97, 98, 99, 100],
        rx_vlans: [229, 230, 231, 232],
        tx_vl_ids: [3, 131, 259, 387],
        rx_vl_ids: [515, 643, 771, 899],
    },
    PollPortProfile {
        port_id: 3,
        tx_vlans: [101, 102, 103, 104],
        rx_vlans: [225, 226, 227, 228],
        tx_vl_ids: [515, 643, 771, 899],
        rx_vl_ids: [3, 131, 259, 387],
    },
    PollPortProfile {
        port_id: 4,
        tx_vlans: [113, 114, 115, 116],
        rx_vlans: [245, 246, 247, 248],
        tx_vl_ids: [2051, 2179, 2307, 2435],
        rx_vl_ids: [2563, 2691, 2819, 2947],
    },
    PollPortProfile {
        port_id: 5,
        tx_vlans: [117, 118, 119, 120],
        rx_vlans: [241, 242, 243, 244],
        tx_vl_ids: [2563, 2691, 2819, 2947],
        rx_vl_ids: [2051, 2179, 2307, 2435],
    },
    PollPortProfile {
        port_id: 6,
        tx_vlans: [121, 122, 123, 124],
        rx_vlans: [253, 254, 255, 256],
        tx_vl_ids: [3075, 3203, 3331, 3459],
        rx_vl_ids: [3587, 3715, 3843, 3971],
    },
    PollPortProfile {
        port_id: 7,
        tx_vlans: [125, 126, 127, 128],
        rx_vlans: [249, 250, 251, 252],
        tx_vl_ids: [3587, 3715, 3843, 3971],
        rx_vl_ids: [3075, 3203, 3331, 3459],
    },
];

/// TX port → the poll port that receives its traffic back from the fabric.
const NORMAL_PEER: [u16; 8] = [7, 6, 5, 4, 3, 2, 1, 0];
/// ATE: back-to-back pairs.
const ATE_PEER: [u16; 8] = [1, 0, 3, 2, 5, 4, 7, 6];

impl Profile {
    pub fn load(topology: Topology, window_mode: bool) -> Self {
        let poll_ports = match topology {
            Topology::Normal => NORMAL_POLL_PORTS.to_vec(),
            Topology::Ate => ATE_POLL_PORTS.to_vec(),
        };
        let raw_ports = match topology {
            Topology::Normal => normal_raw_ports(window_mode),
            Topology::Ate => ate_raw_ports(),
        };
        let ext_tx = match topology {
            Topology::Normal => normal_ext_tx(window_mode),
            // ATE loops raw ports back-to-back; poll ports carry no
            // external flows.
            Topology::Ate => Vec::new(),
        };
        Self {
            topology,
            window_mode,
            poll_ports,
            raw_ports,
            ext_tx,
        }
    }

    pub fn poll_port(&self, port_id: u16) -> Option<&PollPortProfile> {
        self.poll_ports.iter().find(|p| p.port_id == port_id)
    }

    pub fn raw_port(&self, port_id: u16) -> Option<&RawPortProfile> {
        self.raw_ports.iter().find(|p| p.port_id == port_id)
    }

    pub fn ext_tx_for_port(&self, port_id: u16) -> Option<&ExtTxProfile> {
        self.ext_tx.iter().find(|p| p.port_id == port_id)
    }

    /// The poll port that receives `tx_port`'s fabric traffic.
    pub fn peer_rx_port(&self, tx_port: u16) -> Option<u16> {
        let table = match self.topology {
            Topology::Normal => &NORMAL_PEER,
            Topology::Ate => &ATE_PEER,
        };
        table.get(tx_port as usize).copied()
    }

    /// Speed class; ports not called out as fast or mid run slow.
    pub fn port_class(&self, port_id: u16) -> PortClass {
        match port_id {
            1 | 7 | 8 => PortClass::Fast,
            2 | 3 | 4 | 5 => PortClass::Mid,
            _ => PortClass::Slow,
        }
    }

    /// Accepted (source, VL block) set for a poll port's RX workers.
    pub fn rx_sources_for_poll_port(&self, port_id: u16) -> Vec<RxSource> {
        let mut sources = Vec::new();
        let Some(port) = self.poll_port(port_id) else {
            return sources;
        };
        // Fabric loopback from the peer poll port.
        if let Some(src) = self
            .poll_ports
            .iter()
            .find(|p| self.peer_rx_port(p.port_id) == Some(port_id))
        {
            debug_assert_eq!(src.tx_vl_ids, port.rx_vl_ids);
            for base in src.tx_vl_ids {
                sources.push(RxSource {
                    source_port: src.port_id,
                    vl: VlBlock::contiguous(base, VL_BLOCK_LEN),
                });
            }
        }
        // Raw-socket targets aimed at this poll port.
        for raw in &self.raw_ports {
            for target in &raw.tx_targets {
                if target.dest_port == port_id {
                    sources.push(RxSource {
                        source_port: raw.port_id,
                        vl: target.vl,
                    });
                }
            }
        }
        sources
    }

    /// Recover the sender's queue (the PRBS cache key) from a VL-ID.
    pub fn source_queue_for_vl(&self, source_port: u16, vl_id: u16) -> Option<u16> {
        if let Some(port) = self.poll_port(source_port) {
            for (q, &base) in port.tx_vl_ids.iter().enumerate() {
                if (base..base + VL_BLOCK_LEN).contains(&vl_id) {
                    return Some(q as u16);
                }
            }
            if let Some(ext) = self.ext_tx_for_port(source_port) {
                for target in &ext.targets {
                    if target.vl.contains(vl_id) {
                        return Some(target.queue_id);
                    }
                }
            }
            return None;
        }
        // Raw ports are single-queue.
        self.raw_port(source_port).and_then(|raw| {
            raw.tx_targets
                .iter()
                .any(|t| t.vl.contains(vl_id))
                .then_some(0)
        })
    }

    /// Latency probe VL for a (port, vlan-slot) pair.
    pub fn latency_vl(&self, port_id: u16, vlan_slot: u16) -> u16 {
        LATENCY_VL_BASE + port_id * FLOWS_PER_PORT as u16 + vlan_slot
    }

    pub fn is_latency_vl(&self, vl_id: u16) -> bool {
        let span = POLL_PORT_COUNT * FLOWS_PER_PORT as u16;
        (LATENCY_VL_BASE..LATENCY_VL_BASE + span).contains(&vl_id)
    }

    /// Every TX VL block in the map (poll, external, raw), for validation.
    pub fn all_tx_blocks(&self) -> Vec<(String, VlBlock)> {
        let mut blocks = Vec::new();
        for p in &self.poll_ports {
            for (q, &base) in p.tx_vl_ids.iter().enumerate() {
                blocks.push((
                    format!("port{}q{q}", p.port_id),
                    VlBlock::contiguous(base, VL_BLOCK_LEN),
                ));
            }
        }
        for e in &self.ext_tx {
            for t in &e.targets {
                blocks.push((format!("port{}ext-vlan{}", e.port_id, t.vlan_id), t.vl));
            }
        }
        for r in &self.raw_ports {
            for (i, t) in r.tx_targets.iter().enumerate() {
                blocks.push((format!("raw{}t{i}", r.port_id), t.vl));
            }
        }
        blocks
    }

    /// Bring-up validation: VL window bounds plus disjointness wherever two
    /// flows could meet: on one sender and, critically, at one receiver.
    /// (ATE deliberately reuses a VL range for the two directions of a pair;
    /// those flows never land on the same port.)
    pub fn validate(&self) -> Result<()> {
        for (name, block) in self.all_tx_blocks() {
            if block.start < crate::MIN_VL_ID {
                bail!("flow {name}: VL-ID {} below minimum", block.start);
            }
            let last = block.nth(block.count - 1);
            if last >= crate::MAX_VL_ID {
                bail!("flow {name}: VL-ID {last} beyond window");
            }
        }

        let mut per_port_tx: Vec<(u16, Vec<VlBlock>)> = Vec::new();
        for p in &self.poll_ports {
            let mut blocks: Vec<VlBlock> = p
                .tx_vl_ids
                .iter()
                .map(|&b| VlBlock::contiguous(b, VL_BLOCK_LEN))
                .collect();
            if let Some(ext) = self.ext_tx_for_port(p.port_id) {
                blocks.extend(ext.targets.iter().map(|t| t.vl));
            }
            per_port_tx.push((p.port_id, blocks));
        }
        for r in &self.raw_ports {
            per_port_tx.push((r.port_id, r.tx_targets.iter().map(|t| t.vl).collect()));
        }
        for (port, blocks) in &per_port_tx {
            check_disjoint(blocks, &format!("TX port {port}"))?;
        }

        for p in &self.poll_ports {
            let sources = self.rx_sources_for_poll_port(p.port_id);
            let blocks: Vec<VlBlock> = sources.iter().map(|s| s.vl).collect();
            check_disjoint(&blocks, &format!("RX port {}", p.port_id))?;
        }
        for r in &self.raw_ports {
            let blocks: Vec<VlBlock> = r.rx_sources.iter().map(|s| s.vl).collect();
            check_disjoint(&blocks, &format!("RX raw port {}", r.port_id))?;
        }
        Ok(())
    }
}

fn check_disjoint(blocks: &[VlBlock], what: &str) -> Result<()> {
    for (i, a) in blocks.iter().enumerate() {
        for b in blocks.iter().skip(i + 1) {
            if a.iter().any(|vl| b.contains(vl)) {
                bail!("{what}: overlapping VL blocks at {} and {}", a.start, b.start);
            }
        }
    }
    Ok(())
}

fn normal_raw_ports(window_mode: bool) -> Vec<RawPortProfile> {
    if window_mode {
        return vec![
            RawPortProfile {
                port_id: 12,
                interface: "eno12399",
                is_1g: true,
                tx_targets: vec![
                    RawTxTarget {
                        dest_port: 5,
                        rate_mbps: 195,
                        vl: VlBlock::strided(4163, 16, 4, 8),
                    },
                    RawTxTarget {
                        dest_port: 4,
                        rate_mbps: 195,
                        vl: VlBlock::strided(4195, 16, 4, 8),
                    },
                    RawTxTarget {
                        dest_port: 3,
                        rate_mbps: 195,
                        vl: VlBlock::strided(4227, 16, 4, 8),
                    },
                    RawTxTarget {
                        dest_port: 2,
                        rate_mbps: 195,
                        vl: VlBlock::strided(4259, 16, 4, 8),
                    },
                ],
                rx_sources: vec![
                    RxSource {
                        source_port: 2,
                        vl: VlBlock::strided(4291, 16, 4, 8),
                    },
                    RxSource {
                        source_port: 3,
                        vl: VlBlock::strided(4323, 16, 4, 8),
                    },
                    RxSource {
                        source_port: 4,
                        vl: VlBlock::strided(4355, 16, 4, 8),
                    },
                    RxSource {
                        source_port: 5,
                        vl: VlBlock::strided(4387, 16, 4, 8),
                    },
                ],
            },
            RawPortProfile {
                port_id: 13,
                interface: "eno12409",
                is_1g: false,
                tx_targets: vec![
                    RawTxTarget {
                        dest_port: 7,
                        rate_mbps: 37,
                        vl: VlBlock::strided(4131, 3, 1, 4),
                    },
                    RawTxTarget {
                        dest_port: 1,
                        rate_mbps: 37,
                        vl: VlBlock::strided(4147, 3, 1, 4),
                    },
                ],
                rx_sources: vec![
                    RxSource {
                        source_port: 0,
                        vl: VlBlock::strided(4099, 3, 1, 4),
                    },
                    RxSource {
                        source_port: 6,
                        vl: VlBlock::strided(4115, 3, 1, 4),
                    },
                ],
            },
        ];
    }
    vec![
        RawPortProfile {
            port_id: 12,
            interface: "eno12399",
            is_1g: true,
            tx_targets: vec![
                RawTxTarget {
                    dest_port: 2,
                    rate_mbps: 230,
                    vl: VlBlock::contiguous(4259, 32),
                },
                RawTxTarget {
                    dest_port: 3,
                    rate_mbps: 230,
                    vl: VlBlock::contiguous(4227, 32),
                },
                RawTxTarget {
                    dest_port: 4,
                    rate_mbps: 230,
                    vl: VlBlock::contiguous(4195, 32),
                },
                RawTxTarget {
                    dest_port: 5,
                    rate_mbps: 230,
                    vl: VlBlock::contiguous(4163, 32),
                },
            ],
            rx_sources: vec![
                RxSource {
                    source_port: 2,
                    vl: VlBlock::contiguous(4291, 32),
                },
                RxSource {
                    source_port: 3,
                    vl: VlBlock::contiguous(4323, 32),
                },
                RxSource {
                    source_port: 4,
                    vl: VlBlock::contiguous(4355, 32),
                },
                RxSource {
                    source_port: 5,
                    vl: VlBlock::contiguous(4387, 32),
                },
            ],
        },
        RawPortProfile {
            port_id: 13,
            interface: "eno12409",
            is_1g: false,
            tx_targets: vec![
                RawTxTarget {
                    dest_port: 7,
                    rate_mbps: 45,
                    vl: VlBlock::contiguous(4131, 16),
                },
                RawTxTarget {
                    dest_port: 1,
                    rate_mbps: 45,
                    vl: VlBlock::contiguous(4147, 16),
                },
            ],
            rx_sources: vec![
                RxSource {
                    source_port: 0,
                    vl: VlBlock::contiguous(4099, 16),
                },
                RxSource {
                    source_port: 6,
                    vl: VlBlock::contiguous(4115, 16),
                },
            ],
        },
    ]
}

fn ate_raw_ports() -> Vec<RawPortProfile> {
    vec![
        RawPortProfile {
            port_id: 12,
            interface: "eno12399",
            is_1g: true,
            tx_targets: vec![RawTxTarget {
                dest_port: 14,
                rate_mbps: 960,
                vl: VlBlock::contiguous(4163, 128),
            }],
            rx_sources: vec![RxSource {
                source_port: 14,
                vl: VlBlock::contiguous(4163, 128),
            }],
        },
        RawPortProfile {
            port_id: 13,
            interface: "eno12409",
            is_1g: false,
            tx_targets: vec![RawTxTarget {
                dest_port: 15,
                rate_mbps: 92,
                vl: VlBlock::contiguous(4131, 32),
            }],
            rx_sources: vec![RxSource {
                source_port: 15,
                vl: VlBlock::contiguous(4131, 32),
            }],
        },
        RawPortProfile {
            port_id: 14,
            interface: "eno12419",
            is_1g: true,
            tx_targets: vec![RawTxTarget {
                dest_port: 12,
                rate_mbps: 960,
                vl: VlBlock::contiguous(4163, 128),
            }],
            rx_sources: vec![RxSource {
                source_port: 12,
                vl: VlBlock::contiguous(4163, 128),
            }],
        },
        RawPortProfile {
            port_id: 15,
            interface: "eno12429",
            is_1g: false,
            tx_targets: vec![RawTxTarget {
                dest_port: 13,
                rate_mbps: 92,
                vl: VlBlock::contiguous(4131, 32),
            }],
            rx_sources: vec![RxSource {
                source_port: 13,
                vl: VlBlock::contiguous(4131, 32),
            }],
        },
    ]
}

fn ext_targets(
    vlans: [u16; 4],
    starts: [u16; 4],
    count: u16,
    rate_mbps: u32,
    queues: usize,
) -> Vec<ExtTxTarget> {
    (0..queues)
        .map(|q| ExtTxTarget {
            queue_id: q as u16,
            vlan_id: vlans[q],
            vl: VlBlock::contiguous(starts[q], count),
            rate_mbps,
        })
        .collect()
}

fn normal_ext_tx(window_mode: bool) -> Vec<ExtTxProfile> {
    let (mid_count, mid_rate) = if window_mode { (4, 49) } else { (8, 230) };
    let mut profiles = vec![
        ExtTxProfile {
            port_id: 2,
            dest_port: 12,
            targets: ext_targets(
                [97, 98, 99, 100],
                [4291, 4299, 4307, 4315],
                mid_count,
                mid_rate,
                4,
            ),
        },
        ExtTxProfile {
            port_id: 3,
            dest_port: 12,
            targets: ext_targets(
                [101, 102, 103, 104],
                [4323, 4331, 4339, 4347],
                mid_count,
                mid_rate,
                4,
            ),
        },
        ExtTxProfile {
            port_id: 4,
            dest_port: 12,
            targets: ext_targets(
                [113, 114, 115, 116],
                [4355, 4363, 4371, 4379],
                mid_count,
                mid_rate,
                4,
            ),
        },
        ExtTxProfile {
            port_id: 5,
            dest_port: 12,
            targets: ext_targets(
                [117, 118, 119, 120],
                [4387, 4395, 4403, 4411],
                mid_count,
                mid_rate,
                4,
            ),
        },
    ];
    if window_mode {
        // 100M targets narrow to one VL per VLAN, last VLAN dropped.
        profiles.push(ExtTxProfile {
            port_id: 0,
            dest_port: 13,
            targets: ext_targets([105, 106, 107, 108], [4099, 4103, 4107, 4111], 1, 13, 3),
        });
        profiles.push(ExtTxProfile {
            port_id: 6,
            dest_port: 13,
            targets: ext_targets([121, 122, 123, 124], [4115, 4119, 4123, 4127], 1, 13, 3),
        });
    } else {
        profiles.push(ExtTxProfile {
            port_id: 0,
            dest_port: 13,
            targets: ext_targets([105, 106, 107, 108], [4099, 4103, 4107, 4111], 4, 45, 4),
        });
        profiles.push(ExtTxProfile {
            port_id: 6,
            dest_port: 13,
            targets: ext_targets([121, 122, 123, 124], [4115, 4119, 4123, 4127], 4, 45, 4),
        });
    }
    profiles
}
