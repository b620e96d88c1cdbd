use std::collections::HashSet;

use beacon_sim_types::{Beacon, SimConfig};
use rand::Rng;
use uuid::Uuid;

/// A beacon currently propagating through the medium. `potential_count` is
/// the number of receivers within range when the broadcast started;
/// `processed_count` is how many have since had their reception resolved
/// (successful or not). Collisions never remove an entry — only `update`'s
/// grace-period garbage collection does.
#[derive(Debug, Clone)]
struct ActiveTransmission {
    beacon: Beacon,
    start: f64,
    end: f64,
    potential_count: u64,
    processed_count: u64,
}

/// Per-receiver outcome of a single broadcast, handed back to the caller so
/// it can schedule the matching `Reception` event.
pub struct ReceptionSchedule {
    pub receiver_index: usize,
    pub reception_time: f64,
}

/// Everything a broadcast call needs the caller to act on: metrics already
/// applied internally, but event scheduling is the driver's job.
pub struct BroadcastOutcome {
    pub transmission_end: f64,
    pub potential_receivers: usize,
    pub receptions: Vec<ReceptionSchedule>,
}

/// The shared medium. Holds every in-flight transmission and the set of
/// receiver/sender/timestamp triples that have already resolved a reception,
/// so repeat deliveries (e.g. from duplicate events) can't double count.
#[derive(Debug, Default)]
pub struct Channel {
    active_transmissions: Vec<ActiveTransmission>,
    seen_attempts: HashSet<(Uuid, Uuid, u64)>,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_transmissions_len(&self) -> usize {
        self.active_transmissions.len()
    }

    pub fn in_range(pos1: (f64, f64), pos2: (f64, f64), cfg: &SimConfig) -> bool {
        distance(pos1, pos2) <= cfg.communication_range_max
    }

    /// True if some active transmission's wavefront has reached `position`
    /// and `position` is still within carrier-sense range of its sender.
    pub fn is_busy(&self, position: (f64, f64), sim_time: f64, cfg: &SimConfig) -> bool {
        self.active_transmissions.iter().any(|tx| {
            if !(tx.start <= sim_time && sim_time <= tx.end) {
                return false;
            }
            let d = distance(position, tx.beacon.position);
            let wavefront_radius = cfg.speed_of_light * (sim_time - tx.start);
            d <= wavefront_radius && d <= cfg.communication_range_high_prob
        })
    }

    /// Drop transmissions whose grace period (max propagation delay plus a
    /// small epsilon) has elapsed, logging any receivers that never resolved
    /// a reception as lost.
    pub fn gc_expired(&mut self, sim_time: f64, cfg: &SimConfig) -> u64 {
        let grace_period = cfg.communication_range_max / cfg.speed_of_light + 1e-6;
        let mut lost_total = 0;
        self.active_transmissions.retain(|tx| {
            let expired = tx.end + grace_period <= sim_time;
            if expired {
                let lost = tx.potential_count.saturating_sub(tx.processed_count);
                lost_total += lost;
            }
            !expired
        });
        lost_total
    }

    /// Checks whether any other active transmission could collide with
    /// `beacon` at the moment it starts: a direct collision if the two
    /// senders can hear each other, or a receiver collision if some
    /// in-range receiver can hear both. Returns the number of pairwise
    /// collisions detected (at most one per existing transmission, mirroring
    /// the `break` after the first matching receiver).
    fn collisions_at_broadcast(
        &self,
        beacon: &Beacon,
        sim_time: f64,
        new_end_time: f64,
        receivers: &[(usize, (f64, f64))],
        cfg: &SimConfig,
    ) -> u64 {
        let mut collisions = 0;
        for existing in &self.active_transmissions {
            if beacon.sender_id == existing.beacon.sender_id {
                continue;
            }
            let overlaps = sim_time <= existing.end && existing.start <= new_end_time;
            if !overlaps {
                continue;
            }
            if Self::in_range(beacon.position, existing.beacon.position, cfg) {
                collisions += 1;
            }
            for &(_, pos) in receivers {
                if Self::in_range(pos, existing.beacon.position, cfg) {
                    collisions += 1;
                    break;
                }
            }
        }
        collisions
    }

    /// Broadcasts `beacon` from `sim_time`, returning the per-receiver
    /// reception schedule. `receivers` is every other active buoy's index
    /// and position; the channel decides which fall in range and, unless
    /// running in ideal mode, rolls delivery probability per receiver.
    /// Returns `(outcome, collisions)`.
    pub fn broadcast(
        &mut self,
        beacon: Beacon,
        sim_time: f64,
        receivers: &[(usize, (f64, f64))],
        cfg: &SimConfig,
        rng: &mut impl Rng,
    ) -> (BroadcastOutcome, u64) {
        let transmission_time = beacon.size_bits() as f64 / cfg.bit_rate;
        let new_end_time = sim_time + transmission_time;

        let receivers_in_range: Vec<(usize, (f64, f64))> = receivers
            .iter()
            .copied()
            .filter(|&(_, pos)| Self::in_range(beacon.position, pos, cfg))
            .collect();

        let collisions =
            self.collisions_at_broadcast(&beacon, sim_time, new_end_time, &receivers_in_range, cfg);

        let mut receptions = Vec::new();
        let mut processed_count = 0;
        for &(idx, pos) in &receivers_in_range {
            let d = distance(beacon.position, pos);
            let propagation_delay = d / cfg.speed_of_light;
            let reception_time = new_end_time + propagation_delay + 1e-9;

            let will_receive = if cfg.ideal_channel {
                true
            } else if d <= cfg.communication_range_high_prob {
                rng.random::<f64>() < cfg.delivery_prob_high
            } else if d <= cfg.communication_range_max {
                rng.random::<f64>() < cfg.delivery_prob_low
            } else {
                false
            };

            if will_receive {
                receptions.push(ReceptionSchedule {
                    receiver_index: idx,
                    reception_time,
                });
            }
            processed_count += 1;
        }

        self.active_transmissions.push(ActiveTransmission {
            beacon,
            start: sim_time,
            end: new_end_time,
            potential_count: receivers_in_range.len() as u64,
            processed_count,
        });

        (
            BroadcastOutcome {
                transmission_end: new_end_time,
                potential_receivers: receivers_in_range.len(),
                receptions,
            },
            collisions,
        )
    }

    /// Fine-grained recheck performed by a receiver right before it accepts a
    /// reception: true if some other transmission's wavefront arrives at
    /// `position` within the collision window of `sim_time`.
    pub fn collides_at_reception(
        &self,
        beacon: &Beacon,
        position: (f64, f64),
        sim_time: f64,
        cfg: &SimConfig,
    ) -> bool {
        const COLLISION_WINDOW: f64 = 1e-5;
        self.active_transmissions.iter().any(|tx| {
            if tx.beacon.sender_id == beacon.sender_id && tx.beacon.timestamp == beacon.timestamp {
                return false;
            }
            if sim_time < tx.start {
                return false;
            }
            let d = distance(position, tx.beacon.position);
            if d > cfg.communication_range_max {
                return false;
            }
            let arrival_time = tx.end + d / cfg.speed_of_light;
            (arrival_time - sim_time).abs() < COLLISION_WINDOW
        })
    }

    /// Marks `(receiver, sender, timestamp)` as resolved; returns `false` if
    /// it was already seen (caller should skip double-counting). On first
    /// sight, also bumps the matching transmission's processed count.
    pub fn mark_seen(&mut self, receiver_id: Uuid, sender_id: Uuid, timestamp: f64) -> bool {
        let key = (receiver_id, sender_id, timestamp.to_bits());
        if !self.seen_attempts.insert(key) {
            return false;
        }
        if let Some(tx) = self
            .active_transmissions
            .iter_mut()
            .find(|tx| tx.beacon.sender_id == sender_id && tx.beacon.timestamp == timestamp)
        {
            tx.processed_count += 1;
        }
        true
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn beacon_at(pos: (f64, f64), ts: f64) -> Beacon {
        Beacon::new(Uuid::new_v4(), false, pos, 100.0, vec![], ts)
    }

    #[test]
    fn in_range_uses_max_range() {
        let cfg = SimConfig::default();
        assert!(Channel::in_range((0.0, 0.0), (cfg.communication_range_max, 0.0), &cfg));
        assert!(!Channel::in_range(
            (0.0, 0.0),
            (cfg.communication_range_max + 1.0, 0.0),
            &cfg
        ));
    }

    #[test]
    fn is_busy_false_before_wavefront_arrives() {
        let cfg = SimConfig::default();
        let mut channel = Channel::new();
        let mut rng = StdRng::seed_from_u64(1);
        let beacon = beacon_at((0.0, 0.0), 0.0);
        let (_, _) = channel.broadcast(beacon, 0.0, &[], &cfg, &mut rng);
        // at t=0 the wavefront hasn't traveled anywhere yet
        assert!(!channel.is_busy((50.0, 0.0), 0.0, &cfg));
    }

    #[test]
    fn is_busy_true_once_wavefront_reaches_and_within_high_prob_range() {
        let cfg = SimConfig::default();
        let mut channel = Channel::new();
        let mut rng = StdRng::seed_from_u64(1);
        let beacon = beacon_at((0.0, 0.0), 0.0);
        let transmission_time = beacon.size_bits() as f64 / cfg.bit_rate;
        channel.broadcast(beacon, 0.0, &[], &cfg, &mut rng);
        // pick a sim_time still inside [start, end] with a wavefront that has
        // long since covered the whole detection range at light speed
        let sim_time = transmission_time / 2.0;
        assert!(channel.is_busy((10.0, 0.0), sim_time, &cfg));
    }

    #[test]
    fn gc_expired_removes_old_transmissions_and_reports_loss() {
        let cfg = SimConfig::default();
        let mut channel = Channel::new();
        let mut rng = StdRng::seed_from_u64(1);
        let beacon = beacon_at((0.0, 0.0), 0.0);
        let receivers = vec![(1usize, (10.0, 0.0))];
        channel.broadcast(beacon, 0.0, &receivers, &cfg, &mut rng);
        assert_eq!(channel.active_transmissions_len(), 1);

        let grace_period = cfg.communication_range_max / cfg.speed_of_light + 1e-6;
        let lost = channel.gc_expired(1000.0 + grace_period, &cfg);
        assert_eq!(channel.active_transmissions_len(), 0);
        assert_eq!(lost, 1);
    }

    #[test]
    fn ideal_channel_always_delivers_in_range_receivers() {
        let mut cfg = SimConfig::default();
        cfg.ideal_channel = true;
        let mut channel = Channel::new();
        let mut rng = StdRng::seed_from_u64(7);
        let beacon = beacon_at((0.0, 0.0), 0.0);
        let receivers = vec![(1usize, (10.0, 0.0)), (2usize, (cfg.communication_range_max * 2.0, 0.0))];
        let (outcome, _) = channel.broadcast(beacon, 0.0, &receivers, &cfg, &mut rng);
        assert_eq!(outcome.receptions.len(), 1);
        assert_eq!(outcome.receptions[0].receiver_index, 1);
    }

    #[test]
    fn mark_seen_is_idempotent() {
        let mut channel = Channel::new();
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        assert!(channel.mark_seen(receiver, sender, 1.0));
        assert!(!channel.mark_seen(receiver, sender, 1.0));
    }
}
