use beacon_sim_types::{NeighborEntry, SchedulerMode, SimConfig};
use rand::Rng;

/// Per-buoy beacon-interval decision state. Static desynchronizes via a
/// randomized initial offset and otherwise fires on a fixed period; the two
/// dynamic modes recompute their interval from local density/contact/
/// mobility signals every time they fire.
#[derive(Debug, Clone)]
pub struct SchedulerPolicy {
    mode: SchedulerMode,
    min_interval: f64,
    max_interval: f64,
    static_interval: f64,
    last_static_send_time: f64,
    last_dynamic_send_time: f64,
    next_static_interval: f64,
    next_dynamic_interval: Option<f64>,
}

impl SchedulerPolicy {
    pub fn new(cfg: &SimConfig, rng: &mut impl Rng) -> Self {
        let last_static_send_time = -rng.random_range(0.0..=cfg.static_interval);
        let last_dynamic_send_time = -rng.random_range(0.0..=cfg.beacon_min_interval);
        Self {
            mode: cfg.mode,
            min_interval: cfg.beacon_min_interval,
            max_interval: cfg.beacon_max_interval,
            static_interval: cfg.static_interval,
            last_static_send_time,
            last_dynamic_send_time,
            next_static_interval: cfg.static_interval,
            next_dynamic_interval: None,
        }
    }

    /// The delay until this buoy's scheduler should be checked again.
    pub fn next_check_interval(&self) -> f64 {
        match self.mode {
            SchedulerMode::Static => self.next_static_interval,
            SchedulerMode::DynamicAdab | SchedulerMode::DynamicAcab => {
                self.next_dynamic_interval.unwrap_or(self.min_interval)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn should_send(
        &mut self,
        velocity: (f64, f64),
        neighbors: &[NeighborEntry],
        current_time: f64,
        max_velocity: f64,
        rng: &mut impl Rng,
    ) -> bool {
        match self.mode {
            SchedulerMode::Static => self.should_send_static(current_time),
            SchedulerMode::DynamicAdab | SchedulerMode::DynamicAcab => {
                self.should_send_dynamic(velocity, neighbors, current_time, max_velocity, rng)
            }
        }
    }

    fn should_send_static(&mut self, current_time: f64) -> bool {
        let elapsed = current_time - self.last_static_send_time;
        if elapsed >= self.next_static_interval {
            self.last_static_send_time = current_time;
            true
        } else {
            false
        }
    }

    fn should_send_dynamic(
        &mut self,
        velocity: (f64, f64),
        neighbors: &[NeighborEntry],
        current_time: f64,
        max_velocity: f64,
        rng: &mut impl Rng,
    ) -> bool {
        if self.next_dynamic_interval.is_none() {
            self.next_dynamic_interval =
                Some(self.compute_interval(velocity, neighbors, current_time, max_velocity, rng));
        }
        let interval = self.next_dynamic_interval.expect("just set above");
        let elapsed = current_time - self.last_dynamic_send_time;
        if elapsed >= interval {
            self.last_dynamic_send_time = current_time;
            self.next_dynamic_interval =
                Some(self.compute_interval(velocity, neighbors, current_time, max_velocity, rng));
            true
        } else {
            false
        }
    }

    fn compute_interval(
        &self,
        velocity: (f64, f64),
        neighbors: &[NeighborEntry],
        current_time: f64,
        max_velocity: f64,
        rng: &mut impl Rng,
    ) -> f64 {
        let combined = match self.mode {
            SchedulerMode::DynamicAcab => {
                const NEIGHBORS_THRESHOLD: f64 = 10.0;
                let density_score = (neighbors.len() as f64 / NEIGHBORS_THRESHOLD).min(1.0);

                const CONTACT_THRESHOLD: f64 = 20.0;
                let contact_score = if neighbors.is_empty() {
                    0.0
                } else {
                    let last_contact = neighbors
                        .iter()
                        .map(|n| n.last_seen)
                        .fold(f64::NEG_INFINITY, f64::max);
                    let delta = current_time - last_contact;
                    (1.0 - delta / CONTACT_THRESHOLD).max(0.0)
                };

                let (vx, vy) = velocity;
                let speed = (vx * vx + vy * vy).sqrt();
                let mobility_score = (speed / max_velocity).min(1.0);

                let w_density = 0.4;
                let w_contact = 0.3;
                let w_mobility = 0.3;
                w_density * density_score + w_contact * contact_score + w_mobility * (1.0 - mobility_score)
            }
            // ADAB and static fall through to density-only scoring; static
            // never calls compute_interval, so this arm only ever runs for ADAB.
            _ => {
                const NEIGHBORS_THRESHOLD: f64 = 15.0;
                (neighbors.len() as f64 / NEIGHBORS_THRESHOLD).min(1.0)
            }
        };

        let fq = combined * combined;
        let bi_min = self.static_interval;
        let bi = bi_min + fq * (self.max_interval - bi_min);

        let jitter = rng.random_range(-0.5..=0.5);
        let bi_final = bi * (1.0 + jitter);

        bi_final.max(self.min_interval).min(self.max_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn neighbor_at(last_seen: f64) -> NeighborEntry {
        NeighborEntry {
            id: uuid::Uuid::new_v4(),
            last_seen,
            position: (0.0, 0.0),
        }
    }

    #[test]
    fn static_scheduler_fires_once_per_interval() {
        let mut cfg = SimConfig::default();
        cfg.mode = SchedulerMode::Static;
        cfg.static_interval = 2.0;
        let mut rng = StdRng::seed_from_u64(1);
        let mut policy = SchedulerPolicy::new(&cfg, &mut rng);
        // force a known offset so the timeline is predictable
        policy.last_static_send_time = 0.0;

        assert!(!policy.should_send((0.0, 0.0), &[], 1.0, 15.0, &mut rng));
        assert!(policy.should_send((0.0, 0.0), &[], 2.0, 15.0, &mut rng));
        assert!(!policy.should_send((0.0, 0.0), &[], 2.5, 15.0, &mut rng));
    }

    #[test]
    fn adab_interval_grows_with_density_and_stays_in_bounds() {
        let mut cfg = SimConfig::default();
        cfg.mode = SchedulerMode::DynamicAdab;
        cfg.static_interval = 1.0;
        cfg.beacon_min_interval = 1.0;
        cfg.beacon_max_interval = 5.0;
        let mut rng = StdRng::seed_from_u64(42);
        let policy = SchedulerPolicy::new(&cfg, &mut rng);

        let sparse = policy.compute_interval((0.0, 0.0), &[], 0.0, 15.0, &mut rng);
        let dense_neighbors: Vec<NeighborEntry> = (0..20).map(|_| neighbor_at(0.0)).collect();
        let dense = policy.compute_interval((0.0, 0.0), &dense_neighbors, 0.0, 15.0, &mut rng);

        for v in [sparse, dense] {
            assert!(v >= cfg.beacon_min_interval - 1e-9);
            assert!(v <= cfg.beacon_max_interval + 1e-9);
        }
        assert!(dense >= sparse - 1e-9);
    }

    #[test]
    fn acab_high_mobility_lowers_interval_relative_to_stationary() {
        let mut cfg = SimConfig::default();
        cfg.mode = SchedulerMode::DynamicAcab;
        cfg.static_interval = 1.0;
        cfg.beacon_min_interval = 1.0;
        cfg.beacon_max_interval = 5.0;
        let mut rng = StdRng::seed_from_u64(7);
        let policy = SchedulerPolicy::new(&cfg, &mut rng);

        // use the same rng state for both calls by cloning a fresh seed,
        // isolating the effect of velocity from jitter draws
        let mut rng_a = StdRng::seed_from_u64(100);
        let mut rng_b = StdRng::seed_from_u64(100);
        let stationary = policy.compute_interval((0.0, 0.0), &[], 0.0, 15.0, &mut rng_a);
        let fast = policy.compute_interval((15.0, 0.0), &[], 0.0, 15.0, &mut rng_b);
        assert!(fast <= stationary + 1e-9);
    }
}
