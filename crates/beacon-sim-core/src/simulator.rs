use beacon_sim_types::SimConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::buoy::{Buoy, handle_reception};
use crate::channel::Channel;
use crate::event::{EventKind, EventQueue, EventTarget};
use crate::metrics::Metrics;
use crate::policy::SchedulerPolicy;

/// Every physical/MAC/scheduler input plus the wall-clock-resolved RNG seed
/// and optional fixed start positions (`--positions-file`) needed to build a
/// `Simulator`. Seed resolution against the wall clock happens at the CLI
/// boundary; this struct always carries a concrete seed.
pub struct SimulatorBuilder {
    pub cfg: SimConfig,
    pub seed: u64,
    pub positions: Option<Vec<(f64, f64)>>,
}

/// The central event-driven driver: owns the event queue, the channel, every
/// buoy (mobile first, then fixed, in a stable never-reordered `Vec`), the
/// metrics sink, and the run's single RNG stream.
pub struct Simulator {
    cfg: SimConfig,
    buoys: Vec<Buoy>,
    channel: Channel,
    metrics: Metrics,
    queue: EventQueue,
    rng: StdRng,
    simulated_time: f64,
    first_change: bool,
}

impl Simulator {
    pub fn new(builder: SimulatorBuilder) -> Self {
        let SimulatorBuilder { cfg, seed, positions } = builder;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut buoys = Vec::with_capacity(cfg.mobile_buoy_count + cfg.fixed_buoy_count);
        for i in 0..cfg.mobile_buoy_count {
            let position = positions
                .as_ref()
                .and_then(|p| p.get(i).copied())
                .unwrap_or_else(|| random_position(&cfg, &mut rng));
            let velocity = random_velocity(cfg.default_velocity, &mut rng);
            let scheduler = SchedulerPolicy::new(&cfg, &mut rng);
            buoys.push(Buoy::new(position, true, cfg.default_battery, velocity, scheduler));
        }
        for i in 0..cfg.fixed_buoy_count {
            let idx = cfg.mobile_buoy_count + i;
            let position = positions
                .as_ref()
                .and_then(|p| p.get(idx).copied())
                .unwrap_or_else(|| random_position(&cfg, &mut rng));
            let scheduler = SchedulerPolicy::new(&cfg, &mut rng);
            buoys.push(Buoy::new(position, false, cfg.default_battery, (0.0, 0.0), scheduler));
        }

        if cfg.ramp_scenario {
            for buoy in buoys.iter_mut().skip(2) {
                buoy.active = false;
            }
        }

        let mut sim = Self {
            cfg,
            buoys,
            channel: Channel::new(),
            metrics: Metrics::new(),
            queue: EventQueue::new(),
            rng,
            simulated_time: 0.0,
            first_change: true,
        };
        sim.metrics.record_avg_neighbors_sample(sim.calculate_avg_neighbors());
        sim.schedule_initial_events();
        sim
    }

    fn schedule_initial_events(&mut self) {
        let neighbor_timeout = self.cfg.neighbor_timeout();
        for idx in 0..self.buoys.len() {
            if !self.buoys[idx].active {
                continue;
            }
            let offset = self.rng.random_range(0.0..1.0);
            self.queue.push(offset, EventTarget::Buoy(idx), EventKind::SchedulerCheck);
            self.queue
                .push(neighbor_timeout, EventTarget::Buoy(idx), EventKind::NeighborCleanup);
            if self.buoys[idx].is_mobile {
                self.queue.push(0.1, EventTarget::Buoy(idx), EventKind::BuoyMovement);
            }
        }
        self.queue.push(1.0, EventTarget::Channel, EventKind::ChannelUpdate);
        self.queue
            .push(30.0, EventTarget::Simulator, EventKind::BuoyArrayUpdate);
        self.queue
            .push(30.0, EventTarget::Simulator, EventKind::AvgNeighborsCalculation);
    }

    /// Runs to completion, returning the final simulated time alongside the
    /// accumulated metrics (the latter alone can't report throughput once
    /// `self` has been consumed).
    pub fn run(mut self) -> (f64, Metrics) {
        while self.simulated_time < self.cfg.duration {
            let Some(event) = self.queue.pop() else {
                info!("no more events to process");
                break;
            };
            self.simulated_time = event.time;
            debug!(time = self.simulated_time, kind = ?event.kind, target = ?event.target, "dispatching event");

            match event.target {
                EventTarget::Buoy(idx) => self.dispatch_buoy(idx, event.kind),
                EventTarget::Channel => self.dispatch_channel(event.kind),
                EventTarget::Simulator => self.dispatch_simulator(event.kind),
            }

            if self.cfg.ramp_scenario && self.simulated_time > 0.0 && (self.simulated_time as i64) % 5 == 0 {
                let avg_neighbors = self.calculate_avg_neighbors();
                let n_active = self.buoys.iter().filter(|b| b.active).count();
                self.metrics.log_timepoint(self.simulated_time, n_active, avg_neighbors);
            }
        }
        info!(simulated_time = self.simulated_time, "simulation complete");
        (self.simulated_time, self.metrics)
    }

    pub fn simulated_time(&self) -> f64 {
        self.simulated_time
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    fn dispatch_buoy(&mut self, idx: usize, kind: EventKind) {
        if !self.buoys[idx].active {
            return;
        }
        let cfg = self.cfg.clone();
        match kind {
            EventKind::SchedulerCheck => {
                let events = self.buoys[idx].handle_scheduler_check(
                    self.simulated_time,
                    cfg.default_velocity,
                    &mut self.rng,
                );
                self.enqueue_for(idx, events);
            }
            EventKind::ChannelSense => {
                let events = self.buoys[idx].handle_channel_sense(self.simulated_time, &self.channel, &cfg);
                self.enqueue_for(idx, events);
            }
            EventKind::DifsCompletion => {
                let events = self.buoys[idx].handle_difs_completion(
                    self.simulated_time,
                    &self.channel,
                    &cfg,
                    &mut self.rng,
                );
                self.enqueue_for(idx, events);
            }
            EventKind::BackoffCompletion { backoff_start } => {
                let events = self.buoys[idx].handle_backoff_completion(
                    self.simulated_time,
                    backoff_start,
                    &self.channel,
                    &cfg,
                );
                self.enqueue_for(idx, events);
            }
            EventKind::TransmissionStart => self.dispatch_transmission_start(idx),
            EventKind::Reception { beacon } => {
                handle_reception(
                    &mut self.buoys[idx],
                    &beacon,
                    self.simulated_time,
                    &mut self.channel,
                    &cfg,
                    &mut self.metrics,
                );
            }
            EventKind::NeighborCleanup => {
                let next = self.buoys[idx].handle_neighbor_cleanup(self.simulated_time, cfg.neighbor_timeout());
                self.queue.push(next.0, EventTarget::Buoy(idx), next.1);
            }
            EventKind::BuoyMovement => {
                if let Some(next) = self.buoys[idx].handle_movement(self.simulated_time, &cfg) {
                    self.queue.push(next.0, EventTarget::Buoy(idx), next.1);
                }
            }
            EventKind::TransmissionEnd { .. } | EventKind::ChannelUpdate | EventKind::BuoyArrayUpdate
            | EventKind::AvgNeighborsCalculation => {
                // these targets never route to a buoy; unreachable by construction
            }
        }
    }

    fn dispatch_transmission_start(&mut self, idx: usize) {
        if !self.buoys[idx].still_wants_to_send() {
            return;
        }
        let cfg = self.cfg.clone();
        let beacon = self.buoys[idx].create_beacon(self.simulated_time);
        let receivers: Vec<(usize, (f64, f64))> = self
            .buoys
            .iter()
            .enumerate()
            .filter(|&(j, b)| j != idx && b.active)
            .map(|(j, b)| (j, b.position))
            .collect();

        self.metrics.log_sent();
        let (outcome, collisions) =
            self.channel
                .broadcast(beacon.clone(), self.simulated_time, &receivers, &cfg, &mut self.rng);
        self.metrics.log_potentially_sent(outcome.potential_receivers);
        for _ in 0..collisions {
            self.metrics.log_collision();
        }

        for reception in outcome.receptions {
            self.queue.push(
                reception.reception_time,
                EventTarget::Buoy(reception.receiver_index),
                EventKind::Reception { beacon: beacon.clone() },
            );
        }
        self.queue.push(
            outcome.transmission_end,
            EventTarget::Channel,
            EventKind::TransmissionEnd { beacon },
        );

        if let Some(latency) = self.buoys[idx].finish_transmission(self.simulated_time) {
            self.metrics.record_scheduler_latency(latency);
        }
    }

    fn dispatch_channel(&mut self, kind: EventKind) {
        match kind {
            EventKind::ChannelUpdate => {
                let lost = self.channel.gc_expired(self.simulated_time, &self.cfg);
                if lost > 0 {
                    self.metrics.log_lost(lost);
                }
                self.queue
                    .push(self.simulated_time + 1.0, EventTarget::Channel, EventKind::ChannelUpdate);
            }
            EventKind::TransmissionEnd { beacon } => {
                debug!(sender = %beacon.sender_id, "transmission completed");
            }
            _ => {}
        }
    }

    fn dispatch_simulator(&mut self, kind: EventKind) {
        match kind {
            EventKind::BuoyArrayUpdate => {
                if self.cfg.ramp_scenario {
                    self.update_buoy_array_ramp();
                } else {
                    self.update_buoy_array_random();
                }
                let avg = self.calculate_avg_neighbors();
                self.metrics.record_avg_neighbors_sample(avg);
            }
            EventKind::AvgNeighborsCalculation => {
                let avg = self.calculate_avg_neighbors();
                self.metrics.record_avg_neighbors_sample(avg);
                self.queue.push(
                    self.simulated_time + 30.0,
                    EventTarget::Simulator,
                    EventKind::AvgNeighborsCalculation,
                );
            }
            _ => {}
        }
    }

    fn enqueue_for(&mut self, idx: usize, events: Vec<(f64, EventKind)>) {
        for (time, kind) in events {
            self.queue.push(time, EventTarget::Buoy(idx), kind);
        }
    }

    fn calculate_avg_neighbors(&self) -> f64 {
        let active: Vec<&Buoy> = self.buoys.iter().filter(|b| b.active).collect();
        if active.is_empty() {
            return 0.0;
        }
        let total: usize = active
            .iter()
            .map(|buoy| {
                active
                    .iter()
                    .filter(|other| {
                        other.id != buoy.id && distance(buoy.position, other.position) <= self.cfg.communication_range_max
                    })
                    .count()
            })
            .sum();
        total as f64 / active.len() as f64
    }

    fn update_buoy_array_random(&mut self) {
        let total = self.buoys.len();
        let min_active = 3.max((total as f64 * 0.2) as usize);
        let active_count = self.buoys.iter().filter(|b| b.active).count();

        let should_remove =
            self.first_change || (self.rng.random::<f64>() >= 0.5 && active_count > min_active);

        if should_remove && active_count > min_active {
            let remove_fraction = if self.first_change { 0.5 } else { 0.4 };
            let max_to_remove = (active_count - min_active).min(2.max((total as f64 * remove_fraction) as usize));
            let num_to_remove = if max_to_remove <= 2 {
                max_to_remove
            } else {
                self.rng.random_range(1..=max_to_remove)
            };
            let mut active_indices: Vec<usize> =
                (0..total).filter(|&i| self.buoys[i].active).collect();
            shuffle(&mut active_indices, &mut self.rng);
            for &i in active_indices.iter().take(num_to_remove) {
                self.buoys[i].active = false;
            }
            info!(count = num_to_remove, time = self.simulated_time, "removed buoys");
            self.first_change = false;
        } else {
            let mut inactive_indices: Vec<usize> =
                (0..total).filter(|&i| !self.buoys[i].active).collect();
            if !inactive_indices.is_empty() {
                let max_to_add = inactive_indices.len().min(2.max((total as f64 * 0.4) as usize));
                let num_to_add = if max_to_add <= 2 {
                    max_to_add
                } else {
                    self.rng.random_range(1..=max_to_add)
                };
                shuffle(&mut inactive_indices, &mut self.rng);
                let neighbor_timeout = self.cfg.neighbor_timeout();
                for &i in inactive_indices.iter().take(num_to_add) {
                    self.buoys[i].active = true;
                    let offset = self.rng.random_range(0.0..1.0);
                    self.queue
                        .push(self.simulated_time + offset, EventTarget::Buoy(i), EventKind::SchedulerCheck);
                    self.queue.push(
                        self.simulated_time + neighbor_timeout,
                        EventTarget::Buoy(i),
                        EventKind::NeighborCleanup,
                    );
                    if self.buoys[i].is_mobile {
                        self.queue.push(
                            self.simulated_time + 0.1,
                            EventTarget::Buoy(i),
                            EventKind::BuoyMovement,
                        );
                    }
                }
                info!(count = num_to_add, time = self.simulated_time, "added buoys");
                self.first_change = false;
            }
        }

        let next_change = self.simulated_time + self.rng.random_range(15.0..=20.0);
        self.queue
            .push(next_change, EventTarget::Simulator, EventKind::BuoyArrayUpdate);
    }

    fn update_buoy_array_ramp(&mut self) {
        let total = self.buoys.len();
        let active_count = self.buoys.iter().filter(|b| b.active).count();
        let to_add = total.saturating_sub(2);
        let add_interval = if to_add > 0 {
            self.cfg.duration / to_add as f64
        } else {
            self.cfg.duration
        };

        if active_count < total {
            if let Some(i) = (0..total).find(|&i| !self.buoys[i].active) {
                self.buoys[i].active = true;
                let offset = self.rng.random_range(0.0..0.01);
                self.queue
                    .push(self.simulated_time + offset, EventTarget::Buoy(i), EventKind::SchedulerCheck);
                self.queue.push(
                    self.simulated_time + self.cfg.neighbor_timeout(),
                    EventTarget::Buoy(i),
                    EventKind::NeighborCleanup,
                );
            }
            self.queue.push(
                self.simulated_time + add_interval,
                EventTarget::Simulator,
                EventKind::BuoyArrayUpdate,
            );
        }
    }
}

fn random_position(cfg: &SimConfig, rng: &mut impl Rng) -> (f64, f64) {
    (rng.random_range(0.0..cfg.world_width), rng.random_range(0.0..cfg.world_height))
}

fn random_velocity(default_velocity: f64, rng: &mut impl Rng) -> (f64, f64) {
    (
        rng.random_range(-1.0..1.0) * default_velocity,
        rng.random_range(-1.0..1.0) * default_velocity,
    )
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

fn shuffle(indices: &mut [usize], rng: &mut impl Rng) {
    for i in (1..indices.len()).rev() {
        let j = rng.random_range(0..=i);
        indices.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_sim_types::SchedulerMode;

    fn base_cfg() -> SimConfig {
        let mut cfg = SimConfig::default();
        cfg.ideal_channel = true;
        cfg.mobile_buoy_count = 0;
        cfg.fixed_buoy_count = 1;
        cfg.duration = 10.0;
        cfg.static_interval = 1.0;
        cfg
    }

    #[test]
    fn solo_buoy_sends_without_receiving() {
        let cfg = base_cfg();
        let sim = Simulator::new(SimulatorBuilder {
            cfg,
            seed: 1,
            positions: Some(vec![(100.0, 100.0)]),
        });
        let (_, metrics) = sim.run();
        let rows = metrics.summary_rows(&SimConfig::default(), 10.0);
        let sent: u64 = rows.iter().find(|(k, _)| k == "Sent").unwrap().1.parse().unwrap();
        assert!((9..=11).contains(&sent));
        let received: u64 = rows.iter().find(|(k, _)| k == "Received").unwrap().1.parse().unwrap();
        assert_eq!(received, 0);
    }

    #[test]
    fn pair_in_range_achieves_full_delivery_with_ideal_channel() {
        let mut cfg = base_cfg();
        cfg.fixed_buoy_count = 2;
        let sim = Simulator::new(SimulatorBuilder {
            cfg,
            seed: 2,
            positions: Some(vec![(0.0, 0.0), (50.0, 0.0)]),
        });
        let (_, metrics) = sim.run();
        assert!((metrics.delivery_ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pair_out_of_range_has_no_potential_receivers() {
        let mut cfg = base_cfg();
        cfg.fixed_buoy_count = 2;
        let sim = Simulator::new(SimulatorBuilder {
            cfg,
            seed: 3,
            positions: Some(vec![(0.0, 0.0), (130.0, 0.0)]),
        });
        let (_, metrics) = sim.run();
        assert_eq!(metrics.delivery_ratio(), 0.0);
    }

    #[test]
    fn adab_sends_less_often_than_static_at_high_density() {
        let mut static_cfg = base_cfg();
        static_cfg.mode = SchedulerMode::Static;
        static_cfg.fixed_buoy_count = 20;
        static_cfg.world_width = 200.0;
        static_cfg.world_height = 200.0;
        static_cfg.duration = 60.0;

        let mut adab_cfg = static_cfg.clone();
        adab_cfg.mode = SchedulerMode::DynamicAdab;

        let (_, static_metrics) = Simulator::new(SimulatorBuilder {
            cfg: static_cfg,
            seed: 9,
            positions: None,
        })
        .run();
        let (_, adab_metrics) = Simulator::new(SimulatorBuilder {
            cfg: adab_cfg,
            seed: 9,
            positions: None,
        })
        .run();

        let static_sent = static_metrics.summary_rows(&SimConfig::default(), 60.0);
        let adab_sent = adab_metrics.summary_rows(&SimConfig::default(), 60.0);
        let static_sent: u64 = static_sent.iter().find(|(k, _)| k == "Sent").unwrap().1.parse().unwrap();
        let adab_sent: u64 = adab_sent.iter().find(|(k, _)| k == "Sent").unwrap().1.parse().unwrap();
        assert!(adab_sent <= static_sent);
    }

    #[test]
    fn ramp_scenario_grows_active_population_and_records_time_series() {
        let mut cfg = base_cfg();
        cfg.ramp_scenario = true;
        cfg.fixed_buoy_count = 5;
        cfg.duration = 120.0;
        cfg.world_width = 300.0;
        cfg.world_height = 300.0;
        let sim = Simulator::new(SimulatorBuilder {
            cfg,
            seed: 11,
            positions: None,
        });
        let (_, metrics) = sim.run();
        let series = metrics.time_series();
        for pair in series.windows(2) {
            assert!(pair[1].n_buoys >= pair[0].n_buoys);
        }
    }
}
