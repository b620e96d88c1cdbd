use std::collections::{HashMap, HashSet};

use beacon_sim_types::SimConfig;
use uuid::Uuid;

/// One row of the ramp-mode time-series CSV.
#[derive(Debug, Clone, Copy)]
pub struct TimeSeriesSample {
    pub time: f64,
    pub delivery_ratio: f64,
    pub n_buoys: usize,
    pub avg_unique_nodes: f64,
    pub avg_neighbors: f64,
}

/// Counters and discovery bookkeeping accumulated over a run.
#[derive(Debug, Default)]
pub struct Metrics {
    beacons_sent: u64,
    beacons_received: u64,
    beacons_lost: u64,
    beacons_collided: u64,
    total_latency: f64,

    delivered_beacons: HashSet<(Uuid, u64)>,
    discovery_times: HashMap<Uuid, HashMap<Uuid, f64>>,
    reaction_latencies: Vec<f64>,
    scheduler_latencies: Vec<f64>,

    potentially_sent: u64,
    actually_received: u64,

    unique_nodes_per_buoy: HashMap<Uuid, HashSet<Uuid>>,
    avg_neighbors_samples: Vec<f64>,

    time_series: Vec<TimeSeriesSample>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_sent(&mut self) {
        self.beacons_sent += 1;
    }

    pub fn log_potentially_sent(&mut self, n_receivers: usize) {
        self.potentially_sent += n_receivers as u64;
    }

    pub fn log_lost(&mut self, count: u64) {
        self.beacons_lost += count;
    }

    pub fn log_collision(&mut self) {
        self.beacons_collided += 1;
    }

    pub fn record_scheduler_latency(&mut self, latency: f64) {
        self.scheduler_latencies.push(latency);
    }

    /// Dedups on `(sender, timestamp)`; only the first receiver anywhere to
    /// report a given beacon instance counts towards `received`/
    /// `total_latency`/discovery/unique-node/reaction-latency bookkeeping.
    /// Every other receiver that independently receives that same instance
    /// still counts via `log_actually_received`, just not here.
    pub fn log_received(&mut self, sender_id: Uuid, timestamp: f64, receive_time: f64, receiver_id: Uuid) {
        let key = (sender_id, timestamp.to_bits());
        if self.delivered_beacons.insert(key) {
            self.beacons_received += 1;
            self.total_latency += receive_time - timestamp;

            self.discovery_times
                .entry(receiver_id)
                .or_default()
                .entry(sender_id)
                .or_insert_with(|| {
                    self.reaction_latencies.push(receive_time - timestamp);
                    receive_time
                });

            self.unique_nodes_per_buoy
                .entry(receiver_id)
                .or_default()
                .insert(sender_id);
        }
    }

    pub fn log_actually_received(&mut self) {
        self.actually_received += 1;
    }

    pub fn record_avg_neighbors_sample(&mut self, avg: f64) {
        self.avg_neighbors_samples.push(avg);
    }

    pub fn log_timepoint(&mut self, time: f64, n_buoys: usize, avg_neighbors: f64) {
        self.time_series.push(TimeSeriesSample {
            time,
            delivery_ratio: self.delivery_ratio(),
            n_buoys,
            avg_unique_nodes: self.avg_unique_nodes_discovered(),
            avg_neighbors,
        });
    }

    pub fn time_series(&self) -> &[TimeSeriesSample] {
        &self.time_series
    }

    pub fn delivery_ratio(&self) -> f64 {
        if self.potentially_sent == 0 {
            0.0
        } else {
            self.actually_received as f64 / self.potentially_sent as f64
        }
    }

    pub fn avg_unique_nodes_discovered(&self) -> f64 {
        if self.unique_nodes_per_buoy.is_empty() {
            return 0.0;
        }
        let total: usize = self.unique_nodes_per_buoy.values().map(HashSet::len).sum();
        total as f64 / self.unique_nodes_per_buoy.len() as f64
    }

    fn avg_scheduler_latency(&self) -> f64 {
        if self.scheduler_latencies.is_empty() {
            0.0
        } else {
            self.scheduler_latencies.iter().sum::<f64>() / self.scheduler_latencies.len() as f64
        }
    }

    fn final_avg_neighbors(&self) -> f64 {
        if self.avg_neighbors_samples.is_empty() {
            0.0
        } else {
            self.avg_neighbors_samples.iter().sum::<f64>() / self.avg_neighbors_samples.len() as f64
        }
    }

    /// Build the `Metric,Value` row list in the order the summary CSV requires.
    pub fn summary_rows(&self, cfg: &SimConfig, sim_time: f64) -> Vec<(String, String)> {
        let avg_latency = if self.beacons_received == 0 {
            0.0
        } else {
            self.total_latency / self.beacons_received as f64
        };
        let collision_rate = if self.potentially_sent == 0 {
            0.0
        } else {
            self.beacons_collided as f64 / self.potentially_sent as f64
        };
        let avg_reaction_latency = if self.reaction_latencies.is_empty() {
            0.0
        } else {
            self.reaction_latencies.iter().sum::<f64>() / self.reaction_latencies.len() as f64
        };
        let throughput = if sim_time > 0.0 {
            self.beacons_received as f64 / sim_time
        } else {
            0.0
        };

        let mut rows = vec![
            ("Scheduler Type".to_string(), cfg.mode.to_string()),
            ("Multihop Mode".to_string(), "none".to_string()),
            (
                "World Size".to_string(),
                format!("{}x{}", cfg.world_width, cfg.world_height),
            ),
            ("Mobile Buoys".to_string(), cfg.mobile_buoy_count.to_string()),
            ("Fixed Buoys".to_string(), cfg.fixed_buoy_count.to_string()),
            ("Simulation Duration".to_string(), format!("{:.6}", cfg.duration)),
            ("Sent".to_string(), self.beacons_sent.to_string()),
            ("Received".to_string(), self.beacons_received.to_string()),
            ("Lost".to_string(), self.beacons_lost.to_string()),
            ("Collisions".to_string(), self.beacons_collided.to_string()),
            ("Avg Latency".to_string(), format!("{avg_latency:.6}")),
            (
                "Avg Scheduler Latency".to_string(),
                format!("{:.6}", self.avg_scheduler_latency()),
            ),
            ("Delivery Ratio".to_string(), format!("{:.6}", self.delivery_ratio())),
            ("Collision Rate".to_string(), format!("{collision_rate:.6}")),
            (
                "Avg Reaction Latency".to_string(),
                format!("{avg_reaction_latency:.6}"),
            ),
            ("Throughput (beacons/sec)".to_string(), format!("{throughput:.6}")),
            ("Potentially Sent".to_string(), self.potentially_sent.to_string()),
            ("Actually Received".to_string(), self.actually_received.to_string()),
            (
                "Average Neighbors".to_string(),
                format!("{:.6}", self.final_avg_neighbors()),
            ),
            (
                "Avg Unique Nodes Discovered".to_string(),
                format!("{:.6}", self.avg_unique_nodes_discovered()),
            ),
        ];
        if let Some(density) = cfg.density {
            rows.push(("Density".to_string(), format!("{density:.6}")));
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_ratio_is_zero_with_no_potential_receivers() {
        let metrics = Metrics::new();
        assert_eq!(metrics.delivery_ratio(), 0.0);
    }

    #[test]
    fn log_received_dedups_same_sender_timestamp_pair() {
        let mut metrics = Metrics::new();
        let sender = Uuid::new_v4();
        let r1 = Uuid::new_v4();
        let r2 = Uuid::new_v4();
        metrics.log_received(sender, 1.0, 1.01, r1);
        metrics.log_received(sender, 1.0, 1.02, r2);
        // received counts unique (sender, timestamp) instances, not receiver count
        let rows = metrics.summary_rows(&SimConfig::default(), 10.0);
        let received = rows.iter().find(|(k, _)| k == "Received").unwrap();
        assert_eq!(received.1, "1");
    }

    #[test]
    fn avg_unique_nodes_discovered_averages_across_receivers() {
        let mut metrics = Metrics::new();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let r1 = Uuid::new_v4();
        metrics.log_received(s1, 0.0, 0.01, r1);
        metrics.log_received(s2, 0.0, 0.01, r1);
        assert_eq!(metrics.avg_unique_nodes_discovered(), 2.0);
    }
}
