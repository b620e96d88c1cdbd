use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cached fact about another node: "I last heard from `id` at `last_seen`,
/// and it reported being at `position`."
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub id: Uuid,
    pub last_seen: f64,
    pub position: (f64, f64),
}

/// The unit broadcast over the shared medium. Size on the wire is a
/// deterministic function of the neighbor list length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beacon {
    pub sender_id: Uuid,
    pub mobile: bool,
    pub position: (f64, f64),
    pub battery: f64,
    pub neighbors: Vec<NeighborEntry>,
    pub timestamp: f64,
    /// Only populated by a future multihop "append" mode; no CORE handler sets this yet.
    pub origin_id: Option<Uuid>,
    pub hop_limit: u8,
}

impl Beacon {
    pub fn new(
        sender_id: Uuid,
        mobile: bool,
        position: (f64, f64),
        battery: f64,
        neighbors: Vec<NeighborEntry>,
        timestamp: f64,
    ) -> Self {
        Self {
            sender_id,
            mobile,
            position,
            battery,
            neighbors,
            timestamp,
            origin_id: None,
            hop_limit: 0,
        }
    }

    /// sender_id(16) + mobile(1) + position(8) + battery(4) + timestamp(4), plus
    /// 28 bytes per neighbor (id 16 + timestamp 4 + position 8), plus the
    /// multihop fields (origin_id 16, hop_limit 4) only when origin_id is set.
    pub fn size_bytes(&self) -> usize {
        let mut size = 37 + 28 * self.neighbors.len();
        if self.origin_id.is_some() {
            size += 16 + 4;
        }
        size
    }

    pub fn size_bits(&self) -> usize {
        self.size_bytes() * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_bytes_scales_with_neighbor_count() {
        let sender = Uuid::new_v4();
        let no_neighbors = Beacon::new(sender, false, (0.0, 0.0), 100.0, vec![], 0.0);
        assert_eq!(no_neighbors.size_bytes(), 37);

        let neighbor = NeighborEntry {
            id: Uuid::new_v4(),
            last_seen: 0.0,
            position: (1.0, 1.0),
        };
        let one_neighbor = Beacon::new(sender, false, (0.0, 0.0), 100.0, vec![neighbor], 0.0);
        assert_eq!(one_neighbor.size_bytes(), 37 + 28);
        assert_eq!(one_neighbor.size_bits(), (37 + 28) * 8);
    }

    #[test]
    fn multihop_fields_add_to_size_only_when_present() {
        let sender = Uuid::new_v4();
        let mut beacon = Beacon::new(sender, false, (0.0, 0.0), 100.0, vec![], 0.0);
        let base = beacon.size_bytes();
        beacon.origin_id = Some(Uuid::new_v4());
        beacon.hop_limit = 2;
        assert_eq!(beacon.size_bytes(), base + 20);
    }
}
