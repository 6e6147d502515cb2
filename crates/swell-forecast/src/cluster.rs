//! Geographic de-duplication of the spot catalog.
//!
//! Spots whose coordinates agree to two decimals (roughly 1 km) share one
//! fetch. The representative is the first spot seen in catalog order.

use std::collections::HashMap;

use crate::cache_key::fixed_decimal;
use crate::types::Spot;

/// Rounded-coordinate key, e.g. `"43.66,-1.45"`.
pub fn cluster_key(lat: f64, lng: f64) -> String {
    format!("{},{}", fixed_decimal(lat, 2), fixed_decimal(lng, 2))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub key: String,
    pub representative_id: i64,
    pub representative_name: String,
    pub representative_lat: f64,
    pub representative_lng: f64,
    pub member_spot_ids: Vec<i64>,
}

/// Clusters in catalog insertion order, addressable by key.
#[derive(Debug, Clone, Default)]
pub struct SpotClusters {
    clusters: Vec<Cluster>,
    by_key: HashMap<String, usize>,
    by_spot: HashMap<i64, usize>,
}

impl SpotClusters {
    /// Group a catalog. Every spot lands in exactly one cluster.
    pub fn build(spots: &[Spot]) -> Self {
        let mut out = Self::default();

        for spot in spots {
            let key = cluster_key(spot.lat, spot.lng);
            let idx = match out.by_key.get(&key) {
                Some(&idx) => {
                    out.clusters[idx].member_spot_ids.push(spot.id);
                    idx
                }
                None => {
                    out.clusters.push(Cluster {
                        key: key.clone(),
                        representative_id: spot.id,
                        representative_name: spot.name.clone(),
                        representative_lat: spot.lat,
                        representative_lng: spot.lng,
                        member_spot_ids: vec![spot.id],
                    });
                    let idx = out.clusters.len() - 1;
                    out.by_key.insert(key, idx);
                    idx
                }
            };
            out.by_spot.insert(spot.id, idx);
        }

        out
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter()
    }

    pub fn get(&self, key: &str) -> Option<&Cluster> {
        self.by_key.get(key).map(|&idx| &self.clusters[idx])
    }

    /// The cluster a spot was grouped into.
    pub fn cluster_of(&self, spot_id: i64) -> Option<&Cluster> {
        self.by_spot.get(&spot_id).map(|&idx| &self.clusters[idx])
    }
}
