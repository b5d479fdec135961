//! Symbol clustering and pairwise correlation estimates
//!
//! Symbols are statically partitioned into named clusters assumed to move
//! together. The correlation between two symbols is a pluggable input:
//! the default source is the cluster heuristic (same cluster 0.7, cross
//! cluster 0.4) optionally overridden by explicit pair values, but a real
//! return-series estimator can be swapped in without touching the
//! throttle.

use std::collections::HashMap;

/// Cluster name used for symbols not present in any configured cluster
pub const UNCLUSTERED: &str = "uncorrelated";

/// Symbol -> cluster lookup built once from configuration
#[derive(Debug, Clone)]
pub struct ClusterMap {
    by_symbol: HashMap<String, String>,
}

impl ClusterMap {
    pub fn from_config(clusters: &HashMap<String, Vec<String>>) -> Self {
        let mut by_symbol = HashMap::new();
        for (cluster, symbols) in clusters {
            for symbol in symbols {
                by_symbol.insert(symbol.clone(), cluster.clone());
            }
        }
        Self { by_symbol }
    }

    /// The cluster a symbol belongs to (pure lookup)
    pub fn cluster_of(&self, symbol: &str) -> &str {
        self.by_symbol
            .get(symbol)
            .map(|s| s.as_str())
            .unwrap_or(UNCLUSTERED)
    }

    pub fn same_cluster(&self, a: &str, b: &str) -> bool {
        self.cluster_of(a) == self.cluster_of(b)
    }
}

/// Pairwise correlation estimate between two symbols
pub trait CorrelationSource: Send + Sync {
    fn correlation(&self, a: &str, b: &str) -> f64;
}

/// Cluster-based correlation heuristic with optional explicit overrides
///
/// Explicit pair values (symmetric) win; otherwise same-cluster pairs get
/// the configured same-cluster estimate and everything else the
/// cross-cluster one.
#[derive(Debug, Clone)]
pub struct ClusterHeuristic {
    clusters: ClusterMap,
    explicit: HashMap<(String, String), f64>,
    same_cluster: f64,
    cross_cluster: f64,
}

impl ClusterHeuristic {
    pub fn new(clusters: ClusterMap, same_cluster: f64, cross_cluster: f64) -> Self {
        Self {
            clusters,
            explicit: HashMap::new(),
            same_cluster,
            cross_cluster,
        }
    }

    /// Add an explicit pair correlation (stored symmetrically)
    pub fn with_pair(mut self, a: &str, b: &str, correlation: f64) -> Self {
        self.explicit
            .insert((a.to_string(), b.to_string()), correlation);
        self.explicit
            .insert((b.to_string(), a.to_string()), correlation);
        self
    }
}

impl CorrelationSource for ClusterHeuristic {
    fn correlation(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        if let Some(value) = self.explicit.get(&(a.to_string(), b.to_string())) {
            return *value;
        }
        if self.clusters.same_cluster(a, b) {
            self.same_cluster
        } else {
            self.cross_cluster
        }
    }
}
