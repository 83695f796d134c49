//! Schema definitions and constants

/// Table names
pub mod tables {
    pub const CLUSTERS: &str = "aleo_cluster";
    pub const CLUSTER_STATS: &str = "aleo_cluster_stats";
}

/// Snapshot columns, key first, in insert order
pub const SNAPSHOT_COLUMNS: [&str; 11] = [
    "cluster_name",
    "total",
    "active",
    "inactive",
    "failed",
    "invalid",
    "last_24h_power",
    "last_epoch_power",
    "yesterday_reward",
    "today_reward",
    "expected_reward",
];

/// Column list for snapshot statements
#[must_use]
pub fn snapshot_column_list() -> String {
    SNAPSHOT_COLUMNS.join(", ")
}

/// `?` placeholders, one per snapshot column
#[must_use]
pub fn snapshot_placeholders() -> String {
    vec!["?"; SNAPSHOT_COLUMNS.len()].join(", ")
}
