//! Metric names and registration for the PBFT engine.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// The sequence (block number) the engine is working to decide.
pub const PBFT_SEQUENCE: &str = "ember_pbft_sequence";
/// The round of the current view.
pub const PBFT_ROUND: &str = "ember_pbft_round";
/// Total rounds advanced past round zero.
pub const PBFT_ROUND_ADVANCES: &str = "ember_pbft_round_advances_total";
/// Total sequences caught up or decided.
pub const PBFT_SEQUENCE_ADVANCES: &str = "ember_pbft_sequence_advances_total";
/// Round-change timeouts fired.
pub const PBFT_TIMEOUTS: &str = "ember_pbft_timeouts_total";
/// Conclusions handed to the backend for insertion.
pub const PBFT_COMMITS: &str = "ember_pbft_commits_total";
/// Seconds from accepting a preprepare to the sequence being finalized.
pub const PBFT_CONSENSUS_SECONDS: &str = "ember_pbft_consensus_seconds";

/// Describe all engine metrics to the installed recorder.
pub fn register_metrics() {
    describe_gauge!(PBFT_SEQUENCE, "The block number the engine is working to decide");
    describe_gauge!(PBFT_ROUND, "The round of the current view");
    describe_counter!(PBFT_ROUND_ADVANCES, "Total rounds advanced past round zero");
    describe_counter!(PBFT_SEQUENCE_ADVANCES, "Total sequences caught up or decided");
    describe_counter!(PBFT_TIMEOUTS, "Round-change timeouts fired");
    describe_counter!(PBFT_COMMITS, "Conclusions handed to the backend for insertion");
    describe_histogram!(
        PBFT_CONSENSUS_SECONDS,
        "Seconds from accepting a preprepare to the sequence being finalized"
    );
}
