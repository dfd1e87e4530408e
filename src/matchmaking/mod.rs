//! Matchmaking pipeline: bucketing, intake, the pairing worker and match delivery
//!
//! Requests flow from [`MatchIntake`] into per-bucket queues in the store, the
//! [`MatchmakerWorker`] pairs the two oldest entries of each queue, and
//! [`MatchDelivery`] lets each requester pick up its record before it expires.

pub mod bucket;
pub mod delivery;
pub mod intake;
pub mod worker;

// Re-export commonly used types
pub use bucket::{sample_skill, SkillBucket, SkillSample};
pub use delivery::MatchDelivery;
pub use intake::{IntakeConfig, MatchIntake};
pub use worker::{
    CycleReport, MatchmakerWorker, PairingOutcome, WorkerConfig, WorkerHandle, WorkerStats,
};
