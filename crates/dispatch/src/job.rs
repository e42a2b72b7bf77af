//! Job catalogue and priority tiers

use serde::{Deserialize, Serialize};

/// Priority class. Tier is a pure function of the job kind; queues are
/// drained high to low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    High,
    Medium,
    Low,
}

impl Tier {
    /// All tiers in drain order.
    pub const ALL: [Tier; 3] = [Tier::High, Tier::Medium, Tier::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Medium => "medium",
            Tier::Low => "low",
        }
    }
}

/// The fixed catalogue of work units.
///
/// Multi-phase sync fans out: a library sync enqueues one title-trophy job
/// per title it discovers instead of looping inline, so every unit stays
/// short and independently retryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Resolve and refresh a player's profile.
    ProfileSync { online_id: String },
    /// Fetch one page of a player's title list.
    LibrarySync { account_id: String, offset: u32 },
    /// Fetch per-trophy detail for one title.
    TitleTrophySync {
        account_id: String,
        np_comm_id: String,
    },
}

impl Job {
    pub fn tier(&self) -> Tier {
        match self {
            Job::ProfileSync { .. } => Tier::High,
            Job::LibrarySync { .. } => Tier::Medium,
            Job::TitleTrophySync { .. } => Tier::Low,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::ProfileSync { .. } => "profile_sync",
            Job::LibrarySync { .. } => "library_sync",
            Job::TitleTrophySync { .. } => "title_trophy_sync",
        }
    }
}

/// One unit of work as it travels through a queue. Created at dispatch
/// time, consumed exactly once by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub subject_id: String,
    pub job: Job,
}
