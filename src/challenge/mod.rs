//! Anti-automation challenge handling
//!
//! Classification is a pure function over page signals; recovery is one generic state
//! machine that consumes it for every vendor.

mod detector;
mod recovery;

pub use detector::{
    classify, has_primary_content, solve_selectors, ChallengeMatch, ChallengeVendor, PageSignals,
    MATCH_THRESHOLD,
};
pub use recovery::{
    ChallengeRecovery, ChallengeSettings, ChallengeStats, RecoveryOutcome, RecoveryState,
};
