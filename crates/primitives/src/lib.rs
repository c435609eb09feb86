//! Shared domain types for the staker daemon.
//!
//! Everything here is plain data: script commitments, proof-of-possession
//! bundles, and the payloads exchanged with the coordinator chain. No I/O.

pub mod delegation;
pub mod pop;
pub mod script;
pub mod types;

pub use delegation::{DelegationData, InclusionProof, UndelegationData};
pub use pop::ProofOfPossession;
pub use script::StakingScriptData;
pub use types::BlockRef;
