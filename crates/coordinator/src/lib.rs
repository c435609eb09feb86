//! Client interface to the proof-of-stake coordinator chain.
//!
//! The engine consumes the [`client::CoordinatorClient`] trait; the
//! [`http::HttpCoordinator`] implementation speaks JSON-RPC to a coordinator
//! node and signs coordinator-chain payloads with a local keyring.

pub mod client;
pub mod error;
pub mod http;
pub mod keyring;
pub mod types;

pub use client::CoordinatorClient;
pub use error::{CoordinatorError, CoordinatorResult};
pub use http::HttpCoordinator;
pub use keyring::Keyring;
pub use types::{
    CoordinatorParams, DelegationDetails, UnbondingSignatures, UndelegationInfo, ValidatorInfo,
    ValidatorsResponse,
};
