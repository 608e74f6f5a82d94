//! Quark topology assigner — deterministic per-instance identity.
//!
//! Given cluster-level options and a 1-based instance index, derives the
//! instance's name, VPN address and options. The random prefix set is
//! generated once per assigner and sorted, so every call during one
//! cluster-create maps an index to the same prefix.
//!
//! # Components
//!
//! - **`prefixes`** — Random, sorted, unique instance name prefixes
//! - **`vpn`** — VPN address derivation from a /24 network
//! - **`assigner`** — Per-instance options for create and scale-out

pub mod assigner;
pub mod prefixes;
pub mod vpn;

pub use assigner::TopologyAssigner;
pub use prefixes::InstancePrefixes;
pub use vpn::{vpn_address, vpn_index};
