//! quark-cluster — cluster lifecycle for Quark.
//!
//! Drives a cloud backend, a DNS backend and remote hosts through the
//! capability traits in `quark-core` to create, repair, scale and delete
//! clusters.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── create_cluster / add_instance
//!   │   ├── TopologyAssigner → per-instance options
//!   │   ├── CloudProvider::create_instance (fan-out)
//!   │   └── DnsRegistrar → A/AAAA for instance and cluster names
//!   ├── delete_cluster / remove_instance
//!   └── converge (also update_cluster)
//!       ├── MemberSync → machine ids → members file on every host
//!       └── MeshConfigurator → generate │ distribute │ activate
//! ```
//!
//! Every multi-instance step is a [`FanOut`] joined before the next step
//! starts.

pub mod dns;
pub mod fanout;
pub mod membership;
pub mod mesh;
pub mod orchestrator;

pub use dns::DnsRegistrar;
pub use fanout::{FanOut, FanOutReport, Outcome};
pub use membership::{MemberSync, ProxyPredicate, default_proxy_predicate};
pub use mesh::{MeshConfigurator, MeshStats};
pub use orchestrator::{CatalogKind, ClusterReport, Orchestrator};
