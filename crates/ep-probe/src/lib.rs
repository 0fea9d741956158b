//! ep-probe: Endpoint measurement for echpilot
//!
//! Measures TCP connect latency to candidate relay endpoints, ranks them
//! with a two-tier scan that penalises jitter, and looks up the public
//! identity seen through an established tunnel.

pub mod candidates;
pub mod identity;
pub mod latency;
pub mod selector;
pub mod stats;

pub use candidates::{parse_candidates, split_host_port};
pub use identity::{IdentityProbe, IdentityReport};
pub use latency::{EndpointCandidate, LatencyProbe, TcpProbe, UNREACHABLE_MS};
pub use selector::{EndpointSelector, Selection, SelectionMethod, SelectionPhase};
