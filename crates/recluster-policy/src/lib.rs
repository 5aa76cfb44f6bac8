//! recluster-policy — which policy governs a workload.
//!
//! - [`resolve`] applies the precedence rule (skip, exact name, selector,
//!   cluster default) and explains its answer with a [`ResolutionReason`].
//! - [`selector`] implements Kubernetes label-selector matching.
//! - [`admission`] decides whether a new workload gets the placement gate.

pub mod admission;
pub mod error;
pub mod reason;
pub mod resolve;
pub mod selector;

pub use error::{ResolveError, ResolveResult};
pub use reason::ResolutionReason;
pub use resolve::{Resolution, resolve};
pub use selector::Selector;
