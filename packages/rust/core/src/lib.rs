//! Identity reconciliation core.
//!
//! This crate ties together cluster collection, canonical-record selection,
//! merging, and response formatting into one atomic `reconcile` operation
//! (see [`reconcile::Reconciler`]).

pub mod cluster;
pub mod merge;
pub mod reconcile;
pub mod resolver;
pub mod response;

pub use reconcile::Reconciler;
