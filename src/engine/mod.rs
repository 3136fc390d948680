//! Core engine — bet lifecycle, the daily placement cycle, and the
//! settlement reconciliation loop.

pub mod cycle;
pub mod lifecycle;
pub mod reconcile;
