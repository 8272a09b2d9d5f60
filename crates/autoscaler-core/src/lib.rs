//! Core prediction and decision algorithms for the fleet autoscaler: the
//! queue model, analyzer, EKF-based tuner, capacity analyzer, arbitrator,
//! optimizer, and the reconciler that ties them together.

pub mod analyzer;
pub mod arbitrator;
pub mod capacity;
pub mod ekf;
pub mod model;
pub mod optimizer;
pub mod queue;
pub mod reconciler;
pub mod tuner;

pub use model::{Action, ParamBounds, ProvenanceFlags, ServiceParameters, VariantDecision};
