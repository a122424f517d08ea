//! Analysis passes over census records and mobility matrices.

pub mod aggregator;
pub mod capitals;
pub mod filter;
pub mod histogram;
pub mod redistribution;
pub mod threshold;

pub use aggregator::run_extraction;
