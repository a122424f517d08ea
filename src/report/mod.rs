//! Output tables and run reports.

pub mod generator;
pub mod tables;

pub use generator::write_report;
