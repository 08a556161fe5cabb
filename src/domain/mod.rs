//! Domain layer for DOMD Guardian
//!
//! CDD Principle: Domain Model - Pure business logic for dataset conformance
//! - Contains records, partitions, anomalies and the error taxonomy
//! - Independent of CSV files, terminals or suggestion services
//! - Expresses the ubiquitous language of rows, columns and constraint violations

pub mod anomalies;
pub mod records;

// Re-export main domain types for convenience
pub use anomalies::*;
pub use records::*;
