//! # Integration Flows
//!
//! Several block sync nodes wired together through the mock network.

pub mod flows;
