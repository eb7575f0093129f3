//! EduVault Runtime
//!
//! Runs one certificate verification: issuer detection and perceptual
//! matching, PDF forensics and anomaly scoring execute as independent
//! blocking tasks, and their results are joined before aggregation.

pub mod pipeline;

pub use pipeline::*;
