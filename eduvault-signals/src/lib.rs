//! EduVault Signals
//!
//! Independent producers feeding the trust aggregator:
//! - **Detector**: recognises the issuer from OCR keywords, falling back to the logo crop
//! - **Matcher**: compares the certificate hash with every stored template of the issuer
//! - **Forensics**: scores PDF authoring cues around the holder's name
//! - **Anomaly**: classifies an embedding with a fitted isolation forest
//!
//! Detector and matcher share the issuer registry; forensics and anomaly
//! depend on nothing but their own inputs.

pub mod anomaly;
pub mod detector;
pub mod forensics;
pub mod isolation;
pub mod matcher;
pub mod pdf;
pub mod traits;

pub use anomaly::*;
pub use detector::*;
pub use forensics::*;
pub use isolation::*;
pub use matcher::*;
pub use pdf::*;
pub use traits::*;
