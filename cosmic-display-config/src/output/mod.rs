// SPDX-License-Identifier: GPL-3.0-only

/// Persisted output configurations, keyed by hardware signature
pub mod record;
/// Stable identifiers for output arrangements and single outputs
pub mod signature;

pub use record::*;
pub use signature::HardwareSignature;
