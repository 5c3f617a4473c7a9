//! Result type alias for engine operations

use crate::error::CrucibleError;

/// Standard Result type for engine operations
pub type Result<T> = std::result::Result<T, CrucibleError>;
