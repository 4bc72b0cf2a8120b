use ulid::Ulid;

use crate::identity::IdentityError;
use crate::store::StoreError;

/// The one failure reason an orchestrated operation reports.
///
/// Notification failures never appear here; they are logged and dropped.
#[derive(Debug)]
pub enum ServiceError {
    Validation(String),
    Unauthenticated(IdentityError),
    /// Absent, or owned by someone else.
    NotFound(Ulid),
    Storage(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Validation(msg) => write!(f, "validation error: {msg}"),
            ServiceError::Unauthenticated(e) => write!(f, "unauthenticated: {e}"),
            ServiceError::NotFound(id) => write!(f, "booking not found: {id}"),
            ServiceError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Unauthenticated(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            StoreError::Validation(msg) => ServiceError::Validation(msg.to_string()),
            StoreError::WalError(e) => ServiceError::Storage(e),
        }
    }
}

impl From<IdentityError> for ServiceError {
    fn from(e: IdentityError) -> Self {
        ServiceError::Unauthenticated(e)
    }
}
