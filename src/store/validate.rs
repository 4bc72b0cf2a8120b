use crate::limits::*;
use crate::model::Ms;

use super::StoreError;

pub(crate) fn validate_owner(owner_id: &str) -> Result<(), StoreError> {
    if owner_id.is_empty() {
        return Err(StoreError::Validation("owner id is empty"));
    }
    if owner_id.len() > MAX_OWNER_ID_LEN {
        return Err(StoreError::Validation("owner id too long"));
    }
    Ok(())
}

pub(crate) fn validate_schedule(scheduled_at: Ms) -> Result<(), StoreError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&scheduled_at) {
        return Err(StoreError::Validation("scheduled_at out of range"));
    }
    Ok(())
}

/// Returns the trimmed name.
pub(crate) fn validate_service_name(name: &str) -> Result<&str, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::Validation("service name is empty"));
    }
    if name.len() > MAX_SERVICE_NAME_LEN {
        return Err(StoreError::Validation("service name too long"));
    }
    Ok(name)
}
