//! Validation helpers for DTOs.

use std::collections::HashSet;

use validator::ValidationError;

/// Validates that the decay floor does not exceed the base award.
///
/// ```ignore
/// validate_point_range(500, 100) // Ok
/// validate_point_range(100, 500) // Err
/// ```
pub fn validate_point_range(base: u32, floor: u32) -> Result<(), ValidationError> {
    if floor > base {
        let mut err = ValidationError::new("point_range");
        err.message = Some(format!("min_points ({floor}) must not exceed points ({base})").into());
        return Err(err);
    }

    Ok(())
}

/// Validates that challenge ids are non-blank and distinct.
pub fn validate_unique_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for id in ids {
        let id = id.trim();
        if id.is_empty() {
            let mut err = ValidationError::new("challenge_id_blank");
            err.message = Some("challenge ids must not be blank".into());
            return Err(err);
        }
        if !seen.insert(id) {
            let mut err = ValidationError::new("challenge_id_duplicate");
            err.message = Some(format!("challenge id `{id}` is used more than once").into());
            return Err(err);
        }
    }

    Ok(())
}
