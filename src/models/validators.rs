use std::borrow::Cow;

use validator::ValidationError;

/// Reject values that are empty or whitespace-only after trimming.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some(Cow::Borrowed("Value cannot be empty or whitespace-only"));
        return Err(err);
    }
    Ok(())
}
