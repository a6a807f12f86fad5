//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that a passcode is a single non-blank token.
///
/// The exact length is configurable and checked by [`validate_passcode_length`].
pub fn validate_passcode(passcode: &str) -> Result<(), ValidationError> {
    if passcode.is_empty() || passcode.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("passcode_format");
        err.message = Some("Passcode must be non-empty and contain no whitespace".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a passcode has exactly `expected` characters.
///
/// # Examples
///
/// ```ignore
/// validate_passcode_length("482913", 6) // Ok
/// validate_passcode_length("48291", 6)  // Err - too short
/// ```
pub fn validate_passcode_length(passcode: &str, expected: usize) -> Result<(), ValidationError> {
    let length = passcode.chars().count();
    if length != expected {
        let mut err = ValidationError::new("passcode_length");
        err.message =
            Some(format!("Passcode must be exactly {expected} characters (got {length})").into());
        return Err(err);
    }
    Ok(())
}

/// Validates that an option label is not blank.
pub fn validate_option(option: &str) -> Result<(), ValidationError> {
    if option.trim().is_empty() {
        let mut err = ValidationError::new("option_blank");
        err.message = Some("Option must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_passcode_valid() {
        assert!(validate_passcode("482913").is_ok());
        assert!(validate_passcode("abcDEF").is_ok());
    }

    #[test]
    fn test_validate_passcode_invalid_format() {
        assert!(validate_passcode("").is_err()); // empty
        assert!(validate_passcode("48 913").is_err()); // space
        assert!(validate_passcode("\t82913").is_err()); // tab
    }

    #[test]
    fn test_validate_passcode_length() {
        assert!(validate_passcode_length("482913", 6).is_ok());
        assert!(validate_passcode_length("48291", 6).is_err()); // too short
        assert!(validate_passcode_length("4829134", 6).is_err()); // too long
        assert!(validate_passcode_length("4829", 4).is_ok());
    }

    #[test]
    fn test_validate_option() {
        assert!(validate_option("Paris").is_ok());
        assert!(validate_option("   ").is_err());
    }
}
