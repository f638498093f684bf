//! Input checks run before any state is touched

use crate::error::TimelineError;

pub const MAX_BRANCH_NAME_LEN: usize = 64;

/// Names that would collide with engine-generated ones
const RESERVED_BRANCH_NAMES: [&str; 1] = ["main"];

/// Returns the trimmed message
pub fn validate_message(message: &str, max_len: usize) -> Result<&str, TimelineError> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(TimelineError::Validation("Checkpoint message cannot be empty".to_string()));
    }
    let len = trimmed.chars().count();
    if len > max_len {
        return Err(TimelineError::Validation(format!(
            "Checkpoint message too long ({} characters, max {})",
            len, max_len
        )));
    }
    Ok(trimmed)
}

pub fn validate_branch_name(name: &str) -> Result<(), TimelineError> {
    if name.is_empty() {
        return Err(TimelineError::Validation("Branch name cannot be empty".to_string()));
    }
    if name.len() > MAX_BRANCH_NAME_LEN {
        return Err(TimelineError::Validation(format!(
            "Branch name too long ({} characters, max {})",
            name.len(),
            MAX_BRANCH_NAME_LEN
        )));
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
        return Err(TimelineError::Validation(format!(
            "Invalid branch name '{}': use letters, digits, '-' and '_' only",
            name
        )));
    }
    if RESERVED_BRANCH_NAMES.contains(&name) {
        return Err(TimelineError::Validation(format!("Branch name '{}' is reserved", name)));
    }
    Ok(())
}

/// Game types and save names are single, visible path components
pub fn validate_component(kind: &str, value: &str) -> Result<(), TimelineError> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.starts_with('.')
        || value.contains(['/', '\\', '\0']);
    if bad {
        return Err(TimelineError::Validation(format!("Invalid {} '{}'", kind, value)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_rules() {
        assert_eq!(validate_message("  progress  ", 500).unwrap(), "progress");
        assert!(validate_message("", 500).is_err());
        assert!(validate_message(" \t\n", 500).is_err());
        assert!(validate_message(&"x".repeat(500), 500).is_ok());
        assert!(validate_message(&"x".repeat(501), 500).is_err());
        // counted in characters, not bytes
        assert!(validate_message(&"é".repeat(500), 500).is_ok());
    }

    #[test]
    fn test_branch_name_rules() {
        for ok in ["alt", "world1-alt", "speed_run_2", "A-b_C"] {
            assert!(validate_branch_name(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "has space", "slash/name", "dot.name", "main", "ünïcode"] {
            assert!(validate_branch_name(bad).is_err(), "{}", bad);
        }
        assert!(validate_branch_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_component_rules() {
        assert!(validate_component("save", "world1").is_ok());
        assert!(validate_component("save", "My World").is_ok());
        for bad in ["", ".", "..", ".hidden", "a/b"] {
            assert!(validate_component("save", bad).is_err(), "{}", bad);
        }
    }
}
