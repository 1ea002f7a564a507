//! Per-user key namespaces and name validation.
//!
//! Every user owns the keys below `"{id}-{username}/"`. That prefix is the
//! only thing separating users in the bucket, so it is derived here and
//! nowhere else.

use crate::errors::{DriveError, DriveResult, NameViolation};

pub const MAX_NAME_LEN: usize = 60;
const FORBIDDEN_CHARS: [char; 10] = ['/', '<', '>', ':', '"', '?', '\\', '|', '*', '\0'];

/// Key prefix owning all objects of one user.
pub fn build_user_prefix(id: i64, username: &str) -> String {
    format!("{}-{}/", id, username)
}

/// Check a single file or folder name supplied by a user.
///
/// Fails for blank names, names longer than 60 characters, names holding any
/// of `/ < > : " ? \ | *` or NUL, and names ending with `.`.
pub fn validate_name(name: &str) -> DriveResult<()> {
    check_name(name).map_err(|violation| DriveError::InvalidName {
        name: name.to_string(),
        violation,
    })
}

fn check_name(name: &str) -> Result<(), NameViolation> {
    if name.trim().is_empty() {
        return Err(NameViolation::Blank);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(NameViolation::TooLong);
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(NameViolation::ForbiddenCharacter(c));
    }
    if name.ends_with('.') {
        return Err(NameViolation::TrailingDot);
    }
    Ok(())
}

/// Validate a `/`-separated relative file path, segment by segment.
pub fn validate_relative_path(path: &str) -> DriveResult<()> {
    for segment in path.split('/') {
        validate_name(segment)?;
    }
    Ok(())
}

/// Optional username hardening: lowercase, collapse runs of whitespace,
/// `.`, `_` and `-` into a single `-`, and trim separators at both ends.
///
/// Not applied by [`build_user_prefix`]; callers opt in when registering.
pub fn normalize_username(username: &str) -> String {
    let mut out = String::with_capacity(username.len());
    let mut pending_sep = false;
    for c in username.trim().chars() {
        if c.is_whitespace() || matches!(c, '.' | '_' | '-') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.extend(c.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(name: &str) -> Option<NameViolation> {
        check_name(name).err()
    }

    #[test]
    fn prefix_is_id_dash_username_slash() {
        assert_eq!(build_user_prefix(1, "alice"), "1-alice/");
        assert_ne!(build_user_prefix(1, "1-alice"), build_user_prefix(11, "alice"));
    }

    #[test]
    fn accepts_ordinary_names() {
        for name in ["a", "report.pdf", "my folder", ".hidden", &"x".repeat(60)] {
            assert!(validate_name(name).is_ok(), "{name:?} should be valid");
        }
    }

    #[test]
    fn rejects_blank_and_long_names() {
        assert_eq!(violation(""), Some(NameViolation::Blank));
        assert_eq!(violation("   "), Some(NameViolation::Blank));
        assert_eq!(violation(&"x".repeat(61)), Some(NameViolation::TooLong));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        assert!(validate_name(&"é".repeat(60)).is_ok());
    }

    #[test]
    fn rejects_every_forbidden_character() {
        for c in FORBIDDEN_CHARS {
            let name = format!("a{}b", c);
            assert_eq!(
                violation(&name),
                Some(NameViolation::ForbiddenCharacter(c)),
                "{name:?}"
            );
        }
    }

    #[test]
    fn rejects_trailing_dot() {
        assert_eq!(violation("name."), Some(NameViolation::TrailingDot));
        assert_eq!(violation(".."), Some(NameViolation::TrailingDot));
    }

    #[test]
    fn relative_paths_are_checked_per_segment() {
        assert!(validate_relative_path("2025/photos/a.jpg").is_ok());
        assert!(validate_relative_path("2025//a.jpg").is_err());
        assert!(validate_relative_path("../a.jpg").is_err());
        assert!(validate_relative_path("a.jpg/").is_err());
    }

    #[test]
    fn normalize_squashes_separators() {
        assert_eq!(normalize_username("  John..Doe_ "), "john-doe");
        assert_eq!(normalize_username("__a-._b"), "a-b");
        assert_eq!(normalize_username("Bob"), "bob");
    }
}
