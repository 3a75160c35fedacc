use thiserror::Error;

use crate::Role;

pub const MAX_SPACE_NAME_CHARS: usize = 100;
pub const MAX_FILE_NAME_CHARS: usize = 255;
pub const MAX_ACCOUNT_CHARS: usize = 50;
pub const MAX_FILE_SIZE: u64 = 200 * 1024 * 1024;
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 100;

const ALLOWED_MEDIA_FAMILIES: [&str; 5] = ["image", "text", "application", "video", "audio"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("space name must be between 1 and {MAX_SPACE_NAME_CHARS} characters")]
    SpaceName,
    #[error("file name must be between 1 and {MAX_FILE_NAME_CHARS} characters")]
    FileName,
    #[error("account must be between 1 and {MAX_ACCOUNT_CHARS} characters")]
    Account,
    #[error("file exceeds {0} MB limit")]
    FileTooLarge(u64),
    #[error("file type not allowed")]
    MediaType,
    #[error("default join role must be member or viewer")]
    JoinRole,
    #[error("limit must be between 1 and {MAX_PAGE_LIMIT}")]
    PageLimit,
    #[error("invalid cursor")]
    Cursor,
    #[error("invalid {0}")]
    InvalidField(&'static str),
}

/// Trims and bounds a space display name.
pub fn validate_space_name(name: &str) -> Result<String, ValidationError> {
    bounded(name, MAX_SPACE_NAME_CHARS).ok_or(ValidationError::SpaceName)
}

/// Trims and bounds a file display name.
pub fn validate_file_name(name: &str) -> Result<String, ValidationError> {
    bounded(name, MAX_FILE_NAME_CHARS).ok_or(ValidationError::FileName)
}

/// Trims and bounds an external account identifier (roll number).
pub fn validate_account(account: &str) -> Result<String, ValidationError> {
    bounded(account, MAX_ACCOUNT_CHARS).ok_or(ValidationError::Account)
}

pub fn validate_file_size(size: u64) -> Result<(), ValidationError> {
    if size > MAX_FILE_SIZE {
        return Err(file_too_large(MAX_FILE_SIZE));
    }
    Ok(())
}

pub fn file_too_large(limit_bytes: u64) -> ValidationError {
    ValidationError::FileTooLarge(limit_bytes / (1024 * 1024))
}

/// Returns the media type to store for an upload. A missing or empty type
/// falls back to `application/octet-stream`; anything outside the allowed
/// top-level families is rejected.
pub fn normalize_media_type(raw: Option<&str>) -> Result<String, ValidationError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(DEFAULT_MEDIA_TYPE.to_owned());
    };
    let essence = raw.split(';').next().unwrap_or_default().trim();
    let Some((family, subtype)) = essence.split_once('/') else {
        return Err(ValidationError::MediaType);
    };
    if subtype.is_empty() || !ALLOWED_MEDIA_FAMILIES.contains(&family.to_ascii_lowercase().as_str())
    {
        return Err(ValidationError::MediaType);
    }
    Ok(essence.to_ascii_lowercase())
}

pub fn validate_join_role(role: Role) -> Result<Role, ValidationError> {
    if role.is_joinable() {
        Ok(role)
    } else {
        Err(ValidationError::JoinRole)
    }
}

/// Resolves an optional page size, defaulting to [`DEFAULT_PAGE_LIMIT`].
pub fn page_limit(requested: Option<usize>) -> Result<usize, ValidationError> {
    match requested {
        None => Ok(DEFAULT_PAGE_LIMIT),
        Some(limit) if (1..=MAX_PAGE_LIMIT).contains(&limit) => Ok(limit),
        Some(_) => Err(ValidationError::PageLimit),
    }
}

/// Produces a header- and path-safe rendition of a user supplied file name.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_CHARS)
        .collect();
    if sanitized.is_empty() {
        "file".to_owned()
    } else {
        sanitized
    }
}

fn bounded(value: &str, max_chars: usize) -> Option<String> {
    let trimmed = value.trim();
    let count = trimmed.chars().count();
    if count == 0 || count > max_chars {
        return None;
    }
    Some(trimmed.to_owned())
}
