//! ProDOS path handling.
//!
//! Paths are `/`-delimited and case-insensitive. An absolute path starts
//! with the volume name (`/VOLUME/DIR/FILE`); a path without a leading `/`
//! is relative to the volume directory.

use super::MAX_NAME_LENGTH;
use crate::error::{ProdosError, ProdosResult};

/// Expand `path` to an absolute, uppercased path on `volume_name`.
///
/// # Examples
/// ```
/// use prodos_core::absolute_path;
/// assert_eq!(absolute_path("games/chess", "DISK"), "/DISK/GAMES/CHESS");
/// assert_eq!(absolute_path("", "DISK"), "/DISK");
/// assert_eq!(absolute_path("/disk/a", "DISK"), "/DISK/A");
/// ```
pub fn absolute_path(path: &str, volume_name: &str) -> String {
    let upper = path.to_uppercase();
    if upper.starts_with('/') {
        upper
    } else if upper.is_empty() {
        format!("/{}", volume_name.to_uppercase())
    } else {
        format!("/{}/{}", volume_name.to_uppercase(), upper)
    }
}

/// Split a path into its parent directory and final name, uppercased.
///
/// # Examples
/// ```
/// use prodos_core::split_path;
/// assert_eq!(split_path("/vol/dir/file"), ("/VOL/DIR".to_string(), "FILE".to_string()));
/// assert_eq!(split_path("file"), ("".to_string(), "FILE".to_string()));
/// ```
pub fn split_path(path: &str) -> (String, String) {
    let upper = path.to_uppercase();
    match upper.rfind('/') {
        Some(pos) => (upper[..pos].to_string(), upper[pos + 1..].to_string()),
        None => (String::new(), upper),
    }
}

/// Path segments of an absolute path, without the empty leading segment.
pub(crate) fn segments(absolute: &str) -> Vec<&str> {
    absolute.trim_start_matches('/').split('/').collect()
}

/// Check a file or directory name before it is written to an entry.
pub fn validate_name(name: &str) -> ProdosResult<()> {
    if name.is_empty() {
        return Err(ProdosError::InvalidName(name.to_string()));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ProdosError::NameTooLong(name.to_string()));
    }
    Ok(())
}

/// Check a volume name: a letter followed by letters, digits or periods.
pub fn validate_volume_name(name: &str) -> ProdosResult<()> {
    validate_name(name)?;
    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '.') {
        return Err(ProdosError::InvalidName(name.to_string()));
    }
    Ok(())
}
