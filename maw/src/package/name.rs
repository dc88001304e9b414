use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("`{0}` is not a valid package name")]
pub struct InvalidPackageName(pub String);

/// Checks that `name` can safely become a file name and a package manager argument.
///
/// Names end up joined to cache directories and passed on command lines, so path separators,
/// relative components, whitespace and leading dashes are refused.
pub fn validate_package_name(name: &str) -> Result<(), InvalidPackageName> {
    let invalid = matches!(name, "" | "." | "..")
        || name.starts_with('-')
        || name.chars().any(|c| c == '/' || c == '\0' || c.is_whitespace());
    if invalid {
        return Err(InvalidPackageName(name.to_string()));
    }
    Ok(())
}
