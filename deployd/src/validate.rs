//! Validation of names and values that end up on the platform's command line

use lazy_regex::regex;

use crate::errors::DeployError;

/// Longest git ref accepted
pub const MAX_GIT_REF_LEN: usize = 250;

/// Longest single argument passed to a remote command
pub const MAX_ARGUMENT_LEN: usize = 255;

/// Characters the remote shell would interpret
const FORBIDDEN_CHARS: &[char] = &[
    ';', '|', '&', '$', '`', '(', ')', '{', '}', '[', ']', '<', '>', '\n', '\r',
];

/// Run every validator against `value`, naming the argument in the error
pub fn arg(
    name: &str,
    value: &str,
    validators: &[fn(&str) -> Result<(), String>],
) -> Result<(), DeployError> {
    for validator in validators {
        validator(value)
            .map_err(|e| DeployError::Validation(format!("{} '{}' invalid; {}", name, value, e)))?;
    }

    Ok(())
}

/// App names are used as hostnames and directory names on the platform:
/// * lowercase alphanumeric characters and dashes
/// * at least 2 characters, starting and ending with an alphanumeric
pub fn is_valid_app_name(name: &str) -> Result<(), String> {
    if name.len() > MAX_ARGUMENT_LEN {
        return Err(format!("length cannot be greater than {}", MAX_ARGUMENT_LEN));
    }

    if !regex!("^[a-z0-9][a-z0-9-]*[a-z0-9]$").is_match(name) {
        return Err(
            "must be lowercase alphanumeric characters or dashes, starting and ending with an alphanumeric"
                .to_string(),
        );
    }

    Ok(())
}

pub fn is_valid_git_ref(git_ref: &str) -> Result<(), String> {
    if git_ref.is_empty() {
        return Err("cannot be empty".to_string());
    }

    if git_ref.len() > MAX_GIT_REF_LEN {
        return Err(format!("length cannot be greater than {}", MAX_GIT_REF_LEN));
    }

    if git_ref.contains("..") {
        return Err("cannot contain '..'".to_string());
    }

    if git_ref.starts_with('-') || git_ref.ends_with('-') {
        return Err("cannot start or end with '-'".to_string());
    }

    if !regex!("^[a-zA-Z0-9._/-]+$").is_match(git_ref) {
        return Err(
            "can only be made up of alphanumeric characters, '.', '_', '/' and '-'".to_string(),
        );
    }

    Ok(())
}

/// Arguments are handed to a remote shell, so anything it would interpret is refused
pub fn is_safe_argument(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("cannot be empty".to_string());
    }

    if value.len() > MAX_ARGUMENT_LEN {
        return Err(format!("length cannot be greater than {}", MAX_ARGUMENT_LEN));
    }

    if let Some(c) = value.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(format!("cannot contain {:?}", c));
    }

    if value.contains("..") {
        return Err("cannot contain '..'".to_string());
    }

    Ok(())
}

/// Platform commands look like `git:sync` or `ps:report`
pub fn is_valid_command(command: &str) -> Result<(), String> {
    if !regex!("^[a-z][a-z0-9-]*(:[a-z0-9-]+)?$").is_match(command) {
        return Err("must look like 'namespace:action'".to_string());
    }

    Ok(())
}

pub fn no_whitespace(value: &str) -> Result<(), String> {
    if value.chars().any(char::is_whitespace) {
        return Err("cannot contain whitespace".to_string());
    }

    Ok(())
}
