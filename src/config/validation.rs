use url::Url;

use super::ConfigError;

/// Check that `value` parses as a URL whose scheme is one of `schemes`.
pub fn validate_url(field: &'static str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field,
        url: value.to_string(),
        message: e.to_string(),
    })?;

    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidUrl {
            field,
            url: value.to_string(),
            message: format!(
                "scheme '{}' not allowed, expected one of: {}",
                url.scheme(),
                schemes.join(", ")
            ),
        });
    }

    Ok(())
}

pub fn validate_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field,
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}
