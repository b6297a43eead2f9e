use crate::error::DischargeError;
use crate::utils::logging::Logger;

/// Validate a `return_to` address and append `params` to its query
///
/// Only addresses that parse as URLs and start with the service's own
/// `location` are accepted, so the completer can never be used as an open
/// redirect. Existing query parameters on `return_to` are kept.
///
/// # Errors
///
/// Returns a `BadRequest` error if `return_to` is not a valid URL or does not
/// start with `location`.
pub fn redirect_target(
    location: &str,
    return_to: &str,
    params: &[(&str, &str)],
    logger: &Logger,
) -> Result<String, DischargeError> {
    let mut url = validate_return_to(location, return_to, logger)?;
    {
        let mut query = url.query_pairs_mut();
        for (name, value) in params {
            query.append_pair(name, value);
        }
    }
    logger.debug(format_args!("redirecting to validated return_to: {url}"));
    Ok(url.into())
}

/// Check `return_to` against the service location without building a target
///
/// # Errors
///
/// Returns a `BadRequest` error if `return_to` is not a valid URL or does not
/// start with `location`.
pub fn validate_return_to(
    location: &str,
    return_to: &str,
    logger: &Logger,
) -> Result<url::Url, DischargeError> {
    let parsed = url::Url::parse(return_to).map_err(|e| {
        logger.warn(format_args!("failed to parse return_to {return_to:?}: {e}"));
        DischargeError::bad_request("invalid return_to").with_cause(e)
    })?;

    if !within_location(location, return_to) {
        logger.warn(format_args!(
            "rejected return_to outside service location {location}: {return_to:?}"
        ));
        return Err(DischargeError::bad_request("invalid return_to"));
    }

    Ok(parsed)
}

// The prefix must end on a path boundary so "https://svc" does not admit
// "https://svc.evil.example".
fn within_location(location: &str, return_to: &str) -> bool {
    if location.is_empty() {
        return false;
    }
    return_to.strip_prefix(location).is_some_and(|rest| {
        location.ends_with('/') || rest.is_empty() || rest.starts_with(&['/', '?', '#'][..])
    })
}
