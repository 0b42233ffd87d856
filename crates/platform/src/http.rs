// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP status translation onto the platform error taxonomy.
//!
//! A plain function composed at each call site: 401/403 are credential
//! problems, 404 means the platform does not know the resource, anything
//! else non-2xx is a generic API failure.

use crate::provider::PlatformError;

/// Map a non-success status code onto the error taxonomy.
pub fn map_status(status: u16, what: &str) -> PlatformError {
    match status {
        401 => PlatformError::Token(format!("{what}: invalid token")),
        403 => PlatformError::Token(format!(
            "{what}: token lacks permissions or is rate-limited"
        )),
        404 => PlatformError::NotFound(what.to_string()),
        _ => PlatformError::Api(format!("{what}: HTTP {status}")),
    }
}

/// Pass a successful response through, translating failures.
pub async fn check(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(map_status(status.as_u16(), what))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
