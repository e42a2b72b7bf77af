//! Upstream error classification
//!
//! Maps HTTP failures onto the three retry strategies: retry the same job
//! with backoff (Transient), quarantine the credential and re-route
//! (RateLimited), or fail the job immediately (Permanent).

/// Classification of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retryable with backoff (timeouts, 5xx, connection resets).
    Transient,
    /// 429-equivalent: the credential enters cooldown, the call record is
    /// rolled back and a later attempt routes to a different credential.
    RateLimited,
    /// Not retried (not-found, malformed input, bad request).
    Permanent,
}

impl ErrorClass {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Permanent => "permanent",
        }
    }
}

/// Classify an upstream HTTP status.
///
/// 429 is always a rate limit here — the trophy API has no quota-vs-burst
/// distinction worth parsing out of the body. 401/403 are transient from
/// the job's point of view: the token is stale or revoked, the health loop
/// deals with the credential, and a retry can route to a different one.
pub fn classify_status(status: u16, _body: &str) -> ErrorClass {
    match status {
        429 => ErrorClass::RateLimited,
        400 | 404 => ErrorClass::Permanent,
        401 | 403 => ErrorClass::Transient,
        408 | 500 | 502 | 503 | 504 => ErrorClass::Transient,
        _ => ErrorClass::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_rate_limited() {
        assert_eq!(classify_status(429, ""), ErrorClass::RateLimited);
    }

    #[test]
    fn status_404_is_permanent() {
        assert_eq!(classify_status(404, "not found"), ErrorClass::Permanent);
    }

    #[test]
    fn status_400_is_permanent() {
        assert_eq!(classify_status(400, "bad request"), ErrorClass::Permanent);
    }

    #[test]
    fn status_401_is_transient() {
        assert_eq!(classify_status(401, "unauthorized"), ErrorClass::Transient);
    }

    #[test]
    fn status_5xx_is_transient() {
        for status in [500, 502, 503, 504] {
            assert_eq!(classify_status(status, ""), ErrorClass::Transient);
        }
    }

    #[test]
    fn unknown_status_is_transient() {
        assert_eq!(classify_status(418, "teapot"), ErrorClass::Transient);
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(ErrorClass::Transient.label(), "transient");
        assert_eq!(ErrorClass::RateLimited.label(), "rate_limited");
        assert_eq!(ErrorClass::Permanent.label(), "permanent");
    }
}
