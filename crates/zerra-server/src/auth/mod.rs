//! Request-scoped identity, header authorization and origin checks.
//!
//! Identity never lives in ambient or thread-local state. The router builds
//! one [`Identity`] per request, either from a pluggable [`Authorizer`] that
//! inspects raw headers or from the envelope's claims via a
//! [`ClaimsBinder`], and hands it to the handler inside the request context.

use axum::http::HeaderMap;
use thiserror::Error;
use zerra_wire::Claim;

/// Claim type carrying the caller's display name.
pub const NAME_CLAIM: &str = "name";

/// Identity attached to a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    claims: Vec<Claim>,
}

impl Identity {
    /// Identity with no claims.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Identity holding the given claims.
    #[must_use]
    pub fn from_claims(claims: Vec<Claim>) -> Self {
        Self { claims }
    }

    /// All claims, in the order supplied.
    #[must_use]
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// First claim value of the given type.
    #[must_use]
    pub fn find(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|claim| claim.claim_type() == claim_type)
            .map(Claim::value)
    }

    /// Value of the [`NAME_CLAIM`], if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.find(NAME_CLAIM)
    }

    /// Returns `true` when at least one claim is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.claims.is_empty()
    }
}

/// Rejection returned by an [`Authorizer`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("authorization rejected: {reason}")]
pub struct AuthRejection {
    reason: String,
}

impl AuthRejection {
    /// Builds a rejection with a human-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Reason given for the rejection.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Inspects raw request headers and decides who the caller is.
///
/// When configured, the authorizer replaces envelope claims entirely.
pub trait Authorizer: Send + Sync {
    /// Authorizes the request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthRejection`] to refuse the request with `401`.
    fn authorize(&self, headers: &HeaderMap) -> Result<Identity, AuthRejection>;
}

/// Turns envelope claims into an [`Identity`].
pub trait ClaimsBinder: Send + Sync {
    /// Binds the claims carried by the envelope.
    fn bind(&self, claims: &[Claim]) -> Identity;
}

/// Uses envelope claims verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughBinder;

impl ClaimsBinder for PassthroughBinder {
    fn bind(&self, claims: &[Claim]) -> Identity {
        Identity::from_claims(claims.to_vec())
    }
}

/// Allow-list applied to the `Origin` request header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    /// Builds a policy; an empty list permits every origin.
    #[must_use]
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = allowed
            .into_iter()
            .map(|origin| normalise(origin.as_ref()).to_owned())
            .filter(|origin| !origin.is_empty())
            .collect();
        Self { allowed }
    }

    /// Returns `true` when `origin` may call the endpoint.
    ///
    /// Requests without an `Origin` header come from non-browser callers and
    /// are always permitted.
    #[must_use]
    pub fn permits(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.allowed.is_empty() => true,
            Some(origin) => {
                let origin = normalise(origin);
                self.allowed
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(origin))
            }
        }
    }

    /// Returns `true` when no allow-list is configured.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.allowed.is_empty()
    }
}

fn normalise(origin: &str) -> &str {
    origin.trim().trim_end_matches('/')
}
