//! HTTP header names shared by the client and server.

/// Echoed on provider responses with the provider interface name.
pub const PROVIDER_TYPE: &str = "provider-type";

/// CORS response header carrying the permitted origin.
pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";

/// CORS response header listing permitted methods.
pub const ALLOW_METHODS: &str = "access-control-allow-methods";

/// CORS response header listing permitted request headers.
pub const ALLOW_HEADERS: &str = "access-control-allow-headers";

/// Methods advertised in CORS responses.
pub const ALLOWED_METHODS_VALUE: &str = "POST, OPTIONS";

/// Request headers advertised in CORS responses.
pub const ALLOWED_HEADERS_VALUE: &str = "content-type, authorization, provider-type";
