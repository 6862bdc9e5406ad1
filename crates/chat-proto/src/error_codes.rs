//! Frozen `ctrl` numeric codes, HTTP-family (§7 of the design).

pub const OK: u16 = 200;
pub const CREATED: u16 = 201;
pub const ACCEPTED: u16 = 202;
pub const NOT_MODIFIED: u16 = 304;
pub const MALFORMED: u16 = 400;
pub const UNAUTHORIZED: u16 = 401;
pub const FORBIDDEN: u16 = 403;
pub const NOT_FOUND: u16 = 404;
pub const NOT_ALLOWED: u16 = 405;
pub const CONFLICT: u16 = 409;
pub const TOO_LARGE: u16 = 413;
pub const UNPROCESSABLE: u16 = 422;
pub const TOO_MANY_REQUESTS: u16 = 429;
pub const INTERNAL: u16 = 500;
pub const UPSTREAM: u16 = 502;
pub const UNAVAILABLE: u16 = 503;

pub fn text_for(code: u16) -> &'static str {
    match code {
        OK => "ok",
        CREATED => "created",
        ACCEPTED => "accepted",
        NOT_MODIFIED => "not modified",
        MALFORMED => "malformed",
        UNAUTHORIZED => "authentication required",
        FORBIDDEN => "permission denied",
        NOT_FOUND => "not found",
        NOT_ALLOWED => "not allowed",
        CONFLICT => "conflict",
        TOO_LARGE => "too large",
        UNPROCESSABLE => "unprocessable",
        TOO_MANY_REQUESTS => "too many requests",
        INTERNAL => "internal error",
        UPSTREAM => "upstream error",
        UNAVAILABLE => "server too busy",
        _ => "unknown",
    }
}
