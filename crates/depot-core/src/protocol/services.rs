//! Names of the built-in services and their operations.
//!
//! These are the `(target, kind)` strings both ends agree on; the permission
//! catalog uses the same pairs.

/// Authentication service.
pub const AUTH: &str = "AUTH_SVR";

pub mod auth {
    /// `LOGIN(user:string, password:string)` -> `ACK(user:string)`
    pub const LOGIN: &str = "LOGIN";
    /// `LOGIN_KEY(api_key:string)` -> `ACK(user:string)`
    pub const LOGIN_KEY: &str = "LOGIN_KEY";
    /// `LOGOUT()` -> `ACK()`
    pub const LOGOUT: &str = "LOGOUT";
    /// `PERMISSIONS()` -> `ACK(count:int32, {service, operation, attribute, source}*)`
    pub const PERMISSIONS: &str = "PERMISSIONS";
}

/// Asset store service.
pub const ASSET: &str = "ASSET_SVR";

pub mod asset {
    /// Streaming download, see [`crate::protocol::stream`].
    pub const DOWNLOAD: &str = "DOWNLOAD";
    /// Streaming upload, see [`crate::protocol::stream`].
    pub const UPLOAD: &str = "UPLOAD";
    /// `LIST()` -> `ACK(count:int32, {name:string, size:int64, checksum:string}*)`
    pub const LIST: &str = "LIST";
}
