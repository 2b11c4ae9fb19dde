pub mod security_headers;
pub mod token_auth;

pub use security_headers::SecurityHeaders;
pub use token_auth::{resolve_client_ip, TokenAuth};
