pub mod auth_signature_middleware;
pub mod keys;
