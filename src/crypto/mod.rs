//! # Cryptographic Operations Module
//!
//! The proxy's single cryptographic duty: encrypting the KSeF session token
//! string under the public key fetched from the upstream service. Used only
//! by the token-based session initialisation flow.

pub mod rsa;

// Re-export commonly used types
pub use rsa::TokenCipher;
