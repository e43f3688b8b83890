//! Domain Layer - Credentials and order notifications.
//!
//! Pure types with no knowledge of the Coinbase wire protocol or the
//! chat transport. The repository trait is the only port defined here.

/// User credentials and the credential repository port.
pub mod credentials;

/// Order event classification and message rendering.
pub mod notification;
