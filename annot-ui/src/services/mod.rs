//! External service clients

pub mod credentials;
pub mod sheets_client;

pub use credentials::{CredentialError, TokenSource};
pub use sheets_client::{SheetsClient, SheetsError};
