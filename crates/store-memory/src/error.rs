use meridian_store::StoreError;
use thiserror::Error;

/// Errors that can occur in this crate.
///
/// The in-memory store cannot fail; the type exists to satisfy the trait.
#[derive(Clone, Debug, Error)]
#[error("memory store error")]
pub struct Error;

impl StoreError for Error {}
