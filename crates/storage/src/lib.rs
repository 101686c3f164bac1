#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;
pub mod versioned;

pub use repository::{Storage, StorageError};
pub use versioned::{
    InsertOutcome, RetryOutcome, Update, VersionedStore, WriteOutcome, ensure_exists,
    update_with_retry, upsert_with_retry,
};
