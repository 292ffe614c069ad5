// ============================================================================
// Domain Layer - Order rules and error taxonomy
// ============================================================================
//
// Pure code only: no I/O, no locks. Everything that touches Kafka, Postgres
// or the cache depends on this module, never the other way round (the one
// exception is `StoreError`, which `OrderError` wraps as its infra cause).
//
// ============================================================================

pub mod errors;
pub mod validation;

pub use errors::{ErrorKind, OrderError, ValidationError};
pub use validation::{decode, validate};
