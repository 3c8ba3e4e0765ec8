//! Pure domain logic for the generation queue orchestrator.
//!
//! Nothing in this crate performs I/O or depends on an async runtime:
//!
//! - [`fingerprint`] -- stable request identity for deduplication.
//! - [`backend_error`] -- the closed set of failures a backend call can produce.
//! - [`categorize`] -- backend failure -> `{kind, retryable}` taxonomy.
//! - [`job_status`] -- backend queue vocabulary -> normalized job status.
//! - [`result_guard`] -- validation of completed payloads.
//! - [`generation_error`] -- the rejection type every caller observes.
//! - [`limits`] -- caller-input bounds (timeouts).
//! - [`retry`] -- exponential backoff math.

pub mod backend_error;
pub mod categorize;
pub mod error;
pub mod fingerprint;
pub mod generation_error;
pub mod job_status;
pub mod limits;
pub mod result_guard;
pub mod retry;
pub mod types;
