/*!
 * Core Module
 * Shared identifiers and error types
 */

pub mod errors;
pub mod id;

// Re-export for convenience
pub use errors::ContextError;
pub use id::ExecId;
