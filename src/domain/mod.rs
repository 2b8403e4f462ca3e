mod errors;

pub use errors::{ErrorCategory, NumdiffError, NumdiffResult};
