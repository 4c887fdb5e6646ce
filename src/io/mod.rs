//! Output plumbing for the command line: exit codes and the JSON envelope.

pub mod exit_code;
pub mod format;

pub use exit_code::ExitCode;
pub use format::{ErrorDetails, JsonResponse, OutputFormat, Status};
