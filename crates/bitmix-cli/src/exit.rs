//! Process exit codes, one per error kind, so scripts can triage failures.

use bitmix_common::{BitmixError, ErrorKind};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERIC_FAIL: i32 = 1;
pub const EXIT_INVALID_CONFIG: i32 = 2;
pub const EXIT_EVALUATION_FAIL: i32 = 3;
pub const EXIT_EVALUATION_TIMEOUT: i32 = 4;
pub const EXIT_MISSING_COMPONENT: i32 = 5;
pub const EXIT_CANCELLED: i32 = 130;

/// Exit code for the first [`BitmixError`] in the error chain.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    let Some(err) = err.chain().find_map(|e| e.downcast_ref::<BitmixError>()) else {
        return EXIT_GENERIC_FAIL;
    };
    match err.kind() {
        ErrorKind::InvalidConfiguration => EXIT_INVALID_CONFIG,
        ErrorKind::EvaluationFailure => EXIT_EVALUATION_FAIL,
        ErrorKind::EvaluationTimeout => EXIT_EVALUATION_TIMEOUT,
        ErrorKind::MissingComponent => EXIT_MISSING_COMPONENT,
        ErrorKind::Cancelled => EXIT_CANCELLED,
        ErrorKind::Internal => EXIT_GENERIC_FAIL,
    }
}
