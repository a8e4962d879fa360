//! Process termination for unrecoverable transition sequences.
//!
//! The pool reports [`PoolError::Unrecoverable`] instead of aborting on its
//! own; hosts route reservation results through [`abort_on_unrecoverable`] so
//! the dump reaches stderr before the process goes down.

use std::io::Write;

use crate::diagnostics::PoolDump;
use crate::error::{PoolError, Result};
use crate::kind::Kind;

/// Pass `result` through, terminating the process on an unrecoverable error.
pub fn abort_on_unrecoverable<T>(result: Result<T>) -> Result<T> {
    match result {
        Err(PoolError::Unrecoverable { kind, top, dump }) => terminate(kind, top, &dump),
        other => other,
    }
}

/// Write `dump` to stderr, flush, and abort.
pub fn terminate(kind: Kind, top: Kind, dump: &PoolDump) -> ! {
    tracing::error!(%kind, %top, "Aborting: transition sequence cannot be repaired");

    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "unrecoverable transition {kind} while {top} is open");
    let _ = writeln!(stderr, "{dump}");
    let _ = stderr.flush();

    std::process::abort()
}
