//! Exit code contract for the cli-replay binary.
//!
//! Codes are coarse and stable for CI consumption. Intercept-mode replay
//! mismatches use a dedicated code so calling scripts can tell "the tool
//! failed" apart from "the scenario rejected the call".

/// Success.
pub const SUCCESS: i32 = 0;

/// Validation, verification, allowlist, or usage failure.
pub const FAILURE: i32 = 1;

/// Intercepted command did not match the scenario.
pub const MISMATCH: i32 = 2;

/// Child could not be executed (spawn permission failure).
pub const NOT_EXECUTABLE: i32 = 126;

/// Child command not found.
pub const NOT_FOUND: i32 = 127;

/// Base for signal-terminated children: `128 + signum`.
pub const SIGNAL_BASE: i32 = 128;
