//! Stable exit codes for `taskloop` commands.

/// Run finished through the completion gate, or a non-run command succeeded.
pub const OK: i32 = 0;
/// Invalid workdir, config, credential, or task files; nothing was sent to the provider.
pub const INVALID: i32 = 1;
/// The completion provider failed and the run stopped with files untouched.
pub const PROVIDER: i32 = 2;
/// Cycle cap or run deadline reached before the completion gate passed.
pub const INCOMPLETE: i32 = 3;
/// The run was cancelled (Ctrl-C).
pub const CANCELLED: i32 = 4;
