//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract — scripts rely on them.
//!
//! | Code | Description                              |
//! |------|------------------------------------------|
//! | 0    | Success                                  |
//! | 1    | General error (unspecified)              |
//! | 2    | CLI usage error (bad args, bad address)  |
//! | 3    | I/O error (cannot read or write file)    |
//! | 4    | Validation error (rejected by engine)    |
//! | 5    | Structural error (edit refused)          |

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

// 1 is reserved for unspecified failures; nothing emits it today.

/// Usage error - bad arguments, unparseable address or range.
pub const EXIT_USAGE: u8 = 2;

/// I/O error - sheet file cannot be read or written.
pub const EXIT_IO: u8 = 3;

/// Validation error - the engine rejected the operation's arguments.
pub const EXIT_VALIDATION: u8 = 4;

/// Structural error - a row/column edit was refused.
pub const EXIT_STRUCTURAL: u8 = 5;
