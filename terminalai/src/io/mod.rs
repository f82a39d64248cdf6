//! Side-effecting pieces: processes, shells, HTTP, files and the console.

pub mod channel;
pub mod config;
pub mod console;
pub mod decode;
pub mod process;
pub mod prompt;
pub mod session_log;
pub mod shell;
