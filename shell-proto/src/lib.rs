//! Typed command builders for the shell-side protocol vocabulary.
//!
//! This crate never runs PowerShell; it only renders the invocation strings
//! the host emits through its `ShellDriver`.

pub mod commands;
pub mod quote;

pub use commands::{
    looks_like_variable_reference, parse, CopyVariableCommand, ExportCommand,
    ExportVarBytesCommand, ImportCommand, NewWriteableBufferCommand, ParsedCommand,
};
pub use quote::unquote;
