//! Typed, side-effect-free command builders for the shell-side protocol
//! vocabulary (SPEC_FULL.md §4.6). Each builder renders the exact invocation
//! string the host emits verbatim through the `ShellDriver` seam; no
//! PowerShell runs inside this crate.
//!
//! Parameter order and spelling are grounded on `shared_memory_bridge.py`'s
//! f-string command construction (`Import-SharedMemoryData`, etc.).

use shared::constants::{
    CMD_COPY_VARIABLE, CMD_EXPORT, CMD_EXPORT_VAR_BYTES, CMD_IMPORT, CMD_NEW_WRITEABLE_BUFFER,
};
use shared::format::FormatToken;

use crate::quote::{quote, unquote};

/// `Import-SharedMemoryData -ChannelName ... -FrameBytes ... -Format ... -Encoding ... -VariableName ...`
#[derive(Debug, Clone)]
pub struct ImportCommand {
    pub channel_name: String,
    pub frame_bytes: u64,
    pub format: FormatToken,
    pub encoding: String,
    pub variable: String,
}

impl ImportCommand {
    pub fn render(&self) -> String {
        format!(
            "{CMD_IMPORT} -ChannelName {} -FrameBytes {} -Format {} -Encoding {} -VariableName {}",
            quote(&self.channel_name),
            self.frame_bytes,
            quote(self.format.as_str()),
            quote(&self.encoding),
            quote(&self.variable),
        )
    }
}

/// `Export-SharedMemoryData -ChannelName ... -FrameBytes ... -Format ... -Encoding ... -Command ...`
#[derive(Debug, Clone)]
pub struct ExportCommand {
    pub channel_name: String,
    pub frame_bytes: u64,
    pub format: FormatToken,
    pub encoding: String,
    pub command: String,
}

impl ExportCommand {
    pub fn render(&self) -> String {
        format!(
            "{CMD_EXPORT} -ChannelName {} -FrameBytes {} -Format {} -Encoding {} -Command {}",
            quote(&self.channel_name),
            self.frame_bytes,
            quote(self.format.as_str()),
            quote(&self.encoding),
            quote(&self.command),
        )
    }
}

/// `Export-SharedMemoryVarBytes -ChannelName ... -FrameBytes ... -VariableName ... -Encoding ...`
///
/// The optimized path used when the requested command is a bare variable
/// reference; see `shared_memory_bridge.py`'s `_extract_var_ref` shortcut.
#[derive(Debug, Clone)]
pub struct ExportVarBytesCommand {
    pub channel_name: String,
    pub frame_bytes: u64,
    pub variable: String,
    pub encoding: String,
}

impl ExportVarBytesCommand {
    pub fn render(&self) -> String {
        format!(
            "{CMD_EXPORT_VAR_BYTES} -ChannelName {} -FrameBytes {} -VariableName {} -Encoding {}",
            quote(&self.channel_name),
            self.frame_bytes,
            quote(&self.variable),
            quote(&self.encoding),
        )
    }
}

/// `Copy-VariableToSharedMemory -ChannelName ... -FrameBytes ... -VariableName ...`
#[derive(Debug, Clone)]
pub struct CopyVariableCommand {
    pub channel_name: String,
    pub frame_bytes: u64,
    pub variable: String,
}

impl CopyVariableCommand {
    pub fn render(&self) -> String {
        format!(
            "{CMD_COPY_VARIABLE} -ChannelName {} -FrameBytes {} -VariableName {}",
            quote(&self.channel_name),
            self.frame_bytes,
            quote(&self.variable),
        )
    }
}

/// `New-SharedMemoryWriteableBuffer -ChannelName ... -FrameBytes ... -VariableName ...`
#[derive(Debug, Clone)]
pub struct NewWriteableBufferCommand {
    pub channel_name: String,
    pub frame_bytes: u64,
    pub variable: String,
}

impl NewWriteableBufferCommand {
    pub fn render(&self) -> String {
        format!(
            "{CMD_NEW_WRITEABLE_BUFFER} -ChannelName {} -FrameBytes {} -VariableName {}",
            quote(&self.channel_name),
            self.frame_bytes,
            quote(&self.variable),
        )
    }
}

/// A bare variable reference such as `$result` or `$data.Bytes`, matching the
/// pattern `shared_memory_bridge.py`'s `_extract_var_ref` looks for. Used by
/// the facade to decide between `ExportVarBytesCommand` and `ExportCommand`.
pub fn looks_like_variable_reference(command: &str) -> Option<&str> {
    let trimmed = command.trim();
    if !trimmed.starts_with('$') {
        return None;
    }
    let body = &trimmed[1..];
    let valid = !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    valid.then_some(trimmed)
}

/// A rendered command string parsed back into its typed parameters. The
/// inverse of each builder's `render()`, used by a shell-side test double that
/// stands in for real PowerShell evaluation (SPEC_FULL.md §10.6).
#[derive(Debug, Clone)]
pub enum ParsedCommand {
    Import(ImportCommand),
    Export(ExportCommand),
    ExportVarBytes(ExportVarBytesCommand),
    CopyVariable(CopyVariableCommand),
    NewWriteableBuffer(NewWriteableBufferCommand),
}

/// Split the `-Name 'value'` / `-Name value` tail of a rendered command into
/// `(name, raw_value_token)` pairs. `raw_value_token` still carries its
/// surrounding quotes, if any; callers `unquote` it themselves. Returns `None`
/// on anything that doesn't look like this crate's own rendering (unbalanced
/// quotes, a parameter with no value).
fn tokenize_params(rest: &str) -> Option<Vec<(String, String)>> {
    let chars: Vec<char> = rest.chars().collect();
    let n = chars.len();
    let mut i = 0;
    let mut out = Vec::new();

    loop {
        while i < n && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= n {
            break;
        }
        if chars[i] != '-' {
            return None;
        }
        i += 1;
        let name_start = i;
        while i < n && !chars[i].is_whitespace() {
            i += 1;
        }
        let name: String = chars[name_start..i].iter().collect();

        while i < n && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= n {
            return None;
        }

        let value_start = i;
        if chars[i] == '\'' {
            i += 1;
            loop {
                if i >= n {
                    return None;
                }
                if chars[i] == '\'' {
                    if i + 1 < n && chars[i + 1] == '\'' {
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                i += 1;
            }
        } else {
            while i < n && !chars[i].is_whitespace() {
                i += 1;
            }
        }
        let value: String = chars[value_start..i].iter().collect();
        out.push((name, value));
    }

    Some(out)
}

/// Parse a string rendered by one of this crate's builders back into its
/// typed command. `None` if `command` is not a recognized shell-side
/// protocol-vocabulary invocation.
pub fn parse(command: &str) -> Option<ParsedCommand> {
    let trimmed = command.trim();
    let (name, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((n, r)) => (n, r),
        None => (trimmed, ""),
    };
    let params = tokenize_params(rest)?;
    let raw = |key: &str| params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
    let text = |key: &str| raw(key).and_then(unquote);
    let num = |key: &str| raw(key).and_then(|v| v.parse::<u64>().ok());

    match name {
        CMD_IMPORT => Some(ParsedCommand::Import(ImportCommand {
            channel_name: text("ChannelName")?,
            frame_bytes: num("FrameBytes")?,
            format: FormatToken::parse(&text("Format")?)?,
            encoding: text("Encoding")?,
            variable: text("VariableName")?,
        })),
        CMD_EXPORT => Some(ParsedCommand::Export(ExportCommand {
            channel_name: text("ChannelName")?,
            frame_bytes: num("FrameBytes")?,
            format: FormatToken::parse(&text("Format")?)?,
            encoding: text("Encoding")?,
            command: text("Command")?,
        })),
        CMD_EXPORT_VAR_BYTES => Some(ParsedCommand::ExportVarBytes(ExportVarBytesCommand {
            channel_name: text("ChannelName")?,
            frame_bytes: num("FrameBytes")?,
            variable: text("VariableName")?,
            encoding: text("Encoding")?,
        })),
        CMD_COPY_VARIABLE => Some(ParsedCommand::CopyVariable(CopyVariableCommand {
            channel_name: text("ChannelName")?,
            frame_bytes: num("FrameBytes")?,
            variable: text("VariableName")?,
        })),
        CMD_NEW_WRITEABLE_BUFFER => Some(ParsedCommand::NewWriteableBuffer(NewWriteableBufferCommand {
            channel_name: text("ChannelName")?,
            frame_bytes: num("FrameBytes")?,
            variable: text("VariableName")?,
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_command_renders_exact_parameter_order() {
        let cmd = ImportCommand {
            channel_name: "vsbridge_abc".to_string(),
            frame_bytes: 4096,
            format: FormatToken::Bytes,
            encoding: "utf-8".to_string(),
            variable: "X".to_string(),
        };
        assert_eq!(
            cmd.render(),
            "Import-SharedMemoryData -ChannelName 'vsbridge_abc' -FrameBytes 4096 -Format 'Bytes' -Encoding 'utf-8' -VariableName 'X'"
        );
    }

    #[test]
    fn import_command_escapes_variable_name() {
        let cmd = ImportCommand {
            channel_name: "chan".to_string(),
            frame_bytes: 4,
            format: FormatToken::ZeroCopy,
            encoding: "utf-8".to_string(),
            variable: "O'Brien".to_string(),
        };
        assert!(cmd.render().contains("-VariableName 'O''Brien'"));
    }

    #[test]
    fn export_command_renders_command_text() {
        let cmd = ExportCommand {
            channel_name: "chan".to_string(),
            frame_bytes: 1024,
            format: FormatToken::Json,
            encoding: "utf-8".to_string(),
            command: "Get-Process | Select-Object -First 1".to_string(),
        };
        assert_eq!(
            cmd.render(),
            "Export-SharedMemoryData -ChannelName 'chan' -FrameBytes 1024 -Format 'Json' -Encoding 'utf-8' -Command 'Get-Process | Select-Object -First 1'"
        );
    }

    #[test]
    fn export_var_bytes_command_renders() {
        let cmd = ExportVarBytesCommand {
            channel_name: "chan".to_string(),
            frame_bytes: 256,
            variable: "result".to_string(),
            encoding: "utf-8".to_string(),
        };
        assert_eq!(
            cmd.render(),
            "Export-SharedMemoryVarBytes -ChannelName 'chan' -FrameBytes 256 -VariableName 'result' -Encoding 'utf-8'"
        );
    }

    #[test]
    fn copy_variable_command_renders() {
        let cmd = CopyVariableCommand {
            channel_name: "chan".to_string(),
            frame_bytes: 128,
            variable: "$data".to_string(),
        };
        assert_eq!(
            cmd.render(),
            "Copy-VariableToSharedMemory -ChannelName 'chan' -FrameBytes 128 -VariableName '$data'"
        );
    }

    #[test]
    fn new_writeable_buffer_command_renders() {
        let cmd = NewWriteableBufferCommand {
            channel_name: "chan".to_string(),
            frame_bytes: 64,
            variable: "buf".to_string(),
        };
        assert_eq!(
            cmd.render(),
            "New-SharedMemoryWriteableBuffer -ChannelName 'chan' -FrameBytes 64 -VariableName 'buf'"
        );
    }

    #[test]
    fn variable_reference_detection() {
        assert_eq!(looks_like_variable_reference("$result"), Some("$result"));
        assert_eq!(
            looks_like_variable_reference("$data.Bytes"),
            Some("$data.Bytes")
        );
        assert_eq!(looks_like_variable_reference("Get-Process"), None);
        assert_eq!(looks_like_variable_reference("$"), None);
    }

    #[test]
    fn parse_recovers_import_command() {
        let cmd = ImportCommand {
            channel_name: "vsbridge_abc".to_string(),
            frame_bytes: 4096,
            format: FormatToken::Bytes,
            encoding: "utf-8".to_string(),
            variable: "O'Brien".to_string(),
        };
        match parse(&cmd.render()) {
            Some(ParsedCommand::Import(parsed)) => {
                assert_eq!(parsed.channel_name, cmd.channel_name);
                assert_eq!(parsed.frame_bytes, cmd.frame_bytes);
                assert_eq!(parsed.format, cmd.format);
                assert_eq!(parsed.variable, cmd.variable);
            }
            other => panic!("expected ParsedCommand::Import, got {other:?}"),
        }
    }

    #[test]
    fn parse_recovers_export_command_with_embedded_flags_and_pipes() {
        let cmd = ExportCommand {
            channel_name: "chan".to_string(),
            frame_bytes: 1024,
            format: FormatToken::Json,
            encoding: "utf-8".to_string(),
            command: "Get-Process | Select-Object -First 1".to_string(),
        };
        match parse(&cmd.render()) {
            Some(ParsedCommand::Export(parsed)) => assert_eq!(parsed.command, cmd.command),
            other => panic!("expected ParsedCommand::Export, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_unrecognized_command() {
        assert!(parse("Get-Process | Select-Object -First 1").is_none());
    }
}
