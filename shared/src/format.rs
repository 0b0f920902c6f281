//! The channel is byte-transparent; `Format` is how the host expresses what the
//! bytes in a region mean so the shell and the facade can encode/decode them.
//! See SPEC_FULL.md §9 "Dynamic typing of payloads".

use crate::constants::{
    FORMAT_TOKEN_BYTES, FORMAT_TOKEN_JSON, FORMAT_TOKEN_STRING, FORMAT_TOKEN_ZERO_COPY,
};

/// How a region's bytes should be produced or interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Format {
    /// Raw bytes, no decoding.
    Bytes,
    /// Text in the given encoding (only `"utf-8"` is implemented by this crate).
    Text { encoding: String },
    /// JSON-encoded value.
    Json,
    /// Force the shell to bind a zero-copy wrapper instead of decoding at all.
    ZeroCopyView,
}

impl Format {
    /// The wire token sent to the shell side (external contract, §6).
    pub fn token(&self) -> FormatToken {
        match self {
            Format::Bytes => FormatToken::Bytes,
            Format::Text { .. } => FormatToken::String,
            Format::Json => FormatToken::Json,
            Format::ZeroCopyView => FormatToken::ZeroCopy,
        }
    }

    pub fn encoding(&self) -> &str {
        match self {
            Format::Text { encoding } => encoding,
            _ => "utf-8",
        }
    }
}

/// The four tokens the shell-side protocol vocabulary recognizes, exactly as
/// spelled in SPEC_FULL.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatToken {
    Bytes,
    String,
    Json,
    ZeroCopy,
}

impl FormatToken {
    pub fn as_str(self) -> &'static str {
        match self {
            FormatToken::Bytes => FORMAT_TOKEN_BYTES,
            FormatToken::String => FORMAT_TOKEN_STRING,
            FormatToken::Json => FORMAT_TOKEN_JSON,
            FormatToken::ZeroCopy => FORMAT_TOKEN_ZERO_COPY,
        }
    }

    /// Recover a token from its wire spelling. The inverse of [`as_str`](Self::as_str),
    /// used by a shell-side test double parsing a rendered command string back
    /// into its parameters.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            FORMAT_TOKEN_BYTES => Some(FormatToken::Bytes),
            FORMAT_TOKEN_STRING => Some(FormatToken::String),
            FORMAT_TOKEN_JSON => Some(FormatToken::Json),
            FORMAT_TOKEN_ZERO_COPY => Some(FormatToken::ZeroCopy),
            _ => None,
        }
    }
}

impl std::fmt::Display for FormatToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_spelling() {
        assert_eq!(Format::Bytes.token().as_str(), "Bytes");
        assert_eq!(
            Format::Text {
                encoding: "utf-8".into()
            }
            .token()
            .as_str(),
            "String"
        );
        assert_eq!(Format::Json.token().as_str(), "Json");
        assert_eq!(Format::ZeroCopyView.token().as_str(), "ZeroCopy");
    }
}
