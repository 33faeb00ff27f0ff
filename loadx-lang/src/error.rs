use crate::token::Position;

pub type Result<T> = std::result::Result<T, Error>;

/// One positioned diagnostic from the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub pos: Position,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.pos)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parse failed:\n{}", format_parse_errors(.0))]
    Parse(Vec<ParseError>),

    #[error("scenario `{0}` not found")]
    UnknownScenario(String),

    #[error("no scenario declared in source")]
    NoScenario,

    #[error("request `{name}` not found (referenced from {context})")]
    UnknownRequest { name: String, context: String },

    #[error("request `{0}` has no curl command")]
    MissingCurl(String),

    #[error("cyclic request composition: {}", .0.join(" -> "))]
    CyclicFlow(Vec<String>),

    #[error("scenario `{0}` has no load configuration")]
    MissingLoad(String),

    #[error("invalid load configuration for scenario `{0}`: {1}")]
    InvalidLoad(String, String),

    #[error("invalid duration literal `{0}` (expected e.g. 500ms, 30s, 5m, 1h)")]
    InvalidDuration(String),

    #[error("invalid regex in extraction `{name}`: {source}")]
    InvalidRegex {
        name: String,
        source: regex::Error,
    },

    #[error("invalid assertion: {0}")]
    InvalidAssertion(String),

    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    #[error("curl command error: {0}")]
    Curl(String),
}

fn format_parse_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| format!("  {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a DSL duration literal (`500`, `500ms`, `30s`, `5m`, `1h`).
/// A bare number is milliseconds.
pub fn parse_duration(literal: &str) -> Result<std::time::Duration> {
    let s = literal.trim();
    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(Error::InvalidDuration(literal.to_string()));
    }

    let (number, unit) = s.split_at(number_end);
    let value: u64 = number
        .parse()
        .map_err(|_| Error::InvalidDuration(literal.to_string()))?;

    let duration = match unit {
        "ms" | "" => std::time::Duration::from_millis(value),
        "s" => std::time::Duration::from_secs(value),
        "m" => std::time::Duration::from_secs(value.saturating_mul(60)),
        "h" => std::time::Duration::from_secs(value.saturating_mul(3600)),
        _ => return Err(Error::InvalidDuration(literal.to_string())),
    };

    Ok(duration)
}
