use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimecodeError {
    #[error("invalid timestamp {input:?}: expected HH:MM:SS or MM:SS")]
    Malformed { input: String },
}

/// Parse an `HH:MM:SS` or `MM:SS` timestamp into whole seconds.
///
/// Fractional seconds (`00:01:30.500`) are accepted and truncated. Any other
/// arity (a bare number, four colon-separated fields) is rejected.
pub fn parse_timestamp(input: &str) -> Result<u32, TimecodeError> {
    let trimmed = input.trim();
    // truncate fractional seconds before splitting
    let whole = trimmed.split('.').next().unwrap_or(trimmed);

    let parts: Vec<&str> = whole.split(':').collect();
    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => ("0", *m, *s),
        _ => {
            return Err(TimecodeError::Malformed {
                input: input.to_string(),
            });
        }
    };

    let malformed = || TimecodeError::Malformed {
        input: input.to_string(),
    };
    let hours: u32 = h.parse().map_err(|_| malformed())?;
    let minutes: u32 = m.parse().map_err(|_| malformed())?;
    let seconds: u32 = s.parse().map_err(|_| malformed())?;
    if minutes > 59 || seconds > 59 {
        return Err(malformed());
    }

    Ok(hours * 3600 + minutes * 60 + seconds)
}

/// Format whole seconds as `HH:MM:SS`.
pub fn format_timestamp(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Format fractional seconds as `HH:MM:SS`, truncating to whole seconds.
pub fn format_seconds_f64(seconds: f64) -> String {
    format_timestamp(seconds.max(0.0) as u32)
}

/// Re-emit a timestamp in canonical `HH:MM:SS` form (strips fractions,
/// coerces `MM:SS`).
pub fn normalize_timestamp(input: &str) -> Result<String, TimecodeError> {
    Ok(format_timestamp(parse_timestamp(input)?))
}
