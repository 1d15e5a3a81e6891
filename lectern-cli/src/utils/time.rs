use std::time::Duration;

use crate::error::AppError;

/// Parses a duration with optional unit (ms, s, m). Bare numbers are seconds.
pub fn parse_duration(time_str: &str) -> Result<Duration, AppError> {
    let time_str = time_str.trim();
    if time_str.is_empty() {
        return Err(AppError::ParseError("Invalid format: empty string".to_string()));
    }

    let split_index = time_str
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(time_str.len());
    let (numeric_part, unit_part) = time_str.split_at(split_index);

    let value = numeric_part
        .parse::<f64>()
        .map_err(|_| AppError::ParseError(format!("Invalid number in '{time_str}'")))?;

    let seconds = match unit_part.trim().to_lowercase().as_str() {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        unit => return Err(AppError::ParseError(format!("Invalid unit '{unit}'"))),
    };
    Ok(Duration::from_secs_f64(seconds))
}

/// Convert a duration to a human-readable format
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs_f64();
    if seconds >= 3600.0 {
        format!("{:.2}h", seconds / 3600.0)
    } else if seconds >= 60.0 {
        format!("{:.2}m", seconds / 60.0)
    } else {
        format!("{seconds:.2}s")
    }
}
