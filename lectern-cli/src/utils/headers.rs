use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::error::AppError;

/// Parse a header string in format "Name: Value" and add it to the HeaderMap
pub fn parse_and_add_header(headers: &mut HeaderMap, header_str: &str) -> Result<(), AppError> {
    // Find the first colon which separates name and value
    let Some((name, value)) = header_str.split_once(':') else {
        return Err(AppError::InvalidInput(format!(
            "Invalid header format: '{header_str}'. Expected 'Name: Value'"
        )));
    };
    let (name, value) = (name.trim(), value.trim());

    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| AppError::InvalidInput(format!("Invalid header name: '{name}'")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| AppError::InvalidInput(format!("Invalid header value for '{name}'")))?;

    // values may carry cookies or tokens
    debug!("Adding header: {}", name);
    headers.insert(header_name, header_value);
    Ok(())
}

/// Parse a collection of header strings and return a HeaderMap
pub fn parse_headers(header_strings: &[String]) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();
    for header_str in header_strings {
        parse_and_add_header(&mut headers, header_str)?;
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&[
            "Referer: https://www.example.com/course/1".to_string(),
            "Cookie:a=1; b=2".to_string(),
        ])
        .unwrap();
        assert_eq!(headers.get("referer").unwrap(), "https://www.example.com/course/1");
        assert_eq!(headers.get("cookie").unwrap(), "a=1; b=2");
    }

    #[test]
    fn test_invalid_headers_are_rejected() {
        assert!(parse_headers(&["no colon".to_string()]).is_err());
        assert!(parse_headers(&["bad name: x".to_string()]).is_err());
    }
}
