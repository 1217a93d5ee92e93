//! Value transforms for simple KML fields.
//!
//! Every transform receives the trimmed text of the field element.

use foundation::time::Time;

use crate::kml::geometry::AltitudeMode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("expected a number, found {0:?}")]
    Number(String),
    #[error("expected an integer, found {0:?}")]
    Integer(String),
    #[error("expected 0, 1, true or false, found {0:?}")]
    Boolean(String),
    #[error("expected an ISO 8601 date, found {0:?}")]
    Date(String),
    #[error("expected an aabbggrr color, found {0:?}")]
    Color(String),
    #[error("unknown {expected} value {found:?}")]
    Enum {
        expected: &'static str,
        found: String,
    },
}

pub type Transform<T> = fn(&str) -> Result<T, FieldError>;

pub fn string(text: &str) -> Result<String, FieldError> {
    Ok(text.to_string())
}

pub fn number(text: &str) -> Result<f64, FieldError> {
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FieldError::Number(text.to_string()))
}

pub fn integer(text: &str) -> Result<i64, FieldError> {
    text.parse().map_err(|_| FieldError::Integer(text.to_string()))
}

/// KML booleans are `0`/`1`; `true`/`false` show up often enough to accept.
pub fn boolean(text: &str) -> Result<bool, FieldError> {
    match text {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(FieldError::Boolean(text.to_string())),
    }
}

pub fn date(text: &str) -> Result<Time, FieldError> {
    Time::parse_iso8601(text).ok_or_else(|| FieldError::Date(text.to_string()))
}

/// Colors stay as the authored `aabbggrr` string.
pub fn color(text: &str) -> Result<String, FieldError> {
    let digits = text.strip_prefix('#').unwrap_or(text);
    if digits.len() == 8 && digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(text.to_string())
    } else {
        Err(FieldError::Color(text.to_string()))
    }
}

pub fn altitude_mode(text: &str) -> Result<AltitudeMode, FieldError> {
    AltitudeMode::parse(text)
}

#[cfg(test)]
mod tests {
    use super::{FieldError, altitude_mode, boolean, color, date, integer, number};
    use crate::kml::geometry::AltitudeMode;

    #[test]
    fn booleans_are_literal_tokens() {
        assert_eq!(boolean("1"), Ok(true));
        assert_eq!(boolean("0"), Ok(false));
        assert_eq!(boolean("true"), Ok(true));
        assert_eq!(boolean("yes"), Err(FieldError::Boolean("yes".to_string())));
    }

    #[test]
    fn numbers_reject_garbage() {
        assert_eq!(number("2.5"), Ok(2.5));
        assert!(number("wide").is_err());
        assert!(number("NaN").is_err());
        assert_eq!(integer("3"), Ok(3));
        assert!(integer("3.5").is_err());
    }

    #[test]
    fn colors_are_preserved_verbatim() {
        assert_eq!(color("7f00FFff"), Ok("7f00FFff".to_string()));
        assert!(color("ff0000").is_err());
        assert!(color("zz00ff00").is_err());
    }

    #[test]
    fn dates_and_altitude_modes() {
        assert!(date("2007-01-14T21:05:02Z").is_ok());
        assert!(date("yesterday").is_err());
        assert_eq!(altitude_mode("absolute"), Ok(AltitudeMode::Absolute));
        assert_eq!(
            altitude_mode("clampToSeaFloor"),
            Ok(AltitudeMode::ClampToSeaFloor)
        );
    }
}
