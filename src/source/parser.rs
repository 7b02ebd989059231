//! Line protocol parser.
//!
//! The device sends ASCII lines of the form `<thermal>,<light>` terminated by a
//! newline. There is no checksum and no embedded timestamp.

use crate::source::error::{SourceError, SourceResult};
use crate::source::types::Reading;
use chrono::{DateTime, Utc};

/// Field separator on the wire.
pub const FIELD_DELIMITER: char = ',';

/// Parse a line, stamping the reading with the current time.
pub fn parse_line(line: &str) -> SourceResult<Reading> {
    parse_line_at(line, Utc::now())
}

/// Parse a line, stamping the reading with `received_at`.
///
/// Fields beyond the second are ignored.
pub fn parse_line_at(line: &str, received_at: DateTime<Utc>) -> SourceResult<Reading> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(SourceError::malformed(line, "empty line"));
    }

    let mut fields = trimmed.split(FIELD_DELIMITER);
    let (thermal, light) = match (fields.next(), fields.next()) {
        (Some(thermal), Some(light)) => (thermal, light),
        _ => return Err(SourceError::malformed(line, "expected two fields")),
    };

    let thermal = parse_field(line, "thermal", thermal)?;
    let light = parse_field(line, "light", light)?;

    Ok(Reading::at(received_at, thermal, light))
}

fn parse_field(line: &str, name: &str, raw: &str) -> SourceResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| SourceError::malformed(line, format!("{name} field {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn is_malformed(result: SourceResult<Reading>) -> bool {
        matches!(result, Err(SourceError::MalformedLine { .. }))
    }

    #[test]
    fn test_parse_valid_line() {
        let reading = parse_line("1,1523").unwrap();
        assert_eq!(reading.thermal, 1);
        assert_eq!(reading.light, 1523);
    }

    #[test]
    fn test_parse_non_integer_field() {
        assert!(is_malformed(parse_line("0,abc")));
        assert!(is_malformed(parse_line("x,100")));
        assert!(is_malformed(parse_line("1.5,100")));
    }

    #[test]
    fn test_parse_missing_delimiter() {
        assert!(is_malformed(parse_line("1523")));
        assert!(is_malformed(parse_line("1;1523")));
    }

    #[test]
    fn test_parse_empty_and_whitespace() {
        assert!(is_malformed(parse_line("")));
        assert!(is_malformed(parse_line("   \r\n")));
        assert!(is_malformed(parse_line(",")));
    }

    #[test]
    fn test_parse_tolerates_surrounding_whitespace() {
        let reading = parse_line("  0 , 250 \r\n").unwrap();
        assert_eq!(reading.thermal, 0);
        assert_eq!(reading.light, 250);
    }

    #[test]
    fn test_parse_ignores_extra_fields() {
        let reading = parse_line("1,900,extra").unwrap();
        assert_eq!(reading.thermal, 1);
        assert_eq!(reading.light, 900);
    }

    #[test]
    fn test_parse_uses_receipt_time() {
        let received_at = Utc::now() - chrono::Duration::seconds(30);
        let reading = parse_line_at("0,400", received_at).unwrap();
        assert_eq!(reading.timestamp, received_at);
    }

    #[test]
    fn test_live_light_is_not_clamped() {
        let reading = parse_line("0,4095").unwrap();
        assert_eq!(reading.light, 4095);
        let reading = parse_line("0,-3").unwrap();
        assert_eq!(reading.light, -3);
    }

    proptest! {
        #[test]
        fn prop_valid_lines_parse(t in any::<i32>(), l in any::<i32>()) {
            let reading = parse_line(&format!("{t},{l}")).unwrap();
            prop_assert_eq!(reading.thermal, i64::from(t));
            prop_assert_eq!(reading.light, i64::from(l));
        }

        #[test]
        fn prop_lines_without_comma_fail(s in "[^,]*") {
            prop_assert!(is_malformed(parse_line(&s)));
        }

        #[test]
        fn prop_non_integer_light_fails(t in 0i64..=1, l in "[a-zA-Z]{1,8}") {
            let line = format!("{t},{l}");
            prop_assert!(is_malformed(parse_line(&line)));
        }
    }
}
