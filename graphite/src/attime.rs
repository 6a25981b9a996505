use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TimeParseError {
    #[error("invalid time offset '{0}'")]
    InvalidOffset(String),
    #[error("invalid time reference '{0}'")]
    InvalidReference(String),
}

/// Parses graphite-style relative offsets ("5min", "-1h30m", "+2days")
/// into signed seconds. A missing sign means positive.
pub fn parse_time_offset(offset: &str) -> Result<i64, TimeParseError> {
    let original = offset;
    let mut rest = offset;
    let sign = match rest.chars().next() {
        | Some('-') => {
            rest = &rest[1..];
            -1
        }
        | Some('+') => {
            rest = &rest[1..];
            1
        }
        | _ => 1,
    };

    let mut total: i64 = 0;
    while !rest.is_empty() {
        let digits: String =
            rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(TimeParseError::InvalidOffset(original.to_string()));
        }
        rest = &rest[digits.len()..];
        let unit: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        rest = &rest[unit.len()..];
        let amount: i64 = digits
            .parse()
            .map_err(|_| TimeParseError::InvalidOffset(original.to_string()))?;
        total += amount * unit_seconds(&unit, original)?;
    }
    Ok(sign * total)
}

fn unit_seconds(unit: &str, original: &str) -> Result<i64, TimeParseError> {
    let unit = unit.to_ascii_lowercase();
    let seconds = if unit.is_empty() || "seconds".starts_with(&unit) {
        1
    } else if unit == "min" || "minutes".starts_with(&unit) {
        60
    } else if "hours".starts_with(&unit) {
        3600
    } else if "days".starts_with(&unit) {
        86400
    } else if "weeks".starts_with(&unit) && unit != "w" {
        // 'w' alone is ambiguous in the original grammar; spell it out.
        7 * 86400
    } else if unit == "w" {
        7 * 86400
    } else if unit.starts_with("mon") {
        30 * 86400
    } else if "years".starts_with(&unit) {
        365 * 86400
    } else {
        return Err(TimeParseError::InvalidOffset(original.to_string()));
    };
    Ok(seconds)
}

/// Absolute time reference used by timeSlice: "now", a raw epoch, or a
/// signed offset applied to `now`.
pub fn parse_at_time(
    reference: &str,
    now: i64,
) -> Result<i64, TimeParseError> {
    let reference = reference.trim();
    if reference == "now" {
        return Ok(now);
    }
    if let Ok(epoch) = reference.parse::<i64>() {
        return Ok(epoch);
    }
    if reference.starts_with('+') || reference.starts_with('-') {
        return Ok(now + parse_time_offset(reference)?);
    }
    Err(TimeParseError::InvalidReference(reference.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_parse_to_seconds() {
        assert_eq!(parse_time_offset("5min").unwrap(), 300);
        assert_eq!(parse_time_offset("1hour").unwrap(), 3600);
        assert_eq!(parse_time_offset("-1h30min").unwrap(), -5400);
        assert_eq!(parse_time_offset("+2days").unwrap(), 172800);
        assert_eq!(parse_time_offset("10s").unwrap(), 10);
        assert_eq!(parse_time_offset("1w").unwrap(), 604800);
        assert_eq!(parse_time_offset("90").unwrap(), 90);
    }

    #[test]
    fn junk_is_rejected() {
        assert!(parse_time_offset("abc").is_err());
        assert!(parse_time_offset("5parsecs").is_err());
    }

    #[test]
    fn at_time_references() {
        assert_eq!(parse_at_time("now", 1000).unwrap(), 1000);
        assert_eq!(parse_at_time("500", 1000).unwrap(), 500);
        assert_eq!(parse_at_time("-1min", 1000).unwrap(), 940);
        assert!(parse_at_time("midnight", 1000).is_err());
    }
}
