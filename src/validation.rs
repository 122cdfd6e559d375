use std::ops::RangeInclusive;

/// Source voltage limits of the Keithley 236, in volts.
pub const VOLTAGE_RANGE: RangeInclusive<f64> = -110.0..=110.0;
/// Source current and compliance limits of the Keithley 236, in amperes.
pub const CURRENT_RANGE: RangeInclusive<f64> = -0.01..=0.01;
/// Dwell time per sweep point, in milliseconds.
pub const WAIT_TIME_RANGE: RangeInclusive<u32> = 100..=65000;
/// Number of points of a sweep.
pub const POINT_COUNT_RANGE: RangeInclusive<u32> = 3..=500;
/// Interval between readings, in seconds.
pub const INTERVAL_RANGE: RangeInclusive<f64> = 0.1..=600.0;
/// Valid GPIB primary addresses for instruments.
pub const PRIMARY_ADDRESS_RANGE: RangeInclusive<u8> = 1..=30;

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates a named setting against a range, producing a message that
/// names the setting, its value and the allowed bounds.
///
/// # Arguments
///
/// * `name` - Setting name used in the message (e.g. `dut.start`).
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(String)` describing the violation otherwise.
pub fn check_range<T>(name: &str, value: T, range: RangeInclusive<T>) -> Result<(), String>
where
    T: PartialOrd + std::fmt::Display,
{
    let message = format!(
        "Invalid {} {}. Must be within [{}, {}]",
        name,
        value,
        range.start(),
        range.end()
    );
    is_in_range(value, range).map_err(|_| message)
}

/// Validates if a given string is a valid file path.
///
/// # Arguments
///
/// * `path` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the file path is valid.
/// * `Err(&'static str)` if the file path is invalid.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_in_range() {
        assert!(is_in_range(110.0, VOLTAGE_RANGE).is_ok());
        assert!(is_in_range(-110.5, VOLTAGE_RANGE).is_err());
        assert!(is_in_range(3, POINT_COUNT_RANGE).is_ok());
        assert!(is_in_range(501, POINT_COUNT_RANGE).is_err());
    }

    #[test]
    fn test_check_range_message() {
        let err = check_range("gate.wait_time_ms", 50, WAIT_TIME_RANGE).unwrap_err();
        assert_eq!(err, "Invalid gate.wait_time_ms 50. Must be within [100, 65000]");
        assert!(check_range("dut.compliance", 0.01, CURRENT_RANGE).is_ok());
    }

    #[test]
    fn test_is_valid_path() {
        assert!(is_valid_path("data.dat").is_ok());
        assert!(is_valid_path("").is_err());
        assert!(is_valid_path("da\0ta").is_err());
    }
}
