//! Numeric formatting shared by the output file writer and log messages.
//!
//! Data files are consumed by gnuplot-style tools that expect C `printf`
//! `%g` output. Rust's `Display` for `f64` never switches to scientific
//! notation on its own and `{:e}` always does, so the general format is
//! rebuilt here from the scientific rendering.

/// Format `value` like C's `%.{precision}g`.
///
/// Scientific notation is used when the decimal exponent is below -4 or at
/// least `precision`; trailing zeros are removed in both notations and the
/// exponent always carries a sign and at least two digits (`1e-05`).
pub fn format_general(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value.is_sign_negative() { "-inf" } else { "inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let precision = precision.max(1);
    // The exponent must be taken after rounding to `precision` digits:
    // 9.9999996 becomes 10 at six digits and must be printed in fixed form.
    let scientific = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if exponent < -4 || exponent >= precision as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{}{:02}",
            strip_trailing_zeros(mantissa),
            sign,
            exponent.unsigned_abs()
        )
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        strip_trailing_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

/// Format `value` as a right-aligned `%12.6g` column.
pub fn column(value: f64) -> String {
    format!("{:>12}", format_general(value, 6))
}

fn strip_trailing_zeros(digits: &str) -> &str {
    if digits.contains('.') {
        digits.trim_end_matches('0').trim_end_matches('.')
    } else {
        digits
    }
}
