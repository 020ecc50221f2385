/// Highest rounding precision accepted for coordinates.
pub const MAX_PRECISION: u32 = 12;

/// Round `value` to `precision` decimal digits and return it scaled by
/// `10^precision`.
///
/// Rounding works on the shortest decimal text of the value (what a producer
/// actually sent over the wire), half away from zero. Two coordinates compare
/// equal after rounding exactly when their fixed-point decimal texts would.
/// Returns `None` for non-finite input, precision above [`MAX_PRECISION`] or a
/// scaled value that does not fit an `i64`.
pub fn round_scaled(value: f64, precision: u32) -> Option<i64> {
    if !value.is_finite() || precision > MAX_PRECISION {
        return None;
    }

    let text = format!("{}", value.abs());
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let digits = fraction.as_bytes();

    let mut scaled: i64 = whole.parse().ok()?;
    for i in 0..precision as usize {
        let digit = digits.get(i).map_or(0, |d| i64::from(d - b'0'));
        scaled = scaled.checked_mul(10)?.checked_add(digit)?;
    }
    if digits.get(precision as usize).is_some_and(|d| *d >= b'5') {
        scaled = scaled.checked_add(1)?;
    }

    Some(if value.is_sign_negative() { -scaled } else { scaled })
}

/// Whole-degree heading used in feature keys.
pub fn round_heading(course: f64) -> i32 {
    course.round() as i32
}
