/// Round `value` to `places` decimal places (half away from zero).
#[must_use]
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_heartbeat_fraction_to_cents() {
        assert_eq!(round_to(10.0 / 60.0, 2), 0.17);
        assert_eq!(round_to(0.004, 2), 0.0);
        assert_eq!(round_to(0.333_36, 4), 0.3334);
    }
}
