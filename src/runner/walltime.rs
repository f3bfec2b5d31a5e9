use super::Error;

/// Parse `H:MM:SS`, `MM:SS` or plain seconds, scale by `multiplier`,
/// and format as `H:MM:SS`.
pub fn scale_walltime(val: &str, multiplier: f64) -> Result<String, Error> {
    let invalid = || Error::InvalidWalltime(val.to_owned());

    let parts = val
        .trim()
        .split(':')
        .map(|p| p.trim().parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;

    let seconds = match parts[..] {
        [s] => Some(s),
        [m, s] => m.checked_mul(60).and_then(|m| m.checked_add(s)),
        [h, m, s] => h
            .checked_mul(3600)
            .zip(m.checked_mul(60))
            .and_then(|(h, m)| h.checked_add(m))
            .and_then(|hm| hm.checked_add(s)),
        _ => return Err(invalid()),
    }
    .ok_or_else(invalid)?;

    if !multiplier.is_finite() || multiplier < 0.0 {
        return Err(invalid());
    }
    let scaled = seconds as f64 * multiplier;
    if scaled >= u64::MAX as f64 {
        return Err(invalid());
    }
    let seconds = scaled as u64;

    Ok(format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats() {
        assert_eq!(scale_walltime("1:00:00", 1.0).unwrap(), "1:00:00");
        assert_eq!(scale_walltime("90:00", 1.0).unwrap(), "1:30:00");
        assert_eq!(scale_walltime("45", 1.0).unwrap(), "0:00:45");
        assert_eq!(scale_walltime("00:00:10", 1.0).unwrap(), "0:00:10");
    }

    #[test]
    fn test_multiplier() {
        assert_eq!(scale_walltime("1:00:00", 1.5).unwrap(), "1:30:00");
        assert_eq!(scale_walltime("30:00:00", 2.0).unwrap(), "60:00:00");
    }

    #[test]
    fn test_invalid() {
        assert!(scale_walltime("1:2:3:4", 1.0).is_err());
        assert!(scale_walltime("ten", 1.0).is_err());
        assert!(scale_walltime("", 1.0).is_err());
    }

    #[test]
    fn test_overflow_is_invalid() {
        let err = scale_walltime("5124095576030432:00:00", 1.0).unwrap_err();
        assert!(matches!(err, Error::InvalidWalltime(v) if v == "5124095576030432:00:00"));
        assert!(scale_walltime("18446744073709551615:00", 1.0).is_err());
        assert!(scale_walltime("18446744073709551615", 2.0).is_err());
        assert_eq!(scale_walltime("1000000:00:00", 1.0).unwrap(), "1000000:00:00");
    }
}
