//! Gregorian calendar / Julian date conversions.
//!
//! Uses the algorithm from Meeus, *Astronomical Algorithms*, ch. 7, valid
//! for dates after the Gregorian reform (1582-10-15).

/// Julian date of the J2000 epoch (2000-01-01 12:00:00).
pub const JD_J2000: f64 = 2_451_545.0;

/// Offset between Julian date and Modified Julian Date.
pub const MJD_OFFSET: f64 = 2_400_000.5;

/// Offset between Julian date and Truncated Julian Date.
pub const TJD_OFFSET: f64 = 2_440_000.5;

/// Seconds per day.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Julian date of a calendar instant.
pub fn julian_date(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: f64) -> f64 {
    let (y, m) = if month <= 2 {
        (i64::from(year) - 1, i64::from(month) + 12)
    } else {
        (i64::from(year), i64::from(month))
    };

    let a = y.div_euclid(100);
    let b = 2 - a + a.div_euclid(4);

    let jd_midnight = (365.25 * (y + 4716) as f64).floor()
        + (30.6001 * (m + 1) as f64).floor()
        + f64::from(day)
        + b as f64
        - 1524.5;

    let day_fraction =
        (f64::from(hour) * 3600.0 + f64::from(minute) * 60.0 + second) / SECONDS_PER_DAY;

    jd_midnight + day_fraction
}

/// Seconds past J2000 of a calendar instant (in whatever scale the calendar
/// fields are expressed).
pub fn j2000_seconds(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: f64) -> f64 {
    (julian_date(year, month, day, hour, minute, second) - JD_J2000) * SECONDS_PER_DAY
}

/// Seconds past J2000 for a Julian date.
pub fn j2000_seconds_from_jd(jd: f64) -> f64 {
    (jd - JD_J2000) * SECONDS_PER_DAY
}

/// Modified Julian Date for seconds past J2000.
pub fn mjd_from_j2000_seconds(seconds: f64) -> f64 {
    JD_J2000 - MJD_OFFSET + seconds / SECONDS_PER_DAY
}

/// Calendar fields (year, month, day, hour, minute, second) of a Julian date.
///
/// Meeus ch. 7, inverse direction. Used for display and log formatting only;
/// all arithmetic stays in seconds.
pub fn calendar_from_jd(jd: f64) -> (i32, u8, u8, u8, u8, f64) {
    let jd_half = jd + 0.5;
    let z = jd_half.floor();
    let f = jd_half - z;

    let a = if z < 2_299_161.0 {
        z
    } else {
        let alpha = ((z - 1_867_216.25) / 36_524.25).floor();
        z + 1.0 + alpha - (alpha / 4.0).floor()
    };

    let b = a + 1524.0;
    let c = ((b - 122.1) / 365.25).floor();
    let d = (365.25 * c).floor();
    let e = ((b - d) / 30.6001).floor();

    let day_frac = b - d - (30.6001 * e).floor() + f;
    let day = day_frac.floor();

    let month = if e < 14.0 { e - 1.0 } else { e - 13.0 };
    let year = if month > 2.0 { c - 4716.0 } else { c - 4715.0 };

    let mut secs_of_day = (day_frac - day) * SECONDS_PER_DAY;
    // Guard against rollover from float noise right below midnight.
    if secs_of_day >= SECONDS_PER_DAY {
        secs_of_day = SECONDS_PER_DAY - 1e-9;
    }
    let hour = (secs_of_day / 3600.0).floor();
    let minute = ((secs_of_day - hour * 3600.0) / 60.0).floor();
    let second = secs_of_day - hour * 3600.0 - minute * 60.0;

    (
        year as i32,
        month as u8,
        day as u8,
        hour as u8,
        minute as u8,
        second,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn j2000_noon_is_jd_2451545() {
        let jd = julian_date(2000, 1, 1, 12, 0, 0.0);
        assert!((jd - JD_J2000).abs() < 1e-9);
        assert!(j2000_seconds(2000, 1, 1, 12, 0, 0.0).abs() < 1e-6);
    }

    #[test]
    fn meeus_reference_date() {
        // Meeus example 7.a: 1957 Oct 4.81 = JD 2436116.31
        let jd = julian_date(1957, 10, 4, 0, 0, 0.0) + 0.81;
        assert!((jd - 2_436_116.31).abs() < 1e-6);
    }

    #[test]
    fn calendar_round_trip() {
        let jd = julian_date(2017, 3, 15, 6, 30, 12.5);
        let (y, m, d, h, min, s) = calendar_from_jd(jd);
        assert_eq!((y, m, d, h, min), (2017, 3, 15, 6, 30));
        assert!((s - 12.5).abs() < 1e-4);
    }

    #[test]
    fn mjd_of_j2000() {
        // J2000 = MJD 51544.5
        assert!((mjd_from_j2000_seconds(0.0) - 51_544.5).abs() < 1e-9);
    }
}
