use time::OffsetDateTime;

/// Injected time source. Production code uses [`SystemClock`]; tests use
/// [`FixedClock`] so that `run_id` values and manifest timestamps are
/// deterministic and assertable exactly.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    instant: OffsetDateTime,
}

impl FixedClock {
    /// Normalizes the given instant to UTC, treating a naive offset as UTC.
    pub fn new(instant: OffsetDateTime) -> Self {
        Self {
            instant: instant.to_offset(time::UtcOffset::UTC),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.instant
    }
}

/// Canonical on-disk `run_id` format: `YYYYMMDD_HHMMSSZ`.
pub fn format_run_id(instant: OffsetDateTime) -> String {
    let instant = instant.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}Z",
        instant.year(),
        u8::from(instant.month()),
        instant.day(),
        instant.hour(),
        instant.minute(),
        instant.second(),
    )
}

/// Canonical `created_at_utc` rendering: ISO-8601 UTC with a trailing `Z`.
pub fn format_created_at_utc(instant: OffsetDateTime) -> String {
    let instant = instant.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        instant.year(),
        u8::from(instant.month()),
        instant.day(),
        instant.hour(),
        instant.minute(),
        instant.second(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn run_id_matches_canonical_format() {
        let clock = FixedClock::new(datetime!(2025-01-01 00:00:00 UTC));
        assert_eq!(format_run_id(clock.now()), "20250101_000000Z");
    }

    #[test]
    fn created_at_matches_iso8601_with_z_suffix() {
        let clock = FixedClock::new(datetime!(2025-01-01 00:00:00 UTC));
        assert_eq!(format_created_at_utc(clock.now()), "2025-01-01T00:00:00Z");
    }

    #[test]
    fn fixed_clock_normalizes_non_utc_offset_to_utc() {
        let clock = FixedClock::new(datetime!(2025-01-01 01:30:00 +1:30));
        assert_eq!(format_created_at_utc(clock.now()), "2025-01-01T00:00:00Z");
    }
}
