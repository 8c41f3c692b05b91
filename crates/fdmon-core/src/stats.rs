//! Run statistics and the CSV report.

use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

/// Header line of the report.
pub const CSV_HEADER: &str =
    "Duration (s),Total Roundtrips,Roundtrips/sec,CPU usage (s),Roundtrips/cpusec";

/// What one run measured. Computed once, after the generator stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStatistics {
    /// Wall-clock time the generator loop ran.
    pub duration: Duration,
    /// Process user + system CPU time consumed over the same interval.
    pub cpu_time: Duration,
    /// Completed round trips.
    pub round_trips: u64,
}

impl RunStatistics {
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    pub fn cpu_secs(&self) -> f64 {
        self.cpu_time.as_secs_f64()
    }

    pub fn round_trips_per_sec(&self) -> f64 {
        rate(self.round_trips, self.duration_secs())
    }

    pub fn round_trips_per_cpu_sec(&self) -> f64 {
        rate(self.round_trips, self.cpu_secs())
    }

    /// Write the two-line report (header + values).
    pub fn write_csv<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "{}", CSV_HEADER)?;
        writeln!(out, "{}", self)
    }
}

/// The CSV data row.
impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            general(self.duration_secs()),
            self.round_trips,
            general(self.round_trips_per_sec()),
            general(self.cpu_secs()),
            general(self.round_trips_per_cpu_sec()),
        )
    }
}

/// Significant digits in a report value.
const PRECISION: i32 = 6;

/// Format like C's `%g`: six significant digits, trailing zeros dropped,
/// scientific notation outside `1e-4 <= |v| < 1e6`.
fn general(v: f64) -> String {
    if v == 0.0 || !v.is_finite() {
        return v.to_string();
    }

    // Round first, so 999999.5 picks the exponent of 1e+06.
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, v);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= PRECISION {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let fixed = format!("{:.*}", (PRECISION - 1 - exp) as usize, v);
        trim_fraction(&fixed).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn rate(count: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
