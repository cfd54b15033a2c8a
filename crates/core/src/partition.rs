//! Monthly partition ranges for time-partitioned tables.

use std::fmt;

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Logical name of the event table.
pub const EVENTS_TABLE: &str = "events";

/// Half-open `[start, end)` monthly range of one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionRange {
    pub table: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PartitionRange {
    /// Range covering the given calendar month. `month` is 1-based and
    /// wraps into the following years when above 12.
    pub fn monthly(table: impl Into<String>, year: i32, month: u32) -> Self {
        let first = first_of_month(year, month);
        let start = Utc.from_utc_datetime(&first.and_hms_opt(0, 0, 0).unwrap_or_default());
        Self {
            table: table.into(),
            start,
            end: add_months(start, 1),
        }
    }

    /// Range of the month containing `ts`.
    pub fn containing(table: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self::monthly(table, ts.year(), ts.month())
    }

    /// Partition identifier in `YYYYMM` form.
    pub fn partition_id(&self) -> String {
        self.start.format("%Y%m").to_string()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// The range immediately following this one.
    pub fn next(&self) -> Self {
        Self {
            table: self.table.clone(),
            start: self.end,
            end: add_months(self.end, 1),
        }
    }
}

impl fmt::Display for PartitionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.table, self.partition_id())
    }
}

/// Start of the month containing `ts`.
pub fn month_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    PartitionRange::containing("", ts).start
}

/// Shifts a timestamp by whole months (negative goes back).
pub fn add_months(ts: DateTime<Utc>, months: i32) -> DateTime<Utc> {
    let shifted = if months >= 0 {
        ts.checked_add_months(Months::new(months as u32))
    } else {
        ts.checked_sub_months(Months::new(months.unsigned_abs()))
    };
    shifted.unwrap_or(ts)
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    let zero_based = month.saturating_sub(1);
    let year = year + (zero_based / 12) as i32;
    let month = zero_based % 12 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default()
}

/// Result of a create-if-absent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Continuity violation between two adjacent partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuityIssue {
    /// Uncovered `[from, to)` interval
    Gap {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    /// Two ranges share `[from, to)`
    Overlap {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

impl ContinuityIssue {
    pub fn is_gap(&self) -> bool {
        matches!(self, Self::Gap { .. })
    }
}

/// Checks that `partitions` cover `[window_start, window_end)` contiguously.
///
/// Partitions outside the window are ignored.
pub fn find_continuity_issues(
    partitions: &[PartitionRange],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<ContinuityIssue> {
    let mut in_window: Vec<&PartitionRange> = partitions
        .iter()
        .filter(|p| p.end > window_start && p.start < window_end)
        .collect();
    in_window.sort_by_key(|p| (p.start, p.end));

    let mut issues = Vec::new();
    let mut covered_to = window_start;
    for range in in_window {
        if range.start > covered_to {
            issues.push(ContinuityIssue::Gap {
                from: covered_to,
                to: range.start,
            });
        } else if range.start < covered_to && range.end > window_start {
            issues.push(ContinuityIssue::Overlap {
                from: range.start.max(window_start),
                to: covered_to.min(range.end),
            });
        }
        covered_to = covered_to.max(range.end);
    }
    if covered_to < window_end {
        issues.push(ContinuityIssue::Gap {
            from: covered_to,
            to: window_end,
        });
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_monthly_range_is_half_open() {
        let range = PartitionRange::monthly(EVENTS_TABLE, 2024, 12);
        assert_eq!(range.partition_id(), "202412");
        assert_eq!(range.end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert!(range.contains(ts(2024, 12, 31)));
        assert!(!range.contains(range.end));
    }

    #[test]
    fn test_month_overflow_wraps_year() {
        let range = PartitionRange::monthly(EVENTS_TABLE, 2024, 14);
        assert_eq!(range.partition_id(), "202502");
    }

    #[test]
    fn test_add_months_both_directions() {
        let start = month_start(ts(2024, 3, 15));
        assert_eq!(add_months(start, -3), Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(add_months(start, 10), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_contiguous_window_has_no_issues() {
        let first = PartitionRange::monthly(EVENTS_TABLE, 2024, 1);
        let parts = vec![first.clone(), first.next(), first.next().next()];
        let issues = find_continuity_issues(&parts, first.start, parts[2].end);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_missing_month_is_a_gap() {
        let jan = PartitionRange::monthly(EVENTS_TABLE, 2024, 1);
        let mar = PartitionRange::monthly(EVENTS_TABLE, 2024, 3);
        let issues = find_continuity_issues(&[jan.clone(), mar.clone()], jan.start, mar.end);
        assert_eq!(
            issues,
            vec![ContinuityIssue::Gap {
                from: jan.end,
                to: mar.start
            }]
        );
    }

    #[test]
    fn test_overlapping_ranges_are_reported() {
        let jan = PartitionRange::monthly(EVENTS_TABLE, 2024, 1);
        let mut wide = jan.clone();
        wide.start = jan.start + chrono::Duration::days(10);
        wide.end = jan.next().end;
        let issues = find_continuity_issues(&[jan.clone(), wide.clone()], jan.start, wide.end);
        assert_eq!(issues.len(), 1);
        assert!(!issues[0].is_gap());
    }
}
