//! Splitting a long request into sub-intervals and joining the results.
//!
//! Planning and reassembly are pure; only [`execute`] performs I/O, through
//! the fetch closure it is given. Chunks are tagged with their index so the
//! joined result is in time order regardless of completion order.

use std::future::Future;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use hapi_codec::ColumnarResult;
use hapi_common::time::{Calendar, Precision};
use hapi_common::{format_time, parse_times, reformat, HapiError, HapiResult, TimeFormat};

/// Boundary unit chunks are aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkUnit {
    Hour,
    Day,
    Month,
    Year,
}

impl ChunkUnit {
    /// Default unit for data of the given cadence.
    ///
    /// Sub-second data is chunked by hour, up to hourly data by day, up to
    /// daily data by month, and anything coarser by year.
    pub fn for_cadence(cadence: Duration) -> Self {
        if cadence < Duration::seconds(1) {
            ChunkUnit::Hour
        } else if cadence <= Duration::hours(1) {
            ChunkUnit::Day
        } else if cadence < Duration::days(1) {
            ChunkUnit::Month
        } else {
            ChunkUnit::Year
        }
    }

    /// Nominal length, with months as 30 days and years as 365 days.
    pub fn nominal(&self) -> Duration {
        match self {
            ChunkUnit::Hour => Duration::hours(1),
            ChunkUnit::Day => Duration::days(1),
            ChunkUnit::Month => Duration::days(30),
            ChunkUnit::Year => Duration::days(365),
        }
    }

    /// Start of the unit containing `t`.
    pub fn floor(&self, t: DateTime<Utc>) -> HapiResult<DateTime<Utc>> {
        let date = t.date_naive();
        let naive = match self {
            ChunkUnit::Hour => date.and_hms_opt(t.hour(), 0, 0),
            ChunkUnit::Day => date.and_hms_opt(0, 0, 0),
            ChunkUnit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            ChunkUnit::Year => {
                NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
        };
        naive
            .map(|n| Utc.from_utc_datetime(&n))
            .ok_or_else(|| HapiError::InvalidTime(format!("cannot align {} to {:?}", t, self)))
    }

    /// Start of the unit after the one starting at `t`.
    pub fn advance(&self, t: DateTime<Utc>) -> HapiResult<DateTime<Utc>> {
        let next = match self {
            ChunkUnit::Hour => t.checked_add_signed(Duration::hours(1)),
            ChunkUnit::Day => t.checked_add_signed(Duration::days(1)),
            ChunkUnit::Month => t.checked_add_months(Months::new(1)),
            ChunkUnit::Year => t.checked_add_months(Months::new(12)),
        };
        next.ok_or_else(|| HapiError::InvalidTime(format!("{} is out of range", t)))
    }
}

/// One planned sub-interval, `[start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInterval {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl ChunkInterval {
    /// Start as a request time string.
    pub fn start_str(&self) -> String {
        request_time(&self.start)
    }

    /// Stop as a request time string.
    pub fn stop_str(&self) -> String {
        request_time(&self.stop)
    }
}

/// Render a time for a request URL, with fractional seconds only when needed.
pub fn request_time(t: &DateTime<Utc>) -> String {
    let format = TimeFormat {
        calendar: Calendar::YearMonthDay,
        precision: Precision::Second,
        fraction_digits: if t.nanosecond() == 0 { 0 } else { 9 },
        trailing_dot: false,
        zone: true,
    };
    format_time(t, &format)
}

/// Whether `[start, stop)` is long enough to be worth chunking by `unit`.
pub fn should_chunk(
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    unit: ChunkUnit,
    threshold: f64,
) -> bool {
    let span = (stop - start).num_milliseconds() as f64;
    span >= threshold * unit.nominal().num_milliseconds() as f64
}

/// Intervals covering `[start, stop)`, snapped outward to `unit` boundaries.
pub fn plan_chunks(
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    unit: ChunkUnit,
) -> HapiResult<Vec<ChunkInterval>> {
    if start >= stop {
        return Err(HapiError::InvalidTime(format!(
            "start {} is not before stop {}",
            start, stop
        )));
    }

    let mut plan = Vec::new();
    let mut cursor = unit.floor(start)?;
    while cursor < stop {
        let next = unit.advance(cursor)?;
        plan.push(ChunkInterval {
            start: cursor,
            stop: next,
        });
        cursor = next;
    }
    Ok(plan)
}

/// `n` contiguous intervals of equal length exactly covering `[start, stop)`.
///
/// Boundaries fall on whole milliseconds; intervals that would be empty
/// are dropped.
pub fn plan_n_chunks(
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    n: usize,
) -> HapiResult<Vec<ChunkInterval>> {
    if start >= stop {
        return Err(HapiError::InvalidTime(format!(
            "start {} is not before stop {}",
            start, stop
        )));
    }
    if n == 0 {
        return Err(HapiError::invalid_option("n_chunks", "must be at least 1"));
    }

    let span = i128::from((stop - start).num_milliseconds());
    let n = n as i128;
    let boundary = |k: i128| {
        if k == n {
            stop
        } else {
            start + Duration::milliseconds((span * k / n) as i64)
        }
    };

    Ok((0..n)
        .map(|k| ChunkInterval {
            start: boundary(k),
            stop: boundary(k + 1),
        })
        .filter(|c| c.start < c.stop)
        .collect())
}

/// Mean spacing of consecutive timestamps, or `None` with fewer than two.
pub fn mean_spacing(times: &[String]) -> HapiResult<Option<Duration>> {
    if times.len() < 2 {
        return Ok(None);
    }
    let parsed = parse_times(times, true)?;
    let (first, last) = (parsed[0], parsed[parsed.len() - 1]);
    let steps = (parsed.len() - 1) as i64;
    let mean = (last - first).num_microseconds().map_or_else(
        || Duration::milliseconds((last - first).num_milliseconds() / steps),
        |us| Duration::microseconds(us / steps),
    );
    Ok(Some(mean))
}

/// Fetch every interval, at most `concurrency` at a time.
///
/// Results come back tagged with their chunk index, in completion order.
/// The first failure aborts the remaining chunks and is returned as
/// [`HapiError::Chunk`].
pub async fn execute<F, Fut>(
    plan: &[ChunkInterval],
    concurrency: usize,
    fetch: F,
) -> HapiResult<Vec<(usize, ColumnarResult)>>
where
    F: Fn(usize, ChunkInterval) -> Fut,
    Fut: Future<Output = HapiResult<ColumnarResult>>,
{
    let total = plan.len();
    stream::iter(plan.iter().copied().enumerate())
        .map(|(index, interval)| {
            let chunk = fetch(index, interval);
            async move {
                match chunk.await {
                    Ok(result) => {
                        debug!(chunk = index, total, records = result.len(), "Chunk fetched");
                        Ok((index, result))
                    }
                    Err(e) => Err(HapiError::Chunk {
                        index,
                        start: interval.start_str(),
                        stop: interval.stop_str(),
                        source: Box::new(e),
                    }),
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await
}

/// Join chunk results in index order and trim to `[start, stop)`.
pub fn reassemble(
    mut parts: Vec<(usize, ColumnarResult)>,
    start: &str,
    stop: &str,
) -> HapiResult<ColumnarResult> {
    parts.sort_by_key(|(index, _)| *index);
    let joined = ColumnarResult::concat(parts.into_iter().map(|(_, r)| r).collect())?;
    trim(&joined, start, stop)
}

/// Keep records with `start <= time < stop`.
///
/// The bounds are re-rendered in the format of the first record so that
/// records are compared as bytes rather than parsed.
pub fn trim(result: &ColumnarResult, start: &str, stop: &str) -> HapiResult<ColumnarResult> {
    let Some(times) = result.times() else {
        return Err(HapiError::Decode("result has no time column".to_string()));
    };
    let Some(first) = times.first() else {
        return Ok(result.clone());
    };

    let start = reformat(first, start)?;
    let stop = reformat(first, stop)?;
    let lo = times.partition_point(|t| t.as_str() < start.as_str());
    let hi = times.partition_point(|t| t.as_str() < stop.as_str()).max(lo);

    debug!(
        dropped_head = lo,
        dropped_tail = times.len() - hi,
        "Trimmed chunked result"
    );
    Ok(result.slice(lo..hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hapi_codec::{Column, ColumnValues};
    use hapi_common::parse_time;

    fn t(s: &str) -> DateTime<Utc> {
        parse_time(s).unwrap()
    }

    fn result(times: &[&str]) -> ColumnarResult {
        ColumnarResult::new(vec![
            Column {
                name: "Time".to_string(),
                shape: vec![],
                width: Some(24),
                values: ColumnValues::Text(times.iter().map(|s| s.to_string()).collect()),
            },
            Column {
                name: "v".to_string(),
                shape: vec![],
                width: Some(8),
                values: ColumnValues::Double((0..times.len()).map(|i| i as f64).collect()),
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_unit_for_cadence() {
        assert_eq!(ChunkUnit::for_cadence(Duration::milliseconds(100)), ChunkUnit::Hour);
        assert_eq!(ChunkUnit::for_cadence(Duration::seconds(1)), ChunkUnit::Day);
        assert_eq!(ChunkUnit::for_cadence(Duration::hours(1)), ChunkUnit::Day);
        assert_eq!(ChunkUnit::for_cadence(Duration::hours(2)), ChunkUnit::Month);
        assert_eq!(ChunkUnit::for_cadence(Duration::days(1)), ChunkUnit::Year);
        assert_eq!(ChunkUnit::for_cadence(Duration::days(30)), ChunkUnit::Year);
    }

    #[test]
    fn test_plan_snaps_outward_by_day() {
        let plan = plan_chunks(t("1970-01-01T00:10:00Z"), t("1970-01-02T03:00:00Z"), ChunkUnit::Day)
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].start, t("1970-01-01T00:00:00Z"));
        assert_eq!(plan[0].stop, plan[1].start);
        assert_eq!(plan[1].stop, t("1970-01-03T00:00:00Z"));
        assert_eq!(plan[0].start_str(), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_plan_months_have_calendar_lengths() {
        let plan =
            plan_chunks(t("2000-01-15T00:00:00Z"), t("2000-03-01T00:00:00Z"), ChunkUnit::Month)
                .unwrap();
        let bounds: Vec<String> = plan.iter().map(|c| c.start_str()).collect();
        assert_eq!(bounds, vec!["2000-01-01T00:00:00Z", "2000-02-01T00:00:00Z"]);
        assert_eq!(plan[1].stop, t("2000-03-01T00:00:00Z"));
        assert_eq!((plan[1].stop - plan[1].start).num_days(), 29);
    }

    #[test]
    fn test_plan_years_and_hours() {
        let years = plan_chunks(t("1999-06-01Z"), t("2001-01-01Z"), ChunkUnit::Year).unwrap();
        assert_eq!(years.len(), 2);
        assert_eq!(years[1].start, t("2000-01-01Z"));

        let hours =
            plan_chunks(t("1970-01-01T00:30:00Z"), t("1970-01-01T02:00:00Z"), ChunkUnit::Hour)
                .unwrap();
        assert_eq!(hours.len(), 2);
    }

    #[test]
    fn test_plan_rejects_empty_range() {
        let at = t("1970-01-01Z");
        assert!(plan_chunks(at, at, ChunkUnit::Day).is_err());
        assert!(plan_n_chunks(at, at, 3).is_err());
    }

    #[test]
    fn test_plan_n_chunks_covers_range() {
        let (start, stop) = (t("1970-01-01T00:00:00Z"), t("1970-01-01T00:00:10Z"));
        let plan = plan_n_chunks(start, stop, 3).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].start, start);
        assert_eq!(plan[2].stop, stop);
        assert!(plan.windows(2).all(|w| w[0].stop == w[1].start));
        assert_eq!(plan[1].start_str(), "1970-01-01T00:00:03.333000000Z");
    }

    #[test]
    fn test_should_chunk_threshold() {
        let start = t("1970-01-01T00:00:00Z");
        assert!(!should_chunk(start, t("1970-01-01T11:59:59Z"), ChunkUnit::Day, 0.5));
        assert!(should_chunk(start, t("1970-01-01T12:00:00Z"), ChunkUnit::Day, 0.5));
        assert!(should_chunk(start, t("1970-01-01T01:00:00Z"), ChunkUnit::Day, 0.01));
    }

    #[test]
    fn test_mean_spacing() {
        let times: Vec<String> = ["1970-01-01T00:00:00Z", "1970-01-01T00:01:00Z", "1970-01-01T00:03:00Z"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(mean_spacing(&times).unwrap(), Some(Duration::seconds(90)));
        assert_eq!(mean_spacing(&times[..1]).unwrap(), None);
    }

    #[test]
    fn test_trim_is_half_open() {
        let r = result(&[
            "1970-01-01T00:09:59.000Z",
            "1970-01-01T00:10:00.000Z",
            "1970-01-01T00:10:59.999Z",
            "1970-01-01T00:11:00.000Z",
        ]);
        let trimmed = trim(&r, "1970-01-01T00:10:00Z", "1970-01-01T00:11:00Z").unwrap();
        assert_eq!(
            trimmed.times().unwrap(),
            &["1970-01-01T00:10:00.000Z".to_string(), "1970-01-01T00:10:59.999Z".to_string()]
        );
        assert_eq!(trimmed.column("v").unwrap().values.as_f64().unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_reassemble_orders_by_index() {
        let parts = vec![
            (1, result(&["1970-01-01T00:00:02.000Z", "1970-01-01T00:00:03.000Z"])),
            (0, result(&["1970-01-01T00:00:00.000Z", "1970-01-01T00:00:01.000Z"])),
        ];
        let joined = reassemble(parts, "1970-01-01T00:00:01Z", "1970-01-01T00:00:03Z").unwrap();
        assert_eq!(
            joined.times().unwrap(),
            &["1970-01-01T00:00:01.000Z".to_string(), "1970-01-01T00:00:02.000Z".to_string()]
        );
    }

    #[tokio::test]
    async fn test_execute_preserves_indices_and_fails_whole() {
        let plan = plan_n_chunks(t("1970-01-01T00:00:00Z"), t("1970-01-01T00:00:04Z"), 4).unwrap();

        let parts = execute(&plan, 4, |index, interval| async move {
            // Later chunks finish first.
            tokio::time::sleep(std::time::Duration::from_millis(10 * (4 - index as u64))).await;
            let format = TimeFormat::infer("1970-01-01T00:00:00.000Z").unwrap();
            let ts = format_time(&interval.start, &format);
            Ok(result(&[ts.as_str()]))
        })
        .await
        .unwrap();
        assert_eq!(parts.len(), 4);
        let joined = reassemble(parts, "1970-01-01T00:00:00Z", "1970-01-01T00:00:04Z").unwrap();
        assert_eq!(joined.times().unwrap()[3], "1970-01-01T00:00:03.000Z");

        let err = execute(&plan, 2, |index, _| async move {
            if index == 2 {
                Err(HapiError::transport("http://x/data", "boom"))
            } else {
                Ok(result(&["1970-01-01T00:00:00.000Z"]))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, HapiError::Chunk { index: 2, .. }));
    }
}
