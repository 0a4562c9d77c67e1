use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::error::PortalError;
use crate::model::{Record, ScheduledEvent};

/// One cell of a month view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub events: Vec<Record<ScheduledEvent>>,
    pub is_current_month: bool,
    pub is_today: bool,
}

/// Length of `month` (1-12) of `year`. `None` for a month outside 1-12.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = first.checked_add_months(Months::new(1))?;
    Some(next.signed_duration_since(first).num_days() as u32)
}

/// Calendar date of an event timestamp. Offsets are honored as written, so
/// `2024-03-10T23:30:00-05:00` falls on the 10th. Unparseable input is `None`.
pub fn parse_event_date(ts: &str) -> Option<NaiveDate> {
    let t = ts.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.date_naive());
    }
    parse_naive_datetime(t)
        .map(|dt| dt.date())
        .or_else(|| NaiveDate::parse_from_str(t, "%Y-%m-%d").ok())
}

/// Instant of an event timestamp. Naive values are read as UTC and a bare
/// date as its midnight.
pub fn parse_event_instant(ts: &str) -> Option<DateTime<Utc>> {
    let t = ts.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = parse_naive_datetime(t) {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn parse_naive_datetime(t: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(t, f).ok())
}

/// Start and end must both parse and `end` must come after `start`.
pub fn check_event_window(start: &str, end: &str) -> Result<(), PortalError> {
    let (Some(start), Some(end)) = (parse_event_instant(start), parse_event_instant(end)) else {
        return Err(PortalError::validation(
            "event start and end must be ISO-8601 timestamps",
        ));
    };
    if end <= start {
        return Err(PortalError::validation("event end must be after its start"));
    }
    Ok(())
}

/// Whether `event` covers `date`: its start date, its end date, or any
/// date strictly between them.
pub fn event_covers(event: &ScheduledEvent, date: NaiveDate) -> bool {
    let start = parse_event_date(&event.start);
    let end = parse_event_date(&event.end);
    if start == Some(date) || end == Some(date) {
        return true;
    }
    match (start, end) {
        (Some(s), Some(e)) => date > s && date < e,
        _ => false,
    }
}

pub fn events_on(events: &[Record<ScheduledEvent>], date: NaiveDate) -> Vec<Record<ScheduledEvent>> {
    events
        .iter()
        .filter(|e| event_covers(&e.data, date))
        .cloned()
        .collect()
}

/// Events starting strictly after `now`.
pub fn upcoming_events<'a>(
    events: &'a [Record<ScheduledEvent>],
    now: DateTime<Utc>,
) -> Vec<&'a Record<ScheduledEvent>> {
    events
        .iter()
        .filter(|e| {
            parse_event_instant(&e.data.start)
                .map(|start| start > now)
                .unwrap_or(false)
        })
        .collect()
}

/// Builds the Sunday-first grid for `month` (1-12) of `year`: trailing days
/// of the previous month, every day of the month, then leading days of the
/// next month until the last week is full.
pub fn month_grid(
    year: i32,
    month: u32,
    events: &[Record<ScheduledEvent>],
    today: NaiveDate,
) -> Result<Vec<CalendarDay>, PortalError> {
    let (Some(first), Some(days)) = (
        NaiveDate::from_ymd_opt(year, month, 1),
        days_in_month(year, month),
    ) else {
        return Err(PortalError::validation(format!(
            "invalid year/month: {}-{}",
            year, month
        )));
    };
    let lead = first.weekday().num_days_from_sunday();
    let cells = (lead + days).div_ceil(7) * 7;
    let Some(grid_start) = first.checked_sub_days(Days::new(u64::from(lead))) else {
        return Err(PortalError::validation(format!(
            "year out of range: {}",
            year
        )));
    };

    Ok(grid_start
        .iter_days()
        .take(cells as usize)
        .map(|date| CalendarDay {
            date,
            events: events_on(events, date),
            is_current_month: date.month() == month,
            is_today: date == today,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventType;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn ev(id: &str, start: &str, end: &str) -> Record<ScheduledEvent> {
        Record {
            id: id.to_string(),
            data: ScheduledEvent {
                title: id.to_string(),
                start: start.to_string(),
                end: end.to_string(),
                kind: EventType::Event,
                class: None,
                subject: None,
                description: None,
            },
        }
    }

    #[test]
    fn every_grid_is_whole_weeks_and_covers_the_month() {
        let today = ymd(2000, 1, 1);
        for year in 1999..=2032 {
            for month in 1..=12 {
                let grid = month_grid(year, month, &[], today).expect("grid");
                let days = days_in_month(year, month).expect("valid month") as usize;
                let lead = ymd(year, month, 1).weekday().num_days_from_sunday() as usize;
                assert_eq!(grid.len() % 7, 0, "{}-{}", year, month);
                assert!(grid.len() >= 28 && grid.len() <= 42);
                assert_eq!(grid.len(), (lead + days).div_ceil(7) * 7);
                assert_eq!(grid.iter().filter(|c| c.is_current_month).count(), days);
                assert_eq!(grid[0].date.weekday().num_days_from_sunday(), 0);
                for pair in grid.windows(2) {
                    assert_eq!(pair[0].date.succ_opt(), Some(pair[1].date));
                }
            }
        }
    }

    #[test]
    fn february_of_non_leap_year_starting_sunday_is_exactly_four_weeks() {
        // 1 February 2015 was a Sunday.
        let grid = month_grid(2015, 2, &[], ymd(2015, 2, 1)).expect("grid");
        assert_eq!(grid.len(), 28);
        assert_eq!(grid[0].date, ymd(2015, 2, 1));
        assert_eq!(grid[27].date, ymd(2015, 2, 28));
        assert!(grid.iter().all(|c| c.is_current_month));
    }

    #[test]
    fn month_starting_sunday_has_no_lead_days() {
        // 1 December 2024 was a Sunday; pad with 1-4 January 2025.
        let grid = month_grid(2024, 12, &[], ymd(2000, 1, 1)).expect("grid");
        assert_eq!(grid[0].date, ymd(2024, 12, 1));
        assert_eq!(grid.len(), 35);
        assert_eq!(grid[34].date, ymd(2025, 1, 4));
        assert!(!grid[34].is_current_month);
    }

    #[test]
    fn january_leads_with_previous_december() {
        // 1 January 2025 was a Wednesday.
        let grid = month_grid(2025, 1, &[], ymd(2000, 1, 1)).expect("grid");
        assert_eq!(grid[0].date, ymd(2024, 12, 29));
        assert_eq!(grid[2].date, ymd(2024, 12, 31));
        assert!(!grid[0].is_current_month);
        assert_eq!(grid[3].date, ymd(2025, 1, 1));
        assert!(grid[3].is_current_month);
    }

    #[test]
    fn multi_day_event_lands_on_each_day_of_its_span_only() {
        let events = vec![ev("fest", "2024-03-10T09:00:00Z", "2024-03-12T17:00:00Z")];
        let grid = month_grid(2024, 3, &events, ymd(2000, 1, 1)).expect("grid");
        let with_event: Vec<NaiveDate> = grid
            .iter()
            .filter(|c| !c.events.is_empty())
            .map(|c| c.date)
            .collect();
        assert_eq!(
            with_event,
            vec![ymd(2024, 3, 10), ymd(2024, 3, 11), ymd(2024, 3, 12)]
        );
    }

    #[test]
    fn time_of_day_is_ignored_for_membership() {
        let e = ev("late", "2024-03-10T23:59:00", "2024-03-10T23:59:30");
        assert!(event_covers(&e.data, ymd(2024, 3, 10)));
        assert!(!event_covers(&e.data, ymd(2024, 3, 11)));
    }

    #[test]
    fn offsets_are_read_as_written() {
        assert_eq!(
            parse_event_date("2024-03-10T23:30:00-05:00"),
            Some(ymd(2024, 3, 10))
        );
        assert_eq!(parse_event_date("2024-03-10"), Some(ymd(2024, 3, 10)));
        assert_eq!(parse_event_date("2024-03-10T08:15"), Some(ymd(2024, 3, 10)));
        assert_eq!(parse_event_date("next tuesday"), None);
    }

    #[test]
    fn unparseable_events_are_never_attached() {
        let events = vec![ev("bad", "soon", "later")];
        let grid = month_grid(2024, 3, &events, ymd(2000, 1, 1)).expect("grid");
        assert!(grid.iter().all(|c| c.events.is_empty()));
    }

    #[test]
    fn today_is_flagged_once() {
        let grid = month_grid(2024, 3, &[], ymd(2024, 3, 15)).expect("grid");
        let todays: Vec<&CalendarDay> = grid.iter().filter(|c| c.is_today).collect();
        assert_eq!(todays.len(), 1);
        assert_eq!(todays[0].date, ymd(2024, 3, 15));
    }

    #[test]
    fn today_in_padding_cells_is_flagged_too() {
        // 29 February 2024 sits in the lead row of March 2024.
        let grid = month_grid(2024, 3, &[], ymd(2024, 2, 29)).expect("grid");
        let cell = grid.iter().find(|c| c.is_today).expect("today cell");
        assert!(!cell.is_current_month);
    }

    #[test]
    fn invalid_month_is_rejected() {
        assert!(month_grid(2024, 13, &[], ymd(2000, 1, 1)).is_err());
        assert!(month_grid(2024, 0, &[], ymd(2000, 1, 1)).is_err());
    }

    #[test]
    fn month_lengths_follow_the_gregorian_calendar() {
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2023, 2), Some(28));
        assert_eq!(days_in_month(1900, 2), Some(28));
        assert_eq!(days_in_month(2000, 2), Some(29));
        assert_eq!(days_in_month(2024, 4), Some(30));
        assert_eq!(days_in_month(2024, 12), Some(31));
        assert_eq!(days_in_month(2024, 0), None);
        assert_eq!(days_in_month(2024, 13), None);
    }

    #[test]
    fn upcoming_events_start_after_now() {
        let events = vec![
            ev("past", "2024-03-01T09:00:00Z", "2024-03-01T10:00:00Z"),
            ev("future", "2024-04-01", "2024-04-01"),
        ];
        let now = parse_event_instant("2024-03-15T00:00:00Z").expect("now");
        let upcoming = upcoming_events(&events, now);
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].id, "future");
    }

    #[test]
    fn event_window_needs_end_after_start() {
        assert!(check_event_window("2024-03-10T09:00", "2024-03-10T10:00").is_ok());
        assert!(check_event_window("2024-03-10T10:00", "2024-03-10T10:00").is_err());
        assert!(check_event_window("2024-03-12", "2024-03-10").is_err());
        assert!(check_event_window("soon", "2024-03-10").is_err());
        assert!(check_event_window("2024-03-10T09:00:00+05:30", "2024-03-10T04:00:00Z").is_ok());
    }
}
