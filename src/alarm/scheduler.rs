use chrono::{Days, NaiveDateTime, Timelike};

use crate::alarm::model::{AlarmSet, TimeValue};

/// Result of asking which alarm fires next.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NextAlarm {
    None,
    Today(TimeValue),
    /// Every alarm already passed today; the earliest one fires tomorrow.
    Tomorrow(TimeValue),
}

impl NextAlarm {
    pub fn time(&self) -> Option<TimeValue> {
        match self {
            NextAlarm::None => None,
            NextAlarm::Today(time) | NextAlarm::Tomorrow(time) => Some(*time),
        }
    }

    pub fn is_tomorrow(&self) -> bool {
        matches!(self, NextAlarm::Tomorrow(_))
    }

    /// Local date-time at which this alarm fires, counted from `now`.
    pub fn occurrence_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            NextAlarm::None => None,
            NextAlarm::Today(time) => Some(now.date().and_time(time.to_naive_time())),
            NextAlarm::Tomorrow(time) => now
                .date()
                .checked_add_days(Days::new(1))
                .map(|date| date.and_time(time.to_naive_time())),
        }
    }

    pub fn describe(&self, labels: &NextAlarmLabels) -> String {
        match self {
            NextAlarm::None => labels.none.to_string(),
            NextAlarm::Today(time) => time.to_string(),
            NextAlarm::Tomorrow(time) => format!("{time} {}", labels.tomorrow),
        }
    }
}

/// Wording used when turning a [`NextAlarm`] into display text.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct NextAlarmLabels {
    pub none: &'static str,
    pub tomorrow: &'static str,
}

impl NextAlarmLabels {
    pub const PT_BR: NextAlarmLabels = NextAlarmLabels {
        none: "Nenhum alarme configurado",
        tomorrow: "(amanhã)",
    };

    pub const EN: NextAlarmLabels = NextAlarmLabels {
        none: "No alarms configured",
        tomorrow: "(tomorrow)",
    };
}

impl Default for NextAlarmLabels {
    fn default() -> Self {
        Self::PT_BR
    }
}

impl AlarmSet {
    /// First alarm strictly after `now_minutes`; an alarm at exactly the
    /// current minute counts as already passed.
    pub fn next_after(&self, now_minutes: u16) -> NextAlarm {
        if let Some(time) = self
            .iter()
            .find(|time| time.minutes_since_midnight() > now_minutes)
        {
            return NextAlarm::Today(time);
        }
        match self.first() {
            Some(earliest) => NextAlarm::Tomorrow(earliest),
            None => NextAlarm::None,
        }
    }

    pub fn next_at<T: Timelike>(&self, now: &T) -> NextAlarm {
        self.next_after(minutes_of_day(now))
    }
}

pub fn minutes_of_day<T: Timelike>(now: &T) -> u16 {
    (now.hour() * 60 + now.minute()) as u16
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;

    fn tv(input: &str) -> TimeValue {
        TimeValue::parse(input).expect("valid time")
    }

    fn morning_and_noon() -> AlarmSet {
        [tv("07:30"), tv("12:00")].into_iter().collect()
    }

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    #[test]
    fn picks_first_alarm_later_today() {
        let next = morning_and_noon().next_at(&at(8, 0));
        assert_eq!(next, NextAlarm::Today(tv("12:00")));
        assert_eq!(next.describe(&NextAlarmLabels::EN), "12:00");
    }

    #[test]
    fn wraps_to_earliest_alarm_tomorrow() {
        let next = morning_and_noon().next_at(&at(13, 0));
        assert_eq!(next, NextAlarm::Tomorrow(tv("07:30")));
        assert_eq!(next.describe(&NextAlarmLabels::EN), "07:30 (tomorrow)");
        assert_eq!(next.describe(&NextAlarmLabels::PT_BR), "07:30 (amanhã)");
    }

    #[test]
    fn empty_set_has_no_next_alarm() {
        let next = AlarmSet::new().next_at(&at(13, 0));
        assert_eq!(next, NextAlarm::None);
        assert_eq!(next.describe(&NextAlarmLabels::default()), "Nenhum alarme configurado");
        assert_eq!(next.time(), None);
    }

    #[test]
    fn alarm_at_current_minute_is_not_next() {
        let set = morning_and_noon();
        assert_eq!(set.next_after(12 * 60), NextAlarm::Tomorrow(tv("07:30")));
        assert_eq!(set.next_after(12 * 60 - 1), NextAlarm::Today(tv("12:00")));
    }

    #[test]
    fn seconds_do_not_affect_the_comparison() {
        let now = NaiveTime::from_hms_opt(7, 29, 59).expect("valid");
        assert_eq!(morning_and_noon().next_at(&now), NextAlarm::Today(tv("07:30")));
    }

    #[test]
    fn occurrence_rolls_date_for_tomorrow() {
        let now = NaiveDate::from_ymd_opt(2026, 12, 31)
            .expect("date")
            .and_hms_opt(23, 0, 0)
            .expect("time");
        let next = morning_and_noon().next_at(&now);
        let when = next.occurrence_after(now).expect("has alarm");
        assert_eq!(
            when,
            NaiveDate::from_ymd_opt(2027, 1, 1)
                .expect("date")
                .and_hms_opt(7, 30, 0)
                .expect("time")
        );
        assert!(next.is_tomorrow());
    }

    #[test]
    fn occurrence_today_keeps_date() {
        let now = NaiveDate::from_ymd_opt(2026, 3, 8)
            .expect("date")
            .and_hms_opt(6, 0, 0)
            .expect("time");
        let when = morning_and_noon()
            .next_at(&now)
            .occurrence_after(now)
            .expect("has alarm");
        assert_eq!(when.date(), now.date());
        assert_eq!(when.time(), at(7, 30));
        assert_eq!(NextAlarm::None.occurrence_after(now), None);
    }
}
