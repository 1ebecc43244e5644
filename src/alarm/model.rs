use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ValidationError;

static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([01]?[0-9]|2[0-3]):([0-5][0-9])$").expect("time pattern compiles")
});

/// A local wall-clock time of day at minute resolution.
///
/// Field order gives the derived `Ord` the same result as comparing
/// minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeValue {
    hour: u8,
    minute: u8,
}

impl TimeValue {
    pub fn from_hm(hour: u8, minute: u8) -> Result<Self, ValidationError> {
        if hour > 23 || minute > 59 {
            return Err(ValidationError::InvalidFormat {
                input: format!("{hour}:{minute}"),
            });
        }
        Ok(Self { hour, minute })
    }

    /// Accepts `H:MM` or `HH:MM` with hour 0-23 and minute 00-59.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidFormat {
            input: input.to_string(),
        };
        let captures = TIME_PATTERN.captures(input).ok_or_else(invalid)?;
        let hour = captures[1].parse::<u8>().map_err(|_| invalid())?;
        let minute = captures[2].parse::<u8>().map_err(|_| invalid())?;
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn minutes_since_midnight(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }

    pub fn to_naive_time(&self) -> chrono::NaiveTime {
        chrono::NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(chrono::NaiveTime::MIN)
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeValue {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TimeValue {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TimeValue> for String {
    fn from(value: TimeValue) -> Self {
        value.to_string()
    }
}

/// Zero-pads both halves of an `H:M` string, e.g. `"7:3"` becomes `"07:03"`.
///
/// Only the shape is checked here; range checks belong to [`TimeValue::parse`].
pub fn normalize(input: &str) -> Result<String, ValidationError> {
    let invalid = || ValidationError::InvalidFormat {
        input: input.to_string(),
    };
    let (hours, minutes) = input.split_once(':').ok_or_else(invalid)?;
    let well_formed =
        |part: &str| (1..=2).contains(&part.len()) && part.bytes().all(|b| b.is_ascii_digit());
    if !well_formed(hours) || !well_formed(minutes) {
        return Err(invalid());
    }
    Ok(format!("{hours:0>2}:{minutes:0>2}"))
}

/// Alarms of one device, unique per minute and kept in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmSet {
    times: Vec<TimeValue>,
}

impl AlarmSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, time: TimeValue) -> Result<AlarmSet, ValidationError> {
        match self.times.binary_search(&time) {
            Ok(_) => Err(ValidationError::DuplicateAlarm(time)),
            Err(index) => {
                let mut times = self.times.clone();
                times.insert(index, time);
                Ok(AlarmSet { times })
            }
        }
    }

    pub fn remove(&self, time: TimeValue) -> AlarmSet {
        let times = self
            .times
            .iter()
            .copied()
            .filter(|existing| *existing != time)
            .collect();
        AlarmSet { times }
    }

    pub fn contains(&self, time: TimeValue) -> bool {
        self.times.binary_search(&time).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = TimeValue> + '_ {
        self.times.iter().copied()
    }

    pub fn as_slice(&self) -> &[TimeValue] {
        &self.times
    }

    pub fn first(&self) -> Option<TimeValue> {
        self.times.first().copied()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Builds a set from the device's alarm strings. Unparseable entries are
    /// dropped with a warning; repeats collapse into one alarm.
    pub fn from_wire<S: AsRef<str>>(entries: &[S]) -> AlarmSet {
        let mut set = AlarmSet::new();
        for entry in entries {
            let raw = entry.as_ref();
            match TimeValue::parse(raw) {
                Ok(time) => {
                    if let Ok(next) = set.add(time) {
                        set = next;
                    }
                }
                Err(err) => warn!(alarm = raw, %err, "dropping unparseable alarm from device"),
            }
        }
        set
    }

    pub fn to_wire(&self) -> Vec<String> {
        self.times.iter().map(TimeValue::to_string).collect()
    }
}

impl FromIterator<TimeValue> for AlarmSet {
    fn from_iter<I: IntoIterator<Item = TimeValue>>(iter: I) -> Self {
        let mut times: Vec<TimeValue> = iter.into_iter().collect();
        times.sort_unstable();
        times.dedup();
        AlarmSet { times }
    }
}

impl<'a> IntoIterator for &'a AlarmSet {
    type Item = &'a TimeValue;
    type IntoIter = std::slice::Iter<'a, TimeValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.times.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::*;

    fn tv(input: &str) -> TimeValue {
        TimeValue::parse(input).expect("valid time")
    }

    #[test]
    fn parses_padded_and_unpadded_hours() {
        assert_eq!(tv("07:30"), TimeValue::from_hm(7, 30).expect("valid"));
        assert_eq!(tv("7:30"), TimeValue::from_hm(7, 30).expect("valid"));
        assert_eq!(tv("0:00").minutes_since_midnight(), 0);
        assert_eq!(tv("23:59").minutes_since_midnight(), 1439);
    }

    #[test]
    fn rejects_out_of_range_and_malformed_input() {
        for input in [
            "24:00", "7:3", "07:60", "007:30", "07:30:00", " 07:30", "07-30", "", ":", "ab:cd",
            "19:5a", "+1:00",
        ] {
            let err = TimeValue::parse(input).expect_err(input);
            assert_eq!(
                err,
                ValidationError::InvalidFormat {
                    input: input.to_string()
                }
            );
        }
    }

    #[test]
    fn normalize_pads_both_halves() {
        assert_eq!(normalize("7:3").expect("shape ok"), "07:03");
        assert_eq!(normalize("23:59").expect("shape ok"), "23:59");
        assert_eq!(normalize("0:0").expect("shape ok"), "00:00");
        assert!(normalize("730").is_err());
        assert!(normalize("123:4").is_err());
        assert!(normalize("1:x").is_err());
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(tv("7:05").to_string(), "07:05");
        assert_eq!(String::from(tv("12:00")), "12:00");
    }

    #[test]
    fn ordering_follows_minutes_since_midnight() {
        assert_eq!(tv("09:59").cmp(&tv("10:00")), Ordering::Less);
        assert_eq!(tv("10:00").cmp(&tv("10:00")), Ordering::Equal);
        assert_eq!(tv("23:00").cmp(&tv("1:00")), Ordering::Greater);
    }

    #[test]
    fn serde_uses_canonical_string() {
        let json = serde_json::to_string(&tv("6:15")).expect("serialize");
        assert_eq!(json, "\"06:15\"");
        let back: TimeValue = serde_json::from_str("\"6:15\"").expect("deserialize");
        assert_eq!(back, tv("06:15"));
        assert!(serde_json::from_str::<TimeValue>("\"25:00\"").is_err());
    }

    #[test]
    fn add_keeps_ascending_order() {
        let set = AlarmSet::new()
            .add(tv("12:00"))
            .and_then(|set| set.add(tv("07:30")))
            .and_then(|set| set.add(tv("21:15")))
            .expect("distinct alarms");
        assert_eq!(set.to_wire(), vec!["07:30", "12:00", "21:15"]);
    }

    #[test]
    fn duplicate_add_is_rejected_and_set_unchanged() {
        let set = AlarmSet::new().add(tv("07:30")).expect("first add");
        let err = set.add(tv("7:30")).expect_err("same minute");
        assert_eq!(err, ValidationError::DuplicateAlarm(tv("07:30")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn add_returns_new_set_without_touching_original() {
        let original = AlarmSet::new().add(tv("06:00")).expect("add");
        let grown = original.add(tv("06:30")).expect("add");
        assert_eq!(original.len(), 1);
        assert_eq!(grown.len(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let set: AlarmSet = [tv("07:30"), tv("12:00")].into_iter().collect();
        let once = set.remove(tv("07:30"));
        let twice = once.remove(tv("07:30"));
        assert_eq!(once, twice);
        assert_eq!(twice.to_wire(), vec!["12:00"]);
        assert_eq!(set.remove(tv("03:00")), set);
    }

    #[test]
    fn from_wire_drops_garbage_and_repeats() {
        let set = AlarmSet::from_wire(&["12:00", "7:30", "07:30", "noon", "25:00"]);
        assert_eq!(set.to_wire(), vec!["07:30", "12:00"]);
        assert!(set.contains(tv("07:30")));
        assert!(!set.contains(tv("08:00")));
    }
}
