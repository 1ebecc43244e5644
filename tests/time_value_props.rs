use blindsync::alarm::{AlarmSet, NextAlarm, TimeValue, normalize};
use proptest::prelude::*;
use regex::Regex;

fn accepted(input: &str) -> bool {
    Regex::new(r"^([01]?[0-9]|2[0-3]):([0-5][0-9])$")
        .expect("pattern compiles")
        .is_match(input)
}

fn valid_time() -> impl Strategy<Value = TimeValue> {
    (0u8..24, 0u8..60).prop_map(|(h, m)| TimeValue::from_hm(h, m).expect("in range"))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 2000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn parse_accepts_exactly_the_time_pattern(input in "[0-9 ]{0,3}:?[0-9a]{0,3}\n?") {
        prop_assert_eq!(TimeValue::parse(&input).is_ok(), accepted(&input), "input {:?}", input);
    }

    #[test]
    fn parse_rejects_arbitrary_text_off_pattern(input in any::<String>()) {
        prop_assert_eq!(TimeValue::parse(&input).is_ok(), accepted(&input));
    }

    #[test]
    fn padded_and_unpadded_hours_agree(hour in 0u8..24, minute in 0u8..60) {
        let padded = TimeValue::parse(&format!("{hour:02}:{minute:02}")).expect("padded");
        let short = TimeValue::parse(&format!("{hour}:{minute:02}")).expect("short");
        prop_assert_eq!(padded, short);
        prop_assert_eq!(padded.to_string(), format!("{hour:02}:{minute:02}"));
        prop_assert_eq!(normalize(&format!("{hour}:{minute}")).expect("normalize"), padded.to_string());
    }

    #[test]
    fn alarm_sets_stay_sorted_and_unique(times in prop::collection::vec(valid_time(), 0..40)) {
        let set: AlarmSet = times.iter().copied().collect();
        let wire = set.to_wire();
        let mut expected = wire.clone();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(&wire, &expected);
        for time in &times {
            prop_assert!(set.contains(*time));
        }
    }

    #[test]
    fn next_alarm_is_the_earliest_strictly_later_time(
        times in prop::collection::vec(valid_time(), 0..20),
        now in 0u16..1440,
    ) {
        let set: AlarmSet = times.iter().copied().collect();
        match set.next_after(now) {
            NextAlarm::None => prop_assert!(set.is_empty()),
            NextAlarm::Today(next) => {
                prop_assert!(next.minutes_since_midnight() > now);
                prop_assert!(set.iter().all(|t| t.minutes_since_midnight() <= now || t >= next));
            }
            NextAlarm::Tomorrow(next) => {
                prop_assert_eq!(Some(next), set.first());
                prop_assert!(set.iter().all(|t| t.minutes_since_midnight() <= now));
            }
        }
    }
}
