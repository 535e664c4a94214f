use once_cell::sync::Lazy;
use regex::Regex;

static ISO_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?")
        .expect("valid duration pattern")
});

const UNITS: [(&str, &str); 6] = [
    ("year", "years"),
    ("month", "months"),
    ("day", "days"),
    ("hour", "hours"),
    ("minute", "minutes"),
    ("second", "seconds"),
];

/// Renders a restricted ISO-8601 duration (`P[nY][nM][nD][T[nH][nM][nS]]`)
/// as a human-readable phrase, e.g. `"P2DT30M"` becomes `"2 days, 30 minutes"`.
///
/// Inputs that are empty or do not start with `P` pass through unchanged;
/// an all-zero duration renders as `"No duration"`. This function never
/// fails: any parse anomaly falls back to echoing the input.
pub fn format_duration(iso: &str) -> String {
    if iso.is_empty() || !iso.starts_with('P') {
        return iso.to_string();
    }

    let Some(captures) = ISO_DURATION.captures(iso) else {
        return iso.to_string();
    };

    let mut components = [0u64; 6];
    for (slot, component) in components.iter_mut().enumerate() {
        match captures.get(slot + 1) {
            Some(group) => match group.as_str().parse::<u64>() {
                Ok(value) => *component = value,
                Err(_) => return iso.to_string(),
            },
            None => *component = 0,
        }
    }

    let mut parts = Vec::new();
    for (value, (singular, plural)) in components.into_iter().zip(UNITS) {
        match value {
            0 => {}
            1 => parts.push(format!("1 {singular}")),
            n => parts.push(format!("{n} {plural}")),
        }
    }

    if parts.is_empty() {
        "No duration".to_string()
    } else {
        parts.join(", ")
    }
}

/// Assembles a restricted ISO-8601 duration from day/hour/minute form
/// fields. A component is emitted only when its string parses to a
/// positive integer; when nothing is emitted the result is the empty
/// string, which callers treat as "no estimate" (distinct from zero).
///
/// Years, months and seconds are deliberately out of reach here even
/// though `format_duration` can display them: the only producers are
/// day/hour/minute inputs.
pub fn build_duration(days: &str, hours: &str, minutes: &str) -> String {
    let days = positive_component(days);
    let hours = positive_component(hours);
    let minutes = positive_component(minutes);

    let mut duration = String::from("P");
    if let Some(days) = days {
        duration.push_str(&format!("{days}D"));
    }
    if hours.is_some() || minutes.is_some() {
        duration.push('T');
        if let Some(hours) = hours {
            duration.push_str(&format!("{hours}H"));
        }
        if let Some(minutes) = minutes {
            duration.push_str(&format!("{minutes}M"));
        }
    }

    if duration == "P" {
        String::new()
    } else {
        duration
    }
}

fn positive_component(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_non_iso_inputs_pass_through() {
        assert_eq!(format_duration(""), "");
        assert_eq!(format_duration("not-iso"), "not-iso");
        assert_eq!(format_duration("30 minutes"), "30 minutes");
    }

    #[test]
    fn formats_every_component_in_order() {
        assert_eq!(
            format_duration("P1Y2M3DT4H5M6S"),
            "1 year, 2 months, 3 days, 4 hours, 5 minutes, 6 seconds"
        );
    }

    #[test]
    fn bare_p_is_no_duration() {
        assert_eq!(format_duration("P"), "No duration");
        assert_eq!(format_duration("PT"), "No duration");
    }

    #[test]
    fn singular_boundary() {
        assert_eq!(format_duration("P1D"), "1 day");
        assert_eq!(format_duration("P2D"), "2 days");
        assert_eq!(format_duration("PT1M"), "1 minute");
    }

    #[test]
    fn time_designator_separates_minutes_from_months() {
        assert_eq!(format_duration("P2M"), "2 months");
        assert_eq!(format_duration("PT2M"), "2 minutes");
    }

    #[test]
    fn component_overflow_echoes_input() {
        let huge = "P99999999999999999999D";
        assert_eq!(format_duration(huge), huge);
    }

    #[test]
    fn builds_days_and_minutes() {
        assert_eq!(build_duration("2", "0", "30"), "P2DT30M");
        assert_eq!(build_duration("2", "", "30"), "P2DT30M");
    }

    #[test]
    fn all_zero_or_blank_builds_empty() {
        assert_eq!(build_duration("0", "0", "0"), "");
        assert_eq!(build_duration("", "", ""), "");
        assert_eq!(build_duration("zero", "none", "-5"), "");
    }

    #[test]
    fn hours_alone_get_the_time_designator() {
        assert_eq!(build_duration("", "8", ""), "PT8H");
        assert_eq!(build_duration("1", "8", ""), "P1DT8H");
    }

    #[test]
    fn builder_and_formatter_do_not_round_trip() {
        // The formatter understands years, months and seconds; the builder
        // never produces them. Asserting the asymmetry keeps it deliberate.
        assert_eq!(format_duration("P1Y"), "1 year");
        assert_eq!(build_duration("365", "", ""), "P365D");
        assert_eq!(format_duration(&build_duration("2", "4", "0")), "2 days, 4 hours");
    }
}
