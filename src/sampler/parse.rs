//! Text parsing for the kernel's per-task sched accounting file.
//!
//! `/proc/<pid>/sched` is a `key : value` listing of the task's scheduling
//! entity fields. Only the fields the snapshot needs are extracted; unknown
//! lines are skipped so new kernel fields never break the parser.

use thiserror::Error;

/// Errors from parsing sched accounting text.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("sched accounting is missing field {field:?}")]
    MissingField { field: &'static str },

    #[error("sched accounting field {field:?} has malformed value {value:?}")]
    MalformedValue { field: &'static str, value: String },
}

/// Fields extracted from one read of a sched accounting file.
///
/// `vruntime_ms` is optional: not every kernel configuration exposes
/// `se.vruntime`, and the absence is propagated rather than papered over.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSched {
    /// `se.vruntime`, in milliseconds as the kernel prints it.
    pub vruntime_ms: Option<f64>,
    /// `nr_switches`, cumulative context switches.
    pub nr_switches: u64,
    /// `se.load.weight`, fixed-point scaled by the kernel.
    pub load_weight: u64,
    /// Numeric scheduling policy.
    pub policy: i32,
}

/// Parse the content of `/proc/<pid>/sched`.
pub fn parse_sched_text(text: &str) -> Result<RawSched, ParseError> {
    let mut vruntime_ms = None;
    let mut nr_switches = None;
    let mut load_weight = None;
    let mut policy = None;

    for line in text.lines() {
        // The header line ("comm (pid, #threads: n)") and the separator rule
        // fall through here: their trimmed keys match nothing below.
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };

        match key.trim() {
            "se.vruntime" => vruntime_ms = Some(parse_value("se.vruntime", value)?),
            "nr_switches" => nr_switches = Some(parse_value("nr_switches", value)?),
            "se.load.weight" => load_weight = Some(parse_value("se.load.weight", value)?),
            "policy" => policy = Some(parse_value("policy", value)?),
            _ => {}
        }
    }

    Ok(RawSched {
        vruntime_ms,
        nr_switches: nr_switches.ok_or(ParseError::MissingField {
            field: "nr_switches",
        })?,
        load_weight: load_weight.ok_or(ParseError::MissingField {
            field: "se.load.weight",
        })?,
        policy: policy.ok_or(ParseError::MissingField { field: "policy" })?,
    })
}

fn parse_value<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ParseError> {
    let trimmed = value.trim();
    trimmed.parse().map_err(|_| ParseError::MalformedValue {
        field,
        value: trimmed.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "\
flood-worker-0 (12345, #threads: 5)
-------------------------------------------------------------------
se.exec_start                                :     123456789.123456
se.vruntime                                  :         6051.258752
se.sum_exec_runtime                          :        10809.253446
se.nr_migrations                             :                   12
nr_switches                                  :                 1029
nr_voluntary_switches                        :                    3
nr_involuntary_switches                      :                 1026
se.load.weight                               :               112640
se.avg.load_sum                              :                47011
se.avg.util_avg                              :                 1023
policy                                       :                    0
prio                                         :                  130
clock-delta                                  :                  174
";

    #[test]
    fn test_parse_extracts_snapshot_fields() {
        let raw = parse_sched_text(FIXTURE).expect("fixture parses");
        assert_eq!(raw.vruntime_ms, Some(6051.258752));
        assert_eq!(raw.nr_switches, 1029);
        assert_eq!(raw.load_weight, 112640);
        assert_eq!(raw.policy, 0);
    }

    #[test]
    fn test_parse_tolerates_missing_vruntime() {
        let text = FIXTURE
            .lines()
            .filter(|l| !l.starts_with("se.vruntime"))
            .collect::<Vec<_>>()
            .join("\n");

        let raw = parse_sched_text(&text).expect("still parses");
        assert_eq!(raw.vruntime_ms, None);
        assert_eq!(raw.nr_switches, 1029);
    }

    #[test]
    fn test_parse_requires_switch_count() {
        let text = FIXTURE
            .lines()
            .filter(|l| !l.starts_with("nr_switches"))
            .collect::<Vec<_>>()
            .join("\n");

        let err = parse_sched_text(&text).expect_err("nr_switches is required");
        assert!(matches!(
            err,
            ParseError::MissingField {
                field: "nr_switches"
            }
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_value() {
        let text = FIXTURE.replace("                 1029", "               garbage");

        let err = parse_sched_text(&text).expect_err("malformed nr_switches");
        match err {
            ParseError::MalformedValue { field, value } => {
                assert_eq!(field, "nr_switches");
                assert_eq!(value, "garbage");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ignores_lookalike_keys() {
        // nr_voluntary_switches / nr_involuntary_switches must not be
        // mistaken for nr_switches.
        let raw = parse_sched_text(FIXTURE).expect("fixture parses");
        assert_eq!(raw.nr_switches, 1029);
    }

    #[test]
    fn test_parse_empty_input_is_missing_fields() {
        assert!(parse_sched_text("").is_err());
    }
}
