//! Offline, advisory policy linter (spec.md §4.3). Findings never affect
//! runtime evaluation.

use super::model::{Effect, HourRange, Policy, Rule, TimeWindow, Weekday};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LintKind {
    AllowBeforeDeny,
    UnreachableRule,
    OverlappingTimeWindows,
}

#[derive(Debug, Clone, Serialize)]
pub struct LintFinding {
    #[serde(rename = "type")]
    pub kind: LintKind,
    pub message: String,
    pub rule_index: Option<usize>,
}

/// Run all advisory checks over a policy's rule list.
pub fn lint(policy: &Policy) -> Vec<LintFinding> {
    let mut findings = Vec::new();
    findings.extend(allow_before_deny(&policy.rules));
    findings.extend(unreachable_rules(&policy.rules));
    findings.extend(overlapping_time_windows(&policy.rules));
    findings
}

fn allow_before_deny(rules: &[Rule]) -> Vec<LintFinding> {
    let mut out = Vec::new();
    for (i, earlier) in rules.iter().enumerate() {
        if earlier.effect != Effect::Allow {
            continue;
        }
        for (j, later) in rules.iter().enumerate().skip(i + 1) {
            if later.effect != Effect::Deny {
                continue;
            }
            if sets_intersect(&earlier.users, &later.users) && sets_intersect(&earlier.profiles, &later.profiles) {
                out.push(LintFinding {
                    kind: LintKind::AllowBeforeDeny,
                    message: format!(
                        "rule {i} allows a (user, profile) set that rule {j} later tries to deny; the deny can never fire for overlapping callers"
                    ),
                    rule_index: Some(i),
                });
            }
        }
    }
    out
}

fn unreachable_rules(rules: &[Rule]) -> Vec<LintFinding> {
    let mut out = Vec::new();
    for (j, later) in rules.iter().enumerate() {
        for (i, earlier) in rules.iter().enumerate().take(j) {
            if earlier.effect == later.effect && subsumes(earlier, later) {
                out.push(LintFinding {
                    kind: LintKind::UnreachableRule,
                    message: format!(
                        "rule {j} is unreachable: its predicate is already covered by rule {i} with the same effect"
                    ),
                    rule_index: Some(j),
                });
                break;
            }
        }
    }
    out
}

fn overlapping_time_windows(rules: &[Rule]) -> Vec<LintFinding> {
    let mut out = Vec::new();
    for (i, a) in rules.iter().enumerate() {
        for (j, b) in rules.iter().enumerate().skip(i + 1) {
            if a.effect == b.effect {
                continue;
            }
            if sets_intersect(&a.users, &b.users)
                && sets_intersect(&a.profiles, &b.profiles)
                && time_windows_intersect(&a.time_window, &b.time_window)
            {
                out.push(LintFinding {
                    kind: LintKind::OverlappingTimeWindows,
                    message: format!(
                        "rules {i} and {j} have differing effects ({:?} vs {:?}) but overlapping time windows and caller sets",
                        a.effect, b.effect
                    ),
                    rule_index: Some(i),
                });
            }
        }
    }
    out
}

/// Two optional string sets "intersect" if either is universal (`None` or
/// empty) or if they share at least one element.
fn sets_intersect(a: &Option<Vec<String>>, b: &Option<Vec<String>>) -> bool {
    let a_universal = a.as_ref().map(|v| v.is_empty()).unwrap_or(true);
    let b_universal = b.as_ref().map(|v| v.is_empty()).unwrap_or(true);
    if a_universal || b_universal {
        return true;
    }
    let a = a.as_ref().unwrap();
    let b = b.as_ref().unwrap();
    a.iter().any(|x| b.contains(x))
}

fn is_superset_or_universal(a: &Option<Vec<String>>, b: &Option<Vec<String>>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(a), _) if a.is_empty() => true,
        (Some(_), None) => false,
        (Some(_), Some(b)) if b.is_empty() => false,
        (Some(a), Some(b)) => b.iter().all(|x| a.contains(x)),
    }
}

fn hours_superset(a: &Option<HourRange>, b: &Option<HourRange>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => a.start <= b.start && b.end <= a.end,
    }
}

fn weekdays_superset(a: &Option<Vec<Weekday>>, b: &Option<Vec<Weekday>>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => b.iter().all(|x| a.contains(x)),
    }
}

fn time_window_superset(a: &Option<TimeWindow>, b: &Option<TimeWindow>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => weekdays_superset(&a.weekdays, &b.weekdays) && hours_superset(&a.hours, &b.hours),
    }
}

fn time_windows_intersect(a: &Option<TimeWindow>, b: &Option<TimeWindow>) -> bool {
    let (a, b) = match (a, b) {
        (None, _) | (_, None) => return true,
        (Some(a), Some(b)) => (a, b),
    };
    let weekdays_ok = match (&a.weekdays, &b.weekdays) {
        (None, _) | (_, None) => true,
        (Some(aw), Some(bw)) => aw.iter().any(|d| bw.contains(d)),
    };
    if !weekdays_ok {
        return false;
    }
    match (&a.hours, &b.hours) {
        (None, _) | (_, None) => true,
        (Some(ah), Some(bh)) => ah.start < bh.end && bh.start < ah.end,
    }
}

/// Textual subsumption only (per-field structural comparison), not full
/// semantic implication over arbitrary time-window arithmetic — the linter
/// flags rules whose clauses are field-by-field broader-or-equal, the same
/// simplification the source linter used (spec.md §9 open question).
fn subsumes(a: &Rule, b: &Rule) -> bool {
    is_superset_or_universal(&a.users, &b.users)
        && is_superset_or_universal(&a.profiles, &b.profiles)
        && modes_superset(&a.modes, &b.modes)
        && time_window_superset(&a.time_window, &b.time_window)
        && device_superset(&a.device, &b.device)
}

fn modes_superset(a: &Option<Vec<super::model::Mode>>, b: &Option<Vec<super::model::Mode>>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => b.iter().all(|x| a.contains(x)),
    }
}

fn device_superset(a: &Option<super::model::DeviceConditions>, b: &Option<super::model::DeviceConditions>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(a), _) if a.is_empty() => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn base_policy(rules: Vec<Rule>) -> Policy {
        Policy {
            rules,
            max_server_duration: Duration::from_secs(3600),
            session_table: None,
            approvals: None,
            breakglass: None,
        }
    }

    #[test]
    fn detects_allow_before_deny() {
        let allow = Rule {
            effect: Effect::Allow,
            profiles: Some(vec!["dev".into()]),
            users: Some(vec!["alice".into()]),
            modes: None,
            time_window: None,
            device: None,
        };
        let deny = Rule {
            effect: Effect::Deny,
            profiles: Some(vec!["dev".into()]),
            users: Some(vec!["alice".into()]),
            modes: None,
            time_window: None,
            device: None,
        };
        let findings = lint(&base_policy(vec![allow, deny]));
        assert!(findings.iter().any(|f| f.kind == LintKind::AllowBeforeDeny));
    }

    #[test]
    fn detects_unreachable_rule() {
        let broad = Rule {
            effect: Effect::Allow,
            profiles: None,
            users: None,
            modes: None,
            time_window: None,
            device: None,
        };
        let narrow = Rule {
            effect: Effect::Allow,
            profiles: Some(vec!["dev".into()]),
            users: Some(vec!["alice".into()]),
            modes: None,
            time_window: None,
            device: None,
        };
        let findings = lint(&base_policy(vec![broad, narrow]));
        assert!(findings.iter().any(|f| f.kind == LintKind::UnreachableRule && f.rule_index == Some(1)));
    }

    #[test]
    fn detects_overlapping_time_windows_with_differing_effects() {
        let a = Rule {
            effect: Effect::Allow,
            profiles: Some(vec!["dev".into()]),
            users: None,
            modes: None,
            time_window: Some(TimeWindow {
                weekdays: None,
                hours: Some(HourRange { start: 9, end: 17 }),
            }),
            device: None,
        };
        let b = Rule {
            effect: Effect::Deny,
            profiles: Some(vec!["dev".into()]),
            users: None,
            modes: None,
            time_window: Some(TimeWindow {
                weekdays: None,
                hours: Some(HourRange { start: 12, end: 20 }),
            }),
            device: None,
        };
        let findings = lint(&base_policy(vec![a, b]));
        assert!(findings.iter().any(|f| f.kind == LintKind::OverlappingTimeWindows));
    }

    #[test]
    fn no_findings_for_disjoint_simple_policy() {
        let a = Rule {
            effect: Effect::Allow,
            profiles: Some(vec!["dev".into()]),
            users: Some(vec!["alice".into()]),
            modes: None,
            time_window: None,
            device: None,
        };
        let b = Rule {
            effect: Effect::Deny,
            profiles: Some(vec!["prod".into()]),
            users: Some(vec!["bob".into()]),
            modes: None,
            time_window: None,
            device: None,
        };
        assert!(lint(&base_policy(vec![a, b])).is_empty());
    }
}
