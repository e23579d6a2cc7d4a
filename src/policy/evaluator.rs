//! First-match-wins rule evaluation (spec.md §4.3).

use super::model::{Decision, Policy, Request, Rule};
use crate::policy::model::Effect;
use chrono::Timelike;

/// Evaluate `policy` against `request`, returning exactly one `Decision`
/// (default-deny when no rule matches).
pub fn evaluate(policy: &Policy, request: &Request) -> Decision {
    for (index, rule) in policy.rules.iter().enumerate() {
        if rule_matches(rule, request) {
            return Decision {
                effect: rule.effect,
                matched_rule_index: Some(index),
                matched_rule_digest: Some(rule.digest()),
                request_echo: request.clone(),
                timestamp: request.time,
                notes: None,
            };
        }
    }
    Decision {
        effect: Effect::Deny,
        matched_rule_index: None,
        matched_rule_digest: None,
        request_echo: request.clone(),
        timestamp: request.time,
        notes: Some("default-deny: no rule matched".to_string()),
    }
}

fn rule_matches(rule: &Rule, request: &Request) -> bool {
    if let Some(users) = &rule.users {
        if !users.is_empty() && !users.iter().any(|u| u == &request.user) {
            return false;
        }
    }
    if let Some(profiles) = &rule.profiles {
        if !profiles.is_empty() && !profiles.iter().any(|p| p == &request.profile) {
            return false;
        }
    }
    if let Some(modes) = &rule.modes {
        if !modes.contains(&request.mode) {
            return false;
        }
    }
    if let Some(tw) = &rule.time_window {
        if let Some(weekdays) = &tw.weekdays {
            let today = super::model::Weekday::from_chrono(request.time.weekday());
            if !weekdays.contains(&today) {
                return false;
            }
        }
        if let Some(hours) = &tw.hours {
            let hour = request.time.hour() as u8;
            if !hours.contains(hour) {
                return false;
            }
        }
    }
    if let Some(device) = &rule.device {
        if !device.is_empty() {
            match &request.device_posture {
                None => return false,
                Some(posture) => {
                    if let Some(req_mdm) = device.require_mdm {
                        if posture.mdm_enrolled != req_mdm {
                            return false;
                        }
                    }
                    if let Some(req_enc) = device.require_encryption {
                        if posture.disk_encrypted != req_enc {
                            return false;
                        }
                    }
                    if let Some(req_compliant) = device.require_mdm_compliant {
                        if posture.mdm_compliant != req_compliant {
                            return false;
                        }
                    }
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::{HourRange, Mode, Rule, TimeWindow};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn policy(rules: Vec<Rule>) -> Policy {
        Policy {
            rules,
            max_server_duration: Duration::from_secs(3600),
            session_table: None,
            approvals: None,
            breakglass: None,
        }
    }

    fn request_at(user: &str, profile: &str, time: chrono::DateTime<Utc>) -> Request {
        Request {
            user: user.to_string(),
            profile: profile.to_string(),
            time,
            mode: Mode::Cli,
            device_posture: None,
        }
    }

    #[test]
    fn no_rules_is_default_deny() {
        let p = policy(vec![]);
        let req = request_at("alice", "dev", Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        let d = evaluate(&p, &req);
        assert_eq!(d.effect, Effect::Deny);
        assert!(d.matched_rule_index.is_none());
    }

    #[test]
    fn half_open_hour_window_excludes_end() {
        let rule = Rule {
            effect: Effect::Allow,
            profiles: Some(vec!["dev".into()]),
            users: Some(vec!["alice".into()]),
            modes: None,
            time_window: Some(TimeWindow {
                weekdays: Some(vec![super::super::model::Weekday::Wed]),
                hours: Some(HourRange { start: 9, end: 17 }),
            }),
            device: None,
        };
        let p = policy(vec![rule]);

        let just_before = request_at("alice", "dev", Utc.with_ymd_and_hms(2026, 1, 14, 16, 59, 59).unwrap());
        assert_eq!(evaluate(&p, &just_before).effect, Effect::Allow);

        let at_end = request_at("alice", "dev", Utc.with_ymd_and_hms(2026, 1, 14, 17, 0, 0).unwrap());
        assert_eq!(evaluate(&p, &at_end).effect, Effect::Deny);
    }

    #[test]
    fn first_match_wins() {
        let deny_all = Rule {
            effect: Effect::Deny,
            profiles: None,
            users: None,
            modes: None,
            time_window: None,
            device: None,
        };
        let allow_alice = Rule {
            effect: Effect::Allow,
            profiles: Some(vec!["dev".into()]),
            users: Some(vec!["alice".into()]),
            modes: None,
            time_window: None,
            device: None,
        };
        let p = policy(vec![allow_alice, deny_all]);
        let req = request_at("alice", "dev", Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        assert_eq!(evaluate(&p, &req).effect, Effect::Allow);

        let other = request_at("bob", "dev", Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        assert_eq!(evaluate(&p, &other).effect, Effect::Deny);
    }

    #[test]
    fn missing_device_posture_with_device_conditions_does_not_match() {
        let rule = Rule {
            effect: Effect::Allow,
            profiles: None,
            users: None,
            modes: None,
            time_window: None,
            device: Some(crate::policy::model::DeviceConditions {
                require_mdm: Some(true),
                require_encryption: None,
                require_mdm_compliant: None,
            }),
        };
        let p = policy(vec![rule]);
        let req = request_at("alice", "dev", Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        assert_eq!(evaluate(&p, &req).effect, Effect::Deny);
    }

    #[test]
    fn empty_clauses_match_all() {
        let rule = Rule {
            effect: Effect::Allow,
            profiles: None,
            users: None,
            modes: None,
            time_window: None,
            device: None,
        };
        let p = policy(vec![rule]);
        let req = request_at("anyone", "anything", Utc.with_ymd_and_hms(2026, 1, 15, 3, 0, 0).unwrap());
        assert_eq!(evaluate(&p, &req).effect, Effect::Allow);
    }

    #[test]
    fn explicitly_empty_profiles_and_users_match_all() {
        let rule = Rule {
            effect: Effect::Allow,
            profiles: Some(vec![]),
            users: Some(vec![]),
            modes: None,
            time_window: None,
            device: None,
        };
        let p = policy(vec![rule]);
        let req = request_at("anyone", "anything", Utc.with_ymd_and_hms(2026, 1, 15, 3, 0, 0).unwrap());
        assert_eq!(evaluate(&p, &req).effect, Effect::Allow);
    }
}
