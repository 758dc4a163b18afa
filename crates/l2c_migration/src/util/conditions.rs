//! Tri-state condition lists for the project record.
//!
//! The global flags (`ProjectReady`, `ProjectRunning`, `ProjectSucceeded`) and the
//! per-stage phases live in two separate lists with their own type namespaces. Every
//! mutation goes through [`set_condition`] so that an unchanged condition is never
//! rewritten.

use std::fmt;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }

    /// Parses a status as written by Kubernetes or Tekton. Anything unrecognised is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A closed set of condition types with per-type defaults.
pub trait ConditionType: Copy + fmt::Display + 'static {
    fn all() -> &'static [Self];

    /// Default (status, reason, message) used by [`reset_to_defaults`].
    fn default_state(&self) -> (ConditionStatus, &'static str, &'static str);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectCondition {
    Ready,
    Running,
    Succeeded,
}

impl fmt::Display for ProjectCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ProjectCondition::Ready => "ProjectReady",
            ProjectCondition::Running => "ProjectRunning",
            ProjectCondition::Succeeded => "ProjectSucceeded",
        })
    }
}

impl ConditionType for ProjectCondition {
    fn all() -> &'static [Self] {
        &[
            ProjectCondition::Ready,
            ProjectCondition::Running,
            ProjectCondition::Succeeded,
        ]
    }

    fn default_state(&self) -> (ConditionStatus, &'static str, &'static str) {
        match self {
            ProjectCondition::Ready => (ConditionStatus::False, "Initializing", "project is not ready yet"),
            ProjectCondition::Running => (ConditionStatus::False, "NotRunning", "no pipeline run in progress"),
            ProjectCondition::Succeeded => (
                ConditionStatus::Unknown,
                PhaseReason::NotExecuted.as_str(),
                "Not executed or still running",
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Analyze,
    DBMigrate,
    Build,
    Deploy,
}

impl Phase {
    /// Maps a pipeline task name to the phase it drives.
    pub fn from_task_name(name: &str) -> Option<Phase> {
        match name {
            "analyze" => Some(Phase::Analyze),
            "migrate" => Some(Phase::DBMigrate),
            "build" => Some(Phase::Build),
            "deploy" => Some(Phase::Deploy),
            _ => None,
        }
    }

    pub fn task_name(&self) -> &'static str {
        match self {
            Phase::Analyze => "analyze",
            Phase::DBMigrate => "migrate",
            Phase::Build => "build",
            Phase::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Phase::Analyze => "PhaseAnalyze",
            Phase::DBMigrate => "PhaseDBMigrate",
            Phase::Build => "PhaseBuild",
            Phase::Deploy => "PhaseDeploy",
        })
    }
}

impl ConditionType for Phase {
    fn all() -> &'static [Self] {
        &[Phase::Analyze, Phase::DBMigrate, Phase::Build, Phase::Deploy]
    }

    fn default_state(&self) -> (ConditionStatus, &'static str, &'static str) {
        (ConditionStatus::Unknown, PhaseReason::NotExecuted.as_str(), "Not executed yet")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseReason {
    NotExecuted,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl PhaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseReason::NotExecuted => "NotExecuted",
            PhaseReason::Running => "Running",
            PhaseReason::Succeeded => "Succeeded",
            PhaseReason::Failed => "Failed",
            PhaseReason::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for PhaseReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finds the condition_type in conditions.
pub fn find_status_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|condition| condition.type_ == condition_type)
}

pub fn get_condition<'a, T: ConditionType>(conditions: &'a [Condition], condition_type: T) -> Option<&'a Condition> {
    find_status_condition(conditions, &condition_type.to_string())
}

/// Returns true when the condition_type is present and set to `True`
pub fn is_status_condition_true<T: ConditionType>(conditions: &[Condition], condition_type: T) -> bool {
    is_status_condition_present_and_equal(conditions, condition_type, ConditionStatus::True, None)
}

/// Returns true when the condition_type is present and set to `False`
pub fn is_status_condition_false<T: ConditionType>(conditions: &[Condition], condition_type: T) -> bool {
    is_status_condition_present_and_equal(conditions, condition_type, ConditionStatus::False, None)
}

/// Returns true when condition_type is present with the given status and, if given, reason.
pub fn is_status_condition_present_and_equal<T: ConditionType>(
    conditions: &[Condition],
    condition_type: T,
    status: ConditionStatus,
    reason: Option<&str>,
) -> bool {
    get_condition(conditions, condition_type)
        .map(|c| c.status == status.as_str() && reason.map_or(true, |r| c.reason == r))
        .unwrap_or(false)
}

/// Upserts a condition. Returns whether anything changed.
///
/// When the type already exists and status, reason and message are all equal, the
/// condition is left untouched, including its `lastTransitionTime`. Otherwise the
/// fields are replaced and the transition time is refreshed.
pub fn set_condition<T: ConditionType>(
    conditions: &mut Vec<Condition>,
    condition_type: T,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> bool {
    let type_ = condition_type.to_string();
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status == status.as_str() && existing.reason == reason && existing.message == message {
                return false;
            }
            existing.status = status.to_string();
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.last_transition_time = Time(Utc::now());
            true
        }
        None => {
            conditions.push(Condition {
                type_,
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Time(Utc::now()),
                observed_generation: None,
            });
            true
        }
    }
}

/// One condition per known type in its default state.
pub fn reset_to_defaults<T: ConditionType>() -> Vec<Condition> {
    let mut conditions = Vec::with_capacity(T::all().len());
    for t in T::all() {
        let (status, reason, message) = t.default_state();
        set_condition(&mut conditions, *t, status, reason, message);
    }
    conditions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_is_idempotent() {
        let mut conditions = reset_to_defaults::<ProjectCondition>();
        assert!(set_condition(
            &mut conditions,
            ProjectCondition::Ready,
            ConditionStatus::True,
            "Ready",
            "project is ready to run"
        ));
        let first = get_condition(&conditions, ProjectCondition::Ready).cloned().unwrap();

        assert!(!set_condition(
            &mut conditions,
            ProjectCondition::Ready,
            ConditionStatus::True,
            "Ready",
            "project is ready to run"
        ));
        let second = get_condition(&conditions, ProjectCondition::Ready).unwrap();
        assert_eq!(first.last_transition_time, second.last_transition_time);
        assert_eq!(conditions.len(), 3);
    }

    #[test]
    fn test_set_condition_refreshes_on_message_change() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Phase::Build, ConditionStatus::Unknown, "Running", "step 1");
        let before = conditions[0].last_transition_time.clone();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(set_condition(&mut conditions, Phase::Build, ConditionStatus::Unknown, "Running", "step 2"));
        assert_eq!(conditions[0].message, "step 2");
        assert!(conditions[0].last_transition_time.0 > before.0);
    }

    #[test]
    fn test_reset_to_defaults() {
        let phases = reset_to_defaults::<Phase>();
        assert_eq!(phases.len(), 4);
        assert!(phases
            .iter()
            .all(|p| p.status == "Unknown" && p.reason == PhaseReason::NotExecuted.as_str()));

        let conditions = reset_to_defaults::<ProjectCondition>();
        assert!(is_status_condition_false(&conditions, ProjectCondition::Ready));
        assert!(is_status_condition_false(&conditions, ProjectCondition::Running));
        assert!(is_status_condition_present_and_equal(
            &conditions,
            ProjectCondition::Succeeded,
            ConditionStatus::Unknown,
            None
        ));
    }

    #[test]
    fn test_types_are_unique_per_list() {
        let mut phases = reset_to_defaults::<Phase>();
        set_condition(&mut phases, Phase::Analyze, ConditionStatus::False, "Failed", "gate failed");
        set_condition(&mut phases, Phase::Analyze, ConditionStatus::True, "Succeeded", "ok");
        assert_eq!(phases.iter().filter(|p| p.type_ == "PhaseAnalyze").count(), 1);
        assert!(is_status_condition_true(&phases, Phase::Analyze));
    }

    #[test]
    fn test_task_name_mapping() {
        for phase in Phase::all() {
            assert_eq!(Phase::from_task_name(phase.task_name()), Some(*phase));
        }
        assert_eq!(Phase::from_task_name("lint"), None);
    }
}
