//! Revision planning
//!
//! Planning is pure: given a package, the revisions it owns and the identifier
//! its source resolves to, compute every mutation the package reconciler has
//! to make. Creation, activation and retention each operate on the working
//! set left by the previous step, so one pass never acts on two different
//! views of the revision set.

use xpkg_core::revision_name;

use crate::apis::{
    ActivationPolicy, Condition, Conditioned, Object, Package, PackageRevision,
    RevisionDesiredState, TYPE_HEALTHY,
};

/// A revision to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRevision {
    pub name: String,
    pub revision: i64,
    pub identifier: String,
    pub desired_state: RevisionDesiredState,
}

/// A change to an existing revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionUpdate {
    pub name: String,
    /// New desired state, when it changes
    pub desired_state: Option<RevisionDesiredState>,
    /// Copy propagated package configuration onto the revision
    pub propagate: bool,
}

/// Revision the package status should point at
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentRevision {
    pub name: String,
    pub identifier: Option<String>,
    pub healthy: Condition,
}

/// Every mutation one package reconcile makes
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionPlan {
    /// Name of the revision matching the desired identifier
    pub target: String,
    pub create: Option<NewRevision>,
    pub updates: Vec<RevisionUpdate>,
    /// Revisions to garbage collect, oldest first
    pub deletes: Vec<String>,
    /// `None` keeps the previous status values
    pub current: Option<CurrentRevision>,
    /// Target is Healthy and all of its dependencies are installed
    pub settled: bool,
    /// Highest revision number handed out so far, counting `create`
    pub last_revision: i64,
}

impl RevisionPlan {
    /// No revision is created, changed or deleted
    pub fn is_noop(&self) -> bool {
        self.create.is_none() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Slot {
    name: String,
    revision: i64,
    identifier: Option<String>,
    original: Option<RevisionDesiredState>,
    desired_state: RevisionDesiredState,
    healthy: Condition,
    propagate: bool,
}

impl Slot {
    fn active(&self) -> bool {
        self.desired_state == RevisionDesiredState::Active
    }
}

/// Plan the revision mutations for `package`
pub fn plan_revisions(
    package: &dyn Package,
    revisions: &[Box<dyn PackageRevision>],
    identifier: &str,
) -> RevisionPlan {
    let target = revision_name(package.object_name(), identifier);
    let policy = package.effective_activation_policy();

    let mut slots: Vec<Slot> = revisions
        .iter()
        .map(|r| Slot {
            name: r.object_name().to_string(),
            revision: r.revision(),
            identifier: r.identifier().map(str::to_string),
            original: Some(r.desired_state()),
            desired_state: r.desired_state(),
            healthy: r.condition(TYPE_HEALTHY),
            propagate: r.object_name() == target && !propagated_matches(package, r.as_ref()),
        })
        .collect();

    // Creation. Numbers continue from the package's high-water mark so a
    // collected revision's number is never handed out again.
    let mut last_revision = slots
        .iter()
        .map(|s| s.revision)
        .chain(package.last_revision())
        .max()
        .unwrap_or(0);
    let mut create = None;
    if !slots.iter().any(|s| s.name == target) {
        let next = last_revision + 1;
        last_revision = next;
        slots.push(Slot {
            name: target.clone(),
            revision: next,
            identifier: Some(identifier.to_string()),
            original: None,
            desired_state: RevisionDesiredState::Inactive,
            healthy: Condition::unknown(TYPE_HEALTHY),
            propagate: false,
        });
        create = Some(next);
    }

    // Activation
    if policy == ActivationPolicy::Automatic {
        let target_healthy = slots
            .iter()
            .any(|s| s.name == target && s.healthy.is_true());
        for slot in &mut slots {
            if slot.name == target {
                slot.desired_state = RevisionDesiredState::Active;
            } else if target_healthy {
                slot.desired_state = RevisionDesiredState::Inactive;
            }
        }
    }

    // Retention
    let deletes = retention(&slots, &target, package.revision_history_limit());
    slots.retain(|s| !deletes.contains(&s.name));

    let current = select_current(&slots, &target);

    let settled = revisions
        .iter()
        .find(|r| r.object_name() == target)
        .is_some_and(|r| {
            r.is_active()
                && r.condition(TYPE_HEALTHY).is_true()
                && r.dependency_status().all_installed()
        });

    let create = create.and_then(|revision| {
        slots.iter().find(|s| s.name == target).map(|s| NewRevision {
            name: s.name.clone(),
            revision,
            identifier: identifier.to_string(),
            desired_state: s.desired_state,
        })
    });

    let updates = slots
        .iter()
        .filter_map(|s| {
            let original = s.original?;
            let desired_state = (original != s.desired_state).then_some(s.desired_state);
            (desired_state.is_some() || s.propagate).then(|| RevisionUpdate {
                name: s.name.clone(),
                desired_state,
                propagate: s.propagate,
            })
        })
        .collect();

    RevisionPlan {
        target,
        create,
        updates,
        deletes,
        current,
        settled,
        last_revision,
    }
}

/// Inactive revisions beyond the history limit, oldest first.
///
/// The target and every Active revision are never selected.
fn retention(slots: &[Slot], target: &str, limit: Option<i64>) -> Vec<String> {
    let Some(limit) = limit else {
        return Vec::new();
    };
    let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);

    let inactive = slots.iter().filter(|s| !s.active()).count();
    let excess = inactive.saturating_sub(limit);

    let mut candidates: Vec<&Slot> = slots
        .iter()
        .filter(|s| !s.active() && s.name != target)
        .collect();
    candidates.sort_by_key(|s| s.revision);

    candidates
        .into_iter()
        .take(excess)
        .map(|s| s.name.clone())
        .collect()
}

/// The target when it is Active and either Healthy or the only Active
/// revision, else the newest other Active revision.
fn select_current(slots: &[Slot], target: &str) -> Option<CurrentRevision> {
    let active: Vec<&Slot> = slots.iter().filter(|s| s.active()).collect();

    let chosen = match active.iter().find(|s| s.name == target) {
        Some(t) if t.healthy.is_true() || active.len() == 1 => Some(*t),
        _ => active
            .iter()
            .filter(|s| s.name != target)
            .max_by_key(|s| s.revision)
            .copied(),
    }?;

    Some(CurrentRevision {
        name: chosen.name.clone(),
        identifier: chosen.identifier.clone(),
        healthy: chosen.healthy.clone(),
    })
}

/// Whether the revision already carries the package's propagated configuration
pub fn propagated_matches(package: &dyn Package, revision: &dyn PackageRevision) -> bool {
    package.package_pull_secrets() == revision.package_pull_secrets()
        && package.package_pull_policy() == revision.package_pull_policy()
        && package.common_labels() == revision.common_labels()
        && package.controller_config_ref() == revision.controller_config_ref()
        && package.ignore_crossplane_constraints() == revision.ignore_crossplane_constraints()
        && package.skip_dependency_resolution() == revision.skip_dependency_resolution()
}

/// Copy propagated configuration from the package onto a revision
pub fn propagate(package: &dyn Package, revision: &mut dyn PackageRevision) {
    revision.set_package_pull_secrets(package.package_pull_secrets().to_vec());
    revision.set_package_pull_policy(package.package_pull_policy());
    revision.set_common_labels(package.common_labels().clone());
    revision.set_controller_config_ref(package.controller_config_ref().cloned());
    revision.set_ignore_crossplane_constraints(package.ignore_crossplane_constraints());
    revision.set_skip_dependency_resolution(package.skip_dependency_resolution());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::{
        ANNOTATION_IDENTIFIER, DependencyStatus, PackageResource, Provider,
        ProviderRevision, RevisionResource, reasons,
    };
    use std::collections::BTreeMap;

    fn package(limit: Option<i64>, policy: ActivationPolicy) -> Provider {
        let mut p = Provider::new_package("aws", "xpkg.io/acme/aws:v2");
        p.set_revision_history_limit(limit);
        p.set_activation_policy(Some(policy));
        p
    }

    fn rev(identifier: &str, number: i64, active: bool, healthy: bool) -> Box<dyn PackageRevision> {
        let mut r = ProviderRevision::new_revision(&revision_name("aws", identifier));
        r.metadata.annotations = Some(BTreeMap::from([(
            ANNOTATION_IDENTIFIER.to_string(),
            identifier.to_string(),
        )]));
        r.set_revision(number);
        r.set_desired_state(if active {
            RevisionDesiredState::Active
        } else {
            RevisionDesiredState::Inactive
        });
        if healthy {
            r.set_condition(Condition::healthy());
        }
        Box::new(r)
    }

    #[test]
    fn test_first_revision_created_active() {
        let p = package(None, ActivationPolicy::Automatic);
        let plan = plan_revisions(&p, &[], "img:v1");

        let create = plan.create.unwrap();
        assert_eq!(create.revision, 1);
        assert_eq!(create.desired_state, RevisionDesiredState::Active);
        assert_eq!(create.name, revision_name("aws", "img:v1"));
        assert!(plan.updates.is_empty());
        assert!(plan.deletes.is_empty());

        // The only Active revision becomes current before it is Healthy
        let current = plan.current.unwrap();
        assert_eq!(current.name, create.name);
        assert_eq!(current.identifier.as_deref(), Some("img:v1"));
        assert!(!plan.settled);
    }

    #[test]
    fn test_manual_policy_creates_inactive() {
        let p = package(None, ActivationPolicy::Manual);
        let revisions = vec![rev("img:v1", 1, true, true)];
        let plan = plan_revisions(&p, &revisions, "img:v2");

        let create = plan.create.unwrap();
        assert_eq!(create.revision, 2);
        assert_eq!(create.desired_state, RevisionDesiredState::Inactive);
        assert!(plan.updates.is_empty());
        assert_eq!(plan.current.unwrap().name, revision_name("aws", "img:v1"));
    }

    #[test]
    fn test_previous_stays_active_until_target_healthy() {
        let p = package(None, ActivationPolicy::Automatic);
        let revisions = vec![rev("img:v1", 1, true, true), rev("img:v2", 2, true, false)];
        let plan = plan_revisions(&p, &revisions, "img:v2");

        assert!(plan.is_noop());
        assert_eq!(plan.current.unwrap().name, revision_name("aws", "img:v1"));
    }

    #[test]
    fn test_old_active_flipped_once_target_healthy() {
        let p = package(None, ActivationPolicy::Automatic);
        let revisions = vec![rev("img:v1", 1, true, true), rev("img:v2", 2, true, true)];
        let plan = plan_revisions(&p, &revisions, "img:v2");

        assert_eq!(
            plan.updates,
            vec![RevisionUpdate {
                name: revision_name("aws", "img:v1"),
                desired_state: Some(RevisionDesiredState::Inactive),
                propagate: false,
            }]
        );
        assert_eq!(plan.current.unwrap().name, revision_name("aws", "img:v2"));
    }

    #[test]
    fn test_retention_with_zero_limit() {
        let p = package(Some(0), ActivationPolicy::Automatic);
        let revisions = vec![rev("img:v1", 1, true, true), rev("img:v2", 2, true, true)];
        let plan = plan_revisions(&p, &revisions, "img:v2");

        // Flipped and collected in the same pass
        assert_eq!(plan.deletes, vec![revision_name("aws", "img:v1")]);
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn test_retention_with_limit_one_keeps_inactive() {
        let p = package(Some(1), ActivationPolicy::Automatic);
        let revisions = vec![rev("img:v1", 1, false, true), rev("img:v2", 2, true, true)];
        let plan = plan_revisions(&p, &revisions, "img:v2");
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_retention_oldest_first() {
        let p = package(Some(1), ActivationPolicy::Automatic);
        let revisions = vec![
            rev("img:v3", 3, false, true),
            rev("img:v1", 1, false, true),
            rev("img:v2", 2, false, true),
            rev("img:v4", 4, true, true),
        ];
        let plan = plan_revisions(&p, &revisions, "img:v4");
        assert_eq!(
            plan.deletes,
            vec![revision_name("aws", "img:v1"), revision_name("aws", "img:v2")]
        );
    }

    #[test]
    fn test_retention_never_deletes_active() {
        for limit in [0, 1, 2, -5] {
            let p = package(Some(limit), ActivationPolicy::Manual);
            let revisions = vec![
                rev("img:v1", 1, true, true),
                rev("img:v2", 2, true, false),
                rev("img:v3", 3, false, true),
            ];
            let plan = plan_revisions(&p, &revisions, "img:v4");
            for name in &plan.deletes {
                assert_ne!(name, &revision_name("aws", "img:v1"));
                assert_ne!(name, &revision_name("aws", "img:v2"));
                assert_ne!(name, &plan.target);
            }
        }
    }

    #[test]
    fn test_manual_target_not_collected() {
        let p = package(Some(0), ActivationPolicy::Manual);
        let revisions = vec![rev("img:v1", 1, true, true)];
        let plan = plan_revisions(&p, &revisions, "img:v2");
        assert!(plan.create.is_some());
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_no_active_keeps_previous_status() {
        let p = package(None, ActivationPolicy::Manual);
        let revisions = vec![rev("img:v1", 1, false, true)];
        let plan = plan_revisions(&p, &revisions, "img:v1");
        assert!(plan.current.is_none());
        assert!(plan.is_noop());
    }

    #[test]
    fn test_numbers_continue_past_collected_revisions() {
        // v1 (1) and v2 (2) existed, the package rolled back to v1 and v2 was
        // collected; the high-water mark still remembers 2
        let mut p = package(Some(0), ActivationPolicy::Automatic);
        p.set_last_revision(Some(2));
        let revisions = vec![rev("img:v1", 1, true, true)];

        let plan = plan_revisions(&p, &revisions, "img:v3");
        assert_eq!(plan.create.unwrap().revision, 3);
        assert_eq!(plan.last_revision, 3);
    }

    #[test]
    fn test_last_revision_tracks_existing_without_mark() {
        let p = package(None, ActivationPolicy::Automatic);
        let revisions = vec![rev("img:v1", 1, false, true), rev("img:v4", 4, true, true)];

        let plan = plan_revisions(&p, &revisions, "img:v4");
        assert!(plan.create.is_none());
        assert_eq!(plan.last_revision, 4);

        assert_eq!(plan_revisions(&p, &[], "img:v1").last_revision, 1);
    }

    #[test]
    fn test_converged_plan_is_noop_and_settled() {
        let p = package(Some(1), ActivationPolicy::Automatic);
        let mut target = ProviderRevision::new_revision(&revision_name("aws", "img:v2"));
        target.set_revision(2);
        target.set_desired_state(RevisionDesiredState::Active);
        target.set_condition(Condition::healthy());
        target.set_dependency_status(DependencyStatus::new(1, 1, 0));

        let revisions: Vec<Box<dyn PackageRevision>> =
            vec![rev("img:v1", 1, false, true), Box::new(target)];
        let plan = plan_revisions(&p, &revisions, "img:v2");
        assert!(plan.is_noop());
        assert!(plan.settled);
    }

    #[test]
    fn test_unhealthy_target_reported_through_current() {
        let p = package(None, ActivationPolicy::Automatic);
        let mut target = ProviderRevision::new_revision(&revision_name("aws", "img:v1"));
        target.set_revision(1);
        target.set_desired_state(RevisionDesiredState::Active);
        target.set_condition(Condition::unhealthy(reasons::INVALID_PACKAGE_CONTENTS, "bad"));

        let revisions: Vec<Box<dyn PackageRevision>> = vec![Box::new(target)];
        let plan = plan_revisions(&p, &revisions, "img:v1");
        let current = plan.current.unwrap();
        assert_eq!(current.healthy.reason, reasons::INVALID_PACKAGE_CONTENTS);
        assert!(!plan.settled);
    }

    #[test]
    fn test_propagation_detected_on_target() {
        let mut p = package(None, ActivationPolicy::Automatic);
        let revisions = vec![rev("img:v1", 1, true, true)];
        assert!(plan_revisions(&p, &revisions, "img:v1").is_noop());

        p.set_package_pull_secrets(vec![crate::apis::LocalObjectReference {
            name: "regcred".to_string(),
        }]);
        let plan = plan_revisions(&p, &revisions, "img:v1");
        assert_eq!(plan.updates.len(), 1);
        assert!(plan.updates[0].propagate);
        assert!(plan.updates[0].desired_state.is_none());
    }
}
