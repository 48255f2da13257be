//! Profile aggregator: merges per-module answers into a user's profile and
//! reports completion.
//!
//! Mutations go through [`ProfileStore::update`], so a save is a single
//! load-modify-save of one user's document. Nothing here checks who the
//! caller is; the session layer is expected to hand over a verified user id.

use crate::registry::ModuleRegistry;
use crate::store::ProfileStore;
use crate::types::*;
use crate::validation::{check_answers, missing_required};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Registry-aware view over a profile store
pub struct ProfileAggregator<'r, S: ProfileStore> {
    registry: &'r ModuleRegistry,
    store: S,
    enforce_required_on_complete: bool,
}

impl<'r, S: ProfileStore> ProfileAggregator<'r, S> {
    pub fn new(registry: &'r ModuleRegistry, store: S) -> Self {
        Self {
            registry,
            store,
            enforce_required_on_complete: false,
        }
    }

    pub fn with_config(
        registry: &'r ModuleRegistry,
        store: S,
        config: &crate::config::ProfileConfig,
    ) -> Self {
        Self {
            registry,
            store,
            enforce_required_on_complete: config.enforce_required_on_complete,
        }
    }

    pub fn registry(&self) -> &'r ModuleRegistry {
        self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Population
    // ------------------------------------------------------------------------

    /// Assign (or clear, with `None`) the user's population tag
    ///
    /// Unrecognised tags are stored as given; they resolve to "no population"
    /// until the registry learns them.
    pub fn set_population(&self, user_id: &str, tag: Option<&str>) -> Result<()> {
        let tag = tag.map(str::trim).filter(|t| !t.is_empty());
        if let Some(tag) = tag {
            if Population::from_tag(Some(tag)).is_none() {
                tracing::warn!("Assigning unrecognised population {:?} to user {:?}", tag, user_id);
            }
        }

        self.store.update(user_id, &mut |state| {
            state.population = tag.map(String::from);
            Ok(())
        })?;
        tracing::info!("Set population for user {:?} to {:?}", user_id, tag);
        Ok(())
    }

    pub fn population(&self, user_id: &str) -> Result<Option<Population>> {
        Ok(self.store.load(user_id)?.population())
    }

    // ------------------------------------------------------------------------
    // Saving answers
    // ------------------------------------------------------------------------

    /// Upsert the (user, module) record, merging `answers` into what is stored
    ///
    /// New keys overwrite old ones with the same name; keys absent from
    /// `answers` are kept. `completed = true` moves the record to completed;
    /// `false` never moves it back.
    pub fn save_module_to_profile(
        &self,
        user_id: &str,
        module_id: &str,
        answers: Answers,
        completed: bool,
    ) -> Result<AssessmentRecord> {
        let module = self
            .registry
            .get_module(module_id)
            .ok_or_else(|| Error::UnknownModule(module_id.to_string()))?;

        let issues = check_answers(module, &answers);
        if !issues.is_empty() {
            return Err(Error::InvalidAnswers {
                module_id: module_id.to_string(),
                issues,
            });
        }

        let enforce = self.enforce_required_on_complete;
        let now = Utc::now();
        let state = self.store.update(user_id, &mut |state| {
            let mut record = state
                .records
                .get(module_id)
                .cloned()
                .unwrap_or_else(|| AssessmentRecord::new(user_id, module_id, now));

            for (key, value) in &answers {
                record.answers.insert(key.clone(), value.clone());
            }
            record.updated_at = now;

            if completed && !record.completed {
                if enforce {
                    let missing = missing_required(module, &record.answers);
                    if !missing.is_empty() {
                        return Err(Error::IncompleteModule {
                            module_id: module_id.to_string(),
                            missing,
                        });
                    }
                }
                record.completed = true;
                record.completed_at = Some(now);
            }

            state.records.insert(module_id.to_string(), record);
            Ok(())
        })?;

        let record = state
            .records
            .get(module_id)
            .cloned()
            .ok_or_else(|| {
                Error::Storage(format!("record for {:?} missing after save", module_id))
            })?;

        tracing::info!(
            "Saved {} answer(s) to {:?} for user {:?} ({:?})",
            answers.len(),
            module_id,
            user_id,
            record.status()
        );
        Ok(record)
    }

    /// Mark a module completed without submitting new answers
    pub fn complete_module(&self, user_id: &str, module_id: &str) -> Result<AssessmentRecord> {
        self.save_module_to_profile(user_id, module_id, Answers::new(), true)
    }

    /// Set the profile-level completion marker. Calling it again keeps the
    /// original timestamp.
    pub fn mark_profile_complete(&self, user_id: &str) -> Result<DateTime<Utc>> {
        let state = self.store.update(user_id, &mut |state| {
            if state.profile_completed_at.is_none() {
                state.profile_completed_at = Some(Utc::now());
            }
            Ok(())
        })?;

        state
            .profile_completed_at
            .ok_or_else(|| Error::Storage("profile completion marker not persisted".into()))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn module_record(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> Result<Option<AssessmentRecord>> {
        Ok(self.store.load(user_id)?.records.remove(module_id))
    }

    pub fn module_status(&self, user_id: &str, module_id: &str) -> Result<ModuleStatus> {
        Ok(self.store.load(user_id)?.module_status(module_id))
    }

    /// Ids of every module the user has completed
    pub fn completed_modules(&self, user_id: &str) -> Result<BTreeSet<String>> {
        Ok(completed_in(&self.store.load(user_id)?))
    }

    /// Required modules for the user's population; empty when it is unset or unknown
    pub fn required_modules_for_user(&self, user_id: &str) -> Result<Vec<&'r ModuleDefinition>> {
        let state = self.store.load(user_id)?;
        Ok(self.required_for_state(&state))
    }

    pub fn available_modules_for_user(&self, user_id: &str) -> Result<AvailableModules> {
        let state = self.store.load(user_id)?;
        Ok(self.registry.available_modules(state.population.as_deref()))
    }

    /// True when every required module is completed (vacuously true if none are)
    pub fn has_completed_required_modules(&self, user_id: &str) -> Result<bool> {
        Ok(self.progress_summary(user_id)?.all_required_complete)
    }

    /// `round(100 * |completed ∩ required| / |required|)`, 100 if nothing is required
    pub fn profile_completion_percentage(&self, user_id: &str) -> Result<u8> {
        Ok(self.progress_summary(user_id)?.percentage)
    }

    pub fn progress_summary(&self, user_id: &str) -> Result<ProgressSummary> {
        let state = self.store.load(user_id)?;
        Ok(self.progress_of(&state))
    }

    /// Union of the user's module answers, keyed by module id
    pub fn unified_profile(&self, user_id: &str) -> Result<UnifiedProfile> {
        let state = self.store.load(user_id)?;
        let progress = self.progress_of(&state);

        Ok(UnifiedProfile {
            user_id: state.user_id.clone(),
            population: state.population(),
            modules: state
                .records
                .iter()
                .map(|(id, record)| (id.clone(), record.answers.clone()))
                .collect(),
            completed_modules: completed_in(&state),
            completion_percentage: progress.percentage,
            profile_completed_at: state.profile_completed_at,
        })
    }

    fn required_for_state(&self, state: &UserProfileState) -> Vec<&'r ModuleDefinition> {
        state
            .population()
            .map(|p| self.registry.required_modules(p))
            .unwrap_or_default()
    }

    fn progress_of(&self, state: &UserProfileState) -> ProgressSummary {
        let completed = completed_in(state);
        let required = self.required_for_state(state);
        let done = required
            .iter()
            .filter(|m| completed.contains(&m.id))
            .count();

        ProgressSummary {
            all_required_complete: done == required.len(),
            percentage: completion_percentage(done, required.len()),
            completed: completed.into_iter().collect(),
            required: required.iter().map(|m| m.id.clone()).collect(),
        }
    }
}

fn completed_in(state: &UserProfileState) -> BTreeSet<String> {
    state
        .records
        .values()
        .filter(|r| r.completed)
        .map(|r| r.module_id.clone())
        .collect()
}

/// Rounded percentage of `done` out of `total`; 100 when `total` is zero
pub fn completion_percentage(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let ratio = done.min(total) as f64 / total as f64;
    (ratio * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_registry;
    use crate::store::MemoryProfileStore;

    fn aggregator() -> ProfileAggregator<'static, MemoryProfileStore> {
        crate::logging::init_test();
        ProfileAggregator::new(default_registry().unwrap(), MemoryProfileStore::new())
    }

    fn answers(json: &str) -> Answers {
        serde_json::from_str(json).unwrap()
    }

    fn gated_aggregator() -> ProfileAggregator<'static, MemoryProfileStore> {
        let config = crate::config::ProfileConfig {
            enforce_required_on_complete: true,
        };
        ProfileAggregator::with_config(
            default_registry().unwrap(),
            MemoryProfileStore::new(),
            &config,
        )
    }

    fn youth_basic_complete() -> Answers {
        answers(
            r#"{"guardian_name": "Pat Doe", "guardian_consent": "yes",
                "age": 12, "activity_days": 4}"#,
        )
    }

    /// Store whose writes always fail
    struct BrokenStore;

    impl ProfileStore for BrokenStore {
        fn load(&self, user_id: &str) -> Result<UserProfileState> {
            Ok(UserProfileState::new(user_id))
        }

        fn save(&self, _state: &UserProfileState) -> Result<()> {
            Err(Error::Storage("disk full".into()))
        }

        fn user_ids(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_youth_scenario() {
        let agg = aggregator();
        agg.set_population("u1", Some("youth")).unwrap();

        let required: Vec<_> = agg
            .required_modules_for_user("u1")
            .unwrap()
            .into_iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(required, vec!["youth-basic"]);
        assert!(!agg.has_completed_required_modules("u1").unwrap());
        assert_eq!(agg.profile_completion_percentage("u1").unwrap(), 0);

        agg.save_module_to_profile("u1", "youth-basic", youth_basic_complete(), true)
            .unwrap();

        assert!(agg.has_completed_required_modules("u1").unwrap());
        assert_eq!(agg.profile_completion_percentage("u1").unwrap(), 100);

        let available = agg.available_modules_for_user("u1").unwrap();
        assert_eq!(available.optional.len(), 1);
        assert_eq!(available.optional[0].id, "nutrition");
    }

    #[test]
    fn test_unknown_population_has_nothing_required() {
        let agg = aggregator();
        agg.set_population("u1", Some("astronaut")).unwrap();

        let available = agg.available_modules_for_user("u1").unwrap();
        assert!(available.required.is_empty());
        assert!(available.optional.is_empty());
        assert!(agg.required_modules_for_user("u1").unwrap().is_empty());
        assert!(agg.has_completed_required_modules("u1").unwrap());
        assert_eq!(agg.profile_completion_percentage("u1").unwrap(), 100);

        // never assigned at all
        assert_eq!(agg.profile_completion_percentage("fresh").unwrap(), 100);
        assert_eq!(agg.population("fresh").unwrap(), None);
    }

    #[test]
    fn test_merge_keeps_earlier_keys() {
        let agg = aggregator();
        agg.save_module_to_profile("u1", "nutrition", answers(r#"{"a": 1}"#), false)
            .unwrap();
        let record = agg
            .save_module_to_profile("u1", "nutrition", answers(r#"{"b": 2}"#), false)
            .unwrap();

        assert_eq!(record.answers["a"], AnswerValue::Number(1.0));
        assert_eq!(record.answers["b"], AnswerValue::Number(2.0));
    }

    #[test]
    fn test_merge_overwrites_same_key() {
        let agg = aggregator();
        let first = answers(r#"{"diet_pattern": "vegan", "meals_per_day": 3}"#);
        agg.save_module_to_profile("u1", "nutrition", first, false)
            .unwrap();
        let second = answers(r#"{"diet_pattern": "omnivore"}"#);
        agg.save_module_to_profile("u1", "nutrition", second, false)
            .unwrap();

        let record = agg.module_record("u1", "nutrition").unwrap().unwrap();
        assert_eq!(record.answers["diet_pattern"], AnswerValue::Text("omnivore".into()));
        assert_eq!(record.answers["meals_per_day"], AnswerValue::Number(3.0));
    }

    #[test]
    fn test_one_record_per_module() {
        let agg = aggregator();
        let first = agg
            .save_module_to_profile("u1", "nutrition", answers(r#"{"a": 1}"#), false)
            .unwrap();
        let second = agg
            .save_module_to_profile("u1", "nutrition", answers(r#"{"b": 1}"#), false)
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(agg.store().load("u1").unwrap().records.len(), 1);
    }

    #[test]
    fn test_status_transitions() {
        let agg = aggregator();
        assert_eq!(agg.module_status("u1", "nutrition").unwrap(), ModuleStatus::NotStarted);

        agg.save_module_to_profile("u1", "nutrition", answers(r#"{"meals_per_day": 3}"#), false)
            .unwrap();
        assert_eq!(agg.module_status("u1", "nutrition").unwrap(), ModuleStatus::InProgress);

        agg.save_module_to_profile("u1", "nutrition", answers(r#"{"diet_pattern": "vegan"}"#), true)
            .unwrap();
        assert_eq!(agg.module_status("u1", "nutrition").unwrap(), ModuleStatus::Completed);
    }

    #[test]
    fn test_completion_is_permanent() {
        let agg = aggregator();
        agg.save_module_to_profile("u1", "nutrition", answers(r#"{"diet_pattern": "vegan"}"#), true)
            .unwrap();
        let completed_at = agg
            .module_record("u1", "nutrition")
            .unwrap()
            .unwrap()
            .completed_at;

        agg.save_module_to_profile("u1", "nutrition", answers(r#"{"meals_per_day": 2}"#), false)
            .unwrap();

        assert!(agg.completed_modules("u1").unwrap().contains("nutrition"));
        let record = agg.module_record("u1", "nutrition").unwrap().unwrap();
        assert!(record.completed);
        assert_eq!(record.completed_at, completed_at);
    }

    #[test]
    fn test_coverage_alone_does_not_complete() {
        let agg = aggregator();
        agg.set_population("u1", Some("youth")).unwrap();
        agg.save_module_to_profile("u1", "youth-basic", youth_basic_complete(), false)
            .unwrap();

        assert!(agg.completed_modules("u1").unwrap().is_empty());
        assert_eq!(agg.profile_completion_percentage("u1").unwrap(), 0);
    }

    #[test]
    fn test_gate_requires_visible_required_answers() {
        let agg = gated_aggregator();
        let err = agg
            .save_module_to_profile(
                "u1",
                "youth-basic",
                answers(r#"{"guardian_name": "Pat"}"#),
                true,
            )
            .unwrap_err();

        match err {
            Error::IncompleteModule { module_id, missing } => {
                assert_eq!(module_id, "youth-basic");
                assert_eq!(missing, vec!["guardian_consent", "age", "activity_days"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // rejected save writes nothing
        assert!(agg.module_record("u1", "youth-basic").unwrap().is_none());

        // answers saved earlier count towards completion
        agg.save_module_to_profile("u1", "youth-basic", youth_basic_complete(), false)
            .unwrap();
        let record = agg.complete_module("u1", "youth-basic").unwrap();
        assert!(record.completed);
    }

    #[test]
    fn test_explicit_complete_completes_by_default() {
        let agg = aggregator();
        agg.set_population("u1", Some("youth")).unwrap();
        let record = agg
            .save_module_to_profile(
                "u1",
                "youth-basic",
                answers(r#"{"guardian_name": "Pat"}"#),
                true,
            )
            .unwrap();
        assert!(record.completed);
        assert!(record.completed_at.is_some());
        assert_eq!(agg.profile_completion_percentage("u1").unwrap(), 100);

        let record = agg.complete_module("u1", "nutrition").unwrap();
        assert!(record.completed);
    }

    #[test]
    fn test_invalid_answers_rejected() {
        let agg = aggregator();
        let err = agg
            .save_module_to_profile(
                "u1",
                "nutrition",
                answers(r#"{"diet_pattern": "carnivore"}"#),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAnswers { .. }));
        assert!(agg.module_record("u1", "nutrition").unwrap().is_none());
    }

    #[test]
    fn test_unknown_module_is_not_found() {
        let agg = aggregator();
        let err = agg
            .save_module_to_profile("u1", "no-such-module", Answers::new(), false)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_mark_profile_complete_is_idempotent() {
        let agg = aggregator();
        let first = agg.mark_profile_complete("u1").unwrap();
        let state_after_first = agg.store().load("u1").unwrap();

        let second = agg.mark_profile_complete("u1").unwrap();
        assert_eq!(first, second);
        assert_eq!(agg.store().load("u1").unwrap(), state_after_first);
    }

    #[test]
    fn test_percentage_rounds() {
        assert_eq!(completion_percentage(0, 3), 0);
        assert_eq!(completion_percentage(1, 3), 33);
        assert_eq!(completion_percentage(2, 3), 67);
        assert_eq!(completion_percentage(3, 3), 100);
        assert_eq!(completion_percentage(0, 0), 100);
        assert_eq!(completion_percentage(1, 8), 13);
    }

    #[test]
    fn test_percentage_ignores_optional_modules() {
        let agg = aggregator();
        agg.set_population("u1", Some("athlete")).unwrap();
        agg.save_module_to_profile("u1", "nutrition", answers(r#"{"diet_pattern": "vegan"}"#), true)
            .unwrap();
        assert_eq!(agg.profile_completion_percentage("u1").unwrap(), 0);

        agg.save_module_to_profile(
            "u1",
            "athlete-performance",
            answers(r#"{"sport": "rowing", "training_hours": 12}"#),
            true,
        )
        .unwrap();
        assert_eq!(agg.profile_completion_percentage("u1").unwrap(), 50);

        let summary = agg.progress_summary("u1").unwrap();
        assert_eq!(summary.required, vec!["general-health", "athlete-performance"]);
        assert_eq!(summary.completed, vec!["athlete-performance", "nutrition"]);
        assert!(!summary.all_required_complete);
    }

    #[test]
    fn test_unified_profile_collects_modules() {
        let agg = aggregator();
        agg.set_population("u1", Some("youth")).unwrap();
        agg.save_module_to_profile("u1", "youth-basic", youth_basic_complete(), true)
            .unwrap();
        agg.save_module_to_profile("u1", "nutrition", answers(r#"{"meals_per_day": 4}"#), false)
            .unwrap();
        agg.mark_profile_complete("u1").unwrap();

        let profile = agg.unified_profile("u1").unwrap();
        assert_eq!(profile.population, Some(Population::Youth));
        assert_eq!(profile.modules.len(), 2);
        assert_eq!(profile.modules["nutrition"]["meals_per_day"], AnswerValue::Number(4.0));
        assert_eq!(profile.completed_modules.len(), 1);
        assert_eq!(profile.completion_percentage, 100);
        assert!(profile.profile_completed_at.is_some());
    }

    #[test]
    fn test_storage_failure_propagates() {
        let agg = ProfileAggregator::new(default_registry().unwrap(), BrokenStore);
        let err = agg
            .save_module_to_profile("u1", "nutrition", answers(r#"{"meals_per_day": 4}"#), false)
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(agg.mark_profile_complete("u1").is_err());
        assert!(agg.set_population("u1", Some("youth")).is_err());
    }

    #[test]
    fn test_clearing_population() {
        let agg = aggregator();
        agg.set_population("u1", Some("athlete")).unwrap();
        agg.set_population("u1", None).unwrap();
        assert_eq!(agg.population("u1").unwrap(), None);
        assert!(agg.required_modules_for_user("u1").unwrap().is_empty());
    }
}
