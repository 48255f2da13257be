//! Module registry: the static set of assessment modules.
//!
//! The built-in modules are assembled once per process and never mutated.
//! Deployments can append their own definitions from a TOML file at startup.

use crate::types::*;
use crate::{Error, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Cached default registry - built once and reused across all operations
static DEFAULT_REGISTRY: OnceCell<ModuleRegistry> = OnceCell::new();

/// Get a reference to the cached default registry
pub fn default_registry() -> Result<&'static ModuleRegistry> {
    DEFAULT_REGISTRY.get_or_try_init(|| Ok(ModuleRegistry::new(build_default_modules()?)))
}

/// Read-only table of module definitions ordered by priority, then id
#[derive(Clone, Debug)]
pub struct ModuleRegistry {
    modules: Vec<ModuleDefinition>,
    index: HashMap<String, usize>,
}

/// Whether `module` may be offered to `population` at all
pub fn is_applicable(module: &ModuleDefinition, population: Population) -> bool {
    module.applicability.allows(population)
}

impl ModuleRegistry {
    /// Build a registry without checking consistency. See [`ModuleRegistry::validate`].
    pub fn new(mut modules: Vec<ModuleDefinition>) -> Self {
        modules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let mut index = HashMap::with_capacity(modules.len());
        for (position, module) in modules.iter().enumerate() {
            index.entry(module.id.clone()).or_insert(position);
        }

        Self { modules, index }
    }

    /// Build a registry and reject it if validation finds any problem
    pub fn load(modules: Vec<ModuleDefinition>) -> Result<Self> {
        let registry = Self::new(modules);
        let errors = registry.validate();
        if !errors.is_empty() {
            return Err(Error::RegistryValidation(errors.join("; ")));
        }
        tracing::debug!("Loaded module registry with {} modules", registry.len());
        Ok(registry)
    }

    /// Exact-match lookup by module id
    pub fn get_module(&self, id: &str) -> Option<&ModuleDefinition> {
        self.index.get(id).map(|&position| &self.modules[position])
    }

    /// All modules in registry order
    pub fn modules(&self) -> &[ModuleDefinition] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn is_applicable(&self, module: &ModuleDefinition, population: Population) -> bool {
        is_applicable(module, population)
    }

    /// Modules required for `population`, ordered by priority then id
    pub fn required_modules(&self, population: Population) -> Vec<&ModuleDefinition> {
        self.modules
            .iter()
            .filter(|m| m.is_required_for(population))
            .collect()
    }

    /// Modules applicable to `population` but not required for it
    pub fn optional_modules(&self, population: Population) -> Vec<&ModuleDefinition> {
        self.modules
            .iter()
            .filter(|m| is_applicable(m, population) && !m.is_required_for(population))
            .collect()
    }

    /// Every module that may be offered to `population`
    pub fn applicable_modules(&self, population: Population) -> Vec<&ModuleDefinition> {
        self.modules
            .iter()
            .filter(|m| is_applicable(m, population))
            .collect()
    }

    /// Required and optional module summaries for an optional population
    pub fn available_for(&self, population: Option<Population>) -> AvailableModules {
        match population {
            Some(population) => AvailableModules {
                required: summarize(self.required_modules(population)),
                optional: summarize(self.optional_modules(population)),
            },
            None => AvailableModules::default(),
        }
    }

    /// Same as [`ModuleRegistry::available_for`] but from a raw stored tag.
    ///
    /// Missing or unknown tags give empty lists rather than an error.
    pub fn available_modules(&self, tag: Option<&str>) -> AvailableModules {
        let population = Population::from_tag(tag);
        if population.is_none() {
            if let Some(tag) = tag {
                tracing::debug!("Population tag {:?} not recognised, no modules available", tag);
            }
        }
        self.available_for(population)
    }

    /// Append definitions, keeping registry order
    pub fn extend(&mut self, extra: Vec<ModuleDefinition>) {
        let mut modules = std::mem::take(&mut self.modules);
        modules.extend(extra);
        *self = Self::new(modules);
    }

    /// Validate the registry for consistency
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen_modules = HashSet::new();

        for module in &self.modules {
            let id = module.id.as_str();
            if id.trim().is_empty() {
                errors.push("Module has empty ID".to_string());
            }
            if !seen_modules.insert(id) {
                errors.push(format!("Duplicate module ID '{}'", id));
            }
            if module.name.trim().is_empty() {
                errors.push(format!("Module '{}' has empty name", id));
            }

            for population in &module.required_for {
                if !is_applicable(module, *population) {
                    errors.push(format!(
                        "Module '{}' is required for '{}' but not applicable to it",
                        id, population
                    ));
                }
            }

            let mut earlier_questions: HashSet<&str> = HashSet::new();
            for question in module.questions() {
                if question.id.trim().is_empty() {
                    errors.push(format!("Module '{}' has a question with empty ID", id));
                }
                if earlier_questions.contains(question.id.as_str()) {
                    errors.push(format!(
                        "Module '{}' has duplicate question ID '{}'",
                        id, question.id
                    ));
                }

                match &question.kind {
                    QuestionKind::Number {
                        min: Some(min),
                        max: Some(max),
                    } if min > max => {
                        errors.push(format!(
                            "Module '{}': question '{}' has min {} > max {}",
                            id, question.id, min, max
                        ));
                    }
                    kind => {
                        if let Some(options) = kind.options() {
                            if let Err(e) = check_options(&question.id, options) {
                                errors.push(format!("Module '{}': {}", id, e));
                            }
                        }
                    }
                }

                if let Some(condition) = &question.visible_when {
                    for referenced in condition.referenced_questions() {
                        if !earlier_questions.contains(referenced) {
                            errors.push(format!(
                                "Module '{}': question '{}' depends on '{}', \
                                 which is not an earlier question",
                                id, question.id, referenced
                            ));
                        }
                    }
                }

                earlier_questions.insert(question.id.as_str());
            }
        }

        errors
    }
}

fn summarize(modules: Vec<&ModuleDefinition>) -> Vec<ModuleSummary> {
    modules.into_iter().map(ModuleDefinition::summary).collect()
}

/// Shape of a TOML module file: a list of `[[modules]]` tables
#[derive(Debug, Deserialize)]
struct ModuleFile {
    #[serde(default)]
    modules: Vec<ModuleDefinition>,
}

/// Parse module definitions from TOML text
pub fn parse_module_file(contents: &str) -> Result<Vec<ModuleDefinition>> {
    let file: ModuleFile = toml::from_str(contents)?;
    Ok(file.modules)
}

/// Load module definitions from a TOML file
pub fn load_module_file(path: &Path) -> Result<Vec<ModuleDefinition>> {
    let contents = std::fs::read_to_string(path)?;
    let modules = parse_module_file(&contents)?;
    tracing::info!("Loaded {} module definitions from {:?}", modules.len(), path);
    Ok(modules)
}

/// Built-in modules plus any configured module file, validated
pub fn registry_from_config(config: &crate::Config) -> Result<ModuleRegistry> {
    let mut registry = default_registry()?.clone();
    if let Some(path) = &config.registry.modules_file {
        registry.extend(load_module_file(path)?);
    }

    let errors = registry.validate();
    if !errors.is_empty() {
        tracing::warn!("{} problem(s) in module definitions", errors.len());
        return Err(Error::RegistryValidation(errors.join("; ")));
    }
    Ok(registry)
}

// ============================================================================
// Built-in modules
// ============================================================================

fn options(pairs: &[(&str, &str)]) -> Vec<ChoiceOption> {
    pairs
        .iter()
        .map(|(value, label)| ChoiceOption::new(*value, *label))
        .collect()
}

fn yes_no() -> Vec<ChoiceOption> {
    options(&[("yes", "Yes"), ("no", "No")])
}

fn section(id: &str, title: &str, questions: Vec<QuestionDefinition>) -> SectionDefinition {
    SectionDefinition {
        id: id.to_string(),
        title: title.to_string(),
        questions,
    }
}

/// Builds the built-in module definitions
///
/// **Note**: For production use, prefer `default_registry()` which returns a
/// cached registry. This function is retained for testing and custom registries.
pub fn build_default_modules() -> Result<Vec<ModuleDefinition>> {
    use Population::*;

    let mut modules = Vec::new();

    // ========================================================================
    // Intake
    // ========================================================================

    modules.push(ModuleDefinition {
        id: "general-health".into(),
        name: "General Health Intake".into(),
        description: "Baseline health, activity and injury history.".into(),
        category: ModuleCategory::Intake,
        priority: 1,
        required_for: [
            General,
            Athlete,
            Recovery,
            Pregnancy,
            Postpartum,
            OlderAdult,
            ChronicCondition,
        ]
        .into_iter()
        .collect(),
        applicability: Applicability::except([Youth]),
        sections: vec![
            section(
                "basics",
                "About You",
                vec![
                    QuestionDefinition::number("age", "How old are you?", Some(13.0), Some(120.0))
                        .required(),
                    QuestionDefinition::select(
                        "sex",
                        "Sex assigned at birth",
                        options(&[
                            ("female", "Female"),
                            ("male", "Male"),
                            ("intersex", "Intersex"),
                            ("prefer_not", "Prefer not to say"),
                        ]),
                    )?,
                    QuestionDefinition::number("height_cm", "Height (cm)", Some(50.0), Some(250.0)),
                    QuestionDefinition::number("weight_kg", "Weight (kg)", Some(20.0), Some(400.0)),
                ],
            ),
            section(
                "history",
                "Health History",
                vec![
                    QuestionDefinition::multi_select(
                        "conditions",
                        "Do you have any of these conditions?",
                        options(&[
                            ("none", "None"),
                            ("hypertension", "High blood pressure"),
                            ("diabetes", "Diabetes"),
                            ("asthma", "Asthma"),
                            ("heart", "Heart condition"),
                            ("joint", "Joint problems"),
                        ]),
                    )?
                    .required(),
                    QuestionDefinition::textarea("medications", "List any current medications"),
                    QuestionDefinition::radio("injured", "Are you currently injured?", yes_no())?
                        .required(),
                    QuestionDefinition::textarea("injury_details", "Describe the injury")
                        .required()
                        .visible_when(Condition::equals("injured", "yes")),
                ],
            ),
        ],
    });

    modules.push(ModuleDefinition {
        id: "youth-basic".into(),
        name: "Youth Intake".into(),
        description: "Guardian details, activity levels and consent for young clients.".into(),
        category: ModuleCategory::Intake,
        priority: 1,
        required_for: [Youth].into_iter().collect(),
        applicability: Applicability::only([Youth]),
        sections: vec![
            section(
                "guardian",
                "Parent or Guardian",
                vec![
                    QuestionDefinition::text("guardian_name", "Guardian full name").required(),
                    QuestionDefinition::text("guardian_phone", "Guardian phone number"),
                    QuestionDefinition::radio(
                        "guardian_consent",
                        "Does the guardian consent to participation?",
                        yes_no(),
                    )?
                    .required(),
                ],
            ),
            section(
                "activity",
                "Activity",
                vec![
                    QuestionDefinition::number("age", "Age", Some(5.0), Some(17.0)).required(),
                    QuestionDefinition::number(
                        "activity_days",
                        "Days per week with an hour of activity",
                        Some(0.0),
                        Some(7.0),
                    )
                    .required(),
                    QuestionDefinition::multi_select(
                        "school_sports",
                        "Organised sports",
                        options(&[
                            ("none", "None"),
                            ("soccer", "Soccer"),
                            ("basketball", "Basketball"),
                            ("swimming", "Swimming"),
                            ("track", "Track and field"),
                            ("other", "Other"),
                        ]),
                    )?,
                ],
            ),
        ],
    });

    modules.push(ModuleDefinition {
        id: "movement-goals".into(),
        name: "Movement Goals".into(),
        description: "What you want to get out of training.".into(),
        category: ModuleCategory::Lifestyle,
        priority: 4,
        required_for: Default::default(),
        applicability: Applicability::except([Youth]),
        sections: vec![section(
            "goals",
            "Goals",
            vec![
                QuestionDefinition::multi_select(
                    "goals",
                    "Pick your main goals",
                    options(&[
                        ("strength", "Build strength"),
                        ("endurance", "Improve endurance"),
                        ("weight", "Manage weight"),
                        ("mobility", "Move with less pain"),
                        ("energy", "More energy"),
                    ]),
                )?
                .required(),
                QuestionDefinition::number(
                    "sessions_per_week",
                    "Sessions per week you can commit to",
                    Some(0.0),
                    Some(14.0),
                ),
                QuestionDefinition::textarea("motivation", "What prompted you to start now?"),
            ],
        )],
    });

    // ========================================================================
    // Population-specific
    // ========================================================================

    modules.push(ModuleDefinition {
        id: "athlete-performance".into(),
        name: "Athletic Performance".into(),
        description: "Sport, training load and competition calendar.".into(),
        category: ModuleCategory::Performance,
        priority: 2,
        required_for: [Athlete].into_iter().collect(),
        applicability: Applicability::only([Athlete]),
        sections: vec![section(
            "training",
            "Training",
            vec![
                QuestionDefinition::text("sport", "Primary sport").required(),
                QuestionDefinition::number(
                    "training_hours",
                    "Training hours per week",
                    Some(0.0),
                    Some(60.0),
                )
                .required(),
                QuestionDefinition::select(
                    "competition_level",
                    "Competition level",
                    options(&[
                        ("recreational", "Recreational"),
                        ("amateur", "Amateur"),
                        ("collegiate", "Collegiate"),
                        ("professional", "Professional"),
                    ]),
                )?,
                QuestionDefinition::radio(
                    "upcoming_event",
                    "Do you have an upcoming competition?",
                    yes_no(),
                )?,
                QuestionDefinition::text("event_date", "Event date")
                    .required()
                    .visible_when(Condition::equals("upcoming_event", "yes")),
            ],
        )],
    });

    modules.push(ModuleDefinition {
        id: "recovery-history".into(),
        name: "Injury & Recovery History".into(),
        description: "Injuries, surgeries and current pain levels.".into(),
        category: ModuleCategory::HealthHistory,
        priority: 2,
        required_for: [Recovery].into_iter().collect(),
        applicability: Applicability::only([Recovery, Athlete, OlderAdult, ChronicCondition]),
        sections: vec![section(
            "injuries",
            "Injuries",
            vec![
                QuestionDefinition::multi_select(
                    "injury_areas",
                    "Affected areas",
                    options(&[
                        ("back", "Back"),
                        ("neck", "Neck"),
                        ("shoulder", "Shoulder"),
                        ("hip", "Hip"),
                        ("knee", "Knee"),
                        ("ankle", "Ankle"),
                        ("other", "Other"),
                    ]),
                )?
                .required(),
                QuestionDefinition::number(
                    "pain_level",
                    "Current pain (0-10)",
                    Some(0.0),
                    Some(10.0),
                )
                .required(),
                QuestionDefinition::radio("surgery", "Have you had surgery for it?", yes_no())?
                    .required(),
                QuestionDefinition::text("surgery_date", "When was the surgery?")
                    .visible_when(Condition::equals("surgery", "yes")),
                QuestionDefinition::radio(
                    "cleared_by_provider",
                    "Has a provider cleared you for exercise?",
                    yes_no(),
                )?,
            ],
        )],
    });

    modules.push(ModuleDefinition {
        id: "pregnancy".into(),
        name: "Pregnancy".into(),
        description: "Stage of pregnancy, provider clearance and complications.".into(),
        category: ModuleCategory::LifeStage,
        priority: 2,
        required_for: [Pregnancy].into_iter().collect(),
        applicability: Applicability::only([Pregnancy]),
        sections: vec![section(
            "pregnancy",
            "Pregnancy",
            vec![
                QuestionDefinition::number("weeks", "Weeks pregnant", Some(1.0), Some(42.0))
                    .required(),
                QuestionDefinition::radio(
                    "provider_clearance",
                    "Has your provider cleared you for exercise?",
                    yes_no(),
                )?
                .required(),
                QuestionDefinition::multi_select(
                    "complications",
                    "Any complications?",
                    options(&[
                        ("none", "None"),
                        ("gestational_diabetes", "Gestational diabetes"),
                        ("preeclampsia", "Preeclampsia"),
                        ("placenta_previa", "Placenta previa"),
                        ("other", "Other"),
                    ]),
                )?,
                QuestionDefinition::textarea("complication_details", "Tell us more")
                    .visible_when(Condition::All(vec![
                        Condition::Answered {
                            question: "complications".into(),
                        },
                        Condition::Not(Box::new(Condition::includes("complications", "none"))),
                    ])),
            ],
        )],
    });

    modules.push(ModuleDefinition {
        id: "postpartum".into(),
        name: "Postpartum".into(),
        description: "Delivery, recovery timeline and pelvic floor screening.".into(),
        category: ModuleCategory::LifeStage,
        priority: 2,
        required_for: [Postpartum].into_iter().collect(),
        applicability: Applicability::only([Postpartum]),
        sections: vec![section(
            "postpartum",
            "Postpartum",
            vec![
                QuestionDefinition::number(
                    "weeks_since_delivery",
                    "Weeks since delivery",
                    Some(0.0),
                    Some(260.0),
                )
                .required(),
                QuestionDefinition::radio(
                    "delivery_type",
                    "Type of delivery",
                    options(&[("vaginal", "Vaginal"), ("cesarean", "Cesarean")]),
                )?
                .required(),
                QuestionDefinition::radio(
                    "diastasis_checked",
                    "Have you been checked for abdominal separation?",
                    yes_no(),
                )?,
                QuestionDefinition::multi_select(
                    "pelvic_floor_symptoms",
                    "Pelvic floor symptoms",
                    options(&[
                        ("none", "None"),
                        ("leaking", "Leaking"),
                        ("heaviness", "Heaviness"),
                        ("pain", "Pain"),
                    ]),
                )?,
            ],
        )],
    });

    modules.push(ModuleDefinition {
        id: "older-adult-mobility".into(),
        name: "Balance & Mobility".into(),
        description: "Fall history, mobility aids and balance confidence.".into(),
        category: ModuleCategory::HealthHistory,
        priority: 2,
        required_for: [OlderAdult].into_iter().collect(),
        applicability: Applicability::only([OlderAdult, Recovery, ChronicCondition]),
        sections: vec![section(
            "mobility",
            "Mobility",
            vec![
                QuestionDefinition::number(
                    "falls_last_year",
                    "Falls in the past 12 months",
                    Some(0.0),
                    Some(50.0),
                )
                .required(),
                QuestionDefinition::radio(
                    "uses_mobility_aid",
                    "Do you use a mobility aid?",
                    yes_no(),
                )?
                .required(),
                QuestionDefinition::select(
                    "aid_type",
                    "Which aid?",
                    options(&[
                        ("cane", "Cane"),
                        ("walker", "Walker"),
                        ("wheelchair", "Wheelchair"),
                        ("other", "Other"),
                    ]),
                )?
                .required()
                .visible_when(Condition::equals("uses_mobility_aid", "yes")),
                QuestionDefinition::number(
                    "balance_confidence",
                    "Confidence in your balance (0-10)",
                    Some(0.0),
                    Some(10.0),
                ),
            ],
        )],
    });

    modules.push(ModuleDefinition {
        id: "chronic-condition".into(),
        name: "Chronic Condition Management".into(),
        description: "Primary diagnosis, care team and known flare triggers.".into(),
        category: ModuleCategory::Clinical,
        priority: 2,
        required_for: [ChronicCondition].into_iter().collect(),
        applicability: Applicability::only([ChronicCondition, OlderAdult]),
        sections: vec![section(
            "condition",
            "Condition",
            vec![
                QuestionDefinition::select(
                    "primary_condition",
                    "Primary condition",
                    options(&[
                        ("diabetes", "Diabetes"),
                        ("cardiovascular", "Cardiovascular disease"),
                        ("arthritis", "Arthritis"),
                        ("copd", "COPD"),
                        ("autoimmune", "Autoimmune condition"),
                        ("other", "Other"),
                    ]),
                )?
                .required(),
                QuestionDefinition::number(
                    "diagnosed_year",
                    "Year of diagnosis",
                    Some(1900.0),
                    Some(2100.0),
                ),
                QuestionDefinition::radio(
                    "managed_by_provider",
                    "Is the condition managed by a provider?",
                    yes_no(),
                )?
                .required(),
                QuestionDefinition::textarea("flare_triggers", "Known triggers for flare-ups"),
            ],
        )],
    });

    // ========================================================================
    // Optional for most populations
    // ========================================================================

    modules.push(ModuleDefinition {
        id: "nutrition".into(),
        name: "Nutrition".into(),
        description: "Eating pattern, allergies and hydration.".into(),
        category: ModuleCategory::Nutrition,
        priority: 5,
        required_for: Default::default(),
        applicability: Applicability::All,
        sections: vec![section(
            "diet",
            "Diet",
            vec![
                QuestionDefinition::select(
                    "diet_pattern",
                    "Which best describes how you eat?",
                    options(&[
                        ("omnivore", "Omnivore"),
                        ("vegetarian", "Vegetarian"),
                        ("vegan", "Vegan"),
                        ("pescatarian", "Pescatarian"),
                        ("other", "Other"),
                    ]),
                )?
                .required(),
                QuestionDefinition::number("meals_per_day", "Meals per day", Some(1.0), Some(8.0)),
                QuestionDefinition::multi_select(
                    "allergies",
                    "Food allergies or intolerances",
                    options(&[
                        ("none", "None"),
                        ("dairy", "Dairy"),
                        ("gluten", "Gluten"),
                        ("nuts", "Nuts"),
                        ("shellfish", "Shellfish"),
                        ("other", "Other"),
                    ]),
                )?,
                QuestionDefinition::text("allergy_details", "Other allergies")
                    .visible_when(Condition::includes("allergies", "other")),
                QuestionDefinition::number(
                    "water_liters",
                    "Litres of water per day",
                    Some(0.0),
                    Some(10.0),
                ),
            ],
        )],
    });

    modules.push(ModuleDefinition {
        id: "sleep-stress".into(),
        name: "Sleep & Stress".into(),
        description: "Sleep habits and sources of stress.".into(),
        category: ModuleCategory::Lifestyle,
        priority: 6,
        required_for: Default::default(),
        applicability: Applicability::except([Youth]),
        sections: vec![section(
            "sleep",
            "Sleep & Stress",
            vec![
                QuestionDefinition::number(
                    "sleep_hours",
                    "Hours of sleep per night",
                    Some(0.0),
                    Some(16.0),
                )
                .required(),
                QuestionDefinition::radio(
                    "sleep_quality",
                    "How would you rate your sleep?",
                    options(&[("poor", "Poor"), ("fair", "Fair"), ("good", "Good")]),
                )?,
                QuestionDefinition::number(
                    "stress_level",
                    "Stress level (0-10)",
                    Some(0.0),
                    Some(10.0),
                ),
                QuestionDefinition::multi_select(
                    "stress_sources",
                    "Main sources of stress",
                    options(&[
                        ("work", "Work"),
                        ("family", "Family"),
                        ("health", "Health"),
                        ("finances", "Finances"),
                        ("other", "Other"),
                    ]),
                )?,
            ],
        )],
    });

    Ok(modules)
}
