//! Packet assembly: a document payload built from a unified profile and the
//! exercise/nutrition content library.
//!
//! This is templating only. Turning the payload into a PDF is left to the
//! caller.

use crate::registry::ModuleRegistry;
use crate::types::*;
use crate::Result;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;

// ============================================================================
// Library
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LibraryKind {
    Exercise,
    Nutrition,
}

/// Condition evaluated against one module's answers in a profile
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProfileCondition {
    pub module: String,
    pub condition: Condition,
}

impl ProfileCondition {
    fn matches(&self, profile: &UnifiedProfile) -> bool {
        profile
            .modules
            .get(&self.module)
            .is_some_and(|answers| self.condition.evaluate(answers))
    }
}

/// One exercise or nutrition entry
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LibraryItem {
    pub id: String,
    pub title: String,
    pub kind: LibraryKind,
    pub summary: String,
    /// Populations this item suits; empty means everyone
    #[serde(default)]
    pub populations: BTreeSet<Population>,
    /// Leave the item out when any of these match the profile
    #[serde(default)]
    pub excluded_when: Vec<ProfileCondition>,
}

impl LibraryItem {
    fn suits(&self, profile: &UnifiedProfile) -> bool {
        let population_ok = self.populations.is_empty()
            || profile
                .population
                .is_some_and(|p| self.populations.contains(&p));
        population_ok && !self.excluded_when.iter().any(|c| c.matches(profile))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct Library {
    pub items: Vec<LibraryItem>,
}

static DEFAULT_LIBRARY: Lazy<Library> = Lazy::new(build_default_library);

/// Get a reference to the cached built-in library
pub fn default_library() -> &'static Library {
    &DEFAULT_LIBRARY
}

impl Library {
    /// Load a library from a JSON file (`{"items": [...]}`)
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let library: Library = serde_json::from_str(&contents)?;
        tracing::info!("Loaded {} library items from {:?}", library.items.len(), path);
        Ok(library)
    }

    /// Items of `kind` suited to the profile, in library order, at most `limit`
    pub fn select(
        &self,
        kind: LibraryKind,
        profile: &UnifiedProfile,
        limit: usize,
    ) -> Vec<LibraryItem> {
        self.items
            .iter()
            .filter(|item| item.kind == kind && item.suits(profile))
            .take(limit)
            .cloned()
            .collect()
    }
}

fn item(id: &str, title: &str, kind: LibraryKind, summary: &str) -> LibraryItem {
    LibraryItem {
        id: id.into(),
        title: title.into(),
        kind,
        summary: summary.into(),
        populations: BTreeSet::new(),
        excluded_when: Vec::new(),
    }
}

fn excluded_if(module: &str, condition: Condition) -> ProfileCondition {
    ProfileCondition {
        module: module.into(),
        condition,
    }
}

fn build_default_library() -> Library {
    use LibraryKind::*;
    use Population::*;

    let mut items = vec![
        item(
            "walk_intervals",
            "Walking Intervals",
            Exercise,
            "Alternate 2 minutes brisk, 1 minute easy for 20 minutes.",
        ),
        item(
            "glute_bridge",
            "Glute Bridge",
            Exercise,
            "3 sets of 10, pause two seconds at the top.",
        ),
        item(
            "dead_bug",
            "Dead Bug",
            Exercise,
            "3 sets of 8 per side, keep the lower back flat.",
        ),
        item("box_jump", "Box Jumps", Exercise, "4 sets of 5, step down between reps."),
        item("sit_to_stand", "Sit to Stand", Exercise, "3 sets of 8 from a sturdy chair."),
        item(
            "pelvic_floor_breath",
            "Pelvic Floor Breathing",
            Exercise,
            "5 minutes of diaphragmatic breathing with gentle pelvic floor engagement.",
        ),
        item(
            "balanced_plate",
            "Balanced Plate",
            Nutrition,
            "Half vegetables, a quarter protein, a quarter whole grains.",
        ),
        item(
            "greek_yogurt_bowl",
            "Greek Yogurt Bowl",
            Nutrition,
            "Yogurt, berries and oats for a protein-forward breakfast.",
        ),
        item(
            "lentil_soup",
            "Lentil Soup",
            Nutrition,
            "High-fibre plant protein that batch-cooks well.",
        ),
        item(
            "hydration_plan",
            "Hydration Plan",
            Nutrition,
            "Spread water through the day; add electrolytes after long sessions.",
        ),
        item("trail_mix", "Trail Mix", Nutrition, "Nuts and dried fruit for a portable snack."),
    ];

    for item in &mut items {
        match item.id.as_str() {
            "box_jump" => {
                item.populations = [General, Athlete, Youth].into_iter().collect();
                item.excluded_when = vec![excluded_if(
                    "general-health",
                    Condition::equals("injured", "yes"),
                )];
            }
            "sit_to_stand" => {
                item.populations = [OlderAdult, Recovery, ChronicCondition].into_iter().collect();
            }
            "pelvic_floor_breath" => {
                item.populations = [Pregnancy, Postpartum].into_iter().collect();
            }
            "dead_bug" => {
                item.excluded_when = vec![excluded_if(
                    "postpartum",
                    Condition::equals("diastasis_checked", "no"),
                )];
            }
            "greek_yogurt_bowl" => {
                item.excluded_when = vec![
                    excluded_if("nutrition", Condition::includes("allergies", "dairy")),
                    excluded_if("nutrition", Condition::equals("diet_pattern", "vegan")),
                ];
            }
            "trail_mix" => {
                item.excluded_when = vec![excluded_if(
                    "nutrition",
                    Condition::includes("allergies", "nuts"),
                )];
            }
            _ => {}
        }
    }

    Library { items }
}

// ============================================================================
// Packet
// ============================================================================

/// One question and its answer as shown in the packet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PacketLine {
    pub prompt: String,
    pub answer: String,
}

/// Answers for one module
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PacketSection {
    pub module_id: String,
    pub heading: String,
    pub completed: bool,
    pub lines: Vec<PacketLine>,
}

/// Assembled document payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    pub title: String,
    pub user_id: String,
    pub population: Option<Population>,
    pub generated_at: DateTime<Utc>,
    pub completion_percentage: u8,
    pub sections: Vec<PacketSection>,
    pub exercises: Vec<LibraryItem>,
    pub nutrition: Vec<LibraryItem>,
}

/// Assemble a packet from a unified profile
///
/// Sections follow registry order. Modules in the profile that the registry
/// no longer knows are skipped.
pub fn build_packet(
    registry: &ModuleRegistry,
    profile: &UnifiedProfile,
    library: &Library,
    options: &crate::config::PacketConfig,
    now: DateTime<Utc>,
) -> Packet {
    for module_id in profile.modules.keys() {
        if registry.get_module(module_id).is_none() {
            tracing::warn!(
                "Profile has answers for unknown module {:?}, leaving it out",
                module_id
            );
        }
    }

    let sections = registry
        .modules()
        .iter()
        .filter_map(|module| {
            let answers = profile.modules.get(&module.id)?;
            Some(PacketSection {
                module_id: module.id.clone(),
                heading: module.name.clone(),
                completed: profile.completed_modules.contains(&module.id),
                lines: answer_lines(module, answers),
            })
        })
        .collect();

    let packet = Packet {
        title: options.title.clone(),
        user_id: profile.user_id.clone(),
        population: profile.population,
        generated_at: now,
        completion_percentage: profile.completion_percentage,
        sections,
        exercises: library.select(LibraryKind::Exercise, profile, options.max_exercises),
        nutrition: library.select(LibraryKind::Nutrition, profile, options.max_nutrition_items),
    };

    tracing::debug!(
        "Built packet for {:?}: {} sections, {} exercises, {} nutrition items",
        packet.user_id,
        packet.sections.len(),
        packet.exercises.len(),
        packet.nutrition.len()
    );
    packet
}

fn answer_lines(module: &ModuleDefinition, answers: &Answers) -> Vec<PacketLine> {
    module
        .questions()
        .filter(|q| q.is_visible(answers))
        .filter_map(|q| {
            let value = answers.get(&q.id).filter(|v| !v.is_blank())?;
            Some(PacketLine {
                prompt: q.prompt.clone(),
                answer: display_answer(q, value),
            })
        })
        .collect()
}

/// Show option labels instead of stored option values
fn display_answer(question: &QuestionDefinition, value: &AnswerValue) -> String {
    let Some(options) = question.kind.options() else {
        return value.to_string();
    };
    let label = |v: &str| {
        options
            .iter()
            .find(|o| o.value == v)
            .map_or_else(|| v.to_string(), |o| o.label.clone())
    };
    match value {
        AnswerValue::Text(v) => label(v),
        AnswerValue::List(values) => values.iter().map(|v| label(v)).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

impl Packet {
    /// Plain-text rendering of the packet
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}", self.title);
        let _ = writeln!(out);
        let _ = writeln!(out, "Client: {}", self.user_id);
        if let Some(population) = self.population {
            let _ = writeln!(out, "Population: {}", population);
        }
        let _ = writeln!(out, "Profile completion: {}%", self.completion_percentage);
        let _ = writeln!(out, "Generated: {}", self.generated_at.format("%Y-%m-%d %H:%M UTC"));

        for section in &self.sections {
            let _ = writeln!(out);
            let marker = if section.completed { "" } else { " (in progress)" };
            let _ = writeln!(out, "## {}{}", section.heading, marker);
            for line in &section.lines {
                let _ = writeln!(out, "- {}: {}", line.prompt, line.answer);
            }
        }

        for (heading, items) in [("Exercises", &self.exercises), ("Nutrition", &self.nutrition)] {
            if items.is_empty() {
                continue;
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "## {}", heading);
            for item in items {
                let _ = writeln!(out, "- {}: {}", item.title, item.summary);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacketConfig;
    use crate::registry::default_registry;
    use std::collections::BTreeMap;

    fn profile(population: Option<Population>, modules: &[(&str, &str)]) -> UnifiedProfile {
        let modules: BTreeMap<String, Answers> = modules
            .iter()
            .map(|(id, json)| (id.to_string(), serde_json::from_str(json).unwrap()))
            .collect();
        UnifiedProfile {
            user_id: "u1".into(),
            population,
            completed_modules: modules.keys().take(1).cloned().collect(),
            modules,
            completion_percentage: 50,
            profile_completed_at: None,
        }
    }

    fn ids(items: &[LibraryItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_default_library_has_both_kinds() {
        let library = default_library();
        assert!(library.items.iter().any(|i| i.kind == LibraryKind::Exercise));
        assert!(library.items.iter().any(|i| i.kind == LibraryKind::Nutrition));
    }

    #[test]
    fn test_sections_follow_registry_order_with_labels() {
        let profile = profile(
            Some(Population::General),
            &[
                ("nutrition", r#"{"diet_pattern": "vegan", "allergies": ["nuts", "gluten"]}"#),
                ("general-health", r#"{"age": 41, "injured": "no", "injury_details": "stale"}"#),
                ("retired-module", r#"{"x": 1}"#),
            ],
        );
        let packet = build_packet(
            default_registry().unwrap(),
            &profile,
            default_library(),
            &PacketConfig::default(),
            Utc::now(),
        );

        let modules: Vec<_> = packet.sections.iter().map(|s| s.module_id.as_str()).collect();
        assert_eq!(modules, vec!["general-health", "nutrition"]);

        let general = &packet.sections[0];
        assert_eq!(general.lines.len(), 2, "hidden question must not be shown");
        assert_eq!(general.lines[1].answer, "No");

        let nutrition = &packet.sections[1];
        assert_eq!(nutrition.lines[0].answer, "Vegan");
        assert_eq!(nutrition.lines[1].answer, "Nuts, Gluten");
    }

    #[test]
    fn test_library_filters_by_population_and_answers() {
        let profile = profile(
            Some(Population::General),
            &[
                ("general-health", r#"{"injured": "yes"}"#),
                ("nutrition", r#"{"allergies": ["nuts"]}"#),
            ],
        );
        let library = default_library();

        let exercises = library.select(LibraryKind::Exercise, &profile, 10);
        assert_eq!(ids(&exercises), vec!["walk_intervals", "glute_bridge", "dead_bug"]);

        let nutrition = library.select(LibraryKind::Nutrition, &profile, 10);
        assert!(!ids(&nutrition).contains(&"trail_mix"));
        assert!(ids(&nutrition).contains(&"greek_yogurt_bowl"));
    }

    #[test]
    fn test_population_only_items_need_a_population() {
        let profile = profile(None, &[]);
        let exercises = default_library().select(LibraryKind::Exercise, &profile, 10);
        assert!(!ids(&exercises).contains(&"box_jump"));
        assert!(!ids(&exercises).contains(&"sit_to_stand"));
    }

    #[test]
    fn test_limits_respected() {
        let profile = profile(Some(Population::Athlete), &[]);
        let options = PacketConfig {
            max_exercises: 2,
            max_nutrition_items: 1,
            ..PacketConfig::default()
        };
        let packet = build_packet(
            default_registry().unwrap(),
            &profile,
            default_library(),
            &options,
            Utc::now(),
        );
        assert_eq!(packet.exercises.len(), 2);
        assert_eq!(packet.nutrition.len(), 1);
    }

    #[test]
    fn test_render_text() {
        let profile = profile(Some(Population::Youth), &[("nutrition", r#"{"meals_per_day": 3}"#)]);
        let packet = build_packet(
            default_registry().unwrap(),
            &profile,
            default_library(),
            &PacketConfig::default(),
            Utc::now(),
        );
        let text = packet.render_text();

        assert!(text.starts_with("# Personal Wellness Packet"));
        assert!(text.contains("Population: youth"));
        assert!(text.contains("## Nutrition\n- Meals per day: 3"));
        assert!(text.contains("## Exercises"));
    }

    #[test]
    fn test_library_load_from_json() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("library.json");
        std::fs::write(
            &path,
            r#"{"items": [{"id": "plank", "title": "Plank", "kind": "exercise",
                "summary": "Hold 30s", "populations": ["athlete"],
                "excluded_when": [{"module": "general-health", "condition":
                    {"equals": {"question": "injured", "value": "yes"}}}]}]}"#,
        )
        .unwrap();

        let library = Library::load(&path).unwrap();
        assert_eq!(library.items.len(), 1);
        assert_eq!(library.items[0].excluded_when.len(), 1);

        let athlete = profile(Some(Population::Athlete), &[]);
        assert_eq!(library.select(LibraryKind::Exercise, &athlete, 5).len(), 1);
    }
}
