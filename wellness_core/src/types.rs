//! Core domain types for the wellness assessment system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Populations and module categories
//! - Module, section and question definitions
//! - Visibility conditions and answer values
//! - Assessment records and per-user profile state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Population
// ============================================================================

/// Classification tag on a user that drives which modules are required,
/// optional or inapplicable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Population {
    General,
    Athlete,
    Youth,
    Recovery,
    Pregnancy,
    Postpartum,
    OlderAdult,
    ChronicCondition,
}

impl Population {
    pub const ALL: [Population; 8] = [
        Population::General,
        Population::Athlete,
        Population::Youth,
        Population::Recovery,
        Population::Pregnancy,
        Population::Postpartum,
        Population::OlderAdult,
        Population::ChronicCondition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Population::General => "general",
            Population::Athlete => "athlete",
            Population::Youth => "youth",
            Population::Recovery => "recovery",
            Population::Pregnancy => "pregnancy",
            Population::Postpartum => "postpartum",
            Population::OlderAdult => "older-adult",
            Population::ChronicCondition => "chronic-condition",
        }
    }

    /// Resolve an optional stored tag. Absent or unrecognised tags yield `None`.
    pub fn from_tag(tag: Option<&str>) -> Option<Population> {
        tag.and_then(|t| t.parse().ok())
    }
}

impl fmt::Display for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a population tag is not recognised
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownPopulation(pub String);

impl fmt::Display for UnknownPopulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown population '{}'", self.0)
    }
}

impl std::error::Error for UnknownPopulation {}

impl FromStr for Population {
    type Err = UnknownPopulation;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "general" => Ok(Population::General),
            "athlete" => Ok(Population::Athlete),
            "youth" => Ok(Population::Youth),
            "recovery" => Ok(Population::Recovery),
            "pregnancy" | "prenatal" => Ok(Population::Pregnancy),
            "postpartum" => Ok(Population::Postpartum),
            "older-adult" | "senior" => Ok(Population::OlderAdult),
            "chronic-condition" | "chronic" => Ok(Population::ChronicCondition),
            _ => Err(UnknownPopulation(s.to_string())),
        }
    }
}

// ============================================================================
// Module Definition Types
// ============================================================================

/// Grouping used when listing modules in menus
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleCategory {
    Intake,
    HealthHistory,
    Performance,
    Nutrition,
    Lifestyle,
    LifeStage,
    Clinical,
}

/// Which populations a module may be offered to.
///
/// Kept independent of `required_for`: a module can be applicable (and thus
/// optional) for a population it is not required for.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", content = "populations", rename_all = "snake_case")]
pub enum Applicability {
    #[default]
    All,
    Only(BTreeSet<Population>),
    Except(BTreeSet<Population>),
}

impl Applicability {
    pub fn only(populations: impl IntoIterator<Item = Population>) -> Self {
        Applicability::Only(populations.into_iter().collect())
    }

    pub fn except(populations: impl IntoIterator<Item = Population>) -> Self {
        Applicability::Except(populations.into_iter().collect())
    }

    pub fn allows(&self, population: Population) -> bool {
        match self {
            Applicability::All => true,
            Applicability::Only(set) => set.contains(&population),
            Applicability::Except(set) => !set.contains(&population),
        }
    }
}

/// One selectable option of a choice question
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceOption {
    pub value: String,
    pub label: String,
}

impl ChoiceOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Input kind of a question, with the fields each kind needs
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKind {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Textarea {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Select { options: Vec<ChoiceOption> },
    Radio { options: Vec<ChoiceOption> },
    MultiSelect { options: Vec<ChoiceOption> },
}

impl QuestionKind {
    /// Options for choice kinds, `None` for free-form kinds
    pub fn options(&self) -> Option<&[ChoiceOption]> {
        match self {
            QuestionKind::Select { options }
            | QuestionKind::Radio { options }
            | QuestionKind::MultiSelect { options } => Some(options),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QuestionKind::Text { .. } => "text",
            QuestionKind::Textarea { .. } => "textarea",
            QuestionKind::Number { .. } => "number",
            QuestionKind::Select { .. } => "select",
            QuestionKind::Radio { .. } => "radio",
            QuestionKind::MultiSelect { .. } => "multi_select",
        }
    }
}

/// Predicate over previously answered values deciding whether a question is shown
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Equals { question: String, value: AnswerValue },
    OneOf { question: String, values: Vec<String> },
    Includes { question: String, value: String },
    Answered { question: String },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn equals(question: impl Into<String>, value: impl Into<AnswerValue>) -> Self {
        Condition::Equals {
            question: question.into(),
            value: value.into(),
        }
    }

    pub fn includes(question: impl Into<String>, value: impl Into<String>) -> Self {
        Condition::Includes {
            question: question.into(),
            value: value.into(),
        }
    }

    /// Evaluate against an answer payload. Unanswered questions never match
    /// `equals`, `one_of` or `includes`.
    pub fn evaluate(&self, answers: &Answers) -> bool {
        match self {
            Condition::Equals { question, value } => answers.get(question) == Some(value),
            Condition::OneOf { question, values } => match answers.get(question) {
                Some(AnswerValue::Text(v)) => values.iter().any(|candidate| candidate == v),
                _ => false,
            },
            Condition::Includes { question, value } => match answers.get(question) {
                Some(AnswerValue::List(items)) => items.iter().any(|item| item == value),
                Some(AnswerValue::Text(v)) => v == value,
                _ => false,
            },
            Condition::Answered { question } => {
                answers.get(question).is_some_and(|v| !v.is_blank())
            }
            Condition::All(conditions) => conditions.iter().all(|c| c.evaluate(answers)),
            Condition::Any(conditions) => conditions.iter().any(|c| c.evaluate(answers)),
            Condition::Not(inner) => !inner.evaluate(answers),
        }
    }

    /// Every question id this condition reads
    pub fn referenced_questions(&self) -> Vec<&str> {
        match self {
            Condition::Equals { question, .. }
            | Condition::OneOf { question, .. }
            | Condition::Includes { question, .. }
            | Condition::Answered { question } => vec![question.as_str()],
            Condition::All(conditions) | Condition::Any(conditions) => conditions
                .iter()
                .flat_map(|c| c.referenced_questions())
                .collect(),
            Condition::Not(inner) => inner.referenced_questions(),
        }
    }
}

/// A single question within a section
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuestionDefinition {
    pub id: String,
    pub prompt: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<Condition>,
}

impl QuestionDefinition {
    fn with_kind(id: &str, prompt: &str, kind: QuestionKind) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            kind,
            required: false,
            visible_when: None,
        }
    }

    pub fn text(id: &str, prompt: &str) -> Self {
        Self::with_kind(id, prompt, QuestionKind::Text { max_length: None })
    }

    pub fn textarea(id: &str, prompt: &str) -> Self {
        Self::with_kind(id, prompt, QuestionKind::Textarea { max_length: None })
    }

    pub fn number(id: &str, prompt: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Self::with_kind(id, prompt, QuestionKind::Number { min, max })
    }

    /// Single-choice dropdown. Fails if `options` is empty or has duplicate values.
    pub fn select(id: &str, prompt: &str, options: Vec<ChoiceOption>) -> crate::Result<Self> {
        check_options(id, &options)?;
        Ok(Self::with_kind(id, prompt, QuestionKind::Select { options }))
    }

    /// Single-choice radio group. Same option rules as [`QuestionDefinition::select`].
    pub fn radio(id: &str, prompt: &str, options: Vec<ChoiceOption>) -> crate::Result<Self> {
        check_options(id, &options)?;
        Ok(Self::with_kind(id, prompt, QuestionKind::Radio { options }))
    }

    /// Checkbox group allowing several options.
    pub fn multi_select(
        id: &str,
        prompt: &str,
        options: Vec<ChoiceOption>,
    ) -> crate::Result<Self> {
        check_options(id, &options)?;
        Ok(Self::with_kind(id, prompt, QuestionKind::MultiSelect { options }))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn visible_when(mut self, condition: Condition) -> Self {
        self.visible_when = Some(condition);
        self
    }

    /// Whether the question is shown given the answers collected so far
    pub fn is_visible(&self, answers: &Answers) -> bool {
        self.visible_when
            .as_ref()
            .map_or(true, |condition| condition.evaluate(answers))
    }
}

/// Option list rules shared by every choice kind
pub(crate) fn check_options(question_id: &str, options: &[ChoiceOption]) -> crate::Result<()> {
    if options.is_empty() {
        return Err(crate::Error::InvalidDefinition(format!(
            "question '{}' is a choice question without options",
            question_id
        )));
    }
    let mut seen = BTreeSet::new();
    for option in options {
        if !seen.insert(option.value.as_str()) {
            return Err(crate::Error::InvalidDefinition(format!(
                "question '{}' has duplicate option '{}'",
                question_id, option.value
            )));
        }
    }
    Ok(())
}

/// An ordered group of questions within a module
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SectionDefinition {
    pub id: String,
    pub title: String,
    pub questions: Vec<QuestionDefinition>,
}

/// A complete assessment module definition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModuleDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: ModuleCategory,
    pub priority: i32,
    #[serde(default)]
    pub required_for: BTreeSet<Population>,
    #[serde(default)]
    pub applicability: Applicability,
    #[serde(default)]
    pub sections: Vec<SectionDefinition>,
}

impl ModuleDefinition {
    /// Questions in definition order across all sections
    pub fn questions(&self) -> impl Iterator<Item = &QuestionDefinition> {
        self.sections.iter().flat_map(|s| s.questions.iter())
    }

    pub fn question(&self, id: &str) -> Option<&QuestionDefinition> {
        self.questions().find(|q| q.id == id)
    }

    pub fn is_required_for(&self, population: Population) -> bool {
        self.required_for.contains(&population)
    }

    pub fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category,
            priority: self.priority,
        }
    }
}

/// Menu-level view of a module
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: ModuleCategory,
    pub priority: i32,
}

/// Required and optional modules for one population
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AvailableModules {
    pub required: Vec<ModuleSummary>,
    pub optional: Vec<ModuleSummary>,
}

// ============================================================================
// Answer Types
// ============================================================================

/// A single submitted answer value
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl AnswerValue {
    /// Empty strings and empty lists count as unanswered
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text(s) => s.trim().is_empty(),
            AnswerValue::List(items) => items.is_empty(),
            AnswerValue::Bool(_) | AnswerValue::Number(_) => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AnswerValue::Bool(_) => "boolean",
            AnswerValue::Number(_) => "number",
            AnswerValue::Text(_) => "string",
            AnswerValue::List(_) => "list",
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Bool(true) => f.write_str("yes"),
            AnswerValue::Bool(false) => f.write_str("no"),
            AnswerValue::Number(n) => write!(f, "{}", n),
            AnswerValue::Text(s) => f.write_str(s),
            AnswerValue::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

impl From<bool> for AnswerValue {
    fn from(value: bool) -> Self {
        AnswerValue::Bool(value)
    }
}

impl From<f64> for AnswerValue {
    fn from(value: f64) -> Self {
        AnswerValue::Number(value)
    }
}

impl From<i32> for AnswerValue {
    fn from(value: i32) -> Self {
        AnswerValue::Number(f64::from(value))
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::Text(value)
    }
}

impl From<Vec<&str>> for AnswerValue {
    fn from(value: Vec<&str>) -> Self {
        AnswerValue::List(value.into_iter().map(String::from).collect())
    }
}

/// Open key-value answer payload, keyed by question id
pub type Answers = BTreeMap<String, AnswerValue>;

// ============================================================================
// Record and Profile State Types
// ============================================================================

/// Saved answers for one (user, module) pair
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AssessmentRecord {
    pub id: Uuid,
    pub user_id: String,
    pub module_id: String,
    pub answers: Answers,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AssessmentRecord {
    pub fn new(user_id: &str, module_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            module_id: module_id.to_string(),
            answers: Answers::new(),
            completed: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn status(&self) -> ModuleStatus {
        if self.completed {
            ModuleStatus::Completed
        } else {
            ModuleStatus::InProgress
        }
    }
}

/// Lifecycle of one module for one user
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// Everything persisted for one user
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct UserProfileState {
    pub user_id: String,
    /// Raw population tag as assigned by the surrounding application
    #[serde(default)]
    pub population: Option<String>,
    #[serde(default)]
    pub records: BTreeMap<String, AssessmentRecord>,
    #[serde(default)]
    pub profile_completed_at: Option<DateTime<Utc>>,
}

impl UserProfileState {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }

    pub fn population(&self) -> Option<Population> {
        Population::from_tag(self.population.as_deref())
    }

    pub fn module_status(&self, module_id: &str) -> ModuleStatus {
        self.records
            .get(module_id)
            .map_or(ModuleStatus::NotStarted, AssessmentRecord::status)
    }
}

/// Logical union of a user's module answers plus completion state
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UnifiedProfile {
    pub user_id: String,
    pub population: Option<Population>,
    pub modules: BTreeMap<String, Answers>,
    pub completed_modules: BTreeSet<String>,
    pub completion_percentage: u8,
    pub profile_completed_at: Option<DateTime<Utc>>,
}

/// Progress view exposed to page and API code
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressSummary {
    pub completed: Vec<String>,
    pub required: Vec<String>,
    pub all_required_complete: bool,
    pub percentage: u8,
}
