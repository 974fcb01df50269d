//! The fixed, ordered table of roadmap stages.
//!
//! [`StageTable`] is the single source of truth for how many stages a job
//! has, their order, and each stage's contract (prompt, shape, budgets,
//! fallback). The orchestrator carries no stage-specific logic of its own.

mod prompts;
mod shape;

use std::time::Duration;

use serde_json::{Value, json};

use crate::job::{GenerationRequest, StageResult};

pub use shape::{AUDIT_EXCERPT_CHARS, Shape, StageOutput, audit_excerpt};

/// Builds a stage's prompt from the request and every earlier stage's result.
pub type PromptBuilder = fn(&GenerationRequest, &[StageResult]) -> String;

/// Builds a stage's minimal valid value, optionally embedding raw model text.
pub type FallbackBuilder = fn(&Shape, Option<&str>) -> StageOutput;

/// Static contract for one stage.
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    pub index: usize,
    pub key: &'static str,
    pub name: &'static str,
    pub shape: Shape,
    pub build_prompt: PromptBuilder,
    pub time_budget: Duration,
    pub max_tokens: u32,
    pub fallback: FallbackBuilder,
}

impl StageDescriptor {
    /// The foundational stage produces the context every later stage needs.
    pub fn is_foundational(&self) -> bool {
        self.index == 0
    }

    pub fn prompt(&self, request: &GenerationRequest, prior: &[StageResult]) -> String {
        (self.build_prompt)(request, prior)
    }

    pub fn fallback_value(&self, raw_excerpt: Option<&str>) -> StageOutput {
        (self.fallback)(&self.shape, raw_excerpt)
    }
}

/// Ordered stage descriptors. Immutable once built.
#[derive(Debug, Clone)]
pub struct StageTable {
    stages: Vec<StageDescriptor>,
}

impl StageTable {
    /// The eight-stage roadmap table.
    pub fn standard() -> Self {
        let notes = |shape: Shape| shape.with_notes("notes");
        let stages = vec![
            StageDescriptor {
                index: 0,
                key: "business_analysis",
                name: "Business analysis",
                shape: notes(Shape::list("opportunities").with_required_text("summary")),
                build_prompt: prompts::business_analysis,
                time_budget: Duration::from_secs(45),
                max_tokens: 1500,
                fallback: empty_fallback,
            },
            StageDescriptor {
                index: 1,
                key: "ai_components",
                name: "AI components",
                shape: notes(Shape::list("components")),
                build_prompt: prompts::ai_components,
                time_budget: Duration::from_secs(60),
                max_tokens: 2500,
                fallback: components_fallback,
            },
            StageDescriptor {
                index: 2,
                key: "recommended_tools",
                name: "Recommended tools",
                shape: notes(Shape::list("tools")),
                build_prompt: prompts::recommended_tools,
                time_budget: Duration::from_secs(60),
                max_tokens: 2500,
                fallback: empty_fallback,
            },
            StageDescriptor {
                index: 3,
                key: "quick_wins",
                name: "Quick wins",
                shape: notes(Shape::list("items")),
                build_prompt: prompts::quick_wins,
                time_budget: Duration::from_secs(45),
                max_tokens: 1500,
                fallback: empty_fallback,
            },
            StageDescriptor {
                index: 4,
                key: "implementation_plan",
                name: "Implementation plan",
                shape: notes(Shape::list("phases")),
                build_prompt: prompts::implementation_plan,
                time_budget: Duration::from_secs(60),
                max_tokens: 3000,
                fallback: plan_fallback,
            },
            StageDescriptor {
                index: 5,
                key: "budget_estimate",
                name: "Budget estimate",
                shape: notes(Shape::list("line_items")),
                build_prompt: prompts::budget_estimate,
                time_budget: Duration::from_secs(45),
                max_tokens: 1500,
                fallback: empty_fallback,
            },
            StageDescriptor {
                index: 6,
                key: "risk_assessment",
                name: "Risk assessment",
                shape: notes(Shape::list("risks")),
                build_prompt: prompts::risk_assessment,
                time_budget: Duration::from_secs(45),
                max_tokens: 1500,
                fallback: empty_fallback,
            },
            StageDescriptor {
                index: 7,
                key: "success_metrics",
                name: "Success metrics",
                shape: notes(Shape::list("metrics")),
                build_prompt: prompts::success_metrics,
                time_budget: Duration::from_secs(45),
                max_tokens: 1500,
                fallback: empty_fallback,
            },
        ];
        Self { stages }
    }

    /// Replace every stage's time budget.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        for stage in &mut self.stages {
            stage.time_budget = budget;
        }
        self
    }

    pub fn for_stage(&self, index: usize) -> Option<&StageDescriptor> {
        self.stages.get(index)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.stages.iter()
    }

    /// Completion percentage after the stage at `index` has a result.
    pub fn completion_after(&self, index: usize) -> u8 {
        completion_after(index, self.len())
    }
}

/// `(index + 1) * 100 / total`, integer division: monotonic, 100 only after the
/// last stage. For eight stages: 12, 25, 37, 50, 62, 75, 87, 100.
pub fn completion_after(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = (index + 1).min(total);
    (done * 100 / total) as u8
}

fn empty_fallback(shape: &Shape, raw: Option<&str>) -> StageOutput {
    shape.fallback_output(
        Vec::new(),
        Some("The business analysis could not be generated."),
        raw,
    )
}

fn components_fallback(shape: &Shape, raw: Option<&str>) -> StageOutput {
    let placeholder: Value = json!({
        "name": "Components pending review",
        "description": "This section could not be generated automatically.",
        "priority": "medium"
    });
    shape.fallback_output(vec![placeholder], None, raw)
}

fn plan_fallback(shape: &Shape, raw: Option<&str>) -> StageOutput {
    let placeholder: Value = json!({
        "phase": "Plan with an advisor",
        "weeks": "1-2",
        "tasks": []
    });
    shape.fallback_output(vec![placeholder], None, raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_has_eight_ordered_stages() {
        let table = StageTable::standard();
        assert_eq!(table.len(), 8);
        for (i, stage) in table.iter().enumerate() {
            assert_eq!(stage.index, i);
        }
        assert!(table.for_stage(0).unwrap().is_foundational());
        assert!(!table.for_stage(1).unwrap().is_foundational());
        assert!(table.for_stage(8).is_none());
    }

    #[test]
    fn stage_keys_are_unique() {
        let table = StageTable::standard();
        let mut keys: Vec<_> = table.iter().map(|s| s.key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), table.len());
    }

    #[test]
    fn quick_wins_is_stage_three_with_items_list() {
        let table = StageTable::standard();
        let stage = table.for_stage(3).unwrap();
        assert_eq!(stage.key, "quick_wins");
        assert_eq!(stage.shape.list_field, "items");
    }

    #[test]
    fn completion_mapping_matches_documented_values() {
        let table = StageTable::standard();
        let values: Vec<u8> = (0..table.len()).map(|i| table.completion_after(i)).collect();
        assert_eq!(values, vec![12, 25, 37, 50, 62, 75, 87, 100]);
    }

    #[test]
    fn completion_is_monotonic_and_capped() {
        for total in 1..20 {
            let mut last = 0;
            for i in 0..total + 3 {
                let pct = completion_after(i, total);
                assert!(pct >= last);
                assert!(pct <= 100);
                last = pct;
            }
            assert_eq!(completion_after(total - 1, total), 100);
            if total > 1 {
                assert!(completion_after(total - 2, total) < 100);
            }
        }
    }

    #[test]
    fn every_fallback_is_shape_valid() {
        let table = StageTable::standard();
        for stage in table.iter() {
            for raw in [None, Some("not json at all")] {
                let out = stage.fallback_value(raw);
                assert!(
                    stage.shape.validate(out.into_value()).is_some(),
                    "fallback for {} is invalid",
                    stage.key
                );
            }
        }
    }

    #[test]
    fn fallbacks_are_deterministic() {
        let table = StageTable::standard();
        for stage in table.iter() {
            assert_eq!(stage.fallback_value(Some("x")), stage.fallback_value(Some("x")));
        }
    }

    #[test]
    fn placeholder_fallbacks_carry_one_entry() {
        let table = StageTable::standard();
        let components = table.for_stage(1).unwrap();
        assert_eq!(components.fallback_value(None).entries("components").len(), 1);
        let tools = table.for_stage(2).unwrap();
        assert!(tools.fallback_value(None).entries("tools").is_empty());
    }

    #[test]
    fn time_budget_override_applies_to_all_stages() {
        let table = StageTable::standard().with_time_budget(Duration::from_millis(10));
        assert!(table.iter().all(|s| s.time_budget == Duration::from_millis(10)));
    }
}
