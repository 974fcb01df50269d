//! Prompt builders, one per stage.
//!
//! Every builder is a pure function of the request and the results recorded so
//! far. Later stages quote the foundational summary verbatim and list what the
//! earlier stages produced so the model stays consistent across the roadmap.

use serde_json::Value;

use crate::job::{GenerationRequest, StageResult};

/// Entries named in the context block per earlier stage.
const MAX_CONTEXT_ENTRIES: usize = 6;

fn request_context(req: &GenerationRequest) -> String {
    let mut lines = vec![
        format!("Business goals: {}", req.goals.trim()),
        format!("Current challenges: {}", req.challenges.trim()),
    ];
    let optional = [
        ("Industry", &req.industry),
        ("AI experience level", &req.experience_level),
        ("Urgency", &req.urgency),
        ("Budget", &req.budget),
    ];
    for (label, value) in optional {
        if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            lines.push(format!("{label}: {v}"));
        }
    }
    lines.join("\n")
}

/// Short human label for one list entry: its `name` or `title`, or the value
/// itself when the model returned bare strings.
fn entry_label(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["name", "title", "phase", "metric", "risk"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn prior_context(prior: &[StageResult]) -> String {
    let mut out = String::new();

    if let Some(summary) = prior
        .first()
        .and_then(|r| r.output.text("summary"))
    {
        out.push_str("Business analysis summary (verbatim):\n\"\"\"\n");
        out.push_str(summary);
        out.push_str("\n\"\"\"\n");
    }

    for result in prior.iter().skip(1) {
        let labels: Vec<String> = result
            .output
            .as_map()
            .values()
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(entry_label)
            .take(MAX_CONTEXT_ENTRIES)
            .collect();
        if labels.is_empty() {
            continue;
        }
        out.push_str(&format!("Already decided in {}: {}\n", result.stage_key, labels.join("; ")));
    }
    out
}

fn compose(req: &GenerationRequest, prior: &[StageResult], task: &str, format: &str) -> String {
    let context = prior_context(prior);
    let mut prompt = format!("{}\n\n", request_context(req));
    if !context.is_empty() {
        prompt.push_str(&context);
        prompt.push('\n');
    }
    prompt.push_str(task);
    prompt.push_str("\n\nRespond with ONLY valid JSON in this format:\n");
    prompt.push_str(format);
    prompt
}

pub(super) fn business_analysis(req: &GenerationRequest, prior: &[StageResult]) -> String {
    compose(
        req,
        prior,
        "Analyse this business and where AI can help it most. The summary is reused as \
         context by every later part of the roadmap, so make it self-contained.",
        r#"{"summary": "<3-5 sentence analysis>", "opportunities": [{"title": "<opportunity>", "impact": "<high|medium|low>"}]}"#,
    )
}

pub(super) fn ai_components(req: &GenerationRequest, prior: &[StageResult]) -> String {
    compose(
        req,
        prior,
        "List the AI components this business should adopt, most valuable first.",
        r#"{"components": [{"name": "<component>", "description": "<what it does>", "priority": "<high|medium|low>"}]}"#,
    )
}

pub(super) fn recommended_tools(req: &GenerationRequest, prior: &[StageResult]) -> String {
    compose(
        req,
        prior,
        "Recommend concrete tools or services for the components above.",
        r#"{"tools": [{"name": "<tool>", "purpose": "<component it serves>", "monthly_cost": "<estimate>"}]}"#,
    )
}

pub(super) fn quick_wins(req: &GenerationRequest, prior: &[StageResult]) -> String {
    compose(
        req,
        prior,
        "Suggest quick wins the owner can start this week with little or no budget.",
        r#"{"items": [{"title": "<action>", "effort": "<hours>"}], "notes": "<optional>"}"#,
    )
}

pub(super) fn implementation_plan(req: &GenerationRequest, prior: &[StageResult]) -> String {
    compose(
        req,
        prior,
        "Lay out a phased implementation plan covering the next six months.",
        r#"{"phases": [{"phase": "<name>", "weeks": "<range>", "tasks": ["<task>"]}]}"#,
    )
}

pub(super) fn budget_estimate(req: &GenerationRequest, prior: &[StageResult]) -> String {
    compose(
        req,
        prior,
        "Estimate the budget for the plan above, one line item per cost.",
        r#"{"line_items": [{"name": "<cost>", "amount": "<estimate>", "recurring": true}], "notes": "<assumptions>"}"#,
    )
}

pub(super) fn risk_assessment(req: &GenerationRequest, prior: &[StageResult]) -> String {
    compose(
        req,
        prior,
        "Assess the main risks of this roadmap and how to mitigate each.",
        r#"{"risks": [{"risk": "<risk>", "likelihood": "<high|medium|low>", "mitigation": "<mitigation>"}]}"#,
    )
}

pub(super) fn success_metrics(req: &GenerationRequest, prior: &[StageResult]) -> String {
    compose(
        req,
        prior,
        "Define how the owner will measure success.",
        r#"{"metrics": [{"metric": "<name>", "target": "<target>", "review": "<cadence>"}]}"#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ResultSource;
    use crate::stages::Shape;
    use serde_json::json;

    fn request() -> GenerationRequest {
        GenerationRequest {
            goals: "grow a bakery with AI".into(),
            challenges: "no budget for staff".into(),
            industry: Some("Food & beverage".into()),
            experience_level: Some("  ".into()),
            urgency: None,
            budget: None,
        }
    }

    fn result(index: usize, key: &'static str, shape: Shape, value: Value) -> StageResult {
        StageResult {
            stage_index: index,
            stage_key: key,
            output: shape.validate(value).unwrap(),
            source: ResultSource::Parsed,
        }
    }

    #[test]
    fn request_context_skips_blank_optionals() {
        let ctx = request_context(&request());
        assert!(ctx.contains("Business goals: grow a bakery with AI"));
        assert!(ctx.contains("Industry: Food & beverage"));
        assert!(!ctx.contains("AI experience level"));
        assert!(!ctx.contains("Urgency"));
    }

    #[test]
    fn foundational_prompt_has_no_prior_context() {
        let prompt = business_analysis(&request(), &[]);
        assert!(!prompt.contains("verbatim"));
        assert!(prompt.contains(r#""summary""#));
    }

    #[test]
    fn later_prompts_quote_summary_and_prior_entries() {
        let prior = vec![
            result(
                0,
                "business_analysis",
                Shape::list("opportunities").with_required_text("summary"),
                json!({"summary": "A small bakery ready for automation.", "opportunities": []}),
            ),
            result(
                1,
                "ai_components",
                Shape::list("components"),
                json!({"components": [{"name": "Demand forecasting"}, "Chat ordering"]}),
            ),
        ];
        let prompt = recommended_tools(&request(), &prior);
        assert!(prompt.contains("A small bakery ready for automation."));
        assert!(prompt.contains("Already decided in ai_components: Demand forecasting; Chat ordering"));
    }

    #[test]
    fn builders_are_deterministic() {
        let req = request();
        assert_eq!(quick_wins(&req, &[]), quick_wins(&req, &[]));
    }
}
