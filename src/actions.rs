//! Canned prompt templates.
//!
//! The catalog is fixed at construction. `list` substitutes `{placeholder}`
//! tokens in each prompt from a caller-supplied context object; anything it
//! cannot resolve stays verbatim, and rendering never fails.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// A predefined prompt surfaced to reduce typing for common requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickAction {
    /// Unique within the catalog.
    pub id: String,
    /// Short UI label.
    pub label: String,
    /// Prompt template; may embed `{placeholder}` tokens.
    pub prompt: String,
}

/// Fixed set of quick actions.
pub struct QuickActionCatalog {
    actions: Vec<QuickAction>,
}

impl QuickActionCatalog {
    /// The built-in relationship-management catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_actions(builtin_actions())
    }

    /// Catalog from caller-supplied actions.
    ///
    /// Ids must be unique; a later action reusing an id is dropped with a
    /// warning rather than shadowing the first.
    #[must_use]
    pub fn from_actions(actions: Vec<QuickAction>) -> Self {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for action in actions {
            if seen.insert(action.id.clone()) {
                kept.push(action);
            } else {
                warn!(id = %action.id, "dropping quick action with duplicate id");
            }
        }
        Self { actions: kept }
    }

    /// The catalog, with prompts rendered against `context` when given.
    #[must_use]
    pub fn list(
        &self,
        context: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Vec<QuickAction> {
        match context {
            None => self.actions.clone(),
            Some(ctx) => self
                .actions
                .iter()
                .map(|action| QuickAction {
                    id: action.id.clone(),
                    label: action.label.clone(),
                    prompt: render_template(&action.prompt, ctx),
                })
                .collect(),
        }
    }

    /// Number of actions in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for QuickActionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Substitute `{key}` tokens from `context`; unresolved tokens stay verbatim.
fn render_template(
    template: &str,
    context: &serde_json::Map<String, serde_json::Value>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            // Unterminated token: keep the tail as-is.
            out.push_str(&rest[open..]);
            return out;
        };
        let key = &after[..close];
        match context.get(key) {
            Some(value) => out.push_str(&render_value(value)),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn builtin_actions() -> Vec<QuickAction> {
    let action = |id: &str, label: &str, prompt: &str| QuickAction {
        id: id.to_owned(),
        label: label.to_owned(),
        prompt: prompt.to_owned(),
    };
    vec![
        action(
            "summarize-company",
            "Summarize relationship",
            "Summarize our current relationship with {company}: recent visits, \
             open goals, and anything that needs attention.",
        ),
        action(
            "draft-follow-up",
            "Draft follow-up email",
            "Draft a short, professional follow-up email to {contact} at \
             {company}, recapping our last conversation and proposing next steps.",
        ),
        action(
            "visit-prep",
            "Prepare for visit",
            "Prepare talking points for my next visit to {company}. Focus on \
             their stated goals: {goals}.",
        ),
        action(
            "assess-products",
            "Suggest products",
            "Based on {company}'s profile and recent activity, which of our \
             banking products would be worth proposing?",
        ),
        action(
            "risk-review",
            "Review risk signals",
            "Review the recent activity for {company} and flag anything that \
             looks like a churn or credit risk signal.",
        ),
        action(
            "next-action",
            "Next best action",
            "Given the notes from recent visits to {company}, what is the \
             single next best action for the relationship manager?",
        ),
    ]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn ctx(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    // ── catalog ──────────────────────────────────────────────────────────

    #[test]
    fn builtin_catalog_has_unique_ids() {
        let catalog = QuickActionCatalog::builtin();
        assert!(!catalog.is_empty());

        let listed = catalog.list(None);
        let mut ids: Vec<&str> = listed.iter().map(|a| a.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), listed.len());
    }

    #[test]
    fn duplicate_ids_keep_the_first_entry() {
        let catalog = QuickActionCatalog::from_actions(vec![
            QuickAction {
                id: "a".into(),
                label: "first".into(),
                prompt: "one".into(),
            },
            QuickAction {
                id: "a".into(),
                label: "second".into(),
                prompt: "two".into(),
            },
        ]);
        let listed = catalog.list(None);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].label, "first");
    }

    #[test]
    fn list_without_context_is_verbatim() {
        let listed = QuickActionCatalog::builtin().list(None);
        assert!(listed.iter().any(|a| a.prompt.contains("{company}")));
    }

    // ── template rendering ───────────────────────────────────────────────

    #[test]
    fn placeholders_substitute_from_context() {
        let context = ctx(&[("company", serde_json::json!("Acme Savings"))]);
        let listed = QuickActionCatalog::builtin().list(Some(&context));

        let summary = listed
            .iter()
            .find(|a| a.id == "summarize-company")
            .unwrap();
        assert!(summary.prompt.contains("Acme Savings"));
        assert!(!summary.prompt.contains("{company}"));
    }

    #[test]
    fn unresolved_placeholders_stay_verbatim() {
        let context = ctx(&[("company", serde_json::json!("Acme Savings"))]);
        let listed = QuickActionCatalog::builtin().list(Some(&context));

        let prep = listed.iter().find(|a| a.id == "visit-prep").unwrap();
        assert!(prep.prompt.contains("Acme Savings"));
        assert!(prep.prompt.contains("{goals}"), "missing key stays as-is");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let context = ctx(&[("count", serde_json::json!(3))]);
        assert_eq!(render_template("{count} visits", &context), "3 visits");
    }

    #[test]
    fn empty_context_renders_verbatim() {
        let context = serde_json::Map::new();
        assert_eq!(
            render_template("call {contact} today", &context),
            "call {contact} today"
        );
    }

    #[test]
    fn unterminated_brace_is_kept() {
        let context = ctx(&[("a", serde_json::json!("x"))]);
        assert_eq!(render_template("keep {a} and {tail", &context), "keep x and {tail");
    }

    #[test]
    fn adjacent_placeholders_render() {
        let context = ctx(&[
            ("a", serde_json::json!("1")),
            ("b", serde_json::json!("2")),
        ]);
        assert_eq!(render_template("{a}{b}", &context), "12");
    }
}
