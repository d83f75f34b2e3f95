use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatbotFlow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub active: bool,
}

/// Step action kinds. Stored as text; anything unrecognized terminates the
/// flow at a dead end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Message,
    CollectInput,
    ShowProducts,
    Other,
}

impl StepAction {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "message" => StepAction::Message,
            "collect_input" => StepAction::CollectInput,
            "show_products" => StepAction::ShowProducts,
            _ => StepAction::Other,
        }
    }

    /// Actions that hold the cursor at a dead end instead of resetting.
    pub fn waits_at_dead_end(self) -> bool {
        matches!(
            self,
            StepAction::Message | StepAction::CollectInput | StepAction::ShowProducts
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlowStep {
    pub id: i64,
    pub flow_id: i64,
    pub step_order: i32,
    pub message_template: String,
    /// Comma-separated accepted replies; `*` disables validation.
    pub expected_responses: Option<String>,
    pub action_type: String,
    /// Explicit successor, decided at flow-authoring time.
    pub next_step_id: Option<i64>,
    pub next_flow_id: Option<i64>,
}

impl FlowStep {
    pub fn action(&self) -> StepAction {
        StepAction::parse(&self.action_type)
    }

    pub fn expected_list(&self) -> Vec<String> {
        self.expected_responses
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// An input is acceptable when no expectation is set, the wildcard is
    /// present, or the lowercased input is listed.
    pub fn accepts(&self, input: &str) -> bool {
        let expected = self.expected_list();
        expected.is_empty()
            || expected.iter().any(|e| e == "*")
            || expected.contains(&input.to_lowercase())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlowTrigger {
    pub id: i64,
    pub flow_id: i64,
    pub keyword: String,
    pub is_exact_match: bool,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationStateRow {
    pub id: i64,
    pub user_id: i64,
    pub current_flow_id: Option<i64>,
    pub current_step_id: Option<i64>,
    pub last_message_timestamp: DateTime<Utc>,
    /// JSON-serialized [`ConversationData`].
    pub data: String,
}

impl ConversationStateRow {
    pub fn is_idle(&self) -> bool {
        self.current_flow_id.is_none() || self.current_step_id.is_none()
    }

    pub fn parsed_data(&self) -> ConversationData {
        serde_json::from_str(&self.data).unwrap_or_default()
    }
}

/// Typed scratch space for the in-progress flow. Persisted as JSON text in
/// `user_conversation_states.data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationData {
    #[serde(default)]
    pub flow_started: bool,
    /// Template substitution keys: `step_{order}` collected inputs plus
    /// flow-seed values.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_selection: Option<ProductSelectionState>,
}

impl ConversationData {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Sub-state for `show_products` steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductSelectionState {
    /// Snapshot of the listing shown to the user, in display order.
    pub listing: Vec<ListedProduct>,
    pub selected: Option<SelectedProduct>,
    pub payment: Option<PendingPayment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListedProduct {
    pub product_id: i64,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedProduct {
    pub product_id: i64,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPayment {
    pub transaction_id: i64,
    pub payment_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResponseSettings {
    pub id: i64,
    pub respond_to_groups: bool,
    pub respond_to_unsaved_contacts: bool,
    pub respond_to_saved_contacts: bool,
    pub respond_only_with_keyword: bool,
    pub name_keyword: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ResponseSettings {
    fn default() -> Self {
        Self {
            id: 0,
            respond_to_groups: true,
            respond_to_unsaved_contacts: true,
            respond_to_saved_contacts: true,
            respond_only_with_keyword: false,
            name_keyword: None,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_responses_parsing() {
        let step = FlowStep {
            id: 1,
            flow_id: 1,
            step_order: 1,
            message_template: String::new(),
            expected_responses: Some("Sim, Não , TALVEZ".to_string()),
            action_type: "message".to_string(),
            next_step_id: None,
            next_flow_id: None,
        };
        assert!(step.accepts("sim"));
        assert!(step.accepts("NÃO"));
        assert!(!step.accepts("depois"));
    }

    #[test]
    fn wildcard_and_empty_accept_anything() {
        let mut step = FlowStep {
            id: 1,
            flow_id: 1,
            step_order: 1,
            message_template: String::new(),
            expected_responses: Some("sim,*".to_string()),
            action_type: "message".to_string(),
            next_step_id: None,
            next_flow_id: None,
        };
        assert!(step.accepts("qualquer coisa"));
        step.expected_responses = None;
        assert!(step.accepts("qualquer coisa"));
    }

    #[test]
    fn conversation_data_round_trips_through_json() {
        let mut data = ConversationData {
            flow_started: true,
            ..Default::default()
        };
        data.vars.insert("step_2".into(), "maria".into());
        data.product_selection = Some(ProductSelectionState {
            listing: vec![ListedProduct {
                product_id: 7,
                name: "Plano Mensal".into(),
                price: 29.9,
            }],
            selected: None,
            payment: Some(PendingPayment {
                transaction_id: 42,
                payment_ref: "mp-123".into(),
            }),
        });

        let parsed: ConversationData = serde_json::from_str(&data.to_json()).unwrap();
        assert!(parsed.flow_started);
        assert_eq!(parsed.vars.get("step_2").unwrap(), "maria");
        let sel = parsed.product_selection.unwrap();
        assert_eq!(sel.listing[0].product_id, 7);
        assert_eq!(sel.payment.unwrap().transaction_id, 42);
    }

    #[test]
    fn legacy_empty_blob_parses_as_default() {
        let row = ConversationStateRow {
            id: 1,
            user_id: 1,
            current_flow_id: None,
            current_step_id: None,
            last_message_timestamp: Utc::now(),
            data: "{}".to_string(),
        };
        let data = row.parsed_data();
        assert!(!data.flow_started);
        assert!(data.vars.is_empty());
    }
}
