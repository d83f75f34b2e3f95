use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn};
use zapvendas_db::models::flow::{ConversationData, ConversationStateRow, FlowStep, StepAction};
use zapvendas_db::models::store::User;
use zapvendas_db::utils::{is_group_jid, looks_like_redeem_code, normalize_phone, to_send_jid};

pub mod memory;
pub mod pg;
pub mod products;
pub mod session;
pub mod store;
pub mod template;
pub mod triggers;

use crate::error::DomainError;
use crate::gateway::MessageSender;
use crate::services::payment::PaymentCoordinator;
use crate::services::subscriptions::SubscriptionService;
use products::SubFlowNext;
use session::UserSessions;
use store::EngineStore;

const CANCEL_KEYWORDS: &[&str] = &["cancelar", "sair"];
const STATUS_KEYWORDS: &[&str] = &["status", "minha assinatura", "assinatura"];

const HELP_MESSAGE: &str = "Olá! 👋 Não entendi sua mensagem.\nEnvie *comprar* para conhecer nossos planos ou *status* para consultar sua assinatura.";
const CLOSING_MESSAGE: &str = "Atendimento encerrado. Quando precisar, é só mandar uma mensagem. 👋";
const CONTINUATION_PROMPT: &str =
    "Precisa de mais alguma coisa? Envie *cancelar* para encerrar o atendimento.";
const FALLBACK_MESSAGE: &str =
    "Desculpe, tivemos um problema ao processar sua mensagem. Tente novamente em instantes.";

/// The conversation state machine. One instance serves all users; per-user
/// processing is serialized through [`UserSessions`].
#[derive(Clone)]
pub struct FlowEngine {
    store: Arc<dyn EngineStore>,
    sender: Arc<dyn MessageSender>,
    payments: PaymentCoordinator,
    subscriptions: SubscriptionService,
    sessions: UserSessions,
}

impl FlowEngine {
    pub fn new(
        store: Arc<dyn EngineStore>,
        sender: Arc<dyn MessageSender>,
        payments: PaymentCoordinator,
    ) -> Self {
        let subscriptions = SubscriptionService::new(store.clone());
        Self {
            store,
            sender,
            payments,
            subscriptions,
            sessions: UserSessions::new(),
        }
    }

    /// Entry point for inbound messages. Errors degrade to a fallback reply
    /// and never cross back into the transport layer.
    pub async fn handle_message(&self, from: &str, body: &str) {
        if let Err(err) = self.process(from, body).await {
            error!(from = %from, error = %err, "Message processing failed");
            let _ = self
                .sender
                .send_text(&to_send_jid(from), FALLBACK_MESSAGE)
                .await;
        }
    }

    async fn process(&self, from: &str, body: &str) -> Result<()> {
        let text = body.trim();
        if from.is_empty() || text.is_empty() {
            return Ok(());
        }

        let settings = self.store.response_settings().await?;
        if !settings.active {
            return Ok(());
        }
        if is_group_jid(from) && !settings.respond_to_groups {
            return Ok(());
        }

        let phone = normalize_phone(from);
        if phone.is_empty() {
            return Ok(());
        }
        let reply_to = to_send_jid(from);

        if !settings.respond_to_saved_contacts || !settings.respond_to_unsaved_contacts {
            // Unknown contact status fails open.
            if let Ok(Some(saved)) = self.sender.contact_is_saved(&phone).await {
                if saved && !settings.respond_to_saved_contacts {
                    return Ok(());
                }
                if !saved && !settings.respond_to_unsaved_contacts {
                    return Ok(());
                }
            }
        }
        if settings.respond_only_with_keyword {
            if let Some(keyword) = settings.name_keyword.as_deref().filter(|k| !k.is_empty()) {
                match self.sender.check_keyword(&phone, keyword).await {
                    Ok(true) => {}
                    Ok(false) => return Ok(()),
                    Err(err) => {
                        warn!(error = %err, "Keyword check failed, allowing message");
                    }
                }
            }
        }

        let _guard = self.sessions.lock(&phone).await;
        let user = self.store.get_or_create_user(&phone).await?;

        let lower = text.to_lowercase();
        if CANCEL_KEYWORDS.contains(&lower.as_str()) {
            self.store.reset_conversation(user.id).await?;
            self.sender.send_text(&reply_to, CLOSING_MESSAGE).await?;
            return Ok(());
        }
        if STATUS_KEYWORDS.contains(&lower.as_str()) {
            // Lossy fragment lookup on purpose, see
            // UserRepository::find_by_number_fragment.
            let message = self.subscriptions.status_message_for_phone(&phone).await?;
            self.sender.send_text(&reply_to, &message).await?;
            return Ok(());
        }

        if looks_like_redeem_code(text) {
            return self.handle_redeem(&user, &reply_to, text).await;
        }

        let state = self.store.conversation(user.id).await?;
        if state.is_idle() {
            let triggers = self.store.active_triggers().await?;
            match triggers::resolve(text, &triggers) {
                Some(flow_id) => {
                    info!(user_id = user.id, flow_id, "Trigger matched, starting flow");
                    self.start_flow(&user, &reply_to, flow_id, ConversationData::default())
                        .await
                }
                None => {
                    self.sender.send_text(&reply_to, HELP_MESSAGE).await?;
                    Ok(())
                }
            }
        } else {
            self.advance(&user, &reply_to, &state, text).await
        }
    }

    async fn handle_redeem(&self, user: &User, reply_to: &str, code: &str) -> Result<()> {
        match self.payments.redeem(code, &user.whatsapp_number).await {
            Ok(outcome) => {
                self.store.reset_conversation(user.id).await?;
                let mut message = String::from("✅ Código resgatado com sucesso!");
                if let Some(product) = &outcome.product {
                    message.push_str(&format!("\nPlano: *{}*", product.name));
                }
                if let Some(sub) = &outcome.subscription {
                    message.push_str(&format!(
                        "\nSua assinatura está ativa até {}.",
                        sub.expiry_date.format("%d/%m/%Y")
                    ));
                }
                self.sender.send_text(reply_to, &message).await?;
                Ok(())
            }
            Err(DomainError::Conflict(_)) => {
                self.sender
                    .send_text(
                        reply_to,
                        "❌ Código inválido ou já utilizado. Confira o código e tente novamente.",
                    )
                    .await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn start_flow(
        &self,
        user: &User,
        reply_to: &str,
        flow_id: i64,
        mut data: ConversationData,
    ) -> Result<()> {
        let flow = match self.store.get_flow(flow_id).await? {
            Some(flow) => flow,
            None => {
                warn!(flow_id, "Trigger points at missing or inactive flow");
                self.store.reset_conversation(user.id).await?;
                self.sender.send_text(reply_to, HELP_MESSAGE).await?;
                return Ok(());
            }
        };
        let first = match self.store.first_step(flow.id).await? {
            Some(step) => step,
            None => {
                warn!(flow_id = flow.id, "Flow has no first step");
                self.store.reset_conversation(user.id).await?;
                self.sender.send_text(reply_to, HELP_MESSAGE).await?;
                return Ok(());
            }
        };

        data.flow_started = true;
        self.seed_subscription_vars(user, &mut data).await?;

        let rendered = template::render(&first.message_template, &data.vars);
        self.sender.send_text(reply_to, &rendered).await?;

        if first.action() == StepAction::ShowProducts {
            let listing = products::enter_listing(&self.store, &mut data).await?;
            self.sender.send_text(reply_to, &listing).await?;
        }

        self.store.enter_step(user.id, flow.id, first.id, &data).await?;
        Ok(())
    }

    /// Makes the user's current subscription available to templates, so
    /// renewal flows can substitute `{product_name}` and friends.
    async fn seed_subscription_vars(&self, user: &User, data: &mut ConversationData) -> Result<()> {
        let subs = self.store.active_subscriptions(user.id).await?;
        let sub = match subs.first() {
            Some(sub) => sub,
            None => return Ok(()),
        };
        let days_left = (sub.expiry_date - chrono::Utc::now()).num_days().max(0);
        let product_name = self
            .store
            .get_product(sub.product_id)
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| "assinatura".to_string());
        data.vars.insert("product_name".to_string(), product_name);
        data.vars
            .insert("days_until_expiry".to_string(), days_left.to_string());
        data.vars.insert(
            "expiry_date".to_string(),
            sub.expiry_date.format("%d/%m/%Y").to_string(),
        );
        Ok(())
    }

    async fn advance(
        &self,
        user: &User,
        reply_to: &str,
        state: &ConversationStateRow,
        input: &str,
    ) -> Result<()> {
        let step_id = match state.current_step_id {
            Some(id) => id,
            None => {
                self.store.reset_conversation(user.id).await?;
                self.sender.send_text(reply_to, HELP_MESSAGE).await?;
                return Ok(());
            }
        };
        let step = match self.store.get_step(step_id).await? {
            Some(step) => step,
            None => {
                warn!(step_id, "Conversation cursor points at missing step");
                self.store.reset_conversation(user.id).await?;
                self.sender.send_text(reply_to, HELP_MESSAGE).await?;
                return Ok(());
            }
        };
        let mut data = state.parsed_data();

        if !step.accepts(input) {
            let options = step.expected_list().join(", ");
            self.sender
                .send_text(
                    reply_to,
                    &format!("Opção inválida. Respostas válidas: {}", options),
                )
                .await?;
            return Ok(());
        }

        match step.action() {
            StepAction::ShowProducts => {
                let reply =
                    products::handle_input(&self.store, &self.payments, user, &mut data, input)
                        .await?;
                for message in &reply.messages {
                    self.sender.send_text(reply_to, message).await?;
                }
                match reply.next {
                    SubFlowNext::Stay => self.store.save_data(user.id, &data).await?,
                    SubFlowNext::Reset => self.store.reset_conversation(user.id).await?,
                }
                return Ok(());
            }
            StepAction::CollectInput => {
                data.vars
                    .insert(format!("step_{}", step.step_order), input.trim().to_string());
            }
            StepAction::Message | StepAction::Other => {}
        }

        self.advance_from(user, reply_to, &step, data).await
    }

    async fn advance_from(
        &self,
        user: &User,
        reply_to: &str,
        step: &FlowStep,
        mut data: ConversationData,
    ) -> Result<()> {
        if let Some(next_id) = step.next_step_id {
            if let Some(next) = self.store.get_step(next_id).await? {
                let rendered = template::render(&next.message_template, &data.vars);
                self.sender.send_text(reply_to, &rendered).await?;
                if next.action() == StepAction::ShowProducts {
                    let listing = products::enter_listing(&self.store, &mut data).await?;
                    self.sender.send_text(reply_to, &listing).await?;
                }
                self.store.enter_step(user.id, next.flow_id, next.id, &data).await?;
                return Ok(());
            }
            warn!(next_id, "Dangling successor step reference");
        }

        if let Some(next_flow) = step.next_flow_id {
            return self.start_flow(user, reply_to, next_flow, data).await;
        }

        if step.action().waits_at_dead_end() {
            self.store.save_data(user.id, &data).await?;
            self.sender.send_text(reply_to, CONTINUATION_PROMPT).await?;
        } else {
            self.store.reset_conversation(user.id).await?;
            self.sender.send_text(reply_to, CLOSING_MESSAGE).await?;
        }
        Ok(())
    }

    /// Gateway webhook path: settle the referenced payment and notify the
    /// payer, mirroring what a VERIFICAR turn would have done.
    pub async fn handle_payment_notification(&self, payment_ref: &str) -> Result<()> {
        let transaction = match self.store.get_transaction_by_payment_ref(payment_ref).await? {
            Some(transaction) => transaction,
            None => {
                debug!(payment_ref, "Notification for unknown payment ref");
                return Ok(());
            }
        };

        let user = match transaction.user_id {
            Some(id) => self.store.get_user(id).await?,
            None => None,
        };
        // Same session lock as inbound turns: the settle and the state reset
        // must not interleave with an in-flight message for this user.
        let _guard = match &user {
            Some(user) => Some(self.sessions.lock(&user.whatsapp_number).await),
            None => None,
        };

        let outcome = self
            .payments
            .poll_status(transaction.id)
            .await
            .map_err(anyhow::Error::from)?;
        if !(outcome.approved && outcome.first_settle) {
            return Ok(());
        }

        let user = match user {
            Some(user) => user,
            None => return Ok(()),
        };

        let mut message = String::from("✅ Pagamento confirmado!");
        if let Some(code) = &outcome.code {
            message.push_str(&format!("\nSeu código de acesso: *{}*", code.code));
        }
        if let Some(sub) = &outcome.subscription {
            message.push_str(&format!(
                "\nSua assinatura está ativa até {}.",
                sub.expiry_date.format("%d/%m/%Y")
            ));
        }
        message.push_str("\nObrigado! 🎉");

        self.sender
            .send_text(&to_send_jid(&user.whatsapp_number), &message)
            .await?;
        self.store.reset_conversation(user.id).await?;
        Ok(())
    }
}
