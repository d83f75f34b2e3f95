use std::sync::Arc;

use anyhow::Result;
use tracing::warn;
use zapvendas_db::models::flow::{
    ConversationData, ListedProduct, PendingPayment, ProductSelectionState, SelectedProduct,
};
use zapvendas_db::models::store::User;

use crate::engine::store::EngineStore;
use crate::error::DomainError;
use crate::services::payment::PaymentCoordinator;

/// What the engine should do with the conversation after a sub-flow turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFlowNext {
    /// Stay on the current step; more turns follow.
    Stay,
    /// Purchase complete (or nothing left to do): reset to idle.
    Reset,
}

#[derive(Debug)]
pub struct SubFlowReply {
    pub messages: Vec<String>,
    pub next: SubFlowNext,
}

impl SubFlowReply {
    fn stay(messages: Vec<String>) -> Self {
        Self {
            messages,
            next: SubFlowNext::Stay,
        }
    }
}

pub fn format_price(price: f64) -> String {
    format!("{:.2}", price).replace('.', ",")
}

fn render_listing(listing: &[ListedProduct]) -> String {
    let mut out = String::from("🛍️ *Nossos planos:*\n");
    for (idx, product) in listing.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. {} - R$ {}",
            idx + 1,
            product.name,
            format_price(product.price)
        ));
    }
    out.push_str("\n\nEnvie o *número* do plano desejado.");
    out
}

async fn build_listing(
    store: &Arc<dyn EngineStore>,
) -> Result<Option<(Vec<ListedProduct>, String)>> {
    let products = store.active_products().await?;
    if products.is_empty() {
        return Ok(None);
    }
    let listing: Vec<ListedProduct> = products
        .iter()
        .map(|p| ListedProduct {
            product_id: p.id,
            name: p.name.clone(),
            price: p.price,
        })
        .collect();
    let message = render_listing(&listing);
    Ok(Some((listing, message)))
}

const NO_PRODUCTS_MESSAGE: &str =
    "No momento não temos planos disponíveis. Tente novamente mais tarde.";

/// Builds the listing snapshot on first entry to a `show_products` step and
/// returns the listing message.
pub async fn enter_listing(
    store: &Arc<dyn EngineStore>,
    data: &mut ConversationData,
) -> Result<String> {
    match build_listing(store).await? {
        Some((listing, message)) => {
            data.product_selection = Some(ProductSelectionState {
                listing,
                selected: None,
                payment: None,
            });
            Ok(message)
        }
        None => {
            data.product_selection = None;
            Ok(NO_PRODUCTS_MESSAGE.into())
        }
    }
}

/// One turn of the product-selection sub-flow. Mutates the selection state
/// in `data`; the caller persists it (or resets on [`SubFlowNext::Reset`]).
pub async fn handle_input(
    store: &Arc<dyn EngineStore>,
    payments: &PaymentCoordinator,
    user: &User,
    data: &mut ConversationData,
    input: &str,
) -> Result<SubFlowReply> {
    if data.product_selection.is_none() {
        let listing = enter_listing(store, data).await?;
        return Ok(SubFlowReply::stay(vec![listing]));
    }

    let normalized = input.trim().to_lowercase();

    if normalized == "confirmar" {
        return confirm_purchase(store, payments, user, data).await;
    }
    if normalized == "verificar" {
        return verify_payment(store, payments, data).await;
    }
    if let Ok(index) = normalized.parse::<usize>() {
        return select_product(store, user, data, index).await;
    }

    relist(store, data).await
}

/// Re-renders the listing without discarding an in-progress selection or
/// pending payment.
async fn relist(
    store: &Arc<dyn EngineStore>,
    data: &mut ConversationData,
) -> Result<SubFlowReply> {
    let message = match build_listing(store).await? {
        Some((listing, message)) => {
            match data.product_selection.as_mut() {
                Some(selection) => selection.listing = listing,
                None => {
                    data.product_selection = Some(ProductSelectionState {
                        listing,
                        selected: None,
                        payment: None,
                    })
                }
            }
            message
        }
        None => NO_PRODUCTS_MESSAGE.into(),
    };
    Ok(SubFlowReply::stay(vec![message]))
}

/// Re-list with an explanation of what went wrong first.
async fn relist_with_notice(
    store: &Arc<dyn EngineStore>,
    data: &mut ConversationData,
    notice: &str,
) -> Result<SubFlowReply> {
    let mut reply = relist(store, data).await?;
    reply.messages.insert(0, notice.to_string());
    Ok(reply)
}

async fn select_product(
    store: &Arc<dyn EngineStore>,
    user: &User,
    data: &mut ConversationData,
    index: usize,
) -> Result<SubFlowReply> {
    let listing = match data.product_selection.as_ref() {
        Some(s) => s.listing.clone(),
        None => return relist(store, data).await,
    };

    let listed = match index.checked_sub(1).and_then(|i| listing.get(i)).cloned() {
        Some(p) => p,
        None => {
            return relist_with_notice(
                store,
                data,
                "Número inválido. Escolha uma das opções abaixo.",
            )
            .await;
        }
    };

    if let Some(selection) = data.product_selection.as_mut() {
        selection.selected = Some(SelectedProduct {
            product_id: listed.product_id,
            name: listed.name.clone(),
            price: listed.price,
        });
        selection.payment = None;
    }

    let already_active = store
        .active_subscriptions(user.id)
        .await?
        .iter()
        .any(|s| s.product_id == listed.product_id);
    let renewal_notice = if already_active {
        "\nVocê já possui uma assinatura ativa deste plano; a renovação estende a validade atual."
    } else {
        ""
    };

    Ok(SubFlowReply::stay(vec![format!(
        "Você escolheu *{}* por R$ {}.{}\n\nEnvie *CONFIRMAR* para gerar o pagamento ou *CANCELAR* para sair.",
        listed.name,
        format_price(listed.price),
        renewal_notice
    )]))
}

async fn confirm_purchase(
    store: &Arc<dyn EngineStore>,
    payments: &PaymentCoordinator,
    user: &User,
    data: &mut ConversationData,
) -> Result<SubFlowReply> {
    let selected = match data
        .product_selection
        .as_ref()
        .and_then(|s| s.selected.clone())
    {
        Some(s) => s,
        None => return relist_with_notice(store, data, NO_SELECTION_MESSAGE).await,
    };

    let product = zapvendas_db::models::store::Product {
        id: selected.product_id,
        name: selected.name.clone(),
        description: String::new(),
        price: selected.price,
        active: true,
    };
    let payer_email = format!("{}@zap.zapvendas.com.br", user.whatsapp_number);

    match payments.create_charge(user.id, &product, &payer_email).await {
        Ok(ticket) => {
            if let Some(selection) = data.product_selection.as_mut() {
                selection.payment = Some(PendingPayment {
                    transaction_id: ticket.transaction_id,
                    payment_ref: ticket.payment_ref.clone(),
                });
            }
            let expiry_note = ticket
                .expires_at
                .map(|dt| format!("\nO código expira em {}.", dt.format("%d/%m/%Y %H:%M")))
                .unwrap_or_default();
            Ok(SubFlowReply::stay(vec![
                format!(
                    "💳 Pagamento PIX gerado!\nValor: R$ {}\n\nCopie o código da próxima mensagem e pague no app do seu banco.{}\nDepois envie *VERIFICAR* para confirmar.",
                    format_price(selected.price),
                    expiry_note
                ),
                ticket.code_payload,
            ]))
        }
        Err(err) => {
            warn!(user_id = user.id, error = %err, "PIX charge creation failed");
            Ok(SubFlowReply::stay(vec![
                "Desculpe, não consegui gerar o pagamento agora. Tente novamente em instantes."
                    .into(),
            ]))
        }
    }
}

async fn verify_payment(
    store: &Arc<dyn EngineStore>,
    payments: &PaymentCoordinator,
    data: &mut ConversationData,
) -> Result<SubFlowReply> {
    let pending = match data
        .product_selection
        .as_ref()
        .and_then(|s| s.payment.clone())
    {
        Some(p) => p,
        None => {
            return relist_with_notice(
                store,
                data,
                "Nenhum pagamento pendente. Envie *CONFIRMAR* primeiro para gerar o PIX.",
            )
            .await;
        }
    };

    match payments.poll_status(pending.transaction_id).await {
        Ok(outcome) if outcome.approved => {
            let mut message = String::from("✅ Pagamento confirmado!");
            match &outcome.code {
                Some(code) => {
                    message.push_str(&format!("\nSeu código de acesso: *{}*", code.code))
                }
                None => message.push_str(
                    "\nSeu código de acesso será enviado em instantes pela nossa equipe.",
                ),
            }
            if let Some(sub) = &outcome.subscription {
                message.push_str(&format!(
                    "\nSua assinatura está ativa até {}.",
                    sub.expiry_date.format("%d/%m/%Y")
                ));
            }
            message.push_str("\nObrigado! 🎉");
            Ok(SubFlowReply {
                messages: vec![message],
                next: SubFlowNext::Reset,
            })
        }
        Ok(outcome) => match outcome.status {
            crate::services::payment::PixStatus::Rejected
            | crate::services::payment::PixStatus::Cancelled => {
                if let Some(selection) = data.product_selection.as_mut() {
                    selection.payment = None;
                }
                Ok(SubFlowReply::stay(vec![
                    "❌ O pagamento não foi aprovado. Envie *CONFIRMAR* para gerar um novo PIX."
                        .into(),
                ]))
            }
            _ => Ok(SubFlowReply::stay(vec![
                "⏳ Pagamento ainda não confirmado. Aguarde alguns instantes e envie *VERIFICAR* novamente."
                    .into(),
            ])),
        },
        Err(DomainError::ExternalUnavailable(err)) => {
            warn!(error = %err, "PIX status poll failed");
            Ok(SubFlowReply::stay(vec![
                "Não consegui consultar o pagamento agora. Tente *VERIFICAR* novamente em instantes."
                    .into(),
            ]))
        }
        Err(err) => Err(err.into()),
    }
}

const NO_SELECTION_MESSAGE: &str =
    "Escolha um plano primeiro enviando o número correspondente.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_uses_brazilian_decimal_comma() {
        assert_eq!(format_price(29.9), "29,90");
        assert_eq!(format_price(100.0), "100,00");
    }

    #[test]
    fn listing_is_one_based() {
        let listing = vec![
            ListedProduct {
                product_id: 7,
                name: "Plano Mensal".into(),
                price: 29.9,
            },
            ListedProduct {
                product_id: 9,
                name: "Plano Anual".into(),
                price: 299.0,
            },
        ];
        let rendered = render_listing(&listing);
        assert!(rendered.contains("1. Plano Mensal - R$ 29,90"));
        assert!(rendered.contains("2. Plano Anual - R$ 299,00"));
    }
}
