#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use zapvendas_bot::engine::memory::InMemoryStore;
use zapvendas_bot::engine::store::EngineStore;
use zapvendas_bot::engine::FlowEngine;
use zapvendas_bot::gateway::MessageSender;
use zapvendas_bot::services::payment::{PaymentCoordinator, PixCharge, PixProvider, PixStatus};

/// Captures outbound messages instead of talking to the bridge.
#[derive(Default)]
pub struct RecordingSender {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .map(|(_, text)| text)
            .collect()
    }

    pub fn last(&self) -> String {
        self.texts().last().cloned().unwrap_or_default()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((to.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_image(&self, to: &str, path: &Path, _caption: Option<&str>) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((to.to_string(), format!("[image:{}]", path.display())));
        Ok(())
    }
}

/// PIX fake with a scriptable status.
pub struct ScriptedPix {
    status: Mutex<PixStatus>,
    counter: AtomicU64,
}

impl Default for ScriptedPix {
    fn default() -> Self {
        Self {
            status: Mutex::new(PixStatus::Pending),
            counter: AtomicU64::new(0),
        }
    }
}

impl ScriptedPix {
    pub fn set_status(&self, status: PixStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn charges_created(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PixProvider for ScriptedPix {
    async fn create_charge(
        &self,
        _amount: f64,
        _description: &str,
        _payer_email: &str,
    ) -> Result<PixCharge> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PixCharge {
            payment_ref: format!("pix-{}", n),
            code_payload: format!("00020126PIXCODE{}", n),
            expires_at: None,
        })
    }

    async fn charge_status(&self, _payment_ref: &str) -> Result<PixStatus> {
        Ok(*self.status.lock().unwrap())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub sender: Arc<RecordingSender>,
    pub pix: Arc<ScriptedPix>,
    pub payments: PaymentCoordinator,
    pub engine: FlowEngine,
}

pub fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let sender = Arc::new(RecordingSender::default());
    let pix = Arc::new(ScriptedPix::default());

    let store_dyn: Arc<dyn EngineStore> = store.clone();
    let sender_dyn: Arc<dyn MessageSender> = sender.clone();
    let payments = PaymentCoordinator::new(store_dyn.clone(), pix.clone(), 30);
    let engine = FlowEngine::new(store_dyn, sender_dyn, payments.clone());

    Harness {
        store,
        sender,
        pix,
        payments,
        engine,
    }
}
