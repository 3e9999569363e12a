//! In-memory notifier for integration testing.
//!
//! Records every event it is handed and can be told to fail, so tests can
//! check who was notified without any network transport.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use morph::notify::{LedgerEvent, Notifier};

#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, LedgerEvent)>>>,
    /// If set, every delivery fails with this message.
    force_error: Arc<Mutex<Option<String>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, LedgerEvent)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sent().into_iter().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }

    pub fn set_error(&self, error: Option<&str>) {
        *self.force_error.lock().unwrap() = error.map(str::to_string);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: &str, event: &LedgerEvent) -> Result<()> {
        if let Some(e) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(e));
        }
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), event.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_records_and_fails_on_demand() {
        let notifier = RecordingNotifier::new();
        let event = LedgerEvent::Earnings { total_staked: dec!(1), total_earned: dec!(0.1) };
        notifier.notify("a", &event).await.unwrap();

        notifier.set_error(Some("offline"));
        assert!(notifier.notify("b", &event).await.is_err());
        assert_eq!(notifier.recipients(), vec!["a".to_string()]);
    }
}
