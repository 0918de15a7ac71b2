//! Detection notifications.

use anyhow::Result;

use crate::config::NotifySettings;

/// Announces a qualifying detection to an outside service.
pub trait Notifier: Send {
    fn name(&self) -> &str;

    fn notify(&mut self, label: &str, confidence: f32, zone_id: u32) -> Result<()>;
}

/// Notifier for the configured `notify` section, if any.
pub fn build_notifier(settings: Option<&NotifySettings>) -> Result<Option<Box<dyn Notifier>>> {
    match settings {
        None => Ok(None),
        Some(settings) => build_webhook(settings).map(Some),
    }
}

#[cfg(feature = "http")]
fn build_webhook(settings: &NotifySettings) -> Result<Box<dyn Notifier>> {
    Ok(Box::new(webhook::WebhookNotifier::new(settings)?))
}

#[cfg(not(feature = "http"))]
fn build_webhook(_settings: &NotifySettings) -> Result<Box<dyn Notifier>> {
    Err(anyhow::anyhow!("detection notifications require the http feature"))
}

#[cfg(feature = "http")]
pub mod webhook {
    use anyhow::{Context, Result};
    use serde_json::{json, Value};
    use std::time::Duration;
    use url::Url;

    use super::Notifier;
    use crate::config::NotifySettings;

    /// JSON webhook in the IFTTT maker format (`value1`..`value3`).
    pub struct WebhookNotifier {
        url: String,
        agent: ureq::Agent,
    }

    impl WebhookNotifier {
        pub fn new(settings: &NotifySettings) -> Result<Self> {
            let url = Url::parse(&settings.url)
                .with_context(|| format!("invalid notify url '{}'", settings.url))?;
            Ok(Self {
                url: url.to_string(),
                agent: ureq::AgentBuilder::new()
                    .timeout(Duration::from_secs(10))
                    .build(),
            })
        }
    }

    pub(crate) fn request_body(label: &str, confidence: f32, zone_id: u32) -> Value {
        json!({
            "value1": label,
            "value2": format!("{:.4}", confidence),
            "value3": zone_id.to_string(),
        })
    }

    impl Notifier for WebhookNotifier {
        fn name(&self) -> &str {
            "webhook"
        }

        fn notify(&mut self, label: &str, confidence: f32, zone_id: u32) -> Result<()> {
            self.agent
                .post(&self.url)
                .send_json(request_body(label, confidence, zone_id))
                .with_context(|| format!("notify webhook {} failed", self.url))?;
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn body_carries_label_confidence_and_zone() {
            let body = request_body("Pigeon", 0.97123, 4);
            assert_eq!(
                body,
                json!({"value1": "Pigeon", "value2": "0.9712", "value3": "4"})
            );
        }

        #[test]
        fn invalid_url_rejected_at_construction() {
            let settings = NotifySettings {
                url: "maker ifttt".to_string(),
            };
            assert!(WebhookNotifier::new(&settings).is_err());
            let settings = NotifySettings {
                url: "https://maker.ifttt.com/trigger/tilewatch_detect/with/key/abc".to_string(),
            };
            assert_eq!(WebhookNotifier::new(&settings).unwrap().name(), "webhook");
        }
    }
}
