//! Physical deterrents.
//!
//! A deterrent gets one best-effort activation per qualifying detection. There
//! is no retry; the caller logs failures and moves on.

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::config::DeterrentSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeterrentKind {
    /// Dry run: log the activation only.
    Log,
    /// LinkTap water timer in instant mode (feature: http).
    #[serde(rename = "linktap")]
    LinkTap,
}

pub trait Deterrent: Send {
    fn name(&self) -> &str;

    fn activate(&mut self, seconds: u32, reason: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct LogDeterrent {
    activations: u64,
}

impl LogDeterrent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activations(&self) -> u64 {
        self.activations
    }
}

impl Deterrent for LogDeterrent {
    fn name(&self) -> &str {
        "log"
    }

    fn activate(&mut self, seconds: u32, reason: &str) -> Result<()> {
        self.activations += 1;
        log::info!("[dry run] deterring {} for {}s", reason, seconds);
        Ok(())
    }
}

pub fn build_deterrent(settings: &DeterrentSettings) -> Result<Box<dyn Deterrent>> {
    match settings.kind {
        DeterrentKind::Log => Ok(Box::new(LogDeterrent::new())),
        DeterrentKind::LinkTap => build_linktap(settings),
    }
}

#[cfg(feature = "http")]
fn build_linktap(settings: &DeterrentSettings) -> Result<Box<dyn Deterrent>> {
    let linktap = settings
        .linktap
        .clone()
        .ok_or_else(|| anyhow!("deterrent kind linktap requires a deterrent.linktap section"))?;
    Ok(Box::new(linktap::LinkTapDeterrent::new(linktap)))
}

#[cfg(not(feature = "http"))]
fn build_linktap(_settings: &DeterrentSettings) -> Result<Box<dyn Deterrent>> {
    Err(anyhow!("the linktap deterrent requires the http feature"))
}

#[cfg(feature = "http")]
pub mod linktap {
    use anyhow::{anyhow, Context, Result};
    use serde::Deserialize;
    use serde_json::{json, Value};
    use std::time::Duration;

    use super::Deterrent;
    use crate::config::LinkTapSettings;

    /// Starts a LinkTap water timer for a fixed number of seconds.
    pub struct LinkTapDeterrent {
        settings: LinkTapSettings,
        agent: ureq::Agent,
    }

    #[derive(Debug, Deserialize)]
    struct LinkTapReply {
        result: String,
        #[serde(default)]
        message: Option<String>,
    }

    impl LinkTapDeterrent {
        pub fn new(settings: LinkTapSettings) -> Self {
            Self {
                settings,
                agent: ureq::AgentBuilder::new()
                    .timeout(Duration::from_secs(10))
                    .build(),
            }
        }

        pub(crate) fn request_body(&self, seconds: u32) -> Value {
            json!({
                "username": self.settings.username,
                "apiKey": self.settings.api_key,
                "gatewayId": self.settings.gateway_id,
                "taplinkerId": self.settings.taplinker_id,
                "action": true,
                "duration": 0,
                "durationSec": seconds,
                "eco": false,
            })
        }
    }

    pub(crate) fn check_reply(reply: Value) -> Result<()> {
        let reply: LinkTapReply =
            serde_json::from_value(reply).context("unexpected linktap reply")?;
        if reply.result.eq_ignore_ascii_case("ok") {
            Ok(())
        } else {
            Err(anyhow!(
                "linktap rejected activation: {}",
                reply.message.unwrap_or(reply.result)
            ))
        }
    }

    impl Deterrent for LinkTapDeterrent {
        fn name(&self) -> &str {
            "linktap"
        }

        fn activate(&mut self, seconds: u32, reason: &str) -> Result<()> {
            log::info!("deterring {} with sprinkler for {}s", reason, seconds);
            let reply: Value = self
                .agent
                .post(&self.settings.url)
                .send_json(self.request_body(seconds))
                .with_context(|| format!("linktap request to {} failed", self.settings.url))?
                .into_json()
                .context("invalid linktap reply")?;
            check_reply(reply)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn settings() -> LinkTapSettings {
            LinkTapSettings {
                url: "https://www.link-tap.com/api/activateInstantMode".to_string(),
                username: "garden".to_string(),
                api_key: "secret".to_string(),
                gateway_id: "GW01".to_string(),
                taplinker_id: "TL07".to_string(),
            }
        }

        #[test]
        fn request_body_starts_instant_mode() {
            let body = LinkTapDeterrent::new(settings()).request_body(15);
            assert_eq!(body["gatewayId"], "GW01");
            assert_eq!(body["taplinkerId"], "TL07");
            assert_eq!(body["action"], true);
            assert_eq!(body["durationSec"], 15);
            assert_eq!(body["eco"], false);
        }

        #[test]
        fn error_reply_is_reported() {
            assert!(check_reply(json!({"result": "ok"})).is_ok());
            let err = check_reply(json!({"result": "error", "message": "gateway offline"}))
                .unwrap_err();
            assert!(err.to_string().contains("gateway offline"));
            assert!(check_reply(json!({"status": 1})).is_err());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_deterrent_counts_activations() {
        let mut deterrent = LogDeterrent::new();
        deterrent.activate(3, "Pigeon").unwrap();
        deterrent.activate(15, "Pigeon").unwrap();
        assert_eq!(deterrent.activations(), 2);
    }

    #[test]
    fn kind_deserializes_from_config_names() {
        let kind: DeterrentKind = serde_json::from_str("\"linktap\"").unwrap();
        assert_eq!(kind, DeterrentKind::LinkTap);
        let kind: DeterrentKind = serde_json::from_str("\"log\"").unwrap();
        assert_eq!(kind, DeterrentKind::Log);
    }

    #[test]
    fn log_kind_builds_without_credentials() {
        let settings = DeterrentSettings {
            kind: DeterrentKind::Log,
            linktap: None,
        };
        assert_eq!(build_deterrent(&settings).unwrap().name(), "log");
    }
}
