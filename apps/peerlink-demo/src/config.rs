use std::env;

use peerlink::ClientConfig;

const DEFAULT_LOG_FILTER: &str = "info,peerlink=debug";
const DEFAULT_SIGNALING_HOST: &str = "loopback";

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub log_filter: String,
    pub signaling_host: String,
    pub client: ClientConfig,
}

impl DemoConfig {
    pub fn from_env() -> Self {
        let log_filter = env::var("PEERLINK_DEMO_LOG")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
        let signaling_host = env::var("PEERLINK_SIGNALING_HOST")
            .unwrap_or_else(|_| DEFAULT_SIGNALING_HOST.into());
        Self {
            log_filter,
            signaling_host,
            client: ClientConfig::from_env(),
        }
    }

    /// Command line values win over the environment.
    pub fn with_overrides(mut self, log_filter: Option<String>, host: Option<String>) -> Self {
        if let Some(filter) = log_filter {
            self.log_filter = filter;
        }
        if let Some(host) = host {
            self.signaling_host = host;
        }
        self
    }
}
