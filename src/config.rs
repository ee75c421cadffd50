use std::time::Duration;

use anyhow::Context;

use crate::churn::DEFAULT_CHURN_THRESHOLD;

pub const DEFAULT_PROXY_URL: &str = "http://localhost:5000";
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub proxy_url: String,
    pub churn_threshold: u32,
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            churn_threshold: DEFAULT_CHURN_THRESHOLD,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(url) = lookup("WORKFLOW_HEALTH_PROXY_URL") {
            settings.proxy_url = url.trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup("WORKFLOW_HEALTH_CHURN_THRESHOLD") {
            settings.churn_threshold = raw
                .trim()
                .parse()
                .with_context(|| format!("WORKFLOW_HEALTH_CHURN_THRESHOLD must be a whole number, got {raw:?}"))?;
        }
        if let Some(raw) = lookup("WORKFLOW_HEALTH_CONCURRENCY") {
            let concurrency: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("WORKFLOW_HEALTH_CONCURRENCY must be a whole number, got {raw:?}"))?;
            anyhow::ensure!(concurrency > 0, "WORKFLOW_HEALTH_CONCURRENCY must be at least 1");
            settings.concurrency = concurrency;
        }
        if let Some(raw) = lookup("WORKFLOW_HEALTH_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("WORKFLOW_HEALTH_TIMEOUT_SECS must be a whole number, got {raw:?}"))?;
            settings.timeout = Duration::from_secs(secs);
        }

        Ok(settings)
    }
}
