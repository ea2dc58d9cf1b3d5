//! Best-effort recovery signal sent when the host discards a job's store entry.
//!
//! The signal asks the application's own bootstrap path to register its jobs
//! again. It is fire-and-forget: every failure is logged and dropped.

use std::time::Duration;

use {
    tokio::runtime::Handle,
    tracing::{debug, info, warn},
    url::Url,
};

#[cfg(feature = "metrics")]
use tickwork_metrics::{counter, scheduler as sched_metrics};

use {
    crate::{Context, Result},
    tickwork_config::RecoveryConfig,
};

/// Emits the recovery signal for a job.
pub trait RecoverySignal: Send + Sync {
    /// Must return promptly and never panic or propagate failures.
    fn signal(&self, job: &str);
}

/// Recovery disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecovery;

impl RecoverySignal for NoRecovery {
    fn signal(&self, job: &str) {
        debug!(job, "no recovery endpoint configured, skipping signal");
    }
}

/// Plain GET to a bootstrap URL, with the job name as the `job` query
/// parameter.
#[derive(Debug, Clone)]
pub struct HttpRecovery {
    client: reqwest::Client,
    url: Url,
    runtime: Handle,
}

impl HttpRecovery {
    /// Build a recovery client bound to the current tokio runtime.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let runtime = Handle::try_current().context("recovery signal needs a tokio runtime")?;
        Self::with_handle(url, timeout, runtime)
    }

    pub fn with_handle(url: &str, timeout: Duration, runtime: Handle) -> Result<Self> {
        let url = Url::parse(url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            runtime,
        })
    }

    /// `None` when no URL is configured.
    pub fn from_config(config: &RecoveryConfig) -> Result<Option<Self>> {
        config
            .url
            .as_deref()
            .map(|url| Self::new(url, Duration::from_secs(config.timeout_secs)))
            .transpose()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn request_url(&self, job: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("job", job);
        url
    }

    /// Perform the request and report the outcome.
    pub async fn send(&self, job: &str) -> Result<()> {
        let url = self.request_url(job);
        let response = self.client.get(url).send().await?.error_for_status()?;
        info!(job, status = %response.status(), "recovery signal delivered");
        Ok(())
    }
}

impl RecoverySignal for HttpRecovery {
    fn signal(&self, job: &str) {
        #[cfg(feature = "metrics")]
        counter!(sched_metrics::RECOVERY_SIGNALS_TOTAL).increment(1);

        let this = self.clone();
        let job = job.to_string();
        self.runtime.spawn(async move {
            if let Err(e) = this.send(&job).await {
                #[cfg(feature = "metrics")]
                counter!(sched_metrics::RECOVERY_FAILURES_TOTAL).increment(1);
                warn!(job = %job, url = %this.url, error = %e, "recovery signal failed");
            }
        });
    }
}
