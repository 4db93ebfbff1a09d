//! Deployment execution and tracking

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use relcat_client::CatalogApi;
use relcat_types::{
    ApplicationId, DeploymentId, DeploymentLog, DeploymentReceipt, DeploymentRecord,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Starts deployments and waits for them to finish
pub struct DeploymentWaiter {
    catalog: Arc<dyn CatalogApi>,
    poll_interval: Duration,
    timeout: Duration,
}

impl DeploymentWaiter {
    pub fn new(catalog: Arc<dyn CatalogApi>, config: &EngineConfig) -> Self {
        Self {
            catalog,
            poll_interval: config.poll_interval,
            timeout: config.deploy_timeout,
        }
    }

    #[instrument(skip(self), fields(app_id = %app))]
    pub async fn deploy(&self, app: ApplicationId, env: &str) -> Result<DeploymentId> {
        let id = self.catalog.deploy(app, env).await?;
        info!(deployment = %id, environment = %env, "Deployment started");
        Ok(id)
    }

    /// Poll until the deployment completes, then fetch its log.
    ///
    /// Progress read failures are logged and retried until the deadline.
    #[instrument(skip(self, cancel), fields(deployment = %id))]
    pub async fn wait<C>(&self, id: DeploymentId, cancel: C) -> Result<DeploymentLog>
    where
        C: Future<Output = ()>,
    {
        let mut cancel = std::pin::pin!(cancel);
        let started = Instant::now();
        let deadline = started + self.timeout;

        loop {
            match self.catalog.deployment_progress(id).await {
                Ok(progress) if progress.is_terminal() => break,
                Ok(_) => debug!("Deployment still running"),
                Err(e) => warn!(error = %e, "Could not read deployment progress"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::DeployTimeout {
                    id,
                    waited: now - started,
                });
            }

            tokio::select! {
                biased;
                _ = &mut cancel => return Err(EngineError::Cancelled(id)),
                _ = tokio::time::sleep_until((now + self.poll_interval).min(deadline)) => {}
            }
        }

        let log = self.catalog.deployment_log(id).await?;
        info!(exit_code = log.exit_code, lines = log.lines.len(), "Deployment finished");
        Ok(log)
    }

    /// Start a deployment and wait for it
    pub async fn deploy_and_wait<C>(
        &self,
        app: ApplicationId,
        env: &str,
        cancel: C,
    ) -> Result<(DeploymentId, DeploymentLog)>
    where
        C: Future<Output = ()>,
    {
        let id = self.deploy(app, env).await?;
        let log = self.wait(id, cancel).await?;
        Ok((id, log))
    }

    /// Record a deployment that ran outside the catalog
    pub async fn record(&self, record: &DeploymentRecord) -> Result<DeploymentReceipt> {
        let receipt = self.catalog.record_deployment(record).await?;
        if let Some(error) = receipt.error.as_deref().filter(|e| !e.is_empty()) {
            warn!(error = %error, "Catalog reported a problem with the deployment record");
        }
        info!(
            environment = %record.environment,
            deployment = ?receipt.deployment,
            "Recorded deployment"
        );
        Ok(receipt)
    }
}
