//! Live link health checks over staged URLs.
//!
//! A fixed pool of workers drains a shared queue. Each request carries its own
//! timeout; a timed-out request is a terminal outcome for that URL and is not
//! retried.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub concurrency: usize,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            timeout: Duration::from_secs(10),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("building http client")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LinkHealth {
    Reachable { status: u16 },
    HttpError { status: u16 },
    TimedOut,
    Failed { reason: String },
}

impl LinkHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, LinkHealth::Reachable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkHealthReport {
    pub url: String,
    pub health: LinkHealth,
}

#[derive(Debug, Clone)]
pub struct LinkHealthChecker {
    client: reqwest::Client,
    concurrency: usize,
}

fn classify_status(status: StatusCode) -> LinkHealth {
    if status.is_success() || status.is_redirection() {
        LinkHealth::Reachable {
            status: status.as_u16(),
        }
    } else {
        LinkHealth::HttpError {
            status: status.as_u16(),
        }
    }
}

fn classify_error(err: &reqwest::Error) -> LinkHealth {
    if err.is_timeout() {
        LinkHealth::TimedOut
    } else {
        LinkHealth::Failed {
            reason: err.to_string(),
        }
    }
}

impl LinkHealthChecker {
    pub fn new(config: HealthCheckConfig) -> Result<Self, HealthCheckError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        Ok(Self {
            client: builder.build()?,
            concurrency: config.concurrency.max(1),
        })
    }

    pub async fn check_one(&self, url: &str) -> LinkHealth {
        match self.client.get(url).send().await {
            Ok(resp) => classify_status(resp.status()),
            Err(err) => classify_error(&err),
        }
    }

    /// Check every URL. Results come back sorted by URL; completion order
    /// across workers is not preserved.
    pub async fn check_all(&self, urls: Vec<String>) -> Vec<LinkHealthReport> {
        let total = urls.len();
        let queue = Arc::new(Mutex::new(urls.into_iter().collect::<VecDeque<_>>()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut workers = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency.min(total.max(1)) {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let checker = self.clone();
            let span = info_span!("link_health_worker", worker_id);
            workers.push(tokio::spawn(
                async move {
                    loop {
                        let next = queue.lock().await.pop_front();
                        let Some(url) = next else {
                            break;
                        };
                        let health = checker.check_one(&url).await;
                        match &health {
                            LinkHealth::Reachable { status } => debug!(%url, status, "reachable"),
                            other => warn!(%url, outcome = ?other, "link unhealthy"),
                        }
                        if tx.send(LinkHealthReport { url, health }).is_err() {
                            break;
                        }
                    }
                }
                .instrument(span),
            ));
        }
        drop(tx);

        let mut reports = Vec::with_capacity(total);
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "link health worker panicked");
            }
        }
        reports.sort_by(|a, b| a.url.cmp(&b.url));
        reports
    }
}
