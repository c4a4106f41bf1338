//! HTTP client for the external accrual service.
//!
//! One endpoint: `GET {base}/api/orders/{number}`.
//!
//! | response        | meaning                                              |
//! |-----------------|------------------------------------------------------|
//! | 200 + JSON body | resolved: `{order, status, accrual?}`                |
//! | 204             | order unknown to the service — skip this tick        |
//! | 429             | rate limited; wait `Retry-After` seconds, retry once |
//! | anything else   | transient failure, surfaced as an error              |
//!
//! The 429 retry is an iterative bounded loop, not a reschedule: the wait
//! happens inside the calling worker's slot.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use lpl_schemas::{AccrualError, AccrualOutcome, AccrualSource, AccrualStatus};

/// How many times a 429 is retried before giving up for the tick.
const RATE_LIMIT_RETRIES: u32 = 1;

/// Fallback when a 429 arrives without a parsable Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Upper bound on a server-provided Retry-After wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Successful response body.
#[derive(Debug, Deserialize)]
struct AccrualReply {
    #[allow(dead_code)]
    order: String,
    status: AccrualStatus,
    accrual: Option<Decimal>,
}

enum Step {
    Done(AccrualOutcome),
    RateLimited { retry_after: Duration },
}

pub struct AccrualGateway {
    http: reqwest::Client,
    base_url: String,
}

impl AccrualGateway {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_once(&self, order_number: &str) -> Result<Step, AccrualError> {
        let url = format!("{}/api/orders/{}", self.base_url, order_number);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AccrualError::Transport(e.to_string()))?;

        match resp.status().as_u16() {
            200 => {
                let reply: AccrualReply = resp
                    .json()
                    .await
                    .map_err(|e| AccrualError::Protocol(e.to_string()))?;
                // The amount only means anything on PROCESSED; a missing
                // amount there is a zero-point order, not a protocol error.
                let accrual = match reply.status {
                    AccrualStatus::Processed => Some(reply.accrual.unwrap_or(Decimal::ZERO)),
                    _ => None,
                };
                Ok(Step::Done(AccrualOutcome::Resolved {
                    status: reply.status,
                    accrual,
                }))
            }
            204 => Ok(Step::Done(AccrualOutcome::Unregistered)),
            429 => {
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                Ok(Step::RateLimited {
                    retry_after: retry_after.min(MAX_RETRY_AFTER),
                })
            }
            other => Err(AccrualError::UnexpectedStatus(other)),
        }
    }
}

#[async_trait]
impl AccrualSource for AccrualGateway {
    async fn fetch(&self, order_number: &str) -> Result<AccrualOutcome, AccrualError> {
        let mut rate_limit_hits: u32 = 0;
        loop {
            match self.fetch_once(order_number).await? {
                Step::Done(outcome) => return Ok(outcome),
                Step::RateLimited { retry_after } => {
                    rate_limit_hits += 1;
                    if rate_limit_hits > RATE_LIMIT_RETRIES {
                        return Err(AccrualError::RateLimitExhausted {
                            attempts: rate_limit_hits,
                        });
                    }
                    warn!(
                        order = order_number,
                        wait_secs = retry_after.as_secs(),
                        "accrual rate limited, honoring Retry-After"
                    );
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }
}
