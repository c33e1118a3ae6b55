//! The fetch pipeline.
//!
//! Every network access goes through [`FetchPipeline::get`]: it applies the
//! per-attempt timeout, classifies HTTP statuses, retries transient failures
//! with linear backoff, observes the abort token, and feeds the bandwidth
//! estimator on success.
//!
//! Status classification:
//!
//! | status / condition      | outcome                           |
//! |-------------------------|-----------------------------------|
//! | 2xx                     | success                           |
//! | 401, 403                | `Fatal(AuthExpired)`, no retry    |
//! | 410                     | `Fatal(StreamEnded)`, no retry    |
//! | 404                     | `Skip`, no retry                  |
//! | 5xx, network, timeout   | retried, then `Transient`         |

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{FatalKind, FetchError};
use crate::estimator::BandwidthEstimator;
use crate::model::SegmentRef;
use crate::proxy::{BodyKind, ProxyError, ProxyResponse, RequestProxy, RequestHeaders};
use crate::settings::Settings;

/// Shared handle to the session's bandwidth estimator.
///
/// Lock scope is always a few arithmetic operations; the mutex is never held
/// across an await point.
pub type SharedEstimator = Arc<Mutex<BandwidthEstimator>>;

enum Classified {
    Success,
    Fatal(FatalKind),
    Skip,
    Retry,
}

fn classify(status: u16) -> Classified {
    match status {
        200..=299 => Classified::Success,
        401 | 403 => Classified::Fatal(FatalKind::AuthExpired),
        410 => Classified::Fatal(FatalKind::StreamEnded),
        404 => Classified::Skip,
        _ => Classified::Retry,
    }
}

struct PipelineInner {
    proxy: Arc<dyn RequestProxy>,
    estimator: SharedEstimator,
    attempt_timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    // Swapped wholesale on abort_all so requests already in flight keep
    // observing the token they started with.
    cancel: Mutex<CancellationToken>,
}

/// Retrying, cancellable fetch front-end shared by a session and its
/// refresher task. Clones share the same abort token and estimator.
#[derive(Clone)]
pub struct FetchPipeline {
    inner: Arc<PipelineInner>,
}

impl FetchPipeline {
    /// Creates a pipeline over `proxy`, reporting samples into `estimator`.
    pub fn new(proxy: Arc<dyn RequestProxy>, settings: &Settings, estimator: SharedEstimator) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                proxy,
                estimator,
                attempt_timeout: settings.attempt_timeout,
                max_attempts: settings.max_attempts.max(1),
                backoff_base: settings.backoff_base,
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// The token requests started now will observe.
    fn current_token(&self) -> CancellationToken {
        self.inner
            .cancel
            .lock()
            .expect("cancel token mutex poisoned")
            .clone()
    }

    /// Cancels every in-flight request. Requests started after this call use
    /// a fresh token. Idempotent.
    pub fn abort_all(&self) {
        let mut guard = self
            .inner
            .cancel
            .lock()
            .expect("cancel token mutex poisoned");
        guard.cancel();
        *guard = CancellationToken::new();
    }

    /// Fetch `url` with retries, classification and bandwidth reporting.
    pub async fn get(
        &self,
        url: &Url,
        want: BodyKind,
        headers: Option<&RequestHeaders>,
    ) -> Result<ProxyResponse, FetchError> {
        let cancel = self.current_token();
        let inner = &self.inner;
        let mut last_reason = String::new();

        for attempt in 1..=inner.max_attempts {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let started = Instant::now();
            let attempt_fut = timeout(inner.attempt_timeout, inner.proxy.fetch(url, want, headers));

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                res = attempt_fut => res,
            };

            match outcome {
                Ok(Ok(resp)) => match classify(resp.status) {
                    Classified::Success => {
                        // Only payload transfers carry throughput signal; tiny
                        // playlist fetches would just add noise.
                        if want == BodyKind::Bytes {
                            let elapsed = started.elapsed();
                            inner
                                .estimator
                                .lock()
                                .expect("estimator mutex poisoned")
                                .report(resp.body.len(), elapsed);
                        }
                        if attempt > 1 {
                            debug!(url = %url, attempt, "fetch succeeded after retry");
                        }
                        return Ok(resp);
                    }
                    Classified::Fatal(kind) => {
                        debug!(url = %url, status = resp.status, %kind, "fetch failed fatally");
                        return Err(FetchError::Fatal {
                            kind,
                            status: resp.status,
                            url: url.to_string(),
                        });
                    }
                    Classified::Skip => {
                        debug!(url = %url, "resource gone (404), skipping");
                        return Err(FetchError::Skip {
                            url: url.to_string(),
                        });
                    }
                    Classified::Retry => {
                        last_reason = format!("HTTP {}", resp.status);
                    }
                },
                Ok(Err(ProxyError::Timeout(target))) => {
                    last_reason = format!("proxy timeout for {target}");
                }
                Ok(Err(e)) => {
                    last_reason = e.to_string();
                }
                Err(_) => {
                    last_reason = format!("attempt timed out after {:?}", inner.attempt_timeout);
                }
            }

            debug!(
                url = %url,
                attempt,
                max_attempts = inner.max_attempts,
                reason = %last_reason,
                "fetch attempt failed"
            );

            if attempt < inner.max_attempts {
                let delay = inner.backoff_base.saturating_mul(attempt);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(FetchError::Transient {
            attempts: inner.max_attempts,
            url: url.to_string(),
            reason: last_reason,
        })
    }

    /// Fetch a media segment's bytes, honoring its byte range when present.
    pub async fn get_segment(
        &self,
        segment: &SegmentRef,
        headers: Option<&RequestHeaders>,
    ) -> Result<bytes::Bytes, FetchError> {
        let resp = match &segment.byte_range {
            Some(range) => {
                let mut ranged: RequestHeaders = headers.cloned().unwrap_or_default();
                ranged.insert("Range".to_string(), range.to_header_value());
                self.get(&segment.url, BodyKind::Bytes, Some(&ranged)).await?
            }
            None => self.get(&segment.url, BodyKind::Bytes, headers).await?,
        };
        Ok(resp.body.into_bytes())
    }
}
