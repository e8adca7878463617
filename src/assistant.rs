//! External parking assistant
//!
//! The assistant is an untrusted, optional enrichment source. It is consulted
//! in the background while local results are computed, is bounded by a strict
//! deadline, and any failure degrades to "no suggestions".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ParkResult;
use crate::types::{AlternativeSpot, GeoPoint};

/// What the assistant is told about the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantRequest {
    pub location: GeoPoint,
    pub time: DateTime<Utc>,
    pub recent_venues: Vec<String>,
}

/// What the assistant answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub confidence: f64,
    #[serde(default)]
    pub alternative_spots: Vec<AlternativeSpot>,
}

/// A remote service that can suggest extra parking spots
#[async_trait]
pub trait ParkingAssistant: Send + Sync {
    async fn suggest(&self, request: &AssistantRequest) -> ParkResult<AssistantResponse>;
}

/// An assistant call running in the background.
///
/// The deadline starts when the call is started, so local work done between
/// [`AssistantCall::start`] and [`AssistantCall::finish`] counts against it.
pub struct AssistantCall {
    handle: JoinHandle<ParkResult<AssistantResponse>>,
    deadline: Instant,
    timeout: Duration,
}

impl AssistantCall {
    /// Spawn the assistant request on the current runtime
    pub fn start(
        assistant: Arc<dyn ParkingAssistant>,
        request: AssistantRequest,
        timeout: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move { assistant.suggest(&request).await });
        Self {
            handle,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// Wait for the answer until the deadline.
    ///
    /// Returns `None` on timeout, failure, or a response at or below
    /// `min_confidence`. A call that overruns is aborted.
    pub async fn finish(mut self, min_confidence: f64) -> Option<AssistantResponse> {
        match tokio::time::timeout_at(self.deadline, &mut self.handle).await {
            Ok(Ok(Ok(response))) => {
                if response.confidence.is_finite() && response.confidence > min_confidence {
                    debug!(
                        confidence = response.confidence,
                        spots = response.alternative_spots.len(),
                        "assistant suggestions accepted"
                    );
                    Some(response)
                } else {
                    debug!(
                        confidence = response.confidence,
                        min_confidence, "assistant response below threshold, ignoring"
                    );
                    None
                }
            }
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "assistant request failed");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "assistant task panicked or was cancelled");
                None
            }
            Err(_) => {
                self.handle.abort();
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "assistant request timed out"
                );
                None
            }
        }
    }
}

impl Drop for AssistantCall {
    // A caller that stops waiting must not leave the request running
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParkError;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixed {
        confidence: f64,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl ParkingAssistant for Fixed {
        async fn suggest(&self, request: &AssistantRequest) -> ParkResult<AssistantResponse> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ParkError::Assistant("service unavailable".to_string()));
            }
            Ok(AssistantResponse {
                confidence: self.confidence,
                alternative_spots: vec![AlternativeSpot {
                    location: request.location,
                    confidence: self.confidence,
                    distance_meters: 0.0,
                }],
            })
        }
    }

    fn request() -> AssistantRequest {
        AssistantRequest {
            location: GeoPoint::new(37.7749, -122.4194),
            time: Utc::now(),
            recent_venues: vec!["Gym".to_string()],
        }
    }

    fn start(assistant: Fixed, timeout_ms: u64) -> AssistantCall {
        AssistantCall::start(
            Arc::new(assistant),
            request(),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_confident_answer_accepted() {
        let call = start(
            Fixed {
                confidence: 0.9,
                delay: Duration::from_millis(100),
                fail: false,
            },
            2_500,
        );
        let response = call.finish(0.7).await.unwrap();
        assert_eq!(response.alternative_spots.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_confidence_ignored() {
        let call = start(
            Fixed {
                confidence: 0.7,
                delay: Duration::ZERO,
                fail: false,
            },
            2_500,
        );
        assert!(call.finish(0.7).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_to_none() {
        let call = start(
            Fixed {
                confidence: 0.95,
                delay: Duration::from_secs(10),
                fail: false,
            },
            2_500,
        );
        assert!(call.finish(0.7).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_degrades_to_none() {
        let call = start(
            Fixed {
                confidence: 0.95,
                delay: Duration::ZERO,
                fail: true,
            },
            2_500,
        );
        assert!(call.finish(0.7).await.is_none());
    }

    struct Tracked {
        delay: Duration,
        completed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ParkingAssistant for Tracked {
        async fn suggest(&self, _request: &AssistantRequest) -> ParkResult<AssistantResponse> {
            tokio::time::sleep(self.delay).await;
            self.completed.store(true, Ordering::SeqCst);
            Ok(AssistantResponse {
                confidence: 0.9,
                alternative_spots: Vec::new(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_cancels_request() {
        let completed = Arc::new(AtomicBool::new(false));
        let call = AssistantCall::start(
            Arc::new(Tracked {
                delay: Duration::from_secs(600),
                completed: Arc::clone(&completed),
            }),
            request(),
            Duration::from_secs(900),
        );

        // The caller gives up long before the assistant answers
        let waited = tokio::time::timeout(Duration::from_millis(10), call.finish(0.7)).await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_secs(700)).await;
        assert!(!completed.load(Ordering::SeqCst));
    }
}
