//! Response correlation: command id → single waiter.
//!
//! One correlator exists per execution. The facade registers a waiter before
//! publishing a command; the engine's dispatcher delivers every response for
//! that execution here, and only the waiter with the exactly matching command
//! id is released. Delivery is non-blocking and the map lock is never held
//! across a suspension point.

use drover_protocol::Response;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, oneshot::Sender<Response>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the single-slot waiter for a command about to be published.
    pub fn register(&self, command_id: &str) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .insert(command_id.to_string(), tx);
        rx
    }

    /// Deliver a response to its waiter. Responses without a matching
    /// command id are logged and dropped; a waiter is never satisfied by a
    /// non-matching id. Returns whether a waiter was released.
    pub fn deliver(&self, response: Response) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(&response.id);

        match sender {
            Some(sender) => {
                let id = response.id.clone();
                if sender.send(response).is_err() {
                    // Waiter already timed out and went away.
                    debug!(command_id = %id, "Waiter gone, response discarded");
                }
                true
            }
            None => {
                warn!(response_id = %response.id, "No waiter for response, dropping");
                false
            }
        }
    }

    /// Drop a registered waiter without delivering (publish failed).
    pub fn discard(&self, command_id: &str) {
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(command_id);
    }

    /// Block on the waiter up to `timeout`. On deadline the pending entry is
    /// cleaned up and a synthetic timeout response is returned, so the
    /// caller always observes an ordinary [`Response`].
    pub async fn wait(
        &self,
        command_id: &str,
        waiter: oneshot::Receiver<Response>,
        timeout: Duration,
    ) -> Response {
        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                // Sender dropped without a send; treat like a timeout.
                self.discard(command_id);
                Response::timeout(command_id)
            }
            Err(_) => {
                self.discard(command_id);
                debug!(command_id = %command_id, "Command deadline expired");
                Response::timeout(command_id)
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("correlator lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_protocol::ResponseStatus;

    #[tokio::test]
    async fn delivers_exact_id_match() {
        let correlator = Correlator::new();
        let waiter = correlator.register("exec_1_100");

        let mut response = Response::success("exec_1_100");
        response.result = "done".to_string();
        assert!(correlator.deliver(response));

        let received = correlator
            .wait("exec_1_100", waiter, Duration::from_secs(1))
            .await;
        assert_eq!(received.status, ResponseStatus::Success);
        assert_eq!(received.result, "done");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn never_satisfies_waiter_with_mismatched_id() {
        let correlator = Correlator::new();
        let waiter = correlator.register("exec_1_100");

        // A response for a different command is dropped, not delivered.
        assert!(!correlator.deliver(Response::success("exec_1_999")));

        let received = correlator
            .wait("exec_1_100", waiter, Duration::from_millis(20))
            .await;
        assert_eq!(received.status, ResponseStatus::Timeout);
        assert_eq!(received.id, "exec_1_100");
    }

    #[tokio::test]
    async fn timeout_synthesizes_canonical_response_and_cleans_up() {
        let correlator = Correlator::new();
        let waiter = correlator.register("exec_1_100");

        let received = correlator
            .wait("exec_1_100", waiter, Duration::from_millis(10))
            .await;

        assert_eq!(received.status, ResponseStatus::Timeout);
        assert_eq!(received.error.as_deref(), Some("command execution timeout"));
        assert_eq!(correlator.pending_count(), 0);

        // A late response after the timeout is dropped.
        assert!(!correlator.deliver(Response::success("exec_1_100")));
    }

    #[tokio::test]
    async fn concurrent_waiters_each_get_their_own_response() {
        let correlator = std::sync::Arc::new(Correlator::new());
        let waiter_a = correlator.register("exec_1_1");
        let waiter_b = correlator.register("exec_1_2");

        let mut response_b = Response::success("exec_1_2");
        response_b.result = "b".to_string();
        let mut response_a = Response::success("exec_1_1");
        response_a.result = "a".to_string();
        correlator.deliver(response_b);
        correlator.deliver(response_a);

        let got_a = correlator.wait("exec_1_1", waiter_a, Duration::from_secs(1)).await;
        let got_b = correlator.wait("exec_1_2", waiter_b, Duration::from_secs(1)).await;
        assert_eq!(got_a.result, "a");
        assert_eq!(got_b.result, "b");
    }
}
