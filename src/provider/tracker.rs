//! Reactive helpers driven by the manager's connection flags
//!
//! - [`RequestTracker`] re-runs a request and keeps the latest outcome
//! - [`SubscriptionBinding`] keeps a subscription alive across reconnects and
//!   forwards deliveries to an `mpsc` channel

use super::lifecycle::ConnectionManager;
use super::state::StatusFlags;
use super::subscription::Subscription;
use crate::error::ProviderError;
use crate::transport::{Message, RequestOptions, SubscribeOptions};
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Error captured by a tracker, reduced to its code and message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestErrorRecord {
    pub code: String,
    pub message: String,
}

impl From<&ProviderError> for RequestErrorRecord {
    fn from(error: &ProviderError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Observable outcome of the most recent request
#[derive(Debug, Clone, Default)]
pub struct RequestState {
    pub loading: bool,
    pub result: Option<Message>,
    pub error: Option<RequestErrorRecord>,
}

struct RequestInputs {
    payload: Bytes,
    options: RequestOptions,
}

/// Re-runnable request against a fixed subject
pub struct RequestTracker {
    manager: Arc<ConnectionManager>,
    subject: String,
    inputs: Mutex<RequestInputs>,
    state: watch::Sender<RequestState>,
    update_gate: Mutex<()>,
    locked: AtomicBool,
    /// Bumped whenever the inputs change
    revision: watch::Sender<u64>,
    auto: std::sync::Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl RequestTracker {
    pub fn new<S: Into<String>>(
        manager: Arc<ConnectionManager>,
        subject: S,
        payload: Bytes,
        options: RequestOptions,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(RequestState::default());
        let (revision, _) = watch::channel(0);
        Arc::new(Self {
            manager,
            subject: subject.into(),
            inputs: Mutex::new(RequestInputs { payload, options }),
            state,
            update_gate: Mutex::new(()),
            locked: AtomicBool::new(false),
            revision,
            auto: std::sync::Mutex::new(None),
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn state(&self) -> RequestState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<RequestState> {
        self.state.subscribe()
    }

    /// True while an [`update`](Self::update) is applying new inputs
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Issue one request with the current inputs and record the outcome
    pub async fn refresh(&self) -> RequestState {
        let (payload, options) = {
            let inputs = self.inputs.lock().await;
            (inputs.payload.clone(), inputs.options.clone())
        };

        self.state.send_modify(|state| state.loading = true);
        let outcome = self.manager.request(&self.subject, payload, &options).await;

        self.state.send_modify(|state| {
            state.loading = false;
            match &outcome {
                Ok(reply) => {
                    state.result = Some(reply.clone());
                    state.error = None;
                }
                Err(e) => {
                    state.result = None;
                    state.error = Some(RequestErrorRecord::from(e));
                }
            }
        });

        if let Err(e) = &outcome {
            debug!(subject = %self.subject, code = e.code(), "Tracked request failed");
        }
        self.state()
    }

    /// Number of input changes so far
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    pub async fn update_payload(&self, payload: Bytes) {
        self.inputs.lock().await.payload = payload;
        self.bump_revision();
    }

    /// Shallow merge into the current options
    pub async fn update_options(&self, options: &RequestOptions) {
        {
            let mut inputs = self.inputs.lock().await;
            inputs.options = inputs.options.merge(options);
        }
        self.bump_revision();
    }

    /// Swap payload and options together. No request is issued here: call
    /// [`refresh`](Self::refresh), or let auto mode pick the change up.
    pub async fn update(&self, payload: Option<Bytes>, options: Option<RequestOptions>) {
        let _gate = self.update_gate.lock().await;
        self.locked.store(true, Ordering::SeqCst);
        {
            let mut inputs = self.inputs.lock().await;
            if let Some(payload) = payload {
                inputs.payload = payload;
            }
            if let Some(options) = &options {
                inputs.options = inputs.options.merge(options);
            }
        }
        self.locked.store(false, Ordering::SeqCst);
        self.bump_revision();
    }

    /// Refresh whenever the manager becomes connected and whenever the
    /// inputs change while connected
    pub fn start_auto(self: &Arc<Self>) {
        let Ok(mut auto) = self.auto.lock() else {
            return;
        };
        if auto.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let flags_rx = self.manager.watch_flags();
        let revision_rx = self.revision.subscribe();
        let join = tokio::spawn(run_auto(Arc::downgrade(self), flags_rx, revision_rx, stop_rx));
        *auto = Some((stop_tx, join));
        debug!(subject = %self.subject, "Auto request enabled");
    }

    pub fn stop_auto(&self) {
        if let Ok(mut auto) = self.auto.lock() {
            if let Some((stop_tx, _join)) = auto.take() {
                let _ = stop_tx.send(true);
            }
        }
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        self.stop_auto();
    }
}

async fn run_auto(
    tracker: Weak<RequestTracker>,
    mut flags_rx: watch::Receiver<StatusFlags>,
    mut revision_rx: watch::Receiver<u64>,
    mut stop_rx: watch::Receiver<bool>,
) {
    // (generation, revision) of the last automatic refresh
    let mut last_seen: Option<(u64, u64)> = None;

    loop {
        let connected = flags_rx.borrow_and_update().connected;
        let revision = *revision_rx.borrow_and_update();
        {
            let Some(tracker) = tracker.upgrade() else {
                break;
            };
            let current = (tracker.manager.generation(), revision);
            if !connected {
                last_seen = None;
            } else if last_seen != Some(current) && !tracker.is_locked() {
                last_seen = Some(current);
                tracker.refresh().await;
            }
        }

        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            changed = flags_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = revision_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

/// Keeps a subscription in place while the manager is connected
pub struct SubscriptionBinding {
    subject: String,
    options: watch::Sender<SubscribeOptions>,
    stop_tx: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl SubscriptionBinding {
    pub fn spawn<S: Into<String>>(
        manager: Arc<ConnectionManager>,
        subject: S,
        options: SubscribeOptions,
        sink: mpsc::Sender<Message>,
    ) -> Self {
        let subject = subject.into();
        let (options_tx, options_rx) = watch::channel(options);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = BindingTask {
            manager,
            subject: subject.clone(),
            sink,
        };
        let join = tokio::spawn(task.run(options_rx, stop_rx));
        Self {
            subject,
            options: options_tx,
            stop_tx,
            join: Some(join),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Replace the options; the active subscription is re-established
    pub fn set_options(&self, options: SubscribeOptions) {
        self.options.send_replace(options);
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the subscription and wait for the binding to exit
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(subject = %self.subject, error = %e, "Subscription binding task failed");
            }
        }
    }
}

impl Drop for SubscriptionBinding {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

struct ActiveSubscription {
    subscription: Subscription,
    generation: u64,
}

struct BindingTask {
    manager: Arc<ConnectionManager>,
    subject: String,
    sink: mpsc::Sender<Message>,
}

impl BindingTask {
    async fn run(
        self,
        mut options_rx: watch::Receiver<SubscribeOptions>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut flags_rx = self.manager.watch_flags();
        let mut active: Option<ActiveSubscription> = None;
        // Generation whose subscription ended on its own (e.g. `max` reached)
        let mut exhausted: Option<u64> = None;

        loop {
            let connected = flags_rx.borrow_and_update().connected;
            let generation = self.manager.generation();

            let stale = active
                .as_ref()
                .map(|a| !connected || a.generation != generation)
                .unwrap_or(false);
            if stale {
                self.cancel(&mut active).await;
            }

            if connected && active.is_none() && exhausted != Some(generation) {
                let options = options_rx.borrow_and_update().clone();
                match self.manager.subscribe(&self.subject, &options).await {
                    Ok(subscription) => {
                        info!(subject = %self.subject, sid = subscription.sid(), "Subscription bound");
                        active = Some(ActiveSubscription {
                            subscription,
                            generation,
                        });
                    }
                    Err(e) => {
                        warn!(subject = %self.subject, error = %e, "Failed to bind subscription");
                    }
                }
            }

            tokio::select! {
                biased;

                _ = stop_rx.changed() => break,

                changed = flags_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                changed = options_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    debug!(subject = %self.subject, "Subscription options replaced, resubscribing");
                    self.cancel(&mut active).await;
                    exhausted = None;
                }

                delivered = next_message(&mut active) => match delivered {
                    Some(message) => {
                        if self.sink.send(message).await.is_err() {
                            debug!(subject = %self.subject, "Binding receiver dropped");
                            break;
                        }
                    }
                    None => {
                        debug!(subject = %self.subject, "Bound subscription ended");
                        exhausted = active.take().map(|bound| bound.generation);
                    }
                },
            }
        }

        self.cancel(&mut active).await;
    }

    async fn cancel(&self, active: &mut Option<ActiveSubscription>) {
        if let Some(mut bound) = active.take() {
            if let Err(e) = bound.subscription.unsubscribe().await {
                debug!(subject = %self.subject, error = %e, "Ignoring unsubscribe error");
            }
        }
    }
}

async fn next_message(active: &mut Option<ActiveSubscription>) -> Option<Message> {
    match active {
        Some(bound) => bound.subscription.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_record_from_provider_error() {
        let record = RequestErrorRecord::from(&ProviderError::no_responders("bar"));
        assert_eq!(record.code, "NO_RESPONDERS");
        assert!(record.message.contains("bar"));
    }

    #[test]
    fn test_request_state_default() {
        let state = RequestState::default();
        assert!(!state.loading);
        assert!(state.result.is_none());
        assert!(state.error.is_none());
    }
}
