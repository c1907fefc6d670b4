//! Call coordinator for orchestrating the call handshake and media lifecycle.

use echocore::calls::{CallSession, CallState, CallTransition, EndReason};
use echocore::signaling::{CALL_ACCEPTED, CALL_OFFER, CALL_REJECTED, SignalFrame};
use echocore::types::events::{CoreEventBus, Event};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

use super::error::CallError;
use super::prompt::{CallDecision, IncomingCallPrompt};
use crate::media::{MediaConfig, MediaEvent, MediaSession, MediaSessionFactory};
use crate::session::SessionManager;
use crate::signaling::{SignalingClient, Subscription};

/// Configuration for the call coordinator.
#[derive(Debug, Clone)]
pub struct CallCoordinatorConfig {
    /// How long an outgoing offer waits for `callAccepted`/`callRejected`.
    pub offer_timeout: Duration,
    /// How long an incoming offer waits for the local decision before it is
    /// declined.
    pub answer_timeout: Duration,
    pub media: MediaConfig,
}

impl Default for CallCoordinatorConfig {
    fn default() -> Self {
        Self {
            offer_timeout: Duration::from_secs(30),
            answer_timeout: Duration::from_secs(45),
            media: MediaConfig::default(),
        }
    }
}

/// The single non-idle call and the resources it owns.
struct ActiveCall {
    session: CallSession,
    media: Option<Arc<dyn MediaSession>>,
    /// Reply handlers scoped to an outgoing attempt.
    subscriptions: Vec<Subscription>,
    /// Stops the task following media events once the call is removed.
    media_stop: Option<oneshot::Sender<()>>,
}

/// Drives the offer/accept/reject handshake for at most one call at a time.
///
/// Every callback carries the attempt id it was created for; callbacks for an
/// attempt that is no longer current are ignored, so late or duplicated
/// signaling never revives or duplicates a session.
///
/// An offer that arrives while another call is in progress is rejected as
/// busy. The exception is two peers offering to each other at the same time:
/// the offer from the lexicographically lower id wins, so the higher side
/// drops its own attempt and answers the crossing offer, and both end up in
/// one call.
pub struct CallCoordinator {
    session: Arc<SessionManager>,
    signaling: Arc<SignalingClient>,
    media: Arc<dyn MediaSessionFactory>,
    prompt: Arc<dyn IncomingCallPrompt>,
    events: CoreEventBus,
    config: CallCoordinatorConfig,
    current: Mutex<Option<ActiveCall>>,
    next_call_id: AtomicU64,
    offer_subscription: Subscription,
}

impl CallCoordinator {
    /// Create a coordinator and start listening for `callOffer`.
    pub fn new(
        session: Arc<SessionManager>,
        signaling: Arc<SignalingClient>,
        media: Arc<dyn MediaSessionFactory>,
        prompt: Arc<dyn IncomingCallPrompt>,
        events: CoreEventBus,
        config: CallCoordinatorConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let offer_subscription = signaling.on(CALL_OFFER, move |frame| {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.handle_offer(frame).await;
                    }
                }
            });

            Self {
                session,
                signaling,
                media,
                prompt,
                events,
                config,
                current: Mutex::new(None),
                next_call_id: AtomicU64::new(1),
                offer_subscription,
            }
        })
    }

    /// Offer a call to the selected peer.
    ///
    /// Returns the attempt id. The outcome arrives later as `CallConnected`
    /// or `CallEnded` (`Rejected`, `NoAnswer`).
    pub async fn send_offer(self: &Arc<Self>) -> Result<u64, CallError> {
        let peer = self.session.get_peer_selection().await;
        if peer.is_empty() {
            return Err(CallError::NoPeerSelected);
        }
        let local = self.session.get_identity_id().await?;

        let mut current = self.current.lock().await;
        if let Some(active) = current.as_ref() {
            return Err(CallError::CallInProgress(active.session.remote_id.clone()));
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let mut session = CallSession::new_outgoing(call_id, local.as_str(), peer.as_str());
        session.apply_transition(CallTransition::OfferSent)?;

        let subscriptions = vec![
            self.subscribe_reply(CALL_ACCEPTED, call_id),
            self.subscribe_reply(CALL_REJECTED, call_id),
        ];
        self.signaling
            .send_frame(SignalFrame::call_offer(&local, &peer));
        *current = Some(ActiveCall {
            session,
            media: None,
            subscriptions,
            media_stop: None,
        });
        drop(current);

        info!("Call {call_id}: offer sent to {peer}");
        self.spawn_offer_timeout(call_id);
        Ok(call_id)
    }

    /// Hang up the current call, pending or connected.
    ///
    /// Returns false (and does nothing) when there is no call. Already-sent
    /// signaling is not retracted.
    pub async fn end_call(&self) -> bool {
        let (ended, unanswered) = {
            let mut current = self.current.lock().await;
            let unanswered = current
                .as_ref()
                .is_some_and(|active| active.session.state.can_accept());
            (
                self.take_if(&mut current, None, EndReason::Hangup),
                unanswered,
            )
        };

        let Some(active) = ended else {
            debug!("end_call with no active call");
            return false;
        };

        if unanswered {
            // The caller would otherwise wait for its offer timeout.
            self.signaling.send_frame(SignalFrame::call_rejected(
                &active.session.remote_id,
                &active.session.local_id,
            ));
        }
        self.teardown(active, EndReason::Hangup).await;
        true
    }

    /// Current state; `Idle` when there is no call.
    pub async fn state(&self) -> CallState {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|active| active.session.state.clone())
            .unwrap_or_default()
    }

    pub async fn current_call(&self) -> Option<CallSession> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|active| active.session.clone())
    }

    pub async fn has_active_call(&self) -> bool {
        self.current.lock().await.is_some()
    }

    pub async fn has_media_session(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| active.media.is_some())
    }

    fn subscribe_reply(self: &Arc<Self>, event: &'static str, call_id: u64) -> Subscription {
        let weak = Arc::downgrade(self);
        self.signaling.on(event, move |frame| {
            let weak = weak.clone();
            async move {
                let Some(this) = weak.upgrade() else {
                    return;
                };
                if event == CALL_ACCEPTED {
                    this.handle_remote_accept(call_id, frame).await;
                } else {
                    this.handle_remote_reject(call_id, frame).await;
                }
            }
        })
    }

    fn spawn_offer_timeout(self: &Arc<Self>, call_id: u64) {
        let weak = Arc::downgrade(self);
        let timeout = self.config.offer_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(this) = weak.upgrade()
                && this.finish(call_id, EndReason::NoAnswer).await
            {
                info!("Call {call_id}: no answer within {timeout:?}");
            }
        });
    }

    async fn handle_remote_accept(self: &Arc<Self>, call_id: u64, frame: SignalFrame) {
        let Some(receiver) = frame.arg(0) else {
            warn!("callAccepted without a receiver id");
            return;
        };

        let room = {
            let mut current = self.current.lock().await;
            let Some(active) = current.as_mut().filter(|a| a.session.id == call_id) else {
                debug!("Ignoring callAccepted for finished call {call_id}");
                return;
            };
            if active.session.remote_id != receiver {
                warn!(
                    "Ignoring callAccepted from {receiver}; call {call_id} is with {}",
                    active.session.remote_id
                );
                return;
            }
            if let Err(e) = active.session.apply_transition(CallTransition::RemoteAccepted) {
                debug!("Ignoring callAccepted for call {call_id}: {e}");
                return;
            }
            for subscription in active.subscriptions.drain(..) {
                self.signaling.off(&subscription);
            }
            active.session.room_id()
        };

        info!("Call {call_id}: accepted by {receiver}");
        self.connected(call_id, receiver.to_string(), room);
    }

    async fn handle_remote_reject(&self, call_id: u64, frame: SignalFrame) {
        let Some(receiver) = frame.arg(0) else {
            warn!("callRejected without a receiver id");
            return;
        };

        let ended = {
            let mut current = self.current.lock().await;
            if let Some(active) = current.as_ref()
                && active.session.id == call_id
                && active.session.remote_id != receiver
            {
                warn!(
                    "Ignoring callRejected from {receiver}; call {call_id} is with {}",
                    active.session.remote_id
                );
                return;
            }
            self.take_if(&mut current, Some(call_id), EndReason::Rejected)
        };

        if let Some(active) = ended {
            self.teardown(active, EndReason::Rejected).await;
        }
    }

    async fn handle_offer(self: &Arc<Self>, frame: SignalFrame) {
        let Some(caller) = frame.arg(0).map(str::to_owned) else {
            warn!("callOffer without a sender id");
            return;
        };
        let local = match self.session.get_identity_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!("Ignoring callOffer from {caller}: {e}");
                return;
            }
        };
        if caller == local {
            warn!("Ignoring callOffer from ourselves");
            return;
        }

        let mut current = self.current.lock().await;
        let mut answer_crossed = false;
        if let Some(active) = current.as_ref() {
            let same_peer = active.session.remote_id == caller;
            if same_peer && active.session.state.can_accept() {
                debug!("Ignoring duplicate callOffer from {caller}");
                return;
            }
            let crossed =
                same_peer && matches!(active.session.state, CallState::OfferSent { .. });

            if crossed && caller < local {
                let ours = active.session.id;
                if let Some(mut dropped) = current.take() {
                    for subscription in dropped.subscriptions.drain(..) {
                        self.signaling.off(&subscription);
                    }
                }
                info!("Call {ours}: offer crossed with one from {caller}; answering theirs");
                answer_crossed = true;
            } else {
                if crossed {
                    info!("Offer crossed with one from {caller}; keeping ours");
                } else {
                    info!(
                        "Busy with {}; rejecting callOffer from {caller}",
                        active.session.remote_id
                    );
                }
                drop(current);
                self.signaling
                    .send_frame(SignalFrame::call_rejected(&caller, &local));
                if !crossed {
                    self.events.dispatch(&Event::BusyRejected { caller });
                }
                return;
            }
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        *current = Some(ActiveCall {
            session: CallSession::new_incoming(call_id, local.as_str(), caller.as_str()),
            media: None,
            subscriptions: Vec::new(),
            media_stop: None,
        });
        drop(current);

        info!("Call {call_id}: offered by {caller}");
        self.events.dispatch(&Event::IncomingCall {
            caller: caller.clone(),
        });

        if answer_crossed {
            // The local user already asked to talk to this peer.
            self.resolve_incoming(call_id, CallDecision::Accept).await;
            return;
        }

        // Wait for the decision off the dispatch path.
        let this = self.clone();
        tokio::spawn(async move {
            let decision =
                match tokio::time::timeout(this.config.answer_timeout, this.prompt.decide(&caller))
                    .await
                {
                    Ok(decision) => decision,
                    Err(_) => {
                        info!("Call {call_id}: no decision in time; declining");
                        CallDecision::Reject
                    }
                };
            this.resolve_incoming(call_id, decision).await;
        });
    }

    async fn resolve_incoming(self: &Arc<Self>, call_id: u64, decision: CallDecision) {
        let mut current = self.current.lock().await;
        let Some(active) = current.as_mut().filter(|a| a.session.id == call_id) else {
            debug!("Decision for call {call_id} arrived after it ended");
            return;
        };
        let caller = active.session.remote_id.clone();
        let local = active.session.local_id.clone();

        match decision {
            CallDecision::Accept => {
                if let Err(e) = active.session.apply_transition(CallTransition::LocalAccepted) {
                    warn!("Cannot accept call {call_id}: {e}");
                    return;
                }
                let room = active.session.room_id();
                drop(current);

                self.signaling
                    .send_frame(SignalFrame::call_accepted(&caller, &local));
                info!("Call {call_id}: accepted call from {caller}");
                self.connected(call_id, caller, room);
            }
            CallDecision::Reject => {
                let ended = self.take_if(&mut current, Some(call_id), EndReason::Declined);
                drop(current);

                if let Some(active) = ended {
                    self.signaling
                        .send_frame(SignalFrame::call_rejected(&caller, &local));
                    self.teardown(active, EndReason::Declined).await;
                }
            }
        }
    }

    fn connected(self: &Arc<Self>, call_id: u64, peer: String, room: String) {
        self.events.dispatch(&Event::CallConnected {
            peer: peer.clone(),
            room: room.clone(),
        });
        tokio::spawn(self.clone().establish_media(call_id, peer, room));
    }

    /// Create the media session for a connected call and follow its events
    /// until it disconnects or the call moves on.
    async fn establish_media(self: Arc<Self>, call_id: u64, peer: String, room: String) {
        let (handle, mut media_events) = match self.media.create_session(&self.config.media).await
        {
            Ok(created) => created,
            Err(e) => {
                warn!("Call {call_id}: failed to create media session: {e}");
                self.finish(call_id, EndReason::MediaFailed).await;
                return;
            }
        };

        let (stop, mut stopped) = oneshot::channel();
        let attached = {
            let mut current = self.current.lock().await;
            match current.as_mut() {
                Some(active)
                    if active.session.id == call_id
                        && active.session.state.is_connected()
                        && active.media.is_none() =>
                {
                    active.media = Some(handle.clone());
                    active.media_stop = Some(stop);
                    true
                }
                _ => false,
            }
        };
        if !attached {
            debug!("Call {call_id} ended while media was starting");
            handle.disconnect().await;
            return;
        }

        loop {
            let event = tokio::select! {
                _ = &mut stopped => {
                    debug!("Call {call_id}: no longer following media events");
                    break;
                }
                event = media_events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                MediaEvent::ReadyToCall => {
                    if !self.is_current(call_id).await {
                        break;
                    }
                    match handle.join_room(&room).await {
                        Ok(()) => {
                            info!("Call {call_id}: joined room {room}");
                            self.events.dispatch(&Event::MediaJoined {
                                peer: peer.clone(),
                                room: room.clone(),
                            });
                        }
                        Err(e) => {
                            warn!("Call {call_id}: failed to join room {room}: {e}");
                            self.finish(call_id, EndReason::MediaFailed).await;
                            break;
                        }
                    }
                }
                MediaEvent::Disconnected => {
                    self.finish(call_id, EndReason::Disconnected).await;
                    break;
                }
            }
        }
    }

    async fn is_current(&self, call_id: u64) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| active.session.id == call_id)
    }

    /// End `call_id` with `reason` if it is current and the transition is legal.
    async fn finish(&self, call_id: u64, reason: EndReason) -> bool {
        let ended = {
            let mut current = self.current.lock().await;
            self.take_if(&mut current, Some(call_id), reason)
        };
        match ended {
            Some(active) => {
                self.teardown(active, reason).await;
                true
            }
            None => false,
        }
    }

    /// Remove the current call if it matches `call_id` (any call when `None`)
    /// and may end with `reason`. Reply handlers are unregistered here.
    fn take_if(
        &self,
        current: &mut Option<ActiveCall>,
        call_id: Option<u64>,
        reason: EndReason,
    ) -> Option<ActiveCall> {
        let active = current.as_mut()?;
        if call_id.is_some_and(|id| id != active.session.id) {
            return None;
        }
        if let Err(e) = active
            .session
            .apply_transition(CallTransition::Terminated { reason })
        {
            debug!("Call {} not ended: {e}", active.session.id);
            return None;
        }

        let mut active = current.take()?;
        for subscription in active.subscriptions.drain(..) {
            self.signaling.off(&subscription);
        }
        if let Some(stop) = active.media_stop.take() {
            let _ = stop.send(());
        }
        Some(active)
    }

    /// Release what a removed call owned and report it.
    async fn teardown(&self, active: ActiveCall, reason: EndReason) {
        if reason != EndReason::Disconnected
            && let Some(media) = &active.media
        {
            media.disconnect().await;
        }
        info!(
            "Call {} with {} ended: {:?}",
            active.session.id, active.session.remote_id, reason
        );
        self.events.dispatch(&Event::CallEnded {
            peer: active.session.remote_id,
            reason,
        });
    }
}

impl Drop for CallCoordinator {
    fn drop(&mut self) {
        self.signaling.off(&self.offer_subscription);
    }
}
