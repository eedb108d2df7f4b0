//! Generic Feed Adapter
//!
//! [`FeedAdapter`] implements [`BrokerAdapter`] once for every
//! [`BrokerProtocol`]. It owns the reference-counted subscription table,
//! token routing, symbol state and the supervisor task that consumes wire
//! events and reconnects after unsolicited closes.
//!
//! # Locking
//!
//! Subscriptions, routes and symbol state live in one `FeedBook` behind a
//! single `parking_lot::Mutex`. Upstream sends are non-blocking queue pushes,
//! so they happen under that lock; bus publishing happens after it is
//! released. Replay after (re)connect runs under the lock before the state
//! flips to `CONNECTED`, so a concurrent `subscribe` either lands in the
//! replay or sees the live link.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::protocol::{BrokerProtocol, Control, Inbound};
use crate::application::ports::{
    AdapterError, AdapterReply, AdapterState, AdapterStats, AdapterStatus, BrokerAdapter,
    BrokerCredentials, RawFrame, ReplyStatus, SessionOptions, SubscribeReply, SymbolResolver,
    WireConnector, WireError, WireEvent, WireLink,
};
use crate::domain::streaming::{
    CanonicalTick, DEFAULT_DEPTH, Mode, SymbolStateCache, TickUpdate, fallback_depth,
};
use crate::domain::subscription::{
    BrokerInstrument, Release, Route, Subscription, SubscriptionKey, SubscriptionStats,
    SubscriptionTable, TokenMap,
};
use crate::infrastructure::bus::{BusContext, BusError, BusPublisher};
use crate::infrastructure::config::FeedSettings;
use crate::infrastructure::metrics::{self, DropReason};
use crate::infrastructure::wire::{ReconnectConfig, ReconnectPolicy};

// =============================================================================
// Dependencies
// =============================================================================

/// Collaborators injected into every adapter.
#[derive(Clone)]
pub struct AdapterDeps {
    /// Canonical symbol to broker token lookup.
    pub resolver: Arc<dyn SymbolResolver>,
    /// Opens broker sockets.
    pub connector: Arc<dyn WireConnector>,
    /// Shared publish bus.
    pub bus: Arc<BusContext>,
    /// Feed timing and capacity settings.
    pub settings: FeedSettings,
}

// =============================================================================
// Book
// =============================================================================

/// Everything mutated by subscribe, unsubscribe and tick ingestion.
#[derive(Debug)]
struct FeedBook {
    subscriptions: SubscriptionTable,
    routes: TokenMap,
    states: SymbolStateCache,
}

impl FeedBook {
    fn new(settings: &FeedSettings) -> Self {
        Self {
            subscriptions: SubscriptionTable::new(),
            routes: TokenMap::new(settings.route_grace),
            states: SymbolStateCache::new(),
        }
    }

    fn clear(&mut self) {
        self.subscriptions.clear();
        self.routes.clear();
        self.states.clear();
    }

    /// Merge an update and shape one tick per active mode of every route.
    fn collect_ticks(
        &mut self,
        broker: &'static str,
        update: &TickUpdate,
        out: &mut Vec<CanonicalTick>,
    ) {
        let routes = self.routes.resolve(&update.instrument);
        if routes.is_empty() {
            tracing::debug!(
                broker,
                instrument = %update.instrument,
                "Dropping tick for unmapped token"
            );
            metrics::record_tick_dropped(broker, DropReason::Unmapped);
            return;
        }

        let state = self.states.apply(update);
        if !state.is_primed() {
            metrics::record_tick_dropped(broker, DropReason::Unprimed);
            return;
        }

        for route in routes {
            for (mode, depth) in self.subscriptions.active_modes(&route.exchange, &route.symbol) {
                out.push(state.to_tick(&route.symbol, &route.exchange, mode, usize::from(depth)));
            }
        }
    }

    fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            subscriptions: self.subscriptions.len(),
            references: self.subscriptions.total_references(),
            routed_instruments: self.routes.len(),
            cached_states: self.states.len(),
        }
    }
}

/// Outcome of handing a fresh link to the adapter.
enum Activation {
    Live,
    Cancelled,
    Failed(WireError),
}

// =============================================================================
// Adapter
// =============================================================================

struct Shared<P: BrokerProtocol> {
    protocol: RwLock<Option<Arc<P>>>,
    user_id: RwLock<String>,
    book: Mutex<FeedBook>,
    link: RwLock<Option<Arc<dyn WireLink>>>,
    status: watch::Sender<AdapterStatus>,
    running: AtomicBool,
    session: Mutex<Option<CancellationToken>>,
    publisher: RwLock<Option<Arc<BusPublisher>>>,
    resolver: Arc<dyn SymbolResolver>,
    connector: Arc<dyn WireConnector>,
    bus: Arc<BusContext>,
    settings: FeedSettings,
}

/// Adapter for one broker, parameterized by its protocol.
pub struct FeedAdapter<P: BrokerProtocol> {
    shared: Arc<Shared<P>>,
}

impl<P: BrokerProtocol> FeedAdapter<P> {
    /// Create an uninitialized adapter.
    #[must_use]
    pub fn new(deps: AdapterDeps) -> Self {
        let (status, _) = watch::channel(AdapterStatus::new(AdapterState::Uninitialized));
        Self {
            shared: Arc::new(Shared {
                protocol: RwLock::new(None),
                user_id: RwLock::new(String::new()),
                book: Mutex::new(FeedBook::new(&deps.settings)),
                link: RwLock::new(None),
                status,
                running: AtomicBool::new(false),
                session: Mutex::new(None),
                publisher: RwLock::new(None),
                resolver: deps.resolver,
                connector: deps.connector,
                bus: deps.bus,
                settings: deps.settings,
            }),
        }
    }

    /// Create an adapter behind the trait object the registry hands out.
    #[must_use]
    pub fn boxed(deps: AdapterDeps) -> Arc<dyn BrokerAdapter> {
        Arc::new(Self::new(deps))
    }
}

impl<P: BrokerProtocol> Shared<P> {
    fn protocol(&self) -> Result<Arc<P>, AdapterError> {
        self.protocol
            .read()
            .clone()
            .ok_or(AdapterError::NotInitialized)
    }

    fn state(&self) -> AdapterState {
        self.status.borrow().state
    }

    fn set_state(&self, state: AdapterState) {
        self.status.send_replace(AdapterStatus::new(state));
        metrics::set_connection_state(P::NAME, state.gauge_value());
    }

    fn is_live(&self, cancel: &CancellationToken) -> bool {
        self.running.load(Ordering::SeqCst) && !cancel.is_cancelled()
    }

    /// Set `state` only while the session is still live. Checked under the
    /// book lock, which `disconnect` also holds while it writes
    /// `DISCONNECTED`, so a late worker can never overwrite it.
    fn advance(&self, state: AdapterState, cancel: &CancellationToken) -> bool {
        let _book = self.book.lock();
        if !self.is_live(cancel) {
            return false;
        }
        self.set_state(state);
        true
    }

    fn live_link(&self) -> Option<Arc<dyn WireLink>> {
        self.link
            .read()
            .as_ref()
            .filter(|link| link.is_connected())
            .cloned()
    }

    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------

    async fn open_link(
        &self,
        protocol: &P,
        events: mpsc::Sender<WireEvent>,
    ) -> Result<Arc<dyn WireLink>, AdapterError> {
        let endpoint = protocol.endpoint();
        let options = SessionOptions {
            heartbeat: protocol.heartbeat(&self.settings),
            outbound_capacity: self.settings.outbound_capacity,
        };
        let limit = self.settings.connect_timeout;

        match tokio::time::timeout(limit, self.connector.connect(&endpoint, &options, events)).await
        {
            Ok(Ok(link)) => Ok(link),
            Ok(Err(e)) => Err(AdapterError::Connect(e.to_string())),
            Err(_) => Err(AdapterError::ConnectTimeout(
                u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    /// Send login frames and replay every held subscription, then publish the
    /// link and flip to `CONNECTED`, all under the book lock.
    fn activate(
        &self,
        protocol: &P,
        link: Arc<dyn WireLink>,
        cancel: &CancellationToken,
    ) -> Activation {
        let book = self.book.lock();
        if !self.is_live(cancel) {
            return Activation::Cancelled;
        }

        for frame in protocol.login_frames() {
            if let Err(e) = link.send(frame) {
                return Activation::Failed(e);
            }
        }

        let groups = book.subscriptions.replay_groups();
        for ((mode, depth), instruments) in &groups {
            tracing::debug!(
                broker = P::NAME,
                mode = %mode,
                depth,
                count = instruments.len(),
                "Replaying subscriptions"
            );
            for frame in protocol.subscribe_frames((*mode, *depth), instruments) {
                if let Err(e) = link.send(frame) {
                    return Activation::Failed(e);
                }
            }
        }

        *self.link.write() = Some(link);
        self.set_state(AdapterState::Connected);
        metrics::set_subscriptions(P::NAME, book.subscriptions.len());
        Activation::Live
    }

    async fn supervise(
        self: Arc<Self>,
        protocol: Arc<P>,
        mut events: mpsc::Receiver<WireEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let reason = tokio::select! {
                () = cancel.cancelled() => return,
                event = events.recv() => match event {
                    Some(WireEvent::Opened) => {
                        tracing::debug!(broker = P::NAME, "Broker socket open");
                        continue;
                    }
                    Some(WireEvent::Frame(frame)) => {
                        self.ingest(&protocol, &frame);
                        continue;
                    }
                    Some(WireEvent::Closed { reason }) => reason,
                    None => "wire event channel closed".to_string(),
                },
            };

            if !self.is_live(&cancel) {
                return;
            }
            tracing::warn!(broker = P::NAME, reason = %reason, "Broker socket closed unexpectedly");

            match self.recover(&protocol, &cancel).await {
                Some(next) => events = next,
                None => return,
            }
        }
    }

    /// Reconnect with backoff. Returns the new event stream, or `None` when
    /// cancelled or out of attempts.
    async fn recover(
        &self,
        protocol: &Arc<P>,
        cancel: &CancellationToken,
    ) -> Option<mpsc::Receiver<WireEvent>> {
        {
            let mut book = self.book.lock();
            if !self.is_live(cancel) {
                return None;
            }
            if let Some(link) = self.link.write().take() {
                link.close();
            }
            book.states.clear();
            self.set_state(AdapterState::Reconnecting);
        }

        let mut policy = ReconnectPolicy::new(ReconnectConfig::from_feed_settings(&self.settings));
        loop {
            let Some(delay) = policy.next_delay() else {
                self.give_up(policy.attempt_count(), cancel);
                return None;
            };
            let attempt = policy.attempt_count();
            tracing::info!(
                broker = P::NAME,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to broker feed"
            );
            metrics::record_reconnect(P::NAME);

            tokio::select! {
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
            if !self.advance(AdapterState::Connecting, cancel) {
                return None;
            }
            let (tx, rx) = mpsc::channel(self.settings.event_channel_capacity.max(1));
            let link = match self.open_link(protocol, tx).await {
                Ok(link) => link,
                Err(e) => {
                    tracing::warn!(broker = P::NAME, attempt, error = %e, "Reconnect attempt failed");
                    if !self.advance(AdapterState::Reconnecting, cancel) {
                        return None;
                    }
                    continue;
                }
            };

            match self.activate(protocol, Arc::clone(&link), cancel) {
                Activation::Live => {
                    tracing::info!(broker = P::NAME, attempt, "Reconnected to broker feed");
                    return Some(rx);
                }
                Activation::Cancelled => {
                    link.close();
                    return None;
                }
                Activation::Failed(e) => {
                    link.close();
                    tracing::warn!(broker = P::NAME, attempt, error = %e, "Resubscribe failed");
                    if !self.advance(AdapterState::Reconnecting, cancel) {
                        return None;
                    }
                }
            }
        }
    }

    fn give_up(&self, attempts: u32, cancel: &CancellationToken) {
        let _book = self.book.lock();
        if !self.is_live(cancel) {
            return;
        }
        tracing::error!(
            broker = P::NAME,
            attempts,
            "Max reconnect attempts exceeded, giving up"
        );
        self.running.store(false, Ordering::SeqCst);
        if let Some(token) = self.session.lock().take() {
            token.cancel();
        }
        self.status.send_replace(AdapterStatus {
            state: AdapterState::Disconnected,
            fatal: Some(AdapterError::MaxReconnectAttemptsExceeded(attempts)),
        });
        metrics::set_connection_state(P::NAME, AdapterState::Disconnected.gauge_value());
    }

    fn abort_connect(&self, cancel: &CancellationToken) {
        let _book = self.book.lock();
        // A disconnect during the attempt already settled the state.
        if cancel.is_cancelled() {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(token) = self.session.lock().take() {
            token.cancel();
        }
        if let Some(publisher) = self.publisher.write().take() {
            publisher.close();
        }
        self.set_state(AdapterState::Initialized);
    }

    // -------------------------------------------------------------------------
    // Tick path
    // -------------------------------------------------------------------------

    fn ingest(&self, protocol: &P, frame: &RawFrame) {
        let started = Instant::now();
        metrics::record_frame_received(P::NAME);

        let decoded = match protocol.decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(broker = P::NAME, len = frame.len(), error = %e, "Dropping undecodable frame");
                metrics::record_parse_error(P::NAME);
                return;
            }
        };

        let mut ticks = Vec::new();
        {
            let mut book = self.book.lock();
            book.routes.purge(Instant::now());
            for message in decoded {
                match protocol.normalize(message) {
                    Inbound::Tick(update) => book.collect_ticks(P::NAME, &update, &mut ticks),
                    Inbound::Control(control) => self.on_control(control),
                    Inbound::Ignore => {}
                }
            }
        }

        if !ticks.is_empty() {
            self.publish(&ticks);
            metrics::record_processing_duration(P::NAME, started.elapsed());
        }
    }

    fn on_control(&self, control: Control) {
        match control {
            Control::Heartbeat => tracing::trace!(broker = P::NAME, "Broker heartbeat"),
            Control::Ack(detail) => tracing::debug!(broker = P::NAME, detail = %detail, "Broker acknowledged"),
            Control::Rejected(detail) => {
                tracing::warn!(broker = P::NAME, detail = %detail, "Broker rejected request");
            }
            Control::Disconnect(reason) => {
                tracing::warn!(broker = P::NAME, reason = %reason, "Broker requested disconnect");
                if let Some(link) = self.link.read().as_ref() {
                    link.close();
                }
            }
        }
    }

    fn publish(&self, ticks: &[CanonicalTick]) {
        let Some(publisher) = self.publisher.read().clone() else {
            return;
        };

        let mut published = 0_u64;
        for tick in ticks {
            match publisher.publish_tick(P::NAME, tick) {
                Ok(delivered) => {
                    published += 1;
                    if delivered == 0 {
                        metrics::record_tick_dropped(P::NAME, DropReason::NoReceivers);
                    }
                }
                Err(BusError::Closed) => break,
                Err(e) => {
                    tracing::warn!(broker = P::NAME, topic = %tick.topic(), error = %e, "Publish failed");
                }
            }
        }
        metrics::record_ticks_published(P::NAME, published);
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    fn subscribe_locked(
        &self,
        protocol: &P,
        key: SubscriptionKey,
        instrument: BrokerInstrument,
        requested: u8,
        actual: u8,
    ) -> Result<(Subscription, u32), AdapterError> {
        let mut book = self.book.lock();

        if let Some(ref_count) = book.subscriptions.acquire_existing(&key)
            && let Some(existing) = book.subscriptions.get(&key)
        {
            return Ok((existing.clone(), ref_count));
        }

        let level = (key.mode, actual);
        let upgrades = book
            .subscriptions
            .top_level(&instrument)
            .is_none_or(|top| level > top);
        if upgrades && let Some(link) = self.live_link() {
            link.send_all(protocol.subscribe_frames(level, std::slice::from_ref(&instrument)))
                .map_err(|e| AdapterError::Subscription(e.to_string()))?;
        }

        book.routes
            .bind(&instrument, Route::new(key.exchange.as_str(), key.symbol.as_str()));
        let subscription = book
            .subscriptions
            .insert(key, instrument, requested, actual)
            .clone();
        metrics::set_subscriptions(P::NAME, book.subscriptions.len());
        Ok((subscription, 1))
    }

    fn unsubscribe_locked(&self, protocol: &P, key: &SubscriptionKey) -> Result<u32, AdapterError> {
        let mut book = self.book.lock();

        let subscription = match book.subscriptions.release(key)? {
            Release::Retained { ref_count } => return Ok(ref_count),
            Release::Removed(subscription) => subscription,
        };

        let released = (key.mode, subscription.actual_depth);
        if let Some(link) = self.live_link() {
            let instrument = &subscription.instrument;
            let frames = match book.subscriptions.top_level(instrument) {
                None => protocol.unsubscribe_frames(released, std::slice::from_ref(instrument)),
                Some(top) if top >= released => Vec::new(),
                Some(top) => protocol.downgrade_frames(released, top, instrument),
            };
            if let Err(e) = link.send_all(frames) {
                book.subscriptions.restore(key.clone(), subscription);
                return Err(AdapterError::Unsubscription(e.to_string()));
            }
        }

        if !book.subscriptions.holds_symbol(&key.exchange, &key.symbol) {
            book.routes.retire(
                &subscription.instrument,
                &Route::new(key.exchange.as_str(), key.symbol.as_str()),
                Instant::now(),
            );
        }
        metrics::set_subscriptions(P::NAME, book.subscriptions.len());
        Ok(0)
    }
}

// =============================================================================
// BrokerAdapter
// =============================================================================

#[async_trait]
impl<P: BrokerProtocol> BrokerAdapter for FeedAdapter<P> {
    fn broker(&self) -> &'static str {
        P::NAME
    }

    async fn initialize(
        &self,
        broker_name: &str,
        user_id: &str,
        credentials: &BrokerCredentials,
    ) -> Result<AdapterReply, AdapterError> {
        if !broker_name.trim().eq_ignore_ascii_case(P::NAME) {
            return Err(AdapterError::UnsupportedBroker(broker_name.to_string()));
        }
        let state = self.shared.state();
        if !matches!(
            state,
            AdapterState::Uninitialized | AdapterState::Initialized | AdapterState::Disconnected
        ) {
            return Err(AdapterError::InvalidState(state));
        }

        let protocol = P::from_credentials(user_id, credentials)?;
        *self.shared.protocol.write() = Some(Arc::new(protocol));
        *self.shared.user_id.write() = user_id.to_string();
        self.shared.set_state(AdapterState::Initialized);

        tracing::info!(broker = P::NAME, user_id, "Adapter initialized");
        Ok(AdapterReply::success(format!(
            "{} adapter initialized for {user_id}",
            P::NAME
        )))
    }

    async fn connect(&self) -> Result<AdapterReply, AdapterError> {
        let shared = &self.shared;
        match shared.state() {
            AdapterState::Uninitialized => return Err(AdapterError::NotInitialized),
            AdapterState::Initialized | AdapterState::Disconnected => {}
            other => return Err(AdapterError::InvalidState(other)),
        }
        let protocol = shared.protocol()?;

        shared.set_state(AdapterState::Connecting);
        shared.running.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        if let Some(previous) = shared.session.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        if shared.publisher.read().is_none() {
            let owner = format!("{}:{}", P::NAME, shared.user_id.read());
            match shared.bus.open_publisher(&owner).await {
                Ok(publisher) => *shared.publisher.write() = Some(publisher),
                Err(e) => {
                    shared.abort_connect(&cancel);
                    return Err(AdapterError::Bus(e.to_string()));
                }
            }
        }

        let (tx, rx) = mpsc::channel(shared.settings.event_channel_capacity.max(1));
        let link = match shared.open_link(&protocol, tx).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(broker = P::NAME, error = %e, "Connect failed");
                shared.abort_connect(&cancel);
                return Err(e);
            }
        };

        match shared.activate(&protocol, Arc::clone(&link), &cancel) {
            Activation::Live => {}
            Activation::Cancelled => {
                link.close();
                return Err(AdapterError::InvalidState(shared.state()));
            }
            Activation::Failed(e) => {
                link.close();
                shared.abort_connect(&cancel);
                return Err(AdapterError::Connect(e.to_string()));
            }
        }

        tokio::spawn(Arc::clone(shared).supervise(protocol, rx, cancel));
        tracing::info!(broker = P::NAME, "Connected to broker feed");
        Ok(AdapterReply::success(format!("connected to {}", P::NAME)))
    }

    async fn disconnect(&self) -> Result<AdapterReply, AdapterError> {
        let shared = &self.shared;
        let was_running = shared.running.swap(false, Ordering::SeqCst);
        if let Some(token) = shared.session.lock().take() {
            token.cancel();
        }

        {
            let mut book = shared.book.lock();
            if let Some(link) = shared.link.write().take() {
                link.close();
            }
            book.clear();
            if shared.state() != AdapterState::Uninitialized {
                shared.set_state(AdapterState::Disconnected);
            }
        }

        if let Some(publisher) = shared.publisher.write().take() {
            publisher.close();
        }
        metrics::set_subscriptions(P::NAME, 0);

        if was_running {
            tracing::info!(broker = P::NAME, "Disconnected from broker feed");
        }
        Ok(AdapterReply::success(format!("disconnected from {}", P::NAME)))
    }

    async fn subscribe(
        &self,
        symbol: &str,
        exchange: &str,
        mode: Mode,
        depth_level: Option<u8>,
    ) -> Result<SubscribeReply, AdapterError> {
        let shared = &self.shared;
        let protocol = shared.protocol()?;
        let exchange = exchange.trim().to_ascii_uppercase();
        let symbol = symbol.trim();

        let resolved = shared
            .resolver
            .resolve(P::NAME, symbol, &exchange)
            .ok_or_else(|| AdapterError::SymbolNotFound {
                symbol: symbol.to_string(),
                exchange: exchange.clone(),
            })?;
        let instrument = protocol.instrument(&exchange, &resolved.token);

        let (requested, actual) = if mode == Mode::Depth {
            let requested = depth_level.unwrap_or(DEFAULT_DEPTH);
            let actual = fallback_depth(protocol.supported_depths(&exchange), requested);
            (requested, actual)
        } else {
            (0, 0)
        };

        let key = SubscriptionKey::new(exchange.as_str(), symbol, mode);
        let (subscription, ref_count) =
            shared.subscribe_locked(&protocol, key, instrument, requested, actual)?;

        tracing::info!(
            broker = P::NAME,
            exchange = %exchange,
            symbol,
            mode = %mode,
            token = %subscription.instrument.token,
            ref_count,
            "Subscribed"
        );

        // Reported against this caller's request; the held entry may have
        // been created by another caller asking for a different depth.
        let depth_fields = (mode == Mode::Depth).then(|| {
            (
                requested,
                subscription.actual_depth,
                requested != subscription.actual_depth,
            )
        });
        if let Some((requested, actual, true)) = depth_fields {
            tracing::info!(
                broker = P::NAME,
                symbol,
                requested,
                actual,
                "Depth level not supported, using fallback"
            );
        }

        Ok(SubscribeReply {
            status: ReplyStatus::Success,
            message: format!("subscribed to {exchange}:{symbol} in {mode} mode"),
            symbol: symbol.to_string(),
            exchange,
            mode,
            requested_depth: depth_fields.map(|d| d.0),
            actual_depth: depth_fields.map(|d| d.1),
            is_fallback: depth_fields.map(|d| d.2),
        })
    }

    async fn unsubscribe(
        &self,
        symbol: &str,
        exchange: &str,
        mode: Mode,
    ) -> Result<AdapterReply, AdapterError> {
        let shared = &self.shared;
        let protocol = shared.protocol()?;
        let key = SubscriptionKey::new(exchange.trim().to_ascii_uppercase(), symbol.trim(), mode);

        let remaining = shared.unsubscribe_locked(&protocol, &key)?;
        tracing::info!(broker = P::NAME, key = %key, ref_count = remaining, "Unsubscribed");

        Ok(AdapterReply::success(format!("unsubscribed from {key}")))
    }

    fn is_connected(&self) -> bool {
        self.shared.state() == AdapterState::Connected && self.shared.live_link().is_some()
    }

    fn state(&self) -> AdapterState {
        self.shared.state()
    }

    fn watch_status(&self) -> watch::Receiver<AdapterStatus> {
        self.shared.status.subscribe()
    }

    fn stats(&self) -> AdapterStats {
        let subscriptions = self.shared.book.lock().stats();
        AdapterStats {
            broker: P::NAME.to_string(),
            state: self.shared.state(),
            subscriptions,
            bus_port: self
                .shared
                .publisher
                .read()
                .as_ref()
                .and_then(|p| p.port()),
        }
    }
}

impl<P: BrokerProtocol> Drop for FeedAdapter<P> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(token) = self.shared.session.lock().take() {
            token.cancel();
        }
        if let Some(link) = self.shared.link.write().take() {
            link.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockSymbolResolver, ResolvedInstrument};
    use crate::infrastructure::brokers::{DhanProtocol, ZerodhaProtocol};
    use crate::infrastructure::config::BusSettings;
    use crate::infrastructure::wire::WsConnector;

    fn adapter<P: BrokerProtocol>(resolver: MockSymbolResolver) -> FeedAdapter<P> {
        FeedAdapter::new(AdapterDeps {
            resolver: Arc::new(resolver),
            connector: Arc::new(WsConnector::new()),
            bus: Arc::new(BusContext::new(BusSettings {
                base_port: 0,
                ..BusSettings::default()
            })),
            settings: FeedSettings::default(),
        })
    }

    fn dhan_creds() -> BrokerCredentials {
        BrokerCredentials::new()
            .with_client_id("1000000001")
            .with_auth_token("jwt")
    }

    #[tokio::test]
    async fn initialize_rejects_other_broker_names() {
        let adapter = adapter::<DhanProtocol>(MockSymbolResolver::new());

        let err = adapter.initialize("angel", "u1", &dhan_creds()).await.unwrap_err();

        assert_eq!(err, AdapterError::UnsupportedBroker("angel".to_string()));
        assert_eq!(adapter.state(), AdapterState::Uninitialized);
    }

    #[tokio::test]
    async fn missing_credentials_keep_adapter_uninitialized() {
        let adapter = adapter::<DhanProtocol>(MockSymbolResolver::new());

        let err = adapter
            .initialize("dhan", "u1", &BrokerCredentials::new().with_client_id("1"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "AUTH_ERROR");
        assert_eq!(adapter.state(), AdapterState::Uninitialized);
    }

    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let adapter = adapter::<ZerodhaProtocol>(MockSymbolResolver::new());

        assert_eq!(adapter.connect().await.unwrap_err(), AdapterError::NotInitialized);
        assert_eq!(
            adapter.subscribe("INFY", "NSE", Mode::Ltp, None).await.unwrap_err(),
            AdapterError::NotInitialized
        );
    }

    #[tokio::test]
    async fn subscribe_resolves_with_broker_name() {
        let mut resolver = MockSymbolResolver::new();
        resolver
            .expect_resolve()
            .withf(|broker, symbol, exchange| {
                broker == "dhan" && symbol == "INFY" && exchange == "NSE"
            })
            .times(1)
            .returning(|_, _, _| Some(ResolvedInstrument::token("1594")));
        let adapter = adapter::<DhanProtocol>(resolver);
        adapter.initialize("DHAN", "u1", &dhan_creds()).await.unwrap();

        let reply = adapter.subscribe(" INFY ", "nse", Mode::Quote, None).await.unwrap();

        assert_eq!(reply.exchange, "NSE");
        assert_eq!(reply.symbol, "INFY");
        let stats = adapter.stats();
        assert_eq!(stats.subscriptions.routed_instruments, 1);
        assert_eq!(stats.state, AdapterState::Initialized);
    }
}
