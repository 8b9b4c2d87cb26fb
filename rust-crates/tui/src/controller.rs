//! Crash session state machine.
//!
//! `idle → waiting → playing → {crashed | won}`, and back to `idle` on reset.
//! Chain calls run on spawned tasks and come back as [`Outcome`]s tagged with
//! the session id they were issued for; outcomes for a session that is no
//! longer current are dropped.

use crate::{
    error::ChainError,
    ledger::{
        CrashLedger,
        FeedEntry,
        WalletState,
        WithdrawReceipt,
    },
    session::{
        BASE_MULTIPLIER,
        COUNTDOWN_SECONDS,
        Session,
        SessionId,
        SessionStatus,
        ensure_stake_covered,
        format_eth,
        format_multiplier,
    },
    timers::{
        SessionTimers,
        Tick,
    },
};
use ethers::types::{
    Address,
    U256,
};
use std::{
    collections::VecDeque,
    future::Future,
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{
    debug,
    info,
    warn,
};

#[cfg(test)]
mod tests;

const FEED_DEPTH: usize = 8;

/// What a status poll learned about a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusReport {
    Active,
    Crashed { crash_point: u64 },
    Withdrawn { multiplier: u64 },
}

/// Result of a background chain call.
#[derive(Debug)]
pub enum Outcome {
    Connected(Result<Address, ChainError>),
    Recovered(Result<Option<SessionId>, ChainError>),
    Started(Result<SessionId, ChainError>),
    Withdrawn {
        session_id: SessionId,
        result: Result<Option<WithdrawReceipt>, ChainError>,
    },
    Multiplier {
        session_id: SessionId,
        result: Result<u64, ChainError>,
    },
    Status {
        session_id: SessionId,
        result: Result<StatusReport, ChainError>,
    },
    Balances(Result<(WalletState, U256), ChainError>),
    Feed(Result<(Vec<FeedEntry>, u64), ChainError>),
}

/// Everything the presentation layer needs for one frame.
#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub session: Session,
    pub wallet: WalletState,
    pub pool_balance: U256,
    pub stake: U256,
    pub loading: bool,
    pub error: Option<String>,
    pub status_line: String,
    pub feed: Vec<FeedEntry>,
}

pub struct SessionController<L> {
    ledger: Arc<L>,
    stake: U256,
    session: Session,
    wallet: WalletState,
    pool_balance: U256,
    loading: bool,
    connecting: bool,
    error: Option<String>,
    status_line: String,
    timers: SessionTimers,
    multiplier_in_flight: Option<SessionId>,
    status_in_flight: Option<SessionId>,
    feed: VecDeque<FeedEntry>,
    feed_cursor: Option<u64>,
    feed_in_flight: bool,
    outcomes: mpsc::UnboundedSender<Outcome>,
}

impl<L: CrashLedger> SessionController<L> {
    pub fn new(
        ledger: Arc<L>,
        stake: U256,
    ) -> (Self, mpsc::UnboundedReceiver<Outcome>) {
        let (outcomes, outcome_rx) = mpsc::unbounded_channel();
        let controller = Self {
            ledger,
            stake,
            session: Session::default(),
            wallet: WalletState::default(),
            pool_balance: U256::zero(),
            loading: false,
            connecting: false,
            error: None,
            status_line: String::from("Ready"),
            timers: SessionTimers::default(),
            multiplier_in_flight: None,
            status_in_flight: None,
            feed: VecDeque::with_capacity(FEED_DEPTH),
            feed_cursor: None,
            feed_in_flight: false,
            outcomes,
        };
        (controller, outcome_rx)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading || self.connecting
    }

    pub fn wallet(&self) -> &WalletState {
        &self.wallet
    }

    pub fn active_timers(&self) -> usize {
        self.timers.active()
    }

    pub fn snapshot(&self) -> AppSnapshot {
        AppSnapshot {
            session: self.session.clone(),
            wallet: self.wallet,
            pool_balance: self.pool_balance,
            stake: self.stake,
            loading: self.loading || self.connecting,
            error: self.error.clone(),
            status_line: self.status_line.clone(),
            feed: self.feed.iter().cloned().collect(),
        }
    }

    /// Next session timer to fire; pends while none is running.
    pub async fn next_tick(&mut self) -> Tick {
        self.timers.next().await
    }

    /// Does not hold the bet/withdraw gate.
    pub fn connect(&mut self) {
        if self.connecting {
            return;
        }
        self.connecting = true;
        self.error = None;
        self.set_status("Connecting wallet...");
        let ledger = self.ledger.clone();
        self.dispatch(async move { Outcome::Connected(ledger.connect().await) });
    }

    pub fn start_session(&mut self) {
        if self.loading {
            debug!("start ignored: another action is in flight");
            return;
        }
        if self.session.status != SessionStatus::Idle {
            self.set_status("Reset the finished session before starting a new one");
            return;
        }
        if self.wallet.address.is_none() {
            self.error = Some("Connect a wallet first".into());
            return;
        }
        self.loading = true;
        self.error = None;
        self.session.last_payout = None;
        self.set_status(format!("Placing {} ETH stake...", format_eth(self.stake, 4)));
        let ledger = self.ledger.clone();
        let stake = self.stake;
        self.dispatch(async move {
            let result: Result<_, ChainError> = async {
                let wallet = ledger.read_wallet_balance().await?;
                ensure_stake_covered(wallet.balance, stake)?;
                ledger.submit_bet(stake).await
            }
            .await;
            Outcome::Started(result)
        });
    }

    pub fn withdraw(&mut self) {
        if self.loading {
            debug!("withdraw ignored: another action is in flight");
            return;
        }
        let Some(session_id) = self.session.id else {
            return;
        };
        if self.session.status != SessionStatus::Playing {
            return;
        }
        self.loading = true;
        self.error = None;
        self.set_status(format!(
            "Cashing out session {session_id} at ~{}...",
            format_multiplier(self.session.multiplier)
        ));
        let ledger = self.ledger.clone();
        self.dispatch(async move {
            Outcome::Withdrawn {
                session_id,
                result: ledger.submit_withdraw(session_id).await,
            }
        });
    }

    /// Returns to idle from a finished session, or dismisses an idle error.
    pub fn reset(&mut self) {
        let status = self.session.status;
        if !status.is_terminal() && status != SessionStatus::Idle {
            return;
        }
        self.timers.cancel_all();
        self.session = Session::default();
        self.error = None;
        self.multiplier_in_flight = None;
        self.status_in_flight = None;
        self.set_status("Ready");
    }

    /// Releases every session timer.
    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
        info!("session timers released");
    }

    pub fn on_tick(&mut self, tick: Tick) {
        match tick {
            Tick::Countdown => self.on_countdown(),
            Tick::Multiplier => self.poll_multiplier(),
            Tick::Status => self.poll_status(),
        }
    }

    pub fn poll_feed(&mut self) {
        if self.feed_in_flight {
            return;
        }
        self.feed_in_flight = true;
        let ledger = self.ledger.clone();
        let cursor = self.feed_cursor;
        self.dispatch(async move { Outcome::Feed(ledger.read_events_since(cursor).await) });
    }

    pub fn apply(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Connected(result) => self.apply_connected(result),
            Outcome::Recovered(result) => self.apply_recovered(result),
            Outcome::Started(result) => self.apply_started(result),
            Outcome::Withdrawn { session_id, result } => {
                self.apply_withdrawn(session_id, result)
            }
            Outcome::Multiplier { session_id, result } => {
                self.apply_multiplier(session_id, result)
            }
            Outcome::Status { session_id, result } => {
                self.apply_status(session_id, result)
            }
            Outcome::Balances(result) => self.apply_balances(result),
            Outcome::Feed(result) => self.apply_feed(result),
        }
    }

    fn on_countdown(&mut self) {
        if self.session.status != SessionStatus::Waiting {
            self.timers.stop_countdown();
            return;
        }
        if self.session.countdown <= 1 {
            self.session.countdown = 0;
            self.session.status = SessionStatus::Playing;
            self.timers.start_polling();
            self.set_status("In flight, cash out before the crash!");
            info!(session_id = ?self.session.id, "session playing");
        } else {
            self.session.countdown -= 1;
        }
    }

    fn poll_multiplier(&mut self) {
        let Some(session_id) = self.playing_session() else {
            return;
        };
        if self.multiplier_in_flight == Some(session_id) {
            return;
        }
        self.multiplier_in_flight = Some(session_id);
        let ledger = self.ledger.clone();
        self.dispatch(async move {
            Outcome::Multiplier {
                session_id,
                result: ledger.read_multiplier(session_id).await,
            }
        });
    }

    fn poll_status(&mut self) {
        let Some(session_id) = self.playing_session() else {
            return;
        };
        if self.status_in_flight == Some(session_id) {
            return;
        }
        self.status_in_flight = Some(session_id);
        let ledger = self.ledger.clone();
        self.dispatch(async move {
            let result: Result<_, ChainError> = async {
                if ledger.read_status(session_id).await? {
                    return Ok(StatusReport::Active);
                }
                let record = ledger.read_game_record(session_id).await?;
                if record.has_withdrawn && !record.has_crashed {
                    Ok(StatusReport::Withdrawn {
                        multiplier: record.multiplier,
                    })
                } else {
                    Ok(StatusReport::Crashed {
                        crash_point: record.crash_point,
                    })
                }
            }
            .await;
            Outcome::Status { session_id, result }
        });
    }

    fn refresh_balances(&self) {
        let ledger = self.ledger.clone();
        self.dispatch(async move {
            let result: Result<_, ChainError> = async {
                let wallet = ledger.read_wallet_balance().await?;
                let pool = ledger.read_pool_balance().await?;
                Ok((wallet, pool))
            }
            .await;
            Outcome::Balances(result)
        });
    }

    fn recover_session(&self, player: Address) {
        let ledger = self.ledger.clone();
        self.dispatch(async move {
            let result: Result<_, ChainError> = async {
                let Some(session_id) = ledger.read_player_session(player).await? else {
                    return Ok(None);
                };
                let record = ledger.read_game_record(session_id).await?;
                Ok(record.is_live().then_some(session_id))
            }
            .await;
            Outcome::Recovered(result)
        });
    }

    fn apply_connected(&mut self, result: Result<Address, ChainError>) {
        self.connecting = false;
        match result {
            Ok(address) => {
                self.wallet.address = Some(address);
                self.set_status(format!("Connected as {address:?}"));
                self.refresh_balances();
                self.recover_session(address);
            }
            Err(err) => {
                warn!(%err, "wallet connection failed");
                self.error = Some(err.to_string());
            }
        }
    }

    fn apply_recovered(&mut self, result: Result<Option<SessionId>, ChainError>) {
        match result {
            Ok(Some(session_id)) => {
                if self.session.status != SessionStatus::Idle || self.loading {
                    debug!(session_id, "not resuming: controller is busy");
                    return;
                }
                self.session = Session {
                    id: Some(session_id),
                    status: SessionStatus::Playing,
                    ..Session::default()
                };
                self.timers.start_polling();
                self.set_status(format!("Resumed session {session_id}"));
                info!(session_id, "resumed live session");
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "checking for a live session failed"),
        }
    }

    fn apply_started(&mut self, result: Result<SessionId, ChainError>) {
        self.loading = false;
        match result {
            Ok(session_id) => {
                self.session = Session {
                    id: Some(session_id),
                    status: SessionStatus::Waiting,
                    multiplier: BASE_MULTIPLIER,
                    countdown: COUNTDOWN_SECONDS,
                    last_payout: None,
                };
                self.timers.start_countdown();
                self.set_status(format!("Session {session_id} started"));
                info!(session_id, "session waiting");
                self.refresh_balances();
            }
            Err(err) => {
                warn!(%err, "starting a session failed");
                self.error = Some(err.to_string());
                self.session.status = SessionStatus::Idle;
                self.set_status("Ready");
            }
        }
    }

    fn apply_withdrawn(
        &mut self,
        session_id: SessionId,
        result: Result<Option<WithdrawReceipt>, ChainError>,
    ) {
        self.loading = false;
        if !self.session.is_current(session_id) {
            debug!(session_id, "dropping withdraw outcome for a stale session");
            return;
        }
        match result {
            Ok(Some(receipt)) => {
                if self.session.status != SessionStatus::Playing {
                    warn!(
                        session_id,
                        status = %self.session.status,
                        "withdraw confirmed after the session settled"
                    );
                    return;
                }
                self.timers.stop_polling();
                self.session.status = SessionStatus::Won;
                self.session.multiplier = receipt.multiplier;
                self.session.last_payout = Some(receipt.payout);
                self.set_status(format!(
                    "Cashed out at {} for {} ETH",
                    format_multiplier(receipt.multiplier),
                    format_eth(receipt.payout, 4)
                ));
                info!(session_id, multiplier = receipt.multiplier, "session won");
            }
            Ok(None) => {
                warn!(session_id, "withdraw confirmed without a payout record");
                self.set_status("Withdraw confirmed without a payout record; watching status");
            }
            Err(err) => {
                warn!(session_id, %err, "withdraw failed");
                self.error = Some(err.to_string());
            }
        }
        self.refresh_balances();
    }

    fn apply_multiplier(&mut self, session_id: SessionId, result: Result<u64, ChainError>) {
        if self.multiplier_in_flight == Some(session_id) {
            self.multiplier_in_flight = None;
        }
        if !self.session.is_current(session_id)
            || self.session.status != SessionStatus::Playing
        {
            return;
        }
        match result {
            Ok(multiplier) => self.session.multiplier = multiplier,
            Err(err) => warn!(session_id, %err, "multiplier poll failed"),
        }
    }

    fn apply_status(
        &mut self,
        session_id: SessionId,
        result: Result<StatusReport, ChainError>,
    ) {
        if self.status_in_flight == Some(session_id) {
            self.status_in_flight = None;
        }
        if !self.session.is_current(session_id)
            || self.session.status != SessionStatus::Playing
        {
            return;
        }
        match result {
            Ok(StatusReport::Active) => {}
            Ok(StatusReport::Crashed { crash_point }) => {
                self.timers.stop_polling();
                self.session.status = SessionStatus::Crashed;
                self.session.multiplier = crash_point;
                self.set_status(format!("Crashed at {}", format_multiplier(crash_point)));
                info!(session_id, crash_point, "session crashed");
                self.refresh_balances();
            }
            Ok(StatusReport::Withdrawn { multiplier }) => {
                if self.loading {
                    // the pending withdraw outcome carries the payout
                    return;
                }
                self.timers.stop_polling();
                self.session.status = SessionStatus::Won;
                self.session.multiplier = multiplier;
                self.set_status(format!(
                    "Session settled as withdrawn at {}",
                    format_multiplier(multiplier)
                ));
                info!(session_id, multiplier, "session settled as withdrawn");
                self.refresh_balances();
            }
            Err(err) => warn!(session_id, %err, "status poll failed"),
        }
    }

    fn apply_balances(&mut self, result: Result<(WalletState, U256), ChainError>) {
        match result {
            Ok((wallet, pool)) => {
                self.wallet.balance = wallet.balance;
                if self.wallet.address.is_none() {
                    self.wallet.address = wallet.address;
                }
                self.pool_balance = pool;
            }
            Err(err) => warn!(%err, "balance refresh failed"),
        }
    }

    fn apply_feed(&mut self, result: Result<(Vec<FeedEntry>, u64), ChainError>) {
        self.feed_in_flight = false;
        match result {
            Ok((entries, next)) => {
                self.feed_cursor = Some(next);
                for entry in entries {
                    if self.feed.len() == FEED_DEPTH {
                        self.feed.pop_back();
                    }
                    self.feed.push_front(entry);
                }
            }
            Err(err) => warn!(%err, "activity feed poll failed"),
        }
    }

    fn playing_session(&self) -> Option<SessionId> {
        match self.session.status {
            SessionStatus::Playing => self.session.id,
            _ => None,
        }
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status_line = message.into();
    }

    fn dispatch<F>(&self, task: F)
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let _ = outcomes.send(task.await);
        });
    }
}
