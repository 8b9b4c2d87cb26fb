#![allow(non_snake_case)]

use super::*;
use crate::ledger::GameRecord;
use std::{
    sync::Mutex,
    time::Duration,
};
use tokio::time::{
    self,
    Instant,
};

const ONE_ETH: u64 = 1_000_000_000_000_000_000;

fn player() -> Address {
    Address::from_low_u64_be(0xa11ce)
}

fn eth(amount: u64) -> U256 {
    U256::from(amount) * U256::from(ONE_ETH)
}

struct FakeState {
    connect_error: Option<ChainError>,
    balance: U256,
    pool: U256,
    next_session: SessionId,
    player_session: Option<SessionId>,
    bets: Vec<U256>,
    withdraws: Vec<SessionId>,
    withdraw_receipt: Option<WithdrawReceipt>,
    active: bool,
    has_withdrawn: bool,
    has_crashed: bool,
    multiplier: u64,
    crash_point: u64,
    status_reads: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        FakeState {
            connect_error: None,
            balance: eth(10),
            pool: eth(100),
            next_session: 1,
            player_session: None,
            bets: Vec::new(),
            withdraws: Vec::new(),
            withdraw_receipt: None,
            active: true,
            has_withdrawn: false,
            has_crashed: false,
            multiplier: BASE_MULTIPLIER,
            crash_point: 500,
            status_reads: 0,
        }
    }
}

#[derive(Default)]
struct FakeLedger {
    state: Mutex<FakeState>,
}

impl FakeLedger {
    fn with(update: impl FnOnce(&mut FakeState)) -> Arc<Self> {
        let ledger = FakeLedger::default();
        update(&mut ledger.state.lock().unwrap());
        Arc::new(ledger)
    }

    fn update(&self, update: impl FnOnce(&mut FakeState)) {
        update(&mut self.state.lock().unwrap());
    }

    fn bets(&self) -> Vec<U256> {
        self.state.lock().unwrap().bets.clone()
    }

    fn withdraws(&self) -> Vec<SessionId> {
        self.state.lock().unwrap().withdraws.clone()
    }

    fn crash(&self, crash_point: u64) {
        self.update(|s| {
            s.active = false;
            s.has_crashed = true;
            s.crash_point = crash_point;
        });
    }
}

impl CrashLedger for FakeLedger {
    async fn connect(&self) -> Result<Address, ChainError> {
        match self.state.lock().unwrap().connect_error.clone() {
            Some(err) => Err(err),
            None => Ok(player()),
        }
    }

    async fn submit_bet(&self, stake: U256) -> Result<SessionId, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.bets.push(stake);
        state.balance -= stake;
        let id = state.next_session;
        state.next_session += 1;
        Ok(id)
    }

    async fn submit_withdraw(
        &self,
        id: SessionId,
    ) -> Result<Option<WithdrawReceipt>, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.withdraws.push(id);
        if state.withdraw_receipt.is_some() {
            state.active = false;
            state.has_withdrawn = true;
        }
        Ok(state.withdraw_receipt)
    }

    async fn read_status(&self, _id: SessionId) -> Result<bool, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.status_reads += 1;
        Ok(state.active)
    }

    async fn read_multiplier(&self, _id: SessionId) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().multiplier)
    }

    async fn read_game_record(&self, _id: SessionId) -> Result<GameRecord, ChainError> {
        let state = self.state.lock().unwrap();
        Ok(GameRecord {
            player: player(),
            bet_amount: eth(1),
            multiplier: state.multiplier,
            start_time: 1_700_000_000,
            crash_point: state.crash_point,
            is_active: state.active,
            has_withdrawn: state.has_withdrawn,
            has_crashed: state.has_crashed,
        })
    }

    async fn read_player_session(
        &self,
        _player: Address,
    ) -> Result<Option<SessionId>, ChainError> {
        Ok(self.state.lock().unwrap().player_session)
    }

    async fn read_wallet_balance(&self) -> Result<WalletState, ChainError> {
        Ok(WalletState {
            address: Some(player()),
            balance: self.state.lock().unwrap().balance,
        })
    }

    async fn read_pool_balance(&self) -> Result<U256, ChainError> {
        Ok(self.state.lock().unwrap().pool)
    }

    async fn read_events_since(
        &self,
        from: Option<u64>,
    ) -> Result<(Vec<FeedEntry>, u64), ChainError> {
        let entries = match from {
            Some(block) => vec![FeedEntry {
                block,
                event: crate::ledger::LedgerEvent::FundsDeposited {
                    player: player(),
                    amount: eth(1),
                },
            }],
            None => Vec::new(),
        };
        Ok((entries, from.unwrap_or(10) + 1))
    }
}

type Harness = (
    SessionController<FakeLedger>,
    mpsc::UnboundedReceiver<Outcome>,
);

/// Applies every outcome the spawned chain calls produce until none is left.
async fn settle(
    controller: &mut SessionController<FakeLedger>,
    rx: &mut mpsc::UnboundedReceiver<Outcome>,
) {
    loop {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        match rx.try_recv() {
            Ok(outcome) => controller.apply(outcome),
            Err(_) => break,
        }
    }
}

async fn connected(ledger: &Arc<FakeLedger>) -> Harness {
    let (mut controller, mut rx) = SessionController::new(ledger.clone(), eth(1));
    controller.connect();
    settle(&mut controller, &mut rx).await;
    (controller, rx)
}

async fn playing(ledger: &Arc<FakeLedger>) -> Harness {
    let (mut controller, mut rx) = connected(ledger).await;
    controller.start_session();
    settle(&mut controller, &mut rx).await;
    while controller.status() == SessionStatus::Waiting {
        let tick = controller.next_tick().await;
        controller.on_tick(tick);
    }
    assert_eq!(controller.status(), SessionStatus::Playing);
    (controller, rx)
}

/// Runs timer ticks until the session leaves `Playing`.
async fn run_until_settled(
    controller: &mut SessionController<FakeLedger>,
    rx: &mut mpsc::UnboundedReceiver<Outcome>,
) {
    while controller.status() == SessionStatus::Playing {
        let tick = controller.next_tick().await;
        controller.on_tick(tick);
        settle(controller, rx).await;
    }
}

#[tokio::test(start_paused = true)]
async fn connect__records_address_and_balances() {
    // given
    let ledger = FakeLedger::with(|_| {});

    // when
    let (controller, _rx) = connected(&ledger).await;

    // then
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.wallet.address, Some(player()));
    assert_eq!(snapshot.wallet.balance, eth(10));
    assert_eq!(snapshot.pool_balance, eth(100));
    assert!(!snapshot.loading);
    assert_eq!(controller.status(), SessionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn connect__surfaces_rejection_as_error() {
    // given
    let ledger = FakeLedger::with(|s| {
        s.connect_error = Some(ChainError::UserRejected("denied".into()));
    });

    // when
    let (controller, _rx) = connected(&ledger).await;

    // then
    assert_eq!(controller.wallet().address, None);
    assert!(controller.error().unwrap().contains("denied"));
    assert!(!controller.is_loading());
}

#[tokio::test(start_paused = true)]
async fn start_session__without_wallet_does_nothing() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = SessionController::new(ledger.clone(), eth(1));

    // when
    controller.start_session();
    settle(&mut controller, &mut rx).await;

    // then
    assert!(ledger.bets().is_empty());
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert!(controller.error().is_some());
}

#[tokio::test(start_paused = true)]
async fn start_session__insufficient_balance_never_submits() {
    // given
    let ledger = FakeLedger::with(|s| s.balance = U256::from(ONE_ETH / 2));
    let (mut controller, mut rx) = connected(&ledger).await;

    // when
    controller.start_session();
    settle(&mut controller, &mut rx).await;

    // then
    assert!(ledger.bets().is_empty());
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert_eq!(controller.active_timers(), 0);
    assert!(controller.error().unwrap().contains("insufficient"));
    assert!(!controller.is_loading());
}

#[tokio::test(start_paused = true)]
async fn start_session__counts_down_three_seconds_then_plays() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = connected(&ledger).await;

    // when
    controller.start_session();
    settle(&mut controller, &mut rx).await;
    let started = Instant::now();

    // then
    assert_eq!(ledger.bets(), vec![eth(1)]);
    assert_eq!(controller.status(), SessionStatus::Waiting);
    assert_eq!(controller.session().countdown, COUNTDOWN_SECONDS);
    assert_eq!(controller.session().id, Some(1));
    assert_eq!(controller.active_timers(), 1);

    let mut seen = Vec::new();
    while controller.status() == SessionStatus::Waiting {
        let tick = controller.next_tick().await;
        assert_eq!(tick, Tick::Countdown);
        controller.on_tick(tick);
        seen.push(controller.session().countdown);
    }
    assert_eq!(seen, vec![2, 1, 0]);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(controller.status(), SessionStatus::Playing);
    assert_eq!(controller.active_timers(), 2);
}

#[tokio::test(start_paused = true)]
async fn start_session__second_press_while_submitting_is_ignored() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = connected(&ledger).await;

    // when
    controller.start_session();
    controller.start_session();
    settle(&mut controller, &mut rx).await;

    // then
    assert_eq!(ledger.bets().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn multiplier_poll__updates_live_multiplier() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = playing(&ledger).await;
    ledger.update(|s| s.multiplier = 173);

    // when
    loop {
        let tick = controller.next_tick().await;
        controller.on_tick(tick);
        settle(&mut controller, &mut rx).await;
        if tick == Tick::Multiplier {
            break;
        }
    }

    // then
    assert_eq!(controller.session().multiplier, 173);
    assert_eq!(controller.status(), SessionStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn status_poll__crash_stops_polling_once() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = playing(&ledger).await;
    ledger.crash(137);

    // when
    run_until_settled(&mut controller, &mut rx).await;

    // then
    assert_eq!(controller.status(), SessionStatus::Crashed);
    assert_eq!(controller.session().multiplier, 137);
    assert_eq!(controller.active_timers(), 0);
    let reads = ledger.state.lock().unwrap().status_reads;
    let fired = time::timeout(Duration::from_secs(5), controller.next_tick()).await;
    assert!(fired.is_err());
    assert_eq!(ledger.state.lock().unwrap().status_reads, reads);
}

#[tokio::test(start_paused = true)]
async fn status_poll__withdrawn_record_settles_as_won() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = playing(&ledger).await;
    ledger.update(|s| {
        s.active = false;
        s.has_withdrawn = true;
        s.multiplier = 210;
    });

    // when
    run_until_settled(&mut controller, &mut rx).await;

    // then
    assert_eq!(controller.status(), SessionStatus::Won);
    assert_eq!(controller.session().multiplier, 210);
    assert_eq!(controller.active_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn withdraw__wins_and_ignores_late_crash_report() {
    // given
    let payout = eth(2);
    let ledger = FakeLedger::with(|s| {
        s.withdraw_receipt = Some(WithdrawReceipt {
            multiplier: 200,
            payout,
        });
    });
    let (mut controller, mut rx) = playing(&ledger).await;

    // when
    controller.withdraw();
    settle(&mut controller, &mut rx).await;
    controller.apply(Outcome::Status {
        session_id: 1,
        result: Ok(StatusReport::Crashed { crash_point: 250 }),
    });

    // then
    assert_eq!(ledger.withdraws(), vec![1]);
    assert_eq!(controller.status(), SessionStatus::Won);
    assert_eq!(controller.session().multiplier, 200);
    assert_eq!(controller.session().last_payout, Some(payout));
    assert_eq!(controller.active_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn withdraw__without_payout_record_keeps_polling() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = playing(&ledger).await;

    // when
    controller.withdraw();
    settle(&mut controller, &mut rx).await;

    // then
    assert_eq!(ledger.withdraws(), vec![1]);
    assert_eq!(controller.status(), SessionStatus::Playing);
    assert_eq!(controller.active_timers(), 2);
    assert!(!controller.is_loading());
}

#[tokio::test(start_paused = true)]
async fn withdraw__outside_playing_is_ignored() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = connected(&ledger).await;
    controller.start_session();
    settle(&mut controller, &mut rx).await;
    assert_eq!(controller.status(), SessionStatus::Waiting);

    // when
    controller.withdraw();
    settle(&mut controller, &mut rx).await;

    // then
    assert!(ledger.withdraws().is_empty());
    assert_eq!(controller.status(), SessionStatus::Waiting);
}

#[tokio::test(start_paused = true)]
async fn crash_after_win__is_ignored() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = playing(&ledger).await;
    ledger.crash(120);
    run_until_settled(&mut controller, &mut rx).await;

    // when
    controller.apply(Outcome::Withdrawn {
        session_id: 1,
        result: Ok(Some(WithdrawReceipt {
            multiplier: 300,
            payout: eth(3),
        })),
    });

    // then
    assert_eq!(controller.status(), SessionStatus::Crashed);
    assert_eq!(controller.session().multiplier, 120);
    assert_eq!(controller.session().last_payout, None);
}

#[tokio::test(start_paused = true)]
async fn reset__from_terminal_clears_session_and_timers() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = playing(&ledger).await;
    ledger.crash(150);
    run_until_settled(&mut controller, &mut rx).await;

    // when
    controller.reset();

    // then
    assert_eq!(controller.session(), &Session::default());
    assert_eq!(controller.active_timers(), 0);
    assert!(controller.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn reset__from_won_clears_payout() {
    // given
    let ledger = FakeLedger::with(|s| {
        s.withdraw_receipt = Some(WithdrawReceipt {
            multiplier: 230,
            payout: eth(2),
        });
    });
    let (mut controller, mut rx) = playing(&ledger).await;
    controller.withdraw();
    settle(&mut controller, &mut rx).await;
    assert_eq!(controller.status(), SessionStatus::Won);
    assert_eq!(controller.session().last_payout, Some(eth(2)));

    // when
    controller.reset();

    // then
    assert_eq!(controller.session(), &Session::default());
    assert_eq!(controller.session().last_payout, None);
    assert_eq!(controller.active_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn reset__while_waiting_is_ignored() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = connected(&ledger).await;
    controller.start_session();
    settle(&mut controller, &mut rx).await;

    // when
    controller.reset();

    // then
    assert_eq!(controller.status(), SessionStatus::Waiting);
    assert_eq!(controller.active_timers(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_outcomes__after_reset_are_dropped() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = playing(&ledger).await;
    ledger.crash(110);
    run_until_settled(&mut controller, &mut rx).await;
    controller.reset();

    // when
    controller.apply(Outcome::Multiplier {
        session_id: 1,
        result: Ok(480),
    });
    controller.apply(Outcome::Status {
        session_id: 1,
        result: Ok(StatusReport::Withdrawn { multiplier: 480 }),
    });

    // then
    assert_eq!(controller.session(), &Session::default());
    assert_eq!(controller.active_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_outcomes__for_previous_session_leave_next_session_untouched() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = playing(&ledger).await;
    ledger.crash(110);
    run_until_settled(&mut controller, &mut rx).await;
    controller.reset();
    ledger.update(|s| {
        s.active = true;
        s.has_crashed = false;
    });
    controller.start_session();
    settle(&mut controller, &mut rx).await;
    while controller.status() == SessionStatus::Waiting {
        let tick = controller.next_tick().await;
        controller.on_tick(tick);
    }

    // when
    controller.apply(Outcome::Multiplier {
        session_id: 1,
        result: Ok(480),
    });
    controller.apply(Outcome::Status {
        session_id: 1,
        result: Ok(StatusReport::Crashed { crash_point: 110 }),
    });

    // then
    assert_eq!(controller.session().id, Some(2));
    assert_eq!(controller.status(), SessionStatus::Playing);
    assert_eq!(controller.session().multiplier, BASE_MULTIPLIER);
    assert_eq!(controller.active_timers(), 2);
}

#[tokio::test(start_paused = true)]
async fn connect__while_playing_does_not_block_withdraw() {
    // given
    let ledger = FakeLedger::with(|s| {
        s.withdraw_receipt = Some(WithdrawReceipt {
            multiplier: 180,
            payout: U256::from(1_800_000_000_000_000_000u64),
        });
    });
    let (mut controller, mut rx) = playing(&ledger).await;

    // when
    controller.connect();
    controller.withdraw();
    settle(&mut controller, &mut rx).await;

    // then
    assert_eq!(ledger.withdraws(), vec![1]);
    assert_eq!(controller.status(), SessionStatus::Won);
    assert!(!controller.is_loading());
}

#[tokio::test(start_paused = true)]
async fn connect__resumes_live_session() {
    // given
    let ledger = FakeLedger::with(|s| s.player_session = Some(42));

    // when
    let (controller, _rx) = connected(&ledger).await;

    // then
    assert_eq!(controller.session().id, Some(42));
    assert_eq!(controller.status(), SessionStatus::Playing);
    assert_eq!(controller.active_timers(), 2);
}

#[tokio::test(start_paused = true)]
async fn connect__ignores_settled_player_session() {
    // given
    let ledger = FakeLedger::with(|s| {
        s.player_session = Some(42);
        s.active = false;
        s.has_crashed = true;
    });

    // when
    let (controller, _rx) = connected(&ledger).await;

    // then
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert_eq!(controller.active_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn poll_feed__starts_at_head_then_collects_new_events() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, mut rx) = connected(&ledger).await;

    // when
    controller.poll_feed();
    settle(&mut controller, &mut rx).await;
    let first = controller.snapshot().feed;
    controller.poll_feed();
    settle(&mut controller, &mut rx).await;

    // then
    assert!(first.is_empty());
    let feed = controller.snapshot().feed;
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].block, 11);
}

#[tokio::test(start_paused = true)]
async fn shutdown__releases_every_timer() {
    // given
    let ledger = FakeLedger::with(|_| {});
    let (mut controller, _rx) = playing(&ledger).await;

    // when
    controller.shutdown();

    // then
    assert_eq!(controller.active_timers(), 0);
}
