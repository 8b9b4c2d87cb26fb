use std::{
    future,
    time::Duration,
};
use tokio::time::{
    self,
    Instant,
    Interval,
    MissedTickBehavior,
};

pub const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);
pub const MULTIPLIER_POLL_PERIOD: Duration = Duration::from_millis(100);
pub const STATUS_POLL_PERIOD: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tick {
    Countdown,
    Multiplier,
    Status,
}

/// Periodic timers owned by the session controller.
///
/// A timer exists only while its handle is held; dropping the handle is the
/// cancellation. The countdown never coexists with the two poll timers.
#[derive(Debug, Default)]
pub struct SessionTimers {
    countdown: Option<Interval>,
    multiplier: Option<Interval>,
    status: Option<Interval>,
}

impl SessionTimers {
    pub fn start_countdown(&mut self) {
        self.stop_polling();
        self.countdown = Some(delayed_interval(COUNTDOWN_PERIOD));
    }

    pub fn stop_countdown(&mut self) -> bool {
        self.countdown.take().is_some()
    }

    pub fn start_polling(&mut self) {
        self.countdown = None;
        self.multiplier = Some(delayed_interval(MULTIPLIER_POLL_PERIOD));
        self.status = Some(delayed_interval(STATUS_POLL_PERIOD));
    }

    /// Returns whether any poll timer was running.
    pub fn stop_polling(&mut self) -> bool {
        let multiplier = self.multiplier.take().is_some();
        let status = self.status.take().is_some();
        multiplier || status
    }

    pub fn cancel_all(&mut self) {
        self.countdown = None;
        self.multiplier = None;
        self.status = None;
    }

    pub fn active(&self) -> usize {
        [
            self.countdown.is_some(),
            self.multiplier.is_some(),
            self.status.is_some(),
        ]
        .into_iter()
        .filter(|running| *running)
        .count()
    }

    pub fn is_polling(&self) -> bool {
        self.multiplier.is_some() || self.status.is_some()
    }

    pub fn is_counting_down(&self) -> bool {
        self.countdown.is_some()
    }

    /// Resolves with the next timer to fire. Pends forever while no timer runs.
    pub async fn next(&mut self) -> Tick {
        let Self {
            countdown,
            multiplier,
            status,
        } = self;
        tokio::select! {
            _ = tick(countdown) => Tick::Countdown,
            _ = tick(status) => Tick::Status,
            _ = tick(multiplier) => Tick::Multiplier,
        }
    }
}

fn delayed_interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}
