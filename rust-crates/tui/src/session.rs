use crate::error::ChainError;
use ethers::types::U256;
use std::fmt;

pub type SessionId = u64;

/// Multiplier value meaning 1.00x.
pub const BASE_MULTIPLIER: u64 = 100;
pub const COUNTDOWN_SECONDS: u32 = 3;

const WEI_PER_ETH: u64 = 1_000_000_000_000_000_000;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SessionStatus {
    #[default]
    Idle,
    Waiting,
    Playing,
    Crashed,
    Won,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Crashed | SessionStatus::Won)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Waiting => "waiting",
            SessionStatus::Playing => "playing",
            SessionStatus::Crashed => "crashed",
            SessionStatus::Won => "won",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub id: Option<SessionId>,
    pub status: SessionStatus,
    /// Payout factor scaled by 100.
    pub multiplier: u64,
    pub countdown: u32,
    pub last_payout: Option<U256>,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            id: None,
            status: SessionStatus::Idle,
            multiplier: BASE_MULTIPLIER,
            countdown: 0,
            last_payout: None,
        }
    }
}

impl Session {
    pub fn is_current(&self, id: SessionId) -> bool {
        self.id == Some(id)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MultiplierTier {
    Low,
    Medium,
    High,
    Extreme,
}

impl MultiplierTier {
    pub fn of(multiplier: u64) -> Self {
        match multiplier {
            0..150 => MultiplierTier::Low,
            150..200 => MultiplierTier::Medium,
            200..300 => MultiplierTier::High,
            _ => MultiplierTier::Extreme,
        }
    }
}

/// `250` renders as `2.50x`.
pub fn format_multiplier(multiplier: u64) -> String {
    format!(
        "{}.{:02}x",
        multiplier / BASE_MULTIPLIER,
        multiplier % BASE_MULTIPLIER
    )
}

/// Wei amount as ETH, truncated to `decimal_places` (at most 18).
pub fn format_eth(wei: U256, decimal_places: u32) -> String {
    let decimal_places = decimal_places.min(18);
    let one_eth = U256::from(WEI_PER_ETH);
    let whole = wei / one_eth;
    if decimal_places == 0 {
        return whole.to_string();
    }
    let scale = U256::exp10(18 - decimal_places as usize);
    let fractional = (wei % one_eth) / scale;
    format!(
        "{}.{:0width$}",
        whole,
        fractional.as_u64(),
        width = decimal_places as usize
    )
}

/// `0x1234...abcd` style preview of an address string.
pub fn short_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Rejects a stake the wallet cannot cover, before anything is submitted.
pub fn ensure_stake_covered(balance: U256, stake: U256) -> Result<(), ChainError> {
    if balance < stake {
        return Err(ChainError::InsufficientBalance {
            balance: format_eth(balance, 4),
            required: format_eth(stake, 4),
        });
    }
    Ok(())
}
