//! Typed access to the deployed crash game contract.
//!
//! [`CrashLedger`] is the seam the session controller talks to. Calls return
//! `Send` futures so the controller can run them on spawned tasks.

use crate::{
    error::ChainError,
    session::SessionId,
};
use ethers::{
    abi::{
        Detokenize,
        RawLog,
    },
    contract::{
        ContractCall,
        ContractError,
        EthLogDecode,
    },
    middleware::SignerMiddleware,
    providers::{
        Http,
        Middleware,
        Provider,
    },
    signers::{
        LocalWallet,
        Signer,
    },
    types::{
        Address,
        Log,
        TransactionReceipt,
        U64,
        U256,
    },
};
use generated_abi::{
    CrashGame,
    CrashGameEvents,
    GameInfoTuple,
    GameStartedFilter,
    GameWithdrawnFilter,
};
use std::{
    future::Future,
    sync::Arc,
};
use tracing::{
    debug,
    info,
    warn,
};

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Snapshot of `getGameInfo`. Never cached beyond the call that fetched it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameRecord {
    pub player: Address,
    pub bet_amount: U256,
    pub multiplier: u64,
    pub start_time: u64,
    pub crash_point: u64,
    pub is_active: bool,
    pub has_withdrawn: bool,
    pub has_crashed: bool,
}

impl GameRecord {
    pub fn from_tuple(info: GameInfoTuple) -> Result<Self, ChainError> {
        let (
            player,
            bet_amount,
            multiplier,
            start_time,
            crash_point,
            is_active,
            has_withdrawn,
            has_crashed,
        ) = info;
        Ok(GameRecord {
            player,
            bet_amount,
            multiplier: to_u64(multiplier, "multiplier")?,
            start_time: to_u64(start_time, "startTime")?,
            crash_point: to_u64(crash_point, "crashPoint")?,
            is_active,
            has_withdrawn,
            has_crashed,
        })
    }

    /// Still running: neither cashed out nor crashed.
    pub fn is_live(&self) -> bool {
        self.is_active && !self.has_withdrawn && !self.has_crashed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WithdrawReceipt {
    pub multiplier: u64,
    pub payout: U256,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalletState {
    pub address: Option<Address>,
    pub balance: U256,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    SessionStarted {
        session_id: SessionId,
        player: Address,
        bet_amount: U256,
    },
    SessionWithdrawn {
        session_id: SessionId,
        player: Address,
        multiplier: u64,
        payout: U256,
    },
    SessionCrashed {
        session_id: SessionId,
        player: Address,
        crash_point: u64,
    },
    FundsDeposited {
        player: Address,
        amount: U256,
    },
}

impl TryFrom<CrashGameEvents> for LedgerEvent {
    type Error = ChainError;

    fn try_from(event: CrashGameEvents) -> Result<Self, Self::Error> {
        Ok(match event {
            CrashGameEvents::GameStartedFilter(ev) => LedgerEvent::SessionStarted {
                session_id: to_u64(ev.game_id, "gameId")?,
                player: ev.player,
                bet_amount: ev.bet_amount,
            },
            CrashGameEvents::GameWithdrawnFilter(ev) => LedgerEvent::SessionWithdrawn {
                session_id: to_u64(ev.game_id, "gameId")?,
                player: ev.player,
                multiplier: to_u64(ev.multiplier, "multiplier")?,
                payout: ev.payout,
            },
            CrashGameEvents::GameCrashedFilter(ev) => LedgerEvent::SessionCrashed {
                session_id: to_u64(ev.game_id, "gameId")?,
                player: ev.player,
                crash_point: to_u64(ev.crash_point, "crashPoint")?,
            },
            CrashGameEvents::FundsDepositedFilter(ev) => LedgerEvent::FundsDeposited {
                player: ev.player,
                amount: ev.amount,
            },
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedEntry {
    pub block: u64,
    pub event: LedgerEvent,
}

pub trait CrashLedger: Send + Sync + 'static {
    /// Confirms account access and returns the player's address.
    fn connect(&self) -> impl Future<Output = Result<Address, ChainError>> + Send;

    /// Stakes `stake` wei and returns the id of the new session.
    fn submit_bet(
        &self,
        stake: U256,
    ) -> impl Future<Output = Result<SessionId, ChainError>> + Send;

    /// Cashes out; `None` when the receipt holds no withdraw record for `id`.
    fn submit_withdraw(
        &self,
        id: SessionId,
    ) -> impl Future<Output = Result<Option<WithdrawReceipt>, ChainError>> + Send;

    fn read_status(
        &self,
        id: SessionId,
    ) -> impl Future<Output = Result<bool, ChainError>> + Send;

    fn read_multiplier(
        &self,
        id: SessionId,
    ) -> impl Future<Output = Result<u64, ChainError>> + Send;

    fn read_game_record(
        &self,
        id: SessionId,
    ) -> impl Future<Output = Result<GameRecord, ChainError>> + Send;

    fn read_player_session(
        &self,
        player: Address,
    ) -> impl Future<Output = Result<Option<SessionId>, ChainError>> + Send;

    fn read_wallet_balance(
        &self,
    ) -> impl Future<Output = Result<WalletState, ChainError>> + Send;

    fn read_pool_balance(&self) -> impl Future<Output = Result<U256, ChainError>> + Send;

    /// Events mined from `from` up to the chain head, plus the next cursor.
    /// With no cursor, starts at the head without returning history.
    fn read_events_since(
        &self,
        from: Option<u64>,
    ) -> impl Future<Output = Result<(Vec<FeedEntry>, u64), ChainError>> + Send;
}

pub struct EthersLedger {
    client: Arc<SignerClient>,
    contract: CrashGame<SignerClient>,
    confirmations: usize,
}

impl EthersLedger {
    pub fn new(
        provider: Provider<Http>,
        wallet: LocalWallet,
        contract_address: Address,
        confirmations: usize,
    ) -> Self {
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = CrashGame::new(contract_address, client.clone());
        Self {
            client,
            contract,
            confirmations: confirmations.max(1),
        }
    }

    pub fn player(&self) -> Address {
        self.client.address()
    }

    pub fn contract_address(&self) -> Address {
        self.contract.address()
    }

    async fn send_and_confirm<D: Detokenize>(
        &self,
        call: ContractCall<SignerClient, D>,
        label: &'static str,
    ) -> Result<TransactionReceipt, ChainError> {
        let pending = call.send().await.map_err(contract_error)?;
        let tx_hash = *pending;
        info!(%label, ?tx_hash, "transaction sent");
        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(ChainError::rpc)?
            .ok_or_else(|| {
                ChainError::Rpc(format!("{label} transaction {tx_hash:?} was dropped"))
            })?;
        if receipt.status != Some(U64::from(1)) {
            return Err(ChainError::Rpc(format!(
                "{label} transaction {tx_hash:?} reverted"
            )));
        }
        debug!(%label, ?tx_hash, block = ?receipt.block_number, "transaction confirmed");
        Ok(receipt)
    }

    fn contract_logs(&self, receipt: &TransactionReceipt) -> Vec<Log> {
        let address = self.contract.address();
        receipt
            .logs
            .iter()
            .filter(|log| log.address == address)
            .cloned()
            .collect()
    }
}

impl CrashLedger for EthersLedger {
    async fn connect(&self) -> Result<Address, ChainError> {
        let node_chain = self.client.get_chainid().await.map_err(ChainError::rpc)?;
        let wallet_chain = self.client.signer().chain_id();
        if node_chain != U256::from(wallet_chain) {
            return Err(ChainError::WalletUnavailable(format!(
                "wallet is configured for chain {wallet_chain} but the node reports chain {node_chain}"
            )));
        }
        let address = self.client.address();
        info!(?address, chain_id = wallet_chain, "wallet connected");
        Ok(address)
    }

    async fn submit_bet(&self, stake: U256) -> Result<SessionId, ChainError> {
        let call = self.contract.start_game().value(stake);
        let receipt = self.send_and_confirm(call, "startGame").await?;
        let session_id = session_id_from_logs(&self.contract_logs(&receipt))?;
        info!(session_id, "session started");
        Ok(session_id)
    }

    async fn submit_withdraw(
        &self,
        id: SessionId,
    ) -> Result<Option<WithdrawReceipt>, ChainError> {
        let call = self.contract.withdraw_from_game(U256::from(id));
        let receipt = self.send_and_confirm(call, "withdrawFromGame").await?;
        withdraw_from_logs(&self.contract_logs(&receipt), id)
    }

    async fn read_status(&self, id: SessionId) -> Result<bool, ChainError> {
        self.contract
            .check_game_status(U256::from(id))
            .call()
            .await
            .map_err(contract_error)
    }

    async fn read_multiplier(&self, id: SessionId) -> Result<u64, ChainError> {
        let value = self
            .contract
            .get_current_multiplier(U256::from(id))
            .call()
            .await
            .map_err(contract_error)?;
        to_u64(value, "multiplier")
    }

    async fn read_game_record(&self, id: SessionId) -> Result<GameRecord, ChainError> {
        let info = self
            .contract
            .get_game_info(U256::from(id))
            .call()
            .await
            .map_err(contract_error)?;
        GameRecord::from_tuple(info)
    }

    async fn read_player_session(
        &self,
        player: Address,
    ) -> Result<Option<SessionId>, ChainError> {
        let id = self
            .contract
            .get_player_current_game(player)
            .call()
            .await
            .map_err(contract_error)?;
        if id.is_zero() {
            return Ok(None);
        }
        to_u64(id, "gameId").map(Some)
    }

    async fn read_wallet_balance(&self) -> Result<WalletState, ChainError> {
        let address = self.client.address();
        let balance = self
            .client
            .get_balance(address, None)
            .await
            .map_err(ChainError::rpc)?;
        Ok(WalletState {
            address: Some(address),
            balance,
        })
    }

    async fn read_pool_balance(&self) -> Result<U256, ChainError> {
        self.contract
            .get_contract_balance()
            .call()
            .await
            .map_err(contract_error)
    }

    async fn read_events_since(
        &self,
        from: Option<u64>,
    ) -> Result<(Vec<FeedEntry>, u64), ChainError> {
        let head = self
            .client
            .get_block_number()
            .await
            .map_err(ChainError::rpc)?
            .as_u64();
        let Some(from) = from else {
            return Ok((Vec::new(), head + 1));
        };
        if from > head {
            return Ok((Vec::new(), from));
        }
        let events = self
            .contract
            .events()
            .from_block(U64::from(from))
            .to_block(U64::from(head))
            .query_with_meta()
            .await
            .map_err(contract_error)?;
        let entries = feed_entries(
            events
                .into_iter()
                .map(|(event, meta)| (event, meta.block_number.as_u64())),
        );
        Ok((entries, head + 1))
    }
}

/// Converts queried events into feed entries, skipping any that do not fit.
pub fn feed_entries(
    events: impl IntoIterator<Item = (CrashGameEvents, u64)>,
) -> Vec<FeedEntry> {
    events
        .into_iter()
        .filter_map(|(event, block)| match LedgerEvent::try_from(event) {
            Ok(event) => Some(FeedEntry { block, event }),
            Err(err) => {
                warn!(%err, block, "skipping undecodable contract event");
                None
            }
        })
        .collect()
}

/// Session id from the first `GameStarted` record among `logs`.
pub fn session_id_from_logs(logs: &[Log]) -> Result<SessionId, ChainError> {
    let started = logs
        .iter()
        .find_map(|log| decode::<GameStartedFilter>(log))
        .ok_or(ChainError::EventNotFound("GameStarted"))?;
    to_u64(started.game_id, "gameId")
}

/// Withdraw details from the `GameWithdrawn` record for `id`, if any.
pub fn withdraw_from_logs(
    logs: &[Log],
    id: SessionId,
) -> Result<Option<WithdrawReceipt>, ChainError> {
    let target = U256::from(id);
    let Some(withdrawn) = logs
        .iter()
        .filter_map(|log| decode::<GameWithdrawnFilter>(log))
        .find(|ev| ev.game_id == target)
    else {
        return Ok(None);
    };
    Ok(Some(WithdrawReceipt {
        multiplier: to_u64(withdrawn.multiplier, "multiplier")?,
        payout: withdrawn.payout,
    }))
}

fn decode<E: EthLogDecode>(log: &Log) -> Option<E> {
    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    E::decode_log(&raw).ok()
}

fn to_u64(value: U256, field: &str) -> Result<u64, ChainError> {
    if value > U256::from(u64::MAX) {
        return Err(ChainError::Rpc(format!("{field} value {value} exceeds u64")));
    }
    Ok(value.as_u64())
}

fn contract_error(err: ContractError<SignerClient>) -> ChainError {
    if let Some(reason) = err.decode_revert::<String>() {
        return ChainError::Rpc(format!("contract reverted: {reason}"));
    }
    ChainError::rpc(err)
}
