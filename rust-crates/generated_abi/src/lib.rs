use ethers::contract::abigen;

pub mod crash_types {
    use super::*;

    abigen!(
        CrashGame,
        r#"[
            function startGame() external payable returns (uint256)
            function withdrawFromGame(uint256 gameId) external returns (uint256)
            function checkGameStatus(uint256 gameId) external returns (bool)
            function getCurrentMultiplier(uint256 gameId) external view returns (uint256)
            function getGameInfo(uint256 gameId) external view returns (address, uint256, uint256, uint256, uint256, bool, bool, bool)
            function getPlayerCurrentGame(address player) external view returns (uint256)
            function getContractBalance() external view returns (uint256)
            function owner() external view returns (address)
            event GameStarted(uint256 indexed gameId, address indexed player, uint256 betAmount)
            event GameWithdrawn(uint256 indexed gameId, address indexed player, uint256 multiplier, uint256 payout)
            event GameCrashed(uint256 indexed gameId, address indexed player, uint256 crashPoint)
            event FundsDeposited(address indexed player, uint256 amount)
        ]"#
    );
}

pub use crash_types::{
    CrashGame,
    CrashGameEvents,
    FundsDepositedFilter,
    GameCrashedFilter,
    GameStartedFilter,
    GameWithdrawnFilter,
};

/// Raw `getGameInfo` tuple in ABI order.
pub type GameInfoTuple = (
    ethers::types::Address,
    ethers::types::U256,
    ethers::types::U256,
    ethers::types::U256,
    ethers::types::U256,
    bool,
    bool,
    bool,
);
