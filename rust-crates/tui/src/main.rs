use clap::{
    ArgGroup,
    Parser,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use crash_game::wallets;
use ethers::{
    types::Address,
    utils::parse_ether,
};
use std::path::PathBuf;

mod client;
mod ui;

#[derive(Debug, Parser)]
#[command(
    name = "crash-tui",
    about = "Terminal client for the on-chain crash game",
    group(ArgGroup::new("network").required(true).args(["local", "sepolia"]))
)]
struct Args {
    /// Connect to a local Ganache node (default RPC http://127.0.0.1:8545)
    #[arg(long)]
    local: bool,
    /// Connect to Sepolia (RPC from --rpc-url or SEPOLIA_URL)
    #[arg(long)]
    sepolia: bool,
    /// Override the RPC URL for the selected network
    #[arg(long)]
    rpc_url: Option<String>,
    /// Keystore name (without .json) to play with
    #[arg(long)]
    wallet: String,
    /// Keystore directory (defaults to ~/.crash-game/wallets)
    #[arg(long)]
    wallet_dir: Option<String>,
    /// Contract address; defaults to the recorded deployment for the network
    #[arg(long)]
    contract: Option<String>,
    /// Stake per session in ETH
    #[arg(long, default_value = "1")]
    stake: String,
    /// Confirmations to wait for on each transaction
    #[arg(long, default_value_t = 1)]
    confirmations: usize,
    /// Directory for the log file
    #[arg(long, default_value = "logs")]
    log_dir: String,
}

impl Args {
    fn into_config(self) -> Result<client::AppConfig> {
        let network = if self.local {
            client::NetworkTarget::Local {
                url: self
                    .rpc_url
                    .unwrap_or_else(|| client::DEFAULT_LOCAL_RPC_URL.to_string()),
            }
        } else {
            let url = self
                .rpc_url
                .or_else(|| std::env::var(client::SEPOLIA_URL_ENV).ok())
                .ok_or_else(|| {
                    eyre!(
                        "--sepolia requires --rpc-url or the {} environment variable",
                        client::SEPOLIA_URL_ENV
                    )
                })?;
            client::NetworkTarget::Sepolia { url }
        };

        let stake = parse_ether(&self.stake)
            .wrap_err_with(|| format!("invalid stake '{}'", self.stake))?;
        if stake.is_zero() {
            return Err(eyre!("--stake must be greater than zero"));
        }

        let contract = self
            .contract
            .map(|raw| {
                raw.parse::<Address>()
                    .map_err(|e| eyre!("invalid --contract address '{raw}': {e}"))
            })
            .transpose()?;

        let dir = wallets::resolve_wallet_dir(self.wallet_dir.as_deref())?;
        Ok(client::AppConfig {
            network,
            wallets: client::WalletConfig::Keystore {
                name: self.wallet,
                dir,
            },
            contract,
            stake,
            confirmations: self.confirmations,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let log_dir = PathBuf::from(shellexpand::tilde(&args.log_dir).into_owned());
    let _log_guard = client::init_tracing(&log_dir)?;
    tracing::info!("starting crash-tui client");
    deployments::ensure_structure().map_err(|e| eyre!(e))?;
    let app_config = args.into_config()?;
    client::run_app(app_config).await
}
