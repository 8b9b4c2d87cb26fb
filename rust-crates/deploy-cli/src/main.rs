use anyhow::{
    Context,
    Result,
    anyhow,
};
use clap::{
    ArgGroup,
    Parser,
};
use crash_game::wallets::{
    find_wallet,
    resolve_wallet_dir,
    unlock_wallet,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
};
use ethers::{
    abi::Abi,
    contract::ContractFactory,
    middleware::SignerMiddleware,
    providers::{
        Http,
        Middleware,
        Provider,
    },
    signers::LocalWallet,
    types::{
        Address,
        Bytes,
        U256,
    },
    utils::format_ether,
};
use generated_abi::CrashGame;
use serde::Deserialize;
use std::{
    fs,
    path::Path,
    sync::Arc,
};

const DEFAULT_LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";
const SEPOLIA_URL_ENV: &str = "SEPOLIA_URL";
const DEFAULT_ARTIFACT: &str = "artifacts/contracts/CrashGame.sol/CrashGame.json";

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

#[derive(Parser, Debug)]
#[command(
    name = "crash-deploy",
    about = "Deploy the crash game contract or inspect an existing deployment",
    version,
    group(
        ArgGroup::new("network")
            .args(["local", "sepolia"])
            .required(true)
    )
)]
struct Args {
    /// Deploy to a local Ganache node
    #[arg(long)]
    local: bool,

    /// Deploy to Sepolia (RPC from --rpc-url or SEPOLIA_URL)
    #[arg(long)]
    sepolia: bool,

    /// Override RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Keystore name (without .json)
    #[arg(long)]
    wallet: String,

    /// Override keystore directory (defaults to ~/.crash-game/wallets)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// Which action to perform (defaults to deploy)
    #[arg(short, long, value_enum, default_value = "deploy")]
    action: Action,

    /// Compiled contract artifact with `abi` and `bytecode`
    #[arg(long, default_value = DEFAULT_ARTIFACT)]
    artifact: String,

    /// Confirmations to wait for on the deployment transaction
    #[arg(long, default_value_t = 1)]
    confirmations: usize,

    /// Deploy even when the recorded deployment has the same bytecode
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum Action {
    Deploy,
    Balance,
}

/// The subset of a compiled contract artifact needed for deployment.
#[derive(Debug, Deserialize)]
struct ContractArtifact {
    abi: Abi,
    bytecode: Bytes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    deployments::ensure_structure().context("initializing deployment directories")?;

    let env = if args.local {
        DeploymentEnv::Local
    } else {
        DeploymentEnv::Sepolia
    };
    let rpc_url = match (env, args.rpc_url.clone()) {
        (_, Some(url)) => url,
        (DeploymentEnv::Local, None) => DEFAULT_LOCAL_RPC_URL.to_string(),
        (DeploymentEnv::Sepolia, None) => std::env::var(SEPOLIA_URL_ENV).map_err(|_| {
            anyhow!("--sepolia requires --rpc-url or the {SEPOLIA_URL_ENV} environment variable")
        })?,
    };

    let provider = Provider::<Http>::try_from(rpc_url.as_str())
        .with_context(|| format!("invalid RPC URL {rpc_url}"))?;
    let node_chain = provider
        .get_chainid()
        .await
        .context("failed to connect to provider")?;
    if node_chain != U256::from(env.chain_id()) {
        anyhow::bail!(
            "{env} expects chain {} but the node at {rpc_url} reports chain {node_chain}",
            env.chain_id()
        );
    }

    let wallet_dir = resolve_wallet_dir(args.wallet_dir.as_deref())
        .context("resolving wallet directory")?;
    let descriptor =
        find_wallet(&wallet_dir, &args.wallet).context("locating requested wallet")?;
    let wallet =
        unlock_wallet(&descriptor, env.chain_id()).context("unlocking keystore")?;
    let client = Arc::new(SignerMiddleware::new(provider, wallet));

    let store = DeploymentStore::new(env).context("opening deployment store")?;

    match args.action {
        Action::Balance => {
            let record = store
                .load()
                .context("loading deployment record")?
                .ok_or_else(|| anyhow!("no deployment recorded for {env}"))?;
            let address: Address = record
                .contract_address
                .parse()
                .map_err(|e| anyhow!("parsing stored contract address: {e}"))?;
            let balance = client
                .get_balance(client.address(), None)
                .await
                .context("fetching wallet balance")?;
            println!("Wallet '{}' ({:?})", args.wallet, client.address());
            println!("  Balance: {} ETH", format_ether(balance));
            report_contract(&client, address).await?;
            Ok(())
        }
        Action::Deploy => deploy(&args, env, &rpc_url, client, &store).await,
    }
}

async fn deploy(
    args: &Args,
    env: DeploymentEnv,
    rpc_url: &str,
    client: Arc<Client>,
    store: &DeploymentStore,
) -> Result<()> {
    let deployer = client.address();
    let balance = client
        .get_balance(deployer, None)
        .await
        .context("fetching deployer balance")?;
    println!("Deploying CrashGame to {env} from {deployer:?}");
    println!("  Deployer balance: {} ETH", format_ether(balance));

    let artifact = load_artifact(Path::new(&args.artifact))?;
    let bytecode_hash = deployments::compute_bytecode_hash(&artifact.bytecode);

    if !args.force
        && let Some(existing) = store.load().context("loading deployment record")?
        && existing.is_compatible_with_hash(&bytecode_hash)
    {
        println!(
            "Bytecode unchanged since the deployment at {} ({}); pass --force to redeploy",
            existing.contract_address, existing.deployed_at
        );
        return Ok(());
    }

    let factory = ContractFactory::new(artifact.abi, artifact.bytecode, client.clone());
    let (contract, receipt) = factory
        .deploy(())
        .context("building deployment transaction")?
        .confirmations(args.confirmations.max(1))
        .send_with_receipt()
        .await
        .context("deploying CrashGame")?;
    let address = contract.address();
    let block = receipt.block_number.map(|b| b.as_u64());
    println!(
        "CrashGame deployed: {address:?} (tx: {:?}) at block {}",
        receipt.transaction_hash,
        block.map_or_else(|| String::from("unknown"), |b| b.to_string())
    );

    report_contract(&client, address).await?;

    let mut record =
        DeploymentRecord::new(format!("{address:?}"), bytecode_hash, rpc_url, env.chain_id());
    record.deployer = Some(format!("{deployer:?}"));
    record.deployment_block = block;
    store.save(&record).context("recording deployment")?;
    println!("Deployment metadata written to {}", store.path().display());
    Ok(())
}

/// Reads back the pool balance and owner as a post-deploy sanity check.
async fn report_contract(client: &Arc<Client>, address: Address) -> Result<()> {
    let game = CrashGame::new(address, client.clone());
    let pool = game
        .get_contract_balance()
        .call()
        .await
        .context("reading contract balance")?;
    let owner = game.owner().call().await.context("reading contract owner")?;
    println!("Contract {address:?}");
    println!("  Pool balance: {} ETH", format_ether(pool));
    println!("  Owner: {owner:?}");
    Ok(())
}

fn load_artifact(path: &Path) -> Result<ContractArtifact> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading contract artifact {}", path.display()))?;
    parse_artifact(&raw).with_context(|| format!("parsing contract artifact {}", path.display()))
}

fn parse_artifact(raw: &str) -> Result<ContractArtifact> {
    let artifact: ContractArtifact = serde_json::from_str(raw)?;
    if artifact.bytecode.is_empty() {
        anyhow::bail!("artifact has no creation bytecode; compile the contract first");
    }
    Ok(artifact)
}
