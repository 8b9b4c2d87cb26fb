use crate::ui;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use crash_game::{
    controller::SessionController,
    ledger::{
        CrashLedger,
        EthersLedger,
    },
    wallets,
};
use deployments::{
    DeploymentEnv,
    DeploymentStore,
};
use ethers::{
    providers::{
        Http,
        Provider,
    },
    types::{
        Address,
        U256,
    },
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time::{
        self,
        MissedTickBehavior,
    },
};
use tracing::{
    info,
    warn,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";
pub const SEPOLIA_URL_ENV: &str = "SEPOLIA_URL";
const FEED_POLL_PERIOD: Duration = Duration::from_secs(3);
const LOG_FILE_NAME: &str = "crash-tui.log";

#[derive(Clone, Debug)]
pub enum NetworkTarget {
    Local { url: String },
    Sepolia { url: String },
}

impl NetworkTarget {
    pub fn url(&self) -> &str {
        match self {
            NetworkTarget::Local { url } | NetworkTarget::Sepolia { url } => url,
        }
    }

    pub fn deployment_env(&self) -> DeploymentEnv {
        match self {
            NetworkTarget::Local { .. } => DeploymentEnv::Local,
            NetworkTarget::Sepolia { .. } => DeploymentEnv::Sepolia,
        }
    }
}

#[derive(Clone, Debug)]
pub enum WalletConfig {
    Keystore { name: String, dir: PathBuf },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub network: NetworkTarget,
    pub wallets: WalletConfig,
    pub contract: Option<Address>,
    pub stake: U256,
    pub confirmations: usize,
}

/// Routes tracing output to `<log_dir>/crash-tui.log`; the terminal belongs to the UI.
pub fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .wrap_err_with(|| format!("failed to create log directory {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("failed to install tracing subscriber: {e}"))?;
    Ok(guard)
}

fn resolve_contract(config: &AppConfig) -> Result<Address> {
    if let Some(address) = config.contract {
        return Ok(address);
    }
    let env = config.network.deployment_env();
    let store = DeploymentStore::new(env).map_err(|e| eyre!(e))?;
    let record = store.load().map_err(|e| eyre!(e))?.ok_or_else(|| {
        eyre!(
            "No {} deployment recorded in {}; run deploy-cli or pass --contract",
            env,
            store.path().display()
        )
    })?;
    if record.chain_id != env.chain_id() {
        warn!(
            recorded = record.chain_id,
            expected = env.chain_id(),
            "deployment record chain id does not match the selected network"
        );
    }
    record.contract_address.parse::<Address>().map_err(|e| {
        eyre!(
            "invalid contract address '{}' in {}: {e}",
            record.contract_address,
            store.path().display()
        )
    })
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let env = config.network.deployment_env();
    let WalletConfig::Keystore { name, dir } = &config.wallets;
    let descriptor = wallets::find_wallet(dir, name)?;
    // the password prompt needs the plain terminal
    let wallet = wallets::unlock_wallet(&descriptor, env.chain_id())?;

    let provider = Provider::<Http>::try_from(config.network.url())
        .wrap_err_with(|| format!("invalid RPC URL {}", config.network.url()))?;
    let contract = resolve_contract(&config)?;
    let ledger = EthersLedger::new(provider, wallet, contract, config.confirmations);
    info!(
        network = %env,
        url = config.network.url(),
        contract = ?ledger.contract_address(),
        player = ?ledger.player(),
        "chain client ready"
    );

    let (controller, outcome_rx) = SessionController::new(Arc::new(ledger), config.stake);
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!("starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(controller, outcome_rx, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;
    res
}

async fn run_loop<L: CrashLedger>(
    mut controller: SessionController<L>,
    mut outcome_rx: mpsc::UnboundedReceiver<crash_game::controller::Outcome>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    info!("running app loop");
    controller.connect();
    let mut feed_ticker = time::interval(FEED_POLL_PERIOD);
    feed_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ui::draw(ui_state, &controller.snapshot()).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            tick = controller.next_tick() => controller.on_tick(tick),
            maybe_outcome = outcome_rx.recv() => {
                let Some(outcome) = maybe_outcome else {
                    warn!("outcome channel closed");
                    break;
                };
                controller.apply(outcome);
            }
            _ = feed_ticker.tick() => {
                if controller.wallet().address.is_some() {
                    controller.poll_feed();
                }
            }
            _ = tokio::signal::ctrl_c() => break,
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Connect => controller.connect(),
                    ui::UserEvent::Start => controller.start_session(),
                    ui::UserEvent::Withdraw => controller.withdraw(),
                    ui::UserEvent::Reset => controller.reset(),
                    ui::UserEvent::Redraw => {}
                }
            }
        }
        ui::draw(ui_state, &controller.snapshot()).wrap_err("redraw failed")?;
    }

    controller.shutdown();
    Ok(())
}
