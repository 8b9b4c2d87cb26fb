use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Local,
    Sepolia,
}

impl DeploymentEnv {
    pub const ALL: [DeploymentEnv; 2] = [DeploymentEnv::Local, DeploymentEnv::Sepolia];

    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Local => "local",
            DeploymentEnv::Sepolia => "sepolia",
        }
    }

    pub fn chain_id(self) -> u64 {
        match self {
            DeploymentEnv::Local => 1337,
            DeploymentEnv::Sepolia => 11_155_111,
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Local => "Local (Ganache)",
            DeploymentEnv::Sepolia => "Sepolia",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub contract_address: String,
    pub bytecode_hash: String,
    pub network_url: String,
    pub chain_id: u64,
    #[serde(default)]
    pub deployer: Option<String>,
    #[serde(default)]
    pub deployment_block: Option<u64>,
}

impl DeploymentRecord {
    pub fn new(
        contract_address: impl Into<String>,
        bytecode_hash: impl Into<String>,
        network_url: impl Into<String>,
        chain_id: u64,
    ) -> Self {
        Self {
            deployed_at: Utc::now().to_rfc3339(),
            contract_address: contract_address.into(),
            bytecode_hash: bytecode_hash.into(),
            network_url: network_url.into(),
            chain_id,
            deployer: None,
            deployment_block: None,
        }
    }

    pub fn is_compatible_with_hash(&self, hash: &str) -> bool {
        self.bytecode_hash == hash
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::with_root(DEPLOYMENTS_ROOT, env)
    }

    pub fn with_root(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<DeploymentRecord>> {
        read_record(&self.path)
    }

    pub fn save(&self, record: &DeploymentRecord) -> Result<()> {
        write_record(&self.path, record)
    }
}

/// Hex-encoded sha256 of contract creation bytecode.
pub fn compute_bytecode_hash(bytecode: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytecode);
    hex::encode(hasher.finalize())
}

pub fn ensure_structure() -> Result<()> {
    for env in DeploymentEnv::ALL {
        let _ = ensure_store(Path::new(DEPLOYMENTS_ROOT), env)?;
    }
    Ok(())
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!(
                "Failed to create deployment directory {}",
                env_dir.display()
            )
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        fs::write(&file_path, b"").with_context(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
    }

    Ok(file_path)
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(Some(record));
    }
    if let Ok(mut records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records.pop());
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON; expected a single deployment object"
    ))
}

fn write_record(path: impl AsRef<Path>, record: &DeploymentRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .context("Failed to serialize deployment record")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment record")?;
    Ok(())
}
