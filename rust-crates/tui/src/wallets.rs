use crate::error::ChainError;
use eth_keystore::decrypt_key;
use ethers::signers::{
    LocalWallet,
    MnemonicBuilder,
    Signer,
    coins_bip39::English,
};
use rpassword::prompt_password;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

const KEYSTORE_EXTENSION: &str = "json";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf, ChainError> {
    let home = std::env::var("HOME").map_err(|_| {
        ChainError::WalletUnavailable("HOME environment variable not set".into())
    })?;
    Ok(PathBuf::from(home).join(".crash-game").join("wallets"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf, ChainError> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>, ChainError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let unreadable = |e: std::io::Error| {
        ChainError::WalletUnavailable(format!(
            "failed to read wallet directory {}: {e}",
            dir.display()
        ))
    };
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some(KEYSTORE_EXTENSION) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        wallets.push(WalletDescriptor::new(name, path.clone()));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor, ChainError> {
    list_wallets(dir)?
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| {
            ChainError::WalletUnavailable(format!(
                "wallet '{name}' not found in {}",
                dir.display()
            ))
        })
}

/// Prompts for the keystore password and decrypts the wallet for `chain_id`.
pub fn unlock_wallet(
    descriptor: &WalletDescriptor,
    chain_id: u64,
) -> Result<LocalWallet, ChainError> {
    let prompt = format!("Enter password for wallet '{}': ", descriptor.name);
    let password = prompt_password(prompt)
        .map_err(|e| ChainError::UserRejected(format!("password entry aborted: {e}")))?;
    if password.is_empty() {
        return Err(ChainError::UserRejected("password entry cancelled".into()));
    }
    decrypt_wallet(descriptor, &password, chain_id)
}

pub fn decrypt_wallet(
    descriptor: &WalletDescriptor,
    password: &str,
    chain_id: u64,
) -> Result<LocalWallet, ChainError> {
    let secret = decrypt_key(&descriptor.path, password.as_bytes()).map_err(|_| {
        ChainError::UserRejected(format!(
            "invalid password for wallet '{}'",
            descriptor.name
        ))
    })?;
    wallet_from_secret(&descriptor.name, &secret).map(|w| w.with_chain_id(chain_id))
}

fn wallet_from_secret(name: &str, secret: &[u8]) -> Result<LocalWallet, ChainError> {
    if secret.len() == 32
        && let Ok(wallet) = LocalWallet::from_bytes(secret)
    {
        return Ok(wallet);
    }

    if let Ok(mnemonic) = std::str::from_utf8(secret)
        && mnemonic.split_whitespace().count() >= 12
    {
        return MnemonicBuilder::<English>::default()
            .phrase(mnemonic.trim())
            .build()
            .map_err(|e| {
                ChainError::WalletUnavailable(format!(
                    "wallet '{name}' holds an invalid mnemonic: {e}"
                ))
            });
    }

    Err(ChainError::WalletUnavailable(format!(
        "wallet '{name}' contained unsupported key material"
    )))
}
