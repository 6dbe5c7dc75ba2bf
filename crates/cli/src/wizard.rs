use std::io::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use messenger_core::config::ConfigRecord;
use messenger_core::keys::SigningKey;
use messenger_core::secret_store::SecretStore;
use zeroize::Zeroizing;

/// Interactive first-run setup. The sole writer of `config.json`;
/// everything else treats the file as read-only once the wizard hands
/// off to the supervisor.
pub fn run(config_path: &Path) -> Result<()> {
    println!("xna-messenger setup");
    println!("This wizard creates a local config.json with your RPC endpoint, token, and encrypted signing key.\n");

    let rpc_url = prompt("RPC URL (e.g. http://127.0.0.1:8080)")?;
    let token = prompt("Token symbol to gate on")?;

    let wif = loop {
        let candidate = Zeroizing::new(read_password_no_confirm("Wallet WIF signing key")?);
        match SigningKey::from_wif(&candidate) {
            Ok(key) => {
                println!("Derived address: {}", key.address());
                break candidate;
            }
            Err(e) => {
                println!("That doesn't look like a valid WIF key ({e}). Try again.");
            }
        }
    };

    let password = loop {
        let first = rpassword_prompt("Choose a password to encrypt the signing key")?;
        if first.is_empty() {
            println!("Password must not be empty.");
            continue;
        }
        let confirm = rpassword_prompt("Confirm password")?;
        if first != confirm {
            println!("Passwords do not match, try again.");
            continue;
        }
        break first;
    };

    let private_key = SecretStore::encrypt(&password, &wif).context("failed to encrypt signing key")?;

    let record = ConfigRecord {
        rpc_url,
        rpc_username: None,
        rpc_password: None,
        token,
        private_key,
        network: "xna".to_string(),
        poll_interval_ms: 10_000,
        timezone: "UTC".to_string(),
    };
    record
        .save_to_path(config_path)
        .context("failed to write config.json")?;

    println!("\nWrote {}.", config_path.display());
    println!("Start the client with: xna-messenger --config {}", config_path.display());
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let trimmed = line.trim().to_string();
    if trimmed.is_empty() {
        bail!("{label} must not be empty");
    }
    Ok(trimmed)
}

fn rpassword_prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    Ok(rpassword::read_password()?)
}

fn read_password_no_confirm(label: &str) -> Result<String> {
    rpassword_prompt(label)
}
