mod ui;
mod wizard;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use messenger_core::config::ConfigRecord;
use messenger_core::directory::RecipientDirectory;
use messenger_core::envelope::EnvelopeCodec;
use messenger_core::keys::SigningKey;
use messenger_core::poller::Poller;
use messenger_core::rpc::{RpcApi, RpcClient};
use messenger_core::secret_store::SecretStore;
use messenger_core::sender::Sender;
use messenger_core::store::MessageStore;
use messenger_core::supervisor::Supervisor;
use messenger_crypto::Secp256k1CryptoMsg;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

#[derive(Parser, Debug)]
#[command(name = "xna-messenger", about = "Token-gated E2EE chat over an xna node")]
struct Cli {
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, help = "Run the interactive first-run setup wizard")]
    wizard: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.wizard {
        return wizard::run(&cli.config);
    }

    if !cli.config.exists() {
        println!(
            "No config found at {}. Run with --wizard to create one.",
            cli.config.display()
        );
        return Ok(());
    }

    let config = ConfigRecord::load_from_path(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let wif = SecretStore::unlock_interactive(&config.private_key)
        .context("failed to unlock signing key")?;
    let signing_key = SigningKey::from_wif(&wif).context("stored key is not a valid WIF")?;
    let self_address = signing_key.address();
    let self_pubkey = signing_key.pubkey();
    let self_private_key_hex: Zeroizing<String> = signing_key.secret_hex();

    let endpoint = config.rpc_endpoint()?;
    let rpc: Arc<dyn RpcApi> = Arc::new(RpcClient::new(
        endpoint,
        config.rpc_username.as_deref(),
        config.rpc_password.as_deref(),
    )?);

    let directory = Arc::new(RecipientDirectory::new(rpc.clone(), config.token.clone()));
    let codec = Arc::new(EnvelopeCodec::new(Arc::new(Secp256k1CryptoMsg::new())));
    let store = Arc::new(Mutex::new(MessageStore::new()));
    let ui = Arc::new(ui::TerminalUiAdapter);

    let poller = Arc::new(Poller::new(
        rpc.clone(),
        directory.clone(),
        codec.clone(),
        store.clone(),
        ui.clone(),
        self_address.clone(),
        config.token.clone(),
    ));

    let sender = Sender::new(
        rpc.clone(),
        directory.clone(),
        codec.clone(),
        store.clone(),
        config.token.clone(),
        self_address.clone(),
        self_pubkey.as_hex().to_string(),
        self_private_key_hex.as_str().to_string(),
    );

    let supervisor = Arc::new(Supervisor::new(
        rpc,
        directory,
        poller,
        store,
        ui,
        config.token.clone(),
        self_address,
        self_private_key_hex.as_str().to_string(),
        Duration::from_millis(config.poll_interval_ms),
    ));

    let cancellation = CancellationToken::new();
    let supervisor_token = cancellation.clone();
    let supervisor_handle = tokio::spawn(async move { supervisor.run(supervisor_token).await });

    let shutdown_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_token.cancel();
        }
    });

    run_chat_loop(&sender, &cancellation).await;

    cancellation.cancel();
    let _ = supervisor_handle.await;
    Ok(())
}

/// Reads stdin on a blocking thread and feeds lines through a bounded
/// channel, so the chat loop stays on the async side without blocking a
/// tokio worker thread on a synchronous read.
async fn run_chat_loop(sender: &Sender, cancellation: &CancellationToken) {
    use std::io::BufRead;
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(8);
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => return,
            line = rx.recv() => {
                let Some(line) = line else { return };
                if line.trim().is_empty() {
                    continue;
                }
                let timestamp = chrono::Utc::now().timestamp() as u64;
                match sender.send_line(&line, timestamp).await {
                    Ok(hash) => tracing::info!(hash, "message sent"),
                    Err(e) => println!("send failed: {e}"),
                }
            }
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}
