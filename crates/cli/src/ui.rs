use async_trait::async_trait;
use messenger_core::{Event, UiAdapter};

/// Minimal terminal rendering of supervisor/poller/sender events: no
/// alternate screen or full redraw loop, just timestamped status lines.
/// A richer `{Input, PickingRecipient{...}}` popup UI is left for a
/// future iteration; this adapter is enough to drive the chat loop.
pub struct TerminalUiAdapter;

#[async_trait]
impl UiAdapter for TerminalUiAdapter {
    async fn handle(&self, event: Event) {
        match event {
            Event::SupervisorVerifying => {
                println!("[*] verifying preconditions (rpc, token, pubkey)...");
            }
            Event::SupervisorRunning { was_disconnected } => {
                if was_disconnected {
                    println!("[+] reconnected, resyncing message history...");
                } else {
                    println!("[+] running.");
                }
            }
            Event::SupervisorBlocked {
                reason,
                retry_in_secs,
            } => {
                println!("[!] blocked: {reason} (retrying in {retry_in_secs}s)");
            }
            Event::MessageReceived(message) => match message.peer {
                Some(peer) => println!("<{peer}> {}", message.plaintext),
                None => println!("<{}> {}", message.sender, message.plaintext),
            },
            Event::MessageSent { peer } => match peer {
                Some(peer) => println!("-> sent to {peer}"),
                None => println!("-> sent to group"),
            },
            Event::BlockingErrors { messages } => {
                for message in messages {
                    println!("[!]   - {message}");
                }
            }
            Event::BlockingCleared => {
                println!("[+] all preconditions clear.");
            }
            Event::Reconnected => {
                println!("[+] rpc connection restored.");
            }
            Event::PollComplete {
                date,
                new_count,
                total,
                pool_info,
            } => {
                if new_count > 0 {
                    let pool = pool_info
                        .map(|k| format!(", pool {k}"))
                        .unwrap_or_default();
                    println!("[.] poll @ {date}: {new_count} new (total {total}{pool})");
                }
            }
            Event::PollError { message } => {
                println!("[!] poll error: {message}");
            }
            Event::StatusLine(line) => println!("{line}"),
        }
    }
}
