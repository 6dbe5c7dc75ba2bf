use std::io::Write as _;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use rand::rngs::OsRng;
use rand::RngCore;
use scrypt::Params;
use zeroize::Zeroizing;

use crate::error::SecretError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const MAX_UNLOCK_ATTEMPTS: u32 = 3;
const SCRYPT_LOG_N: u8 = 14; // N = 16384
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Password-derived AEAD wrapper around the WIF signing key. The on-disk
/// form is `salt:iv:tag:ct`, all lowercase hex, colon-separated.
pub struct SecretStore;

impl SecretStore {
    /// Seal `plaintext` (the WIF string) under `password`, producing the
    /// `salt:iv:tag:ct` record stored as `ConfigRecord::private_key`.
    pub fn encrypt(password: &str, plaintext: &str) -> Result<String, SecretError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = derive_key(password, &salt)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut sealed = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &salt,
                },
            )
            .map_err(|_| SecretError::Io("encryption failure".into()))?;
        // aes-gcm appends the 16-byte tag to the ciphertext; split it back
        // out so the on-disk record keeps tag and ciphertext separate.
        let tag = sealed.split_off(sealed.len() - 16);

        Ok(format!(
            "{}:{}:{}:{}",
            hex::encode(salt),
            hex::encode(nonce_bytes),
            hex::encode(tag),
            hex::encode(sealed),
        ))
    }

    /// Attempt to decrypt `record` with `password`. Errors are generic
    /// (`BadPassword`/`MalformedSecret`) so a failed attempt never leaks
    /// which structural check tripped.
    pub fn decrypt(password: &str, record: &str) -> Result<Zeroizing<String>, SecretError> {
        let parts: Vec<&str> = record.split(':').collect();
        let [salt_hex, iv_hex, tag_hex, ct_hex] = parts[..] else {
            return Err(SecretError::MalformedSecret);
        };
        let salt = hex::decode(salt_hex).map_err(|_| SecretError::MalformedSecret)?;
        let iv = hex::decode(iv_hex).map_err(|_| SecretError::MalformedSecret)?;
        let tag = hex::decode(tag_hex).map_err(|_| SecretError::MalformedSecret)?;
        let ct = hex::decode(ct_hex).map_err(|_| SecretError::MalformedSecret)?;
        if salt.len() != SALT_LEN || iv.len() != NONCE_LEN || tag.len() != 16 {
            return Err(SecretError::MalformedSecret);
        }

        let key = derive_key(password, &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Nonce::from_slice(&iv);
        let mut combined = ct.clone();
        combined.extend_from_slice(&tag);
        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &combined,
                    aad: &salt,
                },
            )
            .map_err(|_| SecretError::BadPassword)?;
        let plaintext =
            String::from_utf8(plaintext).map_err(|_| SecretError::BadPassword)?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Bounded-attempt interactive unlock: prompts for a password on the
    /// controlling terminal with no echo, up to `MAX_UNLOCK_ATTEMPTS`
    /// times, returning the decrypted WIF on success.
    pub fn unlock_interactive(record: &str) -> Result<Zeroizing<String>, SecretError> {
        for attempt in 1..=MAX_UNLOCK_ATTEMPTS {
            let password = read_password_no_echo("Password: ")?;
            match Self::decrypt(&password, record) {
                Ok(wif) => return Ok(wif),
                Err(SecretError::MalformedSecret) => {
                    return Err(SecretError::MalformedSecret);
                }
                Err(_) if attempt < MAX_UNLOCK_ATTEMPTS => {
                    eprintln!("Incorrect password, try again.");
                }
                Err(_) => return Err(SecretError::MaxAttemptsExceeded),
            }
        }
        Err(SecretError::MaxAttemptsExceeded)
    }
}

fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], SecretError> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| SecretError::Io(e.to_string()))?;
    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(password.as_bytes(), salt, &params, &mut key)
        .map_err(|e| SecretError::Io(e.to_string()))?;
    Ok(key)
}

/// Reads one line of no-echo input from the controlling terminal. Raw
/// mode is entered for the duration of the read and always restored,
/// even on error, via a drop guard.
fn read_password_no_echo(prompt: &str) -> Result<Zeroizing<String>, SecretError> {
    print!("{prompt}");
    std::io::stdout()
        .flush()
        .map_err(|e| SecretError::Io(e.to_string()))?;

    struct RawModeGuard;
    impl Drop for RawModeGuard {
        fn drop(&mut self) {
            let _ = terminal::disable_raw_mode();
        }
    }

    terminal::enable_raw_mode().map_err(|e| SecretError::Io(e.to_string()))?;
    let _guard = RawModeGuard;

    let mut buf = Zeroizing::new(String::new());
    let mut stripper = AnsiStripper::new();
    loop {
        let event = event::read().map_err(|e| SecretError::Io(e.to_string()))?;
        let Event::Key(key) = event else { continue };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Enter => break,
            // Ctrl-D: finish input, same as Enter, per Unix EOF convention.
            KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
            // Ctrl-C: abandon the prompt entirely rather than insert 'c'.
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                println!();
                std::process::exit(130);
            }
            KeyCode::Backspace => {
                if buf.pop().is_some() {
                    print!("\u{8} \u{8}");
                    let _ = std::io::stdout().flush();
                }
            }
            KeyCode::Char(c) => {
                for kept in stripper.feed(c) {
                    buf.push(kept);
                    print!("*");
                }
                let _ = std::io::stdout().flush();
            }
            _ => {}
        }
    }
    println!();
    Ok(buf)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum AnsiState {
    Normal,
    Esc,
    Csi,
    Osc,
    OscEsc,
}

/// Strips ANSI escape sequences that can arrive as literal characters
/// when a terminal emulator pastes or bracket-pastes into a raw-mode
/// read; ordinary characters pass straight through.
struct AnsiStripper {
    state: AnsiState,
}

impl AnsiStripper {
    fn new() -> Self {
        AnsiStripper {
            state: AnsiState::Normal,
        }
    }

    /// Feed one character, returning zero or more characters that should
    /// be appended to the password buffer.
    fn feed(&mut self, c: char) -> Vec<char> {
        match self.state {
            AnsiState::Normal => {
                if c == '\u{1b}' {
                    self.state = AnsiState::Esc;
                    Vec::new()
                } else {
                    vec![c]
                }
            }
            AnsiState::Esc => {
                self.state = match c {
                    '[' => AnsiState::Csi,
                    ']' => AnsiState::Osc,
                    _ => AnsiState::Normal,
                };
                Vec::new()
            }
            AnsiState::Csi => {
                if c.is_ascii_alphabetic() || c == '~' {
                    self.state = AnsiState::Normal;
                }
                Vec::new()
            }
            AnsiState::Osc => {
                if c == '\u{07}' {
                    self.state = AnsiState::Normal;
                } else if c == '\u{1b}' {
                    self.state = AnsiState::OscEsc;
                }
                Vec::new()
            }
            AnsiState::OscEsc => {
                self.state = if c == '\\' {
                    AnsiState::Normal
                } else {
                    AnsiState::Osc
                };
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_recovers_plaintext() {
        let record = SecretStore::encrypt("hunter2", "Kx-some-wif-string").unwrap();
        let plaintext = SecretStore::decrypt("hunter2", &record).unwrap();
        assert_eq!(plaintext.as_str(), "Kx-some-wif-string");
    }

    #[test]
    fn wrong_password_is_bad_password_not_malformed() {
        let record = SecretStore::encrypt("hunter2", "Kx-some-wif-string").unwrap();
        let err = SecretStore::decrypt("wrong", &record).unwrap_err();
        assert!(matches!(err, SecretError::BadPassword));
    }

    #[test]
    fn malformed_record_is_rejected() {
        let err = SecretStore::decrypt("anything", "not-enough-parts").unwrap_err();
        assert!(matches!(err, SecretError::MalformedSecret));
    }

    #[test]
    fn ansi_stripper_drops_csi_sequence() {
        let mut stripper = AnsiStripper::new();
        let mut out = Vec::new();
        for c in "\u{1b}[31mred\u{1b}[0m".chars() {
            out.extend(stripper.feed(c));
        }
        assert_eq!(out.into_iter().collect::<String>(), "red");
    }

    #[test]
    fn ansi_stripper_drops_osc_sequence() {
        let mut stripper = AnsiStripper::new();
        let mut out = Vec::new();
        for c in "\u{1b}]0;title\u{07}ok".chars() {
            out.extend(stripper.feed(c));
        }
        assert_eq!(out.into_iter().collect::<String>(), "ok");
    }
}
