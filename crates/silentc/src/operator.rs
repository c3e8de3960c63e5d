use crate::connection::{ConnStatus, Credentials};
use crate::pump::InboundChat;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{BufRead, IsTerminal, Write};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use zeroize::Zeroizing;

/// Prompt drawn after every rendered line.
pub const INPUT_PROMPT: &str = "> ";

/// Errors raised while collecting login details.
#[derive(Debug, Error)]
pub enum LoginError {
    /// The operator aborted or input ended.
    #[error("login cancelled")]
    Cancelled,
    /// A required field was left empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
    /// The port is not a number in 1..=65535.
    #[error("invalid port: {0}")]
    InvalidPort(String),
    /// Terminal I/O failed.
    #[error("terminal error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to reach and log in to a server.
pub struct LoginDetails {
    /// Server host name or address.
    pub host: String,
    /// Server TCP port.
    pub port: u16,
    /// Username and password.
    pub credentials: Credentials,
}

/// Supplies login details, typically by asking the operator.
pub trait LoginSource {
    /// Collects host, port, username and password.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::Cancelled`] if the operator backs out, or a
    /// validation error for unusable input.
    fn login(&mut self) -> Result<LoginDetails, LoginError>;
}

/// Reads one trimmed line after printing `label`. End of input cancels.
///
/// # Errors
///
/// [`LoginError::Cancelled`] on end of input, or the I/O error.
pub fn prompt_line<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    label: &str,
) -> Result<String, LoginError> {
    write!(out, "{label}")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(LoginError::Cancelled);
    }
    Ok(line.trim().to_string())
}

/// Parses a port entered by the operator.
///
/// # Errors
///
/// [`LoginError::Empty`] for blank input, [`LoginError::InvalidPort`] otherwise.
pub fn parse_port(raw: &str) -> Result<u16, LoginError> {
    if raw.is_empty() {
        return Err(LoginError::Empty("port"));
    }
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(LoginError::InvalidPort(raw.to_string())),
        Ok(port) => Ok(port),
    }
}

/// Asks for whatever the command line left out.
///
/// The password is always asked for and is not echoed when stdin is a
/// terminal.
pub struct TerminalLogin {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
}

impl TerminalLogin {
    /// Creates a login source with optional pre-filled values.
    #[must_use]
    pub const fn new(host: Option<String>, port: Option<u16>, username: Option<String>) -> Self {
        Self {
            host,
            port,
            username,
        }
    }

    /// Runs the prompts against arbitrary streams. `password` reads the secret.
    ///
    /// # Errors
    ///
    /// See [`LoginSource::login`].
    pub fn login_with<R, W, P>(
        &mut self,
        input: &mut R,
        out: &mut W,
        password: P,
    ) -> Result<LoginDetails, LoginError>
    where
        R: BufRead,
        W: Write,
        P: FnOnce(&mut R, &mut W) -> Result<Zeroizing<String>, LoginError>,
    {
        let host = match self.host.take() {
            Some(host) => host,
            None => prompt_line(input, out, "Server host: ")?,
        };
        if host.is_empty() {
            return Err(LoginError::Empty("host"));
        }

        let port = match self.port.take() {
            Some(port) => port,
            None => parse_port(&prompt_line(input, out, "Server port: ")?)?,
        };

        let password = password(input, out)?;

        let username = match self.username.take() {
            Some(name) => name,
            None => prompt_line(input, out, "Username: ")?,
        };
        if username.is_empty() {
            return Err(LoginError::Empty("username"));
        }

        Ok(LoginDetails {
            host,
            port,
            credentials: Credentials { username, password },
        })
    }
}

impl LoginSource for TerminalLogin {
    fn login(&mut self) -> Result<LoginDetails, LoginError> {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut out = std::io::stderr();
        self.login_with(&mut input, &mut out, |input, out| {
            write!(out, "Server password: ")?;
            out.flush()?;
            let secret = if std::io::stdin().is_terminal() {
                read_hidden()
            } else {
                read_secret_line(input)
            };
            writeln!(out)?;
            secret
        })
    }
}

/// Reads a password line from non-terminal input, stripping the line ending.
///
/// # Errors
///
/// [`LoginError::Cancelled`] on end of input, or the I/O error.
pub fn read_secret_line<R: BufRead>(input: &mut R) -> Result<Zeroizing<String>, LoginError> {
    let mut line = Zeroizing::new(String::new());
    if input.read_line(&mut line)? == 0 {
        return Err(LoginError::Cancelled);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(line)
}

fn read_hidden() -> Result<Zeroizing<String>, LoginError> {
    terminal::enable_raw_mode()?;
    let result = read_hidden_keys();
    if let Err(e) = terminal::disable_raw_mode() {
        debug!(error = %e, "failed to restore terminal mode");
    }
    result
}

fn read_hidden_keys() -> Result<Zeroizing<String>, LoginError> {
    let mut secret = Zeroizing::new(String::new());
    loop {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }
        match code {
            KeyCode::Enter => return Ok(secret),
            KeyCode::Esc => return Err(LoginError::Cancelled),
            KeyCode::Char('c' | 'd') if modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(LoginError::Cancelled)
            }
            KeyCode::Backspace => {
                secret.pop();
            }
            KeyCode::Char(c) => secret.push(c),
            _ => {}
        }
    }
}

/// Forwards input lines to the send path until end of input.
///
/// Blocking; run it on a blocking thread. Pass the same buffered reader the
/// login prompts used so input typed ahead of the connection is kept.
/// Dropping the sender on return tells the pump the input side is gone.
pub fn forward_lines<R: BufRead>(reader: R, outbox_tx: mpsc::Sender<String>) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if outbox_tx.blocking_send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "input read failed");
                break;
            }
        }
    }
    debug!("input reader finished");
}

/// Formats one inbound chat line for display.
#[must_use]
pub fn format_chat(chat: &InboundChat) -> String {
    format!("{}: {}", chat.sender, chat.text)
}

/// Prints inbound chat and redraws the input prompt.
///
/// Returns when the inbound channel closes.
///
/// # Errors
///
/// Returns the I/O error if `out` cannot be written.
pub async fn render_inbound<W: Write>(
    mut inbox_rx: mpsc::Receiver<InboundChat>,
    mut status_rx: watch::Receiver<ConnStatus>,
    mut out: W,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            chat = inbox_rx.recv() => {
                let Some(chat) = chat else { break };
                write!(out, "\r{}\n{INPUT_PROMPT}", format_chat(&chat))?;
                out.flush()?;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    // Status publisher gone; keep draining chat only.
                    while let Some(chat) = inbox_rx.recv().await {
                        write!(out, "\r{}\n{INPUT_PROMPT}", format_chat(&chat))?;
                        out.flush()?;
                    }
                    break;
                }
                if *status_rx.borrow_and_update() == ConnStatus::Connected {
                    write!(out, "{INPUT_PROMPT}")?;
                    out.flush()?;
                }
            }
        }
    }
    Ok(())
}
