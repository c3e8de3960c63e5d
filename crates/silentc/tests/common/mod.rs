#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use silent_common::{FrameCodec, FrameLimits, Message};
use silentc::config::ClientConfig;
use silentc::connection::{ConnStatus, Credentials};
use silentc::error::SessionError;
use silentc::tls::Dialer;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use zeroize::Zeroizing;

/// What the fake server does with one connection attempt.
#[derive(Debug, Clone)]
pub enum Script {
    /// Dial fails before any transport exists.
    Refuse,
    /// Accept the login, then record everything the client writes.
    Accept,
    /// Accept the login and push the given chat lines right away.
    AcceptAndSay(Vec<(String, String)>),
    /// Refuse the login with this reason.
    Reject(String),
    /// Read the login and never answer.
    Silent,
    /// Accept the login, then announce a body one byte over the hard limit.
    Hostile,
    /// Accept the login, then hang up.
    HangUp,
}

/// Bytes the client wrote after a successful login, per connection.
pub type Transcript = Vec<u8>;

/// In-memory dialer that plays one [`Script`] per attempt.
pub struct ScriptedDialer {
    scripts: Mutex<VecDeque<Script>>,
    dials: Mutex<Vec<Instant>>,
    limits: FrameLimits,
    transcripts: mpsc::UnboundedSender<Transcript>,
}

impl ScriptedDialer {
    pub fn new(
        scripts: impl IntoIterator<Item = Script>,
    ) -> (Self, mpsc::UnboundedReceiver<Transcript>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            dials: Mutex::new(Vec::new()),
            limits: FrameLimits::default(),
            transcripts: tx,
        };
        (dialer, rx)
    }

    /// Gaps between consecutive dial attempts, in milliseconds.
    pub fn gaps_ms(&self) -> Vec<u128> {
        let dials = self.dials.lock().unwrap();
        dials
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect()
    }

    pub fn dial_count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }
}

impl Dialer for ScriptedDialer {
    type Stream = DuplexStream;

    async fn dial(&self) -> Result<DuplexStream, SessionError> {
        self.dials.lock().unwrap().push(Instant::now());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Refuse);

        if let Script::Refuse = script {
            return Err(SessionError::Dial {
                addr: "scripted:0".into(),
                reason: "connection refused".into(),
            });
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(server, script, self.limits, self.transcripts.clone()));
        Ok(client)
    }
}

fn verdict(success: bool, error: Option<String>) -> Message {
    Message::AuthResult { success, error }
}

async fn serve(
    stream: DuplexStream,
    script: Script,
    limits: FrameLimits,
    transcripts: mpsc::UnboundedSender<Transcript>,
) {
    let mut framed = Framed::new(stream, FrameCodec::new(limits));
    let Some(Ok(Message::Auth { .. })) = framed.next().await else {
        return;
    };

    match script {
        Script::Refuse => return,
        Script::Reject(reason) => {
            let _ = framed.send(&verdict(false, Some(reason))).await;
            return;
        }
        Script::HangUp => {
            let _ = framed.send(&verdict(true, None)).await;
            return;
        }
        Script::Silent => {}
        Script::Accept | Script::Hostile => {
            let _ = framed.send(&verdict(true, None)).await;
        }
        Script::AcceptAndSay(ref lines) => {
            let _ = framed.send(&verdict(true, None)).await;
            for (sender, text) in lines {
                let _ = framed.send(&Message::chat(sender, text)).await;
            }
        }
    }

    let parts = framed.into_parts();
    let mut io = parts.io;
    let mut transcript = parts.read_buf.to_vec();

    if let Script::Hostile = script {
        let declared = u32::try_from(limits.hard_max + 1).unwrap();
        let _ = io.write_all(&declared.to_be_bytes()).await;
    }

    let _ = io.read_to_end(&mut transcript).await;
    let _ = transcripts.send(transcript);
}

/// Splits a transcript into the frames it contains plus any unframed tail.
pub fn split_frames(mut bytes: &[u8]) -> (Vec<Message>, Vec<u8>) {
    let mut frames = Vec::new();
    while bytes.len() >= 4 {
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if len == 0 || bytes.len() < 4 + len {
            break;
        }
        match serde_json::from_slice::<Message>(&bytes[4..4 + len]) {
            Ok(msg) => frames.push(msg),
            Err(_) => break,
        }
        bytes = &bytes[4 + len..];
    }
    (frames, bytes.to_vec())
}

/// Client configuration with decoys and jitter off, so timing is exact.
pub fn quiet_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.decoy.enabled = false;
    config.jitter.max_send_delay_ms = 0;
    config
}

pub fn credentials() -> Credentials {
    Credentials {
        username: "alice".into(),
        password: Zeroizing::new("hunter2".into()),
    }
}

pub fn status_channel() -> (
    tokio::sync::watch::Sender<ConnStatus>,
    tokio::sync::watch::Receiver<ConnStatus>,
) {
    tokio::sync::watch::channel(ConnStatus::Disconnected)
}
