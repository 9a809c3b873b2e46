//! Drives one lock session from controller commands

use data_encoding::HEXUPPER;
use latch_ble_controller::{ChannelSession, ConnectError, LinkError, SendError, Transport};
use latch_cipher::{ChannelCipher, CipherError};
use latch_proto::Command;
use tokio::sync::mpsc;

use crate::relay::{Controller, RelayError};

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("send failed: {0}")]
    Send(#[from] SendError),
    #[error("disconnect failed: {0}")]
    Link(#[from] LinkError),
    #[error("cipher failed: {0}")]
    Cipher(#[from] CipherError),
}

/// What the session callbacks report back to the dispatch loop
#[derive(Debug)]
enum ChannelEvent {
    Frame(Vec<u8>),
    Dropped,
}

/// Owns the session to one lock and relays its frames to the controller
///
/// Frames from the lock are queued by the session callbacks and consumed by
/// [`run`](Self::run); each is posted to the controller and the controller's
/// reply is handled before the next frame is taken.
pub struct Dispatcher<T: Transport, C: Controller> {
    session: ChannelSession<T>,
    controller: C,
    cipher: Option<ChannelCipher>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl<T: Transport, C: Controller> Dispatcher<T, C> {
    pub fn new(transport: T, controller: C) -> Self {
        let (_, events) = mpsc::unbounded_channel();
        Self {
            session: ChannelSession::new(transport),
            controller,
            cipher: None,
            events,
        }
    }

    /// Encrypt frames to the lock and decrypt frames from it
    pub fn with_cipher(mut self, cipher: ChannelCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn session(&self) -> &ChannelSession<T> {
        &self.session
    }

    pub fn cipher(&self) -> Option<&ChannelCipher> {
        self.cipher.as_ref()
    }

    /// Handle `first`, then relay lock frames until the channel closes
    ///
    /// A link drop does not end the loop; the next send rebinds in place. A
    /// relay failure drops the frame that caused it; channel failures end the
    /// loop.
    pub async fn run(&mut self, first: Command) -> Result<(), DispatchError> {
        self.handle(first).await?;

        while self.session.serial().is_some() {
            match self.events.recv().await {
                Some(ChannelEvent::Frame(frame)) => self.on_frame(frame).await?,
                Some(ChannelEvent::Dropped) => {
                    tracing::info!("lock dropped the link, next send rebinds");
                }
                None => break,
            }
        }
        Ok(())
    }

    pub async fn handle(&mut self, command: Command) -> Result<(), DispatchError> {
        tracing::debug!(tag = command.tag(), "handling command");
        match command {
            Command::OpenChannel { serial, message } => {
                if self.session.serial().is_some_and(|bound| bound as u64 == serial) {
                    tracing::info!(serial, "already connected to lock");
                } else {
                    self.open(serial).await?;
                }
                if !message.is_empty() {
                    self.send_frame(message).await?;
                }
            }
            Command::SendPayload(payload) => self.send_frame(payload).await?,
            Command::CloseChannel => self.session.disconnect().await?,
        }
        Ok(())
    }

    async fn open(&mut self, serial: u64) -> Result<(), DispatchError> {
        let (frames, events) = mpsc::unbounded_channel();
        let dropped = frames.clone();
        self.events = events;

        self.session
            .connect(
                serial,
                move || {
                    let _ = dropped.send(ChannelEvent::Dropped);
                },
                move |frame| {
                    let _ = frames.send(ChannelEvent::Frame(frame));
                },
            )
            .await?;
        Ok(())
    }

    async fn send_frame(&mut self, payload: Vec<u8>) -> Result<(), DispatchError> {
        let frame = match &mut self.cipher {
            Some(cipher) => cipher.seal(&payload)?,
            None => payload,
        };
        tracing::debug!(frame = %HEXUPPER.encode(&frame), "sending");
        self.session.send(&frame).await?;
        Ok(())
    }

    async fn on_frame(&mut self, frame: Vec<u8>) -> Result<(), DispatchError> {
        tracing::debug!(frame = %HEXUPPER.encode(&frame), "received");
        let payload = match &mut self.cipher {
            Some(cipher) => cipher.open(&frame)?,
            None => frame,
        };
        let Some(serial) = self.session.serial() else {
            return Ok(());
        };

        let command = match self.controller.relay(serial, &payload).await {
            Ok(Command::OpenChannel { .. }) => {
                tracing::error!(error = %RelayError::UnexpectedCommand, "dropping frame");
                return Ok(());
            }
            Ok(command) => command,
            Err(e) => {
                tracing::error!(error = %e, "dropping frame");
                return Ok(());
            }
        };
        self.handle(command).await
    }
}
