//! TCP backend adapter for a single Redis server
//!
//! Each link runs one engine task that writes queued requests and parses
//! replies as they arrive. Replies are matched to callbacks in submission
//! order; after `SUBSCRIBE`/`PSUBSCRIBE` the link also routes pushed
//! subscription frames to a persistent subscriber callback.

use super::contents::Contents;
use super::resp::{RespEncoder, RespParser, RespValue};
use super::system::{ConnectionHandlers, ContextError, RedisConnection, RedisSystem, ReplyCallback};
use crate::core::{Connector, Engine, HostAndPort, TaskId};
use bytes::{Bytes, BytesMut};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 16 * 1024;

const PUSH_KINDS: [&[u8]; 6] = [
    b"subscribe",
    b"psubscribe",
    b"unsubscribe",
    b"punsubscribe",
    b"message",
    b"pmessage",
];

#[derive(Default)]
struct LinkState {
    closed: bool,
    pending: VecDeque<ReplyCallback>,
    subscriber: Option<Rc<RefCell<ReplyCallback>>>,
}

/// Opens TCP links through the engine
pub struct TcpRedisSystem {
    engine: Rc<dyn Engine>,
    connector: Connector,
}

impl TcpRedisSystem {
    pub fn new(engine: Rc<dyn Engine>, connector: Connector) -> Self {
        Self { engine, connector }
    }
}

impl RedisSystem for TcpRedisSystem {
    fn connect(
        &self,
        address: &HostAndPort,
        handlers: ConnectionHandlers,
    ) -> Result<Box<dyn RedisConnection>, ContextError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Rc::new(RefCell::new(LinkState::default()));
        let link = Rc::downgrade(&shared);
        let connector = self.connector.clone();
        let address = address.clone();

        let task = self.engine.spawn_task(Box::pin(async move {
            run_link(connector, address, receiver, link, handlers).await;
        }));

        Ok(Box::new(TcpConnection {
            engine: self.engine.clone(),
            shared,
            sender,
            task,
        }))
    }
}

pub struct TcpConnection {
    engine: Rc<dyn Engine>,
    shared: Rc<RefCell<LinkState>>,
    sender: mpsc::UnboundedSender<Bytes>,
    task: TaskId,
}

fn is_subscribe(contents: &Contents) -> bool {
    contents.command().map_or(false, |cmd| {
        cmd.eq_ignore_ascii_case(b"subscribe") || cmd.eq_ignore_ascii_case(b"psubscribe")
    })
}

impl RedisConnection for TcpConnection {
    fn command_argv(
        &mut self,
        contents: &Contents,
        on_reply: ReplyCallback,
    ) -> Result<(), ContextError> {
        let mut state = self.shared.borrow_mut();
        if state.closed {
            return Err(ContextError::Other("connection is closed".to_string()));
        }

        let subscribe = is_subscribe(contents);
        if subscribe {
            state.subscriber = Some(Rc::new(RefCell::new(on_reply)));
        } else {
            state.pending.push_back(on_reply);
        }

        if self.sender.send(RespEncoder::encode_argv(contents.argv())).is_err() {
            if subscribe {
                state.subscriber = None;
            } else {
                state.pending.pop_back();
            }
            return Err(ContextError::Eof);
        }
        Ok(())
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.try_borrow_mut() {
            state.closed = true;
            state.pending.clear();
            state.subscriber = None;
        }
        self.engine.abort_task(self.task);
    }
}

fn is_open(link: &Weak<RefCell<LinkState>>) -> bool {
    link.upgrade().map_or(false, |state| !state.borrow().closed)
}

async fn run_link(
    connector: Connector,
    address: HostAndPort,
    mut receiver: mpsc::UnboundedReceiver<Bytes>,
    link: Weak<RefCell<LinkState>>,
    handlers: ConnectionHandlers,
) {
    let ConnectionHandlers {
        on_connect,
        on_disconnect,
    } = handlers;

    let stream = match connector.connect(&address).await.into_io_result() {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", address, e);
            // Commands may already be queued behind the connect
            let error = ContextError::from(e);
            if fail_pending(&link, &error) && is_open(&link) {
                on_connect(Err(error));
            }
            return;
        }
    };

    info!("Connected to redis at {}", address);
    if !is_open(&link) {
        return;
    }
    on_connect(Ok(()));

    let error = drive(stream, &mut receiver, &link).await;
    drop(receiver);
    debug!("Link to {} ended: {}", address, error);

    if fail_pending(&link, &error) && is_open(&link) {
        on_disconnect(Err(error));
    }
}

/// Fail every queued reply callback with `error` and drop the subscriber.
/// Returns false if the owner already released the link.
fn fail_pending(link: &Weak<RefCell<LinkState>>, error: &ContextError) -> bool {
    let pending = match link.upgrade() {
        Some(state) => {
            let mut state = state.borrow_mut();
            if state.closed {
                return false;
            }
            state.subscriber = None;
            std::mem::take(&mut state.pending)
        }
        None => return false,
    };
    // Taken callbacks all run even if one of them releases the link
    for mut callback in pending {
        callback(Err(error.clone()));
    }
    true
}

/// Pump requests and replies until the stream fails. Returns the reason the
/// link ended.
async fn drive<S>(
    mut stream: S,
    receiver: &mut mpsc::UnboundedReceiver<Bytes>,
    link: &Weak<RefCell<LinkState>>,
) -> ContextError
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut parser = RespParser::new();
    loop {
        tokio::select! {
            outgoing = receiver.recv() => match outgoing {
                Some(payload) => {
                    if let Err(e) = stream.write_all(&payload).await {
                        return e.into();
                    }
                }
                None => return ContextError::Other("connection released".to_string()),
            },
            read = stream.read_buf(&mut buffer) => match read {
                Ok(0) => return ContextError::Eof,
                Ok(_) => loop {
                    match parser.parse(&mut buffer) {
                        Ok(Some(frame)) => deliver(link, frame),
                        Ok(None) => break,
                        Err(e) => return ContextError::Protocol(e.to_string()),
                    }
                },
                Err(e) => return e.into(),
            },
        }
    }
}

fn is_push(frame: &RespValue) -> bool {
    match frame {
        RespValue::Array(Some(items)) => items
            .first()
            .and_then(|kind| kind.as_bytes())
            .map_or(false, |kind| {
                PUSH_KINDS.iter().any(|push| kind.eq_ignore_ascii_case(push))
            }),
        _ => false,
    }
}

enum Target {
    OneShot(ReplyCallback),
    Subscriber(Rc<RefCell<ReplyCallback>>),
}

/// Hand one frame to its callback with no link borrow held
fn deliver(link: &Weak<RefCell<LinkState>>, frame: RespValue) {
    let target = {
        let Some(state) = link.upgrade() else {
            return;
        };
        let mut state = state.borrow_mut();
        if state.closed {
            return;
        }
        match state.subscriber.clone() {
            Some(subscriber) if is_push(&frame) => Target::Subscriber(subscriber),
            _ => match state.pending.pop_front() {
                Some(callback) => Target::OneShot(callback),
                None => {
                    warn!("Dropping unsolicited reply from redis");
                    return;
                }
            },
        }
    };

    match target {
        Target::OneShot(mut callback) => callback(Ok(frame)),
        Target::Subscriber(subscriber) => {
            let mut callback = subscriber.borrow_mut();
            (*callback)(Ok(frame))
        }
    }
}
