//! Dispatcher for a single Redis server (standalone, or the current master
//! reported by Sentinel)
//!
//! DISCONNECTED -> transport up -> VERIFYING -> probe ok -> CONNECTED.
//! Transport loss from any state returns to DISCONNECTED and reconnects
//! after the connection retry interval. A failed probe keeps the transport
//! and re-probes after the verification retry interval. Sentinel
//! connections skip the probe.

use super::contents::{Contents, ContentsBuilder};
use super::dispatcher::{
    AsyncCommandDispatcher, CommandCb, ConnectAck, DisconnectCb, DispatcherOptions, ServiceState,
};
use super::general::{
    map_context_error, missing_commands_message, missing_module_commands,
    parse_command_list_reply,
};
use super::pending::{
    fire_connect_acks, fire_disconnect_cbs, post_command_result, reply_callback, CallbackOwner,
    CommandCallbacks,
};
use super::reply::Reply;
use super::system::{ConnectionHandlers, ContextError, RedisConnection, RedisSystem};
use crate::core::{Engine, HostAndPort, Timer};
use crate::error::DispatcherError;
use crate::utils::{abort, format_duration};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

struct Inner {
    this: Weak<RefCell<Inner>>,
    engine: Rc<dyn Engine>,
    system: Rc<dyn RedisSystem>,
    address: HostAndPort,
    contents_builder: Rc<ContentsBuilder>,
    options: DispatcherOptions,
    connection_retry: Duration,
    verification_retry: Duration,
    state: ServiceState,
    connection: Option<Box<dyn RedisConnection>>,
    callbacks: CommandCallbacks,
    timer: Timer,
}

impl CallbackOwner for Inner {
    fn callbacks(&mut self) -> &mut CommandCallbacks {
        &mut self.callbacks
    }
}

impl Inner {
    fn arm_reconnect(&self) {
        debug!("Reconnecting in {}", format_duration(self.connection_retry));
        let this = self.this.clone();
        self.timer.arm(self.connection_retry, move || {
            if let Some(inner) = this.upgrade() {
                connect(&inner);
            }
        });
    }

    fn arm_verification(&self) {
        let this = self.this.clone();
        self.timer.arm(self.verification_retry, move || {
            if let Some(inner) = this.upgrade() {
                verify(&inner);
            }
        });
    }

    /// Record `cb` and hand the command to the connection. On synchronous
    /// failure the entry is retracted and the callback handed back.
    fn submit(
        &mut self,
        cb: CommandCb,
        contents: &Contents,
        permanent: bool,
    ) -> Result<(), (DispatcherError, CommandCb)> {
        let id = self.callbacks.pending.insert(cb, permanent);
        let on_reply = reply_callback(self.this.clone(), id);
        let sent = match self.connection.as_mut() {
            Some(connection) => connection
                .command_argv(contents, on_reply)
                .map_err(|e| map_context_error(&e)),
            None => Err(DispatcherError::NotConnected),
        };
        sent.map_err(|error| match self.callbacks.pending.take(id) {
            Some(command) => (error, command.cb),
            None => abort(&format!("command {} vanished during submission", id)),
        })
    }
}

fn connect(inner: &Rc<RefCell<Inner>>) {
    let (system, address, this) = {
        let state = inner.borrow();
        (state.system.clone(), state.address.clone(), state.this.clone())
    };
    debug!("Connecting to redis at {}", address);

    let on_connect = {
        let this = this.clone();
        Box::new(move |result| {
            if let Some(inner) = this.upgrade() {
                on_connected(&inner, result);
            }
        })
    };
    let on_disconnect = Box::new(move |result| {
        if let Some(inner) = this.upgrade() {
            on_disconnected(&inner, result);
        }
    });

    let connection = system.connect(
        &address,
        ConnectionHandlers {
            on_connect,
            on_disconnect,
        },
    );

    let mut state = inner.borrow_mut();
    match connection {
        Ok(connection) => state.connection = Some(connection),
        Err(e) => {
            warn!("Failed to start connecting to {}: {}", address, e);
            state.arm_reconnect();
        }
    }
}

fn on_connected(inner: &Rc<RefCell<Inner>>, result: Result<(), ContextError>) {
    let for_sentinel = {
        let mut state = inner.borrow_mut();
        if let Err(e) = result {
            warn!("Connecting to {} failed: {}", state.address, e);
            state.connection = None;
            state.state = ServiceState::Disconnected;
            state.arm_reconnect();
            return;
        }
        info!("Redis transport to {} is up", state.address);
        state.options.used_for_sentinel
    };

    if for_sentinel {
        set_connected(inner);
    } else {
        inner.borrow_mut().state = ServiceState::Verifying;
        verify(inner);
    }
}

fn on_disconnected(inner: &Rc<RefCell<Inner>>, result: Result<(), ContextError>) {
    {
        let mut state = inner.borrow_mut();
        warn!(
            "Lost connection to redis at {}: {:?}",
            state.address,
            result.err()
        );
        state.connection = None;
        state.state = ServiceState::Disconnected;
        let dropped = state.callbacks.pending.drop_permanent();
        if dropped > 0 {
            debug!("Dropped {} subscriptions of the lost connection", dropped);
        }
        state.arm_reconnect();
    }
    fire_disconnect_cbs(inner);
}

/// Send the capability probe on the live transport
fn verify(inner: &Rc<RefCell<Inner>>) {
    let this = Rc::downgrade(inner);
    let probe: CommandCb = Box::new(move |result, reply| {
        if let Some(inner) = this.upgrade() {
            on_probe_reply(&inner, result, reply);
        }
    });

    let mut state = inner.borrow_mut();
    if state.state != ServiceState::Verifying {
        return;
    }
    debug!("Verifying redis at {}", state.address);
    let contents = state.contents_builder.build(&["COMMAND"]);
    if let Err((error, _)) = state.submit(probe, &contents, false) {
        warn!("Could not send verification probe: {}", error);
        state.arm_verification();
    }
}

fn on_probe_reply(inner: &Rc<RefCell<Inner>>, result: Result<(), DispatcherError>, reply: &Reply) {
    if let Err(error) = result {
        let state = inner.borrow();
        if state.state == ServiceState::Verifying {
            warn!(
                "Verification of redis at {} failed: {}, retrying",
                state.address, error
            );
            state.arm_verification();
        }
        return;
    }

    let missing = missing_module_commands(&parse_command_list_reply(reply));
    if !missing.is_empty() {
        abort(&missing_commands_message(&missing));
    }
    set_connected(inner);
}

fn set_connected(inner: &Rc<RefCell<Inner>>) {
    {
        let mut state = inner.borrow_mut();
        info!("Connected to redis at {}", state.address);
        state.state = ServiceState::Connected;
    }
    fire_connect_acks(inner);
}

/// Dispatcher bound to one Redis server
pub struct RedisCommandDispatcher {
    inner: Rc<RefCell<Inner>>,
}

impl RedisCommandDispatcher {
    pub fn new(
        engine: Rc<dyn Engine>,
        system: Rc<dyn RedisSystem>,
        address: HostAndPort,
        contents_builder: Rc<ContentsBuilder>,
        options: DispatcherOptions,
        connection_retry: Duration,
        verification_retry: Duration,
    ) -> Self {
        let inner = Rc::new_cyclic(|this| {
            RefCell::new(Inner {
                this: this.clone(),
                timer: Timer::new(engine.clone()),
                engine,
                system,
                address,
                contents_builder,
                options,
                connection_retry,
                verification_retry,
                state: ServiceState::Disconnected,
                connection: None,
                callbacks: CommandCallbacks::new(),
            })
        });
        connect(&inner);
        Self { inner }
    }

    pub fn service_state(&self) -> ServiceState {
        self.inner.borrow().state
    }

    pub fn pending_count(&self) -> usize {
        self.inner.borrow().callbacks.pending.len()
    }
}

impl AsyncCommandDispatcher for RedisCommandDispatcher {
    fn wait_connected_async(&self, ack: ConnectAck) {
        let mut state = self.inner.borrow_mut();
        if state.state == ServiceState::Connected {
            state.engine.post_callback(ack);
        } else {
            state.callbacks.connect_acks.push(ack);
        }
    }

    fn register_disconnect_cb(&self, cb: DisconnectCb) {
        self.inner.borrow_mut().callbacks.disconnect_cbs.push(cb);
    }

    fn dispatch_async(&self, cb: CommandCb, _ns: &str, contents: Contents) {
        let mut state = self.inner.borrow_mut();
        if state.state != ServiceState::Connected {
            post_command_result(
                &state.engine,
                &state.callbacks.enabled,
                cb,
                DispatcherError::NotConnected,
            );
            return;
        }
        let permanent = state.options.use_permanent_command_callbacks;
        if let Err((error, cb)) = state.submit(cb, &contents, permanent) {
            post_command_result(&state.engine, &state.callbacks.enabled, cb, error);
        }
    }

    fn disable_command_callbacks(&self) {
        self.inner.borrow_mut().callbacks.disable();
    }
}

impl Drop for RedisCommandDispatcher {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.try_borrow_mut() {
            state.callbacks.disable();
            state.timer.disarm();
            state.connection = None;
        }
    }
}
