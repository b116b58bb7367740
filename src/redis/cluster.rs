//! Dispatcher for an SDL namespace stored in a Redis Cluster
//!
//! The capability probe goes out as soon as the cluster connection exists;
//! the cluster client holds it until the slot map is known. A failed probe
//! or a cluster-wide loss tears the connection down and starts over after
//! the retry interval. Losing a single node only detaches it.

use super::contents::{Contents, ContentsBuilder};
use super::dispatcher::{
    AsyncCommandDispatcher, CommandCb, ConnectAck, DisconnectCb, DispatcherOptions, ServiceState,
};
use super::general::{
    format_to_cluster_syntax, map_context_error, missing_commands_message,
    missing_module_commands, parse_command_list_reply,
};
use super::pending::{
    fire_connect_acks, fire_disconnect_cbs, post_command_result, reply_callback, CallbackOwner,
    CommandCallbacks,
};
use super::reply::Reply;
use super::system::{ClusterConnection, ClusterHandlers, ClusterSystem, ContextError};
use crate::core::{Engine, HostAndPort, Timer};
use crate::error::DispatcherError;
use crate::utils::{abort, format_duration};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Verification routing key when the dispatcher serves several namespaces
const MULTI_NAMESPACE_VERIFICATION_KEY: &str = "namespace";

struct Inner {
    this: Weak<RefCell<Inner>>,
    engine: Rc<dyn Engine>,
    system: Rc<dyn ClusterSystem>,
    addresses: Vec<HostAndPort>,
    namespace: String,
    contents_builder: Rc<ContentsBuilder>,
    options: DispatcherOptions,
    retry: Duration,
    state: ServiceState,
    connection: Option<Box<dyn ClusterConnection>>,
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
        debug!("Reconnecting in {}", format_duration(self.retry));
        let this = self.this.clone();
        self.timer.arm(self.retry, move || {
            if let Some(inner) = this.upgrade() {
                connect(&inner);
            }
        });
    }

    /// Release the cluster connection and schedule a fresh one
    fn restart(&mut self) {
        self.connection = None;
        self.state = ServiceState::Disconnected;
        self.arm_reconnect();
    }

    fn submit(
        &mut self,
        cb: CommandCb,
        routing_key: &str,
        contents: &Contents,
        permanent: bool,
    ) -> Result<(), (DispatcherError, CommandCb)> {
        let id = self.callbacks.pending.insert(cb, permanent);
        let on_reply = reply_callback(self.this.clone(), id);
        let sent = match self.connection.as_mut() {
            Some(connection) => connection
                .command_argv(routing_key, contents, on_reply)
                .map_err(|e| map_context_error(&e)),
            None => Err(DispatcherError::NotConnected),
        };
        sent.map_err(|error| match self.callbacks.pending.take(id) {
            Some(command) => (error, command.cb),
            None => abort(&format!("command {} vanished during submission", id)),
        })
    }
}

fn handlers(this: &Weak<RefCell<Inner>>) -> ClusterHandlers {
    let on_node_disconnect = {
        let this = this.clone();
        Box::new(move |address: &HostAndPort, result: Result<(), ContextError>| {
            if let Some(inner) = this.upgrade() {
                on_node_disconnected(&inner, address, result);
            }
        })
    };
    let on_cluster_lost = {
        let this = this.clone();
        Box::new(move |error: ContextError| {
            if let Some(inner) = this.upgrade() {
                on_cluster_lost(&inner, error);
            }
        })
    };
    ClusterHandlers {
        on_node_connect: Box::new(|address, result| match result {
            Ok(()) => debug!("Cluster node {} is up", address),
            Err(e) => debug!("Cluster node {} did not come up: {}", address, e),
        }),
        on_node_disconnect,
        on_cluster_lost,
    }
}

fn connect(inner: &Rc<RefCell<Inner>>) {
    let (system, addresses, this) = {
        let state = inner.borrow();
        (state.system.clone(), state.addresses.clone(), state.this.clone())
    };
    info!("Connecting to redis cluster {}", format_to_cluster_syntax(&addresses));
    let connection = system.connect(&addresses, handlers(&this));

    let probe: CommandCb = Box::new(move |result, reply| {
        if let Some(inner) = this.upgrade() {
            on_probe_reply(&inner, result, reply);
        }
    });

    let mut state = inner.borrow_mut();
    match connection {
        Ok(connection) => state.connection = Some(connection),
        Err(e) => {
            warn!("Failed to start cluster connection: {}", e);
            state.arm_reconnect();
            return;
        }
    }

    state.state = ServiceState::Verifying;
    let contents = state.contents_builder.build(&["COMMAND"]);
    let routing_key = if state.namespace.is_empty() {
        MULTI_NAMESPACE_VERIFICATION_KEY.to_string()
    } else {
        state.namespace.clone()
    };
    if let Err((error, _)) = state.submit(probe, &routing_key, &contents, false) {
        warn!("Could not send cluster verification probe: {}", error);
        state.restart();
    }
}

fn on_probe_reply(inner: &Rc<RefCell<Inner>>, result: Result<(), DispatcherError>, reply: &Reply) {
    if let Err(error) = result {
        let mut state = inner.borrow_mut();
        if state.state == ServiceState::Verifying {
            warn!("Redis cluster verification failed: {}, reconnecting", error);
            state.restart();
        }
        return;
    }

    let missing = missing_module_commands(&parse_command_list_reply(reply));
    if !missing.is_empty() {
        abort(&missing_commands_message(&missing));
    }
    {
        let mut state = inner.borrow_mut();
        info!(
            "Connected to redis cluster {}",
            format_to_cluster_syntax(&state.addresses)
        );
        state.state = ServiceState::Connected;
    }
    fire_connect_acks(inner);
}

fn on_node_disconnected(
    inner: &Rc<RefCell<Inner>>,
    address: &HostAndPort,
    result: Result<(), ContextError>,
) {
    let was_connected = {
        let mut state = inner.borrow_mut();
        warn!("Lost cluster node {}: {:?}", address, result.err());
        if let Some(connection) = state.connection.as_mut() {
            connection.detach_node(address);
        }
        state.state == ServiceState::Connected
    };
    if was_connected {
        fire_disconnect_cbs(inner);
    }
}

fn on_cluster_lost(inner: &Rc<RefCell<Inner>>, error: ContextError) {
    let mut state = inner.borrow_mut();
    warn!("Redis cluster connection lost: {}", error);
    state.restart();
}

/// Dispatcher routing each command by namespace over a Redis Cluster
pub struct ClusterCommandDispatcher {
    inner: Rc<RefCell<Inner>>,
}

impl ClusterCommandDispatcher {
    pub fn new(
        engine: Rc<dyn Engine>,
        system: Rc<dyn ClusterSystem>,
        addresses: Vec<HostAndPort>,
        namespace: String,
        contents_builder: Rc<ContentsBuilder>,
        options: DispatcherOptions,
        retry: Duration,
    ) -> Self {
        let inner = Rc::new_cyclic(|this| {
            RefCell::new(Inner {
                this: this.clone(),
                timer: Timer::new(engine.clone()),
                engine,
                system,
                addresses,
                namespace,
                contents_builder,
                options,
                retry,
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

impl AsyncCommandDispatcher for ClusterCommandDispatcher {
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

    fn dispatch_async(&self, cb: CommandCb, ns: &str, contents: Contents) {
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
        if let Err((error, cb)) = state.submit(cb, ns, &contents, permanent) {
            post_command_result(&state.engine, &state.callbacks.enabled, cb, error);
        }
    }

    fn disable_command_callbacks(&self) {
        self.inner.borrow_mut().callbacks.disable();
    }
}

impl Drop for ClusterCommandDispatcher {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.try_borrow_mut() {
            state.callbacks.disable();
            state.timer.disarm();
            state.connection = None;
        }
    }
}
