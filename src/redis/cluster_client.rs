//! Slot-routing Redis Cluster client
//!
//! Keeps one link per master, learns slot ownership with `CLUSTER NODES` from
//! the first seed that connects, and follows MOVED/ASK redirects. Commands
//! issued before the slot map is known wait in a queue.

use super::contents::Contents;
use super::redirect::{asking_contents, RedirectError, RedirectParser, RedirectType, RedirectionContext};
use super::resp::RespValue;
use super::slots::{SlotMap, SlotRange};
use super::system::{
    ClusterConnection, ClusterHandlers, ClusterSystem, ConnectionHandlers, ContextError,
    RedisConnection, RedisSystem, ReplyCallback,
};
use crate::core::HostAndPort;
use crate::utils::hash_slot;
use fnv::FnvHashMap;
use rand::seq::IteratorRandom;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_REDIRECTS: u8 = 5;

/// Opens [`ClusterClient`]s whose node links come from a [`RedisSystem`]
pub struct RedisClusterSystem {
    nodes: Rc<dyn RedisSystem>,
    max_redirects: u8,
}

impl RedisClusterSystem {
    pub fn new(nodes: Rc<dyn RedisSystem>, max_redirects: u8) -> Self {
        Self {
            nodes,
            max_redirects,
        }
    }
}

impl ClusterSystem for RedisClusterSystem {
    fn connect(
        &self,
        seeds: &[HostAndPort],
        handlers: ClusterHandlers,
    ) -> Result<Box<dyn ClusterConnection>, ContextError> {
        if seeds.is_empty() {
            return Err(ContextError::ClusterNotConnected);
        }

        let inner = Rc::new_cyclic(|this| {
            RefCell::new(ClusterInner {
                this: this.clone(),
                system: self.nodes.clone(),
                max_redirects: self.max_redirects,
                handlers: Rc::new(RefCell::new(handlers)),
                nodes: FnvHashMap::default(),
                slots: SlotMap::new(),
                slots_loaded: false,
                loading: false,
                waiting: Vec::new(),
                closed: false,
            })
        });

        let mut last_error = None;
        {
            let mut state = inner.borrow_mut();
            for seed in seeds {
                if let Err(e) = state.open_link(seed) {
                    warn!("Failed to open cluster link to {}: {}", seed, e);
                    last_error = Some(e);
                }
            }
            if state.nodes.is_empty() {
                return Err(last_error.unwrap_or(ContextError::ClusterNotConnected));
            }
        }

        Ok(Box::new(ClusterClient { inner }))
    }
}

struct NodeLink {
    connection: Box<dyn RedisConnection>,
    connected: bool,
}

struct QueuedCommand {
    routing_key: String,
    contents: Contents,
    callback: ReplyCallback,
}

type CallbackHolder = Rc<RefCell<Option<ReplyCallback>>>;

struct ClusterInner {
    this: Weak<RefCell<ClusterInner>>,
    system: Rc<dyn RedisSystem>,
    max_redirects: u8,
    handlers: Rc<RefCell<ClusterHandlers>>,
    nodes: FnvHashMap<HostAndPort, NodeLink>,
    slots: SlotMap,
    slots_loaded: bool,
    loading: bool,
    waiting: Vec<QueuedCommand>,
    closed: bool,
}

impl ClusterInner {
    fn open_link(&mut self, address: &HostAndPort) -> Result<(), ContextError> {
        let on_connect = {
            let this = self.this.clone();
            let address = address.clone();
            Box::new(move |result| node_connected(&this, address, result))
        };
        let on_disconnect = {
            let this = self.this.clone();
            let address = address.clone();
            Box::new(move |result| node_disconnected(&this, address, result))
        };
        let connection = self.system.connect(
            address,
            ConnectionHandlers {
                on_connect,
                on_disconnect,
            },
        )?;
        debug!("Opened cluster link to {}", address);
        self.nodes.insert(
            address.clone(),
            NodeLink {
                connection,
                connected: false,
            },
        );
        Ok(())
    }

    fn forget_node(&mut self, address: &HostAndPort) {
        if self.nodes.remove(address).is_some() {
            debug!("Forgetting cluster node {}", address);
        }
        self.slots.remove_node(address);
        if !self.slots.is_complete() {
            self.slots_loaded = false;
        }
    }

    fn random_node(&self) -> Option<HostAndPort> {
        let mut rng = rand::thread_rng();
        self.nodes
            .iter()
            .filter(|(_, link)| link.connected)
            .map(|(address, _)| address.clone())
            .choose(&mut rng)
            .or_else(|| self.nodes.keys().cloned().choose(&mut rng))
    }

    fn route(&self, routing_key: &str) -> Option<HostAndPort> {
        if routing_key.is_empty() {
            return self.random_node();
        }
        self.slots
            .node_for_slot(hash_slot(routing_key.as_bytes()))
            .cloned()
    }

    fn send_to(
        &mut self,
        target: &HostAndPort,
        contents: &Contents,
        callback: ReplyCallback,
    ) -> Result<(), ContextError> {
        if !self.nodes.contains_key(target) {
            self.open_link(target)?;
        }
        let link = self
            .nodes
            .get_mut(target)
            .ok_or(ContextError::ClusterNotConnected)?;
        link.connection.command_argv(contents, callback)
    }

    /// Route and send; on failure hands the callback back if it was not consumed
    fn send_routed(
        &mut self,
        routing_key: &str,
        contents: &Contents,
        callback: ReplyCallback,
    ) -> Result<(), (ContextError, Option<ReplyCallback>)> {
        let Some(target) = self.route(routing_key) else {
            return Err((ContextError::ClusterNotConnected, Some(callback)));
        };
        let holder: CallbackHolder = Rc::new(RefCell::new(Some(callback)));
        let wrapper = self.redirecting_callback(
            holder.clone(),
            contents.clone(),
            RedirectionContext::new(self.max_redirects),
        );
        self.send_to(&target, contents, wrapper)
            .map_err(|e| (e, holder.borrow_mut().take()))
    }

    fn redirecting_callback(
        &self,
        holder: CallbackHolder,
        contents: Contents,
        context: RedirectionContext,
    ) -> ReplyCallback {
        let this = self.this.clone();
        let mut request = Some((contents, context));
        Box::new(move |result| {
            let Some(mut callback) = holder.borrow_mut().take() else {
                return;
            };
            let Some((contents, context)) = request.take() else {
                return;
            };
            match result {
                Ok(RespValue::Error(text)) => {
                    if let Some(redirect) = RedirectParser::parse_redirect_bytes(&text) {
                        if let Some(inner) = this.upgrade() {
                            follow_redirect(
                                &inner,
                                redirect,
                                contents,
                                context,
                                callback,
                                RespValue::Error(text),
                            );
                            return;
                        }
                    }
                    callback(Ok(RespValue::Error(text)))
                }
                Ok(value) => callback(Ok(value)),
                Err(e) => {
                    debug!("Cluster command failed: {}", e);
                    callback(Err(ContextError::ClusterConnectionLost))
                }
            }
        })
    }
}

fn redirect_target(
    redirect: &RedirectType,
    context: &mut RedirectionContext,
) -> Result<HostAndPort, RedirectError> {
    let target = redirect.target()?;
    context.add_redirect(&target)?;
    Ok(target)
}

fn follow_redirect(
    inner: &Rc<RefCell<ClusterInner>>,
    redirect: RedirectType,
    contents: Contents,
    mut context: RedirectionContext,
    callback: ReplyCallback,
    original: RespValue,
) {
    let failure = {
        let mut state = inner.borrow_mut();
        if state.closed {
            return;
        }
        match redirect_target(&redirect, &mut context) {
            Err(e) => {
                warn!("Not following cluster redirect: {}", e);
                Some((callback, Ok(original)))
            }
            Ok(target) => {
                debug!("Following {:?}", redirect);
                if let RedirectType::Moved { slot, .. } = &redirect {
                    state
                        .slots
                        .assign_slots(target.clone(), SlotRange::new(*slot, *slot));
                }
                let holder: CallbackHolder = Rc::new(RefCell::new(Some(callback)));
                let wrapper = state.redirecting_callback(holder.clone(), contents.clone(), context);
                let asked = if redirect.requires_asking() {
                    state.send_to(&target, &asking_contents(), Box::new(|_| {}))
                } else {
                    Ok(())
                };
                let sent = match asked {
                    Ok(()) => state.send_to(&target, &contents, wrapper),
                    Err(e) => Err(e),
                };
                match sent {
                    Ok(()) => None,
                    Err(e) => holder.borrow_mut().take().map(|cb| (cb, Err(e))),
                }
            }
        }
    };
    if let Some((mut callback, result)) = failure {
        callback(result);
    }
}

fn node_connected(
    this: &Weak<RefCell<ClusterInner>>,
    address: HostAndPort,
    result: Result<(), ContextError>,
) {
    let Some(inner) = this.upgrade() else {
        return;
    };
    let handlers = {
        let mut state = inner.borrow_mut();
        if state.closed {
            return;
        }
        match &result {
            Ok(()) => {
                if let Some(link) = state.nodes.get_mut(&address) {
                    link.connected = true;
                }
                info!("Connected to cluster node {}", address);
            }
            Err(e) => {
                warn!("Cluster node {} failed to connect: {}", address, e);
                state.forget_node(&address);
            }
        }
        state.handlers.clone()
    };

    let failed = result.is_err();
    (handlers.borrow_mut().on_node_connect)(&address, result);
    if failed {
        check_cluster_lost(&inner);
    } else {
        load_slots_if_needed(&inner);
    }
}

fn node_disconnected(
    this: &Weak<RefCell<ClusterInner>>,
    address: HostAndPort,
    result: Result<(), ContextError>,
) {
    let Some(inner) = this.upgrade() else {
        return;
    };
    let handlers = {
        let mut state = inner.borrow_mut();
        if state.closed {
            return;
        }
        warn!("Lost cluster node {}", address);
        state.forget_node(&address);
        state.handlers.clone()
    };

    (handlers.borrow_mut().on_node_disconnect)(&address, result);
    check_cluster_lost(&inner);
    load_slots_if_needed(&inner);
}

fn check_cluster_lost(inner: &Rc<RefCell<ClusterInner>>) {
    let (on_lost, waiting) = {
        let mut state = inner.borrow_mut();
        if state.closed || !state.nodes.is_empty() {
            return;
        }
        state.closed = true;
        let on_lost = std::mem::replace(
            &mut state.handlers.borrow_mut().on_cluster_lost,
            Box::new(|_| {}),
        );
        (on_lost, std::mem::take(&mut state.waiting))
    };

    warn!("No cluster node left");
    for mut command in waiting {
        (command.callback)(Err(ContextError::ClusterConnectionLost));
    }
    on_lost(ContextError::ClusterConnectionLost);
}

fn load_slots_if_needed(inner: &Rc<RefCell<ClusterInner>>) {
    let mut state = inner.borrow_mut();
    if state.closed || state.slots_loaded || state.loading {
        return;
    }
    let Some(address) = state
        .nodes
        .iter()
        .find(|(_, link)| link.connected)
        .map(|(address, _)| address.clone())
    else {
        return;
    };

    let this = state.this.clone();
    let callback: ReplyCallback = Box::new(move |result| on_cluster_nodes(&this, result));
    let mut contents = Contents::new();
    contents.push("CLUSTER");
    contents.push("NODES");

    state.loading = true;
    let sent = match state.nodes.get_mut(&address) {
        Some(link) => link.connection.command_argv(&contents, callback),
        None => Err(ContextError::ClusterNotConnected),
    };
    match sent {
        Ok(()) => debug!("Requested slot map from {}", address),
        Err(e) => {
            warn!("Failed to request slot map from {}: {}", address, e);
            state.loading = false;
        }
    }
}

fn on_cluster_nodes(this: &Weak<RefCell<ClusterInner>>, result: Result<RespValue, ContextError>) {
    let Some(inner) = this.upgrade() else {
        return;
    };
    let (waiting, failure) = {
        let mut state = inner.borrow_mut();
        if state.closed {
            return;
        }
        state.loading = false;

        let parsed = match result {
            Ok(RespValue::BulkString(Some(text))) => state
                .slots
                .update_from_cluster_nodes(&String::from_utf8_lossy(&text))
                .map_err(|e| ContextError::Protocol(e.to_string())),
            Ok(other) => Err(ContextError::Protocol(format!(
                "unexpected CLUSTER NODES reply: {:?}",
                other
            ))),
            Err(e) => Err(e),
        };

        let failure = match parsed {
            Ok(()) if state.slots.is_empty() => Some(ContextError::ClusterNotConnected),
            Ok(()) => {
                state.slots_loaded = true;
                info!(
                    "Loaded cluster slot map with {} masters",
                    state.slots.active_nodes().len()
                );
                None
            }
            Err(e) => {
                warn!("Failed to load cluster slot map: {}", e);
                Some(e)
            }
        };
        (std::mem::take(&mut state.waiting), failure)
    };

    let mut failed = Vec::new();
    {
        let mut state = inner.borrow_mut();
        for command in waiting {
            match &failure {
                Some(error) => failed.push((command.callback, error.clone())),
                None => {
                    if let Err((error, Some(callback))) =
                        state.send_routed(&command.routing_key, &command.contents, command.callback)
                    {
                        failed.push((callback, error));
                    }
                }
            }
        }
    }
    for (mut callback, error) in failed {
        callback(Err(error));
    }
}

/// Connection to a Redis Cluster
pub struct ClusterClient {
    inner: Rc<RefCell<ClusterInner>>,
}

impl ClusterConnection for ClusterClient {
    fn command_argv(
        &mut self,
        routing_key: &str,
        contents: &Contents,
        on_reply: ReplyCallback,
    ) -> Result<(), ContextError> {
        let mut state = self.inner.borrow_mut();
        if state.closed {
            return Err(ContextError::ClusterNotConnected);
        }
        if !state.slots_loaded {
            if state.nodes.is_empty() {
                return Err(ContextError::ClusterNotConnected);
            }
            state.waiting.push(QueuedCommand {
                routing_key: routing_key.to_string(),
                contents: contents.clone(),
                callback: on_reply,
            });
            drop(state);
            load_slots_if_needed(&self.inner);
            return Ok(());
        }
        state
            .send_routed(routing_key, contents, on_reply)
            .map_err(|(error, _)| error)
    }

    fn detach_node(&mut self, address: &HostAndPort) {
        self.inner.borrow_mut().forget_node(address);
    }
}

impl Drop for ClusterClient {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.try_borrow_mut() {
            state.closed = true;
            state.waiting.clear();
            state.nodes.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::slots::CLUSTER_NODES_SAMPLE;
    use crate::testing::{bulk, error_reply, status, MockRedisSystem};

    type Events = Rc<RefCell<Vec<String>>>;

    fn node(port: u16) -> HostAndPort {
        HostAndPort::new("127.0.0.1", port)
    }

    fn recording(events: &Events) -> ReplyCallback {
        let events = events.clone();
        Box::new(move |result| {
            events.borrow_mut().push(match result {
                Ok(RespValue::SimpleString(s)) => String::from_utf8_lossy(&s).into_owned(),
                Ok(RespValue::Error(s)) => format!("-{}", String::from_utf8_lossy(&s)),
                Ok(other) => format!("{:?}", other),
                Err(e) => format!("error:{:?}", e),
            })
        })
    }

    fn handlers(events: &Events) -> ClusterHandlers {
        let connects = events.clone();
        let disconnects = events.clone();
        let lost = events.clone();
        ClusterHandlers {
            on_node_connect: Box::new(move |a, r| {
                connects.borrow_mut().push(format!("connect {} {}", a, r.is_ok()))
            }),
            on_node_disconnect: Box::new(move |a, _| {
                disconnects.borrow_mut().push(format!("disconnect {}", a))
            }),
            on_cluster_lost: Box::new(move |e| lost.borrow_mut().push(format!("lost {:?}", e))),
        }
    }

    fn get(key: &str) -> Contents {
        let mut contents = Contents::new();
        contents.push("GET");
        contents.push(key.to_string());
        contents
    }

    /// Client over the three sample masters with the slot map loaded
    fn loaded_client(
        system: &Rc<MockRedisSystem>,
        events: &Events,
        max_redirects: u8,
    ) -> Box<dyn ClusterConnection> {
        let cluster = RedisClusterSystem::new(system.clone(), max_redirects);
        let client = cluster
            .connect(&[node(30001), node(30002), node(30003)], handlers(events))
            .unwrap();
        for i in 0..3 {
            system.link(i).connect_ok();
        }
        let loader = (0..3)
            .map(|i| system.link(i))
            .find(|l| l.pending_count() == 1)
            .unwrap();
        assert_eq!(loader.sent(), vec![vec!["CLUSTER", "NODES"]]);
        loader.reply(bulk(CLUSTER_NODES_SAMPLE));
        client
    }

    #[test]
    fn test_commands_wait_for_slot_map() {
        let system = MockRedisSystem::new();
        let events: Events = Rc::default();
        let cluster = RedisClusterSystem::new(system.clone(), DEFAULT_MAX_REDIRECTS);
        let mut client = cluster
            .connect(&[node(30001), node(30002), node(30003)], handlers(&events))
            .unwrap();
        assert_eq!(system.link_count(), 3);

        client.command_argv("ns", &get("{ns},k"), recording(&events)).unwrap();
        assert!(system.link(0).sent().is_empty());

        system.link(0).connect_ok();
        assert_eq!(system.link(0).sent(), vec![vec!["CLUSTER", "NODES"]]);
        system.link(0).reply(bulk(CLUSTER_NODES_SAMPLE));

        // slot of "ns" is owned by 30002
        assert_eq!(system.link(1).sent(), vec![vec!["GET", "{ns},k"]]);
        system.link(1).reply(status("v"));
        assert_eq!(*events.borrow(), vec!["connect 127.0.0.1:30001 true", "v"]);
    }

    #[test]
    fn test_routes_by_hash_slot() {
        let system = MockRedisSystem::new();
        let events: Events = Rc::default();
        let mut client = loaded_client(&system, &events, DEFAULT_MAX_REDIRECTS);

        client.command_argv("b", &get("b"), recording(&events)).unwrap();
        client.command_argv("foo", &get("foo"), recording(&events)).unwrap();
        assert_eq!(system.links_to(&node(30001))[0].sent().last().unwrap(), &vec!["GET", "b"]);
        assert_eq!(system.links_to(&node(30003))[0].sent().last().unwrap(), &vec!["GET", "foo"]);
    }

    #[test]
    fn test_moved_updates_slot_map_and_resends() {
        let system = MockRedisSystem::new();
        let events: Events = Rc::default();
        let mut client = loaded_client(&system, &events, DEFAULT_MAX_REDIRECTS);

        client.command_argv("b", &get("b"), recording(&events)).unwrap();
        let first = system.links_to(&node(30001))[0].clone();
        first.reply(error_reply("MOVED 3300 127.0.0.1:30003"));

        let target = system.links_to(&node(30003))[0].clone();
        assert_eq!(target.sent().last().unwrap(), &vec!["GET", "b"]);
        target.reply(status("moved-ok"));
        assert_eq!(events.borrow().last().unwrap(), "moved-ok");

        // Later commands for the slot go straight to the new owner
        client.command_argv("b", &get("b"), recording(&events)).unwrap();
        assert_eq!(target.pending_count(), 1);
    }

    #[test]
    fn test_ask_sends_asking_first() {
        let system = MockRedisSystem::new();
        let events: Events = Rc::default();
        let mut client = loaded_client(&system, &events, DEFAULT_MAX_REDIRECTS);

        client.command_argv("b", &get("b"), recording(&events)).unwrap();
        system.links_to(&node(30001))[0].reply(error_reply("ASK 3300 127.0.0.1:30004"));

        // 30004 is not a known master, so a link is opened for it
        let target = system.links_to(&node(30004))[0].clone();
        assert_eq!(target.sent(), vec![vec!["ASKING"], vec!["GET", "b"]]);
        target.reply(status("OK"));
        target.reply(status("asked"));
        assert_eq!(events.borrow().last().unwrap(), "asked");

        // ASK does not change ownership
        client.command_argv("b", &get("b"), recording(&events)).unwrap();
        assert_eq!(system.links_to(&node(30001))[0].pending_count(), 1);
    }

    #[test]
    fn test_redirect_limit_returns_error_reply() {
        let system = MockRedisSystem::new();
        let events: Events = Rc::default();
        let mut client = loaded_client(&system, &events, 1);

        client.command_argv("b", &get("b"), recording(&events)).unwrap();
        system.links_to(&node(30001))[0].reply(error_reply("MOVED 3300 127.0.0.1:30002"));
        system.links_to(&node(30002))[0].reply(error_reply("MOVED 3300 127.0.0.1:30003"));
        assert_eq!(
            events.borrow().last().unwrap(),
            "-MOVED 3300 127.0.0.1:30003"
        );
    }

    #[test]
    fn test_link_failure_reports_connection_lost() {
        let system = MockRedisSystem::new();
        let events: Events = Rc::default();
        let mut client = loaded_client(&system, &events, DEFAULT_MAX_REDIRECTS);

        client.command_argv("foo", &get("foo"), recording(&events)).unwrap();
        system.links_to(&node(30003))[0].disconnect(ContextError::Eof);
        let recorded = events.borrow().clone();
        assert!(recorded.contains(&"error:ClusterConnectionLost".to_string()));
        assert!(recorded.contains(&"disconnect 127.0.0.1:30003".to_string()));

        // The lost master's slots are no longer routable until reloaded
        assert_eq!(
            client.command_argv("foo", &get("foo"), recording(&events)),
            Ok(())
        );
        let reloader = system
            .links_to(&node(30001))
            .into_iter()
            .chain(system.links_to(&node(30002)))
            .find(|l| l.sent().last().map_or(false, |c| c[0] == "CLUSTER"))
            .unwrap();
        reloader.reply(error_reply("ERR cluster support disabled"));
        assert!(events.borrow().last().unwrap().starts_with("error:Protocol"));
    }

    #[test]
    fn test_command_queued_on_node_that_fails_to_connect() {
        let system = MockRedisSystem::new();
        let events: Events = Rc::default();
        let cluster = RedisClusterSystem::new(system.clone(), DEFAULT_MAX_REDIRECTS);
        let mut client = cluster
            .connect(&[node(30001), node(30002), node(30003)], handlers(&events))
            .unwrap();
        system.link(0).connect_ok();
        system.link(0).reply(bulk(CLUSTER_NODES_SAMPLE));

        // 30002 owns "ns" but is still connecting
        client.command_argv("ns", &get("{ns},k"), recording(&events)).unwrap();
        assert_eq!(system.link(1).pending_count(), 1);

        system.link(1).connect_err(ContextError::Eof);
        assert_eq!(
            *events.borrow(),
            vec![
                "connect 127.0.0.1:30001 true",
                "error:ClusterConnectionLost",
                "connect 127.0.0.1:30002 false",
            ]
        );
        assert!(system.link(1).is_dropped());

        // The slot map lost a master, so the next command reloads it first
        client.command_argv("ns", &get("{ns},k"), recording(&events)).unwrap();
        assert_eq!(
            system.link(0).sent(),
            vec![vec!["CLUSTER", "NODES"], vec!["CLUSTER", "NODES"]]
        );
    }

    #[test]
    fn test_redirect_to_node_that_fails_to_connect() {
        let system = MockRedisSystem::new();
        let events: Events = Rc::default();
        let mut client = loaded_client(&system, &events, DEFAULT_MAX_REDIRECTS);

        client.command_argv("b", &get("b"), recording(&events)).unwrap();
        system.links_to(&node(30001))[0].reply(error_reply("MOVED 3300 127.0.0.1:30004"));
        let target = system.links_to(&node(30004))[0].clone();
        assert_eq!(target.pending_count(), 1);

        target.connect_err(ContextError::Eof);
        let recorded = events.borrow().clone();
        assert_eq!(
            recorded[recorded.len() - 2..].to_vec(),
            vec!["error:ClusterConnectionLost", "connect 127.0.0.1:30004 false"]
        );
        assert!(system.links_to(&node(30004)).is_empty());
    }

    #[test]
    fn test_losing_every_node_reports_cluster_lost() {
        let system = MockRedisSystem::new();
        let events: Events = Rc::default();
        let cluster = RedisClusterSystem::new(system.clone(), DEFAULT_MAX_REDIRECTS);
        let mut client = cluster
            .connect(&[node(1), node(2)], handlers(&events))
            .unwrap();

        client.command_argv("ns", &get("x"), recording(&events)).unwrap();
        system.link(0).connect_err(ContextError::Eof);
        system.link(1).connect_err(ContextError::Eof);

        assert_eq!(
            *events.borrow(),
            vec![
                "connect 127.0.0.1:1 false",
                "connect 127.0.0.1:2 false",
                "error:ClusterConnectionLost",
                "lost ClusterConnectionLost",
            ]
        );
        assert_eq!(
            client.command_argv("ns", &get("x"), recording(&events)),
            Err(ContextError::ClusterNotConnected)
        );
    }

    #[test]
    fn test_unroutable_and_empty_key() {
        let system = MockRedisSystem::new();
        let events: Events = Rc::default();
        let cluster = RedisClusterSystem::new(system.clone(), DEFAULT_MAX_REDIRECTS);
        let mut client = cluster.connect(&[node(30001)], handlers(&events)).unwrap();
        system.link(0).connect_ok();
        system
            .link(0)
            .reply(bulk("id 127.0.0.1:30001@31001 myself,master - 0 0 1 connected 0-100\n"));

        assert_eq!(
            client.command_argv("b", &get("b"), recording(&events)),
            Err(ContextError::ClusterNotConnected)
        );
        client.command_argv("", &get("any"), recording(&events)).unwrap();
        assert_eq!(system.link(0).sent().last().unwrap(), &vec!["GET", "any"]);
    }

    #[test]
    fn test_synchronous_connect_failure() {
        let system = MockRedisSystem::new();
        system.fail_next_connect(ContextError::OutOfMemory);
        let events: Events = Rc::default();
        let cluster = RedisClusterSystem::new(system.clone(), DEFAULT_MAX_REDIRECTS);
        assert_eq!(
            cluster.connect(&[node(1)], handlers(&events)).err(),
            Some(ContextError::OutOfMemory)
        );
        assert_eq!(
            cluster.connect(&[], handlers(&events)).err(),
            Some(ContextError::ClusterNotConnected)
        );
    }

    #[test]
    fn test_drop_closes_links() {
        let system = MockRedisSystem::new();
        let events: Events = Rc::default();
        let client = loaded_client(&system, &events, DEFAULT_MAX_REDIRECTS);
        drop(client);
        assert!((0..3).all(|i| system.link(i).is_dropped()));
    }
}
