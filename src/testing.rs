//! Test doubles: a hand-driven engine and scripted backend adapters

use crate::core::{Callback, Engine, HostAndPort, TaskId, TimerId};
use crate::redis::contents::Contents;
use crate::redis::resp::RespValue;
use crate::redis::system::{
    ClusterConnection, ClusterHandlers, ClusterSystem, ConnectionHandlers, ContextError,
    RedisConnection, RedisSystem, ReplyCallback,
};
use bytes::Bytes;
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct ManualState {
    next_id: u64,
    posted: VecDeque<Callback>,
    timers: BTreeMap<u64, (Duration, Callback)>,
    tasks: BTreeMap<u64, LocalBoxFuture<'static, ()>>,
    disarmed: usize,
}

/// Engine whose callbacks and timers run only when a test says so
#[derive(Default)]
pub struct ManualEngine {
    state: RefCell<ManualState>,
}

impl ManualEngine {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Run posted callbacks, including ones posted meanwhile, until none are left
    pub fn run_posted(&self) -> usize {
        let mut count = 0;
        loop {
            let next = self.state.borrow_mut().posted.pop_front();
            match next {
                Some(callback) => {
                    callback();
                    count += 1;
                }
                None => return count,
            }
        }
    }

    pub fn posted_count(&self) -> usize {
        self.state.borrow().posted.len()
    }

    /// Durations of the currently armed timers, in arming order
    pub fn armed_timers(&self) -> Vec<Duration> {
        self.state.borrow().timers.values().map(|(d, _)| *d).collect()
    }

    /// Expire every currently armed timer
    pub fn fire_timers(&self) -> usize {
        let timers = std::mem::take(&mut self.state.borrow_mut().timers);
        let count = timers.len();
        for (_, (_, callback)) in timers {
            callback();
        }
        count
    }

    pub fn disarm_count(&self) -> usize {
        self.state.borrow().disarmed
    }

    pub fn task_count(&self) -> usize {
        self.state.borrow().tasks.len()
    }
}

impl Engine for ManualEngine {
    fn post_callback(&self, callback: Callback) {
        self.state.borrow_mut().posted.push_back(callback);
    }

    fn arm_timer(&self, duration: Duration, callback: Callback) -> TimerId {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        state.timers.insert(id, (duration, callback));
        TimerId(id)
    }

    fn disarm_timer(&self, id: TimerId) {
        let mut state = self.state.borrow_mut();
        if state.timers.remove(&id.0).is_some() {
            state.disarmed += 1;
        }
    }

    fn spawn_task(&self, task: LocalBoxFuture<'static, ()>) -> TaskId {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        state.tasks.insert(id, task);
        TaskId(id)
    }

    fn abort_task(&self, id: TaskId) {
        self.state.borrow_mut().tasks.remove(&id.0);
    }
}

pub fn argv_strings(contents: &Contents) -> Vec<String> {
    contents
        .argv()
        .iter()
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect()
}

pub fn status(text: &str) -> RespValue {
    RespValue::SimpleString(Bytes::copy_from_slice(text.as_bytes()))
}

pub fn bulk(text: &str) -> RespValue {
    RespValue::BulkString(Some(Bytes::copy_from_slice(text.as_bytes())))
}

pub fn error_reply(text: &str) -> RespValue {
    RespValue::Error(Bytes::copy_from_slice(text.as_bytes()))
}

pub fn array(items: Vec<RespValue>) -> RespValue {
    RespValue::Array(Some(items))
}

/// `COMMAND` reply listing the given command names
pub fn command_list(names: &[&str]) -> RespValue {
    array(
        names
            .iter()
            .map(|name| array(vec![bulk(name), RespValue::Integer(-1)]))
            .collect(),
    )
}

pub fn all_module_commands() -> RespValue {
    let mut names = vec!["get", "set", "ping"];
    names.extend_from_slice(&crate::redis::general::REQUIRED_MODULE_COMMANDS);
    command_list(&names)
}

struct MockLinkState {
    address: HostAndPort,
    on_connect: Option<Box<dyn FnOnce(Result<(), ContextError>)>>,
    on_disconnect: Option<Box<dyn FnOnce(Result<(), ContextError>)>>,
    sent: Vec<Vec<String>>,
    pending: VecDeque<ReplyCallback>,
    subscriber: Option<ReplyCallback>,
    fail_sends: Option<ContextError>,
    dropped: bool,
}

/// Test handle on one link opened through [`MockRedisSystem`]
#[derive(Clone)]
pub struct MockLink {
    state: Rc<RefCell<MockLinkState>>,
}

impl MockLink {
    pub fn address(&self) -> HostAndPort {
        self.state.borrow().address.clone()
    }

    pub fn connect_ok(&self) {
        let handler = self.state.borrow_mut().on_connect.take();
        if let Some(handler) = handler {
            handler(Ok(()));
        }
    }

    /// Fail the connect: commands queued meanwhile fail first, then the
    /// connect handler runs
    pub fn connect_err(&self, error: ContextError) {
        let (pending, handler) = {
            let mut state = self.state.borrow_mut();
            if state.dropped {
                return;
            }
            state.subscriber = None;
            (std::mem::take(&mut state.pending), state.on_connect.take())
        };
        for mut callback in pending {
            callback(Err(error.clone()));
        }
        if let Some(handler) = handler {
            if !self.is_dropped() {
                handler(Err(error));
            }
        }
    }

    /// Lose the link: pending callbacks fail first, then the disconnect handler runs
    pub fn disconnect(&self, error: ContextError) {
        let (pending, handler) = {
            let mut state = self.state.borrow_mut();
            if state.dropped {
                return;
            }
            state.subscriber = None;
            (std::mem::take(&mut state.pending), state.on_disconnect.take())
        };
        for mut callback in pending {
            callback(Err(error.clone()));
        }
        if let Some(handler) = handler {
            if !self.is_dropped() {
                handler(Err(error));
            }
        }
    }

    pub fn sent(&self) -> Vec<Vec<String>> {
        self.state.borrow().sent.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Answer the oldest outstanding command
    pub fn reply(&self, value: RespValue) {
        self.reply_with(Ok(value));
    }

    pub fn reply_with(&self, result: Result<RespValue, ContextError>) {
        let callback = {
            let mut state = self.state.borrow_mut();
            if state.dropped {
                return;
            }
            state.pending.pop_front()
        };
        if let Some(mut callback) = callback {
            callback(result);
        }
    }

    /// Deliver a pushed frame to the subscriber
    pub fn push(&self, value: RespValue) {
        let callback = self.state.borrow_mut().subscriber.take();
        if let Some(mut callback) = callback {
            callback(Ok(value));
            let mut state = self.state.borrow_mut();
            if state.subscriber.is_none() && !state.dropped {
                state.subscriber = Some(callback);
            }
        }
    }

    pub fn has_subscriber(&self) -> bool {
        self.state.borrow().subscriber.is_some()
    }

    pub fn fail_sends(&self, error: ContextError) {
        self.state.borrow_mut().fail_sends = Some(error);
    }

    pub fn is_dropped(&self) -> bool {
        self.state.borrow().dropped
    }
}

struct MockConnection {
    state: Rc<RefCell<MockLinkState>>,
}

impl RedisConnection for MockConnection {
    fn command_argv(
        &mut self,
        contents: &Contents,
        on_reply: ReplyCallback,
    ) -> Result<(), ContextError> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.fail_sends.clone() {
            return Err(error);
        }
        let argv = argv_strings(contents);
        let subscribe = argv
            .first()
            .map_or(false, |cmd| cmd.eq_ignore_ascii_case("subscribe"));
        state.sent.push(argv);
        if subscribe {
            state.subscriber = Some(on_reply);
        } else {
            state.pending.push_back(on_reply);
        }
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.dropped = true;
            state.pending.clear();
            state.subscriber = None;
            state.on_connect = None;
            state.on_disconnect = None;
        }
    }
}

#[derive(Default)]
struct MockSystemState {
    links: Vec<MockLink>,
    fail_connects: VecDeque<ContextError>,
}

/// Scripted single-server adapter
#[derive(Default)]
pub struct MockRedisSystem {
    state: RefCell<MockSystemState>,
}

impl MockRedisSystem {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn link_count(&self) -> usize {
        self.state.borrow().links.len()
    }

    pub fn link(&self, index: usize) -> MockLink {
        self.state.borrow().links[index].clone()
    }

    pub fn last_link(&self) -> MockLink {
        let state = self.state.borrow();
        state.links[state.links.len() - 1].clone()
    }

    /// Live links to `address`, oldest first
    pub fn links_to(&self, address: &HostAndPort) -> Vec<MockLink> {
        self.state
            .borrow()
            .links
            .iter()
            .filter(|l| !l.is_dropped() && &l.address() == address)
            .cloned()
            .collect()
    }

    pub fn fail_next_connect(&self, error: ContextError) {
        self.state.borrow_mut().fail_connects.push_back(error);
    }
}

impl RedisSystem for MockRedisSystem {
    fn connect(
        &self,
        address: &HostAndPort,
        handlers: ConnectionHandlers,
    ) -> Result<Box<dyn RedisConnection>, ContextError> {
        let mut system = self.state.borrow_mut();
        if let Some(error) = system.fail_connects.pop_front() {
            return Err(error);
        }
        let state = Rc::new(RefCell::new(MockLinkState {
            address: address.clone(),
            on_connect: Some(handlers.on_connect),
            on_disconnect: Some(handlers.on_disconnect),
            sent: Vec::new(),
            pending: VecDeque::new(),
            subscriber: None,
            fail_sends: None,
            dropped: false,
        }));
        system.links.push(MockLink {
            state: state.clone(),
        });
        Ok(Box::new(MockConnection { state }))
    }
}

struct MockClusterState {
    seeds: Vec<HostAndPort>,
    handlers: Option<ClusterHandlers>,
    sent: Vec<(String, Vec<String>)>,
    pending: VecDeque<ReplyCallback>,
    detached: Vec<HostAndPort>,
    fail_sends: Option<ContextError>,
    dropped: bool,
}

/// Test handle on one connection opened through [`MockClusterSystem`]
#[derive(Clone)]
pub struct MockCluster {
    state: Rc<RefCell<MockClusterState>>,
}

impl MockCluster {
    pub fn seeds(&self) -> Vec<HostAndPort> {
        self.state.borrow().seeds.clone()
    }

    fn with_handlers<F>(&self, f: F)
    where
        F: FnOnce(&mut ClusterHandlers),
    {
        let handlers = self.state.borrow_mut().handlers.take();
        if let Some(mut handlers) = handlers {
            f(&mut handlers);
            let mut state = self.state.borrow_mut();
            if !state.dropped && state.handlers.is_none() {
                state.handlers = Some(handlers);
            }
        }
    }

    pub fn node_connect(&self, address: &HostAndPort, result: Result<(), ContextError>) {
        self.with_handlers(|h| (h.on_node_connect)(address, result));
    }

    pub fn node_disconnect(&self, address: &HostAndPort, result: Result<(), ContextError>) {
        self.with_handlers(|h| (h.on_node_disconnect)(address, result));
    }

    pub fn cluster_lost(&self, error: ContextError) {
        let handlers = self.state.borrow_mut().handlers.take();
        if let Some(handlers) = handlers {
            (handlers.on_cluster_lost)(error);
        }
    }

    pub fn sent(&self) -> Vec<(String, Vec<String>)> {
        self.state.borrow().sent.clone()
    }

    pub fn reply(&self, value: RespValue) {
        self.reply_with(Ok(value));
    }

    pub fn reply_with(&self, result: Result<RespValue, ContextError>) {
        let callback = {
            let mut state = self.state.borrow_mut();
            if state.dropped {
                return;
            }
            state.pending.pop_front()
        };
        if let Some(mut callback) = callback {
            callback(result);
        }
    }

    pub fn detached(&self) -> Vec<HostAndPort> {
        self.state.borrow().detached.clone()
    }

    pub fn fail_sends(&self, error: ContextError) {
        self.state.borrow_mut().fail_sends = Some(error);
    }

    pub fn is_dropped(&self) -> bool {
        self.state.borrow().dropped
    }
}

struct MockClusterConnection {
    state: Rc<RefCell<MockClusterState>>,
}

impl ClusterConnection for MockClusterConnection {
    fn command_argv(
        &mut self,
        routing_key: &str,
        contents: &Contents,
        on_reply: ReplyCallback,
    ) -> Result<(), ContextError> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.fail_sends.clone() {
            return Err(error);
        }
        state
            .sent
            .push((routing_key.to_string(), argv_strings(contents)));
        state.pending.push_back(on_reply);
        Ok(())
    }

    fn detach_node(&mut self, address: &HostAndPort) {
        self.state.borrow_mut().detached.push(address.clone());
    }
}

impl Drop for MockClusterConnection {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.dropped = true;
            state.pending.clear();
            state.handlers = None;
        }
    }
}

#[derive(Default)]
struct MockClusterSystemState {
    clusters: Vec<MockCluster>,
    fail_connects: VecDeque<ContextError>,
}

/// Scripted cluster adapter
#[derive(Default)]
pub struct MockClusterSystem {
    state: RefCell<MockClusterSystemState>,
}

impl MockClusterSystem {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn cluster_count(&self) -> usize {
        self.state.borrow().clusters.len()
    }

    pub fn last_cluster(&self) -> MockCluster {
        let state = self.state.borrow();
        state.clusters[state.clusters.len() - 1].clone()
    }

    pub fn fail_next_connect(&self, error: ContextError) {
        self.state.borrow_mut().fail_connects.push_back(error);
    }
}

impl ClusterSystem for MockClusterSystem {
    fn connect(
        &self,
        seeds: &[HostAndPort],
        handlers: ClusterHandlers,
    ) -> Result<Box<dyn ClusterConnection>, ContextError> {
        let mut system = self.state.borrow_mut();
        if let Some(error) = system.fail_connects.pop_front() {
            return Err(error);
        }
        let state = Rc::new(RefCell::new(MockClusterState {
            seeds: seeds.to_vec(),
            handlers: Some(handlers),
            sent: Vec::new(),
            pending: VecDeque::new(),
            detached: Vec::new(),
            fail_sends: None,
            dropped: false,
        }));
        system.clusters.push(MockCluster {
            state: state.clone(),
        });
        Ok(Box::new(MockClusterConnection { state }))
    }
}
