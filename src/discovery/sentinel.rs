//! Master discovery through Redis Sentinel
//!
//! Two sentinel-mode dispatchers share the sentinel address: a subscriber
//! listening on `+switch-master` and an inquiry connection asking for the
//! current master. Every answer is reported as a single-server
//! [`DatabaseInfo`].

use super::{DatabaseDiscovery, StateChangedCb};
use crate::config::DispatcherConfig;
use crate::core::{DatabaseInfo, DatabaseType, Discovery, Engine, HostAndPort, Timer};
use crate::error::{DispatcherError, SdlResult};
use crate::redis::reply::{Reply, ReplyType};
use crate::redis::{self, AsyncCommandDispatcher, BackendSystems, ContentsBuilder, DispatcherOptions};
use crate::utils::abort;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

const SWITCH_MASTER_CHANNEL: &str = "+switch-master";
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Pushed frame on the subscriber connection
#[derive(Debug, Clone, PartialEq, Eq)]
enum SubscribeReply {
    Subscribed,
    Notification(String),
}

fn parse_subscribe_reply(reply: &Reply) -> Option<SubscribeReply> {
    let items = reply.as_array();
    let kind = items.first().filter(|k| k.reply_type() == ReplyType::String)?;
    match kind.as_bytes() {
        b"subscribe" => Some(SubscribeReply::Subscribed),
        b"message" => {
            let message = items.get(2).filter(|m| m.reply_type() == ReplyType::String)?;
            Some(SubscribeReply::Notification(message.as_str_lossy()))
        }
        other => {
            debug!(
                "Invalid kind field in SUBSCRIBE reply: {}",
                String::from_utf8_lossy(other)
            );
            None
        }
    }
}

fn master_address(host: &str, port: &str) -> Option<HostAndPort> {
    if host.is_empty() {
        return None;
    }
    match port.parse::<u16>() {
        Ok(port) => Some(HostAndPort::new(host, port)),
        Err(_) => {
            debug!("Invalid master address, host: {}, port: {}", host, port);
            None
        }
    }
}

/// `[host, port]` answer to `SENTINEL get-master-addr-by-name`
fn parse_master_inquiry_reply(reply: &Reply) -> Option<HostAndPort> {
    match reply.as_array() {
        [host, port, ..]
            if host.reply_type() == ReplyType::String
                && port.reply_type() == ReplyType::String =>
        {
            master_address(&host.as_str_lossy(), &port.as_str_lossy())
        }
        _ => {
            debug!("Invalid master inquiry reply type: {:?}", reply.reply_type());
            None
        }
    }
}

/// `<master-name> <old-ip> <old-port> <new-ip> <new-port>`
fn parse_notification_message(message: &str) -> Option<HostAndPort> {
    let parts: Vec<&str> = message.split(' ').collect();
    if parts.len() != 5 {
        debug!(
            "Invalid structure in notification message, size: {}",
            parts.len()
        );
        return None;
    }
    master_address(parts[3], parts[4])
}

fn master_info(master: HostAndPort) -> DatabaseInfo {
    DatabaseInfo::new(vec![master], DatabaseType::Single, None, Discovery::Sentinel)
}

struct Inner {
    this: Weak<RefCell<Inner>>,
    subscriber: Rc<dyn AsyncCommandDispatcher>,
    inquiry: Rc<dyn AsyncCommandDispatcher>,
    master_name: String,
    contents_builder: Rc<ContentsBuilder>,
    state_changed: Option<StateChangedCb>,
    /// Bumped on every set or clear of `state_changed`
    generation: u64,
    resubscribe_registered: bool,
    subscribe_retry: Timer,
    inquiry_retry: Timer,
}

fn with_inner<F>(this: &Weak<RefCell<Inner>>, f: F) -> Box<dyn FnOnce()>
where
    F: FnOnce(&Rc<RefCell<Inner>>) + 'static,
{
    let this = this.clone();
    Box::new(move || {
        if let Some(inner) = this.upgrade() {
            f(&inner);
        }
    })
}

fn subscribe_notifications(inner: &Rc<RefCell<Inner>>) {
    let (subscriber, contents, this) = {
        let state = inner.borrow();
        (
            state.subscriber.clone(),
            state
                .contents_builder
                .build(&["SUBSCRIBE", SWITCH_MASTER_CHANNEL]),
            state.this.clone(),
        )
    };
    debug!("Subscribing to {}", SWITCH_MASTER_CHANNEL);
    subscriber.dispatch_async(
        Box::new(move |result, reply| {
            if let Some(inner) = this.upgrade() {
                subscribe_ack(&inner, result, reply);
            }
        }),
        "",
        contents,
    );
}

fn subscribe_ack(inner: &Rc<RefCell<Inner>>, result: Result<(), DispatcherError>, reply: &Reply) {
    if let Err(error) = result {
        let state = inner.borrow();
        warn!("Subscribing to sentinel failed: {}, retrying", error);
        let again = with_inner(&state.this, subscribe_notifications);
        state.subscribe_retry.arm(RETRY_INTERVAL, again);
        return;
    }

    match parse_subscribe_reply(reply) {
        Some(SubscribeReply::Subscribed) => {
            let (inquiry, this) = {
                let state = inner.borrow();
                (state.inquiry.clone(), state.this.clone())
            };
            inquiry.wait_connected_async(with_inner(&this, send_master_inquiry));
        }
        Some(SubscribeReply::Notification(message)) => match parse_notification_message(&message) {
            Some(master) => {
                info!("Sentinel switched master to {}", master);
                report(inner, master_info(master));
            }
            None => abort("Notification message parsing error."),
        },
        None => abort("SUBSCRIBE command reply parsing error."),
    }
}

fn send_master_inquiry(inner: &Rc<RefCell<Inner>>) {
    let (inquiry, contents, this) = {
        let state = inner.borrow();
        (
            state.inquiry.clone(),
            state.contents_builder.build(&[
                "SENTINEL",
                "get-master-addr-by-name",
                state.master_name.as_str(),
            ]),
            state.this.clone(),
        )
    };
    inquiry.dispatch_async(
        Box::new(move |result, reply| {
            if let Some(inner) = this.upgrade() {
                master_inquiry_ack(&inner, result, reply);
            }
        }),
        "",
        contents,
    );
}

fn master_inquiry_ack(
    inner: &Rc<RefCell<Inner>>,
    result: Result<(), DispatcherError>,
    reply: &Reply,
) {
    if let Err(error) = result {
        let state = inner.borrow();
        warn!("Master inquiry failed: {}, retrying", error);
        let again = with_inner(&state.this, send_master_inquiry);
        state.inquiry_retry.arm(RETRY_INTERVAL, again);
        return;
    }

    match parse_master_inquiry_reply(reply) {
        Some(master) => {
            info!("Sentinel reports master {}", master);
            report(inner, master_info(master));
        }
        None => abort("Master inquiry reply parsing error."),
    }
}

fn report(inner: &Rc<RefCell<Inner>>, info: DatabaseInfo) {
    let (cb, generation) = {
        let mut state = inner.borrow_mut();
        (state.state_changed.take(), state.generation)
    };
    let Some(mut cb) = cb else {
        return;
    };
    cb(&info);
    let mut state = inner.borrow_mut();
    if state.generation == generation {
        state.state_changed = Some(cb);
    }
}

pub struct SentinelDiscovery {
    inner: Rc<RefCell<Inner>>,
}

impl SentinelDiscovery {
    /// Discovery over two fresh sentinel-mode dispatchers to `sentinel`
    pub fn new(
        engine: Rc<dyn Engine>,
        sentinel: HostAndPort,
        master_name: String,
        contents_builder: Rc<ContentsBuilder>,
        config: &DispatcherConfig,
        systems: BackendSystems,
    ) -> SdlResult<Self> {
        let info = DatabaseInfo::new(
            vec![sentinel],
            DatabaseType::Single,
            None,
            Discovery::Sentinel,
        );
        let subscriber = redis::create_with_systems(
            engine.clone(),
            &info,
            contents_builder.clone(),
            DispatcherOptions {
                use_permanent_command_callbacks: true,
                used_for_sentinel: true,
            },
            config,
            systems.clone(),
        )?;
        let inquiry = redis::create_with_systems(
            engine.clone(),
            &info,
            contents_builder.clone(),
            DispatcherOptions {
                use_permanent_command_callbacks: false,
                used_for_sentinel: true,
            },
            config,
            systems,
        )?;
        Ok(Self::with_dispatchers(
            engine,
            subscriber,
            inquiry,
            master_name,
            contents_builder,
        ))
    }

    pub fn with_dispatchers(
        engine: Rc<dyn Engine>,
        subscriber: Rc<dyn AsyncCommandDispatcher>,
        inquiry: Rc<dyn AsyncCommandDispatcher>,
        master_name: String,
        contents_builder: Rc<ContentsBuilder>,
    ) -> Self {
        let inner = Rc::new_cyclic(|this| {
            RefCell::new(Inner {
                this: this.clone(),
                subscriber,
                inquiry,
                master_name,
                contents_builder,
                state_changed: None,
                generation: 0,
                resubscribe_registered: false,
                subscribe_retry: Timer::new(engine.clone()),
                inquiry_retry: Timer::new(engine),
            })
        });
        Self { inner }
    }
}

impl DatabaseDiscovery for SentinelDiscovery {
    fn set_state_changed_cb(&self, cb: StateChangedCb) {
        let (subscriber, this, register) = {
            let mut state = self.inner.borrow_mut();
            state.state_changed = Some(cb);
            state.generation += 1;
            let register = !state.resubscribe_registered;
            state.resubscribe_registered = true;
            (state.subscriber.clone(), state.this.clone(), register)
        };

        if register {
            let weak_subscriber = Rc::downgrade(&subscriber);
            let on_reconnect = this.clone();
            subscriber.register_disconnect_cb(Box::new(move || {
                if let Some(subscriber) = weak_subscriber.upgrade() {
                    subscriber.wait_connected_async(with_inner(&on_reconnect, subscribe_notifications));
                }
            }));
        }
        subscriber.wait_connected_async(with_inner(&this, subscribe_notifications));
    }

    fn clear_state_changed_cb(&self) {
        let mut state = self.inner.borrow_mut();
        state.state_changed = None;
        state.generation += 1;
    }
}

impl Drop for SentinelDiscovery {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.try_borrow_mut() {
            state.subscriber.disable_command_callbacks();
            state.inquiry.disable_command_callbacks();
            state.state_changed = None;
            state.subscribe_retry.disarm();
            state.inquiry_retry.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::resp::RespValue;
    use crate::testing::{array, bulk, error_reply, ManualEngine, MockClusterSystem, MockRedisSystem};
    use std::cell::Cell;

    fn sentinel() -> HostAndPort {
        HostAndPort::new("sentinel", 26379)
    }

    struct Fixture {
        engine: Rc<ManualEngine>,
        redis: Rc<MockRedisSystem>,
        discovery: SentinelDiscovery,
        seen: Rc<RefCell<Vec<DatabaseInfo>>>,
    }

    fn fixture() -> Fixture {
        let engine = ManualEngine::new();
        let redis = MockRedisSystem::new();
        let systems = BackendSystems {
            redis: redis.clone(),
            cluster: MockClusterSystem::new(),
        };
        let discovery = SentinelDiscovery::new(
            engine.clone(),
            sentinel(),
            "mymaster".to_string(),
            Rc::new(ContentsBuilder::default()),
            &DispatcherConfig::default(),
            systems,
        )
        .unwrap();
        let seen: Rc<RefCell<Vec<DatabaseInfo>>> = Rc::default();
        let sink = seen.clone();
        discovery.set_state_changed_cb(Box::new(move |info| sink.borrow_mut().push(info.clone())));
        Fixture {
            engine,
            redis,
            discovery,
            seen,
        }
    }

    fn subscribed() -> RespValue {
        array(vec![
            bulk("subscribe"),
            bulk(SWITCH_MASTER_CHANNEL),
            RespValue::Integer(1),
        ])
    }

    fn master(host: &str, port: u16) -> DatabaseInfo {
        master_info(HostAndPort::new(host, port))
    }

    impl Fixture {
        fn subscriber(&self) -> crate::testing::MockLink {
            self.redis.link(0)
        }

        fn inquiry(&self) -> crate::testing::MockLink {
            self.redis.link(1)
        }

        /// Bring both links up and run the posted connect acks
        fn connect_all(&self) {
            self.subscriber().connect_ok();
            self.inquiry().connect_ok();
            self.engine.run_posted();
        }
    }

    #[test]
    fn test_both_dispatchers_target_sentinel() {
        let f = fixture();
        assert_eq!(f.redis.link_count(), 2);
        assert_eq!(f.subscriber().address(), sentinel());
        assert_eq!(f.inquiry().address(), sentinel());
    }

    #[test]
    fn test_subscribe_then_inquiry_reports_master() {
        let f = fixture();
        f.connect_all();
        assert_eq!(
            f.subscriber().sent(),
            vec![vec!["SUBSCRIBE", SWITCH_MASTER_CHANNEL]]
        );

        f.subscriber().push(subscribed());
        f.engine.run_posted();
        assert_eq!(
            f.inquiry().sent(),
            vec![vec!["SENTINEL", "get-master-addr-by-name", "mymaster"]]
        );

        f.inquiry().reply(array(vec![bulk("10.0.0.5"), bulk("6379")]));
        assert_eq!(*f.seen.borrow(), vec![master("10.0.0.5", 6379)]);
    }

    #[test]
    fn test_switch_master_notification_reports_new_master() {
        let f = fixture();
        f.connect_all();
        f.subscriber().push(array(vec![
            bulk("message"),
            bulk(SWITCH_MASTER_CHANNEL),
            bulk("mymaster 10.0.0.5 6379 10.0.0.6 6380"),
        ]));
        assert_eq!(*f.seen.borrow(), vec![master("10.0.0.6", 6380)]);
        assert_eq!(f.seen.borrow()[0].discovery, Discovery::Sentinel);
    }

    #[test]
    #[should_panic(expected = "Notification message parsing error")]
    fn test_malformed_notification_aborts() {
        let f = fixture();
        f.connect_all();
        f.subscriber().push(array(vec![
            bulk("message"),
            bulk(SWITCH_MASTER_CHANNEL),
            bulk("mymaster 10.0.0.6 6380"),
        ]));
    }

    #[test]
    #[should_panic(expected = "SUBSCRIBE command reply parsing error")]
    fn test_unknown_subscribe_reply_aborts() {
        let f = fixture();
        f.connect_all();
        f.subscriber().push(array(vec![bulk("pmessage")]));
    }

    #[test]
    #[should_panic(expected = "Master inquiry reply parsing error")]
    fn test_malformed_inquiry_reply_aborts() {
        let f = fixture();
        f.connect_all();
        f.subscriber().push(subscribed());
        f.engine.run_posted();
        f.inquiry().reply(array(vec![bulk("10.0.0.5"), bulk("port")]));
    }

    #[test]
    fn test_inquiry_error_is_retried() {
        let f = fixture();
        f.connect_all();
        f.subscriber().push(subscribed());
        f.engine.run_posted();

        f.inquiry().reply(error_reply("ERR No such master with that name"));
        assert!(f.seen.borrow().is_empty());
        assert_eq!(f.engine.armed_timers(), vec![RETRY_INTERVAL]);

        f.engine.fire_timers();
        assert_eq!(f.inquiry().sent().len(), 2);
        f.inquiry().reply(array(vec![bulk("10.0.0.5"), bulk("6379")]));
        assert_eq!(f.seen.borrow().len(), 1);
    }

    #[test]
    fn test_subscriber_reconnect_resubscribes() {
        let f = fixture();
        f.connect_all();
        f.subscriber().push(subscribed());
        f.engine.run_posted();

        f.subscriber().disconnect(crate::redis::ContextError::Eof);
        f.engine.fire_timers();
        let relink = f.redis.last_link();
        assert_eq!(relink.address(), sentinel());
        relink.connect_ok();
        f.engine.run_posted();
        assert_eq!(relink.sent(), vec![vec!["SUBSCRIBE", SWITCH_MASTER_CHANNEL]]);
    }

    #[test]
    fn test_cleared_callback_gets_nothing() {
        let f = fixture();
        f.connect_all();
        f.discovery.clear_state_changed_cb();
        f.subscriber().push(array(vec![
            bulk("message"),
            bulk(SWITCH_MASTER_CHANNEL),
            bulk("mymaster 10.0.0.5 6379 10.0.0.6 6380"),
        ]));
        assert!(f.seen.borrow().is_empty());
    }

    #[test]
    fn test_drop_disables_dispatchers() {
        let f = fixture();
        f.connect_all();
        let called = Rc::new(Cell::new(false));
        let flag = called.clone();
        f.discovery
            .set_state_changed_cb(Box::new(move |_| flag.set(true)));
        f.engine.run_posted();
        let subscriber = f.subscriber();
        drop(f.discovery);
        subscriber.push(subscribed());
        f.engine.run_posted();
        assert!(!called.get());
    }

    #[test]
    fn test_parsers() {
        assert_eq!(
            parse_notification_message("m 1.1.1.1 1 2.2.2.2 2"),
            Some(HostAndPort::new("2.2.2.2", 2))
        );
        assert_eq!(parse_notification_message("m 1.1.1.1 1 2.2.2.2 x"), None);
        assert_eq!(parse_master_inquiry_reply(&Reply::Nil), None);
        assert_eq!(
            parse_subscribe_reply(&Reply::from_resp(&subscribed())),
            Some(SubscribeReply::Subscribed)
        );
    }
}
