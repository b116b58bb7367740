//! In-flight command bookkeeping and reply delivery shared by the dispatchers
//!
//! Callbacks are never invoked while the owning dispatcher is borrowed: the
//! entry is taken out of the map, invoked, and put back only if permanent.

use super::dispatcher::{CommandCb, ConnectAck, DisconnectCb};
use super::general::{map_context_error, map_reply_error};
use super::reply::Reply;
use super::resp::RespValue;
use super::system::{ContextError, ReplyCallback};
use crate::core::Engine;
use crate::error::DispatcherError;
use crate::utils::abort;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

/// Correlation token between a submitted command and its reply
pub type CommandId = u64;

pub struct PendingCommand {
    pub cb: CommandCb,
    /// Permanent commands (subscriptions) receive many replies
    pub permanent: bool,
}

#[derive(Default)]
pub struct PendingCommands {
    next_id: CommandId,
    commands: BTreeMap<CommandId, PendingCommand>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cb: CommandCb, permanent: bool) -> CommandId {
        self.next_id += 1;
        let id = self.next_id;
        self.commands.insert(id, PendingCommand { cb, permanent });
        id
    }

    /// Remove the entry for delivery; it is put back with `reinsert` if permanent
    pub fn take(&mut self, id: CommandId) -> Option<PendingCommand> {
        self.commands.remove(&id)
    }

    pub fn reinsert(&mut self, id: CommandId, command: PendingCommand) {
        self.commands.insert(id, command);
    }

    pub fn remove(&mut self, id: CommandId) -> bool {
        self.commands.remove(&id).is_some()
    }

    pub fn contains(&self, id: CommandId) -> bool {
        self.commands.contains_key(&id)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Forget subscriptions whose link is gone; returns how many were dropped
    pub fn drop_permanent(&mut self) -> usize {
        let before = self.commands.len();
        self.commands.retain(|_, command| !command.permanent);
        before - self.commands.len()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Client-facing callback state of one dispatcher
pub(crate) struct CommandCallbacks {
    pub pending: PendingCommands,
    pub enabled: Rc<Cell<bool>>,
    pub connect_acks: Vec<ConnectAck>,
    pub disconnect_cbs: Vec<DisconnectCb>,
}

impl CommandCallbacks {
    pub fn new() -> Self {
        Self {
            pending: PendingCommands::new(),
            enabled: Rc::new(Cell::new(true)),
            connect_acks: Vec::new(),
            disconnect_cbs: Vec::new(),
        }
    }

    pub fn disable(&mut self) {
        self.enabled.set(false);
        self.pending.clear();
    }
}

/// Dispatcher state that owns a [`CommandCallbacks`]
pub(crate) trait CallbackOwner: 'static {
    fn callbacks(&mut self) -> &mut CommandCallbacks;
}

/// Split a raw reply into the client-facing result and reply tree
pub(crate) fn translate_reply(result: Result<RespValue, ContextError>) -> (Result<(), DispatcherError>, Reply) {
    match result {
        Err(e) => (Err(map_context_error(&e)), Reply::Nil),
        Ok(RespValue::Error(text)) => (Err(map_reply_error(&text)), Reply::Nil),
        Ok(value) => (Ok(()), Reply::from_resp(&value)),
    }
}

/// Adapter callback delivering replies for `id`
pub(crate) fn reply_callback<T: CallbackOwner>(owner: Weak<RefCell<T>>, id: CommandId) -> ReplyCallback {
    Box::new(move |result| {
        if let Some(owner) = owner.upgrade() {
            deliver_reply(&owner, id, result);
        }
    })
}

pub(crate) fn deliver_reply<T: CallbackOwner>(
    owner: &Rc<RefCell<T>>,
    id: CommandId,
    result: Result<RespValue, ContextError>,
) {
    let mut command = {
        let mut state = owner.borrow_mut();
        let callbacks = state.callbacks();
        if !callbacks.enabled.get() {
            callbacks.pending.remove(id);
            return;
        }
        match callbacks.pending.take(id) {
            Some(command) => command,
            None => abort(&format!("reply for unknown or completed command {}", id)),
        }
    };

    let (status, reply) = translate_reply(result);
    (command.cb)(status, &reply);

    if command.permanent {
        let mut state = owner.borrow_mut();
        let callbacks = state.callbacks();
        if callbacks.enabled.get() {
            callbacks.pending.reinsert(id, command);
        }
    }
}

/// Resolve a command through the engine; skipped if callbacks get disabled first
pub(crate) fn post_command_result(
    engine: &Rc<dyn Engine>,
    enabled: &Rc<Cell<bool>>,
    mut cb: CommandCb,
    error: DispatcherError,
) {
    let enabled = enabled.clone();
    engine.post_callback(Box::new(move || {
        if enabled.get() {
            cb(Err(error), &Reply::Nil);
        }
    }));
}

pub(crate) fn fire_connect_acks<T: CallbackOwner>(owner: &Rc<RefCell<T>>) {
    let acks = std::mem::take(&mut owner.borrow_mut().callbacks().connect_acks);
    for ack in acks {
        ack();
    }
}

pub(crate) fn fire_disconnect_cbs<T: CallbackOwner>(owner: &Rc<RefCell<T>>) {
    let mut cbs = std::mem::take(&mut owner.borrow_mut().callbacks().disconnect_cbs);
    for cb in cbs.iter_mut() {
        cb();
    }
    let mut state = owner.borrow_mut();
    let registered_meanwhile = std::mem::take(&mut state.callbacks().disconnect_cbs);
    cbs.extend(registered_meanwhile);
    state.callbacks().disconnect_cbs = cbs;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{error_reply, status, ManualEngine};

    struct Owner {
        callbacks: CommandCallbacks,
    }

    impl CallbackOwner for Owner {
        fn callbacks(&mut self) -> &mut CommandCallbacks {
            &mut self.callbacks
        }
    }

    fn owner() -> Rc<RefCell<Owner>> {
        Rc::new(RefCell::new(Owner {
            callbacks: CommandCallbacks::new(),
        }))
    }

    type Seen = Rc<RefCell<Vec<(Result<(), DispatcherError>, Reply)>>>;

    fn recording(seen: &Seen) -> CommandCb {
        let seen = seen.clone();
        Box::new(move |status, reply| seen.borrow_mut().push((status, reply.clone())))
    }

    #[test]
    fn test_ids_increase() {
        let mut pending = PendingCommands::new();
        let a = pending.insert(Box::new(|_, _| {}), false);
        let b = pending.insert(Box::new(|_, _| {}), true);
        assert!(b > a);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_take_and_reinsert() {
        let mut pending = PendingCommands::new();
        let id = pending.insert(Box::new(|_, _| {}), true);
        let command = pending.take(id).unwrap();
        assert!(command.permanent);
        assert!(!pending.contains(id));
        pending.reinsert(id, command);
        assert!(pending.contains(id));
        assert!(pending.remove(id));
        assert!(!pending.remove(id));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_drop_permanent_keeps_one_shots() {
        let mut pending = PendingCommands::new();
        let one_shot = pending.insert(Box::new(|_, _| {}), false);
        let subscription = pending.insert(Box::new(|_, _| {}), true);
        assert_eq!(pending.drop_permanent(), 1);
        assert!(pending.contains(one_shot));
        assert!(!pending.contains(subscription));
    }

    #[test]
    fn test_one_shot_delivery_retracts_entry() {
        let owner = owner();
        let seen: Seen = Rc::default();
        let id = owner.borrow_mut().callbacks.pending.insert(recording(&seen), false);

        deliver_reply(&owner, id, Ok(status("OK")));
        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].0.is_ok());
        assert!(owner.borrow().callbacks.pending.is_empty());
    }

    #[test]
    fn test_permanent_delivery_keeps_entry() {
        let owner = owner();
        let seen: Seen = Rc::default();
        let id = owner.borrow_mut().callbacks.pending.insert(recording(&seen), true);

        deliver_reply(&owner, id, Ok(status("a")));
        deliver_reply(&owner, id, Ok(status("b")));
        assert_eq!(seen.borrow().len(), 2);
        assert!(owner.borrow().callbacks.pending.contains(id));
    }

    #[test]
    fn test_errors_come_with_nil_reply() {
        let owner = owner();
        let seen: Seen = Rc::default();
        let a = owner.borrow_mut().callbacks.pending.insert(recording(&seen), false);
        let b = owner.borrow_mut().callbacks.pending.insert(recording(&seen), false);

        deliver_reply(&owner, a, Ok(error_reply("LOADING Redis is loading the dataset in memory")));
        deliver_reply(&owner, b, Err(ContextError::Eof));
        let seen = seen.borrow();
        assert_eq!(seen[0], (Err(DispatcherError::DatasetLoading), Reply::Nil));
        assert_eq!(seen[1], (Err(DispatcherError::ConnectionLost), Reply::Nil));
    }

    #[test]
    #[should_panic(expected = "unknown or completed command")]
    fn test_second_reply_aborts() {
        let owner = owner();
        let id = owner.borrow_mut().callbacks.pending.insert(Box::new(|_, _| {}), false);
        deliver_reply(&owner, id, Ok(status("OK")));
        deliver_reply(&owner, id, Ok(status("OK")));
    }

    #[test]
    fn test_disabled_callbacks_drop_replies() {
        let owner = owner();
        let seen: Seen = Rc::default();
        let id = owner.borrow_mut().callbacks.pending.insert(recording(&seen), false);
        owner.borrow_mut().callbacks.disable();

        deliver_reply(&owner, id, Ok(status("OK")));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_posted_result_checks_enabled_when_run() {
        let engine = ManualEngine::new();
        let dyn_engine: Rc<dyn Engine> = engine.clone();
        let owner = owner();
        let seen: Seen = Rc::default();
        let enabled = owner.borrow().callbacks.enabled.clone();

        post_command_result(&dyn_engine, &enabled, recording(&seen), DispatcherError::NotConnected);
        post_command_result(&dyn_engine, &enabled, recording(&seen), DispatcherError::NotConnected);
        assert!(seen.borrow().is_empty());
        engine.run_posted();
        assert_eq!(seen.borrow().len(), 2);

        post_command_result(&dyn_engine, &enabled, recording(&seen), DispatcherError::NotConnected);
        owner.borrow_mut().callbacks.disable();
        engine.run_posted();
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_disconnect_cbs_survive_firing() {
        let owner = owner();
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        owner
            .borrow_mut()
            .callbacks
            .disconnect_cbs
            .push(Box::new(move || counter.set(counter.get() + 1)));

        fire_disconnect_cbs(&owner);
        fire_disconnect_cbs(&owner);
        assert_eq!(count.get(), 2);
    }
}
