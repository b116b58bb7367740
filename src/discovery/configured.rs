/// Discovery straight from configuration
///
/// The configured addresses never change, so exactly one report is made per
/// registered callback.

use super::{DatabaseDiscovery, StateChangedCb};
use crate::core::{DatabaseInfo, DatabaseType, Discovery, Engine, HostAndPort};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

pub struct ConfiguredDiscovery {
    engine: Rc<dyn Engine>,
    info: DatabaseInfo,
    cb: Rc<RefCell<Option<StateChangedCb>>>,
}

impl ConfiguredDiscovery {
    pub fn new(
        engine: Rc<dyn Engine>,
        ns: Option<String>,
        db_type: DatabaseType,
        addresses: Vec<HostAndPort>,
    ) -> Self {
        Self {
            engine,
            info: DatabaseInfo::new(addresses, db_type, ns, Discovery::Static),
            cb: Rc::new(RefCell::new(None)),
        }
    }

    pub fn database_info(&self) -> &DatabaseInfo {
        &self.info
    }
}

impl DatabaseDiscovery for ConfiguredDiscovery {
    fn set_state_changed_cb(&self, cb: StateChangedCb) {
        *self.cb.borrow_mut() = Some(cb);

        let slot = Rc::downgrade(&self.cb);
        let info = self.info.clone();
        self.engine.post_callback(Box::new(move || {
            let Some(slot) = slot.upgrade() else {
                return;
            };
            let Some(mut cb) = slot.borrow_mut().take() else {
                return;
            };
            debug!("Reporting configured database {}", info);
            cb(&info);
            let mut current = slot.borrow_mut();
            if current.is_none() {
                *current = Some(cb);
            }
        }));
    }

    fn clear_state_changed_cb(&self) {
        self.cb.borrow_mut().take();
    }
}
