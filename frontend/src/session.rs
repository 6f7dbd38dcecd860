//! Session record storage and change notification.
//!
//! The record lives in the origin's `localStorage` under two keys that are
//! always written and removed together. Observers never share memory: every
//! mounted view subscribes with [`SessionBroadcast::on_change`] and re-reads
//! [`SessionBroadcast::current`] whenever it is told something moved. Same-page
//! changes are announced synchronously after each write; changes made by other
//! tabs arrive through the browser `storage` event.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Storage, StorageEvent, Window};

use crate::config::{ClientConfig, TOKEN_LOCAL_STORAGE_KEY, USER_LOCAL_STORAGE_KEY};
use crate::query_result::User;

#[derive(Hash, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUser {
    #[serde(rename = "user_id")]
    pub id: String,
    pub username: String,
}

#[derive(Hash, Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub token: String,
    pub user: SessionUser,
}

impl SessionRecord {
    /// Builds a record from a login response. The token is mandatory.
    pub fn from_login(user: User) -> Option<SessionRecord> {
        let token = user.token.filter(|token| !token.is_empty())?;

        Some(SessionRecord {
            token,
            user: SessionUser {
                id: user.user_id,
                username: user.username,
            },
        })
    }
}

/// Key/value store with the shape of `web_sys::Storage`. Writes report no
/// failure to the caller.
pub trait SessionStore {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str);
    fn remove_item(&self, key: &str);
}

/// The browser's per-origin `localStorage`.
pub struct LocalStorage {
    storage: Storage,
}

impl LocalStorage {
    pub fn new(storage: Storage) -> Self {
        LocalStorage { storage }
    }

    pub fn from_window(window: &Window) -> Option<Self> {
        match window.local_storage() {
            Ok(Some(storage)) => Some(LocalStorage::new(storage)),
            _ => None,
        }
    }
}

impl SessionStore for LocalStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.storage.get_item(key).ok().flatten()
    }

    fn set_item(&self, key: &str, value: &str) {
        if let Err(err) = self.storage.set_item(key, value) {
            warn!("localStorage set_item {} failed: {:?}", key, err);
        }
    }

    fn remove_item(&self, key: &str) {
        if let Err(err) = self.storage.remove_item(key) {
            warn!("localStorage remove_item {} failed: {:?}", key, err);
        }
    }
}

/// In-memory store. Clones share the same map, which is how tests model two
/// tabs looking at one origin.
#[derive(Clone, Default)]
pub struct MemoryStore {
    items: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl SessionStore for MemoryStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        self.items
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
    }

    fn remove_item(&self, key: &str) {
        self.items.borrow_mut().remove(key);
    }
}

type Listener = Rc<dyn Fn()>;

struct Inner {
    store: Box<dyn SessionStore>,
    token_key: String,
    user_key: String,
    listeners: RefCell<Vec<(u64, Listener)>>,
    next_listener_id: Cell<u64>,
}

/// Handle onto the shared session record. Cheap to clone; clones notify the
/// same listeners.
#[derive(Clone)]
pub struct SessionBroadcast {
    inner: Rc<Inner>,
}

impl SessionBroadcast {
    pub fn new(store: impl SessionStore + 'static) -> Self {
        SessionBroadcast::with_keys(store, TOKEN_LOCAL_STORAGE_KEY, USER_LOCAL_STORAGE_KEY)
    }

    pub fn from_config(store: impl SessionStore + 'static, config: &ClientConfig) -> Self {
        SessionBroadcast::with_keys(store, &config.token_key, &config.user_key)
    }

    pub fn with_keys(store: impl SessionStore + 'static, token_key: &str, user_key: &str) -> Self {
        SessionBroadcast {
            inner: Rc::new(Inner {
                store: Box::new(store),
                token_key: token_key.to_owned(),
                user_key: user_key.to_owned(),
                listeners: RefCell::new(Vec::new()),
                next_listener_id: Cell::new(0),
            }),
        }
    }

    /// Reads the record back from the store. A token without an identity
    /// (or the reverse) reads as no session at all.
    pub fn current(&self) -> Option<SessionRecord> {
        let store = &self.inner.store;

        let token = store
            .get_item(&self.inner.token_key)
            .filter(|token| !token.is_empty())?;
        let user_json = store.get_item(&self.inner.user_key)?;

        let user: SessionUser = match serde_json::from_str(&user_json) {
            Ok(user) => user,
            Err(err) => {
                debug!("stored user is not readable: {}", err);
                return None;
            }
        };

        Some(SessionRecord { token, user })
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    /// Stores `record`. A record with an empty token is not a session and is
    /// ignored, leaving the store as it was.
    pub fn establish(&self, record: &SessionRecord) {
        if record.token.is_empty() {
            warn!("refusing to store a session without a token");
            return;
        }

        let user_json = match serde_json::to_string(&record.user) {
            Ok(user_json) => user_json,
            Err(err) => {
                warn!("could not serialize session user: {}", err);
                return;
            }
        };

        let store = &self.inner.store;
        store.set_item(&self.inner.token_key, &record.token);
        store.set_item(&self.inner.user_key, &user_json);

        debug!("session established for {}", record.user.username);
        self.notify();
    }

    pub fn clear(&self) {
        let store = &self.inner.store;
        store.remove_item(&self.inner.token_key);
        store.remove_item(&self.inner.user_key);

        debug!("session cleared");
        self.notify();
    }

    /// Registers `listener` for both same-page and cross-tab changes. The
    /// listener stays registered until the returned [`Subscription`] is
    /// dropped.
    pub fn on_change(&self, listener: impl Fn() + 'static) -> Subscription {
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id + 1);

        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));

        Subscription {
            inner: Rc::downgrade(&self.inner),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Entry point for the cross-tab channel. `key` is the storage key that
    /// changed, `None` when the whole store was cleared. Returns whether the
    /// listeners were notified.
    pub fn handle_storage_signal(&self, key: Option<&str>) -> bool {
        let relevant = match key {
            None => true,
            Some(key) => key == self.inner.token_key || key == self.inner.user_key,
        };

        if relevant {
            debug!("session changed in another tab ({:?})", key);
            self.notify();
        }

        relevant
    }

    /// Listens for `storage` events on `window`. The browser only fires them
    /// in tabs other than the one that wrote.
    pub fn attach_storage_listener(&self, window: &Window) -> Result<StorageListener, JsValue> {
        let session = self.clone();
        let closure = Closure::<dyn FnMut(StorageEvent)>::new(move |event: StorageEvent| {
            session.handle_storage_signal(event.key().as_deref());
        });

        window.add_event_listener_with_callback("storage", closure.as_ref().unchecked_ref())?;

        Ok(StorageListener {
            window: window.clone(),
            closure,
        })
    }

    fn notify(&self) {
        // snapshot so listeners can (un)subscribe or read the store re-entrantly
        let listeners: Vec<(u64, Listener)> = self.inner.listeners.borrow().clone();

        for (id, listener) in listeners {
            // an earlier listener may have dropped this one's subscription
            let registered = self
                .inner
                .listeners
                .borrow()
                .iter()
                .any(|(registered_id, _listener)| *registered_id == id);

            if registered {
                listener();
            }
        }
    }
}

/// Scoped registration returned by [`SessionBroadcast::on_change`].
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .listeners
                .borrow_mut()
                .retain(|(id, _listener)| *id != self.id);
        }
    }
}

/// Keeps a `storage` event listener installed on the window until dropped.
pub struct StorageListener {
    window: Window,
    closure: Closure<dyn FnMut(StorageEvent)>,
}

impl Drop for StorageListener {
    fn drop(&mut self) {
        let _ = self
            .window
            .remove_event_listener_with_callback("storage", self.closure.as_ref().unchecked_ref());
    }
}

/// What one observer (a header, a page) currently shows. `refresh` re-reads
/// the store and only reports a change when the record actually differs, so
/// duplicate signals are harmless.
pub struct SessionView {
    session: SessionBroadcast,
    visible: RefCell<Option<SessionRecord>>,
}

impl SessionView {
    pub fn new(session: SessionBroadcast) -> Self {
        let visible = RefCell::new(session.current());
        SessionView { session, visible }
    }

    pub fn visible(&self) -> Option<SessionRecord> {
        self.visible.borrow().clone()
    }

    pub fn refresh(&self) -> bool {
        let current = self.session.current();

        if *self.visible.borrow() == current {
            return false;
        }

        *self.visible.borrow_mut() = current;
        true
    }

    /// Refreshes on every signal and calls `on_update` when the visible
    /// record changed.
    pub fn watch(
        view: &Rc<SessionView>,
        on_update: impl Fn(Option<&SessionRecord>) + 'static,
    ) -> Subscription {
        let weak_view = Rc::downgrade(view);

        view.session.on_change(move || {
            if let Some(view) = weak_view.upgrade() {
                if view.refresh() {
                    on_update(view.visible.borrow().as_ref());
                }
            }
        })
    }
}
