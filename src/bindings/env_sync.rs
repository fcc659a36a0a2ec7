//! `BroadcastChannel` transport for environment snapshots.
//!
//! A realm with a `document` publishes; workers follow what arrives.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{BroadcastChannel, MessageEvent};

use super::proxy_helpers::get_global;
use crate::error::{Result, SpoofError};
use crate::runtime::{self, SpoofRuntime};
use crate::sync::{EnvHub, EnvSnapshot, Listener, SnapshotMirror, SyncChannel, SYNC_CHANNEL};

type MessageHandler = Closure<dyn FnMut(MessageEvent)>;

thread_local! {
    static HUB: RefCell<Option<Rc<EnvHub<BrowserChannel>>>> = const { RefCell::new(None) };
    static MIRROR: RefCell<Option<SnapshotMirror>> = const { RefCell::new(None) };
}

pub struct BrowserChannel {
    channel: BroadcastChannel,
    handlers: RefCell<Vec<(u64, MessageHandler)>>,
    next_id: Cell<u64>,
}

impl BrowserChannel {
    pub fn open(name: &str) -> Result<Self> {
        Ok(Self {
            channel: BroadcastChannel::new(name)?,
            handlers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        })
    }
}

impl SyncChannel for BrowserChannel {
    fn post(&self, msg: &Value) -> Result<()> {
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        let js = msg.serialize(&serializer)?;
        self.channel.post_message(&js)?;
        Ok(())
    }

    fn listen(&self, listener: Listener) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let handler = Closure::wrap(Box::new(move |event: MessageEvent| {
            match serde_wasm_bindgen::from_value::<Value>(event.data()) {
                Ok(msg) => listener(&msg),
                Err(err) => log::debug!("[sync] unreadable message: {}", err),
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        if let Err(err) = self
            .channel
            .add_event_listener_with_callback("message", handler.as_ref().unchecked_ref())
        {
            log::warn!("[sync] listener not attached: {:?}", err);
        }
        self.handlers.borrow_mut().push((id, handler));
        id
    }

    fn unlisten(&self, id: u64) {
        let mut handlers = self.handlers.borrow_mut();
        if let Some(pos) = handlers.iter().position(|(h, _)| *h == id) {
            let (_, handler) = handlers.remove(pos);
            let _ = self
                .channel
                .remove_event_listener_with_callback("message", handler.as_ref().unchecked_ref());
        }
    }
}

fn has_document() -> bool {
    get_global("document").is_ok_and(|d| d.is_object())
}

fn hub() -> Result<Rc<EnvHub<BrowserChannel>>> {
    if let Some(hub) = HUB.with(|h| h.borrow().clone()) {
        return Ok(hub);
    }
    let hub = Rc::new(EnvHub::new(BrowserChannel::open(SYNC_CHANNEL)?));
    HUB.with(|h| *h.borrow_mut() = Some(Rc::clone(&hub)));
    Ok(hub)
}

/// Post this realm's snapshot.
pub fn publish(rt: &SpoofRuntime) -> Result<()> {
    hub()?.publish(rt.snapshot())
}

/// Publish from a document realm, or start mirroring in a worker.
pub fn install(rt: &SpoofRuntime) -> Result<usize> {
    if has_document() {
        publish(rt)?;
        log::info!("[sync] snapshot published on {}", SYNC_CHANNEL);
        return Ok(1);
    }
    let hub = hub()?;
    let mirror = SnapshotMirror::new(rt.snapshot());
    mirror.attach_with(&hub, |snap| {
        if let Err(err) = runtime::current().and_then(|rt| rt.adopt_snapshot(snap)) {
            log::warn!("[sync] snapshot not adopted: {}", err);
        }
    });
    MIRROR.with(|m| *m.borrow_mut() = Some(mirror));
    log::info!("[sync] following {}", SYNC_CHANNEL);
    Ok(1)
}

/// What this realm currently believes the environment is.
pub fn current_snapshot() -> Result<EnvSnapshot> {
    if let Some(mirror) = MIRROR.with(|m| m.borrow().clone()) {
        return Ok(mirror.current());
    }
    HUB.with(|h| h.borrow().as_ref().and_then(|hub| hub.snapshot()))
        .ok_or(SpoofError::NotInitialized)
}
