//! Cross-realm environment sync.
//!
//! The main realm publishes an [`EnvSnapshot`] over a broadcast channel;
//! worker and frame realms mirror the latest one they have received. There
//! is no handshake: a realm that starts before the first message keeps its
//! local defaults until one arrives.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{DeviceProfile, HighEntropy, SpoofConfig, UaData};
use crate::error::{Result, SpoofError};

/// Broadcast channel name and envelope key.
pub const SYNC_CHANNEL: &str = "__ENV_SYNC__";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnvSnapshot {
    pub ua: Option<String>,
    pub vendor: Option<String>,
    pub language: Option<String>,
    pub languages: Vec<String>,
    pub dpr: Option<f64>,
    pub cpu: Option<u32>,
    pub mem: Option<f64>,
    pub time_zone: Option<String>,
    pub ua_data: Option<UaData>,
    #[serde(rename = "uaCH")]
    pub ua_ch: Option<UaData>,
    pub high_entropy: Option<HighEntropy>,
    pub hardware_concurrency: Option<u32>,
    pub device_memory: Option<f64>,
    pub seed: String,
    /// Fields added by other senders, kept as received.
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl EnvSnapshot {
    pub fn from_config(config: &SpoofConfig) -> Self {
        Self::from_profile(&config.device, &config.seed)
    }

    pub fn from_profile(d: &DeviceProfile, seed: &str) -> Self {
        let language = if d.language.is_empty() {
            d.languages.first().cloned()
        } else {
            Some(d.language.clone())
        };
        Self {
            ua: Some(d.user_agent.clone()),
            vendor: Some(d.vendor.clone()),
            language,
            languages: d.languages.clone(),
            dpr: Some(d.device_pixel_ratio),
            cpu: Some(d.hardware_concurrency),
            mem: Some(d.device_memory),
            time_zone: Some(d.timezone.clone()),
            ua_data: Some(d.ua_data.clone()),
            ua_ch: Some(d.ua_data.clone()),
            high_entropy: Some(d.high_entropy.clone()),
            hardware_concurrency: Some(d.hardware_concurrency),
            device_memory: Some(d.device_memory),
            seed: seed.to_string(),
            extras: Map::new(),
        }
    }

    /// Overwrite the profile fields this snapshot carries.
    pub fn apply_to(&self, profile: &mut DeviceProfile) {
        if let Some(ua) = &self.ua {
            profile.user_agent = ua.clone();
        }
        if let Some(vendor) = &self.vendor {
            profile.vendor = vendor.clone();
        }
        if let Some(lang) = &self.language {
            profile.language = lang.clone();
        }
        if !self.languages.is_empty() {
            profile.languages = self.languages.clone();
        }
        if let Some(dpr) = self.dpr.filter(|v| v.is_finite() && *v > 0.0) {
            profile.device_pixel_ratio = dpr;
        }
        if let Some(cpu) = self.hardware_concurrency.or(self.cpu) {
            profile.hardware_concurrency = cpu;
        }
        if let Some(mem) = self.device_memory.or(self.mem) {
            profile.device_memory = mem;
        }
        if let Some(tz) = &self.time_zone {
            profile.timezone = tz.clone();
        }
        if let Some(ua_data) = self.ua_data.as_ref().or(self.ua_ch.as_ref()) {
            profile.ua_data = ua_data.clone();
        }
        if let Some(he) = &self.high_entropy {
            profile.high_entropy = he.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncBody {
    #[serde(rename = "envSnapshot")]
    pub env_snapshot: Option<EnvSnapshot>,
}

/// `{ "__ENV_SYNC__": { "envSnapshot": … } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    #[serde(rename = "__ENV_SYNC__")]
    pub sync: SyncBody,
}

pub fn encode_message(snapshot: &EnvSnapshot) -> Result<Value> {
    let envelope = SyncEnvelope {
        sync: SyncBody {
            env_snapshot: Some(snapshot.clone()),
        },
    };
    Ok(serde_json::to_value(envelope)?)
}

/// The snapshot in a channel message, if it is a sync message at all.
pub fn decode_message(msg: &Value) -> Result<Option<EnvSnapshot>> {
    if msg.get(SYNC_CHANNEL).is_none() {
        return Ok(None);
    }
    let envelope: SyncEnvelope = serde_json::from_value(msg.clone())?;
    Ok(envelope.sync.env_snapshot)
}

pub type Listener = Rc<dyn Fn(&Value)>;

/// A message channel between realms.
pub trait SyncChannel {
    fn post(&self, msg: &Value) -> Result<()>;
    /// Returns an id for [`SyncChannel::unlisten`].
    fn listen(&self, listener: Listener) -> u64;
    fn unlisten(&self, id: u64);
}

struct Endpoint {
    id: u64,
    listeners: RefCell<Vec<(u64, Listener)>>,
}

#[derive(Default)]
struct BusState {
    endpoints: Vec<Rc<Endpoint>>,
    queue: VecDeque<(u64, Value)>,
    next_id: u64,
}

/// In-process stand-in for a named `BroadcastChannel`.
///
/// Posted messages are queued and handed to every endpoint except the
/// sender on [`BroadcastBus::deliver`].
#[derive(Clone, Default)]
pub struct BroadcastBus {
    state: Rc<RefCell<BusState>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self) -> LocalBroadcast {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let endpoint = Rc::new(Endpoint {
            id: state.next_id,
            listeners: RefCell::new(Vec::new()),
        });
        state.endpoints.push(Rc::clone(&endpoint));
        LocalBroadcast {
            bus: self.clone(),
            endpoint,
            next_listener: Cell::new(0),
        }
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Dispatch queued messages. Returns how many were dispatched.
    pub fn deliver(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.state.borrow_mut().queue.pop_front();
            let Some((sender, msg)) = next else {
                break;
            };
            let receivers: Vec<Rc<Endpoint>> = self
                .state
                .borrow()
                .endpoints
                .iter()
                .filter(|e| e.id != sender)
                .cloned()
                .collect();
            for endpoint in receivers {
                let listeners: Vec<Listener> = endpoint.listeners.borrow().iter().map(|(_, l)| Rc::clone(l)).collect();
                for listener in listeners {
                    listener(&msg);
                }
            }
            delivered += 1;
        }
        delivered
    }
}

impl std::fmt::Debug for BroadcastBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("BroadcastBus")
            .field("endpoints", &state.endpoints.len())
            .field("pending", &state.queue.len())
            .finish()
    }
}

/// One realm's end of a [`BroadcastBus`].
pub struct LocalBroadcast {
    bus: BroadcastBus,
    endpoint: Rc<Endpoint>,
    next_listener: Cell<u64>,
}

impl SyncChannel for LocalBroadcast {
    fn post(&self, msg: &Value) -> Result<()> {
        self.bus
            .state
            .borrow_mut()
            .queue
            .push_back((self.endpoint.id, msg.clone()));
        Ok(())
    }

    fn listen(&self, listener: Listener) -> u64 {
        let id = self.next_listener.get();
        self.next_listener.set(id + 1);
        self.endpoint.listeners.borrow_mut().push((id, listener));
        id
    }

    fn unlisten(&self, id: u64) {
        self.endpoint.listeners.borrow_mut().retain(|(l, _)| *l != id);
    }
}

/// Handle returned by [`EnvHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

/// Publishes and receives snapshots over a channel.
pub struct EnvHub<C: SyncChannel> {
    channel: C,
    last: Rc<RefCell<Option<EnvSnapshot>>>,
}

impl<C: SyncChannel> EnvHub<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            last: Rc::new(RefCell::new(None)),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Remember `snapshot` and post it. Posting is fire-and-forget.
    pub fn publish(&self, snapshot: EnvSnapshot) -> Result<()> {
        let msg = encode_message(&snapshot)?;
        *self.last.borrow_mut() = Some(snapshot);
        self.channel.post(&msg).map_err(|err| {
            log::debug!("[sync] post failed: {}", err);
            SpoofError::Sync(err.to_string())
        })
    }

    /// The last snapshot published here or received from another realm.
    pub fn snapshot(&self) -> Option<EnvSnapshot> {
        self.last.borrow().clone()
    }

    /// Call `f` with each snapshot received. Messages that are not sync
    /// messages, or do not parse, are ignored.
    pub fn subscribe(&self, f: impl Fn(EnvSnapshot) + 'static) -> Subscription {
        let last = Rc::clone(&self.last);
        let id = self.channel.listen(Rc::new(move |msg: &Value| match decode_message(msg) {
            Ok(Some(snap)) => {
                *last.borrow_mut() = Some(snap.clone());
                f(snap);
            }
            Ok(None) => {}
            Err(err) => log::debug!("[sync] dropped malformed snapshot: {}", err),
        }));
        Subscription(id)
    }

    pub fn unsubscribe(&self, sub: Subscription) {
        self.channel.unlisten(sub.0);
    }
}

/// A realm's view of the environment: its own defaults until a snapshot
/// arrives, then the latest snapshot.
#[derive(Clone)]
pub struct SnapshotMirror {
    defaults: Rc<EnvSnapshot>,
    latest: Rc<RefCell<Option<EnvSnapshot>>>,
    updates: Rc<Cell<u32>>,
}

impl SnapshotMirror {
    pub fn new(defaults: EnvSnapshot) -> Self {
        Self {
            defaults: Rc::new(defaults),
            latest: Rc::new(RefCell::new(None)),
            updates: Rc::new(Cell::new(0)),
        }
    }

    /// Follow the snapshots `hub` receives.
    pub fn attach<C: SyncChannel>(&self, hub: &EnvHub<C>) -> Subscription {
        self.attach_with(hub, |_| {})
    }

    /// As [`SnapshotMirror::attach`], then hand each snapshot to `on_update`.
    pub fn attach_with<C: SyncChannel>(
        &self,
        hub: &EnvHub<C>,
        on_update: impl Fn(&EnvSnapshot) + 'static,
    ) -> Subscription {
        let mirror = self.clone();
        hub.subscribe(move |snap| {
            on_update(&snap);
            mirror.apply(snap);
        })
    }

    pub fn apply(&self, snapshot: EnvSnapshot) {
        *self.latest.borrow_mut() = Some(snapshot);
        self.updates.set(self.updates.get() + 1);
    }

    pub fn current(&self) -> EnvSnapshot {
        self.latest
            .borrow()
            .clone()
            .unwrap_or_else(|| (*self.defaults).clone())
    }

    pub fn has_synced(&self) -> bool {
        self.latest.borrow().is_some()
    }

    pub fn updates(&self) -> u32 {
        self.updates.get()
    }
}

impl std::fmt::Debug for SnapshotMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotMirror")
            .field("synced", &self.has_synced())
            .field("updates", &self.updates.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> SpoofConfig {
        let mut cfg = SpoofConfig::with_seed("abc123");
        cfg.device.language = "de-DE".into();
        cfg.device.languages = vec!["de-DE".into(), "de".into()];
        cfg.device.hardware_concurrency = 4;
        cfg.device.timezone = "Europe/Berlin".into();
        cfg
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let snap = EnvSnapshot::from_config(&config());
        let msg = encode_message(&snap).unwrap();
        let body = &msg["__ENV_SYNC__"]["envSnapshot"];
        assert_eq!(body["language"], "de-DE");
        assert_eq!(body["timeZone"], "Europe/Berlin");
        assert_eq!(body["hardwareConcurrency"], 4);
        assert_eq!(body["cpu"], 4);
        assert_eq!(body["seed"], "abc123");
        assert_eq!(body["uaData"]["platform"], "Windows");
        assert_eq!(body["uaCH"]["mobile"], false);
        assert_eq!(body["highEntropy"]["uaFullVersion"], "124.0.6367.91");
        assert_eq!(decode_message(&msg).unwrap(), Some(snap));
    }

    #[test]
    fn test_decode_keeps_unknown_fields() {
        let msg = json!({ "__ENV_SYNC__": { "envSnapshot": { "seed": "s", "ua": "x", "gpuHint": 3 } } });
        let snap = decode_message(&msg).unwrap().unwrap();
        assert_eq!(snap.ua.as_deref(), Some("x"));
        assert_eq!(snap.extras["gpuHint"], 3);
        assert_eq!(decode_message(&json!({ "other": 1 })).unwrap(), None);
        assert!(decode_message(&json!({ "__ENV_SYNC__": 7 })).is_err());
    }

    #[test]
    fn test_worker_sees_defaults_until_first_message() {
        let bus = BroadcastBus::new();
        let main = EnvHub::new(bus.join());
        let worker = EnvHub::new(bus.join());

        let mirror = SnapshotMirror::new(EnvSnapshot::from_config(&SpoofConfig::with_seed("local")));
        mirror.attach(&worker);
        assert!(!mirror.has_synced());
        assert_eq!(mirror.current().seed, "local");

        let snap = EnvSnapshot::from_config(&config());
        main.publish(snap.clone()).unwrap();
        assert_eq!(main.snapshot(), Some(snap.clone()));
        // Not yet delivered.
        assert_eq!(mirror.current().seed, "local");
        assert_eq!(bus.deliver(), 1);
        assert_eq!(mirror.current(), snap);
        assert_eq!(worker.snapshot(), Some(snap));
    }

    #[test]
    fn test_sender_does_not_hear_itself_and_unsubscribe() {
        let bus = BroadcastBus::new();
        let a = EnvHub::new(bus.join());
        let b = EnvHub::new(bus.join());
        let heard = Rc::new(Cell::new(0));
        let h = Rc::clone(&heard);
        a.subscribe(move |_| h.set(h.get() + 1));
        let h = Rc::clone(&heard);
        let sub = b.subscribe(move |_| h.set(h.get() + 10));

        a.publish(EnvSnapshot::from_config(&config())).unwrap();
        bus.deliver();
        assert_eq!(heard.get(), 10);

        b.unsubscribe(sub);
        a.publish(EnvSnapshot::from_config(&config())).unwrap();
        bus.deliver();
        assert_eq!(heard.get(), 10);
    }

    #[test]
    fn test_apply_to_profile() {
        let snap = EnvSnapshot::from_config(&config());
        let mut profile = DeviceProfile::default();
        snap.apply_to(&mut profile);
        assert_eq!(profile.language, "de-DE");
        assert_eq!(profile.hardware_concurrency, 4);
        assert_eq!(profile.timezone, "Europe/Berlin");
    }
}
