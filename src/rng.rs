//! Seed-derived named random streams.
//!
//! Every random value used by the masking layer comes from one seed string
//! plus a textual key. There is no entropy source: the same seed reproduces
//! the same streams after a reload or in a freshly spawned worker.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rand::RngCore;

use crate::error::{Result, SpoofError};

const DJB2_INIT: u32 = 5381;
const MULBERRY_INCREMENT: u32 = 0x6D2B_79F5;
const TWO_POW_32: f64 = 4_294_967_296.0;

/// Order-sensitive rolling hash (djb2) over UTF-16 code units.
///
/// Code units rather than bytes so the hash of a string agrees with the
/// value a page script would compute for it.
pub fn str_to_seed(s: &str) -> u32 {
    s.encode_utf16().fold(DJB2_INIT, |h, unit| {
        h.wrapping_mul(33).wrapping_add(u32::from(unit))
    })
}

/// Mulberry32: a 32-bit mix-based generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Next raw 32-bit output.
    #[inline]
    pub fn next_raw(&mut self) -> u32 {
        self.state = self.state.wrapping_add(MULBERRY_INCREMENT);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    /// Next float, uniform in [0, 1).
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_raw()) / TWO_POW_32
    }
}

/// Lets code built on `rand` draw from a seeded stream, for example
/// `rand::Rng::gen_range` or `SliceRandom::shuffle`. The crate's own noise
/// paths read `next_f64` directly so their outputs stay fixed.
impl RngCore for Mulberry32 {
    fn next_u32(&mut self) -> u32 {
        self.next_raw()
    }

    fn next_u64(&mut self) -> u64 {
        let hi = u64::from(self.next_raw());
        let lo = u64::from(self.next_raw());
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let word = self.next_raw().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

fn require_seed(seed: &str) -> Result<()> {
    if seed.is_empty() {
        return Err(SpoofError::MissingSeed);
    }
    Ok(())
}

/// A bound, shareable handle to one named generator.
///
/// Clones share position: drawing from one clone advances the others.
#[derive(Debug, Clone)]
pub struct Stream {
    name: Rc<str>,
    rng: Rc<RefCell<Mulberry32>>,
}

impl Stream {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next float in [0, 1).
    pub fn next(&self) -> f64 {
        self.rng.borrow_mut().next_f64()
    }

    /// Next float in [lo, hi).
    pub fn range(&self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next()
    }
}

/// Derive a fresh generator for `(seed, name)`.
///
/// The material hashed is `seed + "|" + name`, so two names never collide
/// unless their strings do.
pub fn derive_stream(seed: &str, name: &str) -> Result<Stream> {
    require_seed(seed)?;
    let material = format!("{seed}|{name}");
    Ok(Stream {
        name: Rc::from(name),
        rng: Rc::new(RefCell::new(Mulberry32::new(str_to_seed(&material)))),
    })
}

/// Lazily populated registry of named streams for one realm.
#[derive(Debug)]
pub struct StreamRegistry {
    seed: RefCell<Rc<str>>,
    streams: RefCell<HashMap<String, Stream>>,
}

impl StreamRegistry {
    /// Fails with `MissingSeed` when `seed` is empty.
    pub fn new(seed: impl Into<String>) -> Result<Self> {
        let seed = seed.into();
        require_seed(&seed)?;
        Ok(Self {
            seed: RefCell::new(Rc::from(seed)),
            streams: RefCell::new(HashMap::new()),
        })
    }

    pub fn seed(&self) -> Rc<str> {
        Rc::clone(&self.seed.borrow())
    }

    /// Switch to `seed` and drop every cached stream. Fails with
    /// `MissingSeed`, leaving the registry as it was, when `seed` is empty.
    pub fn reseed(&self, seed: &str) -> Result<()> {
        require_seed(seed)?;
        *self.seed.borrow_mut() = Rc::from(seed);
        self.reset(None);
        Ok(())
    }

    /// Bound handle for repeated local draws.
    pub fn use_stream(&self, name: &str) -> Stream {
        let mut streams = self.streams.borrow_mut();
        if let Some(stream) = streams.get(name) {
            return stream.clone();
        }
        let material = format!("{}|{}", self.seed.borrow(), name);
        let stream = Stream {
            name: Rc::from(name),
            rng: Rc::new(RefCell::new(Mulberry32::new(str_to_seed(&material)))),
        };
        streams.insert(name.to_string(), stream.clone());
        stream
    }

    /// One draw from the named stream.
    pub fn next(&self, name: &str) -> f64 {
        self.use_stream(name).next()
    }

    /// Drop cached state for one stream, or for all of them.
    ///
    /// Handles obtained before the reset keep their old position; the next
    /// `use_stream` re-derives from the initial state.
    pub fn reset(&self, name: Option<&str>) {
        let mut streams = self.streams.borrow_mut();
        match name {
            Some(name) => {
                streams.remove(name);
            }
            None => streams.clear(),
        }
    }

    /// Keyed sample; see [`stable_noise`].
    pub fn stable(&self, key: &str, lo: f64, hi: f64) -> f64 {
        stable_noise(&self.seed.borrow(), key, lo, hi)
    }
}

/// Deterministic keyed sample in [lo, hi).
///
/// The same `(seed, key)` always maps to the same value no matter how often
/// or in which order it is asked for.
pub fn stable_noise(seed: &str, key: &str, lo: f64, hi: f64) -> f64 {
    let material = format!("seed:{seed}|key:{key}");
    let u = Mulberry32::new(str_to_seed(&material)).next_f64();
    lo + (hi - lo) * u
}
