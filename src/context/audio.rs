//! AnalyserNode reads and OfflineAudioContext rendering.

use std::rc::Rc;

use crate::context::{PatchEnv, SharedBuf, SurfaceHooks};
use crate::error::Result;
use crate::noise::audio::{
    perturb_byte_frequency, perturb_byte_time_domain, perturb_float_frequency, perturb_float_time_domain,
    perturb_render_channel,
};
use crate::noise::{AnalyserParams, NoiseService, STREAM_AUDIO};
use crate::patch::{chain, chain_async, AsyncReturn, ChainHooks, HookList, NativeFn, Receiver, ResultHook};

/// Set on a rendered buffer once its channels carry noise.
pub const RENDER_NOISED_FLAG: &str = "__audio_noised";

pub trait AnalyserNodeLike: Receiver + 'static {
    /// The node's own bounds; `None` falls back to the configured defaults.
    fn params(&self) -> Option<AnalyserParams>;
}

/// The four analyser getters. Each fills the array it is handed.
pub struct AnalyserPrototype<N: AnalyserNodeLike> {
    pub get_float_frequency_data: Option<NativeFn<N, SharedBuf<f32>, ()>>,
    pub get_byte_frequency_data: Option<NativeFn<N, SharedBuf<u8>, ()>>,
    pub get_float_time_domain_data: Option<NativeFn<N, SharedBuf<f32>, ()>>,
    pub get_byte_time_domain_data: Option<NativeFn<N, SharedBuf<u8>, ()>>,
}

impl<N: AnalyserNodeLike> Default for AnalyserPrototype<N> {
    fn default() -> Self {
        Self {
            get_float_frequency_data: None,
            get_byte_frequency_data: None,
            get_float_time_domain_data: None,
            get_byte_time_domain_data: None,
        }
    }
}

pub struct AnalyserHooks<N: AnalyserNodeLike> {
    pub get_float_frequency_data: ChainHooks<N, SharedBuf<f32>, ()>,
    pub get_byte_frequency_data: ChainHooks<N, SharedBuf<u8>, ()>,
    pub get_float_time_domain_data: ChainHooks<N, SharedBuf<f32>, ()>,
    pub get_byte_time_domain_data: ChainHooks<N, SharedBuf<u8>, ()>,
}

impl<N: AnalyserNodeLike> Clone for AnalyserHooks<N> {
    fn clone(&self) -> Self {
        Self {
            get_float_frequency_data: self.get_float_frequency_data.clone(),
            get_byte_frequency_data: self.get_byte_frequency_data.clone(),
            get_float_time_domain_data: self.get_float_time_domain_data.clone(),
            get_byte_time_domain_data: self.get_byte_time_domain_data.clone(),
        }
    }
}

impl<N: AnalyserNodeLike> AnalyserHooks<N> {
    pub fn new() -> Self {
        Self {
            get_float_frequency_data: ChainHooks::new("AnalyserNode.getFloatFrequencyData"),
            get_byte_frequency_data: ChainHooks::new("AnalyserNode.getByteFrequencyData"),
            get_float_time_domain_data: ChainHooks::new("AnalyserNode.getFloatTimeDomainData"),
            get_byte_time_domain_data: ChainHooks::new("AnalyserNode.getByteTimeDomainData"),
        }
    }
}

impl<N: AnalyserNodeLike> Default for AnalyserHooks<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn node_params<N: AnalyserNodeLike>(node: &N, noise: &NoiseService) -> AnalyserParams {
    node.params().unwrap_or_else(|| noise.analyser_defaults())
}

impl<N: AnalyserNodeLike> SurfaceHooks for AnalyserHooks<N> {
    fn with_defaults(env: &PatchEnv) -> Self {
        let hooks = Self::new();

        let noise = Rc::clone(&env.noise);
        hooks.get_float_frequency_data.post.add(move |node, _, buf| {
            let params = node_params(node, &noise);
            perturb_float_frequency(&mut buf.borrow_mut(), &params, &noise.stream(STREAM_AUDIO));
            Ok(None)
        });

        let noise = Rc::clone(&env.noise);
        hooks.get_byte_frequency_data.post.add(move |_, _, buf| {
            perturb_byte_frequency(&mut buf.borrow_mut(), &noise.stream(STREAM_AUDIO));
            Ok(None)
        });

        let noise = Rc::clone(&env.noise);
        hooks.get_float_time_domain_data.post.add(move |node, _, buf| {
            let params = node_params(node, &noise);
            perturb_float_time_domain(&mut buf.borrow_mut(), &params, &noise.stream(STREAM_AUDIO));
            Ok(None)
        });

        let noise = Rc::clone(&env.noise);
        hooks.get_byte_time_domain_data.post.add(move |_, _, buf| {
            perturb_byte_time_domain(&mut buf.borrow_mut(), &noise.stream(STREAM_AUDIO));
            Ok(None)
        });
        hooks
    }

    fn hook_count(&self) -> usize {
        self.get_float_frequency_data.post.len()
            + self.get_byte_frequency_data.post.len()
            + self.get_float_time_domain_data.post.len()
            + self.get_byte_time_domain_data.post.len()
            + self.get_float_frequency_data.pre.len()
            + self.get_byte_frequency_data.pre.len()
            + self.get_float_time_domain_data.pre.len()
            + self.get_byte_time_domain_data.pre.len()
    }
}

pub fn apply_analyser_patches<N: AnalyserNodeLike>(proto: &mut AnalyserPrototype<N>, hooks: &AnalyserHooks<N>) -> usize {
    let outcomes = [
        chain(&mut proto.get_float_frequency_data, &hooks.get_float_frequency_data),
        chain(&mut proto.get_byte_frequency_data, &hooks.get_byte_frequency_data),
        chain(&mut proto.get_float_time_domain_data, &hooks.get_float_time_domain_data),
        chain(&mut proto.get_byte_time_domain_data, &hooks.get_byte_time_domain_data),
    ];
    let applied = outcomes.iter().filter(|o| o.is_applied()).count();
    log::info!("[audio] analyser patches: applied {} of {}", applied, outcomes.len());
    applied
}

/// An `AudioBuffer` produced by offline rendering. Handles share the
/// underlying channel storage.
pub trait RenderedBuffer: Receiver + Clone + 'static {
    fn number_of_channels(&self) -> usize;
    fn channel_data(&self, channel: usize) -> Result<Vec<f32>>;
    fn set_channel_data(&self, channel: usize, data: &[f32]) -> Result<()>;
}

/// Add render noise to every channel of `buffer`, once per buffer.
pub fn noise_rendered_buffer<B: RenderedBuffer>(buffer: &B, noise: &NoiseService) -> Result<()> {
    if buffer.flag_is_set(RENDER_NOISED_FLAG) {
        return Ok(());
    }
    let stream = noise.stream(STREAM_AUDIO);
    for ch in 0..buffer.number_of_channels() {
        let mut data = buffer.channel_data(ch)?;
        perturb_render_channel(&mut data, ch, noise.audio_config(), &stream);
        buffer.set_channel_data(ch, &data)?;
    }
    buffer.set_flag(RENDER_NOISED_FLAG, true);
    Ok(())
}

pub struct OfflinePrototype<C: Receiver + Clone + 'static, B: RenderedBuffer> {
    pub start_rendering: Option<NativeFn<C, (), AsyncReturn<B>>>,
}

impl<C: Receiver + Clone + 'static, B: RenderedBuffer> Default for OfflinePrototype<C, B> {
    fn default() -> Self {
        Self { start_rendering: None }
    }
}

pub struct OfflineHooks<C: Receiver + Clone + 'static, B: RenderedBuffer> {
    pub start_rendering: HookList<ResultHook<C, (), B>>,
}

impl<C: Receiver + Clone + 'static, B: RenderedBuffer> Clone for OfflineHooks<C, B> {
    fn clone(&self) -> Self {
        Self {
            start_rendering: self.start_rendering.clone(),
        }
    }
}

impl<C: Receiver + Clone + 'static, B: RenderedBuffer> OfflineHooks<C, B> {
    pub fn new() -> Self {
        Self {
            start_rendering: HookList::new("OfflineAudioContext.startRendering"),
        }
    }
}

impl<C: Receiver + Clone + 'static, B: RenderedBuffer> Default for OfflineHooks<C, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Receiver + Clone + 'static, B: RenderedBuffer> SurfaceHooks for OfflineHooks<C, B> {
    fn with_defaults(env: &PatchEnv) -> Self {
        let hooks = Self::new();
        let noise = Rc::clone(&env.noise);
        hooks.start_rendering.add(move |_, buffer, _| {
            noise_rendered_buffer(buffer, &noise)?;
            Ok(None)
        });
        hooks
    }

    fn hook_count(&self) -> usize {
        self.start_rendering.len()
    }
}

pub fn apply_offline_patches<C: Receiver + Clone + 'static, B: RenderedBuffer>(
    proto: &mut OfflinePrototype<C, B>,
    hooks: &OfflineHooks<C, B>,
) -> usize {
    let applied = usize::from(chain_async(&mut proto.start_rendering, &hooks.start_rendering).is_applied());
    log::info!("[audio] offline rendering patches: applied {} of 1", applied);
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpoofConfig;
    use crate::context::shared_buf;
    use crate::error::SpoofError;
    use crate::patch::GuardFlags;
    use futures::executor::block_on;
    use futures::FutureExt;
    use std::cell::RefCell;

    struct Node {
        flags: GuardFlags,
        params: Option<AnalyserParams>,
    }

    impl Receiver for Node {
        fn flag_is_set(&self, flag: &str) -> bool {
            self.flags.contains(flag)
        }
        fn set_flag(&self, flag: &str, on: bool) {
            self.flags.set(flag, on)
        }
    }

    impl AnalyserNodeLike for Node {
        fn params(&self) -> Option<AnalyserParams> {
            self.params
        }
    }

    fn env() -> PatchEnv {
        PatchEnv::new(SpoofConfig::with_seed("abc123")).unwrap()
    }

    fn spectrum() -> Vec<f32> {
        (0..64).map(|i| -95.0 + (i as f32 * 3.1) % 60.0).collect()
    }

    fn analyser_proto() -> AnalyserPrototype<Node> {
        AnalyserPrototype {
            get_float_frequency_data: Some(NativeFn::new("getFloatFrequencyData", |_: &Node, buf: SharedBuf<f32>| {
                buf.borrow_mut().copy_from_slice(&spectrum());
                Ok(())
            })),
            get_byte_frequency_data: Some(NativeFn::new("getByteFrequencyData", |_: &Node, buf: SharedBuf<u8>| {
                for (i, v) in buf.borrow_mut().iter_mut().enumerate() {
                    *v = (i * 7 % 256) as u8;
                }
                Ok(())
            })),
            get_float_time_domain_data: None,
            get_byte_time_domain_data: None,
        }
    }

    #[test]
    fn test_analyser_reads_keep_pair_sums() {
        let hooks = AnalyserHooks::with_defaults(&env());
        let mut proto = analyser_proto();
        assert_eq!(apply_analyser_patches(&mut proto, &hooks), 2);

        let node = Node { flags: GuardFlags::new(), params: None };
        let buf = shared_buf(vec![0.0f32; 64]);
        proto
            .get_float_frequency_data
            .as_ref()
            .unwrap()
            .call(&node, Rc::clone(&buf))
            .unwrap();
        let before = spectrum();
        let after = buf.borrow().clone();
        assert_ne!(after, before);
        for i in 0..32 {
            let s0 = f64::from(before[i]) + f64::from(before[63 - i]);
            let s1 = f64::from(after[i]) + f64::from(after[63 - i]);
            assert!((s0 - s1).abs() < 1e-4);
        }
        assert!(after.iter().all(|v| (-100.0..=-30.0).contains(&f64::from(*v))));

        let bytes = shared_buf(vec![0u8; 300]);
        proto
            .get_byte_frequency_data
            .as_ref()
            .unwrap()
            .call(&node, Rc::clone(&bytes))
            .unwrap();
        let native: u32 = (0..300).map(|i| (i * 7 % 256) as u32).sum();
        assert_eq!(bytes.borrow().iter().map(|v| u32::from(*v)).sum::<u32>(), native);
    }

    #[test]
    fn test_node_bounds_override_defaults() {
        let hooks = AnalyserHooks::with_defaults(&env());
        let mut proto = analyser_proto();
        apply_analyser_patches(&mut proto, &hooks);
        let node = Node {
            flags: GuardFlags::new(),
            params: Some(AnalyserParams { min_decibels: -95.0, max_decibels: -36.0, smoothing: 0.9, fft_size: 32 }),
        };
        let buf = shared_buf(vec![0.0f32; 64]);
        for _ in 0..20 {
            proto
                .get_float_frequency_data
                .as_ref()
                .unwrap()
                .call(&node, Rc::clone(&buf))
                .unwrap();
            assert!(buf.borrow().iter().all(|v| (-95.0..=-36.0).contains(&f64::from(*v))));
        }
    }

    struct BufInner {
        flags: GuardFlags,
        channels: RefCell<Vec<Vec<f32>>>,
    }

    #[derive(Clone)]
    struct Buffer(Rc<BufInner>);

    impl Receiver for Buffer {
        fn flag_is_set(&self, flag: &str) -> bool {
            self.0.flags.contains(flag)
        }
        fn set_flag(&self, flag: &str, on: bool) {
            self.0.flags.set(flag, on)
        }
    }

    impl RenderedBuffer for Buffer {
        fn number_of_channels(&self) -> usize {
            self.0.channels.borrow().len()
        }
        fn channel_data(&self, channel: usize) -> Result<Vec<f32>> {
            self.0
                .channels
                .borrow()
                .get(channel)
                .cloned()
                .ok_or_else(|| SpoofError::host("no such channel"))
        }
        fn set_channel_data(&self, channel: usize, data: &[f32]) -> Result<()> {
            self.0.channels.borrow_mut()[channel] = data.to_vec();
            Ok(())
        }
    }

    #[derive(Clone)]
    struct Offline {
        flags: Rc<GuardFlags>,
        rendered: Buffer,
    }

    impl Receiver for Offline {
        fn flag_is_set(&self, flag: &str) -> bool {
            self.flags.contains(flag)
        }
        fn set_flag(&self, flag: &str, on: bool) {
            self.flags.set(flag, on)
        }
    }

    #[test]
    fn test_rendering_noised_once() {
        let hooks = OfflineHooks::with_defaults(&env());
        let mut proto: OfflinePrototype<Offline, Buffer> = OfflinePrototype {
            start_rendering: Some(NativeFn::new("startRendering", |ctx: &Offline, _: ()| {
                let buf = ctx.rendered.clone();
                Ok(AsyncReturn::Pending(async move { Ok::<Buffer, SpoofError>(buf) }.boxed_local()))
            })),
        };
        assert_eq!(apply_offline_patches(&mut proto, &hooks), 1);

        let silent = vec![0.0f32; 2048];
        let ctx = Offline {
            flags: Rc::new(GuardFlags::new()),
            rendered: Buffer(Rc::new(BufInner {
                flags: GuardFlags::new(),
                channels: RefCell::new(vec![silent.clone(), silent.clone()]),
            })),
        };
        let start = proto.start_rendering.as_ref().unwrap();
        let first = match start.call(&ctx, ()).unwrap() {
            AsyncReturn::Pending(fut) => block_on(fut).unwrap(),
            AsyncReturn::Dispatched => panic!("promise form expected"),
        };
        let ch0 = first.channel_data(0).unwrap();
        assert_ne!(ch0, silent);
        assert!(ch0.iter().all(|v| (-1.0..=1.0).contains(v)));

        // Same buffer resolved again: no second layer of noise.
        if let AsyncReturn::Pending(fut) = start.call(&ctx, ()).unwrap() {
            block_on(fut).unwrap();
        }
        assert_eq!(first.channel_data(0).unwrap(), ch0);
    }
}
