//! `AnalyserNode` and `OfflineAudioContext` bindings.

use std::cell::RefCell;
use std::rc::Rc;

use futures::FutureExt;
use js_sys::{Array, Float32Array, Function, Promise, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};

use super::js_host::{install_method, js_receiver, original};
use super::proxy_helpers::{get_f64, get_method, get_prototype, invoke};
use crate::context::audio::{apply_analyser_patches, apply_offline_patches, OfflinePrototype};
use crate::context::{shared_buf, AnalyserHooks, AnalyserNodeLike, AnalyserPrototype, OfflineHooks, RenderedBuffer, SharedBuf};
use crate::error::{Result, SpoofError};
use crate::noise::AnalyserParams;
use crate::patch::{AsyncReturn, NativeFn};
use crate::runtime::SpoofRuntime;

js_receiver!(
    /// A native `AnalyserNode`.
    JsAnalyser
);

js_receiver!(
    /// A native `OfflineAudioContext`.
    JsOfflineContext
);

js_receiver!(
    /// A rendered `AudioBuffer`.
    JsAudioBuffer
);

impl AnalyserNodeLike for JsAnalyser {
    fn params(&self) -> Option<AnalyserParams> {
        Some(AnalyserParams {
            min_decibels: get_f64(&self.0, "minDecibels")?,
            max_decibels: get_f64(&self.0, "maxDecibels")?,
            smoothing: get_f64(&self.0, "smoothingTimeConstant")?,
            fft_size: get_f64(&self.0, "fftSize")? as u32,
        })
    }
}

impl RenderedBuffer for JsAudioBuffer {
    fn number_of_channels(&self) -> usize {
        get_f64(&self.0, "numberOfChannels").map_or(0, |n| n as usize)
    }

    fn channel_data(&self, channel: usize) -> Result<Vec<f32>> {
        Ok(self.channel(channel)?.to_vec())
    }

    /// Writes through `getChannelData`, which aliases the buffer's storage.
    fn set_channel_data(&self, channel: usize, data: &[f32]) -> Result<()> {
        let view = self.channel(channel)?;
        if view.length() as usize != data.len() {
            return Err(SpoofError::BufferSize {
                expected: view.length() as usize,
                got: data.len(),
            });
        }
        view.copy_from(data);
        Ok(())
    }
}

impl JsAudioBuffer {
    fn channel(&self, channel: usize) -> Result<Float32Array> {
        let f = get_method(&self.0, "getChannelData").ok_or_else(|| SpoofError::Unsupported("getChannelData".into()))?;
        Ok(invoke(&f, &self.0, &[(channel as u32).into()])?.unchecked_into())
    }
}

/// The typed arrays the analyser getters fill.
trait SampleArray: JsCast + Clone + 'static {
    type Elem: Copy + 'static;

    fn with_length(len: u32) -> Self;
    fn len(&self) -> u32;
    fn read(&self) -> Vec<Self::Elem>;
    fn write(&self, data: &[Self::Elem]);
}

macro_rules! sample_array {
    ($ty:ty, $elem:ty) => {
        impl SampleArray for $ty {
            type Elem = $elem;

            fn with_length(len: u32) -> Self {
                <$ty>::new_with_length(len)
            }

            fn len(&self) -> u32 {
                self.length()
            }

            fn read(&self) -> Vec<$elem> {
                self.to_vec()
            }

            fn write(&self, data: &[$elem]) {
                self.copy_from(data)
            }
        }
    };
}

sample_array!(Float32Array, f32);
sample_array!(Uint8Array, u8);

fn analyser_native<T: SampleArray>(name: &str, f: Function) -> NativeFn<JsAnalyser, SharedBuf<T::Elem>, ()> {
    NativeFn::new(name, move |node: &JsAnalyser, buf: SharedBuf<T::Elem>| {
        let scratch = T::with_length(buf.borrow().len() as u32);
        invoke(&f, &node.0, &[scratch.clone().into()])?;
        let filled = scratch.read();
        buf.borrow_mut().copy_from_slice(&filled);
        Ok(())
    })
}

fn install_getter<T: SampleArray>(
    proto: &JsValue,
    method: &str,
    slot: Option<NativeFn<JsAnalyser, SharedBuf<T::Elem>, ()>>,
) -> Result<bool> {
    let pending: Rc<RefCell<Option<SharedBuf<T::Elem>>>> = Rc::new(RefCell::new(None));
    let written = Rc::clone(&pending);
    install_method(
        proto,
        method,
        slot,
        move |this, args| {
            let dest = args.get(0);
            let Some(view) = dest.dyn_ref::<T>() else {
                return Err(SpoofError::host("analyser getter without a typed array"));
            };
            let buf = shared_buf(view.read());
            *pending.borrow_mut() = Some(Rc::clone(&buf));
            Ok((JsAnalyser(this.clone()), buf))
        },
        move |(), args| {
            if let Some(buf) = written.borrow_mut().take() {
                let dest: T = args.get(0).unchecked_into();
                let buf = buf.borrow();
                if dest.len() as usize == buf.len() {
                    dest.write(&buf);
                }
            }
            Ok(JsValue::UNDEFINED)
        },
    )
}

fn analyser_prototype(proto: &JsValue) -> AnalyserPrototype<JsAnalyser> {
    AnalyserPrototype {
        get_float_frequency_data: original(proto, "getFloatFrequencyData")
            .map(|f| analyser_native::<Float32Array>("getFloatFrequencyData", f)),
        get_byte_frequency_data: original(proto, "getByteFrequencyData")
            .map(|f| analyser_native::<Uint8Array>("getByteFrequencyData", f)),
        get_float_time_domain_data: original(proto, "getFloatTimeDomainData")
            .map(|f| analyser_native::<Float32Array>("getFloatTimeDomainData", f)),
        get_byte_time_domain_data: original(proto, "getByteTimeDomainData")
            .map(|f| analyser_native::<Uint8Array>("getByteTimeDomainData", f)),
    }
}

fn offline_prototype(proto: &JsValue) -> OfflinePrototype<JsOfflineContext, JsAudioBuffer> {
    OfflinePrototype {
        start_rendering: original(proto, "startRendering").map(|f| {
            NativeFn::new("startRendering", move |ctx: &JsOfflineContext, _: ()| {
                let promise = Promise::from(invoke(&f, &ctx.0, &[])?);
                Ok(AsyncReturn::Pending(
                    async move {
                        let buffer = JsFuture::from(promise).await?;
                        Ok::<_, SpoofError>(JsAudioBuffer(buffer))
                    }
                    .boxed_local(),
                ))
            })
        }),
    }
}

fn install_analyser(rt: &SpoofRuntime) -> Result<usize> {
    let Some(proto) = get_prototype("AnalyserNode") else {
        return Ok(0);
    };
    let hooks: AnalyserHooks<JsAnalyser> = rt.registry();
    let mut slots = analyser_prototype(&proto);
    if apply_analyser_patches(&mut slots, &hooks) == 0 {
        return Ok(0);
    }
    let installed = [
        install_getter::<Float32Array>(&proto, "getFloatFrequencyData", slots.get_float_frequency_data.take())?,
        install_getter::<Uint8Array>(&proto, "getByteFrequencyData", slots.get_byte_frequency_data.take())?,
        install_getter::<Float32Array>(&proto, "getFloatTimeDomainData", slots.get_float_time_domain_data.take())?,
        install_getter::<Uint8Array>(&proto, "getByteTimeDomainData", slots.get_byte_time_domain_data.take())?,
    ];
    Ok(installed.iter().filter(|i| **i).count())
}

fn install_offline(rt: &SpoofRuntime) -> Result<usize> {
    let Some(proto) = get_prototype("OfflineAudioContext") else {
        return Ok(0);
    };
    let hooks: OfflineHooks<JsOfflineContext, JsAudioBuffer> = rt.registry();
    let mut slots = offline_prototype(&proto);
    if apply_offline_patches(&mut slots, &hooks) == 0 {
        return Ok(0);
    }
    let installed = install_method(
        &proto,
        "startRendering",
        slots.start_rendering.take(),
        |this, _: &Array| Ok((JsOfflineContext(this.clone()), ())),
        |out: AsyncReturn<JsAudioBuffer>, _| {
            Ok(match out {
                AsyncReturn::Pending(pending) => future_to_promise(async move {
                    let buffer = pending.await?;
                    Ok(buffer.0)
                })
                .into(),
                AsyncReturn::Dispatched => JsValue::UNDEFINED,
            })
        },
    )?;
    Ok(usize::from(installed))
}

/// Patch the analyser getters and offline rendering. Returns the number of
/// methods replaced.
pub fn install(rt: &SpoofRuntime) -> Result<usize> {
    Ok(install_analyser(rt)? + install_offline(rt)?)
}
