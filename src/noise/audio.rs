//! Analyser and render-buffer noise.
//!
//! Spectrum and waveform perturbations work on mirrored pairs
//! `(i, n-1-i)`: whatever is added to one side is taken from the other,
//! so sums and means survive. An odd middle element is never touched.

use crate::config::AudioNoiseConfig;
use crate::rng::Stream;

/// The analyser node properties that bound its output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyserParams {
    pub min_decibels: f64,
    pub max_decibels: f64,
    pub smoothing: f64,
    pub fft_size: u32,
}

impl AnalyserParams {
    pub fn from_config(cfg: &AudioNoiseConfig) -> Self {
        Self {
            min_decibels: cfg.min_decibels,
            max_decibels: cfg.max_decibels,
            smoothing: cfg.smoothing,
            fft_size: cfg.fft_size,
        }
    }
}

/// Zero-sum paired noise for float data inside `[lo, hi]`.
///
/// The per-pair amplitude is the smaller of `base_amp` and each side's
/// distance to the nearest bound minus `tiny`.
fn paired_float_noise(data: &mut [f32], lo: f64, hi: f64, base_amp: f64, tiny: f64, stream: &Stream) {
    let n = data.len();
    if n < 2 {
        return;
    }
    let (mut i, mut j) = (0, n - 1);
    while i < j {
        let vi = f64::from(data[i]);
        let vj = f64::from(data[j]);
        let lim_i = ((vi - lo).min(hi - vi) - tiny).max(0.0);
        let lim_j = ((vj - lo).min(hi - vj) - tiny).max(0.0);
        let amp = base_amp.min(lim_i).min(lim_j);
        if amp > 0.0 {
            let d = (stream.next() - 0.5) * 2.0 * amp;
            data[i] = ((vi + d).clamp(lo, hi)) as f32;
            data[j] = ((vj - d).clamp(lo, hi)) as f32;
        }
        i += 1;
        j -= 1;
    }
}

/// `getFloatFrequencyData`: decibel bins kept inside the node's range.
pub fn perturb_float_frequency(data: &mut [f32], params: &AnalyserParams, stream: &Stream) {
    let lo = params.min_decibels;
    let hi = params.max_decibels;
    let range = (hi - lo).max(1e-9);
    let base_amp = range * params.smoothing / f64::from(params.fft_size.max(1));
    paired_float_noise(data, lo, hi, base_amp, range / 1e6, stream);
}

/// `getFloatTimeDomainData`: samples kept inside [-1, 1], amplitude scaled
/// by the buffer's own peak-to-peak span.
pub fn perturb_float_time_domain(data: &mut [f32], params: &AnalyserParams, stream: &Stream) {
    if data.is_empty() {
        return;
    }
    let (vmin, vmax) = data.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        let v = f64::from(*v);
        (lo.min(v), hi.max(v))
    });
    let span = (vmax - vmin).max(1e-9);
    let base_amp = span * params.smoothing / f64::from(params.fft_size.max(1));
    paired_float_noise(data, -1.0, 1.0, base_amp, 1e-6, stream);
}

/// `getByteFrequencyData`: independent ±1/0 steps, then the net change is
/// walked back one unit at a time from the front.
pub fn perturb_byte_frequency(data: &mut [u8], stream: &Stream) {
    let mut delta: i64 = 0;
    for v in data.iter_mut() {
        let r = stream.next();
        let d: i16 = if r < 1.0 / 3.0 {
            -1
        } else if r > 2.0 / 3.0 {
            1
        } else {
            0
        };
        let nv = i16::from(*v) + d;
        if (0..=255).contains(&nv) {
            *v = nv as u8;
            delta += i64::from(d);
        }
    }
    if delta > 0 {
        for v in data.iter_mut() {
            if delta == 0 {
                break;
            }
            if *v > 0 {
                *v -= 1;
                delta -= 1;
            }
        }
    } else if delta < 0 {
        for v in data.iter_mut() {
            if delta == 0 {
                break;
            }
            if *v < 255 {
                *v += 1;
                delta += 1;
            }
        }
    }
}

/// `getByteTimeDomainData`: paired ±1, trying the other sign when the
/// first would leave 0..=255; pairs that fit neither way are skipped.
pub fn perturb_byte_time_domain(data: &mut [u8], stream: &Stream) {
    let n = data.len();
    if n < 2 {
        return;
    }
    let fits = |v: i16| (0..=255).contains(&v);
    let (mut i, mut j) = (0, n - 1);
    while i < j {
        let vi = i16::from(data[i]);
        let vj = i16::from(data[j]);
        let first: i16 = if stream.next() < 0.5 { 1 } else { -1 };
        for s in [first, -first] {
            if fits(vi + s) && fits(vj - s) {
                data[i] = (vi + s) as u8;
                data[j] = (vj - s) as u8;
                break;
            }
        }
        i += 1;
        j -= 1;
    }
}

/// Sparse noise on one channel of a rendered offline buffer. Channel 0
/// gets a second, rarer layer.
pub fn perturb_render_channel(data: &mut [f32], channel: usize, cfg: &AudioNoiseConfig, stream: &Stream) {
    for v in data.iter_mut() {
        let mut x = f64::from(*v);
        if stream.next() < cfg.render_rate {
            x += (stream.next() - 0.5) * cfg.render_amplitude;
        }
        if channel == 0 && stream.next() < cfg.first_channel_rate {
            x += (stream.next() - 0.5) * cfg.first_channel_amplitude;
        }
        *v = x.clamp(-1.0, 1.0) as f32;
    }
}
