// Automatic global thresholding from a 256 bin histogram.
//
// Every method maps a histogram to a level `k`; voxels whose bin is above
// `k` are foreground. Bins span the finite intensity range of the whole
// stack, so the level converts back to the intensity
// `min + (k + 1) * (max - min) / 256`.

use clap::ValueEnum;
use itertools::Itertools;
use log::warn;
use std::fmt;

use crate::voxels::VoxelGrid;

pub const NBINS: usize = 256;

const EPSILON: f64 = 2.220446049250313e-16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, ValueEnum)]
pub enum ThresholdMethod {
    Default,
    Huang,
    #[value(name = "huang2")]
    Huang2,
    Intermodes,
    #[value(name = "isodata")]
    IsoData,
    Li,
    #[value(name = "maxentropy")]
    MaxEntropy,
    Mean,
    #[value(name = "minerror")]
    MinError,
    Minimum,
    Moments,
    Otsu,
    Percentile,
    #[value(name = "renyientropy")]
    RenyiEntropy,
    Shanbhag,
    Triangle,
    Yen,
}

impl ThresholdMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ThresholdMethod::Default => "Default",
            ThresholdMethod::Huang => "Huang",
            ThresholdMethod::Huang2 => "Huang2",
            ThresholdMethod::Intermodes => "Intermodes",
            ThresholdMethod::IsoData => "IsoData",
            ThresholdMethod::Li => "Li",
            ThresholdMethod::MaxEntropy => "MaxEntropy",
            ThresholdMethod::Mean => "Mean",
            ThresholdMethod::MinError => "MinError",
            ThresholdMethod::Minimum => "Minimum",
            ThresholdMethod::Moments => "Moments",
            ThresholdMethod::Otsu => "Otsu",
            ThresholdMethod::Percentile => "Percentile",
            ThresholdMethod::RenyiEntropy => "RenyiEntropy",
            ThresholdMethod::Shanbhag => "Shanbhag",
            ThresholdMethod::Triangle => "Triangle",
            ThresholdMethod::Yen => "Yen",
        }
    }

    /// Threshold level for a histogram, or None when the method finds none.
    pub fn level(&self, histogram: &[u64; NBINS]) -> Option<usize> {
        let data: Vec<f64> = histogram.iter().map(|&c| c as f64).collect();
        if data.iter().sum::<f64>() == 0.0 {
            return None;
        }

        let level = match self {
            ThresholdMethod::Default => Some(ij_isodata(&data)),
            ThresholdMethod::Huang => Some(huang(&data)),
            ThresholdMethod::Huang2 => Some(huang2(&data)),
            ThresholdMethod::Intermodes => intermodes(&data),
            ThresholdMethod::IsoData => isodata(&data),
            ThresholdMethod::Li => Some(li(&data)),
            ThresholdMethod::MaxEntropy => max_entropy(&data),
            ThresholdMethod::Mean => Some(mean(&data)),
            ThresholdMethod::MinError => Some(min_error(&data)),
            ThresholdMethod::Minimum => minimum(&data),
            ThresholdMethod::Moments => moments(&data),
            ThresholdMethod::Otsu => Some(otsu(&data)),
            ThresholdMethod::Percentile => percentile(&data),
            ThresholdMethod::RenyiEntropy => renyi_entropy(&data),
            ThresholdMethod::Shanbhag => shanbhag(&data),
            ThresholdMethod::Triangle => Some(triangle(&data)),
            ThresholdMethod::Yen => yen(&data),
        };

        level.map(|k| k.clamp(0, NBINS as i64 - 1) as usize)
    }
}

impl fmt::Display for ThresholdMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Debug)]
pub struct Histogram {
    pub counts: [u64; NBINS],
    pub min: f32,
    pub max: f32,
}

impl Histogram {
    /// None when the grid has no finite sample or zero dynamic range.
    pub fn from_grid(grid: &VoxelGrid) -> Option<Histogram> {
        let (min, max) = grid.intensity_range()?;
        if min >= max {
            return None;
        }

        let mut hist = Histogram {
            counts: [0; NBINS],
            min,
            max,
        };
        for &v in grid.data().iter().filter(|v| v.is_finite()) {
            hist.counts[hist.bin(v)] += 1;
        }
        Some(hist)
    }

    fn bin_width(&self) -> f64 {
        (self.max as f64 - self.min as f64) / NBINS as f64
    }

    pub fn bin(&self, v: f32) -> usize {
        let b = ((v as f64 - self.min as f64) / self.bin_width()).floor();
        (b.max(0.0) as usize).min(NBINS - 1)
    }

    /// Smallest intensity whose bin lies above `level`.
    pub fn level_to_value(&self, level: usize) -> f32 {
        if level >= NBINS - 1 {
            return f32::INFINITY;
        }
        (self.min as f64 + (level + 1) as f64 * self.bin_width()) as f32
    }
}

/// Intensity cutoff for `grid`: samples at or above it are foreground.
/// A grid without dynamic range gets a cutoff above every sample.
pub fn threshold_value(grid: &VoxelGrid, method: ThresholdMethod) -> f32 {
    let Some(hist) = Histogram::from_grid(grid) else {
        return f32::INFINITY;
    };
    match method.level(&hist.counts) {
        Some(level) => hist.level_to_value(level),
        None => {
            warn!("{} threshold not found, channel left empty", method);
            f32::INFINITY
        }
    }
}

// sum of data[0..=j]
fn partial_sum(data: &[f64], j: usize) -> f64 {
    data[..=j].iter().sum()
}

fn first_nonzero(data: &[f64]) -> Option<usize> {
    data.iter().position(|&c| c > 0.0)
}

fn last_nonzero(data: &[f64]) -> Option<usize> {
    data.iter().rposition(|&c| c > 0.0)
}

// Iterative intermeans, ignoring the two extreme bins.
fn ij_isodata(data: &[f64]) -> i64 {
    let mut data = data.to_vec();
    let max_value = data.len() - 1;
    data[0] = 0.0;
    data[max_value] = 0.0;

    let (Some(min), Some(max)) = (first_nonzero(&data), last_nonzero(&data)) else {
        return (data.len() / 2) as i64;
    };
    if min >= max {
        return (data.len() / 2) as i64;
    }

    let mut moving = min;
    let mut result;
    loop {
        let (mut sum1, mut sum2, mut sum3, mut sum4) = (0.0, 0.0, 0.0, 0.0);
        for (i, &c) in data.iter().enumerate().take(moving + 1).skip(min) {
            sum1 += i as f64 * c;
            sum2 += c;
        }
        for (i, &c) in data.iter().enumerate().take(max + 1).skip(moving + 1) {
            sum3 += i as f64 * c;
            sum4 += c;
        }
        result = (sum1 / sum2 + sum3 / sum4) / 2.0;
        moving += 1;
        if !((moving + 1) as f64 <= result && moving < max - 1) {
            break;
        }
    }
    result.round() as i64
}

// Fuzzy thresholding: each bin belongs to the mean of its class with a
// membership that decays with the distance to that mean; the level
// minimizes the Shannon entropy of the memberships.
fn huang(data: &[f64]) -> i64 {
    let (Some(first), Some(last)) = (first_nonzero(data), last_nonzero(data)) else {
        return 0;
    };
    if first == last {
        return first as i64;
    }
    let n = data.len();
    let term = 1.0 / (last - first) as f64;

    // mean of the bins up to and including `it`
    let mut mu_0 = vec![0.0; n];
    let (mut sum_pix, mut num_pix) = (0.0, 0.0);
    for ih in first..n {
        sum_pix += ih as f64 * data[ih];
        num_pix += data[ih];
        mu_0[ih] = sum_pix / num_pix;
    }

    // mean of the bins above `it`
    let mut mu_1 = vec![0.0; n];
    let (mut sum_pix, mut num_pix) = (0.0, 0.0);
    for ih in (1..=last).rev() {
        sum_pix += ih as f64 * data[ih];
        num_pix += data[ih];
        mu_1[ih - 1] = sum_pix / num_pix;
    }

    let membership_entropy = |ih: usize, mean: f64| {
        let mu = 1.0 / (1.0 + term * (ih as f64 - mean).abs());
        if !(1e-6..=0.999999).contains(&mu) {
            return 0.0;
        }
        -mu * mu.ln() - (1.0 - mu) * (1.0 - mu).ln()
    };

    let mut threshold = 0;
    let mut min_entropy = f64::MAX;
    for it in 0..n {
        let entropy: f64 = data
            .iter()
            .enumerate()
            .map(|(ih, &c)| {
                let mean = if ih <= it { mu_0[it] } else { mu_1[it] };
                c * membership_entropy(ih, mean)
            })
            .sum();
        if entropy < min_entropy {
            min_entropy = entropy;
            threshold = it;
        }
    }
    threshold as i64
}

// Same criterion on the occupied range only, with class means rounded to a
// bin and the membership entropies tabulated by distance.
fn huang2(data: &[f64]) -> i64 {
    let (Some(first), Some(last)) = (first_nonzero(data), last_nonzero(data)) else {
        return 0;
    };
    if first == last {
        return first as i64;
    }

    let mut s = vec![0.0; last + 1];
    let mut w = vec![0.0; last + 1];
    s[first] = data[first];
    w[first] = first as f64 * data[first];
    for i in (first + 1)..=last {
        s[i] = s[i - 1] + data[i];
        w[i] = w[i - 1] + i as f64 * data[i];
    }

    let c = (last - first) as f64;
    let mut smu = vec![0.0; last + 1 - first];
    for (i, v) in smu.iter_mut().enumerate().skip(1) {
        let mu = 1.0 / (1.0 + i as f64 / c);
        *v = -mu * mu.ln() - (1.0 - mu) * (1.0 - mu).ln();
    }

    let mut best = first;
    let mut best_entropy = f64::MAX;
    for t in first..=last {
        let mut entropy = 0.0;
        let mu = (w[t] / s[t]).round() as i64;
        for (i, &c) in data.iter().enumerate().take(t + 1).skip(first) {
            entropy += smu[(i as i64 - mu).unsigned_abs() as usize] * c;
        }
        if t < last {
            let mu = ((w[last] - w[t]) / (s[last] - s[t])).round() as i64;
            for (i, &c) in data.iter().enumerate().take(last + 1).skip(t + 1) {
                entropy += smu[(i as i64 - mu).unsigned_abs() as usize] * c;
            }
        }
        if entropy < best_entropy {
            best_entropy = entropy;
            best = t;
        }
    }
    best as i64
}

fn local_maxima(hist: &[f64]) -> impl Iterator<Item = usize> + '_ {
    hist.iter()
        .tuple_windows()
        .positions(|(prev, v, next)| prev < v && next < v)
        .map(|i| i + 1)
}

fn is_bimodal(hist: &[f64]) -> bool {
    local_maxima(hist).take(3).count() == 2
}

const MAX_SMOOTHING_PASSES: usize = 10000;

// Smooth until exactly two peaks remain, then take their midpoint.
fn intermodes(data: &[f64]) -> Option<i64> {
    let n = data.len();
    let mut hist = data.to_vec();
    let mut passes = 0;
    while !is_bimodal(&hist) {
        let (mut previous, mut current, mut next) = (0.0, 0.0, hist[0]);
        for i in 0..n - 1 {
            previous = current;
            current = next;
            next = hist[i + 1];
            hist[i] = (previous + current + next) / 3.0;
        }
        hist[n - 1] = (current + next) / 3.0;
        passes += 1;
        if passes > MAX_SMOOTHING_PASSES {
            return None;
        }
    }
    let peaks: usize = local_maxima(&hist).sum();
    Some((peaks as f64 / 2.0).floor() as i64)
}

// Smooth until exactly two peaks remain, then take the valley between them.
fn minimum(data: &[f64]) -> Option<i64> {
    let n = data.len();
    let max = last_nonzero(data)?;
    let mut hist = data.to_vec();
    let mut smoothed = vec![0.0; n];
    let mut passes = 0;
    while !is_bimodal(&hist) {
        for i in 1..n - 1 {
            smoothed[i] = (hist[i - 1] + hist[i] + hist[i + 1]) / 3.0;
        }
        smoothed[0] = (hist[0] + hist[1]) / 3.0;
        smoothed[n - 1] = (hist[n - 2] + hist[n - 1]) / 3.0;
        hist.copy_from_slice(&smoothed);
        passes += 1;
        if passes > MAX_SMOOTHING_PASSES {
            return None;
        }
    }
    (1..max)
        .find(|&i| hist[i - 1] > hist[i] && hist[i + 1] >= hist[i])
        .map(|i| i as i64)
}

// Ridler & Calvard intermeans.
fn isodata(data: &[f64]) -> Option<i64> {
    let n = data.len();
    let mut g = (1..n).find(|&i| data[i] > 0.0).map(|i| i + 1)?;
    loop {
        let (mut l, mut totl) = (0u64, 0u64);
        for (i, &c) in data.iter().enumerate().take(g + 1) {
            totl += c as u64;
            l += c as u64 * i as u64;
        }
        let (mut h, mut toth) = (0u64, 0u64);
        for (i, &c) in data.iter().enumerate().skip(g + 1) {
            toth += c as u64;
            h += c as u64 * i as u64;
        }
        if totl > 0 && toth > 0 {
            let (l, h) = (l / totl, h / toth);
            if g as i64 == ((l + h) as f64 / 2.0).round() as i64 {
                return Some(g as i64);
            }
        }
        g += 1;
        if g > n - 2 {
            return None;
        }
    }
}

// Minimum cross entropy, iterative form.
fn li(data: &[f64]) -> i64 {
    let total: f64 = data.iter().sum();
    let mean = data.iter().enumerate().map(|(i, &c)| i as f64 * c).sum::<f64>() / total;

    let mut new_thresh = mean;
    let mut threshold;
    let mut iterations = 0;
    loop {
        let old_thresh = new_thresh;
        threshold = ((old_thresh + 0.5) as i64).clamp(0, data.len() as i64 - 1) as usize;

        let (back, obj) = data.split_at(threshold + 1);
        let mean_of = |part: &[f64], offset: usize| {
            let n: f64 = part.iter().sum();
            if n == 0.0 {
                0.0
            } else {
                part.iter()
                    .enumerate()
                    .map(|(i, &c)| (i + offset) as f64 * c)
                    .sum::<f64>()
                    / n
            }
        };
        let mean_back = mean_of(back, 0);
        let mean_obj = mean_of(obj, threshold + 1);

        let temp = (mean_back - mean_obj) / (mean_back.ln() - mean_obj.ln());
        new_thresh = if temp < -EPSILON {
            (temp - 0.5).trunc()
        } else {
            (temp + 0.5).trunc()
        };

        iterations += 1;
        if !((new_thresh - old_thresh).abs() > 0.5) || iterations > 1000 {
            break;
        }
    }
    threshold as i64
}

struct Cumulative {
    norm: Vec<f64>,
    p1: Vec<f64>,
    p2: Vec<f64>,
    first: usize,
    last: usize,
}

impl Cumulative {
    fn new(data: &[f64]) -> Cumulative {
        let total: f64 = data.iter().sum();
        let norm: Vec<f64> = data.iter().map(|&c| c / total).collect();
        let mut p1 = Vec::with_capacity(norm.len());
        let mut acc = 0.0;
        for &v in &norm {
            acc += v;
            p1.push(acc);
        }
        let p2: Vec<f64> = p1.iter().map(|&p| 1.0 - p).collect();

        let first = p1.iter().position(|&p| p.abs() >= EPSILON).unwrap_or(0);
        let last = (first..norm.len())
            .rev()
            .find(|&i| p2[i].abs() >= EPSILON)
            .unwrap_or(norm.len() - 1);

        Cumulative {
            norm,
            p1,
            p2,
            first,
            last,
        }
    }
}

// Kapur, Sahoo & Wong maximum entropy.
fn max_entropy(data: &[f64]) -> Option<i64> {
    let cum = Cumulative::new(data);
    max_entropy_level(data, &cum)
}

fn max_entropy_level(data: &[f64], cum: &Cumulative) -> Option<i64> {
    let mut threshold = None;
    let mut max_ent = f64::MIN_POSITIVE;
    for it in cum.first..=cum.last {
        let mut ent_back = 0.0;
        for ih in 0..=it {
            if data[ih] != 0.0 {
                let p = cum.norm[ih] / cum.p1[it];
                ent_back -= p * p.ln();
            }
        }
        let mut ent_obj = 0.0;
        for ih in (it + 1)..data.len() {
            if data[ih] != 0.0 {
                let p = cum.norm[ih] / cum.p2[it];
                ent_obj -= p * p.ln();
            }
        }
        let tot_ent = ent_back + ent_obj;
        if max_ent < tot_ent {
            max_ent = tot_ent;
            threshold = Some(it as i64);
        }
    }
    threshold
}

fn mean(data: &[f64]) -> i64 {
    let (tot, sum) = data
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(tot, sum), (i, &c)| (tot + i as f64 * c, sum + c));
    (tot / sum).floor() as i64
}

// Kittler & Illingworth minimum error, iterative form seeded with the mean.
fn min_error(data: &[f64]) -> i64 {
    let n = data.len() - 1;
    let a = |j: usize| partial_sum(data, j);
    let b = |j: usize| data[..=j].iter().enumerate().map(|(i, &c)| i as f64 * c).sum::<f64>();
    let c = |j: usize| {
        data[..=j]
            .iter()
            .enumerate()
            .map(|(i, &c)| (i * i) as f64 * c)
            .sum::<f64>()
    };

    let mut threshold = mean(data);
    let mut previous = -2;
    let mut iterations = 0;
    while threshold != previous && iterations < 1000 {
        iterations += 1;
        let t = threshold.clamp(0, n as i64) as usize;
        let mu = b(t) / a(t);
        let nu = (b(n) - b(t)) / (a(n) - a(t));
        let p = a(t) / a(n);
        let q = (a(n) - a(t)) / a(n);
        let sigma2 = c(t) / a(t) - mu * mu;
        let tau2 = (c(n) - c(t)) / (a(n) - a(t)) - nu * nu;

        let w0 = 1.0 / sigma2 - 1.0 / tau2;
        let w1 = mu / sigma2 - nu / tau2;
        let w2 = (mu * mu) / sigma2 - (nu * nu) / tau2 + ((sigma2 * q * q) / (tau2 * p * p)).log10();

        let sqterm = w1 * w1 - w0 * w2;
        if sqterm < 0.0 {
            warn!("MinError threshold not converging");
            break;
        }

        previous = threshold;
        let temp = (w1 + sqterm.sqrt()) / w0;
        if temp.is_nan() {
            warn!("MinError threshold not converging");
            threshold = previous;
        } else {
            threshold = temp.floor() as i64;
        }
    }
    threshold
}

// Tsai moment preserving.
fn moments(data: &[f64]) -> Option<i64> {
    let total: f64 = data.iter().sum();
    let histo: Vec<f64> = data.iter().map(|&c| c / total).collect();

    let m0 = 1.0;
    let (mut m1, mut m2, mut m3) = (0.0, 0.0, 0.0);
    for (i, &h) in histo.iter().enumerate() {
        let di = i as f64;
        m1 += di * h;
        m2 += di * di * h;
        m3 += di * di * di * h;
    }

    let cd = m0 * m2 - m1 * m1;
    let c0 = (-m2 * m2 + m1 * m3) / cd;
    let c1 = (m0 * -m3 + m2 * m1) / cd;
    let z0 = 0.5 * (-c1 - (c1 * c1 - 4.0 * c0).sqrt());
    let z1 = 0.5 * (-c1 + (c1 * c1 - 4.0 * c0).sqrt());
    let p0 = (z1 - m1) / (z1 - z0);

    let mut sum = 0.0;
    for (i, &h) in histo.iter().enumerate() {
        sum += h;
        if sum > p0 {
            return Some(i as i64);
        }
    }
    None
}

// Otsu between-class variance; ties go to the highest level.
fn otsu(data: &[f64]) -> i64 {
    let l = data.len();
    let n: f64 = data.iter().sum();
    let s: f64 = data.iter().enumerate().map(|(k, &c)| k as f64 * c).sum();

    let mut sk = 0.0;
    let mut n1 = data[0];
    let mut bcv_max = 0.0;
    let mut k_star = 0;
    for (k, &c) in data.iter().enumerate().take(l - 1).skip(1) {
        sk += k as f64 * c;
        n1 += c;
        let denom = n1 * (n - n1);
        let bcv = if denom != 0.0 {
            let num = (n1 / n) * s - sk;
            num * num / denom
        } else {
            0.0
        };
        if bcv >= bcv_max {
            bcv_max = bcv;
            k_star = k;
        }
    }
    k_star as i64
}

// Level whose cumulative fraction is closest to one half.
fn percentile(data: &[f64]) -> Option<i64> {
    let total = partial_sum(data, data.len() - 1);
    let mut best = 1.0;
    let mut threshold = None;
    let mut acc = 0.0;
    for (i, &c) in data.iter().enumerate() {
        acc += c;
        let d = (acc / total - 0.5).abs();
        if d < best {
            best = d;
            threshold = Some(i as i64);
        }
    }
    threshold
}

// Kapur's entropy generalized to Renyi entropies of order 0.5, 1 and 2,
// combined with weights depending on how far apart the three levels are.
fn renyi_entropy(data: &[f64]) -> Option<i64> {
    let cum = Cumulative::new(data);
    let t_star2 = max_entropy_level(data, &cum)?;

    let renyi_level = |alpha: f64| -> i64 {
        let term = 1.0 / (1.0 - alpha);
        let mut threshold = 0;
        let mut max_ent = 0.0;
        for it in cum.first..=cum.last {
            let ent_back: f64 = (0..=it)
                .map(|ih| (cum.norm[ih] / cum.p1[it]).powf(alpha))
                .sum();
            let ent_obj: f64 = ((it + 1)..data.len())
                .map(|ih| (cum.norm[ih] / cum.p2[it]).powf(alpha))
                .sum();
            let product = ent_back * ent_obj;
            let tot_ent = if product > 0.0 { term * product.ln() } else { 0.0 };
            if tot_ent > max_ent {
                max_ent = tot_ent;
                threshold = it as i64;
            }
        }
        threshold
    };

    let mut stars = [renyi_level(0.5), t_star2, renyi_level(2.0)];
    stars.sort_unstable();
    let [t1, t2, t3] = stars;

    let (beta1, beta2, beta3) = match ((t1 - t2).abs() <= 5, (t2 - t3).abs() <= 5) {
        (true, true) => (1.0, 2.0, 1.0),
        (true, false) => (0.0, 1.0, 3.0),
        (false, true) => (3.0, 1.0, 0.0),
        (false, false) => (1.0, 2.0, 1.0),
    };

    let (t1u, t3u) = (t1 as usize, t3 as usize);
    let omega = cum.p1[t3u] - cum.p1[t1u];
    let level = t1 as f64 * (cum.p1[t1u] + 0.25 * omega * beta1)
        + 0.25 * t2 as f64 * omega * beta2
        + t3 as f64 * (cum.p2[t3u] + 0.25 * omega * beta3);
    Some(level as i64)
}

fn shanbhag(data: &[f64]) -> Option<i64> {
    let cum = Cumulative::new(data);
    let mut threshold = None;
    let mut min_ent = f64::MAX;
    for it in cum.first..=cum.last {
        let term = 0.5 / cum.p1[it];
        let mut ent_back = 0.0;
        for ih in 1..=it {
            ent_back -= cum.norm[ih] * (1.0 - term * cum.p1[ih - 1]).ln();
        }
        ent_back *= term;

        let term = 0.5 / cum.p2[it];
        let mut ent_obj = 0.0;
        for ih in (it + 1)..data.len() {
            ent_obj -= cum.norm[ih] * (1.0 - term * cum.p2[ih]).ln();
        }
        ent_obj *= term;

        let tot_ent = (ent_back - ent_obj).abs();
        if tot_ent < min_ent {
            min_ent = tot_ent;
            threshold = Some(it as i64);
        }
    }
    threshold
}

// Zack's triangle: farthest bin below the line joining the histogram peak
// to the far end of its longer tail.
fn triangle(data: &[f64]) -> i64 {
    let n = data.len();
    let mut data = data.to_vec();

    let mut min = first_nonzero(&data).unwrap_or(0);
    if min > 0 {
        min -= 1;
    }
    let mut min2 = last_nonzero(&data).unwrap_or(0);
    if min2 < n - 1 {
        min2 += 1;
    }
    let mut max = data
        .iter()
        .enumerate()
        .fold((0, 0.0), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
        .0;

    let inverted = (max as i64 - min as i64) < (min2 as i64 - max as i64);
    if inverted {
        data.reverse();
        min = n - 1 - min2;
        max = n - 1 - max;
    }

    if min == max {
        return min as i64;
    }

    let mut nx = data[max];
    let mut ny = min as f64 - max as f64;
    let d = (nx * nx + ny * ny).sqrt();
    nx /= d;
    ny /= d;
    let d = nx * min as f64 + ny * data[min];

    let mut split = min;
    let mut split_distance = 0.0;
    for (i, &c) in data.iter().enumerate().take(max + 1).skip(min + 1) {
        let distance = nx * i as f64 + ny * c - d;
        if distance > split_distance {
            split = i;
            split_distance = distance;
        }
    }
    let split = split as i64 - 1;

    if inverted {
        n as i64 - 1 - split
    } else {
        split
    }
}

fn yen(data: &[f64]) -> Option<i64> {
    let cum = Cumulative::new(data);
    let n = data.len();

    let p1_sq: Vec<f64> = cum
        .norm
        .iter()
        .scan(0.0, |acc, &v| {
            *acc += v * v;
            Some(*acc)
        })
        .collect();
    let mut p2_sq = vec![0.0; n];
    for ih in (0..n - 1).rev() {
        p2_sq[ih] = p2_sq[ih + 1] + cum.norm[ih + 1] * cum.norm[ih + 1];
    }

    let safe_ln = |v: f64| if v > 0.0 { v.ln() } else { 0.0 };
    (0..n)
        .map(|it| {
            let crit = -safe_ln(p1_sq[it] * p2_sq[it])
                + 2.0 * safe_ln(cum.p1[it] * (1.0 - cum.p1[it]));
            (it, crit)
        })
        .filter(|&(_, crit)| crit > f64::MIN_POSITIVE)
        .fold(None, |best: Option<(usize, f64)>, (it, crit)| match best {
            Some((_, b)) if b >= crit => best,
            _ => Some((it, crit)),
        })
        .map(|(it, _)| it as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxels::Spacing;
    use ndarray::Array3;

    const ALL_METHODS: [ThresholdMethod; 17] = [
        ThresholdMethod::Default,
        ThresholdMethod::Huang,
        ThresholdMethod::Huang2,
        ThresholdMethod::Intermodes,
        ThresholdMethod::IsoData,
        ThresholdMethod::Li,
        ThresholdMethod::MaxEntropy,
        ThresholdMethod::Mean,
        ThresholdMethod::MinError,
        ThresholdMethod::Minimum,
        ThresholdMethod::Moments,
        ThresholdMethod::Otsu,
        ThresholdMethod::Percentile,
        ThresholdMethod::RenyiEntropy,
        ThresholdMethod::Shanbhag,
        ThresholdMethod::Triangle,
        ThresholdMethod::Yen,
    ];

    // two well separated gaussian peaks at 60 and 190
    fn bimodal_histogram() -> [u64; NBINS] {
        let mut hist = [0u64; NBINS];
        for (i, c) in hist.iter_mut().enumerate() {
            let g = |mu: f64| 1000.0 * (-((i as f64 - mu).powi(2)) / 50.0).exp();
            *c = (g(60.0).round() + g(190.0).round()) as u64;
        }
        hist
    }

    #[test]
    fn test_bimodal_levels_fall_between_peaks() {
        let hist = bimodal_histogram();
        for method in [
            ThresholdMethod::Default,
            ThresholdMethod::Huang,
            ThresholdMethod::Huang2,
            ThresholdMethod::Intermodes,
            ThresholdMethod::IsoData,
            ThresholdMethod::Li,
            ThresholdMethod::MaxEntropy,
            ThresholdMethod::Mean,
            ThresholdMethod::Minimum,
            ThresholdMethod::Moments,
            ThresholdMethod::Otsu,
            ThresholdMethod::Percentile,
        ] {
            let level = method.level(&hist).expect("level");
            assert!(
                (60..190).contains(&level),
                "{} gave level {}",
                method,
                level
            );
        }
    }

    #[test]
    fn test_known_levels() {
        let hist = bimodal_histogram();
        assert_eq!(ThresholdMethod::Mean.level(&hist), Some(125));
        assert_eq!(ThresholdMethod::Intermodes.level(&hist), Some(125));
        assert_eq!(ThresholdMethod::Default.level(&hist), Some(125));
        assert_eq!(ThresholdMethod::IsoData.level(&hist), Some(125));
        // otsu ties resolve to the last empty bin before the upper peak
        let upper_start = (0..NBINS).filter(|&i| i > 125 && hist[i] > 0).min().unwrap();
        assert_eq!(ThresholdMethod::Otsu.level(&hist), Some(upper_start - 1));
    }

    // dim background peak at 20 with a broad bright tail around 150
    fn skewed_histogram() -> [u64; NBINS] {
        let mut hist = [0u64; NBINS];
        for (i, c) in hist.iter_mut().enumerate() {
            let x = i as f64;
            let background = 5000.0 * (-((x - 20.0).powi(2)) / 128.0).exp();
            let nuclei = 300.0 * (-((x - 150.0).powi(2)) / 1800.0).exp();
            *c = (background.round() + nuclei.round()) as u64;
        }
        hist
    }

    #[test]
    fn test_huang_variants_known_levels() {
        let hist = bimodal_histogram();
        assert_eq!(ThresholdMethod::Huang.level(&hist), Some(79));
        assert_eq!(ThresholdMethod::Huang2.level(&hist), Some(79));

        let hist = skewed_histogram();
        assert_eq!(ThresholdMethod::Huang.level(&hist), Some(75));
        assert_eq!(ThresholdMethod::Huang2.level(&hist), Some(85));

        let mut ramp = [0u64; NBINS];
        for (i, c) in ramp.iter_mut().enumerate() {
            *c = i as u64;
        }
        assert_eq!(ThresholdMethod::Huang.level(&ramp), Some(175));
    }

    #[test]
    fn test_every_method_handles_odd_histograms() {
        let mut single = [0u64; NBINS];
        single[17] = 40;
        let mut two_bins = [0u64; NBINS];
        two_bins[0] = 900;
        two_bins[255] = 100;
        let mut ramp = [0u64; NBINS];
        for (i, c) in ramp.iter_mut().enumerate() {
            *c = i as u64;
        }

        for hist in [single, two_bins, ramp, bimodal_histogram()] {
            for method in ALL_METHODS {
                if let Some(level) = method.level(&hist) {
                    assert!(level < NBINS, "{}", method);
                }
            }
        }
    }

    #[test]
    fn test_two_level_image_splits_the_levels() {
        let mut two_bins = [0u64; NBINS];
        two_bins[0] = 900;
        two_bins[255] = 100;
        for method in [ThresholdMethod::Huang, ThresholdMethod::Huang2, ThresholdMethod::Otsu] {
            let level = method.level(&two_bins).unwrap();
            assert!(level < 255, "{}", method);
        }
    }

    #[test]
    fn test_empty_histogram_has_no_level() {
        let hist = [0u64; NBINS];
        for method in ALL_METHODS {
            assert_eq!(method.level(&hist), None);
        }
    }

    #[test]
    fn test_flat_grid_threshold_is_above_everything() {
        let grid = VoxelGrid::new(Array3::from_elem((2, 4, 4), 12.0), Spacing::default());
        for method in ALL_METHODS {
            assert_eq!(threshold_value(&grid, method), f32::INFINITY);
        }
    }

    #[test]
    fn test_histogram_bins_and_values_agree() {
        let mut data = Array3::zeros((1, 1, 5));
        for (i, v) in data.iter_mut().enumerate() {
            *v = i as f32 * 64.0;
        }
        let grid = VoxelGrid::new(data, Spacing::default());
        let hist = Histogram::from_grid(&grid).unwrap();
        assert_eq!(hist.bin(0.0), 0);
        assert_eq!(hist.bin(256.0), NBINS - 1);
        assert_eq!(hist.counts.iter().sum::<u64>(), 5);

        let cutoff = hist.level_to_value(99);
        assert_eq!(cutoff, 100.0);
        assert_eq!(hist.bin(cutoff), 100);
        assert_eq!(hist.level_to_value(NBINS - 1), f32::INFINITY);
    }

    #[test]
    fn test_method_names() {
        assert_eq!(ThresholdMethod::Huang.to_string(), "Huang");
        assert_eq!(
            ThresholdMethod::from_str("huang2", true).unwrap(),
            ThresholdMethod::Huang2
        );
        assert_eq!(
            ThresholdMethod::from_str("isodata", true).unwrap(),
            ThresholdMethod::IsoData
        );
        assert_eq!(
            ThresholdMethod::from_str("Otsu", true).unwrap(),
            ThresholdMethod::Otsu
        );
    }
}
