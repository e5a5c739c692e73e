//! Count-conserving conversion between spectrum resolutions.

use tracing::trace;

use super::Spectrum;

/// Rebin `source` into `target` using `ratio` source bins per target bin.
///
/// For `ratio > 1` (compressing into fewer bins) each output bin accumulates
/// linearly-interpolated fractional contributions from the source interval it
/// covers; the fractional carry between consecutive output bins makes the
/// conversion conserve total counts up to floating rounding. For `ratio <= 1`
/// (expanding) a direct truncating copy is used.
///
/// If the accumulation would read past the source's last bin the loop stops
/// early and the remaining output bins stay at zero.
///
/// Metadata (times, fill rate, detector id) is carried over from the source
/// and the target's total-count invariant is recomputed.
pub fn rebin<const S: usize, const T: usize>(
    source: &Spectrum<S>,
    target: &mut Spectrum<T>,
    ratio: f64,
) {
    target.channels.fill(0.0);

    if ratio > 1.0 {
        compress(&source.channels[..], &mut target.channels[..], ratio);
    } else {
        expand(&source.channels[..], &mut target.channels[..], ratio);
    }

    target.acquisition_time = source.acquisition_time;
    target.real_time = source.real_time;
    target.fill_cps = source.fill_cps;
    target.detector_id = source.detector_id;
    target.update();
    trace!(
        ratio,
        source_total = source.total_count(),
        target_total = target.total_count(),
        "rebinned spectrum"
    );
}

/// Each output bin covers the source interval `[pos, pos + ratio)`; partial
/// bins contribute their overlapping fraction, so every source bin's weights
/// across output bins sum to one.
fn compress(source: &[f64], target: &mut [f64], ratio: f64) {
    let mut pos = 0.0f64;
    for slot in target.iter_mut() {
        let end = pos + ratio;
        let mut sum = 0.0;
        let mut index = pos as usize;
        while (index as f64) < end {
            if index >= source.len() {
                *slot = sum;
                return;
            }
            let overlap_start = pos.max(index as f64);
            let overlap_end = end.min((index + 1) as f64);
            sum += source[index] * (overlap_end - overlap_start);
            index += 1;
        }
        *slot = sum;
        pos = end;
    }
}

/// Truncating copy: output bin `i` takes source bin `floor(i * ratio)`.
fn expand(source: &[f64], target: &mut [f64], ratio: f64) {
    for (i, slot) in target.iter_mut().enumerate() {
        let index = (i as f64 * ratio) as usize;
        if index >= source.len() {
            return;
        }
        *slot = source[index];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum<const N: usize>(values: &[f64]) -> Spectrum<N> {
        let mut s = Spectrum::<N>::new();
        s.set_data(values).unwrap();
        s
    }

    #[test]
    fn ratio_one_is_identity() {
        let source = spectrum::<8>(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let mut target = Spectrum::<8>::new();
        rebin(&source, &mut target, 1.0);
        assert_eq!(target.channels(), source.channels());
        assert_eq!(target.total_count(), source.total_count());
    }

    #[test]
    fn ratio_two_conserves_total_count() {
        let source = spectrum::<8>(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let mut target = Spectrum::<4>::new();
        rebin(&source, &mut target, 2.0);
        assert_eq!(target.channels(), &[3.0, 7.0, 11.0, 15.0]);
        assert!((target.total_count() - source.total_count()).abs() < 1e-9);
    }

    #[test]
    fn fractional_ratio_conserves_total_count() {
        let source = spectrum::<6>(&[2.0, 4.0, 8.0, 16.0, 32.0, 64.0]);
        let mut target = Spectrum::<4>::new();
        rebin(&source, &mut target, 1.5);
        let out: f64 = target.channels().iter().sum();
        let inp: f64 = source.channels().iter().sum();
        assert!((out - inp).abs() < 1e-9, "sum {out} != {inp}");
    }

    #[test]
    fn overrun_terminates_early_and_leaves_zeros() {
        // ratio 2 over an equal-size target consumes the source after half
        // the output bins; the rest must stay zero.
        let source = spectrum::<4>(&[1.0, 1.0, 1.0, 1.0]);
        let mut target = Spectrum::<4>::new();
        rebin(&source, &mut target, 2.0);
        assert_eq!(target.channels(), &[2.0, 2.0, 0.0, 0.0]);
        assert!((target.total_count() - source.total_count()).abs() < 1e-9);
    }

    #[test]
    fn expand_is_truncating_copy() {
        let source = spectrum::<4>(&[10.0, 20.0, 30.0, 40.0]);
        let mut target = Spectrum::<8>::new();
        rebin(&source, &mut target, 0.5);
        assert_eq!(
            target.channels(),
            &[10.0, 10.0, 20.0, 20.0, 30.0, 30.0, 40.0, 40.0]
        );
    }

    #[test]
    fn metadata_carries_over() {
        let mut source = spectrum::<4>(&[1.0, 2.0, 3.0, 4.0]);
        source.set_acquisition_time(12.0);
        source.set_real_time(13.0);
        source.set_detector_id(9);
        let mut target = Spectrum::<2>::new();
        rebin(&source, &mut target, 2.0);
        assert_eq!(target.acquisition_time(), 12.0);
        assert_eq!(target.real_time(), 13.0);
        assert_eq!(target.detector_id(), 9);
    }

    #[test]
    fn hardware_to_library_ratio_two() {
        use crate::spectrum::{HardwareSpectrum, LibrarySpectrum};
        let mut source = HardwareSpectrum::new();
        let data: Vec<f64> = (0..2048).map(|i| (i % 13) as f64).collect();
        source.set_data(&data).unwrap();
        let mut target = LibrarySpectrum::new();
        rebin(&source, &mut target, 2.0);
        assert!((target.total_count() - source.total_count()).abs() < 1e-6);
    }
}
