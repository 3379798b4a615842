//! Adaptive scatter sampling for the batch path (spec.md §4.6 step 6, §8
//! scenario S4). Lot and daily aggregates are never sampled — only the
//! glass-level scatter output is thinned, to keep response size bounded
//! regardless of baseline size.

/// Target stride: 1 for small baselines, 2 up to 100k, 10 beyond that.
pub fn target_stride(baseline_size: usize) -> usize {
    if baseline_size <= 10_000 {
        1
    } else if baseline_size <= 100_000 {
        2
    } else {
        10
    }
}

/// Others stride scales with baseline size so Others scatter output stays
/// around ~2000 points regardless of how large the baseline is.
pub fn others_stride(baseline_size: usize) -> usize {
    (baseline_size / 2000).max(1)
}

/// Lot-level output samples Others at a fixed 1-in-10; Target lots are
/// always emitted in full (stride 1).
pub const LOT_OTHERS_STRIDE: usize = 10;
pub const LOT_TARGET_STRIDE: usize = 1;

/// Whether the `counter`-th point (0-based) should be emitted at `stride`.
pub fn should_emit(counter: usize, stride: usize) -> bool {
    counter % stride == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_table_matches_scenario_s4() {
        assert_eq!(target_stride(10_000), 1);
        assert_eq!(target_stride(100_000), 2);
        assert_eq!(target_stride(150_000), 10);
        assert_eq!(others_stride(150_000), 75);
    }

    #[test]
    fn adaptive_sampling_bounds_output_size() {
        let baseline = 150_000usize;
        let t_stride = target_stride(baseline);
        let o_stride = others_stride(baseline);

        let target_points = (0..baseline).filter(|&c| should_emit(c, t_stride)).count();
        let others_points = (0..baseline).filter(|&c| should_emit(c, o_stride)).count();

        assert!(target_points <= 15_000);
        assert!(others_points <= 2_000);
    }

    #[test]
    fn never_divides_by_zero_stride() {
        assert_eq!(others_stride(0), 1);
        assert_eq!(target_stride(0), 1);
    }
}
