//! Small numeric helpers shared by the decoders.

/// Returns the index of the maximum element in a slice.
///
/// The first index wins when several elements are equal.
///
/// # Panics
///
/// If the input slice is empty this function will panic.
#[inline]
#[must_use]
pub fn argmax(v: &[f32]) -> usize {
    let mut max_index = 0;
    let mut max_value = v[0];

    for (i, &value) in v.iter().enumerate().skip(1) {
        if value > max_value {
            max_index = i;
            max_value = value;
        }
    }

    max_index
}

/// Returns the softmax of a slice of logits.
#[inline]
#[must_use]
pub fn softmax(v: &[f32]) -> Vec<f32> {
    // shift by the maximum so large logits do not overflow
    let max = v.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps = v.iter().map(|f| (f - max).exp()).collect::<Vec<_>>();

    let sum: f32 = exps.iter().sum();
    exps.iter().map(|x| x / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[3.0]), 0);
    }

    #[test]
    fn softmax_of_large_logits() {
        let p = softmax(&[1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-6);
        assert!((p[1] - 0.5).abs() < 1e-6);

        let p = softmax(&[0.0, 2.0_f32.ln()]);
        assert!((p[1] - 2.0 / 3.0).abs() < 1e-6);
    }
}
