//! Pure helpers over window slices used by the built-in bots.

use crate::domain::Precision;

/// Arithmetic mean, `None` on an empty slice.
pub fn sma<P: Precision>(values: &[P]) -> Option<P> {
    if values.is_empty() {
        return None;
    }
    let sum = values.iter().fold(P::zero(), |acc, &v| acc + v);
    Some(sum / P::from_i64(values.len() as i64))
}

pub fn highest<P: Precision>(values: impl IntoIterator<Item = P>) -> Option<P> {
    values.into_iter().reduce(|a, b| a.max_of(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sma_of_empty_is_none() {
        assert_eq!(sma::<f64>(&[]), None);
    }

    #[test]
    fn sma_is_exact_in_decimal() {
        assert_eq!(sma(&[dec!(0.1), dec!(0.2), dec!(0.3)]), Some(dec!(0.2)));
    }

    #[test]
    fn highest_of_values() {
        let v = [3.0, 9.0, -1.0, 4.0];
        assert_eq!(highest(v), Some(9.0));
        assert_eq!(highest(Vec::<f64>::new()), None);
    }
}
