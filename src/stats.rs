/// Arithmetic mean, `None` for an empty sample.
pub fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, len) = values
        .into_iter()
        .fold((0.0, 0_u32), |(sum, len), x| (sum + x, len + 1));
    if len == 0 {
        None
    } else {
        Some(sum / f64::from(len))
    }
}

/// Sample standard deviation (n - 1 denominator), `None` below two samples.
pub fn sample_std<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let values: Vec<f64> = values.into_iter().collect();
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values.iter().copied())?;
    #[allow(clippy::cast_precision_loss)]
    let denominator = (values.len() - 1) as f64;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / denominator;
    Some(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::{mean, sample_std};
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_mean() {
        assert_eq!(mean(Vec::new()), None);
        assert_approx_eq!(mean(vec![25.0, 18.0, 0.0, 1.0]).unwrap(), 11.0);
    }

    #[test]
    fn test_sample_std() {
        assert_eq!(sample_std(vec![3.0]), None);
        assert_approx_eq!(sample_std(vec![2.0, 4.0]).unwrap(), std::f64::consts::SQRT_2);
        assert_approx_eq!(
            sample_std(vec![1.0, 3.0, 2.0, 5.0, 4.0]).unwrap(),
            1.5811388300841898
        );
        assert_approx_eq!(sample_std(vec![7.0, 7.0, 7.0]).unwrap(), 0.0);
    }
}
