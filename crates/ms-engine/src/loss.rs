use ms_types::{LossKind, TrainingError};

/// Mean loss over a batch and its gradient with respect to each prediction.
pub fn loss_and_grad(
    kind: LossKind,
    predictions: &[f64],
    targets: &[f64],
) -> Result<(f64, Vec<f64>), TrainingError> {
    if predictions.len() != targets.len() {
        return Err(TrainingError::ShapeMismatch {
            expected: targets.len(),
            actual: predictions.len(),
        });
    }
    if predictions.is_empty() {
        return Ok((0.0, Vec::new()));
    }

    let n = predictions.len() as f64;
    let residuals = predictions.iter().zip(targets).map(|(p, t)| p - t);
    let (total, grad) = match kind {
        LossKind::L1 => residuals.fold((0.0, Vec::new()), |(sum, mut grad), r| {
            grad.push(sign(r) / n);
            (sum + r.abs(), grad)
        }),
        LossKind::Mse => residuals.fold((0.0, Vec::new()), |(sum, mut grad), r| {
            grad.push(2.0 * r / n);
            (sum + r * r, grad)
        }),
    };
    Ok((total / n, grad))
}

/// Mean loss without gradients.
pub fn loss_value(kind: LossKind, predictions: &[f64], targets: &[f64]) -> Result<f64, TrainingError> {
    loss_and_grad(kind, predictions, targets).map(|(loss, _)| loss)
}

pub fn mean_absolute_error(predictions: &[f64], targets: &[f64]) -> Result<f64, TrainingError> {
    loss_value(LossKind::L1, predictions, targets)
}

// Subgradient 0 at the kink.
fn sign(r: f64) -> f64 {
    if r > 0.0 {
        1.0
    } else if r < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l1_loss_and_gradient() {
        let (loss, grad) = loss_and_grad(LossKind::L1, &[1.0, 2.0, 3.0, 4.0], &[2.0, 2.0, 1.0, 5.0]).unwrap();
        assert!((loss - 1.0).abs() < 1e-12);
        assert_eq!(grad, vec![-0.25, 0.0, 0.25, -0.25]);
    }

    #[test]
    fn mse_loss_and_gradient() {
        let (loss, grad) = loss_and_grad(LossKind::Mse, &[1.0, 3.0], &[0.0, 1.0]).unwrap();
        assert!((loss - 2.5).abs() < 1e-12);
        assert_eq!(grad, vec![1.0, 2.0]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert_eq!(
            loss_value(LossKind::Mse, &[1.0], &[1.0, 2.0]),
            Err(TrainingError::ShapeMismatch { expected: 2, actual: 1 })
        );
    }

    #[test]
    fn mae_matches_l1() {
        assert_eq!(mean_absolute_error(&[0.0, 0.0], &[1.0, -3.0]).unwrap(), 2.0);
        assert_eq!(mean_absolute_error(&[], &[]).unwrap(), 0.0);
    }
}
