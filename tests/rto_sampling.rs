use std::sync::Arc;

use anyhow::Result;
use approx::assert_abs_diff_eq;
use faer::Mat;
use pretty_assertions::assert_eq;
use rto_rs::{
    read_batches, sparse, BatchSettings, CovarianceInput, Gaussian, LinearModel, LinearRto, Parameterization,
    Posterior, Proximal, RegularizedGaussian, RegularizedLinearRto, RegularizedRtoSettings, RtoError, RtoSettings,
    Sampler, SamplerSettings, SparseMatrix, StepSize,
};

/// One dimensional blurring operator with a three point stencil.
fn blur(n: usize) -> SparseMatrix {
    let mut triplets = Vec::new();
    for i in 0..n {
        triplets.push((i, i, 0.5));
        if i > 0 {
            triplets.push((i, i - 1, 0.25));
        }
        if i + 1 < n {
            triplets.push((i, i + 1, 0.25));
        }
    }
    sparse::from_triplets(n, n, &triplets).expect("valid triplets")
}

fn signal(n: usize) -> Vec<f64> {
    (0..n).map(|i| if (n / 3..2 * n / 3).contains(&i) { 1. } else { 0. }).collect()
}

fn blurred_posterior(n: usize) -> Result<Posterior<Gaussian>> {
    let a = blur(n);
    let data = sparse::mul_vec(&a, &signal(n))?;
    Ok(Posterior::from_linear_system(data, a, 20., vec![0.; n], 1.)?)
}

#[test]
fn sampling_is_reproducible_from_seed() -> Result<()> {
    let draws = |seed| -> Result<Vec<Vec<f64>>> {
        let mut sampler = Sampler::with_target(LinearRto::default(), blurred_posterior(16)?, SamplerSettings { seed })?;
        sampler.warmup(5, 0.2)?.sample(15)?;
        Ok(sampler.get_history()?.history.samples)
    };
    let first = draws(42)?;
    assert_eq!(first.len(), 20);
    assert!(first.iter().all(|s| s.len() == 16));
    assert_eq!(first, draws(42)?);
    Ok(())
}

#[test]
fn sparse_and_dense_problems_agree() -> Result<()> {
    let n = 12;
    let sparse = blurred_posterior(n)?;
    let dense_a = blur(n).to_dense();
    let data = sparse::mul_vec(&blur(n), &signal(n))?;
    let dense = Posterior::from_linear_system(data, dense_a, 20., vec![0.; n], 1.)?;

    let settings = RtoSettings {
        maxit: 100,
        tol: 1e-12,
        shift: 0.,
    };
    let mut a = Sampler::with_target(LinearRto::new(settings), sparse, SamplerSettings { seed: 1 })?;
    let mut b = Sampler::with_target(LinearRto::new(settings), dense, SamplerSettings { seed: 1 })?;
    a.sample(5)?;
    b.sample(5)?;
    let (a, b) = (a.get_samples()?, b.get_samples()?);
    for j in 0..5 {
        for (x, y) in a.point(j).iter().zip(b.point(j)) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-8);
        }
    }
    Ok(())
}

#[test]
fn batch_files_match_history() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut sampler = Sampler::with_target(LinearRto::default(), blurred_posterior(8)?, SamplerSettings { seed: 3 })?;
    let settings = BatchSettings {
        batch_size: 4,
        sample_path: dir.path().join("run"),
    };
    let files = sampler.sample_batched(10, settings)?;
    assert_eq!(files, 3);
    let batches = read_batches(&dir.path().join("run"))?;
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[2].samples.len(), 2);
    let joined: Vec<Vec<f64>> = batches.into_iter().flat_map(|b| b.samples).collect();
    assert_eq!(joined, sampler.get_history()?.history.samples);
    Ok(())
}

#[test]
fn checkpoints_resume_and_reject_other_samplers() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("linear.json");
    let mut linear = Sampler::with_target(LinearRto::default(), blurred_posterior(8)?, SamplerSettings { seed: 2 })?;
    linear.sample(3)?;
    linear.save_checkpoint(&path)?;

    let mut resumed = Sampler::with_target(LinearRto::default(), blurred_posterior(8)?, SamplerSettings { seed: 2 })?;
    resumed.load_checkpoint(&path)?;
    assert_eq!(resumed.current_point()?, linear.current_point()?);

    let likelihood = Gaussian::conditional(
        Arc::new(LinearModel::from_matrix(blur(8))),
        Parameterization::SqrtPrec(CovarianceInput::Scalar(20.)),
    )?
    .to_likelihood(sparse::mul_vec(&blur(8), &signal(8))?)?;
    let prior = RegularizedGaussian::new(
        Gaussian::builder().dim(8).sqrtprec(1.).build()?,
        Proximal::Box { lower: 0., upper: 1. },
    );
    let settings = RegularizedRtoSettings {
        stepsize: StepSize::Fixed(1e-3),
        ..Default::default()
    };
    let mut regularized = Sampler::with_target(
        RegularizedLinearRto::new(settings),
        Posterior::new(likelihood, prior)?,
        SamplerSettings::default(),
    )?;
    let err = regularized.load_checkpoint(&path).expect_err("sampler types differ");
    assert!(matches!(
        err.downcast_ref::<RtoError>(),
        Some(RtoError::CheckpointTypeMismatch { .. })
    ));

    regularized.sample(5)?;
    let samples = regularized.get_samples()?;
    for j in 0..samples.len() {
        assert!(samples.point(j).iter().all(|x| (0. ..=1.).contains(x)));
    }
    Ok(())
}

#[test]
fn posterior_mean_recovers_signal() -> Result<()> {
    let n = 24;
    let a = Mat::from_fn(n, n, |i, j| match i.abs_diff(j) {
        0 => 0.5,
        1 => 0.25,
        _ => 0.,
    });
    let truth = signal(n);
    let data: Vec<f64> = (0..n).map(|i| (0..n).map(|j| a[(i, j)] * truth[j]).sum()).collect();
    let posterior = Posterior::from_linear_system(data, a, 100., vec![0.5; n], 1.)?;
    let settings = RtoSettings {
        maxit: 200,
        tol: 1e-10,
        shift: 0.,
    };
    let mut sampler = Sampler::with_target(LinearRto::new(settings), posterior, SamplerSettings { seed: 9 })?;
    sampler.sample(400)?;
    let mean = sampler.get_samples()?.burnthin(0, 1).mean();
    let error: f64 = mean.iter().zip(&truth).map(|(m, t)| (m - t).powi(2)).sum::<f64>().sqrt();
    let scale: f64 = truth.iter().map(|t| t * t).sum::<f64>().sqrt();
    assert!(error / scale < 0.5, "relative error {error}");
    Ok(())
}
