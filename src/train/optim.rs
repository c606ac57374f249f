//! Nesterov SGD, the optimizer of every training recipe.

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{Sgd, SgdConfig};
use burn::tensor::backend::AutodiffBackend;

/// SGD over the parameters of `M`. Its momentum buffers are recorded next to the weights.
pub type SgdOptimizer<AutoB, M> =
    OptimizerAdaptor<Sgd<<AutoB as AutodiffBackend>::InnerBackend>, M, AutoB>;

/// Momentum without dampening, with the Nesterov look-ahead, plus L2 weight decay.
pub fn nesterov_sgd(momentum: f64, weight_decay: f32) -> SgdConfig {
    SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(momentum)
                .with_dampening(0.)
                .with_nesterov(true),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(weight_decay)))
}

pub fn init_sgd<AutoB, M>(config: &SgdConfig) -> SgdOptimizer<AutoB, M>
where
    AutoB: AutodiffBackend,
    M: AutodiffModule<AutoB>,
{
    config.init::<AutoB, M>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::{Linear, LinearConfig};
    use burn::optim::{GradientsParams, Optimizer};
    use burn::prelude::*;

    type AutoB = Autodiff<NdArray>;
    type Model = Linear<AutoB>;

    fn step(model: Model, optim: &mut SgdOptimizer<AutoB, Model>) -> Model {
        let x = Tensor::<AutoB, 2>::from_floats([[1.0, 2.0]], &model.weight.device());
        let grads = model.forward(x).sum().backward();
        let grads = GradientsParams::from_grads(grads, &model);
        optim.step(0.1, model, grads)
    }

    #[test]
    fn momentum_survives_a_record_round_trip() {
        let device = Default::default();
        let config = nesterov_sgd(0.9, 0.);
        let model: Model = LinearConfig::new(2, 1).init(&device);

        let mut optim = init_sgd::<AutoB, Model>(&config);
        let model = step(model, &mut optim);
        let mut restored = init_sgd::<AutoB, Model>(&config).load_record(optim.to_record());
        let mut fresh = init_sgd::<AutoB, Model>(&config);

        let continued = step(model.clone(), &mut optim).weight.val().into_data();
        let resumed = step(model.clone(), &mut restored).weight.val().into_data();
        let restarted = step(model, &mut fresh).weight.val().into_data();
        continued.assert_eq(&resumed, true);
        assert_ne!(continued, restarted);
    }
}
