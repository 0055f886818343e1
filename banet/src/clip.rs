use std::marker::PhantomData;

use burn::{
    module::{AutodiffModule, Module, ModuleVisitor, ParamId},
    optim::GradientsParams,
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};

/// Bound on the L2 norm of all gradients of one step, taken together.
pub const MAX_GRAD_NORM: f32 = 1.0;

struct SquaredNorm<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    total: f64,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: &ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            let squared = (grad.clone() * grad).sum().into_scalar().elem::<f32>();
            self.total += squared as f64;
        }
    }
}

struct Rescale<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    factor: f32,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Rescale<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: &ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads
                .register::<B::InnerBackend, D>(id.clone(), grad.mul_scalar(self.factor));
        }
    }
}

/// L2 norm over every gradient of `module`.
pub fn global_norm<B: AutodiffBackend, M: AutodiffModule<B>>(module: &M, grads: &GradientsParams) -> f32 {
    let mut visitor = SquaredNorm::<B> {
        grads,
        total: 0.0,
        backend: PhantomData,
    };
    module.visit(&mut visitor);
    visitor.total.sqrt() as f32
}

/// Scales all gradients by one common factor so their joint norm is at most
/// `max_norm`. Returns the norm before clipping.
pub fn clip_global_norm<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    grads: &mut GradientsParams,
    max_norm: f32,
) -> f32 {
    let norm = global_norm::<B, M>(module, grads);
    if norm.is_finite() && norm > max_norm {
        let mut visitor = Rescale::<B> {
            grads,
            factor: max_norm / norm,
            backend: PhantomData,
        };
        module.visit(&mut visitor);
    }
    norm
}

#[cfg(test)]
mod tests {
    use burn::{
        backend::{Autodiff, NdArray},
        module::{Module, Param},
        tensor::{backend::Backend, Data, Shape},
    };

    use super::*;

    type TestBackend = Autodiff<NdArray<f32>>;

    #[derive(Module, Debug)]
    struct TwoParams<B: Backend> {
        bias: Param<Tensor<B, 1>>,
        weight: Param<Tensor<B, 2>>,
    }

    /// Gradients of norm 3 on `bias` and 4 on `weight`.
    fn model_and_grads() -> (TwoParams<TestBackend>, GradientsParams) {
        let device = Default::default();
        let model = TwoParams {
            bias: Param::from(Tensor::<TestBackend, 1>::zeros([1], &device).require_grad()),
            weight: Param::from(Tensor::<TestBackend, 2>::zeros([1, 2], &device).require_grad()),
        };
        let weight_slope = Tensor::<TestBackend, 2>::from_data(
            Data::new(vec![0.0f32, 4.0], Shape::new([1, 2])).convert(),
            &device,
        );

        let loss = model.bias.val().mul_scalar(3.0).sum() + (model.weight.val() * weight_slope).sum();
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        (model, grads)
    }

    #[test]
    fn clips_all_gradients_jointly() {
        let (model, mut grads) = model_and_grads();
        assert!((global_norm::<TestBackend, _>(&model, &grads) - 5.0).abs() < 1e-5);

        let before = clip_global_norm::<TestBackend, _>(&model, &mut grads, MAX_GRAD_NORM);
        assert!((before - 5.0).abs() < 1e-5);
        assert!((global_norm::<TestBackend, _>(&model, &grads) - 1.0).abs() < 1e-5);

        let bias = grads
            .get::<NdArray<f32>, 1>(model.bias.id())
            .unwrap()
            .into_data()
            .value;
        assert!((bias[0] - 0.6).abs() < 1e-5);
    }

    #[test]
    fn small_gradients_are_left_alone() {
        let (model, mut grads) = model_and_grads();
        clip_global_norm::<TestBackend, _>(&model, &mut grads, 10.0);
        assert!((global_norm::<TestBackend, _>(&model, &grads) - 5.0).abs() < 1e-5);
    }
}
