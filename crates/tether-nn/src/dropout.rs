// Dropout — Regularization via random zeroing
//
// During training, Dropout randomly sets elements to zero with probability p.
// The remaining elements are scaled by 1/(1-p) to preserve the expected value.
//
// During evaluation it returns a copy of its input.
//
// The train/eval switch is the `train` flag of forward_t rather than state
// stored in the layer, so one Dropout can serve both modes concurrently.

use tether_core::{Error, Result, Runtime, Tensor};

use crate::module::ModuleT;

/// Applies dropout regularization through the runtime's dropout primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    /// Probability of an element being zeroed.
    p: f64,
}

impl Dropout {
    /// Create a new Dropout layer. `p` must lie in `[0, 1)`.
    pub fn new(p: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(Error::invalid_config(format!(
                "dropout probability must be in [0, 1), got {}",
                p
            )));
        }
        Ok(Dropout { p })
    }

    pub fn p(&self) -> f64 {
        self.p
    }
}

impl<R: Runtime> ModuleT<R> for Dropout {
    fn forward_t(&self, xs: &Tensor<R>, train: bool) -> Result<Tensor<R>> {
        xs.dropout(self.p, train)
    }
}
