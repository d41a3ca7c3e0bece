// Sequential — A chain of layers applied one after another
//
// Example:
//   let model = Sequential::new()
//       .add(deconv1)
//       .add_fn(|xs| relu(xs))
//       .add(deconv2);
//
//   let output = model.forward(&input)?;
//
// The output of each layer becomes the input to the next. Intermediate
// outputs are released as soon as the following layer has produced its own,
// so a long chain holds at most two activations at a time. An empty chain
// returns a copy of its input.
//
// SequentialT is the same container for ModuleT layers; the train flag is
// passed to every layer.

use tether_core::{Result, Runtime, Tensor};

use crate::module::{func, func_t, Module, ModuleT};

/// Run `first` then each of `rest` on the previous output, releasing every
/// intermediate once it has been consumed.
fn chain<'m, R, L, F>(xs: &Tensor<R>, layers: &'m [L], run: F) -> Result<Tensor<R>>
where
    R: Runtime,
    F: Fn(&'m L, &Tensor<R>) -> Result<Tensor<R>>,
{
    let Some((first, rest)) = layers.split_first() else {
        return xs.deep_clone();
    };
    let mut out = run(first, xs)?;
    for layer in rest {
        let next = run(layer, &out)?;
        std::mem::replace(&mut out, next).release()?;
    }
    Ok(out)
}

/// A container that chains modules sequentially.
pub struct Sequential<R: Runtime> {
    layers: Vec<Box<dyn Module<R>>>,
}

impl<R: Runtime> Sequential<R> {
    /// Create an empty Sequential.
    pub fn new() -> Self {
        Sequential { layers: Vec::new() }
    }

    /// Add a layer to the end of the sequence. Returns self for chaining.
    #[allow(clippy::should_implement_trait)]
    pub fn add<M: Module<R> + 'static>(mut self, module: M) -> Self {
        self.layers.push(Box::new(module));
        self
    }

    /// Add a closure layer.
    pub fn add_fn<F>(self, f: F) -> Self
    where
        F: 'static + Fn(&Tensor<R>) -> Result<Tensor<R>>,
    {
        self.add(func(f))
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<R: Runtime> Default for Sequential<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runtime> std::fmt::Debug for Sequential<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sequential({} layers)", self.layers.len())
    }
}

impl<R: Runtime> Module<R> for Sequential<R> {
    fn forward(&self, xs: &Tensor<R>) -> Result<Tensor<R>> {
        chain(xs, self.layers.as_slice(), |layer, x| layer.forward(x))
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor<R>)> {
        let mut named = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            for (k, v) in layer.named_parameters() {
                named.push((format!("{i}.{k}"), v));
            }
        }
        named
    }
}

/// A container that chains train-aware layers sequentially.
pub struct SequentialT<R: Runtime> {
    layers: Vec<Box<dyn ModuleT<R>>>,
}

impl<R: Runtime> SequentialT<R> {
    pub fn new() -> Self {
        SequentialT { layers: Vec::new() }
    }

    /// Add a layer to the end of the sequence. Returns self for chaining.
    #[allow(clippy::should_implement_trait)]
    pub fn add<M: ModuleT<R> + 'static>(mut self, module: M) -> Self {
        self.layers.push(Box::new(module));
        self
    }

    /// Add a closure layer that ignores the train flag.
    pub fn add_fn<F>(self, f: F) -> Self
    where
        F: 'static + Fn(&Tensor<R>) -> Result<Tensor<R>>,
    {
        self.add(func(f))
    }

    /// Add a closure layer that receives the train flag.
    pub fn add_fn_t<F>(self, f: F) -> Self
    where
        F: 'static + Fn(&Tensor<R>, bool) -> Result<Tensor<R>>,
    {
        self.add(func_t(f))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<R: Runtime> Default for SequentialT<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runtime> std::fmt::Debug for SequentialT<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SequentialT({} layers)", self.layers.len())
    }
}

crate::impl_module_t!([R: Runtime] Sequential<R>, R);

impl<R: Runtime> ModuleT<R> for SequentialT<R> {
    fn forward_t(&self, xs: &Tensor<R>, train: bool) -> Result<Tensor<R>> {
        chain(xs, self.layers.as_slice(), |layer, x| layer.forward_t(x, train))
    }
}
