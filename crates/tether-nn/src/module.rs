// Module traits — the interface every layer implements
//
// Two traits, depending on whether a layer cares about train vs eval mode:
//
//   Module   forward(xs)           — pure layers (ConvTranspose, Func, ...)
//   ModuleT  forward_t(xs, train)  — layers that behave differently while
//                                    training (Dropout, SequentialT, ...)
//
// Code that only needs to run a model (the evaluator, SequentialT) takes
// `ModuleT`. A Module opts in with `impl_module_t!`, which forwards
// forward_t to forward and ignores the flag:
//
//   impl_module_t!(MyLayer, HostRuntime);
//   impl_module_t!([R: Runtime] MyLayer<R>, R);
//
// OWNERSHIP:
//
// forward never consumes its input. It borrows the input handle and returns a
// freshly allocated output the caller owns. A layer that has nothing to
// compute still returns a materialized copy, never an alias of its input.
//
// Parameters are reported as borrowed handles: the layer keeps owning them.

use tether_core::{Result, Runtime, Tensor};

/// A layer whose output depends only on its input.
///
/// # Example
/// ```ignore
/// struct Twice<R: Runtime> { inner: ConvTranspose<R> }
///
/// impl<R: Runtime> Module<R> for Twice<R> {
///     fn forward(&self, xs: &Tensor<R>) -> Result<Tensor<R>> {
///         let h = self.inner.forward(xs)?;
///         self.inner.forward(&h)
///     }
///     fn named_parameters(&self) -> Vec<(String, &Tensor<R>)> {
///         self.inner.named_parameters()
///     }
/// }
/// ```
pub trait Module<R: Runtime> {
    /// Compute the output for `xs`. The result is a new tensor.
    fn forward(&self, xs: &Tensor<R>) -> Result<Tensor<R>>;

    /// Trainable parameters with names such as `"weight"` or `"0.bias"`.
    ///
    /// The default is no parameters.
    fn named_parameters(&self) -> Vec<(String, &Tensor<R>)> {
        Vec::new()
    }

    /// Trainable parameters, in the order of `named_parameters`.
    fn parameters(&self) -> Vec<&Tensor<R>> {
        self.named_parameters().into_iter().map(|(_, p)| p).collect()
    }

    /// Total number of scalar parameters in this module.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.elem_count()).sum()
    }
}

/// A layer whose output may depend on whether the model is training.
pub trait ModuleT<R: Runtime> {
    fn forward_t(&self, xs: &Tensor<R>, train: bool) -> Result<Tensor<R>>;
}

/// Implement [`ModuleT`] for a [`Module`] by ignoring the train flag.
///
/// The generic form takes the impl parameters in brackets:
/// `impl_module_t!([R: Runtime] Sequential<R>, R)`.
#[macro_export]
macro_rules! impl_module_t {
    ([$($gen:tt)*] $ty:ty, $rt:ty) => {
        impl<$($gen)*> $crate::ModuleT<$rt> for $ty {
            fn forward_t(
                &self,
                xs: &$crate::__private::Tensor<$rt>,
                _train: bool,
            ) -> $crate::__private::Result<$crate::__private::Tensor<$rt>> {
                <Self as $crate::Module<$rt>>::forward(self, xs)
            }
        }
    };
    ($ty:ty, $rt:ty) => {
        $crate::impl_module_t!([] $ty, $rt);
    };
}

/// Method-call sugar for running layers on a tensor.
///
/// ```ignore
/// let ys = xs.apply(&conv)?.apply_t(&dropout, train)?;
/// ```
pub trait ApplyExt<R: Runtime> {
    fn apply<M: Module<R> + ?Sized>(&self, m: &M) -> Result<Tensor<R>>;

    fn apply_t<M: ModuleT<R> + ?Sized>(&self, m: &M, train: bool) -> Result<Tensor<R>>;

    /// Apply `m` if present; otherwise return a copy of the input.
    fn apply_opt(&self, m: Option<&dyn Module<R>>) -> Result<Tensor<R>>;

    /// Apply `m` if present; otherwise return a copy of the input.
    fn apply_opt_t(&self, m: Option<&dyn ModuleT<R>>, train: bool) -> Result<Tensor<R>>;
}

impl<R: Runtime> ApplyExt<R> for Tensor<R> {
    fn apply<M: Module<R> + ?Sized>(&self, m: &M) -> Result<Tensor<R>> {
        m.forward(self)
    }

    fn apply_t<M: ModuleT<R> + ?Sized>(&self, m: &M, train: bool) -> Result<Tensor<R>> {
        m.forward_t(self, train)
    }

    fn apply_opt(&self, m: Option<&dyn Module<R>>) -> Result<Tensor<R>> {
        match m {
            Some(m) => m.forward(self),
            None => self.deep_clone(),
        }
    }

    fn apply_opt_t(&self, m: Option<&dyn ModuleT<R>>, train: bool) -> Result<Tensor<R>> {
        match m {
            Some(m) => m.forward_t(self, train),
            None => self.deep_clone(),
        }
    }
}

// Closure-backed layers

/// A [`Module`] built from a closure.
pub struct Func<'a, R: Runtime> {
    f: Box<dyn 'a + Fn(&Tensor<R>) -> Result<Tensor<R>>>,
}

impl<R: Runtime> std::fmt::Debug for Func<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "func")
    }
}

/// Wrap a closure as a [`Module`].
pub fn func<'a, R, F>(f: F) -> Func<'a, R>
where
    R: Runtime,
    F: 'a + Fn(&Tensor<R>) -> Result<Tensor<R>>,
{
    Func { f: Box::new(f) }
}

impl<R: Runtime> Module<R> for Func<'_, R> {
    fn forward(&self, xs: &Tensor<R>) -> Result<Tensor<R>> {
        (self.f)(xs)
    }
}

crate::impl_module_t!(['a, R: Runtime] Func<'a, R>, R);

/// A [`ModuleT`] built from a closure that receives the train flag.
pub struct FuncT<'a, R: Runtime> {
    f: Box<dyn 'a + Fn(&Tensor<R>, bool) -> Result<Tensor<R>>>,
}

impl<R: Runtime> std::fmt::Debug for FuncT<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "func_t")
    }
}

/// Wrap a closure as a [`ModuleT`].
pub fn func_t<'a, R, F>(f: F) -> FuncT<'a, R>
where
    R: Runtime,
    F: 'a + Fn(&Tensor<R>, bool) -> Result<Tensor<R>>,
{
    FuncT { f: Box::new(f) }
}

impl<R: Runtime> ModuleT<R> for FuncT<'_, R> {
    fn forward_t(&self, xs: &Tensor<R>, train: bool) -> Result<Tensor<R>> {
        (self.f)(xs, train)
    }
}
