//! Transform trait for per-tensor operations applied by a map node

use std::fmt;
use std::sync::Arc;

use crate::schema::Field;
use crate::tensor::Tensor;

/// An opaque one-tensor-in, one-tensor-out operation
///
/// Implementations must be stateless with respect to rows: the map operator
/// may call `apply` concurrently from several workers.
pub trait TensorOp: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Transform a tensor
    fn apply(&self, input: Tensor) -> anyhow::Result<Tensor>;

    /// Describe the output column produced from `input`
    ///
    /// The default assumes the operation keeps type and shape.
    fn output_field(&self, input: &Field) -> Field {
        input.clone()
    }
}

impl fmt::Debug for dyn TensorOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TensorOp({})", self.name())
    }
}

/// A [`TensorOp`] built from a closure
pub struct FnOp<F> {
    name: String,
    func: F,
}

impl<F> FnOp<F>
where
    F: Fn(Tensor) -> anyhow::Result<Tensor> + Send + Sync + 'static,
{
    /// Create a named operation from a closure
    pub fn new(name: &str, func: F) -> Self {
        Self {
            name: name.to_string(),
            func,
        }
    }

    /// Create the operation already wrapped for a map node
    pub fn shared(name: &str, func: F) -> Arc<dyn TensorOp> {
        Arc::new(Self::new(name, func))
    }
}

impl<F> TensorOp for FnOp<F>
where
    F: Fn(Tensor) -> anyhow::Result<Tensor> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, input: Tensor) -> anyhow::Result<Tensor> {
        (self.func)(input)
    }
}

/// Apply `ops` in order to `input`, returning the failing op's name on error
pub fn apply_chain(ops: &[Arc<dyn TensorOp>], input: Tensor) -> Result<Tensor, (String, anyhow::Error)> {
    let mut current = input;
    for op in ops {
        current = op.apply(current).map_err(|e| (op.name().to_string(), e))?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_applies_in_order_and_names_failures() {
        let double = FnOp::shared("double", |t: Tensor| {
            let v: Vec<i32> = t.to_vec()?;
            Ok(Tensor::vector(&v.iter().map(|x| x * 2).collect::<Vec<_>>()))
        });
        let fail = FnOp::shared("fail", |_t: Tensor| Err(anyhow::anyhow!("boom")));

        let out = apply_chain(&[double.clone(), double.clone()], Tensor::vector(&[1i32, 2])).unwrap();
        assert_eq!(out.to_vec::<i32>().unwrap(), vec![4, 8]);

        let (name, err) = apply_chain(&[double, fail], Tensor::vector(&[1i32])).unwrap_err();
        assert_eq!(name, "fail");
        assert_eq!(err.to_string(), "boom");
    }
}
