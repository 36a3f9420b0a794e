//! The pluggable record transformation a stage applies.
//!
//! A stage holds a transform by composition; it never is one.

use std::fmt::Debug;

/// A synchronous transformation from one input record to zero or more
/// output records.
///
/// Implementations must not block. Errors are fatal to the worker run.
pub trait Transform<I, O>: Send + Sync {
    /// Transforms `input`, appending produced records to `outputs`.
    fn apply(&self, input: &I, outputs: &mut Vec<O>) -> anyhow::Result<()>;

    /// Returns a short name for diagnostics.
    fn name(&self) -> &str {
        "transform"
    }
}

/// A function-based transform.
pub struct FnTransform<F> {
    name: String,
    func: F,
}

impl<F> FnTransform<F> {
    /// Creates a new function-based transform.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnTransform<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform")
            .field("name", &self.name)
            .finish()
    }
}

impl<I, O, F> Transform<I, O> for FnTransform<F>
where
    F: Fn(&I, &mut Vec<O>) -> anyhow::Result<()> + Send + Sync,
{
    fn apply(&self, input: &I, outputs: &mut Vec<O>) -> anyhow::Result<()> {
        (self.func)(input, outputs)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Creates a transform that maps each input to exactly one output.
pub fn map_transform<I, O, F>(name: impl Into<String>, func: F) -> impl Transform<I, O>
where
    F: Fn(&I) -> O + Send + Sync,
{
    FnTransform::new(name, move |input: &I, outputs: &mut Vec<O>| -> anyhow::Result<()> {
        outputs.push(func(input));
        Ok(())
    })
}
