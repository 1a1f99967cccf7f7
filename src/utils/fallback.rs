use std::fmt::Display;

/// Explicit fail-open policy: log the error and continue with the
/// type's default value.
pub trait FailOpen<T> {
    fn fail_open(self, context: &str) -> T;
}

impl<T, E> FailOpen<T> for Result<T, E>
where
    T: Default,
    E: Display,
{
    fn fail_open(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "{context}; continuing with default");
                T::default()
            }
        }
    }
}
