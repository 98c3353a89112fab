//! Strictly sequential composition of asynchronous steps.
//!
//! [`sequence`] runs a dynamic list of [`Step`]s one after another against a
//! shared mutable state. A step starts only after the previous one settled
//! with `Outcome::Ok`; the first `Err`, `Cancelled` or `Panicked` outcome stops
//! the chain and is returned as-is. An empty list settles immediately.

use asupersync::{Cx, Outcome};
use rxsql_core::Error;
use std::future::{Future, ready};
use std::pin::Pin;

/// Boxed future produced by one step.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>>;

/// One asynchronous step operating on `S`.
pub trait Step<S: ?Sized>: Send + Sync {
    fn run<'a>(&'a self, cx: &'a Cx, state: &'a mut S) -> StepFuture<'a>;
}

/// An already-settled, empty step result.
pub fn completed<'a>() -> StepFuture<'a> {
    Box::pin(ready(Outcome::Ok(())))
}

/// Run `steps` in order, stopping at the first outcome that is not `Ok`.
pub async fn sequence<'s, S, T, I>(cx: &Cx, state: &mut S, steps: I) -> Outcome<(), Error>
where
    S: ?Sized + Send,
    T: Step<S> + ?Sized + 's,
    I: IntoIterator<Item = &'s T>,
    I::IntoIter: Send,
{
    for (index, step) in steps.into_iter().enumerate() {
        match step.run(cx, &mut *state).await {
            Outcome::Ok(()) => tracing::trace!(step = index, "Step settled"),
            Outcome::Err(e) => {
                tracing::debug!(step = index, error = %e, "Step failed, aborting chain");
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => {
                tracing::debug!(step = index, "Step cancelled, aborting chain");
                return Outcome::Cancelled(r);
            }
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }
    Outcome::Ok(())
}
