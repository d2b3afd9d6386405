//! `async` related
//!
//! Requires `std`.

//---------------------------------------------------------------------------------------------------- Use
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{channel::oneshot, future::Either, FutureExt};
use tokio_util::sync::CancellationToken;

//---------------------------------------------------------------------------------------------------- InfallibleOneshotReceiver
/// A oneshot receiver channel that doesn't return an Error.
///
/// This requires the sender to always return a response.
pub struct InfallibleOneshotReceiver<T>(oneshot::Receiver<T>);

impl<T> From<oneshot::Receiver<T>> for InfallibleOneshotReceiver<T> {
    fn from(value: oneshot::Receiver<T>) -> Self {
        Self(value)
    }
}

impl<T> Future for InfallibleOneshotReceiver<T> {
    type Output = T;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0
            .poll_unpin(ctx)
            .map(|res| res.expect("Oneshot must not be cancelled before response!"))
    }
}

//---------------------------------------------------------------------------------------------------- rayon_spawn_async
/// Spawns a task for the rayon thread pool and awaits the result without blocking the async runtime.
pub async fn rayon_spawn_async<F, R>(f: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    rayon::spawn(move || {
        drop(tx.send(f()));
    });
    rx.await.expect("The sender must not be dropped")
}

//---------------------------------------------------------------------------------------------------- cancellable
/// The future passed to [`cancellable`] was cancelled before it completed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Cancelled;

/// Drives `fut` to completion unless `token` is cancelled first.
///
/// Cancellation is checked before the future is polled, so an already cancelled
/// token always wins.
pub async fn cancellable<F: Future>(
    token: &CancellationToken,
    fut: F,
) -> Result<F::Output, Cancelled> {
    let cancelled = token.cancelled();
    futures::pin_mut!(cancelled, fut);

    // `select` polls the left future first.
    match futures::future::select(cancelled, fut).await {
        Either::Left(((), _)) => Err(Cancelled),
        Either::Right((out, _)) => Ok(out),
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod test {
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn infallible_oneshot_receiver() {
        let (tx, rx) = oneshot::channel::<u64>();
        tx.send(7).unwrap();

        assert_eq!(InfallibleOneshotReceiver::from(rx).await, 7);
    }

    #[tokio::test]
    async fn cancelled_token_wins() {
        let token = CancellationToken::new();
        token.cancel();

        let res = cancellable(&token, async { 1 }).await;
        assert_eq!(res, Err(Cancelled));
    }

    #[tokio::test]
    async fn uncancelled_future_completes() {
        let token = CancellationToken::new();
        let res = cancellable(&token, async { 1 }).await;
        assert_eq!(res, Ok(1));
    }

    #[test]
    fn rayon_spawn_async_does_not_block() {
        // There must be more than 1 rayon thread for this to work.
        rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build_global()
            .unwrap();

        // Both tasks block their rayon thread until the other one runs.
        let barrier = Arc::new(Barrier::new(2));
        let task = |barrier: &Barrier| barrier.wait();

        let b_2 = Arc::clone(&barrier);

        let (tx, rx) = std::sync::mpsc::channel();

        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                tokio::join!(
                    rayon_spawn_async(move || task(&barrier)),
                    rayon_spawn_async(move || task(&b_2)),
                )
            });

            tx.send(()).unwrap();
        });

        rx.recv_timeout(Duration::from_secs(2))
            .expect("rayon_spawn_async blocked");
    }
}
