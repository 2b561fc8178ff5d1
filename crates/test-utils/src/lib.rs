//! Shared test utilities for the Meridian client crates.
//!
//! - [`assert_eventually`] - Poll a condition until it's true or timeout
//! - [`strategies`] - Proptest generators for session tokens and key ranges

#![deny(unsafe_code)]

mod assertions;
pub use assertions::assert_eventually;

pub mod strategies;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn assert_eventually_immediate_true() {
        assert!(assert_eventually(Duration::from_millis(100), || true).await);
    }

    #[tokio::test(start_paused = true)]
    async fn assert_eventually_times_out() {
        assert!(!assert_eventually(Duration::from_millis(50), || false).await);
    }

    #[tokio::test(start_paused = true)]
    async fn assert_eventually_polls_until_true() {
        let polls = AtomicUsize::new(0);
        let result = assert_eventually(Duration::from_secs(1), || {
            polls.fetch_add(1, Ordering::SeqCst) >= 3
        })
        .await;
        assert!(result);
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn assert_eventually_sees_spawned_task() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            setter.store(true, Ordering::SeqCst);
        });
        assert!(assert_eventually(Duration::from_millis(200), || flag.load(Ordering::SeqCst)).await);
    }
}
