//! Awaitable signal primitives.
//!
//! [`Flag`] is a set/clear signal any number of tasks can wait on.
//! [`twin_flags`] yields two flags that are always in opposite states; the
//! flip is atomic, so `select!`-ing over both waits disambiguates which side
//! fired without polling.

use {
    std::sync::{Arc, Mutex},
    tokio::sync::watch,
};

// ── Flag ────────────────────────────────────────────────────────────────────

/// An awaitable boolean signal. Clones share the same state.
#[derive(Clone, Debug)]
pub struct Flag {
    tx: watch::Sender<bool>,
}

impl Flag {
    pub fn new(initial: bool) -> Self {
        Self {
            tx: watch::channel(initial).0,
        }
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the flag is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, which is borrowed for the whole wait,
        // so the channel cannot close under us.
        let _ = rx.wait_for(|set| *set).await;
    }
}

// ── Twin flags ──────────────────────────────────────────────────────────────

/// One half of a twin pair: setting one half clears the other under a shared
/// lock, so the two are never observed both set or both clear.
#[derive(Clone, Debug)]
pub struct TwinFlag {
    own: watch::Sender<bool>,
    other: watch::Sender<bool>,
    pair_lock: Arc<Mutex<()>>,
}

impl TwinFlag {
    pub fn set(&self) {
        let _guard = self.pair_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.own.send_replace(true);
        self.other.send_replace(false);
    }

    pub fn clear(&self) {
        let _guard = self.pair_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.own.send_replace(false);
        self.other.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.own.borrow()
    }

    /// Wait until this half is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.own.subscribe();
        let _ = rx.wait_for(|set| *set).await;
    }
}

/// Build a twin pair. The first flag starts clear, the second starts set.
pub fn twin_flags() -> (TwinFlag, TwinFlag) {
    let a = watch::channel(false).0;
    let b = watch::channel(true).0;
    let pair_lock = Arc::new(Mutex::new(()));
    (
        TwinFlag {
            own: a.clone(),
            other: b.clone(),
            pair_lock: Arc::clone(&pair_lock),
        },
        TwinFlag {
            own: b,
            other: a,
            pair_lock,
        },
    )
}
