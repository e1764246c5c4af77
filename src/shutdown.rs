//! Shutdown signalling.
//!
//! [`Quit`] is a shared one-way switch: once set, every task holding a
//! [`QuitSignal`] finishes its current step and exits.

use tokio::sync::watch;

#[derive(Clone)]
pub struct Quit {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct QuitSignal {
    rx: watch::Receiver<bool>,
}

impl Default for Quit {
    fn default() -> Self {
        Self::new()
    }
}

impl Quit {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> QuitSignal {
        QuitSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl QuitSignal {
    /// Resolves once quit is set. Also resolves if every [`Quit`] is gone.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|quit| *quit).await;
    }

    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Completes on SIGINT, SIGTERM or SIGQUIT.
pub async fn wait_for_os_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => log::info!("SIGINT received"),
        _ = sigterm.recv() => log::info!("SIGTERM received"),
        _ = sigquit.recv() => log::info!("SIGQUIT received"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn all_waiters_wake() {
        let quit = Quit::new();
        let mut a = quit.signal();
        let mut b = quit.signal();

        let waiters = tokio::spawn(async move {
            a.wait().await;
            b.wait().await;
        });

        quit.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiters)
            .await
            .unwrap()
            .unwrap();
        assert!(quit.is_set());
    }

    #[tokio::test]
    async fn late_subscriber_sees_quit() {
        let quit = Quit::new();
        quit.trigger();
        let mut late = quit.signal();
        assert!(late.is_set());
        late.wait().await;
    }
}
