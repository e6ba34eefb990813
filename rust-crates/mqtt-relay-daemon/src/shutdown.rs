//! Process shutdown signals (Ctrl-C, and SIGTERM on Unix)

use tokio::signal;
use tracing::warn;

/// Signal that asked the relay to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Interrupt,
    Terminate,
}

pub struct ShutdownSignals {
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl ShutdownSignals {
    /// Install the handlers; SIGTERM no longer kills the process after this
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal::unix::signal(signal::unix::SignalKind::terminate())?,
        })
    }

    /// Wait for the next shutdown request
    pub async fn recv(&mut self) -> Shutdown {
        let interrupt = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = self.terminate.recv();

        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = interrupt => Shutdown::Interrupt,
            _ = terminate => Shutdown::Terminate,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_requests_shutdown() {
        let mut signals = ShutdownSignals::install().unwrap();

        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("kill -TERM {}", std::process::id()))
            .status()
            .unwrap();
        assert!(status.success());

        let reason = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .expect("SIGTERM observed");
        assert_eq!(reason, Shutdown::Terminate);
    }
}
