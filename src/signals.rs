/// Signal handling for shutdown.
///
/// SIGINT and SIGTERM cancel the root token. The supervised command runs in
/// its own process group, so a terminal Ctrl-C does not reach it directly; it
/// is killed through the cancelled attempt token instead.
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct SignalHandler {
    task: JoinHandle<()>,
}

impl SignalHandler {
    /// Register SIGINT/SIGTERM handlers that cancel `shutdown` on every
    /// delivery.
    pub fn install(shutdown: CancellationToken) -> std::io::Result<SignalHandler> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        let task = tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    received = interrupt.recv() => match received {
                        Some(()) => "SIGINT",
                        None => return,
                    },
                    received = terminate.recv() => match received {
                        Some(()) => "SIGTERM",
                        None => return,
                    },
                };
                tracing::info!(sig = name, "received signal");
                shutdown.cancel();
            }
        });

        Ok(SignalHandler { task })
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
