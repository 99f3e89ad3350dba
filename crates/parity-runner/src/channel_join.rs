use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Merges every input into one receiver. The output closes once all inputs
/// have closed. Must be called inside a tokio runtime.
pub fn join_channels<T>(inputs: Vec<UnboundedReceiver<T>>) -> UnboundedReceiver<T>
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    for mut input in inputs {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(item) = input.recv().await {
                if tx.send(item).is_err() {
                    break;
                }
            }
        });
    }
    rx
}

/// Copies `from` into `to` with `prefix` prepended. After `interval` of
/// silence the last forwarded line is sent again so a watcher can tell a
/// slow source from a hung one. Stops when `from` closes or `to` is dropped.
pub fn forward_with_heartbeat<T>(
    prefix: String,
    mut from: UnboundedReceiver<String>,
    to: UnboundedSender<T>,
    interval: Duration,
) -> JoinHandle<()>
where
    T: From<String> + Send + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut last: Option<String> = None;
        loop {
            let silence = tokio::time::sleep(interval);
            tokio::select! {
                message = from.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    let line = format!("{prefix}{message}");
                    if to.send(T::from(line.clone())).is_err() {
                        break;
                    }
                    last = Some(line);
                }
                _ = silence => {
                    if let Some(line) = last.as_ref() {
                        if to.send(T::from(line.clone())).is_err() {
                            break;
                        }
                    }
                }
                _ = to.closed() => break,
            }
        }
    })
}
