use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::trace;

/// Forwards the latest value from `input` to `on_settled` once `quiet` has
/// passed without a newer value. A newer value drops the pending timer. When
/// `input` closes, any pending value is delivered immediately.
pub async fn debounce<T, F>(mut input: mpsc::Receiver<T>, quiet: Duration, mut on_settled: F)
where
    F: FnMut(T),
{
    let mut pending: Option<T> = None;
    loop {
        if pending.is_none() {
            match input.recv().await {
                Some(value) => pending = Some(value),
                None => return,
            }
            continue;
        }

        tokio::select! {
            next = input.recv() => match next {
                Some(value) => {
                    trace!("superseded pending value");
                    pending = Some(value);
                }
                None => {
                    if let Some(value) = pending.take() {
                        on_settled(value);
                    }
                    return;
                }
            },
            _ = sleep(quiet) => {
                if let Some(value) = pending.take() {
                    on_settled(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(250);

    #[tokio::test(start_paused = true)]
    async fn bursts_collapse_to_last_value() {
        let (sender, receiver) = mpsc::channel(8);
        let mut settled = Vec::new();

        let producer = async move {
            for query in ["k", "ki", "kia"] {
                sender.send(query).await.unwrap();
                sleep(Duration::from_millis(40)).await;
            }
            sleep(Duration::from_secs(1)).await;
        };
        tokio::join!(producer, debounce(receiver, QUIET, |query| settled.push(query)));

        assert_eq!(settled, vec!["kia"]);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_gaps_release_each_value() {
        let (sender, receiver) = mpsc::channel(8);
        let mut settled = Vec::new();

        let producer = async move {
            sender.send("santos").await.unwrap();
            sleep(Duration::from_millis(400)).await;
            sender.send("reyes").await.unwrap();
            sleep(Duration::from_millis(50)).await;
            sender.send("reyna").await.unwrap();
            sleep(Duration::from_millis(400)).await;
        };
        tokio::join!(producer, debounce(receiver, QUIET, |query| settled.push(query)));

        assert_eq!(settled, vec!["santos", "reyna"]);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_input_flushes_pending_value() {
        let (sender, receiver) = mpsc::channel(8);
        let mut settled = Vec::new();

        sender.send("last").await.unwrap();
        drop(sender);
        debounce(receiver, QUIET, |query| settled.push(query)).await;

        assert_eq!(settled, vec!["last"]);
    }
}
