use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Callback used by engines to post typed events back to whoever drives them.
pub type EventSink<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Wraps an unbounded channel so engine events arrive mapped into the
/// driver's own event type.
pub fn channel_sink<E, T, F>(tx: UnboundedSender<T>, map: F) -> EventSink<E>
where
    E: 'static,
    T: Send + 'static,
    F: Fn(E) -> T + Send + Sync + 'static,
{
    Arc::new(move |event| {
        if tx.send(map(event)).is_err() {
            tracing::debug!("event dropped: receiver closed");
        }
    })
}
