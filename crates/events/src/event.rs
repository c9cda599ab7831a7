use chrono::{DateTime, Utc};

/// A typed change notification.
///
/// Implementors describe something that already happened; the envelope copies
/// these accessors into its metadata when the event is wrapped for publishing.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name subscribers route on (e.g. "stock.movement.recorded").
    fn event_type(&self) -> &'static str;

    /// Payload schema version; bumped when fields change meaning.
    fn version(&self) -> u32;

    /// Business time of the underlying fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
