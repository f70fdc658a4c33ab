// Request correlation tracker — the single outstanding-request slot per kind
//
// Mesh delivery is at-least-once and unordered, so responses can arrive
// late, duplicated, or for a request the user has already superseded. Every
// async resumption point checks `is_current` before applying a result; that
// check is the sole discipline keeping stale responses from corrupting
// state after a newer request began.

use std::time::Duration;

use futures::future::AbortHandle;
use parking_lot::Mutex;
use tracing::debug;

/// The two kinds of relayed operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Patient name search
    Search,
    /// Patient record creation
    Create,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Search => write!(f, "search"),
            Self::Create => write!(f, "create"),
        }
    }
}

/// One in-flight request of a given kind
struct Outstanding {
    /// Literal query/payload text; doubles as the correlation key
    payload: String,
    /// Monotonic identity; a new request of the same kind invalidates the old
    generation: u64,
    /// Best-effort abort for the in-flight remote call, if any
    abort: Option<AbortHandle>,
}

#[derive(Default)]
struct Slots {
    search: Option<Outstanding>,
    create: Option<Outstanding>,
    next_generation: u64,
}

impl Slots {
    fn slot_mut(&mut self, kind: RequestKind) -> &mut Option<Outstanding> {
        match kind {
            RequestKind::Search => &mut self.search,
            RequestKind::Create => &mut self.create,
        }
    }
}

/// Tracks at most one outstanding request per kind
#[derive(Default)]
pub struct RequestTracker {
    slots: Mutex<Slots>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new outstanding request, cancelling and discarding any
    /// previous one of the same kind. Returns the new request's generation.
    pub fn begin(&self, kind: RequestKind, payload: impl Into<String>) -> u64 {
        let mut slots = self.slots.lock();
        slots.next_generation += 1;
        let generation = slots.next_generation;

        if let Some(previous) = slots.slot_mut(kind).take() {
            debug!(%kind, superseded = %previous.payload, "superseding outstanding request");
            if let Some(abort) = previous.abort {
                abort.abort();
            }
        }

        *slots.slot_mut(kind) = Some(Outstanding {
            payload: payload.into(),
            generation,
            abort: None,
        });
        generation
    }

    /// Register the in-flight call's abort handle, if the request is still
    /// the current one. A superseded request's handle is aborted immediately.
    pub fn attach_abort(&self, kind: RequestKind, generation: u64, handle: AbortHandle) {
        let mut slots = self.slots.lock();
        match slots.slot_mut(kind) {
            Some(current) if current.generation == generation => {
                current.abort = Some(handle);
            }
            _ => handle.abort(),
        }
    }

    /// True iff `payload` matches the stored outstanding request of `kind`.
    /// Called at every async resumption point before applying a result.
    pub fn is_current(&self, kind: RequestKind, payload: &str) -> bool {
        self.slots
            .lock()
            .slot_mut(kind)
            .as_ref()
            .is_some_and(|o| o.payload == payload)
    }

    /// True iff any request of `kind` is outstanding
    pub fn has_outstanding(&self, kind: RequestKind) -> bool {
        self.slots.lock().slot_mut(kind).is_some()
    }

    /// Payload of the current outstanding request of `kind`, if any
    pub fn current_payload(&self, kind: RequestKind) -> Option<String> {
        self.slots
            .lock()
            .slot_mut(kind)
            .as_ref()
            .map(|o| o.payload.clone())
    }

    /// Clear the outstanding request of `kind` (success, match, or give-up)
    pub fn complete(&self, kind: RequestKind) {
        self.slots.lock().slot_mut(kind).take();
    }

    /// Sleep for `duration`, then clear the slot iff `generation` is still
    /// the current request. Returns true iff the timeout actually fired, so
    /// a superseded or completed request never triggers a second fallback.
    pub async fn timeout(&self, kind: RequestKind, generation: u64, duration: Duration) -> bool {
        tokio::time::sleep(duration).await;

        let mut slots = self.slots.lock();
        let slot = slots.slot_mut(kind);
        let fired = matches!(slot.as_ref(), Some(o) if o.generation == generation);
        if fired {
            debug!(%kind, generation, "outstanding request timed out");
            if let Some(abort) = slot.take().and_then(|o| o.abort) {
                abort.abort();
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::{AbortHandle, Abortable, Aborted};

    #[test]
    fn test_begin_installs_and_is_current_matches() {
        let tracker = RequestTracker::new();
        tracker.begin(RequestKind::Search, "amina");

        assert!(tracker.is_current(RequestKind::Search, "amina"));
        assert!(!tracker.is_current(RequestKind::Search, "bekele"));
        assert!(!tracker.is_current(RequestKind::Create, "amina"));
    }

    #[test]
    fn test_at_most_one_outstanding_per_kind() {
        let tracker = RequestTracker::new();
        tracker.begin(RequestKind::Search, "first");
        tracker.begin(RequestKind::Search, "second");

        // The superseded request is gone; only the newest payload matches
        assert!(!tracker.is_current(RequestKind::Search, "first"));
        assert!(tracker.is_current(RequestKind::Search, "second"));
    }

    #[test]
    fn test_kinds_are_independent() {
        let tracker = RequestTracker::new();
        tracker.begin(RequestKind::Search, "query");
        tracker.begin(RequestKind::Create, "{\"name\":\"x\"}");

        assert!(tracker.has_outstanding(RequestKind::Search));
        assert!(tracker.has_outstanding(RequestKind::Create));

        tracker.complete(RequestKind::Search);
        assert!(!tracker.has_outstanding(RequestKind::Search));
        assert!(tracker.has_outstanding(RequestKind::Create));
    }

    #[tokio::test]
    async fn test_supersession_aborts_in_flight_call() {
        let tracker = RequestTracker::new();
        let generation = tracker.begin(RequestKind::Search, "first");

        let (handle, registration) = AbortHandle::new_pair();
        tracker.attach_abort(RequestKind::Search, generation, handle);

        let call = Abortable::new(futures::future::pending::<()>(), registration);
        tracker.begin(RequestKind::Search, "second");

        assert_eq!(call.await, Err(Aborted));
    }

    #[tokio::test]
    async fn test_attach_abort_on_stale_generation_aborts_immediately() {
        let tracker = RequestTracker::new();
        let stale = tracker.begin(RequestKind::Search, "first");
        tracker.begin(RequestKind::Search, "second");

        let (handle, registration) = AbortHandle::new_pair();
        tracker.attach_abort(RequestKind::Search, stale, handle);

        let call = Abortable::new(futures::future::pending::<()>(), registration);
        assert_eq!(call.await, Err(Aborted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once_and_clears_slot() {
        let tracker = RequestTracker::new();
        let generation = tracker.begin(RequestKind::Search, "query");

        assert!(
            tracker
                .timeout(RequestKind::Search, generation, Duration::from_secs(10))
                .await
        );
        assert!(!tracker.has_outstanding(RequestKind::Search));

        // A second firing for the same generation is a no-op
        assert!(
            !tracker
                .timeout(RequestKind::Search, generation, Duration::from_secs(10))
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_fire_for_superseded_request() {
        let tracker = RequestTracker::new();
        let generation = tracker.begin(RequestKind::Search, "first");
        tracker.begin(RequestKind::Search, "second");

        assert!(
            !tracker
                .timeout(RequestKind::Search, generation, Duration::from_secs(10))
                .await
        );
        // The newer request is untouched
        assert!(tracker.is_current(RequestKind::Search, "second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_fire_after_completion() {
        let tracker = RequestTracker::new();
        let generation = tracker.begin(RequestKind::Create, "{}");
        tracker.complete(RequestKind::Create);

        assert!(
            !tracker
                .timeout(RequestKind::Create, generation, Duration::from_secs(15))
                .await
        );
    }
}
