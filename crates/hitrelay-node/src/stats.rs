/// Counters accumulated by relay operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Messages appended to channel queues.
    pub queued_messages: usize,
    /// Batches handed to a channel endpoint.
    pub flushed_batches: usize,
    /// Messages contained in flushed batches.
    pub flushed_messages: usize,
    /// Queued messages dropped because their channel was torn down.
    pub discarded_messages: usize,
    /// Beacons accepted by the runtime.
    pub beacon_sends: usize,
    /// Credentialed POSTs dispatched.
    pub post_sends: usize,
    /// Pixel GETs started.
    pub pixel_sends: usize,
    /// Dispatches where no requested strategy applied.
    pub exhausted_requests: usize,
    /// Sends that failed at the transport (endpoint, post, pixel).
    pub delivery_failures: usize,
    /// Extra-data payloads delivered to an endpoint.
    pub extra_data_delivered: usize,
    /// Extra-data payloads abandoned (retry bound hit or channel gone).
    pub extra_data_dropped: usize,
    /// Inbound responses handed to at least one handler.
    pub responses_delivered: usize,
    /// Inbound payloads ignored as malformed or foreign.
    pub responses_ignored: usize,
    /// Load completions dropped because they belong to a torn-down channel.
    pub stale_loads_ignored: usize,
    /// One-shot ping frames opened.
    pub pings_opened: usize,
    /// One-shot ping frames removed after teardown delay.
    pub pings_removed: usize,
}
