//! Runtime metrics of a router. The main item of interest is the [`Metrics`] trait. Users can
//! provide their own implementation, or use [`NoMetrics`] to disable gathering metrics.

use std::time::Duration;

use crate::{adjacency::ChangeReason, level::Level};

/// The collection of all metrics exported by a [`Router`](crate::router::Router). All methods
/// have a default implementation, so an implementation only needs to provide the methods for the
/// metrics it is interested in:
///
/// ```rust
/// use isis::metrics::Metrics;
///
/// #[derive(Clone)]
/// struct NoMetrics;
/// impl Metrics for NoMetrics {}
/// ```
pub trait Metrics {
    /// A PDU was received on a circuit.
    #[inline]
    fn pdu_received(&self) {}

    /// A received PDU could not be decoded.
    #[inline]
    fn pdu_malformed(&self) {}

    /// A received LSP had an invalid checksum.
    #[inline]
    fn pdu_checksum_invalid(&self) {}

    /// A received PDU failed authentication.
    #[inline]
    fn pdu_auth_failure(&self) {}

    /// An adjacency came up on the given level.
    #[inline]
    fn adjacency_up(&self, _level: Level) {}

    /// An adjacency went down on the given level.
    #[inline]
    fn adjacency_down(&self, _level: Level, _reason: ChangeReason) {}

    /// The designated router of a broadcast circuit changed.
    #[inline]
    fn dis_changed(&self, _level: Level) {}

    /// A newer LSP from a neighbor was installed in the database.
    #[inline]
    fn lsp_installed(&self, _level: Level) {}

    /// An LSP was purged, either by us or by a received purge.
    #[inline]
    fn lsp_purged(&self, _level: Level) {}

    /// We originated a new instance of one of our own LSPs.
    #[inline]
    fn lsp_originated(&self, _level: Level) {}

    /// A shortest path computation ran, and took the given time.
    #[inline]
    fn spf_ran(&self, _level: Level, _duration: Duration) {}

    /// A new route set was published.
    #[inline]
    fn routes_published(&self, _routes: usize) {}
}

/// A [`Metrics`] implementation which doesn't record anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetrics;

impl Metrics for NoMetrics {}
