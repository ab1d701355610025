//! Structured reporting for rejected pongs, rejected actions and broken invariants.
//!
//! Anything a client does that the server refuses is turned into a
//! [`TimingViolation`] and handed to a [`ViolationObserver`]. Without an
//! observer the record goes to `tracing`. Hosts that feed an anti-cheat review
//! queue or a metrics counter plug in their own observer; tests use
//! [`CollectingObserver`].
//!
//! ```
//! use duel_timesync::telemetry::CollectingObserver;
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! // pass `observer.clone()` to TimeCoordinatorBuilder::with_violation_observer
//! assert!(observer.is_empty());
//! ```

use crate::PlayerId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// How bad a violation is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// The offending message was dropped; the match goes on.
    Warning,
    /// Server-side state was inconsistent; the input was dropped.
    Error,
    /// An internal invariant no longer holds.
    Critical,
}

impl ViolationSeverity {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was violated.
///
/// `#[non_exhaustive]`: keep a wildcard arm when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// A pong echoed a stamp that is not outstanding: replayed, forged or expired.
    ReplayDefense,
    /// A pong matched an outstanding ping but carried a non-finite client time.
    MalformedPong,
    /// An action failed one of the timing checks.
    ActionTiming,
    /// A runtime invariant check failed (debug builds or `paranoid`).
    Invariant,
    /// Per-player tables disagree with each other.
    InternalError,
}

impl ViolationKind {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReplayDefense => "replay_defense",
            Self::MalformedPong => "malformed_pong",
            Self::ActionTiming => "action_timing",
            Self::Invariant => "invariant",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported violation.
///
/// ```
/// use duel_timesync::telemetry::{TimingViolation, ViolationKind, ViolationSeverity};
/// use duel_timesync::PlayerId;
///
/// let violation = TimingViolation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::ReplayDefense,
///     "player 1 sent PONG with invalid serverTime 2000",
///     "time_coordinator.rs:42",
/// )
/// .with_player(PlayerId::new(1))
/// .with_context("server_time", 2000.0);
///
/// let json = violation.to_json().unwrap();
/// assert!(json.contains(r#""kind":"replay_defense""#));
/// assert!(json.contains(r#""player":1"#));
/// ```
#[derive(Debug, Clone, serde::Serialize)]
pub struct TimingViolation {
    /// How bad it is.
    pub severity: ViolationSeverity,
    /// What was violated.
    pub kind: ViolationKind,
    /// Human-readable description.
    pub message: String,
    /// `file:line` of the report.
    pub location: &'static str,
    /// The offending player, if any.
    pub player: Option<PlayerId>,
    /// Extra key/value details, kept sorted by key.
    pub context: BTreeMap<String, String>,
}

impl TimingViolation {
    /// Creates a record without player or context.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            player: None,
            context: BTreeMap::new(),
        }
    }

    /// Attributes the violation to `player`.
    #[must_use]
    pub fn with_player(mut self, player: PlayerId) -> Self {
        self.player = Some(player);
        self
    }

    /// Attaches a detail, e.g. the rejected timestamp.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Compact JSON, for shipping to a review queue.
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    fn context_summary(&self) -> String {
        self.context
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for TimingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}]", self.severity, self.kind)?;
        if let Some(player) = self.player {
            write!(f, " player {player}:")?;
        }
        write!(f, " {} ({})", self.message, self.location)?;
        if !self.context.is_empty() {
            write!(f, " {{{}}}", self.context_summary())?;
        }
        Ok(())
    }
}

/// Receives every violation the coordinator reports.
///
/// Called synchronously from pong and action handling, so implementations
/// should hand the record off rather than block.
#[cfg(feature = "sync-send")]
pub trait ViolationObserver: Send + Sync {
    /// Called once per violation.
    fn on_violation(&self, violation: &TimingViolation);
}

/// Receives every violation the coordinator reports.
///
/// Called synchronously from pong and action handling, so implementations
/// should hand the record off rather than block.
#[cfg(not(feature = "sync-send"))]
pub trait ViolationObserver {
    /// Called once per violation.
    fn on_violation(&self, violation: &TimingViolation);
}

/// Default observer: logs through `tracing`.
///
/// Warnings go to `warn!`, errors and critical violations to `error!`. The
/// player, kind and location are structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &TimingViolation) {
        let player = violation.player.map(PlayerId::as_usize);
        let kind = violation.kind.as_str();
        let context = violation.context_summary();
        match violation.severity {
            ViolationSeverity::Warning => tracing::warn!(
                ?player,
                kind,
                location = violation.location,
                context = %context,
                "{}",
                violation.message
            ),
            ViolationSeverity::Error | ViolationSeverity::Critical => tracing::error!(
                ?player,
                kind,
                severity = violation.severity.as_str(),
                location = violation.location,
                context = %context,
                "{}",
                violation.message
            ),
        }
    }
}

/// Keeps every violation in memory. Meant for tests.
///
/// ```
/// use duel_timesync::telemetry::{
///     CollectingObserver, TimingViolation, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
///
/// let observer = CollectingObserver::new();
/// observer.on_violation(&TimingViolation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::ActionTiming,
///     "rate limit",
///     "test.rs:1",
/// ));
/// assert!(observer.has_violation(ViolationKind::ActionTiming));
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<TimingViolation>>,
}

impl CollectingObserver {
    /// An empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything collected so far.
    #[must_use]
    pub fn violations(&self) -> Vec<TimingViolation> {
        self.violations.lock().clone()
    }

    /// Number of violations collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// `true` while nothing has been reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// `true` if at least one violation of `kind` was collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.matching(|v| v.kind == kind) > 0
    }

    /// `true` if some collected message contains `needle`.
    #[must_use]
    pub fn has_message_containing(&self, needle: &str) -> bool {
        self.matching(|v| v.message.contains(needle)) > 0
    }

    /// Collected violations of `kind`, in report order.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<TimingViolation> {
        self.filtered(|v| v.kind == kind)
    }

    /// Collected violations attributed to `player`, in report order.
    #[must_use]
    pub fn violations_for(&self, player: PlayerId) -> Vec<TimingViolation> {
        self.filtered(|v| v.player == Some(player))
    }

    /// Removes and returns everything collected so far.
    pub fn take(&self) -> Vec<TimingViolation> {
        std::mem::take(&mut *self.violations.lock())
    }

    fn matching(&self, pred: impl Fn(&TimingViolation) -> bool) -> usize {
        self.violations.lock().iter().filter(|&v| pred(v)).count()
    }

    fn filtered(&self, pred: impl Fn(&TimingViolation) -> bool) -> Vec<TimingViolation> {
        self.violations
            .lock()
            .iter()
            .filter(|&v| pred(v))
            .cloned()
            .collect()
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &TimingViolation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Fans each violation out to several observers, e.g. tracing plus a review queue.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ViolationObserver>>,
}

impl CompositeObserver {
    /// A composite with no children.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `observer` and returns the composite.
    #[must_use]
    pub fn with(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl FromIterator<Arc<dyn ViolationObserver>> for CompositeObserver {
    fn from_iter<I: IntoIterator<Item = Arc<dyn ViolationObserver>>>(iter: I) -> Self {
        Self {
            observers: iter.into_iter().collect(),
        }
    }
}

impl ViolationObserver for CompositeObserver {
    fn on_violation(&self, violation: &TimingViolation) {
        self.observers
            .iter()
            .for_each(|observer| observer.on_violation(violation));
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Hands `violation` to `observer`, or to [`TracingObserver`] when there is none.
pub fn report_to_observer<O: ViolationObserver + ?Sized>(
    observer: Option<&Arc<O>>,
    violation: &TimingViolation,
) {
    match observer {
        Some(observer) => observer.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Logs a violation through [`TracingObserver`], stamping the call site.
///
/// ```
/// use duel_timesync::report_violation;
/// use duel_timesync::telemetry::{ViolationKind, ViolationSeverity};
///
/// report_violation!(ViolationSeverity::Critical, ViolationKind::Invariant, "window holds {} samples", 6);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $($fmt:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        $crate::telemetry::TracingObserver.on_violation(&$crate::telemetry::TimingViolation::new(
            $severity,
            $kind,
            format!($($fmt)+),
            concat!(file!(), ":", line!()),
        ));
    }};
}

/// Reports a violation by `player` to an `Option<Arc<dyn ViolationObserver>>`.
///
/// ```
/// use duel_timesync::telemetry::{CollectingObserver, ViolationKind, ViolationObserver, ViolationSeverity};
/// use duel_timesync::{report_violation_to, PlayerId};
/// use std::sync::Arc;
///
/// let observer: Option<Arc<dyn ViolationObserver>> = Some(Arc::new(CollectingObserver::new()));
/// report_violation_to!(observer, PlayerId::new(1), ViolationSeverity::Warning,
///     ViolationKind::ActionTiming, "client time {} is not after {}", 10.0, 15.0);
/// ```
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $player:expr, $severity:expr, $kind:expr, $($fmt:tt)+) => {{
        let violation = $crate::telemetry::TimingViolation::new(
            $severity,
            $kind,
            format!($($fmt)+),
            concat!(file!(), ":", line!()),
        )
        .with_player($player);
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
}

/// Fails the test with the collected list unless `observer` is empty.
#[macro_export]
macro_rules! assert_no_violations {
    ($observer:expr) => {{
        let violations = $observer.violations();
        assert!(violations.is_empty(), "unexpected violations: {:#?}", violations);
    }};
}

/// Fails the test unless `observer` collected a violation of `kind`.
#[macro_export]
macro_rules! assert_violation {
    ($observer:expr, $kind:expr) => {{
        assert!(
            $observer.has_violation($kind),
            "no {} violation among {:#?}",
            $kind,
            $observer.violations()
        );
    }};
}

// ==========================================
// Runtime Invariant Checking
// ==========================================

/// A broken internal invariant.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvariantViolation {
    /// Type that owns the invariant.
    pub type_name: &'static str,
    /// The invariant that failed.
    pub invariant: String,
    /// Offending values, if useful.
    pub details: Option<String>,
}

impl InvariantViolation {
    /// Names the owning type and the invariant that failed.
    #[must_use]
    pub fn new(type_name: &'static str, invariant: impl Into<String>) -> Self {
        Self {
            type_name,
            invariant: invariant.into(),
            details: None,
        }
    }

    /// Attaches the offending values.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {} ({})", self.type_name, self.invariant, details),
            None => write!(f, "{}: {}", self.type_name, self.invariant),
        }
    }
}

/// State whose invariants can be verified at runtime.
///
/// Implemented by the sync profile, the ping ledger, the action validator and
/// the coordinator itself; the coordinator's check also cross-checks that
/// every per-player table covers the same players.
pub trait InvariantChecker {
    /// `Ok(())` if everything holds, otherwise the first broken invariant.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}

/// Runs [`InvariantChecker::check_invariants`] and reports a failure as critical.
///
/// Active in debug builds and with the `paranoid` feature; expands to nothing otherwise.
#[macro_export]
#[cfg(any(debug_assertions, feature = "paranoid"))]
macro_rules! debug_check_invariants {
    ($target:expr) => {
        $crate::debug_check_invariants!($target, "")
    };
    ($target:expr, $context:expr) => {{
        use $crate::telemetry::InvariantChecker as _;
        if let Err(violation) = $target.check_invariants() {
            $crate::report_violation!(
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                "{} {}",
                violation,
                $context
            );
        }
    }};
}

/// No-op without debug assertions or `paranoid`.
#[macro_export]
#[cfg(not(any(debug_assertions, feature = "paranoid")))]
macro_rules! debug_check_invariants {
    ($target:expr) => {{}};
    ($target:expr, $context:expr) => {{}};
}
