//! Invariant catalog for [`crate::DaemonScheduler`] and its round engine.
#![allow(dead_code)]

/// Must not apply a pass before every completion predecessor has finished applying.
///
/// - Enforced in: `Round::complete`, `Round::release`
/// - Tested by: [`crate::invariants::test_completion_edges_order_applies`]
/// - Failure symptom: Dependent passes read annotations their predecessors have not written yet.
pub(crate) const COMPLETION_PREDECESSORS_APPLY_FIRST: () = ();

/// Must release submit-successors when a node starts collecting, not when it finishes.
///
/// - Enforced in: `Round::run`
/// - Tested by: [`crate::invariants::test_submit_edges_release_on_start`]
/// - Failure symptom: Passes registered to start alongside a slow pass wait for it to finish.
pub(crate) const SUBMIT_EDGES_RELEASE_ON_START: () = ();

/// Must cancel the running round exactly once per invalidation, and never apply its results afterwards.
///
/// - Enforced in: [`crate::DaemonProgress::cancel`], `Round::apply`
/// - Tested by: [`crate::invariants::test_edit_cancels_round_once`]
/// - Failure symptom: Stale annotations computed against old text land in the model.
pub(crate) const NO_APPLY_AFTER_CANCEL: () = ();

/// Must cancel the running round before dirtying, and check liveness under the dirty-map lock.
///
/// - Enforced in: [`crate::DaemonScheduler::invalidate`], `DirtyScopeMap::mark_clean_if_live`
/// - Tested by: [`crate::invariants::test_queued_apply_cannot_clean_after_invalidate`]
/// - Failure symptom: An edited range is reported clean and never re-analyzed.
pub(crate) const CANCEL_BEFORE_DIRTY: () = ();

/// Must record declined or disabled passes as clean only while the round that built them is live.
///
/// - Enforced in: `InstantiateFilter::record_clean`, `DirtyScopeMap::mark_pass_clean_if_live`
/// - Tested by: [`crate::invariants::test_declined_pass_stays_dirty_after_concurrent_edit`]
/// - Failure symptom: An edit landing while a round is built is overwritten by a clean mark and never re-analyzed.
pub(crate) const ABSENT_CLEAN_REQUIRES_LIVE_ROUND: () = ();

/// Must not write annotations from a round cancelled while its apply waited for the document lock.
///
/// - Enforced in: `Round::apply`
/// - Tested by: [`crate::invariants::test_apply_rechecks_cancellation_under_model_lock`]
/// - Failure symptom: Annotations computed against old text land in the model after an edit.
pub(crate) const APPLY_RECHECKS_CANCELLATION: () = ();

/// Must mark a pass clean when its factory declines, and leave it dirty when the factory fails.
///
/// - Enforced in: `Instantiator::create_one`
/// - Tested by: [`crate::invariants::test_factory_outcomes_drive_dirty_state`]
/// - Failure symptom: Analysis never counts as finished, or a broken pass is silently treated as done.
pub(crate) const FACTORY_OUTCOME_DRIVES_DIRTY_STATE: () = ();

/// Must keep completion successors gated until a partially applied pass reports `Complete`.
///
/// - Enforced in: `Round::apply`
/// - Tested by: [`crate::invariants::test_partial_apply_gates_dependents`]
/// - Failure symptom: Dependents start after the first chunk and see a half-written model.
pub(crate) const PARTIAL_APPLY_GATES_DEPENDENTS: () = ();

/// Must not settle a cancelled round until every queued or running job of it has drained.
///
/// - Enforced in: `Round::job_done` via the `InFlight` guard
/// - Tested by: [`crate::invariants::test_cancelled_round_settles_after_drain`]
/// - Failure symptom: `wait_idle` returns while old passes still run and write to shared state.
pub(crate) const SETTLE_AFTER_DRAIN: () = ();

/// Must record the first hard pass failure and cancel the round with it.
///
/// - Enforced in: `Round::run`, [`crate::DaemonProgress::cancel_with`]
/// - Tested by: [`crate::invariants::test_first_failure_cancels_round`]
/// - Failure symptom: A crashing pass leaves siblings running to completion on a broken round.
pub(crate) const FIRST_FAILURE_CANCELS_ROUND: () = ();

/// Must keep at most one live progress per scheduler.
///
/// - Enforced in: [`crate::ProgressController::rotate`]
/// - Tested by: [`crate::invariants::test_new_round_cancels_previous`]
/// - Failure symptom: Two rounds race to apply results for the same document.
pub(crate) const SINGLE_LIVE_PROGRESS: () = ();

/// Must not touch the dirty map from synthetic follow-up nodes.
///
/// - Enforced in: `Round::apply`
/// - Tested by: [`crate::invariants::test_synthetic_intentions_leave_dirty_map_alone`]
/// - Failure symptom: Cleaning a synthetic id corrupts bookkeeping for passes registered later under that id.
pub(crate) const SYNTHETIC_NODES_SKIP_DIRTY_MAP: () = ();
