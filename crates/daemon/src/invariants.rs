//! Invariant tests for the scheduler and its round engine. See [`catalog`].

mod catalog;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lumen_primitives::{DocumentId, PassId, TextEdit, TextRange};

use crate::annotations::Severity;
use crate::dirty::DirtyScope;
use crate::engine::RoundOutcome;
use crate::graph::NodeState;
use crate::pass::factory_fn;
use crate::registry::PassSpec;
use crate::scheduler::{InvalidationReason, InvalidationScope};
use crate::test_support::{
	ApplyStep, CollectStep, CreateStep, Gate, Harness, Script, ScriptedFactory, target, tokio_scheduler,
};

const TEXT: &str = "fn main() {}";
const DOC: DocumentId = DocumentId(1);

#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_completion_edges_order_applies() {
	let h = Harness::new(|registry, log| {
		let a = registry.register_spec(PassSpec::new(ScriptedFactory::new("a", Script::ok(), log))).unwrap();
		let b = registry
			.register_spec(PassSpec::new(ScriptedFactory::new("b", Script::ok(), log)).after_completion_of([a]))
			.unwrap();
		registry
			.register_spec(PassSpec::new(ScriptedFactory::new("c", Script::ok(), log)).after_completion_of([b]))
			.unwrap();
	});

	let round = h.scheduler.submit_passes(&[target(1, 1, TEXT)]).unwrap();
	assert_eq!(h.pool.len(), 1, "only the free node is submitted up front");

	h.pool.run_all();
	assert_eq!(h.pool.len(), 0, "b waits for a to apply, not to collect");
	assert_eq!(h.ui.len(), 1);

	h.drain();
	h.log.assert_before("apply:a", "collect:b");
	h.log.assert_before("apply:b", "collect:c");
	assert_eq!(round.outcome(), Some(RoundOutcome::Finished));
	assert_eq!(h.pool.submitted(), 3);
}

#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_submit_edges_release_on_start() {
	let h = Harness::new(|registry, log| {
		let a = registry.register_spec(PassSpec::new(ScriptedFactory::new("a", Script::ok(), log))).unwrap();
		registry
			.register_spec(PassSpec::new(ScriptedFactory::new("b", Script::ok(), log)).after_start_of([a]))
			.unwrap();
	});

	let round = h.scheduler.submit_passes(&[target(1, 1, TEXT)]).unwrap();
	assert_eq!(h.pool.len(), 1);

	assert!(h.pool.run_next());
	assert_eq!(h.pool.len(), 1, "b is submitted as soon as a starts collecting");
	assert!(!h.log.contains("apply:a"));

	h.drain();
	assert_eq!(round.outcome(), Some(RoundOutcome::Finished));
	h.log.assert_before("collect:a", "collect:b");
}

#[cfg_attr(test, tokio::test(flavor = "multi_thread", worker_threads = 2))]
pub(crate) async fn test_edit_cancels_round_once() {
	let gate = Gate::new();
	let (scheduler, log, listener) = tokio_scheduler(|registry, log| {
		let script = Script::ok().collect(CollectStep::Block(gate.clone()));
		registry.register_spec(PassSpec::new(ScriptedFactory::new("slow", script, log))).unwrap();
	});

	let round = scheduler.submit_passes(&[target(1, 1, TEXT)]).unwrap();
	gate.wait_entered().await;
	scheduler.invalidate(InvalidationReason::Edit, InvalidationScope::Edit(DOC, TextEdit::insert(0, 1)));

	assert_eq!(round.settled().await, RoundOutcome::Cancelled);
	assert!(log.contains("cancelled:slow"));
	assert!(!log.contains("apply:slow"));
	assert_eq!(*listener.cancelled.lock(), vec![round.generation()]);
	assert!(!round.cancel());
	assert!(!scheduler.stop_process(true, &InvalidationReason::Edit));

	let armed = scheduler.restart_at().expect("an edit arms a restart");
	gate.open();
	let next = scheduler
		.tick(armed, &[target(1, 1, "xfn main() {}")])
		.unwrap()
		.expect("deadline reached");
	assert!(next.generation() > round.generation());
	assert_eq!(next.settled().await, RoundOutcome::Finished);
	assert_eq!(log.count("apply:slow:0..13"), 1);
	assert_eq!(listener.cancelled.lock().len(), 1);
}

#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_queued_apply_cannot_clean_after_invalidate() {
	let h = Harness::new(|registry, log| {
		registry.register_spec(PassSpec::new(ScriptedFactory::new("a", Script::ok(), log))).unwrap();
	});
	let id = h.scheduler.with_registry(|r| r.max_id());
	let targets = [target(1, 1, TEXT)];

	let first = h.scheduler.submit_passes(&targets).unwrap();
	h.drain();
	assert_eq!(first.outcome(), Some(RoundOutcome::Finished));
	assert!(h.scheduler.dirty().is_clean(DOC, id));

	let round = h.scheduler.submit_passes(&targets).unwrap();
	h.pool.run_all();
	assert_eq!(h.ui.len(), 1, "apply is queued on the dispatcher");

	h.scheduler
		.invalidate(InvalidationReason::Edit, InvalidationScope::Range(DOC, TextRange::new(0, 2)));
	h.ui.run_all();

	assert_eq!(h.log.count("apply:a:0..12"), 1, "only the first round applied");
	assert_eq!(
		h.scheduler.dirty().dirty_scope(DOC, id),
		DirtyScope::Ranges(smallvec::smallvec![TextRange::new(0, 2)])
	);
	assert_eq!(round.outcome(), Some(RoundOutcome::Cancelled));
}

#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_declined_pass_stays_dirty_after_concurrent_edit() {
	let h = Harness::new(|_, _| {});
	let host = h.scheduler.clone();
	let edited = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&edited);
	let id = h
		.scheduler
		.register(PassSpec::new(factory_fn("declines", move |_| {
			if !flag.swap(true, Ordering::SeqCst) {
				host.invalidate(InvalidationReason::Edit, InvalidationScope::Document(DOC));
			}
			Ok(None)
		})))
		.unwrap();

	let round = h.scheduler.submit_passes(&[target(1, 1, TEXT)]).unwrap();
	assert!(edited.load(Ordering::SeqCst));
	assert!(round.progress().is_cancelled(), "the edit cancels the round being built");
	assert_eq!(round.outcome(), Some(RoundOutcome::Cancelled));
	assert!(!h.scheduler.dirty().is_clean(DOC, id), "the edit outlives the declining factory");

	let next = h.scheduler.submit_passes(&[target(1, 1, TEXT)]).unwrap();
	h.drain();
	assert_eq!(next.outcome(), Some(RoundOutcome::Finished));
	assert!(h.scheduler.dirty().is_clean(DOC, id));
}

#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_apply_rechecks_cancellation_under_model_lock() {
	let h = Harness::new(|registry, log| {
		registry
			.register_spec(PassSpec::new(ScriptedFactory::new("a", Script::ok().annotate(Severity::Error), log)))
			.unwrap();
	});

	let round = h.scheduler.submit_passes(&[target(1, 1, TEXT)]).unwrap();
	h.pool.run_all();
	assert_eq!(h.ui.len(), 1);

	let model = h.scheduler.annotations().document(DOC);
	let held = model.lock();
	let ui = Arc::clone(&h.ui);
	let dispatcher = std::thread::spawn(move || ui.run_all());
	for waited in 0.. {
		if round.node_states()[0].state == NodeState::Applying {
			break;
		}
		assert!(waited < 5000, "apply never started");
		std::thread::sleep(Duration::from_millis(1));
	}
	h.scheduler
		.invalidate(InvalidationReason::Edit, InvalidationScope::Range(DOC, TextRange::new(0, 2)));
	drop(held);
	dispatcher.join().unwrap();

	assert!(!h.log.contains("apply:a"));
	assert!(h.scheduler.annotations().snapshot(DOC).is_empty());
	assert_eq!(round.outcome(), Some(RoundOutcome::Cancelled));
	assert_eq!(round.node_states()[0].state, NodeState::Cancelled);
}

#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_factory_outcomes_drive_dirty_state() {
	let h = Harness::new(|registry, log| {
		registry
			.register_spec(
				PassSpec::new(ScriptedFactory::new("highlight", Script::ok(), log)).forced_id(PassId::GENERAL_HIGHLIGHTING),
			)
			.unwrap();
		registry
			.register_spec(
				PassSpec::new(ScriptedFactory::new("markers", Script::ok().create(CreateStep::Absent), log))
					.forced_id(PassId::LINE_MARKERS),
			)
			.unwrap();
		registry
			.register_spec(
				PassSpec::new(ScriptedFactory::new("broken", Script::ok().create(CreateStep::Error), log))
					.forced_id(PassId::INTENTIONS),
			)
			.unwrap();
		registry
			.register_spec(
				PassSpec::new(ScriptedFactory::new("crashing", Script::ok().create(CreateStep::Panic), log))
					.forced_id(PassId::EXTERNAL_ANNOTATORS),
			)
			.unwrap();
	});

	let round = h.scheduler.submit_passes(&[target(1, 1, TEXT)]).unwrap();
	assert_eq!(round.node_count(), 1);
	h.drain();

	assert_eq!(round.outcome(), Some(RoundOutcome::Finished));
	let dirty = h.scheduler.dirty();
	assert!(dirty.is_clean(DOC, PassId::GENERAL_HIGHLIGHTING));
	assert!(dirty.is_clean(DOC, PassId::LINE_MARKERS), "a declining factory counts as done");
	assert!(!dirty.is_clean(DOC, PassId::INTENTIONS), "a failing factory leaves the pass dirty");
	assert!(!dirty.is_clean(DOC, PassId::EXTERNAL_ANNOTATORS));
	assert!(!h.scheduler.is_all_analysis_finished(DOC));
	assert!(h.scheduler.is_error_analyzing_finished(DOC));
}

#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_partial_apply_gates_dependents() {
	let text = "abcdefghi";
	let h = Harness::new(|registry, log| {
		let a = registry
			.register_spec(PassSpec::new(ScriptedFactory::new("a", Script::ok().apply(ApplyStep::Partial(3)), log)))
			.unwrap();
		registry
			.register_spec(PassSpec::new(ScriptedFactory::new("b", Script::ok(), log)).after_completion_of([a]))
			.unwrap();
	});
	let a = PassId::FIRST_DYNAMIC;

	let round = h.scheduler.submit_passes(&[target(1, 1, text)]).unwrap();
	h.pool.run_all();

	assert!(h.ui.run_next());
	assert!(h.log.contains("apply:a:0..3"));
	assert_eq!(h.pool.len(), 0);
	assert_eq!(
		h.scheduler.dirty().dirty_scope(DOC, a),
		DirtyScope::Ranges(smallvec::smallvec![TextRange::new(3, 9)])
	);

	assert!(h.ui.run_next());
	assert_eq!(h.pool.len(), 0, "still partial after the second chunk");
	assert!(h.ui.run_next());
	assert!(h.log.contains("apply:a:6..9"));
	assert_eq!(h.pool.len(), 1, "the final chunk releases b");

	h.drain();
	assert_eq!(round.outcome(), Some(RoundOutcome::Finished));
	assert!(h.scheduler.dirty().is_clean(DOC, a));
}

#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_cancelled_round_settles_after_drain() {
	let h = Harness::new(|registry, log| {
		registry.register_spec(PassSpec::new(ScriptedFactory::new("a", Script::ok(), log))).unwrap();
		registry.register_spec(PassSpec::new(ScriptedFactory::new("b", Script::ok(), log))).unwrap();
	});

	let round = h.scheduler.submit_passes(&[target(1, 1, TEXT)]).unwrap();
	assert_eq!(h.pool.len(), 2);
	assert!(round.cancel());
	assert!(!round.is_settled(), "jobs are still queued");

	assert!(h.pool.run_next());
	assert!(!round.is_settled());
	assert_eq!(h.pool.discard_all(), 1);

	assert_eq!(round.settled().await, RoundOutcome::Cancelled);
	assert!(!h.log.contains("collect:"));
	assert_eq!(*h.listener.cancelled.lock(), vec![round.generation()]);
	assert_eq!(round.node_states()[0].state, NodeState::Cancelled);
}

#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_first_failure_cancels_round() {
	let h = Harness::new(|registry, log| {
		registry
			.register_spec(PassSpec::new(ScriptedFactory::new("a", Script::ok().collect(CollectStep::Fail), log)))
			.unwrap();
		registry
			.register_spec(PassSpec::new(ScriptedFactory::new("b", Script::ok().collect(CollectStep::Panic), log)))
			.unwrap();
		registry.register_spec(PassSpec::new(ScriptedFactory::new("c", Script::ok(), log))).unwrap();
	});

	let round = h.scheduler.submit_passes(&[target(1, 1, TEXT)]).unwrap();
	h.drain();

	let Some(RoundOutcome::Failed(failure)) = round.outcome() else {
		panic!("expected a failed round, got {:?}", round.outcome());
	};
	assert_eq!(failure.pass, PassId::FIRST_DYNAMIC);
	assert_eq!(failure.message, "a failed");
	assert!(!h.log.contains("collect:b"), "siblings never start on a failed round");
	assert!(!h.log.contains("collect:c"));
	let states = round.node_states();
	assert_eq!(states[0].state, NodeState::CollectFailed);
	assert_eq!(states[1].state, NodeState::Cancelled);
	assert_eq!(h.listener.finished.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_new_round_cancels_previous() {
	let h = Harness::new(|registry, log| {
		registry.register_spec(PassSpec::new(ScriptedFactory::new("a", Script::ok(), log))).unwrap();
	});
	let targets = [target(1, 1, TEXT)];

	let first = h.scheduler.submit_passes(&targets).unwrap();
	let second = h.scheduler.submit_passes(&targets).unwrap();
	assert!(first.progress().is_cancelled());
	assert!(second.progress().is_running());
	assert_eq!(h.scheduler.current_round().map(|r| r.generation()), Some(second.generation()));

	h.drain();
	assert_eq!(first.outcome(), Some(RoundOutcome::Cancelled));
	assert_eq!(second.outcome(), Some(RoundOutcome::Finished));
	assert_eq!(h.log.count("collect:a"), 1);
}

#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_synthetic_intentions_leave_dirty_map_alone() {
	let h = Harness::new(|registry, log| {
		registry
			.register_spec(PassSpec::new(ScriptedFactory::new("a", Script::ok().intentions(), log)))
			.unwrap();
		registry.set_intentions_factory(ScriptedFactory::new("intentions", Script::ok(), log));
	});
	let a = PassId::FIRST_DYNAMIC;
	let synthetic = a.next();

	let round = h.scheduler.submit_passes(&[target(7, 1, TEXT)]).unwrap();
	assert_eq!(round.node_count(), 2);
	h.drain();

	assert_eq!(round.outcome(), Some(RoundOutcome::Finished));
	assert!(h.log.contains("create:intentions@7"));
	h.log.assert_before("apply:a", "collect:intentions");
	assert!(h.scheduler.dirty().is_clean(DOC, a));
	assert_eq!(h.scheduler.dirty().dirty_scope(DOC, synthetic), DirtyScope::Whole);
}
