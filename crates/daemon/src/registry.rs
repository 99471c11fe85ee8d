//! Registry of pass factories and their ordering constraints.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use lumen_primitives::PassId;

use crate::error::RegistryError;
use crate::pass::{PassBinding, PassFactory};

/// Builder describing one registration.
pub struct PassSpec {
	factory: Arc<dyn PassFactory>,
	completion: Vec<PassId>,
	starting: Vec<PassId>,
	forced_id: Option<PassId>,
	binding: PassBinding,
}

impl PassSpec {
	pub fn new(factory: Arc<dyn PassFactory>) -> Self {
		Self {
			factory,
			completion: Vec::new(),
			starting: Vec::new(),
			forced_id: None,
			binding: PassBinding::Document,
		}
	}

	/// The pass may only start after `ids` have finished applying.
	pub fn after_completion_of(mut self, ids: impl IntoIterator<Item = PassId>) -> Self {
		self.completion.extend(ids);
		self
	}

	/// The pass may only start after `ids` have started collecting.
	pub fn after_start_of(mut self, ids: impl IntoIterator<Item = PassId>) -> Self {
		self.starting.extend(ids);
		self
	}

	pub fn forced_id(mut self, id: PassId) -> Self {
		self.forced_id = Some(id);
		self
	}

	/// Computes the pass separately for every viewer.
	pub fn viewer_bound(mut self) -> Self {
		self.binding = PassBinding::Viewer;
		self
	}
}

/// A registered factory with its id and predecessors.
pub struct PassRegistration {
	pub id: PassId,
	pub name: String,
	pub binding: PassBinding,
	pub factory: Arc<dyn PassFactory>,
	pub completion: Vec<PassId>,
	pub starting: Vec<PassId>,
}

impl fmt::Debug for PassRegistration {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PassRegistration")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("binding", &self.binding)
			.field("completion", &self.completion)
			.field("starting", &self.starting)
			.finish_non_exhaustive()
	}
}

impl PassRegistration {
	fn predecessors(&self) -> impl Iterator<Item = PassId> + '_ {
		self.completion.iter().chain(&self.starting).copied()
	}
}

/// Ordered set of registered passes.
///
/// Auto-assigned ids start at [`PassId::FIRST_DYNAMIC`] and skip ids already
/// taken by forced registrations.
pub struct PassRegistry {
	entries: BTreeMap<PassId, PassRegistration>,
	next_id: PassId,
	intentions: Option<Arc<dyn PassFactory>>,
	checked: OnceLock<Result<(), RegistryError>>,
}

impl Default for PassRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for PassRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PassRegistry")
			.field("entries", &self.entries.values().collect::<Vec<_>>())
			.field("next_id", &self.next_id)
			.field("intentions", &self.intentions.is_some())
			.finish()
	}
}

impl PassRegistry {
	pub fn new() -> Self {
		Self {
			entries: BTreeMap::new(),
			next_id: PassId::FIRST_DYNAMIC,
			intentions: None,
			checked: OnceLock::new(),
		}
	}

	/// Registers a document-bound pass.
	pub fn register(
		&mut self,
		factory: Arc<dyn PassFactory>,
		completion: &[PassId],
		starting: &[PassId],
		forced_id: Option<PassId>,
	) -> Result<PassId, RegistryError> {
		let mut spec = PassSpec::new(factory)
			.after_completion_of(completion.iter().copied())
			.after_start_of(starting.iter().copied());
		spec.forced_id = forced_id;
		self.register_spec(spec)
	}

	pub fn register_spec(&mut self, spec: PassSpec) -> Result<PassId, RegistryError> {
		let id = match spec.forced_id {
			Some(id) => {
				if let Some(existing) = self.entries.get(&id) {
					return Err(RegistryError::DuplicateId {
						id,
						existing: existing.name.clone(),
					});
				}
				id
			}
			None => self.allocate_id(),
		};
		let name = spec.factory.name().to_string();
		tracing::debug!(pass = %id, name = %name, binding = ?spec.binding, "daemon.registry.register");
		self.entries.insert(
			id,
			PassRegistration {
				id,
				name,
				binding: spec.binding,
				factory: spec.factory,
				completion: spec.completion,
				starting: spec.starting,
			},
		);
		self.checked = OnceLock::new();
		Ok(id)
	}

	fn allocate_id(&mut self) -> PassId {
		while self.entries.contains_key(&self.next_id) {
			self.next_id = self.next_id.next();
		}
		let id = self.next_id;
		self.next_id = id.next();
		id
	}

	/// Sets the factory used for synthetic follow-up intentions passes.
	pub fn set_intentions_factory(&mut self, factory: Arc<dyn PassFactory>) {
		self.intentions = Some(factory);
	}

	pub fn intentions_factory(&self) -> Option<&Arc<dyn PassFactory>> {
		self.intentions.as_ref()
	}

	/// Fails if any pass transitively precedes itself.
	///
	/// Predecessor ids that are not registered are ignored.
	pub fn check_for_cycles(&self) -> Result<(), RegistryError> {
		#[derive(Clone, Copy, PartialEq)]
		enum Mark {
			Unvisited,
			OnPath,
			Done,
		}

		fn visit(
			registry: &PassRegistry,
			id: PassId,
			marks: &mut BTreeMap<PassId, Mark>,
			path: &mut Vec<PassId>,
		) -> Result<(), RegistryError> {
			match marks.get(&id).copied().unwrap_or(Mark::Unvisited) {
				Mark::Done => return Ok(()),
				Mark::OnPath => {
					let from = path.iter().position(|p| *p == id).unwrap_or(0);
					let mut cycle = path[from..].to_vec();
					cycle.push(id);
					return Err(RegistryError::Cycle { id, path: cycle });
				}
				Mark::Unvisited => {}
			}
			let Some(entry) = registry.entries.get(&id) else {
				return Ok(());
			};
			marks.insert(id, Mark::OnPath);
			path.push(id);
			for pred in entry.predecessors() {
				visit(registry, pred, marks, path)?;
			}
			path.pop();
			marks.insert(id, Mark::Done);
			Ok(())
		}

		let mut marks = BTreeMap::new();
		let mut path = Vec::new();
		for id in self.entries.keys() {
			visit(self, *id, &mut marks, &mut path)?;
		}
		Ok(())
	}

	/// Runs [`Self::check_for_cycles`] once per registry state.
	pub fn ensure_checked(&self) -> Result<(), RegistryError> {
		self.checked.get_or_init(|| self.check_for_cycles()).clone()
	}

	pub fn ids(&self) -> impl Iterator<Item = PassId> + '_ {
		self.entries.keys().copied()
	}

	pub fn entries(&self) -> impl Iterator<Item = &PassRegistration> {
		self.entries.values()
	}

	pub fn entry(&self, id: PassId) -> Option<&PassRegistration> {
		self.entries.get(&id)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Largest registered id, or `0` for an empty registry.
	pub fn max_id(&self) -> PassId {
		self.entries.keys().next_back().copied().unwrap_or(PassId(0))
	}
}
