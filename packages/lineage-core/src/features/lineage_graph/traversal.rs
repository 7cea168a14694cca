//! Breadth-first traversal over derived lineage edges
//!
//! Edges are never stored; each expansion step joins over the reference
//! fields of the entities themselves (`Run.dataset_refs`, `Model.run_id`).
//! Ordering is deterministic: a run's parents follow `dataset_refs` order,
//! fan-out children are ordered by creation timestamp then id.

use std::collections::{HashSet, VecDeque};

use crate::errors::Result;
use crate::features::entity_store::domain::models::Entity;
use crate::features::entity_store::domain::ports::LineageStore;

/// Traversal direction over the Dataset -> Run -> Model edge orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward inputs (model -> run -> datasets)
    Up,
    /// Toward outputs (dataset -> runs -> models)
    Down,
}

/// One expansion step: the directly adjacent entities, in deterministic
/// order.
pub async fn neighbors(
    store: &dyn LineageStore,
    entity: &Entity,
    direction: Direction,
) -> Result<Vec<Entity>> {
    match (direction, entity) {
        (Direction::Up, Entity::Model(model)) => {
            Ok(vec![Entity::Run(store.get_run(&model.run_id).await?)])
        }
        (Direction::Up, Entity::Run(run)) => {
            let mut parents = Vec::with_capacity(run.dataset_refs.len());
            for dataset_id in &run.dataset_refs {
                parents.push(Entity::Dataset(store.get_dataset(dataset_id).await?));
            }
            Ok(parents)
        }
        (Direction::Up, Entity::Dataset(_)) => Ok(Vec::new()),

        (Direction::Down, Entity::Dataset(dataset)) => Ok(store
            .runs_consuming(&dataset.id)
            .await?
            .into_iter()
            .map(Entity::Run)
            .collect()),
        (Direction::Down, Entity::Run(run)) => Ok(store
            .models_produced_by(&run.id)
            .await?
            .into_iter()
            .map(Entity::Model)
            .collect()),
        (Direction::Down, Entity::Model(_)) => Ok(Vec::new()),
    }
}

/// Transitive closure from `start`, breadth-first, excluding `start` itself.
///
/// Nearest entities come first. Each entity appears once even when reachable
/// through several paths (a dataset consumed by two runs feeding one model).
pub async fn traverse(
    store: &dyn LineageStore,
    start: &Entity,
    direction: Direction,
) -> Result<Vec<Entity>> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.id().to_string());

    let mut queue: VecDeque<Entity> = VecDeque::new();
    queue.push_back(start.clone());

    let mut reached = Vec::new();
    while let Some(current) = queue.pop_front() {
        for next in neighbors(store, &current, direction).await? {
            if visited.insert(next.id().to_string()) {
                reached.push(next.clone());
                queue.push_back(next);
            }
        }
    }
    Ok(reached)
}
