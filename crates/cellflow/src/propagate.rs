#![forbid(unsafe_code)]

//! Invalidation passes.
//!
//! A pass starts at one cell (the one that was `put` or invalidated) and
//! walks the graph in two phases:
//!
//! 1. **Mark**: visit every reachable cell once, marking stale the ones whose
//!    cached value can no longer be trusted and recording discovery order.
//! 2. **Deliver**: call the observers of each visited cell, in discovery
//!    order.
//!
//! Marking finishes before any observer runs, so an observer that reads a
//! cell during delivery always sees a fresh value.
//!
//! # Reach
//!
//! | Reached as  | Own cache       | Dependents | Children | Parent    | Peers     |
//! |-------------|-----------------|------------|----------|-----------|-----------|
//! | `Assigned`  | kept (just set) | stale      | stale    | aggregate | stale     |
//! | `Field`     | stale           | stale      | stale    | aggregate | stale     |
//! | `Stale`     | stale           | stale      | stale    | aggregate | skipped   |
//! | `Aggregate` | kept            | stale      | skipped  | aggregate | aggregate |
//!
//! Aggregate is how a change to a property bubbles up: the parent's
//! observers hear about it, but the parent's other property cells are left
//! alone. Peers are property cells of other parents bound to the same field
//! of the same object. `Field` starts a pass from a property cell whose
//! field changed on the object itself. A cell first reached as aggregate and
//! later as stale in the same pass is upgraded.

use ahash::AHashMap;

use crate::cell::{Cell, CellId};
use crate::property;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reach {
    Assigned,
    Field,
    Stale,
    Aggregate,
}

/// Run a full pass from `origin`.
pub(crate) fn run(origin: &Cell, reach: Reach) {
    run_with(origin, reach, Vec::new());
}

/// Run a full pass from `origin` that also marks `stale` stale.
pub(crate) fn run_with(origin: &Cell, reach: Reach, stale: Vec<Cell>) {
    let mut seeds = vec![(origin.clone(), reach)];
    seeds.extend(stale.into_iter().map(|cell| (cell, Reach::Stale)));
    let mut pass = Pass::default();
    pass.mark(seeds);

    let span = tracing::debug_span!(
        "cellflow.pass",
        origin = %origin.id(),
        ?reach,
        visited = pass.order.len()
    );
    let _guard = span.enter();
    tracing::debug!("invalidation pass");
    pass.deliver();
}

#[derive(Default)]
struct Pass {
    visited: AHashMap<CellId, Reach>,
    order: Vec<Cell>,
}

impl Pass {
    fn mark(&mut self, seeds: Vec<(Cell, Reach)>) {
        // Reversed so the first seed is visited first.
        let mut stack: Vec<(Cell, Reach)> = seeds.into_iter().rev().collect();
        while let Some((cell, reach)) = stack.pop() {
            let mut next = Vec::new();
            match self.visited.get(&cell.id()).copied() {
                None => {
                    self.visited.insert(cell.id(), reach);
                    if matches!(reach, Reach::Stale | Reach::Field) {
                        cell.mark_stale();
                    }
                    next.extend(cell.dependents().into_iter().map(|dep| (dep, Reach::Stale)));
                    if reach != Reach::Aggregate {
                        next.extend(cell.children().into_iter().map(|child| (child, Reach::Stale)));
                    }
                    if let Some(parent) = cell.parent() {
                        next.push((parent, Reach::Aggregate));
                    }
                    let peer_reach = match reach {
                        Reach::Assigned | Reach::Field => Some(Reach::Stale),
                        Reach::Aggregate => Some(Reach::Aggregate),
                        Reach::Stale => None,
                    };
                    if let Some(peer_reach) = peer_reach {
                        next.extend(property::peers(&cell).into_iter().map(|peer| (peer, peer_reach)));
                    }
                    self.order.push(cell);
                }
                Some(Reach::Aggregate) if reach == Reach::Stale => {
                    self.visited.insert(cell.id(), reach);
                    cell.mark_stale();
                    next.extend(cell.children().into_iter().map(|child| (child, Reach::Stale)));
                }
                Some(_) => continue,
            }
            // Reverse so the first neighbour is visited first.
            stack.extend(next.into_iter().rev());
        }
    }

    fn deliver(&self) {
        for cell in &self.order {
            let observers = cell.observers();
            if observers.is_empty() {
                continue;
            }
            tracing::trace!(cell = %cell.id(), observers = observers.len(), "notify");
            for observer in observers {
                observer.invalidate();
            }
        }
    }
}
