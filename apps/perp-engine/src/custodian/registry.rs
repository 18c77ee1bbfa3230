//! Position registry.
//!
//! The custodian is the only writer. Everyone else gets cloned read views.
//! Every mutation rewrites the JSON snapshot atomically.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{Position, Side, TradeMode};
use crate::persistence::{JsonSnapshot, PersistenceError};

/// Open positions keyed by id.
#[derive(Debug, Default)]
pub struct PositionRegistry {
    positions: RwLock<BTreeMap<String, Position>>,
    snapshot: Option<JsonSnapshot<Vec<Position>>>,
}

impl PositionRegistry {
    /// Empty in-memory registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry persisted in `snapshot`, loading any saved positions.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read.
    pub fn with_snapshot(snapshot: JsonSnapshot<Vec<Position>>) -> Result<Self, PersistenceError> {
        let saved = snapshot.load()?.unwrap_or_default();
        let positions: BTreeMap<String, Position> = saved
            .into_iter()
            .filter(Position::is_open)
            .map(|p| (p.id.clone(), p))
            .collect();

        if !positions.is_empty() {
            tracing::info!(count = positions.len(), "Positions restored from snapshot");
        }

        Ok(Self {
            positions: RwLock::new(positions),
            snapshot: Some(snapshot),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Position>> {
        self.positions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Position>> {
        self.positions.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, positions: &BTreeMap<String, Position>) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        let list: Vec<Position> = positions.values().cloned().collect();
        if let Err(e) = snapshot.save(&list) {
            tracing::error!(path = %snapshot.path().display(), error = %e, "Failed to persist position registry");
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Position by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Position> {
        self.read().get(id).cloned()
    }

    /// All positions, ordered by id.
    #[must_use]
    pub fn all(&self) -> Vec<Position> {
        self.read().values().cloned().collect()
    }

    /// Positions on `side`.
    #[must_use]
    pub fn by_side(&self, side: Side) -> Vec<Position> {
        self.read()
            .values()
            .filter(|p| p.side == side)
            .cloned()
            .collect()
    }

    /// Whether any position was opened by one of `modes`.
    #[must_use]
    pub fn any_in_modes(&self, modes: &[TradeMode]) -> bool {
        self.read().values().any(|p| modes.contains(&p.mode))
    }

    /// Number of tracked positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // ------------------------------------------------------------------
    // Writes (custodian only)
    // ------------------------------------------------------------------

    /// Insert or replace a position.
    pub(crate) fn upsert(&self, position: Position) {
        let mut positions = self.write();
        positions.insert(position.id.clone(), position);
        self.persist(&positions);
    }

    /// Remove a position.
    pub(crate) fn remove(&self, id: &str) -> Option<Position> {
        let mut positions = self.write();
        let removed = positions.remove(id);
        if removed.is_some() {
            self.persist(&positions);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionStatus;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn position(id: &str, side: Side, mode: TradeMode) -> Position {
        Position {
            id: id.to_string(),
            side,
            quantity: dec!(1),
            original_quantity: dec!(1),
            entry_price: dec!(100),
            stop_price: dec!(98),
            initial_stop_price: dec!(98),
            stop_order_id: format!("{id}-stop"),
            take_profits: vec![dec!(101.5)],
            tp_splits: vec![dec!(1)],
            tp_level_index: 0,
            breakeven_active: false,
            best_price: dec!(100),
            averaged: false,
            mode,
            status: PositionStatus::Open,
            realized_pnl: Decimal::ZERO,
            leverage: 5,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_views_by_side_and_mode() {
        let registry = PositionRegistry::new();
        registry.upsert(position("a", Side::Long, TradeMode::Trend));
        registry.upsert(position("b", Side::Short, TradeMode::Manual));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.by_side(Side::Long).len(), 1);
        assert!(registry.any_in_modes(&[TradeMode::ScalpBb, TradeMode::Trend]));
        assert!(!registry.any_in_modes(&[TradeMode::SniperFvg]));
    }

    #[test]
    fn test_snapshot_round_trip_skips_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        let registry = PositionRegistry::with_snapshot(JsonSnapshot::new(&path)).unwrap();
        registry.upsert(position("a", Side::Long, TradeMode::Trend));
        let mut closed = position("b", Side::Short, TradeMode::Trend);
        closed.status = PositionStatus::Closed;
        registry.upsert(closed);

        let restored = PositionRegistry::with_snapshot(JsonSnapshot::new(&path)).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.get("a").unwrap().stop_order_id, "a-stop");
    }

    #[test]
    fn test_remove() {
        let registry = PositionRegistry::new();
        registry.upsert(position("a", Side::Long, TradeMode::Trend));
        registry.upsert(position("b", Side::Long, TradeMode::Manual));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("b").is_some());
        assert!(registry.is_empty());
    }
}
