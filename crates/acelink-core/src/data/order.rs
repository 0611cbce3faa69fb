//! Infinity-spool slot order

use crate::data::SLOT_COUNT;
use crate::error::OperationError;
use std::str::FromStr;

/// Number of entries in an infinity-spool order.
pub const ORDER_LEN: usize = 4;

/// Operator-defined failover order
///
/// Each entry is a slot index or `None` for a position that should be
/// skipped. Stored as `"0,1,none,3"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfinityOrder {
    entries: [Option<u8>; ORDER_LEN],
}

impl InfinityOrder {
    /// Create an order, validating slot indices
    pub fn new(entries: [Option<u8>; ORDER_LEN]) -> Result<Self, OperationError> {
        for (pos, entry) in entries.iter().enumerate() {
            if let Some(slot) = entry {
                if *slot as usize >= SLOT_COUNT {
                    return Err(OperationError::InvalidOrder {
                        reason: format!(
                            "slot number {} at position {} is out of range (0-{})",
                            slot,
                            pos + 1,
                            SLOT_COUNT - 1
                        ),
                    });
                }
            }
        }
        Ok(Self { entries })
    }

    /// Entries in order
    pub fn entries(&self) -> &[Option<u8>] {
        &self.entries
    }

    /// Number of positions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; an order has a fixed number of positions
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Entry at a position
    pub fn get(&self, position: usize) -> Option<u8> {
        self.entries.get(position).copied().flatten()
    }

    /// First position holding the given slot
    pub fn position_of(&self, slot: u8) -> Option<usize> {
        self.entries.iter().position(|e| *e == Some(slot))
    }
}

impl FromStr for InfinityOrder {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let items: Vec<String> = s.split(',').map(|i| i.trim().to_lowercase()).collect();
        if items.len() != ORDER_LEN {
            return Err(OperationError::InvalidOrder {
                reason: format!(
                    "order must contain exactly {} items, got {}",
                    ORDER_LEN,
                    items.len()
                ),
            });
        }

        let mut entries = [None; ORDER_LEN];
        for (pos, item) in items.iter().enumerate() {
            if item == "none" {
                continue;
            }
            let slot = item
                .parse::<u8>()
                .map_err(|_| OperationError::InvalidOrder {
                    reason: format!(
                        "invalid value '{}' at position {}, use a slot number or 'none'",
                        item,
                        pos + 1
                    ),
                })?;
            entries[pos] = Some(slot);
        }
        Self::new(entries)
    }
}

impl std::fmt::Display for InfinityOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|e| match e {
                Some(slot) => slot.to_string(),
                None => "none".to_string(),
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}
