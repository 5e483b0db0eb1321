use std::collections::HashMap;

use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::order::OrderLine;

/// Single-use pickup confirmation. Built when an order is claimed, discarded
/// as soon as the order leaves Claimed.
#[derive(Debug, Clone)]
pub struct VerificationChecklist {
    checked: HashMap<Uuid, bool>,
    pub pin_attempted: bool,
}

impl VerificationChecklist {
    pub fn for_lines(lines: &[OrderLine]) -> Self {
        Self {
            checked: lines.iter().map(|line| (line.id, false)).collect(),
            pin_attempted: false,
        }
    }

    pub fn toggle_line(&mut self, line_id: Uuid) -> Result<bool, DispatchError> {
        match self.checked.get_mut(&line_id) {
            Some(flag) => {
                *flag = !*flag;
                Ok(*flag)
            }
            None => Err(DispatchError::UnknownLine(line_id)),
        }
    }

    pub fn unchecked_count(&self) -> usize {
        self.checked.values().filter(|checked| !**checked).count()
    }

    pub fn all_checked(&self) -> bool {
        self.unchecked_count() == 0
    }

    pub fn entries(&self) -> Vec<(Uuid, bool)> {
        self.checked
            .iter()
            .map(|(line_id, checked)| (*line_id, *checked))
            .collect()
    }
}
