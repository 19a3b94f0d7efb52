use serde::{Deserialize, Serialize};

use labinv_core::{Entity, LocationId};

/// One row of the location tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: LocationId,
    pub label: String,
    pub parent_id: Option<LocationId>,
}

impl Location {
    pub fn new(id: LocationId, label: impl Into<String>, parent_id: Option<LocationId>) -> Self {
        Self {
            id,
            label: label.into(),
            parent_id,
        }
    }
}

impl Entity for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
