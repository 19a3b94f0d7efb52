//! Registered client devices. A device id is the borrower of a short-term loan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labinv_core::{DeviceId, DomainError, DomainResult, Entity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn register(id: DeviceId, name: &str, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: validate_device_name(name)?,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn rename(&mut self, name: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.name = validate_device_name(name)?;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Device {
    type Id = DeviceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// 1 to 100 characters after trimming.
pub fn validate_device_name(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(DomainError::validation("device name must be 1-100 characters"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_keeps_created_at() {
        let t0 = Utc::now();
        let mut device = Device::register(DeviceId::new(), " bench scope ", t0).unwrap();
        assert_eq!(device.name, "bench scope");
        let t1 = t0 + chrono::Duration::minutes(5);
        device.rename("cart 2", t1).unwrap();
        assert_eq!(device.created_at, t0);
        assert_eq!(device.updated_at, t1);
        assert!(device.rename("   ", t1).is_err());
    }
}
