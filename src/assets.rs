//! # Asset Registry
//!
//! CRUD for point-of-interest infrastructure (bridges, signs, drains...).
//! Records are validated before they reach the [`EntityStore`].

use std::sync::Arc;

use log::info;

use crate::clock::{Clock, IdGenerator};
use crate::error::{OptionExt, Result, ValidationError};
use crate::notify::{Notification, Notifier};
use crate::store::EntityStore;
use crate::types::{Asset, AssetCategory, AssetPriority, AssetStatus, Location};

/// Form input for creating or editing an asset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetDraft {
    pub name: String,
    pub category: Option<AssetCategory>,
    pub latitude: f64,
    pub longitude: f64,
    pub status: Option<AssetStatus>,
    pub priority: Option<AssetPriority>,
    pub description: String,
    pub contact: String,
    pub notes: String,
    pub photos: Vec<String>,
}

impl AssetDraft {
    pub fn new(name: impl Into<String>, category: AssetCategory, location: Location) -> Self {
        Self {
            name: name.into(),
            category: Some(category),
            latitude: location.latitude,
            longitude: location.longitude,
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: AssetStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: AssetPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check required fields and coordinate ranges.
    pub fn validate(&self) -> Result<(String, AssetCategory, Location)> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingName.into());
        }
        let category = self.category.ok_or_invalid(ValidationError::MissingType)?;
        let location = Location::new(self.latitude, self.longitude).validate()?;
        Ok((name.to_string(), category, location))
    }
}

impl From<&Asset> for AssetDraft {
    fn from(asset: &Asset) -> Self {
        Self {
            name: asset.name.clone(),
            category: Some(asset.category),
            latitude: asset.location.latitude,
            longitude: asset.location.longitude,
            status: Some(asset.status),
            priority: Some(asset.priority),
            description: asset.description.clone(),
            contact: asset.contact.clone(),
            notes: asset.notes.clone(),
            photos: asset.photos.clone(),
        }
    }
}

pub struct AssetRegistry {
    store: Arc<EntityStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
}

impl AssetRegistry {
    pub fn new(store: Arc<EntityStore>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
            ids: IdGenerator::new(),
        }
    }

    pub fn create(&self, draft: AssetDraft) -> Result<Asset> {
        let (name, category, location) = self.checked(&draft)?;
        let now = self.clock.now();
        let asset = Asset {
            id: self.ids.next_id(now),
            name,
            category,
            location,
            status: draft.status.unwrap_or_default(),
            priority: draft.priority.unwrap_or_default(),
            description: draft.description.trim().to_string(),
            contact: draft.contact.trim().to_string(),
            notes: draft.notes.trim().to_string(),
            photos: draft.photos,
            created_at: now,
            updated_at: now,
        };

        self.persist(asset.clone())?;
        info!("[AssetRegistry] Added {} '{}'", asset.category.as_str(), asset.name);
        self.notifier
            .notify(Notification::success(format!("{} added successfully", asset.name)));
        Ok(asset)
    }

    /// Replace an asset's editable fields. Returns `Ok(None)` for an unknown id.
    pub fn update(&self, id: &str, draft: AssetDraft) -> Result<Option<Asset>> {
        let Some(existing) = self.get(id) else {
            return Ok(None);
        };
        let (name, category, location) = self.checked(&draft)?;

        let asset = Asset {
            id: existing.id,
            name,
            category,
            location,
            status: draft.status.unwrap_or(existing.status),
            priority: draft.priority.unwrap_or(existing.priority),
            description: draft.description.trim().to_string(),
            contact: draft.contact.trim().to_string(),
            notes: draft.notes.trim().to_string(),
            photos: draft.photos,
            created_at: existing.created_at,
            updated_at: self.clock.now().max(existing.created_at),
        };

        self.persist(asset.clone())?;
        info!("[AssetRegistry] Updated {}", asset.id);
        self.notifier
            .notify(Notification::success(format!("{} updated successfully", asset.name)));
        Ok(Some(asset))
    }

    /// Idempotent.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.store.remove::<Asset>(id)?;
        if removed {
            info!("[AssetRegistry] Deleted {}", id);
            self.notifier
                .notify(Notification::success("Infrastructure deleted successfully"));
        }
        Ok(removed)
    }

    pub fn list(&self) -> Vec<Asset> {
        self.store
            .snapshot::<Asset>()
            .unwrap_or_else(|| self.store.load_or_empty::<Asset>())
    }

    pub fn get(&self, id: &str) -> Option<Asset> {
        self.list().into_iter().find(|a| a.id == id)
    }

    fn checked(&self, draft: &AssetDraft) -> Result<(String, AssetCategory, Location)> {
        draft.validate().inspect_err(|e| {
            self.notifier.notify(Notification::from(e));
        })
    }

    fn persist(&self, asset: Asset) -> Result<()> {
        self.store.upsert(asset).map(|_| ()).inspect_err(|e| {
            self.notifier.notify(Notification::from(e));
        })
    }
}
