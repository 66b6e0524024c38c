// ABOUTME: Startup-built registry of entity types and their timestamp-typed fields
// ABOUTME: Immutable after build, so hashing threads share it without locking

use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, SyncError};

/// Static description of one synchronized entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    timestamp_fields: BTreeSet<String>,
}

impl EntityDescriptor {
    pub fn new<'a>(
        name: &str,
        table: &str,
        timestamp_fields: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            timestamp_fields: timestamp_fields.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name used on outbound sync events.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_timestamp_field(&self, field: &str) -> bool {
        self.timestamp_fields.contains(field)
    }

    pub fn timestamp_fields(&self) -> impl Iterator<Item = &str> {
        self.timestamp_fields.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, EntityDescriptor>,
}

#[derive(Debug, Default)]
pub struct EntityRegistryBuilder {
    entities: HashMap<String, EntityDescriptor>,
}

impl EntityRegistryBuilder {
    pub fn register(mut self, descriptor: EntityDescriptor) -> Result<Self> {
        if descriptor.name.trim().is_empty() || descriptor.table.trim().is_empty() {
            return Err(SyncError::Configuration(
                "entity name and table cannot be empty".to_string(),
            ));
        }
        if self.entities.contains_key(&descriptor.name) {
            return Err(SyncError::Configuration(format!(
                "entity type {} registered twice",
                descriptor.name
            )));
        }
        self.entities.insert(descriptor.name.clone(), descriptor);
        Ok(self)
    }

    pub fn build(self) -> EntityRegistry {
        tracing::debug!(entity_types = self.entities.len(), "entity registry built");
        EntityRegistry {
            entities: self.entities,
        }
    }
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityDescriptor> {
        self.entities.get(entity_type)
    }

    pub fn require(&self, entity_type: &str) -> Result<&EntityDescriptor> {
        self.get(entity_type).ok_or_else(|| {
            SyncError::Configuration(format!("entity type {entity_type} is not registered"))
        })
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
