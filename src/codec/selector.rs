//! Member Selector
//!
//! Owns the registered [`TypeSchema`]s and derives, per type, the ordered
//! list of members that take part in encoding.
//!
//! ## Ordering
//! Members are sorted by name within each type level and levels are
//! concatenated base-first. Position is meaning on the wire (no member
//! names are encoded), so both peers must register identical schemas.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, WireError};

use super::schema::{MemberDescriptor, MemberKind, ParentLink, TypeSchema};

/// A member chosen for encoding, plus the path from the most-derived
/// instance to the level that declares it.
#[derive(Clone)]
pub struct SelectedMember {
    descriptor: MemberDescriptor,
    declared_in: &'static str,
    path: Arc<[ParentLink]>,
}

impl SelectedMember {
    pub fn descriptor(&self) -> &MemberDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// Name of the type level declaring this member
    pub fn declared_in(&self) -> &'static str {
        self.declared_in
    }

    /// The part of `instance` that owns this member
    pub(crate) fn owner<'a>(&self, instance: &'a dyn Any) -> Result<&'a dyn Any> {
        let mut current = instance;
        for link in self.path.iter() {
            current = (link.project)(current).ok_or_else(|| self.broken_path(link))?;
        }
        Ok(current)
    }

    pub(crate) fn owner_mut<'a>(&self, instance: &'a mut dyn Any) -> Result<&'a mut dyn Any> {
        let mut current = instance;
        for link in self.path.iter() {
            current = (link.project_mut)(current).ok_or_else(|| self.broken_path(link))?;
        }
        Ok(current)
    }

    fn broken_path(&self, link: &ParentLink) -> WireError {
        WireError::Decode(format!(
            "cannot reach base {} to access member '{}'",
            link.type_name, self.descriptor.name
        ))
    }
}

impl std::fmt::Debug for SelectedMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedMember")
            .field("name", &self.descriptor.name)
            .field("declared_in", &self.declared_in)
            .field("depth", &self.path.len())
            .finish()
    }
}

/// Schema store plus a per-type cache of member selections
#[derive(Default)]
pub struct MemberSelector {
    schemas: RwLock<HashMap<TypeId, Arc<TypeSchema>>>,
    selections: RwLock<HashMap<TypeId, Arc<[SelectedMember]>>>,
}

impl MemberSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema. One schema per type.
    pub fn register(&self, schema: TypeSchema) -> Result<()> {
        let mut schemas = self.schemas.write();
        if schemas.contains_key(&schema.type_id) {
            return Err(WireError::SchemaConflict(format!(
                "a schema for {} is already registered",
                schema.name
            )));
        }
        tracing::debug!(
            "Registered schema {} ({} members)",
            schema.name,
            schema.members.len()
        );
        schemas.insert(schema.type_id, Arc::new(schema));
        // A new base level can change any derived selection
        self.selections.write().clear();
        Ok(())
    }

    pub fn schema(&self, ty: TypeId) -> Option<Arc<TypeSchema>> {
        self.schemas.read().get(&ty).cloned()
    }

    pub fn has_schema(&self, ty: TypeId) -> bool {
        self.schemas.read().contains_key(&ty)
    }

    /// Ordered members of `ty`, base levels first
    pub fn select(&self, ty: TypeId) -> Result<Arc<[SelectedMember]>> {
        if let Some(cached) = self.selections.read().get(&ty) {
            return Ok(Arc::clone(cached));
        }

        let selection: Arc<[SelectedMember]> = self.collect(ty)?.into();
        self.selections.write().insert(ty, Arc::clone(&selection));
        Ok(selection)
    }

    fn collect(&self, ty: TypeId) -> Result<Vec<SelectedMember>> {
        let mut schema = self.schema(ty).ok_or_else(|| {
            WireError::UnsupportedType(format!("no schema registered for {:?}", ty))
        })?;
        let mut path: Vec<ParentLink> = Vec::new();
        let mut levels: Vec<Vec<SelectedMember>> = Vec::new();

        loop {
            let shared_path: Arc<[ParentLink]> = path.clone().into();
            let mut level: Vec<SelectedMember> = schema
                .members
                .iter()
                .filter(|m| Self::participates(&schema, m))
                .map(|m| SelectedMember {
                    descriptor: m.clone(),
                    declared_in: schema.name,
                    path: Arc::clone(&shared_path),
                })
                .collect();
            level.sort_by(|a, b| a.descriptor.name.cmp(b.descriptor.name));
            levels.push(level);

            let Some(parent) = schema.parent.clone() else {
                break;
            };
            let base = self.schema(parent.type_id).ok_or_else(|| {
                WireError::UnsupportedType(format!(
                    "base type {} of {} has no schema",
                    parent.type_name, schema.name
                ))
            })?;
            path.push(parent);
            schema = base;
        }

        // Collected derived-first; the wire order is base-first
        Ok(levels.into_iter().rev().flatten().collect())
    }

    fn participates(schema: &TypeSchema, member: &MemberDescriptor) -> bool {
        if !schema.categories.admits(member.kind) {
            return false;
        }
        if member.excluded || member.synthesized {
            return false;
        }
        match member.kind {
            MemberKind::Field => true,
            MemberKind::Property => member.is_read_write(),
        }
    }
}
