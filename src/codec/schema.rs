//! Type schemas
//!
//! A [`TypeSchema`] is the descriptor table for one composite type: its data
//! members, its base type (if any), which member categories participate, and
//! how to obtain a fresh instance during decode.
//!
//! Inheritance is expressed as embedding: a derived type holds its base by
//! value and supplies projections from itself to the embedded base.

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Result, WireError};

use super::DynValue;

pub(crate) type Getter =
    Arc<dyn for<'a> Fn(&'a dyn Any) -> Result<Option<&'a dyn Any>> + Send + Sync>;
pub(crate) type Setter = Arc<dyn Fn(&mut dyn Any, Option<DynValue>) -> Result<()> + Send + Sync>;
pub(crate) type Guard = Arc<dyn Fn(&dyn Any) -> Result<bool> + Send + Sync>;
pub(crate) type Projection =
    Arc<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync>;
pub(crate) type ProjectionMut =
    Arc<dyn for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Any> + Send + Sync>;
type Ctor = Arc<dyn Fn() -> DynValue + Send + Sync>;
type ConversionCtor = Arc<dyn Fn(Option<&dyn Any>) -> DynValue + Send + Sync>;

// These helpers pin the higher-ranked signatures so closures infer them.
fn getter<F>(f: F) -> Getter
where
    F: for<'a> Fn(&'a dyn Any) -> Result<Option<&'a dyn Any>> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn projection<F>(f: F) -> Projection
where
    F: for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn projection_mut<F>(f: F) -> ProjectionMut
where
    F: for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Any> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn owner_mismatch<T>(member: &str) -> WireError {
    WireError::Decode(format!(
        "member '{}' accessed on an instance that is not {}",
        member,
        std::any::type_name::<T>()
    ))
}

/// Field-like or property-like member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Property,
}

/// Which member categories a type level contributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberCategories {
    pub fields: bool,
    pub properties: bool,
}

impl MemberCategories {
    pub const ALL: Self = Self { fields: true, properties: true };
    pub const FIELDS_ONLY: Self = Self { fields: true, properties: false };
    pub const PROPERTIES_ONLY: Self = Self { fields: false, properties: true };

    pub fn admits(&self, kind: MemberKind) -> bool {
        match kind {
            MemberKind::Field => self.fields,
            MemberKind::Property => self.properties,
        }
    }
}

impl Default for MemberCategories {
    fn default() -> Self {
        Self::ALL
    }
}

// =============================================================================
// Member descriptors
// =============================================================================

/// One declared data member of a composite type
#[derive(Clone)]
pub struct MemberDescriptor {
    pub(crate) name: &'static str,
    pub(crate) kind: MemberKind,
    pub(crate) value_type: TypeId,
    pub(crate) value_type_name: &'static str,
    pub(crate) switch_group: Option<u32>,
    pub(crate) excluded: bool,
    pub(crate) synthesized: bool,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) get: Getter,
    pub(crate) set: Setter,
    pub(crate) serialize_guard: Option<Guard>,
    pub(crate) deserialize_guard: Option<Guard>,
}

impl MemberDescriptor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    /// Declared type of the member value (the decode target)
    pub fn value_type(&self) -> TypeId {
        self.value_type
    }

    pub fn value_type_name(&self) -> &'static str {
        self.value_type_name
    }

    pub fn switch_group(&self) -> Option<u32> {
        self.switch_group
    }

    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    pub fn is_synthesized(&self) -> bool {
        self.synthesized
    }

    pub fn is_read_write(&self) -> bool {
        self.readable && self.writable
    }
}

impl fmt::Debug for MemberDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value_type", &self.value_type_name)
            .field("switch_group", &self.switch_group)
            .field("excluded", &self.excluded)
            .field("synthesized", &self.synthesized)
            .finish()
    }
}

/// Builder for one member of `T`
pub struct Member<T> {
    descriptor: MemberDescriptor,
    _owner: PhantomData<fn() -> T>,
}

impl<T: Any> Member<T> {
    fn build<V: Any + Send + Sync>(
        name: &'static str,
        kind: MemberKind,
        get: Getter,
        set: Setter,
    ) -> Self {
        Self {
            descriptor: MemberDescriptor {
                name,
                kind,
                value_type: TypeId::of::<V>(),
                value_type_name: std::any::type_name::<V>(),
                switch_group: None,
                excluded: false,
                synthesized: false,
                readable: true,
                writable: true,
                get,
                set,
                serialize_guard: None,
                deserialize_guard: None,
            },
            _owner: PhantomData,
        }
    }

    fn required<V: Any + Send + Sync>(
        name: &'static str,
        kind: MemberKind,
        get: impl Fn(&T) -> &V + Send + Sync + 'static,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self {
        let get = getter(move |owner: &dyn Any| {
            let owner = owner
                .downcast_ref::<T>()
                .ok_or_else(|| owner_mismatch::<T>(name))?;
            Ok(Some(get(owner) as &dyn Any))
        });
        let set: Setter = Arc::new(move |owner: &mut dyn Any, value: Option<DynValue>| -> Result<()> {
            let owner = owner
                .downcast_mut::<T>()
                .ok_or_else(|| owner_mismatch::<T>(name))?;
            let value = value.ok_or_else(|| {
                WireError::Decode(format!("null decoded for non-nullable member '{}'", name))
            })?;
            let value = value.downcast::<V>().map_err(|_| {
                WireError::Decode(format!("member '{}' decoded to an unexpected type", name))
            })?;
            set(owner, *value);
            Ok(())
        });
        Self::build::<V>(name, kind, get, set)
    }

    fn nullable<V: Any + Send + Sync>(
        name: &'static str,
        kind: MemberKind,
        get: impl Fn(&T) -> Option<&V> + Send + Sync + 'static,
        set: impl Fn(&mut T, Option<V>) + Send + Sync + 'static,
    ) -> Self {
        let get = getter(move |owner: &dyn Any| {
            let owner = owner
                .downcast_ref::<T>()
                .ok_or_else(|| owner_mismatch::<T>(name))?;
            Ok(get(owner).map(|v| v as &dyn Any))
        });
        let set: Setter = Arc::new(move |owner: &mut dyn Any, value: Option<DynValue>| -> Result<()> {
            let owner = owner
                .downcast_mut::<T>()
                .ok_or_else(|| owner_mismatch::<T>(name))?;
            let value = match value {
                Some(v) => Some(*v.downcast::<V>().map_err(|_| {
                    WireError::Decode(format!("member '{}' decoded to an unexpected type", name))
                })?),
                None => None,
            };
            set(owner, value);
            Ok(())
        });
        Self::build::<V>(name, kind, get, set)
    }

    /// A plain data field
    pub fn field<V: Any + Send + Sync>(
        name: &'static str,
        get: impl Fn(&T) -> &V + Send + Sync + 'static,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self {
        Self::required(name, MemberKind::Field, get, set)
    }

    /// A data field that may be absent (encoded as the null sentinel)
    pub fn optional_field<V: Any + Send + Sync>(
        name: &'static str,
        get: impl Fn(&T) -> Option<&V> + Send + Sync + 'static,
        set: impl Fn(&mut T, Option<V>) + Send + Sync + 'static,
    ) -> Self {
        Self::nullable(name, MemberKind::Field, get, set)
    }

    /// An accessor-backed member
    pub fn property<V: Any + Send + Sync>(
        name: &'static str,
        get: impl Fn(&T) -> &V + Send + Sync + 'static,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self {
        Self::required(name, MemberKind::Property, get, set)
    }

    pub fn optional_property<V: Any + Send + Sync>(
        name: &'static str,
        get: impl Fn(&T) -> Option<&V> + Send + Sync + 'static,
        set: impl Fn(&mut T, Option<V>) + Send + Sync + 'static,
    ) -> Self {
        Self::nullable(name, MemberKind::Property, get, set)
    }

    /// Restrict this member to requests carrying the same switch id
    pub fn switch_group(mut self, id: u32) -> Self {
        self.descriptor.switch_group = Some(id);
        self
    }

    /// Never serialize this member
    pub fn excluded(mut self) -> Self {
        self.descriptor.excluded = true;
        self
    }

    /// Mark as generated bookkeeping; never serialized
    pub fn synthesized(mut self) -> Self {
        self.descriptor.synthesized = true;
        self
    }

    /// Property without a usable setter; not selected
    pub fn read_only(mut self) -> Self {
        self.descriptor.writable = false;
        self
    }

    /// Property without a usable getter; not selected
    pub fn write_only(mut self) -> Self {
        self.descriptor.readable = false;
        self
    }

    /// Skip this member on encode whenever `guard` returns false.
    ///
    /// The guard must give the same answer on the decoding side or the
    /// stream silently desynchronizes.
    pub fn serialize_guard(mut self, guard: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.descriptor.serialize_guard = Some(Self::wrap_guard(self.descriptor.name, guard));
        self
    }

    /// Skip this member on decode whenever `guard` returns false.
    ///
    /// Evaluated against the instance under construction, so it can only
    /// see members decoded before this one.
    pub fn deserialize_guard(
        mut self,
        guard: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.descriptor.deserialize_guard = Some(Self::wrap_guard(self.descriptor.name, guard));
        self
    }

    fn wrap_guard(name: &'static str, guard: impl Fn(&T) -> bool + Send + Sync + 'static) -> Guard {
        Arc::new(move |owner: &dyn Any| -> Result<bool> {
            let owner = owner.downcast_ref::<T>().ok_or_else(|| {
                WireError::GuardInvocation(format!(
                    "guard for member '{}' expects {}",
                    name,
                    std::any::type_name::<T>()
                ))
            })?;
            Ok(guard(owner))
        })
    }
}

// =============================================================================
// Type schemas
// =============================================================================

/// Link from a derived type to its embedded base
#[derive(Clone)]
pub struct ParentLink {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) project: Projection,
    pub(crate) project_mut: ProjectionMut,
}

/// Descriptor table for one composite type
pub struct TypeSchema {
    pub(crate) type_id: TypeId,
    pub(crate) name: &'static str,
    pub(crate) parent: Option<ParentLink>,
    pub(crate) categories: MemberCategories,
    pub(crate) members: Vec<MemberDescriptor>,
    pub(crate) is_abstract: bool,
    conversion_ctor: Option<ConversionCtor>,
    default_ctor: Option<Ctor>,
    raw_ctor: Option<Ctor>,
}

impl TypeSchema {
    /// Start describing `T`
    pub fn builder<T: Any + Send + Sync>(name: &'static str) -> SchemaBuilder<T> {
        SchemaBuilder {
            schema: TypeSchema {
                type_id: TypeId::of::<T>(),
                name,
                parent: None,
                categories: MemberCategories::ALL,
                members: Vec::new(),
                is_abstract: false,
                conversion_ctor: None,
                default_ctor: None,
                raw_ctor: None,
            },
            _marker: PhantomData,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent_type(&self) -> Option<TypeId> {
        self.parent.as_ref().map(|p| p.type_id)
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn members(&self) -> &[MemberDescriptor] {
        &self.members
    }

    /// Fresh instance via the designated conversion constructor, then the
    /// parameterless constructor, then raw allocation.
    pub(crate) fn construct(&self) -> Result<DynValue> {
        if let Some(ctor) = &self.conversion_ctor {
            return Ok(ctor(None));
        }
        if let Some(ctor) = &self.default_ctor {
            return Ok(ctor());
        }
        self.construct_raw()
    }

    /// Fresh instance bypassing all constructors
    pub(crate) fn construct_raw(&self) -> Result<DynValue> {
        match &self.raw_ctor {
            Some(ctor) => Ok(ctor()),
            None => Err(WireError::UnsupportedType(format!(
                "{} has no constructor and does not allow raw allocation",
                self.name
            ))),
        }
    }
}

impl fmt::Debug for TypeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeSchema")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.type_name))
            .field("categories", &self.categories)
            .field("members", &self.members)
            .field("is_abstract", &self.is_abstract)
            .finish()
    }
}

/// Builder for [`TypeSchema`]
pub struct SchemaBuilder<T> {
    schema: TypeSchema,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> SchemaBuilder<T> {
    pub fn member(mut self, member: Member<T>) -> Self {
        self.schema.members.push(member.descriptor);
        self
    }

    /// Limit which member categories this level contributes
    pub fn categories(mut self, categories: MemberCategories) -> Self {
        self.schema.categories = categories;
        self
    }

    /// Cannot be instantiated during decode
    pub fn abstract_type(mut self) -> Self {
        self.schema.is_abstract = true;
        self
    }

    /// Declare the embedded base type whose members precede ours
    pub fn extends<B: Any>(
        mut self,
        project: impl Fn(&T) -> &B + Send + Sync + 'static,
        project_mut: impl Fn(&mut T) -> &mut B + Send + Sync + 'static,
    ) -> Self {
        self.schema.parent = Some(ParentLink {
            type_id: TypeId::of::<B>(),
            type_name: std::any::type_name::<B>(),
            project: projection(move |owner: &dyn Any| {
                owner.downcast_ref::<T>().map(|t| project(t) as &dyn Any)
            }),
            project_mut: projection_mut(move |owner: &mut dyn Any| {
                owner.downcast_mut::<T>().map(|t| project_mut(t) as &mut dyn Any)
            }),
        });
        self
    }

    /// Designated conversion constructor; receives a null placeholder
    pub fn conversion_ctor(
        mut self,
        ctor: impl Fn(Option<&dyn Any>) -> T + Send + Sync + 'static,
    ) -> Self {
        self.schema.conversion_ctor = Some(Arc::new(move |placeholder: Option<&dyn Any>| -> DynValue {
            Box::new(ctor(placeholder))
        }));
        self
    }

    /// Opt in to raw allocation; `ctor` must not run any initialization logic
    pub fn raw_ctor(mut self, ctor: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.schema.raw_ctor = Some(Arc::new(move || -> DynValue { Box::new(ctor()) }));
        self
    }

    pub fn build(self) -> TypeSchema {
        self.schema
    }
}

impl<T: Any + Send + Sync + Default> SchemaBuilder<T> {
    /// Use `T::default()` as the parameterless constructor
    pub fn default_ctor(mut self) -> Self {
        self.schema.default_ctor = Some(Arc::new(|| -> DynValue { Box::new(T::default()) }));
        self
    }
}
