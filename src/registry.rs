//! The table of types that may travel through the dynamic path.
//!
//! Every entry binds one [`FourCC`] tag to one concrete type, in both
//! directions. A fresh registry already holds the built-in primitives and
//! their array (`Box<[T]>`) and list (`Vec<T>`) forms; those tags are
//! reserved.
//!
//! Built-in tags are a three-character base followed by a suffix: a space for
//! the scalar, `A` for the array and `L` for the list.
//!
//! | base  | type            |
//! |-------|-----------------|
//! | `BOL` | `bool`          |
//! | `I08` | `i8`            |
//! | `U08` | `u8`            |
//! | `I16` | `i16`           |
//! | `U16` | `u16`           |
//! | `I32` | `i32`           |
//! | `U32` | `u32`           |
//! | `I64` | `i64`           |
//! | `U64` | `u64`           |
//! | `F32` | `f32`           |
//! | `F64` | `f64`           |
//! | `CHR` | `char`          |
//! | `STR` | `String`        |
//! | `GID` | `uuid::Uuid`    |
//! | `DTM` | `NaiveDateTime` |

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::references::Instance;
use crate::{shared, Dynamic, FormatError, FourCC, Result, Serializable, Serializer, UsageError};

/// Reader or writer of one registered type. The value handed in is always of
/// the registered concrete type.
pub type DynamicFn = Rc<dyn Fn(&mut dyn Any, &mut Serializer<'_>) -> Result<()>>;

#[derive(Clone)]
struct Registration {
    type_id: TypeId,
    type_name: &'static str,
    construct: fn() -> Instance,
    reader: DynamicFn,
    writer: DynamicFn,
    builtin: bool,
}

fn construct<T: Default + Any>() -> Instance {
    let value = shared(T::default());
    Instance {
        dynamic: Dynamic::from_shared(value.clone()),
        typed: Box::new(value),
    }
}

fn downcast<T: Any>(value: &mut dyn Any) -> Result<&mut T> {
    value.downcast_mut::<T>().ok_or_else(|| {
        FormatError::InvalidData(format!(
            "dynamic codec for {} received another type",
            type_name::<T>()
        ))
        .into()
    })
}

fn transcode_as<T: Serializable + Any>(value: &mut dyn Any, serializer: &mut Serializer<'_>) -> Result<()> {
    downcast::<T>(value)?.serialize(serializer)
}

const fn builtin_tag(base: &[u8; 3], suffix: u8) -> FourCC {
    FourCC::new([base[0], base[1], base[2], suffix])
}

macro_rules! builtins {
    ($registry:ident, $($base:literal => $ty:ty),* $(,)?) => {$(
        $registry.insert_builtin::<$ty>(builtin_tag($base, b' '));
        $registry.insert_builtin::<Box<[$ty]>>(builtin_tag($base, b'A'));
        $registry.insert_builtin::<Vec<$ty>>(builtin_tag($base, b'L'));
    )*};
}

/// Bijective map between dynamic type tags and concrete types.
#[derive(Clone)]
pub struct DynamicRegistry {
    by_tag: HashMap<FourCC, Registration>,
    by_type: HashMap<TypeId, FourCC>,
}

impl DynamicRegistry {
    /// A registry holding only the built-in types.
    pub fn new() -> Self {
        let mut registry = DynamicRegistry {
            by_tag: HashMap::new(),
            by_type: HashMap::new(),
        };
        builtins!(registry,
            b"BOL" => bool,
            b"I08" => i8,
            b"U08" => u8,
            b"I16" => i16,
            b"U16" => u16,
            b"I32" => i32,
            b"U32" => u32,
            b"I64" => i64,
            b"U64" => u64,
            b"F32" => f32,
            b"F64" => f64,
            b"CHR" => char,
            b"STR" => String,
        );
        #[cfg(feature = "uuid")]
        builtins!(registry, b"GID" => uuid::Uuid);
        #[cfg(feature = "chrono")]
        builtins!(registry, b"DTM" => chrono::NaiveDateTime);
        registry
    }

    fn insert_builtin<T: Serializable + Default + Any>(&mut self, tag: FourCC) {
        let codec: DynamicFn = Rc::new(transcode_as::<T>);
        self.by_type.insert(TypeId::of::<T>(), tag);
        self.by_tag.insert(
            tag,
            Registration {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                construct: construct::<T>,
                reader: codec.clone(),
                writer: codec,
                builtin: true,
            },
        );
    }

    /// Registers `T` under `tag`, transcoding it with its own
    /// [`Serializable`] implementation.
    ///
    /// # Errors
    /// [`UsageError::DuplicateTag`] if `tag` is built in or bound to another
    /// type, [`UsageError::DuplicateType`] if `T` is bound to another tag.
    pub fn register<T: Serializable + Default + Any>(&mut self, tag: impl Into<FourCC>) -> Result<()> {
        let codec: DynamicFn = Rc::new(transcode_as::<T>);
        self.insert::<T>(tag.into(), codec.clone(), codec)
    }

    /// Registers `T` under `tag` with a custom reader and writer.
    ///
    /// The reader receives a default-constructed `T` to populate.
    pub fn register_with<T, R, W>(&mut self, tag: impl Into<FourCC>, read: R, write: W) -> Result<()>
    where
        T: Default + Any,
        R: Fn(&mut T, &mut Serializer<'_>) -> Result<()> + 'static,
        W: Fn(&mut T, &mut Serializer<'_>) -> Result<()> + 'static,
    {
        let reader: DynamicFn = Rc::new(move |value: &mut dyn Any, serializer: &mut Serializer<'_>| {
            read(downcast::<T>(value)?, serializer)
        });
        let writer: DynamicFn = Rc::new(move |value: &mut dyn Any, serializer: &mut Serializer<'_>| {
            write(downcast::<T>(value)?, serializer)
        });
        self.insert::<T>(tag.into(), reader, writer)
    }

    fn insert<T: Default + Any>(&mut self, tag: FourCC, reader: DynamicFn, writer: DynamicFn) -> Result<()> {
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self.by_tag.get(&tag) {
            if existing.builtin || existing.type_id != type_id {
                return Err(UsageError::DuplicateTag {
                    tag,
                    existing: existing.type_name,
                }
                .into());
            }
            // the same pair again
            return Ok(());
        }
        if let Some(&existing) = self.by_type.get(&type_id) {
            return Err(UsageError::DuplicateType {
                type_name: type_name::<T>(),
                existing,
            }
            .into());
        }
        log::debug!("registered dynamic type {} as '{}'", type_name::<T>(), tag);
        self.by_type.insert(type_id, tag);
        self.by_tag.insert(
            tag,
            Registration {
                type_id,
                type_name: type_name::<T>(),
                construct: construct::<T>,
                reader,
                writer,
                builtin: false,
            },
        );
        Ok(())
    }

    pub fn tag_of<T: Any>(&self) -> Option<FourCC> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn contains_tag(&self, tag: impl Into<FourCC>) -> bool {
        self.by_tag.contains_key(&tag.into())
    }

    pub fn is_builtin(&self, tag: impl Into<FourCC>) -> bool {
        self.by_tag.get(&tag.into()).is_some_and(|r| r.builtin)
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    /// `(tag, type name, built in)` for every registration, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (FourCC, &'static str, bool)> + '_ {
        self.by_tag.iter().map(|(tag, r)| (*tag, r.type_name, r.builtin))
    }

    pub(crate) fn writer_for(&self, type_id: TypeId) -> Option<(FourCC, DynamicFn)> {
        let tag = *self.by_type.get(&type_id)?;
        let registration = self.by_tag.get(&tag)?;
        Some((tag, registration.writer.clone()))
    }

    pub(crate) fn reader_for(&self, tag: FourCC) -> Option<(fn() -> Instance, DynamicFn)> {
        let registration = self.by_tag.get(&tag)?;
        Some((registration.construct, registration.reader.clone()))
    }
}

impl Default for DynamicRegistry {
    fn default() -> Self {
        DynamicRegistry::new()
    }
}

impl fmt::Debug for DynamicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.iter().collect();
        tags.sort_by_key(|(tag, _, _)| *tag);
        f.debug_map()
            .entries(tags.into_iter().map(|(tag, name, _)| (tag, name)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Marker;

    impl Serializable for Marker {
        fn serialize(&mut self, _serializer: &mut Serializer<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn builtins_cover_scalar_array_and_list_forms() {
        let registry = DynamicRegistry::new();
        assert_eq!(registry.tag_of::<i32>(), Some(FourCC::new(*b"I32 ")));
        assert_eq!(registry.tag_of::<Box<[i32]>>(), Some(FourCC::new(*b"I32A")));
        assert_eq!(registry.tag_of::<Vec<i32>>(), Some(FourCC::new(*b"I32L")));
        assert_eq!(registry.tag_of::<Vec<String>>(), Some(FourCC::new(*b"STRL")));
        assert!(registry.is_builtin(b"BOL "));
    }

    #[test]
    fn builtin_tags_cannot_be_rebound() {
        let mut registry = DynamicRegistry::new();
        let err = registry.register::<Marker>(b"I32 ").unwrap_err();
        assert!(matches!(
            err,
            crate::SerializerError::Usage(UsageError::DuplicateTag { .. })
        ));
        let err = registry.register::<i32>(b"I32 ").unwrap_err();
        assert!(matches!(
            err,
            crate::SerializerError::Usage(UsageError::DuplicateTag { .. })
        ));
    }

    #[test]
    fn registering_the_same_pair_twice_is_accepted() {
        let mut registry = DynamicRegistry::new();
        let before = registry.len();
        registry.register::<Marker>(b"MARK").unwrap();
        registry.register::<Marker>(b"MARK").unwrap();
        assert_eq!(registry.len(), before + 1);
    }

    #[test]
    fn a_type_keeps_a_single_tag() {
        let mut registry = DynamicRegistry::new();
        registry.register::<Marker>(b"MARK").unwrap();
        let err = registry.register::<Marker>(b"MRK2").unwrap_err();
        assert!(matches!(
            err,
            crate::SerializerError::Usage(UsageError::DuplicateType { .. })
        ));
    }
}
