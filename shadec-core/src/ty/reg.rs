use fnv::FnvHashMap as HashMap;

use crate::ty::Type;

type TypeId = u32;

/// Interns structural types so that equal types share a single id.
#[derive(Default)]
pub struct TypeRegistry {
    ty_map: HashMap<Type, TypeId>,
}
impl TypeRegistry {
    /// Get the id previously assigned to `ty`, if any.
    pub fn get(&self, ty: &Type) -> Option<TypeId> {
        self.ty_map.get(ty).copied()
    }

    /// Assign `id` to `ty`. A type is assigned at most once.
    pub fn insert(&mut self, ty: Type, id: TypeId) {
        let old = self.ty_map.insert(ty, id);
        debug_assert!(old.is_none(), "type interned twice");
    }
}
