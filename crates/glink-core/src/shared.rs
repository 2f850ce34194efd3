//! Named parameter groups shared across programs through buffer blocks.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::constants::{ConstantDefinition, ConstantType, NamedConstants, Storage};
use crate::error::ParamError;
use crate::handle::BufferHandle;
use crate::params::{ConstantBuffers, ConstantData};
use crate::variability::Variability;

/// Values for one uniform or storage block, shared by every program that
/// declares a block with the same name.
///
/// The backing buffer is created by whoever owns this store and attached with
/// [`SharedParameters::set_buffer`]. Members written since the last upload are
/// tracked so only their byte ranges are rewritten.
#[derive(Debug)]
pub struct SharedParameters {
    name: String,
    constants: NamedConstants,
    buffers: ConstantBuffers,
    variability: Variability,
    /// Indexed by member slot.
    dirty: Vec<bool>,
    buffer: Option<BufferHandle>,
}

impl SharedParameters {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constants: NamedConstants::new(),
            buffers: ConstantBuffers::default(),
            variability: Variability::GLOBAL,
            dirty: Vec::new(),
            buffer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a member. Existing values are preserved.
    pub fn add_constant(&mut self, name: &str, const_type: ConstantType, array_size: usize) {
        if self.constants.contains(name) {
            return;
        }
        self.constants.add(name, const_type, array_size);

        let mut grown = ConstantBuffers::for_constants(&self.constants);
        for (member, def) in self.constants.iter() {
            if member == name {
                continue;
            }
            // Physical indices of earlier members do not move when adding.
            match def.const_type.storage() {
                Storage::Float => copy_member::<f32>(&self.buffers, &mut grown, def),
                Storage::Double => copy_member::<f64>(&self.buffers, &mut grown, def),
                Storage::Int => copy_member::<i32>(&self.buffers, &mut grown, def),
                Storage::Uint => copy_member::<u32>(&self.buffers, &mut grown, def),
            }
        }
        self.buffers = grown;
        self.dirty.push(true);
    }

    pub fn constants(&self) -> &NamedConstants {
        &self.constants
    }

    pub fn set_named_constant<T: ConstantData>(&mut self, name: &str, values: &[T]) -> Result<(), ParamError> {
        let def = self
            .constants
            .get(name)
            .ok_or_else(|| ParamError::UnknownConstant(name.to_owned()))?
            .clone();
        self.buffers.write_constant(name, &def, values)?;
        self.dirty[def.slot] = true;
        Ok(())
    }

    pub fn variability(&self) -> Variability {
        self.variability
    }

    pub fn set_variability(&mut self, variability: Variability) {
        self.variability = variability;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.iter().any(|d| *d)
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = true);
    }

    /// Bytes of `member` if it changed since the last upload.
    pub fn dirty_member_bytes(&self, member: &str) -> Option<&[u8]> {
        let def = self.constants.get(member)?;
        if !self.dirty[def.slot] {
            return None;
        }
        self.buffers.constant_bytes(def).ok()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = false);
    }

    pub fn buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    /// Attach the buffer object backing this block; everything is re-uploaded.
    pub fn set_buffer(&mut self, buffer: Option<BufferHandle>) {
        self.buffer = buffer;
        self.mark_all_dirty();
    }
}

fn copy_member<T: ConstantData>(
    from: &ConstantBuffers,
    to: &mut ConstantBuffers,
    def: &ConstantDefinition,
) {
    if let Ok(values) = from.slice::<T>(def.physical_index, def.len()) {
        let _ = to.write(def.physical_index, values);
    }
}

/// Process-wide registry of [`SharedParameters`] by block name.
#[derive(Debug, Default)]
pub struct SharedParameterRegistry {
    entries: FxHashMap<String, Rc<RefCell<SharedParameters>>>,
}

impl SharedParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the group named `name`, creating an empty one on first use.
    pub fn get_or_create(&mut self, name: &str) -> Rc<RefCell<SharedParameters>> {
        self.entries
            .entry(name.to_owned())
            .or_insert_with(|| Rc::new(RefCell::new(SharedParameters::new(name))))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Rc<RefCell<SharedParameters>>> {
        self.entries.get(name).cloned()
    }

    pub fn remove(&mut self, name: &str) -> Option<Rc<RefCell<SharedParameters>>> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn only_written_members_are_dirty() {
        let mut shared = SharedParameters::new("Lights");
        shared.add_constant("color", ConstantType::Float4, 1);
        shared.add_constant("count", ConstantType::Int1, 1);
        shared.set_named_constant("color", &[1.0f32, 0.5, 0.25, 1.0]).unwrap();
        shared.clear_dirty();
        assert!(!shared.is_dirty());

        shared.set_named_constant("count", &[3i32]).unwrap();
        assert!(shared.is_dirty());
        assert_eq!(shared.dirty_member_bytes("color"), None);
        assert_eq!(shared.dirty_member_bytes("count"), Some(&3i32.to_ne_bytes()[..]));
    }

    #[test]
    fn adding_members_keeps_values() {
        let mut shared = SharedParameters::new("Frame");
        shared.add_constant("time", ConstantType::Float1, 1);
        shared.set_named_constant("time", &[2.5f32]).unwrap();
        shared.add_constant("resolution", ConstantType::Float2, 1);
        assert_eq!(shared.dirty_member_bytes("time"), Some(&2.5f32.to_ne_bytes()[..]));
    }

    #[test]
    fn registry_hands_out_one_group_per_name() {
        let mut registry = SharedParameterRegistry::new();
        let a = registry.get_or_create("Frame");
        let b = registry.get_or_create("Frame");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }
}
