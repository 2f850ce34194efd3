//! Per-stage parameter store.
//!
//! [`ProgramParameters`] holds the host-side values for every constant one
//! stage declares, laid out by the stage's [`NamedConstants`] table. The
//! binder reads from here by physical index; callers write by name.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::bytes::AsBytes;
use crate::constants::{ConstantDefinition, NamedConstants, Storage};
use crate::error::ParamError;
use crate::handle::BufferHandle;
use crate::shared::SharedParameters;
use crate::variability::Variability;

/// Typed host buffers, one per [`Storage`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantBuffers {
    floats: Vec<f32>,
    doubles: Vec<f64>,
    ints: Vec<i32>,
    uints: Vec<u32>,
}

impl ConstantBuffers {
    /// Allocate zeroed buffers sized for `constants`.
    pub fn for_constants(constants: &NamedConstants) -> Self {
        Self {
            floats: vec![0.0; constants.buffer_len(Storage::Float)],
            doubles: vec![0.0; constants.buffer_len(Storage::Double)],
            ints: vec![0; constants.buffer_len(Storage::Int)],
            uints: vec![0; constants.buffer_len(Storage::Uint)],
        }
    }

    pub fn slice<T: ConstantData>(&self, offset: usize, len: usize) -> Result<&[T], ParamError> {
        let buffer = T::buffer(self);
        buffer.get(offset..offset + len).ok_or(ParamError::OutOfRange {
            storage: T::STORAGE,
            offset,
            len,
            capacity: buffer.len(),
        })
    }

    pub fn write<T: ConstantData>(&mut self, offset: usize, values: &[T]) -> Result<(), ParamError> {
        let buffer = T::buffer_mut(self);
        let capacity = buffer.len();
        buffer
            .get_mut(offset..offset + values.len())
            .ok_or(ParamError::OutOfRange {
                storage: T::STORAGE,
                offset,
                len: values.len(),
                capacity,
            })?
            .copy_from_slice(values);
        Ok(())
    }

    /// Write `values` into the constant described by `def`.
    pub fn write_constant<T: ConstantData>(
        &mut self,
        name: &str,
        def: &ConstantDefinition,
        values: &[T],
    ) -> Result<(), ParamError> {
        if def.const_type.storage() != T::STORAGE {
            return Err(ParamError::TypeMismatch {
                name: name.to_owned(),
                const_type: def.const_type,
                given: T::STORAGE,
            });
        }
        if values.len() > def.len() {
            return Err(ParamError::OutOfRange {
                storage: T::STORAGE,
                offset: def.physical_index,
                len: values.len(),
                capacity: def.len(),
            });
        }
        self.write(def.physical_index, values)
    }

    /// Native-endian bytes of the constant described by `def`.
    pub fn constant_bytes(&self, def: &ConstantDefinition) -> Result<&[u8], ParamError> {
        let (offset, len) = (def.physical_index, def.len());
        Ok(match def.const_type.storage() {
            Storage::Float => crate::bytes::slice_as_bytes(self.slice::<f32>(offset, len)?),
            Storage::Double => crate::bytes::slice_as_bytes(self.slice::<f64>(offset, len)?),
            Storage::Int => crate::bytes::slice_as_bytes(self.slice::<i32>(offset, len)?),
            Storage::Uint => crate::bytes::slice_as_bytes(self.slice::<u32>(offset, len)?),
        })
    }
}

/// A scalar type with its own host buffer.
pub trait ConstantData: AsBytes + 'static {
    const STORAGE: Storage;

    fn buffer(buffers: &ConstantBuffers) -> &[Self];
    fn buffer_mut(buffers: &mut ConstantBuffers) -> &mut [Self];
}

macro_rules! constant_data {
    ($ty:ty, $storage:ident, $field:ident) => {
        impl ConstantData for $ty {
            const STORAGE: Storage = Storage::$storage;

            fn buffer(buffers: &ConstantBuffers) -> &[Self] {
                &buffers.$field
            }

            fn buffer_mut(buffers: &mut ConstantBuffers) -> &mut [Self] {
                &mut buffers.$field
            }
        }
    };
}

constant_data!(f32, Float, floats);
constant_data!(f64, Double, doubles);
constant_data!(i32, Int, ints);
constant_data!(u32, Uint, uints);

/// Host-side values for one stage's constants.
#[derive(Debug, Clone)]
pub struct ProgramParameters {
    constants: Rc<NamedConstants>,
    buffers: ConstantBuffers,
    /// Indexed by [`ConstantDefinition::slot`].
    variability: Vec<Variability>,
    /// Float element holding the pass iteration number, if any.
    pass_iteration: Option<usize>,
    shared: Vec<Rc<RefCell<SharedParameters>>>,
    counter_buffers: FxHashMap<u32, BufferHandle>,
}

impl ProgramParameters {
    pub fn new(constants: Rc<NamedConstants>) -> Self {
        Self {
            buffers: ConstantBuffers::for_constants(&constants),
            variability: vec![Variability::GLOBAL; constants.len()],
            constants,
            pass_iteration: None,
            shared: Vec::new(),
            counter_buffers: FxHashMap::default(),
        }
    }

    pub fn constants(&self) -> &NamedConstants {
        &self.constants
    }

    /// Whether this store was created from exactly `constants`.
    pub fn is_built_from(&self, constants: &Rc<NamedConstants>) -> bool {
        Rc::ptr_eq(&self.constants, constants)
    }

    pub fn buffers(&self) -> &ConstantBuffers {
        &self.buffers
    }

    fn lookup(&self, name: &str) -> Result<&ConstantDefinition, ParamError> {
        self.constants
            .get(name)
            .ok_or_else(|| ParamError::UnknownConstant(name.to_owned()))
    }

    /// Write `values` to the constant `name`.
    ///
    /// Fewer values than the constant holds update a prefix; more is an error.
    pub fn set_named_constant<T: ConstantData>(&mut self, name: &str, values: &[T]) -> Result<(), ParamError> {
        let def = self.lookup(name)?.clone();
        self.buffers.write_constant(name, &def, values)
    }

    pub fn set_named_bool(&mut self, name: &str, values: &[bool]) -> Result<(), ParamError> {
        let as_uints: Vec<u32> = values.iter().map(|&b| u32::from(b)).collect();
        self.set_named_constant(name, &as_uints)
    }

    /// Texture unit sampled by the sampler constant `name`.
    pub fn set_sampler(&mut self, name: &str, unit: i32) -> Result<(), ParamError> {
        self.set_named_constant(name, &[unit])
    }

    pub fn set_variability(&mut self, name: &str, variability: Variability) -> Result<(), ParamError> {
        let slot = self.lookup(name)?.slot;
        self.variability[slot] = variability;
        Ok(())
    }

    pub fn variability(&self, def: &ConstantDefinition) -> Variability {
        self.variability.get(def.slot).copied().unwrap_or_default()
    }

    /// Read `len` elements of `T` at `offset`.
    pub fn data<T: ConstantData>(&self, offset: usize, len: usize) -> Result<&[T], ParamError> {
        self.buffers.slice(offset, len)
    }

    /// Mark the float constant `name` as the pass iteration counter.
    pub fn set_pass_iteration_constant(&mut self, name: &str) -> Result<(), ParamError> {
        let def = self.lookup(name)?.clone();
        if def.const_type.storage() != Storage::Float {
            return Err(ParamError::TypeMismatch {
                name: name.to_owned(),
                const_type: def.const_type,
                given: Storage::Float,
            });
        }
        self.pass_iteration = Some(def.physical_index);
        self.variability[def.slot] = Variability::PASS_ITERATION_NUMBER;
        Ok(())
    }

    pub fn pass_iteration_index(&self) -> Option<usize> {
        self.pass_iteration
    }

    /// Store the current pass iteration number. A no-op without a counter.
    pub fn set_pass_iteration(&mut self, iteration: u32) {
        if let Some(index) = self.pass_iteration {
            // The index came from our own table, so it is in range.
            let _ = self.buffers.write(index, &[iteration as f32]);
        }
    }

    pub fn add_shared_parameters(&mut self, shared: Rc<RefCell<SharedParameters>>) {
        let name = shared.borrow().name().to_owned();
        if self.shared_named(&name).is_none() {
            self.shared.push(shared);
        }
    }

    pub fn shared_parameters(&self) -> &[Rc<RefCell<SharedParameters>>] {
        &self.shared
    }

    pub fn shared_named(&self, name: &str) -> Option<&Rc<RefCell<SharedParameters>>> {
        self.shared.iter().find(|s| s.borrow().name() == name)
    }

    /// Buffer holding the atomic counters bound at `binding`.
    pub fn set_counter_buffer(&mut self, binding: u32, buffer: BufferHandle) {
        self.counter_buffers.insert(binding, buffer);
    }

    pub fn counter_buffer(&self, binding: u32) -> Option<BufferHandle> {
        self.counter_buffers.get(&binding).copied()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::constants::ConstantType;

    fn params() -> ProgramParameters {
        let mut table = NamedConstants::new();
        table.add("tint", ConstantType::Float4, 1);
        table.add("offsets", ConstantType::Float2, 3);
        table.add("count", ConstantType::Int1, 1);
        table.add("enabled", ConstantType::Bool1, 1);
        table.add("pass", ConstantType::Float1, 1);
        ProgramParameters::new(Rc::new(table))
    }

    #[test]
    fn named_writes_land_at_physical_index() {
        let mut p = params();
        p.set_named_constant("offsets", &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let def = p.constants().get("offsets").unwrap().clone();
        assert_eq!(p.data::<f32>(def.physical_index, 4).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        p.set_named_bool("enabled", &[true]).unwrap();
        assert_eq!(p.data::<u32>(0, 1).unwrap(), &[1]);
    }

    #[test]
    fn mismatches_are_reported() {
        let mut p = params();
        assert_eq!(
            p.set_named_constant("missing", &[1.0f32]),
            Err(ParamError::UnknownConstant("missing".into()))
        );
        assert!(matches!(
            p.set_named_constant("count", &[1.0f32]),
            Err(ParamError::TypeMismatch { .. })
        ));
        assert!(matches!(
            p.set_named_constant("tint", &[0.0f32; 5]),
            Err(ParamError::OutOfRange { .. })
        ));
    }

    #[test]
    fn pass_iteration_counter() {
        let mut p = params();
        p.set_pass_iteration(3);
        p.set_pass_iteration_constant("pass").unwrap();
        p.set_pass_iteration(3);
        let index = p.pass_iteration_index().unwrap();
        assert_eq!(p.data::<f32>(index, 1).unwrap(), &[3.0]);
        let def = p.constants().get("pass").unwrap().clone();
        assert_eq!(p.variability(&def), Variability::PASS_ITERATION_NUMBER);
    }
}
