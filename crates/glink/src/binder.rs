//! Typed uniform uploads from a stage's parameter store.
//!
//! Each [`ConstantType`] maps to one upload function through a table built on
//! first use. Failures are logged and skipped: one bad parameter never stops
//! the rest of the frame.

use glink_core::{ConstantType, ParamError, ProgramParameters, StageKind, Storage, Variability};
use glink_driver::Driver;
use num_traits::FromPrimitive;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::program::LinkedProgram;
use crate::reflect::UniformReference;

type Upload = fn(&mut dyn Driver, &UniformReference, &ProgramParameters, bool) -> Result<(), ParamError>;

static UPLOADS: Lazy<FxHashMap<ConstantType, Upload>> = Lazy::new(|| {
    (0..=u8::MAX)
        .filter_map(ConstantType::from_u8)
        .map(|ty| (ty, upload_for(ty)))
        .collect()
});

fn upload_for(ty: ConstantType) -> Upload {
    match (ty.storage(), ty.is_matrix()) {
        (Storage::Float, true) => upload_matrix_f32,
        (Storage::Double, true) => upload_matrix_f64,
        (Storage::Float, false) => upload_f32,
        (Storage::Double, false) => upload_f64,
        (Storage::Int, _) => upload_i32,
        (Storage::Uint, _) => upload_u32,
    }
}

/// Scalar components covered by `reference`.
fn component_count(reference: &UniformReference) -> usize {
    reference.const_type.element_size() * reference.array_size
}

fn upload_f32(
    driver: &mut dyn Driver,
    reference: &UniformReference,
    params: &ProgramParameters,
    _transpose: bool,
) -> Result<(), ParamError> {
    let values = params.data::<f32>(reference.def.physical_index, component_count(reference))?;
    let components = reference.const_type.element_size() as u8;
    driver.uniform_f32(reference.program, reference.location, components, values);
    Ok(())
}

fn upload_f64(
    driver: &mut dyn Driver,
    reference: &UniformReference,
    params: &ProgramParameters,
    _transpose: bool,
) -> Result<(), ParamError> {
    let values = params.data::<f64>(reference.def.physical_index, component_count(reference))?;
    let components = reference.const_type.element_size() as u8;
    driver.uniform_f64(reference.program, reference.location, components, values);
    Ok(())
}

/// Ints and samplers; a sampler's value is its texture unit.
fn upload_i32(
    driver: &mut dyn Driver,
    reference: &UniformReference,
    params: &ProgramParameters,
    _transpose: bool,
) -> Result<(), ParamError> {
    let values = params.data::<i32>(reference.def.physical_index, component_count(reference))?;
    let components = reference.const_type.element_size() as u8;
    driver.uniform_i32(reference.program, reference.location, components, values);
    Ok(())
}

/// Uints and bools.
fn upload_u32(
    driver: &mut dyn Driver,
    reference: &UniformReference,
    params: &ProgramParameters,
    _transpose: bool,
) -> Result<(), ParamError> {
    let values = params.data::<u32>(reference.def.physical_index, component_count(reference))?;
    let components = reference.const_type.element_size() as u8;
    driver.uniform_u32(reference.program, reference.location, components, values);
    Ok(())
}

fn upload_matrix_f32(
    driver: &mut dyn Driver,
    reference: &UniformReference,
    params: &ProgramParameters,
    transpose: bool,
) -> Result<(), ParamError> {
    let values = params.data::<f32>(reference.def.physical_index, component_count(reference))?;
    if let Some(dims) = reference.const_type.matrix_dims() {
        driver.uniform_matrix_f32(reference.program, reference.location, dims, transpose, values);
    }
    Ok(())
}

fn upload_matrix_f64(
    driver: &mut dyn Driver,
    reference: &UniformReference,
    params: &ProgramParameters,
    transpose: bool,
) -> Result<(), ParamError> {
    let values = params.data::<f64>(reference.def.physical_index, component_count(reference))?;
    if let Some(dims) = reference.const_type.matrix_dims() {
        driver.uniform_matrix_f64(reference.program, reference.location, dims, transpose, values);
    }
    Ok(())
}

/// Upload every uniform owned by `stage` whose variability intersects `mask`.
///
/// References owned by other stages are never touched, even when they share
/// a name with one of `stage`'s.
pub fn update_uniforms(
    driver: &mut dyn Driver,
    program: &LinkedProgram,
    params: &ProgramParameters,
    mask: Variability,
    stage: StageKind,
) {
    let transpose = program.transpose_for(stage);
    for reference in program.uniforms().iter().filter(|r| r.stage == stage) {
        if !params.variability(&reference.def).intersects(mask) {
            continue;
        }
        let Some(upload) = UPLOADS.get(&reference.const_type) else {
            continue;
        };
        if let Err(err) = upload(driver, reference, params, transpose) {
            warn!(uniform = %reference.name, %stage, %err, "skipping uniform update");
        }
    }
}

/// Re-upload only the pass iteration counter.
///
/// The counter is found by its physical index in `params`, not by mask.
/// Physical indices are per stage, so only references owned by the stage
/// `params` was created for are considered.
pub fn update_pass_iteration_uniforms(driver: &mut dyn Driver, program: &LinkedProgram, params: &ProgramParameters) {
    let Some(index) = params.pass_iteration_index() else {
        return;
    };
    let owners = program.stages_owning(params);
    let Some(reference) = program.uniforms().iter().find(|r| {
        owners.contains(r.stage) && r.const_type.storage() == Storage::Float && r.def.physical_index == index
    }) else {
        return;
    };
    match params.data::<f32>(index, 1) {
        Ok(value) => driver.uniform_f32(reference.program, reference.location, 1, value),
        Err(err) => warn!(uniform = %reference.name, %err, "skipping pass iteration update"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_has_an_upload() {
        let count = (0..=u8::MAX).filter_map(ConstantType::from_u8).count();
        assert_eq!(UPLOADS.len(), count);
        assert!(UPLOADS.contains_key(&ConstantType::DMatrix4x3));
        assert!(UPLOADS.contains_key(&ConstantType::SamplerCube));
    }
}
