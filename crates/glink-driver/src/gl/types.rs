//! GL enum conversions.

use gl::types::{GLbitfield, GLenum};
use glink_core::{ConstantType, StageKind};

use crate::driver::{BlockKind, BufferTarget};

pub(crate) fn shader_type(kind: StageKind) -> GLenum {
    match kind {
        StageKind::Vertex => gl::VERTEX_SHADER,
        StageKind::Hull => gl::TESS_CONTROL_SHADER,
        StageKind::Domain => gl::TESS_EVALUATION_SHADER,
        StageKind::Geometry => gl::GEOMETRY_SHADER,
        StageKind::Fragment => gl::FRAGMENT_SHADER,
        StageKind::Compute => gl::COMPUTE_SHADER,
    }
}

pub(crate) fn stage_bit(kind: StageKind) -> GLbitfield {
    match kind {
        StageKind::Vertex => gl::VERTEX_SHADER_BIT,
        StageKind::Hull => gl::TESS_CONTROL_SHADER_BIT,
        StageKind::Domain => gl::TESS_EVALUATION_SHADER_BIT,
        StageKind::Geometry => gl::GEOMETRY_SHADER_BIT,
        StageKind::Fragment => gl::FRAGMENT_SHADER_BIT,
        StageKind::Compute => gl::COMPUTE_SHADER_BIT,
    }
}

pub(crate) fn buffer_target(target: BufferTarget) -> GLenum {
    match target {
        BufferTarget::Uniform => gl::UNIFORM_BUFFER,
        BufferTarget::Storage => gl::SHADER_STORAGE_BUFFER,
        BufferTarget::AtomicCounter => gl::ATOMIC_COUNTER_BUFFER,
    }
}

pub(crate) fn block_interface(kind: BlockKind) -> GLenum {
    match kind {
        BlockKind::Uniform => gl::UNIFORM_BLOCK,
        BlockKind::Storage => gl::SHADER_STORAGE_BLOCK,
    }
}

/// Map a uniform type reported by `glGetActiveUniform`.
///
/// Every sampler and image flavour collapses onto the sampler kind with the
/// same dimensionality.
pub(crate) fn constant_type(ty: GLenum) -> Option<ConstantType> {
    use ConstantType::*;

    Some(match ty {
        gl::FLOAT => Float1,
        gl::FLOAT_VEC2 => Float2,
        gl::FLOAT_VEC3 => Float3,
        gl::FLOAT_VEC4 => Float4,
        gl::FLOAT_MAT2 => Matrix2x2,
        gl::FLOAT_MAT2x3 => Matrix2x3,
        gl::FLOAT_MAT2x4 => Matrix2x4,
        gl::FLOAT_MAT3x2 => Matrix3x2,
        gl::FLOAT_MAT3 => Matrix3x3,
        gl::FLOAT_MAT3x4 => Matrix3x4,
        gl::FLOAT_MAT4x2 => Matrix4x2,
        gl::FLOAT_MAT4x3 => Matrix4x3,
        gl::FLOAT_MAT4 => Matrix4x4,

        gl::DOUBLE => Double1,
        gl::DOUBLE_VEC2 => Double2,
        gl::DOUBLE_VEC3 => Double3,
        gl::DOUBLE_VEC4 => Double4,
        gl::DOUBLE_MAT2 => DMatrix2x2,
        gl::DOUBLE_MAT2x3 => DMatrix2x3,
        gl::DOUBLE_MAT2x4 => DMatrix2x4,
        gl::DOUBLE_MAT3x2 => DMatrix3x2,
        gl::DOUBLE_MAT3 => DMatrix3x3,
        gl::DOUBLE_MAT3x4 => DMatrix3x4,
        gl::DOUBLE_MAT4x2 => DMatrix4x2,
        gl::DOUBLE_MAT4x3 => DMatrix4x3,
        gl::DOUBLE_MAT4 => DMatrix4x4,

        gl::INT => Int1,
        gl::INT_VEC2 => Int2,
        gl::INT_VEC3 => Int3,
        gl::INT_VEC4 => Int4,

        gl::UNSIGNED_INT | gl::UNSIGNED_INT_ATOMIC_COUNTER => Uint1,
        gl::UNSIGNED_INT_VEC2 => Uint2,
        gl::UNSIGNED_INT_VEC3 => Uint3,
        gl::UNSIGNED_INT_VEC4 => Uint4,

        gl::BOOL => Bool1,
        gl::BOOL_VEC2 => Bool2,
        gl::BOOL_VEC3 => Bool3,
        gl::BOOL_VEC4 => Bool4,

        gl::SAMPLER_1D
        | gl::SAMPLER_1D_ARRAY
        | gl::INT_SAMPLER_1D
        | gl::INT_SAMPLER_1D_ARRAY
        | gl::UNSIGNED_INT_SAMPLER_1D
        | gl::UNSIGNED_INT_SAMPLER_1D_ARRAY
        | gl::SAMPLER_BUFFER
        | gl::INT_SAMPLER_BUFFER
        | gl::UNSIGNED_INT_SAMPLER_BUFFER
        | gl::IMAGE_1D
        | gl::INT_IMAGE_1D
        | gl::UNSIGNED_INT_IMAGE_1D
        | gl::IMAGE_BUFFER
        | gl::INT_IMAGE_BUFFER
        | gl::UNSIGNED_INT_IMAGE_BUFFER => Sampler1D,

        gl::SAMPLER_2D
        | gl::INT_SAMPLER_2D
        | gl::UNSIGNED_INT_SAMPLER_2D
        | gl::SAMPLER_2D_RECT
        | gl::INT_SAMPLER_2D_RECT
        | gl::UNSIGNED_INT_SAMPLER_2D_RECT
        | gl::SAMPLER_2D_MULTISAMPLE
        | gl::INT_SAMPLER_2D_MULTISAMPLE
        | gl::UNSIGNED_INT_SAMPLER_2D_MULTISAMPLE
        | gl::IMAGE_2D
        | gl::INT_IMAGE_2D
        | gl::UNSIGNED_INT_IMAGE_2D
        | gl::IMAGE_2D_RECT
        | gl::INT_IMAGE_2D_RECT
        | gl::UNSIGNED_INT_IMAGE_2D_RECT => Sampler2D,

        gl::SAMPLER_2D_ARRAY
        | gl::INT_SAMPLER_2D_ARRAY
        | gl::UNSIGNED_INT_SAMPLER_2D_ARRAY
        | gl::SAMPLER_2D_MULTISAMPLE_ARRAY
        | gl::INT_SAMPLER_2D_MULTISAMPLE_ARRAY
        | gl::UNSIGNED_INT_SAMPLER_2D_MULTISAMPLE_ARRAY
        | gl::IMAGE_2D_ARRAY
        | gl::INT_IMAGE_2D_ARRAY
        | gl::UNSIGNED_INT_IMAGE_2D_ARRAY => Sampler2DArray,

        gl::SAMPLER_3D
        | gl::INT_SAMPLER_3D
        | gl::UNSIGNED_INT_SAMPLER_3D
        | gl::IMAGE_3D
        | gl::INT_IMAGE_3D
        | gl::UNSIGNED_INT_IMAGE_3D => Sampler3D,

        gl::SAMPLER_CUBE
        | gl::INT_SAMPLER_CUBE
        | gl::UNSIGNED_INT_SAMPLER_CUBE
        | gl::SAMPLER_CUBE_MAP_ARRAY
        | gl::INT_SAMPLER_CUBE_MAP_ARRAY
        | gl::UNSIGNED_INT_SAMPLER_CUBE_MAP_ARRAY
        | gl::IMAGE_CUBE
        | gl::INT_IMAGE_CUBE
        | gl::UNSIGNED_INT_IMAGE_CUBE => SamplerCube,

        gl::SAMPLER_1D_SHADOW | gl::SAMPLER_1D_ARRAY_SHADOW => Sampler1DShadow,

        gl::SAMPLER_2D_SHADOW
        | gl::SAMPLER_2D_ARRAY_SHADOW
        | gl::SAMPLER_2D_RECT_SHADOW
        | gl::SAMPLER_CUBE_SHADOW
        | gl::SAMPLER_CUBE_MAP_ARRAY_SHADOW => Sampler2DShadow,

        _ => return None,
    })
}
