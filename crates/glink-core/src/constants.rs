//! Constant types, definitions and named-constant tables.
//!
//! A [`NamedConstants`] table is what a stage's source declares: every
//! uniform name with its type, array length and the physical slot its value
//! occupies in a [`ProgramParameters`](crate::ProgramParameters) store.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use tracing::trace;

/// Scalar family of a [`ConstantType`], encoded in its high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum BaseType {
    Float = 0x00,
    Int = 0x10,
    Double = 0x20,
    Uint = 0x30,
    Bool = 0x40,
    Sampler = 0x50,
}

/// Host-side buffer a constant's value lives in.
///
/// Bools are stored as `u32` and samplers as `i32` texture-unit indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Storage {
    Float,
    Double,
    Int,
    Uint,
}

impl Storage {
    pub const COUNT: usize = 4;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Type tag of a single constant.
///
/// The discriminant is `base type | arity`, so the base type is recovered by
/// masking off the low nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ConstantType {
    Float1 = 0x01,
    Float2 = 0x02,
    Float3 = 0x03,
    Float4 = 0x04,
    /// Column-count by row-count, as in the GLSL `matCxR` name.
    Matrix2x2 = 0x05,
    Matrix2x3 = 0x06,
    Matrix2x4 = 0x07,
    Matrix3x2 = 0x08,
    Matrix3x3 = 0x09,
    Matrix3x4 = 0x0A,
    Matrix4x2 = 0x0B,
    Matrix4x3 = 0x0C,
    Matrix4x4 = 0x0D,

    Int1 = 0x11,
    Int2 = 0x12,
    Int3 = 0x13,
    Int4 = 0x14,

    Double1 = 0x21,
    Double2 = 0x22,
    Double3 = 0x23,
    Double4 = 0x24,
    DMatrix2x2 = 0x25,
    DMatrix2x3 = 0x26,
    DMatrix2x4 = 0x27,
    DMatrix3x2 = 0x28,
    DMatrix3x3 = 0x29,
    DMatrix3x4 = 0x2A,
    DMatrix4x2 = 0x2B,
    DMatrix4x3 = 0x2C,
    DMatrix4x4 = 0x2D,

    Uint1 = 0x31,
    Uint2 = 0x32,
    Uint3 = 0x33,
    Uint4 = 0x34,

    Bool1 = 0x41,
    Bool2 = 0x42,
    Bool3 = 0x43,
    Bool4 = 0x44,

    Sampler1D = 0x51,
    Sampler2D = 0x52,
    Sampler3D = 0x53,
    SamplerCube = 0x54,
    Sampler1DShadow = 0x55,
    Sampler2DShadow = 0x56,
    Sampler2DArray = 0x57,
}

impl ConstantType {
    pub fn base_type(self) -> BaseType {
        // Every discriminant's high nibble is a `BaseType`.
        BaseType::from_u32(self as u32 & 0xF0).unwrap_or(BaseType::Float)
    }

    pub fn storage(self) -> Storage {
        match self.base_type() {
            BaseType::Float => Storage::Float,
            BaseType::Double => Storage::Double,
            BaseType::Int | BaseType::Sampler => Storage::Int,
            BaseType::Uint | BaseType::Bool => Storage::Uint,
        }
    }

    pub fn is_sampler(self) -> bool {
        self.base_type() == BaseType::Sampler
    }

    /// `(columns, rows)` for matrix types.
    pub fn matrix_dims(self) -> Option<(u8, u8)> {
        let low = self as u32 & 0x0F;
        match self.base_type() {
            BaseType::Float | BaseType::Double if low >= 5 => {
                let n = (low - 5) as u8;
                Some((2 + n / 3, 2 + n % 3))
            }
            _ => None,
        }
    }

    pub fn is_matrix(self) -> bool {
        self.matrix_dims().is_some()
    }

    /// Scalar components in one element (one array entry).
    pub fn element_size(self) -> usize {
        if let Some((cols, rows)) = self.matrix_dims() {
            return cols as usize * rows as usize;
        }
        if self.is_sampler() {
            return 1;
        }
        (self as u32 & 0x0F) as usize
    }

    /// Look up a GLSL type name such as `vec3`, `mat4x3` or `usampler2D`.
    pub fn from_glsl(name: &str) -> Option<ConstantType> {
        GLSL_TYPES.get(name).copied()
    }
}

static GLSL_TYPES: Lazy<FxHashMap<&'static str, ConstantType>> = Lazy::new(|| {
    use ConstantType::*;

    let mut map = FxHashMap::default();
    let mut add = |names: &[&'static str], ty: ConstantType| {
        for name in names {
            map.insert(*name, ty);
        }
    };

    add(&["float"], Float1);
    add(&["vec2"], Float2);
    add(&["vec3"], Float3);
    add(&["vec4"], Float4);
    add(&["mat2", "mat2x2"], Matrix2x2);
    add(&["mat2x3"], Matrix2x3);
    add(&["mat2x4"], Matrix2x4);
    add(&["mat3x2"], Matrix3x2);
    add(&["mat3", "mat3x3"], Matrix3x3);
    add(&["mat3x4"], Matrix3x4);
    add(&["mat4x2"], Matrix4x2);
    add(&["mat4x3"], Matrix4x3);
    add(&["mat4", "mat4x4"], Matrix4x4);

    add(&["int"], Int1);
    add(&["ivec2"], Int2);
    add(&["ivec3"], Int3);
    add(&["ivec4"], Int4);

    add(&["double"], Double1);
    add(&["dvec2"], Double2);
    add(&["dvec3"], Double3);
    add(&["dvec4"], Double4);
    add(&["dmat2", "dmat2x2"], DMatrix2x2);
    add(&["dmat2x3"], DMatrix2x3);
    add(&["dmat2x4"], DMatrix2x4);
    add(&["dmat3x2"], DMatrix3x2);
    add(&["dmat3", "dmat3x3"], DMatrix3x3);
    add(&["dmat3x4"], DMatrix3x4);
    add(&["dmat4x2"], DMatrix4x2);
    add(&["dmat4x3"], DMatrix4x3);
    add(&["dmat4", "dmat4x4"], DMatrix4x4);

    add(&["uint", "atomic_uint"], Uint1);
    add(&["uvec2"], Uint2);
    add(&["uvec3"], Uint3);
    add(&["uvec4"], Uint4);

    add(&["bool"], Bool1);
    add(&["bvec2"], Bool2);
    add(&["bvec3"], Bool3);
    add(&["bvec4"], Bool4);

    add(
        &[
            "sampler1D",
            "isampler1D",
            "usampler1D",
            "sampler1DArray",
            "isampler1DArray",
            "usampler1DArray",
            "samplerBuffer",
            "isamplerBuffer",
            "usamplerBuffer",
            "image1D",
            "iimage1D",
            "uimage1D",
            "imageBuffer",
            "iimageBuffer",
            "uimageBuffer",
        ],
        Sampler1D,
    );
    add(
        &[
            "sampler2D",
            "isampler2D",
            "usampler2D",
            "sampler2DRect",
            "isampler2DRect",
            "usampler2DRect",
            "sampler2DMS",
            "isampler2DMS",
            "usampler2DMS",
            "samplerExternalOES",
            "image2D",
            "iimage2D",
            "uimage2D",
            "image2DRect",
            "iimage2DRect",
            "uimage2DRect",
        ],
        Sampler2D,
    );
    add(
        &[
            "sampler2DArray",
            "isampler2DArray",
            "usampler2DArray",
            "sampler2DMSArray",
            "isampler2DMSArray",
            "usampler2DMSArray",
            "image2DArray",
            "iimage2DArray",
            "uimage2DArray",
        ],
        Sampler2DArray,
    );
    add(
        &["sampler3D", "isampler3D", "usampler3D", "image3D", "iimage3D", "uimage3D"],
        Sampler3D,
    );
    add(
        &[
            "samplerCube",
            "isamplerCube",
            "usamplerCube",
            "samplerCubeArray",
            "isamplerCubeArray",
            "usamplerCubeArray",
            "imageCube",
            "iimageCube",
            "uimageCube",
        ],
        SamplerCube,
    );
    add(&["sampler1DShadow", "sampler1DArrayShadow"], Sampler1DShadow);
    add(
        &[
            "sampler2DShadow",
            "sampler2DArrayShadow",
            "sampler2DRectShadow",
            "samplerCubeShadow",
            "samplerCubeArrayShadow",
        ],
        Sampler2DShadow,
    );

    map
});

/// Where one named constant lives and what it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantDefinition {
    pub const_type: ConstantType,
    /// Element offset into the buffer selected by `const_type.storage()`.
    pub physical_index: usize,
    /// Scalar components per array element.
    pub element_size: usize,
    pub array_size: usize,
    /// Declaration order within the owning table.
    pub slot: usize,
}

impl ConstantDefinition {
    /// Total scalar components covered by this constant.
    pub fn len(&self) -> usize {
        self.element_size * self.array_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named constants declared by one stage (or one shared block), with a
/// tightly packed physical layout per [`Storage`].
#[derive(Debug, Clone, Default)]
pub struct NamedConstants {
    entries: Vec<(String, ConstantDefinition)>,
    by_name: FxHashMap<String, usize>,
    buffer_sizes: [usize; Storage::COUNT],
    blocks: Vec<String>,
}

impl NamedConstants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a constant and allocate its physical slot.
    ///
    /// Redeclaring a name keeps the first definition.
    pub fn add(&mut self, name: &str, const_type: ConstantType, array_size: usize) -> &ConstantDefinition {
        if let Some(&existing) = self.by_name.get(name) {
            trace!(name, "constant already declared, keeping first definition");
            return &self.entries[existing].1;
        }

        let storage = const_type.storage();
        let element_size = const_type.element_size();
        let array_size = array_size.max(1);
        let def = ConstantDefinition {
            const_type,
            physical_index: self.buffer_sizes[storage.index()],
            element_size,
            array_size,
            slot: self.entries.len(),
        };
        self.buffer_sizes[storage.index()] += element_size * array_size;

        self.by_name.insert(name.to_owned(), self.entries.len());
        self.entries.push((name.to_owned(), def));
        &self.entries[self.entries.len() - 1].1
    }

    pub fn get(&self, name: &str) -> Option<&ConstantDefinition> {
        self.by_name.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConstantDefinition)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of elements the given host buffer needs.
    pub fn buffer_len(&self, storage: Storage) -> usize {
        self.buffer_sizes[storage.index()]
    }

    /// Record a uniform or storage block declared by the source.
    pub fn declare_block(&mut self, name: &str) {
        if !self.declares_block(name) {
            self.blocks.push(name.to_owned());
        }
    }

    pub fn declares_block(&self, name: &str) -> bool {
        self.blocks.iter().any(|b| b == name)
    }

    pub fn blocks(&self) -> &[String] {
        &self.blocks
    }
}
