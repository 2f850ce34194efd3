//! Buffer-backed blocks and atomic counters.
//!
//! Block binding points are assigned per block name, once per context, so a
//! shared buffer stays bound at the same point whichever program uses it.
//! Buffers themselves belong to the parameter store; a block whose shared
//! parameters have no buffer yet is skipped.

use std::borrow::Cow;

use glink_core::{bytes::slice_as_bytes, ConstantDefinition, ProgramParameters, StageKind, Storage, Variability};
use glink_driver::{BlockKind, BlockMember, BufferTarget, Driver};
use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use crate::program::LinkedProgram;

/// Context-wide binding points for named blocks, one namespace per kind.
#[derive(Debug, Default)]
pub struct BlockBindings {
    assigned: FxHashMap<(BlockKind, String), u32>,
    next: [u32; 2],
}

impl BlockBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// The binding point for `name`, assigning the next free one on first use.
    pub fn binding_for(&mut self, kind: BlockKind, name: &str) -> u32 {
        if let Some(binding) = self.assigned.get(&(kind, name.to_owned())) {
            return *binding;
        }
        let next = &mut self.next[kind_index(kind)];
        let binding = *next;
        *next += 1;
        self.assigned.insert((kind, name.to_owned()), binding);
        trace!(?kind, name, binding, "assigned block binding");
        binding
    }

    pub fn get(&self, kind: BlockKind, name: &str) -> Option<u32> {
        self.assigned.get(&(kind, name.to_owned())).copied()
    }

    pub fn clear(&mut self) {
        self.assigned.clear();
        self.next = [0; 2];
    }
}

fn kind_index(kind: BlockKind) -> usize {
    match kind {
        BlockKind::Uniform => 0,
        BlockKind::Storage => 1,
    }
}

/// `Block.member[0]` → `member`, `Block.light.color` → `light.color`.
fn member_key<'a>(block: &str, name: &'a str) -> &'a str {
    let member = name
        .strip_prefix(block)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(name);
    member.strip_suffix("[0]").unwrap_or(member)
}

/// Spread tightly packed member `bytes` over the reflected array and matrix
/// strides. Padding between elements and columns is written as zeros.
fn laid_out<'a>(member: &BlockMember, def: &ConstantDefinition, bytes: &'a [u8]) -> Cow<'a, [u8]> {
    let scalar = if def.const_type.storage() == Storage::Double { 8 } else { 4 };
    let element = def.element_size * scalar;
    let (columns, column) = match def.const_type.matrix_dims() {
        Some((cols, rows)) if member.matrix_stride > 0 => (cols as usize, rows as usize * scalar),
        _ => (1, element),
    };
    let column_stride = if columns > 1 { member.matrix_stride as usize } else { column };
    let element_stride = match member.array_stride as usize {
        0 => columns * column_stride,
        stride => stride,
    };
    if element == 0 || (column_stride == column && element_stride == element) {
        return Cow::Borrowed(bytes);
    }

    let elements = bytes.len() / element;
    if elements == 0 {
        return Cow::Borrowed(bytes);
    }
    let mut out = vec![0u8; (elements - 1) * element_stride + (columns - 1) * column_stride + column];
    for (e, values) in bytes.chunks_exact(element).enumerate() {
        for (c, values) in values.chunks_exact(column).enumerate() {
            let at = e * element_stride + c * column_stride;
            out[at..at + column].copy_from_slice(values);
        }
    }
    Cow::Owned(out)
}

/// Write dirty members of `stage`'s blocks into their shared buffers.
///
/// Only byte ranges of dirty members are written. The shared parameters'
/// dirty flags are cleared only when every write succeeded.
pub fn update_uniform_blocks(
    driver: &mut dyn Driver,
    program: &LinkedProgram,
    params: &ProgramParameters,
    mask: Variability,
    stage: StageKind,
) {
    for block in program.blocks().iter().filter(|b| b.stages.contains(stage)) {
        let Some(shared) = params.shared_named(&block.name) else {
            continue;
        };
        let mut shared = shared.borrow_mut();
        if !shared.variability().intersects(mask) {
            continue;
        }
        let Some(buffer) = shared.buffer() else {
            trace!(block = %block.name, "block has no backing buffer yet");
            continue;
        };

        let target = BufferTarget::from(block.kind);
        driver.bind_buffer_base(target, block.binding, buffer);
        if !shared.is_dirty() {
            continue;
        }

        let mut written = true;
        for member in &block.members {
            let key = member_key(&block.name, &member.name);
            let (Some(def), Some(bytes)) = (shared.constants().get(key), shared.dirty_member_bytes(key)) else {
                continue;
            };
            let bytes = laid_out(member, def, bytes);
            if let Err(err) = driver.buffer_sub_data(target, buffer, member.offset as usize, &bytes) {
                warn!(block = %block.name, member = %member.name, "{err:#}");
                written = false;
            }
        }
        if written {
            shared.clear_dirty();
        }
    }
}

/// Write counter values for `stage` into the buffers bound at their bindings.
pub fn update_atomic_counters(
    driver: &mut dyn Driver,
    program: &LinkedProgram,
    params: &ProgramParameters,
    mask: Variability,
    stage: StageKind,
) {
    for counter in program.atomic_counters().iter().filter(|c| c.stage == stage) {
        if !params.variability(&counter.def).intersects(mask) {
            continue;
        }
        let Some(buffer) = params.counter_buffer(counter.binding) else {
            trace!(counter = %counter.name, binding = counter.binding, "no counter buffer bound");
            continue;
        };
        let values = match params.data::<u32>(counter.def.physical_index, counter.def.len()) {
            Ok(values) => values,
            Err(err) => {
                warn!(counter = %counter.name, %err, "skipping atomic counter");
                continue;
            }
        };

        driver.bind_buffer_base(BufferTarget::AtomicCounter, counter.binding, buffer);
        if let Err(err) = driver.buffer_sub_data(
            BufferTarget::AtomicCounter,
            buffer,
            counter.offset as usize,
            slice_as_bytes(values),
        ) {
            warn!(counter = %counter.name, "{err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use glink_core::ConstantType;

    use super::*;

    #[test]
    fn bindings_are_stable_per_name_and_kind() {
        let mut bindings = BlockBindings::new();
        assert_eq!(bindings.binding_for(BlockKind::Uniform, "Frame"), 0);
        assert_eq!(bindings.binding_for(BlockKind::Uniform, "Lights"), 1);
        assert_eq!(bindings.binding_for(BlockKind::Storage, "Particles"), 0);
        assert_eq!(bindings.binding_for(BlockKind::Uniform, "Frame"), 0);
        assert_eq!(bindings.get(BlockKind::Storage, "Frame"), None);
    }

    #[test]
    fn member_names_drop_block_prefix() {
        assert_eq!(member_key("Frame", "Frame.color"), "color");
        assert_eq!(member_key("Frame", "weights[0]"), "weights");
        assert_eq!(member_key("Lights", "Lights.colors[0]"), "colors");
        assert_eq!(member_key("Lights", "Lights.key.color"), "key.color");
        assert_eq!(member_key("Lights", "Lights.fill.color"), "fill.color");
    }

    #[test]
    fn tight_members_are_written_as_is() {
        let mut constants = glink_core::NamedConstants::new();
        let def = constants.add("color", ConstantType::Float4, 1).clone();
        let member = BlockMember { name: "color".into(), offset: 0, array_stride: 0, matrix_stride: 0 };
        let bytes = [7u8; 16];
        assert!(matches!(laid_out(&member, &def, &bytes), Cow::Borrowed(_)));
    }

    #[test]
    fn matrix_columns_are_padded() {
        let mut constants = glink_core::NamedConstants::new();
        let def = constants.add("basis", ConstantType::Matrix3x3, 1).clone();
        let member = BlockMember { name: "basis".into(), offset: 0, array_stride: 0, matrix_stride: 16 };
        let values: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let out = laid_out(&member, &def, slice_as_bytes(&values));
        let floats: Vec<f32> = out
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(floats, vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0, 7.0, 8.0, 9.0]);
    }
}
