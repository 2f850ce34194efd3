//! Opaque driver object names.
//!
//! These are plain integer names as handed out by the driver. Zero is never a
//! valid name for any of them.

use std::fmt;

macro_rules! driver_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

driver_handle!(
    /// A compiled shader object.
    ShaderHandle
);
driver_handle!(
    /// A program object (monolithic, or one separable stage).
    ProgramHandle
);
driver_handle!(
    /// A program pipeline object holding separable stage programs.
    PipelineHandle
);
driver_handle!(
    /// A buffer object backing uniform blocks, storage blocks or atomic counters.
    BufferHandle
);
