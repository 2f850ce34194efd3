//! Variability masks select which constants an update batch touches.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// How often a constant's value changes, used as a dirty mask when pushing
/// parameters to a program.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variability(u16);

impl Variability {
    pub const NONE: Variability = Variability(0);
    /// No variation except by manual setting.
    pub const GLOBAL: Variability = Variability(1);
    /// Varies per object.
    pub const PER_OBJECT: Variability = Variability(2);
    /// Varies with light setup.
    pub const LIGHTS: Variability = Variability(4);
    /// Varies with pass iteration number.
    pub const PASS_ITERATION_NUMBER: Variability = Variability(8);
    pub const ALL: Variability = Variability(0xFFFF);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn intersects(self, other: Variability) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for Variability {
    fn default() -> Self {
        Variability::GLOBAL
    }
}

impl BitOr for Variability {
    type Output = Variability;

    fn bitor(self, rhs: Variability) -> Variability {
        Variability(self.0 | rhs.0)
    }
}

impl BitOrAssign for Variability {
    fn bitor_assign(&mut self, rhs: Variability) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Variability {
    type Output = Variability;

    fn bitand(self, rhs: Variability) -> Variability {
        Variability(self.0 & rhs.0)
    }
}

impl fmt::Debug for Variability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Variability, &str); 4] = [
            (Variability::GLOBAL, "GLOBAL"),
            (Variability::PER_OBJECT, "PER_OBJECT"),
            (Variability::LIGHTS, "LIGHTS"),
            (Variability::PASS_ITERATION_NUMBER, "PASS_ITERATION_NUMBER"),
        ];
        if *self == Variability::ALL {
            return f.write_str("ALL");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.intersects(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            write!(f, "{:#x}", self.0)?;
        }
        Ok(())
    }
}
