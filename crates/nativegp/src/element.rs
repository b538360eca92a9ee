use std::fmt::Debug;

/// The numeric types samples can be made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// `i32`
    I32,
    /// `i64`
    I64,
}

impl ElementKind {
    /// Size in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 => 8,
        }
    }

    /// Size in bits.
    pub fn bits(self) -> u16 {
        self.size() as u16 * 8
    }

    /// Whether values live in SSE registers when used as scalars.
    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Amount of elements that fit in one SSE register.
    pub fn lanes(self) -> usize {
        VECTOR_BYTES / self.size()
    }
}

/// Width of the vector registers used in vectorized mode.
pub const VECTOR_BYTES: usize = 16;

/// A numeric sample element.
///
/// Sealed: the dispatch engine moves these around with raw machine code, so
/// only plain fixed width numbers are allowed.
pub trait Element: private::Sealed + Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    /// Selects the move instructions and register class used for this type.
    const KIND: ElementKind;

    /// Lossy conversion used for loss calculation.
    fn to_f64(self) -> f64;

    /// Absolute difference, as used by the loss function.
    fn distance(self, expected: Self) -> f64;
}

mod private {
    pub trait Sealed {}
}

macro_rules! float_element {
    ($ty:ty, $kind:ident) => {
        impl private::Sealed for $ty {}

        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$kind;

            #[inline]
            fn to_f64(self) -> f64 {
                f64::from(self)
            }

            #[inline]
            fn distance(self, expected: Self) -> f64 {
                (f64::from(self) - f64::from(expected)).abs()
            }
        }
    };
}

macro_rules! int_element {
    ($ty:ty, $kind:ident) => {
        impl private::Sealed for $ty {}

        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$kind;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn distance(self, expected: Self) -> f64 {
                (i128::from(self) - i128::from(expected)).unsigned_abs() as f64
            }
        }
    };
}

float_element!(f32, F32);
float_element!(f64, F64);
int_element!(i32, I32);
int_element!(i64, I64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_fill_a_vector() {
        assert_eq!(f32::KIND.lanes(), 4);
        assert_eq!(f64::KIND.lanes(), 2);
        assert_eq!(i32::KIND.lanes(), 4);
        assert_eq!(i64::KIND.lanes(), 2);
    }

    #[test]
    fn integer_difference_does_not_overflow() {
        assert_eq!(i64::MIN.distance(i64::MAX), 2f64.powi(64) - 1.0);
        assert_eq!(3i32.distance(-4), 7.0);
        assert_eq!(2.5f64.distance(4.0), 1.5);
    }
}
