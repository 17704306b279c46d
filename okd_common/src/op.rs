/// Implements the standard arithmetic operator traits for single-field tuple structs.
///
/// `op!(binary Kobo, Add, add)` expands to an `Add` implementation that delegates to the inner
/// value. `inplace` and `unary` cover the `*Assign` and `Neg` families respectively.
#[macro_export]
macro_rules! op {
    (binary $t:ty, $trt:ident, $mth:ident) => {
        impl std::ops::$trt for $t {
            type Output = Self;

            fn $mth(self, rhs: Self) -> Self::Output {
                Self(std::ops::$trt::$mth(self.0, rhs.0))
            }
        }
    };
    (inplace $t:ty, $trt:ident, $mth:ident) => {
        impl std::ops::$trt for $t {
            fn $mth(&mut self, rhs: Self) {
                std::ops::$trt::$mth(&mut self.0, rhs.0)
            }
        }
    };
    (unary $t:ty, $trt:ident, $mth:ident) => {
        impl std::ops::$trt for $t {
            type Output = Self;

            fn $mth(self) -> Self::Output {
                Self(std::ops::$trt::$mth(self.0))
            }
        }
    };
}
