//! Macros for building and returning [`crate::error::LoadError`]s.

/// Creates a [`crate::error::LoadError`] from an error kind, a static
/// description and optionally a dynamic detail.
#[macro_export]
macro_rules! load_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::LoadError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::LoadError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with a [`crate::error::LoadError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::load_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::load_error!($kind, $desc, $detail))
    };
}
