//! Diagnostics: routes through `log` by default, or through `defmt` when
//! the `defmt` feature is enabled, for links where `log`'s string
//! formatting is too heavy.
#[cfg(not(feature = "defmt"))]
macro_rules! diag_error {
    ($($arg:tt)*) => { log::error!($($arg)*) };
}

#[cfg(feature = "defmt")]
macro_rules! diag_error {
    ($($arg:tt)*) => { defmt::error!($($arg)*) };
}

pub(crate) use diag_error;
