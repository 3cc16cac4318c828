//! Diagnostic reporting for guarded early returns.
//!
//! With the `defmt` feature the messages go out over the firmware's defmt
//! transport; host builds compile the arguments away so tests stay quiet.

#[cfg(feature = "defmt")]
macro_rules! diag_warn {
    ($($arg:tt)*) => {
        defmt::warn!($($arg)*)
    };
}

#[cfg(not(feature = "defmt"))]
macro_rules! diag_warn {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $(
            let _ = &$arg;
        )*
    }};
}

pub(crate) use diag_warn as warn;
