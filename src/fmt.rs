//! Logging shims.
//!
//! Device builds log through `defmt`, host builds through the `log` facade. With
//! neither feature enabled the arguments are still type-checked but nothing is emitted.
//! Format strings must stay within what both backends accept: `{}` and `{:?}`.
#![macro_use]
#![allow(unused_macros, reason = "not every level is used by every feature set")]

macro_rules! log_shim {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::$level!($s $(, $x)*);
            #[cfg(all(feature = "log", not(feature = "defmt")))]
            ::log::$level!($s $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "log")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! trace {
    ($($arg:tt)*) => { log_shim!(trace, $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { log_shim!(debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { log_shim!(info, $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { log_shim!(warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { log_shim!(error, $($arg)*) };
}
