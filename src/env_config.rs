/// Centralized environment-variable parsing helpers.
///
/// Every `CROP_CAPTURE_*` feature toggle and tuning knob is read through
/// these helpers so the truthy/number parsing lives in exactly one place
/// and each value is computed once per process.

/// Returns `true` when the environment variable is set to a truthy value
/// (`1`, `true`, `yes`, or `on`, case-insensitive, trimmed).
#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| {
            let normalized = raw.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
        })
        .unwrap_or(false)
}

/// Parses the environment variable as a `u64`, returning `Some` only for a
/// valid positive (> 0) integer.
#[inline]
pub(crate) fn env_var_positive_u64(var_name: &str) -> Option<u64> {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}

/// Declares a `OnceLock`-cached configuration value.
///
/// `enabled_unless(fn_name, "ENV_VAR")` declares a feature that is on by
/// default and disabled when the env var is truthy.
///
/// `ms_with_default(fn_name, "ENV_VAR", default)` declares a millisecond
/// knob that falls back to `default` unless the env var holds a positive
/// integer.
macro_rules! define_env_knob {
    (enabled_unless($fn_name:ident, $var:expr)) => {
        #[inline]
        pub(crate) fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| !$crate::env_config::env_var_truthy($var))
        }
    };
    (ms_with_default($fn_name:ident, $var:expr, $default:expr)) => {
        #[inline]
        pub(crate) fn $fn_name() -> u64 {
            static VALUE: ::std::sync::OnceLock<u64> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| {
                $crate::env_config::env_var_positive_u64($var).unwrap_or($default)
            })
        }
    };
}

pub(crate) use define_env_knob;
