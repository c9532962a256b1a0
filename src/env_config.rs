//! Environment-variable knobs for render backend selection.
//!
//! Every env-var read goes through these helpers so truthy parsing lives in
//! one place.

pub(crate) const DISABLE_ACCELERATED_VAR: &str = "SNOW_RENDER_DISABLE_ACCELERATED";
pub(crate) const MODE_OVERRIDE_VAR: &str = "SNOW_RENDER_MODE";

/// Returns `true` when the environment variable is set to a truthy value
/// (`1`, `true`, `yes`, or `on`, case-insensitive, trimmed).
#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| is_truthy(&raw))
        .unwrap_or(false)
}

pub(crate) fn is_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

/// Trimmed, lower-cased value of the variable; `None` when unset or blank.
pub(crate) fn env_var_normalized(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|raw| raw.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
}

/// Declares a cached boolean flag backed by a `OnceLock<bool>`.
///
/// `enabled_unless(fn_name, "ENV_VAR")` returns `true` unless the env var is
/// truthy.
macro_rules! define_env_flag {
    (enabled_unless($fn_name:ident, $var:expr)) => {
        #[inline]
        pub(crate) fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| !$crate::env_config::env_var_truthy($var))
        }
    };
}

define_env_flag!(enabled_unless(accelerated_allowed, DISABLE_ACCELERATED_VAR));
