//! Logging goes to stderr: in host mode stdout carries native-messaging
//! frames and must never see a stray line.

use log::LevelFilter;

const ENV_FILTER: &str = "RUST_LOG";

/// Install the global logger. The filter admits debug records for this
/// crate; the runtime ceiling is then driven by the `debug` setting through
/// [`apply_debug_flag`]. When `RUST_LOG` is set it decides both.
pub fn init() {
    let mut builder = env_logger::Builder::new();
    builder
        .target(env_logger::Target::Stderr)
        .filter_level(LevelFilter::Warn)
        .filter_module("browsersec", LevelFilter::Debug)
        .parse_env(ENV_FILTER);
    if let Err(e) = builder.try_init() {
        eprintln!("logger already initialised: {}", e);
    }
    apply_debug_flag(false);
}

/// Cap verbosity from the `debug` setting. No-op while `RUST_LOG` is set.
pub fn apply_debug_flag(debug: bool) {
    if let Some(level) = ceiling(debug, env_filter_set()) {
        log::set_max_level(level);
    }
}

fn env_filter_set() -> bool {
    std::env::var_os(ENV_FILTER).is_some_and(|v| !v.is_empty())
}

fn ceiling(debug: bool, env_filter: bool) -> Option<LevelFilter> {
    if env_filter {
        return None;
    }
    Some(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_controls_verbosity() {
        assert_eq!(ceiling(true, false), Some(LevelFilter::Debug));
        assert_eq!(ceiling(false, false), Some(LevelFilter::Info));
    }

    #[test]
    fn env_filter_is_not_capped() {
        assert_eq!(ceiling(false, true), None);
        assert_eq!(ceiling(true, true), None);
    }
}
