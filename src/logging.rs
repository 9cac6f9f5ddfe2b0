use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber for the binaries.
///
/// `RUST_LOG` overrides the default `servotrack=info,servo_test=info`; `LOG_FORMAT=json`
/// switches to one JSON object per line.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("servotrack=info,servo_test=info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if use_json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}
