use crate::sanitize::sanitize_for_display;
use std::io::Write;

/// Installs the process logger. `RUST_LOG` still wins over the `debug` flag.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}",
                record.level(),
                sanitize_for_display(&record.args().to_string())
            )
        })
        .try_init();
}
