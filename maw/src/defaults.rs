use std::time::Duration;

pub const MAW_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const USER_AGENT: &str = concat!("maw/", env!("CARGO_PKG_VERSION"));

// Paths
pub const MAW_CONFIG_PATH: &str = "/etc/maw/maw.yaml";
pub const MAW_LOG_PATH: &str = "/var/log/maw/maw.log";
pub const SRCDEST_DIR: &str = "/var/cache/maw/src";
pub const BUILDROOT_DIR: &str = "/var/cache/maw/build";
pub const PKGDEST_DIR: &str = "/var/cache/maw/pkg";
pub const PACMAN_PATH: &str = "/usr/bin/pacman";

/// Suffix of cached source bundles, `<pkgname>.src.tar.gz`.
pub const SOURCE_BUNDLE_SUFFIX: &str = ".src.tar.gz";
pub const AUR_URL_TEMPLATE: &str = "https://aur.archlinux.org/cgit/aur.git/snapshot/{name}.tar.gz";
pub const AUR_URL_PLACEHOLDER: &str = "{name}";

// Build
pub const BUILD_SHELL: &str = "/bin/bash";
pub const MAKEPKG: &str = "makepkg";
pub const MAKEPKG_ARGS: [&str; 3] = ["-s", "-m", "-f"];

// Control plane
/// Environment variable carrying the per-run secret to workers. The surrounding spaces are
/// intended: build scripts cannot reference it as a plain shell variable.
pub const SECRET_ENV_VAR: &str = " MAWSECRET ";
/// File descriptor on which workers inherit the write end of the control pipe.
pub const CONTROL_PIPE_FD: i32 = 3;
pub const SECRET_BYTES: usize = 32;
pub const WORKER_PROBE_INTERVAL: Duration = Duration::from_secs(2);

// Env vars
pub const MAW_CONFIG_ENV_VAR_PREFIX: &str = "MAW";
pub const MAW_LOG_ENV_VAR: &str = "MAW_LOG_LEVEL";
pub const SUDO_USER_ENV_VAR: &str = "SUDO_USER";
pub const SUDO_UID_ENV_VAR: &str = "SUDO_UID";
pub const SUDO_GID_ENV_VAR: &str = "SUDO_GID";

// Http
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_HTTP_CONN_TIMEOUT: Duration = Duration::from_secs(10);
