//! Version metadata embedded by `build.rs`.

/// Short git commit hash, suffixed `-dirty` for uncommitted builds.
pub const GIT_HASH: &str = env!("OTPDEC_GIT_HASH");

/// `debug` or `release`.
pub const BUILD_PROFILE: &str = env!("OTPDEC_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `"0.1.0 (abc1234, release)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}
