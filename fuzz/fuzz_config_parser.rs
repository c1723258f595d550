//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Any config that parses must render back to TOML that parses again.

#![no_main]

use libfuzzer_sys::fuzz_target;
use otpdec_config::AppConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = AppConfig::parse(s) {
        let rendered = config.to_toml().expect("valid config must render");
        assert!(AppConfig::parse(&rendered).is_ok(), "re-parse failed:\n{rendered}");
    }
});
