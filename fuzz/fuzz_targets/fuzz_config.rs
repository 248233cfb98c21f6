#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use turnstile::{Config, FixedClock, Policy};

fuzz_target!(|data: &[u8]| {
    let input = match std::str::from_utf8(data) {
        Ok(s) => s,
        Err(_) => return,
    };

    // A config that validates must also compile into a policy
    if let Ok(config) = Config::parse(input) {
        Policy::from_config(&config, Arc::new(FixedClock(12)))
            .expect("validated config failed to compile");
    }
});
