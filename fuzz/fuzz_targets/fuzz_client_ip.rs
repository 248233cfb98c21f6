#![no_main]

use libfuzzer_sys::fuzz_target;
use turnstile::filter::client_ip::{first_hop, resolve, ForwardedForTrust};

fuzz_target!(|data: &[u8]| {
    let split = data.iter().position(|&b| b == 0);
    let (header_bytes, remote_bytes) = match split {
        Some(pos) => (&data[..pos], &data[pos + 1..]),
        None => (data, &[] as &[u8]),
    };
    let (Ok(header), Ok(remote)) = (
        std::str::from_utf8(header_bytes),
        std::str::from_utf8(remote_bytes),
    ) else {
        return;
    };

    if let Some(hop) = first_hop(header) {
        assert!(hop.parse::<std::net::IpAddr>().is_ok());
        assert_eq!(resolve(Some(header), remote, ForwardedForTrust::FirstHop), hop);
    }
    let ip = resolve(Some(header), remote, ForwardedForTrust::Ignore);
    assert!(ip.is_empty() || ip.parse::<std::net::IpAddr>().is_ok());
});
