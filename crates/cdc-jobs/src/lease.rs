//! Distributed lease identity (§4.8): each process picks a stable
//! `instanceId` once at startup and uses it for every `tryAcquire`/`renew`/
//! `release` call for the lifetime of the process.

use rand::Rng;
use std::process;

/// `"{host}-{pid}-{8 random hex}"`. The random suffix disambiguates two
/// processes on the same host sharing a pid across container restarts.
pub fn instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let pid = process::id();
    let suffix = random_hex(8);
    format!("{host}-{pid}-{suffix}")
}

fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_has_three_dash_separated_parts_with_an_8_char_suffix() {
        let id = instance_id();
        let parts: Vec<&str> = id.rsplitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert!(parts[0].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn instance_id_is_not_deterministic_across_calls() {
        assert_ne!(instance_id(), instance_id());
    }
}
