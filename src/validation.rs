//! Small predicates used when validating configuration.
use std::net::IpAddr;
use std::ops::RangeInclusive;

/// Validates if a given u16 value is a usable port number.
/// By type, the port is already within the 0-65535 range.
/// This function checks that the port is not 0, which would let the OS pick one.
///
/// # Returns
///
/// * `Ok(())` if the port is valid.
/// * `Err(&'static str)` if the port is invalid.
pub fn is_valid_port(port: u16) -> Result<(), &'static str> {
    if port > 0 {
        Ok(())
    } else {
        Err("Port number must be greater than 0")
    }
}

/// Validates that a string is an IP address or a plausible host name.
///
/// Host names are checked for shape only (labels of letters, digits and hyphens);
/// whether they resolve is only known when the sockets are bound.
pub fn is_valid_host(host: &str) -> Result<(), &'static str> {
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if host.is_empty() || host.len() > 253 {
        return Err("Host name must be 1-253 characters");
    }
    let label_ok = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if host.split('.').all(label_ok) {
        Ok(())
    } else {
        Err("Invalid host name")
    }
}

/// Validates if a given value is within a specified numeric range.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports() {
        assert!(is_valid_port(5002).is_ok());
        assert!(is_valid_port(0).is_err());
    }

    #[test]
    fn hosts() {
        assert!(is_valid_host("127.0.0.1").is_ok());
        assert!(is_valid_host("::1").is_ok());
        assert!(is_valid_host("vme-crate.lab").is_ok());
        assert!(is_valid_host("").is_err());
        assert!(is_valid_host("bad host").is_err());
        assert!(is_valid_host("-leading.dash").is_err());
    }

    #[test]
    fn ranges() {
        assert!(is_in_range(5, 1..=10).is_ok());
        assert!(is_in_range(0, 1..=10).is_err());
    }
}
