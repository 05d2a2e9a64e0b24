//! Host and path validation shared by the admission pipeline.

/// Validate a route path.
///
/// Rules:
/// - Must start with "/"
/// - Must not be empty
/// - Must not have trailing slash (except root "/")
/// - Must not have double slashes
pub fn validate_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("Path cannot be empty".to_string());
    }

    if !path.starts_with('/') {
        return Err(format!("Path '{}' must start with '/'", path));
    }

    if path.contains("//") {
        return Err(format!("Path '{}' cannot contain double slashes", path));
    }

    if path.len() > 1 && path.ends_with('/') {
        return Err(format!("Path '{}' cannot have trailing slash", path));
    }

    Ok(())
}

/// Validate a hostname according to DNS-1123 subdomain rules.
///
/// Rules:
/// - Lowercase alphanumeric characters, hyphens, and dots only
/// - Labels must not start or end with a hyphen
/// - Must not have double dots
/// - Can start with wildcard "*."
/// - Max length 253 characters
pub fn validate_hostname(hostname: &str) -> Result<(), String> {
    if hostname.is_empty() {
        return Err("Hostname cannot be empty".to_string());
    }

    if hostname.len() > 253 {
        return Err(format!("Hostname '{}' exceeds 253 characters", hostname));
    }

    let hostname_to_check = hostname.strip_prefix("*.").unwrap_or(hostname);

    if hostname_to_check.is_empty() {
        return Err("Hostname cannot be just '*.'".to_string());
    }

    if hostname_to_check.contains("..") {
        return Err(format!("Hostname '{}' cannot contain '..'", hostname));
    }

    for label in hostname_to_check.split('.') {
        if label.is_empty() {
            continue;
        }

        if label.starts_with('-') {
            return Err(format!("Hostname label '{}' cannot start with '-'", label));
        }
        if label.ends_with('-') {
            return Err(format!("Hostname label '{}' cannot end with '-'", label));
        }

        for c in label.chars() {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(format!(
                    "Hostname '{}' contains invalid character '{}' (must be lowercase alphanumeric or hyphen)",
                    hostname, c
                ));
            }
        }
    }

    Ok(())
}

/// The domain of a host: everything after the first label.
///
/// `api.apps.example.com` yields `apps.example.com`; a single-label host has
/// no domain. This is the subdomain a `Subdomain`-wildcard route claims.
pub fn hostname_domain(hostname: &str) -> Option<&str> {
    let idx = hostname.find('.')?;
    let domain = &hostname[idx + 1..];
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}
