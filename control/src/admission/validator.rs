//! Extended structural validation of route specs.

use super::{Stage, Verdict, REASON_INVALID_CONFIGURATION};
use crate::state::RouterState;
use common::validate::{validate_hostname, validate_path};
use common::{Route, TlsConfig, TlsTermination};

/// Rejects structurally invalid routes before any ownership bookkeeping
/// happens: malformed hosts and paths, contradictory TLS configuration, and
/// empty backend lists.
pub struct ExtendedValidator;

impl Stage for ExtendedValidator {
    fn name(&self) -> &'static str {
        "extended-validation"
    }

    fn evaluate(&self, route: &Route, _state: &mut RouterState, prior: Verdict) -> Verdict {
        if let Err(message) = validate_route(route) {
            return Verdict::rejected(REASON_INVALID_CONFIGURATION, message);
        }
        prior
    }
}

fn validate_route(route: &Route) -> Result<(), String> {
    if route.spec.to.is_empty() {
        return Err("Route must reference at least one backend service".to_string());
    }

    for target in &route.spec.to {
        if target.name.is_empty() {
            return Err("Backend service name cannot be empty".to_string());
        }
        if !(0..=256).contains(&target.weight) {
            return Err(format!(
                "Backend weight {} for service '{}' must be between 0 and 256",
                target.weight, target.name
            ));
        }
    }

    // An empty host is legal; a deterministic one is synthesized later.
    if !route.spec.host.is_empty() {
        validate_hostname(&route.spec.host)?;
    }

    if let Some(path) = route.spec.path.as_deref() {
        validate_path(path)?;
    }

    if let Some(tls) = &route.spec.tls {
        validate_tls(tls, route.spec.path.as_deref())?;
    }

    Ok(())
}

fn validate_tls(tls: &TlsConfig, path: Option<&str>) -> Result<(), String> {
    match tls.termination {
        Some(TlsTermination::Passthrough) => {
            // Passthrough traffic is opaque to the router, so neither paths
            // nor certificate material can apply.
            if path.is_some() {
                return Err("Passthrough termination is incompatible with paths".to_string());
            }
            if tls.has_edge_material() {
                return Err(
                    "Passthrough termination cannot carry certificate material".to_string(),
                );
            }
            if tls
                .destination_ca_certificate
                .as_deref()
                .is_some_and(|s| !s.is_empty())
            {
                return Err(
                    "Passthrough termination cannot carry a destination CA certificate"
                        .to_string(),
                );
            }
        }
        Some(TlsTermination::Edge) => {
            if tls
                .destination_ca_certificate
                .as_deref()
                .is_some_and(|s| !s.is_empty())
            {
                return Err(
                    "Edge termination cannot carry a destination CA certificate".to_string(),
                );
            }
            validate_cert_pair(tls)?;
        }
        Some(TlsTermination::Reencrypt) => {
            validate_cert_pair(tls)?;
        }
        None => {
            if tls.has_edge_material()
                || tls
                    .destination_ca_certificate
                    .as_deref()
                    .is_some_and(|s| !s.is_empty())
            {
                return Err(
                    "TLS certificate material requires a termination type".to_string(),
                );
            }
        }
    }

    Ok(())
}

fn validate_cert_pair(tls: &TlsConfig) -> Result<(), String> {
    let has_cert = tls.certificate.as_deref().is_some_and(|s| !s.is_empty());
    let has_key = tls.key.as_deref().is_some_and(|s| !s.is_empty());

    match (has_cert, has_key) {
        (true, false) => Err("TLS certificate provided without a key".to_string()),
        (false, true) => Err("TLS key provided without a certificate".to_string()),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use common::{RouteSpec, RouteTargetRef};

    fn route_with(spec: RouteSpec) -> Route {
        let mut route = Route::new("frontend", spec);
        route.metadata.namespace = Some("web".to_string());
        route
    }

    fn backend() -> Vec<RouteTargetRef> {
        vec![RouteTargetRef {
            name: "frontend-svc".to_string(),
            weight: 100,
        }]
    }

    fn evaluate(route: &Route) -> Verdict {
        let mut state = RouterState::new();
        ExtendedValidator.evaluate(route, &mut state, Verdict::admitted(&route.spec.host))
    }

    #[test]
    fn test_valid_route_passes_through() {
        let route = route_with(RouteSpec {
            host: "app.example.com".to_string(),
            path: Some("/api".to_string()),
            to: backend(),
            ..Default::default()
        });

        assert!(evaluate(&route).is_admitted());
    }

    #[test]
    fn test_route_without_backends_rejected() {
        let route = route_with(RouteSpec {
            host: "app.example.com".to_string(),
            ..Default::default()
        });

        let verdict = evaluate(&route);
        assert!(matches!(
            verdict,
            Verdict::Rejected { ref reason, .. } if reason == REASON_INVALID_CONFIGURATION
        ));
    }

    #[test]
    fn test_invalid_host_rejected() {
        let route = route_with(RouteSpec {
            host: "Bad_Host!.example.com".to_string(),
            to: backend(),
            ..Default::default()
        });

        assert!(!evaluate(&route).is_admitted());
    }

    #[test]
    fn test_empty_host_allowed() {
        let route = route_with(RouteSpec {
            to: backend(),
            ..Default::default()
        });

        assert!(evaluate(&route).is_admitted());
    }

    #[test]
    fn test_passthrough_with_path_rejected() {
        let route = route_with(RouteSpec {
            host: "secure.example.com".to_string(),
            path: Some("/api".to_string()),
            to: backend(),
            tls: Some(TlsConfig {
                termination: Some(TlsTermination::Passthrough),
                ..Default::default()
            }),
            ..Default::default()
        });

        let verdict = evaluate(&route);
        match verdict {
            Verdict::Rejected { reason, message } => {
                assert_eq!(reason, REASON_INVALID_CONFIGURATION);
                assert!(message.contains("path"), "message: {}", message);
            }
            Verdict::Admitted { .. } => panic!("passthrough with path must be rejected"),
        }
    }

    #[test]
    fn test_passthrough_with_certificate_rejected() {
        let route = route_with(RouteSpec {
            host: "secure.example.com".to_string(),
            to: backend(),
            tls: Some(TlsConfig {
                termination: Some(TlsTermination::Passthrough),
                certificate: Some("cert".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });

        assert!(!evaluate(&route).is_admitted());
    }

    #[test]
    fn test_edge_with_destination_ca_rejected() {
        let route = route_with(RouteSpec {
            host: "secure.example.com".to_string(),
            to: backend(),
            tls: Some(TlsConfig {
                termination: Some(TlsTermination::Edge),
                destination_ca_certificate: Some("ca".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });

        assert!(!evaluate(&route).is_admitted());
    }

    #[test]
    fn test_cert_without_key_rejected() {
        let route = route_with(RouteSpec {
            host: "secure.example.com".to_string(),
            to: backend(),
            tls: Some(TlsConfig {
                termination: Some(TlsTermination::Edge),
                certificate: Some("cert".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });

        assert!(!evaluate(&route).is_admitted());
    }

    #[test]
    fn test_reencrypt_with_destination_ca_allowed() {
        let route = route_with(RouteSpec {
            host: "secure.example.com".to_string(),
            to: backend(),
            tls: Some(TlsConfig {
                termination: Some(TlsTermination::Reencrypt),
                destination_ca_certificate: Some("ca".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });

        assert!(evaluate(&route).is_admitted());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let route = route_with(RouteSpec {
            host: "app.example.com".to_string(),
            to: vec![RouteTargetRef {
                name: "frontend-svc".to_string(),
                weight: -1,
            }],
            ..Default::default()
        });

        assert!(!evaluate(&route).is_admitted());
    }
}
