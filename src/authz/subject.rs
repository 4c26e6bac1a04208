//! Subject handling at the edge of the engine.
//!
//! Token *verification* happens upstream at the gateway; by the time a
//! request reaches this service the bearer credential is trusted. What
//! remains here is claim extraction (decoding the JWT payload segment
//! without verification) and user-type detection against the configured
//! type list, so `/authz/profile` can resolve the caller's own subject.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authz::errors::AuthzError;
use crate::authz::types::{ClaimValue, ClaimsMap, SubjectContext};

/// One configured subject kind. Detection walks the configured types in
/// priority order (lower number = higher priority) and picks the first whose
/// entitlement claim the token carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTypeConfig {
    pub user_type: String,
    pub display_name: String,
    pub priority: u32,
    pub entitlement_claim: String,
}

/// Reject ambiguous user-type configuration at startup.
pub fn validate(configs: &[UserTypeConfig]) -> miette::Result<()> {
    if configs.is_empty() {
        miette::bail!("user_types: at least one user type must be configured");
    }
    for (i, a) in configs.iter().enumerate() {
        if a.entitlement_claim.trim().is_empty() {
            miette::bail!(
                "user_types: type `{}` has an empty entitlement claim",
                a.user_type
            );
        }
        for b in &configs[i + 1..] {
            if a.user_type == b.user_type {
                miette::bail!("user_types: duplicate type `{}`", a.user_type);
            }
            if a.priority == b.priority {
                miette::bail!(
                    "user_types: `{}` and `{}` share priority {}",
                    a.user_type,
                    b.user_type,
                    a.priority
                );
            }
        }
    }
    Ok(())
}

/// Pick the highest-priority configured type whose entitlement claim appears
/// in the claims map.
pub fn detect<'a>(claims: &ClaimsMap, configs: &'a [UserTypeConfig]) -> Option<&'a UserTypeConfig> {
    let mut ordered: Vec<&UserTypeConfig> = configs.iter().collect();
    ordered.sort_by_key(|c| c.priority);
    ordered
        .into_iter()
        .find(|c| claims.contains_key(&c.entitlement_claim))
}

/// Resolve a bearer token into a subject context: decode the claims, detect
/// the user type, and take the subject id from the `sub` claim.
pub fn subject_from_bearer(
    token: &str,
    configs: &[UserTypeConfig],
) -> Result<SubjectContext, AuthzError> {
    let claims = decode_unverified_claims(token)?;
    let config = detect(&claims, configs).ok_or_else(|| {
        AuthzError::InvalidRequest("no configured user type matches the token's claims".into())
    })?;
    let subject_id = claims
        .get("sub")
        .and_then(|v| v.values().first().map(|s| s.to_string()))
        .unwrap_or_default();
    Ok(SubjectContext {
        subject_id,
        user_type: config.user_type.clone(),
        claims,
    })
}

/// Decode the payload segment of a compact JWT into a flat claims map,
/// without signature verification.
pub fn decode_unverified_claims(token: &str) -> Result<ClaimsMap, AuthzError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(header), Some(payload)) if !header.is_empty() && !payload.is_empty() => payload,
        _ => {
            return Err(AuthzError::InvalidRequest(
                "malformed bearer token (expected a compact JWT)".into(),
            ));
        }
    };

    let bytes = Base64UrlUnpadded::decode_vec(payload).map_err(|_| {
        AuthzError::InvalidRequest("bearer token payload is not valid base64url".into())
    })?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|_| {
        AuthzError::InvalidRequest("bearer token payload is not valid JSON".into())
    })?;
    let Value::Object(map) = value else {
        return Err(AuthzError::InvalidRequest(
            "bearer token payload must be a JSON object".into(),
        ));
    };

    let mut claims = ClaimsMap::new();
    for (key, val) in map {
        match val {
            Value::String(s) => {
                claims.insert(key, ClaimValue::One(s));
            }
            Value::Array(items) => {
                let values: std::collections::BTreeSet<String> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect();
                if !values.is_empty() {
                    claims.insert(key, ClaimValue::Many(values));
                }
            }
            Value::Number(n) => {
                claims.insert(key, ClaimValue::One(n.to_string()));
            }
            Value::Bool(b) => {
                claims.insert(key, ClaimValue::One(b.to_string()));
            }
            // Nested objects and nulls carry no entitlement data.
            _ => {}
        }
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn configs() -> Vec<UserTypeConfig> {
        vec![
            UserTypeConfig {
                user_type: "user".into(),
                display_name: "Human User".into(),
                priority: 1,
                entitlement_claim: "groups".into(),
            },
            UserTypeConfig {
                user_type: "service_account".into(),
                display_name: "Service Account".into(),
                priority: 2,
                entitlement_claim: "service_account".into(),
            },
        ]
    }

    fn token_with(payload: Value) -> String {
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"none"}"#);
        let body = Base64UrlUnpadded::encode_string(payload.to_string().as_bytes());
        format!("{header}.{body}.sig")
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut dup_type = configs();
        dup_type[1].user_type = "user".into();
        assert!(validate(&dup_type).is_err());

        let mut dup_priority = configs();
        dup_priority[1].priority = 1;
        assert!(validate(&dup_priority).is_err());

        let mut empty_claim = configs();
        empty_claim[0].entitlement_claim = "".into();
        assert!(validate(&empty_claim).is_err());

        assert!(validate(&[]).is_err());
        assert!(validate(&configs()).is_ok());
    }

    #[test]
    fn test_detect_honors_priority() {
        // Both claims present: the lower priority number wins.
        let claims =
            decode_unverified_claims(&token_with(json!({
                "groups": ["devs"],
                "service_account": "builder"
            })))
            .unwrap();
        let cfgs = configs();
        let detected = detect(&claims, &cfgs).unwrap();
        assert_eq!(detected.user_type, "user");

        let sa_claims =
            decode_unverified_claims(&token_with(json!({ "service_account": "builder" })))
                .unwrap();
        let cfgs = configs();
        let detected = detect(&sa_claims, &cfgs).unwrap();
        assert_eq!(detected.user_type, "service_account");
    }

    #[test]
    fn test_subject_from_bearer() {
        let token = token_with(json!({
            "sub": "alice",
            "groups": ["acme-devs", "acme-ops"],
            "iat": 1700000000
        }));
        let subject = subject_from_bearer(&token, &configs()).unwrap();
        assert_eq!(subject.subject_id, "alice");
        assert_eq!(subject.user_type, "user");
        assert!(subject.claims.get("groups").unwrap().contains("acme-devs"));
        // Numeric claims flatten to strings.
        assert!(subject.claims.get("iat").unwrap().contains("1700000000"));
    }

    #[test]
    fn test_subject_without_matching_type() {
        let token = token_with(json!({ "sub": "nobody" }));
        assert!(matches!(
            subject_from_bearer(&token, &configs()),
            Err(AuthzError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        for bad in ["", "justonechunk", ".", "a.!!!not-base64!!!.c"] {
            assert!(
                matches!(
                    decode_unverified_claims(bad),
                    Err(AuthzError::InvalidRequest(_))
                ),
                "token {bad:?} should be rejected"
            );
        }
    }
}
