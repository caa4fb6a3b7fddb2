//! MFA and trust-policy checks
//!
//! Local validation of MFA token codes and device serials, and inspection
//! of IAM trust policies for MFA and external-ID conditions.

use super::types::IdentityError;
use serde::Serialize;
use serde_json::Value;

/// Kind of MFA device, inferred from its serial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaDeviceType {
    Virtual,
    Hardware,
}

impl std::fmt::Display for MfaDeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MfaDeviceType::Virtual => write!(f, "virtual"),
            MfaDeviceType::Hardware => write!(f, "hardware"),
        }
    }
}

pub fn device_type(serial_number: &str) -> MfaDeviceType {
    if serial_number.contains(":mfa/") {
        MfaDeviceType::Virtual
    } else {
        MfaDeviceType::Hardware
    }
}

/// MFA token codes are exactly six ASCII digits
pub fn validate_token(token: &str) -> Result<(), IdentityError> {
    if token.len() != 6 {
        return Err(IdentityError::InvalidMfaToken(
            "MFA token must be 6 digits".to_string(),
        ));
    }
    if !token.chars().all(|c| c.is_ascii_digit()) {
        return Err(IdentityError::InvalidMfaToken(
            "MFA token must contain only digits".to_string(),
        ));
    }
    Ok(())
}

/// Accepts virtual device ARNs and hardware serials
pub fn validate_serial(serial_number: &str) -> Result<(), IdentityError> {
    let serial = serial_number.trim();
    if serial.is_empty() {
        return Err(IdentityError::InvalidMfaDevice(
            "MFA device serial cannot be empty".to_string(),
        ));
    }
    match device_type(serial) {
        MfaDeviceType::Virtual => {
            if !serial.starts_with("arn:aws:iam::") {
                return Err(IdentityError::InvalidMfaDevice(format!(
                    "virtual MFA device must be an IAM ARN: {}",
                    serial
                )));
            }
        }
        MfaDeviceType::Hardware => {
            if serial.len() < 9 || !serial.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(IdentityError::InvalidMfaDevice(format!(
                    "hardware MFA serial must be alphanumeric: {}",
                    serial
                )));
            }
        }
    }
    Ok(())
}

/// Conditions found in a role's trust policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrustRequirements {
    pub mfa_required: bool,
    pub external_id_required: bool,
}

/// Scan a trust policy's Allow statements for MFA and external-ID
/// conditions. Accepts the policy as a JSON string or an already decoded
/// document.
pub fn trust_requirements(policy: &Value) -> Result<TrustRequirements, IdentityError> {
    let document = match policy {
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .map_err(|e| IdentityError::Provider(format!("failed to parse trust policy: {}", e)))?,
        other => other.clone(),
    };

    let statements = match document.get("Statement") {
        Some(Value::Array(items)) => items.clone(),
        Some(single @ Value::Object(_)) => vec![single.clone()],
        _ => {
            return Err(IdentityError::Provider(
                "trust policy has no Statement".to_string(),
            ))
        }
    };

    let mut requirements = TrustRequirements::default();
    for statement in statements {
        if statement.get("Effect").and_then(Value::as_str) != Some("Allow") {
            continue;
        }
        let Some(Value::Object(conditions)) = statement.get("Condition") else {
            continue;
        };
        for operator in conditions.values() {
            let Value::Object(keys) = operator else {
                continue;
            };
            if let Some(value) = keys.get("aws:MultiFactorAuthPresent") {
                let present = match value {
                    Value::Bool(b) => *b,
                    Value::String(s) => s.eq_ignore_ascii_case("true"),
                    _ => false,
                };
                requirements.mfa_required |= present;
            }
            if keys.contains_key("aws:MultiFactorAuthAge") {
                requirements.mfa_required = true;
            }
            if keys.contains_key("sts:ExternalId") {
                requirements.external_id_required = true;
            }
        }
    }
    Ok(requirements)
}
