//! Role assumption collaborator
//!
//! `RoleAssumer` is the boundary to the provider's STS service. The session
//! manager and account registry only talk to this trait; `AwsCliAssumer`
//! implements it by shelling out to the `aws` CLI with explicit caller
//! credentials in the child environment.

use super::mfa;
use super::types::{
    account_from_arn, role_name_from_arn, AssumeRoleOptions, IdentityError, RoleValidation,
};
use crate::cloud::{AuthMethod, CloudProvider, Credentials};
use crate::resilience::OperationContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Issues temporary credentials for a role
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    /// Assume `role_arn`. With `caller` set, the call is authenticated with
    /// those credentials instead of the ambient identity.
    async fn assume_role(
        &self,
        ctx: &OperationContext,
        role_arn: &str,
        options: &AssumeRoleOptions,
        caller: Option<&Credentials>,
    ) -> Result<Credentials, IdentityError>;

    /// Check whether `role_arn` could be assumed, without issuing a session
    async fn validate_role(
        &self,
        ctx: &OperationContext,
        role_arn: &str,
        caller: Option<&Credentials>,
    ) -> Result<RoleValidation, IdentityError>;
}

/// `aws sts assume-role` output
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleOutput {
    credentials: StsCredentials,
    assumed_role_user: Option<AssumedRoleUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumedRoleUser {
    assumed_role_id: String,
    arn: String,
}

/// `aws iam get-role` output
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetRoleOutput {
    role: IamRole,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IamRole {
    #[serde(default)]
    assume_role_policy_document: serde_json::Value,
    #[serde(default)]
    max_session_duration: Option<u32>,
}

/// Role assumption through the `aws` command line tool
#[derive(Debug, Clone)]
pub struct AwsCliAssumer {
    program: String,
    default_region: Option<String>,
}

impl Default for AwsCliAssumer {
    fn default() -> Self {
        Self {
            program: "aws".to_string(),
            default_region: None,
        }
    }
}

impl AwsCliAssumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different executable (a wrapper script, a pinned path)
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = Some(region.into());
        self
    }

    fn assume_role_args(&self, role_arn: &str, options: &AssumeRoleOptions) -> Vec<String> {
        let mut args = vec![
            "sts".to_string(),
            "assume-role".to_string(),
            "--role-arn".to_string(),
            role_arn.to_string(),
            "--role-session-name".to_string(),
            options.session_name.clone(),
            "--duration-seconds".to_string(),
            options.duration_seconds.to_string(),
        ];
        if let Some(external_id) = &options.external_id {
            args.push("--external-id".to_string());
            args.push(external_id.clone());
        }
        if let (Some(serial), Some(code)) = (&options.mfa_serial_number, &options.mfa_token_code) {
            args.push("--serial-number".to_string());
            args.push(serial.clone());
            args.push("--token-code".to_string());
            args.push(code.clone());
        }
        if let Some(policy) = &options.policy {
            args.push("--policy".to_string());
            args.push(policy.clone());
        }
        if !options.policy_arns.is_empty() {
            args.push("--policy-arns".to_string());
            for arn in &options.policy_arns {
                args.push(format!("arn={}", arn));
            }
        }
        if let Some(region) = options.region.as_ref().or(self.default_region.as_ref()) {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        args.push("--output".to_string());
        args.push("json".to_string());
        args
    }

    /// Run the CLI, authenticated as `caller` when given
    async fn run(
        &self,
        ctx: &OperationContext,
        args: &[String],
        caller: Option<&Credentials>,
    ) -> Result<Output, IdentityError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).kill_on_drop(true);
        if let Some(creds) = caller {
            cmd.env_remove("AWS_PROFILE")
                .env("AWS_ACCESS_KEY_ID", &creds.access_key)
                .env("AWS_SECRET_ACCESS_KEY", &creds.secret_key);
            if creds.token.is_empty() {
                cmd.env_remove("AWS_SESSION_TOKEN");
            } else {
                cmd.env("AWS_SESSION_TOKEN", &creds.token);
            }
        }

        debug!(program = %self.program, command = ?args.get(..2), "Invoking cloud CLI");
        tokio::select! {
            _ = ctx.cancelled() => Err(IdentityError::Cancelled),
            output = cmd.output() => output.map_err(|e| {
                IdentityError::Provider(format!("failed to execute {}: {}", self.program, e))
            }),
        }
    }
}

/// Map a failed `sts assume-role` to the most specific error
fn classify_failure(role_arn: &str, stderr: &str) -> IdentityError {
    if stderr.contains("MultiFactorAuthentication") || stderr.contains("MFA") {
        IdentityError::MfaRequired {
            role_arn: role_arn.to_string(),
        }
    } else if stderr.contains("ExternalId") || stderr.contains("external ID") {
        IdentityError::ExternalIdRequired {
            role_arn: role_arn.to_string(),
        }
    } else {
        IdentityError::AssumeRoleFailed {
            role_arn: role_arn.to_string(),
            message: stderr.trim().to_string(),
        }
    }
}

/// Convert STS output into credentials tagged with the assumed identity
fn parse_assume_role_output(
    stdout: &[u8],
    role_arn: &str,
    options: &AssumeRoleOptions,
) -> Result<Credentials, IdentityError> {
    let output: AssumeRoleOutput = serde_json::from_slice(stdout).map_err(|e| {
        IdentityError::Provider(format!("failed to parse assume-role output: {}", e))
    })?;

    let mut creds = Credentials::new(CloudProvider::Aws, AuthMethod::IamRole)
        .keys(output.credentials.access_key_id, output.credentials.secret_access_key)
        .token(output.credentials.session_token)
        .expires_at(output.credentials.expiration)
        .property("role_arn", role_arn)
        .property("session_name", options.session_name.clone());
    if let Some(account) = account_from_arn(role_arn) {
        creds.account = account.to_string();
    }
    if let Some(region) = &options.region {
        creds.region = region.clone();
    }
    if let Some(user) = output.assumed_role_user {
        creds = creds
            .property("assumed_role_id", user.assumed_role_id)
            .property("assumed_role_arn", user.arn);
    }
    Ok(creds)
}

#[async_trait]
impl RoleAssumer for AwsCliAssumer {
    async fn assume_role(
        &self,
        ctx: &OperationContext,
        role_arn: &str,
        options: &AssumeRoleOptions,
        caller: Option<&Credentials>,
    ) -> Result<Credentials, IdentityError> {
        let args = self.assume_role_args(role_arn, options);
        let output = self.run(ctx, &args, caller).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(role_arn = %role_arn, status = %output.status, "Assume role failed");
            return Err(classify_failure(role_arn, &stderr));
        }

        let creds = parse_assume_role_output(&output.stdout, role_arn, options)?;
        info!(
            role_arn = %role_arn,
            session_name = %options.session_name,
            expires_at = ?creds.expiry,
            "Assumed role"
        );
        Ok(creds)
    }

    async fn validate_role(
        &self,
        ctx: &OperationContext,
        role_arn: &str,
        caller: Option<&Credentials>,
    ) -> Result<RoleValidation, IdentityError> {
        let role_name = role_name_from_arn(role_arn)
            .ok_or_else(|| IdentityError::InvalidArn(role_arn.to_string()))?;
        let args = vec![
            "iam".to_string(),
            "get-role".to_string(),
            "--role-name".to_string(),
            role_name.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = self.run(ctx, &args, caller).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(RoleValidation::denied(
                role_arn,
                format!("cannot read role: {}", stderr.trim()),
            ));
        }

        let parsed: GetRoleOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| IdentityError::Provider(format!("failed to parse get-role output: {}", e)))?;

        let mut validation = RoleValidation::assumable(role_arn);
        validation.max_session_duration = parsed.role.max_session_duration;
        match mfa::trust_requirements(&parsed.role.assume_role_policy_document) {
            Ok(requirements) => {
                validation.mfa_required = requirements.mfa_required;
                validation.external_id_required = requirements.external_id_required;
            }
            Err(e) => {
                validation.trust_policy_valid = false;
                validation.can_assume = false;
                validation.message = Some(e.to_string());
            }
        }
        Ok(validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROLE: &str = "arn:aws:iam::123456789012:role/Deploy";

    #[test]
    fn test_args_include_optional_flags() {
        let assumer = AwsCliAssumer::new().default_region("us-east-1");
        let options = AssumeRoleOptions::default()
            .session_name("ci")
            .external_id("partner-42")
            .mfa("arn:aws:iam::123456789012:mfa/alice", "123456")
            .policy_arn("arn:aws:iam::aws:policy/ReadOnlyAccess");
        let args = assumer.assume_role_args(ROLE, &options);

        let joined = args.join(" ");
        assert!(joined.starts_with("sts assume-role --role-arn"));
        assert!(joined.contains("--role-session-name ci"));
        assert!(joined.contains("--duration-seconds 3600"));
        assert!(joined.contains("--external-id partner-42"));
        assert!(joined.contains("--token-code 123456"));
        assert!(joined.contains("--policy-arns arn=arn:aws:iam::aws:policy/ReadOnlyAccess"));
        assert!(joined.contains("--region us-east-1"));
    }

    #[test]
    fn test_parse_output() {
        let stdout = br#"{
            "Credentials": {
                "AccessKeyId": "ASIAEXAMPLE",
                "SecretAccessKey": "secret",
                "SessionToken": "token",
                "Expiration": "2030-01-01T00:00:00+00:00"
            },
            "AssumedRoleUser": {
                "AssumedRoleId": "AROAEXAMPLE:ci",
                "Arn": "arn:aws:sts::123456789012:assumed-role/Deploy/ci"
            }
        }"#;
        let options = AssumeRoleOptions::default().session_name("ci");
        let creds = parse_assume_role_output(stdout, ROLE, &options).unwrap();

        assert_eq!(creds.access_key, "ASIAEXAMPLE");
        assert_eq!(creds.token, "token");
        assert_eq!(creds.account, "123456789012");
        assert_eq!(creds.auth_method, AuthMethod::IamRole);
        assert_eq!(creds.properties["role_arn"], ROLE);
        assert_eq!(creds.properties["assumed_role_id"], "AROAEXAMPLE:ci");
        assert!(creds.expiry.is_some());
    }

    #[test]
    fn test_parse_garbage_fails() {
        let options = AssumeRoleOptions::default();
        assert!(parse_assume_role_output(b"not json", ROLE, &options).is_err());
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure(ROLE, "An error occurred (AccessDenied): MultiFactorAuthentication failed"),
            IdentityError::MfaRequired { .. }
        ));
        assert!(matches!(
            classify_failure(ROLE, "AccessDenied: not authorized"),
            IdentityError::AssumeRoleFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_provider_error() {
        let assumer = AwsCliAssumer::new().program("/nonexistent/lornu-aws-cli");
        let err = assumer
            .assume_role(&OperationContext::new(), ROLE, &AssumeRoleOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Provider(_)));
    }
}
