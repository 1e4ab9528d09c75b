//! Skill Executor (C4): dispatches a parsed invocation against the registry,
//! either forwarding sandbox code verbatim or synthesizing a call template
//! from a manifest's `client_class`/`default_method`.

use std::time::{Duration, Instant};

use crate::invocation::Invocation;
use crate::sandbox::{SandboxError, SandboxGateway, SandboxRequest};
use crate::skills::RegistrySnapshot;

/// Name of the manifest that accepts raw sandbox code verbatim, bypassing
/// call-template synthesis.
pub const SANDBOX_SKILL_NAME: &str = "sandbox";

/// The result of dispatching one invocation. Always populated with both a
/// primary text summary and the raw payload — no exception ever escapes to
/// the engine; failures are returned as observations like any other result.
#[derive(Debug, Clone)]
pub struct Observation {
    pub success: bool,
    pub text: String,
    pub raw: serde_json::Value,
    pub duration: Duration,
}

impl Observation {
    fn not_found(skill_name: &str) -> Self {
        Self {
            success: false,
            text: format!("skill '{skill_name}' not found"),
            raw: serde_json::json!({ "error": "not_found", "skill_name": skill_name }),
            duration: Duration::ZERO,
        }
    }

    fn not_executable(skill_name: &str) -> Self {
        Self {
            success: false,
            text: format!("skill '{skill_name}' is not executable"),
            raw: serde_json::json!({ "error": "not_executable", "skill_name": skill_name }),
            duration: Duration::ZERO,
        }
    }

    fn timeout(duration: Duration) -> Self {
        Self {
            success: false,
            text: "timeout".to_string(),
            raw: serde_json::json!({ "error": "timeout" }),
            duration,
        }
    }

    fn transport_error(err: &SandboxError, duration: Duration) -> Self {
        Self {
            success: false,
            text: format!("sandbox transport error: {err}"),
            raw: serde_json::json!({ "error": "transport", "message": err.to_string() }),
            duration,
        }
    }
}

/// Per-call limits the engine may impose on a single invocation.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorLimits {
    pub timeout: Duration,
}

impl Default for ExecutorLimits {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30) }
    }
}

pub struct SkillExecutor {
    gateway: SandboxGateway,
}

impl SkillExecutor {
    pub fn new(gateway: SandboxGateway) -> Self {
        Self { gateway }
    }

    /// Dispatch one invocation against the given registry snapshot.
    pub async fn execute(
        &self,
        snapshot: &RegistrySnapshot,
        invocation: &Invocation,
        limits: ExecutorLimits,
    ) -> Observation {
        let manifest = match snapshot.get(&invocation.skill_name) {
            Some(m) => m,
            None => return Observation::not_found(&invocation.skill_name),
        };
        if !manifest.executable {
            return Observation::not_executable(&invocation.skill_name);
        }

        let code = if invocation.skill_name == SANDBOX_SKILL_NAME {
            invocation.code.clone()
        } else {
            synthesize_call(
                manifest.client_class.as_deref(),
                manifest.default_method.as_deref(),
                &invocation.code,
            )
        };

        let request = SandboxRequest {
            language: "python".to_string(),
            code,
            trusted_mode: true,
            timeout_ms: limits.timeout.as_millis() as u64,
        };

        let started = Instant::now();
        match self.gateway.execute(request).await {
            Ok(response) => {
                let duration = Duration::from_millis(response.duration_ms);
                let text = if response.success {
                    response.stdout.clone()
                } else {
                    response.stderr.clone()
                };
                Observation {
                    success: response.success,
                    text,
                    raw: serde_json::json!({
                        "stdout": response.stdout,
                        "stderr": response.stderr,
                        "exit_code": response.exit_code,
                    }),
                    duration,
                }
            }
            Err(SandboxError::Timeout(deadline)) => Observation::timeout(deadline),
            Err(ref err) => Observation::transport_error(err, started.elapsed()),
        }
    }
}

/// Build the small code body that imports the skill's client and calls its
/// default method with the invocation's supplied arguments.
fn synthesize_call(client_class: Option<&str>, default_method: Option<&str>, args: &str) -> String {
    let client_class = client_class.unwrap_or("Client");
    let default_method = default_method.unwrap_or("run");
    format!(
        "from skill_client import {client_class}\nclient = {client_class}()\nresult = client.{default_method}({args})\nprint(result)\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::Invocation;
    use crate::skills::manifest::parse_manifest;

    fn snapshot_with(manifests: &[&str]) -> RegistrySnapshot {
        let tmp = tempfile::tempdir().unwrap();
        for (i, content) in manifests.iter().enumerate() {
            let dir = tmp.path().join(format!("skill{i}"));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(crate::skills::MANIFEST_FILENAME), content).unwrap();
        }
        crate::skills::registry::build(tmp.path()).unwrap()
    }

    #[tokio::test]
    async fn unknown_skill_returns_not_found_without_touching_sandbox() {
        let snapshot = snapshot_with(&[]);
        let executor = SkillExecutor::new(SandboxGateway::new("http://127.0.0.1:1"));
        let invocation = Invocation { skill_name: "mystery".to_string(), code: String::new() };
        let obs = executor
            .execute(&snapshot, &invocation, ExecutorLimits::default())
            .await;
        assert!(!obs.success);
        assert!(obs.text.contains("not found"));
    }

    #[tokio::test]
    async fn non_executable_skill_returns_error_observation() {
        let snapshot = snapshot_with(&[
            "---\nname: docs_only\ndescription: Docs.\nexecutable: false\n---\n",
        ]);
        let executor = SkillExecutor::new(SandboxGateway::new("http://127.0.0.1:1"));
        let invocation = Invocation { skill_name: "docs_only".to_string(), code: String::new() };
        let obs = executor
            .execute(&snapshot, &invocation, ExecutorLimits::default())
            .await;
        assert!(!obs.success);
        assert!(obs.text.contains("not executable"));
    }

    #[test]
    fn synthesizes_client_class_and_method_call() {
        let code = synthesize_call(Some("FinanceClient"), Some("lookup"), "\"AAPL\"");
        assert!(code.contains("FinanceClient"));
        assert!(code.contains("client.lookup(\"AAPL\")"));
    }

    #[test]
    fn manifest_parses_for_fixture_helper() {
        let m = parse_manifest("---\nname: x\ndescription: y\n---\n").unwrap();
        assert_eq!(m.name, "x");
    }
}
