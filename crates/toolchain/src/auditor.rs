//! Static-analysis bridge with a built-in fallback scanner.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::{ToolError, ToolResult};
use crate::process::run_with_timeout;

/// Audit timeout.
const AUDIT_TIMEOUT_SECS: u64 = 120;

/// Severity ladder for findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditSeverity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Severities that veto deployment.
    pub fn blocks_deployment(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// One audit finding.
#[derive(Debug, Clone)]
pub struct AuditFinding {
    pub severity: AuditSeverity,
    pub title: String,
    pub description: String,
}

/// Aggregated audit outcome.
#[derive(Debug, Clone)]
pub struct AuditReport {
    pub severity: AuditSeverity,
    pub findings: Vec<AuditFinding>,
    /// Which backend produced the report.
    pub tool: String,
}

impl AuditReport {
    fn from_findings(findings: Vec<AuditFinding>, tool: &str) -> Self {
        let severity = findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(AuditSeverity::None);
        Self {
            severity,
            findings,
            tool: tool.to_string(),
        }
    }
}

/// Runs static analysis over a contract source.
#[async_trait]
pub trait Auditor: Send + Sync {
    async fn audit(&self, source: &str, project_dir: &Path) -> ToolResult<AuditReport>;
}

#[derive(Debug, Deserialize)]
struct SlitherDetector {
    #[serde(default)]
    impact: String,
    #[serde(default)]
    check: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct SlitherResults {
    #[serde(default)]
    detectors: Vec<SlitherDetector>,
}

#[derive(Debug, Deserialize)]
struct SlitherOutput {
    #[serde(default)]
    results: Option<SlitherResults>,
}

/// Slither-backed auditor, degrading to a pattern scan when slither is not
/// installed.
pub struct SlitherAuditor;

impl SlitherAuditor {
    fn map_impact(impact: &str) -> AuditSeverity {
        match impact.to_lowercase().as_str() {
            "high" => AuditSeverity::High,
            "medium" => AuditSeverity::Medium,
            "low" => AuditSeverity::Low,
            "informational" | "optimization" => AuditSeverity::None,
            _ => AuditSeverity::Low,
        }
    }

    fn parse_slither(stdout: &str) -> ToolResult<Vec<AuditFinding>> {
        let output: SlitherOutput =
            serde_json::from_str(stdout).map_err(|e| ToolError::BadOutput {
                tool: "slither".to_string(),
                reason: e.to_string(),
            })?;

        Ok(output
            .results
            .map(|r| r.detectors)
            .unwrap_or_default()
            .into_iter()
            .map(|d| AuditFinding {
                severity: Self::map_impact(&d.impact),
                title: d.check,
                description: d.description.trim().to_string(),
            })
            .collect())
    }

    /// Built-in scanner for the handful of patterns that matter most when
    /// slither is unavailable.
    fn pattern_scan(source: &str) -> Vec<AuditFinding> {
        let mut findings = Vec::new();
        let lower = source.to_lowercase();

        if lower.contains("tx.origin") {
            findings.push(AuditFinding {
                severity: AuditSeverity::High,
                title: "tx-origin-auth".to_string(),
                description: "tx.origin used for authorization; use msg.sender".to_string(),
            });
        }
        if lower.contains("selfdestruct") {
            findings.push(AuditFinding {
                severity: AuditSeverity::High,
                title: "selfdestruct".to_string(),
                description: "selfdestruct present; contract can be destroyed".to_string(),
            });
        }
        if lower.contains("delegatecall") {
            findings.push(AuditFinding {
                severity: AuditSeverity::High,
                title: "delegatecall".to_string(),
                description: "delegatecall to a possibly attacker-controlled target".to_string(),
            });
        }
        if lower.contains(".call{value") && !lower.contains("reentrancyguard") {
            findings.push(AuditFinding {
                severity: AuditSeverity::Medium,
                title: "unguarded-value-call".to_string(),
                description: "low-level value transfer without a reentrancy guard".to_string(),
            });
        }
        if lower.contains("block.timestamp") {
            findings.push(AuditFinding {
                severity: AuditSeverity::Low,
                title: "timestamp-dependence".to_string(),
                description: "logic depends on block.timestamp".to_string(),
            });
        }

        findings
    }
}

#[async_trait]
impl Auditor for SlitherAuditor {
    async fn audit(&self, source: &str, project_dir: &Path) -> ToolResult<AuditReport> {
        let result = run_with_timeout(
            "slither",
            &[".", "--json", "-"],
            Some(project_dir),
            Duration::from_secs(AUDIT_TIMEOUT_SECS),
        )
        .await;

        match result {
            Ok(output) => {
                // Slither exits non-zero when findings exist; the JSON on
                // stdout is authoritative either way.
                match Self::parse_slither(&output.stdout) {
                    Ok(findings) => {
                        let report = AuditReport::from_findings(findings, "slither");
                        tracing::info!(
                            severity = report.severity.as_str(),
                            findings = report.findings.len(),
                            "Audit completed"
                        );
                        Ok(report)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Slither output unparseable; using pattern scan");
                        Ok(AuditReport::from_findings(
                            Self::pattern_scan(source),
                            "pattern-scan",
                        ))
                    }
                }
            }
            Err(ToolError::NotInstalled { .. }) => {
                tracing::warn!("slither not installed; using built-in pattern scan");
                Ok(AuditReport::from_findings(
                    Self::pattern_scan(source),
                    "pattern-scan",
                ))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_veto() {
        assert!(AuditSeverity::Critical > AuditSeverity::High);
        assert!(AuditSeverity::High.blocks_deployment());
        assert!(AuditSeverity::Critical.blocks_deployment());
        assert!(!AuditSeverity::Medium.blocks_deployment());
        assert!(!AuditSeverity::None.blocks_deployment());
    }

    #[test]
    fn test_pattern_scan_flags_dangerous_constructs() {
        let source = r"
            contract Risky {
                function drain() external {
                    require(tx.origin == owner);
                    selfdestruct(payable(msg.sender));
                }
            }
        ";
        let report = AuditReport::from_findings(SlitherAuditor::pattern_scan(source), "pattern-scan");
        assert_eq!(report.severity, AuditSeverity::High);
        assert_eq!(report.findings.len(), 2);
    }

    #[test]
    fn test_pattern_scan_clean_source() {
        let report = AuditReport::from_findings(
            SlitherAuditor::pattern_scan("contract Safe { uint256 public x; }"),
            "pattern-scan",
        );
        assert_eq!(report.severity, AuditSeverity::None);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn test_parse_slither_json() {
        let stdout = r#"{
            "success": true,
            "results": {
                "detectors": [
                    {"impact": "High", "check": "reentrancy-eth", "description": "Reentrancy in withdraw()"},
                    {"impact": "Informational", "check": "naming-convention", "description": "Parameter not in mixedCase"}
                ]
            }
        }"#;
        let findings = SlitherAuditor::parse_slither(stdout).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, AuditSeverity::High);
        assert_eq!(findings[1].severity, AuditSeverity::None);
    }
}
