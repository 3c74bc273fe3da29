//! # Toolchain
//!
//! Thin bridges over the external Solidity toolchain. The workflow engine
//! depends only on the traits defined here; the Foundry-backed
//! implementations shell out to `forge` and `slither` with wall-clock
//! timeouts, and tests substitute scripted fakes.

pub mod auditor;
pub mod compiler;
pub mod deployer;
pub mod deps;
pub mod errors;
pub mod process;
pub mod verifier;

pub use auditor::{AuditFinding, AuditReport, Auditor, AuditSeverity, SlitherAuditor};
pub use compiler::{CompileOutput, Compiler, ForgeCompiler};
pub use deployer::{DeployErrorKind, DeployOutcome, DeployRequest, Deployer, ForgeDeployer};
pub use deps::{Dependency, DependencyResolver, ForgeDependencyResolver, ResolutionOutcome};
pub use errors::{ToolError, ToolResult};
pub use verifier::{ExplorerVerifier, Verifier, VerifyOutcome, VerifyRequest};
