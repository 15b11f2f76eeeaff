//! Presence check for the cluster-scoped `ManualApprovalGate` resource.

use anyhow::Result;
use tracing::instrument;

use crate::core::types::ManualApprovalGate;
use crate::io::config::GatecheckConfig;
use crate::io::tasks::OcJsonReader;

pub trait GateSource: Send + Sync {
    /// Fetch the gate named `name`; a missing gate is [`VerifyError::NotReady`].
    ///
    /// [`VerifyError::NotReady`]: crate::error::VerifyError::NotReady
    fn get_gate(&self, name: &str) -> Result<ManualApprovalGate>;
}

pub struct OcGateSource {
    reader: OcJsonReader,
}

impl OcGateSource {
    pub fn from_config(cfg: &GatecheckConfig) -> Self {
        Self {
            reader: OcJsonReader::from_config(cfg),
        }
    }
}

impl GateSource for OcGateSource {
    #[instrument(skip(self))]
    fn get_gate(&self, name: &str) -> Result<ManualApprovalGate> {
        self.reader.get_json(
            &["get", "manualapprovalgate", name, "-o", "json"],
            &format!("manualapprovalgate {name}"),
        )
    }
}
