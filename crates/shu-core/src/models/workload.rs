use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Logical kind of background work. Routing maps each one to a physical queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    IngestionOcr,
    IngestionEmbed,
    Profiling,
    PluginExecution,
    Maintenance,
}

impl WorkloadType {
    pub fn all() -> &'static [WorkloadType] {
        &[
            WorkloadType::IngestionOcr,
            WorkloadType::IngestionEmbed,
            WorkloadType::Profiling,
            WorkloadType::PluginExecution,
            WorkloadType::Maintenance,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadType::IngestionOcr => "ingestion_ocr",
            WorkloadType::IngestionEmbed => "ingestion_embed",
            WorkloadType::Profiling => "profiling",
            WorkloadType::PluginExecution => "plugin_execution",
            WorkloadType::Maintenance => "maintenance",
        }
    }
}

impl Display for WorkloadType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingestion_ocr" => Ok(WorkloadType::IngestionOcr),
            "ingestion_embed" => Ok(WorkloadType::IngestionEmbed),
            "profiling" => Ok(WorkloadType::Profiling),
            "plugin_execution" => Ok(WorkloadType::PluginExecution),
            "maintenance" => Ok(WorkloadType::Maintenance),
            _ => Err(anyhow::anyhow!("Invalid workload type: {}", s)),
        }
    }
}
