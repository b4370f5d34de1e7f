//! Agent definitions file (`agents.json`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use visionaid_persistence::atomic::{atomic_write_json, read_json_optional};

use crate::agent::{AgentHandle, AgentMode};
use crate::error::{Result, RuntimeError};
use crate::process::ProcessAgent;

/// File name of the agent definitions inside the state directory.
pub const AGENTS_FILE: &str = "agents.json";

/// Environment variable telling agent processes where to publish.
pub const BUS_ADDR_ENV: &str = "VISIONAID_BUS_ADDR";

/// One external agent program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Registry key, matched by voice commands.
    pub name: String,
    /// Program to run.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub mode: AgentMode,
    /// Overrides the default maximum runtime for blocking agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AgentDefinition {
    /// Per-agent runtime bound, if set.
    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_secs.map(Duration::from_secs)
    }

    /// Builds the process-backed handle. The child learns the bus address
    /// through [`BUS_ADDR_ENV`].
    pub fn to_handle(&self, bus_addr: &str) -> AgentHandle {
        let agent = ProcessAgent::new(&self.command, self.args.iter().cloned())
            .with_env(BUS_ADDR_ENV, bus_addr)
            .with_description(
                self.description
                    .clone()
                    .unwrap_or_else(|| format!("{} {}", self.command, self.args.join(" ")).trim().to_string()),
            );

        match self.mode {
            AgentMode::Blocking => AgentHandle::blocking(agent),
            AgentMode::Detached => AgentHandle::detachable(agent),
        }
    }
}

/// Loads definitions from `path`. `Ok(None)` if the file does not exist.
pub fn load_definitions(path: &Path) -> Result<Option<Vec<AgentDefinition>>> {
    let definitions: Option<Vec<AgentDefinition>> = read_json_optional(path)?;
    if let Some(defs) = &definitions {
        validate(defs)?;
        info!(path = %path.display(), count = defs.len(), "loaded agent definitions");
    }
    Ok(definitions)
}

/// Writes the example definitions to `path` atomically.
pub fn write_example_definitions(path: &Path) -> Result<()> {
    atomic_write_json(path, &example_definitions())?;
    info!(path = %path.display(), "wrote example agent definitions");
    Ok(())
}

/// One definition per built-in voice command.
pub fn example_definitions() -> Vec<AgentDefinition> {
    let script = |name: &str, mode: AgentMode, description: &str| AgentDefinition {
        name: name.to_string(),
        command: "python3".to_string(),
        args: vec![format!("agents/{}.py", name)],
        mode,
        max_runtime_secs: None,
        description: Some(description.to_string()),
    };

    vec![
        script("object_detection", AgentMode::Blocking, "Announces objects in view"),
        script("barcode_scanner", AgentMode::Blocking, "Scans product barcodes"),
        script("document_reader", AgentMode::Blocking, "Reads printed text aloud"),
        script("navigation", AgentMode::Detached, "Turn-by-turn walking directions"),
        script("ecommerce_agent", AgentMode::Detached, "Compares product prices online"),
        script("emotion_detection_agent", AgentMode::Blocking, "Describes facial expressions"),
    ]
}

fn validate(definitions: &[AgentDefinition]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for def in definitions {
        if def.name.trim().is_empty() {
            return Err(RuntimeError::Config("agent definition with empty name".into()));
        }
        if def.command.trim().is_empty() {
            return Err(RuntimeError::Config(format!("agent {} has no command", def.name)));
        }
        if !seen.insert(def.name.as_str()) {
            return Err(RuntimeError::Config(format!("agent {} is defined twice", def.name)));
        }
    }
    Ok(())
}
