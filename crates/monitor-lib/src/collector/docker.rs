//! Container stats source backed by the docker CLI
//!
//! One `docker stats --no-stream` invocation yields one JSON object per line,
//! one line per running container.

use super::SampleSource;
use crate::error::CollectorError;
use crate::models::RawContainerSample;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Go template producing one JSON object per container
const STATS_FORMAT: &str = r#"{"BlockIO":"{{.BlockIO}}","CPUPerc":"{{.CPUPerc}}","ID":"{{.ID}}","MemPerc":"{{.MemPerc}}","MemUsage":"{{.MemUsage}}","Name":"{{.Name}}","NetIO":"{{.NetIO}}"}"#;

/// Runs `docker stats` once per snapshot
#[derive(Debug, Clone)]
pub struct DockerStatsSource {
    binary: String,
}

impl DockerStatsSource {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a different CLI binary (e.g. `podman`, or a path)
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command_line(&self) -> String {
        format!("{} stats --no-stream", self.binary)
    }
}

impl Default for DockerStatsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleSource for DockerStatsSource {
    async fn snapshot(&self) -> Result<String, CollectorError> {
        let output = Command::new(&self.binary)
            .args(["stats", "--no-stream", "--format", STATS_FORMAT])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CollectorError::Spawn {
                command: self.command_line(),
                source,
            })?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if text.is_empty() {
                text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            return Err(CollectorError::Failed {
                command: self.command_line(),
                status: output.status.to_string(),
                output: text,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(bytes = stdout.len(), "Read container stats snapshot");
        Ok(stdout)
    }
}

/// Decoded snapshot: the usable records plus how many lines were dropped
#[derive(Debug, Default)]
pub struct ParsedSnapshot {
    pub samples: Vec<RawContainerSample>,
    pub malformed: usize,
}

/// Decode a line-delimited snapshot, dropping lines that are not valid records
pub fn parse_snapshot(text: &str) -> ParsedSnapshot {
    let mut parsed = ParsedSnapshot::default();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<RawContainerSample>(line) {
            Ok(sample) => parsed.samples.push(sample),
            Err(e) => {
                parsed.malformed += 1;
                debug!(error = %e, line = %line, "Dropping malformed stats line");
            }
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot() {
        let text = concat!(
            r#"{"BlockIO":"0B / 0B","CPUPerc":"0.10%","ID":"a1","MemPerc":"1.00%","MemUsage":"10MiB / 1GiB","Name":"web-1","NetIO":"1kB / 2kB"}"#,
            "\n",
            "\n",
            r#"{"BlockIO":"0B / 0B","CPUPerc":"0.20%","ID":"b2","MemPerc":"2.00%","MemUsage":"20MiB / 1GiB","Name":"api-1","NetIO":"1kB / 2kB"}"#,
            "\n"
        );

        let parsed = parse_snapshot(text);

        assert_eq!(parsed.malformed, 0);
        assert_eq!(parsed.samples.len(), 2);
        assert_eq!(parsed.samples[0].name, "web-1");
        assert_eq!(parsed.samples[1].id, "b2");
    }

    #[test]
    fn test_parse_snapshot_drops_malformed_lines() {
        let text = concat!(
            "not json at all\n",
            r#"{"ID":"a1","Name":"web-1","CPUPerc":"5%"}"#,
            "\n",
            r#"{"CPUPerc":"5%"}"#,
            "\n",
            r#"{"ID":"c3","Name":"db-1""#,
        );

        let parsed = parse_snapshot(text);

        assert_eq!(parsed.samples.len(), 1);
        assert_eq!(parsed.malformed, 3);
        assert_eq!(parsed.samples[0].cpu_perc, "5%");
    }

    #[test]
    fn test_parse_empty_snapshot() {
        let parsed = parse_snapshot("");
        assert!(parsed.samples.is_empty());
        assert_eq!(parsed.malformed, 0);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let source = DockerStatsSource::with_binary("/nonexistent/definitely-not-docker");
        let err = source.snapshot().await.unwrap_err();
        assert!(matches!(err, CollectorError::Spawn { .. }));
    }
}
