// ============================================================================
// PROFILE RENDERING
// ============================================================================
// Profile artifacts are turned into human-readable reports. The built-in
// `ArtifactRenderer` reads the JSON artifacts of `ResourceUsageBackend`;
// `CommandRenderer` hands artifacts to an external tool such as `pprof`,
// looked up at call time. A missing tool is an error for that one render,
// never for the profiler.
// ============================================================================

use std::fmt::{self, Write as _};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProfilerError, ProfilerResult};

use super::backend::{CpuProfile, HeapProfile};

/// Shape of a rendered report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    #[default]
    Text,
    /// Call graph in DOT format
    Graph,
    /// Annotated source listing
    List,
}

impl ReportType {
    /// Flag passed to the render tool
    pub fn flag(&self) -> &'static str {
        match self {
            ReportType::Text => "-text",
            ReportType::Graph => "-dot",
            ReportType::List => "-list",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportType::Text => "text",
            ReportType::Graph => "graph",
            ReportType::List => "list",
        };
        f.write_str(name)
    }
}

/// Unrecognized names fall back to [`ReportType::Text`].
impl FromStr for ReportType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "graph" | "dot" => ReportType::Graph,
            "list" => ReportType::List,
            _ => ReportType::Text,
        })
    }
}

/// Renders one profile artifact.
pub trait ProfileRenderer: Send + Sync {
    /// `focus` restricts a listing to functions matching the pattern.
    fn render(&self, profile: &Path, report: ReportType, focus: Option<&str>) -> ProfilerResult<String>;
}

// ----------------------------------------------------------------------------
// Built-in Renderer
// ----------------------------------------------------------------------------

/// Either artifact kind written by the default backend.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Artifact {
    Cpu(CpuProfile),
    Heap(HeapProfile),
}

/// Renders the JSON artifacts written by
/// [`ResourceUsageBackend`](super::backend::ResourceUsageBackend).
///
/// `text` is a flat key/value table, `graph` a DOT digraph rooted at the
/// function, `list` the flat table under a `ROUTINE` header for `focus`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArtifactRenderer;

impl ArtifactRenderer {
    fn load(profile: &Path) -> ProfilerResult<Artifact> {
        let content = fs::read(profile).map_err(|e| ProfilerError::profile_io(profile, e))?;
        serde_json::from_slice(&content).map_err(|e| ProfilerError::RenderFailed {
            message: format!("{} is not a profile artifact: {}", profile.display(), e),
        })
    }

    fn rows(artifact: &Artifact) -> Vec<(&'static str, String)> {
        match artifact {
            Artifact::Cpu(cpu) => vec![
                ("kind", "cpu".to_string()),
                ("started_at", cpu.started_at.to_rfc3339()),
                ("wall_time", humantime::format_duration(cpu.wall_time).to_string()),
                ("user_time_us", cpu.cpu_time.user_us.to_string()),
                ("system_time_us", cpu.cpu_time.system_us.to_string()),
                ("total_time_us", (cpu.cpu_time.user_us + cpu.cpu_time.system_us).to_string()),
            ],
            Artifact::Heap(heap) => vec![
                ("kind", "heap".to_string()),
                ("captured_at", heap.captured_at.to_rfc3339()),
                ("live_bytes", heap.allocations.live_bytes.to_string()),
                ("peak_bytes", heap.allocations.peak_bytes.to_string()),
                ("total_allocated", heap.allocations.total_allocated.to_string()),
                ("allocations", heap.allocations.allocations.to_string()),
                ("deallocations", heap.allocations.deallocations.to_string()),
                ("live_objects", heap.allocations.live_objects().to_string()),
            ],
        }
    }

    fn table(rows: &[(&'static str, String)], indent: &str) -> String {
        let mut out = String::new();
        for (key, value) in rows {
            let _ = writeln!(out, "{indent}{key:<16} {value}");
        }
        out
    }

    fn graph(name: &str, artifact: &Artifact) -> String {
        let edges: Vec<(&str, String)> = match artifact {
            Artifact::Cpu(cpu) => vec![
                ("user", format!("{}us", cpu.cpu_time.user_us)),
                ("system", format!("{}us", cpu.cpu_time.system_us)),
            ],
            Artifact::Heap(heap) => vec![
                ("live", format!("{} B", heap.allocations.live_bytes)),
                ("freed", format!("{} objects", heap.allocations.deallocations)),
            ],
        };

        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{name}\" {{");
        let _ = writeln!(out, "  node [shape=box];");
        for (node, label) in edges {
            let _ = writeln!(out, "  \"{name}\" -> \"{node}\" [label=\"{label}\"];");
        }
        out.push_str("}\n");
        out
    }
}

impl ProfileRenderer for ArtifactRenderer {
    fn render(&self, profile: &Path, report: ReportType, focus: Option<&str>) -> ProfilerResult<String> {
        let artifact = Self::load(profile)?;
        let stem = profile
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = focus.unwrap_or(stem.as_str()).replace('"', "'");

        Ok(match report {
            ReportType::Text => Self::table(&Self::rows(&artifact), ""),
            ReportType::Graph => Self::graph(&name, &artifact),
            ReportType::List => format!(
                "ROUTINE ======================== {name}\n{}",
                Self::table(&Self::rows(&artifact), "  ")
            ),
        })
    }
}

// ----------------------------------------------------------------------------
// External Tool
// ----------------------------------------------------------------------------

/// Runs an external tool: `<program> <args..> <flag> [focus] <profile>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Build from a command line such as `["go", "tool", "pprof"]`.
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for CommandRenderer {
    fn default() -> Self {
        Self::new("pprof")
    }
}

impl ProfileRenderer for CommandRenderer {
    fn render(&self, profile: &Path, report: ReportType, focus: Option<&str>) -> ProfilerResult<String> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(report.flag());
        if let Some(pattern) = focus {
            command.arg(pattern);
        }
        command.arg(profile);

        debug!(
            target: "vigil::profiler",
            tool = %self.program,
            report = %report,
            profile = %profile.display(),
            "Rendering profile"
        );

        let output = command.output().map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => ProfilerError::RenderToolUnavailable {
                tool: self.program.clone(),
            },
            _ => ProfilerError::RenderFailed { message: e.to_string() },
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProfilerError::RenderFailed {
                message: format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("text", ReportType::Text)]
    #[case("GRAPH", ReportType::Graph)]
    #[case("list", ReportType::List)]
    #[case("flamegraph", ReportType::Text)]
    #[case("", ReportType::Text)]
    fn test_report_type_from_str(#[case] input: &str, #[case] expected: ReportType) {
        assert_eq!(input.parse::<ReportType>().unwrap(), expected);
    }

    #[test]
    fn test_missing_tool_is_unavailable() {
        let renderer = CommandRenderer::new("vigil-no-such-render-tool");
        let err = renderer
            .render(Path::new("/tmp/none_cpu.prof"), ReportType::Text, None)
            .unwrap_err();
        assert!(matches!(err, ProfilerError::RenderToolUnavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_renders_tool_stdout() {
        // `echo -text <profile>` stands in for a real tool
        let renderer = CommandRenderer::new("echo");
        let out = renderer
            .render(Path::new("fn_cpu.prof"), ReportType::Text, None)
            .unwrap();
        assert_eq!(out.trim(), "-text fn_cpu.prof");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_tool_is_render_failed() {
        let renderer = CommandRenderer::new("false");
        let err = renderer
            .render(Path::new("fn_cpu.prof"), ReportType::List, Some("fn"))
            .unwrap_err();
        assert!(matches!(err, ProfilerError::RenderFailed { .. }));
    }

    fn artifacts(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        use crate::profiler::backend::{ProfilerBackend, ResourceUsageBackend};

        let backend = ResourceUsageBackend::new();
        let cpu = dir.join("pkg-work_cpu.prof");
        let heap = dir.join("pkg-work_mem.prof");
        backend.start_cpu_profile(&cpu).unwrap();
        backend.stop_cpu_profile().unwrap();
        backend.write_heap_profile(&heap).unwrap();
        (cpu, heap)
    }

    #[test]
    fn test_artifact_renderer_text() {
        let dir = tempfile::tempdir().unwrap();
        let (cpu, heap) = artifacts(dir.path());

        let text = ArtifactRenderer.render(&cpu, ReportType::Text, None).unwrap();
        assert!(text.starts_with("kind             cpu\n"));
        assert!(text.contains("total_time_us"));

        let text = ArtifactRenderer.render(&heap, ReportType::Text, None).unwrap();
        assert!(text.starts_with("kind             heap\n"));
        assert!(text.contains("live_bytes"));
    }

    #[test]
    fn test_artifact_renderer_graph_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let (cpu, _) = artifacts(dir.path());

        let graph = ArtifactRenderer.render(&cpu, ReportType::Graph, None).unwrap();
        assert!(graph.starts_with("digraph \"pkg-work_cpu\" {"));
        assert!(graph.contains("\"pkg-work_cpu\" -> \"user\""));

        let list = ArtifactRenderer.render(&cpu, ReportType::List, Some("pkg/work")).unwrap();
        assert!(list.starts_with("ROUTINE ======================== pkg/work\n"));
        assert!(list.contains("  wall_time"));
    }

    #[test]
    fn test_artifact_renderer_rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other_cpu.prof");
        fs::write(&path, b"\x1f\x8b binary pprof data").unwrap();

        let err = ArtifactRenderer.render(&path, ReportType::Text, None).unwrap_err();
        assert!(matches!(err, ProfilerError::RenderFailed { .. }));

        let err = ArtifactRenderer
            .render(&dir.path().join("missing_cpu.prof"), ReportType::Text, None)
            .unwrap_err();
        assert!(matches!(err, ProfilerError::ProfileIo { .. }));
    }

    #[test]
    fn test_from_command_line() {
        let cmd = vec!["go".to_string(), "tool".to_string(), "pprof".to_string()];
        let renderer = CommandRenderer::from_command_line(&cmd).unwrap();
        assert_eq!(renderer.program(), "go");
        assert!(CommandRenderer::from_command_line(&[]).is_none());
    }
}
