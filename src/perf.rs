use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::process::Command;
use tracing::debug;

use crate::error::ArgsError;
use crate::recorder::{RecordingParameters, RecordingTarget};

/// Call-graph collection modes offered by `perf record --call-graph`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallGraph {
    #[serde(rename = "none")]
    None,
    #[default]
    #[serde(rename = "dwarf")]
    Dwarf,
    #[serde(rename = "fp")]
    FramePointer,
    #[serde(rename = "lbr")]
    LastBranchRecord,
}

impl CallGraph {
    pub fn label(&self) -> &'static str {
        match self {
            CallGraph::None => "None",
            CallGraph::Dwarf => "DWARF",
            CallGraph::FramePointer => "Frame Pointer",
            CallGraph::LastBranchRecord => "Last Branch Record",
        }
    }

    /// Value passed to `--call-graph`, `None` when call graphs are off.
    pub fn option(&self) -> Option<&'static str> {
        match self {
            CallGraph::None => None,
            CallGraph::Dwarf => Some("dwarf"),
            CallGraph::FramePointer => Some("fp"),
            CallGraph::LastBranchRecord => Some("lbr"),
        }
    }

    /// Modes available on this machine. LBR needs an Intel CPU.
    pub fn available(lbr: bool) -> Vec<CallGraph> {
        let mut modes = vec![CallGraph::None, CallGraph::Dwarf, CallGraph::FramePointer];
        if lbr {
            modes.push(CallGraph::LastBranchRecord);
        }
        modes
    }
}

pub fn is_intel_cpu() -> bool {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing()),
    );
    let intel = system
        .cpus()
        .first()
        .map(|cpu| cpu.vendor_id() == "GenuineIntel")
        .unwrap_or(false);
    debug!("CPU vendor is Intel: {}", intel);
    intel
}

/// Builder for `perf record` invocations
pub struct PerfCommandBuilder<'a> {
    perf_path: &'a Path,
    params: &'a RecordingParameters,
}

impl<'a> PerfCommandBuilder<'a> {
    pub fn new(perf_path: &'a Path, params: &'a RecordingParameters) -> Self {
        Self { perf_path, params }
    }

    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "record".into(),
            "-o".into(),
            self.params.output_path.clone().into_os_string(),
        ];
        args.extend(self.params.perf_options.iter().map(OsString::from));

        match &self.params.target {
            RecordingTarget::Launch { application, arguments, .. } => {
                args.push("--".into());
                args.push(application.clone().into_os_string());
                args.extend(arguments.iter().map(OsString::from));
            }
            RecordingTarget::Attach { pids } => {
                let pids: Vec<String> = pids.iter().map(u32::to_string).collect();
                args.push(format!("--pid={}", pids.join(",")).into());
            }
        }
        args
    }

    pub fn build(&self) -> Command {
        let mut cmd = Command::new(self.perf_path);
        cmd.args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let RecordingTarget::Launch { working_directory, .. } = &self.params.target {
            cmd.current_dir(working_directory);
        }
        cmd
    }
}

/// Find perf executable in common locations
pub fn find_perf() -> Option<PathBuf> {
    if let Ok(p) = which::which("perf") {
        return Some(p);
    }
    let candidates = ["/usr/bin/perf", "/usr/local/bin/perf", "/usr/sbin/perf"];
    for c in candidates {
        let pb = PathBuf::from(c);
        if pb.exists() {
            return Some(pb);
        }
    }
    None
}

/// Split an argument string the way a POSIX shell would, without expansion.
pub fn split_args(text: &str) -> Result<Vec<String>, ArgsError> {
    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => return Err(ArgsError::UnterminatedQuote),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => {
                    let next = chars.next().ok_or(ArgsError::TrailingEscape)?;
                    current.push(next);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        args.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    if quote != Quote::None {
        return Err(ArgsError::UnterminatedQuote);
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn launch_command_puts_application_after_separator() {
        let params = RecordingParameters {
            perf_options: vec!["--call-graph".into(), "dwarf".into()],
            output_path: PathBuf::from("/tmp/perf.data"),
            target: RecordingTarget::Launch {
                application: PathBuf::from("/usr/bin/ls"),
                arguments: vec!["-l".into(), "/tmp".into()],
                working_directory: PathBuf::from("/tmp"),
            },
        };
        let builder = PerfCommandBuilder::new(Path::new("perf"), &params);
        assert_eq!(
            builder.args(),
            os(&["record", "-o", "/tmp/perf.data", "--call-graph", "dwarf", "--", "/usr/bin/ls", "-l", "/tmp"])
        );
    }

    #[test]
    fn attach_command_joins_pids() {
        let params = RecordingParameters {
            perf_options: vec!["--event".into(), "cycles".into()],
            output_path: PathBuf::from("out.data"),
            target: RecordingTarget::Attach { pids: vec![12, 345] },
        };
        let builder = PerfCommandBuilder::new(Path::new("perf"), &params);
        assert_eq!(
            builder.args(),
            os(&["record", "-o", "out.data", "--event", "cycles", "--pid=12,345"])
        );
    }

    #[test]
    fn call_graph_options() {
        assert_eq!(CallGraph::None.option(), None);
        assert_eq!(CallGraph::default(), CallGraph::Dwarf);
        assert_eq!(CallGraph::FramePointer.option(), Some("fp"));
        assert!(!CallGraph::available(false).contains(&CallGraph::LastBranchRecord));
        assert_eq!(CallGraph::available(true).last(), Some(&CallGraph::LastBranchRecord));
    }

    #[test]
    fn call_graph_deserializes_from_perf_names() {
        let mode: CallGraph = serde_json::from_str("\"lbr\"").unwrap();
        assert_eq!(mode, CallGraph::LastBranchRecord);
        let mode: CallGraph = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(mode, CallGraph::None);
    }

    #[test]
    fn split_args_handles_quotes_and_escapes() {
        assert_eq!(split_args("").unwrap(), Vec::<String>::new());
        assert_eq!(split_args("  -v   --level 3 ").unwrap(), vec!["-v", "--level", "3"]);
        assert_eq!(
            split_args(r#"--name "hello world" 'it''s' a\ b"#).unwrap(),
            vec!["--name", "hello world", "its", "a b"]
        );
        assert_eq!(split_args(r#""say \"hi\"" "\n""#).unwrap(), vec![r#"say "hi""#, r"\n"]);
        assert_eq!(split_args("''").unwrap(), vec![""]);
    }

    #[test]
    fn split_args_rejects_unbalanced_input() {
        assert_eq!(split_args("\"open"), Err(ArgsError::UnterminatedQuote));
        assert_eq!(split_args("'open"), Err(ArgsError::UnterminatedQuote));
        assert_eq!(split_args("trailing\\"), Err(ArgsError::TrailingEscape));
    }
}
