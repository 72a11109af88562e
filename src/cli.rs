//! Command line: depth packet pipeline selection and run overrides

use std::ffi::OsString;
use std::fmt::Write;
use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use tracing::debug;

use crate::device::PipelineKind;
use crate::error::AppError;
use crate::Config;

/// Backend requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineSelection {
    /// Let the driver pick (OpenGL)
    #[default]
    Default,
    Explicit(PipelineKind),
}

impl PipelineSelection {
    pub fn kind(self) -> Option<PipelineKind> {
        match self {
            PipelineSelection::Default => None,
            PipelineSelection::Explicit(kind) => Some(kind),
        }
    }
}

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "Protonect",
    disable_help_flag = true,
    disable_version_flag = true,
    args_override_self = true
)]
#[command(group(ArgGroup::new("pipeline").multiple(false)))]
pub struct Args {
    #[arg(long, group = "pipeline")]
    pub opengl: bool,

    #[arg(long, group = "pipeline")]
    pub cpu: bool,

    #[cfg(feature = "opencl")]
    #[arg(long, group = "pipeline")]
    pub opencl: bool,

    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub headless: bool,

    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    #[arg(long, value_name = "N")]
    pub max_frames: Option<u64>,
}

impl Args {
    /// Parse the full argument vector, program name first.
    ///
    /// Anything unrecognized, and more than one backend flag, is a
    /// [`AppError::Usage`] carrying the usage text.
    pub fn parse_args<I, T>(args: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Args::try_parse_from(args).map_err(|err| {
            debug!(kind = ?err.kind(), "Rejected command line");
            let reason = err.to_string();
            let reason = reason.lines().next().unwrap_or_default();
            AppError::Usage(format!("{reason}\n{}", usage_text()))
        })
    }

    pub fn pipeline(&self) -> PipelineSelection {
        #[cfg(feature = "opencl")]
        if self.opencl {
            return PipelineSelection::Explicit(PipelineKind::OpenCl);
        }
        if self.opengl {
            PipelineSelection::Explicit(PipelineKind::OpenGl)
        } else if self.cpu {
            PipelineSelection::Explicit(PipelineKind::Cpu)
        } else {
            PipelineSelection::Default
        }
    }

    /// Fold command line overrides into `config`
    pub fn apply(&self, config: &mut Config) {
        if self.headless {
            config.display.headless = true;
        }
        if let Some(ms) = self.timeout_ms {
            config.acquisition.wait_timeout_ms = ms;
        }
        if self.max_frames.is_some() {
            config.acquisition.max_frames = self.max_frames;
        }
    }
}

/// Usage text listing the compiled-in packet processors
pub fn usage_text() -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Usage: Protonect [option]");
    let _ = writeln!(
        text,
        "Packet processor type may be selected with these options:"
    );
    let _ = writeln!(text, "\t--opengl\tUse OpenGL to process depth packets");
    let _ = writeln!(text, "\t--cpu\tUse CPU to process depth packets (slower)");
    if PipelineKind::OpenCl.is_available() {
        let _ = writeln!(text, "\t--opencl\tUse OpenCL to process depth packets");
    } else {
        let _ = writeln!(text);
        let _ = writeln!(
            text,
            "This Protonect was not compiled with OpenCL support, so OpenCL depth processor is not available."
        );
    }
    let _ = writeln!(text, "Default is OpenGL processor.");
    let _ = writeln!(text);
    let _ = writeln!(text, "Other options:");
    let _ = writeln!(text, "\t--config <PATH>\tRead settings from a TOML file");
    let _ = writeln!(text, "\t--headless\tDo not open windows");
    let _ = writeln!(
        text,
        "\t--timeout-ms <MS>\tBound on each frame wait, 0 waits forever"
    );
    let _ = writeln!(text, "\t--max-frames <N>\tExit after N frame sets");
    text
}
