//! Progress reporting for long-running pipeline operations.

use tracing::warn;

/// Percent value used when the amount of remaining work is unknown.
pub const INDETERMINATE: i32 = -1;

/// Machine-readable stage of a long-running operation.
///
/// Clients map these to user-facing strings or UI elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    /// Downloading a document.
    Downloading,
    /// Downloading the IOD specification document.
    DownloadingIod,
    /// Parsing a specification table.
    ParsingTable,
    /// Parsing the list of modules referenced by an IOD.
    ParsingIodModuleList,
    /// Building the models of the referenced modules.
    ParsingIodModules,
    /// Saving a specification model to disk.
    SavingModel,
    /// Saving an expanded IOD model to disk.
    SavingIodModel,
}

/// A snapshot of the progress of an operation.
///
/// Instances are immutable; a new one is emitted for every update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Progress percentage, 0 to 100, or [`INDETERMINATE`].
    pub percent: i32,
    /// Current stage.
    pub status: ProgressStatus,
    /// 1-based step number in a multi-step process.
    pub step: Option<u32>,
    /// Total number of steps in the process.
    pub total_steps: Option<u32>,
}

impl Progress {
    /// A progress snapshot with a known percentage.
    pub fn new(percent: i32, status: ProgressStatus) -> Self {
        Progress {
            percent,
            status,
            step: None,
            total_steps: None,
        }
    }

    /// A snapshot with unknown percentage.
    pub fn indeterminate(status: ProgressStatus) -> Self {
        Progress::new(INDETERMINATE, status)
    }

    /// Attaches step information.
    pub fn step(mut self, step: u32, total_steps: u32) -> Self {
        self.step = Some(step);
        self.total_steps = Some(total_steps);
        self
    }
}

/// Observer invoked inline from the parsing or building thread.
///
/// Implementations must not block or perform heavy work.
pub trait ProgressObserver {
    fn update(&mut self, progress: &Progress);
}

impl<F: FnMut(&Progress)> ProgressObserver for F {
    fn update(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// Adapter for callbacks that only accept an integer percent.
///
/// Wraps a legacy percent callback into a [`ProgressObserver`]; the first
/// update logs a deprecation warning.
#[deprecated(note = "implement `ProgressObserver` and read the full `Progress` instead")]
#[derive(Debug)]
pub struct PercentCallback<F: FnMut(i32)> {
    callback: F,
    warned: bool,
}

#[allow(deprecated)]
impl<F: FnMut(i32)> PercentCallback<F> {
    /// Wraps an integer-percent callback.
    pub fn new(callback: F) -> Self {
        PercentCallback {
            callback,
            warned: false,
        }
    }
}

#[allow(deprecated)]
impl<F: FnMut(i32)> ProgressObserver for PercentCallback<F> {
    fn update(&mut self, progress: &Progress) {
        if !self.warned {
            warn!("integer percent callbacks are deprecated; implement `ProgressObserver`");
            self.warned = true;
        }
        (self.callback)(progress.percent)
    }
}
