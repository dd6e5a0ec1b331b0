// src/exec/naming.rs

//! Process names for operational visibility (`ps`, `top`).
//!
//! Full titles look like `numbers center #3` or `numbers master`. The
//! kernel keeps only 15 bytes of a name, so when a title does not fit the
//! role moves in front as `c#3 numbers` and the pipeline name is cut
//! instead. Workers of the same stage stay distinguishable either way.

use std::ffi::CString;

use tracing::debug;

use crate::types::Stage;

/// Longest name the kernel keeps (`TASK_COMM_LEN` minus the NUL).
pub const MAX_NAME_BYTES: usize = 15;

/// Human-readable title of a worker process.
pub fn worker_title(pipeline: &str, stage: Stage, index: usize) -> String {
    format!("{pipeline} {stage} #{index}")
}

/// Human-readable title of the supervisor process.
pub fn master_title(pipeline: &str) -> String {
    format!("{pipeline} master")
}

/// Kernel name of a worker: the full title when it fits, else `c#3 name`.
pub fn worker_name(pipeline: &str, stage: Stage, index: usize) -> String {
    let role = format!("{}#{index}", stage_initial(stage));
    fit_name(worker_title(pipeline, stage, index), &role, pipeline)
}

/// Kernel name of the supervisor: the full title when it fits, else `m name`.
pub fn master_name(pipeline: &str) -> String {
    fit_name(master_title(pipeline), "m", pipeline)
}

fn stage_initial(stage: Stage) -> char {
    match stage {
        Stage::Left => 'l',
        Stage::Center => 'c',
        Stage::Right => 'r',
    }
}

fn fit_name(title: String, role: &str, pipeline: &str) -> String {
    if title.len() <= MAX_NAME_BYTES {
        return title;
    }
    let compact = format!("{role} {pipeline}");
    truncate_name(&compact).to_string()
}

/// Best-effort rename of the calling thread / process.
///
/// Purely cosmetic; failures are logged at debug and otherwise ignored.
pub fn set_process_name(name: &str) {
    let truncated = truncate_name(name);

    #[cfg(target_os = "linux")]
    {
        match CString::new(truncated) {
            Ok(cname) => {
                if let Err(e) = nix::sys::prctl::set_name(&cname) {
                    debug!(name, error = %e, "failed to set process name");
                }
            }
            Err(e) => debug!(name, error = %e, "process name contains NUL"),
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = CString::new(truncated);
        debug!(name, "process naming not supported on this platform");
    }
}

/// Cut `name` to the kernel limit without splitting a UTF-8 character.
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_BYTES {
        return name;
    }
    let mut end = MAX_NAME_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
