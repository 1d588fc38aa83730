//! Demo command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::DemoArgs;
use crate::data::{generate_task, DecathlonTask, SyntheticSpec};
use crate::error::{Error, Result};

pub fn run_demo(args: DemoArgs, level: LogLevel) -> Result<()> {
    let task: DecathlonTask = args.task.parse().map_err(Error::config)?;
    let spec = SyntheticSpec::new(task, args.cases, args.size, args.seed);
    let task_dir = generate_task(&args.root_dir, &spec)?;

    log(
        level,
        LogLevel::Normal,
        &format!("Wrote synthetic {} to {}", task, task_dir.display()),
    );
    log(
        level,
        LogLevel::Normal,
        &format!(
            "  Train with: decathlon-train train root_dir={} task={}",
            args.root_dir.display(),
            task.dir_name()
        ),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn args(root: PathBuf, task: &str) -> DemoArgs {
        DemoArgs {
            root_dir: root,
            task: task.to_string(),
            cases: 3,
            size: 6,
            seed: 1,
        }
    }

    #[test]
    fn test_demo_writes_task() {
        let dir = TempDir::new().unwrap();
        run_demo(args(dir.path().to_path_buf(), "heart"), LogLevel::Quiet).unwrap();
        assert!(dir.path().join("Task02_Heart").join("dataset.json").is_file());
    }

    #[test]
    fn test_demo_unknown_task() {
        let dir = TempDir::new().unwrap();
        let err = run_demo(args(dir.path().to_path_buf(), "knee"), LogLevel::Quiet).unwrap_err();
        assert_eq!(err.code(), "E002");
    }
}
