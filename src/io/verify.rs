//! Post-session verification: upload the task's tests into the environment,
//! run them, and collect the reward.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::io::artifact::write_json;
use crate::io::env::Environment;
use crate::io::task_spec::TaskSpec;

/// Outcome of running a task's verification script.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerificationResult {
    pub success: u32,
    pub test_output: String,
    pub returncode: i32,
}

/// Run verification for environments that support file transfer.
///
/// Uploads `<task>/tests/` to `/tests`, runs `bash /tests/test.sh` in the
/// environment's working directory, and reads the reward the script leaves
/// in `/logs/verifier/reward.txt`. The result is written to
/// `<save_dir>/result.json` and the environment's working directory is
/// snapshotted next to it. Returns `None` when the environment cannot
/// transfer files or the task ships no test script.
pub fn run_verification(
    env: &dyn Environment,
    task: &TaskSpec,
    save_dir: &Path,
) -> Result<Option<VerificationResult>> {
    if !env.supports_transfer() {
        return Ok(None);
    }
    let tests_dir = task.tests_dir();
    if !tests_dir.join("test.sh").exists() {
        info!(task = %task.name, "no test script, skipping verification");
        return Ok(None);
    }

    env.upload_dir(&tests_dir, "/tests")?;
    env.execute("mkdir -p /logs/verifier", None, None)?;

    let work_dir = env.work_dir().to_path_buf();
    let test = env.execute("bash /tests/test.sh", Some(&work_dir), None)?;

    let reward = env.execute("cat /logs/verifier/reward.txt 2>/dev/null || echo 0", None, None)?;
    let success = reward.output.trim().parse::<u32>().unwrap_or_else(|_| {
        warn!(reward = %reward.output.trim(), "non-numeric reward, treating as 0");
        0
    });

    let result = VerificationResult {
        success,
        test_output: test.output,
        returncode: test.returncode,
    };
    write_json(&save_dir.join("result.json"), &result)?;
    info!(success, "verification finished");

    env.download_dir(&save_dir.join("environment_snapshot"))?;
    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::test_support::{ScriptedEnv, ScriptedExec};

    fn spec_with_tests(root: &Path) -> TaskSpec {
        let dir = root.join("cron");
        fs::create_dir_all(dir.join("tests")).expect("mkdir");
        fs::write(dir.join("instruction.md"), "do the thing").expect("write");
        fs::write(dir.join("tests/test.sh"), "exit 0").expect("write");
        TaskSpec::load(root, "cron").expect("load")
    }

    struct TransferEnv(ScriptedEnv);

    impl Environment for TransferEnv {
        fn execute(
            &self,
            command: &str,
            cwd: Option<&Path>,
            timeout: Option<std::time::Duration>,
        ) -> Result<crate::io::env::ExecResult> {
            self.0.execute(command, cwd, timeout)
        }

        fn work_dir(&self) -> &Path {
            self.0.work_dir()
        }

        fn supports_transfer(&self) -> bool {
            true
        }

        fn upload_dir(&self, _source: &Path, _target: &str) -> Result<()> {
            Ok(())
        }

        fn download_dir(&self, _target: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn skips_when_environment_cannot_transfer() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task = spec_with_tests(temp.path());
        let env = ScriptedEnv::new([]);
        let result = run_verification(&env, &task, temp.path()).expect("verify");
        assert!(result.is_none());
    }

    #[test]
    fn collects_reward_and_writes_result_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task = spec_with_tests(temp.path());
        let env = TransferEnv(ScriptedEnv::new([
            ScriptedExec::ok(""),               // mkdir
            ScriptedExec::ok("tests passed\n"), // test.sh
            ScriptedExec::ok("1\n"),            // reward
        ]));

        let result = run_verification(&env, &task, temp.path())
            .expect("verify")
            .expect("result");
        assert_eq!(result.success, 1);
        assert_eq!(result.test_output, "tests passed\n");

        let raw = fs::read_to_string(temp.path().join("result.json")).expect("read");
        assert!(raw.contains("\"success\": 1"));
    }

    #[test]
    fn garbage_reward_counts_as_zero() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task = spec_with_tests(temp.path());
        let env = TransferEnv(ScriptedEnv::new([
            ScriptedExec::ok(""),
            ScriptedExec::ok("boom"),
            ScriptedExec::ok("not-a-number"),
        ]));

        let result = run_verification(&env, &task, temp.path())
            .expect("verify")
            .expect("result");
        assert_eq!(result.success, 0);
    }
}
