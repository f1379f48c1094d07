use crate::isolation::IsolationEnvironment;
use crate::launcher::{LaunchOutput, Launcher};
use crate::RuntimeError;
use std::sync::Mutex;

type RunHook = Box<dyn Fn(&IsolationEnvironment, &[String]) + Send + Sync>;

/// Scripted launcher for tests and dry runs.
///
/// Every invocation is recorded. Replies are chosen by the first rule whose
/// pattern is a prefix of the argv, with `argv[0]` reduced to its file name
/// (`/bin/apk add curl` matches `["apk", "add"]`). Unmatched invocations exit 0
/// with empty output.
#[derive(Default)]
pub struct MockLauncher {
    rules: Mutex<Vec<(Vec<String>, LaunchOutput)>>,
    invocations: Mutex<Vec<Vec<String>>>,
    hook: Option<RunHook>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` on every invocation before the reply is produced.
    #[must_use]
    pub fn with_hook(
        mut self,
        hook: impl Fn(&IsolationEnvironment, &[String]) + Send + Sync + 'static,
    ) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn respond(&self, pattern: &[&str], output: LaunchOutput) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push((pattern.iter().map(|s| (*s).to_owned()).collect(), output));
        }
    }

    pub fn respond_stdout(&self, pattern: &[&str], stdout: &str) {
        self.respond(
            pattern,
            LaunchOutput {
                stdout: stdout.to_owned(),
                ..LaunchOutput::default()
            },
        );
    }

    pub fn respond_status(&self, pattern: &[&str], status: i32) {
        self.respond(
            pattern,
            LaunchOutput {
                status,
                ..LaunchOutput::default()
            },
        );
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations
            .lock()
            .map(|i| i.clone())
            .unwrap_or_default()
    }

    /// Number of recorded invocations whose normalized argv starts with `pattern`.
    pub fn count_matching(&self, pattern: &[&str]) -> usize {
        self.invocations()
            .iter()
            .filter(|argv| matches_prefix(&normalize(argv), pattern))
            .count()
    }
}

fn normalize(argv: &[String]) -> Vec<String> {
    let mut out = argv.to_vec();
    if let Some(first) = out.first_mut() {
        if let Some(name) = first.rsplit('/').next() {
            *first = name.to_owned();
        }
    }
    out
}

fn matches_prefix(argv: &[String], pattern: &[impl AsRef<str>]) -> bool {
    pattern.len() <= argv.len() && pattern.iter().zip(argv).all(|(p, a)| p.as_ref() == a)
}

impl Launcher for MockLauncher {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn run(
        &self,
        env: &IsolationEnvironment,
        argv: &[String],
    ) -> Result<LaunchOutput, RuntimeError> {
        if argv.is_empty() {
            return Err(RuntimeError::LaunchFailed("empty argv".to_owned()));
        }
        if !env.root_path.is_dir() {
            return Err(RuntimeError::LaunchFailed(format!(
                "isolation root {} does not exist",
                env.root_path.display()
            )));
        }

        self.invocations
            .lock()
            .map_err(|e| RuntimeError::LaunchFailed(format!("mutex poisoned: {e}")))?
            .push(argv.to_vec());

        if let Some(hook) = &self.hook {
            hook(env, argv);
        }

        let normalized = normalize(argv);
        let rules = self
            .rules
            .lock()
            .map_err(|e| RuntimeError::LaunchFailed(format!("mutex poisoned: {e}")))?;
        Ok(rules
            .iter()
            .find(|(pattern, _)| matches_prefix(&normalized, pattern))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::LifecycleState;
    use pkgcompat_schema::DistroId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn env(root: &std::path::Path) -> IsolationEnvironment {
        IsolationEnvironment {
            distro: DistroId::new("alpine"),
            root_path: root.to_path_buf(),
            staged_binary_path: root.join("bin/apk"),
            state: LifecycleState::Active,
            sequence: 1,
        }
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn unmatched_invocation_succeeds_empty() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = MockLauncher::new();
        let out = launcher.run(&env(dir.path()), &argv(&["/bin/apk", "add", "curl"])).unwrap();
        assert!(out.success());
        assert!(out.stdout.is_empty());
        assert_eq!(launcher.invocations().len(), 1);
    }

    #[test]
    fn rules_match_on_tool_name_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = MockLauncher::new();
        launcher.respond_stdout(&["apk", "info", "--depends"], "musl\n");
        launcher.respond_status(&["apk", "add"], 5);

        let e = env(dir.path());
        let deps = launcher
            .run(&e, &argv(&["/bin/apk", "info", "--depends", "curl"]))
            .unwrap();
        assert_eq!(deps.stdout, "musl\n");
        let add = launcher.run(&e, &argv(&["/bin/apk", "add", "curl"])).unwrap();
        assert_eq!(add.status, 5);
        assert_eq!(launcher.count_matching(&["apk", "add"]), 1);
        assert_eq!(launcher.count_matching(&["apk"]), 2);
    }

    #[test]
    fn hook_runs_per_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let launcher = MockLauncher::new().with_hook(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let e = env(dir.path());
        launcher.run(&e, &argv(&["/bin/apk", "add", "a"])).unwrap();
        launcher.run(&e, &argv(&["/bin/apk", "add", "b"])).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_root_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = MockLauncher::new();
        let err = launcher
            .run(&env(&dir.path().join("absent")), &argv(&["/bin/apk"]))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::LaunchFailed(_)));
        assert!(launcher.invocations().is_empty());
    }
}
