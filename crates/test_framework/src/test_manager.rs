//! This exposes the main control wrapper to control the tests
use std::collections::BTreeMap;
use std::io::Write;

use crossbeam::thread;

use crate::testable::{TestResult, TestableGroup, FAILED_CODE, PASSED_CODE};

type TestableGroupType = dyn TestableGroup + Sync + Send;

/// Counts of the verdicts of one run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    fn record(&mut self, result: &TestResult) {
        match result {
            TestResult::Passed => self.passed += 1,
            TestResult::Skipped => self.skipped += 1,
            TestResult::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    /// 0 when nothing failed, -1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 {
            PASSED_CODE
        } else {
            FAILED_CODE
        }
    }
}

/// This manages all test groups, and thus the tests
pub struct TestManager {
    test_groups: BTreeMap<&'static str, Box<TestableGroupType>>,
}

impl Default for TestManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes results of one group as TAP lines, numbering from `start`
fn write_tap<W: Write>(
    out: &mut W,
    group: &str,
    start: usize,
    res: &[(&'static str, TestResult)],
) -> std::io::Result<()> {
    for (idx, (name, res)) in res.iter().enumerate() {
        let n = start + idx + 1;
        match res {
            TestResult::Passed => writeln!(out, "ok {n} - {group}::{name}")?,
            TestResult::Skipped => writeln!(out, "ok {n} - {group}::{name} # SKIP")?,
            TestResult::Failed(e) => {
                writeln!(out, "not ok {n} - {group}::{name}")?;
                for line in format!("{e:?}").lines() {
                    writeln!(out, "# {line}")?;
                }
            }
        }
    }
    Ok(())
}

impl TestManager {
    /// Create new TestManager
    pub fn new() -> Self {
        TestManager {
            test_groups: BTreeMap::new(),
        }
    }

    /// add a test group to the test manager
    pub fn add_test_group(&mut self, tg: Box<TestableGroupType>) {
        self.test_groups.insert(tg.get_name(), tg);
    }

    /// Run all tests from all tests group
    pub fn run_all(&self) -> Summary {
        let selection: Vec<(&str, Option<Vec<&str>>)> =
            self.test_groups.keys().map(|name| (*name, None)).collect();
        self.run_selected(selection)
    }

    /// Run only selected tests
    pub fn run_selected(&self, tests: Vec<(&str, Option<Vec<&str>>)>) -> Summary {
        let mut selected = Vec::with_capacity(tests.len());
        for (group_name, names) in &tests {
            match self.test_groups.get(group_name) {
                Some(tg) => selected.push((&**tg, names)),
                None => eprintln!("Error : Test Group {group_name} not found, skipping"),
            }
        }

        let run_group = |tg: &TestableGroupType, names: &Option<Vec<&str>>| match names {
            None => tg.run_all(),
            Some(names) => tg.run_selected(names),
        };

        let mut results: Vec<(&'static str, Vec<(&'static str, TestResult)>)> = Vec::new();
        thread::scope(|s| {
            let mut collector = Vec::new();
            for (tg, names) in selected.iter().filter(|(tg, _)| tg.parallel()) {
                let handle = s.spawn(move |_| run_group(*tg, names));
                collector.push((tg.get_name(), handle));
            }
            for (name, handle) in collector {
                match handle.join() {
                    Ok(res) => results.push((name, res)),
                    Err(_) => results.push((
                        name,
                        vec![(
                            "<group>",
                            TestResult::Failed(anyhow::anyhow!("test group panicked")),
                        )],
                    )),
                }
            }
        })
        .unwrap_or_else(|_| eprintln!("Error : test scope panicked"));

        for (tg, names) in selected.iter().filter(|(tg, _)| !tg.parallel()) {
            results.push((tg.get_name(), run_group(*tg, names)));
        }

        self.report(&mut std::io::stdout().lock(), &results)
    }

    fn report<W: Write>(
        &self,
        out: &mut W,
        results: &[(&'static str, Vec<(&'static str, TestResult)>)],
    ) -> Summary {
        let mut summary = Summary::default();
        let mut written = 0;
        for (group, res) in results {
            if let Err(e) = write_tap(out, group, written, res) {
                eprintln!("Failed to write results of {group}: {e}");
            }
            written += res.len();
            for (name, r) in res {
                tracing::debug!(group = *group, test = *name, code = r.code(), "verdict");
                summary.record(r);
            }
        }
        if let Err(e) = writeln!(out, "1..{}", summary.total()) {
            eprintln!("Failed to write test plan: {e}");
        }
        summary
    }

    pub fn tests_groups(&self) -> Vec<String> {
        self.test_groups.iter().map(|tg| tg.0.to_string()).collect()
    }
}
