//! Contains structure for a test group
use std::collections::BTreeMap;

use crossbeam::thread;

use crate::testable::{TestResult, Testable, TestableGroup};

type TestableType = dyn Testable + Sync + Send;

/// Stores tests belonging to a group
pub struct TestGroup {
    /// name of the test group
    name: &'static str,
    /// can the tests of this group run concurrently
    parallel: bool,
    /// tests belonging to this group
    tests: BTreeMap<&'static str, Box<TestableType>>,
}

impl TestGroup {
    /// create a new test group
    pub fn new(name: &'static str) -> Self {
        TestGroup {
            name,
            parallel: true,
            tests: BTreeMap::new(),
        }
    }

    /// run the tests of this group one after the other
    pub fn set_nonparallel(&mut self) {
        self.parallel = false;
    }

    /// add a test to the group
    pub fn add(&mut self, tests: Vec<Box<TestableType>>) {
        tests.into_iter().for_each(|t| {
            self.tests.insert(t.get_name(), t);
        });
    }

    /// names of the tests in this group, in run order
    pub fn test_names(&self) -> Vec<&'static str> {
        self.tests.keys().copied().collect()
    }

    fn run_one(test: &TestableType) -> (&'static str, TestResult) {
        if test.can_run() {
            tracing::debug!(test = test.get_name(), "running test");
            (test.get_name(), test.run())
        } else {
            (test.get_name(), TestResult::Skipped)
        }
    }

    fn run_tests<'a, I>(&self, tests: I) -> Vec<(&'static str, TestResult)>
    where
        I: Iterator<Item = &'a Box<TestableType>>,
    {
        if !self.parallel {
            return tests.map(|t| Self::run_one(t.as_ref())).collect();
        }

        let mut ret = Vec::new();
        thread::scope(|s| {
            let mut collector = Vec::new();
            for t in tests {
                let handle = s.spawn(move |_| Self::run_one(t.as_ref()));
                collector.push((t.get_name(), handle));
            }
            for (name, handle) in collector {
                match handle.join() {
                    Ok(result) => ret.push(result),
                    Err(_) => ret.push((
                        name,
                        TestResult::Failed(anyhow::anyhow!("test thread panicked")),
                    )),
                }
            }
        })
        .unwrap_or_else(|_| tracing::error!(group = self.name, "test scope panicked"));
        ret
    }
}

impl TestableGroup for TestGroup {
    /// get name of the test group
    fn get_name(&self) -> &'static str {
        self.name
    }

    fn parallel(&self) -> bool {
        self.parallel
    }

    /// run all the test from the test group
    fn run_all(&self) -> Vec<(&'static str, TestResult)> {
        self.run_tests(self.tests.values())
    }

    /// run selected test from the group
    fn run_selected(&self, selected: &[&str]) -> Vec<(&'static str, TestResult)> {
        for name in selected {
            if !self.tests.contains_key(name) {
                tracing::warn!(group = self.name, test = name, "no such test in group");
            }
        }
        let selected_tests = self
            .tests
            .iter()
            .filter(|(name, _)| selected.contains(name))
            .map(|(_, t)| t);
        self.run_tests(selected_tests)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::{ConditionalTest, Test};

    fn sample_group() -> TestGroup {
        let mut tg = TestGroup::new("sample");
        tg.add(vec![
            Box::new(Test::new("b_pass", Box::new(|| TestResult::Passed))),
            Box::new(Test::new(
                "a_fail",
                Box::new(|| TestResult::Failed(anyhow::anyhow!("nope"))),
            )),
            Box::new(ConditionalTest::new(
                "c_skip",
                Box::new(|| false),
                Box::new(|| TestResult::Passed),
            )),
        ]);
        tg
    }

    #[test]
    fn test_run_all_is_ordered_by_name() {
        let results = sample_group().run_all();
        let names: Vec<_> = results.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["a_fail", "b_pass", "c_skip"]);
        assert!(results[0].1.is_failed());
        assert!(matches!(results[1].1, TestResult::Passed));
        assert!(matches!(results[2].1, TestResult::Skipped));
    }

    #[test]
    fn test_run_selected() {
        let results = sample_group().run_selected(&["b_pass", "missing"]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "b_pass");
    }

    #[test]
    fn test_nonparallel_runs_every_test() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tg = TestGroup::new("sequential");
        tg.set_nonparallel();
        for name in ["one", "two", "three"] {
            let counter = counter.clone();
            tg.add(vec![Box::new(Test::new(
                name,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    TestResult::Passed
                }),
            ))]);
        }
        assert!(!tg.parallel());
        assert_eq!(tg.run_all().len(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_test_keeps_its_name() {
        let mut tg = TestGroup::new("panics");
        tg.add(vec![
            Box::new(Test::new("boom", Box::new(|| -> TestResult { panic!("exploded") }))),
            Box::new(Test::new("fine", Box::new(|| TestResult::Passed))),
        ]);
        let results = tg.run_all();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "boom");
        assert!(results[0].1.is_failed());
        assert_eq!(results[1].0, "fine");
        assert!(matches!(results[1].1, TestResult::Passed));
    }
}
