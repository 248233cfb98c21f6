//! Step-recording test reports.
//!
//! Tests create a [`TestReport`] with [`test_report!`](crate::test_report),
//! route their assertions through it, and on drop the report is written as
//! one JSON document to `$TEST_REPORT_DIR/<test path>.json`. Without
//! `TEST_REPORT_DIR` nothing is written and the assertions behave like the
//! standard macros.

use serde::Serialize;
use std::fmt::{Debug, Display};
use std::path::PathBuf;
use std::sync::Mutex;

/// Start a report named after the enclosing test function.
/// Works for both sync and async tests.
#[macro_export]
macro_rules! test_report {
    ($title:expr) => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let name = &name[..name.len() - 3];
        let name = name.strip_suffix("::{{closure}}").unwrap_or(name);
        $crate::test_support::TestReport::new(name, $title, file!(), line!())
    }};
}

const MAX_VALUE_LEN: usize = 1000;

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Step {
    Setup { message: String },
    Action { message: String },
    Output { label: String, text: String },
    Assert { message: String, passed: bool },
}

#[derive(Serialize)]
struct Report<'a> {
    group: &'a str,
    name: &'a str,
    title: &'a str,
    source: String,
    result: String,
    steps: &'a [Step],
}

pub struct TestReport {
    full_path: String,
    title: String,
    source_file: String,
    source_line: u32,
    report_dir: Option<PathBuf>,
    steps: Mutex<Vec<Step>>,
    skipped: Mutex<Option<String>>,
}

impl TestReport {
    pub fn new(full_path: &str, title: &str, source_file: &str, source_line: u32) -> Self {
        Self {
            full_path: full_path.to_string(),
            title: title.to_string(),
            source_file: source_file.to_string(),
            source_line,
            report_dir: std::env::var_os("TEST_REPORT_DIR").map(PathBuf::from),
            steps: Mutex::new(Vec::new()),
            skipped: Mutex::new(None),
        }
    }

    fn push(&self, step: Step) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push(step);
        }
    }

    /// Mark the test as skipped. Call before returning early.
    #[allow(dead_code)]
    pub fn skip(&self, reason: impl Display) {
        if let Ok(mut skipped) = self.skipped.lock() {
            *skipped = Some(reason.to_string());
        }
    }

    #[allow(dead_code)]
    pub fn setup(&self, message: impl Display) {
        self.push(Step::Setup {
            message: message.to_string(),
        });
    }

    #[allow(dead_code)]
    pub fn action(&self, message: impl Display) {
        self.push(Step::Action {
            message: message.to_string(),
        });
    }

    #[allow(dead_code)]
    pub fn output(&self, label: &str, text: &str) {
        self.push(Step::Output {
            label: label.to_string(),
            text: clip(text),
        });
    }

    fn record(&self, message: String, passed: bool) {
        self.push(Step::Assert { message, passed });
    }

    pub fn assert_eq<A, E>(&self, label: &str, actual: &A, expected: &E)
    where
        A: PartialEq<E> + Debug,
        E: Debug,
    {
        let passed = actual == expected;
        self.record(
            format!(
                "{}: {} == {}",
                label,
                clip(&format!("{:?}", actual)),
                clip(&format!("{:?}", expected))
            ),
            passed,
        );
        assert_eq!(actual, expected, "{}", label);
    }

    #[allow(dead_code)]
    pub fn assert_contains(&self, label: &str, haystack: &str, needle: &str) {
        let passed = haystack.contains(needle);
        self.record(
            format!("{}: {:?} contains {:?}", label, clip(haystack), needle),
            passed,
        );
        assert!(
            passed,
            "{}: {:?} does not contain {:?}",
            label, haystack, needle
        );
    }

    pub fn assert_true(&self, label: &str, value: bool) {
        self.record(label.to_string(), value);
        assert!(value, "{}", label);
    }

    fn write(&self) {
        let Some(dir) = &self.report_dir else {
            return;
        };

        let skipped = self.skipped.lock().ok().and_then(|s| s.clone());
        let result = match skipped {
            Some(reason) => format!("skip: {}", reason),
            None if std::thread::panicking() => "fail".to_string(),
            None => "pass".to_string(),
        };

        let segments: Vec<&str> = self.full_path.split("::").collect();
        let name = segments.last().copied().unwrap_or(&self.full_path);
        let group = if segments.len() >= 2 {
            segments[segments.len() - 2]
        } else {
            &self.full_path
        };

        let Ok(steps) = self.steps.lock() else {
            return;
        };
        let report = Report {
            group,
            name,
            title: &self.title,
            source: format!("{}:{}", self.source_file, self.source_line),
            result,
            steps: &steps,
        };
        let Ok(json) = serde_json::to_string_pretty(&report) else {
            return;
        };
        let path = dir.join(format!("{}.json", self.full_path.replace("::", "__")));
        let _ = std::fs::create_dir_all(dir);
        let _ = std::fs::write(path, json);
    }
}

impl Drop for TestReport {
    fn drop(&mut self) {
        self.write();
    }
}

fn clip(text: &str) -> String {
    if text.len() <= MAX_VALUE_LEN {
        return text.to_string();
    }
    let mut end = MAX_VALUE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… ({} bytes)", &text[..end], text.len())
}
