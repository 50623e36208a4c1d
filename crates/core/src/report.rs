//! Hierarchical outcome counters.
//!
//! A report is a tree `run -> suite -> fixture -> pipe`. Every node carries a
//! [`ReportCounter`]; a leaf counts its own outcome and every inner node holds
//! the sum of its children. Nodes are only grown through `push`, which keeps
//! the sums right, and are read-only once the run has returned the report.
use crate::outcome::{Outcome, OutcomeKind};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::ops::{Add, AddAssign};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounter {
    pub run: usize,
    pub success: usize,
    pub failure: usize,
    pub ignore: usize,
    pub skip: usize,
}

impl ReportCounter {
    /// The counter of a single leaf with this outcome.
    pub fn of(outcome: &Outcome) -> Self {
        let mut counter = ReportCounter {
            run: 1,
            ..Default::default()
        };
        match outcome.kind() {
            OutcomeKind::Success => counter.success = 1,
            OutcomeKind::Failure => counter.failure = 1,
            OutcomeKind::Ignored => counter.ignore = 1,
            OutcomeKind::Skipped => counter.skip = 1,
        }
        counter
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        match kind {
            OutcomeKind::Success => self.success,
            OutcomeKind::Failure => self.failure,
            OutcomeKind::Ignored => self.ignore,
            OutcomeKind::Skipped => self.skip,
        }
    }
}

impl Add for ReportCounter {
    type Output = ReportCounter;

    fn add(self, rhs: ReportCounter) -> ReportCounter {
        ReportCounter {
            run: self.run + rhs.run,
            success: self.success + rhs.success,
            failure: self.failure + rhs.failure,
            ignore: self.ignore + rhs.ignore,
            skip: self.skip + rhs.skip,
        }
    }
}

impl AddAssign for ReportCounter {
    fn add_assign(&mut self, rhs: ReportCounter) {
        *self = *self + rhs;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Run,
    Suite,
    Fixture,
    Pipe,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportNode {
    pub kind: NodeKind,
    pub name: String,
    counter: ReportCounter,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<Duration>,
    children: Vec<ReportNode>,
}

impl ReportNode {
    pub fn branch(kind: NodeKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            counter: ReportCounter::default(),
            outcome: None,
            duration: None,
            children: Vec::new(),
        }
    }

    pub fn leaf(name: &str, outcome: Outcome, duration: Option<Duration>) -> Self {
        Self {
            kind: NodeKind::Pipe,
            name: name.to_string(),
            counter: ReportCounter::of(&outcome),
            outcome: Some(outcome),
            duration,
            children: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, child: ReportNode) {
        self.counter += child.counter;
        self.children.push(child);
    }

    pub fn counter(&self) -> ReportCounter {
        self.counter
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn children(&self) -> &[ReportNode] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn child(&self, name: &str) -> Option<&ReportNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Follows `path` segment by segment from this node.
    pub fn find<'a, I>(&self, path: I) -> Option<&ReportNode>
    where
        I: IntoIterator<Item = &'a str>,
    {
        path.into_iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Every leaf under this node with its path relative to this node.
    pub fn leaves(&self) -> Vec<(String, &ReportNode)> {
        let mut out = Vec::new();
        for child in &self.children {
            child.collect_leaves(String::new(), &mut out);
        }
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: String, out: &mut Vec<(String, &'a ReportNode)>) {
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{prefix}/{}", self.name)
        };
        if self.is_leaf() {
            out.push((path, self));
        } else {
            for child in &self.children {
                child.collect_leaves(path.clone(), out);
            }
        }
    }

    /// Union keyed by (kind, name): matching branches merge recursively,
    /// everything else is appended.
    fn merge(&mut self, other: ReportNode) {
        for child in other.children {
            self.counter += child.counter;
            let existing = if child.is_leaf() {
                None
            } else {
                self.children
                    .iter_mut()
                    .find(|c| !c.is_leaf() && c.kind == child.kind && c.name == child.name)
            };
            match existing {
                Some(node) => node.merge(child),
                None => self.children.push(child),
            }
        }
    }
}

/// The result of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    root: ReportNode,
    started_at: DateTime<Local>,
    finished_at: DateTime<Local>,
    /// Suite ids of every dependency cycle found, one list per cycle.
    cycles: Vec<Vec<String>>,
}

impl Report {
    pub(crate) fn new(
        root: ReportNode,
        started_at: DateTime<Local>,
        cycles: Vec<Vec<String>>,
    ) -> Self {
        Self {
            root,
            started_at,
            finished_at: Local::now(),
            cycles,
        }
    }

    pub fn root(&self) -> &ReportNode {
        &self.root
    }

    pub fn counter(&self) -> ReportCounter {
        self.root.counter
    }

    pub fn suites(&self) -> &[ReportNode] {
        &self.root.children
    }

    pub fn suite(&self, id: &str) -> Option<&ReportNode> {
        self.root.child(id)
    }

    /// Looks up a node by `suite/fixture/pipe` (or any prefix of it).
    pub fn find(&self, path: &str) -> Option<&ReportNode> {
        // Pipe names may contain '/', so only the first two separators split.
        self.root.find(path.splitn(3, '/'))
    }

    pub fn outcome(&self, path: &str) -> Option<&Outcome> {
        self.find(path).and_then(|n| n.outcome())
    }

    pub fn leaves(&self) -> Vec<(String, &ReportNode)> {
        self.root.leaves()
    }

    /// Paths of every failed pipe, in report order.
    pub fn failing(&self) -> Vec<String> {
        self.leaves()
            .into_iter()
            .filter(|(_, n)| n.counter.failure > 0)
            .map(|(path, _)| path)
            .collect()
    }

    pub fn total(&self, kind: OutcomeKind) -> usize {
        self.root.counter.count(kind)
    }

    /// No pipe failed. Skipped and ignored pipes do not count against a run.
    pub fn is_success(&self) -> bool {
        self.root.counter.failure == 0
    }

    pub fn cycles(&self) -> &[Vec<String>] {
        &self.cycles
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Local> {
        self.finished_at
    }

    /// Every pipe path with its outcome kind; two runs of the same suites
    /// have the same shape.
    pub fn shape(&self) -> Vec<(String, OutcomeKind)> {
        self.leaves()
            .into_iter()
            .filter_map(|(path, n)| n.outcome().map(|o| (path, o.kind())))
            .collect()
    }

    /// Structural merge: suites and fixtures with the same identity are
    /// unified and their counters summed; pipes are concatenated.
    pub fn merge(mut self, other: Report) -> Report {
        self.root.merge(other.root);
        self.started_at = self.started_at.min(other.started_at);
        self.finished_at = self.finished_at.max(other.finished_at);
        for cycle in other.cycles {
            if !self.cycles.contains(&cycle) {
                self.cycles.push(cycle);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{FailureKind, SkipKind};

    fn fixture(name: &str, outcomes: Vec<(&str, Outcome)>) -> ReportNode {
        let mut node = ReportNode::branch(NodeKind::Fixture, name);
        for (pipe, outcome) in outcomes {
            node.push(ReportNode::leaf(pipe, outcome, None));
        }
        node
    }

    fn report(suite: &str, fixtures: Vec<ReportNode>) -> Report {
        let mut s = ReportNode::branch(NodeKind::Suite, suite);
        for f in fixtures {
            s.push(f);
        }
        let mut root = ReportNode::branch(NodeKind::Run, "run");
        root.push(s);
        Report::new(root, Local::now(), Vec::new())
    }

    fn assert_sums(node: &ReportNode) {
        if node.is_leaf() {
            assert_eq!(node.counter().run, 1);
            return;
        }
        let sum = node
            .children()
            .iter()
            .fold(ReportCounter::default(), |acc, c| acc + c.counter());
        assert_eq!(node.counter(), sum, "node {}", node.name);
        assert_eq!(node.counter().run, node.leaves().len());
        node.children().iter().for_each(assert_sums);
    }

    #[test]
    fn test_counters_propagate() {
        let r = report(
            "s",
            vec![
                fixture(
                    "f1",
                    vec![
                        ("a", Outcome::Success),
                        ("b", Outcome::failure(FailureKind::Assertion, "x")),
                    ],
                ),
                fixture(
                    "f2",
                    vec![
                        ("c", Outcome::ignored("later")),
                        ("d", Outcome::skipped(SkipKind::Cancelled, "stop")),
                    ],
                ),
            ],
        );
        assert_eq!(
            r.counter(),
            ReportCounter {
                run: 4,
                success: 1,
                failure: 1,
                ignore: 1,
                skip: 1
            }
        );
        assert_sums(r.root());
        assert!(!r.is_success());
        assert_eq!(r.failing(), vec!["s/f1/b"]);
        assert_eq!(r.total(OutcomeKind::Ignored), 1);
    }

    #[test]
    fn test_find_by_path_allows_slash_in_pipe_name() {
        let r = report(
            "s",
            vec![fixture("f", vec![("div(1/2)", Outcome::Success)])],
        );
        assert_eq!(r.outcome("s/f/div(1/2)"), Some(&Outcome::Success));
        assert_eq!(r.find("s/f").unwrap().counter().run, 1);
        assert!(r.find("s/nope").is_none());
    }

    #[test]
    fn test_merge_unions_by_identity() {
        let left = report("s", vec![fixture("f", vec![("a", Outcome::Success)])]);
        let right = report(
            "s",
            vec![
                fixture("f", vec![("b", Outcome::failure(FailureKind::Timeout, "slow"))]),
                fixture("g", vec![("c", Outcome::Success)]),
            ],
        );
        let other_suite = report("t", vec![fixture("f", vec![("a", Outcome::Success)])]);

        let merged = left.merge(right).merge(other_suite);
        assert_eq!(merged.suites().len(), 2);
        assert_eq!(merged.find("s/f").unwrap().children().len(), 2);
        assert_eq!(merged.counter().run, 4);
        assert_eq!(merged.suite("s").unwrap().counter().failure, 1);
        assert_sums(merged.root());
    }

    #[test]
    fn test_shape_lists_every_leaf() {
        let r = report(
            "s",
            vec![fixture(
                "f",
                vec![
                    ("a", Outcome::Success),
                    ("b", Outcome::ignored("no")),
                ],
            )],
        );
        assert_eq!(
            r.shape(),
            vec![
                ("s/f/a".to_string(), OutcomeKind::Success),
                ("s/f/b".to_string(), OutcomeKind::Ignored)
            ]
        );
    }
}
