//! Scripted specialists, a recording sink and a fault-injecting store for
//! orchestrator and bridge tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::events::{EventSink, WorkflowEvent, WorkflowEventKind};
use crate::skills::{
    ArchitectRequest, CritiqueRequest, ElicitationRequest, PromptPackage, Questionnaire,
    RefineRequest, Specialist, SpecialistOutput, SpecialistRole, Specialists, SpecDocument,
    SynthesisRequest, Synthesizer, Usage,
};
use crate::state::{
    CriticIssue, CritiqueReport, LogEntry, NewLogEntry, NewProject, ParsedPrompt, ProjectId,
    ProjectRecord, ProjectStore, PromptsmithDb, Question, Severity, SqliteProjectStore,
    UsageRecord,
};

/// Usage of `tokens` input tokens costing `cost`
pub fn usage(tokens: u64, cost: f64) -> Usage {
    Usage::new("test-model", tokens, 0, cost)
}

/// Specialist replaying queued results in order
pub struct ScriptedSpecialist<I, O> {
    role: SpecialistRole,
    results: Mutex<VecDeque<Result<SpecialistOutput<O>>>>,
    inputs: Mutex<Vec<I>>,
    calls: AtomicUsize,
}

impl<I, O> ScriptedSpecialist<I, O> {
    pub fn new(role: SpecialistRole) -> Self {
        Self {
            role,
            results: Mutex::new(VecDeque::new()),
            inputs: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, result: Result<SpecialistOutput<O>>) -> Self {
        self.results.lock().unwrap().push_back(result);
        self
    }

    pub fn then_ok(self, payload: O, usage: Usage) -> Self {
        self.then(Ok(SpecialistOutput::new(payload, usage)))
    }

    pub fn then_err(self, message: &str) -> Self {
        self.then(Err(anyhow!(message.to_string())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self, input: I) -> Result<SpecialistOutput<O>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted result for {}", self.role)))
    }
}

impl<I: Clone, O> ScriptedSpecialist<I, O> {
    pub fn inputs(&self) -> Vec<I> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl<I, O> Specialist for ScriptedSpecialist<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    fn role(&self) -> SpecialistRole {
        self.role
    }

    async fn execute(&self, input: I) -> Result<SpecialistOutput<O>> {
        self.next(input)
    }
}

/// Synthesizer with separate queues for `execute` and `refine`
pub struct ScriptedSynthesizer {
    pub synthesize: ScriptedSpecialist<SynthesisRequest, PromptPackage>,
    pub refine: ScriptedSpecialist<RefineRequest, PromptPackage>,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self {
            synthesize: ScriptedSpecialist::new(SpecialistRole::Synthesizer),
            refine: ScriptedSpecialist::new(SpecialistRole::Synthesizer),
        }
    }

    pub fn then_package(mut self, package: PromptPackage, usage: Usage) -> Self {
        self.synthesize = self.synthesize.then_ok(package, usage);
        self
    }

    pub fn then_refined(mut self, result: Result<SpecialistOutput<PromptPackage>>) -> Self {
        self.refine = self.refine.then(result);
        self
    }
}

#[async_trait]
impl Specialist for ScriptedSynthesizer {
    type Input = SynthesisRequest;
    type Output = PromptPackage;

    fn role(&self) -> SpecialistRole {
        SpecialistRole::Synthesizer
    }

    async fn execute(&self, input: SynthesisRequest) -> Result<SpecialistOutput<PromptPackage>> {
        self.synthesize.next(input)
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn refine(&self, input: RefineRequest) -> Result<SpecialistOutput<PromptPackage>> {
        self.refine.next(input)
    }
}

/// The four scripted specialists of one test
pub struct Script {
    pub elicitor: Arc<ScriptedSpecialist<ElicitationRequest, Questionnaire>>,
    pub architect: Arc<ScriptedSpecialist<ArchitectRequest, SpecDocument>>,
    pub synthesizer: Arc<ScriptedSynthesizer>,
    pub critic: Arc<ScriptedSpecialist<CritiqueRequest, CritiqueReport>>,
}

impl Script {
    pub fn new(
        elicitor: ScriptedSpecialist<ElicitationRequest, Questionnaire>,
        architect: ScriptedSpecialist<ArchitectRequest, SpecDocument>,
        synthesizer: ScriptedSynthesizer,
        critic: ScriptedSpecialist<CritiqueRequest, CritiqueReport>,
    ) -> Self {
        Self {
            elicitor: Arc::new(elicitor),
            architect: Arc::new(architect),
            synthesizer: Arc::new(synthesizer),
            critic: Arc::new(critic),
        }
    }

    /// No results queued; every call fails
    pub fn empty() -> Self {
        Self::new(
            ScriptedSpecialist::new(SpecialistRole::Elicitor),
            ScriptedSpecialist::new(SpecialistRole::Architect),
            ScriptedSynthesizer::new(),
            ScriptedSpecialist::new(SpecialistRole::Critic),
        )
    }

    pub fn specialists(&self) -> Specialists {
        Specialists::new(
            self.elicitor.clone(),
            self.architect.clone(),
            self.synthesizer.clone(),
            self.critic.clone(),
        )
    }

    pub fn total_calls(&self) -> usize {
        self.elicitor.calls()
            + self.architect.calls()
            + self.synthesizer.synthesize.calls()
            + self.synthesizer.refine.calls()
            + self.critic.calls()
    }
}

pub fn questionnaire() -> Questionnaire {
    Questionnaire {
        questions: vec![
            Question {
                number: 1,
                topic: "Users".to_string(),
                text: "Who will use the app?".to_string(),
                options: vec!["Just me".to_string(), "A team".to_string()],
            },
            Question {
                number: 2,
                topic: "Data".to_string(),
                text: "What needs to be stored?".to_string(),
                options: vec![],
            },
        ],
        raw_markdown: "## Question 1: Users\nWho will use the app?".to_string(),
    }
}

pub fn spec_document() -> SpecDocument {
    let tech_stack: BTreeMap<String, String> = [
        ("frontend", "React"),
        ("backend", "FastAPI"),
        ("database", "PostgreSQL"),
        ("styling", "Tailwind"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    SpecDocument {
        spec_md: "# Spec\n\n## Overview\nA habit tracker.".to_string(),
        tech_stack,
        missing_sections: vec![],
    }
}

/// Package of `count` prompts whose bodies carry `tag`
pub fn package(count: u32, tag: &str) -> PromptPackage {
    let prompts: Vec<ParsedPrompt> = (1..=count)
        .map(|n| ParsedPrompt {
            number: n,
            title: format!("Step {}", n),
            content: format!("{} body {}", tag, n),
        })
        .collect();
    let raw_markdown = prompts
        .iter()
        .map(|p| format!("## Prompt {}: {}\n{}", p.number, p.title, p.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    PromptPackage {
        prompts,
        raw_markdown,
    }
}

pub fn clean_report() -> CritiqueReport {
    CritiqueReport {
        issues_found: false,
        severity: Severity::None,
        issues: vec![],
        overall_assessment: "Looks good".to_string(),
    }
}

/// Report with one blocking and one minor issue at `severity`
pub fn flagged_report(severity: Severity) -> CritiqueReport {
    CritiqueReport {
        issues_found: true,
        severity,
        issues: vec![
            CriticIssue {
                prompt_number: 2,
                category: "completeness".to_string(),
                severity,
                description: "Missing auth flow".to_string(),
                suggestion: "Add login steps".to_string(),
            },
            CriticIssue {
                prompt_number: 3,
                category: "clarity".to_string(),
                severity: Severity::Minor,
                description: "Vague wording".to_string(),
                suggestion: "Be specific".to_string(),
            },
        ],
        overall_assessment: "Needs work".to_string(),
    }
}

/// Sink keeping every published event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, WorkflowEvent)>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<WorkflowEventKind> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.event_type)
            .collect()
    }

    pub fn events(&self) -> Vec<(String, WorkflowEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn last(&self, kind: WorkflowEventKind) -> Option<WorkflowEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, e)| e.event_type == kind)
            .map(|(_, e)| e.clone())
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, topic: &str, event: &WorkflowEvent) {
        self.events
            .lock()
            .unwrap()
            .push((topic.to_string(), event.clone()));
    }
}

/// SQLite store whose writes can be made to fail
pub struct FlakyStore {
    inner: SqliteProjectStore,
    pub fail_save: AtomicBool,
    pub fail_log: AtomicBool,
}

impl FlakyStore {
    pub fn new(db: &PromptsmithDb) -> Self {
        Self {
            inner: SqliteProjectStore::new(db),
            fail_save: AtomicBool::new(false),
            fail_log: AtomicBool::new(false),
        }
    }
}

impl ProjectStore for FlakyStore {
    fn create_project(&self, project: &NewProject) -> Result<ProjectRecord> {
        self.inner.create_project(project)
    }

    fn load_project(&self, id: ProjectId) -> Result<ProjectRecord> {
        self.inner.load_project(id)
    }

    fn save_project(&self, record: &ProjectRecord) -> Result<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(anyhow!("disk full"));
        }
        self.inner.save_project(record)
    }

    fn mark_failed(&self, id: ProjectId, error: &str) -> Result<()> {
        self.inner.mark_failed(id, error)
    }

    fn append_log(&self, id: ProjectId, entry: NewLogEntry) -> Result<LogEntry> {
        if self.fail_log.load(Ordering::SeqCst) {
            return Err(anyhow!("log table locked"));
        }
        self.inner.append_log(id, entry)
    }

    fn list_logs(&self, id: ProjectId) -> Result<Vec<LogEntry>> {
        self.inner.list_logs(id)
    }

    fn record_usage(&self, usage: &UsageRecord) -> Result<()> {
        self.inner.record_usage(usage)
    }

    fn list_usage(&self, id: ProjectId) -> Result<Vec<UsageRecord>> {
        self.inner.list_usage(id)
    }
}
